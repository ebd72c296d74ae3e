use std::fmt;

use thiserror::Error;
use tracing::debug;

use crate::compiler::{is_marker, CompiledDirectives};

pub const FINDINGS_START: &str = "=== FINDINGS TO INCORPORATE ===";
pub const FINDINGS_END: &str = "=== END OF FINDINGS ===";

pub const GENERAL_HEADER: &str = "GENERAL REQUIREMENTS:";
pub const FINDINGS_HEADER: &str = "FINDINGS SECTION RULES:";
pub const IMPRESSION_HEADER: &str = "IMPRESSION SECTION RULES:";
pub const CUSTOM_HEADER: &str = "CUSTOM INSTRUCTIONS:";
pub const FINAL_HEADER: &str = "FINAL REQUIREMENTS:";

const DEFAULT_ROLE: &str = "You are an expert radiologist generating a comprehensive radiology report.";

const TEMPLATE_HEADER: &str = "TEMPLATE STRUCTURE - MANDATORY COMPLIANCE:";
const TEMPLATE_HEADERS_RULE: &str =
    "CRITICAL: Preserve ALL section headers (text ending with \":\") EXACTLY as shown above.";
const TEMPLATE_SPACING_RULE: &str = "CRITICAL SPACING RULE: Always include a space after colons in section headers (e.g., \"Neurovascular structures: Unremarkable\" NOT \"Neurovascular structures:Unremarkable\"). This spacing is mandatory and must be preserved exactly as shown in the template.";

const FINDINGS_BLOCK_HEADER: &str = "MANDATORY FINDINGS INCORPORATION:";
const FINDINGS_MANDATE: &str = "CRITICAL REQUIREMENT: Every single finding above MUST appear in the appropriate section of your report. Omitting any finding is unacceptable.";

const FINAL_REQUIREMENTS: [&str; 5] = [
    "Use the EXACT section headers from the template (preserve all text ending with \":\")",
    "Incorporate EVERY SINGLE finding from the \"=== FINDINGS TO INCORPORATE ===\" section",
    "Follow ALL rules in the sections above without exception",
    "Write natural, clinically accurate content within each section",
    "Maintain professional medical terminology throughout",
];
const GENERATE_NOW: &str = "Generate the complete radiology report now following all requirements above.";

/// Which caller-supplied text tripped the delimiter guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextInput {
    Findings,
    Template,
}

impl fmt::Display for TextInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextInput::Findings => f.write_str("findings"),
            TextInput::Template => f.write_str("template"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssembleError {
    #[error("{input} text contains the reserved delimiter `{delimiter}`")]
    DelimiterCollision { input: TextInput, delimiter: &'static str },
}

/// Builds the final directive document around compiled directives.
#[derive(Debug, Clone, Default)]
pub struct Assembler {
    role_prompt: Option<String>,
    strict: bool,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the leading role sentence. Blank prompts keep the default.
    pub fn with_role_prompt(mut self, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        self.role_prompt = (!prompt.trim().is_empty()).then_some(prompt);
        self
    }

    /// When set, findings or template text containing a delimiter line is rejected.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn assemble(
        &self,
        findings: &str,
        template: Option<&str>,
        compiled: &CompiledDirectives,
    ) -> Result<String, AssembleError> {
        if self.strict {
            check_delimiters(TextInput::Findings, findings)?;
            if let Some(template) = template {
                check_delimiters(TextInput::Template, template)?;
            }
        }
        Ok(self.render(findings, template, compiled))
    }

    fn render(&self, findings: &str, template: Option<&str>, compiled: &CompiledDirectives) -> String {
        let mut document = role_block(self.role_prompt.as_deref());

        if let Some(template) = template.filter(|t| !t.is_empty()) {
            document.push_str(TEMPLATE_HEADER);
            document.push_str("\n\n");
            document.push_str(template);
            document.push_str("\n\n");
            document.push_str(TEMPLATE_HEADERS_RULE);
            document.push_str("\n\n");
            document.push_str(TEMPLATE_SPACING_RULE);
            document.push_str("\n\n");
        }

        document.push_str(FINDINGS_BLOCK_HEADER);
        document.push_str("\n\n");
        document.push_str(FINDINGS_START);
        document.push('\n');
        document.push_str(findings);
        document.push('\n');
        document.push_str(FINDINGS_END);
        document.push_str("\n\n");
        document.push_str(FINDINGS_MANDATE);
        document.push_str("\n\n");

        render_section(&mut document, GENERAL_HEADER, &compiled.general, Numbering::Every);
        render_section(&mut document, FINDINGS_HEADER, &compiled.findings, Numbering::SkipMarkers);
        render_section(&mut document, IMPRESSION_HEADER, &compiled.impression, Numbering::SkipMarkers);
        render_section(&mut document, CUSTOM_HEADER, &compiled.custom, Numbering::Every);
        render_section(&mut document, FINAL_HEADER, &FINAL_REQUIREMENTS, Numbering::Every);
        document.push_str(GENERATE_NOW);
        document.push('\n');

        debug!(
            bytes = document.len(),
            directives = compiled.total(),
            with_template = template.is_some_and(|t| !t.is_empty()),
            "assembled directive document"
        );
        document
    }
}

/// Assembles with the default role sentence and no delimiter checks.
pub fn assemble(findings: &str, template: Option<&str>, compiled: &CompiledDirectives) -> String {
    Assembler::default().render(findings, template, compiled)
}

fn check_delimiters(input: TextInput, text: &str) -> Result<(), AssembleError> {
    for delimiter in [FINDINGS_START, FINDINGS_END] {
        if text.contains(delimiter) {
            return Err(AssembleError::DelimiterCollision { input, delimiter });
        }
    }
    Ok(())
}

/// The role sentence followed by exactly one blank line.
fn role_block(prompt: Option<&str>) -> String {
    let mut block = prompt.unwrap_or(DEFAULT_ROLE).to_string();
    if !block.ends_with('\n') {
        block.push_str("\n\n");
    } else if !block.ends_with("\n\n") {
        block.push('\n');
    }
    block
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Numbering {
    Every,
    /// Marker entries print as-is and do not advance the counter.
    SkipMarkers,
}

fn render_section<S: AsRef<str>>(document: &mut String, header: &str, entries: &[S], numbering: Numbering) {
    if entries.is_empty() {
        return;
    }

    document.push_str(header);
    document.push('\n');

    let mut index = 1;
    for entry in entries {
        let entry = entry.as_ref();
        if numbering == Numbering::SkipMarkers && is_marker(entry) {
            document.push_str(entry);
        } else {
            document.push_str(&format!("{index}. {entry}"));
            index += 1;
        }
        document.push('\n');
    }
    document.push('\n');
}
