use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;
use unicode_normalization::UnicodeNormalization;

use crate::config::CorrectionRule;

static FINDINGS_BULLET_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[•\-*]\s*").expect("findings bullet regex"));
static IMPRESSION_BULLET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[•●○■□▪▫◆◇★☆→›»\-*]\s*").expect("impression bullet regex"));
static REPLACE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)Replace\s+["']?([^"']+)["']?\s+with\s+["']?([^"']+)["']?(?:\s*\(([^)]+)\))?"#)
        .expect("replace regex")
});

/// Rules pulled out of a free-text rules document.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ParsedRules {
    pub corrections: Vec<CorrectionRule>,
    pub custom_rules: Vec<String>,
}

impl ParsedRules {
    pub fn is_empty(&self) -> bool {
        self.corrections.is_empty() && self.custom_rules.is_empty()
    }
}

/// Global rules kept as free text outside the layered configuration.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct GlobalRules {
    pub findings: ParsedRules,
    pub impression: ParsedRules,
}

impl GlobalRules {
    pub fn parse(findings: Option<&str>, impression: Option<&str>) -> Self {
        Self {
            findings: findings.map(parse_findings_rules).unwrap_or_default(),
            impression: impression.map(parse_impression_rules).unwrap_or_default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty() && self.impression.is_empty()
    }
}

/// Splits a findings rules document into correction rules (`Replace "a" with "b" (why)`)
/// and free-form rules.
pub fn parse_findings_rules(text: &str) -> ParsedRules {
    let mut parsed = ParsedRules::default();

    for line in rule_lines(text, &FINDINGS_BULLET_RE) {
        match REPLACE_RE.captures(&line) {
            Some(caps) => {
                let find = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
                let replace = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");
                let mut rule = CorrectionRule::new(find, replace);
                if let Some(description) = caps.get(3).map(|m| m.as_str().trim()) {
                    if !description.is_empty() {
                        rule = rule.with_description(description);
                    }
                }
                parsed.corrections.push(rule);
            }
            None => parsed.custom_rules.push(line),
        }
    }

    debug!(
        corrections = parsed.corrections.len(),
        custom_rules = parsed.custom_rules.len(),
        "parsed findings rules text"
    );
    parsed
}

/// Every usable line of an impression rules document becomes a custom impression rule.
pub fn parse_impression_rules(text: &str) -> ParsedRules {
    let parsed = ParsedRules {
        corrections: Vec::new(),
        custom_rules: rule_lines(text, &IMPRESSION_BULLET_RE),
    };
    debug!(custom_rules = parsed.custom_rules.len(), "parsed impression rules text");
    parsed
}

/// Non-empty lines with headers (`...:`), examples and leading bullets removed.
fn rule_lines(text: &str, bullet: &Regex) -> Vec<String> {
    normalize_text(text)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.ends_with(':') && !line.starts_with("Example"))
        .map(|line| bullet.replace(line, "").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

// Quotes are straightened first: NFKC splits a double prime into two single primes.
fn normalize_text(input: &str) -> String {
    input
        .replace(['\u{201C}', '\u{201D}', '\u{2033}'], "\"")
        .replace(['\u{2018}', '\u{2019}', '\u{201B}', '\u{2032}'], "'")
        .nfkc()
        .collect()
}
