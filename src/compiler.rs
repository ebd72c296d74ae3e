use serde::Serialize;
use tracing::debug;

use crate::config::{
    AnatomicRouting, Configuration, CorrectionRule, Exclusion, GeneralRules, ImpressionRules, ImpressionStyle,
    ReportRules, Spacing, ToneStyle,
};
use crate::rules_text::{GlobalRules, ParsedRules};

pub const BULLET: &str = "•";
pub const EXCLUSION_HEADER: &str = "Do not mention these findings in the impression:";
const GLOBAL_PREFIX: &str = "[Global]";

const TONE_DEFINITIVE: &str = "Use definitive language throughout the report. When findings are clear, use direct terms like \"demonstrates\", \"shows\", \"is\", and \"confirms\". State diagnoses with confidence when imaging findings support them.";
const TONE_CAUTIOUS: &str = "Maintain a cautious tone throughout the report. Avoid making definitive diagnoses; instead suggest possibilities using terms like \"suggests\", \"likely represents\", \"appears to be\", \"may indicate\", and \"is concerning for\". Present findings as observations rather than conclusions.";
const TONE_BALANCED: &str = "Maintain a balanced tone between cautious and definitive language. Use definitive terms for clear, unambiguous findings (e.g., \"demonstrates a fracture\") and cautious terms for uncertain or differential findings (e.g., \"likely represents\", \"suggests\"). Match the certainty of your language to the certainty of the imaging findings.";

const PRESERVE_PUNCTUATION: [&str; 4] = [
    "Preserve section headers EXACTLY as shown (including punctuation and spacing)",
    "Within each section, prioritize natural clinical phrasing over template wording",
    "When pathology is present, describe it directly without awkwardly negating template phrases",
    "Omit template phrases that become redundant when combined with pathologic findings",
];
const USE_BULLETS: &str = "Use bullet points for listing multiple findings within each section";
const PREVENT_CAPITALIZATION: &str = "Avoid unnecessary capitalization - use standard case unless specified";
const EXPAND_LESIONS: &str = "When the user describes a lesion finding without providing detailed imaging characteristics, please expand the description to include typical MRI or CT imaging features such as signal intensity/attenuation, margins (well-defined vs ill-defined), enhancement pattern, mass effect, and other relevant imaging characteristics commonly seen with such lesions. Add these descriptors naturally as would be typical in a radiology report.";

const ROUTE_LOOSE_BODIES: &str = "Describe loose bodies under the joints section";
const ROUTE_BONE_CONTUSIONS: &str = "Describe bone contusions under the osseous structures or bone marrow section";
const ROUTE_JOINT_EFFUSIONS: &str = "Describe joint effusions under the joint space section";
const ROUTE_GROUP_BY_TYPE: &str = "Group similar pathology together by type";

const FINDINGS_CLOSING: [&str; 2] = [
    "Do not invent findings. Only report what is explicitly stated in the provided findings",
    "Incorporate ALL findings from the \"=== FINDINGS TO INCORPORATE ===\" section",
];

const FORMAT_NUMBERED: &str = "The impression should be formatted as a short numbered list, but closely related findings (e.g., osteoarthritis + meniscal tear in the same compartment) should be combined into one item.";
const FORMAT_BULLETS: &str = "Format the impression as a bullet point list using • symbols";
const FORMAT_PROSE: &str = "Format the impression as continuous prose without bullets or numbers";

const GROUP_SEVERITY: &str = "Group impression items by severity (most to least severe)";
const GROUP_ANATOMIC: &str = "Group impression items by anatomic region (e.g., lateral → medial → central)";
const GROUP_CLINICAL: &str = "Group impression items by clinical relevance based on keywords";

const IMPRESSION_CLOSING: [&str; 3] = [
    "Focus on clinically significant findings",
    "Omit incidental findings unless relevant to clinical history",
    "Keep the impression concise and actionable",
];

/// Section-grouped directive sentences, unnumbered. Numbering happens when the document is assembled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompiledDirectives {
    pub general: Vec<String>,
    pub findings: Vec<String>,
    pub impression: Vec<String>,
    pub custom: Vec<String>,
}

impl CompiledDirectives {
    pub fn total(&self) -> usize {
        self.general.len() + self.findings.len() + self.impression.len() + self.custom.len()
    }
}

/// Entries that render without a number: blank spacers, bullet lines and the exclusion header.
pub fn is_marker(entry: &str) -> bool {
    entry.is_empty() || entry.starts_with(BULLET) || entry == EXCLUSION_HEADER
}

pub fn compile(config: &Configuration) -> CompiledDirectives {
    compile_with_globals(config, &GlobalRules::default())
}

/// Compiles with free-text global rules spliced in: global corrections and rules sit between
/// the general and report corrections, global impression rules right after the format sentences.
pub fn compile_with_globals(config: &Configuration, globals: &GlobalRules) -> CompiledDirectives {
    let compiled = CompiledDirectives {
        general: general_directives(&config.general),
        findings: findings_directives(&config.general, &config.report, &globals.findings),
        impression: impression_directives(&config.impression, &globals.impression),
        custom: config.custom_instructions.clone(),
    };

    debug!(
        general = compiled.general.len(),
        findings = compiled.findings.len(),
        impression = compiled.impression.len(),
        custom = compiled.custom.len(),
        "compiled directives"
    );
    compiled
}

fn general_directives(general: &GeneralRules) -> Vec<String> {
    let mut rules = Vec::new();

    let tone = match general.tone.style {
        ToneStyle::Definitive => Some(TONE_DEFINITIVE),
        ToneStyle::Cautious => Some(TONE_CAUTIOUS),
        ToneStyle::Balanced => Some(TONE_BALANCED),
        ToneStyle::Unrecognized => None,
    };
    if let Some(sentence) = tone {
        rules.push(sentence.to_string());
    }

    let items: Vec<String> = general
        .disallowed_items
        .active()
        .into_iter()
        .map(|item| item.replace('_', " "))
        .collect();
    if !items.is_empty() {
        rules.push(format!("Do NOT include: {}", items.join(", ")));
    }

    let symbols = &general.disallowed_symbols;
    if symbols.enabled && !symbols.symbols.is_empty() {
        rules.push(format!("Do NOT use these symbols: {}", symbols.symbols.join(", ")));
    }

    rules
}

fn findings_directives(general: &GeneralRules, report: &ReportRules, global: &ParsedRules) -> Vec<String> {
    let mut rules: Vec<String> = general.corrections.rules.iter().filter_map(correction_sentence).collect();
    rules.extend(
        global
            .corrections
            .iter()
            .filter_map(correction_sentence)
            .map(|sentence| format!("{GLOBAL_PREFIX} {sentence}")),
    );
    rules.extend(global.custom_rules.iter().cloned());
    rules.extend(report.corrections.rules.iter().filter_map(correction_sentence));

    let formatting = &report.formatting;
    if formatting.preserve_template_punctuation {
        rules.extend(PRESERVE_PUNCTUATION.iter().map(|s| s.to_string()));
    }
    if formatting.use_bullet_points {
        rules.push(USE_BULLETS.to_string());
    }
    if formatting.prevent_unnecessary_capitalization {
        rules.push(PREVENT_CAPITALIZATION.to_string());
    }

    let language = &report.language;
    if language.avoid_words.enabled && !language.avoid_words.words.is_empty() {
        rules.push(format!("Avoid using these words: {}", language.avoid_words.words.join(", ")));
    }
    if language.avoid_phrases.enabled && !language.avoid_phrases.phrases.is_empty() {
        rules.push(format!("Avoid these phrases: {}", language.avoid_phrases.phrases.join(", ")));
    }
    if language.expand_lesion_descriptions {
        rules.push(EXPAND_LESIONS.to_string());
    }

    rules.extend(routing_directives(&report.anatomic_routing_rules));
    rules.extend(report.custom_rules.iter().cloned());
    rules.extend(FINDINGS_CLOSING.iter().map(|s| s.to_string()));
    rules
}

fn correction_sentence(rule: &CorrectionRule) -> Option<String> {
    if rule.find.is_empty() || rule.replace.is_empty() {
        debug!(find = %rule.find, "skipping incomplete correction rule");
        return None;
    }

    let mut sentence = format!("Replace \"{}\" with \"{}\"", rule.find, rule.replace);
    if let Some(description) = rule.description.as_deref().filter(|d| !d.is_empty()) {
        sentence.push_str(&format!(" ({description})"));
    }
    Some(sentence)
}

fn routing_directives(routing: &AnatomicRouting) -> Vec<String> {
    match routing {
        AnatomicRouting::Routes(routes) => routes
            .iter()
            .filter(|route| !route.condition.is_empty() && !route.route_to.is_empty())
            .map(|route| {
                format!(
                    "If finding contains \"{}\", route to \"{}\" section",
                    route.condition, route.route_to
                )
            })
            .collect(),
        AnatomicRouting::Legacy(legacy) => {
            let mut rules = Vec::new();
            if legacy.loose_bodies == "joints" {
                rules.push(ROUTE_LOOSE_BODIES.to_string());
            }
            if legacy.bone_contusions == "ossea_or_bone_marrow" {
                rules.push(ROUTE_BONE_CONTUSIONS.to_string());
            }
            if legacy.joint_effusions == "joint_space" {
                rules.push(ROUTE_JOINT_EFFUSIONS.to_string());
            }
            if legacy.group_pathology_by_type {
                rules.push(ROUTE_GROUP_BY_TYPE.to_string());
            }
            rules
        }
    }
}

fn impression_directives(impression: &ImpressionRules, global: &ParsedRules) -> Vec<String> {
    let mut rules = Vec::new();

    let style = impression.format.style;
    let double = impression.format.spacing == Spacing::Double;
    match style {
        ImpressionStyle::NumericallyItemized => {
            rules.push(FORMAT_NUMBERED.to_string());
            rules.push(spacing_sentence(double, "numbered item"));
        }
        ImpressionStyle::BulletPoints => {
            rules.push(FORMAT_BULLETS.to_string());
            rules.push(spacing_sentence(double, "bullet point"));
        }
        ImpressionStyle::None => rules.push(FORMAT_PROSE.to_string()),
        ImpressionStyle::Unrecognized => {}
    }
    rules.extend(global.custom_rules.iter().cloned());

    let exclusions: Vec<String> = impression
        .exclude_by_default
        .iter()
        .filter_map(exclusion_text)
        .collect();
    if !exclusions.is_empty() {
        rules.push(String::new());
        rules.push(EXCLUSION_HEADER.to_string());
        rules.extend(exclusions.into_iter().map(|text| format!("{BULLET} {text}")));
        rules.push(String::new());
    }

    let opening = &impression.required_opening_phrase;
    if opening.enabled && !opening.phrase.is_empty() {
        rules.push(format!("The first impression item MUST start with: \"{}\"", opening.phrase));
    }

    let high_priority = impression.high_priority_findings();
    if !high_priority.is_empty() {
        rules.push(format!("High priority findings to list first: {}", high_priority.join(", ")));
    }

    if let Some(sentence) = grouping_sentence(&impression.grouping_strategy) {
        rules.push(sentence);
    }

    rules.extend(IMPRESSION_CLOSING.iter().map(|s| s.to_string()));
    rules.extend(impression.custom_rules.iter().cloned());
    rules
}

fn spacing_sentence(double: bool, item: &str) -> String {
    if double {
        format!("Use DOUBLE spacing between each {item}")
    } else {
        format!("Use single spacing between each {item}")
    }
}

fn exclusion_text(exclusion: &Exclusion) -> Option<String> {
    match exclusion {
        Exclusion::Plain(name) => {
            let readable = name.replace('_', " ").to_lowercase();
            (!readable.trim().is_empty()).then_some(readable)
        }
        Exclusion::Conditional { finding, unless } => {
            if finding.trim().is_empty() {
                return None;
            }
            match unless.as_deref().filter(|u| !u.is_empty()) {
                Some(unless) => Some(format!("{finding} UNLESS {unless}")),
                None => Some(finding.clone()),
            }
        }
    }
}

fn grouping_sentence(strategy: &str) -> Option<String> {
    let strategy = strategy.trim();
    match strategy {
        "" => None,
        "severity" => Some(GROUP_SEVERITY.to_string()),
        "anatomic_region" => Some(GROUP_ANATOMIC.to_string()),
        "clinical_relevance" => Some(GROUP_CLINICAL.to_string()),
        other => Some(format!("Group impression items by {}", other.replace('_', " "))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DisallowedItems, LegacyRouting, RouteRule};
    use crate::merge::effective_configuration;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn quiet_config() -> Configuration {
        let mut config = Configuration::default();
        config.report.formatting.preserve_template_punctuation = false;
        config.report.formatting.prevent_unnecessary_capitalization = false;
        config
    }

    #[test]
    fn default_general_directives() {
        let compiled = compile(&Configuration::default());
        assert_eq!(
            compiled.general,
            vec![
                TONE_BALANCED.to_string(),
                "Do NOT include: patient identifiers, names, radiology report title, referring physician, radiologist signature, credentials, date".to_string(),
                "Do NOT use these symbols: *, **, ###, ##".to_string(),
            ]
        );
    }

    #[test]
    fn unrecognized_tone_emits_nothing() {
        let config = effective_configuration([Some(json!({"general": {"tone": {"style": "whimsical"}}}))]);
        let compiled = compile(&config);
        assert!(!compiled.general.iter().any(|rule| rule.contains("tone")));
        assert_eq!(compiled.general.len(), 2);
    }

    #[test]
    fn checklist_items_and_disabled_symbols() {
        let mut config = Configuration::default();
        config.general.disallowed_items = DisallowedItems::Checklist {
            enabled: true,
            items: vec!["patient information".to_string()],
        };
        config.general.disallowed_symbols.enabled = false;
        let compiled = compile(&config);
        assert_eq!(compiled.general[1], "Do NOT include: patient information");
        assert_eq!(compiled.general.len(), 2);
    }

    #[test]
    fn double_space_correction_is_kept_verbatim() {
        let config = effective_configuration([Some(json!({"report": {"corrections": {"rules": [{"find": "  ", "replace": " "}]}}}))]);
        let compiled = compile(&config);
        assert_eq!(compiled.findings[0], "Replace \"  \" with \" \"");
    }

    #[test]
    fn general_corrections_precede_report_corrections() {
        let mut config = quiet_config();
        config.general.corrections.rules = vec![
            CorrectionRule::new("teh", "the").with_description("typo"),
            CorrectionRule::new("", "missing find"),
        ];
        config.report.corrections.rules = vec![CorrectionRule::new("ACL", "anterior cruciate ligament")];

        let compiled = compile(&config);
        assert_eq!(
            compiled.findings,
            vec![
                "Replace \"teh\" with \"the\" (typo)".to_string(),
                "Replace \"ACL\" with \"anterior cruciate ligament\"".to_string(),
                FINDINGS_CLOSING[0].to_string(),
                FINDINGS_CLOSING[1].to_string(),
            ]
        );
    }

    #[test]
    fn findings_follow_fixed_order() {
        let mut config = Configuration::default();
        config.report.formatting.use_bullet_points = true;
        config.report.language.avoid_words.enabled = true;
        config.report.language.avoid_words.words = vec!["grossly".to_string(), "essentially".to_string()];
        config.report.language.avoid_phrases.enabled = false;
        config.report.language.avoid_phrases.phrases = vec!["no acute".to_string()];
        config.report.language.expand_lesion_descriptions = true;
        config.report.anatomic_routing_rules = AnatomicRouting::Routes(vec![
            RouteRule::new("meniscus", "Menisci"),
            RouteRule::new("", "Nowhere"),
        ]);
        config.report.custom_rules = vec!["Mention laterality".to_string()];

        let compiled = compile(&config);
        let mut expected: Vec<String> = PRESERVE_PUNCTUATION.iter().map(|s| s.to_string()).collect();
        expected.extend([
            USE_BULLETS.to_string(),
            PREVENT_CAPITALIZATION.to_string(),
            "Avoid using these words: grossly, essentially".to_string(),
            EXPAND_LESIONS.to_string(),
            "If finding contains \"meniscus\", route to \"Menisci\" section".to_string(),
            "Mention laterality".to_string(),
        ]);
        expected.extend(FINDINGS_CLOSING.iter().map(|s| s.to_string()));
        assert_eq!(compiled.findings, expected);
    }

    #[test]
    fn legacy_routing_toggles() {
        let mut config = quiet_config();
        config.report.anatomic_routing_rules = AnatomicRouting::Legacy(LegacyRouting {
            loose_bodies: "joints".to_string(),
            bone_contusions: "ossea_or_bone_marrow".to_string(),
            joint_effusions: "elsewhere".to_string(),
            group_pathology_by_type: true,
        });
        let compiled = compile(&config);
        assert_eq!(
            &compiled.findings[..3],
            &[
                ROUTE_LOOSE_BODIES.to_string(),
                ROUTE_BONE_CONTUSIONS.to_string(),
                ROUTE_GROUP_BY_TYPE.to_string(),
            ]
        );
    }

    #[test]
    fn plain_exclusion_renders_as_bullet() {
        let config = effective_configuration([Some(json!({"impression": {"exclude_by_default": ["patient_history"]}}))]);
        let impression = compile(&config).impression;
        let header = impression.iter().position(|rule| rule == EXCLUSION_HEADER).expect("header");
        assert_eq!(impression[header - 1], "");
        assert_eq!(impression[header + 1], "• patient history");
        assert_eq!(impression[header + 2], "");
        assert!(is_marker(&impression[header]));
        assert!(is_marker(&impression[header + 1]));
    }

    #[test]
    fn conditional_exclusions_keep_order_and_duplicates() {
        let config = effective_configuration([Some(json!({"impression": {"exclude_by_default": [
            {"finding": "incidental cyst", "unless": "symptomatic"},
            "Mild_Degenerative_Change",
            {"finding": "incidental cyst", "unless": "symptomatic"},
            {"finding": "", "unless": "ignored"}
        ]}}))]);
        let bullets: Vec<String> = compile(&config)
            .impression
            .into_iter()
            .filter(|rule| rule.starts_with(BULLET))
            .collect();
        assert_eq!(
            bullets,
            vec![
                "• incidental cyst UNLESS symptomatic",
                "• mild degenerative change",
                "• incidental cyst UNLESS symptomatic",
            ]
        );
    }

    #[test]
    fn impression_follows_fixed_order() {
        let mut config = Configuration::default();
        config.impression.format.spacing = Spacing::Single;
        config.impression.format.style = ImpressionStyle::BulletPoints;
        config.impression.exclude_by_default = vec![Exclusion::Plain("bone_island".to_string())];
        config.impression.required_opening_phrase.enabled = true;
        config.impression.required_opening_phrase.phrase = "No acute fracture.".to_string();
        config
            .impression
            .priority
            .insert("high_priority_findings".to_string(), vec!["fracture".to_string(), "tear".to_string()]);
        config.impression.grouping_strategy = "anatomic_region".to_string();
        config.impression.custom_rules = vec!["Recommend follow-up MRI when indicated".to_string()];

        let mut expected = vec![
            FORMAT_BULLETS.to_string(),
            "Use single spacing between each bullet point".to_string(),
            String::new(),
            EXCLUSION_HEADER.to_string(),
            "• bone island".to_string(),
            String::new(),
            "The first impression item MUST start with: \"No acute fracture.\"".to_string(),
            "High priority findings to list first: fracture, tear".to_string(),
            GROUP_ANATOMIC.to_string(),
        ];
        expected.extend(IMPRESSION_CLOSING.iter().map(|s| s.to_string()));
        expected.push("Recommend follow-up MRI when indicated".to_string());

        assert_eq!(compile(&config).impression, expected);
    }

    #[test]
    fn default_impression_closes_with_fixed_sentences() {
        let impression = compile(&Configuration::default()).impression;
        assert_eq!(
            &impression[impression.len() - 3..],
            &[
                "Focus on clinically significant findings".to_string(),
                "Omit incidental findings unless relevant to clinical history".to_string(),
                "Keep the impression concise and actionable".to_string(),
            ]
        );
    }

    #[test]
    fn prose_style_has_no_spacing_sentence() {
        let mut config = Configuration::default();
        config.impression.format.style = ImpressionStyle::None;
        let impression = compile(&config).impression;
        assert_eq!(impression[0], FORMAT_PROSE);
        assert_eq!(impression[1], IMPRESSION_CLOSING[0]);
    }

    #[test]
    fn unknown_grouping_strategy_is_spelled_out() {
        assert_eq!(
            grouping_sentence("by_organ_system").as_deref(),
            Some("Group impression items by by organ system")
        );
        assert_eq!(grouping_sentence("severity").as_deref(), Some(GROUP_SEVERITY));
        assert_eq!(grouping_sentence("  "), None);
    }

    #[test]
    fn global_rules_land_between_general_and_report_corrections() {
        let mut config = quiet_config();
        config.general.corrections.rules = vec![CorrectionRule::new("g", "general")];
        config.report.corrections.rules = vec![CorrectionRule::new("r", "report")];
        let globals = GlobalRules {
            findings: ParsedRules {
                corrections: vec![CorrectionRule::new("x", "global").with_description("house style")],
                custom_rules: vec!["Mention laterality".to_string()],
            },
            impression: ParsedRules::default(),
        };

        let compiled = compile_with_globals(&config, &globals);
        assert_eq!(
            &compiled.findings[..4],
            &[
                "Replace \"g\" with \"general\"".to_string(),
                "[Global] Replace \"x\" with \"global\" (house style)".to_string(),
                "Mention laterality".to_string(),
                "Replace \"r\" with \"report\"".to_string(),
            ]
        );
    }

    #[test]
    fn global_impression_rules_follow_format_sentences() {
        let mut config = Configuration::default();
        config.impression.exclude_by_default = vec![Exclusion::Plain("bone_island".to_string())];
        config.impression.custom_rules = vec!["Study rule".to_string()];
        let globals = GlobalRules {
            findings: ParsedRules::default(),
            impression: ParsedRules {
                corrections: Vec::new(),
                custom_rules: vec!["Lead with fractures".to_string()],
            },
        };

        let impression = compile_with_globals(&config, &globals).impression;
        assert_eq!(impression[0], FORMAT_NUMBERED);
        assert_eq!(impression[1], "Use DOUBLE spacing between each numbered item");
        assert_eq!(impression[2], "Lead with fractures");
        assert_eq!(impression[3], "");
        assert_eq!(impression.last().map(String::as_str), Some("Study rule"));
    }

    #[test]
    fn empty_globals_match_plain_compile() {
        let config = Configuration::default();
        assert_eq!(compile_with_globals(&config, &GlobalRules::default()), compile(&config));
    }

    #[test]
    fn custom_instructions_pass_through() {
        let mut config = Configuration::default();
        config.custom_instructions = vec!["Second opinion requested".to_string(), "• keep bullets".to_string()];
        assert_eq!(compile(&config).custom, config.custom_instructions);
    }

    #[test]
    fn compilation_is_deterministic() {
        let config = effective_configuration([Some(json!({
            "general": {"corrections": {"rules": [{"find": "a", "replace": "b"}]}},
            "impression": {"exclude_by_default": ["x", {"finding": "y"}], "priority": {"high_priority_findings": ["z"]}}
        }))]);
        assert_eq!(compile(&config), compile(&config));
    }
}
