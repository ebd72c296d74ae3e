use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

pub const SCHEMA_VERSION: &str = "3.0";

/// The effective set of report-writing preferences. Every field always has a value;
/// partial layers are merged onto [`Configuration::default`] before decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Schema version carried through from the layers.
    #[serde(deserialize_with = "lenient")]
    pub version: String,
    /// Rules that apply to the whole report.
    #[serde(deserialize_with = "lenient")]
    pub general: GeneralRules,
    /// Rules for the findings section.
    #[serde(deserialize_with = "lenient")]
    pub report: ReportRules,
    /// Rules for the impression section.
    #[serde(deserialize_with = "lenient")]
    pub impression: ImpressionRules,
    /// Free-form instructions appended after every other rule.
    #[serde(deserialize_with = "one_or_many")]
    pub custom_instructions: Vec<String>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION.to_string(),
            general: GeneralRules::default(),
            report: ReportRules::default(),
            impression: ImpressionRules::default(),
            custom_instructions: Vec::new(),
        }
    }
}

impl Configuration {
    /// Decodes a merged JSON value. Fields with the wrong shape fall back to their defaults.
    pub fn from_value(value: Value) -> Self {
        match serde_json::from_value(value) {
            Ok(config) => config,
            Err(err) => {
                debug!(error = %err, "configuration root is not an object, using defaults");
                Self::default()
            }
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("configuration serializes to JSON")
    }
}

/// Fresh default configuration; never shares state with earlier calls.
pub fn default_configuration() -> Configuration {
    Configuration::default()
}

/// The default configuration as a JSON layer, used as the merge floor.
pub fn default_layer() -> Value {
    Configuration::default().to_value()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralRules {
    #[serde(deserialize_with = "lenient")]
    pub corrections: Corrections,
    #[serde(deserialize_with = "lenient")]
    pub tone: Tone,
    #[serde(deserialize_with = "lenient")]
    pub allowed_sections: AllowedSections,
    #[serde(deserialize_with = "lenient")]
    pub disallowed_symbols: DisallowedSymbols,
    #[serde(deserialize_with = "lenient")]
    pub disallowed_items: DisallowedItems,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Corrections {
    #[serde(deserialize_with = "lenient_vec")]
    pub rules: Vec<CorrectionRule>,
}

/// A literal find/replace instruction. Rules with an empty `find` or `replace` are not emitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionRule {
    pub find: String,
    pub replace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl CorrectionRule {
    pub fn new(find: impl Into<String>, replace: impl Into<String>) -> Self {
        Self {
            find: find.into(),
            replace: replace.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tone {
    #[serde(deserialize_with = "lenient")]
    pub style: ToneStyle,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToneStyle {
    Definitive,
    Cautious,
    #[default]
    Balanced,
    /// Any style string this version does not know. Produces no directive.
    #[serde(other)]
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllowedSections {
    #[serde(deserialize_with = "lenient")]
    pub enabled: bool,
    #[serde(deserialize_with = "lenient_vec")]
    pub sections: Vec<String>,
}

impl Default for AllowedSections {
    fn default() -> Self {
        Self {
            enabled: true,
            sections: vec!["FINDINGS".to_string(), "IMPRESSION".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisallowedSymbols {
    #[serde(deserialize_with = "lenient")]
    pub enabled: bool,
    #[serde(deserialize_with = "lenient_vec")]
    pub symbols: Vec<String>,
}

impl Default for DisallowedSymbols {
    fn default() -> Self {
        Self {
            enabled: true,
            symbols: ["*", "**", "###", "##"].iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Items the report must leave out. Stored either as per-item toggles keyed by a
/// snake_case name, or as an explicit checklist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DisallowedItems {
    Checklist {
        #[serde(default = "enabled_by_default")]
        enabled: bool,
        items: Vec<String>,
    },
    Toggles(IndexMap<String, bool>),
}

const DEFAULT_DISALLOWED_ITEMS: &[&str] = &[
    "patient_identifiers",
    "names",
    "radiology_report_title",
    "referring_physician",
    "radiologist_signature",
    "credentials",
    "date",
];

impl Default for DisallowedItems {
    fn default() -> Self {
        DisallowedItems::Toggles(
            DEFAULT_DISALLOWED_ITEMS
                .iter()
                .map(|item| (item.to_string(), true))
                .collect(),
        )
    }
}

impl DisallowedItems {
    /// Names of the items that are currently switched on, in stored order.
    pub fn active(&self) -> Vec<&str> {
        match self {
            DisallowedItems::Checklist { enabled, items } => {
                if *enabled {
                    items
                        .iter()
                        .map(String::as_str)
                        .filter(|item| !item.trim().is_empty())
                        .collect()
                } else {
                    Vec::new()
                }
            }
            DisallowedItems::Toggles(toggles) => toggles
                .iter()
                .filter(|(_, on)| **on)
                .map(|(key, _)| key.as_str())
                .collect(),
        }
    }
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportRules {
    #[serde(deserialize_with = "lenient")]
    pub corrections: Corrections,
    #[serde(deserialize_with = "lenient")]
    pub formatting: Formatting,
    #[serde(deserialize_with = "lenient")]
    pub language: Language,
    #[serde(deserialize_with = "lenient")]
    pub anatomic_routing_rules: AnatomicRouting,
    #[serde(deserialize_with = "lenient_vec")]
    pub custom_rules: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Formatting {
    #[serde(deserialize_with = "lenient")]
    pub use_bullet_points: bool,
    #[serde(deserialize_with = "lenient")]
    pub preserve_template_punctuation: bool,
    #[serde(deserialize_with = "lenient")]
    pub prevent_unnecessary_capitalization: bool,
    #[serde(deserialize_with = "lenient")]
    pub preserve_spacing_and_capitalization: bool,
}

impl Default for Formatting {
    fn default() -> Self {
        Self {
            use_bullet_points: false,
            preserve_template_punctuation: true,
            prevent_unnecessary_capitalization: true,
            preserve_spacing_and_capitalization: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Language {
    #[serde(deserialize_with = "lenient")]
    pub avoid_words: AvoidWords,
    #[serde(deserialize_with = "lenient")]
    pub avoid_phrases: AvoidPhrases,
    #[serde(deserialize_with = "lenient")]
    pub expand_lesion_descriptions: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvoidWords {
    #[serde(deserialize_with = "lenient")]
    pub enabled: bool,
    #[serde(deserialize_with = "lenient_vec")]
    pub words: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvoidPhrases {
    #[serde(deserialize_with = "lenient")]
    pub enabled: bool,
    #[serde(deserialize_with = "lenient_vec")]
    pub phrases: Vec<String>,
}

/// Where particular findings belong within the findings section.
/// A JSON array decodes as [`AnatomicRouting::Routes`], an object as [`AnatomicRouting::Legacy`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AnatomicRouting {
    Routes(Vec<RouteRule>),
    /// Older fixed toggles kept for stored configurations that predate route lists.
    Legacy(LegacyRouting),
}

impl Default for AnatomicRouting {
    fn default() -> Self {
        AnatomicRouting::Routes(Vec::new())
    }
}

impl<'de> Deserialize<'de> for AnatomicRouting {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::Array(items) => Ok(AnatomicRouting::Routes(decode_entries(items))),
            legacy @ Value::Object(_) => Ok(AnatomicRouting::Legacy(
                serde_json::from_value(legacy).map_err(serde::de::Error::custom)?,
            )),
            _ => Err(serde::de::Error::custom("anatomic routing must be a list or an object")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteRule {
    pub condition: String,
    pub route_to: String,
}

impl RouteRule {
    pub fn new(condition: impl Into<String>, route_to: impl Into<String>) -> Self {
        Self {
            condition: condition.into(),
            route_to: route_to.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LegacyRouting {
    #[serde(deserialize_with = "lenient")]
    pub loose_bodies: String,
    #[serde(deserialize_with = "lenient")]
    pub bone_contusions: String,
    #[serde(deserialize_with = "lenient")]
    pub joint_effusions: String,
    #[serde(deserialize_with = "lenient")]
    pub group_pathology_by_type: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpressionRules {
    #[serde(deserialize_with = "lenient")]
    pub format: ImpressionFormat,
    /// Findings to keep out of the impression. Order is significant and duplicates are kept.
    #[serde(deserialize_with = "lenient_vec")]
    pub exclude_by_default: Vec<Exclusion>,
    #[serde(deserialize_with = "lenient")]
    pub required_opening_phrase: OpeningPhrase,
    /// Named priority groups, e.g. `high_priority_findings`.
    #[serde(deserialize_with = "lenient")]
    pub priority: IndexMap<String, Vec<String>>,
    /// Empty when no strategy is configured.
    #[serde(deserialize_with = "lenient")]
    pub grouping_strategy: String,
    #[serde(deserialize_with = "lenient_vec")]
    pub custom_rules: Vec<String>,
}

pub const HIGH_PRIORITY_FINDINGS: &str = "high_priority_findings";

const DEFAULT_PRIORITY_GROUPS: &[&str] = &[
    HIGH_PRIORITY_FINDINGS,
    "mid_priority_findings",
    "low_priority_findings",
];

impl Default for ImpressionRules {
    fn default() -> Self {
        Self {
            format: ImpressionFormat::default(),
            exclude_by_default: Vec::new(),
            required_opening_phrase: OpeningPhrase::default(),
            priority: DEFAULT_PRIORITY_GROUPS
                .iter()
                .map(|group| (group.to_string(), Vec::new()))
                .collect(),
            grouping_strategy: String::new(),
            custom_rules: Vec::new(),
        }
    }
}

impl ImpressionRules {
    pub fn high_priority_findings(&self) -> &[String] {
        self.priority
            .get(HIGH_PRIORITY_FINDINGS)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpressionFormat {
    #[serde(deserialize_with = "lenient")]
    pub style: ImpressionStyle,
    #[serde(deserialize_with = "lenient")]
    pub spacing: Spacing,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpressionStyle {
    #[default]
    NumericallyItemized,
    BulletPoints,
    None,
    #[serde(other)]
    Unrecognized,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Spacing {
    Single,
    #[default]
    Double,
    /// Anything other than `single`/`double`; rendered as single spacing.
    #[serde(other)]
    Unrecognized,
}

/// A finding to leave out of the impression, optionally with an exception.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Exclusion {
    Plain(String),
    Conditional {
        finding: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unless: Option<String>,
    },
}

impl Exclusion {
    pub fn conditional(finding: impl Into<String>, unless: Option<&str>) -> Self {
        Exclusion::Conditional {
            finding: finding.into(),
            unless: unless.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpeningPhrase {
    #[serde(deserialize_with = "lenient")]
    pub enabled: bool,
    #[serde(deserialize_with = "lenient")]
    pub phrase: String,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(T::default());
    }
    match serde_json::from_value(value) {
        Ok(decoded) => Ok(decoded),
        Err(err) => {
            debug!(error = %err, "malformed configuration field, using default");
            Ok(T::default())
        }
    }
}

/// Decodes an array element by element, dropping entries that do not fit `T`.
fn lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    let items = match value {
        Value::Array(items) => items,
        Value::Null => return Ok(Vec::new()),
        _ => {
            debug!("expected a list in configuration, ignoring field");
            return Ok(Vec::new());
        }
    };

    Ok(decode_entries(items))
}

fn decode_entries<T: DeserializeOwned>(items: Vec<Value>) -> Vec<T> {
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(decoded) => Some(decoded),
            Err(err) => {
                debug!(error = %err, "skipping malformed list entry");
                None
            }
        })
        .collect()
}

/// Accepts either a single string or a list of strings.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(single) => Ok(vec![single]),
        Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(text) => Some(text),
                _ => None,
            })
            .collect()),
        _ => Ok(Vec::new()),
    }
}
