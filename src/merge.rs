//! Layer merge engine
//!
//! Folds partial configuration layers onto the default layer:
//! - Objects: deep-merge by key
//! - Arrays: combined per field, either appended or set-unioned (see [`ARRAY_POLICIES`])
//! - Scalars: override (last wins)
//! - Null: ignored, the lower layer's value stays

use serde_json::{Map, Value};
use tracing::debug;

use crate::compat;
use crate::config::{default_layer, Configuration};

/// How two arrays at the same field path are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayPolicy {
    /// Concatenate, keeping duplicates. Used for rule lists whose entries may differ in applicability.
    Append,
    /// Concatenate, then drop repeated values, keeping the first occurrence.
    DedupUnion,
}

/// Array policy per dotted field path. A trailing `.*` matches any direct child key.
/// Arrays not listed here use [`ArrayPolicy::DedupUnion`].
pub const ARRAY_POLICIES: &[(&str, ArrayPolicy)] = &[
    ("general.corrections.rules", ArrayPolicy::Append),
    ("general.allowed_sections.sections", ArrayPolicy::DedupUnion),
    ("general.disallowed_symbols.symbols", ArrayPolicy::DedupUnion),
    ("general.disallowed_items.items", ArrayPolicy::DedupUnion),
    ("report.corrections.rules", ArrayPolicy::Append),
    ("report.language.avoid_words.words", ArrayPolicy::DedupUnion),
    ("report.language.avoid_phrases.phrases", ArrayPolicy::DedupUnion),
    ("report.anatomic_routing_rules", ArrayPolicy::Append),
    ("report.custom_rules", ArrayPolicy::Append),
    ("impression.exclude_by_default", ArrayPolicy::Append),
    ("impression.priority.*", ArrayPolicy::Append),
    ("impression.custom_rules", ArrayPolicy::Append),
    ("custom_instructions", ArrayPolicy::Append),
];

/// Fields whose stored shape legitimately changes between an array and an object.
const SHAPE_FLEXIBLE: &[&str] = &["report.anatomic_routing_rules"];

pub fn array_policy(path: &str) -> ArrayPolicy {
    ARRAY_POLICIES
        .iter()
        .find(|(pattern, _)| path_matches(pattern, path))
        .map(|(_, policy)| *policy)
        .unwrap_or(ArrayPolicy::DedupUnion)
}

fn path_matches(pattern: &str, path: &str) -> bool {
    match pattern.strip_suffix(".*") {
        Some(prefix) => path
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('.'))
            .is_some_and(|child| !child.is_empty() && !child.contains('.')),
        None => pattern == path,
    }
}

/// Concatenates two lists, keeping duplicates.
pub fn merge_append(mut target: Vec<Value>, source: Vec<Value>) -> Vec<Value> {
    target.extend(source);
    target
}

/// Concatenates two lists and removes repeats, keeping first-occurrence order.
pub fn merge_dedup(target: Vec<Value>, source: Vec<Value>) -> Vec<Value> {
    let mut merged: Vec<Value> = Vec::with_capacity(target.len() + source.len());
    for value in target.into_iter().chain(source) {
        if !merged.contains(&value) {
            merged.push(value);
        }
    }
    merged
}

/// Merge `source` on top of `target`. A non-object `source` leaves `target` untouched.
pub fn merge_values(target: Value, source: Value) -> Value {
    merge_at("", target, source)
}

fn merge_at(path: &str, target: Value, source: Value) -> Value {
    let source_map = match source {
        Value::Object(map) => map,
        Value::Null => return target,
        _ => {
            debug!(path, "ignoring non-object layer");
            return target;
        }
    };

    let mut target_map = match target {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    for (key, source_value) in source_map {
        let child = if path.is_empty() {
            key.clone()
        } else {
            format!("{path}.{key}")
        };

        // Merge in place so existing keys keep their position.
        match target_map.get_mut(&key) {
            Some(slot) => {
                let existing = std::mem::take(slot);
                *slot = merge_field(&child, existing, source_value);
            }
            None if source_value.is_null() => {}
            None => {
                target_map.insert(key, source_value);
            }
        }
    }

    Value::Object(target_map)
}

fn merge_field(path: &str, target: Value, source: Value) -> Value {
    match (target, source) {
        (target, Value::Null) => target,
        (Value::Array(existing), Value::Array(incoming)) => Value::Array(match array_policy(path) {
            ArrayPolicy::Append => merge_append(existing, incoming),
            ArrayPolicy::DedupUnion => merge_dedup(existing, incoming),
        }),
        (Value::Null, source) => source,
        (target, source) if !same_shape(&target, &source) && !SHAPE_FLEXIBLE.contains(&path) => {
            debug!(path, "layer value has the wrong type, keeping lower layer");
            target
        }
        (target, source @ Value::Object(_)) => merge_at(path, target, source),
        (_, source) => source,
    }
}

fn same_shape(a: &Value, b: &Value) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

/// Merge layers in precedence order (lowest first) onto the default layer.
/// `None` layers are skipped; every layer passes through [`compat::normalize_layer`] first.
pub fn merge_layers<I>(layers: I) -> Value
where
    I: IntoIterator<Item = Option<Value>>,
{
    layers
        .into_iter()
        .flatten()
        .map(compat::normalize_layer)
        .fold(default_layer(), merge_values)
}

pub fn effective_configuration<I>(layers: I) -> Configuration
where
    I: IntoIterator<Item = Option<Value>>,
{
    Configuration::from_value(merge_layers(layers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Exclusion, ToneStyle};
    use serde_json::json;

    #[test]
    fn scalar_override() {
        let result = merge_values(json!({"tone": {"style": "balanced"}}), json!({"tone": {"style": "cautious"}}));
        assert_eq!(result["tone"]["style"], "cautious");
    }

    #[test]
    fn object_deep_merge_keeps_untouched_keys() {
        let base = json!({"formatting": {"use_bullet_points": false, "preserve_spacing_and_capitalization": true}});
        let overlay = json!({"formatting": {"use_bullet_points": true}});
        let result = merge_values(base, overlay);

        assert_eq!(result["formatting"]["use_bullet_points"], true);
        assert_eq!(result["formatting"]["preserve_spacing_and_capitalization"], true);
    }

    #[test]
    fn null_and_absent_layers_are_no_ops() {
        let base = json!({"general": {"tone": {"style": "definitive"}}});
        assert_eq!(merge_values(base.clone(), Value::Null), base);
        assert_eq!(merge_values(base.clone(), json!({"general": {"tone": {"style": null}}})), base);
        assert_eq!(merge_values(base.clone(), json!(["not", "a", "layer"])), base);
    }

    #[test]
    fn wrong_typed_values_keep_lower_layer() {
        let result = merge_values(
            default_layer(),
            json!({"report": {"formatting": {"use_bullet_points": "yes"}, "custom_rules": "oops"}}),
        );
        assert_eq!(result["report"]["formatting"]["use_bullet_points"], false);
        assert_eq!(result["report"]["custom_rules"], json!([]));
    }

    #[test]
    fn policy_table_lookup() {
        assert_eq!(array_policy("report.custom_rules"), ArrayPolicy::Append);
        assert_eq!(array_policy("impression.priority.high_priority_findings"), ArrayPolicy::Append);
        assert_eq!(array_policy("impression.priority"), ArrayPolicy::DedupUnion);
        assert_eq!(array_policy("impression.priority.high.nested"), ArrayPolicy::DedupUnion);
        assert_eq!(array_policy("general.disallowed_symbols.symbols"), ArrayPolicy::DedupUnion);
        assert_eq!(array_policy("some.unknown.list"), ArrayPolicy::DedupUnion);
    }

    #[test]
    fn dedup_arrays_union_in_first_occurrence_order() {
        let result = merge_values(
            json!({"general": {"disallowed_symbols": {"symbols": ["*", "##"]}}}),
            json!({"general": {"disallowed_symbols": {"symbols": ["##", "@", "*", "@"]}}}),
        );
        assert_eq!(result["general"]["disallowed_symbols"]["symbols"], json!(["*", "##", "@"]));
    }

    #[test]
    fn append_arrays_keep_duplicates() {
        let rule = json!({"find": "a", "replace": "b"});
        let result = merge_values(
            json!({"report": {"corrections": {"rules": [rule.clone()]}}}),
            json!({"report": {"corrections": {"rules": [rule.clone()]}}}),
        );
        assert_eq!(result["report"]["corrections"]["rules"], json!([rule.clone(), rule]));
    }

    #[test]
    fn priority_groups_merge_key_by_key() {
        let result = merge_values(
            json!({"impression": {"priority": {"high_priority_findings": ["fracture"], "low_priority_findings": ["cyst"]}}}),
            json!({"impression": {"priority": {"high_priority_findings": ["fracture", "tear"], "watch": ["mass"]}}}),
        );
        let priority = &result["impression"]["priority"];
        assert_eq!(priority["high_priority_findings"], json!(["fracture", "fracture", "tear"]));
        assert_eq!(priority["low_priority_findings"], json!(["cyst"]));
        assert_eq!(priority["watch"], json!(["mass"]));
    }

    #[test]
    fn toggle_maps_keep_their_order() {
        let result = merge_values(
            default_layer(),
            json!({"general": {"disallowed_items": {"names": false, "age": true}}}),
        );
        let keys: Vec<&str> = result["general"]["disallowed_items"]
            .as_object()
            .expect("toggle map")
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(
            keys,
            vec![
                "patient_identifiers",
                "names",
                "radiology_report_title",
                "referring_physician",
                "radiologist_signature",
                "credentials",
                "date",
                "age",
            ]
        );
        assert_eq!(result["general"]["disallowed_items"]["names"], false);
    }

    #[test]
    fn routing_rules_may_switch_shape() {
        let result = merge_values(
            default_layer(),
            json!({"report": {"anatomic_routing_rules": {"loose_bodies": "joints"}}}),
        );
        assert_eq!(result["report"]["anatomic_routing_rules"], json!({"loose_bodies": "joints"}));
    }

    #[test]
    fn later_layers_win_scalars() {
        let config = effective_configuration([
            Some(json!({"general": {"tone": {"style": "definitive"}}, "impression": {"grouping_strategy": "severity"}})),
            Some(json!({"general": {"tone": {"style": "cautious"}}})),
        ]);
        assert_eq!(config.general.tone.style, ToneStyle::Cautious);
        assert_eq!(config.impression.grouping_strategy, "severity");
    }

    #[test]
    fn merge_is_idempotent_over_default_floor() {
        let layer = json!({
            "general": {"disallowed_symbols": {"symbols": ["@", "*"]}, "tone": {"style": "cautious"}},
            "report": {"custom_rules": ["Mention laterality"]},
            "impression": {"exclude_by_default": ["patient_history"], "priority": {"high_priority_findings": ["fracture"]}},
            "custom_instructions": ["Be brief"]
        });
        let once = merge_values(default_layer(), layer);
        let twice = merge_values(default_layer(), once.clone());
        assert_eq!(twice, once);
    }

    #[test]
    fn append_counts_sum_across_layers() {
        let config = effective_configuration([
            Some(json!({"report": {"custom_rules": ["one", "two"]}, "impression": {"exclude_by_default": ["a"]}})),
            None,
            Some(json!({"report": {"custom_rules": ["two", "three", "four"]}, "impression": {"exclude_by_default": ["a"]}})),
        ]);
        assert_eq!(config.report.custom_rules.len(), 5);
        assert_eq!(
            config.impression.exclude_by_default,
            vec![Exclusion::Plain("a".to_string()), Exclusion::Plain("a".to_string())]
        );
    }

    #[test]
    fn no_layers_yields_defaults() {
        assert_eq!(effective_configuration(Vec::<Option<Value>>::new()), Configuration::default());
    }
}
