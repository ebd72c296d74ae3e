//! Adapters that bring older stored layer shapes into the current schema before merging.

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::merge::merge_values;

/// The stored shape of a single layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerShape {
    /// `general` / `report` / `impression` / `custom_instructions`.
    Standard,
    /// Per-study rules kept under `study_report` / `study_impression`.
    StudyScoped,
    /// The flat pre-category layout (`formatting`, `style`, `impression.numerically_itemized`, ...).
    LegacyFlat,
}

pub fn detect_shape(layer: &Value) -> LayerShape {
    let Some(map) = layer.as_object() else {
        return LayerShape::Standard;
    };

    if map.contains_key("study_report") || map.contains_key("study_impression") {
        return LayerShape::StudyScoped;
    }

    let flat_formatting = map.get("formatting").is_some_and(Value::is_object);
    let flat_style = map.get("style").is_some_and(Value::is_object);
    let numbered_flag = layer
        .pointer("/impression/numerically_itemized")
        .is_some_and(Value::is_boolean);
    let expand_flag = layer.pointer("/report/expand_lesions").is_some_and(Value::is_boolean);

    if flat_formatting || flat_style || numbered_flag || expand_flag {
        LayerShape::LegacyFlat
    } else {
        LayerShape::Standard
    }
}

/// Converts any supported layer shape into a standard partial layer.
pub fn normalize_layer(layer: Value) -> Value {
    let shape = detect_shape(&layer);
    let layer = match shape {
        LayerShape::Standard => layer,
        LayerShape::StudyScoped => {
            debug!("folding study-scoped sections into the standard layout");
            fold_study_sections(layer)
        }
        LayerShape::LegacyFlat => {
            debug!("migrating legacy flat configuration layer");
            upgrade_legacy(layer)
        }
    };
    normalize_custom_instructions(layer)
}

/// Moves `study_report` into `report` and `study_impression` into `impression`,
/// merging on top of any standard sections the layer already carries.
pub fn fold_study_sections(layer: Value) -> Value {
    let Value::Object(mut map) = layer else {
        return layer;
    };

    let mut study = Map::new();
    if let Some(report) = map.remove("study_report") {
        study.insert("report".to_string(), report);
    }
    if let Some(impression) = map.remove("study_impression") {
        study.insert("impression".to_string(), impression);
    }

    merge_values(Value::Object(map), Value::Object(study))
}

/// Legacy keys the migration consumes, as JSON pointers.
const LEGACY_POINTERS: &[&str] = &[
    "/formatting",
    "/style",
    "/custom_instructions",
    "/impression/numerically_itemized",
    "/impression/exclude_by_default",
    "/report/expand_lesions",
];

/// Migrates the legacy keys of a layer, then merges whatever standard content the
/// layer also carries on top of the migrated values.
pub fn upgrade_legacy(layer: Value) -> Value {
    let migrated = migrate_legacy(&layer);
    merge_values(migrated, strip_legacy_keys(layer))
}

fn strip_legacy_keys(mut layer: Value) -> Value {
    for pointer in LEGACY_POINTERS {
        let Some((parent, key)) = pointer.rsplit_once('/') else {
            continue;
        };
        if let Some(Value::Object(map)) = layer.pointer_mut(parent) {
            map.shift_remove(key);
        }
    }
    layer
}

/// Maps the flat legacy layout onto a standard partial layer. Unknown keys are dropped.
pub fn migrate_legacy(old: &Value) -> Value {
    let mut layer = json!({});

    let instructions = string_list(old.get("custom_instructions"));
    if !instructions.is_empty() {
        insert_at(&mut layer, &["custom_instructions"], json!(instructions));
    }

    let exclusions = string_list(old.pointer("/impression/exclude_by_default"));
    if !exclusions.is_empty() {
        insert_at(&mut layer, &["impression", "exclude_by_default"], json!(exclusions));
    }

    let numbered = old.pointer("/impression/numerically_itemized").and_then(Value::as_bool);
    let bullets = old.pointer("/formatting/use_bullet_points").and_then(Value::as_bool);

    if let Some(bullets) = bullets {
        insert_at(&mut layer, &["report", "formatting", "use_bullet_points"], json!(bullets));
        if bullets && numbered != Some(true) {
            insert_at(&mut layer, &["impression", "format", "style"], json!("bullet_points"));
        }
    }

    if let Some(punctuation) = old
        .pointer("/formatting/preserve_template_punctuation")
        .and_then(Value::as_bool)
    {
        insert_at(
            &mut layer,
            &["report", "formatting", "preserve_template_punctuation"],
            json!(punctuation),
        );
    }

    if let Some(capitalize) = old.pointer("/formatting/capitalize_sections").and_then(Value::as_bool) {
        insert_at(
            &mut layer,
            &["report", "formatting", "prevent_unnecessary_capitalization"],
            json!(!capitalize),
        );
    }

    match numbered {
        Some(true) => insert_at(&mut layer, &["impression", "format", "style"], json!("numerically_itemized")),
        Some(false) => {
            let style = if bullets == Some(true) { "bullet_points" } else { "none" };
            insert_at(&mut layer, &["impression", "format", "style"], json!(style));
        }
        None => {}
    }

    if let Some(expand) = old.pointer("/report/expand_lesions").and_then(Value::as_bool) {
        insert_at(
            &mut layer,
            &["report", "language", "expand_lesion_descriptions"],
            json!(expand),
        );
    }

    let active_voice = old.pointer("/style/active_voice").and_then(Value::as_bool);
    let professional = old.pointer("/style/professional_tone").and_then(Value::as_bool);
    if active_voice == Some(true) {
        insert_at(&mut layer, &["general", "tone", "style"], json!("definitive"));
    } else if professional == Some(true) {
        insert_at(&mut layer, &["general", "tone", "style"], json!("balanced"));
    }

    layer
}

/// A bare string in `custom_instructions` becomes a one-element list so it appends like any other layer.
fn normalize_custom_instructions(mut layer: Value) -> Value {
    if let Some(Value::String(text)) = layer.get("custom_instructions") {
        let list = if text.trim().is_empty() {
            json!([])
        } else {
            json!([text])
        };
        layer["custom_instructions"] = list;
    }
    layer
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    let candidates: Vec<&Value> = match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(single @ Value::String(_)) => vec![single],
        _ => Vec::new(),
    };

    candidates
        .into_iter()
        .filter_map(Value::as_str)
        .filter(|text| !text.trim().is_empty())
        .map(str::to_string)
        .collect()
}

fn insert_at(root: &mut Value, path: &[&str], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };

    let mut node = root;
    for key in parents {
        if !node.is_object() {
            *node = json!({});
        }
        let Value::Object(map) = node else {
            return;
        };
        node = map.entry(key.to_string()).or_insert_with(|| json!({}));
    }

    if !node.is_object() {
        *node = json!({});
    }
    if let Value::Object(map) = node {
        map.insert(last.to_string(), value);
    }
}
