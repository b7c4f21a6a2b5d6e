//! Helpers for walking and querying CWL documents held as `serde_json::Value`.

use crate::errors::ConfigError;
use serde_json::{Map, Value};

pub const CLASS_FILE: &str = "File";
pub const CLASS_DIRECTORY: &str = "Directory";

/// Parses raw document text. JSON is a subset of YAML, so one parser covers both.
pub fn parse_document(text: &str) -> Result<Value, ConfigError> {
    if text.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    Ok(serde_yaml_ng::from_str(text)?)
}

pub fn class_of(value: &Value) -> Option<&str> {
    value.get("class").and_then(Value::as_str)
}

/// True when `actual` names `wanted`, either bare or behind a namespace
/// prefix (`arv:Foo`, `http://arvados.org/cwl#Foo`).
pub fn class_matches(actual: &str, wanted: &str) -> bool {
    actual == wanted
        || actual
            .strip_suffix(wanted)
            .is_some_and(|prefix| prefix.ends_with('#') || prefix.ends_with(':'))
}

fn visit_class(value: &mut Value, class: &str, f: &mut dyn FnMut(&mut Map<String, Value>)) {
    match value {
        Value::Object(map) => {
            if map.get("class").and_then(Value::as_str) == Some(class) {
                f(map);
            }
            for child in map.values_mut() {
                visit_class(child, class, f);
            }
        }
        Value::Array(items) => {
            for item in items {
                visit_class(item, class, f);
            }
        }
        _ => {}
    }
}

/// Applies `f` to every `File` object in `value`, at any depth.
pub fn adjust_file_objs<F>(value: &mut Value, mut f: F)
where
    F: FnMut(&mut Map<String, Value>),
{
    visit_class(value, CLASS_FILE, &mut f);
}

/// Applies `f` to every `Directory` object in `value`, at any depth.
pub fn adjust_dir_objs<F>(value: &mut Value, mut f: F)
where
    F: FnMut(&mut Map<String, Value>),
{
    visit_class(value, CLASS_DIRECTORY, &mut f);
}

/// Applies `f` to every `File` and `Directory` object.
pub fn adjust_file_and_dir_objs<F>(value: &mut Value, mut f: F)
where
    F: FnMut(&mut Map<String, Value>),
{
    visit_class(value, CLASS_FILE, &mut f);
    visit_class(value, CLASS_DIRECTORY, &mut f);
}

/// Fills in `location` from the legacy `path` field.
pub fn normalize_files_dirs(value: &mut Value) {
    adjust_file_and_dir_objs(value, |obj| {
        if !obj.contains_key("location") {
            if let Some(path) = obj.remove("path") {
                obj.insert("location".to_string(), path);
            }
        }
    });
}

fn find_in<'a>(process: &'a Value, field: &str, class: &str) -> Option<&'a Value> {
    match process.get(field)? {
        Value::Array(items) => items
            .iter()
            .rev()
            .find(|item| class_of(item).is_some_and(|c| class_matches(c, class))),
        Value::Object(map) => map
            .iter()
            .find(|(key, _)| class_matches(key, class))
            .map(|(_, value)| value),
        _ => None,
    }
}

/// Looks up a requirement or hint by class. Requirements win over hints; the
/// returned flag is true when the feature came from `requirements`.
pub fn get_feature<'a>(process: &'a Value, class: &str) -> Option<(&'a Value, bool)> {
    find_in(process, "requirements", class)
        .map(|v| (v, true))
        .or_else(|| find_in(process, "hints", class).map(|v| (v, false)))
}

/// Mutable variant of [`get_feature`] for requirement lists in array form.
pub fn get_feature_mut<'a>(process: &'a mut Value, class: &str) -> Option<&'a mut Value> {
    for field in ["requirements", "hints"] {
        let found = process
            .get(field)
            .and_then(Value::as_array)
            .and_then(|items| {
                items
                    .iter()
                    .rposition(|item| class_of(item).is_some_and(|c| class_matches(c, class)))
            });
        if let Some(idx) = found {
            return process.get_mut(field)?.get_mut(idx);
        }
    }
    None
}

/// Last path segment of a URI, ignoring any fragment.
pub fn uri_basename(uri: &str) -> &str {
    let without_fragment = uri.split('#').next().unwrap_or(uri);
    without_fragment
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(without_fragment)
}

/// Name for a process id: the basename with any `#fragment` suffix kept when
/// it is the only part (`#main` -> `main`).
pub fn process_name(id: &str) -> String {
    let base = uri_basename(id);
    if base.is_empty() {
        id.rsplit('#').next().unwrap_or(id).to_string()
    } else {
        base.to_string()
    }
}
