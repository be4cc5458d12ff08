//! Context normalization and flattening.
//!
//! [`normalize`] produces a [`NormalizedContext`]: date fields coerced through
//! [`dates::format_date`] and every mapping answering absent keys with
//! [`DEFAULT_TOKEN`]. [`flatten`] turns a normalized context into the dotted-path map used
//! by cell placeholders.

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::dates::{self, DEFAULT_TOKEN};

/// Default separator between flattened path segments.
pub const PATH_SEPARATOR: &str = ".";

/// Single-level mapping from a dotted path (`act.details.0.name`) to a scalar.
pub type FlattenedContext = BTreeMap<String, Value>;

/// Render-ready copy of the caller's data.
///
/// The root is always a mapping. Lookups never fail: absent keys resolve to
/// [`DEFAULT_TOKEN`] at whatever level they are missing. The underlying data is never
/// modified by a lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedContext {
    root: Map<String, Value>,
}

impl NormalizedContext {
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.root
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.root)
    }

    /// Value stored under `key`, or the default token.
    pub fn get_or_default(&self, key: &str) -> Cow<'_, Value> {
        Defaulted(&self.root).get_or_default(key)
    }

    /// Resolves a dotted path (`a.b.0`) with default-filling at every mapping level.
    ///
    /// Indexing past the end of a sequence, or into a scalar, yields the default token.
    pub fn lookup(&self, path: &str) -> Cow<'_, Value> {
        let mut current: Cow<'_, Value> = Cow::Owned(Value::Null);
        let mut scope = Some(&self.root);
        let mut items: Option<&Vec<Value>> = None;

        for segment in path.split(PATH_SEPARATOR) {
            let next = match (scope, items) {
                (Some(map), _) => Defaulted(map).get_or_default(segment),
                (None, Some(seq)) => match segment.parse::<usize>().ok().and_then(|i| seq.get(i)) {
                    Some(value) => Cow::Borrowed(value),
                    None => default_value(),
                },
                (None, None) => default_value(),
            };

            match next {
                Cow::Borrowed(Value::Object(map)) => {
                    scope = Some(map);
                    items = None;
                }
                Cow::Borrowed(Value::Array(seq)) => {
                    scope = None;
                    items = Some(seq);
                }
                _ => {
                    scope = None;
                    items = None;
                }
            }
            current = next;
        }

        current
    }
}

/// Read-only proxy over a mapping that answers absent keys with the default token.
#[derive(Debug, Clone, Copy)]
pub struct Defaulted<'a>(pub &'a Map<String, Value>);

impl<'a> Defaulted<'a> {
    pub fn get_or_default(&self, key: &str) -> Cow<'a, Value> {
        match self.0.get(key) {
            Some(value) => Cow::Borrowed(value),
            None => default_value(),
        }
    }
}

fn default_value<'a>() -> Cow<'a, Value> {
    Cow::Owned(Value::String(DEFAULT_TOKEN.to_string()))
}

/// Normalizes raw caller data for rendering.
///
/// `null` yields an empty context. A non-mapping root has no named fields to bind, so it
/// is dropped with a warning.
pub fn normalize(context: &Value) -> NormalizedContext {
    match context {
        Value::Object(map) => NormalizedContext {
            root: normalize_map(map),
        },
        Value::Null => NormalizedContext::default(),
        other => {
            log::warn!(
                "[normalize] document data must be an object, got {}; rendering with empty data",
                json_kind(other)
            );
            NormalizedContext::default()
        }
    }
}

fn normalize_map(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .map(|(key, value)| (key.clone(), normalize_entry(key, value)))
        .collect()
}

fn normalize_entry(key: &str, value: &Value) -> Value {
    match value {
        Value::Object(_) | Value::Array(_) => normalize_value(value),
        _ if dates::is_date_key(key) => dates::format_date(value),
        _ => value.clone(),
    }
}

fn normalize_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(normalize_map(map)),
        Value::Array(items) => Value::Array(items.iter().map(normalize_value).collect()),
        other => other.clone(),
    }
}

/// Flattens a normalized context with the default `.` separator.
pub fn flatten(context: &NormalizedContext) -> FlattenedContext {
    let mut flat = FlattenedContext::new();
    for (key, value) in context.as_map() {
        flatten_into(value, key.clone(), PATH_SEPARATOR, &mut flat);
    }
    flat
}

/// Flattens any JSON value; a scalar root is stored under the empty path.
pub fn flatten_with_separator(value: &Value, separator: &str) -> FlattenedContext {
    let mut flat = FlattenedContext::new();
    flatten_into(value, String::new(), separator, &mut flat);
    flat
}

fn flatten_into(value: &Value, path: String, separator: &str, flat: &mut FlattenedContext) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                flatten_into(child, join_path(&path, key, separator), separator, flat);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                flatten_into(child, join_path(&path, &index.to_string(), separator), separator, flat);
            }
        }
        scalar => {
            flat.insert(path, scalar.clone());
        }
    }
}

fn join_path(parent: &str, segment: &str, separator: &str) -> String {
    if parent.is_empty() {
        segment.to_string()
    } else {
        format!("{parent}{separator}{segment}")
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
