//! Template variable scope for the DOCX engine.
//!
//! Every mapping of a [`NormalizedContext`] becomes a [`DefaultingMap`] object answering
//! through [`Defaulted`], so a reference to an absent field renders the default token
//! instead of failing.

use std::sync::Arc;

use minijinja::value::{from_args, Enumerator, Object, Value};
use minijinja::{Error, ErrorKind, State};
use serde_json::{Map, Value as Json};

use super::context::{Defaulted, NormalizedContext};
use super::dates::DEFAULT_TOKEN;

/// Engine globals that must stay reachable from the root scope.
const ENGINE_GLOBALS: [&str; 4] = ["range", "dict", "namespace", "debug"];

#[derive(Debug)]
pub(crate) struct DefaultingMap {
    map: Map<String, Json>,
    root: bool,
}

impl DefaultingMap {
    fn new(map: Map<String, Json>, root: bool) -> Self {
        Self { map, root }
    }

    fn entry(&self, name: &str) -> Value {
        to_template_value(&Defaulted(&self.map).get_or_default(name))
    }
}

/// Mapping keys are strings; `codes[1]` and `codes.1` both address the key `"1"`.
fn key_name(key: &Value) -> Option<String> {
    match key.as_str() {
        Some(name) => Some(name.to_owned()),
        None => i64::try_from(key.clone()).ok().map(|index| index.to_string()),
    }
}

impl Object for DefaultingMap {
    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let name = key_name(key)?;
        if self.root && !self.map.contains_key(&name) && ENGINE_GLOBALS.contains(&name.as_str()) {
            return None;
        }
        Some(self.entry(&name))
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        Enumerator::Values(self.map.keys().map(|key| Value::from(key.as_str())).collect())
    }

    fn call_method(
        self: &Arc<Self>,
        _state: &State<'_, '_>,
        method: &str,
        args: &[Value],
    ) -> Result<Value, Error> {
        match method {
            "items" => {
                no_args(method, args)?;
                let pairs = self
                    .map
                    .iter()
                    .map(|(key, value)| Value::from(vec![Value::from(key.as_str()), to_template_value(value)]))
                    .collect::<Vec<_>>();
                Ok(Value::from(pairs))
            }
            "keys" => {
                no_args(method, args)?;
                Ok(Value::from(
                    self.map.keys().map(|key| Value::from(key.as_str())).collect::<Vec<_>>(),
                ))
            }
            "values" => {
                no_args(method, args)?;
                Ok(Value::from(self.map.values().map(to_template_value).collect::<Vec<_>>()))
            }
            "get" => {
                let (key, default): (Value, Option<Value>) = from_args(args)?;
                let present = key_name(&key).filter(|name| self.map.contains_key(name));
                Ok(match (present, default) {
                    (Some(name), _) => self.entry(&name),
                    (None, Some(default)) => default,
                    (None, None) => Value::from(DEFAULT_TOKEN),
                })
            }
            _ => Err(Error::new(
                ErrorKind::UnknownMethod,
                format!("mapping has no method named {method}"),
            )),
        }
    }
}

fn no_args(method: &str, args: &[Value]) -> Result<(), Error> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(Error::new(
            ErrorKind::TooManyArguments,
            format!("{method}() takes no arguments"),
        ))
    }
}

/// Builds the root scope bound to a DOCX template.
pub(crate) fn template_scope(context: &NormalizedContext) -> Value {
    Value::from_object(DefaultingMap::new(context.as_map().clone(), true))
}

fn to_template_value(value: &Json) -> Value {
    match value {
        Json::Null => Value::from(()),
        Json::Bool(flag) => Value::from(*flag),
        Json::Number(number) => {
            if let Some(int) = number.as_i64() {
                Value::from(int)
            } else if let Some(uint) = number.as_u64() {
                Value::from(uint)
            } else {
                Value::from(number.as_f64().unwrap_or_default())
            }
        }
        Json::String(text) => Value::from(text.as_str()),
        Json::Array(items) => Value::from(items.iter().map(to_template_value).collect::<Vec<_>>()),
        Json::Object(map) => Value::from_object(DefaultingMap::new(map.clone(), false)),
    }
}
