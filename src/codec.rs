//! Field map <-> document body conversion.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::client::Record;
use crate::store::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Body is a JSON object whose members are the fields.
    Json,
    /// Body is the store's native string map.
    NativeMap,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("could not decode JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected a JSON object, found {0}")]
    NotAnObject(&'static str),
    #[error("expected a {expected} document")]
    WrongEncoding { expected: &'static str },
}

impl Encoding {
    pub fn encode(self, values: &Record) -> Document {
        match self {
            Encoding::NativeMap => Document::Map(values.clone()),
            Encoding::Json => {
                let object: Map<String, Value> = values
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect();
                Document::Json(Value::Object(object).to_string())
            }
        }
    }

    /// Copy the fields of `source` into `dest`. A non-empty `fields` set
    /// restricts the copy to the named fields.
    pub fn decode(
        self,
        source: &Document,
        fields: Option<&HashSet<String>>,
        dest: &mut Record,
    ) -> Result<(), DecodeError> {
        let wanted = |name: &str| match fields {
            Some(set) if !set.is_empty() => set.contains(name),
            _ => true,
        };

        match (self, source) {
            (Encoding::Json, Document::Json(text)) => {
                let object = match serde_json::from_str::<Value>(text)? {
                    Value::Object(object) => object,
                    other => return Err(DecodeError::NotAnObject(kind(&other))),
                };
                for (name, value) in object {
                    if !wanted(name.as_str()) {
                        continue;
                    }
                    match value {
                        Value::Null => {}
                        Value::String(s) => {
                            dest.insert(name, s);
                        }
                        other => {
                            dest.insert(name, other.to_string());
                        }
                    }
                }
                Ok(())
            }
            (Encoding::NativeMap, Document::Map(map)) => {
                dest.extend(
                    map.iter()
                        .filter(|(name, _)| wanted(name.as_str()))
                        .map(|(k, v)| (k.clone(), v.clone())),
                );
                Ok(())
            }
            (Encoding::Json, Document::Map(_)) => {
                Err(DecodeError::WrongEncoding { expected: "JSON" })
            }
            (Encoding::NativeMap, Document::Json(_)) => Err(DecodeError::WrongEncoding {
                expected: "native map",
            }),
        }
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
