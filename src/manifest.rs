//! Job manifest parsing.
//!
//! Manifests arrive as YAML or JSON text. JSON is a subset of YAML, so a single
//! YAML parse covers both. Only syntax and the top-level shape (a mapping) are
//! checked here; the control plane owns the semantic validation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// A syntactically valid job manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest(Map<String, Value>);

impl Manifest {
    /// Parses YAML or JSON manifest text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Manifest`] if the text is not valid YAML/JSON or its
    /// top level is not a mapping.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(text).map_err(|e| Error::Manifest {
            reason: e.to_string(),
        })?;

        match value {
            Value::Object(map) => Ok(Manifest(map)),
            Value::Null => Err(Error::Manifest {
                reason: "manifest is empty".to_string(),
            }),
            other => Err(Error::Manifest {
                reason: format!("expected a mapping at the top level, found {}", kind(&other)),
            }),
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}
