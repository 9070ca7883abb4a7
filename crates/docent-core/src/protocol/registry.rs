//! Method handlers and the registry that routes envelopes to them.
//!
//! Each responder registers its methods by name. Every handler publishes a
//! JSON Schema for its parameters; [`validate_params`] checks incoming
//! params against that schema before the handler runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// A callable protocol method: a tool provider operation or a peer agent
/// capability.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Method name used for routing (e.g. `"read_file"`).
    fn name(&self) -> &str;

    /// One-line description for discovery.
    fn description(&self) -> &str;

    /// JSON Schema (`type: "object"`) describing the parameters.
    fn input_schema(&self) -> Value;

    /// Run the method with parameters that already passed validation.
    async fn invoke(&self, params: Value) -> Result<Value>;
}

/// Discovery entry for one registered method.
#[derive(Debug, Clone, Serialize)]
pub struct MethodInfo {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Name → handler map for one responder.
#[derive(Default, Clone)]
pub struct MethodRegistry {
    handlers: BTreeMap<String, Arc<dyn MethodHandler>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Names must be unique within the registry.
    pub fn register(&mut self, handler: Arc<dyn MethodHandler>) -> Result<()> {
        let name = handler.name().to_string();
        if self.handlers.contains_key(&name) {
            return Err(Error::InvalidInput(format!(
                "method '{}' is already registered",
                name
            )));
        }
        self.handlers.insert(name, handler);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn MethodHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered methods, sorted by name.
    pub fn list(&self) -> Vec<MethodInfo> {
        self.handlers
            .values()
            .map(|h| MethodInfo {
                name: h.name().to_string(),
                description: h.description().to_string(),
                input_schema: h.input_schema(),
            })
            .collect()
    }
}

/// Validate `params` against a JSON Schema object.
///
/// Checks required fields, primitive types, and enum membership, then
/// injects declared defaults for absent optional fields. `null` params are
/// treated as an empty object. Fails with [`Error::InvalidParams`].
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value> {
    let params_obj = match params {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            return Err(Error::InvalidParams(format!(
                "params must be an object, got {}",
                json_type_name(other)
            )))
        }
    };

    let properties = schema
        .get("properties")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();

    let required: Vec<&str> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    for field in &required {
        if !params_obj.contains_key(*field) {
            return Err(Error::InvalidParams(format!(
                "missing required parameter: {}",
                field
            )));
        }
    }

    let mut result = params_obj.clone();
    for (prop_name, prop_schema) in &properties {
        match params_obj.get(prop_name) {
            Some(value) => {
                if let Some(expected) = prop_schema.get("type").and_then(|t| t.as_str()) {
                    let type_ok = match expected {
                        "string" => value.is_string(),
                        "integer" => value.is_i64() || value.is_u64(),
                        "number" => value.is_number(),
                        "boolean" => value.is_boolean(),
                        "array" => value.is_array(),
                        "object" => value.is_object(),
                        _ => true,
                    };
                    if !type_ok {
                        return Err(Error::InvalidParams(format!(
                            "parameter '{}' must be of type '{}', got {}",
                            prop_name,
                            expected,
                            json_type_name(value)
                        )));
                    }
                }
                if let Some(allowed) = prop_schema.get("enum").and_then(|e| e.as_array()) {
                    if !allowed.contains(value) {
                        let names: Vec<String> = allowed.iter().map(|v| v.to_string()).collect();
                        return Err(Error::InvalidParams(format!(
                            "parameter '{}' must be one of [{}], got {}",
                            prop_name,
                            names.join(", "),
                            value
                        )));
                    }
                }
            }
            None => {
                if let Some(default) = prop_schema.get("default") {
                    result.insert(prop_name.clone(), default.clone());
                }
            }
        }
    }

    Ok(Value::Object(result))
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
