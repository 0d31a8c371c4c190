use jsonschema::Validator;
use serde_json::Value;

use crate::error::{Result, RouterError};

/// JSON Schema for the subset of a crossbar config that wampkit reads.
///
/// Unknown keys are allowed everywhere; the router owns the rest of the file.
pub const ROUTER_CONFIG_SCHEMA: &str = r#"{
  "$schema": "https://json-schema.org/draft/2020-12/schema",
  "type": "object",
  "required": ["workers"],
  "properties": {
    "version": { "type": "integer" },
    "workers": {
      "type": "array",
      "minItems": 1,
      "items": { "type": "object" },
      "prefixItems": [
        {
          "type": "object",
          "required": ["realms", "transports"],
          "properties": {
            "type": { "type": "string" },
            "realms": {
              "type": "array",
              "minItems": 1,
              "items": {
                "type": "object",
                "required": ["name"],
                "properties": {
                  "name": { "type": "string", "minLength": 1 },
                  "roles": { "type": "array" }
                }
              }
            },
            "transports": {
              "type": "array",
              "minItems": 1,
              "items": {
                "type": "object",
                "required": ["endpoint"],
                "properties": {
                  "type": { "type": "string" },
                  "url": { "type": "string" },
                  "endpoint": {
                    "type": "object",
                    "properties": {
                      "type": { "type": "string" },
                      "port": { "type": "integer", "minimum": 1, "maximum": 65535 },
                      "version": { "type": "integer" }
                    }
                  }
                }
              }
            }
          }
        }
      ]
    }
  }
}"#;

fn compiled() -> Result<Validator> {
    let schema: Value = serde_json::from_str(ROUTER_CONFIG_SCHEMA)
        .map_err(|err| RouterError::SchemaCompile(err.to_string()))?;
    jsonschema::validator_for(&schema).map_err(|err| RouterError::SchemaCompile(err.to_string()))
}

/// Validate a parsed router config document against the embedded schema.
///
/// The first few violations are joined into one message.
pub fn validate_config(value: &Value) -> Result<()> {
    let validator = compiled()?;

    let mut errors = validator.iter_errors(value);
    if let Some(first) = errors.next() {
        let mut message = first.to_string();
        for err in errors.take(3) {
            message.push_str("; ");
            message.push_str(&err.to_string());
        }
        return Err(RouterError::SchemaViolation(message));
    }

    Ok(())
}
