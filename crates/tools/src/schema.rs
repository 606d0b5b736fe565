//! Tool interface
//!
//! Each tool declares a typed input schema; the JSON schema published to the
//! realtime model is generated from the same declaration, so the two can
//! never drift. Handlers receive the call session explicitly and stay
//! stateless otherwise.

use async_trait::async_trait;
use hvac_voice_core::CallSession;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// How retries of a side-effectful tool are collapsed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyPolicy {
    /// Read-only or naturally repeatable
    #[default]
    None,
    /// At most one effect per call id
    ByCallId,
}

/// Property types understood by the schema generator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    String,
    Integer,
    Boolean,
}

impl PropertyType {
    fn wire_name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
        }
    }
}

/// One input field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertySchema {
    pub property_type: PropertyType,
    pub description: String,
    pub enum_values: Option<Vec<String>>,
}

impl PropertySchema {
    pub fn string(description: impl Into<String>) -> Self {
        Self {
            property_type: PropertyType::String,
            description: description.into(),
            enum_values: None,
        }
    }

    pub fn integer(description: impl Into<String>) -> Self {
        Self {
            property_type: PropertyType::Integer,
            description: description.into(),
            enum_values: None,
        }
    }

    pub fn enum_type(description: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            property_type: PropertyType::String,
            description: description.into(),
            enum_values: Some(values),
        }
    }
}

/// Object schema for a tool's input
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputSchema {
    pub properties: BTreeMap<String, PropertySchema>,
    pub required: Vec<String>,
}

impl InputSchema {
    pub fn object() -> Self {
        Self::default()
    }

    pub fn property(
        mut self,
        name: impl Into<String>,
        schema: PropertySchema,
        required: bool,
    ) -> Self {
        let name = name.into();
        if required {
            self.required.push(name.clone());
        }
        self.properties.insert(name, schema);
        self
    }

    /// Structural validation of model-provided arguments
    pub fn validate(&self, input: &Value) -> Result<(), ToolError> {
        let Some(object) = input.as_object() else {
            return Err(ToolError::invalid_params("arguments must be an object"));
        };
        for name in &self.required {
            if !object.contains_key(name) {
                return Err(ToolError::invalid_params(format!("{name} is required")));
            }
        }
        for (name, value) in object {
            if let Some(property) = self.properties.get(name) {
                if !value.is_null() && !property.property_type.matches(value) {
                    return Err(ToolError::invalid_params(format!(
                        "{name} must be a {}",
                        property.property_type.wire_name()
                    )));
                }
            }
        }
        Ok(())
    }

    fn to_json(&self) -> Value {
        let mut properties = serde_json::Map::new();
        for (name, schema) in &self.properties {
            let mut prop = serde_json::Map::new();
            prop.insert("type".into(), json!(schema.property_type.wire_name()));
            prop.insert("description".into(), json!(schema.description));
            if let Some(values) = &schema.enum_values {
                prop.insert("enum".into(), json!(values));
            }
            properties.insert(name.clone(), Value::Object(prop));
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": self.required,
        })
    }
}

/// Complete tool declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
}

impl ToolSchema {
    /// The function declaration sent in the model's session configuration
    pub fn to_realtime_schema(&self) -> Value {
        json!({
            "type": "function",
            "name": self.name,
            "description": self.description,
            "parameters": self.input_schema.to_json(),
        })
    }
}

/// Tool execution errors.
///
/// Business outcomes like `taken` or `closed` are not errors; handlers
/// return them as structured results. This type covers invocation problems.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("tool {0} timed out after {1}s")]
    Timeout(String, u64),

    #[error("tool budget exceeded")]
    BudgetExceeded,

    #[error("internal: {0}")]
    Internal(String),
}

impl ToolError {
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams(message.into())
    }

    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound(name.into())
    }

    pub fn timeout(name: impl Into<String>, secs: u64) -> Self {
        Self::Timeout(name.into(), secs)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// The structured result handed back to the model
    pub fn to_result_json(&self) -> Value {
        let message = match self {
            Self::InvalidParams(m) => m.clone(),
            Self::NotFound(name) => format!("unknown tool: {name}"),
            Self::Timeout(_, _) => "timeout".to_string(),
            Self::BudgetExceeded => "budget-exceeded".to_string(),
            Self::Internal(m) => m.clone(),
        };
        json!({ "error": message })
    }
}

/// Tool output wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub value: Value,
}

impl ToolOutput {
    pub fn json(value: Value) -> Self {
        Self { value }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            value: json!({ "message": text.into() }),
        }
    }
}

/// A tool invocable by the realtime model mid-conversation
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn schema(&self) -> ToolSchema;

    fn idempotency(&self) -> IdempotencyPolicy {
        IdempotencyPolicy::None
    }

    /// Run the tool. The session is the per-call state handle; handlers may
    /// set flags and slots but must not block outside store/integration I/O.
    async fn execute(
        &self,
        session: &mut CallSession,
        input: Value,
    ) -> Result<ToolOutput, ToolError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_missing_required_field() {
        let schema = InputSchema::object()
            .property("name", PropertySchema::string("Customer name"), true)
            .property("notes", PropertySchema::string("Extra notes"), false);

        assert!(schema.validate(&json!({"name": "Alice"})).is_ok());
        assert!(schema.validate(&json!({"notes": "hi"})).is_err());
        assert!(schema.validate(&json!("not an object")).is_err());
    }

    #[test]
    fn validate_checks_types() {
        let schema =
            InputSchema::object().property("count", PropertySchema::integer("How many"), true);
        assert!(schema.validate(&json!({"count": 3})).is_ok());
        assert!(schema.validate(&json!({"count": "three"})).is_err());
    }

    #[test]
    fn realtime_schema_carries_enum_values() {
        let schema = ToolSchema {
            name: "check_slot_available".to_string(),
            description: "Check a slot".to_string(),
            input_schema: InputSchema::object().property(
                "location_code",
                PropertySchema::enum_type(
                    "Service location",
                    vec!["DAL".to_string(), "FTW".to_string()],
                ),
                true,
            ),
        };
        let wire = schema.to_realtime_schema();
        assert_eq!(wire["type"], "function");
        assert_eq!(wire["name"], "check_slot_available");
        assert_eq!(wire["parameters"]["properties"]["location_code"]["enum"][0], "DAL");
        assert_eq!(wire["parameters"]["required"][0], "location_code");
    }

    #[test]
    fn tool_error_maps_to_structured_results() {
        assert_eq!(
            ToolError::BudgetExceeded.to_result_json(),
            json!({"error": "budget-exceeded"})
        );
        assert_eq!(
            ToolError::timeout("create_booking", 3).to_result_json(),
            json!({"error": "timeout"})
        );
    }
}
