//! Service location listing tool

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use hvac_voice_core::CallSession;
use hvac_voice_persistence::LocationStore;

use crate::schema::{InputSchema, Tool, ToolError, ToolOutput, ToolSchema};

pub struct ListServiceLocationsTool {
    locations: Arc<dyn LocationStore>,
}

impl ListServiceLocationsTool {
    pub fn new(locations: Arc<dyn LocationStore>) -> Self {
        Self { locations }
    }
}

#[async_trait]
impl Tool for ListServiceLocationsTool {
    fn name(&self) -> &str {
        "list_service_locations"
    }

    fn description(&self) -> &str {
        "List the service locations with address, phone and business hours"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: InputSchema::object(),
        }
    }

    async fn execute(
        &self,
        _session: &mut CallSession,
        _input: Value,
    ) -> Result<ToolOutput, ToolError> {
        let locations = self
            .locations
            .list_active()
            .await
            .map_err(|e| ToolError::internal(e.to_string()))?;

        let entries: Vec<Value> = locations
            .iter()
            .map(|l| {
                json!({
                    "name": l.name,
                    "code": l.code,
                    "address": l.address,
                    "phone": l.phone,
                    "hours": l.hours_label(),
                })
            })
            .collect();

        Ok(ToolOutput::json(json!({ "locations": entries })))
    }
}
