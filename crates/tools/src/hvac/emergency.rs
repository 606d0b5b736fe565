//! Emergency logging tool
//!
//! The log row is written before any notification or dial-out is attempted,
//! so the record exists even when everything downstream fails.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

use hvac_voice_core::{CallSession, TurnRole};
use hvac_voice_persistence::{EmergencyLog, EmergencyStore};

use crate::integrations::{Notification, NotificationGateway, NotificationKind};
use crate::schema::{InputSchema, PropertySchema, Tool, ToolError, ToolOutput, ToolSchema};

use super::{optional_str, required_str};

const EMERGENCY_TYPES: [&str; 5] = [
    "gas_leak",
    "carbon_monoxide",
    "no_heat_extreme_cold",
    "no_cooling_extreme_heat",
    "electrical_burning_smell",
];

pub struct LogEmergencyTool {
    emergencies: Arc<dyn EmergencyStore>,
    notifications: Arc<dyn NotificationGateway>,
}

impl LogEmergencyTool {
    pub fn new(
        emergencies: Arc<dyn EmergencyStore>,
        notifications: Arc<dyn NotificationGateway>,
    ) -> Self {
        Self {
            emergencies,
            notifications,
        }
    }
}

#[async_trait]
impl Tool for LogEmergencyTool {
    fn name(&self) -> &str {
        "log_emergency"
    }

    fn description(&self) -> &str {
        "Log a safety emergency and alert the on-call team"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: InputSchema::object()
                .property(
                    "type",
                    PropertySchema::enum_type(
                        "Classified emergency type",
                        EMERGENCY_TYPES.iter().map(|s| s.to_string()).collect(),
                    ),
                    true,
                )
                .property(
                    "description",
                    PropertySchema::string("What the caller reported"),
                    true,
                )
                .property(
                    "location",
                    PropertySchema::string("Service location code, if known"),
                    false,
                ),
        }
    }

    async fn execute(
        &self,
        session: &mut CallSession,
        input: Value,
    ) -> Result<ToolOutput, ToolError> {
        let emergency_type = required_str(&input, "type")?.to_string();
        let description = required_str(&input, "description")?.to_string();
        let location_code = optional_str(&input, "location");

        let log = EmergencyLog {
            id: Utc::now().timestamp_millis(),
            call_id: session.call_id.clone(),
            caller_phone: session.caller_phone.clone(),
            emergency_type: emergency_type.clone(),
            description: description.clone(),
            location_code,
            created_at: Utc::now(),
        };
        self.emergencies
            .append(&log)
            .await
            .map_err(|e| ToolError::internal(e.to_string()))?;

        session.flags.emergency_detected = true;
        session.push_turn(
            TurnRole::Tool,
            format!("emergency logged: {emergency_type}"),
            None,
        );

        // Side-channel alert; the row above is already durable
        if let Err(e) = self
            .notifications
            .send(Notification {
                kind: NotificationKind::EmergencyAlert,
                subject: format!("EMERGENCY: {emergency_type}"),
                body: format!(
                    "Call {} from {}: {description}",
                    session.call_id, session.caller_phone
                ),
                recipient: None,
            })
            .await
        {
            tracing::warn!(call_id = %session.call_id, error = %e, "Emergency alert failed");
        }

        Ok(ToolOutput::json(json!({
            "status": "success",
            "logged": true,
            "instruction": "Acknowledge the emergency and keep the caller on the line.",
        })))
    }
}
