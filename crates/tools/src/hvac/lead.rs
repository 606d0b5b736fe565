//! Lead capture tool

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

use hvac_voice_core::CallSession;
use hvac_voice_persistence::{Lead, LeadStore};

use crate::schema::{InputSchema, PropertySchema, Tool, ToolError, ToolOutput, ToolSchema};

use super::{optional_str, required_str};

pub struct CaptureLeadTool {
    leads: Arc<dyn LeadStore>,
}

impl CaptureLeadTool {
    pub fn new(leads: Arc<dyn LeadStore>) -> Self {
        Self { leads }
    }
}

#[async_trait]
impl Tool for CaptureLeadTool {
    fn name(&self) -> &str {
        "capture_lead"
    }

    fn description(&self) -> &str {
        "Save the caller's details for a follow-up when they don't book"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: InputSchema::object()
                .property("name", PropertySchema::string("Caller's name"), true)
                .property(
                    "phone",
                    PropertySchema::string("Callback phone (E.164)"),
                    true,
                )
                .property(
                    "issue",
                    PropertySchema::string("What they called about"),
                    true,
                )
                .property("notes", PropertySchema::string("Anything else useful"), false),
        }
    }

    async fn execute(
        &self,
        session: &mut CallSession,
        input: Value,
    ) -> Result<ToolOutput, ToolError> {
        let name = required_str(&input, "name")?.to_string();
        let phone = required_str(&input, "phone")?.to_string();
        let issue = required_str(&input, "issue")?.to_string();
        let notes = optional_str(&input, "notes");

        self.leads
            .insert(&Lead {
                id: Utc::now().timestamp_millis(),
                call_id: Some(session.call_id.clone()),
                name: name.clone(),
                phone: phone.clone(),
                issue,
                notes,
                created_at: Utc::now(),
            })
            .await
            .map_err(|e| ToolError::internal(e.to_string()))?;

        session.slots.name = Some(name);
        session.slots.callback_phone = Some(phone);

        Ok(ToolOutput::json(json!({
            "status": "success",
            "message": "Lead saved; someone will call back within one business day.",
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hvac_voice_persistence::InMemoryLeadStore;

    #[tokio::test]
    async fn saves_the_lead_and_updates_slots() {
        let leads = Arc::new(InMemoryLeadStore::new());
        let tool = CaptureLeadTool::new(leads.clone());
        let mut session = CallSession::new("CA1", "+1555", "+1555", "default");

        let output = tool
            .execute(
                &mut session,
                json!({"name": "Bob", "phone": "+15551112222", "issue": "quote for new unit"}),
            )
            .await
            .unwrap();
        assert_eq!(output.value["status"], "success");
        assert_eq!(leads.list_recent(10).await.unwrap().len(), 1);
        assert_eq!(session.slots.name.as_deref(), Some("Bob"));
    }
}
