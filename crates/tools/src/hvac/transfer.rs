//! Transfer request tool
//!
//! Sets the transfer flag; the bridge dials out on the next agent turn.

use async_trait::async_trait;
use serde_json::{json, Value};

use hvac_voice_core::{CallSession, TurnRole};

use crate::schema::{InputSchema, PropertySchema, Tool, ToolError, ToolOutput, ToolSchema};

use super::required_str;

pub struct RequestTransferTool;

impl RequestTransferTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RequestTransferTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for RequestTransferTool {
    fn name(&self) -> &str {
        "request_transfer"
    }

    fn description(&self) -> &str {
        "Transfer the caller to a human operator"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: InputSchema::object().property(
                "reason",
                PropertySchema::string("Why the caller needs a human"),
                true,
            ),
        }
    }

    async fn execute(
        &self,
        session: &mut CallSession,
        input: Value,
    ) -> Result<ToolOutput, ToolError> {
        let reason = required_str(&input, "reason")?;

        session.flags.transfer_requested = true;
        session.push_turn(TurnRole::Tool, format!("transfer requested: {reason}"), None);
        tracing::info!(call_id = %session.call_id, reason, "Transfer requested");

        Ok(ToolOutput::json(json!({
            "status": "success",
            "message": "Transfer queued; tell the caller you are connecting them now.",
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sets_the_transfer_flag() {
        let tool = RequestTransferTool::new();
        let mut session = CallSession::new("CA1", "+1555", "+1555", "default");

        let output = tool
            .execute(&mut session, json!({"reason": "billing dispute"}))
            .await
            .unwrap();
        assert_eq!(output.value["status"], "success");
        assert!(session.flags.transfer_requested);
        assert_eq!(session.turns.len(), 1);
    }
}
