//! Tool registry
//!
//! Owns the tool set published to the model and executes invocations with
//! validation, a per-response budget, and a hard timeout. Every failure mode
//! becomes a structured `{"error": ...}` result; nothing here panics a call.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hvac_voice_core::CallSession;

use crate::schema::{Tool, ToolError, ToolSchema};

/// Counts tool invocations within a single model response
#[derive(Debug)]
pub struct ResponseBudget {
    limit: u32,
    used: u32,
}

impl ResponseBudget {
    pub fn new(limit: u32) -> Self {
        Self { limit, used: 0 }
    }

    /// Reset at every response boundary
    pub fn reset(&mut self) {
        self.used = 0;
    }

    fn try_consume(&mut self) -> Result<(), ToolError> {
        if self.used >= self.limit {
            return Err(ToolError::BudgetExceeded);
        }
        self.used += 1;
        Ok(())
    }

    pub fn used(&self) -> u32 {
        self.used
    }
}

/// Tool registry
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    timeout: Duration,
}

impl ToolRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            tools: HashMap::new(),
            timeout,
        }
    }

    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn list_schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self.tools.values().map(|t| t.schema()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// The `tools` array for the model's session configuration
    pub fn realtime_tool_schemas(&self) -> Vec<Value> {
        self.list_schemas()
            .iter()
            .map(|s| s.to_realtime_schema())
            .collect()
    }

    /// Execute a tool call from the model and return the structured result
    /// to send back. Validation failures, timeouts, unknown tools and budget
    /// exhaustion all come back as `{"error": ...}` rather than an Err; the
    /// bridge never has a handler failure to propagate.
    pub async fn execute(
        &self,
        session: &mut CallSession,
        name: &str,
        arguments: Value,
        budget: &mut ResponseBudget,
    ) -> Value {
        if let Err(e) = budget.try_consume() {
            tracing::warn!(tool = name, call_id = %session.call_id, "Tool budget exhausted");
            return e.to_result_json();
        }

        let Some(tool) = self.tools.get(name) else {
            tracing::warn!(tool = name, "Unknown tool requested by model");
            return ToolError::not_found(name).to_result_json();
        };

        if let Err(e) = tool.schema().input_schema.validate(&arguments) {
            return e.to_result_json();
        }

        session.record_tool_call(name);
        let started = Instant::now();

        let result = match tokio::time::timeout(self.timeout, tool.execute(session, arguments)).await
        {
            Ok(Ok(output)) => output.value,
            Ok(Err(e)) => {
                tracing::warn!(tool = name, error = %e, "Tool handler failed");
                e.to_result_json()
            }
            Err(_) => {
                tracing::warn!(tool = name, timeout_s = self.timeout.as_secs(), "Tool timed out");
                ToolError::timeout(name, self.timeout.as_secs()).to_result_json()
            }
        };

        let elapsed = started.elapsed();
        metrics::histogram!("tool_duration_seconds", "tool" => name.to_string())
            .record(elapsed.as_secs_f64());
        tracing::debug!(
            tool = name,
            call_id = %session.call_id,
            duration_ms = elapsed.as_millis() as u64,
            "Tool executed"
        );

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{InputSchema, PropertySchema, ToolOutput};
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the message back"
        }
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: "echo".to_string(),
                description: "Echo the message back".to_string(),
                input_schema: InputSchema::object().property(
                    "message",
                    PropertySchema::string("Message"),
                    true,
                ),
            }
        }
        async fn execute(
            &self,
            _session: &mut CallSession,
            input: Value,
        ) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::json(json!({"echo": input["message"]})))
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "Never finishes in time"
        }
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: "slow".to_string(),
                description: "Never finishes in time".to_string(),
                input_schema: InputSchema::object(),
            }
        }
        async fn execute(
            &self,
            _session: &mut CallSession,
            _input: Value,
        ) -> Result<ToolOutput, ToolError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ToolOutput::text("done"))
        }
    }

    fn session() -> CallSession {
        CallSession::new("CA1", "+15550001111", "+15559990000", "default")
    }

    #[tokio::test]
    async fn executes_and_records_against_the_session() {
        let mut registry = ToolRegistry::new(Duration::from_secs(3));
        registry.register(EchoTool);
        let mut session = session();
        let mut budget = ResponseBudget::new(5);

        let result = registry
            .execute(&mut session, "echo", json!({"message": "hi"}), &mut budget)
            .await;
        assert_eq!(result, json!({"echo": "hi"}));
        assert_eq!(session.counters.tool_calls, 1);
        assert_eq!(session.tools_used, vec!["echo".to_string()]);
    }

    #[tokio::test]
    async fn budget_refuses_the_sixth_call() {
        let mut registry = ToolRegistry::new(Duration::from_secs(3));
        registry.register(EchoTool);
        let mut session = session();
        let mut budget = ResponseBudget::new(5);

        for _ in 0..5 {
            let result = registry
                .execute(&mut session, "echo", json!({"message": "hi"}), &mut budget)
                .await;
            assert!(result.get("error").is_none());
        }
        let result = registry
            .execute(&mut session, "echo", json!({"message": "hi"}), &mut budget)
            .await;
        assert_eq!(result, json!({"error": "budget-exceeded"}));

        // A new response resets the budget
        budget.reset();
        let result = registry
            .execute(&mut session, "echo", json!({"message": "hi"}), &mut budget)
            .await;
        assert!(result.get("error").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_becomes_a_structured_error() {
        let mut registry = ToolRegistry::new(Duration::from_secs(3));
        registry.register(SlowTool);
        let mut session = session();
        let mut budget = ResponseBudget::new(5);

        let result = registry
            .execute(&mut session, "slow", json!({}), &mut budget)
            .await;
        assert_eq!(result, json!({"error": "timeout"}));
    }

    #[tokio::test]
    async fn unknown_tool_and_bad_args_are_refused() {
        let mut registry = ToolRegistry::new(Duration::from_secs(3));
        registry.register(EchoTool);
        let mut session = session();
        let mut budget = ResponseBudget::new(5);

        let result = registry
            .execute(&mut session, "nope", json!({}), &mut budget)
            .await;
        assert!(result["error"].as_str().unwrap().contains("unknown tool"));

        let result = registry
            .execute(&mut session, "echo", json!({}), &mut budget)
            .await;
        assert!(result["error"].as_str().unwrap().contains("required"));
    }
}
