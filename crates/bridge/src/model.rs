//! Realtime model protocol
//!
//! Client commands are typed and serialized with their dotted `type` tags;
//! server events arrive as JSON whose shape varies by type, so parsing goes
//! through one classifier that tolerates unknown events.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Serialize;
use serde_json::{json, Value};

use hvac_voice_config::{ModelSettings, TenantConfig};
use hvac_voice_tools::ToolRegistry;

/// Client → server commands
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ModelCommand {
    #[serde(rename = "session.update")]
    SessionUpdate { session: Value },
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioAppend { audio: String },
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioCommit,
    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<Value>,
    },
    #[serde(rename = "response.cancel")]
    ResponseCancel,
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: Value },
}

impl ModelCommand {
    pub fn to_wire(&self) -> String {
        serde_json::to_string(self).expect("model command serializes")
    }

    /// The session configuration sent right after connect
    pub fn session_configure(
        tenant: &TenantConfig,
        model: &ModelSettings,
        tools: &ToolRegistry,
    ) -> Self {
        let format = model.audio_format.wire_name();
        Self::SessionUpdate {
            session: json!({
                "instructions": tenant.render_system_prompt(),
                "voice": model.voice,
                "temperature": model.temperature,
                "max_response_output_tokens": model.max_response_tokens,
                "modalities": ["audio", "text"],
                "input_audio_format": format,
                "output_audio_format": format,
                "turn_detection": {
                    "type": "server_vad",
                    "threshold": model.vad.threshold,
                    "prefix_padding_ms": model.vad.prefix_padding_ms,
                    "silence_duration_ms": model.vad.silence_duration_ms,
                },
                "tools": tools.realtime_tool_schemas(),
            }),
        }
    }

    /// Initial greeting instruction
    pub fn greet(tenant: &TenantConfig) -> Self {
        Self::ResponseCreate {
            response: Some(json!({
                "instructions": format!("Greet the caller with: \"{}\"", tenant.greeting),
            })),
        }
    }

    /// Hand a tool result back to the model
    pub fn tool_result(call_id: &str, output: &Value) -> Self {
        Self::ConversationItemCreate {
            item: json!({
                "type": "function_call_output",
                "call_id": call_id,
                "output": output.to_string(),
            }),
        }
    }
}

/// Server → client events, classified
#[derive(Debug, Clone)]
pub enum ModelEvent {
    SessionCreated,
    SessionUpdated,
    ResponseCreated {
        response_id: Option<String>,
    },
    AudioDelta {
        response_id: Option<String>,
        /// Decoded audio bytes
        audio: Vec<u8>,
    },
    AudioDone {
        response_id: Option<String>,
    },
    /// Agent speech transcript fragment
    AgentTranscriptDelta {
        text: String,
    },
    /// Finished caller-side transcription of one utterance
    CallerTranscript {
        text: String,
    },
    ToolCall {
        call_id: String,
        name: String,
        arguments: Value,
    },
    ResponseDone {
        response_id: Option<String>,
    },
    SpeechStarted,
    SpeechStopped,
    Error {
        message: String,
        fatal: bool,
    },
    /// Parseable JSON with an event type this bridge does not act on
    Ignored,
    /// Unparseable frame
    Malformed,
}

impl ModelEvent {
    pub fn parse(text: &str) -> Self {
        let Ok(value) = serde_json::from_str::<Value>(text) else {
            return Self::Malformed;
        };
        let Some(event_type) = value.get("type").and_then(|t| t.as_str()) else {
            return Self::Malformed;
        };

        match event_type {
            "session.created" => Self::SessionCreated,
            "session.updated" => Self::SessionUpdated,
            "response.created" => Self::ResponseCreated {
                response_id: response_id_of(&value),
            },
            "response.audio.delta" => {
                let Some(delta) = value.get("delta").and_then(|d| d.as_str()) else {
                    return Self::Malformed;
                };
                match BASE64.decode(delta) {
                    Ok(audio) => Self::AudioDelta {
                        response_id: value
                            .get("response_id")
                            .and_then(|r| r.as_str())
                            .map(String::from),
                        audio,
                    },
                    Err(_) => Self::Malformed,
                }
            }
            "response.audio.done" => Self::AudioDone {
                response_id: value
                    .get("response_id")
                    .and_then(|r| r.as_str())
                    .map(String::from),
            },
            "response.audio_transcript.delta" => {
                match value.get("delta").and_then(|d| d.as_str()) {
                    Some(text) => Self::AgentTranscriptDelta {
                        text: text.to_string(),
                    },
                    None => Self::Malformed,
                }
            }
            "conversation.item.input_audio_transcription.completed" => {
                match value.get("transcript").and_then(|t| t.as_str()) {
                    Some(text) => Self::CallerTranscript {
                        text: text.to_string(),
                    },
                    None => Self::Malformed,
                }
            }
            "response.output_item.added" => parse_output_item(&value),
            "response.function_call_arguments.done" => {
                let call_id = value
                    .get("call_id")
                    .and_then(|c| c.as_str())
                    .unwrap_or_default()
                    .to_string();
                let name = value
                    .get("name")
                    .and_then(|n| n.as_str())
                    .unwrap_or_default()
                    .to_string();
                if name.is_empty() {
                    return Self::Ignored;
                }
                Self::ToolCall {
                    call_id,
                    name,
                    arguments: parse_arguments(value.get("arguments")),
                }
            }
            "response.done" => Self::ResponseDone {
                response_id: response_id_of(&value),
            },
            "input_audio_buffer.speech_started" => Self::SpeechStarted,
            "input_audio_buffer.speech_stopped" => Self::SpeechStopped,
            "error" => {
                let message = value
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                    .or_else(|| value.get("message").and_then(|m| m.as_str()))
                    .unwrap_or("unknown model error")
                    .to_string();
                let code = value
                    .get("error")
                    .and_then(|e| e.get("code"))
                    .and_then(|c| c.as_str())
                    .unwrap_or("");
                Self::Error {
                    fatal: is_fatal(code, &message),
                    message,
                }
            }
            _ => Self::Ignored,
        }
    }
}

fn response_id_of(value: &Value) -> Option<String> {
    value
        .get("response")
        .and_then(|r| r.get("id"))
        .and_then(|i| i.as_str())
        .or_else(|| value.get("response_id").and_then(|i| i.as_str()))
        .map(String::from)
}

fn parse_output_item(value: &Value) -> ModelEvent {
    let Some(item) = value.get("item") else {
        return ModelEvent::Ignored;
    };
    if item.get("type").and_then(|t| t.as_str()) != Some("function_call") {
        return ModelEvent::Ignored;
    }
    let Some(name) = item.get("name").and_then(|n| n.as_str()) else {
        return ModelEvent::Ignored;
    };
    let call_id = item
        .get("call_id")
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string();
    ModelEvent::ToolCall {
        call_id,
        name: name.to_string(),
        arguments: parse_arguments(item.get("arguments")),
    }
}

/// Arguments may arrive as an object or as a JSON-encoded string
fn parse_arguments(raw: Option<&Value>) -> Value {
    match raw {
        Some(Value::String(s)) => serde_json::from_str(s).unwrap_or_else(|_| json!({})),
        Some(v) if v.is_object() => v.clone(),
        _ => json!({}),
    }
}

/// Auth and quota failures cannot recover within a call
fn is_fatal(code: &str, message: &str) -> bool {
    const FATAL_CODES: [&str; 3] = ["invalid_api_key", "insufficient_quota", "session_expired"];
    if FATAL_CODES.contains(&code) {
        return true;
    }
    let lower = message.to_lowercase();
    lower.contains("auth") || lower.contains("quota") || lower.contains("api key")
}
