//! Bridge behaviour against scripted fake peers
//!
//! The fake telephony peer and fake model peer are plain channels; the
//! scenarios drive both sides and observe every command the bridge emits.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use hvac_voice_bridge::bridge::{run_bridge, BridgeConfig, BridgeDeps, BridgeOutcome, ModelPeer, TelephonyPeer};
use hvac_voice_bridge::{BridgeError, ModelCommand, ModelEvent, StartMeta, TelephonyCommand, TelephonyEvent};
use hvac_voice_config::{ModelSettings, TenantConfig};
use hvac_voice_core::{pcm16_24k_to_ulaw8k, EndedReason};
use hvac_voice_persistence::{PersistenceLayer, SessionStoreConfig};
use hvac_voice_resilience::{BreakerRegistry, CircuitBreakerConfig};
use hvac_voice_tools::{create_registry, StubNotificationGateway};
use hvac_voice_tts::{BuiltinSayProvider, TtsEngine};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

const CALL_SID: &str = "CA-test-1";
const STREAM_SID: &str = "MZ-test-1";

struct Harness {
    to_telephony: mpsc::Sender<TelephonyEvent>,
    from_telephony: mpsc::Receiver<TelephonyCommand>,
    to_model: mpsc::Sender<ModelEvent>,
    from_model: mpsc::Receiver<ModelCommand>,
    bridge: JoinHandle<Result<BridgeOutcome, BridgeError>>,
    persistence: Arc<PersistenceLayer>,
    #[allow(dead_code)]
    cancel: CancellationToken,
}

async fn start_harness(max_call_duration: Duration) -> Harness {
    let persistence = Arc::new(PersistenceLayer::in_memory(SessionStoreConfig::default()));
    let notifications = Arc::new(StubNotificationGateway::new());
    let tools = Arc::new(create_registry(
        &persistence,
        notifications,
        Duration::from_secs(3),
    ));
    let tts = Arc::new(TtsEngine::new(
        vec![Arc::new(BuiltinSayProvider)],
        Arc::new(BreakerRegistry::new(CircuitBreakerConfig::default())),
        Duration::from_millis(100),
    ));

    let tenant = TenantConfig {
        id: "default".to_string(),
        company_name: "Comfort Call HVAC".to_string(),
        greeting: "Thanks for calling!".to_string(),
        transfer_phone: "+15005550006".to_string(),
        emergency_phone: String::new(),
        ..TenantConfig::default()
    };
    let mut model_settings = ModelSettings::default();
    model_settings.api_key = "sk-test".to_string();

    let config = BridgeConfig {
        tenant,
        model: model_settings,
        tool_budget: 5,
        max_call_duration,
        backpressure: Duration::from_secs(2),
        protocol_error_limit: 20,
    };
    let deps = BridgeDeps {
        sessions: persistence.sessions.clone(),
        tools,
        tts,
    };

    let (to_telephony, telephony_events) = mpsc::channel(64);
    let (telephony_commands, from_telephony) = mpsc::channel(64);
    let (to_model, model_events) = mpsc::channel(64);
    let (model_commands, from_model) = mpsc::channel(64);

    let telephony = TelephonyPeer {
        events: telephony_events,
        commands: telephony_commands,
    };
    let model_peer = ModelPeer {
        events: model_events,
        commands: model_commands,
    };

    let cancel = CancellationToken::new();
    let bridge_cancel = cancel.clone();
    let bridge = tokio::spawn(run_bridge(
        config,
        deps,
        telephony,
        move || async move { Ok::<_, BridgeError>(model_peer) },
        bridge_cancel,
    ));

    let harness = Harness {
        to_telephony,
        from_telephony,
        to_model,
        from_model,
        bridge,
        persistence,
        cancel,
    };
    harness.send_start().await;
    harness
}

impl Harness {
    async fn send_start(&self) {
        self.to_telephony
            .send(TelephonyEvent::Start {
                stream_sid: Some(STREAM_SID.to_string()),
                start: StartMeta {
                    stream_sid: STREAM_SID.to_string(),
                    call_sid: CALL_SID.to_string(),
                    media_format: None,
                    custom_parameters: Some(json!({
                        "from": "+15550001111",
                        "to": "+15559990000",
                    })),
                },
            })
            .await
            .unwrap();
    }

    /// The startup sequence: session.update, then the greeting response
    async fn expect_configuration(&mut self) {
        let first = self.recv_model().await;
        let ModelCommand::SessionUpdate { session } = first else {
            panic!("expected session.update first, got {first:?}");
        };
        assert!(session["instructions"]
            .as_str()
            .unwrap()
            .contains("Comfort Call HVAC"));
        assert_eq!(session["turn_detection"]["type"], "server_vad");
        assert_eq!(session["tools"].as_array().unwrap().len(), 9);

        let second = self.recv_model().await;
        let ModelCommand::ResponseCreate { response } = second else {
            panic!("expected response.create second, got {second:?}");
        };
        assert!(response.unwrap()["instructions"]
            .as_str()
            .unwrap()
            .contains("Thanks for calling!"));
    }

    async fn recv_model(&mut self) -> ModelCommand {
        tokio::time::timeout(Duration::from_secs(2), self.from_model.recv())
            .await
            .expect("timed out waiting for model command")
            .expect("model command channel closed")
    }

    async fn recv_telephony(&mut self) -> TelephonyCommand {
        tokio::time::timeout(Duration::from_secs(2), self.from_telephony.recv())
            .await
            .expect("timed out waiting for telephony command")
            .expect("telephony command channel closed")
    }

    async fn send_stop(&self) {
        self.to_telephony
            .send(TelephonyEvent::Stop {
                stream_sid: STREAM_SID.to_string(),
            })
            .await
            .unwrap();
    }

    async fn finish(self) -> BridgeOutcome {
        self.send_stop().await;
        tokio::time::timeout(Duration::from_secs(2), self.bridge)
            .await
            .expect("bridge did not end")
            .expect("bridge task panicked")
            .expect("bridge errored")
    }

    fn tool_call(name: &str, call_id: &str, arguments: serde_json::Value) -> ModelEvent {
        ModelEvent::ToolCall {
            call_id: call_id.to_string(),
            name: name.to_string(),
            arguments,
        }
    }
}

/// One delta's worth of PCM16 at 24 kHz: 480 samples of a constant value
fn pcm_delta(value: i16) -> Vec<u8> {
    (0..480).flat_map(|_| value.to_le_bytes()).collect()
}

fn expected_payload(pcm: &[u8]) -> String {
    BASE64.encode(pcm16_24k_to_ulaw8k(pcm).unwrap())
}

#[tokio::test]
async fn happy_path_greeting_forwards_deltas_in_order() {
    let mut h = start_harness(Duration::from_secs(600)).await;
    h.expect_configuration().await;

    let deltas = [pcm_delta(1000), pcm_delta(-2000), pcm_delta(3000)];
    h.to_model
        .send(ModelEvent::ResponseCreated {
            response_id: Some("r1".to_string()),
        })
        .await
        .unwrap();
    for delta in &deltas {
        h.to_model
            .send(ModelEvent::AudioDelta {
                response_id: Some("r1".to_string()),
                audio: delta.clone(),
            })
            .await
            .unwrap();
    }
    h.to_model
        .send(ModelEvent::AudioDone {
            response_id: Some("r1".to_string()),
        })
        .await
        .unwrap();
    h.to_model
        .send(ModelEvent::ResponseDone {
            response_id: Some("r1".to_string()),
        })
        .await
        .unwrap();

    for delta in &deltas {
        let command = h.recv_telephony().await;
        let TelephonyCommand::Media { stream_sid, payload } = command else {
            panic!("expected media, got {command:?}");
        };
        assert_eq!(stream_sid, STREAM_SID);
        assert_eq!(payload, expected_payload(delta));
    }

    let outcome = h.finish().await;
    assert_eq!(outcome.ended_reason, EndedReason::CallerHangup);
    assert!(outcome.session.counters.bytes_out > 0);
}

#[tokio::test]
async fn barge_in_clears_playback_and_cancels_the_response() {
    let mut h = start_harness(Duration::from_secs(600)).await;
    h.expect_configuration().await;

    h.to_model
        .send(ModelEvent::ResponseCreated {
            response_id: Some("r1".to_string()),
        })
        .await
        .unwrap();
    for _ in 0..2 {
        h.to_model
            .send(ModelEvent::AudioDelta {
                response_id: Some("r1".to_string()),
                audio: pcm_delta(500),
            })
            .await
            .unwrap();
    }

    // Caller starts talking over the agent
    h.to_model.send(ModelEvent::SpeechStarted).await.unwrap();

    // Stragglers from the cancelled response must never reach telephony
    for _ in 0..3 {
        h.to_model
            .send(ModelEvent::AudioDelta {
                response_id: Some("r1".to_string()),
                audio: pcm_delta(500),
            })
            .await
            .unwrap();
    }

    assert!(matches!(
        h.recv_telephony().await,
        TelephonyCommand::Media { .. }
    ));
    assert!(matches!(
        h.recv_telephony().await,
        TelephonyCommand::Media { .. }
    ));
    let third = h.recv_telephony().await;
    assert!(
        matches!(third, TelephonyCommand::Clear { .. }),
        "expected clear after barge-in, got {third:?}"
    );

    let cancel_cmd = h.recv_model().await;
    assert!(
        matches!(cancel_cmd, ModelCommand::ResponseCancel),
        "expected response.cancel, got {cancel_cmd:?}"
    );

    // Give any (wrongly) forwarded straggler time to surface
    h.send_stop().await;
    let outcome = tokio::time::timeout(Duration::from_secs(2), h.bridge)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(outcome.ended_reason, EndedReason::CallerHangup);

    let mut extra_media = 0;
    while let Ok(Some(command)) =
        tokio::time::timeout(Duration::from_millis(50), h.from_telephony.recv()).await
    {
        if matches!(command, TelephonyCommand::Media { .. }) {
            extra_media += 1;
        }
    }
    assert_eq!(extra_media, 0, "cancelled response leaked audio");
}

#[tokio::test]
async fn booking_tool_call_is_idempotent_on_call_id() {
    let mut h = start_harness(Duration::from_secs(600)).await;
    h.expect_configuration().await;

    let args = json!({
        "name": "Alice",
        "date": "2099-02-09",
        "time": "09:00",
        "issue": "AC out",
        "location_code": "DAL",
        "call_id": "CS1",
    });

    h.to_model
        .send(Harness::tool_call("create_booking", "call_1", args.clone()))
        .await
        .unwrap();

    let result = h.recv_model().await;
    let ModelCommand::ConversationItemCreate { item } = result else {
        panic!("expected tool result item, got {result:?}");
    };
    assert_eq!(item["type"], "function_call_output");
    assert_eq!(item["call_id"], "call_1");
    let output: serde_json::Value =
        serde_json::from_str(item["output"].as_str().unwrap()).unwrap();
    assert_eq!(output["status"], "success");
    let confirmation_id = output["confirmation_id"].as_i64().unwrap();

    assert!(matches!(
        h.recv_model().await,
        ModelCommand::ResponseCreate { .. }
    ));

    // The booking row exists
    let row = h
        .persistence
        .appointments
        .find_by_call("CS1")
        .await
        .unwrap()
        .expect("booking row missing");
    assert_eq!(row.confirmation_id, confirmation_id);

    // Re-emit the same tool call: same confirmation id, no second row
    h.to_model
        .send(Harness::tool_call("create_booking", "call_2", args))
        .await
        .unwrap();
    let result = h.recv_model().await;
    let ModelCommand::ConversationItemCreate { item } = result else {
        panic!("expected tool result item, got {result:?}");
    };
    let output: serde_json::Value =
        serde_json::from_str(item["output"].as_str().unwrap()).unwrap();
    assert_eq!(output["idempotent"], true);
    assert_eq!(output["confirmation_id"].as_i64().unwrap(), confirmation_id);
    assert!(matches!(
        h.recv_model().await,
        ModelCommand::ResponseCreate { .. }
    ));

    let outcome = h.finish().await;
    assert!(outcome.session.flags.appointment_booked);
    assert_eq!(outcome.session.confirmation_id, Some(confirmation_id));
}

#[tokio::test]
async fn emergency_tool_call_writes_the_row_and_sets_the_flag() {
    let mut h = start_harness(Duration::from_secs(600)).await;
    h.expect_configuration().await;

    h.to_model
        .send(Harness::tool_call(
            "log_emergency",
            "call_9",
            json!({"type": "gas_leak", "description": "smells gas"}),
        ))
        .await
        .unwrap();

    let result = h.recv_model().await;
    let ModelCommand::ConversationItemCreate { item } = result else {
        panic!("expected tool result item, got {result:?}");
    };
    let output: serde_json::Value =
        serde_json::from_str(item["output"].as_str().unwrap()).unwrap();
    assert_eq!(output["status"], "success");

    let rows = h
        .persistence
        .emergencies
        .list_for_call(CALL_SID)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].emergency_type, "gas_leak");
    assert_eq!(rows[0].caller_phone, "+15550001111");

    assert!(matches!(
        h.recv_model().await,
        ModelCommand::ResponseCreate { .. }
    ));

    let outcome = h.finish().await;
    assert!(outcome.session.flags.emergency_detected);
}

#[tokio::test]
async fn fatal_model_error_speaks_fallback_and_transfers() {
    let mut h = start_harness(Duration::from_secs(600)).await;
    h.expect_configuration().await;

    h.to_model
        .send(ModelEvent::Error {
            message: "invalid api key".to_string(),
            fatal: true,
        })
        .await
        .unwrap();

    // The builtin TTS chain surfaces the apology as an announce marker
    let first = h.recv_telephony().await;
    let TelephonyCommand::Announce { text } = first else {
        panic!("expected announce, got {first:?}");
    };
    assert!(text.to_lowercase().contains("sorry"));

    let second = h.recv_telephony().await;
    let TelephonyCommand::Transfer { to } = second else {
        panic!("expected transfer, got {second:?}");
    };
    assert_eq!(to, "+15005550006");

    let outcome = tokio::time::timeout(Duration::from_secs(2), h.bridge)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(outcome.ended_reason, EndedReason::ModelFatal);
}

#[tokio::test(start_paused = true)]
async fn wall_clock_cap_ends_the_call_with_a_wrap_up() {
    let mut h = start_harness(Duration::from_secs(2)).await;
    h.expect_configuration().await;

    // Both streams stay silent; the cap fires on its own
    let outcome = tokio::time::timeout(Duration::from_secs(10), h.bridge)
        .await
        .expect("bridge did not end at the cap")
        .unwrap()
        .unwrap();
    assert_eq!(outcome.ended_reason, EndedReason::DurationCap);

    let first = tokio::time::timeout(Duration::from_secs(2), h.from_telephony.recv())
        .await
        .unwrap()
        .unwrap();
    let TelephonyCommand::Announce { text } = first else {
        panic!("expected wrap-up announce, got {first:?}");
    };
    assert!(!text.is_empty());

    let second = tokio::time::timeout(Duration::from_secs(2), h.from_telephony.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(second, TelephonyCommand::Hangup));
}

#[tokio::test]
async fn transfer_request_is_acted_on_at_the_next_turn_boundary() {
    let mut h = start_harness(Duration::from_secs(600)).await;
    h.expect_configuration().await;

    h.to_model
        .send(Harness::tool_call(
            "request_transfer",
            "call_3",
            json!({"reason": "caller asked for a human"}),
        ))
        .await
        .unwrap();
    // Tool result + follow-up response request
    let _ = h.recv_model().await;
    let _ = h.recv_model().await;

    // The agent finishes its turn; the bridge then dials out
    h.to_model
        .send(ModelEvent::ResponseDone {
            response_id: Some("r2".to_string()),
        })
        .await
        .unwrap();

    let command = h.recv_telephony().await;
    let TelephonyCommand::Transfer { to } = command else {
        panic!("expected transfer, got {command:?}");
    };
    assert_eq!(to, "+15005550006");

    let outcome = tokio::time::timeout(Duration::from_secs(2), h.bridge)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(outcome.ended_reason, EndedReason::Transferred);
    assert!(outcome.session.flags.transfer_requested);
}
