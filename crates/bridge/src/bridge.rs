//! Per-call bridge coordinator
//!
//! Joins the telephony websocket and the realtime model websocket for one
//! call. Two peer tasks run in parallel — `telephony→model` (uplink) and
//! `model→telephony` (downlink) — sharing only the session and explicit
//! channels. A supervisor waits for either task to terminate, cancels the
//! other, and reports how the call ended.
//!
//! Ordering rules enforced here:
//! - inbound frames reach the model in arrival order (single uplink task);
//! - audio deltas of one response reach telephony in arrival order;
//! - after barge-in or a response boundary, no delta of an older response
//!   is ever written to telephony.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use hvac_voice_config::{ModelAudioFormat, ModelSettings, TenantConfig, TtsPreference};
use hvac_voice_core::{
    pcm16_24k_to_ulaw8k, ulaw8k_to_pcm16_24k, CallSession, EndedReason, FrameChunker, TurnRole,
    ULAW_FRAME_BYTES,
};
use hvac_voice_persistence::CachedSessionStore;
use hvac_voice_tools::{ResponseBudget, ToolRegistry};
use hvac_voice_tts::{TtsChunk, TtsEngine};

use crate::error::BridgeError;
use crate::model::{ModelCommand, ModelEvent};
use crate::telephony::{TelephonyCommand, TelephonyEvent};

/// μ-law code for a zero sample
const ULAW_SILENCE: u8 = 0xFF;

/// How long the bridge waits for the telephony start event
const AWAIT_START_TIMEOUT: Duration = Duration::from_secs(15);

/// How long peers get to wind down after cancellation
const TEARDOWN_GRACE: Duration = Duration::from_millis(100);

/// Channel endpoints toward the telephony adapter
pub struct TelephonyPeer {
    pub events: mpsc::Receiver<TelephonyEvent>,
    pub commands: mpsc::Sender<TelephonyCommand>,
}

/// Channel endpoints toward the model adapter
pub struct ModelPeer {
    pub events: mpsc::Receiver<ModelEvent>,
    pub commands: mpsc::Sender<ModelCommand>,
}

/// Per-call tuning, resolved by the supervisor before the bridge starts
#[derive(Clone)]
pub struct BridgeConfig {
    pub tenant: TenantConfig,
    pub model: ModelSettings,
    pub tool_budget: u32,
    pub max_call_duration: Duration,
    pub backpressure: Duration,
    /// Protocol errors tolerated before the call is ended as fatal
    pub protocol_error_limit: u32,
}

/// Shared services the bridge borrows for the call's lifetime
#[derive(Clone)]
pub struct BridgeDeps {
    pub sessions: Arc<CachedSessionStore>,
    pub tools: Arc<ToolRegistry>,
    pub tts: Arc<TtsEngine>,
}

/// How the call ended plus the final session snapshot
#[derive(Debug)]
pub struct BridgeOutcome {
    pub ended_reason: EndedReason,
    pub session: CallSession,
}

/// Bridge-level state machine; barge-in and tool-call are re-entrant
/// sub-states of `Live` rather than separate nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BridgeState {
    AwaitingStart,
    ConfiguringModel,
    Live,
    Draining,
    Ended,
}

/// Run the bridge for one call.
///
/// `model_factory` opens the model peer only after the telephony `start`
/// event arrives, matching the startup sequence; tests hand in scripted
/// channel peers instead of live websockets.
pub async fn run_bridge<F, Fut>(
    config: BridgeConfig,
    deps: BridgeDeps,
    mut telephony: TelephonyPeer,
    model_factory: F,
    cancel: CancellationToken,
) -> Result<BridgeOutcome, BridgeError>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<ModelPeer, BridgeError>>,
{
    let mut state = BridgeState::AwaitingStart;
    tracing::debug!(state = ?state, "Bridge starting");

    // Await the start event carrying the stream and call ids
    let start = tokio::select! {
        start = await_start(&mut telephony.events) => start?,
        _ = tokio::time::sleep(AWAIT_START_TIMEOUT) => return Err(BridgeError::NoStart),
        _ = cancel.cancelled() => return Err(BridgeError::Cancelled),
    };
    let stream_sid = start.stream_sid.clone();
    let call_sid = start.call_sid.clone();

    // Allocate or recover the session
    let mut session = match deps.sessions.get(&call_sid).await {
        Some(existing) => existing,
        None => CallSession::new(
            &call_sid,
            start.from_number().unwrap_or_else(|| "unknown".to_string()),
            start.to_number().unwrap_or_else(|| "unknown".to_string()),
            &config.tenant.id,
        ),
    };
    session.stream_id = Some(stream_sid.clone());
    deps.sessions.set(&session).await;

    state = BridgeState::ConfiguringModel;
    tracing::info!(call_sid = %call_sid, stream_sid = %stream_sid, state = ?state, "Call started");

    let model = model_factory().await?;

    // Configure the model session, then ask for the tenant greeting
    let configure = ModelCommand::session_configure(&config.tenant, &config.model, &deps.tools);
    if model.commands.send(configure).await.is_err() {
        return Err(BridgeError::ModelClosed);
    }
    if model
        .commands
        .send(ModelCommand::greet(&config.tenant))
        .await
        .is_err()
    {
        return Err(BridgeError::ModelClosed);
    }

    state = BridgeState::Live;
    tracing::debug!(call_sid = %call_sid, state = ?state, "Bridge live");

    let session = Arc::new(Mutex::new(session));
    let peers_cancel = cancel.child_token();
    let (done_tx, mut done_rx) = mpsc::channel::<EndedReason>(2);

    let uplink_handle = {
        let done_tx = done_tx.clone();
        let fut = uplink(
            telephony.events,
            model.commands.clone(),
            session.clone(),
            config.model.audio_format,
            peers_cancel.clone(),
        );
        tokio::spawn(async move {
            let reason = fut.await;
            let _ = done_tx.send(reason).await;
        })
    };

    let peers_cancel_downlink = peers_cancel.clone();
    let downlink = Downlink {
        events: model.events,
        model_tx: model.commands,
        telephony_tx: telephony.commands.clone(),
        session: session.clone(),
        sessions: deps.sessions.clone(),
        tools: deps.tools.clone(),
        tts: deps.tts.clone(),
        stream_sid: stream_sid.clone(),
        config: config.clone(),
        budget: ResponseBudget::new(config.tool_budget),
        chunker: FrameChunker::new(ULAW_FRAME_BYTES),
        current_response: None,
        dropping_response: false,
        agent_transcript: String::new(),
        protocol_errors: 0,
        // The greeting response was just requested
        audio_deadline: Some(
            tokio::time::Instant::now()
                + Duration::from_secs(config.model.first_audio_deadline_seconds),
        ),
    };
    let downlink_handle = {
        let done_tx = done_tx.clone();
        tokio::spawn(async move {
            let reason = downlink.run(peers_cancel_downlink).await;
            let _ = done_tx.send(reason).await;
        })
    };
    drop(done_tx);

    // Supervisor: first terminating peer (or the wall clock) decides
    let wall_clock = tokio::time::sleep(config.max_call_duration);
    tokio::pin!(wall_clock);

    let ended_reason = tokio::select! {
        reason = done_rx.recv() => reason.unwrap_or(EndedReason::Error),
        _ = &mut wall_clock => {
            tracing::info!(call_sid = %call_sid, "Wall-clock cap reached");
            speak_to_telephony(
                &deps.tts,
                "We're out of time for today, but we have everything we need. Goodbye!",
                &telephony.commands,
                &stream_sid,
                &cancel,
            )
            .await;
            let _ = telephony.commands.send(TelephonyCommand::Hangup).await;
            EndedReason::DurationCap
        }
        _ = cancel.cancelled() => EndedReason::Error,
    };

    state = BridgeState::Draining;
    tracing::debug!(call_sid = %call_sid, state = ?state, "Draining peers");
    peers_cancel.cancel();
    let uplink_abort = uplink_handle.abort_handle();
    let downlink_abort = downlink_handle.abort_handle();
    let graceful = tokio::time::timeout(TEARDOWN_GRACE, async {
        let _ = uplink_handle.await;
        let _ = downlink_handle.await;
    })
    .await;
    if graceful.is_err() {
        uplink_abort.abort();
        downlink_abort.abort();
    }

    // Flush and persist the final session
    let final_session = session.lock().await.clone();
    deps.sessions.set(&final_session).await;

    state = BridgeState::Ended;
    metrics::counter!("calls_ended_total", "reason" => ended_reason.as_str()).increment(1);
    tracing::info!(
        call_sid = %call_sid,
        ended_reason = ended_reason.as_str(),
        state = ?state,
        turns = final_session.turns.len(),
        "Bridge ended"
    );

    Ok(BridgeOutcome {
        ended_reason,
        session: final_session,
    })
}

async fn await_start(
    events: &mut mpsc::Receiver<TelephonyEvent>,
) -> Result<crate::telephony::StartMeta, BridgeError> {
    loop {
        match events.recv().await {
            Some(TelephonyEvent::Start { start, .. }) => return Ok(start),
            Some(TelephonyEvent::Connected { .. }) | Some(TelephonyEvent::Media { .. })
            | Some(TelephonyEvent::Mark { .. }) => continue,
            Some(TelephonyEvent::Stop { .. }) | None => return Err(BridgeError::NoStart),
        }
    }
}

/// telephony → model: forward caller audio in arrival order.
///
/// No bridge-side buffering; the model's server VAD segments speech.
async fn uplink(
    mut events: mpsc::Receiver<TelephonyEvent>,
    model_tx: mpsc::Sender<ModelCommand>,
    session: Arc<Mutex<CallSession>>,
    format: ModelAudioFormat,
    cancel: CancellationToken,
) -> EndedReason {
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = cancel.cancelled() => return EndedReason::Error,
        };

        match event {
            Some(TelephonyEvent::Media { media, .. }) => {
                let Ok(ulaw) = BASE64.decode(&media.payload) else {
                    tracing::warn!("Undecodable media payload, dropping frame");
                    continue;
                };
                session.lock().await.counters.bytes_in += ulaw.len() as u64;
                metrics::counter!("telephony_frames_in_total").increment(1);

                let audio = match format {
                    ModelAudioFormat::Pcm16 => ulaw8k_to_pcm16_24k(&ulaw),
                    ModelAudioFormat::G711Ulaw => ulaw,
                };
                let append = ModelCommand::InputAudioAppend {
                    audio: BASE64.encode(&audio),
                };
                if model_tx.send(append).await.is_err() {
                    return EndedReason::Error;
                }
            }
            Some(TelephonyEvent::Stop { .. }) | None => return EndedReason::CallerHangup,
            Some(_) => continue,
        }
    }
}

/// model → telephony: audio deltas, barge-in, tool calls, errors
struct Downlink {
    events: mpsc::Receiver<ModelEvent>,
    model_tx: mpsc::Sender<ModelCommand>,
    telephony_tx: mpsc::Sender<TelephonyCommand>,
    session: Arc<Mutex<CallSession>>,
    sessions: Arc<CachedSessionStore>,
    tools: Arc<ToolRegistry>,
    tts: Arc<TtsEngine>,
    stream_sid: String,
    config: BridgeConfig,
    budget: ResponseBudget,
    chunker: FrameChunker,
    current_response: Option<String>,
    /// Set on barge-in; deltas are dropped until the next response begins
    dropping_response: bool,
    agent_transcript: String,
    protocol_errors: u32,
    /// Deadline for the first audio delta after a response was requested
    audio_deadline: Option<tokio::time::Instant>,
}

enum Step {
    Continue,
    End(EndedReason),
}

impl Downlink {
    async fn run(mut self, cancel: CancellationToken) -> EndedReason {
        loop {
            let received = match self.audio_deadline {
                Some(deadline) => tokio::select! {
                    event = self.events.recv() => Some(event),
                    _ = tokio::time::sleep_until(deadline) => None,
                    _ = cancel.cancelled() => return EndedReason::Error,
                },
                None => tokio::select! {
                    event = self.events.recv() => Some(event),
                    _ = cancel.cancelled() => return EndedReason::Error,
                },
            };

            let Some(event) = received else {
                // First-audio deadline exceeded: keep the caller company
                self.audio_deadline = None;
                tracing::warn!(stream_sid = %self.stream_sid, "No audio within the first-audio deadline");
                speak_to_telephony(
                    &self.tts,
                    "One moment, please.",
                    &self.telephony_tx,
                    &self.stream_sid,
                    &cancel,
                )
                .await;
                continue;
            };

            let Some(event) = event else {
                tracing::warn!("Model stream closed");
                return EndedReason::Error;
            };

            match self.handle(event, &cancel).await {
                Step::Continue => {}
                Step::End(reason) => return reason,
            }
        }
    }

    async fn handle(&mut self, event: ModelEvent, cancel: &CancellationToken) -> Step {
        match event {
            ModelEvent::SessionCreated | ModelEvent::SessionUpdated | ModelEvent::Ignored => {
                Step::Continue
            }

            ModelEvent::ResponseCreated { response_id } => {
                // Response boundary: anything still queued from the previous
                // response must never trail into this one.
                self.chunker.clear();
                self.dropping_response = false;
                self.current_response = response_id;
                self.budget.reset();
                {
                    let mut session = self.session.lock().await;
                    session.last_response_id = self.current_response.clone();
                }
                Step::Continue
            }

            ModelEvent::AudioDelta { response_id, audio } => {
                self.audio_deadline = None;
                if self.dropping_response {
                    return Step::Continue;
                }
                if let (Some(current), Some(id)) = (&self.current_response, &response_id) {
                    if current != id {
                        tracing::debug!(response_id = %id, "Dropping stale audio delta");
                        return Step::Continue;
                    }
                }
                self.forward_audio(&audio).await
            }

            ModelEvent::AudioDone { .. } => {
                // Flush the trailing partial frame, padded with silence
                let mut residual = self.chunker.take_residual();
                if !residual.is_empty() && !self.dropping_response {
                    residual.resize(ULAW_FRAME_BYTES, ULAW_SILENCE);
                    return self.send_frame(&residual).await;
                }
                Step::Continue
            }

            ModelEvent::AgentTranscriptDelta { text } => {
                self.agent_transcript.push_str(&text);
                Step::Continue
            }

            ModelEvent::CallerTranscript { text } => {
                if !text.trim().is_empty() {
                    let mut session = self.session.lock().await;
                    session.push_turn(TurnRole::Caller, text, None);
                }
                Step::Continue
            }

            ModelEvent::SpeechStarted => self.barge_in().await,

            ModelEvent::SpeechStopped => Step::Continue,

            ModelEvent::ToolCall {
                call_id,
                name,
                arguments,
            } => self.tool_call(&call_id, &name, arguments).await,

            ModelEvent::ResponseDone { .. } => self.response_done().await,

            ModelEvent::Error { message, fatal } => {
                if fatal {
                    tracing::error!(error = %message, "Fatal model error");
                    speak_to_telephony(
                        &self.tts,
                        "I'm sorry, I'm having trouble hearing you. Let me connect you with someone.",
                        &self.telephony_tx,
                        &self.stream_sid,
                        cancel,
                    )
                    .await;
                    let transfer_to = self.config.tenant.transfer_phone.clone();
                    if !transfer_to.is_empty() {
                        let _ = self
                            .telephony_tx
                            .send(TelephonyCommand::Transfer { to: transfer_to })
                            .await;
                    } else {
                        let _ = self.telephony_tx.send(TelephonyCommand::Hangup).await;
                    }
                    Step::End(EndedReason::ModelFatal)
                } else {
                    tracing::warn!(error = %message, "Transient model error");
                    Step::Continue
                }
            }

            ModelEvent::Malformed => {
                self.protocol_errors += 1;
                tracing::warn!(count = self.protocol_errors, "Malformed model frame dropped");
                if self.protocol_errors > self.config.protocol_error_limit {
                    Step::End(EndedReason::ModelFatal)
                } else {
                    Step::Continue
                }
            }
        }
    }

    async fn forward_audio(&mut self, audio: &[u8]) -> Step {
        let ulaw = match self.config.model.audio_format {
            ModelAudioFormat::Pcm16 => match pcm16_24k_to_ulaw8k(audio) {
                Ok(ulaw) => ulaw,
                Err(e) => {
                    self.protocol_errors += 1;
                    tracing::warn!(error = %e, "Undecodable audio delta dropped");
                    return Step::Continue;
                }
            },
            ModelAudioFormat::G711Ulaw => audio.to_vec(),
        };

        for frame in self.chunker.push(&ulaw) {
            match self.send_frame(&frame).await {
                Step::Continue => {}
                end => return end,
            }
        }
        Step::Continue
    }

    /// Outbound write with the backpressure deadline; a telephony peer that
    /// cannot drain within it fails the call.
    async fn send_frame(&self, frame: &[u8]) -> Step {
        let command = TelephonyCommand::Media {
            stream_sid: self.stream_sid.clone(),
            payload: BASE64.encode(frame),
        };
        match self
            .telephony_tx
            .send_timeout(command, self.config.backpressure)
            .await
        {
            Ok(()) => {
                self.session.lock().await.counters.bytes_out += frame.len() as u64;
                metrics::counter!("telephony_frames_out_total").increment(1);
                Step::Continue
            }
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                tracing::error!("Outbound audio backpressure, failing call");
                Step::End(EndedReason::Backpressure)
            }
            Err(mpsc::error::SendTimeoutError::Closed(_)) => Step::End(EndedReason::Error),
        }
    }

    /// Caller started talking over the agent: flush their playback queue,
    /// cancel the in-flight response, and drop its remaining deltas. This
    /// cancels only the response, never the peer tasks.
    async fn barge_in(&mut self) -> Step {
        metrics::counter!("barge_ins_total").increment(1);
        tracing::debug!(stream_sid = %self.stream_sid, "Barge-in");

        self.chunker.clear();
        self.dropping_response = true;
        self.current_response = None;
        self.audio_deadline = None;

        if self
            .telephony_tx
            .send(TelephonyCommand::Clear {
                stream_sid: self.stream_sid.clone(),
            })
            .await
            .is_err()
        {
            return Step::End(EndedReason::Error);
        }
        if self.model_tx.send(ModelCommand::ResponseCancel).await.is_err() {
            return Step::End(EndedReason::Error);
        }
        Step::Continue
    }

    async fn tool_call(&mut self, call_id: &str, name: &str, arguments: serde_json::Value) -> Step {
        let result = {
            let mut session = self.session.lock().await;
            self.tools
                .execute(&mut session, name, arguments, &mut self.budget)
                .await
        };

        // Persist tool effects before the model speaks about them
        let snapshot = self.session.lock().await.clone();
        self.sessions.set(&snapshot).await;

        if self
            .model_tx
            .send(ModelCommand::tool_result(call_id, &result))
            .await
            .is_err()
        {
            return Step::End(EndedReason::Error);
        }
        if self
            .model_tx
            .send(ModelCommand::ResponseCreate { response: None })
            .await
            .is_err()
        {
            return Step::End(EndedReason::Error);
        }
        self.audio_deadline = Some(
            tokio::time::Instant::now()
                + Duration::from_secs(self.config.model.first_audio_deadline_seconds),
        );
        Step::Continue
    }

    /// End of an agent turn: record the transcript, then act on any flags
    /// the tools raised during the response.
    async fn response_done(&mut self) -> Step {
        let (transfer_requested, emergency) = {
            let mut session = self.session.lock().await;
            if !self.agent_transcript.is_empty() {
                let text = std::mem::take(&mut self.agent_transcript);
                session.push_turn(TurnRole::Agent, text, None);
            }
            (
                session.flags.transfer_requested,
                session.flags.emergency_detected,
            )
        };

        let snapshot = self.session.lock().await.clone();
        self.sessions.set(&snapshot).await;

        if transfer_requested && !self.config.tenant.transfer_phone.is_empty() {
            let _ = self
                .telephony_tx
                .send(TelephonyCommand::Transfer {
                    to: self.config.tenant.transfer_phone.clone(),
                })
                .await;
            return Step::End(EndedReason::Transferred);
        }
        if emergency && !self.config.tenant.emergency_phone.is_empty() {
            let _ = self
                .telephony_tx
                .send(TelephonyCommand::Transfer {
                    to: self.config.tenant.emergency_phone.clone(),
                })
                .await;
            return Step::End(EndedReason::Transferred);
        }
        Step::Continue
    }
}

/// Speak fixed announcement text through the TTS chain, forwarding frames
/// (or the built-in marker) to the telephony peer.
pub(crate) async fn speak_to_telephony(
    tts: &TtsEngine,
    text: &str,
    telephony_tx: &mpsc::Sender<TelephonyCommand>,
    stream_sid: &str,
    cancel: &CancellationToken,
) -> bool {
    let (tx, mut rx) = mpsc::channel::<TtsChunk>(32);

    let speak = async {
        let ok = tts.speak(text, &tx, TtsPreference::Reliable, cancel).await;
        drop(tx);
        ok
    };
    let forward = async {
        while let Some(chunk) = rx.recv().await {
            let command = match chunk {
                TtsChunk::Frame(frame) => TelephonyCommand::Media {
                    stream_sid: stream_sid.to_string(),
                    payload: BASE64.encode(&frame),
                },
                TtsChunk::Announce(text) => TelephonyCommand::Announce { text },
            };
            if telephony_tx.send(command).await.is_err() {
                break;
            }
        }
    };

    let (ok, ()) = tokio::join!(speak, forward);
    ok
}
