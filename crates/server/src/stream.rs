//! Media-stream endpoint
//!
//! Adapts the telephony websocket to the bridge's channel peers: a read
//! pump parses inbound frames, a write pump serializes wire commands and
//! executes call-control commands (announce, transfer, hangup) that have no
//! frame representation. Tenant resolution happens on the `start` event,
//! which carries the dialed number as a custom parameter.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use hvac_voice_bridge::bridge::{run_bridge, BridgeConfig, BridgeDeps, TelephonyPeer};
use hvac_voice_bridge::{connect_model_peer, TelephonyCommand, TelephonyEvent};
use hvac_voice_core::EndedReason;

use crate::state::AppState;

/// GET /voice/stream (websocket upgrade)
pub async fn stream(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_stream(socket, state))
}

async fn handle_stream(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Read frames until the start event so the tenant can be resolved
    // before the bridge is configured.
    let mut buffered = Vec::new();
    let start_meta = loop {
        let message = tokio::select! {
            message = ws_rx.next() => message,
            _ = tokio::time::sleep(Duration::from_secs(15)) => {
                tracing::warn!("No start event on media stream, closing");
                return;
            }
        };
        match message {
            Some(Ok(Message::Text(text))) => {
                if let Some(event) = TelephonyEvent::parse(&text) {
                    if let TelephonyEvent::Start { ref start, .. } = event {
                        let meta = start.clone();
                        buffered.push(event);
                        break meta;
                    }
                    buffered.push(event);
                }
            }
            Some(Ok(Message::Close(_))) | None => return,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Media stream error before start");
                return;
            }
        }
    };

    let dialed = start_meta.to_number().unwrap_or_default();
    let tenant = state.supervisor.resolve_tenant(&dialed).clone();

    let (event_tx, event_rx) = mpsc::channel::<TelephonyEvent>(64);
    let (command_tx, mut command_rx) = mpsc::channel::<TelephonyCommand>(64);
    for event in buffered {
        if event_tx.send(event).await.is_err() {
            return;
        }
    }

    // Read pump: websocket → typed events; malformed frames are dropped
    let read_pump = tokio::spawn(async move {
        while let Some(message) = ws_rx.next().await {
            match message {
                Ok(Message::Text(text)) => match TelephonyEvent::parse(&text) {
                    Some(event) => {
                        if event_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    None => tracing::warn!("Dropping malformed telephony frame"),
                },
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    // Write pump: wire commands become frames; call-control commands act on
    // the call itself.
    let write_pump = tokio::spawn(async move {
        while let Some(command) = command_rx.recv().await {
            match command.to_wire() {
                Some(frame) => {
                    if ws_tx.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                None => match command {
                    TelephonyCommand::Announce { text } => {
                        tracing::info!(%text, "Built-in announcement requested");
                    }
                    TelephonyCommand::Transfer { to } => {
                        tracing::info!(%to, "Transfer requested, closing stream for dial-out");
                        break;
                    }
                    TelephonyCommand::Hangup => break,
                    _ => {}
                },
            }
        }
        let _ = ws_tx.close().await;
    });

    let config = BridgeConfig {
        tenant,
        model: state.settings.model.clone(),
        tool_budget: state.settings.limits.tool_budget_per_response,
        max_call_duration: Duration::from_secs(state.settings.limits.max_call_duration_seconds),
        backpressure: Duration::from_millis(2000),
        protocol_error_limit: 20,
    };
    let deps = BridgeDeps {
        sessions: state.persistence.sessions.clone(),
        tools: state.tools.clone(),
        tts: state.tts.clone(),
    };
    let telephony = TelephonyPeer {
        events: event_rx,
        commands: command_tx,
    };

    let model_settings = state.settings.model.clone();
    let model_breaker = state.breakers.get("model");
    let cancel = CancellationToken::new();

    let outcome = run_bridge(
        config,
        deps,
        telephony,
        move || async move {
            if !model_breaker.can_execute() {
                return Err(hvac_voice_bridge::BridgeError::ModelConnect(
                    "model breaker open".to_string(),
                ));
            }
            match connect_model_peer(&model_settings).await {
                Ok(peer) => {
                    model_breaker.record_success();
                    Ok(peer)
                }
                Err(e) => {
                    model_breaker.record_failure();
                    Err(e)
                }
            }
        },
        cancel,
    )
    .await;

    match outcome {
        Ok(outcome) => {
            state
                .supervisor
                .finalize_call(outcome.session, outcome.ended_reason)
                .await;
        }
        Err(e) => {
            tracing::error!(error = %e, "Bridge failed");
            if let Some(session) = state.persistence.sessions.get(&start_meta.call_sid).await {
                state
                    .supervisor
                    .finalize_call(session, EndedReason::Error)
                    .await;
            }
        }
    }

    read_pump.abort();
    write_pump.abort();
}
