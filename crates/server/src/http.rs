//! HTTP webhook surface
//!
//! `POST /voice/incoming` answers an inbound call with either a streaming
//! connect or the first turn of the gather flow; `POST /voice/turn` drives
//! the turn state machine; `POST /voice/status` handles lifecycle
//! callbacks. Responses are instruction documents (verb XML).

use axum::extract::{Form, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;

use hvac_voice_config::CallPath;
use hvac_voice_core::EndedReason;
use hvac_voice_flow::{InstructionDocument, TurnFlow, TurnOutcome};

use crate::state::AppState;

/// Inbound call webhook form
#[derive(Debug, Deserialize)]
pub struct IncomingForm {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "From")]
    pub from: String,
    #[serde(rename = "To")]
    pub to: String,
    #[serde(rename = "Digits", default)]
    pub digits: Option<String>,
}

/// Gather turn webhook form
#[derive(Debug, Deserialize)]
pub struct TurnForm {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "From", default)]
    pub from: Option<String>,
    #[serde(rename = "To", default)]
    pub to: Option<String>,
    #[serde(rename = "SpeechResult", default)]
    pub speech_result: Option<String>,
    #[serde(rename = "Digits", default)]
    pub digits: Option<String>,
    #[serde(rename = "CallStatus", default)]
    pub call_status: Option<String>,
}

/// Status callback form
#[derive(Debug, Deserialize)]
pub struct StatusForm {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "CallStatus", default)]
    pub call_status: Option<String>,
}

fn xml(body: String) -> Response {
    ([(header::CONTENT_TYPE, "text/xml")], body).into_response()
}

/// POST /voice/incoming
pub async fn incoming(State(state): State<AppState>, Form(form): Form<IncomingForm>) -> Response {
    tracing::info!(call_sid = %form.call_sid, from = %form.from, to = %form.to, "Inbound call");
    metrics::counter!("calls_inbound_total").increment(1);

    // Flood gate before any session is allocated
    if state.supervisor.admit_caller(&form.from).is_err() {
        let doc = InstructionDocument::new()
            .say("You've reached our call limit for now. Please try again later.")
            .hangup()
            .render();
        return xml(doc);
    }

    let tenant = state.supervisor.resolve_tenant(&form.to).clone();
    let mut session = state
        .supervisor
        .open_session(&form.call_sid, &form.from, &form.to, &tenant)
        .await;

    match state.supervisor.select_path(&tenant, form.digits.as_deref()) {
        CallPath::Streaming => {
            let stream_url = format!(
                "wss://{}/voice/stream",
                state.settings.server.external_host
            );
            let doc = InstructionDocument::new()
                .connect_stream(&stream_url, &form.from, &form.to)
                .render();
            xml(doc)
        }
        CallPath::TurnBased => {
            let flow = TurnFlow::new(&tenant);
            let outcome = flow.handle_turn(&mut session, None);
            state.persistence.sessions.set(&session).await;
            xml(InstructionDocument::from_outcome(&outcome, "/voice/turn"))
        }
    }
}

/// POST /voice/turn
pub async fn turn(State(state): State<AppState>, Form(form): Form<TurnForm>) -> Response {
    let tenant = state
        .supervisor
        .resolve_tenant(form.to.as_deref().unwrap_or_default())
        .clone();

    let mut session = match state.persistence.sessions.get(&form.call_sid).await {
        Some(session) => session,
        None => {
            // Status callback raced us or the session expired; start fresh
            state
                .supervisor
                .open_session(
                    &form.call_sid,
                    form.from.as_deref().unwrap_or("unknown"),
                    form.to.as_deref().unwrap_or("unknown"),
                    &tenant,
                )
                .await
        }
    };

    let flow = TurnFlow::new(&tenant);
    let outcome = flow.handle_turn(&mut session, form.speech_result.as_deref());
    state.persistence.sessions.set(&session).await;

    // A hangup outcome ends the call; fan out now rather than waiting for
    // the status callback.
    if let TurnOutcome::Hangup { .. } = outcome {
        let supervisor = state.supervisor.clone();
        let ended = session.clone();
        tokio::spawn(async move {
            supervisor.finalize_call(ended, EndedReason::Completed).await;
        });
    }

    xml(InstructionDocument::from_outcome(&outcome, "/voice/turn"))
}

/// POST /voice/status
pub async fn status(State(state): State<AppState>, Form(form): Form<StatusForm>) -> Response {
    let call_status = form.call_status.as_deref().unwrap_or_default();
    tracing::debug!(call_sid = %form.call_sid, call_status, "Status callback");

    if matches!(call_status, "completed" | "failed" | "busy" | "no-answer") {
        if let Some(session) = state.persistence.sessions.get(&form.call_sid).await {
            let reason = if call_status == "completed" {
                EndedReason::Completed
            } else {
                EndedReason::Error
            };
            state.supervisor.finalize_call(session, reason).await;
        }
    }
    ().into_response()
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Response {
    let breakers: Vec<_> = state
        .breakers
        .stats()
        .into_iter()
        .map(|s| json!({ "name": s.name, "state": s.state.to_string() }))
        .collect();
    axum::Json(json!({
        "status": "ok",
        "kv_healthy": state.persistence.sessions.health(),
        "breakers": breakers,
    }))
    .into_response()
}

/// GET /metrics
pub async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (axum::http::StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}
