//! Call supervisor
//!
//! Owns call lifecycle outside the bridge: tenant resolution, path
//! selection, the rate-limit gate, and the post-call fan-out (final call
//! record, booking from completed slots, operator notification).

use chrono::{NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use hvac_voice_config::{CallPath, Settings, TenantConfig};
use hvac_voice_core::{CallSession, EndedReason};
use hvac_voice_persistence::{BookingOutcome, CallRecord, NewAppointment, PersistenceLayer};
use hvac_voice_resilience::{CallRateLimiter, RateLimitError};
use hvac_voice_tools::{Notification, NotificationGateway, NotificationKind};

/// Final structured record emitted when a call ends
#[derive(Debug, Clone, Serialize)]
pub struct CallSummary {
    pub call_id: String,
    pub duration_s: i64,
    pub ended_reason: String,
    pub tools_used: Vec<String>,
    pub emergency: bool,
    pub booked: bool,
}

pub struct CallSupervisor {
    settings: Arc<Settings>,
    persistence: Arc<PersistenceLayer>,
    notifications: Arc<dyn NotificationGateway>,
    rate_limiter: CallRateLimiter,
}

impl CallSupervisor {
    pub fn new(
        settings: Arc<Settings>,
        persistence: Arc<PersistenceLayer>,
        notifications: Arc<dyn NotificationGateway>,
    ) -> Self {
        let rate_limiter = CallRateLimiter::new(
            settings.limits.per_caller_call_limit,
            std::time::Duration::from_secs(settings.limits.per_caller_window_seconds),
        );
        Self {
            settings,
            persistence,
            notifications,
            rate_limiter,
        }
    }

    /// One lookup; the default tenant answers unknown numbers
    pub fn resolve_tenant(&self, dialed: &str) -> &TenantConfig {
        self.settings.tenants.resolve(dialed)
    }

    /// Flood gate, checked before any session is allocated
    pub fn admit_caller(&self, caller: &str) -> Result<(), RateLimitError> {
        self.rate_limiter.check_call(caller)
    }

    pub fn prune_rate_limiter(&self) {
        self.rate_limiter.prune();
    }

    /// Streaming bridge unless tenant config or the IVR digit says otherwise
    pub fn select_path(&self, tenant: &TenantConfig, ivr_digit: Option<&str>) -> CallPath {
        match ivr_digit {
            Some("2") => CallPath::TurnBased,
            Some("1") => CallPath::Streaming,
            _ => tenant.path,
        }
    }

    /// Create the session for an inbound call and persist it
    pub async fn open_session(
        &self,
        call_sid: &str,
        from: &str,
        to: &str,
        tenant: &TenantConfig,
    ) -> CallSession {
        let session = CallSession::new(call_sid, from, to, &tenant.id);
        self.persistence.sessions.set(&session).await;
        session
    }

    /// Post-call fan-out: persist the record and transcript, book from
    /// completed slots, notify the operator, emit the structured summary.
    pub async fn finalize_call(
        &self,
        mut session: CallSession,
        ended_reason: EndedReason,
    ) -> CallSummary {
        // Completed slots without a booking become one now
        if !session.flags.appointment_booked && session.slots.booking_complete() {
            self.book_from_slots(&mut session).await;
        }

        let record = CallRecord {
            call_sid: session.call_id.clone(),
            from_number: session.caller_phone.clone(),
            to_number: session.dialed_phone.clone(),
            started_at: session.started_at,
            ended_at: Utc::now(),
            ended_reason: ended_reason.as_str().to_string(),
            duration_s: session.duration_s(),
            tools_used: session.tools_used.clone(),
            emergency: session.flags.emergency_detected,
            booked: session.flags.appointment_booked,
            transcript: serde_json::to_value(&session.turns)
                .unwrap_or(serde_json::Value::Null),
        };
        if let Err(e) = self.persistence.call_records.upsert(&record).await {
            tracing::error!(call_sid = %session.call_id, error = %e, "Call record write failed");
        }

        // Operator summary is fire-and-forget
        let summary_body = format!(
            "Call {} from {} ended ({}). Emergency: {}. Booked: {}.\n\n{}",
            session.call_id,
            session.caller_phone,
            ended_reason.as_str(),
            session.flags.emergency_detected,
            session.flags.appointment_booked,
            session.transcript_text(),
        );
        if let Err(e) = self
            .notifications
            .send(Notification {
                kind: NotificationKind::OperatorSummary,
                subject: format!("Call summary {}", session.call_id),
                body: summary_body,
                recipient: None,
            })
            .await
        {
            tracing::warn!(call_sid = %session.call_id, error = %e, "Operator summary failed");
        }

        self.persistence.sessions.delete(&session.call_id).await;

        let summary = CallSummary {
            call_id: session.call_id.clone(),
            duration_s: session.duration_s(),
            ended_reason: ended_reason.as_str().to_string(),
            tools_used: session.tools_used.clone(),
            emergency: session.flags.emergency_detected,
            booked: session.flags.appointment_booked,
        };
        metrics::counter!("calls_finalized_total", "reason" => ended_reason.as_str())
            .increment(1);
        tracing::info!(
            call_id = %summary.call_id,
            duration_s = summary.duration_s,
            ended_reason = %summary.ended_reason,
            tools_used = ?summary.tools_used,
            emergency = summary.emergency,
            booked = summary.booked,
            "Call finalized"
        );
        summary
    }

    /// The turn-based path collects slots without calling tools; this turns
    /// them into the same booking the streaming path would have made.
    async fn book_from_slots(&self, session: &mut CallSession) {
        let slots = session.slots.clone();
        let (Some(name), Some(date), Some(time)) = (
            slots.name.clone(),
            slots.preferred_date.as_deref().and_then(parse_date),
            slots.preferred_time.as_deref().and_then(parse_time),
        ) else {
            return;
        };
        let location_code = slots.location_code.clone().unwrap_or_else(|| "DAL".to_string());

        let outcome = self
            .persistence
            .appointments
            .create(NewAppointment {
                call_id: Some(session.call_id.clone()),
                customer_name: name.clone(),
                customer_phone: slots.callback_phone.clone(),
                customer_email: None,
                location_code,
                date,
                time,
                issue: slots.issue.clone().unwrap_or_default(),
                issue_category: None,
                priority: "standard".to_string(),
            })
            .await;

        match outcome {
            Ok(BookingOutcome::Created(appointment))
            | Ok(BookingOutcome::Idempotent(appointment)) => {
                session.flags.appointment_booked = true;
                session.confirmation_id = Some(appointment.confirmation_id);

                let sent = self
                    .notifications
                    .send(Notification {
                        kind: NotificationKind::BookingConfirmation,
                        subject: format!("Appointment #{}", appointment.confirmation_id),
                        body: format!(
                            "{name}, you're booked for {} at {}.",
                            appointment.date, appointment.time
                        ),
                        recipient: slots.callback_phone.clone(),
                    })
                    .await
                    .is_ok();
                tracing::info!(
                    call_sid = %session.call_id,
                    confirmation_id = appointment.confirmation_id,
                    confirmation_sent = sent,
                    "Booked from collected slots"
                );
            }
            Ok(BookingOutcome::SlotTaken) => {
                tracing::warn!(call_sid = %session.call_id, "Slot taken at post-call booking");
            }
            Err(e) => {
                tracing::error!(call_sid = %session.call_id, error = %e, "Post-call booking failed");
            }
        }
    }
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

fn parse_time(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hvac_voice_core::TurnRole;
    use hvac_voice_persistence::SessionStoreConfig;
    use hvac_voice_tools::StubNotificationGateway;

    fn supervisor() -> (CallSupervisor, Arc<PersistenceLayer>, Arc<StubNotificationGateway>) {
        let mut settings = Settings::default();
        settings.limits.per_caller_call_limit = 2;
        let persistence = Arc::new(PersistenceLayer::in_memory(SessionStoreConfig::default()));
        let notifications = Arc::new(StubNotificationGateway::new());
        let supervisor = CallSupervisor::new(
            Arc::new(settings),
            persistence.clone(),
            notifications.clone(),
        );
        (supervisor, persistence, notifications)
    }

    #[tokio::test]
    async fn finalize_writes_record_with_emergency_flag() {
        let (supervisor, persistence, _) = supervisor();

        let mut session = CallSession::new("CA1", "+15550001111", "+15559990000", "default");
        session.flags.emergency_detected = true;
        session.tools_used.push("log_emergency".to_string());
        session.push_turn(TurnRole::Caller, "I smell gas", None);

        let summary = supervisor
            .finalize_call(session, EndedReason::Transferred)
            .await;
        assert!(summary.emergency);
        assert!(!summary.booked);

        let record = persistence.call_records.get("CA1").await.unwrap().unwrap();
        assert!(record.emergency);
        assert_eq!(record.ended_reason, "transferred");
        assert_eq!(record.tools_used, vec!["log_emergency".to_string()]);
        assert!(record.transcript.is_array());
    }

    #[tokio::test]
    async fn complete_slots_become_a_booking_with_confirmation() {
        let (supervisor, persistence, notifications) = supervisor();

        let mut session = CallSession::new("CA2", "+15550001111", "+15559990000", "default");
        session.slots.name = Some("Alice".to_string());
        session.slots.callback_phone = Some("+15551234567".to_string());
        session.slots.issue = Some("no cold air".to_string());
        session.slots.preferred_date = Some("2099-01-05".to_string());
        session.slots.preferred_time = Some("09:00".to_string());
        session.slots.location_code = Some("FTW".to_string());

        let summary = supervisor
            .finalize_call(session, EndedReason::Completed)
            .await;
        assert!(summary.booked);

        let row = persistence
            .appointments
            .find_by_call("CA2")
            .await
            .unwrap()
            .expect("booking row missing");
        assert_eq!(row.location_code, "FTW");

        // Confirmation plus operator summary
        let kinds: Vec<_> = notifications.sent().iter().map(|n| n.kind).collect();
        assert!(kinds.contains(&NotificationKind::BookingConfirmation));
        assert!(kinds.contains(&NotificationKind::OperatorSummary));
    }

    #[tokio::test]
    async fn rate_limit_gate_refuses_the_third_call() {
        let (supervisor, _, _) = supervisor();
        assert!(supervisor.admit_caller("+15550001111").is_ok());
        assert!(supervisor.admit_caller("+15550001111").is_ok());
        assert!(supervisor.admit_caller("+15550001111").is_err());
    }

    #[tokio::test]
    async fn ivr_digit_overrides_the_tenant_path() {
        let (supervisor, _, _) = supervisor();
        let tenant = TenantConfig::default();
        assert_eq!(
            supervisor.select_path(&tenant, Some("2")),
            CallPath::TurnBased
        );
        assert_eq!(
            supervisor.select_path(&tenant, Some("1")),
            CallPath::Streaming
        );
        assert_eq!(supervisor.select_path(&tenant, None), tenant.path);
    }
}
