//! Booking tools: create, reschedule, cancel
//!
//! `create_booking` is idempotent on the call id: a retry observes the
//! original booking rather than creating a second row. A confirmation is
//! sent through the notification gateway on success; a failed send never
//! rolls the booking back and is surfaced as `confirmation_sent = false`.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use hvac_voice_core::CallSession;
use hvac_voice_persistence::{
    AppointmentStore, BookingOutcome, LocationStore, NewAppointment, RescheduleOutcome,
};

use super::availability::{next_available_slots, slot_label};
use super::{
    classify_issue, now_naive, optional_str, parse_date_arg, parse_time_arg, required_str,
    validate_slot,
};
use crate::integrations::{Notification, NotificationGateway, NotificationKind};
use crate::schema::{
    IdempotencyPolicy, InputSchema, PropertySchema, Tool, ToolError, ToolOutput, ToolSchema,
};

/// create_booking
pub struct CreateBookingTool {
    locations: Arc<dyn LocationStore>,
    appointments: Arc<dyn AppointmentStore>,
    notifications: Arc<dyn NotificationGateway>,
}

impl CreateBookingTool {
    pub fn new(
        locations: Arc<dyn LocationStore>,
        appointments: Arc<dyn AppointmentStore>,
        notifications: Arc<dyn NotificationGateway>,
    ) -> Self {
        Self {
            locations,
            appointments,
            notifications,
        }
    }

    /// Up to two alternative slots offered on a collision
    async fn collision_suggestions(
        &self,
        location_code: &str,
        start: chrono::NaiveDate,
    ) -> Vec<Value> {
        match next_available_slots(
            self.locations.as_ref(),
            self.appointments.as_ref(),
            location_code,
            start,
            2,
            false,
        )
        .await
        {
            Ok(Ok(slots)) => slots
                .iter()
                .map(|(date, time)| {
                    json!({
                        "date": date.format("%Y-%m-%d").to_string(),
                        "time": time.format("%H:%M").to_string(),
                        "label": slot_label(*date, *time),
                    })
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl Tool for CreateBookingTool {
    fn name(&self) -> &str {
        "create_booking"
    }

    fn description(&self) -> &str {
        "Book a service appointment for the caller"
    }

    fn idempotency(&self) -> IdempotencyPolicy {
        IdempotencyPolicy::ByCallId
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: InputSchema::object()
                .property("name", PropertySchema::string("Customer's name"), true)
                .property("date", PropertySchema::string("Date (YYYY-MM-DD)"), true)
                .property("time", PropertySchema::string("Time (HH:MM, 24h)"), true)
                .property(
                    "issue",
                    PropertySchema::string("What the visit is for"),
                    true,
                )
                .property(
                    "location_code",
                    PropertySchema::string("Three-letter service location code"),
                    true,
                )
                .property(
                    "phone",
                    PropertySchema::string("Callback phone (E.164)"),
                    false,
                )
                .property("email", PropertySchema::string("Email address"), false)
                .property(
                    "call_id",
                    PropertySchema::string("Originating call id (defaults to this call)"),
                    false,
                ),
        }
    }

    async fn execute(
        &self,
        session: &mut CallSession,
        input: Value,
    ) -> Result<ToolOutput, ToolError> {
        let name = required_str(&input, "name")?.to_string();
        let date = parse_date_arg(required_str(&input, "date")?)?;
        let time = parse_time_arg(required_str(&input, "time")?)?;
        let issue = required_str(&input, "issue")?.to_string();
        let location_code = required_str(&input, "location_code")?.to_string();
        let phone = optional_str(&input, "phone").or_else(|| Some(session.caller_phone.clone()));
        let email = optional_str(&input, "email");
        let call_id =
            optional_str(&input, "call_id").unwrap_or_else(|| session.call_id.clone());

        let location = match validate_slot(
            self.locations.as_ref(),
            &location_code,
            date,
            time,
            now_naive(),
            false,
        )
        .await
        .map_err(|e| ToolError::internal(e.to_string()))?
        {
            Ok(location) => location,
            Err(issue) => {
                return Ok(ToolOutput::json(
                    json!({ "status": "error", "error": issue.as_error() }),
                ))
            }
        };

        let (category, priority) = classify_issue(&issue);
        let outcome = self
            .appointments
            .create(NewAppointment {
                call_id: Some(call_id),
                customer_name: name.clone(),
                customer_phone: phone.clone(),
                customer_email: email,
                location_code: location.code.clone(),
                date,
                time,
                issue: issue.clone(),
                issue_category: Some(category.to_string()),
                priority: priority.to_string(),
            })
            .await
            .map_err(|e| ToolError::internal(e.to_string()))?;

        match outcome {
            BookingOutcome::Created(appointment) => {
                session.flags.appointment_booked = true;
                session.confirmation_id = Some(appointment.confirmation_id);
                session.slots.name = Some(name.clone());
                session.slots.callback_phone = phone.clone();
                session.slots.issue = Some(issue);
                session.slots.preferred_date = Some(date.format("%Y-%m-%d").to_string());
                session.slots.preferred_time = Some(time.format("%H:%M").to_string());

                let confirmation_sent = self
                    .notifications
                    .send(Notification {
                        kind: NotificationKind::BookingConfirmation,
                        subject: format!("Appointment #{}", appointment.confirmation_id),
                        body: format!(
                            "{name}, you're booked at our {} location on {}.",
                            location.name,
                            slot_label(date, time)
                        ),
                        recipient: phone,
                    })
                    .await
                    .is_ok();

                Ok(ToolOutput::json(json!({
                    "status": "success",
                    "idempotent": false,
                    "confirmation_id": appointment.confirmation_id,
                    "date": date.format("%Y-%m-%d").to_string(),
                    "time": time.format("%H:%M").to_string(),
                    "location": location.name,
                    "confirmation_sent": confirmation_sent,
                })))
            }
            BookingOutcome::Idempotent(existing) => {
                session.flags.appointment_booked = true;
                session.confirmation_id = Some(existing.confirmation_id);
                Ok(ToolOutput::json(json!({
                    "status": "idempotent",
                    "idempotent": true,
                    "confirmation_id": existing.confirmation_id,
                    "date": existing.date.format("%Y-%m-%d").to_string(),
                    "time": existing.time.format("%H:%M").to_string(),
                })))
            }
            BookingOutcome::SlotTaken => {
                let suggestions = self.collision_suggestions(&location.code, date).await;
                Ok(ToolOutput::json(json!({
                    "status": "taken",
                    "next_slots": suggestions,
                })))
            }
        }
    }
}

/// reschedule_booking
pub struct RescheduleBookingTool {
    locations: Arc<dyn LocationStore>,
    appointments: Arc<dyn AppointmentStore>,
}

impl RescheduleBookingTool {
    pub fn new(locations: Arc<dyn LocationStore>, appointments: Arc<dyn AppointmentStore>) -> Self {
        Self {
            locations,
            appointments,
        }
    }
}

#[async_trait]
impl Tool for RescheduleBookingTool {
    fn name(&self) -> &str {
        "reschedule_booking"
    }

    fn description(&self) -> &str {
        "Move the customer's upcoming appointment to a new date and time"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: InputSchema::object()
                .property("name", PropertySchema::string("Customer's name"), true)
                .property(
                    "new_date",
                    PropertySchema::string("New date (YYYY-MM-DD)"),
                    true,
                )
                .property(
                    "new_time",
                    PropertySchema::string("New time (HH:MM, 24h)"),
                    true,
                )
                .property(
                    "location_code",
                    PropertySchema::string("Three-letter service location code"),
                    true,
                ),
        }
    }

    async fn execute(
        &self,
        _session: &mut CallSession,
        input: Value,
    ) -> Result<ToolOutput, ToolError> {
        let name = required_str(&input, "name")?;
        let new_date = parse_date_arg(required_str(&input, "new_date")?)?;
        let new_time = parse_time_arg(required_str(&input, "new_time")?)?;
        let location_code = required_str(&input, "location_code")?;

        let location = match validate_slot(
            self.locations.as_ref(),
            location_code,
            new_date,
            new_time,
            now_naive(),
            false,
        )
        .await
        .map_err(|e| ToolError::internal(e.to_string()))?
        {
            Ok(location) => location,
            Err(issue) => {
                return Ok(ToolOutput::json(
                    json!({ "status": "error", "error": issue.as_error() }),
                ))
            }
        };

        let existing = self
            .appointments
            .latest_future_for_name(name, &location.code, now_naive().date())
            .await
            .map_err(|e| ToolError::internal(e.to_string()))?;

        let Some(existing) = existing else {
            return Ok(ToolOutput::json(
                json!({ "status": "error", "error": "no upcoming booking found" }),
            ));
        };

        match self
            .appointments
            .reschedule(existing.confirmation_id, new_date, new_time)
            .await
            .map_err(|e| ToolError::internal(e.to_string()))?
        {
            RescheduleOutcome::Updated(updated) => Ok(ToolOutput::json(json!({
                "status": "success",
                "confirmation_id": updated.confirmation_id,
                "date": updated.date.format("%Y-%m-%d").to_string(),
                "time": updated.time.format("%H:%M").to_string(),
            }))),
            RescheduleOutcome::SlotTaken => Ok(ToolOutput::json(json!({ "status": "taken" }))),
            RescheduleOutcome::NotFound => Ok(ToolOutput::json(
                json!({ "status": "error", "error": "no upcoming booking found" }),
            )),
        }
    }
}

/// cancel_booking (soft)
pub struct CancelBookingTool {
    locations: Arc<dyn LocationStore>,
    appointments: Arc<dyn AppointmentStore>,
}

impl CancelBookingTool {
    pub fn new(locations: Arc<dyn LocationStore>, appointments: Arc<dyn AppointmentStore>) -> Self {
        Self {
            locations,
            appointments,
        }
    }
}

#[async_trait]
impl Tool for CancelBookingTool {
    fn name(&self) -> &str {
        "cancel_booking"
    }

    fn description(&self) -> &str {
        "Cancel the customer's upcoming appointment"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: InputSchema::object()
                .property("name", PropertySchema::string("Customer's name"), true)
                .property(
                    "location_code",
                    PropertySchema::string("Three-letter service location code"),
                    true,
                )
                .property(
                    "confirmation_id",
                    PropertySchema::integer("Confirmation number, if the caller has it"),
                    false,
                ),
        }
    }

    async fn execute(
        &self,
        _session: &mut CallSession,
        input: Value,
    ) -> Result<ToolOutput, ToolError> {
        let name = required_str(&input, "name")?;
        let location_code = required_str(&input, "location_code")?;

        let confirmation_id = match input.get("confirmation_id").and_then(|v| v.as_i64()) {
            Some(id) => Some(id),
            None => {
                let location = self
                    .locations
                    .get(location_code)
                    .await
                    .map_err(|e| ToolError::internal(e.to_string()))?;
                let Some(location) = location else {
                    return Ok(ToolOutput::json(
                        json!({ "status": "error", "error": "unknown location" }),
                    ));
                };
                self.appointments
                    .latest_future_for_name(name, &location.code, now_naive().date())
                    .await
                    .map_err(|e| ToolError::internal(e.to_string()))?
                    .map(|a| a.confirmation_id)
            }
        };

        let Some(confirmation_id) = confirmation_id else {
            return Ok(ToolOutput::json(
                json!({ "status": "error", "error": "no upcoming booking found" }),
            ));
        };

        let cancelled = self
            .appointments
            .cancel(confirmation_id)
            .await
            .map_err(|e| ToolError::internal(e.to_string()))?;

        if cancelled {
            Ok(ToolOutput::json(json!({
                "status": "success",
                "confirmation_id": confirmation_id,
                "cancelled": true,
            })))
        } else {
            Ok(ToolOutput::json(
                json!({ "status": "error", "error": "no upcoming booking found" }),
            ))
        }
    }
}
