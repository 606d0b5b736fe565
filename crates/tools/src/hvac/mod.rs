//! HVAC business tools
//!
//! One file per tool. Shared argument parsing and slot validation live here
//! so the availability, booking and reschedule paths agree on every edge
//! case.

pub mod availability;
pub mod booking;
pub mod emergency;
pub mod lead;
pub mod locations;
pub mod transfer;

pub use availability::{CheckSlotAvailableTool, GetNextAvailableSlotsTool};
pub use booking::{CancelBookingTool, CreateBookingTool, RescheduleBookingTool};
pub use emergency::LogEmergencyTool;
pub use lead::CaptureLeadTool;
pub use locations::ListServiceLocationsTool;
pub use transfer::RequestTransferTool;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Utc, Weekday};
use hvac_voice_persistence::{Location, LocationStore, PersistenceError};
use serde_json::Value;

use crate::schema::ToolError;

/// Parse a date argument; accepts the formats callers actually say
pub(crate) fn parse_date_arg(value: &str) -> Result<NaiveDate, ToolError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%d-%m-%Y"))
        .or_else(|_| NaiveDate::parse_from_str(value, "%d/%m/%Y"))
        .map_err(|_| {
            ToolError::invalid_params("date must be in format YYYY-MM-DD, DD-MM-YYYY, or DD/MM/YYYY")
        })
}

/// Parse a time argument; 24h or 12h clock
pub(crate) fn parse_time_arg(value: &str) -> Result<NaiveTime, ToolError> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%I:%M %p"))
        .or_else(|_| NaiveTime::parse_from_str(value, "%I %p"))
        .map_err(|_| ToolError::invalid_params("time must be in format HH:MM or h:MM AM/PM"))
}

pub(crate) fn required_str<'a>(input: &'a Value, name: &str) -> Result<&'a str, ToolError> {
    input
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::invalid_params(format!("{name} is required")))
}

pub(crate) fn optional_str(input: &Value, name: &str) -> Option<String> {
    input
        .get(name)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// Why a requested slot cannot be offered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotIssue {
    UnknownLocation,
    Past,
    Closed,
}

impl SlotIssue {
    /// The structured error string spoken back through the model
    pub(crate) fn as_error(&self) -> &'static str {
        match self {
            Self::UnknownLocation => "unknown location",
            Self::Past => "past",
            Self::Closed => "closed",
        }
    }
}

pub(crate) fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Validate a (location, date, time) triple against existence, the clock,
/// business hours and the weekend rule. Returns the location on success.
pub(crate) async fn validate_slot(
    locations: &dyn LocationStore,
    location_code: &str,
    date: NaiveDate,
    time: NaiveTime,
    now: NaiveDateTime,
    include_weekends: bool,
) -> Result<Result<Location, SlotIssue>, PersistenceError> {
    let Some(location) = locations.get(location_code).await? else {
        return Ok(Err(SlotIssue::UnknownLocation));
    };
    if date.and_time(time) <= now {
        return Ok(Err(SlotIssue::Past));
    }
    if !include_weekends && is_weekend(date) {
        return Ok(Err(SlotIssue::Closed));
    }
    use chrono::Timelike;
    if !location.is_open_at(time.hour() as u8) {
        return Ok(Err(SlotIssue::Closed));
    }
    Ok(Ok(location))
}

pub(crate) fn now_naive() -> NaiveDateTime {
    Utc::now().naive_utc()
}

/// Rough issue triage used for the booking row
pub(crate) fn classify_issue(issue: &str) -> (&'static str, &'static str) {
    let lower = issue.to_lowercase();
    let urgent = ["no heat", "no cooling", "no ac", "flood", "leak", "smoke", "sparking"]
        .iter()
        .any(|k| lower.contains(k));
    let category = if ["heat", "furnace", "boiler"].iter().any(|k| lower.contains(k)) {
        "heating"
    } else if ["ac", "a/c", "cool", "condenser", "freon"].iter().any(|k| lower.contains(k)) {
        "cooling"
    } else if ["duct", "vent", "air quality", "filter"].iter().any(|k| lower.contains(k)) {
        "air_quality"
    } else {
        "general"
    };
    (category, if urgent { "urgent" } else { "standard" })
}
