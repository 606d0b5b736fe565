//! Slot availability tools
//!
//! Slots are hourly on the hour within a location's business hours.
//! `get_next_available_slots` scans forward up to 14 days and returns
//! strictly increasing (date, time) pairs.

use async_trait::async_trait;
use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Timelike};
use serde_json::{json, Value};
use std::sync::Arc;

use hvac_voice_core::CallSession;
use hvac_voice_persistence::{AppointmentStore, LocationStore};

use super::{
    is_weekend, now_naive, parse_date_arg, parse_time_arg, required_str, validate_slot, SlotIssue,
};
use crate::schema::{InputSchema, PropertySchema, Tool, ToolError, ToolOutput, ToolSchema};

const SCAN_DAYS: i64 = 14;
const MAX_SLOTS: usize = 5;

/// Shared forward scan used by `get_next_available_slots` and the
/// booking-collision suggestions.
pub(crate) async fn next_available_slots(
    locations: &dyn LocationStore,
    appointments: &dyn AppointmentStore,
    location_code: &str,
    start_date: NaiveDate,
    count: usize,
    include_weekends: bool,
) -> Result<Result<Vec<(NaiveDate, NaiveTime)>, SlotIssue>, ToolError> {
    let Some(location) = locations
        .get(location_code)
        .await
        .map_err(|e| ToolError::internal(e.to_string()))?
    else {
        return Ok(Err(SlotIssue::UnknownLocation));
    };

    let now = now_naive();
    let first_day = start_date.max(now.date());
    let last_day = first_day + Duration::days(SCAN_DAYS);

    let booked = appointments
        .booked_slots(&location.code, first_day, last_day)
        .await
        .map_err(|e| ToolError::internal(e.to_string()))?;

    let mut found = Vec::new();
    let mut day = first_day;
    while day <= last_day && found.len() < count {
        if include_weekends || !is_weekend(day) {
            for hour in location.opening_hour..location.closing_hour {
                let time = NaiveTime::from_hms_opt(hour as u32, 0, 0).unwrap();
                if day.and_time(time) <= now {
                    continue;
                }
                if booked.binary_search(&(day, time)).is_ok() {
                    continue;
                }
                found.push((day, time));
                if found.len() >= count {
                    break;
                }
            }
        }
        day += Duration::days(1);
    }

    Ok(Ok(found))
}

pub(crate) fn slot_label(date: NaiveDate, time: NaiveTime) -> String {
    let (hour12, am) = match time.hour() {
        0 => (12, true),
        h if h < 12 => (h, true),
        12 => (12, false),
        h => (h - 12, false),
    };
    format!(
        "{}, {} {} at {}:00 {}",
        date.weekday(),
        month_name(date.month()),
        date.day(),
        hour12,
        if am { "AM" } else { "PM" }
    )
}

fn month_name(month: u32) -> &'static str {
    [
        "January", "February", "March", "April", "May", "June", "July", "August", "September",
        "October", "November", "December",
    ][(month - 1) as usize]
}

/// check_slot_available
pub struct CheckSlotAvailableTool {
    locations: Arc<dyn LocationStore>,
    appointments: Arc<dyn AppointmentStore>,
}

impl CheckSlotAvailableTool {
    pub fn new(locations: Arc<dyn LocationStore>, appointments: Arc<dyn AppointmentStore>) -> Self {
        Self {
            locations,
            appointments,
        }
    }
}

#[async_trait]
impl Tool for CheckSlotAvailableTool {
    fn name(&self) -> &str {
        "check_slot_available"
    }

    fn description(&self) -> &str {
        "Check whether a specific appointment slot is free at a service location"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: InputSchema::object()
                .property("date", PropertySchema::string("Date (YYYY-MM-DD)"), true)
                .property("time", PropertySchema::string("Time (HH:MM, 24h)"), true)
                .property(
                    "location_code",
                    PropertySchema::string("Three-letter service location code"),
                    true,
                )
                .property(
                    "duration_min",
                    PropertySchema::integer("Appointment length in minutes (default 60)"),
                    false,
                ),
        }
    }

    async fn execute(
        &self,
        _session: &mut CallSession,
        input: Value,
    ) -> Result<ToolOutput, ToolError> {
        let date = parse_date_arg(required_str(&input, "date")?)?;
        let time = parse_time_arg(required_str(&input, "time")?)?;
        let location_code = required_str(&input, "location_code")?;

        let location = match validate_slot(
            self.locations.as_ref(),
            location_code,
            date,
            time,
            now_naive(),
            false,
        )
        .await
        .map_err(|e| ToolError::internal(e.to_string()))?
        {
            Ok(location) => location,
            Err(issue) => return Ok(ToolOutput::json(json!({ "error": issue.as_error() }))),
        };

        let taken = self
            .appointments
            .slot_taken(&location.code, date, time)
            .await
            .map_err(|e| ToolError::internal(e.to_string()))?;

        if taken {
            Ok(ToolOutput::json(
                json!({ "available": false, "reason": "taken" }),
            ))
        } else {
            Ok(ToolOutput::json(json!({ "available": true })))
        }
    }
}

/// get_next_available_slots
pub struct GetNextAvailableSlotsTool {
    locations: Arc<dyn LocationStore>,
    appointments: Arc<dyn AppointmentStore>,
    include_weekends: bool,
}

impl GetNextAvailableSlotsTool {
    pub fn new(locations: Arc<dyn LocationStore>, appointments: Arc<dyn AppointmentStore>) -> Self {
        Self {
            locations,
            appointments,
            include_weekends: false,
        }
    }

    pub fn with_weekends(mut self, include: bool) -> Self {
        self.include_weekends = include;
        self
    }
}

#[async_trait]
impl Tool for GetNextAvailableSlotsTool {
    fn name(&self) -> &str {
        "get_next_available_slots"
    }

    fn description(&self) -> &str {
        "List the next open appointment slots at a service location"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: InputSchema::object()
                .property(
                    "location_code",
                    PropertySchema::string("Three-letter service location code"),
                    true,
                )
                .property(
                    "start_date",
                    PropertySchema::string("Earliest date to consider (YYYY-MM-DD, default today)"),
                    false,
                )
                .property(
                    "num_slots",
                    PropertySchema::integer("How many slots to return (max 5)"),
                    false,
                ),
        }
    }

    async fn execute(
        &self,
        _session: &mut CallSession,
        input: Value,
    ) -> Result<ToolOutput, ToolError> {
        let location_code = required_str(&input, "location_code")?;
        let start_date = match input.get("start_date").and_then(|v| v.as_str()) {
            Some(s) => parse_date_arg(s)?,
            None => now_naive().date(),
        };
        let num_slots = input
            .get("num_slots")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(MAX_SLOTS)
            .min(MAX_SLOTS);

        let slots = match next_available_slots(
            self.locations.as_ref(),
            self.appointments.as_ref(),
            location_code,
            start_date,
            num_slots,
            self.include_weekends,
        )
        .await?
        {
            Ok(slots) => slots,
            Err(issue) => return Ok(ToolOutput::json(json!({ "error": issue.as_error() }))),
        };

        let entries: Vec<Value> = slots
            .iter()
            .map(|(date, time)| {
                json!({
                    "date": date.format("%Y-%m-%d").to_string(),
                    "time": time.format("%H:%M").to_string(),
                    "label": slot_label(*date, *time),
                })
            })
            .collect();

        Ok(ToolOutput::json(json!({ "slots": entries })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use hvac_voice_persistence::{
        InMemoryAppointmentStore, InMemoryLocationStore, NewAppointment,
    };

    fn stores() -> (Arc<InMemoryLocationStore>, Arc<InMemoryAppointmentStore>) {
        (
            Arc::new(InMemoryLocationStore::with_defaults()),
            Arc::new(InMemoryAppointmentStore::new()),
        )
    }

    fn session() -> CallSession {
        CallSession::new("CA1", "+1555", "+1555", "default")
    }

    // A far-future Monday keeps the now() comparisons out of the way
    const MONDAY: &str = "2099-01-05";

    #[tokio::test]
    async fn free_slot_is_available() {
        let (locations, appointments) = stores();
        let tool = CheckSlotAvailableTool::new(locations, appointments);
        let output = tool
            .execute(
                &mut session(),
                json!({"date": MONDAY, "time": "09:00", "location_code": "DAL"}),
            )
            .await
            .unwrap();
        assert_eq!(output.value, json!({"available": true}));
    }

    #[tokio::test]
    async fn unknown_location_past_and_closed_are_reported() {
        let (locations, appointments) = stores();
        let tool = CheckSlotAvailableTool::new(locations, appointments);

        let output = tool
            .execute(
                &mut session(),
                json!({"date": MONDAY, "time": "09:00", "location_code": "XYZ"}),
            )
            .await
            .unwrap();
        assert_eq!(output.value, json!({"error": "unknown location"}));

        let output = tool
            .execute(
                &mut session(),
                json!({"date": "2001-01-01", "time": "09:00", "location_code": "DAL"}),
            )
            .await
            .unwrap();
        assert_eq!(output.value, json!({"error": "past"}));

        let output = tool
            .execute(
                &mut session(),
                json!({"date": MONDAY, "time": "22:00", "location_code": "DAL"}),
            )
            .await
            .unwrap();
        assert_eq!(output.value, json!({"error": "closed"}));

        // 2099-01-10 is a Saturday
        let output = tool
            .execute(
                &mut session(),
                json!({"date": "2099-01-10", "time": "09:00", "location_code": "DAL"}),
            )
            .await
            .unwrap();
        assert_eq!(output.value, json!({"error": "closed"}));
    }

    #[tokio::test]
    async fn booked_slot_reads_taken() {
        let (locations, appointments) = stores();
        appointments
            .create(NewAppointment {
                call_id: Some("CSX".to_string()),
                customer_name: "Alice".to_string(),
                customer_phone: None,
                customer_email: None,
                location_code: "DAL".to_string(),
                date: NaiveDate::parse_from_str(MONDAY, "%Y-%m-%d").unwrap(),
                time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                issue: "AC out".to_string(),
                issue_category: None,
                priority: "standard".to_string(),
            })
            .await
            .unwrap();

        let tool = CheckSlotAvailableTool::new(locations, appointments);
        let output = tool
            .execute(
                &mut session(),
                json!({"date": MONDAY, "time": "09:00", "location_code": "DAL"}),
            )
            .await
            .unwrap();
        assert_eq!(output.value, json!({"available": false, "reason": "taken"}));
    }

    #[tokio::test]
    async fn slots_are_strictly_increasing_and_inside_business_hours() {
        let (locations, appointments) = stores();
        let tool = GetNextAvailableSlotsTool::new(locations, appointments);

        let output = tool
            .execute(
                &mut session(),
                json!({"location_code": "DAL", "start_date": MONDAY, "num_slots": 5}),
            )
            .await
            .unwrap();
        let slots = output.value["slots"].as_array().unwrap();
        assert_eq!(slots.len(), 5);

        let mut previous: Option<(String, String)> = None;
        for slot in slots {
            let date = slot["date"].as_str().unwrap().to_string();
            let time = slot["time"].as_str().unwrap().to_string();
            let hour: u8 = time[..2].parse().unwrap();
            assert!((8..18).contains(&hour), "outside business hours: {time}");
            if let Some(prev) = &previous {
                assert!((date.clone(), time.clone()) > *prev, "slots not increasing");
            }
            previous = Some((date, time));
        }
    }

    #[tokio::test]
    async fn scan_skips_weekends_and_booked_slots() {
        let (locations, appointments) = stores();
        // 2099-01-09 is a Friday; fill its whole day so the scan must jump
        // the weekend to Monday the 12th.
        let friday = NaiveDate::from_ymd_opt(2099, 1, 9).unwrap();
        for hour in 8..18 {
            appointments
                .create(NewAppointment {
                    call_id: None,
                    customer_name: "Filler".to_string(),
                    customer_phone: None,
                    customer_email: None,
                    location_code: "DAL".to_string(),
                    date: friday,
                    time: NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
                    issue: "filler".to_string(),
                    issue_category: None,
                    priority: "standard".to_string(),
                })
                .await
                .unwrap();
        }

        let tool = GetNextAvailableSlotsTool::new(locations, appointments);
        let output = tool
            .execute(
                &mut session(),
                json!({"location_code": "DAL", "start_date": "2099-01-09", "num_slots": 2}),
            )
            .await
            .unwrap();
        let slots = output.value["slots"].as_array().unwrap();
        assert_eq!(slots[0]["date"], "2099-01-12");
        assert_eq!(slots[0]["time"], "08:00");
    }

    #[test]
    fn labels_read_naturally() {
        let date = NaiveDate::from_ymd_opt(2025, 2, 10).unwrap();
        let time = NaiveTime::from_hms_opt(14, 0, 0).unwrap();
        assert_eq!(slot_label(date, time), "Mon, February 10 at 2:00 PM");
    }
}
