//! Appointment store
//!
//! Bookings are idempotent on the originating call id: a retry with the same
//! call id observes the original booking instead of creating a second row.
//! Slot occupancy is one row per (location, date, time) while not cancelled;
//! cancellation is soft and frees the slot.

use crate::{PersistenceError, ScyllaClient};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A booked appointment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub confirmation_id: i64,
    /// Originating call id; unique across non-cancelled rows where present
    pub call_id: Option<String>,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub customer_email: Option<String>,
    pub location_code: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub issue: String,
    pub issue_category: Option<String>,
    pub priority: String,
    pub is_cancelled: bool,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to create an appointment
#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub call_id: Option<String>,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub customer_email: Option<String>,
    pub location_code: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub issue: String,
    pub issue_category: Option<String>,
    pub priority: String,
}

/// Result of a create attempt
#[derive(Debug, Clone)]
pub enum BookingOutcome {
    /// New row created
    Created(Appointment),
    /// A non-cancelled booking already existed for this call id
    Idempotent(Appointment),
    /// The slot is occupied by another booking
    SlotTaken,
}

/// Result of a reschedule attempt
#[derive(Debug, Clone)]
pub enum RescheduleOutcome {
    Updated(Appointment),
    SlotTaken,
    NotFound,
}

/// Appointment store trait
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn create(&self, new: NewAppointment) -> Result<BookingOutcome, PersistenceError>;
    async fn get(&self, confirmation_id: i64) -> Result<Option<Appointment>, PersistenceError>;
    /// Non-cancelled booking for a call id, if any
    async fn find_by_call(&self, call_id: &str) -> Result<Option<Appointment>, PersistenceError>;
    async fn slot_taken(
        &self,
        location_code: &str,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<bool, PersistenceError>;
    /// Occupied (date, time) pairs for a location within [from, to]
    async fn booked_slots(
        &self,
        location_code: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<(NaiveDate, NaiveTime)>, PersistenceError>;
    /// Most recent future, non-cancelled booking for a customer at a location
    async fn latest_future_for_name(
        &self,
        customer_name: &str,
        location_code: &str,
        today: NaiveDate,
    ) -> Result<Option<Appointment>, PersistenceError>;
    async fn reschedule(
        &self,
        confirmation_id: i64,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<RescheduleOutcome, PersistenceError>;
    /// Soft cancel; frees the slot and the call-id guard. Returns false when
    /// the id is unknown.
    async fn cancel(&self, confirmation_id: i64) -> Result<bool, PersistenceError>;
}

type SlotKey = (String, NaiveDate, NaiveTime);

#[derive(Default)]
struct MemoryInner {
    by_id: HashMap<i64, Appointment>,
    by_call: HashMap<String, i64>,
    slots: HashMap<SlotKey, i64>,
    next_id: i64,
}

/// In-memory appointment store; the idempotency and slot guards are enforced
/// under one lock, matching the single-transaction guarantee of the row store.
pub struct InMemoryAppointmentStore {
    inner: Mutex<MemoryInner>,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                next_id: 100_000,
                ..MemoryInner::default()
            }),
        }
    }
}

impl Default for InMemoryAppointmentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn create(&self, new: NewAppointment) -> Result<BookingOutcome, PersistenceError> {
        let mut inner = self.inner.lock();

        if let Some(call_id) = &new.call_id {
            if let Some(&existing_id) = inner.by_call.get(call_id) {
                if let Some(existing) = inner.by_id.get(&existing_id) {
                    if !existing.is_cancelled {
                        return Ok(BookingOutcome::Idempotent(existing.clone()));
                    }
                }
            }
        }

        let slot_key = (new.location_code.clone(), new.date, new.time);
        if inner.slots.contains_key(&slot_key) {
            return Ok(BookingOutcome::SlotTaken);
        }

        inner.next_id += 1;
        let confirmation_id = inner.next_id;
        let appointment = Appointment {
            confirmation_id,
            call_id: new.call_id.clone(),
            customer_name: new.customer_name,
            customer_phone: new.customer_phone,
            customer_email: new.customer_email,
            location_code: new.location_code,
            date: new.date,
            time: new.time,
            issue: new.issue,
            issue_category: new.issue_category,
            priority: new.priority,
            is_cancelled: false,
            created_at: Utc::now(),
        };

        inner.slots.insert(slot_key, confirmation_id);
        if let Some(call_id) = &new.call_id {
            inner.by_call.insert(call_id.clone(), confirmation_id);
        }
        inner.by_id.insert(confirmation_id, appointment.clone());

        Ok(BookingOutcome::Created(appointment))
    }

    async fn get(&self, confirmation_id: i64) -> Result<Option<Appointment>, PersistenceError> {
        Ok(self.inner.lock().by_id.get(&confirmation_id).cloned())
    }

    async fn find_by_call(&self, call_id: &str) -> Result<Option<Appointment>, PersistenceError> {
        let inner = self.inner.lock();
        Ok(inner
            .by_call
            .get(call_id)
            .and_then(|id| inner.by_id.get(id))
            .filter(|a| !a.is_cancelled)
            .cloned())
    }

    async fn slot_taken(
        &self,
        location_code: &str,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<bool, PersistenceError> {
        let key = (location_code.to_string(), date, time);
        Ok(self.inner.lock().slots.contains_key(&key))
    }

    async fn booked_slots(
        &self,
        location_code: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<(NaiveDate, NaiveTime)>, PersistenceError> {
        let inner = self.inner.lock();
        let mut slots: Vec<(NaiveDate, NaiveTime)> = inner
            .slots
            .keys()
            .filter(|(code, date, _)| code == location_code && *date >= from && *date <= to)
            .map(|(_, date, time)| (*date, *time))
            .collect();
        slots.sort();
        Ok(slots)
    }

    async fn latest_future_for_name(
        &self,
        customer_name: &str,
        location_code: &str,
        today: NaiveDate,
    ) -> Result<Option<Appointment>, PersistenceError> {
        let inner = self.inner.lock();
        let name_lower = customer_name.to_lowercase();
        Ok(inner
            .by_id
            .values()
            .filter(|a| {
                !a.is_cancelled
                    && a.location_code == location_code
                    && a.customer_name.to_lowercase() == name_lower
                    && a.date >= today
            })
            .max_by_key(|a| (a.date, a.time))
            .cloned())
    }

    async fn reschedule(
        &self,
        confirmation_id: i64,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<RescheduleOutcome, PersistenceError> {
        let mut inner = self.inner.lock();

        let Some(existing) = inner.by_id.get(&confirmation_id).cloned() else {
            return Ok(RescheduleOutcome::NotFound);
        };
        if existing.is_cancelled {
            return Ok(RescheduleOutcome::NotFound);
        }

        let new_key = (existing.location_code.clone(), date, time);
        if let Some(&occupant) = inner.slots.get(&new_key) {
            if occupant != confirmation_id {
                return Ok(RescheduleOutcome::SlotTaken);
            }
        }

        let old_key = (existing.location_code.clone(), existing.date, existing.time);
        inner.slots.remove(&old_key);
        inner.slots.insert(new_key, confirmation_id);

        let appointment = inner.by_id.get_mut(&confirmation_id).unwrap();
        appointment.date = date;
        appointment.time = time;
        Ok(RescheduleOutcome::Updated(appointment.clone()))
    }

    async fn cancel(&self, confirmation_id: i64) -> Result<bool, PersistenceError> {
        let mut inner = self.inner.lock();

        let Some(existing) = inner.by_id.get(&confirmation_id).cloned() else {
            return Ok(false);
        };
        if !existing.is_cancelled {
            let key = (existing.location_code.clone(), existing.date, existing.time);
            inner.slots.remove(&key);
            if let Some(call_id) = &existing.call_id {
                inner.by_call.remove(call_id);
            }
            inner.by_id.get_mut(&confirmation_id).unwrap().is_cancelled = true;
        }
        Ok(true)
    }
}

/// ScyllaDB-backed appointment store.
///
/// The call-id and slot guards are claimed with `INSERT ... IF NOT EXISTS`
/// and read back, so a losing writer observes the winner's confirmation id.
#[derive(Clone)]
pub struct ScyllaAppointmentStore {
    client: ScyllaClient,
}

impl ScyllaAppointmentStore {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }

    fn new_confirmation_id() -> i64 {
        rand::thread_rng().gen_range(100_000..100_000_000)
    }

    fn row_to_appointment(
        &self,
        row: scylla::frame::response::result::Row,
    ) -> Result<Appointment, PersistenceError> {
        let (
            confirmation_id,
            call_id,
            customer_name,
            customer_phone,
            customer_email,
            location_code,
            slot_date,
            slot_time,
            issue,
            issue_category,
            priority,
            is_cancelled,
            created_at,
        ): (
            i64,
            Option<String>,
            String,
            Option<String>,
            Option<String>,
            String,
            String,
            String,
            String,
            Option<String>,
            String,
            bool,
            i64,
        ) = row
            .into_typed()
            .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;

        Ok(Appointment {
            confirmation_id,
            call_id,
            customer_name,
            customer_phone,
            customer_email,
            location_code,
            date: NaiveDate::parse_from_str(&slot_date, "%Y-%m-%d")
                .map_err(|e| PersistenceError::InvalidData(e.to_string()))?,
            time: NaiveTime::parse_from_str(&slot_time, "%H:%M")
                .map_err(|e| PersistenceError::InvalidData(e.to_string()))?,
            issue,
            issue_category,
            priority,
            is_cancelled,
            created_at: DateTime::from_timestamp_millis(created_at).unwrap_or_else(Utc::now),
        })
    }

    const SELECT_COLUMNS: &'static str = "confirmation_id, call_id, customer_name, customer_phone, \
         customer_email, location_code, slot_date, slot_time, issue, issue_category, priority, \
         is_cancelled, created_at";

    async fn claim_call_guard(
        &self,
        call_id: &str,
        confirmation_id: i64,
    ) -> Result<i64, PersistenceError> {
        let insert = format!(
            "INSERT INTO {}.appointments_by_call (call_id, confirmation_id) VALUES (?, ?) IF NOT EXISTS",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(insert, (call_id, confirmation_id))
            .await?;

        let select = format!(
            "SELECT confirmation_id FROM {}.appointments_by_call WHERE call_id = ?",
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(select, (call_id,))
            .await?;

        if let Some(rows) = result.rows {
            if let Some(row) = rows.into_iter().next() {
                let (winner,): (i64,) = row
                    .into_typed()
                    .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;
                return Ok(winner);
            }
        }
        Ok(confirmation_id)
    }

    async fn claim_slot(
        &self,
        location_code: &str,
        date: NaiveDate,
        time: NaiveTime,
        confirmation_id: i64,
    ) -> Result<bool, PersistenceError> {
        let insert = format!(
            "INSERT INTO {}.appointment_slots (location_code, slot_date, slot_time, confirmation_id)
             VALUES (?, ?, ?, ?) IF NOT EXISTS",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(
                insert,
                (
                    location_code,
                    date.format("%Y-%m-%d").to_string(),
                    time.format("%H:%M").to_string(),
                    confirmation_id,
                ),
            )
            .await?;

        let select = format!(
            "SELECT confirmation_id FROM {}.appointment_slots
             WHERE location_code = ? AND slot_date = ? AND slot_time = ?",
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(
                select,
                (
                    location_code,
                    date.format("%Y-%m-%d").to_string(),
                    time.format("%H:%M").to_string(),
                ),
            )
            .await?;

        if let Some(rows) = result.rows {
            if let Some(row) = rows.into_iter().next() {
                let (winner,): (i64,) = row
                    .into_typed()
                    .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;
                return Ok(winner == confirmation_id);
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl AppointmentStore for ScyllaAppointmentStore {
    async fn create(&self, new: NewAppointment) -> Result<BookingOutcome, PersistenceError> {
        let confirmation_id = Self::new_confirmation_id();

        if let Some(call_id) = &new.call_id {
            let winner = self.claim_call_guard(call_id, confirmation_id).await?;
            if winner != confirmation_id {
                if let Some(existing) = self.get(winner).await? {
                    if !existing.is_cancelled {
                        return Ok(BookingOutcome::Idempotent(existing));
                    }
                }
            }
        }

        let claimed = self
            .claim_slot(&new.location_code, new.date, new.time, confirmation_id)
            .await?;
        if !claimed {
            // Release the call guard so a later retry can book a free slot
            if let Some(call_id) = &new.call_id {
                let delete = format!(
                    "DELETE FROM {}.appointments_by_call WHERE call_id = ? IF confirmation_id = ?",
                    self.client.keyspace()
                );
                self.client
                    .session()
                    .query_unpaged(delete, (call_id, confirmation_id))
                    .await?;
            }
            return Ok(BookingOutcome::SlotTaken);
        }

        let appointment = Appointment {
            confirmation_id,
            call_id: new.call_id,
            customer_name: new.customer_name,
            customer_phone: new.customer_phone,
            customer_email: new.customer_email,
            location_code: new.location_code,
            date: new.date,
            time: new.time,
            issue: new.issue,
            issue_category: new.issue_category,
            priority: new.priority,
            is_cancelled: false,
            created_at: Utc::now(),
        };

        let insert = format!(
            "INSERT INTO {}.appointments ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.client.keyspace(),
            Self::SELECT_COLUMNS
        );
        self.client
            .session()
            .query_unpaged(
                insert,
                (
                    appointment.confirmation_id,
                    &appointment.call_id,
                    &appointment.customer_name,
                    &appointment.customer_phone,
                    &appointment.customer_email,
                    &appointment.location_code,
                    appointment.date.format("%Y-%m-%d").to_string(),
                    appointment.time.format("%H:%M").to_string(),
                    &appointment.issue,
                    &appointment.issue_category,
                    &appointment.priority,
                    appointment.is_cancelled,
                    appointment.created_at.timestamp_millis(),
                ),
            )
            .await?;

        tracing::info!(
            confirmation_id,
            location = %appointment.location_code,
            date = %appointment.date,
            "Appointment created"
        );

        Ok(BookingOutcome::Created(appointment))
    }

    async fn get(&self, confirmation_id: i64) -> Result<Option<Appointment>, PersistenceError> {
        let query = format!(
            "SELECT {} FROM {}.appointments WHERE confirmation_id = ?",
            Self::SELECT_COLUMNS,
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(query, (confirmation_id,))
            .await?;

        if let Some(rows) = result.rows {
            if let Some(row) = rows.into_iter().next() {
                return Ok(Some(self.row_to_appointment(row)?));
            }
        }
        Ok(None)
    }

    async fn find_by_call(&self, call_id: &str) -> Result<Option<Appointment>, PersistenceError> {
        let query = format!(
            "SELECT confirmation_id FROM {}.appointments_by_call WHERE call_id = ?",
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(query, (call_id,))
            .await?;

        if let Some(rows) = result.rows {
            if let Some(row) = rows.into_iter().next() {
                let (confirmation_id,): (i64,) = row
                    .into_typed()
                    .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;
                return Ok(self
                    .get(confirmation_id)
                    .await?
                    .filter(|a| !a.is_cancelled));
            }
        }
        Ok(None)
    }

    async fn slot_taken(
        &self,
        location_code: &str,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<bool, PersistenceError> {
        let query = format!(
            "SELECT confirmation_id FROM {}.appointment_slots
             WHERE location_code = ? AND slot_date = ? AND slot_time = ?",
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(
                query,
                (
                    location_code,
                    date.format("%Y-%m-%d").to_string(),
                    time.format("%H:%M").to_string(),
                ),
            )
            .await?;

        Ok(result.rows.map(|r| !r.is_empty()).unwrap_or(false))
    }

    async fn booked_slots(
        &self,
        location_code: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<(NaiveDate, NaiveTime)>, PersistenceError> {
        let query = format!(
            "SELECT slot_date, slot_time FROM {}.appointment_slots
             WHERE location_code = ? AND slot_date >= ? AND slot_date <= ?",
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(
                query,
                (
                    location_code,
                    from.format("%Y-%m-%d").to_string(),
                    to.format("%Y-%m-%d").to_string(),
                ),
            )
            .await?;

        let mut slots = Vec::new();
        if let Some(rows) = result.rows {
            for row in rows {
                let (date_str, time_str): (String, String) = row
                    .into_typed()
                    .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;
                let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
                    .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;
                let time = NaiveTime::parse_from_str(&time_str, "%H:%M")
                    .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;
                slots.push((date, time));
            }
        }
        slots.sort();
        Ok(slots)
    }

    async fn latest_future_for_name(
        &self,
        customer_name: &str,
        location_code: &str,
        today: NaiveDate,
    ) -> Result<Option<Appointment>, PersistenceError> {
        // Name lookup needs a scan; bookings are low-volume enough that
        // ALLOW FILTERING on the single-partition table is acceptable here.
        let query = format!(
            "SELECT {} FROM {}.appointments ALLOW FILTERING",
            Self::SELECT_COLUMNS,
            self.client.keyspace()
        );
        let result = self.client.session().query_unpaged(query, &[]).await?;

        let name_lower = customer_name.to_lowercase();
        let mut best: Option<Appointment> = None;
        if let Some(rows) = result.rows {
            for row in rows {
                let appointment = self.row_to_appointment(row)?;
                if appointment.is_cancelled
                    || appointment.location_code != location_code
                    || appointment.customer_name.to_lowercase() != name_lower
                    || appointment.date < today
                {
                    continue;
                }
                let newer = best
                    .as_ref()
                    .map(|b| (appointment.date, appointment.time) > (b.date, b.time))
                    .unwrap_or(true);
                if newer {
                    best = Some(appointment);
                }
            }
        }
        Ok(best)
    }

    async fn reschedule(
        &self,
        confirmation_id: i64,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<RescheduleOutcome, PersistenceError> {
        let Some(existing) = self.get(confirmation_id).await? else {
            return Ok(RescheduleOutcome::NotFound);
        };
        if existing.is_cancelled {
            return Ok(RescheduleOutcome::NotFound);
        }

        let claimed = self
            .claim_slot(&existing.location_code, date, time, confirmation_id)
            .await?;
        if !claimed {
            return Ok(RescheduleOutcome::SlotTaken);
        }

        let free_old = format!(
            "DELETE FROM {}.appointment_slots WHERE location_code = ? AND slot_date = ? AND slot_time = ?",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(
                free_old,
                (
                    &existing.location_code,
                    existing.date.format("%Y-%m-%d").to_string(),
                    existing.time.format("%H:%M").to_string(),
                ),
            )
            .await?;

        let update = format!(
            "UPDATE {}.appointments SET slot_date = ?, slot_time = ? WHERE confirmation_id = ?",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(
                update,
                (
                    date.format("%Y-%m-%d").to_string(),
                    time.format("%H:%M").to_string(),
                    confirmation_id,
                ),
            )
            .await?;

        let mut updated = existing;
        updated.date = date;
        updated.time = time;
        Ok(RescheduleOutcome::Updated(updated))
    }

    async fn cancel(&self, confirmation_id: i64) -> Result<bool, PersistenceError> {
        let Some(existing) = self.get(confirmation_id).await? else {
            return Ok(false);
        };
        if existing.is_cancelled {
            return Ok(true);
        }

        let update = format!(
            "UPDATE {}.appointments SET is_cancelled = true WHERE confirmation_id = ?",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(update, (confirmation_id,))
            .await?;

        let free_slot = format!(
            "DELETE FROM {}.appointment_slots WHERE location_code = ? AND slot_date = ? AND slot_time = ?",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(
                free_slot,
                (
                    &existing.location_code,
                    existing.date.format("%Y-%m-%d").to_string(),
                    existing.time.format("%H:%M").to_string(),
                ),
            )
            .await?;

        if let Some(call_id) = &existing.call_id {
            let free_guard = format!(
                "DELETE FROM {}.appointments_by_call WHERE call_id = ?",
                self.client.keyspace()
            );
            self.client
                .session()
                .query_unpaged(free_guard, (call_id,))
                .await?;
        }

        tracing::info!(confirmation_id, "Appointment cancelled");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_booking(call_id: Option<&str>, date: &str, time: &str) -> NewAppointment {
        NewAppointment {
            call_id: call_id.map(String::from),
            customer_name: "Alice".to_string(),
            customer_phone: Some("+15551234567".to_string()),
            customer_email: None,
            location_code: "DAL".to_string(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            time: NaiveTime::parse_from_str(time, "%H:%M").unwrap(),
            issue: "AC out".to_string(),
            issue_category: None,
            priority: "standard".to_string(),
        }
    }

    #[tokio::test]
    async fn create_is_idempotent_on_call_id() {
        let store = InMemoryAppointmentStore::new();

        let first = store
            .create(new_booking(Some("CS1"), "2025-02-10", "09:00"))
            .await
            .unwrap();
        let BookingOutcome::Created(original) = first else {
            panic!("expected Created");
        };

        // Retry with the same call id, even at a different slot
        let second = store
            .create(new_booking(Some("CS1"), "2025-02-11", "10:00"))
            .await
            .unwrap();
        let BookingOutcome::Idempotent(replay) = second else {
            panic!("expected Idempotent");
        };
        assert_eq!(replay.confirmation_id, original.confirmation_id);

        // And no second row occupies the other slot
        assert!(!store
            .slot_taken(
                "DAL",
                NaiveDate::from_ymd_opt(2025, 2, 11).unwrap(),
                NaiveTime::from_hms_opt(10, 0, 0).unwrap()
            )
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn colliding_slot_is_reported_taken() {
        let store = InMemoryAppointmentStore::new();
        store
            .create(new_booking(Some("CS1"), "2025-02-10", "09:00"))
            .await
            .unwrap();

        let outcome = store
            .create(new_booking(Some("CS2"), "2025-02-10", "09:00"))
            .await
            .unwrap();
        assert!(matches!(outcome, BookingOutcome::SlotTaken));
    }

    #[tokio::test]
    async fn cancel_frees_the_slot_and_call_guard() {
        let store = InMemoryAppointmentStore::new();
        let BookingOutcome::Created(appointment) = store
            .create(new_booking(Some("CS1"), "2025-02-10", "09:00"))
            .await
            .unwrap()
        else {
            panic!("expected Created");
        };

        assert!(store.cancel(appointment.confirmation_id).await.unwrap());
        assert!(store.find_by_call("CS1").await.unwrap().is_none());

        // Slot and call id are reusable after the soft cancel
        let outcome = store
            .create(new_booking(Some("CS1"), "2025-02-10", "09:00"))
            .await
            .unwrap();
        assert!(matches!(outcome, BookingOutcome::Created(_)));
    }

    #[tokio::test]
    async fn reschedule_moves_the_slot() {
        let store = InMemoryAppointmentStore::new();
        let BookingOutcome::Created(appointment) = store
            .create(new_booking(Some("CS1"), "2025-02-10", "09:00"))
            .await
            .unwrap()
        else {
            panic!("expected Created");
        };

        let new_date = NaiveDate::from_ymd_opt(2025, 2, 12).unwrap();
        let new_time = NaiveTime::from_hms_opt(14, 0, 0).unwrap();
        let outcome = store
            .reschedule(appointment.confirmation_id, new_date, new_time)
            .await
            .unwrap();
        assert!(matches!(outcome, RescheduleOutcome::Updated(_)));

        assert!(!store
            .slot_taken(
                "DAL",
                NaiveDate::from_ymd_opt(2025, 2, 10).unwrap(),
                NaiveTime::from_hms_opt(9, 0, 0).unwrap()
            )
            .await
            .unwrap());
        assert!(store.slot_taken("DAL", new_date, new_time).await.unwrap());
    }

    #[tokio::test]
    async fn latest_future_for_name_prefers_the_later_slot() {
        let store = InMemoryAppointmentStore::new();
        store
            .create(new_booking(Some("CS1"), "2025-02-10", "09:00"))
            .await
            .unwrap();
        store
            .create(new_booking(Some("CS2"), "2025-02-12", "11:00"))
            .await
            .unwrap();

        let today = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();
        let latest = store
            .latest_future_for_name("alice", "DAL", today)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.date, NaiveDate::from_ymd_opt(2025, 2, 12).unwrap());
    }
}
