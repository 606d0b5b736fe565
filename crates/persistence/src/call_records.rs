//! Final call records
//!
//! One row per completed call: outcome flags, tool usage and the transcript.
//! Written once by the supervisor during post-call fan-out.

use crate::{PersistenceError, ScyllaClient};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub call_sid: String,
    pub from_number: String,
    pub to_number: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub ended_reason: String,
    pub duration_s: i64,
    pub tools_used: Vec<String>,
    pub emergency: bool,
    pub booked: bool,
    /// Serialized conversation turns
    pub transcript: serde_json::Value,
}

#[async_trait]
pub trait CallRecordStore: Send + Sync {
    async fn upsert(&self, record: &CallRecord) -> Result<(), PersistenceError>;
    async fn get(&self, call_sid: &str) -> Result<Option<CallRecord>, PersistenceError>;
}

#[derive(Default)]
pub struct InMemoryCallRecordStore {
    records: Mutex<HashMap<String, CallRecord>>,
}

impl InMemoryCallRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CallRecordStore for InMemoryCallRecordStore {
    async fn upsert(&self, record: &CallRecord) -> Result<(), PersistenceError> {
        self.records
            .lock()
            .insert(record.call_sid.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, call_sid: &str) -> Result<Option<CallRecord>, PersistenceError> {
        Ok(self.records.lock().get(call_sid).cloned())
    }
}

#[derive(Clone)]
pub struct ScyllaCallRecordStore {
    client: ScyllaClient,
}

impl ScyllaCallRecordStore {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CallRecordStore for ScyllaCallRecordStore {
    async fn upsert(&self, record: &CallRecord) -> Result<(), PersistenceError> {
        let query = format!(
            "INSERT INTO {}.call_records (call_sid, from_number, to_number, started_at, ended_at,
             ended_reason, duration_s, tools_used, emergency, booked, transcript)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(
                query,
                (
                    &record.call_sid,
                    &record.from_number,
                    &record.to_number,
                    record.started_at.timestamp_millis(),
                    record.ended_at.timestamp_millis(),
                    &record.ended_reason,
                    record.duration_s,
                    serde_json::to_string(&record.tools_used)
                        .map_err(|e| PersistenceError::InvalidData(e.to_string()))?,
                    record.emergency,
                    record.booked,
                    record.transcript.to_string(),
                ),
            )
            .await?;

        tracing::info!(
            call_sid = %record.call_sid,
            ended_reason = %record.ended_reason,
            duration_s = record.duration_s,
            emergency = record.emergency,
            booked = record.booked,
            "Call record persisted"
        );
        Ok(())
    }

    async fn get(&self, call_sid: &str) -> Result<Option<CallRecord>, PersistenceError> {
        let query = format!(
            "SELECT call_sid, from_number, to_number, started_at, ended_at, ended_reason,
             duration_s, tools_used, emergency, booked, transcript
             FROM {}.call_records WHERE call_sid = ?",
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(query, (call_sid,))
            .await?;

        if let Some(rows) = result.rows {
            if let Some(row) = rows.into_iter().next() {
                let (
                    call_sid,
                    from_number,
                    to_number,
                    started_at,
                    ended_at,
                    ended_reason,
                    duration_s,
                    tools_used,
                    emergency,
                    booked,
                    transcript,
                ): (
                    String,
                    String,
                    String,
                    i64,
                    i64,
                    String,
                    i64,
                    String,
                    bool,
                    bool,
                    String,
                ) = row
                    .into_typed()
                    .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;

                return Ok(Some(CallRecord {
                    call_sid,
                    from_number,
                    to_number,
                    started_at: DateTime::from_timestamp_millis(started_at)
                        .unwrap_or_else(Utc::now),
                    ended_at: DateTime::from_timestamp_millis(ended_at).unwrap_or_else(Utc::now),
                    ended_reason,
                    duration_s,
                    tools_used: serde_json::from_str(&tools_used).unwrap_or_default(),
                    emergency,
                    booked,
                    transcript: serde_json::from_str(&transcript)
                        .unwrap_or(serde_json::Value::Null),
                }));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let store = InMemoryCallRecordStore::new();
        let record = CallRecord {
            call_sid: "CA1".to_string(),
            from_number: "+15550001111".to_string(),
            to_number: "+15559990000".to_string(),
            started_at: Utc::now(),
            ended_at: Utc::now(),
            ended_reason: "completed".to_string(),
            duration_s: 42,
            tools_used: vec!["create_booking".to_string()],
            emergency: false,
            booked: true,
            transcript: serde_json::json!([{"role": "agent", "text": "hi"}]),
        };
        store.upsert(&record).await.unwrap();

        let loaded = store.get("CA1").await.unwrap().unwrap();
        assert!(loaded.booked);
        assert_eq!(loaded.tools_used, vec!["create_booking".to_string()]);
    }
}
