//! Emergency log store
//!
//! Append-only. A row is written the moment an emergency is classified,
//! before any dial-out is attempted.

use crate::{PersistenceError, ScyllaClient};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyLog {
    pub id: i64,
    pub call_id: String,
    pub caller_phone: String,
    pub emergency_type: String,
    pub description: String,
    pub location_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait EmergencyStore: Send + Sync {
    async fn append(&self, log: &EmergencyLog) -> Result<(), PersistenceError>;
    async fn list_for_call(&self, call_id: &str) -> Result<Vec<EmergencyLog>, PersistenceError>;
}

#[derive(Default)]
pub struct InMemoryEmergencyStore {
    logs: Mutex<Vec<EmergencyLog>>,
}

impl InMemoryEmergencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EmergencyStore for InMemoryEmergencyStore {
    async fn append(&self, log: &EmergencyLog) -> Result<(), PersistenceError> {
        self.logs.lock().push(log.clone());
        Ok(())
    }

    async fn list_for_call(&self, call_id: &str) -> Result<Vec<EmergencyLog>, PersistenceError> {
        Ok(self
            .logs
            .lock()
            .iter()
            .filter(|l| l.call_id == call_id)
            .cloned()
            .collect())
    }
}

#[derive(Clone)]
pub struct ScyllaEmergencyStore {
    client: ScyllaClient,
}

impl ScyllaEmergencyStore {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EmergencyStore for ScyllaEmergencyStore {
    async fn append(&self, log: &EmergencyLog) -> Result<(), PersistenceError> {
        let query = format!(
            "INSERT INTO {}.emergency_logs (call_id, id, caller_phone, emergency_type, description, location_code, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(
                query,
                (
                    &log.call_id,
                    log.id,
                    &log.caller_phone,
                    &log.emergency_type,
                    &log.description,
                    &log.location_code,
                    log.created_at.timestamp_millis(),
                ),
            )
            .await?;

        tracing::warn!(
            call_id = %log.call_id,
            emergency_type = %log.emergency_type,
            "Emergency logged"
        );
        Ok(())
    }

    async fn list_for_call(&self, call_id: &str) -> Result<Vec<EmergencyLog>, PersistenceError> {
        let query = format!(
            "SELECT call_id, id, caller_phone, emergency_type, description, location_code, created_at
             FROM {}.emergency_logs WHERE call_id = ?",
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(query, (call_id,))
            .await?;

        let mut logs = Vec::new();
        if let Some(rows) = result.rows {
            for row in rows {
                let (call_id, id, caller_phone, emergency_type, description, location_code, created_at): (
                    String,
                    i64,
                    String,
                    String,
                    String,
                    Option<String>,
                    i64,
                ) = row
                    .into_typed()
                    .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;
                logs.push(EmergencyLog {
                    id,
                    call_id,
                    caller_phone,
                    emergency_type,
                    description,
                    location_code,
                    created_at: DateTime::from_timestamp_millis(created_at)
                        .unwrap_or_else(Utc::now),
                });
            }
        }
        Ok(logs)
    }
}
