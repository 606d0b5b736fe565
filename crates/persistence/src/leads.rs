//! Lead store
//!
//! Callers who don't book still leave a name and number; those land here
//! for follow-up.

use crate::{PersistenceError, ScyllaClient};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: i64,
    pub call_id: Option<String>,
    pub name: String,
    pub phone: String,
    pub issue: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn insert(&self, lead: &Lead) -> Result<(), PersistenceError>;
    async fn list_recent(&self, limit: usize) -> Result<Vec<Lead>, PersistenceError>;
}

#[derive(Default)]
pub struct InMemoryLeadStore {
    leads: Mutex<Vec<Lead>>,
}

impl InMemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeadStore for InMemoryLeadStore {
    async fn insert(&self, lead: &Lead) -> Result<(), PersistenceError> {
        self.leads.lock().push(lead.clone());
        Ok(())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Lead>, PersistenceError> {
        let leads = self.leads.lock();
        let start = leads.len().saturating_sub(limit);
        Ok(leads[start..].to_vec())
    }
}

#[derive(Clone)]
pub struct ScyllaLeadStore {
    client: ScyllaClient,
}

impl ScyllaLeadStore {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LeadStore for ScyllaLeadStore {
    async fn insert(&self, lead: &Lead) -> Result<(), PersistenceError> {
        let query = format!(
            "INSERT INTO {}.leads (id, call_id, name, phone, issue, notes, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(
                query,
                (
                    lead.id,
                    &lead.call_id,
                    &lead.name,
                    &lead.phone,
                    &lead.issue,
                    &lead.notes,
                    lead.created_at.timestamp_millis(),
                ),
            )
            .await?;

        tracing::info!(lead_id = lead.id, phone = %lead.phone, "Lead captured");
        Ok(())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Lead>, PersistenceError> {
        let query = format!(
            "SELECT id, call_id, name, phone, issue, notes, created_at FROM {}.leads LIMIT ?",
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(query, (limit as i32,))
            .await?;

        let mut leads = Vec::new();
        if let Some(rows) = result.rows {
            for row in rows {
                let (id, call_id, name, phone, issue, notes, created_at): (
                    i64,
                    Option<String>,
                    String,
                    String,
                    String,
                    Option<String>,
                    i64,
                ) = row
                    .into_typed()
                    .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;
                leads.push(Lead {
                    id,
                    call_id,
                    name,
                    phone,
                    issue,
                    notes,
                    created_at: DateTime::from_timestamp_millis(created_at)
                        .unwrap_or_else(Utc::now),
                });
            }
        }
        Ok(leads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_and_list_recent() {
        let store = InMemoryLeadStore::new();
        for i in 0..3 {
            store
                .insert(&Lead {
                    id: i,
                    call_id: Some(format!("CA{i}")),
                    name: "Bob".to_string(),
                    phone: "+15551112222".to_string(),
                    issue: "furnace noise".to_string(),
                    notes: None,
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        let recent = store.list_recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].id, 2);
    }
}
