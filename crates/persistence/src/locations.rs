//! Service location store
//!
//! Locations are read-mostly: loaded once at startup and consulted by the
//! availability and booking tools. Codes are three letters and unique.

use crate::{PersistenceError, ScyllaClient};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One service location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    /// Three-letter code, unique
    pub code: String,
    pub name: String,
    pub address: String,
    pub phone: String,
    /// Local opening hour, 24h clock
    pub opening_hour: u8,
    /// Local closing hour, 24h clock
    pub closing_hour: u8,
    pub emergency_phone: Option<String>,
    pub is_active: bool,
}

impl Location {
    /// Whether a local hour falls within business hours
    pub fn is_open_at(&self, hour: u8) -> bool {
        hour >= self.opening_hour && hour < self.closing_hour
    }

    pub fn hours_label(&self) -> String {
        format!("{}:00-{}:00", self.opening_hour, self.closing_hour)
    }
}

/// Location store trait
#[async_trait]
pub trait LocationStore: Send + Sync {
    async fn get(&self, code: &str) -> Result<Option<Location>, PersistenceError>;
    async fn list_active(&self) -> Result<Vec<Location>, PersistenceError>;
    async fn upsert(&self, location: &Location) -> Result<(), PersistenceError>;
}

/// In-memory location store, also used as the startup-loaded cache
#[derive(Default)]
pub struct InMemoryLocationStore {
    locations: RwLock<HashMap<String, Location>>,
}

impl InMemoryLocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preloaded with the default service area
    pub fn with_defaults() -> Self {
        let store = Self::new();
        for location in default_locations() {
            store
                .locations
                .write()
                .insert(location.code.clone(), location);
        }
        store
    }
}

#[async_trait]
impl LocationStore for InMemoryLocationStore {
    async fn get(&self, code: &str) -> Result<Option<Location>, PersistenceError> {
        Ok(self.locations.read().get(&code.to_uppercase()).cloned())
    }

    async fn list_active(&self) -> Result<Vec<Location>, PersistenceError> {
        let mut active: Vec<Location> = self
            .locations
            .read()
            .values()
            .filter(|l| l.is_active)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(active)
    }

    async fn upsert(&self, location: &Location) -> Result<(), PersistenceError> {
        self.locations
            .write()
            .insert(location.code.clone(), location.clone());
        Ok(())
    }
}

/// ScyllaDB-backed location store
#[derive(Clone)]
pub struct ScyllaLocationStore {
    client: ScyllaClient,
}

impl ScyllaLocationStore {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }

    fn row_to_location(
        &self,
        row: scylla::frame::response::result::Row,
    ) -> Result<Location, PersistenceError> {
        let (code, name, address, phone, opening_hour, closing_hour, emergency_phone, is_active): (
            String,
            String,
            String,
            String,
            i32,
            i32,
            Option<String>,
            bool,
        ) = row
            .into_typed()
            .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;

        Ok(Location {
            code,
            name,
            address,
            phone,
            opening_hour: opening_hour as u8,
            closing_hour: closing_hour as u8,
            emergency_phone,
            is_active,
        })
    }
}

#[async_trait]
impl LocationStore for ScyllaLocationStore {
    async fn get(&self, code: &str) -> Result<Option<Location>, PersistenceError> {
        let query = format!(
            "SELECT code, name, address, phone, opening_hour, closing_hour, emergency_phone, is_active
             FROM {}.locations WHERE code = ?",
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(query, (code.to_uppercase(),))
            .await?;

        if let Some(rows) = result.rows {
            if let Some(row) = rows.into_iter().next() {
                return Ok(Some(self.row_to_location(row)?));
            }
        }
        Ok(None)
    }

    async fn list_active(&self) -> Result<Vec<Location>, PersistenceError> {
        let query = format!(
            "SELECT code, name, address, phone, opening_hour, closing_hour, emergency_phone, is_active
             FROM {}.locations",
            self.client.keyspace()
        );
        let result = self.client.session().query_unpaged(query, &[]).await?;

        let mut locations = Vec::new();
        if let Some(rows) = result.rows {
            for row in rows {
                let location = self.row_to_location(row)?;
                if location.is_active {
                    locations.push(location);
                }
            }
        }
        locations.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(locations)
    }

    async fn upsert(&self, location: &Location) -> Result<(), PersistenceError> {
        let query = format!(
            "INSERT INTO {}.locations (code, name, address, phone, opening_hour, closing_hour, emergency_phone, is_active)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(
                query,
                (
                    &location.code,
                    &location.name,
                    &location.address,
                    &location.phone,
                    location.opening_hour as i32,
                    location.closing_hour as i32,
                    &location.emergency_phone,
                    location.is_active,
                ),
            )
            .await?;
        Ok(())
    }
}

/// Default DFW service area used when the row store has no locations yet
pub fn default_locations() -> Vec<Location> {
    vec![
        Location {
            code: "DAL".to_string(),
            name: "Dallas".to_string(),
            address: "4100 Maple Ave, Dallas, TX".to_string(),
            phone: "+12145550100".to_string(),
            opening_hour: 8,
            closing_hour: 18,
            emergency_phone: Some("+12145550199".to_string()),
            is_active: true,
        },
        Location {
            code: "FTW".to_string(),
            name: "Fort Worth".to_string(),
            address: "900 W 7th St, Fort Worth, TX".to_string(),
            phone: "+18175550100".to_string(),
            opening_hour: 8,
            closing_hour: 18,
            emergency_phone: Some("+18175550199".to_string()),
            is_active: true,
        },
        Location {
            code: "PLA".to_string(),
            name: "Plano".to_string(),
            address: "1201 E 15th St, Plano, TX".to_string(),
            phone: "+14695550100".to_string(),
            opening_hour: 8,
            closing_hour: 17,
            emergency_phone: None,
            is_active: true,
        },
    ]
}
