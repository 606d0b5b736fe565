//! Persistence layer for the HVAC voice agent
//!
//! Provides storage for:
//! - Service locations (read-mostly, loaded on startup)
//! - Appointments (idempotent on the originating call id)
//! - Emergency logs (append-only)
//! - Final call records with transcripts
//! - Live call sessions (KV with TTL, local cache, in-process fallback)
//!
//! Every store is a trait with a ScyllaDB implementation and an in-memory
//! implementation; tests and KV-less deployments use the latter.

pub mod appointments;
pub mod call_records;
pub mod client;
pub mod emergency;
pub mod error;
pub mod leads;
pub mod locations;
pub mod schema;
pub mod sessions;

pub use appointments::{
    Appointment, AppointmentStore, BookingOutcome, InMemoryAppointmentStore, NewAppointment,
    RescheduleOutcome, ScyllaAppointmentStore,
};
pub use call_records::{CallRecord, CallRecordStore, InMemoryCallRecordStore, ScyllaCallRecordStore};
pub use client::{ScyllaClient, ScyllaConfig};
pub use emergency::{EmergencyLog, EmergencyStore, InMemoryEmergencyStore, ScyllaEmergencyStore};
pub use error::PersistenceError;
pub use leads::{InMemoryLeadStore, Lead, LeadStore, ScyllaLeadStore};
pub use locations::{
    default_locations, InMemoryLocationStore, Location, LocationStore, ScyllaLocationStore,
};
pub use sessions::{
    CachedSessionStore, InMemorySessionKv, ScyllaSessionKv, SessionKv, SessionStoreConfig,
};

use std::sync::Arc;

/// Combined persistence layer with all stores
pub struct PersistenceLayer {
    pub locations: Arc<dyn LocationStore>,
    pub appointments: Arc<dyn AppointmentStore>,
    pub emergencies: Arc<dyn EmergencyStore>,
    pub leads: Arc<dyn LeadStore>,
    pub call_records: Arc<dyn CallRecordStore>,
    pub sessions: Arc<CachedSessionStore>,
}

impl PersistenceLayer {
    /// In-memory layer for tests and KV-less deployments
    pub fn in_memory(session_config: SessionStoreConfig) -> Self {
        Self {
            locations: Arc::new(InMemoryLocationStore::with_defaults()),
            appointments: Arc::new(InMemoryAppointmentStore::new()),
            emergencies: Arc::new(InMemoryEmergencyStore::new()),
            leads: Arc::new(InMemoryLeadStore::new()),
            call_records: Arc::new(InMemoryCallRecordStore::new()),
            sessions: Arc::new(CachedSessionStore::new(
                Some(Arc::new(InMemorySessionKv::new())),
                session_config,
            )),
        }
    }
}

/// Initialize the ScyllaDB-backed persistence layer
pub async fn init(
    config: ScyllaConfig,
    session_config: SessionStoreConfig,
) -> Result<PersistenceLayer, PersistenceError> {
    let client = ScyllaClient::connect(config).await?;
    client.ensure_schema().await?;

    // Seed locations when the table is empty so tools always have a
    // service area to answer from.
    let locations = ScyllaLocationStore::new(client.clone());
    if locations.list_active().await?.is_empty() {
        for location in default_locations() {
            locations.upsert(&location).await?;
        }
        tracing::info!("Seeded default service locations");
    }

    Ok(PersistenceLayer {
        locations: Arc::new(locations),
        appointments: Arc::new(ScyllaAppointmentStore::new(client.clone())),
        emergencies: Arc::new(ScyllaEmergencyStore::new(client.clone())),
        leads: Arc::new(ScyllaLeadStore::new(client.clone())),
        call_records: Arc::new(ScyllaCallRecordStore::new(client.clone())),
        sessions: Arc::new(CachedSessionStore::new(
            Some(Arc::new(ScyllaSessionKv::new(client))),
            session_config,
        )),
    })
}
