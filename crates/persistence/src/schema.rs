//! ScyllaDB schema creation

use crate::error::PersistenceError;
use scylla::Session;

/// Create the keyspace if it doesn't exist
pub async fn create_keyspace(
    session: &Session,
    keyspace: &str,
    replication_factor: u8,
) -> Result<(), PersistenceError> {
    let query = format!(
        "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = {{'class': 'SimpleStrategy', 'replication_factor': {}}}",
        keyspace, replication_factor
    );

    session
        .query_unpaged(query, &[])
        .await
        .map_err(|e| PersistenceError::SchemaError(format!("Failed to create keyspace: {}", e)))?;

    Ok(())
}

/// Create all required tables
pub async fn create_tables(session: &Session, keyspace: &str) -> Result<(), PersistenceError> {
    // Service locations, read-mostly, loaded at startup
    let locations_table = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.locations (
            code TEXT,
            name TEXT,
            address TEXT,
            phone TEXT,
            opening_hour INT,
            closing_hour INT,
            emergency_phone TEXT,
            is_active BOOLEAN,
            PRIMARY KEY (code)
        )
    "#,
        keyspace
    );
    session
        .query_unpaged(locations_table, &[])
        .await
        .map_err(|e| PersistenceError::SchemaError(format!("Failed to create locations: {}", e)))?;

    // Appointments by confirmation id
    let appointments_table = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.appointments (
            confirmation_id BIGINT,
            call_id TEXT,
            customer_name TEXT,
            customer_phone TEXT,
            customer_email TEXT,
            location_code TEXT,
            slot_date TEXT,
            slot_time TEXT,
            issue TEXT,
            issue_category TEXT,
            priority TEXT,
            is_cancelled BOOLEAN,
            created_at TIMESTAMP,
            PRIMARY KEY (confirmation_id)
        )
    "#,
        keyspace
    );
    session
        .query_unpaged(appointments_table, &[])
        .await
        .map_err(|e| {
            PersistenceError::SchemaError(format!("Failed to create appointments: {}", e))
        })?;

    // Idempotency guard: one non-cancelled appointment per originating call.
    // Inserted with IF NOT EXISTS so retries observe the original booking.
    let by_call_table = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.appointments_by_call (
            call_id TEXT,
            confirmation_id BIGINT,
            PRIMARY KEY (call_id)
        )
    "#,
        keyspace
    );
    session
        .query_unpaged(by_call_table, &[])
        .await
        .map_err(|e| {
            PersistenceError::SchemaError(format!("Failed to create appointments_by_call: {}", e))
        })?;

    // Slot occupancy: one row per (location, date, time) while not cancelled
    let slots_table = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.appointment_slots (
            location_code TEXT,
            slot_date TEXT,
            slot_time TEXT,
            confirmation_id BIGINT,
            PRIMARY KEY ((location_code), slot_date, slot_time)
        )
    "#,
        keyspace
    );
    session
        .query_unpaged(slots_table, &[])
        .await
        .map_err(|e| {
            PersistenceError::SchemaError(format!("Failed to create appointment_slots: {}", e))
        })?;

    // Emergency logs, append-only
    let emergency_table = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.emergency_logs (
            call_id TEXT,
            id BIGINT,
            caller_phone TEXT,
            emergency_type TEXT,
            description TEXT,
            location_code TEXT,
            created_at TIMESTAMP,
            PRIMARY KEY ((call_id), id)
        )
    "#,
        keyspace
    );
    session
        .query_unpaged(emergency_table, &[])
        .await
        .map_err(|e| {
            PersistenceError::SchemaError(format!("Failed to create emergency_logs: {}", e))
        })?;

    // Captured leads for follow-up
    let leads_table = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.leads (
            id BIGINT,
            call_id TEXT,
            name TEXT,
            phone TEXT,
            issue TEXT,
            notes TEXT,
            created_at TIMESTAMP,
            PRIMARY KEY (id)
        )
    "#,
        keyspace
    );
    session
        .query_unpaged(leads_table, &[])
        .await
        .map_err(|e| PersistenceError::SchemaError(format!("Failed to create leads: {}", e)))?;

    // Final per-call records with transcript
    let call_records_table = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.call_records (
            call_sid TEXT,
            from_number TEXT,
            to_number TEXT,
            started_at TIMESTAMP,
            ended_at TIMESTAMP,
            ended_reason TEXT,
            duration_s BIGINT,
            tools_used TEXT,
            emergency BOOLEAN,
            booked BOOLEAN,
            transcript TEXT,
            PRIMARY KEY (call_sid)
        )
    "#,
        keyspace
    );
    session
        .query_unpaged(call_records_table, &[])
        .await
        .map_err(|e| {
            PersistenceError::SchemaError(format!("Failed to create call_records: {}", e))
        })?;

    // Live call sessions, expired by TTL
    let sessions_table = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.call_sessions (
            call_id TEXT,
            body TEXT,
            PRIMARY KEY (call_id)
        ) WITH default_time_to_live = 3600
    "#,
        keyspace
    );
    session
        .query_unpaged(sessions_table, &[])
        .await
        .map_err(|e| {
            PersistenceError::SchemaError(format!("Failed to create call_sessions: {}", e))
        })?;

    tracing::info!("All tables created successfully");
    Ok(())
}
