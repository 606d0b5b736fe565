//! Call session store
//!
//! Write-through local cache over a shared KV, with an in-process fallback
//! map when the KV is unreachable. Within one process, readers never observe
//! a state older than the writer's write; cross-process consistency is the
//! KV's last-writer-wins. The KV TTL is authoritative: after a restart,
//! state is recovered only from the KV.

use crate::error::PersistenceError;
use crate::ScyllaClient;
use async_trait::async_trait;
use hvac_voice_core::CallSession;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Raw KV operations on serialized sessions
#[async_trait]
pub trait SessionKv: Send + Sync {
    async fn get(&self, call_id: &str) -> Result<Option<String>, PersistenceError>;
    async fn set(&self, call_id: &str, body: &str, ttl: Duration) -> Result<(), PersistenceError>;
    async fn delete(&self, call_id: &str) -> Result<(), PersistenceError>;
    async fn probe(&self) -> Result<(), PersistenceError>;
}

/// ScyllaDB-backed KV with per-write TTL
#[derive(Clone)]
pub struct ScyllaSessionKv {
    client: ScyllaClient,
}

impl ScyllaSessionKv {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SessionKv for ScyllaSessionKv {
    async fn get(&self, call_id: &str) -> Result<Option<String>, PersistenceError> {
        let query = format!(
            "SELECT body FROM {}.call_sessions WHERE call_id = ?",
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(query, (call_id,))
            .await?;

        if let Some(rows) = result.rows {
            if let Some(row) = rows.into_iter().next() {
                let (body,): (String,) = row
                    .into_typed()
                    .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;
                return Ok(Some(body));
            }
        }
        Ok(None)
    }

    async fn set(&self, call_id: &str, body: &str, ttl: Duration) -> Result<(), PersistenceError> {
        let query = format!(
            "INSERT INTO {}.call_sessions (call_id, body) VALUES (?, ?) USING TTL ?",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(query, (call_id, body, ttl.as_secs() as i32))
            .await?;
        Ok(())
    }

    async fn delete(&self, call_id: &str) -> Result<(), PersistenceError> {
        let query = format!(
            "DELETE FROM {}.call_sessions WHERE call_id = ?",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(query, (call_id,))
            .await?;
        Ok(())
    }

    async fn probe(&self) -> Result<(), PersistenceError> {
        self.client
            .session()
            .query_unpaged("SELECT release_version FROM system.local", &[])
            .await?;
        Ok(())
    }
}

/// In-memory KV honoring TTL; used in tests and single-process deployments
#[derive(Default)]
pub struct InMemorySessionKv {
    entries: Mutex<HashMap<String, (String, Instant, Duration)>>,
}

impl InMemorySessionKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionKv for InMemorySessionKv {
    async fn get(&self, call_id: &str) -> Result<Option<String>, PersistenceError> {
        let mut entries = self.entries.lock();
        if let Some((body, stored, ttl)) = entries.get(call_id) {
            if stored.elapsed() <= *ttl {
                return Ok(Some(body.clone()));
            }
            entries.remove(call_id);
        }
        Ok(None)
    }

    async fn set(&self, call_id: &str, body: &str, ttl: Duration) -> Result<(), PersistenceError> {
        self.entries
            .lock()
            .insert(call_id.to_string(), (body.to_string(), Instant::now(), ttl));
        Ok(())
    }

    async fn delete(&self, call_id: &str) -> Result<(), PersistenceError> {
        self.entries.lock().remove(call_id);
        Ok(())
    }

    async fn probe(&self) -> Result<(), PersistenceError> {
        Ok(())
    }
}

/// Tuning for the cached store
#[derive(Debug, Clone)]
pub struct SessionStoreConfig {
    /// TTL written to the KV
    pub kv_ttl: Duration,
    /// Max entries in the local cache
    pub cache_size: usize,
    /// Local cache entry TTL
    pub cache_ttl: Duration,
    /// KV must have answered within this window for health() to be true
    pub health_window: Duration,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            kv_ttl: Duration::from_secs(3600),
            cache_size: 1000,
            cache_ttl: Duration::from_secs(300),
            health_window: Duration::from_secs(15),
        }
    }
}

struct CacheEntry {
    session: CallSession,
    stored_at: Instant,
    last_used: Instant,
}

/// The session store used by the rest of the system
pub struct CachedSessionStore {
    kv: Option<Arc<dyn SessionKv>>,
    cache: Mutex<HashMap<String, CacheEntry>>,
    fallback: Mutex<HashMap<String, CallSession>>,
    degraded: AtomicBool,
    last_kv_ok: Mutex<Option<Instant>>,
    config: SessionStoreConfig,
}

impl CachedSessionStore {
    pub fn new(kv: Option<Arc<dyn SessionKv>>, config: SessionStoreConfig) -> Self {
        Self {
            kv,
            cache: Mutex::new(HashMap::new()),
            fallback: Mutex::new(HashMap::new()),
            degraded: AtomicBool::new(false),
            last_kv_ok: Mutex::new(None),
            config,
        }
    }

    /// In-memory only, no shared KV
    pub fn in_memory(config: SessionStoreConfig) -> Self {
        Self::new(None, config)
    }

    /// Sub-millisecond local read, KV on miss, fallback map on KV error
    pub async fn get(&self, call_id: &str) -> Option<CallSession> {
        {
            let mut cache = self.cache.lock();
            if let Some(entry) = cache.get_mut(call_id) {
                if entry.stored_at.elapsed() <= self.config.cache_ttl {
                    entry.last_used = Instant::now();
                    return Some(entry.session.clone());
                }
                cache.remove(call_id);
            }
        }

        if let Some(kv) = &self.kv {
            match kv.get(call_id).await {
                Ok(Some(body)) => {
                    self.note_kv_ok();
                    match serde_json::from_str::<CallSession>(&body) {
                        Ok(session) => {
                            self.insert_cache(call_id, &session);
                            return Some(session);
                        }
                        Err(e) => {
                            tracing::warn!(call_id, error = %e, "Corrupt session body in KV");
                            return None;
                        }
                    }
                }
                Ok(None) => {
                    self.note_kv_ok();
                    return None;
                }
                Err(e) => {
                    self.note_kv_error(&e);
                    return self.fallback.lock().get(call_id).cloned();
                }
            }
        }

        self.fallback.lock().get(call_id).cloned()
    }

    /// Write-through to the local cache and the KV; on KV error the session
    /// also lands in the in-process fallback map so it is never lost within
    /// this process.
    pub async fn set(&self, session: &CallSession) {
        self.insert_cache(&session.call_id, session);

        if let Some(kv) = &self.kv {
            match serde_json::to_string(session) {
                Ok(body) => match kv.set(&session.call_id, &body, self.config.kv_ttl).await {
                    Ok(()) => self.note_kv_ok(),
                    Err(e) => {
                        self.note_kv_error(&e);
                        self.fallback
                            .lock()
                            .insert(session.call_id.clone(), session.clone());
                    }
                },
                Err(e) => {
                    tracing::error!(call_id = %session.call_id, error = %e, "Session serialize failed");
                }
            }
        } else {
            self.fallback
                .lock()
                .insert(session.call_id.clone(), session.clone());
        }
    }

    /// Remove from every layer
    pub async fn delete(&self, call_id: &str) {
        self.cache.lock().remove(call_id);
        self.fallback.lock().remove(call_id);
        if let Some(kv) = &self.kv {
            if let Err(e) = kv.delete(call_id).await {
                self.note_kv_error(&e);
            } else {
                self.note_kv_ok();
            }
        }
    }

    /// Whether the KV answered within the health window
    pub fn health(&self) -> bool {
        match *self.last_kv_ok.lock() {
            Some(at) => at.elapsed() <= self.config.health_window,
            None => false,
        }
    }

    /// Active probe, recorded toward health()
    pub async fn probe(&self) -> bool {
        if let Some(kv) = &self.kv {
            match kv.probe().await {
                Ok(()) => {
                    self.note_kv_ok();
                    true
                }
                Err(e) => {
                    self.note_kv_error(&e);
                    false
                }
            }
        } else {
            false
        }
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }

    fn insert_cache(&self, call_id: &str, session: &CallSession) {
        let mut cache = self.cache.lock();
        let now = Instant::now();
        cache.insert(
            call_id.to_string(),
            CacheEntry {
                session: session.clone(),
                stored_at: now,
                last_used: now,
            },
        );

        if cache.len() > self.config.cache_size {
            // Expired entries first, then least recently used
            let ttl = self.config.cache_ttl;
            cache.retain(|_, e| e.stored_at.elapsed() <= ttl);
            while cache.len() > self.config.cache_size {
                let oldest = cache
                    .iter()
                    .min_by_key(|(_, e)| e.last_used)
                    .map(|(k, _)| k.clone());
                match oldest {
                    Some(key) => {
                        cache.remove(&key);
                    }
                    None => break,
                }
            }
        }
    }

    fn note_kv_ok(&self) {
        *self.last_kv_ok.lock() = Some(Instant::now());
        if self.degraded.swap(false, Ordering::Relaxed) {
            tracing::info!("Session KV recovered, leaving single-process mode");
        }
    }

    fn note_kv_error(&self, error: &PersistenceError) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            tracing::warn!(%error, "Session KV unavailable, degrading to single-process mode");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingKv;

    #[async_trait]
    impl SessionKv for FailingKv {
        async fn get(&self, _: &str) -> Result<Option<String>, PersistenceError> {
            Err(PersistenceError::Unavailable("down".to_string()))
        }
        async fn set(&self, _: &str, _: &str, _: Duration) -> Result<(), PersistenceError> {
            Err(PersistenceError::Unavailable("down".to_string()))
        }
        async fn delete(&self, _: &str) -> Result<(), PersistenceError> {
            Err(PersistenceError::Unavailable("down".to_string()))
        }
        async fn probe(&self) -> Result<(), PersistenceError> {
            Err(PersistenceError::Unavailable("down".to_string()))
        }
    }

    fn session(call_id: &str) -> CallSession {
        CallSession::new(call_id, "+15550001111", "+15559990000", "default")
    }

    #[tokio::test]
    async fn set_get_delete_round_trip() {
        let store = CachedSessionStore::new(
            Some(Arc::new(InMemorySessionKv::new())),
            SessionStoreConfig::default(),
        );

        let s = session("CA1");
        store.set(&s).await;
        let loaded = store.get("CA1").await.unwrap();
        assert_eq!(loaded.call_id, "CA1");
        assert_eq!(loaded.caller_phone, s.caller_phone);

        store.delete("CA1").await;
        assert!(store.get("CA1").await.is_none());
    }

    #[tokio::test]
    async fn kv_miss_falls_through_the_cache() {
        let kv = Arc::new(InMemorySessionKv::new());
        let store = CachedSessionStore::new(Some(kv.clone()), SessionStoreConfig::default());

        let s = session("CA2");
        store.set(&s).await;

        // Simulate a second process reading through the KV: clear the cache
        store.cache.lock().clear();
        let loaded = store.get("CA2").await.unwrap();
        assert_eq!(loaded.call_id, "CA2");
    }

    #[tokio::test]
    async fn kv_failure_degrades_to_in_process_map() {
        let store = CachedSessionStore::new(
            Some(Arc::new(FailingKv)),
            SessionStoreConfig {
                cache_ttl: Duration::from_millis(0),
                ..SessionStoreConfig::default()
            },
        );

        let s = session("CA3");
        store.set(&s).await;

        // Cache is immediately stale, so the read goes KV → fallback
        let loaded = store.get("CA3").await.unwrap();
        assert_eq!(loaded.call_id, "CA3");
        assert!(!store.health());
    }

    #[tokio::test]
    async fn in_memory_mode_works_without_a_kv() {
        let store = CachedSessionStore::in_memory(SessionStoreConfig {
            cache_ttl: Duration::from_millis(0),
            ..SessionStoreConfig::default()
        });
        let s = session("CA4");
        store.set(&s).await;
        assert!(store.get("CA4").await.is_some());
        assert!(!store.health());
    }

    #[tokio::test]
    async fn cache_stays_bounded() {
        let store = CachedSessionStore::new(
            Some(Arc::new(InMemorySessionKv::new())),
            SessionStoreConfig {
                cache_size: 10,
                ..SessionStoreConfig::default()
            },
        );
        for i in 0..50 {
            store.set(&session(&format!("CA{i}"))).await;
        }
        assert!(store.cached_len() <= 10);
        // The most recent write is still cached
        assert!(store.get("CA49").await.is_some());
    }

    #[tokio::test]
    async fn health_reflects_probe_results() {
        let store = CachedSessionStore::new(
            Some(Arc::new(InMemorySessionKv::new())),
            SessionStoreConfig::default(),
        );
        assert!(!store.health());
        assert!(store.probe().await);
        assert!(store.health());
    }
}
