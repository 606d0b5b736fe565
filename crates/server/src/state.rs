//! Application state
//!
//! Shared services across all handlers. Everything is constructed once in
//! `main` and handed to handlers by reference; tests inject in-memory
//! fakes through the same constructors.

use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;

use hvac_voice_config::Settings;
use hvac_voice_persistence::PersistenceLayer;
use hvac_voice_resilience::{BreakerRegistry, CircuitBreakerConfig};
use hvac_voice_tools::{create_registry, NotificationGateway, ToolRegistry};
use hvac_voice_tts::TtsEngine;

use crate::supervisor::CallSupervisor;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub persistence: Arc<PersistenceLayer>,
    pub tools: Arc<ToolRegistry>,
    pub tts: Arc<TtsEngine>,
    pub breakers: Arc<BreakerRegistry>,
    pub notifications: Arc<dyn NotificationGateway>,
    pub supervisor: Arc<CallSupervisor>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        persistence: Arc<PersistenceLayer>,
        notifications: Arc<dyn NotificationGateway>,
        tts: Arc<TtsEngine>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let settings = Arc::new(settings);
        let breakers = Arc::new(BreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: settings.breaker.threshold,
            recovery_timeout: Duration::from_secs(settings.breaker.recovery_seconds),
            half_open_successes: settings.breaker.half_open_successes,
        }));
        let tools = Arc::new(create_registry(
            &persistence,
            notifications.clone(),
            Duration::from_secs(settings.limits.tool_timeout_seconds),
        ));
        let supervisor = Arc::new(CallSupervisor::new(
            settings.clone(),
            persistence.clone(),
            notifications.clone(),
        ));

        Self {
            settings,
            persistence,
            tools,
            tts,
            breakers,
            notifications,
            supervisor,
            metrics,
        }
    }

    /// Periodic housekeeping: KV health probe and rate-limiter pruning
    pub fn start_maintenance_task(&self) -> tokio::task::JoinHandle<()> {
        let state = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let healthy = state.persistence.sessions.probe().await;
                metrics::gauge!("session_kv_healthy").set(if healthy { 1.0 } else { 0.0 });
                state.supervisor.prune_rate_limiter();
            }
        })
    }
}
