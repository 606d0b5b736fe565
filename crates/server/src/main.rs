//! HVAC voice agent server entry point

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hvac_voice_config::{load_settings, Settings};
use hvac_voice_persistence::{PersistenceLayer, ScyllaConfig, SessionStoreConfig};
use hvac_voice_resilience::{BreakerRegistry, CircuitBreaker, CircuitBreakerConfig};
use hvac_voice_server::{create_router, AppState};
use hvac_voice_tools::{HttpNotificationGateway, NotificationGateway, StubNotificationGateway};
use hvac_voice_tts::{BuiltinSayProvider, HttpTtsProvider, TtsEngine, TtsProvider};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = std::env::var("HVAC_VOICE_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Warning: failed to load config: {e}. Using defaults.");
            Settings::default()
        }
    };

    init_tracing();
    tracing::info!("Starting HVAC voice agent v{}", env!("CARGO_PKG_VERSION"));

    // Process-level configuration problems fail fast
    if let Err(e) = settings.validate() {
        tracing::error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }

    let metrics_handle = init_metrics();

    // Row store and session KV: shared store when configured, in-memory
    // single-process mode otherwise.
    let session_config = SessionStoreConfig {
        kv_ttl: Duration::from_secs(settings.session.kv_ttl_seconds),
        cache_size: settings.session.cache_size,
        cache_ttl: Duration::from_secs(settings.session.cache_ttl_seconds),
        ..SessionStoreConfig::default()
    };
    let persistence = match &settings.session.kv_url {
        Some(url) => {
            let scylla = ScyllaConfig::from_url(url, &settings.session.kv_keyspace);
            match hvac_voice_persistence::init(scylla, session_config.clone()).await {
                Ok(layer) => {
                    tracing::info!(url, "Shared session store connected");
                    Arc::new(layer)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Shared store unavailable, using in-memory stores");
                    Arc::new(PersistenceLayer::in_memory(session_config))
                }
            }
        }
        None => {
            tracing::info!("No KV configured, using in-memory stores");
            Arc::new(PersistenceLayer::in_memory(session_config))
        }
    };

    let breaker_config = CircuitBreakerConfig {
        failure_threshold: settings.breaker.threshold,
        recovery_timeout: Duration::from_secs(settings.breaker.recovery_seconds),
        half_open_successes: settings.breaker.half_open_successes,
    };

    let notifications = build_notifications(&breaker_config);
    let tts = build_tts(&settings, breaker_config.clone());

    let state = AppState::new(settings, persistence, notifications, tts, Some(metrics_handle));
    let maintenance = state.start_maintenance_task();

    let addr: SocketAddr = format!(
        "{}:{}",
        state.settings.server.host, state.settings.server.port
    )
    .parse()?;
    tracing::info!(%addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, create_router(state)).await?;

    maintenance.abort();
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "hvac_voice=info,tower_http=info".into());

    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("metrics recorder installs once")
}

/// The transactional notification provider, or the logging stub when no
/// endpoint is configured.
fn build_notifications(breaker_config: &CircuitBreakerConfig) -> Arc<dyn NotificationGateway> {
    match std::env::var("NOTIFY_URL") {
        Ok(endpoint) if !endpoint.is_empty() => {
            let api_key = std::env::var("NOTIFY_API_KEY").unwrap_or_default();
            let breaker = Arc::new(CircuitBreaker::new("notify", breaker_config.clone()));
            tracing::info!(endpoint, "Notification gateway configured");
            Arc::new(HttpNotificationGateway::new(endpoint, api_key, breaker))
        }
        _ => {
            tracing::info!("No notification endpoint configured, using stub");
            Arc::new(StubNotificationGateway::new())
        }
    }
}

/// TTS chain in configured order, always ending with the built-in voice
fn build_tts(settings: &Settings, breaker_config: CircuitBreakerConfig) -> Arc<TtsEngine> {
    let mut providers: Vec<Arc<dyn TtsProvider>> = Vec::new();
    for name in &settings.tts.providers {
        let upper = name.to_uppercase();
        let endpoint = std::env::var(format!("TTS_{upper}_URL")).unwrap_or_default();
        let api_key = std::env::var(format!("TTS_{upper}_API_KEY")).unwrap_or_default();
        let voice = std::env::var(format!("TTS_{upper}_VOICE")).unwrap_or_default();
        if endpoint.is_empty() {
            tracing::warn!(provider = %name, "TTS provider has no endpoint, skipping");
            continue;
        }
        providers.push(Arc::new(HttpTtsProvider::new(name, endpoint, api_key, voice)));
    }
    providers.push(Arc::new(BuiltinSayProvider));

    Arc::new(TtsEngine::new(
        providers,
        Arc::new(BreakerRegistry::new(breaker_config)),
        Duration::from_millis(settings.tts.timeout_ms),
    ))
}
