//! HTTP/WS server and call supervisor for the HVAC voice agent

pub mod error;
pub mod http;
pub mod state;
pub mod stream;
pub mod supervisor;

pub use error::ServerError;
pub use state::AppState;
pub use supervisor::{CallSummary, CallSupervisor};

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the full router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/voice/incoming", post(http::incoming))
        .route("/voice/turn", post(http::turn))
        .route("/voice/status", post(http::status))
        .route("/voice/stream", get(stream::stream))
        .route("/health", get(http::health))
        .route("/metrics", get(http::metrics_endpoint))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
