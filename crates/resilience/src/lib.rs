//! Resilience primitives
//!
//! Per-dependency circuit breakers and per-caller flood limits. Breakers are
//! process-local; there is no cross-process coordination.

pub mod breaker;
pub mod rate_limit;

pub use breaker::{BreakerRegistry, CircuitBreaker, CircuitBreakerConfig, CircuitState, BreakerStats};
pub use rate_limit::{CallRateLimiter, RateLimitError};
