//! Flood limits
//!
//! Per-caller sliding-window call limit. The per-call wall-clock cap is
//! enforced by the bridge itself; this module only answers "may this caller
//! start another call right now".

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum RateLimitError {
    #[error("caller {caller} exceeded {limit} calls per {window_secs}s")]
    TooManyCalls {
        caller: String,
        limit: u32,
        window_secs: u64,
    },
}

/// Per-caller sliding-window limiter
pub struct CallRateLimiter {
    limit: u32,
    window: Duration,
    calls: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl CallRateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Record an inbound call attempt. Err means refuse and hang up.
    pub fn check_call(&self, caller: &str) -> Result<(), RateLimitError> {
        let now = Instant::now();
        let mut calls = self.calls.lock();
        let history = calls.entry(caller.to_string()).or_default();

        while let Some(front) = history.front() {
            if now.duration_since(*front) > self.window {
                history.pop_front();
            } else {
                break;
            }
        }

        if history.len() >= self.limit as usize {
            tracing::warn!(caller, limit = self.limit, "Caller rate limit exceeded");
            return Err(RateLimitError::TooManyCalls {
                caller: caller.to_string(),
                limit: self.limit,
                window_secs: self.window.as_secs(),
            });
        }

        history.push_back(now);
        Ok(())
    }

    /// Drop callers whose entire history has aged out
    pub fn prune(&self) {
        let now = Instant::now();
        self.calls
            .lock()
            .retain(|_, history| match history.back() {
                Some(last) => now.duration_since(*last) <= self.window,
                None => false,
            });
    }

    pub fn tracked_callers(&self) -> usize {
        self.calls.lock().len()
    }
}
