//! External integrations
//!
//! The notification collaborator is a fire-and-forget transactional HTTP
//! provider. Failures never roll back the business effect that triggered
//! them; they are logged and surfaced as `confirmation_sent = false`.

use async_trait::async_trait;
use hvac_voice_resilience::CircuitBreaker;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IntegrationError {
    #[error("notification provider error: {0}")]
    Provider(String),

    #[error("dependency unavailable: {0}")]
    Unavailable(String),
}

/// What a notification is about; the provider template is chosen from this
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    BookingConfirmation,
    EmergencyAlert,
    LeadAlert,
    OperatorSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub subject: String,
    pub body: String,
    /// Phone or email of the recipient when known
    pub recipient: Option<String>,
}

/// Outbound notification channel
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<(), IntegrationError>;
}

/// HTTP gateway to the transactional provider, protected by a breaker and
/// retried once on transient failure.
pub struct HttpNotificationGateway {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    breaker: Arc<CircuitBreaker>,
}

impl HttpNotificationGateway {
    pub fn new(endpoint: String, api_key: String, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
            endpoint,
            api_key,
            breaker,
        }
    }

    async fn post_once(&self, notification: &Notification) -> Result<(), IntegrationError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(notification)
            .send()
            .await
            .map_err(|e| IntegrationError::Provider(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(IntegrationError::Provider(format!(
                "status {}",
                response.status()
            )))
        }
    }
}

#[async_trait]
impl NotificationGateway for HttpNotificationGateway {
    async fn send(&self, notification: Notification) -> Result<(), IntegrationError> {
        if !self.breaker.can_execute() {
            return Err(IntegrationError::Unavailable(
                self.breaker.name().to_string(),
            ));
        }

        // Two attempts with a short backoff, then give up
        for attempt in 0..2 {
            match self.post_once(&notification).await {
                Ok(()) => {
                    self.breaker.record_success();
                    return Ok(());
                }
                Err(e) if attempt == 0 => {
                    tracing::debug!(error = %e, "Notification attempt failed, retrying");
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
                Err(e) => {
                    self.breaker.record_failure();
                    tracing::warn!(kind = ?notification.kind, error = %e, "Notification failed");
                    return Err(e);
                }
            }
        }
        unreachable!("loop returns on both arms")
    }
}

/// Records notifications instead of sending them; used by tests and as the
/// default when no provider is configured.
#[derive(Default)]
pub struct StubNotificationGateway {
    sent: Mutex<Vec<Notification>>,
}

impl StubNotificationGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl NotificationGateway for StubNotificationGateway {
    async fn send(&self, notification: Notification) -> Result<(), IntegrationError> {
        tracing::info!(kind = ?notification.kind, subject = %notification.subject, "Notification (stub)");
        self.sent.lock().push(notification);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_records_what_was_sent() {
        let gateway = StubNotificationGateway::new();
        gateway
            .send(Notification {
                kind: NotificationKind::BookingConfirmation,
                subject: "Booked".to_string(),
                body: "See you Monday".to_string(),
                recipient: Some("+15551234567".to_string()),
            })
            .await
            .unwrap();

        let sent = gateway.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, NotificationKind::BookingConfirmation);
    }
}
