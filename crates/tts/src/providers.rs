//! TTS providers
//!
//! Streaming providers return PCM16 at 24 kHz over a channel; the engine
//! converts to telephony framing. The built-in provider returns a marker so
//! the caller emits an announcement tag instead of raw audio.

use async_trait::async_trait;
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Error)]
pub enum TtsError {
    #[error("provider error: {0}")]
    Provider(String),

    #[error("no provider produced audio")]
    AllProvidersFailed,
}

/// A single TTS backend
#[async_trait]
pub trait TtsProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Synthesize `text`, streaming PCM16 little-endian 24 kHz bytes into
    /// `audio`. Returns once the provider's stream ends.
    async fn synthesize(&self, text: &str, audio: mpsc::Sender<Vec<u8>>) -> Result<(), TtsError>;

    /// Built-in telephony voice; no audio is produced, the engine emits an
    /// announcement marker instead.
    fn is_builtin(&self) -> bool {
        false
    }
}

/// HTTP streaming provider (premium and secondary tiers)
pub struct HttpTtsProvider {
    name: String,
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    voice: String,
}

impl HttpTtsProvider {
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        voice: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            voice: voice.into(),
        }
    }
}

#[async_trait]
impl TtsProvider for HttpTtsProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn synthesize(&self, text: &str, audio: mpsc::Sender<Vec<u8>>) -> Result<(), TtsError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "text": text,
                "voice": self.voice,
                "output_format": "pcm_24000",
            }))
            .send()
            .await
            .map_err(|e| TtsError::Provider(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TtsError::Provider(format!("status {}", response.status())));
        }

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| TtsError::Provider(e.to_string()))?;
            if audio.send(chunk.to_vec()).await.is_err() {
                // Receiver hung up (barge-in); stop pulling bytes
                break;
            }
        }
        Ok(())
    }
}

/// Built-in telephony TTS marker provider; always last in the chain
pub struct BuiltinSayProvider;

#[async_trait]
impl TtsProvider for BuiltinSayProvider {
    fn name(&self) -> &str {
        "builtin"
    }

    async fn synthesize(&self, _text: &str, _audio: mpsc::Sender<Vec<u8>>) -> Result<(), TtsError> {
        Ok(())
    }

    fn is_builtin(&self) -> bool {
        true
    }
}
