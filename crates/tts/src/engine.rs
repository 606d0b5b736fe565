//! TTS fallback engine
//!
//! Tries providers in an order determined by preference and current health,
//! enforces a first-byte deadline, converts provider PCM to μ-law frames,
//! and honours a cancellation token between frames so barge-in stops an
//! utterance within one frame (~20 ms).

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use hvac_voice_config::TtsPreference;
use hvac_voice_core::{pcm16_24k_to_ulaw8k, FrameChunker, ULAW_FRAME_BYTES};
use hvac_voice_resilience::BreakerRegistry;

use crate::providers::TtsProvider;

/// μ-law code for a zero sample, used to pad the final short frame
const ULAW_SILENCE: u8 = 0xFF;

/// What the engine emits to its sink
#[derive(Debug, Clone, PartialEq)]
pub enum TtsChunk {
    /// One complete 160-byte μ-law frame
    Frame(Vec<u8>),
    /// Use the telephony built-in voice for this text
    Announce(String),
}

#[derive(Debug, Clone, Default)]
struct ProviderHealth {
    consecutive_failures: u32,
    /// EWMA of time-to-first-byte in milliseconds
    latency_ms: Option<f64>,
}

/// Ordered multi-provider TTS
pub struct TtsEngine {
    providers: Vec<Arc<dyn TtsProvider>>,
    health: Mutex<HashMap<String, ProviderHealth>>,
    breakers: Arc<BreakerRegistry>,
    first_byte_timeout: Duration,
}

impl TtsEngine {
    pub fn new(
        providers: Vec<Arc<dyn TtsProvider>>,
        breakers: Arc<BreakerRegistry>,
        first_byte_timeout: Duration,
    ) -> Self {
        Self {
            providers,
            health: Mutex::new(HashMap::new()),
            breakers,
            first_byte_timeout,
        }
    }

    /// Provider order for this utterance
    fn ordered(&self, preference: TtsPreference) -> Vec<Arc<dyn TtsProvider>> {
        let health = self.health.lock();
        let mut indexed: Vec<(usize, Arc<dyn TtsProvider>)> =
            self.providers.iter().cloned().enumerate().collect();

        match preference {
            // Configured order is the quality order
            TtsPreference::Best => {}
            TtsPreference::Fast => {
                indexed.sort_by(|(ia, a), (ib, b)| {
                    let la = health
                        .get(a.name())
                        .and_then(|h| h.latency_ms)
                        .unwrap_or(f64::MAX);
                    let lb = health
                        .get(b.name())
                        .and_then(|h| h.latency_ms)
                        .unwrap_or(f64::MAX);
                    la.partial_cmp(&lb).unwrap_or(std::cmp::Ordering::Equal).then(ia.cmp(ib))
                });
            }
            TtsPreference::Reliable => {
                indexed.sort_by(|(ia, a), (ib, b)| {
                    let fa = health
                        .get(a.name())
                        .map(|h| h.consecutive_failures)
                        .unwrap_or(0);
                    let fb = health
                        .get(b.name())
                        .map(|h| h.consecutive_failures)
                        .unwrap_or(0);
                    fa.cmp(&fb).then(ia.cmp(ib))
                });
            }
        }

        indexed.into_iter().map(|(_, p)| p).collect()
    }

    fn record_success(&self, name: &str, first_byte: Duration) {
        let mut health = self.health.lock();
        let entry = health.entry(name.to_string()).or_default();
        entry.consecutive_failures = 0;
        let sample = first_byte.as_millis() as f64;
        entry.latency_ms = Some(match entry.latency_ms {
            Some(prev) => prev * 0.7 + sample * 0.3,
            None => sample,
        });
        self.breakers.get(&format!("tts:{name}")).record_success();
    }

    fn record_failure(&self, name: &str) {
        let mut health = self.health.lock();
        health
            .entry(name.to_string())
            .or_default()
            .consecutive_failures += 1;
        self.breakers.get(&format!("tts:{name}")).record_failure();
    }

    /// Speak `text` into `sink`. Returns true once audio (or the built-in
    /// marker) was delivered, false when every provider failed.
    pub async fn speak(
        &self,
        text: &str,
        sink: &mpsc::Sender<TtsChunk>,
        preference: TtsPreference,
        cancel: &CancellationToken,
    ) -> bool {
        for provider in self.ordered(preference) {
            if cancel.is_cancelled() {
                return true;
            }

            if provider.is_builtin() {
                let _ = sink.send(TtsChunk::Announce(text.to_string())).await;
                return true;
            }

            if !self.breakers.get(&format!("tts:{}", provider.name())).can_execute() {
                tracing::debug!(provider = provider.name(), "TTS breaker open, skipping");
                continue;
            }

            match self
                .speak_with_provider(provider.clone(), text, sink, cancel)
                .await
            {
                Ok(first_byte) => {
                    self.record_success(provider.name(), first_byte);
                    return true;
                }
                Err(e) => {
                    self.record_failure(provider.name());
                    tracing::warn!(
                        provider = provider.name(),
                        error = %e,
                        "TTS provider failed, trying next"
                    );
                }
            }
        }

        tracing::error!("All TTS providers failed");
        false
    }

    async fn speak_with_provider(
        &self,
        provider: Arc<dyn TtsProvider>,
        text: &str,
        sink: &mpsc::Sender<TtsChunk>,
        cancel: &CancellationToken,
    ) -> Result<Duration, String> {
        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(32);
        let started = Instant::now();

        // The provider task owns the HTTP stream; dropping audio_rx aborts it
        let text_owned = text.to_string();
        let synth =
            tokio::spawn(async move { provider.synthesize(&text_owned, audio_tx).await });

        // First-byte deadline; on exceed, drop the provider and move on
        let first = match tokio::time::timeout(self.first_byte_timeout, audio_rx.recv()).await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                synth.abort();
                return Err("stream ended with no audio".to_string());
            }
            Err(_) => {
                synth.abort();
                return Err(format!(
                    "no audio within {} ms",
                    self.first_byte_timeout.as_millis()
                ));
            }
        };
        let first_byte = started.elapsed();

        let mut chunker = FrameChunker::new(ULAW_FRAME_BYTES);
        let mut pending = Some(first);
        loop {
            let chunk = match pending.take() {
                Some(c) => Some(c),
                None => audio_rx.recv().await,
            };
            let Some(pcm) = chunk else { break };

            let ulaw = pcm16_24k_to_ulaw8k(&pcm).map_err(|e| e.to_string())?;
            for frame in chunker.push(&ulaw) {
                if cancel.is_cancelled() {
                    synth.abort();
                    return Ok(first_byte);
                }
                if sink.send(TtsChunk::Frame(frame)).await.is_err() {
                    synth.abort();
                    return Ok(first_byte);
                }
            }
        }

        // Pad the trailing partial frame with silence
        let mut residual = chunker.take_residual();
        if !residual.is_empty() && !cancel.is_cancelled() {
            residual.resize(ULAW_FRAME_BYTES, ULAW_SILENCE);
            let _ = sink.send(TtsChunk::Frame(residual)).await;
        }

        match synth.await {
            Ok(Ok(())) => Ok(first_byte),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("synthesis task aborted".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{BuiltinSayProvider, TtsError, TtsProvider};
    use async_trait::async_trait;
    use hvac_voice_resilience::CircuitBreakerConfig;

    struct FakeProvider {
        name: String,
        /// PCM bytes pushed per chunk
        chunks: Vec<Vec<u8>>,
        fail: bool,
    }

    #[async_trait]
    impl TtsProvider for FakeProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn synthesize(
            &self,
            _text: &str,
            audio: mpsc::Sender<Vec<u8>>,
        ) -> Result<(), TtsError> {
            if self.fail {
                return Err(TtsError::Provider("down".to_string()));
            }
            for chunk in &self.chunks {
                if audio.send(chunk.clone()).await.is_err() {
                    break;
                }
            }
            Ok(())
        }
    }

    fn breakers() -> Arc<BreakerRegistry> {
        Arc::new(BreakerRegistry::new(CircuitBreakerConfig::default()))
    }

    /// 480 PCM16 samples at 24 kHz → one 160-byte μ-law frame
    fn pcm_for_one_frame() -> Vec<u8> {
        vec![0u8; 480 * 2]
    }

    #[tokio::test]
    async fn emits_complete_frames_from_provider_pcm() {
        let engine = TtsEngine::new(
            vec![Arc::new(FakeProvider {
                name: "premium".to_string(),
                chunks: vec![pcm_for_one_frame(), pcm_for_one_frame()],
                fail: false,
            })],
            breakers(),
            Duration::from_millis(500),
        );

        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        assert!(engine.speak("hello", &tx, TtsPreference::Best, &cancel).await);
        drop(tx);

        let mut frames = 0;
        while let Some(chunk) = rx.recv().await {
            match chunk {
                TtsChunk::Frame(f) => {
                    assert_eq!(f.len(), ULAW_FRAME_BYTES);
                    frames += 1;
                }
                TtsChunk::Announce(_) => panic!("unexpected announce"),
            }
        }
        assert_eq!(frames, 2);
    }

    #[tokio::test]
    async fn falls_back_to_the_next_provider() {
        let engine = TtsEngine::new(
            vec![
                Arc::new(FakeProvider {
                    name: "premium".to_string(),
                    chunks: vec![],
                    fail: true,
                }),
                Arc::new(FakeProvider {
                    name: "secondary".to_string(),
                    chunks: vec![pcm_for_one_frame()],
                    fail: false,
                }),
            ],
            breakers(),
            Duration::from_millis(500),
        );

        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        assert!(engine.speak("hello", &tx, TtsPreference::Best, &cancel).await);
        drop(tx);

        assert!(matches!(rx.recv().await, Some(TtsChunk::Frame(_))));
    }

    #[tokio::test]
    async fn builtin_emits_the_announce_marker() {
        let engine = TtsEngine::new(
            vec![
                Arc::new(FakeProvider {
                    name: "premium".to_string(),
                    chunks: vec![],
                    fail: true,
                }),
                Arc::new(BuiltinSayProvider),
            ],
            breakers(),
            Duration::from_millis(100),
        );

        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        assert!(engine.speak("one moment", &tx, TtsPreference::Best, &cancel).await);
        drop(tx);

        assert_eq!(
            rx.recv().await,
            Some(TtsChunk::Announce("one moment".to_string()))
        );
    }

    #[tokio::test]
    async fn cancellation_stops_mid_utterance() {
        // A long utterance: 50 frames worth of PCM
        let chunks: Vec<Vec<u8>> = (0..50).map(|_| pcm_for_one_frame()).collect();
        let engine = TtsEngine::new(
            vec![Arc::new(FakeProvider {
                name: "premium".to_string(),
                chunks,
                fail: false,
            })],
            breakers(),
            Duration::from_millis(500),
        );

        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        let speak = tokio::spawn({
            let tx = tx.clone();
            async move { engine.speak("long text", &tx, TtsPreference::Best, &cancel_clone).await }
        });
        drop(tx);

        // Take a couple of frames, then barge in
        let _ = rx.recv().await;
        let _ = rx.recv().await;
        cancel.cancel();

        assert!(speak.await.unwrap());
        let mut remaining = 0;
        while rx.recv().await.is_some() {
            remaining += 1;
        }
        assert!(remaining < 50, "cancellation did not stop the stream");
    }

    #[tokio::test]
    async fn all_providers_failing_returns_false() {
        let engine = TtsEngine::new(
            vec![Arc::new(FakeProvider {
                name: "premium".to_string(),
                chunks: vec![],
                fail: true,
            })],
            breakers(),
            Duration::from_millis(100),
        );

        let (tx, _rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        assert!(!engine.speak("hello", &tx, TtsPreference::Best, &cancel).await);
    }
}
