//! Shared rate limiting for LLM calls.
//!
//! Every pipeline task talks to the API through one [`ThrottledProvider`]:
//! a semaphore bounds the number of in-flight calls and a start-slot clock
//! keeps at least `delay` between two consecutive call starts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use super::litellm::{FragmentStream, GenerationRequest, GenerationResponse, LlmProvider};
use crate::config::ForgeConfig;
use crate::error::LlmError;

/// Rate-limited wrapper around any provider.
pub struct ThrottledProvider {
    inner: Arc<dyn LlmProvider>,
    permits: Arc<Semaphore>,
    next_start: Mutex<Instant>,
    delay: Duration,
    calls: AtomicU64,
}

impl ThrottledProvider {
    pub fn new(inner: Arc<dyn LlmProvider>, max_concurrent: usize, delay: Duration) -> Self {
        Self {
            inner,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            next_start: Mutex::new(Instant::now()),
            delay,
            calls: AtomicU64::new(0),
        }
    }

    pub fn from_config(inner: Arc<dyn LlmProvider>, config: &ForgeConfig) -> Self {
        Self::new(inner, config.max_concurrent_requests, config.request_delay)
    }

    /// Number of calls forwarded to the inner provider so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    async fn admit(&self) -> Result<OwnedSemaphorePermit, LlmError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| LlmError::RequestFailed(format!("Rate limiter closed: {e}")))?;

        // reserve a start slot, then sleep without holding the lock
        let start_at = {
            let mut next_start = self.next_start.lock().await;
            let slot = (*next_start).max(Instant::now());
            *next_start = slot + self.delay;
            slot
        };
        tokio::time::sleep_until(start_at).await;

        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::trace!(call, "LLM call admitted");
        Ok(permit)
    }
}

#[async_trait]
impl LlmProvider for ThrottledProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let _permit = self.admit().await?;
        self.inner.generate(request).await
    }

    async fn generate_stream(
        &self,
        request: GenerationRequest,
    ) -> Result<FragmentStream, LlmError> {
        let permit = self.admit().await?;
        let fragments = self.inner.generate_stream(request).await?;
        // the permit is released once the stream is dropped
        Ok(fragments
            .map(move |fragment| {
                let _held = &permit;
                fragment
            })
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::litellm::{Choice, Message, Usage};
    use std::sync::atomic::AtomicUsize;

    /// Records peak concurrency; each call takes `work` to complete.
    struct SlowProvider {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        work: Duration,
    }

    impl SlowProvider {
        fn new(work: Duration) -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                work,
            }
        }
    }

    #[async_trait]
    impl LlmProvider for SlowProvider {
        async fn generate(
            &self,
            _request: GenerationRequest,
        ) -> Result<GenerationResponse, LlmError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.work).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(GenerationResponse {
                id: "id".to_string(),
                model: "mock".to_string(),
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant("ok"),
                    finish_reason: Some("stop".to_string()),
                }],
                usage: Usage::default(),
            })
        }
    }

    #[tokio::test]
    async fn test_bounds_in_flight_calls() {
        let inner = Arc::new(SlowProvider::new(Duration::from_millis(30)));
        let throttled = Arc::new(ThrottledProvider::new(inner.clone(), 2, Duration::ZERO));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let throttled = throttled.clone();
                tokio::spawn(async move {
                    throttled
                        .generate(GenerationRequest::prompt("mock", "hi"))
                        .await
                })
            })
            .collect();
        for result in futures::future::join_all(handles).await {
            assert!(result.unwrap().is_ok());
        }

        assert!(inner.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(throttled.calls(), 6);
    }

    #[tokio::test]
    async fn test_spaces_call_starts() {
        let inner = Arc::new(SlowProvider::new(Duration::ZERO));
        let throttled = ThrottledProvider::new(inner, 4, Duration::from_millis(25));
        let start = std::time::Instant::now();

        for _ in 0..3 {
            throttled
                .generate(GenerationRequest::prompt("mock", "hi"))
                .await
                .unwrap();
        }

        // first call starts immediately, the next two wait one delay each
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_default_stream_is_single_fragment() {
        let inner = Arc::new(SlowProvider::new(Duration::ZERO));
        let throttled = ThrottledProvider::new(inner, 1, Duration::ZERO);

        let fragments: Vec<_> = throttled
            .generate_stream(GenerationRequest::prompt("mock", "hi"))
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].as_ref().unwrap(), "ok");
        // permit was released with the stream
        assert_eq!(throttled.permits.available_permits(), 1);
    }
}
