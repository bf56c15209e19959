//! # Rate-Limited Model Gateway
//!
//! Every outbound embedding/generation call goes through one shared
//! [`ModelGateway`], which enforces a process-wide minimum interval between
//! backend calls, a bounded per-call timeout, and a small bounded retry count
//! for transient failures. The gateway must be a single shared instance: two
//! independently throttled gateways would double the effective rate.

use crate::{
    errors::ProviderError,
    history::ChatMessage,
    providers::ai::{AiProvider, Embedder},
};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, info, warn};

/// Default bound on a single backend call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(90);

/// Default number of retries after a transient failure.
pub const DEFAULT_MAX_RETRIES: u32 = 1;

/// Throughput is logged every this many calls.
const LOG_EVERY_CALLS: u64 = 5;

struct LimiterState {
    last_call: Option<Instant>,
    calls: u64,
    started: Instant,
}

/// Process-wide minimum-interval throttle.
///
/// The check-and-update of the last-call timestamp happens under one lock,
/// so concurrent callers are serialized and each observes the interval.
pub struct RateLimiter {
    min_interval: Duration,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(calls_per_minute: u32) -> Self {
        let min_interval = Duration::from_secs_f64(60.0 / calls_per_minute.max(1) as f64);
        info!(
            calls_per_minute,
            interval_secs = min_interval.as_secs_f64(),
            "rate limiter initialized"
        );
        Self {
            min_interval,
            state: Mutex::new(LimiterState {
                last_call: None,
                calls: 0,
                started: Instant::now(),
            }),
        }
    }

    /// Suspends the caller until the minimum interval since the previous
    /// call has elapsed, then records this call.
    pub async fn throttle(&self) {
        let mut state = self.state.lock().await;
        if let Some(last) = state.last_call {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!(wait_secs = wait.as_secs_f64(), "rate limit: sleeping");
                tokio::time::sleep(wait).await;
            }
        }
        state.last_call = Some(Instant::now());
        state.calls += 1;
        if state.calls % LOG_EVERY_CALLS == 0 {
            let elapsed_min = state.started.elapsed().as_secs_f64() / 60.0;
            let rate = if elapsed_min > 0.0 {
                state.calls as f64 / elapsed_min
            } else {
                0.0
            };
            info!(calls = state.calls, rate_per_min = rate, "model gateway throughput");
        }
    }
}

/// The single entry point for all embedding and generation calls.
pub struct ModelGateway {
    ai: Arc<dyn AiProvider>,
    embedder: Arc<dyn Embedder>,
    limiter: Arc<RateLimiter>,
    call_timeout: Duration,
    max_retries: u32,
}

impl ModelGateway {
    pub fn new(ai: Arc<dyn AiProvider>, embedder: Arc<dyn Embedder>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            ai,
            embedder,
            limiter,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, ProviderError> {
        self.with_retries(|| self.ai.generate(system_prompt, user_prompt))
            .await
    }

    pub async fn generate_with_history(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
        user_prompt: &str,
    ) -> Result<String, ProviderError> {
        self.with_retries(|| self.ai.generate_with_history(system_prompt, history, user_prompt))
            .await
    }

    pub async fn embed(&self, input: &str) -> Result<Vec<f32>, ProviderError> {
        self.with_retries(|| self.embedder.embed(input)).await
    }

    /// Throttles, bounds, and retries one backend operation. Only transient
    /// errors are retried; everything else surfaces immediately.
    async fn with_retries<T, F, Fut>(&self, mut operation: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 0;
        loop {
            self.limiter.throttle().await;
            let error = match tokio::time::timeout(self.call_timeout, operation()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => ProviderError::Timeout(self.call_timeout),
            };
            if attempt >= self.max_retries || !error.is_transient() {
                return Err(error);
            }
            attempt += 1;
            warn!(attempt, error = %error, "transient backend failure, retrying");
        }
    }
}

impl std::fmt::Debug for ModelGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelGateway")
            .field("call_timeout", &self.call_timeout)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}
