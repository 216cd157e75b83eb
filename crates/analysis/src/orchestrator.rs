//! Analysis orchestration: gating, dispatch, retry, and bookkeeping
//!
//! The unit the application layer calls. Before any network traffic it
//! checks the circuit breaker and the primary quota; a rejection there costs
//! nothing. Each dispatched attempt is recorded against quota *before* the
//! call — attempts cost quota, not just successes — and the first attempt
//! always draws from the primary budget while every extra attempt draws from
//! the ring-fenced retry sub-budget.
//!
//! Concurrent `analyze()` calls serialize through a single-flight guard: the
//! persisted counters are whole-record overwrites and are not designed for
//! concurrent-increment races.

use std::time::Duration;

use tracing::{error, info, warn};
use vision::{AnalysisResult, ImagePayload};

use crate::backend::{AnalysisBackend, AnalysisOutcome};
use crate::breaker::{CircuitBreaker, CircuitState};
use crate::classify::{ClassifiedError, ErrorKind, classify};
use crate::quota::{QuotaManager, QuotaState};
use crate::store;

/// Retry policy knobs.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Extra attempts beyond the first.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Kinds eligible for automatic retry at all.
    pub retryable_kinds: Vec<ErrorKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(8000),
            retryable_kinds: vec![
                ErrorKind::Network,
                ErrorKind::ServiceUnavailable,
                ErrorKind::InvalidResponse,
                ErrorKind::Unknown,
            ],
        }
    }
}

/// Exponential backoff, capped: `min(base * 2^attempt, max)`.
pub fn backoff_delay(attempt: u32, config: &RetryConfig) -> Duration {
    config
        .base_delay
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(config.max_delay)
}

/// Coordinates quota, breaker, and transport for one logical analysis flow.
///
/// Owns its components; the composition root constructs everything and hands
/// the orchestrator to the application layer.
pub struct Orchestrator<B> {
    quota: QuotaManager,
    breaker: CircuitBreaker,
    backend: B,
    retry: RetryConfig,
    flight: tokio::sync::Mutex<()>,
}

impl<B: AnalysisBackend> Orchestrator<B> {
    pub fn new(quota: QuotaManager, breaker: CircuitBreaker, backend: B) -> Self {
        Self {
            quota,
            breaker,
            backend,
            retry: RetryConfig::default(),
            flight: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Load persisted quota and breaker state. Idempotent.
    pub async fn initialize(&self) -> store::Result<()> {
        self.quota.initialize().await?;
        self.breaker.initialize().await
    }

    /// Analyze one photo: already resized/compressed JPEG bytes in, a
    /// validated result or a typed user-presentable error out.
    pub async fn analyze(&self, image: &[u8]) -> Result<AnalysisResult, ClassifiedError> {
        let _flight = self.flight.lock().await;

        self.initialize().await.map_err(internal)?;

        // Gate 1: circuit breaker. No network call, no quota spend.
        if !self.breaker.can_make_request().await.map_err(internal)? {
            let seconds = self
                .breaker
                .time_until_retry()
                .await
                .map_err(internal)?
                .map(|d| d.as_secs_f64().ceil() as u64)
                .unwrap_or(60);
            warn!(seconds_until_retry = seconds, "circuit open, failing fast");
            return Err(ClassifiedError::circuit_open(seconds));
        }

        // Gate 2: primary quota.
        if !self.quota.can_make_request(false).await.map_err(internal)? {
            let info = self.quota.quota_info().await.map_err(internal)?;
            warn!(daily_limit = info.daily_limit, "daily quota exhausted, failing fast");
            return Err(ClassifiedError::daily_limit_reached(
                info.daily_limit,
                info.reset_at,
            ));
        }

        let payload = prepare_payload(image)?;

        let mut attempt: u32 = 0;
        loop {
            let is_retry = attempt > 0;

            // Retries draw only from the sub-budget; never fall back to
            // the primary budget when it runs dry.
            if is_retry && !self.quota.can_make_request(true).await.map_err(internal)? {
                warn!(attempt, "retry budget exhausted, aborting retries");
                return Err(ClassifiedError::retry_budget_exhausted());
            }

            // The attempt costs quota whether or not it succeeds.
            self.quota.record_request(is_retry).await.map_err(internal)?;
            metrics::counter!("analysis_attempts_total", "retry" => bool_label(is_retry))
                .increment(1);

            match self.backend.analyze(&payload).await {
                Ok(AnalysisOutcome::Meal(result)) => {
                    self.breaker.record_success().await.map_err(internal)?;
                    if self.quota.is_approaching_limit().await.map_err(internal)? {
                        warn!("approaching daily analysis quota");
                    }
                    metrics::counter!("analysis_outcomes_total", "outcome" => "success")
                        .increment(1);
                    info!(
                        energy = result.energy_band.label(),
                        attempt, "analysis complete"
                    );
                    return Ok(result);
                }
                Ok(AnalysisOutcome::NotFood { confidence }) => {
                    // A valid upstream answer: the breaker sees a success and
                    // no retry is spent on re-asking the same question.
                    self.breaker.record_success().await.map_err(internal)?;
                    metrics::counter!("analysis_outcomes_total", "outcome" => "not_food")
                        .increment(1);
                    info!("image rejected as not food");
                    return Err(ClassifiedError::not_food(confidence));
                }
                Err(err) => {
                    let classified = classify(err);
                    self.breaker.record_failure().await.map_err(internal)?;

                    let can_retry = attempt < self.retry.max_retries
                        && classified.retryable
                        && self.retry.retryable_kinds.contains(&classified.kind)
                        && !(classified.kind == ErrorKind::InvalidResponse && attempt > 0);

                    if !can_retry {
                        metrics::counter!(
                            "analysis_outcomes_total",
                            "outcome" => "error",
                            "kind" => classified.kind.as_str()
                        )
                        .increment(1);
                        return Err(classified);
                    }

                    let delay = backoff_delay(attempt, &self.retry);
                    warn!(
                        attempt,
                        kind = classified.kind.as_str(),
                        delay_ms = delay.as_millis() as u64,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Read-only quota snapshot for the application layer.
    pub async fn quota_info(&self) -> store::Result<QuotaState> {
        self.quota.quota_info().await
    }

    /// Read-only breaker snapshot for the application layer.
    pub async fn circuit_state(&self) -> store::Result<CircuitState> {
        self.breaker.snapshot().await
    }

    /// Force fresh quota and breaker records (test/debug hook).
    pub async fn reset(&self) -> store::Result<()> {
        self.quota.reset().await?;
        self.breaker.reset().await
    }
}

/// Turn raw photo bytes into the transport payload.
///
/// Resize/compression already happened in the image-processing collaborator;
/// anything unusable here is the caller's photo, not the upstream.
fn prepare_payload(image: &[u8]) -> Result<ImagePayload, ClassifiedError> {
    use base64::Engine as _;

    if image.is_empty() {
        return Err(ClassifiedError::invalid_image());
    }
    let data = base64::engine::general_purpose::STANDARD.encode(image);
    Ok(ImagePayload::jpeg(data))
}

fn internal(e: store::Error) -> ClassifiedError {
    error!(error = %e, "state persistence failure");
    ClassifiedError::internal()
}

fn bool_label(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}
