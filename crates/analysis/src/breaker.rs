//! Three-state circuit breaker shielding the upstream during outages
//!
//! Transitions:
//! - CLOSED → OPEN when consecutive failures reach the threshold
//! - OPEN → HALF_OPEN lazily, the moment a check observes the reset timeout
//!   has elapsed
//! - HALF_OPEN → CLOSED after enough consecutive probe successes
//! - HALF_OPEN → OPEN on any failure, with a fresh retry deadline
//!
//! The multi-success requirement in HALF_OPEN avoids flapping back to CLOSED
//! on a single lucky probe. State persists as one JSON blob with epoch-millis
//! timestamps so an open circuit stays open across process restarts.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::store::{Result, StateStore};

const STORE_KEY: &str = "circuit_breaker";

/// Consecutive failures before the circuit opens.
pub const FAILURE_THRESHOLD: u32 = 5;

/// Consecutive half-open successes before the circuit closes.
pub const SUCCESS_THRESHOLD: u32 = 2;

/// How long an open circuit rejects before probing again.
pub const RESET_TIMEOUT: Duration = Duration::from_secs(60);

/// The three phases of the breaker state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitPhase {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitPhase {
    /// Phase label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            CircuitPhase::Closed => "closed",
            CircuitPhase::Open => "open",
            CircuitPhase::HalfOpen => "half_open",
        }
    }
}

/// Persisted breaker record. Timestamps are unix millis (absolute), so the
/// record is meaningful after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitState {
    pub phase: CircuitPhase,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_ms: Option<u64>,
    pub next_retry_ms: Option<u64>,
}

impl CircuitState {
    fn closed() -> Self {
        Self {
            phase: CircuitPhase::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_ms: None,
            next_retry_ms: None,
        }
    }
}

/// Breaker thresholds; the reset timeout is injectable so tests can exercise
/// the OPEN → HALF_OPEN transition without waiting a minute.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: FAILURE_THRESHOLD,
            success_threshold: SUCCESS_THRESHOLD,
            reset_timeout: RESET_TIMEOUT,
        }
    }
}

/// Circuit breaker with persisted state.
///
/// Explicitly constructed with its persistence handle and config; no global
/// instance. All mutations persist the whole record before returning.
pub struct CircuitBreaker {
    store: StateStore,
    config: BreakerConfig,
    state: Mutex<Option<CircuitState>>,
}

impl CircuitBreaker {
    pub fn new(store: StateStore, config: BreakerConfig) -> Self {
        Self {
            store,
            config,
            state: Mutex::new(None),
        }
    }

    /// Load persisted state, applying a due OPEN → HALF_OPEN transition.
    /// Idempotent; safe to call repeatedly.
    pub async fn initialize(&self) -> Result<()> {
        let mut slot = self.state.lock().await;
        self.ensure(&mut slot).await
    }

    /// Whether a request may be attempted right now.
    ///
    /// CLOSED and HALF_OPEN pass. OPEN passes only once the reset timeout
    /// has elapsed, transitioning to HALF_OPEN as a side effect.
    pub async fn can_make_request(&self) -> Result<bool> {
        let mut slot = self.state.lock().await;
        self.ensure(&mut slot).await?;
        let state = slot.as_mut().ok_or_else(missing_state)?;

        match state.phase {
            CircuitPhase::Closed | CircuitPhase::HalfOpen => Ok(true),
            CircuitPhase::Open => {
                if retry_due(state) {
                    to_half_open(state);
                    self.store.save(STORE_KEY, state).await?;
                    info!("circuit reset timeout elapsed, probing (half-open)");
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    /// Record a successful attempt.
    pub async fn record_success(&self) -> Result<()> {
        let mut slot = self.state.lock().await;
        self.ensure(&mut slot).await?;
        let state = slot.as_mut().ok_or_else(missing_state)?;

        match state.phase {
            CircuitPhase::Closed => {
                state.failure_count = 0;
            }
            CircuitPhase::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    info!(
                        successes = state.success_count,
                        "circuit closed after successful probes"
                    );
                    *state = CircuitState::closed();
                }
            }
            CircuitPhase::Open => {
                // A late completion from before the circuit opened; no transition
                debug!("success recorded while open, ignoring");
            }
        }

        self.store.save(STORE_KEY, state).await
    }

    /// Record a failed attempt, possibly opening the circuit.
    pub async fn record_failure(&self) -> Result<()> {
        let mut slot = self.state.lock().await;
        self.ensure(&mut slot).await?;
        let state = slot.as_mut().ok_or_else(missing_state)?;

        state.failure_count += 1;
        state.last_failure_ms = Some(now_millis());

        if state.phase == CircuitPhase::HalfOpen {
            warn!("probe failed, reopening circuit");
            state.phase = CircuitPhase::Open;
            state.success_count = 0;
            state.next_retry_ms = Some(now_millis() + self.config.reset_timeout.as_millis() as u64);
        } else if state.failure_count >= self.config.failure_threshold {
            warn!(
                failures = state.failure_count,
                "failure threshold reached, opening circuit"
            );
            state.phase = CircuitPhase::Open;
            state.next_retry_ms = Some(now_millis() + self.config.reset_timeout.as_millis() as u64);
        }

        self.store.save(STORE_KEY, state).await
    }

    /// Time until the open circuit probes again. Only meaningful in OPEN.
    pub async fn time_until_retry(&self) -> Result<Option<Duration>> {
        let snapshot = self.snapshot().await?;
        if snapshot.phase != CircuitPhase::Open {
            return Ok(None);
        }
        Ok(snapshot.next_retry_ms.map(|deadline| {
            Duration::from_millis(deadline.saturating_sub(now_millis()))
        }))
    }

    /// Read-only copy of the current record.
    pub async fn snapshot(&self) -> Result<CircuitState> {
        let mut slot = self.state.lock().await;
        self.ensure(&mut slot).await?;
        slot.clone().ok_or_else(missing_state)
    }

    /// Force CLOSED with zero counters (test/debug hook).
    pub async fn reset(&self) -> Result<()> {
        let mut slot = self.state.lock().await;
        let fresh = CircuitState::closed();
        self.store.save(STORE_KEY, &fresh).await?;
        *slot = Some(fresh);
        Ok(())
    }

    /// Load-or-create; a due retry deadline transitions OPEN → HALF_OPEN.
    async fn ensure(&self, slot: &mut Option<CircuitState>) -> Result<()> {
        if slot.is_none() {
            let mut state = self
                .store
                .load::<CircuitState>(STORE_KEY)
                .await?
                .unwrap_or_else(CircuitState::closed);
            debug!(phase = state.phase.label(), "loaded circuit breaker state");

            if state.phase == CircuitPhase::Open && retry_due(&state) {
                to_half_open(&mut state);
                self.store.save(STORE_KEY, &state).await?;
                info!("persisted circuit was due for retry, probing (half-open)");
            }
            *slot = Some(state);
        }
        Ok(())
    }
}

fn retry_due(state: &CircuitState) -> bool {
    state
        .next_retry_ms
        .is_some_and(|deadline| now_millis() >= deadline)
}

fn to_half_open(state: &mut CircuitState) {
    state.phase = CircuitPhase::HalfOpen;
    state.success_count = 0;
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn missing_state() -> crate::store::Error {
    crate::store::Error::Io("circuit state missing after ensure".into())
}
