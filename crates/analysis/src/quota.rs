//! Daily analysis quota with a ring-fenced retry sub-budget
//!
//! Tracks how many upstream calls a device has spent today against a daily
//! cap, with 10% of the cap reserved for automatic retries. Splitting the
//! budgets keeps a flaky upstream from draining the whole daily allowance
//! through retries: retries draw only from the small pool.
//!
//! The whole record persists as one JSON blob under the `quota` key and is
//! rewritten on every mutation. The day rolls over at the next local
//! midnight; an expired record is replaced wholesale at load time.
//!
//! The server-side relay enforces the authoritative per-device limit. This
//! counter is an advisory cache that lets the client fail fast and message
//! the user without burning a network round-trip.

use chrono::{DateTime, Local, NaiveTime};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::store::{Result, StateStore};

const STORE_KEY: &str = "quota";

/// Advisory default, matching the relay's authoritative per-device limit.
pub const DEFAULT_DAILY_LIMIT: u32 = 10;

/// Fraction of the daily limit reserved for retries (floored).
const RETRY_BUDGET_PERCENT: f64 = 0.10;

/// Usage fraction at which `is_approaching_limit` trips.
const WARN_THRESHOLD: f64 = 0.8;

/// One day's quota record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaState {
    pub daily_limit: u32,
    pub used: u32,
    pub remaining: u32,
    pub retry_budget: u32,
    pub retry_budget_used: u32,
    pub reset_at: DateTime<Local>,
}

impl QuotaState {
    /// Fresh record for a new day.
    fn fresh(daily_limit: u32) -> Self {
        Self {
            daily_limit,
            used: 0,
            remaining: daily_limit,
            retry_budget: (daily_limit as f64 * RETRY_BUDGET_PERCENT).floor() as u32,
            retry_budget_used: 0,
            reset_at: next_local_midnight(),
        }
    }

    fn expired(&self) -> bool {
        Local::now() >= self.reset_at
    }
}

/// The reset boundary: start of the next local calendar day.
fn next_local_midnight() -> DateTime<Local> {
    let now = Local::now();
    now.date_naive()
        .succ_opt()
        .map(|d| d.and_time(NaiveTime::MIN))
        .and_then(|dt| dt.and_local_timezone(Local).earliest())
        .unwrap_or_else(|| now + chrono::Duration::days(1))
}

/// Tracks and persists per-day usage against the daily cap.
///
/// Explicitly constructed with its persistence handle; the application's
/// composition root owns the instance, which keeps test setup deterministic.
pub struct QuotaManager {
    store: StateStore,
    daily_limit: u32,
    state: Mutex<Option<QuotaState>>,
}

impl QuotaManager {
    pub fn new(store: StateStore, daily_limit: u32) -> Self {
        Self {
            store,
            daily_limit,
            state: Mutex::new(None),
        }
    }

    /// Load the persisted record, replacing it if the day rolled over.
    /// Idempotent; safe to call repeatedly.
    pub async fn initialize(&self) -> Result<()> {
        let mut slot = self.state.lock().await;
        self.ensure(&mut slot).await
    }

    /// Whether a request may be dispatched. Retries check the ring-fenced
    /// sub-budget; first attempts check the primary budget. Never mutates
    /// usage, but lazily initializes.
    pub async fn can_make_request(&self, is_retry: bool) -> Result<bool> {
        let mut slot = self.state.lock().await;
        self.ensure(&mut slot).await?;
        let state = slot.as_ref().ok_or_else(missing_state)?;
        Ok(if is_retry {
            state.retry_budget_used < state.retry_budget
        } else {
            state.remaining > 0
        })
    }

    /// Record one actually-dispatched attempt and persist immediately.
    ///
    /// Callers must invoke this exactly once per network attempt and never
    /// on a pre-flight rejection. An exhausted budget saturates rather than
    /// overflowing the cap.
    pub async fn record_request(&self, is_retry: bool) -> Result<()> {
        let mut slot = self.state.lock().await;
        self.ensure(&mut slot).await?;
        let state = slot.as_mut().ok_or_else(missing_state)?;

        if is_retry {
            if state.retry_budget_used < state.retry_budget {
                state.retry_budget_used += 1;
            } else {
                warn!("record_request(retry) with exhausted retry budget");
            }
        } else if state.used < state.daily_limit {
            state.used += 1;
            state.remaining = state.daily_limit - state.used;
        } else {
            warn!("record_request with exhausted daily quota");
        }

        debug!(
            used = state.used,
            remaining = state.remaining,
            retry_budget_used = state.retry_budget_used,
            "recorded analysis request"
        );
        self.store.save(STORE_KEY, state).await
    }

    /// Read-only snapshot of today's record.
    pub async fn quota_info(&self) -> Result<QuotaState> {
        let mut slot = self.state.lock().await;
        self.ensure(&mut slot).await?;
        slot.clone().ok_or_else(missing_state)
    }

    /// True once 80% of the daily limit is spent.
    pub async fn is_approaching_limit(&self) -> Result<bool> {
        let info = self.quota_info().await?;
        Ok(info.used as f64 / info.daily_limit as f64 >= WARN_THRESHOLD)
    }

    /// Force a fresh record (test/debug hook).
    pub async fn reset(&self) -> Result<()> {
        let mut slot = self.state.lock().await;
        let fresh = QuotaState::fresh(self.daily_limit);
        self.store.save(STORE_KEY, &fresh).await?;
        *slot = Some(fresh);
        Ok(())
    }

    /// Load-or-create, rolling the day over when `reset_at` has passed.
    async fn ensure(&self, slot: &mut Option<QuotaState>) -> Result<()> {
        if let Some(state) = slot.as_ref() {
            if !state.expired() {
                return Ok(());
            }
            info!("quota day rolled over, starting fresh record");
        } else {
            match self.store.load::<QuotaState>(STORE_KEY).await? {
                Some(state) if !state.expired() => {
                    debug!(used = state.used, "loaded persisted quota");
                    *slot = Some(state);
                    return Ok(());
                }
                Some(_) => info!("persisted quota expired, starting fresh record"),
                None => info!("no persisted quota, starting fresh record"),
            }
        }

        let fresh = QuotaState::fresh(self.daily_limit);
        self.store.save(STORE_KEY, &fresh).await?;
        *slot = Some(fresh);
        Ok(())
    }
}

fn missing_state() -> crate::store::Error {
    crate::store::Error::Io("quota state missing after ensure".into())
}
