//! AI analysis resilience layer
//!
//! Everything between the application layer and the upstream vision model:
//! a daily quota with a ring-fenced retry sub-budget, a persisted three-state
//! circuit breaker, error classification into a closed user-presentable
//! taxonomy, swappable transports (direct provider or authenticated relay),
//! and the orchestrator that ties them together with bounded exponential
//! backoff.
//!
//! Request lifecycle:
//! 1. Application calls `Orchestrator::analyze` with processed photo bytes
//! 2. Circuit breaker and quota gates reject for free (no network, no spend)
//! 3. Each dispatched attempt is recorded against quota before the call
//! 4. Failures classify, feed the breaker, and retry per policy
//! 5. A validated `AnalysisResult` or a typed `ClassifiedError` comes back
//! 6. The application hands successes to the `MealStore` collaborator
//!
//! All components are explicitly constructed with injected persistence
//! handles; the composition root owns their lifetimes.

pub mod backend;
pub mod breaker;
pub mod classify;
pub mod meals;
pub mod orchestrator;
pub mod quota;
pub mod store;

pub use backend::{AnalysisBackend, AnalysisOutcome, DirectBackend, RelayBackend};
pub use breaker::{BreakerConfig, CircuitBreaker, CircuitPhase, CircuitState};
pub use classify::{ClassifiedError, ErrorKind, classify};
pub use meals::{JsonMealStore, MealEntry, MealStore, UserFeedback};
pub use orchestrator::{Orchestrator, RetryConfig, backoff_delay};
pub use quota::{DEFAULT_DAILY_LIMIT, QuotaManager, QuotaState};
pub use store::StateStore;
