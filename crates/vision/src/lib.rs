//! Upstream vision-model transport for meal photo analysis
//!
//! Wraps the provider's `generateContent` HTTP API behind a two-tier call
//! pattern: a cheap "is this food?" classification gating the expensive
//! detailed analysis. Each tier walks an ordered chain of candidate model
//! identifiers and uses the first that responds successfully.
//!
//! The provider returns generated text that is *supposed* to be JSON but is
//! sometimes wrapped in markdown fences or surrounded by prose. `extract`
//! pulls the first balanced JSON object out of the text before parsing;
//! anything that still fails to parse surfaces as [`Error::Parse`].
//!
//! This crate knows nothing about quotas, circuit breaking, or retries —
//! callers get a single attempt per invocation and a typed error to classify.

pub mod client;
pub mod error;
pub mod extract;
pub mod model;
pub mod prompt;

pub use client::{ModelChain, VisionClient};
pub use error::{Error, Result};
pub use extract::extract_json;
pub use model::{
    AnalysisFlags, AnalysisResult, Confidence, EnergyBand, ImagePayload, MealType, Tier1Verdict,
};
