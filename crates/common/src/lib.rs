//! Shared types for the Mealscope workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
