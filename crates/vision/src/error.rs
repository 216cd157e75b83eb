//! Error types for upstream vision-model calls

/// Errors from a single upstream call attempt.
///
/// These are transport-level facts, not user-facing messages. The analysis
/// layer classifies them into the closed error taxonomy before anything
/// reaches a consumer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Connection failure, DNS failure, or attempt timeout.
    #[error("network error: {0}")]
    Network(String),

    /// Non-success HTTP status from the provider, with the response body.
    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Generated text could not be extracted or parsed as the expected shape.
    #[error("response parse error: {0}")]
    Parse(String),

    /// Provider-reported failure that carries only a message.
    #[error("provider error: {0}")]
    Provider(String),
}

/// Result alias for upstream call attempts.
pub type Result<T> = std::result::Result<T, Error>;
