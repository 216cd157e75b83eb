//! Error classification into the closed taxonomy
//!
//! Maps a raw transport failure into a typed error carrying a retryability
//! flag, a fixed user-safe message, and a suggested action. Patterns are
//! evaluated in order and the first match wins: concrete HTTP statuses
//! before message text, message text before the unknown fallback. Raw
//! provider text never reaches the user; it stays on the `source` chain
//! for logs.

use vision::Confidence;

/// The closed set of failure kinds, plus the tier-1 domain rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    QuotaExceeded,
    Authentication,
    InvalidRequest,
    ServiceUnavailable,
    InvalidResponse,
    /// Tier-1 negative verdict. A valid classification, not a transport error.
    NotFood,
    Unknown,
}

impl ErrorKind {
    /// Stable label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network_error",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::Authentication => "authentication_error",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::InvalidResponse => "invalid_response",
            ErrorKind::NotFood => "not_food",
            ErrorKind::Unknown => "unknown_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified, user-presentable failure.
///
/// Constructed fresh per failure and never persisted. `message` and `action`
/// are fixed templates safe to render directly; the raw cause lives in
/// `source`.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
    /// Suggested next step for the user.
    pub action: &'static str,
    #[source]
    pub source: Option<vision::Error>,
}

impl ClassifiedError {
    fn from_kind(kind: ErrorKind, source: Option<vision::Error>) -> Self {
        let (message, retryable, action) = template(kind);
        Self {
            kind,
            message: message.into(),
            retryable,
            action,
            source,
        }
    }

    /// Circuit breaker fail-fast: no network call was made.
    pub fn circuit_open(seconds_until_retry: u64) -> Self {
        Self {
            message: format!(
                "AI service temporarily unavailable. Please try again in {seconds_until_retry} seconds."
            ),
            retryable: false,
            ..Self::from_kind(ErrorKind::ServiceUnavailable, None)
        }
    }

    /// Primary quota fail-fast, with the local reset time.
    pub fn daily_limit_reached(daily_limit: u32, reset_at: chrono::DateTime<chrono::Local>) -> Self {
        Self {
            message: format!(
                "Daily limit of {daily_limit} analyses reached. Resets at {}.",
                reset_at.format("%H:%M")
            ),
            ..Self::from_kind(ErrorKind::QuotaExceeded, None)
        }
    }

    /// Retry sub-budget exhausted mid-loop.
    pub fn retry_budget_exhausted() -> Self {
        Self {
            message: "Retry limit reached. Please try again later.".into(),
            ..Self::from_kind(ErrorKind::QuotaExceeded, None)
        }
    }

    /// Photo could not be turned into a transport payload.
    pub fn invalid_image() -> Self {
        Self {
            message: "Could not process image. Please try again with a different photo.".into(),
            ..Self::from_kind(ErrorKind::InvalidRequest, None)
        }
    }

    /// Tier-1 negative verdict.
    pub fn not_food(confidence: Confidence) -> Self {
        let mut err = Self::from_kind(ErrorKind::NotFood, None);
        if confidence == Confidence::Low {
            err.message = "That doesn't look like food, but the image is hard to read. \
                           Try a clearer photo of your meal."
                .into();
        }
        err
    }

    /// Local state persistence failed; not retryable.
    pub fn internal() -> Self {
        Self {
            retryable: false,
            ..Self::from_kind(ErrorKind::Unknown, None)
        }
    }
}

/// Fixed (message, retryable, action) template per kind.
fn template(kind: ErrorKind) -> (&'static str, bool, &'static str) {
    match kind {
        ErrorKind::Network => (
            "Network connection issue. Please check your internet connection.",
            true,
            "Check your internet connection and try again.",
        ),
        ErrorKind::QuotaExceeded => (
            "Daily analysis limit reached. Please try again tomorrow.",
            false,
            "You can manually enter meal details or wait until tomorrow.",
        ),
        ErrorKind::Authentication => (
            "Service configuration error. Please contact support.",
            false,
            "Please update the app or contact support.",
        ),
        ErrorKind::InvalidRequest => (
            "Could not process image. Please try a clearer photo.",
            false,
            "Take a clearer photo with better lighting.",
        ),
        ErrorKind::ServiceUnavailable => (
            "AI service temporarily unavailable. Please try again in a moment.",
            true,
            "Wait a moment and try again.",
        ),
        ErrorKind::InvalidResponse => (
            "Received invalid response from AI service.",
            true,
            "Try again or use manual entry.",
        ),
        ErrorKind::NotFood => (
            "That doesn't look like food. Try a photo of your meal.",
            false,
            "Point the camera at a plate, bowl, or snack.",
        ),
        ErrorKind::Unknown => (
            "An unexpected error occurred. Please try again.",
            true,
            "Try again or use manual entry.",
        ),
    }
}

/// Classify a raw transport failure. First match wins.
pub fn classify(err: vision::Error) -> ClassifiedError {
    let kind = kind_of(&err);
    ClassifiedError::from_kind(kind, Some(err))
}

fn kind_of(err: &vision::Error) -> ErrorKind {
    match err {
        vision::Error::Network(_) => ErrorKind::Network,
        vision::Error::Parse(_) => ErrorKind::InvalidResponse,
        vision::Error::Status { status, body } => kind_of_status(*status, body),
        vision::Error::Provider(msg) => kind_of_message(msg),
    }
}

fn kind_of_status(status: u16, body: &str) -> ErrorKind {
    match status {
        429 => ErrorKind::QuotaExceeded,
        401 | 403 => ErrorKind::Authentication,
        400 | 413 => ErrorKind::InvalidRequest,
        408 => ErrorKind::Network,
        500 | 502 | 503 | 504 => ErrorKind::ServiceUnavailable,
        _ => kind_of_message(body),
    }
}

/// Ordered message-pattern fallback for errors without a usable status.
fn kind_of_message(msg: &str) -> ErrorKind {
    let lower = msg.to_lowercase();
    let contains_any = |patterns: &[&str]| patterns.iter().any(|p| lower.contains(p));

    if contains_any(&["network", "fetch", "timeout", "connection"]) {
        ErrorKind::Network
    } else if contains_any(&["quota", "rate limit", "429", "too many requests"]) {
        ErrorKind::QuotaExceeded
    } else if contains_any(&["api key", "authentication", "unauthorized", "forbidden", "401", "403"]) {
        ErrorKind::Authentication
    } else if contains_any(&["invalid", "bad request", "400"]) {
        ErrorKind::InvalidRequest
    } else if contains_any(&["service unavailable", "overloaded", "503"]) {
        ErrorKind::ServiceUnavailable
    } else if contains_any(&["json", "parse"]) {
        ErrorKind::InvalidResponse
    } else {
        ErrorKind::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_err(status: u16, body: &str) -> vision::Error {
        vision::Error::Status {
            status,
            body: body.into(),
        }
    }

    #[test]
    fn status_429_is_quota_not_retryable() {
        let err = classify(status_err(429, "Resource has been exhausted"));
        assert_eq!(err.kind, ErrorKind::QuotaExceeded);
        assert!(!err.retryable);
    }

    #[test]
    fn message_containing_429_is_quota() {
        let err = classify(vision::Error::Provider("upstream said 429, slow down".into()));
        assert_eq!(err.kind, ErrorKind::QuotaExceeded);
        assert!(!err.retryable);
    }

    #[test]
    fn auth_statuses_are_terminal() {
        for status in [401, 403] {
            let err = classify(status_err(status, "denied"));
            assert_eq!(err.kind, ErrorKind::Authentication);
            assert!(!err.retryable, "auth errors must never retry");
        }
    }

    #[test]
    fn api_key_message_is_authentication() {
        let err = classify(vision::Error::Provider("API key not valid".into()));
        assert_eq!(err.kind, ErrorKind::Authentication);
    }

    #[test]
    fn bad_request_statuses_are_invalid_request() {
        for status in [400, 413] {
            let err = classify(status_err(status, "bad payload"));
            assert_eq!(err.kind, ErrorKind::InvalidRequest);
            assert!(!err.retryable);
        }
    }

    #[test]
    fn server_errors_are_service_unavailable_and_retryable() {
        for status in [500, 502, 503, 504] {
            let err = classify(status_err(status, "oops"));
            assert_eq!(err.kind, ErrorKind::ServiceUnavailable, "status {status}");
            assert!(err.retryable);
        }
    }

    #[test]
    fn status_408_is_network() {
        let err = classify(status_err(408, "request timeout"));
        assert_eq!(err.kind, ErrorKind::Network);
        assert!(err.retryable);
    }

    #[test]
    fn network_variant_is_retryable() {
        let err = classify(vision::Error::Network("connection reset by peer".into()));
        assert_eq!(err.kind, ErrorKind::Network);
        assert!(err.retryable);
    }

    #[test]
    fn parse_failure_is_invalid_response_retryable() {
        let err = classify(vision::Error::Parse("expected value at line 1".into()));
        assert_eq!(err.kind, ErrorKind::InvalidResponse);
        assert!(err.retryable);
    }

    #[test]
    fn rate_limit_message_is_quota() {
        let err = classify(vision::Error::Provider("rate limit exceeded for model".into()));
        assert_eq!(err.kind, ErrorKind::QuotaExceeded);
    }

    #[test]
    fn unmatched_message_is_unknown_retryable() {
        let err = classify(vision::Error::Provider("flux capacitor misaligned".into()));
        assert_eq!(err.kind, ErrorKind::Unknown);
        assert!(err.retryable);
    }

    #[test]
    fn unknown_status_falls_back_to_body_patterns() {
        let err = classify(status_err(418, "teapot rate limit reached"));
        assert_eq!(err.kind, ErrorKind::QuotaExceeded);
    }

    #[test]
    fn raw_provider_text_never_reaches_the_message() {
        let err = classify(status_err(500, "stack trace: secret internal path /srv/keys"));
        assert!(!err.message.contains("secret internal path"));
        assert!(
            err.source.is_some(),
            "raw cause must be retained on the source chain"
        );
        // The raw text is still reachable for logs via the source chain
        let source = err.source.as_ref().unwrap().to_string();
        assert!(source.contains("secret internal path"));
    }

    #[test]
    fn not_food_is_terminal_domain_rejection() {
        let err = ClassifiedError::not_food(Confidence::High);
        assert_eq!(err.kind, ErrorKind::NotFood);
        assert!(!err.retryable);

        let unsure = ClassifiedError::not_food(Confidence::Low);
        assert!(unsure.message.contains("hard to read"));
    }

    #[test]
    fn circuit_open_message_includes_seconds() {
        let err = ClassifiedError::circuit_open(42);
        assert_eq!(err.kind, ErrorKind::ServiceUnavailable);
        assert!(!err.retryable);
        assert!(err.message.contains("42 seconds"));
    }

    #[test]
    fn daily_limit_message_includes_limit_and_reset() {
        let reset = chrono::Local::now() + chrono::Duration::hours(2);
        let err = ClassifiedError::daily_limit_reached(10, reset);
        assert_eq!(err.kind, ErrorKind::QuotaExceeded);
        assert!(err.message.contains("Daily limit of 10"));
        assert!(err.message.contains("Resets at"));
    }

    #[test]
    fn every_kind_has_an_action() {
        for kind in [
            ErrorKind::Network,
            ErrorKind::QuotaExceeded,
            ErrorKind::Authentication,
            ErrorKind::InvalidRequest,
            ErrorKind::ServiceUnavailable,
            ErrorKind::InvalidResponse,
            ErrorKind::NotFood,
            ErrorKind::Unknown,
        ] {
            let (message, _, action) = template(kind);
            assert!(!message.is_empty());
            assert!(!action.is_empty());
        }
    }
}
