//! Error types shared across the core.

use thiserror::Error;

/// Errors surfaced by the catalog and enrichment layers.
///
/// "Not found" is not represented here: lookups return `Option` / empty
/// vectors and callers treat the miss as a normal outcome.
#[derive(Debug, Error)]
pub enum IntelError {
    /// Catalog transport failure. Query endpoints surface this as a 5xx;
    /// the webhook path degrades to "not in database" and continues.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Malformed request or missing parameter; surfaced as a 4xx.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<sqlx::Error> for IntelError {
    fn from(err: sqlx::Error) -> Self {
        IntelError::StorageUnavailable(err.to_string())
    }
}

/// A single feed failing. The ingestion coordinator logs it and keeps
/// running the other feeds.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),
    #[error("http status {0}")]
    Http(u16),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Network(err.to_string())
    }
}

/// Failures of the resilient outbound client.
#[derive(Debug, Error)]
pub enum OutboundError {
    /// The circuit breaker is open; no request was attempted.
    #[error("circuit open")]
    CircuitOpen,
    #[error("request timed out")]
    Timeout,
    #[error("connection error: {0}")]
    Connection(String),
    /// Terminal HTTP status (after retries, where applicable).
    #[error("http status {status}: {body}")]
    Status { status: u16, body: String },
}

impl OutboundError {
    /// Metric label for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundError::CircuitOpen => "circuit_open",
            OutboundError::Timeout => "timeout",
            OutboundError::Connection(_) => "connection",
            OutboundError::Status { status: 401, .. } | OutboundError::Status { status: 403, .. } => "auth",
            OutboundError::Status { status: 429, .. } => "rate_limit",
            OutboundError::Status { status, .. } if *status >= 500 => "server_error",
            OutboundError::Status { .. } => "server_error",
        }
    }
}

/// Triage pipeline failures. All of these leave the alert un-triaged; the
/// enrichment handler continues and still notifies.
#[derive(Debug, Error)]
pub enum TriageError {
    /// Triage is switched off; callers skip triage entirely.
    #[error("triage disabled")]
    Disabled,
    /// The LLM reply did not contain a parseable triage result.
    #[error("unparseable llm reply: {0}")]
    Parse(String),
    #[error(transparent)]
    Outbound(#[from] OutboundError),
}

impl TriageError {
    /// Metric label for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            TriageError::Disabled => "disabled",
            TriageError::Parse(_) => "parse",
            TriageError::Outbound(err) => err.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_error_kinds() {
        assert_eq!(OutboundError::CircuitOpen.kind(), "circuit_open");
        assert_eq!(OutboundError::Timeout.kind(), "timeout");
        assert_eq!(OutboundError::Status { status: 401, body: String::new() }.kind(), "auth");
        assert_eq!(OutboundError::Status { status: 429, body: String::new() }.kind(), "rate_limit");
        assert_eq!(OutboundError::Status { status: 503, body: String::new() }.kind(), "server_error");
    }

    #[test]
    fn test_triage_error_kinds() {
        assert_eq!(TriageError::Parse("nope".into()).kind(), "parse");
        assert_eq!(TriageError::Outbound(OutboundError::Timeout).kind(), "timeout");
    }
}
