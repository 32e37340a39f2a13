//! Error taxonomy for generation calls.
//!
//! Every remote failure is normalized once, at the HTTP boundary, into an
//! [`ApiFailure`] and classified into a closed [`ErrorKind`]. The retry
//! engine and the video poller only ever look at the kind.

use std::fmt;

use serde_json::Value;
use thiserror::Error;

/// Closed set of failure kinds surfaced by the generation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Rate limit or quota exhausted. The only retryable kind.
    RateLimited,
    /// API key missing, malformed or rejected.
    InvalidCredential,
    /// Model, operation or file does not exist.
    EntityNotFound,
    /// Prompt or output was blocked by the backend's safety filters.
    ContentPolicyRejected,
    /// The backend could not be reached at all.
    NetworkUnreachable,
    /// A long-running job exceeded its poll budget.
    OperationTimedOut,
    /// The payload did not have the expected shape.
    MalformedResponse,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::InvalidCredential => "INVALID_CREDENTIAL",
            ErrorKind::EntityNotFound => "ENTITY_NOT_FOUND",
            ErrorKind::ContentPolicyRejected => "CONTENT_POLICY_REJECTED",
            ErrorKind::NetworkUnreachable => "NETWORK_UNREACHABLE",
            ErrorKind::OperationTimedOut => "OPERATION_TIMED_OUT",
            ErrorKind::MalformedResponse => "MALFORMED_RESPONSE",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::RateLimited)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by every generation call.
#[derive(Debug, Clone, Error)]
#[error("[{kind}] {message}")]
pub struct StudioError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StudioError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Raised by the retry engine once the rate-limit budget is spent.
    pub fn quota_exceeded(attempts: u32) -> Self {
        Self::new(
            ErrorKind::RateLimited,
            format!("quota exceeded after {attempts} attempt(s)"),
        )
    }

    pub fn timed_out(polls: u32) -> Self {
        Self::new(
            ErrorKind::OperationTimedOut,
            format!("video generation still running after {polls} polls"),
        )
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedResponse, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Text suitable for showing to the person who triggered the request.
    pub fn user_message(&self) -> &'static str {
        match self.kind {
            ErrorKind::RateLimited => {
                "The generation service is busy or your quota is used up. Please try again later."
            }
            ErrorKind::InvalidCredential => {
                "The API key was rejected. Check GEMINI_API_KEY in your environment."
            }
            ErrorKind::ContentPolicyRejected => {
                "The request was blocked by the content safety policy. Try rephrasing the prompt."
            }
            ErrorKind::NetworkUnreachable => {
                "The generation service could not be reached. Check your connection and retry."
            }
            ErrorKind::OperationTimedOut => {
                "Video rendering took too long and was abandoned. Please try again."
            }
            _ => "Generation failed. Please try again.",
        }
    }
}

pub type StudioResult<T> = std::result::Result<T, StudioError>;

/// Raw failure as observed at the HTTP boundary, before classification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiFailure {
    /// HTTP status, if a response was received.
    pub http_status: Option<u16>,
    /// `error.code` from the response body.
    pub code: Option<i64>,
    /// `error.status` from the response body, e.g. `RESOURCE_EXHAUSTED`.
    pub status: Option<String>,
    pub message: String,
}

impl ApiFailure {
    /// Builds a failure from a non-success response body. Bodies that are
    /// not JSON keep their raw text as the message.
    pub fn from_response(http_status: u16, body: &str) -> Self {
        let mut failure = ApiFailure {
            http_status: Some(http_status),
            message: body.trim().to_string(),
            ..Default::default()
        };
        if let Ok(v) = serde_json::from_str::<Value>(body) {
            if let Some(err) = v.get("error") {
                failure.absorb_error_object(err);
            }
        }
        failure
    }

    /// Builds a failure from an `error` object embedded in an otherwise
    /// successful payload (e.g. a finished long-running operation).
    pub fn from_error_object(err: &Value) -> Self {
        let mut failure = ApiFailure::default();
        failure.absorb_error_object(err);
        failure
    }

    pub fn network(message: impl Into<String>) -> Self {
        ApiFailure {
            message: format!("network error: {}", message.into()),
            ..Default::default()
        }
    }

    fn absorb_error_object(&mut self, err: &Value) {
        if let Some(s) = err.as_str() {
            self.message = s.to_string();
            return;
        }
        self.code = err.get("code").and_then(Value::as_i64);
        self.status = err
            .get("status")
            .and_then(Value::as_str)
            .map(str::to_string);
        if let Some(m) = err.get("message").and_then(Value::as_str) {
            self.message = m.to_string();
        }
    }

    /// Maps the failure to a kind. Checked in order: numeric code, nested
    /// error status, then lower-cased message text.
    pub fn classify(&self) -> ErrorKind {
        let code = self.code.or(self.http_status.map(i64::from));
        if let Some(kind) = code.and_then(kind_for_code) {
            return kind;
        }
        if let Some(kind) = self.status.as_deref().and_then(kind_for_status) {
            return kind;
        }
        kind_for_message(&self.message.to_lowercase())
    }

    pub fn into_error(self) -> StudioError {
        let kind = self.classify();
        let message = if self.message.is_empty() {
            match self.http_status {
                Some(s) => format!("request failed with HTTP {s}"),
                None => "request failed".to_string(),
            }
        } else {
            self.message
        };
        StudioError::new(kind, message)
    }
}

impl From<ApiFailure> for StudioError {
    fn from(failure: ApiFailure) -> Self {
        failure.into_error()
    }
}

fn kind_for_code(code: i64) -> Option<ErrorKind> {
    match code {
        429 => Some(ErrorKind::RateLimited),
        401 | 403 => Some(ErrorKind::InvalidCredential),
        404 => Some(ErrorKind::EntityNotFound),
        _ => None,
    }
}

fn kind_for_status(status: &str) -> Option<ErrorKind> {
    match status {
        "RESOURCE_EXHAUSTED" => Some(ErrorKind::RateLimited),
        "UNAUTHENTICATED" | "PERMISSION_DENIED" => Some(ErrorKind::InvalidCredential),
        "NOT_FOUND" => Some(ErrorKind::EntityNotFound),
        _ => None,
    }
}

fn kind_for_message(msg: &str) -> ErrorKind {
    const RATE: &[&str] = &["429", "quota", "rate limit", "resource_exhausted", "too many requests"];
    const CREDENTIAL: &[&str] = &["api key not valid", "api_key_invalid", "invalid api key", "permission denied"];
    const NOT_FOUND: &[&str] = &["requested entity was not found", "not found"];
    const SAFETY: &[&str] = &["safety", "blocked", "prohibited", "responsible ai", "violat"];
    const NETWORK: &[&str] = &["network error", "failed to fetch", "connection refused", "dns error", "timed out"];

    let has = |needles: &[&str]| needles.iter().any(|n| msg.contains(n));
    if has(RATE) {
        ErrorKind::RateLimited
    } else if has(CREDENTIAL) {
        ErrorKind::InvalidCredential
    } else if has(NOT_FOUND) {
        ErrorKind::EntityNotFound
    } else if has(SAFETY) {
        ErrorKind::ContentPolicyRejected
    } else if has(NETWORK) {
        ErrorKind::NetworkUnreachable
    } else {
        ErrorKind::Unknown
    }
}
