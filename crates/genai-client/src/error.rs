//! Normalized provider-call errors
//!
//! The provider reports failures as a JSON body with a nested `error` object:
//! `code`, `message`, `status`, and a `details` array. Rate-limit responses
//! carry a `RetryInfo` detail whose `retryDelay` field is a string of whole
//! or fractional seconds suffixed with `s` (e.g. `"30s"`, `"7.5s"`). All of
//! that is flattened here into `CallError::Http` so downstream classification
//! can match on plain fields instead of probing JSON shapes.

use serde_json::Value;

/// A normalized provider-call failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CallError {
    #[error("provider returned HTTP {status}: {message}")]
    Http {
        status: u16,
        /// Provider-supplied retry-delay hint in whole seconds, if present.
        retry_delay_secs: Option<u64>,
        message: String,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

/// Result alias for provider calls.
pub type Result<T> = std::result::Result<T, CallError>;

impl CallError {
    /// Build an `Http` error from a non-success response body.
    ///
    /// Falls back to the raw body (truncated) as the message when the body is
    /// not the expected JSON error shape.
    pub fn from_response(status: u16, body: &str) -> Self {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let message = parsed
            .as_ref()
            .and_then(|v| v.get("error"))
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| truncate(body, 300));
        let retry_delay_secs = parsed.as_ref().and_then(parse_retry_delay);
        CallError::Http {
            status,
            retry_delay_secs,
            message,
        }
    }

    /// HTTP status code, if this error came from an HTTP response.
    pub fn status(&self) -> Option<u16> {
        match self {
            CallError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Error message text used for keyword classification.
    pub fn message(&self) -> &str {
        match self {
            CallError::Http { message, .. } => message,
            CallError::Network(m) | CallError::InvalidResponse(m) => m,
        }
    }
}

/// Extract the retry-delay hint from a provider error body.
///
/// Looks through `error.details[]` for any entry with a `retryDelay` string
/// and parses it to whole seconds. Fractional values are rounded down; a
/// missing `s` suffix is tolerated.
pub fn parse_retry_delay(body: &Value) -> Option<u64> {
    let details = body.get("error")?.get("details")?.as_array()?;
    for detail in details {
        if let Some(delay) = detail.get("retryDelay").and_then(|d| d.as_str()) {
            let trimmed = delay.trim().trim_end_matches('s');
            if let Ok(secs) = trimmed.parse::<f64>()
                && secs.is_finite()
                && secs >= 0.0
            {
                return Some(secs as u64);
            }
        }
    }
    None
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}
