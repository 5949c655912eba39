//! Error types for pool operations

use std::time::Duration;

use genai_client::CallError;

/// Errors from pool, limiter, serializer, and orchestrator operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no valid API keys configured")]
    NoValidCredentials,

    #[error("all keys quota limited; earliest usable in {}", format_wait(.min_wait))]
    AllKeysQuotaLimited { min_wait: Duration },

    #[error("all keys unavailable (permanently failed or exhausted)")]
    AllKeysUnavailable,

    #[error("rate limit wait exceeded the iteration cap for key {key}")]
    RateLimitTimeout { key: String },

    #[error("call queue cleared while waiting for a slot")]
    QueueCleared,

    #[error("attempts exhausted after {attempts} tries (last key {key}): {source}")]
    AttemptsExhausted {
        attempts: u32,
        key: String,
        source: CallError,
    },

    #[error(transparent)]
    Call(#[from] CallError),
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Human-readable wait rendering for status messages and error text
/// ("2h 5m", "3m 12s", "45s").
pub fn format_wait(d: &Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}
