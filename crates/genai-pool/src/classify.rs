//! Failure classification for provider calls
//!
//! Maps a normalized `CallError` to the retry strategy it deserves. The 429
//! split matters most: a short provider-supplied retry-delay is transient
//! throttling (wait or rotate, no state change), while a long delay or a
//! quota-worded message means the key's budget is gone until the hinted
//! time. The boundary between the two is the caller-supplied threshold, not
//! a constant — provider behavior around the hint has no documented
//! guarantee.

use genai_client::CallError;

/// Message fragments in a 403 body that indicate the key itself was reported
/// compromised. These keys are dead: the provider will never accept them
/// again.
const LEAK_PATTERNS: &[&str] = &[
    "reported as leaked",
    "key was leaked",
    "has been reported",
    "publicly exposed",
];

/// Message fragments that confirm a 429 is quota exhaustion rather than
/// momentary throttling.
const QUOTA_PATTERNS: &[&str] = &[
    "quota",
    "rate limit",
    "resource_exhausted",
    "daily limit",
    "billing",
];

/// Message fragments that make a status-less or unrecognized error look like
/// a credential problem worth rotating past.
const KEY_PATTERNS: &[&str] = &[
    "api key",
    "api_key",
    "permission",
    "unauthorized",
    "unauthenticated",
    "quota",
];

/// How the orchestrator should react to a failed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureClass {
    /// Key reported compromised: permanently disable, never retry on it.
    LeakedKey,
    /// 403 without a leak signature: flag the key, rotate.
    Forbidden,
    /// Short-term 429: wait out the hint or rotate; no key state change.
    Throttled { retry_delay_secs: u64 },
    /// Quota exhaustion. `confirmed` is false when the 429 carried neither a
    /// usable delay nor quota wording — the pool degrades that to a
    /// temporary failure.
    QuotaLimited {
        confirmed: bool,
        retry_delay_secs: Option<u64>,
    },
    /// 401 or a key/permission-worded error: flag the key, rotate.
    AuthFailure,
    /// 5xx: retry the same key with backoff.
    Transient,
    /// Unrecognized: propagate immediately, no retry.
    Unknown,
}

/// Classify a failed call. `quota_threshold_secs` divides short-term
/// throttling from quota exhaustion on the retry-delay hint.
pub fn classify(err: &CallError, quota_threshold_secs: u64) -> FailureClass {
    let message = err.message().to_lowercase();
    match err.status() {
        Some(403) if matches_any(&message, LEAK_PATTERNS) => FailureClass::LeakedKey,
        Some(403) => FailureClass::Forbidden,
        Some(429) => classify_429(err, &message, quota_threshold_secs),
        Some(401) => FailureClass::AuthFailure,
        Some(500 | 502 | 503 | 504) => FailureClass::Transient,
        _ if matches_any(&message, KEY_PATTERNS) => FailureClass::AuthFailure,
        _ => FailureClass::Unknown,
    }
}

/// Split a 429 on the retry-delay hint, falling back to message wording.
fn classify_429(err: &CallError, message: &str, threshold_secs: u64) -> FailureClass {
    let retry_delay_secs = match err {
        CallError::Http {
            retry_delay_secs, ..
        } => *retry_delay_secs,
        _ => None,
    };
    match retry_delay_secs {
        Some(delay) if delay > 0 && delay < threshold_secs => FailureClass::Throttled {
            retry_delay_secs: delay,
        },
        Some(delay) if delay >= threshold_secs => FailureClass::QuotaLimited {
            confirmed: true,
            retry_delay_secs: Some(delay),
        },
        _ => FailureClass::QuotaLimited {
            confirmed: matches_any(message, QUOTA_PATTERNS),
            retry_delay_secs: None,
        },
    }
}

fn matches_any(message: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| message.contains(p))
}
