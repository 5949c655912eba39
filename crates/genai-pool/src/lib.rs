//! Key pool for the generative AI provider
//!
//! Manages a pool of API keys with rotation, per-key throughput limiting,
//! per-key call serialization, and retry orchestration. The pool is the
//! single owner of key health state; the orchestrator drives transitions
//! from call outcomes.
//!
//! Key lifecycle:
//! 1. Keys are parsed and deduplicated from configuration at startup
//! 2. The orchestrator selects a key (priority first, then round-robin)
//! 3. The serializer admits one call per key at a time; the limiter gates
//!    admission against the per-minute/per-hour windows
//! 4. A 429 with a long retry-delay or quota message → `QuotaLimited` until
//!    the provider-hinted time (or local midnight absent a hint)
//! 5. A 403 leak report → `PermanentlyFailed`, admin clear only
//! 6. Quota expiry is lazy: checked on access, never timer-driven

pub mod classify;
pub mod error;
pub mod key;
pub mod limiter;
pub mod orchestrator;
pub mod pool;
pub mod serializer;

pub use classify::{FailureClass, classify};
pub use error::{Error, Result, format_wait};
pub use key::ApiKey;
pub use limiter::{Admission, DenyReason, LimiterConfig, ThroughputLimiter, UsageStats};
pub use orchestrator::{Orchestrator, RetryPolicy, RunOptions, StatusCallback};
pub use pool::{CredentialPool, KeyState, KeyStatus};
pub use serializer::CallSerializer;

/// Status-callback object type used across the limiter and orchestrator.
pub type StatusFn = dyn Fn(&str) + Send + Sync;
