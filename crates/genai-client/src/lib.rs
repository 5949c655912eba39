//! Generative language API client
//!
//! Thin REST boundary to the upstream generative AI provider. Everything the
//! rest of the workspace sees from a provider call is either the generated
//! text or a `CallError` — a tagged error carrying the HTTP status, an
//! optional provider-supplied retry-delay hint (parsed from the structured
//! error detail), and the error message. Retry policy lives in `genai-pool`;
//! this crate only normalizes, it never retries.

pub mod client;
pub mod error;
pub mod types;

pub use client::GenAiClient;
pub use error::{CallError, Result, parse_retry_delay};
pub use types::{Content, GenerateRequest, GenerateResponse, Part};
