//! Service-specific error types

use thiserror::Error;

/// Errors from the page-generation workflow and its thin collaborators.
///
/// Per-request HTTP errors (bad request bodies, unknown task ids) are
/// handled directly by the route handlers as HTTP responses — they never
/// need to propagate as Rust errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("generation failed: {0}")]
    Generation(#[from] genai_pool::Error),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("product fetch failed: {0}")]
    Products(String),

    #[error("history persistence failed: {0}")]
    History(String),
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;
