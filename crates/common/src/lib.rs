//! Common types for the pagegen workspace

mod secret;
mod error;
mod mask;

pub use secret::Secret;
pub use error::{Error, Result};
pub use mask::mask_key;
