//! Shared types for the device-auth workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
