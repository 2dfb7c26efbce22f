//! Service-specific error types

use thiserror::Error;

/// Command line errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("usage: {0}")]
    Usage(String),

    #[error("unsupported connection target: {0} (expected postgres://, postgresql:// or yb://)")]
    UnsupportedTarget(String),
}
