//! Token cache and service
//!
//! Keeps device flow tokens per connection identity and option set, reuses
//! them until they expire, refreshes them when possible and optionally
//! persists them to an owner-only JSON file.

pub mod error;
pub mod fingerprint;
pub mod metrics;
pub mod service;
pub mod store;

pub use error::{Error, Result};
pub use fingerprint::cache_key;
pub use service::TokenService;
pub use store::TokenStore;
