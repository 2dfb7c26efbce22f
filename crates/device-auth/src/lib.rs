//! OAuth2 Device Authorization Grant client
//!
//! Provides:
//! - Connection option handling and per-attempt `Configuration`
//! - OIDC endpoint discovery
//! - The device flow and refresh token exchange (`DeviceAuthorizer`)
//! - The `Token` model and JWT expiry extraction
//! - Device code presenters (console, loopback page, silent)

pub mod config;
pub mod constants;
pub mod device_flow;
pub mod discovery;
pub mod error;
pub mod form;
pub mod notify;
pub mod options;
pub mod target;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod token;

pub use config::{Configuration, TokenCacheMode, TokenType, TrustPolicy};
pub use device_flow::DeviceAuthorizer;
pub use discovery::{Endpoints, discover};
pub use error::{Error, Result};
pub use notify::{
    ConsolePresenter, DeviceCodePresenter, DevicePrompt, LoopbackPresenter, Presentation,
    PresenterKind, SilentPresenter, presenter_for,
};
pub use options::{ConnectOptions, is_database_key, is_secret_key};
pub use target::connection_identity;
pub use token::{Token, jwt_expiry};
