//! Passthrough factory
//!
//! Opens nothing: "connecting" yields the target and the option set the
//! connection would be opened with. Hosts that drive their own driver use it
//! behind `OAuthConnector` to obtain the authorized options.

use std::future::Future;
use std::pin::Pin;

use device_auth::ConnectOptions;

use crate::{ConnectionFactory, Result};

/// Target and options a connection would be opened with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConnection {
    pub target: String,
    pub options: ConnectOptions,
}

pub struct Passthrough;

impl ConnectionFactory for Passthrough {
    type Connection = ResolvedConnection;

    fn connect<'a>(
        &'a self,
        target: &'a str,
        options: &'a ConnectOptions,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Connection>> + Send + 'a>> {
        Box::pin(async move {
            Ok(ResolvedConnection {
                target: target.to_string(),
                options: options.clone(),
            })
        })
    }
}
