//! device-login
//!
//! Obtains a database bearer token through the OAuth2 device flow and prints
//! the connect options a driver should use:
//! 1. Loads the TOML config and overlays the client secret
//! 2. Reuses, refreshes or acquires a token for the target
//! 3. Prints the options with `user = jwt:<token>` as JSON on stdout

mod config;
mod error;

use std::sync::Arc;

use anyhow::{Context, Result};
use connector::{ConnectionFactory, OAuthConnector, Passthrough};
use token_cache::TokenService;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::error::Error;

/// Parsed command line.
#[derive(Debug, Default, PartialEq, Eq)]
struct Args {
    config: Option<String>,
    purge_cache: bool,
    target: Option<String>,
}

fn parse_args(args: &[String]) -> std::result::Result<Args, Error> {
    let mut parsed = Args::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter
                    .next()
                    .ok_or_else(|| Error::Usage("--config requires a path".into()))?;
                parsed.config = Some(path.clone());
            }
            "--purge-cache" => parsed.purge_cache = true,
            flag if flag.starts_with("--") => {
                return Err(Error::Usage(format!("unknown flag {flag}")));
            }
            target => {
                if parsed.target.is_some() {
                    return Err(Error::Usage(format!("unexpected argument {target}")));
                }
                parsed.target = Some(target.to_string());
            }
        }
    }
    Ok(parsed)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support.
    // stdout carries the result, so logs go to stderr.
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let args = parse_args(&argv)
        .context("usage: device-login [--config <path>] [--purge-cache] <target>")?;

    let config_path = Config::resolve_path(args.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let tokens = Arc::new(match &config.oauth.token_cache_path {
        Some(path) => TokenService::with_store_path(path.clone()),
        None => TokenService::new(),
    });

    info!(
        issuer = %config.oauth.issuer,
        client_id = %config.oauth.client_id,
        token_file = %tokens.store_path().display(),
        "configuration loaded"
    );

    if args.purge_cache {
        tokens.purge().await.context("failed to purge token cache")?;
        if args.target.is_none() {
            return Ok(());
        }
    }

    let target = args
        .target
        .ok_or_else(|| Error::Usage("missing connection target".into()))?;
    if !connector::accepts_target(&target) {
        return Err(Error::UnsupportedTarget(target).into());
    }

    let options = config.connect_options();
    let connector = OAuthConnector::new(Passthrough, tokens);
    let resolved = connector
        .connect(&target, &options)
        .await
        .with_context(|| format!("failed to authorize connection to {target}"))?;

    let output =
        serde_json::to_string_pretty(&resolved.options).context("failed to serialize options")?;
    println!("{output}");
    Ok(())
}
