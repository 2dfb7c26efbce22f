//! Connection target normalization
//!
//! A token is bound to the server it was issued for, not to a database on
//! that server. The identity keeps scheme, host, port and the query
//! parameters that shape the session, and drops the path along with any
//! secret or database-name parameter.

use reqwest::Url;

use crate::error::{Error, Result};
use crate::options::{is_database_key, is_secret_key};

/// Normalize a target URL into `scheme:host[:port][?query]`.
///
/// Accepts plain URLs (`postgres://host:5432/db`), `jdbc:` prefixed ones, and
/// the authority-without-slashes form (`postgresql:host:5432/db`).
pub fn connection_identity(target: &str) -> Result<String> {
    let url = parse_target(target)?;
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| Error::Config(format!("connection target has no host: {target}")))?;

    let mut identity = format!("{}:{}", url.scheme(), host);
    if let Some(port) = url.port() {
        identity.push(':');
        identity.push_str(&port.to_string());
    }

    if let Some(query) = url.query() {
        let kept: Vec<&str> = query
            .split('&')
            .filter(|pair| {
                let key = pair.split('=').next().unwrap_or_default();
                !key.is_empty() && !is_secret_key(key) && !is_database_key(key)
            })
            .collect();
        if !kept.is_empty() {
            identity.push('?');
            identity.push_str(&kept.join("&"));
        }
    }

    Ok(identity)
}

fn parse_target(target: &str) -> Result<Url> {
    let trimmed = target.trim();
    let raw = match trimmed.get(..5) {
        Some(prefix) if prefix.eq_ignore_ascii_case("jdbc:") => &trimmed[5..],
        _ => trimmed,
    };

    let normalized = match raw.split_once(':') {
        Some((scheme, rest)) if !scheme.is_empty() && !rest.starts_with("//") => {
            format!("{scheme}://{rest}")
        }
        Some(_) => raw.to_string(),
        None => {
            return Err(Error::Config(format!(
                "connection target has no scheme: {target}"
            )));
        }
    };

    Url::parse(&normalized)
        .map_err(|e| Error::Config(format!("invalid connection target {target}: {e}")))
}
