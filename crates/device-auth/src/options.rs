//! Connection option sets
//!
//! `ConnectOptions` is the string map a caller hands to the connection layer.
//! OAuth2 parameters ride along in it (see `constants`), which is why the
//! same map drives configuration, the token's option snapshot and the cache
//! identity.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::{DATABASE_KEYS, SECRET_KEYS};

/// Sorted string→string option map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectOptions(BTreeMap<String, String>);

impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Non-empty value for `key`, trimmed.
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copy without secret keys. This is the form stored in a token and
    /// written to disk.
    pub fn without_secrets(&self) -> Self {
        self.iter()
            .filter(|(k, _)| !is_secret_key(k))
            .collect()
    }

    /// Copy without secret keys and database-name keys. Two option sets with
    /// equal identity views belong to the same user session.
    pub fn identity_view(&self) -> Self {
        self.iter()
            .filter(|(k, _)| !is_secret_key(k) && !is_database_key(k))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ConnectOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for ConnectOptions {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

/// Whether `key` names a secret (`password`, client secret).
pub fn is_secret_key(key: &str) -> bool {
    SECRET_KEYS.iter().any(|s| s.eq_ignore_ascii_case(key))
}

/// Whether `key` names the target database.
pub fn is_database_key(key: &str) -> bool {
    DATABASE_KEYS.iter().any(|d| d.eq_ignore_ascii_case(key))
}
