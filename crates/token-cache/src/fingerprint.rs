//! Cache key derivation
//!
//! The key is the lowercase hex SHA-256 of `k=v;` for every identity-relevant
//! option in key order, followed by `connection=<identity>;`. Secrets and the
//! database name are left out, so one session serves every database on a
//! server and changing a password never forks the cache.

use device_auth::ConnectOptions;
use sha2::{Digest, Sha256};

/// Cache key for a connection identity and option set.
pub fn cache_key(connection: &str, options: &ConnectOptions) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in options.identity_view().iter() {
        hasher.update(format!("{key}={value};"));
    }
    hasher.update(format!("connection={connection};"));
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONN: &str = "postgres:db.example.com:5433";

    fn options() -> ConnectOptions {
        ConnectOptions::from([
            ("user", "alice"),
            ("oauth2_issuer", "https://idp.example.com"),
            ("oauth2_client_id", "cid"),
        ])
    }

    #[test]
    fn key_is_sha256_of_sorted_pairs() {
        let expected = {
            let mut h = Sha256::new();
            h.update(
                "oauth2_client_id=cid;oauth2_issuer=https://idp.example.com;user=alice;\
                 connection=postgres:db.example.com:5433;",
            );
            format!("{:x}", h.finalize())
        };
        assert_eq!(cache_key(CONN, &options()), expected);
        assert_eq!(expected.len(), 64);
    }

    #[test]
    fn password_and_database_do_not_change_key() {
        let mut other = options();
        other.insert("password", "hunter2");
        other.insert("dbname", "reports");
        other.insert("oauth2_client_secret", "shh");
        assert_eq!(cache_key(CONN, &options()), cache_key(CONN, &other));
    }

    #[test]
    fn other_options_and_connection_change_key() {
        let mut other = options();
        other.insert("sslmode", "require");
        assert_ne!(cache_key(CONN, &options()), cache_key(CONN, &other));
        assert_ne!(
            cache_key(CONN, &options()),
            cache_key("postgres:db.example.com:5434", &options())
        );
    }
}
