//! Token service metrics
//!
//! Counters recorded through the `metrics` facade; the host decides whether
//! and where to export them.
//!
//! - `token_cache_lookups_total` (counter): label `outcome`
//!   (`hit`, `miss`, `expired`, `collision`, `disabled`)
//! - `token_refresh_total` (counter): label `outcome` (`success`, `failure`)
//! - `device_flow_total` (counter): label `outcome`
//!   (`success`, `disabled`, `failure`)

pub const CACHE_LOOKUPS: &str = "token_cache_lookups_total";
pub const REFRESHES: &str = "token_refresh_total";
pub const DEVICE_FLOWS: &str = "device_flow_total";

pub fn record_lookup(outcome: &'static str) {
    metrics::counter!(CACHE_LOOKUPS, "outcome" => outcome).increment(1);
}

pub fn record_refresh(outcome: &'static str) {
    metrics::counter!(REFRESHES, "outcome" => outcome).increment(1);
}

pub fn record_device_flow(outcome: &'static str) {
    metrics::counter!(DEVICE_FLOWS, "outcome" => outcome).increment(1);
}
