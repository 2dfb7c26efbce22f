//! `application/x-www-form-urlencoded` encoding for token endpoint requests
//!
//! Generic encoders escape `:` and `/`, which mangles grant type URNs such as
//! `urn:ietf:params:oauth:grant-type:device_code` on providers that compare
//! the raw body. This profile leaves ASCII letters, digits and `-._~:/`
//! untouched, turns a space into `+` and percent-encodes every other UTF-8
//! byte with uppercase hex.

use std::fmt::Write;

/// Encode key/value pairs, preserving their order.
pub fn encode<I, K, V>(pairs: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut out = String::new();
    for (key, value) in pairs {
        if !out.is_empty() {
            out.push('&');
        }
        encode_component(key.as_ref(), &mut out);
        out.push('=');
        encode_component(value.as_ref(), &mut out);
    }
    out
}

/// Encode a single key or value.
pub fn encode_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    encode_component(value, &mut out);
    out
}

fn encode_component(input: &str, out: &mut String) {
    for byte in input.bytes() {
        if is_safe(byte) {
            out.push(byte as char);
        } else if byte == b' ' {
            out.push('+');
        } else {
            // Writing to a String cannot fail
            let _ = write!(out, "%{byte:02X}");
        }
    }
}

fn is_safe(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~' | b':' | b'/')
}
