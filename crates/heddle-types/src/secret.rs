//! Secret handling for credentials and upstream API keys.
//!
//! [`SecretString`] wraps sensitive values (bearer credentials, provider
//! keys, per-request override keys) so they never appear in logs, Debug
//! output, or serialized JSON. [`mask`] and [`hash_prefix`] produce the
//! only representations that may be logged: an asterisk mask for human
//! eyes and a short digest for correlating repeated use of the same
//! credential across log lines.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// A string value that should not appear in logs, Debug output, or
/// serialized JSON.
///
/// - `Debug` prints `[REDACTED]` (or `""` if empty)
/// - `Serialize` emits an empty string (never the actual value)
/// - `Deserialize` accepts a plain string
/// - `Display` prints `[REDACTED]` (or empty if the value is empty)
/// - [`expose()`](SecretString::expose) returns the inner value for the
///   few sites that genuinely need it (signature checks, auth headers)
#[derive(Clone, Default)]
pub struct SecretString(String);

impl SecretString {
    /// Create a new `SecretString` wrapping the given value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get the actual secret value. Use sparingly and only where needed
    /// (e.g. HTTP auth headers, JWT verification).
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the wrapped value is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Asterisk mask of the wrapped value, safe to log.
    pub fn masked(&self) -> String {
        mask(&self.0)
    }

    /// Short digest of the wrapped value, safe to log.
    pub fn hash_prefix(&self) -> String {
        hash_prefix(&self.0)
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "\"\"")
        } else {
            write!(f, "\"[REDACTED]\"")
        }
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "")
        } else {
            write!(f, "[REDACTED]")
        }
    }
}

impl Serialize for SecretString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // Never serialize the actual secret value.
        serializer.serialize_str("")
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(SecretString(s))
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        SecretString(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        SecretString(s.to_string())
    }
}

impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

/// Mask a secret for display, keeping only a short recognizable tail.
///
/// Values longer than 6 characters keep the last 4; shorter non-empty
/// values keep the last 2. Everything else is asterisks, with the mask
/// length capped so the output never reveals the secret's exact length.
pub fn mask(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    let chars: Vec<char> = value.chars().collect();
    let keep = if chars.len() > 6 { 4 } else { 2.min(chars.len()) };
    let tail: String = chars[chars.len() - keep..].iter().collect();
    let stars = "*".repeat((chars.len() - keep).min(8));
    format!("{stars}{tail}")
}

/// First 8 hex characters of the SHA-256 digest of `value`.
///
/// Enough to correlate repeated use of one credential in logs without
/// being reversible to the credential itself.
pub fn hash_prefix(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..8].to_string()
}
