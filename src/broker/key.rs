//! Request key derivation.
//!
//! A key names one logical unit of work. In advanced mode identical
//! (method, path, body) triples share a key, which is what lets concurrent
//! callers coalesce. In simple mode the body is replaced by the current time,
//! so every call gets a fresh key.

use md5::{Digest, Md5};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Disambiguates simple-mode keys issued within the same clock tick.
static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// How request keys are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMode {
    /// method + path + timestamp; never coalesces.
    Simple,
    /// method + path + body; identical requests coalesce.
    Advanced,
}

impl KeyMode {
    pub fn from_advanced(advanced: bool) -> Self {
        if advanced {
            KeyMode::Advanced
        } else {
            KeyMode::Simple
        }
    }
}

/// Derive the 32-character lowercase hex key for a request.
pub fn derive_key(mode: KeyMode, method: &str, path: &str, body: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(method.as_bytes());
    hasher.update(path.as_bytes());
    match mode {
        KeyMode::Advanced => hasher.update(body.as_bytes()),
        KeyMode::Simple => hasher.update(timestamp().as_bytes()),
    }
    format!("{:x}", hasher.finalize())
}

fn timestamp() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{}.{:09}#{}", now.as_secs(), now.subsec_nanos(), seq)
}
