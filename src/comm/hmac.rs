//! HMAC-SHA256 signing keys, one per HTTP target.
//!
//! Servers may hand out a fresh key in a response header; the relay engine
//! routes it here by the action that was in flight. Keys are wiped from
//! memory when replaced.

use log::{info, warn};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::sync::{Mutex, MutexGuard, PoisonError};
use zeroize::Zeroizing;

/// Maximum key length in bytes (exclusive).
pub const HMAC_SHA256_KEY_MAX_LEN: usize = 64;

const BLOCK_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HmacTarget {
    HttpRuuvi,
    HttpCustom,
    Stats,
}

/// Per-target signing keys. An empty key disables signing.
#[derive(Default)]
pub struct HmacKeys {
    ruuvi: Mutex<Zeroizing<String>>,
    custom: Mutex<Zeroizing<String>>,
    stats: Mutex<Zeroizing<String>>,
}

impl HmacKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a key. Keys of [`HMAC_SHA256_KEY_MAX_LEN`] bytes or more are
    /// rejected and the old key is kept.
    pub fn set_key(&self, target: HmacTarget, key: &str) -> bool {
        if key.len() >= HMAC_SHA256_KEY_MAX_LEN {
            warn!(
                "HMAC key for {:?} is too long ({} bytes), ignored",
                target,
                key.len()
            );
            return false;
        }
        *self.slot(target) = Zeroizing::new(key.to_string());
        info!("HMAC key for {:?} updated", target);
        true
    }

    pub fn is_empty(&self, target: HmacTarget) -> bool {
        self.slot(target).is_empty()
    }

    /// Lowercase hex HMAC-SHA256 of `msg`, or an empty string when no key
    /// is set for `target`.
    pub fn calc(&self, target: HmacTarget, msg: &[u8]) -> String {
        let key = self.slot(target).clone();
        if key.is_empty() {
            return String::new();
        }
        let mac = hmac_sha256(key.as_bytes(), msg);
        let mut hex = String::with_capacity(mac.len() * 2);
        for byte in mac {
            let _ = write!(hex, "{:02x}", byte);
        }
        hex
    }

    fn slot(&self, target: HmacTarget) -> MutexGuard<'_, Zeroizing<String>> {
        let slot = match target {
            HmacTarget::HttpRuuvi => &self.ruuvi,
            HmacTarget::HttpCustom => &self.custom,
            HmacTarget::Stats => &self.stats,
        };
        slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn hmac_sha256(key: &[u8], msg: &[u8]) -> [u8; 32] {
    let mut block = Zeroizing::new([0u8; BLOCK_LEN]);
    if key.len() > BLOCK_LEN {
        block[..32].copy_from_slice(&Sha256::digest(key));
    } else {
        block[..key.len()].copy_from_slice(key);
    }

    let mut inner = Sha256::new();
    inner.update(block.iter().map(|b| b ^ 0x36).collect::<Vec<u8>>());
    inner.update(msg);
    let inner_hash = inner.finalize();

    let mut outer = Sha256::new();
    outer.update(block.iter().map(|b| b ^ 0x5c).collect::<Vec<u8>>());
    outer.update(inner_hash);
    outer.finalize().into()
}
