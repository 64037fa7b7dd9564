//! HMAC-based retrieval receipts.
//!
//! A receipt is HMAC-SHA256(receipt_key, drop_id) rendered as 64 lowercase
//! hex chars. Generation is deterministic, so the server keeps no per-drop
//! receipt state and retrieval is naturally idempotent.

use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use sha2::Sha256;
use std::path::Path;

use deaddrop_core::DropResult;
use deaddrop_crypto::{load_or_generate_key, MasterKey, SecretKey, PURPOSE_RECEIPT};

type HmacSha256 = Hmac<Sha256>;

/// Generates and validates receipts, keyed by a persisted receipt secret.
pub struct ReceiptAuthority {
    secret: Mutex<SecretKey>,
}

impl ReceiptAuthority {
    /// Load or generate the receipt key at `key_path` using the same
    /// wrapping policy as the encryption key.
    pub fn open(key_path: &Path, master: Option<&MasterKey>) -> DropResult<Self> {
        let secret = load_or_generate_key(key_path, master, PURPOSE_RECEIPT)?;
        Ok(Self {
            secret: Mutex::new(secret),
        })
    }

    /// Deterministic receipt for a drop id: 64 lowercase hex chars.
    pub fn generate(&self, drop_id: &str) -> String {
        let secret = self.secret.lock();
        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
        mac.update(drop_id.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time receipt validation. Returns false for any mismatch,
    /// including malformed hex, without revealing which check failed.
    pub fn validate(&self, drop_id: &str, receipt: &str) -> bool {
        let Ok(presented) = hex::decode(receipt) else {
            return false;
        };

        let secret = self.secret.lock();
        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
        mac.update(drop_id.as_bytes());
        mac.verify_slice(&presented).is_ok()
    }

    /// Zero the receipt secret in place.
    pub fn close(&self) {
        self.secret.lock().wipe();
    }

    pub fn is_closed(&self) -> bool {
        self.secret.lock().is_wiped()
    }
}
