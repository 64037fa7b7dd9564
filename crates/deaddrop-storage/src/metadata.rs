//! Encrypted per-drop metadata envelope.
//!
//! Each drop's metadata is encrypted under a subkey derived from the storage
//! key via HKDF-SHA256 with info `"dead-drop-metadata-" + drop_id`, which
//! binds the subkey to the identifier: metadata from drop A cannot be
//! decrypted with the subkey for drop B. The identifier also travels as AAD
//! on the AES-256-GCM envelope.
//!
//! On-disk format (JSON, mode 0600):
//! ```text
//! { "version": 1, "encrypted_data": "<hex>", "nonce": "<24 hex chars>" }
//! ```
//!
//! Pre-1.0 servers wrote plaintext `key=value` lines; those are still
//! accepted on read, but never written.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fs;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use zeroize::{Zeroize, Zeroizing};

use deaddrop_core::{DropError, DropResult};
use deaddrop_crypto::{SecretKey, KEY_SIZE, NONCE_SIZE};

const METADATA_VERSION: i64 = 1;
const METADATA_INFO_PREFIX: &str = "dead-drop-metadata-";

/// On-disk JSON envelope for encrypted metadata.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: i64,
    /// hex-encoded ciphertext + tag
    encrypted_data: String,
    /// hex-encoded 12-byte nonce
    nonce: String,
}

/// Decrypted metadata content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataPayload {
    pub filename: String,
    pub receipt: String,
    /// Unix timestamp truncated to the hour
    pub timestamp_hour: i64,
    /// hex SHA-256 of the plaintext; absent on drops saved by pre-1.0 servers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
}

/// Truncate a Unix timestamp to the hour.
pub fn truncate_to_hour(unix_secs: i64) -> i64 {
    unix_secs - unix_secs.rem_euclid(3600)
}

/// Current wall-clock time, truncated to the hour.
pub fn now_hour() -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    truncate_to_hour(now)
}

/// Derive the per-drop metadata subkey from the storage key.
fn derive_metadata_key(storage_key: &SecretKey, drop_id: &str) -> DropResult<SecretKey> {
    let hkdf = Hkdf::<Sha256>::new(None, storage_key.as_bytes());
    let info = format!("{METADATA_INFO_PREFIX}{drop_id}");

    let mut okm = [0u8; KEY_SIZE];
    hkdf.expand(info.as_bytes(), &mut okm)
        .map_err(|e| DropError::CryptoSetup(format!("HKDF expand failed: {e}")))?;

    let key = SecretKey::from_bytes(okm);
    okm.zeroize();
    Ok(key)
}

/// Encrypt and write a metadata envelope.
pub fn save_metadata(
    path: &Path,
    storage_key: &SecretKey,
    drop_id: &str,
    payload: &MetadataPayload,
) -> DropResult<()> {
    let meta_key = derive_metadata_key(storage_key, drop_id)?;

    let plaintext = Zeroizing::new(
        serde_json::to_vec(payload)
            .map_err(|e| DropError::CryptoSetup(format!("metadata marshal: {e}")))?,
    );

    let cipher = Aes256Gcm::new_from_slice(meta_key.as_bytes())
        .map_err(|e| DropError::CryptoSetup(format!("cipher init: {e}")))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: &plaintext,
                aad: drop_id.as_bytes(),
            },
        )
        .map_err(|_| DropError::CryptoSetup("metadata encryption failed".into()))?;

    let envelope = Envelope {
        version: METADATA_VERSION,
        encrypted_data: hex::encode(ciphertext),
        nonce: hex::encode(nonce_bytes),
    };
    let envelope_json = serde_json::to_vec(&envelope)
        .map_err(|e| DropError::CryptoSetup(format!("envelope marshal: {e}")))?;

    let mut f = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    f.write_all(&envelope_json)?;

    Ok(())
}

/// Read and decrypt a metadata envelope, falling back to the legacy
/// plaintext format for drops written by pre-1.0 servers.
pub fn load_metadata(
    path: &Path,
    storage_key: &SecretKey,
    drop_id: &str,
) -> DropResult<MetadataPayload> {
    let data = fs::read(path).map_err(|_| DropError::NotFound)?;

    if let Ok(envelope) = serde_json::from_slice::<Envelope>(&data) {
        if envelope.version <= 0 {
            return Err(DropError::NotFound);
        }
        return decrypt_envelope(&envelope, storage_key, drop_id);
    }

    parse_legacy_metadata(&data)
}

fn decrypt_envelope(
    envelope: &Envelope,
    storage_key: &SecretKey,
    drop_id: &str,
) -> DropResult<MetadataPayload> {
    let meta_key = derive_metadata_key(storage_key, drop_id)?;

    let ciphertext = hex::decode(&envelope.encrypted_data).map_err(|_| DropError::NotFound)?;
    let nonce_bytes = hex::decode(&envelope.nonce).map_err(|_| DropError::NotFound)?;
    if nonce_bytes.len() != NONCE_SIZE {
        return Err(DropError::AuthFailure);
    }
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(meta_key.as_bytes())
        .map_err(|e| DropError::CryptoSetup(format!("cipher init: {e}")))?;

    let mut plaintext = cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext.as_slice(),
                aad: drop_id.as_bytes(),
            },
        )
        .map_err(|_| DropError::AuthFailure)?;

    let payload = serde_json::from_slice(&plaintext);
    plaintext.zeroize();

    payload.map_err(|_| DropError::AuthFailure)
}

/// Parse the legacy plaintext `key=value` format.
fn parse_legacy_metadata(data: &[u8]) -> DropResult<MetadataPayload> {
    let text = std::str::from_utf8(data).map_err(|_| DropError::NotFound)?;

    let mut payload = MetadataPayload {
        filename: String::new(),
        receipt: String::new(),
        timestamp_hour: 0,
        file_hash: None,
    };
    let mut any = false;

    for line in text.lines() {
        if let Some(value) = line.strip_prefix("filename=") {
            payload.filename = value.to_owned();
            any = true;
        } else if let Some(value) = line.strip_prefix("receipt=") {
            payload.receipt = value.to_owned();
            any = true;
        } else if let Some(value) = line.strip_prefix("timestamp=") {
            payload.timestamp_hour = value.parse().unwrap_or(0);
            any = true;
        }
    }

    if any {
        Ok(payload)
    } else {
        Err(DropError::NotFound)
    }
}
