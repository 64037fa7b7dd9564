//! Key wrapping and key-file lifecycle.
//!
//! Wrapped key blob (binary): `[12-byte nonce][32-byte ciphertext][16-byte tag]`,
//! AES-256-GCM under the master key. The purpose label travels as AAD so a
//! wrapped encryption key cannot be presented as a wrapped receipt key.
//!
//! Key files on disk are either plaintext (exactly 32 bytes, no master key
//! configured) or wrapped (exactly 60 bytes). A plaintext file is migrated to
//! the wrapped format on the first load that supplies a master key.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use std::fs;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use zeroize::Zeroize;

use deaddrop_core::{DropError, DropResult};

use crate::kdf::MasterKey;
use crate::{KEY_SIZE, NONCE_SIZE, WRAPPED_KEY_SIZE};

/// AAD label for the storage encryption key file.
pub const PURPOSE_ENCRYPTION: &[u8] = b"encryption-key";

/// AAD label for the receipt HMAC key file.
pub const PURPOSE_RECEIPT: &[u8] = b"receipt-key";

/// A 256-bit symmetric key. Zeroized on drop.
#[derive(Clone)]
pub struct SecretKey {
    bytes: [u8; KEY_SIZE],
}

impl SecretKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Generate a random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Overwrite the key material in place.
    pub fn wipe(&mut self) {
        self.bytes.zeroize();
    }

    pub fn is_wiped(&self) -> bool {
        self.bytes.iter().all(|b| *b == 0)
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Wrap (encrypt) a key under the master key with a fresh random nonce.
///
/// Output: `[12-byte nonce][ciphertext + 16-byte tag]` = exactly 60 bytes.
pub fn wrap_key(master: &MasterKey, key: &SecretKey, purpose: &[u8]) -> DropResult<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(master.as_bytes())
        .map_err(|e| DropError::CryptoSetup(format!("cipher init: {e}")))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: key.as_bytes(),
                aad: purpose,
            },
        )
        .map_err(|_| DropError::CryptoSetup("key wrapping failed".into()))?;

    let mut wrapped = Vec::with_capacity(WRAPPED_KEY_SIZE);
    wrapped.extend_from_slice(&nonce_bytes);
    wrapped.extend_from_slice(&ciphertext);
    Ok(wrapped)
}

/// Unwrap a 60-byte wrapped key blob.
///
/// Fails on a wrong master key, corrupted ciphertext, wrong purpose label or
/// any blob length other than 60 bytes.
pub fn unwrap_key(master: &MasterKey, wrapped: &[u8], purpose: &[u8]) -> DropResult<SecretKey> {
    if wrapped.len() != WRAPPED_KEY_SIZE {
        return Err(DropError::AuthFailure);
    }

    let (nonce_bytes, ciphertext) = wrapped.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);
    let cipher = Aes256Gcm::new_from_slice(master.as_bytes())
        .map_err(|e| DropError::CryptoSetup(format!("cipher init: {e}")))?;

    let mut plaintext = cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext,
                aad: purpose,
            },
        )
        .map_err(|_| DropError::AuthFailure)?;

    let key_bytes = match <[u8; KEY_SIZE]>::try_from(plaintext.as_slice()) {
        Ok(bytes) => bytes,
        Err(_) => {
            plaintext.zeroize();
            return Err(DropError::AuthFailure);
        }
    };
    plaintext.zeroize();

    Ok(SecretKey::from_bytes(key_bytes))
}

/// Load a key file, generating and persisting a new key if none exists.
///
/// With a master key configured, a 60-byte file is unwrapped and a legacy
/// 32-byte plaintext file is migrated to the wrapped format in place. A
/// wrapped file encountered without a master key is an error rather than a
/// silent regeneration: overwriting it would orphan every existing drop.
pub fn load_or_generate_key(
    path: &Path,
    master: Option<&MasterKey>,
    purpose: &[u8],
) -> DropResult<SecretKey> {
    if let Ok(data) = fs::read(path) {
        match (master, data.len()) {
            (None, KEY_SIZE) => {
                let mut data = data;
                let bytes = <[u8; KEY_SIZE]>::try_from(data.as_slice()).expect("length checked");
                data.zeroize();
                return Ok(SecretKey::from_bytes(bytes));
            }
            (None, WRAPPED_KEY_SIZE) => {
                return Err(DropError::CryptoSetup(format!(
                    "key file {} is wrapped but no master passphrase is configured",
                    path.display()
                )));
            }
            (Some(master), WRAPPED_KEY_SIZE) => return unwrap_key(master, &data, purpose),
            (Some(master), KEY_SIZE) => {
                // Plaintext key + master key: migrate to the wrapped format.
                let mut data = data;
                let bytes = <[u8; KEY_SIZE]>::try_from(data.as_slice()).expect("length checked");
                data.zeroize();
                let key = SecretKey::from_bytes(bytes);
                let wrapped = wrap_key(master, &key, purpose)?;
                write_key_file(path, &wrapped)?;
                return Ok(key);
            }
            // Any other size: the file is not a key; fall through and
            // generate a fresh one.
            _ => {}
        }
    }

    let key = SecretKey::generate();
    let to_write = match master {
        Some(master) => wrap_key(master, &key, purpose)?,
        None => key.as_bytes().to_vec(),
    };
    write_key_file(path, &to_write)?;

    Ok(key)
}

fn write_key_file(path: &Path, data: &[u8]) -> DropResult<()> {
    let mut f = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    f.write_all(data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_master_key() -> MasterKey {
        MasterKey::from_bytes([42u8; KEY_SIZE])
    }

    #[test]
    fn test_key_wrap_unwrap_roundtrip() {
        let master = test_master_key();
        let key = SecretKey::generate();

        let wrapped = wrap_key(&master, &key, PURPOSE_ENCRYPTION).unwrap();
        let unwrapped = unwrap_key(&master, &wrapped, PURPOSE_ENCRYPTION).unwrap();

        assert_eq!(key.as_bytes(), unwrapped.as_bytes());
    }

    #[test]
    fn test_wrapped_key_size() {
        let master = test_master_key();
        let key = SecretKey::generate();
        let wrapped = wrap_key(&master, &key, PURPOSE_ENCRYPTION).unwrap();

        // nonce (12) + key (32) + tag (16) = 60
        assert_eq!(wrapped.len(), WRAPPED_KEY_SIZE);
    }

    #[test]
    fn test_unwrap_wrong_master() {
        let master1 = MasterKey::from_bytes([1u8; KEY_SIZE]);
        let master2 = MasterKey::from_bytes([2u8; KEY_SIZE]);
        let key = SecretKey::generate();

        let wrapped = wrap_key(&master1, &key, PURPOSE_ENCRYPTION).unwrap();
        assert!(matches!(
            unwrap_key(&master2, &wrapped, PURPOSE_ENCRYPTION),
            Err(DropError::AuthFailure)
        ));
    }

    #[test]
    fn test_unwrap_wrong_purpose() {
        let master = test_master_key();
        let key = SecretKey::generate();

        let wrapped = wrap_key(&master, &key, PURPOSE_ENCRYPTION).unwrap();
        assert!(matches!(
            unwrap_key(&master, &wrapped, PURPOSE_RECEIPT),
            Err(DropError::AuthFailure)
        ));

        let wrapped = wrap_key(&master, &key, PURPOSE_RECEIPT).unwrap();
        assert!(matches!(
            unwrap_key(&master, &wrapped, PURPOSE_ENCRYPTION),
            Err(DropError::AuthFailure)
        ));
    }

    #[test]
    fn test_unwrap_wrong_length() {
        let master = test_master_key();
        let key = SecretKey::generate();
        let wrapped = wrap_key(&master, &key, PURPOSE_ENCRYPTION).unwrap();

        for len in [0, 12, 59, 61] {
            let mut blob = wrapped.clone();
            blob.resize(len, 0);
            assert!(
                unwrap_key(&master, &blob, PURPOSE_ENCRYPTION).is_err(),
                "length {len} must be rejected"
            );
        }
    }

    #[test]
    fn test_unwrap_corrupted() {
        let master = test_master_key();
        let key = SecretKey::generate();
        let mut wrapped = wrap_key(&master, &key, PURPOSE_ENCRYPTION).unwrap();
        wrapped[20] ^= 0xFF;

        assert!(unwrap_key(&master, &wrapped, PURPOSE_ENCRYPTION).is_err());
    }

    #[test]
    fn test_load_generates_plaintext_without_master() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".encryption.key");

        let key = load_or_generate_key(&path, None, PURPOSE_ENCRYPTION).unwrap();

        let on_disk = fs::read(&path).unwrap();
        assert_eq!(on_disk.len(), KEY_SIZE);
        assert_eq!(on_disk.as_slice(), key.as_bytes());
    }

    #[test]
    fn test_load_generates_wrapped_with_master() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".encryption.key");
        let master = test_master_key();

        let key = load_or_generate_key(&path, Some(&master), PURPOSE_ENCRYPTION).unwrap();

        let on_disk = fs::read(&path).unwrap();
        assert_eq!(on_disk.len(), WRAPPED_KEY_SIZE);

        let reloaded = load_or_generate_key(&path, Some(&master), PURPOSE_ENCRYPTION).unwrap();
        assert_eq!(key.as_bytes(), reloaded.as_bytes());
    }

    #[test]
    fn test_load_migrates_plaintext_to_wrapped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".encryption.key");
        let master = test_master_key();

        let orig: [u8; KEY_SIZE] = std::array::from_fn(|i| i as u8 + 5);
        fs::write(&path, orig).unwrap();

        let key = load_or_generate_key(&path, Some(&master), PURPOSE_ENCRYPTION).unwrap();
        assert_eq!(key.as_bytes(), &orig, "migrated key must match original");

        let on_disk = fs::read(&path).unwrap();
        assert_eq!(on_disk.len(), WRAPPED_KEY_SIZE, "file must now be wrapped");

        let reloaded = load_or_generate_key(&path, Some(&master), PURPOSE_ENCRYPTION).unwrap();
        assert_eq!(reloaded.as_bytes(), &orig);
    }

    #[test]
    fn test_load_wrapped_without_master_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".encryption.key");
        let master = test_master_key();

        load_or_generate_key(&path, Some(&master), PURPOSE_ENCRYPTION).unwrap();

        assert!(matches!(
            load_or_generate_key(&path, None, PURPOSE_ENCRYPTION),
            Err(DropError::CryptoSetup(_))
        ));
    }

    #[test]
    fn test_load_invalid_size_regenerates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".encryption.key");
        fs::write(&path, b"wrong-size").unwrap();

        let key = load_or_generate_key(&path, None, PURPOSE_ENCRYPTION).unwrap();
        assert!(!key.is_wiped());

        let on_disk = fs::read(&path).unwrap();
        assert_eq!(on_disk.len(), KEY_SIZE);
    }

    #[test]
    fn test_wipe() {
        let mut key = SecretKey::generate();
        assert!(!key.is_wiped());
        key.wipe();
        assert!(key.is_wiped());
        assert_eq!(key.as_bytes(), &[0u8; KEY_SIZE]);
    }
}
