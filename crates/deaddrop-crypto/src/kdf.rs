//! Key derivation: Argon2id passphrase → master key, master salt persistence

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use std::fs;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use zeroize::Zeroize;

use deaddrop_core::{DropError, DropResult};

use crate::{KEY_SIZE, SALT_SIZE};

const MASTER_SALT_FILE: &str = ".master.salt";

/// A 256-bit master key derived from a passphrase via Argon2id.
///
/// Never persisted. Zeroized on drop.
#[derive(Clone)]
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Argon2id parameters.
///
/// The defaults are the production values; deriving with anything else
/// produces a different master key, so they only change together with a
/// full rewrap of the key files.
#[derive(Debug, Clone)]
pub struct KdfParams {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Time cost / iterations (default: 3)
    pub time_cost: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

/// Derive a 256-bit master key from a passphrase and salt using Argon2id.
pub fn derive_master_key(
    passphrase: &SecretString,
    salt: &[u8; SALT_SIZE],
    params: &KdfParams,
) -> DropResult<MasterKey> {
    let argon2_params = Params::new(
        params.mem_cost_kib,
        params.time_cost,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| DropError::CryptoSetup(format!("invalid Argon2id params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(passphrase.expose_secret().as_bytes(), salt, &mut key)
        .map_err(|e| DropError::CryptoSetup(format!("Argon2id KDF failed: {e}")))?;

    Ok(MasterKey::from_bytes(key))
}

/// Load the master salt from `.master.salt` under the storage root, or
/// generate and persist a new one (mode 0600).
///
/// The salt is stable for the life of the installation; replacing it
/// requires rewrapping every key file.
pub fn load_or_create_salt(storage_root: &Path) -> DropResult<[u8; SALT_SIZE]> {
    let salt_path = storage_root.join(MASTER_SALT_FILE);

    if let Ok(data) = fs::read(&salt_path) {
        if let Ok(salt) = <[u8; SALT_SIZE]>::try_from(data.as_slice()) {
            return Ok(salt);
        }
    }

    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);

    let mut f = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(&salt_path)?;
    f.write_all(&salt)?;

    Ok(salt)
}
