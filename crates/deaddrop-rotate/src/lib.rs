//! Offline key rotation. The server must be stopped while this runs.
//!
//! Two modes:
//!
//! - **Rewrap**: unwrap each key file with the old master key and rewrap
//!   with the new one. No drop data is touched; near-instant.
//! - **Full rotation**: additionally generate a fresh storage encryption
//!   key and re-encrypt every drop's payload and metadata envelope under
//!   it. Duration is proportional to the total bytes stored.
//!
//! The receipt key itself is only ever rewrapped, never replaced, so issued
//! receipts stay valid. Replacing the receipt key file by hand is a hard
//! cutover that invalidates every receipt in circulation — there is no
//! grace window.

use anyhow::{bail, Context, Result};
use std::fs;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use tracing::info;

use deaddrop_crypto::{
    decrypt_stream, encrypt_stream, unwrap_key, wrap_key, MasterKey, SecretKey, KEY_SIZE,
    PURPOSE_ENCRYPTION, PURPOSE_RECEIPT, WRAPPED_KEY_SIZE,
};
use deaddrop_storage::metadata::{load_metadata, save_metadata};
use deaddrop_storage::{
    validate_drop_id, DATA_FILE, ENCRYPTION_KEY_FILE, LEGACY_DATA_FILE, META_FILE,
    RECEIPT_KEY_FILE,
};

/// Rewrap both key files with a new master key. Handles the initial
/// migration case where the key files are still plaintext (old passphrase
/// not set).
pub fn rewrap_key_files(root: &Path, old: Option<&MasterKey>, new: &MasterKey) -> Result<()> {
    rewrap_one(&root.join(ENCRYPTION_KEY_FILE), old, new, PURPOSE_ENCRYPTION)
        .context("rewrapping encryption key")?;
    rewrap_one(&root.join(RECEIPT_KEY_FILE), old, new, PURPOSE_RECEIPT)
        .context("rewrapping receipt key")?;
    Ok(())
}

/// Full rotation: fresh storage key, every drop re-encrypted, key files
/// rewrapped. Returns the number of drops rotated.
pub fn rotate_storage(root: &Path, old: Option<&MasterKey>, new: &MasterKey) -> Result<usize> {
    let enc_key_path = root.join(ENCRYPTION_KEY_FILE);
    let old_key = load_key_file(&enc_key_path, old, PURPOSE_ENCRYPTION)
        .context("loading current encryption key")?;
    let new_key = SecretKey::generate();

    let mut rotated = 0;
    for entry in fs::read_dir(root).context("reading storage root")? {
        let entry = entry?;
        let name = entry.file_name();
        let id = name.to_string_lossy().into_owned();
        if id.starts_with('.')
            || !entry.file_type()?.is_dir()
            || validate_drop_id(&id).is_err()
        {
            continue;
        }

        reencrypt_drop(&entry.path(), &id, &old_key, &new_key)
            .with_context(|| format!("re-encrypting drop {id}"))?;
        rotated += 1;
    }

    // Persist the new encryption key wrapped with the new master key, then
    // carry the (unchanged) receipt key over to the new wrapping.
    let wrapped = wrap_key(new, &new_key, PURPOSE_ENCRYPTION)?;
    atomic_write(&enc_key_path, &wrapped).context("writing new encryption key")?;
    rewrap_one(&root.join(RECEIPT_KEY_FILE), old, new, PURPOSE_RECEIPT)
        .context("rewrapping receipt key")?;

    info!(rotated, "key rotation complete");
    Ok(rotated)
}

/// Load a key file without generating anything: plaintext (32 bytes) or
/// wrapped (60 bytes, master key required).
fn load_key_file(path: &Path, master: Option<&MasterKey>, purpose: &[u8]) -> Result<SecretKey> {
    let data = fs::read(path).with_context(|| format!("reading key file {}", path.display()))?;

    match (master, data.len()) {
        (_, KEY_SIZE) => {
            // Plaintext key, possibly not yet migrated.
            let bytes = <[u8; KEY_SIZE]>::try_from(data.as_slice()).expect("length checked");
            Ok(SecretKey::from_bytes(bytes))
        }
        (Some(master), WRAPPED_KEY_SIZE) => unwrap_key(master, &data, purpose)
            .map_err(|_| anyhow::anyhow!("cannot unwrap {}: wrong passphrase?", path.display())),
        (None, WRAPPED_KEY_SIZE) => {
            bail!(
                "key file {} is wrapped; set the old passphrase environment variable",
                path.display()
            )
        }
        (_, n) => bail!("unexpected key file size: {n} bytes in {}", path.display()),
    }
}

fn rewrap_one(
    path: &Path,
    old: Option<&MasterKey>,
    new: &MasterKey,
    purpose: &[u8],
) -> Result<()> {
    let key = load_key_file(path, old, purpose)?;
    let wrapped = wrap_key(new, &key, purpose)?;
    atomic_write(path, &wrapped)
}

/// Decrypt a drop's payload and metadata with the old key and re-encrypt
/// with the new key, keeping the identifier AAD binding intact.
fn reencrypt_drop(drop_dir: &Path, id: &str, old_key: &SecretKey, new_key: &SecretKey) -> Result<()> {
    let data_path = {
        let preferred = drop_dir.join(DATA_FILE);
        if preferred.exists() {
            preferred
        } else {
            drop_dir.join(LEGACY_DATA_FILE)
        }
    };

    let ciphertext = fs::read(&data_path)
        .with_context(|| format!("reading payload {}", data_path.display()))?;
    let mut plaintext = Vec::new();
    decrypt_stream(old_key, &mut ciphertext.as_slice(), &mut plaintext, id.as_bytes())
        .map_err(|e| anyhow::anyhow!("payload decryption failed: {e}"))?;

    let mut reencrypted = Vec::new();
    encrypt_stream(new_key, &mut plaintext.as_slice(), &mut reencrypted, id.as_bytes())
        .map_err(|e| anyhow::anyhow!("payload re-encryption failed: {e}"))?;
    atomic_write(&data_path, &reencrypted)?;

    // The metadata envelope moves from the old key's subkey to the new
    // key's subkey; the payload itself is unchanged.
    let meta_path = drop_dir.join(META_FILE);
    let payload = load_metadata(&meta_path, old_key, id)
        .map_err(|e| anyhow::anyhow!("metadata decryption failed: {e}"))?;
    save_metadata(&meta_path, new_key, id, &payload)
        .map_err(|e| anyhow::anyhow!("metadata re-encryption failed: {e}"))?;

    Ok(())
}

/// Write via a temp file in the same directory plus rename, so a crash
/// mid-rotation never leaves a truncated key file or payload.
fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    let tmp_path = parent.join(format!(
        ".{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy()
    ));

    let mut f = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(&tmp_path)?;
    f.write_all(data)?;
    f.sync_all()?;
    drop(f);

    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use deaddrop_storage::StorageManager;
    use tempfile::tempdir;

    fn master(byte: u8) -> MasterKey {
        MasterKey::from_bytes([byte; KEY_SIZE])
    }

    fn seed_drops(root: &Path, master_key: Option<&MasterKey>) -> Vec<(String, Vec<u8>)> {
        let mut m = StorageManager::open(root, master_key).unwrap();
        m.set_secure_delete(false);

        let mut drops = Vec::new();
        for i in 0..3u8 {
            let body = vec![i; 100 + i as usize];
            let saved = m.save(&format!("file-{i}.bin"), &mut body.as_slice()).unwrap();
            drops.push((saved.id, body));
        }
        drops
    }

    #[test]
    fn test_rewrap_preserves_drops() {
        let dir = tempdir().unwrap();
        let old = master(1);
        let new = master(2);

        let drops = seed_drops(dir.path(), Some(&old));
        rewrap_key_files(dir.path(), Some(&old), &new).unwrap();

        // Old passphrase no longer opens the store; the new one does.
        assert!(StorageManager::open(dir.path(), Some(&old)).is_err());
        let m = StorageManager::open(dir.path(), Some(&new)).unwrap();
        for (id, body) in &drops {
            assert_eq!(m.get(id).unwrap().data(), body.as_slice());
        }
    }

    #[test]
    fn test_rewrap_migrates_plaintext_keys() {
        let dir = tempdir().unwrap();
        let new = master(3);

        let drops = seed_drops(dir.path(), None);
        assert_eq!(
            fs::read(dir.path().join(ENCRYPTION_KEY_FILE)).unwrap().len(),
            KEY_SIZE
        );

        rewrap_key_files(dir.path(), None, &new).unwrap();
        assert_eq!(
            fs::read(dir.path().join(ENCRYPTION_KEY_FILE)).unwrap().len(),
            WRAPPED_KEY_SIZE
        );

        let m = StorageManager::open(dir.path(), Some(&new)).unwrap();
        for (id, body) in &drops {
            assert_eq!(m.get(id).unwrap().data(), body.as_slice());
        }
    }

    #[test]
    fn test_rewrap_wrapped_without_old_passphrase_fails() {
        let dir = tempdir().unwrap();
        let old = master(1);
        seed_drops(dir.path(), Some(&old));

        assert!(rewrap_key_files(dir.path(), None, &master(2)).is_err());
    }

    #[test]
    fn test_full_rotation_reencrypts_all_drops() {
        let dir = tempdir().unwrap();
        let old = master(1);
        let new = master(2);

        let drops = seed_drops(dir.path(), Some(&old));

        let before: Vec<Vec<u8>> = drops
            .iter()
            .map(|(id, _)| fs::read(dir.path().join(id).join(DATA_FILE)).unwrap())
            .collect();

        let rotated = rotate_storage(dir.path(), Some(&old), &new).unwrap();
        assert_eq!(rotated, drops.len());

        // Ciphertexts changed on disk, plaintexts still round-trip, and
        // receipts survived (the receipt key is only rewrapped).
        let m = StorageManager::open(dir.path(), Some(&new)).unwrap();
        for ((id, body), old_ciphertext) in drops.iter().zip(&before) {
            let now = fs::read(dir.path().join(id).join(DATA_FILE)).unwrap();
            assert_ne!(&now, old_ciphertext, "payload must be re-encrypted");

            let content = m.get(id).unwrap();
            assert_eq!(content.data(), body.as_slice());

            let receipt = m.metadata(id).unwrap().receipt;
            assert!(m.receipts().validate(id, &receipt));
        }
    }

    #[test]
    fn test_full_rotation_handles_legacy_payload_name() {
        let dir = tempdir().unwrap();
        let old = master(1);
        let new = master(2);

        let drops = seed_drops(dir.path(), Some(&old));
        let (legacy_id, legacy_body) = &drops[0];
        let drop_dir = dir.path().join(legacy_id);
        fs::rename(drop_dir.join(DATA_FILE), drop_dir.join(LEGACY_DATA_FILE)).unwrap();

        rotate_storage(dir.path(), Some(&old), &new).unwrap();

        let m = StorageManager::open(dir.path(), Some(&new)).unwrap();
        assert_eq!(m.get(legacy_id).unwrap().data(), legacy_body.as_slice());
    }

    #[test]
    fn test_atomic_write_replaces_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".key");
        fs::write(&path, b"old").unwrap();

        atomic_write(&path, b"new content").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new content");
        assert!(!dir.path().join("..key.tmp").exists());
    }
}
