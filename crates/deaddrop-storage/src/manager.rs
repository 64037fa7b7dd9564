//! The storage manager: owns the storage root and all key material.

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use deaddrop_core::{DropError, DropResult};
use deaddrop_crypto::{
    decrypt_stream, encrypt_stream, load_or_generate_key, MasterKey, SecretKey, PURPOSE_ENCRYPTION,
};

use crate::locks::{DropLockTable, DropReadGuard};
use crate::metadata::{self, MetadataPayload};
use crate::quota::{QuotaManager, QuotaStats};
use crate::receipts::ReceiptAuthority;
use crate::secure_delete::secure_delete_dir;
use crate::validate::{generate_drop_id, validate_drop_id};
use crate::{DATA_FILE, ENCRYPTION_KEY_FILE, LEGACY_DATA_FILE, META_FILE, RECEIPT_KEY_FILE};

/// Record returned by a successful save.
#[derive(Debug, Clone)]
pub struct DropRecord {
    pub id: String,
    pub filename: String,
    pub size: u64,
    /// Unix timestamp truncated to the hour
    pub timestamp: i64,
    pub receipt: String,
    /// hex SHA-256 of the plaintext
    pub file_hash: String,
}

/// Decrypted drop content. Holds the read lock on the drop until dropped,
/// so a retrieval in flight keeps the sweep and deletion out; the plaintext
/// buffer is zeroized on drop.
pub struct DropContent {
    filename: String,
    bytes: Zeroizing<Vec<u8>>,
    _guard: DropReadGuard,
}

impl DropContent {
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn data(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Composes the cryptographic envelope, lock table, quota accounting and
/// secure deletion behind save/get/delete. The manager is the sole owner of
/// the encryption and receipt key material; [`StorageManager::close`] zeroes
/// both in place.
pub struct StorageManager {
    root: PathBuf,
    encryption_key: Mutex<SecretKey>,
    receipts: ReceiptAuthority,
    locks: DropLockTable,
    quota: Option<QuotaManager>,
    secure_delete: bool,
}

impl StorageManager {
    /// Open (or initialize) the storage root. Creates the directory with
    /// mode 0700 and loads or generates the key files; with a master key,
    /// legacy plaintext key files are migrated to the wrapped format.
    pub fn open(root: impl Into<PathBuf>, master: Option<&MasterKey>) -> DropResult<Self> {
        let root = root.into();

        let mut builder = fs::DirBuilder::new();
        builder.recursive(true).mode(0o700);
        builder.create(&root)?;

        let encryption_key =
            load_or_generate_key(&root.join(ENCRYPTION_KEY_FILE), master, PURPOSE_ENCRYPTION)?;
        let receipts = ReceiptAuthority::open(&root.join(RECEIPT_KEY_FILE), master)?;

        Ok(Self {
            root,
            encryption_key: Mutex::new(encryption_key),
            receipts,
            locks: DropLockTable::new(),
            quota: None,
            secure_delete: true,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn receipts(&self) -> &ReceiptAuthority {
        &self.receipts
    }

    pub fn set_quota(&mut self, quota: QuotaManager) {
        self.quota = Some(quota);
    }

    pub fn set_secure_delete(&mut self, enabled: bool) {
        self.secure_delete = enabled;
    }

    pub fn quota_stats(&self) -> Option<QuotaStats> {
        self.quota.as_ref().map(QuotaManager::stats)
    }

    /// Store an uploaded file. The plaintext is buffered in full (the upload
    /// bound is the embedding layer's concern), hashed, encrypted with the
    /// fresh identifier as AAD, and written together with the metadata
    /// envelope. No drop lock is taken: nothing else can hold a reference
    /// to the identifier before this returns.
    pub fn save(&self, filename: &str, reader: &mut impl Read) -> DropResult<DropRecord> {
        let id = generate_drop_id();
        let receipt = self.receipts.generate(&id);

        let drop_dir = self.root.join(&id);
        let mut builder = fs::DirBuilder::new();
        builder.mode(0o700);
        builder.create(&drop_dir)?;

        let mut plaintext = Zeroizing::new(Vec::new());
        if let Err(e) = reader.read_to_end(&mut plaintext) {
            let _ = fs::remove_dir(&drop_dir);
            return Err(e.into());
        }
        let size = plaintext.len() as u64;

        if let Some(quota) = &self.quota {
            if let Err(e) = quota.reserve(size) {
                let _ = fs::remove_dir(&drop_dir);
                return Err(e);
            }
        }

        match self.write_drop(&id, &drop_dir, filename, &receipt, &plaintext) {
            Ok(record) => Ok(record),
            Err(e) => {
                // Undo the reservation and the partial directory so a failed
                // save does not consume quota until the next restart.
                if let Some(quota) = &self.quota {
                    quota.release(size);
                }
                let _ = fs::remove_dir_all(&drop_dir);
                Err(e)
            }
        }
    }

    fn write_drop(
        &self,
        id: &str,
        drop_dir: &Path,
        filename: &str,
        receipt: &str,
        plaintext: &[u8],
    ) -> DropResult<DropRecord> {
        let file_hash = hex::encode(Sha256::digest(plaintext));

        let mut data_file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(drop_dir.join(DATA_FILE))?;
        {
            let key = self.encryption_key.lock();
            encrypt_stream(&key, &mut &plaintext[..], &mut data_file, id.as_bytes())?;
        }

        let timestamp = metadata::now_hour();
        let payload = MetadataPayload {
            filename: filename.to_owned(),
            receipt: receipt.to_owned(),
            timestamp_hour: timestamp,
            file_hash: Some(file_hash.clone()),
        };
        {
            let key = self.encryption_key.lock();
            metadata::save_metadata(&drop_dir.join(META_FILE), &key, id, &payload)?;
        }

        debug!(drop_id = id, size = plaintext.len(), "drop saved");

        Ok(DropRecord {
            id: id.to_owned(),
            filename: filename.to_owned(),
            size: plaintext.len() as u64,
            timestamp,
            receipt: receipt.to_owned(),
            file_hash,
        })
    }

    /// Retrieve and decrypt a drop. The returned [`DropContent`] keeps a
    /// read lock on the drop alive until it is dropped.
    pub fn get(&self, id: &str) -> DropResult<DropContent> {
        validate_drop_id(id)?;

        let guard = self.locks.read(id);
        let drop_dir = self.root.join(id);

        let payload = {
            let key = self.encryption_key.lock();
            metadata::load_metadata(&drop_dir.join(META_FILE), &key, id)?
        };

        let data_path = self.payload_path(&drop_dir);
        let mut data_file = fs::File::open(&data_path).map_err(|_| DropError::NotFound)?;

        let mut decrypted = Vec::new();
        {
            let key = self.encryption_key.lock();
            decrypt_stream(&key, &mut data_file, &mut decrypted, id.as_bytes())?;
        }

        Ok(DropContent {
            filename: payload.filename,
            bytes: Zeroizing::new(decrypted),
            _guard: guard,
        })
    }

    /// Load a drop's metadata without opening the payload file.
    pub fn metadata(&self, id: &str) -> DropResult<MetadataPayload> {
        validate_drop_id(id)?;

        let key = self.encryption_key.lock();
        metadata::load_metadata(&self.root.join(id).join(META_FILE), &key, id)
    }

    /// Age of a drop, from its metadata timestamp.
    pub fn drop_age(&self, id: &str) -> DropResult<Duration> {
        let payload = self.metadata(id)?;
        if payload.timestamp_hour <= 0 {
            return Ok(Duration::ZERO);
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        Ok(Duration::from_secs(
            (now - payload.timestamp_hour).max(0) as u64
        ))
    }

    /// Remove a drop under its write lock, releasing its quota reservation.
    pub fn delete(&self, id: &str) -> DropResult<()> {
        validate_drop_id(id)?;

        let _guard = self.locks.write(id);
        self.remove_drop_dir(id)
    }

    /// Atomically check whether a drop is expired and delete it under a
    /// single write-lock acquisition. Returns true if the drop was deleted,
    /// false if it was skipped (locked, not expired, or unreadable).
    pub fn delete_if_expired(
        &self,
        id: &str,
        max_age: Duration,
        now: SystemTime,
    ) -> DropResult<bool> {
        validate_drop_id(id)?;

        // Skip drops that are currently locked (being retrieved or deleted).
        let Some(_guard) = self.locks.try_write(id) else {
            return Ok(false);
        };

        let payload = {
            let key = self.encryption_key.lock();
            match metadata::load_metadata(&self.root.join(id).join(META_FILE), &key, id) {
                Ok(payload) => payload,
                Err(_) => return Ok(false),
            }
        };

        let drop_time = UNIX_EPOCH + Duration::from_secs(payload.timestamp_hour.max(0) as u64);
        let age = now.duration_since(drop_time).unwrap_or_default();
        if age <= max_age {
            return Ok(false);
        }

        self.remove_drop_dir(id)?;
        Ok(true)
    }

    /// Remove drop directories that have a payload but no metadata file —
    /// the residue of a save that failed between the two writes. Returns
    /// the number of directories removed.
    pub fn purge_orphans(&self) -> DropResult<usize> {
        let mut removed = 0;

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy().into_owned();
            if name.starts_with('.')
                || !entry.file_type()?.is_dir()
                || validate_drop_id(&name).is_err()
            {
                continue;
            }

            let dir = entry.path();
            if dir.join(META_FILE).exists() {
                continue;
            }

            let _guard = self.locks.write(&name);
            warn!(drop_id = %name, "removing orphaned drop (payload without metadata)");
            self.remove_drop_dir(&name)?;
            removed += 1;
        }

        if removed > 0 {
            info!(count = removed, "purged orphaned drops");
        }
        Ok(removed)
    }

    /// Zero the encryption key and the receipt key in place.
    pub fn close(&self) {
        self.encryption_key.lock().wipe();
        self.receipts.close();
    }

    pub fn is_closed(&self) -> bool {
        self.encryption_key.lock().is_wiped() && self.receipts.is_closed()
    }

    #[cfg(test)]
    pub(crate) fn lock_table(&self) -> &DropLockTable {
        &self.locks
    }

    /// Payload path inside a drop directory, preferring `data` and falling
    /// back to the legacy `file.enc`.
    fn payload_path(&self, drop_dir: &Path) -> PathBuf {
        let data = drop_dir.join(DATA_FILE);
        if data.exists() {
            data
        } else {
            drop_dir.join(LEGACY_DATA_FILE)
        }
    }

    /// Delete a drop directory; the caller must hold the write lock.
    fn remove_drop_dir(&self, id: &str) -> DropResult<()> {
        let drop_dir = self.root.join(id);

        if let Some(quota) = &self.quota {
            if let Ok(info) = fs::metadata(self.payload_path(&drop_dir)) {
                quota.release(info.len());
            }
        }

        if self.secure_delete {
            secure_delete_dir(&drop_dir)
        } else {
            match fs::remove_dir_all(&drop_dir) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        }
    }
}
