//! Byte- and count-based admission control.

use parking_lot::Mutex;
use std::fs;
use std::path::Path;

use deaddrop_core::{DropError, DropResult};

use crate::{DATA_FILE, LEGACY_DATA_FILE};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Snapshot of current usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaStats {
    pub total_bytes: u64,
    pub drop_count: u64,
}

#[derive(Default)]
struct Counters {
    total_bytes: u64,
    drop_count: u64,
}

/// Tracks total stored bytes and active drop count. A maximum of 0 means
/// unlimited.
pub struct QuotaManager {
    counters: Mutex<Counters>,
    max_bytes: u64,
    max_drops: u64,
}

impl QuotaManager {
    /// Create a quota manager, seeding the counters by scanning existing
    /// drops under the storage root.
    pub fn new(storage_root: &Path, max_bytes: u64, max_drops: u64) -> DropResult<Self> {
        let mut counters = Counters::default();

        for entry in fs::read_dir(storage_root)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') || !entry.file_type()?.is_dir() {
                continue;
            }

            let dir = entry.path();
            let payload = dir.join(DATA_FILE);
            let payload = if payload.exists() {
                payload
            } else {
                dir.join(LEGACY_DATA_FILE)
            };

            if let Ok(info) = fs::metadata(&payload) {
                counters.total_bytes += info.len();
                counters.drop_count += 1;
            }
        }

        Ok(Self {
            counters: Mutex::new(counters),
            max_bytes,
            max_drops,
        })
    }

    /// Reserve space for a new drop, failing if either configured maximum
    /// would be exceeded.
    pub fn reserve(&self, bytes: u64) -> DropResult<()> {
        let mut counters = self.counters.lock();

        if self.max_bytes > 0 && counters.total_bytes + bytes > self.max_bytes {
            return Err(DropError::QuotaExceeded(format!(
                "storage quota exceeded ({:.1} GB used of {:.1} GB)",
                counters.total_bytes as f64 / GIB,
                self.max_bytes as f64 / GIB,
            )));
        }

        if self.max_drops > 0 && counters.drop_count + 1 > self.max_drops {
            return Err(DropError::QuotaExceeded(format!(
                "drop count quota exceeded ({} of {})",
                counters.drop_count, self.max_drops,
            )));
        }

        counters.total_bytes += bytes;
        counters.drop_count += 1;
        Ok(())
    }

    /// Release space when a drop is deleted. Clamped at zero.
    pub fn release(&self, bytes: u64) {
        let mut counters = self.counters.lock();
        counters.total_bytes = counters.total_bytes.saturating_sub(bytes);
        counters.drop_count = counters.drop_count.saturating_sub(1);
    }

    pub fn stats(&self) -> QuotaStats {
        let counters = self.counters.lock();
        QuotaStats {
            total_bytes: counters.total_bytes,
            drop_count: counters.drop_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_reserve_release_stats() {
        let dir = tempdir().unwrap();
        let qm = QuotaManager::new(dir.path(), 0, 0).unwrap();

        qm.reserve(100).unwrap();
        qm.reserve(250).unwrap();
        qm.release(100);

        let stats = qm.stats();
        assert_eq!(stats.total_bytes, 250);
        assert_eq!(stats.drop_count, 1);
    }

    #[test]
    fn test_byte_limit() {
        let dir = tempdir().unwrap();
        let qm = QuotaManager::new(dir.path(), 1000, 0).unwrap();

        qm.reserve(900).unwrap();
        assert!(matches!(
            qm.reserve(200),
            Err(DropError::QuotaExceeded(_))
        ));
        // Exactly at the limit is allowed.
        qm.reserve(100).unwrap();
    }

    #[test]
    fn test_drop_count_limit() {
        let dir = tempdir().unwrap();
        let qm = QuotaManager::new(dir.path(), 0, 2).unwrap();

        qm.reserve(1).unwrap();
        qm.reserve(1).unwrap();
        assert!(qm.reserve(1).is_err());

        qm.release(1);
        qm.reserve(1).unwrap();
    }

    #[test]
    fn test_zero_means_unlimited() {
        let dir = tempdir().unwrap();
        let qm = QuotaManager::new(dir.path(), 0, 0).unwrap();

        for _ in 0..1000 {
            qm.reserve(u32::MAX as u64).unwrap();
        }
    }

    #[test]
    fn test_release_clamps_at_zero() {
        let dir = tempdir().unwrap();
        let qm = QuotaManager::new(dir.path(), 0, 0).unwrap();

        qm.reserve(10).unwrap();
        qm.release(100);
        qm.release(100);

        let stats = qm.stats();
        assert_eq!(stats.total_bytes, 0);
        assert_eq!(stats.drop_count, 0);
    }

    #[test]
    fn test_scan_seeds_counters() {
        let dir = tempdir().unwrap();

        // Two drops, one legacy; a dot-entry and a stray file are skipped.
        let a = dir.path().join("0123456789abcdef0123456789abcdef");
        std::fs::create_dir(&a).unwrap();
        std::fs::write(a.join("data"), vec![0u8; 100]).unwrap();

        let b = dir.path().join("fedcba9876543210fedcba9876543210");
        std::fs::create_dir(&b).unwrap();
        std::fs::write(b.join("file.enc"), vec![0u8; 50]).unwrap();

        std::fs::create_dir(dir.path().join(".honeypots.d")).unwrap();
        std::fs::write(dir.path().join(".encryption.key"), [0u8; 32]).unwrap();

        let qm = QuotaManager::new(dir.path(), 0, 0).unwrap();
        let stats = qm.stats();
        assert_eq!(stats.total_bytes, 150);
        assert_eq!(stats.drop_count, 2);
    }

    #[test]
    fn test_scan_skips_dir_without_payload() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("0123456789abcdef0123456789abcdef")).unwrap();

        let qm = QuotaManager::new(dir.path(), 0, 0).unwrap();
        assert_eq!(qm.stats().drop_count, 0);
    }
}
