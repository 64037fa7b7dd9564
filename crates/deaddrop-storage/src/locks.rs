//! Per-drop reader/writer locks.
//!
//! Retrieval holds a shared lock for as long as the decrypted content is
//! alive; deletion and the expiry sweep take the exclusive lock. Releasing
//! a write guard removes the table entry, since a write lock is only ever
//! taken to end a drop's life. The outer map mutex is held only for the
//! O(1) map operations, never across a lock acquisition.

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

type Entry = Arc<RwLock<()>>;

#[derive(Default)]
pub struct DropLockTable {
    entries: Mutex<HashMap<String, Entry>>,
}

/// Shared guard held for the duration of a retrieval.
pub struct DropReadGuard {
    _inner: ArcRwLockReadGuard<RawRwLock, ()>,
}

/// Exclusive guard held while a drop is destroyed. Dropping it removes the
/// table entry; waiters that already hold the `Arc` still unlock cleanly,
/// and later lockers get a fresh entry.
pub struct DropWriteGuard<'a> {
    table: &'a DropLockTable,
    id: String,
    inner: Option<ArcRwLockWriteGuard<RawRwLock, ()>>,
}

impl Drop for DropWriteGuard<'_> {
    fn drop(&mut self) {
        // Release the lock before touching the map so a waiter can proceed
        // without contending on the map mutex.
        self.inner.take();
        self.table.entries.lock().remove(&self.id);
    }
}

impl DropLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, drop_id: &str) -> Entry {
        self.entries
            .lock()
            .entry(drop_id.to_owned())
            .or_default()
            .clone()
    }

    /// Acquire a shared lock. Multiple concurrent retrievals of the same
    /// drop are allowed.
    pub fn read(&self, drop_id: &str) -> DropReadGuard {
        DropReadGuard {
            _inner: self.entry(drop_id).read_arc(),
        }
    }

    /// Acquire the exclusive lock, blocking until all readers are done.
    pub fn write(&self, drop_id: &str) -> DropWriteGuard<'_> {
        DropWriteGuard {
            inner: Some(self.entry(drop_id).write_arc()),
            id: drop_id.to_owned(),
            table: self,
        }
    }

    /// Non-blocking exclusive attempt; used by the cleanup sweep to skip
    /// drops currently being served.
    pub fn try_write(&self, drop_id: &str) -> Option<DropWriteGuard<'_>> {
        let guard = self.entry(drop_id).try_write_arc()?;
        Some(DropWriteGuard {
            inner: Some(guard),
            id: drop_id.to_owned(),
            table: self,
        })
    }

    /// Number of live lock entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
