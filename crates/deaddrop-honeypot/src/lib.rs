//! deaddrop-honeypot: decoy drops that are indistinguishable from real ones.
//!
//! Decoys are saved through the normal storage path, so on disk and in the
//! retrieval response they look exactly like legitimate drops. Their ids are
//! persisted in `.honeypots`; any access to one of those ids is an
//! unambiguous indicator of unauthorized knowledge and fires an async alert.
//! The retrieval handler serves the drop normally afterwards, so an
//! adversary cannot distinguish a honeypot by timing or content.

mod alerter;

pub use alerter::AlertPayload;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use rand::{Rng, RngCore};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use deaddrop_storage::{ProtectionPredicate, StorageManager};

use crate::alerter::Alerter;

const HONEYPOT_LIST_FILE: &str = ".honeypots";

/// Decoy sizes are drawn uniformly from [1 KiB, 10 KiB].
const DECOY_MIN_SIZE: usize = 1024;
const DECOY_MAX_SIZE: usize = 10 * 1024;

/// Tracks honeypot drop ids and fires alerts on access.
pub struct HoneypotManager {
    ids: RwLock<HashSet<String>>,
    list_path: PathBuf,
    alerter: Option<Alerter>,
}

impl HoneypotManager {
    /// Create a honeypot manager, loading any existing ids from the
    /// `.honeypots` file under the storage root.
    pub fn open(storage_root: &Path, webhook_url: Option<&str>) -> Result<Self> {
        let list_path = storage_root.join(HONEYPOT_LIST_FILE);

        let mut ids = HashSet::new();
        if let Ok(data) = fs::read(&list_path) {
            let listed: Vec<String> =
                serde_json::from_slice(&data).context("parsing .honeypots file")?;
            ids.extend(listed);
        }

        let alerter = webhook_url.map(Alerter::new).transpose()?;

        Ok(Self {
            ids: RwLock::new(ids),
            list_path,
            alerter,
        })
    }

    /// Membership query; doubles as the cleanup sweep's protection
    /// predicate so decoys never expire.
    pub fn is_honeypot(&self, id: &str) -> bool {
        self.ids.read().contains(id)
    }

    /// The membership predicate in the shape the cleanup worker expects.
    pub fn protection_predicate(self: &Arc<Self>) -> ProtectionPredicate {
        let manager = Arc::clone(self);
        Arc::new(move |id: &str| manager.is_honeypot(id))
    }

    /// Honeypot drop ids.
    pub fn ids(&self) -> Vec<String> {
        self.ids.read().iter().cloned().collect()
    }

    /// Create `count` decoy drops through the storage manager. Idempotent:
    /// if honeypots already exist, nothing is created.
    pub fn generate(&self, count: u32, storage: &StorageManager) -> Result<()> {
        let mut ids = self.ids.write();
        if !ids.is_empty() {
            return Ok(());
        }

        let mut rng = rand::thread_rng();
        for _ in 0..count {
            let size = rng.gen_range(DECOY_MIN_SIZE..=DECOY_MAX_SIZE);
            let mut decoy = vec![0u8; size];
            rng.fill_bytes(&mut decoy);

            let saved = storage
                .save("document.bin", &mut decoy.as_slice())
                .context("saving honeypot drop")?;
            ids.insert(saved.id);
        }

        let listed: Vec<&String> = ids.iter().collect();
        let data = serde_json::to_vec(&listed).context("marshaling honeypot ids")?;
        let mut f = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&self.list_path)
            .context("writing .honeypots file")?;
        f.write_all(&data)?;

        info!(count, "generated honeypot drops");
        Ok(())
    }

    /// Log a honeypot access and fire the webhook (if configured) on a
    /// detached task. Never blocks the retrieval path.
    pub fn alert(&self, drop_id: &str, remote_addr: &str) {
        warn!(drop_id, remote_addr, "HONEYPOT ALERT: decoy drop accessed");

        if let Some(alerter) = &self.alerter {
            alerter.send(drop_id, remote_addr);
        }
    }
}
