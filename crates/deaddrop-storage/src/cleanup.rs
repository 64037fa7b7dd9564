//! Periodic age-based expiry sweep.
//!
//! Each cycle sleeps for the configured interval plus a random jitter of
//! ±10 minutes (so sweep timing reveals nothing about submission times),
//! then scans the storage root. Drops whose lock is held are skipped via a
//! non-blocking try-lock; the expiry check and the deletion happen under a
//! single write-lock acquisition. Honeypots are exempted through the
//! protection predicate.

use rand::Rng;
use std::fs;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::manager::StorageManager;
use crate::validate::validate_drop_id;

/// Single-method callback exempting drops from the sweep; nominally the
/// honeypot membership predicate, but any predicate works.
pub type ProtectionPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

#[derive(Debug, Clone)]
pub struct CleanupConfig {
    /// Drops older than this are deleted.
    pub max_age: Duration,
    /// Base interval between sweep cycles.
    pub check_interval: Duration,
}

/// Background worker driving the sweep. The storage core stays synchronous;
/// each sweep runs on the blocking pool so large secure deletes cannot
/// starve the runtime.
pub struct CleanupWorker {
    manager: Arc<StorageManager>,
    config: CleanupConfig,
    protected: Option<ProtectionPredicate>,
}

impl CleanupWorker {
    pub fn new(
        manager: Arc<StorageManager>,
        config: CleanupConfig,
        protected: Option<ProtectionPredicate>,
    ) -> Self {
        Self {
            manager,
            config,
            protected,
        }
    }

    /// Run until the shutdown channel fires.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            max_age_secs = self.config.max_age.as_secs(),
            interval_secs = self.config.check_interval.as_secs(),
            "cleanup worker started"
        );

        loop {
            let sleep = jittered_interval(self.config.check_interval);
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("cleanup worker: shutdown");
                    return;
                }
                _ = tokio::time::sleep(sleep) => {}
            }

            let manager = self.manager.clone();
            let protected = self.protected.clone();
            let max_age = self.config.max_age;

            let swept = tokio::task::spawn_blocking(move || {
                manager.sweep_expired(max_age, protected.as_ref())
            })
            .await;

            if let Err(e) = swept {
                error!("cleanup sweep panicked: {e}");
            }
        }
    }
}

/// Interval plus a uniform jitter in [-10 min, +10 min], floored at zero.
fn jittered_interval(interval: Duration) -> Duration {
    let jitter_secs: i64 = rand::thread_rng().gen_range(-600..=600);
    let secs = (interval.as_secs() as i64 + jitter_secs).max(0);
    Duration::from_secs(secs as u64)
}

impl StorageManager {
    /// One sweep over the storage root: delete every unprotected, unlocked
    /// drop older than `max_age`. Per-drop errors are logged and the sweep
    /// continues. Returns the number of drops deleted.
    pub fn sweep_expired(
        &self,
        max_age: Duration,
        protected: Option<&ProtectionPredicate>,
    ) -> usize {
        let entries = match fs::read_dir(self.root()) {
            Ok(entries) => entries,
            Err(e) => {
                error!("cleanup: cannot read storage root: {e}");
                return 0;
            }
        };

        let now = SystemTime::now();
        let mut deleted = 0;

        for entry in entries {
            let Ok(entry) = entry else { continue };
            let name = entry.file_name();
            let id = name.to_string_lossy();
            if id.starts_with('.')
                || !entry.file_type().map(|t| t.is_dir()).unwrap_or(false)
                || validate_drop_id(&id).is_err()
            {
                continue;
            }

            if protected.is_some_and(|p| p(&id)) {
                continue;
            }

            match self.delete_if_expired(&id, max_age, now) {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(e) => warn!(drop_id = %id, "cleanup: failed to delete expired drop: {e}"),
            }
        }

        if deleted > 0 {
            info!(count = deleted, "cleaned up expired drops");
        }
        deleted
    }
}
