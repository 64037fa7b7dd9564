//! Daemon assembly: wires the storage core, honeypots, quota, cleanup and
//! metrics together and runs until SIGTERM/SIGINT.

use anyhow::{Context, Result};
use secrecy::SecretString;
use std::os::unix::fs::DirBuilderExt;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{info, warn};

use deaddrop_core::config::DropConfig;
use deaddrop_crypto::{derive_master_key, load_or_create_salt, KdfParams, MasterKey};
use deaddrop_honeypot::HoneypotManager;
use deaddrop_storage::{
    CleanupConfig, CleanupWorker, ProtectionPredicate, QuotaManager, StorageManager,
};

use crate::metrics;

pub async fn run(config: DropConfig) -> Result<()> {
    let root = config.storage.root.clone();

    // The salt loader needs the root to exist before the storage manager
    // creates it.
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true).mode(0o700);
    builder
        .create(&root)
        .with_context(|| format!("creating storage root {}", root.display()))?;

    // Master key from the configured environment variable. Deriving is
    // memory-hard by design, so it happens exactly once at startup.
    let master = master_key_from_env(&config)?;

    let mut storage = StorageManager::open(&root, master.as_ref())
        .with_context(|| format!("initializing storage at {}", root.display()))?;
    storage.set_secure_delete(config.security.secure_delete);

    let removed = storage.purge_orphans().context("purging orphaned drops")?;
    if removed > 0 {
        warn!(count = removed, "removed orphaned drops left by failed saves");
    }

    // Honeypots come before the quota scan so decoys are part of the
    // quota baseline.
    let honeypots = if config.security.honeypots_enabled {
        let manager = HoneypotManager::open(&root, config.security.alert_webhook.as_deref())
            .context("initializing honeypot manager")?;
        if config.security.honeypot_count > 0 {
            manager
                .generate(config.security.honeypot_count, &storage)
                .context("generating honeypots")?;
        }
        Some(Arc::new(manager))
    } else {
        None
    };

    if config.security.quota_configured() {
        let quota = QuotaManager::new(
            &root,
            config.security.max_storage_bytes(),
            config.security.max_drops,
        )
        .context("initializing quota manager")?;
        let stats = quota.stats();
        info!(
            total_bytes = stats.total_bytes,
            drop_count = stats.drop_count,
            "quota accounting enabled"
        );
        storage.set_quota(quota);
    }

    let storage = Arc::new(storage);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut cleanup_handle = None;
    if config.security.max_age_hours > 0 {
        let protected: Option<ProtectionPredicate> =
            honeypots.as_ref().map(HoneypotManager::protection_predicate);
        let worker = CleanupWorker::new(
            storage.clone(),
            CleanupConfig {
                max_age: config.security.max_age(),
                check_interval: config.security.cleanup_interval(),
            },
            protected,
        );
        cleanup_handle = Some(tokio::spawn(worker.run(shutdown_rx.clone())));
        info!(
            max_age_hours = config.security.max_age_hours,
            "automatic cleanup enabled"
        );
    }

    if let Some(addr) = config.daemon.metrics_addr.clone() {
        let stats_storage = storage.clone();
        let state = metrics::MetricsState::new(Arc::new(move || stats_storage.quota_stats()));
        tokio::spawn(async move {
            if let Err(e) = metrics::serve(addr, state).await {
                warn!("metrics server exited: {e}");
            }
        });
    }

    info!(root = %root.display(), "deaddropd ready");

    wait_for_shutdown().await?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = cleanup_handle {
        let _ = handle.await;
    }

    storage.close();
    info!("key material wiped, shutdown complete");
    Ok(())
}

fn master_key_from_env(config: &DropConfig) -> Result<Option<MasterKey>> {
    let env_name = config.security.master_key_env.trim();
    if env_name.is_empty() {
        return Ok(None);
    }

    let passphrase = std::env::var(env_name).ok().filter(|p| !p.is_empty());
    let Some(passphrase) = passphrase else {
        anyhow::bail!("master key environment variable {env_name} is configured but unset");
    };
    let passphrase = SecretString::from(passphrase);

    let salt = load_or_create_salt(&config.storage.root).context("loading master salt")?;
    let master = derive_master_key(&passphrase, &salt, &KdfParams::default())
        .context("deriving master key")?;

    Ok(Some(master))
}

async fn wait_for_shutdown() -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("registering SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("registering SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }
    Ok(())
}
