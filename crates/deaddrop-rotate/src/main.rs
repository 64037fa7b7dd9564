//! deaddrop-rotate: offline key rotation for a stopped dead-drop server.
//!
//! Passphrases come from the environment, never from argv:
//!   DEADDROP_MASTER_KEY      new master passphrase (required)
//!   DEADDROP_OLD_MASTER_KEY  current passphrase (omit if key files are
//!                            still plaintext)

use anyhow::{Context, Result};
use clap::Parser;
use secrecy::SecretString;
use std::path::PathBuf;
use tracing::info;

use deaddrop_crypto::{derive_master_key, load_or_create_salt, KdfParams, MasterKey};
use deaddrop_rotate::{rewrap_key_files, rotate_storage};

#[derive(Parser, Debug)]
#[command(
    name = "deaddrop-rotate",
    version,
    about = "Rotate dead-drop key material (run only while the server is stopped)"
)]
struct Cli {
    /// Path to the storage directory
    #[arg(long, default_value = "./drops")]
    storage_dir: PathBuf,

    /// Only re-wrap the key files with the new master key; skip the full
    /// re-encryption of drop data
    #[arg(long)]
    rewrap_only: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();
    let cli = Cli::parse();

    let new_passphrase = std::env::var("DEADDROP_MASTER_KEY")
        .ok()
        .filter(|p| !p.is_empty())
        .context("DEADDROP_MASTER_KEY environment variable must be set")?;
    let old_passphrase = std::env::var("DEADDROP_OLD_MASTER_KEY")
        .ok()
        .filter(|p| !p.is_empty());

    let salt = load_or_create_salt(&cli.storage_dir).context("loading master salt")?;

    let old_master: Option<MasterKey> = old_passphrase
        .map(|p| derive_master_key(&SecretString::from(p), &salt, &KdfParams::default()))
        .transpose()
        .context("deriving old master key")?;
    let new_master = derive_master_key(
        &SecretString::from(new_passphrase),
        &salt,
        &KdfParams::default(),
    )
    .context("deriving new master key")?;

    if cli.rewrap_only {
        rewrap_key_files(&cli.storage_dir, old_master.as_ref(), &new_master)?;
        info!("key files re-wrapped");
        return Ok(());
    }

    info!("full rotation: generating a new encryption key and re-encrypting all drops");
    let rotated = rotate_storage(&cli.storage_dir, old_master.as_ref(), &new_master)?;
    info!(rotated, "rotation complete");
    Ok(())
}
