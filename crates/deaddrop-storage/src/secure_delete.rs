//! Multi-pass file overwrite before removal.
//!
//! Pass 1 writes zeros, pass 2 writes 0xFF, pass 3 writes random data; each
//! pass is flushed to disk before the next, then the directory entry is
//! removed.
//!
//! Limitation: on flash-backed storage (SSDs) the drive's wear-leveling may
//! keep the original blocks alive in spare area, so the overwrite passes
//! only guarantee logical destruction there. Full-disk encryption of the
//! storage volume is the mitigation, not more passes.

use rand::RngCore;
use std::fs;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use deaddrop_core::DropResult;

const PASS_BLOCK: usize = 4096;

/// Overwrite a regular file with three passes and remove it. An empty file
/// is simply removed; a missing file is an error.
pub fn secure_delete_file(path: &Path) -> DropResult<()> {
    let size = fs::metadata(path)?.len();
    if size == 0 {
        fs::remove_file(path)?;
        return Ok(());
    }

    let mut f = fs::OpenOptions::new().write(true).open(path)?;

    overwrite_pattern(&mut f, size, 0x00)?;
    overwrite_pattern(&mut f, size, 0xFF)?;
    overwrite_random(&mut f, size)?;

    drop(f);
    fs::remove_file(path)?;
    Ok(())
}

/// Securely delete every file under `dir` recursively, then remove the
/// directory itself. A missing directory is a no-op.
pub fn secure_delete_dir(dir: &Path) -> DropResult<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            secure_delete_dir(&path)?;
        } else {
            secure_delete_file(&path)?;
        }
    }

    fs::remove_dir(dir)?;
    Ok(())
}

fn overwrite_pattern(f: &mut fs::File, size: u64, byte: u8) -> DropResult<()> {
    f.seek(SeekFrom::Start(0))?;
    let block = [byte; PASS_BLOCK];
    let mut remaining = size;
    while remaining > 0 {
        let n = remaining.min(PASS_BLOCK as u64) as usize;
        f.write_all(&block[..n])?;
        remaining -= n as u64;
    }
    f.sync_all()?;
    Ok(())
}

fn overwrite_random(f: &mut fs::File, size: u64) -> DropResult<()> {
    f.seek(SeekFrom::Start(0))?;
    let mut block = [0u8; PASS_BLOCK];
    let mut rng = rand::thread_rng();
    let mut remaining = size;
    while remaining > 0 {
        let n = remaining.min(PASS_BLOCK as u64) as usize;
        rng.fill_bytes(&mut block[..n]);
        f.write_all(&block[..n])?;
        remaining -= n as u64;
    }
    f.sync_all()?;
    Ok(())
}
