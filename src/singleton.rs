//! Exclusive ownership of a data directory.
//!
//! The daemon and the one-shot commands lock `<data_dir>/.state.lock` before
//! opening the engine. Engines over different data directories never contend.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = ".state.lock";

/// Held for as long as the engine is open. Dropping it releases the lock.
pub struct LockGuard {
    _file: File,
}

pub fn lock_path(data_dir: &Path) -> PathBuf {
    data_dir.join(LOCK_FILE)
}

/// Lock `data_dir`, creating it if needed. Fails when another process
/// already holds it.
pub fn acquire_lock(data_dir: &Path) -> Result<LockGuard> {
    fs::create_dir_all(data_dir)
        .with_context(|| format!("Could not create data directory {}", data_dir.display()))?;

    let path = lock_path(data_dir);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .with_context(|| format!("Could not open lock file {}", path.display()))?;

    file.try_lock_exclusive().map_err(|_| {
        anyhow::anyhow!(
            "Mode state in {} is in use by another modeswitch process.\n\
            While `modeswitch run` is active, stop it before using one-shot commands.",
            data_dir.display()
        )
    })?;

    Ok(LockGuard { _file: file })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_lock_on_same_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("state");

        let guard = acquire_lock(&data_dir).unwrap();
        assert!(lock_path(&data_dir).exists());

        let err = acquire_lock(&data_dir).err().unwrap();
        assert!(err.to_string().contains("in use by another modeswitch process"));

        drop(guard);
        assert!(acquire_lock(&data_dir).is_ok());
    }

    #[test]
    fn test_separate_data_dirs_do_not_contend() {
        let dir = tempfile::tempdir().unwrap();
        let _first = acquire_lock(&dir.path().join("a")).unwrap();
        assert!(acquire_lock(&dir.path().join("b")).is_ok());
    }
}
