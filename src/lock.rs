//! Per-file edit lock
//!
//! Editing `notes.md` takes an exclusive advisory lock on a sibling
//! `.notes.md.tvlock` holding our PID, so two editors never append edits to
//! the same file. The lock is released (and the lock file removed) on drop.

use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const LOCK_SUFFIX: &str = ".tvlock";

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error(
        "{} is being edited by another tunnelvision process (PID {pid})\nLock file: {}\n\nIf you believe this is stale, delete the lock file.",
        .target.display(),
        .lock_path.display()
    )]
    AlreadyLocked {
        target: PathBuf,
        pid: String,
        lock_path: PathBuf,
    },
    #[error("Lock file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Holds the lock until dropped
#[derive(Debug)]
pub struct FileLock {
    // Kept open: closing the handle releases the advisory lock.
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Path of the lock file (not the locked file)
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// `.<name>.tvlock` next to `target`
pub fn lock_path_for(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let lock_name = format!(".{}{}", name, LOCK_SUFFIX);
    match target.parent() {
        Some(parent) => parent.join(lock_name),
        None => PathBuf::from(lock_name),
    }
}

/// Take the edit lock for `target` without blocking
pub fn acquire(target: &Path) -> Result<FileLock, LockError> {
    let lock_path = lock_path_for(target);

    if let Some(parent) = lock_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)?;

    match file.try_lock_exclusive() {
        Ok(true) => {
            file.set_len(0)?;
            write!(file, "{}", std::process::id())?;
            file.sync_all()?;
            tracing::debug!(lock = %lock_path.display(), "acquired edit lock");

            Ok(FileLock {
                _file: file,
                path: lock_path,
            })
        }
        Ok(false) | Err(_) => {
            let mut contents = String::new();
            let _ = file.read_to_string(&mut contents);
            let pid = contents.trim();

            Err(LockError::AlreadyLocked {
                target: target.to_path_buf(),
                pid: if pid.is_empty() {
                    "unknown".to_string()
                } else {
                    pid.to_string()
                },
                lock_path,
            })
        }
    }
}

/// PID recorded in the lock file, if any
pub fn holder(target: &Path) -> Option<String> {
    std::fs::read_to_string(lock_path_for(target))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_path_for() {
        assert_eq!(
            lock_path_for(Path::new("/tmp/notes.md")),
            PathBuf::from("/tmp/.notes.md.tvlock")
        );
        assert_eq!(lock_path_for(Path::new("a.txt")), PathBuf::from(".a.txt.tvlock"));
    }

    #[test]
    fn test_acquire_and_release() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("notes.md");

        let lock = acquire(&target).unwrap();
        assert!(lock.path().exists());
        assert_eq!(holder(&target), Some(std::process::id().to_string()));

        drop(lock);
        assert!(!lock_path_for(&target).exists());
        assert_eq!(holder(&target), None);
    }

    #[test]
    fn test_second_acquire_fails() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("notes.md");

        let _lock = acquire(&target).unwrap();
        match acquire(&target) {
            Err(LockError::AlreadyLocked { pid, .. }) => {
                assert_eq!(pid, std::process::id().to_string());
            }
            other => panic!("expected AlreadyLocked, got {other:?}"),
        }
    }
}
