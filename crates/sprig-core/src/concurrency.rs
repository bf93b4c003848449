use crate::CoreError;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Exclusive advisory lock serializing port allocation and worktree
/// creation/removal across concurrent `sprig` invocations on one project.
/// The holder writes its pid into the file so waiters can name it.
pub struct ProjectLock {
    file: File,
}

impl ProjectLock {
    /// Lock file location inside the shared git directory.
    pub fn path(state_dir: &Path) -> PathBuf {
        state_dir.join("sprig.lock")
    }

    /// Block until the lock is ours.
    pub fn acquire(lock_path: &Path) -> Result<Self, CoreError> {
        if let Some(lock) = Self::try_acquire(lock_path)? {
            return Ok(lock);
        }
        match Self::holder(lock_path) {
            Some(pid) => info!("waiting for sprig process {pid} to release the project lock"),
            None => info!("waiting for another sprig process to release the project lock"),
        }
        let file = open(lock_path)?;
        file.lock_exclusive()?;
        Self::claimed(file, lock_path)
    }

    /// `None` when another process holds the lock.
    pub fn try_acquire(lock_path: &Path) -> Result<Option<Self>, CoreError> {
        let file = open(lock_path)?;
        if file.try_lock_exclusive().is_err() {
            return Ok(None);
        }
        Self::claimed(file, lock_path).map(Some)
    }

    /// Pid recorded by the current or most recent holder.
    pub fn holder(lock_path: &Path) -> Option<u32> {
        fs::read_to_string(lock_path).ok()?.trim().parse().ok()
    }

    fn claimed(mut file: File, lock_path: &Path) -> Result<Self, CoreError> {
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        write!(file, "{}", std::process::id())?;
        debug!("acquired {}", lock_path.display());
        Ok(Self { file })
    }
}

fn open(lock_path: &Path) -> Result<File, CoreError> {
    if let Some(parent) = lock_path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)?)
}

impl Drop for ProjectLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// First Ctrl-C asks the orchestrator to stop at the next step boundary and
/// roll back; a second one exits immediately.
pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            std::process::exit(130);
        }
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        eprintln!("\ninterrupt received, rolling back after the current step...");
    });
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_acquire_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = ProjectLock::path(&dir.path().join("sprig"));
        {
            let _lock = ProjectLock::acquire(&lock_path).unwrap();
            assert!(lock_path.exists());
        }
    }

    #[test]
    fn try_acquire_returns_none_when_held() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("sprig.lock");

        let _lock = ProjectLock::acquire(&lock_path).unwrap();
        assert!(ProjectLock::try_acquire(&lock_path).unwrap().is_none());
    }

    #[test]
    fn holder_pid_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("sprig.lock");
        let _lock = ProjectLock::acquire(&lock_path).unwrap();
        assert_eq!(ProjectLock::holder(&lock_path), Some(std::process::id()));
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("sprig.lock");
        {
            let _lock = ProjectLock::acquire(&lock_path).unwrap();
        }
        assert!(ProjectLock::try_acquire(&lock_path).unwrap().is_some());
    }
}
