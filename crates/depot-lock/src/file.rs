//! Cross-process advisory file lock provider.
//!
//! Each key is backed by a marker file under `<root>/filelocks/`, named by
//! the hex SHA-256 of the key. Holding the lock means holding an OS advisory
//! exclusive lock on that file, so only other cooperating processes using
//! the same mechanism are excluded. Marker files are transient: they exist
//! while a lock is held and carry no persistent state.

use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use fs4::fs_std::FileExt;

use crate::{LockError, LockProvider, LockToken, MemoryLockProvider, key_digest_hex};

/// Subdirectory under the store root holding lock marker files.
pub const LOCK_DIR: &str = "filelocks";

/// Suffix of marker file names.
const LOCK_SUFFIX: &str = ".lock";

/// Delay between acquisition attempts.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(20);

/// Total acquisition budget before [`LockError::Timeout`].
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Cross-process [`LockProvider`] using OS advisory file locks.
///
/// Acquisition takes the in-process lock for the key first (fast local
/// exclusion between threads of this process), then retries the OS lock on
/// the marker file until it is obtained or the budget runs out. Budget
/// exhaustion is a fatal [`LockError::Timeout`], never a silent skip.
pub struct FileLockProvider {
    root: PathBuf,
    memory: MemoryLockProvider,
    retry_delay: Duration,
    max_attempts: u32,
}

impl FileLockProvider {
    /// Provider rooted at the shared store directory, with the default
    /// 20 ms retry delay and 120 s budget.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_budget(root, DEFAULT_RETRY_DELAY, DEFAULT_TIMEOUT)
    }

    /// Provider with an explicit retry delay and total budget.
    #[must_use]
    pub fn with_budget(root: impl Into<PathBuf>, retry_delay: Duration, timeout: Duration) -> Self {
        let attempts = (timeout.as_millis() / retry_delay.as_millis().max(1)).max(1);
        Self {
            root: root.into(),
            memory: MemoryLockProvider::new(),
            retry_delay,
            max_attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
        }
    }

    /// Host path of the marker file for `key`.
    #[must_use]
    pub fn marker_path(&self, key: &str) -> PathBuf {
        self.root
            .join(LOCK_DIR)
            .join(format!("{}{LOCK_SUFFIX}", key_digest_hex(key)))
    }

    fn io_error(key: &str, source: std::io::Error) -> LockError {
        LockError::Io {
            key: key.to_owned(),
            source,
        }
    }
}

impl LockProvider for FileLockProvider {
    fn acquire(&self, key: &str) -> Result<LockToken, LockError> {
        // In-process exclusion first; dropped (and thereby released) on any
        // error path below.
        let memory_token = self.memory.acquire(key)?;

        let dir = self.root.join(LOCK_DIR);
        fs::create_dir_all(&dir).map_err(|e| Self::io_error(key, e))?;
        let marker = self.marker_path(key);

        let mut attempts = 0u32;
        let file = loop {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&marker)
                .map_err(|e| Self::io_error(key, e))?;
            match file.try_lock_exclusive() {
                Ok(true) => break file,
                Ok(false) => {}
                Err(e) => return Err(Self::io_error(key, e)),
            }
            attempts += 1;
            if attempts >= self.max_attempts {
                tracing::error!("lock {key:?} not acquired after {attempts} attempts, giving up");
                return Err(LockError::Timeout {
                    key: key.to_owned(),
                    attempts,
                });
            }
            thread::sleep(self.retry_delay);
        };

        let key_owned = key.to_owned();
        Ok(LockToken::new(key, move || {
            release_file_lock(&key_owned, file, &marker);
            drop(memory_token);
        }))
    }
}

/// Release sequence: OS unlock, close the handle, delete the marker, and
/// only then let the in-process stripe go (done by the caller dropping the
/// memory token). Cleanup failures are logged, never surfaced, so releasing
/// cannot fail a caller's own cleanup path.
fn release_file_lock(key: &str, file: File, marker: &PathBuf) {
    if let Err(e) = FileExt::unlock(&file) {
        tracing::warn!("failed to unlock marker for {key:?}: {e}");
    }
    drop(file);
    if let Err(e) = fs::remove_file(marker) {
        tracing::debug!("failed to remove lock marker {}: {e}", marker.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_creates_and_release_removes_marker() {
        let tmp = TempDir::new().unwrap();
        let provider = FileLockProvider::new(tmp.path());

        let mut token = provider.acquire("styles").unwrap();
        let marker = provider.marker_path("styles");
        assert!(marker.exists());
        assert!(marker.starts_with(tmp.path().join(LOCK_DIR)));

        token.release();
        assert!(!marker.exists());
    }

    #[test]
    fn test_marker_name_is_key_digest() {
        let tmp = TempDir::new().unwrap();
        let provider = FileLockProvider::new(tmp.path());
        let marker = provider.marker_path("module/config.properties");
        let name = marker.file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with(LOCK_SUFFIX));
        // 64 hex chars plus the fixed suffix.
        assert_eq!(name.len(), 64 + LOCK_SUFFIX.len());
    }

    #[test]
    fn test_release_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let provider = FileLockProvider::new(tmp.path());
        let mut token = provider.acquire("k").unwrap();
        token.release();
        token.release();
        // Lock can be taken again afterwards.
        let _token = provider.acquire("k").unwrap();
    }

    #[test]
    fn test_contending_provider_times_out() {
        let tmp = TempDir::new().unwrap();
        // Two providers over the same root simulate two processes: each has
        // its own in-process stripes, so contention lands on the OS lock.
        let holder = FileLockProvider::new(tmp.path());
        let contender = FileLockProvider::with_budget(
            tmp.path(),
            Duration::from_millis(5),
            Duration::from_millis(50),
        );

        let _held = holder.acquire("shared").unwrap();
        let result = contender.acquire("shared");
        assert!(matches!(result, Err(LockError::Timeout { .. })));
    }

    #[test]
    fn test_contender_proceeds_after_release() {
        let tmp = TempDir::new().unwrap();
        let holder = FileLockProvider::new(tmp.path());
        let contender = std::sync::Arc::new(FileLockProvider::new(tmp.path()));

        let mut held = holder.acquire("shared").unwrap();

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let contender = std::sync::Arc::clone(&contender);
            std::thread::spawn(move || {
                let token = contender.acquire("shared").unwrap();
                tx.send(()).unwrap();
                drop(token);
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        held.release();
        assert!(rx.recv_timeout(Duration::from_secs(10)).is_ok());
        waiter.join().unwrap();
    }

    #[test]
    fn test_drop_releases_like_explicit_release() {
        let tmp = TempDir::new().unwrap();
        let provider = FileLockProvider::new(tmp.path());
        let marker = provider.marker_path("k");
        {
            let _token = provider.acquire("k").unwrap();
            assert!(marker.exists());
        }
        assert!(!marker.exists());
    }
}
