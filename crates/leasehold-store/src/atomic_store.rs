//! Lock-scoped atomic mutation helpers for the file stores.
//!
//! A mutation creates `<file>.lock` with `create_new`, does its
//! read-modify-write, and removes the lock on drop. A busy lock is retried a
//! bounded number of times before the mutation gives up.

use crate::jsonl::{JsonlError, read_records_from_path, write_records_to_path};
use chrono::Utc;
use leasehold_kernel::StoreError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// Attempts to create a lock file before reporting it busy.
pub const LOCK_ATTEMPTS: u32 = 400;
/// Pause between lock attempts.
pub const LOCK_RETRY_DELAY: Duration = Duration::from_millis(5);

pub fn lock_path(path: &Path) -> PathBuf {
    let mut lock: OsString = path.as_os_str().to_os_string();
    lock.push(".lock");
    PathBuf::from(lock)
}

#[derive(Debug, thiserror::Error)]
pub enum AtomicStoreError {
    #[error("lock busy after {attempts} attempt(s): {lock_path}")]
    LockBusy { lock_path: String, attempts: u32 },

    #[error("failed to acquire lock {lock_path}: {message}")]
    LockIo { lock_path: String, message: String },

    #[error(transparent)]
    Jsonl(#[from] JsonlError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Run `body` while holding the lock for `path`.
pub fn with_lock<T, F>(path: impl AsRef<Path>, body: F) -> Result<T, AtomicStoreError>
where
    F: FnOnce() -> Result<T, AtomicStoreError>,
{
    let _guard = FileLockGuard::acquire(path.as_ref())?;
    body()
}

/// Execute one lock-scoped mutation of a JSONL file.
///
/// The mutator returns `(value, changed)` where:
/// - `value` is returned to the caller
/// - `changed=true` persists the records before the lock is released.
pub fn mutate_records<R, T, F>(path: impl AsRef<Path>, mutator: F) -> Result<T, AtomicStoreError>
where
    R: Serialize + DeserializeOwned,
    F: FnOnce(&mut Vec<R>) -> (T, bool),
{
    let path = path.as_ref();
    with_lock(path, || {
        let mut records: Vec<R> = read_records_from_path(path)?;
        let (value, changed) = mutator(&mut records);
        if changed {
            write_records_to_path(path, &records)?;
        }
        Ok(value)
    })
}

struct FileLockGuard {
    lock_path: PathBuf,
    _file: File,
}

impl FileLockGuard {
    fn acquire(path: &Path) -> Result<Self, AtomicStoreError> {
        let lock_path = lock_path(path);
        if let Some(parent) = lock_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| AtomicStoreError::LockIo {
                lock_path: lock_path.display().to_string(),
                message: e.to_string(),
            })?;
        }

        for attempt in 1..=LOCK_ATTEMPTS {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(mut file) => {
                    let _ = writeln!(
                        file,
                        "pid={}\nutc={}",
                        std::process::id(),
                        Utc::now().to_rfc3339()
                    );
                    return Ok(Self {
                        lock_path,
                        _file: file,
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    if attempt < LOCK_ATTEMPTS {
                        thread::sleep(LOCK_RETRY_DELAY);
                    }
                }
                Err(err) => {
                    return Err(AtomicStoreError::LockIo {
                        lock_path: lock_path.display().to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }

        tracing::warn!(lock = %lock_path.display(), "lock stayed busy");
        Err(AtomicStoreError::LockBusy {
            lock_path: lock_path.display().to_string(),
            attempts: LOCK_ATTEMPTS,
        })
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_path(prefix: &str) -> PathBuf {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after unix epoch")
            .as_nanos();
        std::env::temp_dir().join(format!(
            "leasehold-atomic-{prefix}-{}-{unique}.jsonl",
            std::process::id()
        ))
    }

    #[test]
    fn unchanged_mutation_leaves_no_file() {
        let path = temp_path("unchanged");
        let seen = mutate_records::<u32, _, _>(&path, |records| (records.len(), false))
            .expect("mutation should succeed");
        assert_eq!(seen, 0);
        assert!(!path.exists());
        assert!(!lock_path(&path).exists());
    }

    #[test]
    fn held_lock_reports_busy() {
        let path = temp_path("busy");
        fs::write(lock_path(&path), "pid=0\n").expect("lock fixture should write");

        match mutate_records::<u32, _, _>(&path, |_| ((), true)) {
            Err(AtomicStoreError::LockBusy { attempts, .. }) => {
                assert_eq!(attempts, LOCK_ATTEMPTS)
            }
            other => panic!("expected busy lock, got {other:?}"),
        }

        let _ = fs::remove_file(lock_path(&path));
    }

    #[test]
    fn concurrent_mutations_are_serialized() {
        let path = Arc::new(temp_path("serialized"));
        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|n| {
                let path = Arc::clone(&path);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    mutate_records::<u32, _, _>(path.as_path(), |records| {
                        records.push(n as u32);
                        ((), true)
                    })
                    .expect("mutation should succeed");
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread should finish");
        }

        let mut records: Vec<u32> =
            read_records_from_path(path.as_path()).expect("records should read");
        records.sort_unstable();
        assert_eq!(records, (0..threads as u32).collect::<Vec<_>>());

        let _ = fs::remove_file(path.as_path());
    }
}
