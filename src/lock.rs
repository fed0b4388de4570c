//! File-based advisory lock serializing writers on the shared volume.
//!
//! The store lives on a network mount without native multi-writer safety, so
//! every write path funnels through a single lock token file. Acquisition is
//! atomic create-if-absent; the token body is the holder's unix timestamp.
//! A token older than `max_age` is treated as left behind by a crashed
//! holder and is removed, trading strict mutual exclusion for availability.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::LockConfig;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("could not acquire lock within {timeout:?}")]
    Timeout { timeout: Duration },

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
    timeout: Duration,
    max_age: Duration,
    poll_interval: Duration,
}

impl FileLock {
    pub fn new(config: &LockConfig) -> Self {
        Self {
            path: config.path.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            max_age: Duration::from_secs(config.max_age_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire the lock, polling until `timeout` elapses. Returns a guard
    /// that releases the token when dropped, so the lock is released on
    /// every exit path out of the critical section.
    pub async fn acquire(&self) -> Result<LockGuard, LockError> {
        let started = Instant::now();

        loop {
            match self.try_create() {
                Ok(()) => {
                    debug!(path = %self.path.display(), "lock acquired");
                    return Ok(LockGuard {
                        path: self.path.clone(),
                        released: false,
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    if let Some(age) = self.token_age() {
                        if age > self.max_age {
                            warn!(
                                path = %self.path.display(),
                                age_secs = age.as_secs(),
                                "removing stale lock token"
                            );
                            match fs::remove_file(&self.path) {
                                Ok(()) => continue,
                                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                                Err(e) => return Err(e.into()),
                            }
                        }
                    }
                }
                Err(err) => return Err(err.into()),
            }

            if started.elapsed() >= self.timeout {
                return Err(LockError::Timeout {
                    timeout: self.timeout,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Delete the lock token. Removing a token that is already gone is fine.
    pub fn release(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Non-blocking probe: is the lock currently held by a live writer?
    /// A stale token does not count as held.
    pub fn is_locked(&self) -> bool {
        if !self.path.exists() {
            return false;
        }
        match self.token_age() {
            Some(age) => age <= self.max_age,
            // Token exists but its age cannot be determined; treat as held.
            None => true,
        }
    }

    fn try_create(&self) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        file.write_all(now.to_string().as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    /// Age of the current token. The body is the holder's unix timestamp;
    /// when unparseable, the file's mtime decides.
    fn token_age(&self) -> Option<Duration> {
        let now = SystemTime::now();

        if let Ok(body) = fs::read_to_string(&self.path) {
            if let Ok(stamp) = body.trim().parse::<u64>() {
                let held_since = UNIX_EPOCH + Duration::from_secs(stamp);
                return Some(now.duration_since(held_since).unwrap_or_default());
            }
        }

        let metadata = fs::metadata(&self.path).ok()?;
        let modified = metadata.modified().ok()?;
        Some(now.duration_since(modified).unwrap_or_default())
    }
}

pub struct LockGuard {
    path: PathBuf,
    released: bool,
}

impl LockGuard {
    /// Explicit release. Equivalent to dropping the guard.
    pub fn release(mut self) {
        self.remove_token();
    }

    fn remove_token(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "lock released"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %self.path.display(), "failed to release lock: {err}"),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.remove_token();
    }
}
