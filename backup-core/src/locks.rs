//! Named in-process leases, plus an advisory file lock for the one
//! resource separate processes contend on.
//!
//! `catalog` guards id/sequence allocation and directory creation,
//! `backup:{id}` guards a single backup directory, and `live-state`
//! serialises everything that writes to the application database or file tree.

use crate::utils::errors::{BackupError, Result};
use dashmap::DashMap;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub const CATALOG: &str = "catalog";
pub const LIVE_STATE: &str = "live-state";

pub fn backup_key(id: &str) -> String {
    format!("backup:{}", id)
}

pub type Lease = OwnedMutexGuard<()>;

#[derive(Default)]
pub struct LockRegistry {
    leases: DashMap<String, Arc<Mutex<()>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str) -> Arc<Mutex<()>> {
        self.leases
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait for the named lease
    pub async fn acquire(&self, key: &str) -> Lease {
        let slot = self.slot(key);
        slot.lock_owned().await
    }

    /// Take the lease only if nobody holds it
    pub fn try_acquire(&self, key: &str) -> Result<Lease> {
        self.slot(key)
            .try_lock_owned()
            .map_err(|_| BackupError::Busy(key.to_string()))
    }

    /// Drop slots nobody is holding or waiting on
    pub fn prune(&self) {
        self.leases.retain(|_, slot| Arc::strong_count(slot) > 1);
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }
}

/// Exclusive `flock` on a file, released on drop. Blocks other processes
/// (and other open handles in this one) until then.
pub struct FileLock {
    _flock: Flock<File>,
}

impl FileLock {
    pub async fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || -> Result<Self> {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)?;
            let flock = Flock::lock(file, FlockArg::LockExclusive)
                .map_err(|(_, errno)| std::io::Error::from(errno))?;
            Ok(Self { _flock: flock })
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_try_acquire_reports_busy() {
        let locks = LockRegistry::new();
        let key = backup_key("full_1_aaaa");
        let held = locks.acquire(&key).await;

        assert!(matches!(locks.try_acquire(&key), Err(BackupError::Busy(_))));
        assert!(locks.try_acquire(CATALOG).is_ok());

        drop(held);
        assert!(locks.try_acquire(&key).is_ok());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let locks = Arc::new(LockRegistry::new());
        let held = locks.acquire(LIVE_STATE).await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _lease = locks.acquire(LIVE_STATE).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(held);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_prune_keeps_held_slots() {
        let locks = LockRegistry::new();
        let _held = locks.acquire("a").await;
        drop(locks.acquire("b").await);

        locks.prune();
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn test_file_lock_excludes_second_holder() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested/.catalog.lock");
        let first = FileLock::acquire(&path).await.unwrap();

        let second = tokio::spawn({
            let path = path.clone();
            async move { FileLock::acquire(&path).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!second.is_finished());

        drop(first);
        let second = tokio::time::timeout(Duration::from_secs(5), second)
            .await
            .unwrap()
            .unwrap();
        assert!(second.is_ok());
    }
}
