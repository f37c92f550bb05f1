//! Collaborators the backup [Pipeline](crate::pipeline::Pipeline) drives.
//!
//! Currently the following backends are implemented:
//!
//! - [MariaDb]: Connection to the database and its global read lock.
//! - [Zfs]: Snapshot of the dataset holding the database files and its export.
//! - [S3]: Upload of the exported archive.
//! - [Sms]: Notification of the operator on failure.

pub mod mariadb;
pub mod s3;
pub mod sms;
pub mod zfs;

pub use mariadb::MariaDb;
pub use s3::S3;
pub use sms::Sms;
pub use zfs::Zfs;

use std::fmt::Display;
use std::path::Path;

use crate::config::ConnectionParams;
use crate::context::SnapshotId;

/// Datastore which can be connected to.
pub trait Database {
    /// Connected session holding the lock.
    type Session: TableLock;
    /// Error that may happen on connect.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Opens a session with the parameters of the active environment.
    fn connect(&self, params: &ConnectionParams) -> Result<Self::Session, Self::Error>;
}

/// Global read lock of a datastore session.
pub trait TableLock {
    /// Error that may happen on locking or unlocking.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Blocks writes until [unlock](Self::unlock) is called.
    ///
    /// Returns only after the lock is confirmed to be held.
    fn lock(&mut self) -> Result<(), Self::Error>;

    /// Releases the lock taken by [lock](Self::lock).
    fn unlock(&mut self) -> Result<(), Self::Error>;
}

/// Snapshot tool of the filesystem the datastore lives on.
pub trait Snapshotter {
    /// Error that may happen on snapshot or export.
    type Error: Display;

    /// Dataset snapshots are taken of.
    fn dataset(&self) -> &str;

    /// Creates the snapshot `id`.
    fn snapshot(&self, id: &SnapshotId) -> Result<(), Self::Error>;

    /// Writes the compressed stream of snapshot `id` to `archive`.
    ///
    /// `archive` must not exist beforehand. On error no partial archive is left behind.
    fn export(&self, id: &SnapshotId, archive: &Path) -> Result<(), Self::Error>;
}

/// Remote storage for archives.
pub trait Uploader {
    /// Error that may happen on upload.
    type Error: Display;

    /// Stores the file `archive` as object `key` in `target`.
    fn upload(&self, target: &str, key: &str, archive: &Path) -> Result<(), Self::Error>;
}

/// Delivery of alert messages to an operator.
///
/// Notifications are fire-and-forget: implementations log their own failures.
pub trait Notifier {
    fn notify(&self, contact: &str, message: &str);
}

/// Holds the lock of a [TableLock] until it's released or dropped.
///
/// The lock is released exactly once: either explicitly by
/// [release](Self::release) or on drop, including unwinding.
pub struct LockGuard<'a, L: TableLock> {
    session: &'a mut L,
    held: bool,
}

impl<'a, L: TableLock> LockGuard<'a, L> {
    /// Acquires the lock of `session`.
    pub fn acquire(session: &'a mut L) -> Result<Self, L::Error> {
        session.lock()?;
        Ok(Self {
            session,
            held: true,
        })
    }

    /// Releases the lock, reporting a failed unlock to the caller.
    pub fn release(mut self) -> Result<(), L::Error> {
        self.held = false;
        self.session.unlock()
    }
}

impl<'a, L: TableLock> Drop for LockGuard<'a, L> {
    fn drop(&mut self) {
        if self.held {
            self.held = false;
            if let Err(e) = self.session.unlock() {
                log::error!(target: "pipeline", "Releasing the lock failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use derive_more::{Display, Error};

    use super::*;

    #[derive(Debug, Display, Error)]
    #[display("lock refused")]
    struct LockRefused;

    #[derive(Default)]
    struct CountingLock {
        locks: usize,
        unlocks: usize,
        fail_lock: bool,
    }

    impl TableLock for CountingLock {
        type Error = LockRefused;

        fn lock(&mut self) -> Result<(), Self::Error> {
            if self.fail_lock {
                return Err(LockRefused);
            }
            self.locks += 1;
            Ok(())
        }

        fn unlock(&mut self) -> Result<(), Self::Error> {
            self.unlocks += 1;
            Ok(())
        }
    }

    #[test]
    fn drop_releases_once() {
        let mut lock = CountingLock::default();
        {
            let _guard = LockGuard::acquire(&mut lock).unwrap();
        }
        assert_eq!((lock.locks, lock.unlocks), (1, 1));
    }

    #[test]
    fn explicit_release_does_not_unlock_again_on_drop() {
        let mut lock = CountingLock::default();
        let guard = LockGuard::acquire(&mut lock).unwrap();
        guard.release().unwrap();
        assert_eq!((lock.locks, lock.unlocks), (1, 1));
    }

    #[test]
    fn failed_acquire_never_unlocks() {
        let mut lock = CountingLock {
            fail_lock: true,
            ..Default::default()
        };
        assert!(LockGuard::acquire(&mut lock).is_err());
        assert_eq!((lock.locks, lock.unlocks), (0, 0));
    }

    #[test]
    fn unwinding_releases() {
        let mut lock = CountingLock::default();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = LockGuard::acquire(&mut lock).unwrap();
            panic!("snapshot tool crashed");
        }));
        assert!(result.is_err());
        assert_eq!(lock.unlocks, 1);
    }
}
