//! Library to take consistent backups of a [MySQL]/[MariaDB] database stored
//! on a [ZFS] dataset.
//!
//! The database is put under a global read lock while the dataset is
//! snapshotted, then the snapshot is exported as a gzip archive and optionally
//! pushed to S3. The steps are driven by the [`pipeline`], the collaborators it
//! talks to live in [`backends`].
//!
//! [MySQL]: https://www.mysql.com/
//! [MariaDB]: https://mariadb.org/
//! [ZFS]: https://openzfs.org/

#![forbid(unsafe_code)]

pub mod backends;
pub mod cli;
pub mod config;
pub mod context;
pub mod pipeline;
pub mod util;
