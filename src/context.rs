//! State of a single backup run and the names derived from it.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{Datelike, Local, Timelike};
use derive_more::Display;

/// Prefix of the local archive file name.
const ARCHIVE_PREFIX: &str = "mysql";
/// Namespace of uploaded objects.
const OBJECT_NAMESPACE: &str = "backups";

/// Identifier of a run: `%d%m%y%H%M`, i.e. 10 digits with minute resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display)]
pub struct RunStamp(String);

impl RunStamp {
    /// Stamp of the current local time.
    pub fn now() -> Self {
        Self::at(Local::now())
    }

    /// Stamp of the given point in time.
    pub fn at<T: Datelike + Timelike>(time: T) -> Self {
        Self(format!(
            "{:02}{:02}{:02}{:02}{:02}",
            time.day(),
            time.month(),
            time.year().rem_euclid(100),
            time.hour(),
            time.minute(),
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Name of a snapshot: `<dataset>@<stamp>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotId {
    dataset: String,
    stamp: RunStamp,
}

impl SnapshotId {
    pub fn new(dataset: impl Into<String>, stamp: RunStamp) -> Self {
        Self {
            dataset: dataset.into(),
            stamp,
        }
    }

    pub fn stamp(&self) -> &RunStamp {
        &self.stamp
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.dataset, self.stamp)
    }
}

/// Milestones of a run, in the order they can be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Stage {
    #[display("init")]
    Init,
    #[display("locked")]
    Locked,
    #[display("snapshot attempted")]
    SnapshotAttempted,
    #[display("unlocked")]
    Unlocked,
    #[display("notified")]
    Notified,
    #[display("exported")]
    Exported,
    #[display("uploaded")]
    Uploaded,
    #[display("upload failed")]
    UploadFailed,
    #[display("done")]
    Done,
}

/// Everything a run needs to know, passed through each step of the
/// [Pipeline](crate::pipeline::Pipeline).
#[derive(Debug, Clone)]
pub struct RunContext {
    pub config_path: PathBuf,
    pub environment: String,
    pub backup_dir: PathBuf,
    pub alert_contact: String,
    pub upload_target: Option<String>,
    pub host: String,
    stamp: Option<RunStamp>,
    stage: Stage,
}

impl RunContext {
    pub fn new(
        config_path: impl Into<PathBuf>,
        environment: impl Into<String>,
        backup_dir: impl Into<PathBuf>,
        alert_contact: impl Into<String>,
        upload_target: Option<String>,
        host: impl Into<String>,
    ) -> Self {
        let backup_dir = backup_dir.into();
        if backup_dir.is_relative() {
            log::warn!(target: "pipeline", "backup_dir is relative: {}", backup_dir.display());
        }

        Self {
            config_path: config_path.into(),
            environment: environment.into(),
            backup_dir,
            alert_contact: alert_contact.into(),
            upload_target,
            host: host.into(),
            stamp: None,
            stage: Stage::Init,
        }
    }

    /// Fixes the run stamp to `stamp` unless one was fixed already.
    ///
    /// Returns the stamp in effect, which never changes once set.
    pub fn fix_stamp(&mut self, stamp: RunStamp) -> &RunStamp {
        if let Some(current) = &self.stamp {
            log::warn!(target: "pipeline", "Run stamp already fixed to {current}, ignoring {stamp}");
        }
        self.stamp.get_or_insert(stamp)
    }

    pub fn stamp(&self) -> Option<&RunStamp> {
        self.stamp.as_ref()
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub(crate) fn advance(&mut self, stage: Stage) {
        log::trace!(target: "pipeline", "{} -> {stage}", self.stage);
        self.stage = stage;
    }

    /// Local path of the archive for `stamp`.
    pub fn archive_path(&self, stamp: &RunStamp) -> PathBuf {
        archive_path(&self.backup_dir, stamp)
    }

    /// Object key of the uploaded archive for `stamp`.
    pub fn object_key(&self, stamp: &RunStamp) -> String {
        object_key(&self.host, stamp)
    }
}

/// `<backup_dir>/mysql-<stamp>.gz`
pub fn archive_path(backup_dir: &Path, stamp: &RunStamp) -> PathBuf {
    backup_dir.join(format!("{ARCHIVE_PREFIX}-{stamp}.gz"))
}

/// `backups/<host>-<stamp>.gz`
pub fn object_key(host: &str, stamp: &RunStamp) -> String {
    format!("{OBJECT_NAMESPACE}/{host}-{stamp}.gz")
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn stamp() -> RunStamp {
        let time = NaiveDate::from_ymd_opt(2009, 3, 7)
            .unwrap()
            .and_hms_opt(4, 5, 59)
            .unwrap();
        RunStamp::at(time)
    }

    fn context() -> RunContext {
        RunContext::new(
            "/etc/app/database.yml",
            "production",
            "/backups",
            "+15550100",
            Some("bucket".into()),
            "db1",
        )
    }

    #[test]
    fn stamp_is_zero_padded_day_month_year_hour_minute() {
        let stamp = stamp();
        assert_eq!(stamp.as_str(), "0703090405");
        assert_eq!(stamp.as_str().len(), 10);
    }

    #[test]
    fn stamp_of_now_has_ten_digits() {
        let stamp = RunStamp::now();
        assert_eq!(stamp.as_str().len(), 10);
        assert!(stamp.as_str().chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn snapshot_id_joins_dataset_and_stamp() {
        let id = SnapshotId::new("tank/mysql", stamp());
        assert_eq!(id.to_string(), "tank/mysql@0703090405");
    }

    #[test]
    fn names_are_pure_functions_of_the_stamp() {
        let ctx = context();
        let stamp = stamp();

        assert_eq!(
            ctx.archive_path(&stamp),
            PathBuf::from("/backups/mysql-0703090405.gz")
        );
        assert_eq!(ctx.archive_path(&stamp), ctx.archive_path(&stamp));
        assert_eq!(ctx.object_key(&stamp), "backups/db1-0703090405.gz");
        assert_eq!(ctx.object_key(&stamp), ctx.object_key(&stamp));
    }

    #[test]
    fn stamp_is_fixed_once() {
        let mut ctx = context();
        assert_eq!(ctx.stamp(), None);

        let first = ctx.fix_stamp(stamp()).clone();
        let second = ctx.fix_stamp(RunStamp("0101000000".into())).clone();

        assert_eq!(first, second);
        assert_eq!(ctx.stamp(), Some(&first));
    }
}
