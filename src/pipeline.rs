//! The backup [Pipeline]: lock, snapshot, unlock, export and upload.
//!
//! A run walks through the [Stage]s
//!
//! ```text
//! Init -> Locked -> SnapshotAttempted -> Unlocked -> Notified                   -> Done
//!                                                 \-> Exported [-> Uploaded     ] -> Done
//!                                                              [-> UploadFailed ]
//! ```
//!
//! Failing to read the configuration, to connect or to take the lock aborts
//! the run with a [PipelineError]. Everything after the lock is taken ends in
//! [Stage::Done] with an [Outcome], failures being reported to the operator
//! through the [Notifier].

use std::fs;
use std::path::Path;

use derive_more::{Display, Error, From};

use crate::backends::{Database, LockGuard, Notifier, Snapshotter, Uploader};
use crate::config::{ConfigError, DatabaseConfig};
use crate::context::{RunContext, RunStamp, SnapshotId, Stage};

/// Result of a completed run.
///
/// Any of these lets the process exit successfully: failures after the lock
/// was taken are handled by notifying the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Outcome {
    /// Snapshot taken and exported, and uploaded if requested.
    #[display("succeeded")]
    Succeeded,
    /// The snapshot tool failed. Nothing was exported.
    #[display("snapshot failed")]
    SnapshotFailed,
    /// The snapshot was taken but writing the archive failed.
    #[display("export failed")]
    ExportFailed,
    /// The archive exists locally but couldn't be uploaded.
    #[display("upload failed")]
    UploadFailed,
}

/// Error of a collaborator, kept as the source of a [PipelineError].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Display, Error, From)]
/// Errors aborting a run before a snapshot is attempted.
pub enum PipelineError {
    /// Database configuration unusable.
    #[from]
    #[display("Loading the database config failed: {_0}")]
    Config(ConfigError),
    /// No connection to the database.
    #[display("Connecting to the database failed: {_0}")]
    Connect(#[error(source)] BoxError),
    /// Lock not obtained.
    #[display("Acquiring the database lock failed: {_0}")]
    Lock(#[error(source)] BoxError),
}

/// Pass/fail of a single step.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StepResult {
    Passed,
    Failed(String),
}

/// Sequential backup of a database living on a snapshottable filesystem.
#[derive(Debug)]
pub struct Pipeline<D, S, U, N> {
    database: D,
    snapshots: S,
    uploader: U,
    notifier: N,
}

impl<D, S, U, N> Pipeline<D, S, U, N>
where
    D: Database,
    S: Snapshotter,
    U: Uploader,
    N: Notifier,
{
    pub fn new(database: D, snapshots: S, uploader: U, notifier: N) -> Self {
        Self {
            database,
            snapshots,
            uploader,
            notifier,
        }
    }

    /// Runs all steps once.
    ///
    /// Fatal errors are alerted to the operator as well before they are returned.
    pub fn run(&self, ctx: &mut RunContext) -> Result<Outcome, PipelineError> {
        match self.run_steps(ctx) {
            Ok(outcome) => {
                ctx.advance(Stage::Done);
                log::info!(target: "pipeline", "Backup run finished: {outcome}");
                Ok(outcome)
            }
            Err(e) => {
                log::error!(target: "pipeline", "{e}");
                self.alert(ctx, &fatal_message(&e));
                Err(e)
            }
        }
    }

    fn run_steps(&self, ctx: &mut RunContext) -> Result<Outcome, PipelineError> {
        let mut session = self.initialize(ctx)?;
        let (snapshot, result) = self.snapshot_locked(ctx, &mut session)?;
        // the lock is released, closing the session is all that's left to do with it
        drop(session);

        if let StepResult::Failed(reason) = result {
            log::error!(target: "pipeline", "Snapshot {snapshot} FAILED: {reason}");
            log::info!(target: "pipeline", "Notifying the authorities.");
            self.alert(ctx, &snapshot_failed_message(snapshot.stamp()));
            ctx.advance(Stage::Notified);
            return Ok(Outcome::SnapshotFailed);
        }

        let archive = ctx.archive_path(snapshot.stamp());
        if let StepResult::Failed(reason) = self.export(ctx, &snapshot, &archive) {
            log::error!(target: "pipeline", "Export of {snapshot} FAILED: {reason}");
            self.alert(ctx, &export_failed_message(snapshot.stamp()));
            ctx.advance(Stage::Notified);
            return Ok(Outcome::ExportFailed);
        }
        ctx.advance(Stage::Exported);

        let Some(target) = ctx.upload_target.clone() else {
            log::debug!(target: "pipeline", "No upload target, keeping the archive local only.");
            return Ok(Outcome::Succeeded);
        };

        match self.upload(ctx, &target, snapshot.stamp(), &archive) {
            StepResult::Passed => {
                ctx.advance(Stage::Uploaded);
                Ok(Outcome::Succeeded)
            }
            StepResult::Failed(reason) => {
                log::error!(target: "pipeline", "Something went wrong pushing to {target}: {reason}");
                log::info!(target: "pipeline", "Notifying the authorities!");
                self.alert(ctx, &upload_failed_message(snapshot.stamp()));
                ctx.advance(Stage::UploadFailed);
                Ok(Outcome::UploadFailed)
            }
        }
    }

    /// Connects to the database of the active environment.
    fn initialize(&self, ctx: &RunContext) -> Result<D::Session, PipelineError> {
        log::debug!(
            target: "pipeline",
            "Loading environment '{}' from {}",
            ctx.environment,
            ctx.config_path.display()
        );
        let config = DatabaseConfig::load(&ctx.config_path)?;
        let params = config.environment(&ctx.environment)?;

        self.database
            .connect(params)
            .map_err(|e| PipelineError::Connect(Box::new(e)))
    }

    /// Takes the snapshot while holding the lock of `session`.
    ///
    /// The lock is released on every way out of this function once acquired.
    fn snapshot_locked(
        &self,
        ctx: &mut RunContext,
        session: &mut D::Session,
    ) -> Result<(SnapshotId, StepResult), PipelineError> {
        let guard =
            LockGuard::acquire(session).map_err(|e| PipelineError::Lock(Box::new(e)))?;
        ctx.advance(Stage::Locked);

        let (snapshot, result) = self.take_snapshot(ctx);
        ctx.advance(Stage::SnapshotAttempted);

        if let Err(e) = guard.release() {
            // the session is closed right after, which drops the lock server side
            log::error!(target: "pipeline", "Unlocking tables failed: {e}");
        }
        ctx.advance(Stage::Unlocked);

        Ok((snapshot, result))
    }

    fn take_snapshot(&self, ctx: &mut RunContext) -> (SnapshotId, StepResult) {
        let stamp = ctx.fix_stamp(RunStamp::now()).clone();
        let snapshot = SnapshotId::new(self.snapshots.dataset(), stamp);
        log::info!(target: "pipeline", "Creating snapshot {snapshot}.");

        let result = match self.snapshots.snapshot(&snapshot) {
            Ok(()) => StepResult::Passed,
            Err(e) => StepResult::Failed(e.to_string()),
        };

        (snapshot, result)
    }

    fn export(&self, ctx: &RunContext, snapshot: &SnapshotId, archive: &Path) -> StepResult {
        log::info!(
            target: "pipeline",
            "Succeeded! Compressing and exporting to {}",
            archive.display()
        );

        if let Err(e) = fs::create_dir_all(&ctx.backup_dir) {
            return StepResult::Failed(format!(
                "creating {} failed: {e}",
                ctx.backup_dir.display()
            ));
        }

        match self.snapshots.export(snapshot, archive) {
            Ok(()) => StepResult::Passed,
            Err(e) => StepResult::Failed(e.to_string()),
        }
    }

    fn upload(
        &self,
        ctx: &RunContext,
        target: &str,
        stamp: &RunStamp,
        archive: &Path,
    ) -> StepResult {
        let key = ctx.object_key(stamp);
        log::info!(
            target: "pipeline",
            "Pushing {} to {key} in {target}.",
            archive.display()
        );

        match self.uploader.upload(target, &key, archive) {
            Ok(()) => {
                log::info!(target: "pipeline", "Done!");
                StepResult::Passed
            }
            Err(e) => StepResult::Failed(e.to_string()),
        }
    }

    fn alert(&self, ctx: &RunContext, message: &str) {
        self.notifier.notify(&ctx.alert_contact, message);
    }
}

fn snapshot_failed_message(stamp: &RunStamp) -> String {
    format!("MySQL Backup at {stamp} FAILED.")
}

fn export_failed_message(stamp: &RunStamp) -> String {
    format!("MySQL Backup export at {stamp} FAILED.")
}

fn upload_failed_message(stamp: &RunStamp) -> String {
    format!("Pushing to S3 at {stamp} FAILED.")
}

fn fatal_message(error: &PipelineError) -> String {
    format!("MySQL Backup FAILED: {error}")
}
