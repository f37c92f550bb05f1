//! Implements snapshots and their export using [Zfs].

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;

use derive_more::{Display, Error};
use flate2::write::GzEncoder;
use flate2::Compression;
use regex::Regex;

use crate::backends::Snapshotter;
use crate::context::SnapshotId;

/// Snapshots of a ZFS dataset using the `zfs` command.
#[derive(Debug, Clone)]
pub struct Zfs {
    program: PathBuf,
    dataset: String,
}

#[derive(Debug, Display, Error)]
/// Errors of the [Zfs] backend.
pub enum ZfsError {
    /// Dataset name is not a valid ZFS dataset.
    #[display("Invalid dataset name: {_0}")]
    InvalidDataset(#[error(ignore)] String),
    /// `zfs` could not be run.
    #[display("Running {} failed: {_1}", _0.display())]
    NotRun(PathBuf, #[error(source)] io::Error),
    /// `zfs` exited unsuccessfully.
    #[display("zfs {subcommand} {snapshot} failed with {status}: {stderr}")]
    CommandFailed {
        #[error(ignore)]
        subcommand: &'static str,
        #[error(ignore)]
        snapshot: String,
        #[error(ignore)]
        status: ExitStatus,
        #[error(ignore)]
        stderr: String,
    },
    /// Writing the archive failed.
    #[display("Writing archive {} failed: {_1}", _0.display())]
    Archive(PathBuf, #[error(source)] io::Error),
}

impl Zfs {
    /// Create a new [Zfs] instance snapshotting `dataset`.
    pub fn new(program: impl Into<PathBuf>, dataset: &str) -> Result<Self, ZfsError> {
        let re = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.:-]*(/[A-Za-z0-9_.:-]+)*$")
            .expect("dataset pattern should be valid");
        if !re.is_match(dataset) {
            return Err(ZfsError::InvalidDataset(dataset.to_string()));
        }

        Ok(Self {
            program: program.into(),
            dataset: dataset.to_string(),
        })
    }
}

impl Snapshotter for Zfs {
    type Error = ZfsError;

    fn dataset(&self) -> &str {
        &self.dataset
    }

    fn snapshot(&self, id: &SnapshotId) -> Result<(), ZfsError> {
        log::debug!(target: "backend::zfs", "Running: {} snapshot {id}", self.program.display());

        let output = Command::new(&self.program)
            .arg("snapshot")
            .arg(id.to_string())
            .output()
            .map_err(|e| ZfsError::NotRun(self.program.clone(), e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.trim().is_empty() {
            log::info!(target: "backend::zfs", "{}", stdout.trim_end());
        }

        if !output.status.success() {
            return Err(ZfsError::CommandFailed {
                subcommand: "snapshot",
                snapshot: id.to_string(),
                status: output.status,
                stderr: stderr.trim().into(),
            });
        }
        if !stderr.trim().is_empty() {
            log::warn!(target: "backend::zfs", "{}", stderr.trim_end());
        }

        Ok(())
    }

    fn export(&self, id: &SnapshotId, archive: &Path) -> Result<(), ZfsError> {
        log::info!(target: "backend::zfs", "Exporting {id} to {}", archive.display());

        // refuse to clobber an existing archive before starting `zfs send`
        let file = File::create_new(archive)
            .map_err(|e| ZfsError::Archive(archive.to_path_buf(), e))?;

        let result = self.send_compressed(id, file, archive).and_then(|file| {
            file.sync_all()
                .map_err(|e| ZfsError::Archive(archive.to_path_buf(), e))
        });
        if result.is_err() {
            log::debug!(target: "backend::zfs", "Removing partial archive {}", archive.display());
            if let Err(e) = fs::remove_file(archive) {
                log::warn!(target: "backend::zfs", "Removing partial archive {} failed: {e}", archive.display());
            }
        }

        result
    }
}

impl Zfs {
    /// Streams `zfs send` of `id` through gzip into `out`, named `archive` in errors.
    fn send_compressed<W: Write>(
        &self,
        id: &SnapshotId,
        out: W,
        archive: &Path,
    ) -> Result<W, ZfsError> {
        let mut send_process = Command::new(&self.program)
            .arg("send")
            .arg(id.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ZfsError::NotRun(self.program.clone(), e))?;
        log::trace!(target: "backend::zfs", "Started zfs send process.");

        // drain stderr concurrently so a chatty `zfs send` can't stall on a full pipe
        let stderr_reader = send_process.stderr.take().map(|mut stderr| {
            thread::spawn(move || {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf);
                buf
            })
        });

        let copied = match send_process.stdout.take() {
            Some(stdout) => {
                let mut reader = BufReader::new(stdout);
                let mut encoder = GzEncoder::new(out, Compression::default());
                io::copy(&mut reader, &mut encoder)
                    .and_then(|bytes| encoder.finish().map(|out| (bytes, out)))
            }
            None => Err(io::Error::other("zfs send stdout unavailable")),
        };

        let status = send_process
            .wait()
            .map_err(|e| ZfsError::NotRun(self.program.clone(), e))?;
        let stderr = stderr_reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        // after a failed write `zfs send` dies on a broken pipe, the write error is the cause
        let (bytes, out) = match copied {
            Ok(copied) => copied,
            Err(e) => {
                log::debug!(target: "backend::zfs", "zfs send exited with {status} after the archive write failed");
                return Err(ZfsError::Archive(archive.to_path_buf(), e));
            }
        };
        if !status.success() {
            return Err(ZfsError::CommandFailed {
                subcommand: "send",
                snapshot: id.to_string(),
                status,
                stderr: stderr.trim().into(),
            });
        }
        if !stderr.trim().is_empty() {
            log::warn!(target: "backend::zfs", "{}", stderr.trim_end());
        }

        log::info!(target: "backend::zfs", "Finished export of {id} ({bytes} bytes uncompressed).");
        Ok(out)
    }
}
