use std::path::PathBuf;

use clap::Parser;
use log::LevelFilter;

/// Consistent ZFS snapshot backup of a MySQL/MariaDB database.
///
/// Locks the database, snapshots its dataset, exports the snapshot as a gzip
/// archive into BACKUP_DIR and optionally pushes it to an S3 bucket. Failures
/// are reported by text message to ALERT_CONTACT.
#[derive(Parser, Debug)]
#[command(version, about, long_about)]
pub struct Cli {
    /// Database config keyed by environment name (`.yml`, `.toml` or `.json`).
    pub database_config: PathBuf,

    /// Folder the compressed snapshot is written to.
    pub backup_dir: PathBuf,

    /// Phone number to text if the backup fails.
    pub alert_contact: String,

    /// S3 bucket to push the archive to. No upload without it.
    pub upload_target: Option<String>,

    /// Verbosity of the command output.
    #[arg(long)]
    pub verbose: Option<LevelFilter>,

    /// Environment whose database is backed up.
    #[arg(long, env = "RAILS_ENV", default_value = "development")]
    pub environment: String,

    /// ZFS dataset holding the database files.
    #[arg(long, default_value = "data")]
    pub dataset: String,

    /// The `zfs` command.
    #[arg(long, default_value = "zfs")]
    pub zfs: PathBuf,

    /// The `mysql` client command.
    #[arg(long, default_value = "mysql")]
    pub mysql: PathBuf,

    /// Seconds to wait for the global read lock before failing.
    #[arg(long)]
    pub lock_wait_timeout: Option<u32>,

    /// Utility texting the message on its stdin to the contact given as argument.
    #[arg(long, default_value = "/usr/local/bin/send_sms")]
    pub send_sms: PathBuf,

    /// Region of the S3 bucket.
    #[arg(long, env = "AWS_REGION")]
    pub s3_region: Option<String>,

    /// Endpoint of an S3 compatible object store.
    #[arg(long, env = "AWS_ENDPOINT_URL")]
    pub s3_endpoint: Option<String>,
}
