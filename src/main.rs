use std::process::ExitCode;

use clap::Parser;
use zfs_db_backup_lib::backends::{MariaDb, Sms, Zfs, S3};
use zfs_db_backup_lib::cli::Cli;
use zfs_db_backup_lib::context::RunContext;
use zfs_db_backup_lib::pipeline::Pipeline;
use zfs_db_backup_lib::util::host;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // init logger
    let mut env_logger = env_logger::builder();
    if let Some(level) = cli.verbose {
        env_logger.filter_level(level);
    }
    env_logger.try_init().expect("env_logger should not fail");

    let sms = Sms::with_program(&cli.send_sms);
    let zfs = match Zfs::new(&cli.zfs, &cli.dataset) {
        Ok(zfs) => zfs,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let mariadb = MariaDb::with_client(&cli.mysql).lock_wait_timeout(cli.lock_wait_timeout);
    let s3 = S3 {
        region: cli.s3_region,
        endpoint_url: cli.s3_endpoint,
    };

    let mut ctx = RunContext::new(
        cli.database_config,
        cli.environment,
        cli.backup_dir,
        cli.alert_contact,
        cli.upload_target,
        host::hostname(),
    );

    let pipeline = Pipeline::new(mariadb, zfs, s3, sms);
    match pipeline.run(&mut ctx) {
        Ok(_) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}
