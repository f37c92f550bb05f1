//! Implements the database lock using a [MariaDb] client session.
//!
//! `FLUSH TABLES WITH READ LOCK` only lasts as long as the session that issued
//! it, so the `mysql` command line client is kept running for the whole
//! snapshot step and fed statements through its stdin.

use std::ffi::OsString;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use derive_more::{Display, Error};

use crate::backends::{Database, TableLock};
use crate::config::ConnectionParams;

/// Client for MariaDB and MySQL servers using the `mysql` command.
#[derive(Debug, Clone)]
pub struct MariaDb {
    client: PathBuf,
    lock_wait_timeout: Option<u32>,
}

impl MariaDb {
    pub fn with_client(client: impl Into<PathBuf>) -> Self {
        Self {
            client: client.into(),
            lock_wait_timeout: None,
        }
    }

    /// Seconds to wait for the read lock before giving up.
    pub fn lock_wait_timeout(mut self, seconds: Option<u32>) -> Self {
        self.lock_wait_timeout = seconds;
        self
    }
}

#[derive(Debug, Display, Error)]
/// Errors of a [MariaDbSession].
pub enum MariaDbError {
    /// The client could not be started.
    #[display("Starting {} failed: {_1}", _0.display())]
    ClientNotRun(PathBuf, #[error(source)] io::Error),
    /// Talking to the client failed.
    #[display("Communication with the database client failed: {_0}")]
    Io(io::Error),
    /// The client exited before confirming the statement.
    #[display("Database client exited while running '{statement}': {stderr}")]
    ClientExited {
        #[error(ignore)]
        statement: &'static str,
        #[error(ignore)]
        stderr: String,
    },
}

/// Builds the arguments of the client, excluding the password.
pub fn client_args(params: &ConnectionParams) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "--batch".into(),
        "--skip-column-names".into(),
        "--unbuffered".into(),
    ];

    if let Some(host) = &params.host {
        args.push(format!("--host={host}").into());
    }
    if let Some(port) = params.port {
        args.push(format!("--port={port}").into());
    }
    if let Some(socket) = &params.socket {
        let mut arg = OsString::from("--socket=");
        arg.push(socket);
        args.push(arg);
    }
    if let Some(user) = &params.username {
        args.push(format!("--user={user}").into());
    }
    if let Some(database) = &params.database {
        // terminate options, so a database name can't be taken as one
        args.push("--".into());
        args.push(database.into());
    }

    args
}

impl Database for MariaDb {
    type Session = MariaDbSession;
    type Error = MariaDbError;

    fn connect(&self, params: &ConnectionParams) -> Result<MariaDbSession, MariaDbError> {
        log::info!(
            target: "backend::mariadb",
            "Connecting to database {} on {}",
            params.database.as_deref().unwrap_or("<default>"),
            params.host.as_deref().unwrap_or("localhost"),
        );

        let mut command = Command::new(&self.client);
        command
            .args(client_args(params))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(password) = &params.password {
            command.env("MYSQL_PWD", password);
        }
        log::trace!(target: "backend::mariadb", "Running: {command:?}");

        let mut child = command
            .spawn()
            .map_err(|e| MariaDbError::ClientNotRun(self.client.clone(), e))?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(MariaDbError::Io(io::Error::other("client pipes unavailable")));
        };

        let mut session = MariaDbSession {
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
        };
        session.execute("SELECT 'ready';", "ready")?;

        if let Some(timeout) = self.lock_wait_timeout {
            log::debug!(target: "backend::mariadb", "Waiting at most {timeout}s for locks");
            session.execute_owned(
                format!("SET SESSION lock_wait_timeout = {timeout}; SELECT 'timeout';"),
                "SET SESSION lock_wait_timeout",
                "timeout",
            )?;
        }

        log::debug!(target: "backend::mariadb", "Connected.");
        Ok(session)
    }
}

/// Open connection of the `mysql` client.
#[derive(Debug)]
pub struct MariaDbSession {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
}

impl MariaDbSession {
    /// Runs `statement` and waits for the `marker` row it selects last.
    fn execute(&mut self, statement: &'static str, marker: &str) -> Result<(), MariaDbError> {
        self.execute_owned(statement.to_string(), statement, marker)
    }

    fn execute_owned(
        &mut self,
        statement: String,
        label: &'static str,
        marker: &str,
    ) -> Result<(), MariaDbError> {
        log::trace!(target: "backend::mariadb", "Executing: {label}");
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| MariaDbError::Io(io::ErrorKind::BrokenPipe.into()))?;

        // a dead client shows up as a broken pipe here or as EOF below
        if let Err(e) = writeln!(stdin, "{statement}").and_then(|()| stdin.flush()) {
            log::debug!(target: "backend::mariadb", "Writing to client failed: {e}");
            return Err(self.exited(label));
        }

        let mut line = String::new();
        loop {
            line.clear();
            if self.stdout.read_line(&mut line).map_err(MariaDbError::Io)? == 0 {
                return Err(self.exited(label));
            }
            let row = line.trim_end();
            if row == marker {
                return Ok(());
            }
            log::debug!(target: "backend::mariadb", "{row}");
        }
    }

    fn exited(&mut self, statement: &'static str) -> MariaDbError {
        self.stdin = None;
        let mut stderr = String::new();
        if let Some(mut pipe) = self.child.stderr.take() {
            let _ = pipe.read_to_string(&mut stderr);
        }
        let _ = self.child.wait();

        MariaDbError::ClientExited {
            statement,
            stderr: stderr.trim().to_string(),
        }
    }
}

impl TableLock for MariaDbSession {
    type Error = MariaDbError;

    fn lock(&mut self) -> Result<(), MariaDbError> {
        log::info!(target: "backend::mariadb", "Acquiring global read lock.");
        self.execute("FLUSH TABLES WITH READ LOCK; SELECT 'locked';", "locked")?;
        log::info!(target: "backend::mariadb", "Lock acquired.");
        Ok(())
    }

    fn unlock(&mut self) -> Result<(), MariaDbError> {
        log::info!(target: "backend::mariadb", "Unlocking tables.");
        self.execute("UNLOCK TABLES; SELECT 'unlocked';", "unlocked")
    }
}

impl Drop for MariaDbSession {
    fn drop(&mut self) {
        // closing stdin ends the session, the server drops any lock it still holds
        self.stdin = None;
        match self.child.wait() {
            Ok(status) if !status.success() => {
                log::warn!(target: "backend::mariadb", "Database client exited with {status}");
            }
            Ok(_) => log::trace!(target: "backend::mariadb", "Database client exited."),
            Err(e) => log::warn!(target: "backend::mariadb", "Waiting for database client failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::*;

    #[test]
    fn args_carry_connection_params_but_not_the_password() {
        let params = ConnectionParams {
            host: Some("db.internal".into()),
            port: Some(3307),
            socket: Some("/run/mysqld/mysqld.sock".into()),
            username: Some("backup".into()),
            password: Some("s3cr3t".into()),
            database: Some("app".into()),
        };

        let args: Vec<String> = client_args(&params)
            .into_iter()
            .map(|arg| arg.into_string().unwrap())
            .collect();

        assert_eq!(
            args,
            [
                "--batch",
                "--skip-column-names",
                "--unbuffered",
                "--host=db.internal",
                "--port=3307",
                "--socket=/run/mysqld/mysqld.sock",
                "--user=backup",
                "--",
                "app",
            ]
        );
        assert!(!args.iter().any(|arg| arg.contains("s3cr3t")));
    }

    #[test]
    fn empty_params_only_set_batch_mode() {
        let args = client_args(&ConnectionParams::default());
        assert_eq!(args.len(), 3);
    }

    #[test]
    fn missing_client_fails_to_connect() {
        let db = MariaDb::with_client("/nonexistent/mysql-client");
        let err = db.connect(&ConnectionParams::default()).unwrap_err();

        assert!(matches!(err, MariaDbError::ClientNotRun(..)));
    }

    #[test]
    fn client_exiting_early_fails_to_connect() {
        // `true` ignores its arguments and exits without answering
        let db = MariaDb::with_client("true");
        let err = db.connect(&ConnectionParams::default()).unwrap_err();

        assert!(matches!(err, MariaDbError::ClientExited { statement, .. } if statement == "SELECT 'ready';"));
    }

    #[test]
    fn missing_client_keeps_the_io_error_as_source() {
        let db = MariaDb::with_client("/nonexistent/mysql-client");
        let err = db.connect(&ConnectionParams::default()).unwrap_err();

        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(
            source.downcast_ref::<io::Error>().unwrap().kind(),
            io::ErrorKind::NotFound
        );
    }

    /// Writes a stand-in for `mysql` into `dir`. It appends every statement to
    /// `dir/statements` and answers with the marker row, running `on_flush`
    /// when asked for the read lock.
    fn fake_client(dir: &Path, on_flush: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = format!(
            r#"#!/bin/sh
log="$(dirname "$0")/statements"
while IFS= read -r line; do
  printf '%s\n' "$line" >> "$log"
  case "$line" in
    FLUSH*) {on_flush} ;;
    *"SELECT 'ready'"*) echo ready ;;
    *"SELECT 'timeout'"*) echo timeout ;;
    *"SELECT 'unlocked'"*) echo unlocked ;;
  esac
done
"#
        );
        let path = dir.join("mysql");
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn lock_and_unlock_wait_for_their_markers() {
        let dir = tempfile::tempdir().unwrap();
        let client = fake_client(dir.path(), "echo 'Tables_flushed'; echo locked");

        let db = MariaDb::with_client(client).lock_wait_timeout(Some(5));
        let mut session = db.connect(&ConnectionParams::default()).unwrap();
        session.lock().unwrap();
        session.unlock().unwrap();
        drop(session);

        let statements = fs::read_to_string(dir.path().join("statements")).unwrap();
        assert_eq!(
            statements.lines().collect::<Vec<_>>(),
            [
                "SELECT 'ready';",
                "SET SESSION lock_wait_timeout = 5; SELECT 'timeout';",
                "FLUSH TABLES WITH READ LOCK; SELECT 'locked';",
                "UNLOCK TABLES; SELECT 'unlocked';",
            ]
        );
    }

    #[test]
    fn client_exiting_on_flush_fails_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let client = fake_client(
            dir.path(),
            "echo 'ERROR 1205 (HY000) at line 2: Lock wait timeout exceeded' >&2; exit 1",
        );

        let db = MariaDb::with_client(client);
        let mut session = db.connect(&ConnectionParams::default()).unwrap();
        let err = session.lock().unwrap_err();

        match err {
            MariaDbError::ClientExited { statement, stderr } => {
                assert_eq!(statement, "FLUSH TABLES WITH READ LOCK; SELECT 'locked';");
                assert!(stderr.contains("ERROR 1205"), "stderr: {stderr}");
            }
            other => panic!("unexpected error: {other}"),
        }
        // no unlock can be sent to a dead client
        assert!(session.unlock().is_err());
    }
}
