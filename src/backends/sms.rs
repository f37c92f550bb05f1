//! Implements operator alerts by text message using [Sms].

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::backends::Notifier;

/// Sends alerts through an external `send_sms <contact>` utility reading the
/// message from stdin.
#[derive(Debug, Clone)]
pub struct Sms {
    program: PathBuf,
}

impl Sms {
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn send(&self, contact: &str, message: &str) -> std::io::Result<std::process::ExitStatus> {
        let mut child = Command::new(&self.program)
            .arg(contact)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            // the utility may exit without reading, that's its own business
            if let Err(e) = writeln!(stdin, "{message}") {
                log::debug!(target: "backend::sms", "Writing message to {} failed: {e}", self.program.display());
            }
        }

        let output = child.wait_with_output()?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            log::debug!(target: "backend::sms", "{}", stdout.trim_end());
        }

        Ok(output.status)
    }
}

impl Notifier for Sms {
    fn notify(&self, contact: &str, message: &str) {
        log::info!(target: "backend::sms", "Notifying {contact}: {message}");

        match self.send(contact, message) {
            Ok(status) if status.success() => {
                log::debug!(target: "backend::sms", "Alert handed to {}", self.program.display());
            }
            Ok(status) => {
                log::warn!(target: "backend::sms", "{} exited with {status}", self.program.display());
            }
            Err(e) => {
                log::warn!(target: "backend::sms", "Running {} failed: {e}", self.program.display());
            }
        }
    }
}
