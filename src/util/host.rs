//! Identifier of the machine a backup is taken on.

use std::fs;
use std::process::Command;

const KERNEL_HOSTNAME: &str = "/proc/sys/kernel/hostname";
const FALLBACK_HOSTNAME: &str = "localhost";

/// Name of this host without surrounding whitespace.
///
/// Asks the `hostname` command first, then the kernel. Falls back to
/// `localhost` if neither answers.
pub fn hostname() -> String {
    let from_command = Command::new("hostname")
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).into_owned());

    let from_kernel = || fs::read_to_string(KERNEL_HOSTNAME).ok();

    match from_command
        .and_then(non_empty)
        .or_else(|| from_kernel().and_then(non_empty))
    {
        Some(host) => host,
        None => {
            log::warn!(target: "pipeline", "Hostname unknown, using {FALLBACK_HOSTNAME}");
            FALLBACK_HOSTNAME.into()
        }
    }
}

fn non_empty(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_has_no_trailing_newline() {
        let host = hostname();
        assert!(!host.is_empty());
        assert_eq!(host, host.trim());
    }

    #[test]
    fn blank_output_is_ignored() {
        assert_eq!(non_empty("db1\n".into()).as_deref(), Some("db1"));
        assert_eq!(non_empty(" \n".into()), None);
    }
}
