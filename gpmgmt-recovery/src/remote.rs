//! Remote command transport
//!
//! Runs a program on another host. Authentication is left to the
//! underlying ssh setup.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::command::{CommandError, Result};
use crate::tools::run_captured;

/// Runs programs on cluster hosts
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Run `program` with `args` on `host` and return its stdout
    async fn run(&self, host: &str, program: &str, args: &[String]) -> Result<String>;
}

/// [`RemoteShell`] over non-interactive ssh
#[derive(Debug, Clone)]
pub struct SshShell {
    ssh_program: String,
}

impl SshShell {
    pub fn new(ssh_program: impl Into<String>) -> Self {
        Self {
            ssh_program: ssh_program.into(),
        }
    }

    /// Remote command line, each word quoted for the remote shell
    pub fn remote_command_line(program: &str, args: &[String]) -> String {
        std::iter::once(program)
            .chain(args.iter().map(String::as_str))
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Default for SshShell {
    fn default() -> Self {
        Self::new("ssh")
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn run(&self, host: &str, program: &str, args: &[String]) -> Result<String> {
        let command_line = Self::remote_command_line(program, args);
        debug!(host = %host, command = %command_line, "Running remote command");

        let mut cmd = Command::new(&self.ssh_program);
        cmd.args(["-o", "BatchMode=yes", host, &command_line]);

        run_captured(&mut cmd, &self.ssh_program)
            .await
            .map_err(|e| CommandError::Remote {
                host: host.to_string(),
                message: e.to_string(),
            })
    }
}

/// Quote a word for a POSIX shell
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./=:,+@%".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', "'\\''"))
    }
}
