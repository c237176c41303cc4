use thiserror::Error;
use tokio::process::Command;

use std::future::Future;
use std::io;
use std::process::Output;

#[derive(Debug, Error)]
pub enum Error {
    #[error("command execution failed")]
    CommandFailed,
    #[error("IO error: {0}")]
    IO(#[from] io::Error),
}

/// Log errors and warnings, or suppress them (used for commands that are
/// expected to fail benignly, e.g. deleting a route that is already gone).
#[derive(Debug)]
pub enum Logs {
    Print,
    Suppress,
}

pub trait ShellCommandExt {
    fn run(&mut self, logs: Logs) -> impl Future<Output = Result<(), Error>> + Send;
    fn run_stdout(&mut self, logs: Logs) -> impl Future<Output = Result<String, Error>> + Send;
}

impl ShellCommandExt for Command {
    /// Runs the command; logs stderr with a warning if the command
    /// succeeded but produced output anyway. Unconditionally captures
    /// stdout and stderr regardless of the command's own settings.
    async fn run(&mut self, logs: Logs) -> Result<(), Error> {
        let output = self.output().await?;
        let stderrempty = output.stderr.is_empty();
        match (stderrempty, output.status) {
            (true, status) if status.success() => Ok(()),
            (false, status) if status.success() => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                if matches!(logs, Logs::Print) {
                    tracing::warn!(cmd = ?self, %stderr, "non-empty stderr on successful command");
                }
                Ok(())
            }
            (_, status) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                if matches!(logs, Logs::Print) {
                    tracing::error!(cmd = ?self, status_code = ?status.code(), %stdout, %stderr, "error executing command");
                }
                Err(Error::CommandFailed)
            }
        }
    }

    async fn run_stdout(&mut self, logs: Logs) -> Result<String, Error> {
        let output = self.output().await?;
        let cmd_debug = format!("{:?}", self);
        stdout_from_output(cmd_debug, output, logs)
    }
}

pub fn stdout_from_output(cmd: String, output: Output, logs: Logs) -> Result<String, Error> {
    let stderrempty = output.stderr.is_empty();
    let stdout = String::from_utf8_lossy(&output.stdout);
    match (stderrempty, output.status) {
        (true, status) if status.success() => Ok(stdout.trim().to_string()),
        (false, status) if status.success() => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if matches!(logs, Logs::Print) {
                tracing::warn!(cmd, %stderr, "non-empty stderr on successful command");
            }
            Ok(stdout.trim().to_string())
        }
        (_, status) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if matches!(logs, Logs::Print) {
                tracing::error!(cmd, status_code = ?status.code(), %stdout, %stderr, "error executing command");
            }
            Err(Error::CommandFailed)
        }
    }
}
