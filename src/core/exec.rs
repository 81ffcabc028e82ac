//! Abstraction over firewall command execution for testability.
//!
//! Defines the [`Executor`] trait the enumerator and emitter drive.
//! Production code uses [`SystemExecutor`]; tests use the scripted mock in
//! the `mocks` module. All execution is synchronous and blocking: each
//! reconciliation pass runs to completion, and nothing is cancelled
//! mid-flight.

use std::process::Command;

use super::error::{Error, Result};

/// Captured result of one command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub exit_status: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// Executes one external command.
///
/// A non-zero exit is NOT an `Err` at this layer: callers decide whether a
/// failure is fatal (emitter) or degradable (enumerator, persistence).
/// `Err` means the process could not be spawned at all.
pub trait Executor {
    fn execute(&self, argv: &[String]) -> Result<CommandOutput>;
}

/// Production [`Executor`] that runs real commands.
pub struct SystemExecutor;

impl Executor for SystemExecutor {
    fn execute(&self, argv: &[String]) -> Result<CommandOutput> {
        let (binary, args) = argv.split_first().ok_or_else(|| Error::Execution {
            command: argv.to_vec(),
            message: "empty command".to_string(),
            exit_code: None,
        })?;
        let output = Command::new(binary)
            .args(args)
            .output()
            .map_err(|e| Error::Execution {
                command: argv.to_vec(),
                message: format!("failed to spawn {binary}: {e}"),
                exit_code: None,
            })?;
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            exit_status: output.status.code().unwrap_or(-1),
        })
    }
}

/// Runs a command and converts a non-zero exit into an execution error.
pub fn run_checked(executor: &dyn Executor, argv: &[String]) -> Result<CommandOutput> {
    let output = executor.execute(argv)?;
    if output.success() {
        Ok(output)
    } else {
        Err(Error::Execution {
            command: argv.to_vec(),
            message: format!("exit status {}", output.exit_status),
            exit_code: Some(output.exit_status),
        })
    }
}
