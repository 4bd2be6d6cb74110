//! Runner that only logs

use super::{CommandOutput, CommandRunner, ExecResult, ShellCommand};

/// Logs each command and reports success with empty output
#[derive(Debug, Clone, Copy, Default)]
pub struct FakeRunner;

impl CommandRunner for FakeRunner {
    fn run(&self, command: &ShellCommand) -> ExecResult<CommandOutput> {
        log::debug!("FAKE: {}", command);
        Ok(CommandOutput::default())
    }
}
