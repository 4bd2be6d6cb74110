//! Command execution
//!
//! Every shell-level interaction with the storage stack goes through an
//! [`Executor`]. The executor owns a [`CommandRunner`] (the thing that actually
//! runs a process, or pretends to) and a [`RetryPolicy`] that decides when a
//! failed command is worth running again.

pub mod fake;
pub mod system;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use fake::FakeRunner;
pub use system::SystemRunner;

/// Command execution errors
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {exit_code:?}: {stderr}")]
    Failed {
        command: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("`{command}` timed out after {timeout:?}")]
    TimedOut { command: String, timeout: Duration },
}

impl ExecutionError {
    /// Captured stderr, empty when the process never produced any
    pub fn stderr(&self) -> &str {
        match self {
            ExecutionError::Failed { stderr, .. } => stderr,
            _ => "",
        }
    }

    /// True only for a process that ran and exited unsuccessfully
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecutionError::Failed { .. })
    }

    /// Exit code of the failed process, if it exited at all
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecutionError::Failed { exit_code, .. } => *exit_code,
            _ => None,
        }
    }
}

/// Result type for command execution
pub type ExecResult<T> = Result<T, ExecutionError>;

/// A command line to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Prefix with the configured root helper
    pub run_as_root: bool,
    /// Exit codes treated as success
    pub ok_exit_codes: Vec<i32>,
}

impl ShellCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            run_as_root: false,
            ok_exit_codes: vec![0],
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn as_root(mut self) -> Self {
        self.run_as_root = true;
        self
    }

    pub fn ok_exit_codes(mut self, codes: &[i32]) -> Self {
        self.ok_exit_codes = codes.to_vec();
        self
    }
}

impl fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured output of a successful command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs a single command once
pub trait CommandRunner: Send + Sync {
    fn run(&self, command: &ShellCommand) -> ExecResult<CommandOutput>;
}

/// Retry settings shared by every executor built from one configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_tries: u32,
    /// Sleep after failed attempt `n` is `n² * backoff_unit`
    pub backoff_unit: Duration,
    /// Stderr substrings that mark a failure as non-recoverable
    pub no_retry_patterns: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_tries: 3,
            backoff_unit: Duration::from_secs(1),
            no_retry_patterns: Vec::new(),
        }
    }
}

impl RetryPolicy {
    fn is_non_recoverable(&self, stderr: &str, extra: &[&str]) -> bool {
        self.no_retry_patterns
            .iter()
            .map(String::as_str)
            .chain(extra.iter().copied())
            .any(|pattern| stderr.contains(pattern))
    }
}

/// Command executor with bounded retry
#[derive(Clone)]
pub struct Executor {
    runner: Arc<dyn CommandRunner>,
    policy: RetryPolicy,
}

impl Executor {
    pub fn new(runner: Arc<dyn CommandRunner>, policy: RetryPolicy) -> Self {
        Self { runner, policy }
    }

    /// Executor that logs commands instead of running them
    pub fn fake() -> Self {
        Self::new(Arc::new(FakeRunner), RetryPolicy::default())
    }

    /// Run a command exactly once
    pub fn run(&self, command: &ShellCommand) -> ExecResult<CommandOutput> {
        self.runner.run(command)
    }

    /// Run a command, retrying recoverable failures.
    ///
    /// `no_retry` adds per-call non-recoverable patterns on top of the policy's
    /// own list.
    pub fn try_run(
        &self,
        command: &ShellCommand,
        no_retry: &[&str],
    ) -> ExecResult<CommandOutput> {
        let mut tries = 0;
        loop {
            match self.runner.run(command) {
                Ok(output) => return Ok(output),
                Err(e) => {
                    tries += 1;

                    if tries >= self.policy.max_tries || !e.is_retryable() {
                        return Err(e);
                    }
                    if self.policy.is_non_recoverable(e.stderr(), no_retry) {
                        log::debug!("`{}` failed with a non-recoverable error", command);
                        return Err(e);
                    }

                    log::warn!(
                        "Recovering from a failed execute of `{}`. Try number {}: {}",
                        command,
                        tries,
                        e
                    );
                    std::thread::sleep(self.policy.backoff_unit * (tries * tries));
                }
            }
        }
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
