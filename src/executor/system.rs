//! Runs commands as real child processes

use super::{CommandOutput, CommandRunner, ExecResult, ExecutionError, ShellCommand};
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Runner backed by `std::process::Command`
#[derive(Debug, Clone)]
pub struct SystemRunner {
    /// Prefix for commands that must run as root (e.g. `sudo`)
    root_helper: Option<String>,
    /// Kill the child after this long
    timeout: Duration,
}

impl SystemRunner {
    pub fn new(root_helper: Option<String>, timeout: Duration) -> Self {
        Self {
            root_helper,
            timeout,
        }
    }

    fn build(&self, command: &ShellCommand) -> Command {
        let mut cmd = match (&self.root_helper, command.run_as_root) {
            (Some(helper), true) => {
                let mut parts = helper.split_whitespace();
                // helper is validated non-empty by config
                let mut cmd = Command::new(parts.next().unwrap_or("sudo"));
                cmd.args(parts);
                // We cannot signal the root process ourselves, so it carries its own deadline
                cmd.args(["timeout", "-s", "KILL"])
                    .arg(self.timeout.as_secs().max(1).to_string());
                cmd.arg(&command.program);
                cmd.args(&command.args);
                cmd
            }
            _ => {
                let mut cmd = Command::new(&command.program);
                cmd.args(&command.args);
                cmd
            }
        };

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group, so a timeout takes grandchildren down too
            cmd.process_group(0);
        }
        cmd
    }

    fn wait_with_timeout(
        &self,
        child: &mut Child,
        command: &ShellCommand,
    ) -> ExecResult<Option<i32>> {
        let started = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status.code()),
                Ok(None) => {}
                Err(e) => {
                    return Err(ExecutionError::Spawn {
                        command: command.to_string(),
                        source: e,
                    })
                }
            }

            if started.elapsed() >= self.timeout {
                log::error!("`{}` exceeded {:?}, killing it", command, self.timeout);
                if let Err(e) = kill_group(child) {
                    log::warn!("Failed to kill `{}`: {}", command, e);
                }
                let _ = child.wait();
                return Err(ExecutionError::TimedOut {
                    command: command.to_string(),
                    timeout: self.timeout,
                });
            }

            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// SIGKILL the child's process group, falling back to the child alone
#[cfg(unix)]
fn kill_group(child: &mut Child) -> std::io::Result<()> {
    let pgid = child.id() as libc::pid_t;
    // SAFETY: kill(2) takes no pointers; a negative pid names the process group
    if unsafe { libc::kill(-pgid, libc::SIGKILL) } == 0 {
        return Ok(());
    }
    log::debug!(
        "Process group kill of {} failed: {}",
        pgid,
        std::io::Error::last_os_error()
    );
    child.kill()
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) -> std::io::Result<()> {
    child.kill()
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new(None, Duration::from_secs(120))
    }
}

/// Drain a pipe on its own thread so a chatty child never blocks on a full pipe
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

impl CommandRunner for SystemRunner {
    fn run(&self, command: &ShellCommand) -> ExecResult<CommandOutput> {
        log::debug!("Running cmd: {}", command);

        let mut child = self
            .build(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExecutionError::Spawn {
                command: command.to_string(),
                source: e,
            })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let waited = self.wait_with_timeout(&mut child, command);

        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();
        let exit_code = waited?;

        log::debug!("`{}` returned {:?}", command, exit_code);

        match exit_code {
            Some(code) if command.ok_exit_codes.contains(&code) => {
                Ok(CommandOutput { stdout, stderr })
            }
            _ => Err(ExecutionError::Failed {
                command: command.to_string(),
                exit_code,
                stdout,
                stderr,
            }),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_captures_stdout() {
        let runner = SystemRunner::default();
        let output = runner
            .run(&ShellCommand::new("sh").args(["-c", "echo hello"]))
            .unwrap();
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[test]
    fn test_failure_carries_stderr() {
        let runner = SystemRunner::default();
        let err = runner
            .run(&ShellCommand::new("sh").args(["-c", "echo nope >&2; exit 3"]))
            .unwrap_err();
        assert_eq!(err.exit_code(), Some(3));
        assert_eq!(err.stderr().trim(), "nope");
    }

    #[test]
    fn test_accepted_exit_code() {
        let runner = SystemRunner::default();
        let cmd = ShellCommand::new("sh").args(["-c", "exit 21"]).ok_exit_codes(&[0, 21]);
        assert!(runner.run(&cmd).is_ok());
    }

    #[test]
    fn test_timeout_kills_child() {
        let runner = SystemRunner::new(None, Duration::from_millis(200));
        let err = runner
            .run(&ShellCommand::new("sleep").arg("5"))
            .unwrap_err();
        assert!(matches!(err, ExecutionError::TimedOut { .. }));
    }

    #[test]
    fn test_timeout_kills_grandchildren() {
        let runner = SystemRunner::new(None, Duration::from_millis(200));
        let started = Instant::now();

        // The backgrounded sleep holds stdout open until it dies
        let err = runner
            .run(&ShellCommand::new("sh").args(["-c", "sleep 30 & wait"]))
            .unwrap_err();

        assert!(matches!(err, ExecutionError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_root_commands_carry_their_own_deadline() {
        let runner = SystemRunner::new(Some("sudo -n".to_string()), Duration::from_secs(30));
        let cmd = runner.build(&ShellCommand::new("iscsiadm").args(["-m", "node"]).as_root());

        assert_eq!(cmd.get_program(), "sudo");
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec!["-n", "timeout", "-s", "KILL", "30", "iscsiadm", "-m", "node"]
        );
    }

    #[test]
    fn test_unprivileged_commands_skip_helper() {
        let runner = SystemRunner::new(Some("sudo".to_string()), Duration::from_secs(30));
        let cmd = runner.build(&ShellCommand::new("dd").arg("count=0"));

        assert_eq!(cmd.get_program(), "dd");
        assert_eq!(cmd.get_args().count(), 1);
    }

    #[test]
    fn test_missing_program() {
        let runner = SystemRunner::default();
        let err = runner
            .run(&ShellCommand::new("definitely-not-a-real-binary-xyz"))
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Spawn { .. }));
    }
}
