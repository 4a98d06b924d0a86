//! Bounded execution of host probe tools
//!
//! External tools such as `nvidia-smi` can hang when a driver is wedged. Every
//! invocation goes through [`run_with_timeout`], which kills the child once the
//! deadline passes so a snapshot never blocks indefinitely.

use std::io::{self, Read};
use std::process::{Child, Command, Output, Stdio};
use std::time::Duration;

use tracing::{trace, warn};
use wait_timeout::ChildExt;

use crate::error::HardwareError;

/// Deadline for a single probe invocation
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of a bounded command execution
#[derive(Debug)]
pub enum ProbeOutcome {
    /// Process exited before the deadline (any exit status)
    Exited(Output),
    /// Process was killed at the deadline
    TimedOut,
    /// Process could not be started, usually because the tool is not installed
    NotStarted(io::Error),
}

impl ProbeOutcome {
    /// Returns true if the process exited before the deadline
    pub fn exited(&self) -> bool {
        matches!(self, ProbeOutcome::Exited(_))
    }

    /// Returns true if the process was killed at the deadline
    pub fn timed_out(&self) -> bool {
        matches!(self, ProbeOutcome::TimedOut)
    }

    /// Stdout of a successful run, or the reason there is none.
    ///
    /// `program` is only used to label the error.
    pub fn into_stdout(self, program: &str) -> Result<String, HardwareError> {
        match self {
            ProbeOutcome::Exited(output) if output.status.success() => {
                Ok(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            ProbeOutcome::Exited(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(HardwareError::command(
                    program,
                    format!("exited with {}: {}", output.status, stderr.trim()),
                ))
            }
            ProbeOutcome::TimedOut => Err(HardwareError::command(
                program,
                format!("timed out after {}s", PROBE_TIMEOUT.as_secs()),
            )),
            ProbeOutcome::NotStarted(e) => Err(HardwareError::command(program, e.to_string())),
        }
    }
}

/// Execute `cmd`, capturing stdout and stderr, killing it after `timeout`.
///
/// # Example
/// ```no_run
/// use std::process::Command;
/// use lcp_core::command::{run_with_timeout, PROBE_TIMEOUT};
///
/// let mut cmd = Command::new("nvidia-smi");
/// cmd.args(["--query-gpu=name", "--format=csv,noheader"]);
///
/// match run_with_timeout(&mut cmd, PROBE_TIMEOUT).into_stdout("nvidia-smi") {
///     Ok(stdout) => println!("{stdout}"),
///     Err(e) => eprintln!("{e}"),
/// }
/// ```
pub fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> ProbeOutcome {
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            trace!(error = %e, "Failed to spawn probe");
            return ProbeOutcome::NotStarted(e);
        }
    };

    match child.wait_timeout(timeout) {
        Ok(Some(status)) => {
            let (stdout, stderr) = drain(&mut child);
            ProbeOutcome::Exited(Output {
                status,
                stdout,
                stderr,
            })
        }
        Ok(None) => {
            warn!(timeout_secs = timeout.as_secs(), "Probe timed out, killing process");
            reap(&mut child);
            ProbeOutcome::TimedOut
        }
        Err(e) => {
            warn!(error = %e, "Error waiting for probe");
            reap(&mut child);
            ProbeOutcome::NotStarted(e)
        }
    }
}

/// Run `program args...` with [`PROBE_TIMEOUT`] and return its stdout.
pub fn probe(program: &str, args: &[&str]) -> Result<String, HardwareError> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    run_with_timeout(&mut cmd, PROBE_TIMEOUT).into_stdout(program)
}

fn drain(child: &mut Child) -> (Vec<u8>, Vec<u8>) {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    if let Some(mut pipe) = child.stdout.take() {
        pipe.read_to_end(&mut stdout).ok();
    }
    if let Some(mut pipe) = child.stderr.take() {
        pipe.read_to_end(&mut stderr).ok();
    }
    (stdout, stderr)
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_successful_probe() {
        let stdout = probe("echo", &["hello"]).unwrap();
        assert_eq!(stdout.trim(), "hello");
    }

    #[test]
    fn test_missing_tool() {
        let mut cmd = Command::new("lcp_probe_tool_that_does_not_exist");
        let outcome = run_with_timeout(&mut cmd, Duration::from_secs(1));
        assert!(matches!(outcome, ProbeOutcome::NotStarted(_)));

        let err = outcome.into_stdout("lcp_probe_tool_that_does_not_exist").unwrap_err();
        assert!(matches!(err, HardwareError::CommandFailed { .. }));
    }

    #[test]
    fn test_timeout_kills_process() {
        let mut cmd = Command::new("sleep");
        cmd.arg("10");

        let outcome = run_with_timeout(&mut cmd, Duration::from_millis(100));
        assert!(outcome.timed_out());
        assert!(!outcome.exited());
    }

    #[test]
    fn test_nonzero_exit_is_error() {
        let err = probe("false", &[]).unwrap_err();
        match err {
            HardwareError::CommandFailed { command, .. } => assert_eq!(command, "false"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_probe_timeout_value() {
        assert_eq!(PROBE_TIMEOUT, Duration::from_secs(5));
    }
}
