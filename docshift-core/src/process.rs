//! Bounded external processes.
//!
//! Converters that live outside the process (the office engine, the page
//! rasterizer) are launched through [`run_bounded`]. The child gets no
//! stdin, its output is captured, and it is killed if it outlives the
//! tool's timeout.

use crate::config::ExternalTool;
use crate::error::{ConvertError, Result};
use std::ffi::OsString;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, warn};

const STDERR_EXCERPT: usize = 2048;

/// How a bounded process ended.
#[derive(Debug)]
pub enum ProcessOutcome {
    Completed { stdout: Vec<u8>, stderr: Vec<u8> },
    TimedOut,
    NonZeroExit { status: String, stderr: Vec<u8> },
}

impl ProcessOutcome {
    /// Turns anything but a clean exit into the matching [`ConvertError`].
    pub fn into_result(self, tool: &ExternalTool) -> Result<Vec<u8>> {
        match self {
            ProcessOutcome::Completed { stdout, .. } => Ok(stdout),
            ProcessOutcome::TimedOut => Err(ConvertError::ConverterTimeout {
                tool: tool.program.clone(),
                timeout: tool.timeout,
            }),
            ProcessOutcome::NonZeroExit { status, stderr } => Err(ConvertError::ConverterFailed {
                tool: tool.program.clone(),
                status,
                stderr: excerpt(&stderr),
            }),
        }
    }
}

fn excerpt(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    match text.char_indices().nth(STDERR_EXCERPT) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Runs `tool` with its extra args followed by `args`.
///
/// Failing to launch the program at all is reported as a conversion error
/// rather than an I/O error: from the client's point of view the engine is
/// simply unavailable.
pub async fn run_bounded(tool: &ExternalTool, args: &[OsString]) -> Result<ProcessOutcome> {
    let mut command = Command::new(&tool.program);
    command
        .args(&tool.extra_args)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let started = Instant::now();
    let child = command.spawn().map_err(|e| {
        ConvertError::Conversion(format!("could not start {}: {e}", tool.program))
    })?;

    match tokio::time::timeout(tool.timeout, child.wait_with_output()).await {
        Err(_) => {
            warn!(
                tool = %tool.program,
                timeout_secs = tool.timeout.as_secs_f64(),
                "external converter timed out and was killed"
            );
            Ok(ProcessOutcome::TimedOut)
        }
        Ok(Err(e)) => Err(ConvertError::Io(e)),
        Ok(Ok(output)) => {
            debug!(
                tool = %tool.program,
                status = %output.status,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "external converter finished"
            );
            if output.status.success() {
                Ok(ProcessOutcome::Completed {
                    stdout: output.stdout,
                    stderr: output.stderr,
                })
            } else {
                Ok(ProcessOutcome::NonZeroExit {
                    status: output.status.to_string(),
                    stderr: output.stderr,
                })
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sh(script: &str, timeout: Duration) -> ExternalTool {
        ExternalTool::new("sh", timeout).with_extra_args(["-c", script, "sh"])
    }

    #[tokio::test]
    async fn captures_stdout_on_success() {
        let tool = sh("echo \"$1\"", Duration::from_secs(5));
        let outcome = run_bounded(&tool, &["hello".into()]).await.unwrap();
        let stdout = outcome.into_result(&tool).unwrap();
        assert_eq!(String::from_utf8(stdout).unwrap().trim(), "hello");
    }

    #[tokio::test]
    async fn reports_non_zero_exit_with_stderr() {
        let tool = sh("echo broken >&2; exit 3", Duration::from_secs(5));
        let outcome = run_bounded(&tool, &[]).await.unwrap();
        assert!(matches!(outcome, ProcessOutcome::NonZeroExit { .. }));

        let err = outcome.into_result(&tool).unwrap_err();
        assert!(matches!(err, ConvertError::ConverterFailed { .. }));
        assert!(err.to_string().contains("broken"));
    }

    #[tokio::test]
    async fn kills_processes_that_overrun() {
        let tool = sh("sleep 30", Duration::from_millis(200));
        let started = Instant::now();
        let outcome = run_bounded(&tool, &[]).await.unwrap();

        assert!(matches!(outcome, ProcessOutcome::TimedOut));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(outcome.into_result(&tool).unwrap_err().is_timeout());
    }

    #[tokio::test]
    async fn missing_program_is_a_conversion_error() {
        let tool = ExternalTool::new("docshift-definitely-not-installed", Duration::from_secs(1));
        let err = run_bounded(&tool, &[]).await.unwrap_err();
        assert!(matches!(err, ConvertError::Conversion(_)));
    }

    #[test]
    fn long_stderr_is_truncated() {
        let long = "x".repeat(STDERR_EXCERPT * 2);
        assert!(excerpt(long.as_bytes()).len() <= STDERR_EXCERPT + 3);
    }
}
