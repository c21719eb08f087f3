// ABOUTME: Child process execution for command-line collaborators (az, kubectl, ping).
// ABOUTME: Captures stdout/stderr and kills the child when the caller's future is dropped.

use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Result of running a local command.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    /// Trimmed stderr, falling back to stdout when stderr is empty.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Run `program` with `args`, optionally feeding `stdin`.
///
/// The child is killed if the returned future is dropped, so deadline
/// cancellation upstream also stops the process.
pub async fn run(
    program: &str,
    args: &[String],
    stdin: Option<&str>,
) -> std::io::Result<ProcessOutput> {
    tracing::debug!("Running {} {}", program, args.join(" "));

    let mut child = Command::new(program)
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    if let Some(input) = stdin
        && let Some(mut pipe) = child.stdin.take()
    {
        pipe.write_all(input.as_bytes()).await?;
        // Close stdin so the child sees EOF.
        drop(pipe);
    }

    let output = child.wait_with_output().await?;

    let result = ProcessOutput {
        success: output.status.success(),
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };

    if !result.success {
        tracing::debug!(
            "{} exited with code {:?}: {}",
            program,
            result.exit_code,
            result.diagnostic()
        );
    }

    Ok(result)
}
