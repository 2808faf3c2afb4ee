//! Running external tools with their output streamed to the log.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{PublishError, PublishResult};

/// Wait for a task forwarding `stream` to the log. Returns whether it
/// finished cleanly.
async fn drain(task: JoinHandle<()>, stream: &str) -> bool {
    match task.await {
        Ok(()) => true,
        Err(e) => {
            warn!("Logging {} of subprocess failed: {}", stream, e);
            false
        }
    }
}

/// Run `argv`, logging stdout lines at DEBUG and stderr lines at INFO, each
/// with `prefix`. Returns the exit code.
///
/// There is no timeout; the caller blocks until the process exits. Dropping
/// the returned future does not kill the process: it runs to completion,
/// writing only into the shadow copy of the tree.
pub async fn run_logged(argv: &[String], prefix: &str) -> PublishResult<i32> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| PublishError::Configuration("empty command".to_string()))?;

    debug!("Running {}", shlex::try_join(argv.iter().map(|s| s.as_str())).unwrap_or_default());

    let mut proc = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(false)
        .spawn()?;

    let stdout = proc
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("failed to open stdout"))?;
    let stderr = proc
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::other("failed to open stderr"))?;

    let out_prefix = prefix.to_string();
    let stdout_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!("{}{}", out_prefix, line);
        }
    });
    let err_prefix = prefix.to_string();
    let stderr_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!("{}{}", err_prefix, line);
        }
    });

    let status = proc.wait().await?;
    // Drain whatever is left in the pipes before returning.
    drain(stdout_task, "stdout").await;
    drain(stderr_task, "stderr").await;

    // A process killed by a signal has no exit code.
    Ok(status.code().unwrap_or(-1))
}

/// Run `program` with `input` on stdin and return its stdout.
pub async fn run_with_input(
    program: &str,
    args: &[String],
    input: &[u8],
) -> PublishResult<(i32, Vec<u8>, String)> {
    let mut proc = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let mut stdin = proc
        .stdin
        .take()
        .ok_or_else(|| std::io::Error::other("failed to open stdin"))?;
    let input = input.to_vec();
    let writer = tokio::spawn(async move {
        let result = stdin.write_all(&input).await;
        drop(stdin);
        result
    });

    let output = proc.wait_with_output().await?;
    match writer.await {
        Ok(Ok(())) => {}
        // The child may exit without reading its input.
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
        Ok(Err(e)) => return Err(e.into()),
        Err(e) => return Err(std::io::Error::other(e.to_string()).into()),
    }

    Ok((
        output.status.code().unwrap_or(-1),
        output.stdout,
        String::from_utf8_lossy(&output.stderr).into_owned(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_logged_exit_codes() {
        assert_eq!(run_logged(&["true".to_string()], "t: ").await.unwrap(), 0);
        assert_eq!(run_logged(&["false".to_string()], "t: ").await.unwrap(), 1);
        assert!(run_logged(&[], "t: ").await.is_err());
    }

    #[tokio::test]
    async fn test_drain_reports_failed_task() {
        assert!(drain(tokio::spawn(async {}), "stdout").await);
        let failing = tokio::spawn(async { panic!("broken pipe reader") });
        assert!(!drain(failing, "stderr").await);
    }

    #[tokio::test]
    async fn test_run_with_input() {
        let (code, stdout, _) = run_with_input("cat", &[], b"hello").await.unwrap();
        assert_eq!(code, 0);
        assert_eq!(stdout, b"hello");
    }
}
