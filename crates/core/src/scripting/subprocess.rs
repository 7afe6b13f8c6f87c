//! Spawn, feed and reap a child process.
//!
//! [`run_command`] is shared by every runtime and by the git sync. The
//! caller sets program and arguments; stdin, environment, output capture
//! and the timeout are handled here.

use std::process::Stdio;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;

use super::process::{ProcessError, ProcessInput, ProcessOutput};

/// Cap per captured stream (10 MiB); anything beyond is dropped.
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Run `cmd` to completion with `input` on stdin.
///
/// The child is killed if the timeout expires or the returned future is
/// dropped. With [`ProcessInput::stdout_lines`] set, every stdout line is
/// also forwarded while the child is still running.
pub async fn run_command(
    cmd: &mut Command,
    mut input: ProcessInput,
) -> Result<ProcessOutput, ProcessError> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    for (key, value) in &input.env_vars {
        cmd.env(key, value);
    }
    if let Some(dir) = &input.working_directory {
        cmd.current_dir(dir);
    }

    let start = Instant::now();
    let mut child = cmd.spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        let payload = serde_json::to_vec(&input.stdin).unwrap_or_default();
        // The child may close stdin without reading it.
        let _ = stdin.write_all(&payload).await;
        drop(stdin);
    }

    // Drain both pipes concurrently so a chatty child never blocks on a
    // full pipe while we wait on it.
    let stdout_task = tokio::spawn(read_stream(child.stdout.take(), input.stdout_lines.take()));
    let stderr_task = tokio::spawn(read_stream(child.stderr.take(), None));

    match tokio::time::timeout(input.timeout, child.wait()).await {
        Ok(Ok(status)) => {
            let stdout_bytes = stdout_task.await.unwrap_or_default();
            let stderr_bytes = stderr_task.await.unwrap_or_default();
            Ok(ProcessOutput {
                stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
                stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
                exit_code: status.code().unwrap_or(-1),
                duration_ms: start.elapsed().as_millis() as u64,
            })
        }
        Ok(Err(e)) => Err(ProcessError::Io(e)),
        Err(_elapsed) => {
            stdout_task.abort();
            stderr_task.abort();
            Err(ProcessError::Timeout {
                elapsed_ms: start.elapsed().as_millis() as u64,
            })
        }
    }
}

async fn read_stream<R: AsyncRead + Unpin>(
    handle: Option<R>,
    lines: Option<UnboundedSender<String>>,
) -> Vec<u8> {
    let mut buf = Vec::new();
    let Some(handle) = handle else {
        return buf;
    };
    let mut reader = BufReader::new(handle.take(MAX_OUTPUT_BYTES as u64));
    let Some(lines) = lines else {
        let _ = reader.read_to_end(&mut buf).await;
        return buf;
    };

    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                buf.extend_from_slice(&line);
                let text = String::from_utf8_lossy(&line);
                // The receiver may be gone after a timeout.
                let _ = lines.send(text.trim_end_matches(['\n', '\r']).to_string());
            }
        }
    }
    buf
}
