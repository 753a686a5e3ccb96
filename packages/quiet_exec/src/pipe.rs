//! Pipe runner: stdio on anonymous pipes, drained concurrently.

use std::io::{self, ErrorKind};
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command as ProcessCommand};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::capture::{Capture, Stream};
use crate::decode::TextDecoder;
use crate::error::ExecError;
use crate::request::{RunRequest, RunResult};

const READ_CHUNK_SIZE: usize = 8_192;
const CHUNK_CHANNEL_CAPACITY: usize = 64;

/// Run `request` with piped stdio and wait for it to finish.
///
/// stdin is written from its own task while both output pipes are read, so a
/// child that interleaves reading and writing cannot fill a pipe and stall.
/// The stream the capture policy does not select is still read to the end and
/// thrown away.
///
/// Without `request.stdin` the child's stdin is `/dev/null`, not this
/// process's stdin, so a command that reads input sees end of input at once.
///
/// If reading fails mid-run the whole run fails and partial output is dropped.
pub async fn execute(request: &RunRequest) -> Result<RunResult, ExecError> {
    let invocation = request.invocation()?;

    let mut command = ProcessCommand::new(&invocation.program);
    command.args(&invocation.args);
    if let Some(dir) = &request.cwd {
        command.current_dir(dir);
    }
    for key in &request.env_remove {
        command.env_remove(key);
    }
    for (key, value) in &request.env {
        command.env(key, value);
    }
    command
        .stdin(if request.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(
        program = %invocation.program,
        args = ?invocation.args,
        capture = %request.capture,
        "spawning piped process"
    );
    let mut child = command.spawn().map_err(|source| ExecError::Spawn {
        program: invocation.program.clone(),
        source,
    })?;
    trace!(pid = ?child.id(), "piped process started");

    let stdin_task = match (child.stdin.take(), &request.stdin) {
        (Some(pipe), Some(text)) => Some(tokio::spawn(write_stdin(pipe, text.clone().into_bytes()))),
        _ => None,
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ExecError::io("take stdout", io::Error::other("stdout is not piped")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ExecError::io("take stderr", io::Error::other("stderr is not piped")))?;

    let (chunk_tx, mut chunk_rx) = mpsc::channel::<(Stream, Vec<u8>)>(CHUNK_CHANNEL_CAPACITY);
    let stdout_task = tokio::spawn(read_stream(
        stdout,
        Stream::Stdout,
        request.capture,
        chunk_tx.clone(),
    ));
    let stderr_task = tokio::spawn(read_stream(
        stderr,
        Stream::Stderr,
        request.capture,
        chunk_tx,
    ));

    // One decoder per stream so an interleaved chunk never splits a character.
    let mut output = String::new();
    let mut stdout_decoder = TextDecoder::new(request.encoding);
    let mut stderr_decoder = TextDecoder::new(request.encoding);
    while let Some((stream, chunk)) = chunk_rx.recv().await {
        match stream {
            Stream::Stdout => stdout_decoder.push(&chunk, &mut output),
            Stream::Stderr => stderr_decoder.push(&chunk, &mut output),
        }
    }
    stdout_decoder.finish(&mut output);
    stderr_decoder.finish(&mut output);

    join(stdout_task, "read stdout").await?;
    join(stderr_task, "read stderr").await?;
    if let Some(task) = stdin_task {
        join(task, "write stdin").await?;
    }

    let status = child
        .wait()
        .await
        .map_err(|e| ExecError::io("wait for child", e))?;
    let exit_code = exit_code(status);
    debug!(exit_code, captured = output.len(), "piped process exited");

    Ok(RunResult { exit_code, output })
}

async fn write_stdin(mut pipe: ChildStdin, bytes: Vec<u8>) -> io::Result<()> {
    let written = async {
        pipe.write_all(&bytes).await?;
        pipe.flush().await
    }
    .await;
    match written {
        Ok(()) => {}
        // The child quit without reading everything; that is its business.
        Err(e) if e.kind() == ErrorKind::BrokenPipe => {
            trace!("child closed stdin early");
        }
        Err(e) => return Err(e),
    }
    // Dropping the pipe closes it so the child sees end of input.
    drop(pipe);
    Ok(())
}

async fn read_stream<R>(
    mut reader: R,
    stream: Stream,
    capture: Capture,
    chunk_tx: mpsc::Sender<(Stream, Vec<u8>)>,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let keep = stream.is_captured_by(capture);
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    let mut discarded = 0usize;
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) if keep => {
                if chunk_tx.send((stream, buf[..n].to_vec())).await.is_err() {
                    // Collector is gone; keep draining so the child never blocks.
                    discarded += n;
                }
            }
            Ok(n) => discarded += n,
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    if discarded > 0 {
        trace!(stream = stream.name(), discarded, "discarded uncaptured output");
    }
    Ok(())
}

async fn join(task: JoinHandle<io::Result<()>>, context: &'static str) -> Result<(), ExecError> {
    task.await
        .map_err(|e| ExecError::io(context, io::Error::other(e)))?
        .map_err(|e| ExecError::io(context, e))
}

/// The process's exit code, or the negated signal number on Unix.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn both_streams_are_captured() {
        let request = RunRequest::new("echo out; echo err >&2").shell(true);
        let result = execute(&request).await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert!(result.output.contains("out\n"));
        assert!(result.output.contains("err\n"));
    }

    #[tokio::test]
    async fn stdout_only() {
        let request = RunRequest::new("echo out; echo err >&2")
            .shell(true)
            .capture(Capture::Stdout);
        let result = execute(&request).await.unwrap();
        assert_eq!(result.output, "out\n");
    }

    #[tokio::test]
    async fn stderr_only() {
        let request = RunRequest::new("echo out; echo err >&2")
            .shell(true)
            .capture(Capture::Stderr);
        let result = execute(&request).await.unwrap();
        assert_eq!(result.output, "err\n");
    }

    #[tokio::test]
    async fn per_stream_order_is_preserved() {
        let request = RunRequest::new("for i in 1 2 3 4 5; do echo o$i; echo e$i >&2; done")
            .shell(true);
        let result = execute(&request).await.unwrap();
        let outs: Vec<&str> = result.output.lines().filter(|l| l.starts_with('o')).collect();
        let errs: Vec<&str> = result.output.lines().filter(|l| l.starts_with('e')).collect();
        assert_eq!(outs, ["o1", "o2", "o3", "o4", "o5"]);
        assert_eq!(errs, ["e1", "e2", "e3", "e4", "e5"]);
    }

    #[tokio::test]
    async fn exit_code_is_reported() {
        let result = execute(&RunRequest::new("exit 7").shell(true)).await.unwrap();
        assert_eq!(result.exit_code, 7);
        assert!(!result.success());
    }

    #[tokio::test]
    async fn signal_exit_is_negative() {
        let result = execute(&RunRequest::new("kill -TERM $$").shell(true))
            .await
            .unwrap();
        assert_eq!(result.exit_code, -15);
    }

    #[tokio::test]
    async fn no_stdin_means_immediate_eof() {
        let result = execute(&RunRequest::new(["cat"])).await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.output, "");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn no_stdin_is_dev_null() {
        let request = RunRequest::new("readlink /proc/$$/fd/0").shell(true);
        let result = execute(&request).await.unwrap();
        assert_eq!(result.output, "/dev/null\n");
    }

    #[tokio::test]
    async fn child_ignoring_stdin_is_fine() {
        let request = RunRequest::new(["true"]).stdin("x".repeat(1 << 20));
        let result = execute(&request).await.unwrap();
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn env_and_cwd_are_passed_through() {
        let dir = std::env::temp_dir();
        let request = RunRequest::new("printf '%s %s' \"$QUIET_EXEC_TEST\" \"$(pwd -P)\"")
            .shell(true)
            .env("QUIET_EXEC_TEST", "hello")
            .cwd(&dir);
        let result = execute(&request).await.unwrap();
        let expected_dir = dir.canonicalize().unwrap();
        assert_eq!(
            result.output,
            format!("hello {}", expected_dir.display())
        );
    }

    #[tokio::test]
    async fn env_remove_hides_variables() {
        let request = RunRequest::new("printf '%s' \"${HOME-unset}\"")
            .shell(true)
            .env_remove("HOME");
        let result = execute(&request).await.unwrap();
        assert_eq!(result.output, "unset");
    }

    #[tokio::test]
    async fn invalid_utf8_is_replaced() {
        let request = RunRequest::new("printf 'a\\377b'").shell(true);
        let result = execute(&request).await.unwrap();
        assert_eq!(result.output, "a\u{FFFD}b");
    }
}
