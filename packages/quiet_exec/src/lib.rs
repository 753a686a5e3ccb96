//! quiet_exec - run one command and capture what it printed
//!
//! Two runners share one result shape, `(exit_code, output)`:
//!
//! - the pipe runner connects stdin/stdout/stderr to anonymous pipes and
//!   drains them concurrently with writing stdin;
//! - the PTY runner attaches the child to a pseudo-terminal so it sees an
//!   interactive terminal, and reads the master side.
//!
//! A [`Capture`] policy picks which streams feed the returned text. With
//! [`Capture::None`] the PTY runner shows the output live on the invoking
//! terminal instead of collecting it.
//!
//! # Example
//!
//! ```no_run
//! use quiet_exec::{Capture, PtySupport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), quiet_exec::ExecError> {
//!     let result = quiet_exec::run(["cat"], false, Some("hello"), Capture::Both).await?;
//!     assert_eq!(result.into_parts(), (0, "hello".to_string()));
//!
//!     let support = PtySupport::detect();
//!     if support.is_available() {
//!         let result = quiet_exec::run_pty(support, ["tty"], None, Capture::Stdout).await?;
//!         println!("ran on {}", result.output.trim());
//!     }
//!     Ok(())
//! }
//! ```

pub mod capture;
pub mod decode;
mod error;
pub mod pipe;
pub mod pty;
mod request;

pub use capture::{Capture, ParseCaptureError};
pub use decode::TextDecoder;
pub use error::ExecError;
pub use pty::{PtyPhase, PtySupport};
pub use request::{Command, RunRequest, RunResult};

/// Which runner a caller picked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RunnerKind {
    #[default]
    Pipe,
    Pty,
}

/// Run `command` over pipes.
///
/// With `shell` set the command goes through the platform shell, so an
/// unknown program comes back as the shell's nonzero exit code and its
/// diagnostic. Without it, an unknown program is an [`ExecError::Spawn`].
pub async fn run(
    command: impl Into<Command>,
    shell: bool,
    stdin: Option<&str>,
    capture: Capture,
) -> Result<RunResult, ExecError> {
    let mut request = RunRequest::new(command).shell(shell).capture(capture);
    request.stdin = stdin.map(str::to_string);
    pipe::execute(&request).await
}

/// Run `command` on a pseudo-terminal.
///
/// Fails with [`ExecError::PtyUnsupported`] when `support` says the platform
/// has no PTYs; there is no automatic fallback to [`run`].
pub async fn run_pty(
    support: PtySupport,
    command: impl Into<Command>,
    stdin: Option<&str>,
    capture: Capture,
) -> Result<RunResult, ExecError> {
    let mut request = RunRequest::new(command).capture(capture);
    request.stdin = stdin.map(str::to_string);
    pty::execute(support, &request).await
}

/// Run a prepared request with the chosen runner.
pub async fn execute(
    request: &RunRequest,
    runner: RunnerKind,
    support: PtySupport,
) -> Result<RunResult, ExecError> {
    match runner {
        RunnerKind::Pipe => pipe::execute(request).await,
        RunnerKind::Pty => pty::execute(support, request).await,
    }
}
