//! PTY runner: the child sees a real terminal, the engine reads the master side.

use std::io::{self, Write};

use crate::error::ExecError;
use crate::request::{RunRequest, RunResult};

/// Whether this platform can allocate pseudo-terminals.
///
/// Compute it once with [`PtySupport::detect`] and hand it to whoever chooses
/// between the runners.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PtySupport {
    Available,
    Unavailable,
}

impl PtySupport {
    pub fn detect() -> Self {
        if cfg!(unix) {
            PtySupport::Available
        } else {
            PtySupport::Unavailable
        }
    }

    pub fn is_available(self) -> bool {
        self == PtySupport::Available
    }

    pub(crate) fn require(self) -> Result<(), ExecError> {
        match self {
            PtySupport::Available => Ok(()),
            PtySupport::Unavailable => Err(ExecError::PtyUnsupported),
        }
    }
}

/// Lifecycle of one PTY run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PtyPhase {
    /// Pair allocated
    Created,
    /// Child attached to the slave side, slave closed in the parent
    Spawned,
    /// Reading the master side
    Streaming,
    /// Exit status collected
    Reaped,
    /// Master side released
    Closed,
}

/// Run `request` on a pseudo-terminal, mirroring to this process's stdout
/// when the capture policy is [`Capture::None`](crate::Capture::None).
///
/// stdin goes through the terminal's line discipline: control characters are
/// interpreted, and a line longer than the kernel's canonical limit (4095
/// bytes on Linux) is cut to that limit. Input the child never reads is
/// dropped once its terminal closes.
pub async fn execute(support: PtySupport, request: &RunRequest) -> Result<RunResult, ExecError> {
    execute_with_mirror(support, request, Box::new(io::stdout())).await
}

/// Like [`execute`], but live output goes to `mirror` instead of stdout.
pub async fn execute_with_mirror(
    support: PtySupport,
    request: &RunRequest,
    mirror: Box<dyn Write + Send>,
) -> Result<RunResult, ExecError> {
    support.require()?;
    let request = request.clone();
    tokio::task::spawn_blocking(move || imp::run(request, mirror))
        .await
        .map_err(|e| ExecError::io("join PTY runner", io::Error::other(e)))?
}

#[cfg(not(unix))]
mod imp {
    use super::*;

    pub(super) fn run(
        _request: RunRequest,
        _mirror: Box<dyn Write + Send>,
    ) -> Result<RunResult, ExecError> {
        Err(ExecError::PtyUnsupported)
    }
}

#[cfg(unix)]
mod imp {
    use std::ffi::OsString;
    use std::fs::File;
    use std::io::{ErrorKind, Read};
    use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
    use std::path::PathBuf;

    use encoding_rs::Encoding;
    use nix::errno::Errno;
    use nix::fcntl::{FcntlArg, OFlag, fcntl};
    use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
    use nix::sys::termios::{self, LocalFlags, SetArg, SpecialCharacterIndices};
    use nix::sys::wait::{WaitStatus, waitpid};
    use nix::unistd::Pid;
    use portable_pty::{
        Child, ChildKiller, CommandBuilder, MasterPty, PtyPair, PtySize, native_pty_system,
    };
    use tracing::{debug, trace};

    use super::*;
    use crate::capture::Capture;
    use crate::decode::TextDecoder;
    use crate::request::Invocation;

    const ROWS: u16 = 24;
    const COLS: u16 = 80;
    const READ_CHUNK_SIZE: usize = 4096;
    /// ^D, used when the terminal reports no VEOF character.
    const DEFAULT_EOF: u8 = 0x04;
    /// Longest canonical-mode line the Linux line discipline keeps.
    const CANONICAL_LINE_LIMIT: usize = 4095;

    fn enter(phase: PtyPhase) {
        trace!(?phase, "pty phase");
    }

    pub(super) fn run(
        request: RunRequest,
        mut mirror: Box<dyn Write + Send>,
    ) -> Result<RunResult, ExecError> {
        let invocation = request.invocation()?;
        check_program(&invocation, &request)?;

        let PtyPair { master, slave } = native_pty_system()
            .openpty(PtySize {
                rows: ROWS,
                cols: COLS,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| ExecError::PtyOpen(format!("{e:#}")))?;
        enter(PtyPhase::Created);

        let terminal = duplicate_master(master.as_ref())?;
        // Echo has to be off before the child starts, otherwise fed stdin
        // comes straight back through the master and lands in the capture.
        let eof = prepare_terminal(&terminal, request.stdin.is_some())?;

        debug!(
            program = %invocation.program,
            args = ?invocation.args,
            capture = %request.capture,
            "spawning PTY process"
        );
        let spawned = slave.spawn_command(build_command(&invocation, &request)?);
        drop(slave);
        let mut child = spawned.map_err(|err| spawn_error(&invocation.program, err))?;
        enter(PtyPhase::Spawned);
        trace!(pid = ?child.process_id(), "PTY process started");

        let input = match &request.stdin {
            Some(text) => {
                if exceeds_line_limit(text) {
                    trace!(
                        limit = CANONICAL_LINE_LIMIT,
                        "stdin has a line the terminal will cut"
                    );
                }
                stdin_bytes(text, eof)
            }
            None => Vec::new(),
        };
        let streamed = stream(&terminal, &input, &request, mirror.as_mut());
        if streamed.is_err() {
            // Do not leave a child blocked on a terminal nobody reads.
            let _ = child.kill();
        }

        let status = reap(child.as_mut());
        enter(PtyPhase::Reaped);
        drop(terminal);
        drop(master);
        enter(PtyPhase::Closed);

        let output = streamed?;
        let exit_code = status.map_err(|e| ExecError::io("wait for PTY child", e))?;
        debug!(exit_code, captured = output.len(), "PTY process exited");

        Ok(RunResult { exit_code, output })
    }

    /// Feed `input` and read the master until the slave side closes.
    ///
    /// Both directions share one non-blocking poll loop, so a write never
    /// outlives the child: input it did not read is dropped when the
    /// terminal closes.
    fn stream(
        terminal: &File,
        input: &[u8],
        request: &RunRequest,
        mirror: &mut dyn Write,
    ) -> Result<String, ExecError> {
        set_nonblocking(terminal)?;
        let mut sink = Sink::new(request.capture, request.encoding, mirror);
        let mut buffer = [0u8; READ_CHUNK_SIZE];
        let mut pending = input;

        enter(PtyPhase::Streaming);
        loop {
            let mut events = PollFlags::POLLIN;
            if !pending.is_empty() {
                events |= PollFlags::POLLOUT;
            }
            let mut fds = [PollFd::new(terminal.as_fd(), events)];
            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(ExecError::io("poll PTY", e.into())),
            }
            let revents = fds[0].revents().unwrap_or(PollFlags::empty());

            if revents.contains(PollFlags::POLLOUT) {
                pending = write_some(terminal, pending)?;
            }
            let readable = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR;
            if revents.intersects(readable) {
                let hung_up = revents.contains(PollFlags::POLLHUP);
                if read_available(terminal, &mut buffer, &mut sink, hung_up)? {
                    break;
                }
            }
        }

        if !pending.is_empty() {
            trace!(unread = pending.len(), "PTY child exited before consuming stdin");
        }
        Ok(sink.finish())
    }

    /// Read until the master would block. Returns true once the slave side closed.
    fn read_available(
        mut terminal: &File,
        buffer: &mut [u8],
        sink: &mut Sink<'_>,
        hung_up: bool,
    ) -> Result<bool, ExecError> {
        loop {
            match terminal.read(buffer) {
                Ok(0) => {
                    trace!("PTY EOF");
                    return Ok(true);
                }
                Ok(n) => sink.push(&buffer[..n]),
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return Ok(hung_up),
                Err(ref e) if slave_closed(e) => {
                    trace!("PTY slave closed");
                    return Ok(true);
                }
                Err(e) => return Err(ExecError::io("read from PTY", e)),
            }
        }
    }

    /// Write as much of `pending` as the terminal takes right now.
    fn write_some<'a>(mut terminal: &File, pending: &'a [u8]) -> Result<&'a [u8], ExecError> {
        match terminal.write(pending) {
            Ok(n) => Ok(&pending[n..]),
            Err(ref e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                Ok(pending)
            }
            Err(ref e) if e.kind() == ErrorKind::BrokenPipe || slave_closed(e) => {
                trace!(unread = pending.len(), "PTY closed while feeding stdin");
                Ok(&[])
            }
            Err(e) => Err(ExecError::io("write stdin to PTY", e)),
        }
    }

    /// Where master output goes: the live mirror, or the decoded capture.
    struct Sink<'m> {
        capture: Capture,
        decoder: TextDecoder,
        text: String,
        mirror: &'m mut dyn Write,
    }

    impl<'m> Sink<'m> {
        fn new(capture: Capture, encoding: &'static Encoding, mirror: &'m mut dyn Write) -> Self {
            Self {
                capture,
                decoder: TextDecoder::new(encoding),
                text: String::new(),
                mirror,
            }
        }

        fn push(&mut self, chunk: &[u8]) {
            if self.capture.mirrors_pty_output() {
                // Raw bytes keep the child's control sequences intact.
                let _ = self.mirror.write_all(chunk);
                let _ = self.mirror.flush();
            } else {
                self.decoder.push(chunk, &mut self.text);
            }
        }

        fn finish(mut self) -> String {
            self.decoder.finish(&mut self.text);
            normalize_newlines(self.text)
        }
    }

    /// A master read fails with EIO once every slave descriptor is closed.
    fn slave_closed(e: &io::Error) -> bool {
        e.raw_os_error() == Some(nix::libc::EIO)
    }

    /// Collect the exit status. A signal death is `-signal`, as on the pipe runner.
    fn reap(child: &mut dyn Child) -> io::Result<i32> {
        if let Some(pid) = child.process_id().and_then(|pid| i32::try_from(pid).ok()) {
            loop {
                match waitpid(Pid::from_raw(pid), None) {
                    Ok(WaitStatus::Exited(_, code)) => return Ok(code),
                    Ok(WaitStatus::Signaled(_, signal, _)) => return Ok(-(signal as i32)),
                    Ok(_) | Err(Errno::EINTR) => continue,
                    // Already collected by the kill path.
                    Err(Errno::ECHILD) => break,
                    Err(e) => return Err(e.into()),
                }
            }
        }
        let status = child.wait()?;
        Ok(i32::try_from(status.exit_code()).unwrap_or(i32::MAX))
    }

    /// stdin text followed by end-of-input.
    ///
    /// In canonical mode EOF only ends input at the start of a line; after a
    /// partial line it merely flushes that line, so a second EOF is needed.
    fn stdin_bytes(text: &str, eof: u8) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(text.len() + 2);
        bytes.extend_from_slice(text.as_bytes());
        if !text.is_empty() && !text.ends_with('\n') {
            bytes.push(eof);
        }
        bytes.push(eof);
        bytes
    }

    fn exceeds_line_limit(text: &str) -> bool {
        text.split('\n').any(|line| line.len() > CANONICAL_LINE_LIMIT)
    }

    fn normalize_newlines(text: String) -> String {
        if text.contains('\r') {
            text.replace("\r\n", "\n")
        } else {
            text
        }
    }

    /// A descriptor of our own for the master side, so portable-pty's reader
    /// and writer (and the newline its writer sends on drop) stay out of the way.
    fn duplicate_master(master: &dyn MasterPty) -> Result<File, ExecError> {
        let raw = master
            .as_raw_fd()
            .ok_or_else(|| ExecError::PtyOpen("master side has no descriptor".to_string()))?;
        // SAFETY: the descriptor belongs to `master`, which outlives this borrow.
        let fd = unsafe { BorrowedFd::borrow_raw(raw) };
        fd.try_clone_to_owned()
            .map(File::from)
            .map_err(|e| ExecError::io("duplicate PTY master", e))
    }

    fn set_nonblocking(terminal: &File) -> Result<(), ExecError> {
        let raw = terminal.as_raw_fd();
        let flags = fcntl(raw, FcntlArg::F_GETFL)
            .map_err(|e| ExecError::io("read PTY flags", e.into()))?;
        let flags = OFlag::from_bits_truncate(flags);
        fcntl(raw, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))
            .map_err(|e| ExecError::io("make PTY non-blocking", e.into()))?;
        Ok(())
    }

    /// Read the EOF character and switch echo off when stdin will be fed.
    fn prepare_terminal(terminal: &File, disable_echo: bool) -> Result<u8, ExecError> {
        let mut attrs = termios::tcgetattr(terminal)
            .map_err(|e| ExecError::io("read terminal attributes", e.into()))?;
        let eof = attrs.control_chars[SpecialCharacterIndices::VEOF as usize];
        if disable_echo {
            attrs.local_flags.remove(LocalFlags::ECHO);
            termios::tcsetattr(terminal, SetArg::TCSANOW, &attrs)
                .map_err(|e| ExecError::io("disable terminal echo", e.into()))?;
        }
        Ok(if eof == 0 { DEFAULT_EOF } else { eof })
    }

    fn build_command(
        invocation: &Invocation,
        request: &RunRequest,
    ) -> Result<CommandBuilder, ExecError> {
        let mut cmd = CommandBuilder::new(&invocation.program);
        for arg in &invocation.args {
            cmd.arg(arg);
        }

        // portable-pty falls back to $HOME without an explicit directory.
        let cwd = match &request.cwd {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()
                .map_err(|e| ExecError::io("resolve working directory", e))?,
        };
        cmd.cwd(cwd.as_os_str());

        let term_given = request.env.iter().any(|(key, _)| key == "TERM");
        if std::env::var_os("TERM").is_none() && !term_given {
            cmd.env("TERM", "xterm-256color");
        }
        for key in &request.env_remove {
            cmd.env_remove(key);
        }
        for (key, value) in &request.env {
            cmd.env(key, value);
        }
        Ok(cmd)
    }

    /// Look the program up before spawning so "not found" is a proper spawn error.
    fn check_program(invocation: &Invocation, request: &RunRequest) -> Result<(), ExecError> {
        if invocation.program.contains(std::path::MAIN_SEPARATOR) {
            return Ok(());
        }
        let path = request
            .env
            .iter()
            .rev()
            .find(|(key, _)| key == "PATH")
            .map(|(_, value)| OsString::from(value))
            .or_else(|| {
                if request.env_remove.iter().any(|key| key == "PATH") {
                    None
                } else {
                    std::env::var_os("PATH")
                }
            });
        let cwd = request
            .cwd
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        which::which_in(&invocation.program, path, cwd)
            .map(|_| ())
            .map_err(|e| ExecError::Spawn {
                program: invocation.program.clone(),
                source: io::Error::new(ErrorKind::NotFound, e.to_string()),
            })
    }

    fn spawn_error(program: &str, err: anyhow::Error) -> ExecError {
        let source = match err.downcast::<io::Error>() {
            Ok(io_err) => io_err,
            Err(other) => io::Error::other(format!("{other:#}")),
        };
        ExecError::Spawn {
            program: program.to_string(),
            source,
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn stdin_gets_one_eof_after_a_newline() {
            assert_eq!(stdin_bytes("hi\n", 4), b"hi\n\x04");
        }

        #[test]
        fn partial_line_gets_two_eofs() {
            assert_eq!(stdin_bytes("hi", 4), b"hi\x04\x04");
        }

        #[test]
        fn empty_stdin_is_just_eof() {
            assert_eq!(stdin_bytes("", 4), b"\x04");
        }

        #[test]
        fn long_lines_are_detected() {
            assert!(!exceeds_line_limit(&"a".repeat(CANONICAL_LINE_LIMIT)));
            assert!(exceeds_line_limit(&"a".repeat(CANONICAL_LINE_LIMIT + 1)));
            let mixed = format!("short\n{}\nshort", "b".repeat(5000));
            assert!(exceeds_line_limit(&mixed));
            assert!(!exceeds_line_limit(&"short\n".repeat(5000)));
        }

        #[test]
        fn crlf_is_normalized() {
            assert_eq!(normalize_newlines("a\r\nb\r\n".to_string()), "a\nb\n");
            assert_eq!(normalize_newlines("a\rb".to_string()), "a\rb");
        }
    }
}
