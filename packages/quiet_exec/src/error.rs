use std::io;

/// Errors that can occur while running a command.
///
/// A command that runs and exits nonzero is not an error; it comes back as a
/// [`RunResult`](crate::RunResult) with that exit code.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// Nothing to run
    #[error("empty command")]
    EmptyCommand,

    /// The command could not be turned into a program and arguments
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// The child never started (not found, not executable, ...)
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// PTY runs were requested on a platform without pseudo-terminals
    #[error("pseudo-terminals are not supported on this platform")]
    PtyUnsupported,

    /// The OS refused to allocate a PTY pair
    #[error("failed to open pseudo-terminal: {0}")]
    PtyOpen(String),

    /// I/O failed after the child started
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },
}

impl ExecError {
    pub(crate) fn io(context: &'static str, source: io::Error) -> Self {
        Self::Io { context, source }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::EmptyCommand => "empty_command",
            Self::InvalidCommand(_) => "invalid_command",
            Self::Spawn { .. } => "spawn_failed",
            Self::PtyUnsupported => "pty_unsupported",
            Self::PtyOpen(_) => "pty_open_failed",
            Self::Io { .. } => "io",
        }
    }

    /// True when the run never started.
    pub fn is_spawn_failure(&self) -> bool {
        matches!(self, Self::Spawn { .. })
    }

    /// True when the program could not be found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Spawn { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        assert_eq!(ExecError::EmptyCommand.error_code(), "empty_command");
        assert_eq!(ExecError::PtyUnsupported.error_code(), "pty_unsupported");
        assert_eq!(
            ExecError::io("read stdout", io::Error::other("boom")).error_code(),
            "io"
        );
    }

    #[test]
    fn spawn_failures() {
        let err = ExecError::Spawn {
            program: "mlemlemlemlemle".to_string(),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert!(err.is_spawn_failure());
        assert!(err.is_not_found());
        assert!(err.to_string().starts_with("failed to spawn `mlemlemlemlemle`"));

        let denied = ExecError::Spawn {
            program: "./script".to_string(),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        assert!(denied.is_spawn_failure());
        assert!(!denied.is_not_found());
        assert!(!ExecError::PtyUnsupported.is_spawn_failure());
    }
}
