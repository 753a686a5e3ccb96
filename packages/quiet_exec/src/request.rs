use encoding_rs::{Encoding, UTF_8};
use std::path::PathBuf;

use crate::capture::Capture;
use crate::error::ExecError;

/// What to run: a shell line or an argument vector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// A single string, meant for a shell.
    Line(String),
    /// Program followed by its arguments.
    Argv(Vec<String>),
}

impl Command {
    /// Human-readable rendering, used for titles and logs.
    pub fn display(&self) -> String {
        match self {
            Command::Line(line) => line.clone(),
            Command::Argv(argv) => shlex::try_join(argv.iter().map(String::as_str))
                .unwrap_or_else(|_| argv.join(" ")),
        }
    }

    /// Resolve into a program and arguments.
    ///
    /// With `shell` set, an argument vector is quoted word by word and handed
    /// to the platform shell as one line. Without it, a line is split using
    /// POSIX quoting rules and nothing else is interpreted.
    pub(crate) fn resolve(
        &self,
        shell: bool,
        shell_program: Option<&str>,
    ) -> Result<Invocation, ExecError> {
        if shell {
            let line = match self {
                Command::Line(line) => line.clone(),
                Command::Argv(argv) => {
                    if argv.is_empty() {
                        return Err(ExecError::EmptyCommand);
                    }
                    shlex::try_join(argv.iter().map(String::as_str))
                        .map_err(|e| ExecError::InvalidCommand(e.to_string()))?
                }
            };
            if line.trim().is_empty() {
                return Err(ExecError::EmptyCommand);
            }
            return Ok(Invocation::through_shell(line, shell_program));
        }

        let mut words = match self {
            Command::Argv(argv) => argv.clone(),
            Command::Line(line) => shlex::split(line).ok_or_else(|| {
                ExecError::InvalidCommand(format!("unbalanced quotes in `{line}`"))
            })?,
        }
        .into_iter();
        let program = words.next().ok_or(ExecError::EmptyCommand)?;
        if program.is_empty() {
            return Err(ExecError::EmptyCommand);
        }
        Ok(Invocation {
            program,
            args: words.collect(),
        })
    }
}

impl From<&str> for Command {
    fn from(line: &str) -> Self {
        Command::Line(line.to_string())
    }
}

impl From<String> for Command {
    fn from(line: String) -> Self {
        Command::Line(line)
    }
}

impl From<Vec<String>> for Command {
    fn from(argv: Vec<String>) -> Self {
        Command::Argv(argv)
    }
}

impl From<Vec<&str>> for Command {
    fn from(argv: Vec<&str>) -> Self {
        Command::Argv(argv.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for Command {
    fn from(argv: &[&str]) -> Self {
        Command::Argv(argv.iter().map(|s| s.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Command {
    fn from(argv: [&str; N]) -> Self {
        Command::Argv(argv.iter().map(|s| s.to_string()).collect())
    }
}

/// A resolved program and argument list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    fn through_shell(line: String, shell_program: Option<&str>) -> Self {
        #[cfg(windows)]
        {
            let program = shell_program.map(str::to_string).unwrap_or_else(|| {
                std::env::var("ComSpec").unwrap_or_else(|_| "cmd.exe".to_string())
            });
            Self {
                program,
                args: vec!["/C".to_string(), line],
            }
        }
        #[cfg(not(windows))]
        {
            Self {
                program: shell_program.unwrap_or("/bin/sh").to_string(),
                args: vec!["-c".to_string(), line],
            }
        }
    }
}

/// Everything needed for one run. Built per call and dropped afterwards.
#[derive(Clone, Debug)]
pub struct RunRequest {
    pub command: Command,
    pub shell: bool,
    pub stdin: Option<String>,
    pub capture: Capture,
    pub cwd: Option<PathBuf>,
    /// Added to (or overriding) the inherited environment.
    pub env: Vec<(String, String)>,
    /// Removed from the inherited environment.
    pub env_remove: Vec<String>,
    pub encoding: &'static Encoding,
    /// Shell used when `shell` is set; defaults to `/bin/sh` (`cmd.exe` on Windows).
    pub shell_program: Option<String>,
}

impl RunRequest {
    pub fn new(command: impl Into<Command>) -> Self {
        Self {
            command: command.into(),
            shell: false,
            stdin: None,
            capture: Capture::default(),
            cwd: None,
            env: Vec::new(),
            env_remove: Vec::new(),
            encoding: UTF_8,
            shell_program: None,
        }
    }

    pub fn shell(mut self, shell: bool) -> Self {
        self.shell = shell;
        self
    }

    pub fn stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    pub fn capture(mut self, capture: Capture) -> Self {
        self.capture = capture;
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.env_remove.push(key.into());
        self
    }

    pub fn encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn shell_program(mut self, program: impl Into<String>) -> Self {
        self.shell_program = Some(program.into());
        self
    }

    pub(crate) fn invocation(&self) -> Result<Invocation, ExecError> {
        self.command
            .resolve(self.shell, self.shell_program.as_deref())
    }
}

/// Exit status plus captured text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunResult {
    pub exit_code: i32,
    pub output: String,
}

impl RunResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn into_parts(self) -> (i32, String) {
        (self.exit_code, self.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(invocation: &Invocation) -> Vec<&str> {
        std::iter::once(invocation.program.as_str())
            .chain(invocation.args.iter().map(String::as_str))
            .collect()
    }

    #[test]
    fn argv_without_shell_is_verbatim() {
        let command = Command::from(["echo", "$HOME", "a b", "*"]);
        let invocation = command.resolve(false, None).unwrap();
        assert_eq!(words(&invocation), ["echo", "$HOME", "a b", "*"]);
    }

    #[test]
    fn line_without_shell_is_split_on_words() {
        let command = Command::from("python -V 'two words'");
        let invocation = command.resolve(false, None).unwrap();
        assert_eq!(words(&invocation), ["python", "-V", "two words"]);
    }

    #[test]
    fn unbalanced_quotes_are_rejected() {
        let err = Command::from("echo 'oops").resolve(false, None).unwrap_err();
        assert_eq!(err.error_code(), "invalid_command");
    }

    #[test]
    fn empty_commands() {
        for command in [
            Command::from(""),
            Command::from("   "),
            Command::Argv(Vec::new()),
        ] {
            for shell in [false, true] {
                let err = command.resolve(shell, None).unwrap_err();
                assert!(matches!(err, ExecError::EmptyCommand), "{command:?} shell={shell}");
            }
        }
    }

    #[cfg(unix)]
    #[test]
    fn line_with_shell_goes_to_sh() {
        let invocation = Command::from("echo hi | tr a-z A-Z")
            .resolve(true, None)
            .unwrap();
        assert_eq!(words(&invocation), ["/bin/sh", "-c", "echo hi | tr a-z A-Z"]);
    }

    #[cfg(unix)]
    #[test]
    fn argv_with_shell_quotes_each_token() {
        let invocation = Command::from(["printf", "%s\n", "a b", "it's"])
            .resolve(true, Some("/bin/bash"))
            .unwrap();
        assert_eq!(invocation.program, "/bin/bash");
        assert_eq!(invocation.args[0], "-c");
        let reparsed = shlex::split(&invocation.args[1]).unwrap();
        assert_eq!(reparsed, ["printf", "%s\n", "a b", "it's"]);
    }

    #[test]
    fn nul_bytes_cannot_be_quoted() {
        let err = Command::from(["echo", "a\0b"]).resolve(true, None).unwrap_err();
        assert!(matches!(err, ExecError::InvalidCommand(_)));
    }

    #[test]
    fn display() {
        assert_eq!(Command::from("ls -la").display(), "ls -la");
        let shown = Command::from(["echo", "a b"]).display();
        assert_eq!(shlex::split(&shown).unwrap(), ["echo", "a b"]);
    }

    #[test]
    fn builder() {
        let request = RunRequest::new(["cat"])
            .stdin("hello")
            .capture(Capture::Stdout)
            .env("FOO", "bar")
            .env_remove("BAZ")
            .cwd("/tmp");
        assert_eq!(request.stdin.as_deref(), Some("hello"));
        assert_eq!(request.capture, Capture::Stdout);
        assert_eq!(request.env, vec![("FOO".to_string(), "bar".to_string())]);
        assert_eq!(request.env_remove, vec!["BAZ".to_string()]);
        assert!(!request.shell);
        assert_eq!(request.encoding, UTF_8);
    }

    #[test]
    fn result_parts() {
        let result = RunResult {
            exit_code: 3,
            output: "nope".to_string(),
        };
        assert!(!result.success());
        assert_eq!(result.into_parts(), (3, "nope".to_string()));
    }
}
