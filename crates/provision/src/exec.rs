//! Command Executor - runs external tools and captures their output.
//!
//! The executor never interprets output. A non-zero exit is reported as an
//! [`ExecutionError`] carrying the full stderr, because the tools involved
//! (gcloud, kubectl, helm) only expose "not found" / "already exists" as
//! text and callers need it to classify the failure.

use crate::error::{Error, Result};
use std::fmt;
use std::process::{Command, Stdio};

/// How an invocation finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Process exit code
    Exit(i32),
    /// HTTP status of an API request
    Http(u16),
    /// Process was terminated by a signal
    Signal,
    /// Request never got a response (DNS, connect, TLS, read)
    Unreachable,
}

impl Status {
    /// Whether this status means the invocation succeeded.
    pub fn success(&self) -> bool {
        match self {
            Self::Exit(code) => *code == 0,
            Self::Http(code) => (200..300).contains(code),
            Self::Signal | Self::Unreachable => false,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exit(code) => write!(f, "exit code {code}"),
            Self::Http(code) => write!(f, "HTTP {code}"),
            Self::Signal => write!(f, "signal"),
            Self::Unreachable => write!(f, "no response"),
        }
    }
}

/// A command to run: program plus argument list, or a shell string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Run `program` through `sh -c` instead of exec'ing it directly
    pub shell: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            shell: false,
        }
    }

    /// A shell-interpreted command line.
    pub fn shell(line: impl Into<String>) -> Self {
        Self {
            program: line.into(),
            args: Vec::new(),
            shell: true,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append `--flag value`.
    pub fn flag(self, name: &str, value: impl Into<String>) -> Self {
        self.arg(name).arg(value)
    }

    /// Append `--flag value` only when a value is present.
    pub fn flag_opt(self, name: &str, value: Option<&str>) -> Self {
        match value {
            Some(v) => self.flag(name, v),
            None => self,
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.shell {
            return write!(f, "sh -c {:?}", self.program);
        }
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " {arg:?}")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Captured outcome of one invocation. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub status: Status,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Successful result with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Status::Exit(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed result with the given exit code and stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Status::Exit(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// A finished invocation that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("`{command}` failed with {status}: {}", .stderr.trim())]
pub struct ExecutionError {
    /// Rendered command line (or API request) for diagnostics
    pub command: String,
    pub status: Status,
    pub stderr: String,
}

impl ExecutionError {
    pub fn from_result(command: &CommandSpec, result: ExecutionResult) -> Self {
        Self {
            command: command.to_string(),
            status: result.status,
            stderr: result.stderr,
        }
    }
}

/// Runs commands. Implementations must capture stderr in full.
pub trait Runner: Send + Sync {
    /// Run a command and capture its output.
    ///
    /// Only a failure to launch the process is an `Err`; a non-zero exit
    /// is returned as a normal [`ExecutionResult`].
    fn run(&self, spec: &CommandSpec) -> Result<ExecutionResult>;

    /// Run a command, mapping a non-zero exit to [`Error::Execution`].
    fn execute(&self, spec: &CommandSpec) -> Result<ExecutionResult> {
        let result = self.run(spec)?;
        if result.success() {
            Ok(result)
        } else {
            Err(ExecutionError::from_result(spec, result).into())
        }
    }
}

/// Runner backed by real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl Runner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<ExecutionResult> {
        log::debug!("exec: {spec}");

        let mut command = if spec.shell {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&spec.program);
            c
        } else {
            let mut c = Command::new(&spec.program);
            c.args(&spec.args);
            c
        };

        let output = command
            .stdin(Stdio::null())
            .output()
            .map_err(|source| Error::Launch {
                command: spec.to_string(),
                source,
            })?;

        let status = output.status.code().map_or(Status::Signal, Status::Exit);
        let result = ExecutionResult {
            status,
            stdout: String::from_utf8_lossy(&output.stdout).trim_end().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
        };

        if !result.success() {
            log::debug!("exec failed ({status}): {}", result.stderr);
        }
        Ok(result)
    }
}
