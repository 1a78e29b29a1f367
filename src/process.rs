//! Centralized command execution with consistent error handling.
//!
//! Components never spawn processes directly. They receive a
//! [`ProcessRunner`], which the binary backs with [`SystemRunner`] and tests
//! back with a fake. [`Cmd`] is the builder the system runner uses underneath.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

/// Narrow capability for running external tools (busybox applets, kexec).
pub trait ProcessRunner: Send + Sync {
    /// Run to completion and return the exit code (-1 if killed by a signal).
    ///
    /// Only a failure to spawn is an `Err`; a non-zero exit is a value the
    /// caller interprets.
    fn run_status(&self, program: &Path, args: &[String]) -> Result<i32>;

    /// Run to completion and return captured stdout. Non-zero exit is an error.
    fn run_stdout(&self, program: &Path, args: &[String]) -> Result<String>;
}

/// Runs real processes through [`Cmd`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run_status(&self, program: &Path, args: &[String]) -> Result<i32> {
        let result = Cmd::new(program.to_string_lossy())
            .args(args)
            .allow_fail()
            .run()?;
        if !result.success() {
            tracing::debug!(
                "'{}' exited with {}: {}",
                program.display(),
                result.code(),
                result.stderr_trimmed()
            );
        }
        Ok(result.code())
    }

    fn run_stdout(&self, program: &Path, args: &[String]) -> Result<String> {
        let result = Cmd::new(program.to_string_lossy()).args(args).run()?;
        Ok(result.stdout)
    }
}

/// Result of a command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit status of the command.
    pub status: ExitStatus,
    /// Captured stdout as a string.
    pub stdout: String,
    /// Captured stderr as a string.
    pub stderr: String,
}

impl CommandResult {
    /// Returns true if the command exited successfully.
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Get the exit code, or -1 if terminated by signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    /// Get stderr, trimmed of whitespace.
    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }
}

/// Builder for configuring command execution.
pub struct Cmd {
    program: String,
    args: Vec<String>,
    /// If true, don't fail on non-zero exit.
    allow_fail: bool,
}

impl Cmd {
    /// Create a new command builder.
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            allow_fail: false,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    /// Allow non-zero exit codes without failing.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Run the command and capture output.
    pub fn run(self) -> Result<CommandResult> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .with_context(|| format!("Failed to execute '{}'. Is it installed?", self.program))?;

        let result = CommandResult {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !self.allow_fail && !result.success() {
            let stderr = result.stderr_trimmed();
            if stderr.is_empty() {
                bail!("'{}' failed (exit code {})", self.program, result.code());
            }
            bail!("'{}' failed (exit code {}):\n{}", self.program, result.code(), stderr);
        }

        Ok(result)
    }
}

/// Resolve a tool: the configured path if it exists, else a `PATH` lookup.
pub fn resolve_tool(configured: &Path) -> Option<PathBuf> {
    if configured.is_file() {
        return Some(configured.to_path_buf());
    }
    let name = configured.file_name()?;
    which::which(name).ok()
}
