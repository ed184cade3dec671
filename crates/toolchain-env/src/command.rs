//! Subprocess execution with captured output.

use std::path::Path;
use std::process::Stdio;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use crate::error::ToolchainError;
use crate::Result;

/// Captured result of one toolchain invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Program that was executed.
    pub program: String,

    /// Arguments passed to the program.
    pub args: Vec<String>,

    /// Exit code (-1 when terminated by a signal).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl CommandOutput {
    /// Build an output record without running anything.
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    /// Exit code zero is the only success signal.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout and stderr joined, for diagnostics.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (true, true) => String::new(),
            (false, true) => self.stdout.trim_end().to_string(),
            (true, false) => self.stderr.trim_end().to_string(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end()),
        }
    }

    /// Last whitespace-separated token of stdout.
    ///
    /// Identifier lookups print the id as the final token, possibly after
    /// warnings on earlier lines.
    pub fn trailing_token(&self) -> Option<&str> {
        self.stdout.split_whitespace().last()
    }

    /// Render the invocation for log lines.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Append another step's output, keeping the later exit code.
    pub fn merge(mut self, next: CommandOutput) -> Self {
        if !next.stdout.is_empty() {
            if !self.stdout.is_empty() && !self.stdout.ends_with('\n') {
                self.stdout.push('\n');
            }
            self.stdout.push_str(&next.stdout);
        }
        if !next.stderr.is_empty() {
            if !self.stderr.is_empty() && !self.stderr.ends_with('\n') {
                self.stderr.push('\n');
            }
            self.stderr.push_str(&next.stderr);
        }
        self.program = next.program;
        self.args = next.args;
        self.exit_code = next.exit_code;
        self.duration_ms += next.duration_ms;
        self
    }
}

/// Run `program args..` in `cwd` and capture its output.
///
/// A non-zero exit is NOT an error here; only failing to spawn is.
pub async fn run_command(program: &Path, args: &[String], cwd: &Path) -> Result<CommandOutput> {
    let start = Instant::now();
    let program_display = program.display().to_string();

    debug!(program = %program_display, ?args, cwd = %cwd.display(), "spawning");

    let output = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ToolchainError::Spawn {
            program: program_display.clone(),
            source,
        })?;

    Ok(CommandOutput {
        program: program_display,
        args: args.to_vec(),
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

/// Run several argument vectors against the same program, stopping at the
/// first failing step. The returned output accumulates every step that ran.
pub async fn run_steps(program: &Path, steps: &[Vec<String>], cwd: &Path) -> Result<CommandOutput> {
    let mut combined: Option<CommandOutput> = None;

    for args in steps {
        let output = run_command(program, args, cwd).await?;
        let failed = !output.success();
        combined = Some(match combined {
            Some(previous) => previous.merge(output),
            None => output,
        });
        if failed {
            break;
        }
    }

    combined.ok_or(ToolchainError::EmptyCommand("steps"))
}
