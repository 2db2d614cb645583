//! Shell-out wrappers around the `git` binary.
//!
//! All git work goes through the [`GitRunner`] capability: a function
//! that runs `git <args>` in a directory and returns captured output and
//! the exit status. Workers receive a runner at construction, which keeps
//! the update state machine testable against a scripted fake and keeps
//! subprocess handling in one place.

pub mod update;

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use thiserror::Error;

use crate::sync::events::{emit, EventSink, SyncEvent};

/// How a git subprocess ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitStatus {
    /// Process exited with a code.
    Exited(i32),
    /// Process was terminated by a signal (unix).
    Signaled(i32),
}

impl GitStatus {
    pub fn success(self) -> bool {
        matches!(self, GitStatus::Exited(0))
    }
}

impl fmt::Display for GitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GitStatus::Exited(code) => write!(f, "exit status {code}"),
            // SIGINT renders as the shell's interrupt message; the progress
            // logger keys its interrupt-storm dampening off this suffix.
            GitStatus::Signaled(2) => write!(f, "signal: interrupt"),
            GitStatus::Signaled(signal) => write!(f, "signal: {signal}"),
        }
    }
}

/// Captured output of one git invocation.
#[derive(Debug, Clone)]
pub struct GitOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: GitStatus,
}

impl GitOutput {
    /// Stdout and stderr joined, trimmed.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.trim_end().to_string();
        let err = self.stderr.trim();
        if !err.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(err);
        }
        out.trim().to_string()
    }
}

/// Errors from running git.
#[derive(Debug, Error)]
pub enum GitError {
    /// The subprocess ran and failed.
    #[error("{}: git {command}: {status}: {output}", dir.display())]
    CommandFailed {
        command: String,
        dir: PathBuf,
        status: GitStatus,
        output: String,
    },

    /// The subprocess could not be spawned at all.
    #[error("failed to run git in {}: {source}", dir.display())]
    Spawn {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Runs `git <args>` in a directory and captures the result.
///
/// A non-zero exit is returned as a normal [`GitOutput`] so callers can
/// branch on failures that are decisions rather than errors (for example
/// `symbolic-ref` probing); use [`run_checked`] when failure is an error.
pub trait GitRunner: Send + Sync {
    fn run(&self, dir: &Path, args: &[&str]) -> Result<GitOutput, GitError>;
}

/// Run git, turning a non-zero exit into [`GitError::CommandFailed`].
pub fn run_checked(
    runner: &dyn GitRunner,
    dir: &Path,
    args: &[&str],
) -> Result<GitOutput, GitError> {
    let output = runner.run(dir, args)?;
    if output.status.success() {
        Ok(output)
    } else {
        Err(GitError::CommandFailed {
            command: args.join(" "),
            dir: dir.to_path_buf(),
            status: output.status,
            output: single_line(&output.combined()),
        })
    }
}

/// Collapse output to a single displayable line.
pub fn single_line(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}

/// The real runner: shells out to the `git` binary.
///
/// Terminal prompts are disabled so a missing credential fails the
/// command instead of hanging a worker.
pub struct SystemGitRunner;

impl GitRunner for SystemGitRunner {
    fn run(&self, dir: &Path, args: &[&str]) -> Result<GitOutput, GitError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .map_err(|source| GitError::Spawn {
                dir: dir.to_path_buf(),
                source,
            })?;

        Ok(GitOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            status: exit_status(&output.status),
        })
    }
}

#[cfg(unix)]
fn exit_status(status: &std::process::ExitStatus) -> GitStatus {
    use std::os::unix::process::ExitStatusExt;
    match status.code() {
        Some(code) => GitStatus::Exited(code),
        None => GitStatus::Signaled(status.signal().unwrap_or(0)),
    }
}

#[cfg(not(unix))]
fn exit_status(status: &std::process::ExitStatus) -> GitStatus {
    GitStatus::Exited(status.code().unwrap_or(1))
}

/// A runner that reports each invocation through the event sink before
/// delegating, so the debug log level can echo commands and their output.
pub struct ReportingRunner {
    inner: Arc<dyn GitRunner>,
    events: EventSink,
    name: String,
}

impl ReportingRunner {
    pub fn new(inner: Arc<dyn GitRunner>, events: EventSink, name: impl Into<String>) -> Self {
        Self {
            inner,
            events,
            name: name.into(),
        }
    }
}

impl GitRunner for ReportingRunner {
    fn run(&self, dir: &Path, args: &[&str]) -> Result<GitOutput, GitError> {
        emit(
            &self.events,
            SyncEvent::ExecCmd {
                name: self.name.clone(),
                command: format!("git {}", args.join(" ")),
            },
        );
        let output = self.inner.run(dir, args)?;
        let combined = output.combined();
        if !combined.is_empty() {
            emit(
                &self.events,
                SyncEvent::ExecOutput {
                    name: self.name.clone(),
                    output: combined,
                },
            );
        }
        Ok(output)
    }
}

/// Whether the working tree has uncommitted changes.
pub fn is_dirty(runner: &dyn GitRunner, dir: &Path) -> Result<bool, GitError> {
    let output = run_checked(runner, dir, &["status", "--porcelain"])?;
    Ok(!output.combined().is_empty())
}

/// Clone a repository to `dest`, then check out `requested_ref` if one
/// was asked for.
pub fn clone_repo(
    runner: &dyn GitRunner,
    workspace_root: &Path,
    clone_url: &str,
    dest: &Path,
    requested_ref: Option<&str>,
) -> Result<(), GitError> {
    std::fs::create_dir_all(workspace_root).map_err(|source| GitError::Spawn {
        dir: workspace_root.to_path_buf(),
        source,
    })?;

    let dest_str = dest.to_string_lossy();
    run_checked(
        runner,
        workspace_root,
        &["clone", "--recursive", clone_url, &dest_str],
    )?;

    if let Some(reference) = requested_ref {
        run_checked(runner, dest, &["checkout", reference])?;
    }

    Ok(())
}
