//! The per-repository update protocol.
//!
//! Updating an existing checkout is a linear sequence of named steps,
//! each driven by git exit codes and output patterns:
//!
//! 1. refuse while another git process holds `.git/index.lock`
//! 2. repoint `remote.origin.url` when it drifted
//! 3. `git fetch origin`
//! 4. resolve the branch to check out (remote HEAD unless a ref was
//!    requested); a repository with no commits yet is left alone
//! 5. refuse to clobber a detached `HEAD`
//! 6. stash uncommitted work
//! 7. `git checkout`
//! 8. fast-forward when on a branch
//!
//! Every step shells out through the [`GitRunner`] capability, so the
//! whole machine is testable against a scripted runner.

use std::path::{Path, PathBuf};

use thiserror::Error;

use super::{is_dirty, run_checked, single_line, GitError, GitRunner};

/// Message stashes are tagged with.
const STASH_MESSAGE: &str = "grove";

/// How an update ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The checkout was brought up to date.
    Updated,
    /// The repository has no commits yet; nothing to do.
    UnbornHead,
}

/// Reasons an update is refused or fails.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// Another git process is active in the repository.
    #[error("index is locked ({}), another git process may be running", lock.display())]
    IndexLocked { lock: PathBuf },

    /// `HEAD` points at a commit, not a branch; updating would clobber it.
    #[error("HEAD is detached, not updating")]
    DetachedHead,

    /// The remote HEAD could not be resolved to a branch.
    #[error("cannot determine default branch: {output}")]
    DefaultBranchUnresolved { output: String },

    #[error(transparent)]
    Git(#[from] GitError),
}

/// Bring an existing checkout up to date with its remote.
///
/// `requested_ref` overrides the remote default branch when set.
pub fn update_repo(
    runner: &dyn GitRunner,
    dir: &Path,
    clone_url: &str,
    requested_ref: Option<&str>,
) -> Result<UpdateOutcome, UpdateError> {
    ensure_unlocked(dir)?;
    ensure_origin_url(runner, dir, clone_url)?;
    fetch_origin(runner, dir)?;

    let target = match requested_ref {
        Some(reference) => reference.to_string(),
        None => match resolve_default_branch(runner, dir)? {
            Some(branch) => branch,
            None => return Ok(UpdateOutcome::UnbornHead),
        },
    };

    ensure_attached_head(runner, dir)?;
    stash_if_dirty(runner, dir)?;
    checkout(runner, dir, &target)?;
    fast_forward_if_branch(runner, dir)?;

    Ok(UpdateOutcome::Updated)
}

fn ensure_unlocked(dir: &Path) -> Result<(), UpdateError> {
    let lock = dir.join(".git").join("index.lock");
    if lock.exists() {
        return Err(UpdateError::IndexLocked { lock });
    }
    Ok(())
}

fn ensure_origin_url(
    runner: &dyn GitRunner,
    dir: &Path,
    clone_url: &str,
) -> Result<(), UpdateError> {
    let current = runner.run(dir, &["config", "--get", "remote.origin.url"])?;
    if current.status.success() && current.stdout.trim() == clone_url {
        return Ok(());
    }
    run_checked(runner, dir, &["remote", "set-url", "origin", clone_url])?;
    Ok(())
}

fn fetch_origin(runner: &dyn GitRunner, dir: &Path) -> Result<(), UpdateError> {
    run_checked(runner, dir, &["fetch", "origin"])?;
    Ok(())
}

/// Resolve the branch the remote considers HEAD.
///
/// Returns `None` for a repository with no commits yet (unborn HEAD).
fn resolve_default_branch(
    runner: &dyn GitRunner,
    dir: &Path,
) -> Result<Option<String>, UpdateError> {
    let head = runner.run(dir, &["symbolic-ref", "--short", "refs/remotes/origin/HEAD"])?;
    if head.status.success() {
        let branch = head.stdout.trim();
        if !branch.is_empty() {
            return Ok(Some(branch.to_string()));
        }
    }

    let log = runner.run(dir, &["log", "-n", "1"])?;
    if log.combined().contains("does not have any commits yet") {
        return Ok(None);
    }

    // origin/HEAD is unset locally; ask git to work it out from the remote.
    let set = run_checked(runner, dir, &["remote", "set-head", "origin", "--auto"])?;
    for line in set.combined().lines() {
        if let Some(branch) = line.trim().strip_prefix("origin/HEAD set to ") {
            let branch = branch.trim();
            if !branch.is_empty() {
                return Ok(Some(branch.to_string()));
            }
        }
    }

    Err(UpdateError::DefaultBranchUnresolved {
        output: single_line(&set.combined()),
    })
}

fn ensure_attached_head(runner: &dyn GitRunner, dir: &Path) -> Result<(), UpdateError> {
    let head = run_checked(runner, dir, &["rev-parse", "--abbrev-ref", "HEAD"])?;
    if head.stdout.trim() == "HEAD" {
        return Err(UpdateError::DetachedHead);
    }
    Ok(())
}

fn stash_if_dirty(runner: &dyn GitRunner, dir: &Path) -> Result<(), UpdateError> {
    if is_dirty(runner, dir)? {
        run_checked(
            runner,
            dir,
            &[
                "stash",
                "push",
                "--include-untracked",
                "--message",
                STASH_MESSAGE,
            ],
        )?;
    }
    Ok(())
}

fn checkout(runner: &dyn GitRunner, dir: &Path, target: &str) -> Result<(), UpdateError> {
    run_checked(runner, dir, &["checkout", target])?;
    Ok(())
}

/// Fast-forward onto the upstream when the checked-out ref is a branch.
/// A detached checkout of an explicit commit has no upstream to merge.
fn fast_forward_if_branch(runner: &dyn GitRunner, dir: &Path) -> Result<(), UpdateError> {
    let head = runner.run(dir, &["symbolic-ref", "-q", "HEAD"])?;
    if !head.status.success() {
        return Ok(());
    }
    run_checked(runner, dir, &["merge", "--ff-only", "@{u}"])?;
    Ok(())
}
