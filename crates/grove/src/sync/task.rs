//! The per-repository state machine.
//!
//! Given one remote repository, decide what the local tree needs:
//! archive it, clone it, update it, or leave it alone. One task runs per
//! accepted repository, on the blocking pool, bounded by the engine's
//! worker limit. A task failure never aborts the batch.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::git::update::{update_repo, UpdateOutcome};
use crate::git::{clone_repo, GitRunner, ReportingRunner};
use crate::provider::RemoteRepo;
use crate::repo_name::RepoName;
use crate::sync::engine::SyncOptions;
use crate::sync::events::{emit, EventSink, SyncEvent};
use crate::workspace::{move_dir, Workspace};

/// Terminal result of one repository task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Cloned,
    Updated,
    Skipped,
    Archived,
    /// Remote-archived with no local checkout; drops out of the total.
    IgnoredArchived,
    /// The run was cancelled before or while this task executed.
    Cancelled,
    Failed {
        message: String,
    },
}

/// Everything a worker needs; notably not the engine itself.
pub(crate) struct TaskContext {
    pub workspace: Arc<Workspace>,
    pub runner: Arc<dyn GitRunner>,
    pub events: EventSink,
    pub options: SyncOptions,
    pub cancel: CancellationToken,
}

/// Run the state machine for one repository. Blocking.
pub(crate) fn process_repo(ctx: &TaskContext, name: &RepoName, remote: &RemoteRepo) -> TaskOutcome {
    if ctx.cancel.is_cancelled() {
        return TaskOutcome::Cancelled;
    }

    let display = name.to_string();
    let local = ctx.workspace.repo_path(name);
    let exists = local.is_dir();

    if remote.is_archived {
        return archive_state(ctx, name, &display, &local, exists);
    }

    if exists {
        if !local.join(".git").is_dir() {
            return fail(
                ctx,
                &display,
                format!("{} exists but is not a git repository", local.display()),
            );
        }
        if !ctx.options.update {
            emit(&ctx.events, SyncEvent::Skipped { name: display });
            return TaskOutcome::Skipped;
        }
        return update_state(ctx, &display, &local, remote);
    }

    if !ctx.options.clone {
        emit(&ctx.events, SyncEvent::Skipped { name: display });
        return TaskOutcome::Skipped;
    }
    clone_state(ctx, &display, &local, remote)
}

fn archive_state(
    ctx: &TaskContext,
    name: &RepoName,
    display: &str,
    local: &Path,
    exists: bool,
) -> TaskOutcome {
    if !exists {
        emit(
            &ctx.events,
            SyncEvent::IgnoredArchived {
                name: display.to_string(),
            },
        );
        return TaskOutcome::IgnoredArchived;
    }

    if !ctx.options.archive {
        emit(
            &ctx.events,
            SyncEvent::Skipped {
                name: display.to_string(),
            },
        );
        return TaskOutcome::Skipped;
    }

    let dst = ctx.workspace.archive_path(name);
    match move_dir(local, &dst) {
        Ok(()) => {
            emit(
                &ctx.events,
                SyncEvent::Archived {
                    name: display.to_string(),
                },
            );
            TaskOutcome::Archived
        }
        Err(err) => fail(ctx, display, format!("archiving: {err}")),
    }
}

fn update_state(
    ctx: &TaskContext,
    display: &str,
    local: &Path,
    remote: &RemoteRepo,
) -> TaskOutcome {
    let runner = reporting_runner(ctx, display);
    match update_repo(runner.as_ref(), local, &remote.clone_url, None) {
        Ok(UpdateOutcome::Updated) | Ok(UpdateOutcome::UnbornHead) => {
            emit(
                &ctx.events,
                SyncEvent::Updated {
                    name: display.to_string(),
                },
            );
            TaskOutcome::Updated
        }
        Err(err) => {
            if ctx.cancel.is_cancelled() {
                return TaskOutcome::Cancelled;
            }
            fail(ctx, display, err.to_string())
        }
    }
}

fn clone_state(ctx: &TaskContext, display: &str, local: &Path, remote: &RemoteRepo) -> TaskOutcome {
    let runner = reporting_runner(ctx, display);
    match clone_repo(
        runner.as_ref(),
        ctx.workspace.root(),
        &remote.clone_url,
        local,
        None,
    ) {
        Ok(()) => {
            emit(
                &ctx.events,
                SyncEvent::Cloned {
                    name: display.to_string(),
                },
            );
            TaskOutcome::Cloned
        }
        Err(err) => {
            if ctx.cancel.is_cancelled() {
                return TaskOutcome::Cancelled;
            }
            fail(ctx, display, err.to_string())
        }
    }
}

fn reporting_runner(ctx: &TaskContext, display: &str) -> Box<dyn GitRunner> {
    Box::new(ReportingRunner::new(
        Arc::clone(&ctx.runner),
        Arc::clone(&ctx.events),
        display,
    ))
}

fn fail(ctx: &TaskContext, display: &str, message: String) -> TaskOutcome {
    emit(
        &ctx.events,
        SyncEvent::RepoError {
            name: display.to_string(),
            message: message.clone(),
        },
    );
    TaskOutcome::Failed { message }
}
