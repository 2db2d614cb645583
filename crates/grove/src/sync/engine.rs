//! The bulk sync engine.
//!
//! A producer/consumer pipeline: the provider adapter streams
//! [`RemoteRepo`] values into a bounded channel; the ingest loop here
//! canonicalises and filters them, then dispatches per-repository tasks
//! onto a bounded worker pool. When the pool and the channel are both
//! full, the provider's `send` blocks — worker saturation throttles
//! pagination instead of buffering the listing without bound.

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::git::GitRunner;
use crate::provider::RemoteRepo;
use crate::repo_name::RepoName;
use crate::sync::events::{emit, EventSink, SyncEvent};
use crate::sync::task::{process_repo, TaskContext, TaskOutcome};
use crate::workspace::{IgnoreSet, Workspace};

/// Maximum repository tasks in flight at once.
pub const WORKER_LIMIT: usize = 100;

/// Capacity of the inbound repository channel. The 20× headroom absorbs
/// bursty pagination without letting the listing run arbitrarily ahead.
pub const QUEUE_CAPACITY: usize = WORKER_LIMIT * 20;

/// Which actions the run may take.
#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    /// Clone repositories that are missing locally.
    pub clone: bool,
    /// Update repositories that exist locally.
    pub update: bool,
    /// Move remote-archived repositories into the archive subtree.
    pub archive: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            clone: true,
            update: true,
            archive: true,
        }
    }
}

/// Tallies for one run.
///
/// Conservation: every accepted repository lands in exactly one of
/// `completed`, `archived`, `errors` or `cancelled`; `total` already
/// excludes the archived-but-absent repositories that were dropped.
#[derive(Debug, Default)]
pub struct SyncSummary {
    /// Accepted repositories (after ignore filtering and drops).
    pub total: usize,
    /// Cloned, updated or skipped.
    pub completed: usize,
    /// Moved to the archive subtree.
    pub archived: usize,
    /// Dropped by the ignore set; never counted in `total`.
    pub ignored: usize,
    /// Remote-archived with no local checkout; dropped from `total`.
    pub ignored_archived: usize,
    /// Tasks that observed cancellation instead of finishing.
    pub cancelled: usize,
    /// Per-repository failures; the batch continued past each.
    pub errors: Vec<String>,
    /// Canonical names of every accepted repository, for the tidy pass.
    pub processed: Vec<String>,
}

impl SyncSummary {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && self.cancelled == 0
    }
}

/// The worker-pool half of the pipeline.
pub struct SyncEngine {
    workspace: Arc<Workspace>,
    ignores: IgnoreSet,
    runner: Arc<dyn GitRunner>,
    events: EventSink,
    options: SyncOptions,
    cancel: CancellationToken,
}

impl SyncEngine {
    pub fn new(
        workspace: Arc<Workspace>,
        ignores: IgnoreSet,
        runner: Arc<dyn GitRunner>,
        events: EventSink,
        options: SyncOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            workspace,
            ignores,
            runner,
            events,
            options,
            cancel,
        }
    }

    /// Drain the repository channel, dispatching a task per accepted
    /// repository, and return the tallies once everything has finished.
    ///
    /// The channel closing is the "no more work" signal; cancellation
    /// makes the remaining tasks return quickly but the pool is still
    /// drained so in-flight subprocesses finish or die observably.
    pub async fn run(&self, mut rx: mpsc::Receiver<RemoteRepo>) -> SyncSummary {
        let semaphore = Arc::new(Semaphore::new(WORKER_LIMIT));
        let mut tasks: JoinSet<(String, TaskOutcome)> = JoinSet::new();
        let mut summary = SyncSummary::default();

        while let Some(remote) = rx.recv().await {
            let name = match RepoName::parse(&remote.clone_url) {
                Ok(name) => name,
                Err(err) => {
                    summary.total += 1;
                    let message = err.to_string();
                    emit(
                        &self.events,
                        SyncEvent::RepoError {
                            name: remote.clone_url.clone(),
                            message: message.clone(),
                        },
                    );
                    summary.errors.push(format!("{}: {message}", remote.clone_url));
                    continue;
                }
            };

            if self.ignores.is_ignored(&name) {
                summary.ignored += 1;
                emit(
                    &self.events,
                    SyncEvent::Ignored {
                        name: name.to_string(),
                    },
                );
                continue;
            }

            summary.total += 1;
            summary.processed.push(name.to_string());
            emit(
                &self.events,
                SyncEvent::Queued {
                    name: name.to_string(),
                },
            );

            // Backpressure point: no permit, no dequeue.
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let ctx = TaskContext {
                workspace: Arc::clone(&self.workspace),
                runner: Arc::clone(&self.runner),
                events: Arc::clone(&self.events),
                options: self.options,
                cancel: self.cancel.clone(),
            };

            tasks.spawn(async move {
                let _permit = permit;
                let display = name.to_string();
                match tokio::task::spawn_blocking(move || process_repo(&ctx, &name, &remote)).await
                {
                    Ok(outcome) => (display, outcome),
                    Err(join_err) => (
                        display,
                        TaskOutcome::Failed {
                            message: format!("task panicked: {join_err}"),
                        },
                    ),
                }
            });

            // Reap whatever has already finished so the tally (and the
            // progress line fed by it) keeps moving during long runs.
            while let Some(done) = tasks.try_join_next() {
                apply_outcome(&mut summary, done);
            }
        }

        while let Some(done) = tasks.join_next().await {
            apply_outcome(&mut summary, done);
        }

        tracing::debug!(
            total = summary.total,
            completed = summary.completed,
            archived = summary.archived,
            errors = summary.errors.len(),
            cancelled = summary.cancelled,
            "sync engine drained"
        );

        summary
    }
}

fn apply_outcome(
    summary: &mut SyncSummary,
    joined: Result<(String, TaskOutcome), tokio::task::JoinError>,
) {
    let (name, outcome) = match joined {
        Ok(result) => result,
        Err(join_err) => {
            summary
                .errors
                .push(format!("worker task failed: {join_err}"));
            return;
        }
    };

    match outcome {
        TaskOutcome::Cloned | TaskOutcome::Updated | TaskOutcome::Skipped => {
            summary.completed += 1;
        }
        TaskOutcome::Archived => summary.archived += 1,
        TaskOutcome::IgnoredArchived => {
            summary.ignored_archived += 1;
            summary.total -= 1;
        }
        TaskOutcome::Cancelled => summary.cancelled += 1,
        TaskOutcome::Failed { message } => {
            summary.errors.push(format!("{name}: {message}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::git::mock::MockGitRunner;
    use crate::sync::events::capture::CapturedEvents;
    use crate::sync::events::null_sink;

    fn remote(url: &str, archived: bool) -> RemoteRepo {
        RemoteRepo {
            clone_url: url.to_string(),
            is_archived: archived,
            default_branch: None,
        }
    }

    struct Fixture {
        _tmp: tempfile::TempDir,
        workspace: Arc<Workspace>,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().expect("tempdir");
        Fixture {
            workspace: Arc::new(Workspace::new(tmp.path().to_path_buf())),
            _tmp: tmp,
        }
    }

    fn engine(f: &Fixture, ignores: IgnoreSet, events: EventSink) -> SyncEngine {
        SyncEngine::new(
            Arc::clone(&f.workspace),
            ignores,
            Arc::new(MockGitRunner::new()),
            events,
            SyncOptions::default(),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn every_accepted_repo_reaches_exactly_one_terminal_state() {
        let f = fixture();
        let events = CapturedEvents::new();
        let engine = engine(&f, IgnoreSet::from_patterns([]), events.sink());

        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        for i in 0..25 {
            tx.send(remote(
                &format!("https://github.com/acme/repo{i}.git"),
                false,
            ))
            .await
            .expect("send");
        }
        // One archived-and-absent repo that must drop out of the total.
        tx.send(remote("https://github.com/acme/graveyard.git", true))
            .await
            .expect("send");
        drop(tx);

        let summary = engine.run(rx).await;

        assert_eq!(summary.total, 25);
        assert_eq!(summary.completed, 25);
        assert_eq!(summary.ignored_archived, 1);
        assert!(summary.errors.is_empty());
        assert_eq!(
            summary.total,
            summary.completed + summary.archived + summary.errors.len() + summary.cancelled
        );

        let cloned = events
            .events()
            .iter()
            .filter(|e| matches!(e, SyncEvent::Cloned { .. }))
            .count();
        assert_eq!(cloned, 25);
    }

    #[tokio::test]
    async fn ignored_repos_never_reach_the_pool() {
        let f = fixture();
        let events = CapturedEvents::new();
        let ignores = IgnoreSet::from_patterns(["github.com/acme/secret"]);
        let engine = engine(&f, ignores, events.sink());

        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        tx.send(remote("https://github.com/acme/secret.git", false))
            .await
            .expect("send");
        tx.send(remote("https://github.com/acme/public.git", false))
            .await
            .expect("send");
        drop(tx);

        let summary = engine.run(rx).await;

        assert_eq!(summary.total, 1);
        assert_eq!(summary.ignored, 1);
        let events = events.events();
        assert!(events.iter().any(
            |e| matches!(e, SyncEvent::Ignored { name } if name == "github.com/acme/secret")
        ));
        // No clone/update/archive event for the ignored repo.
        assert!(!events.iter().any(
            |e| matches!(e, SyncEvent::Cloned { name } if name == "github.com/acme/secret")
        ));
    }

    #[tokio::test]
    async fn malformed_clone_urls_are_counted_as_errors() {
        let f = fixture();
        let engine = engine(&f, IgnoreSet::from_patterns([]), null_sink());

        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        tx.send(remote("garbage", false)).await.expect("send");
        drop(tx);

        let summary = engine.run(rx).await;
        assert_eq!(summary.total, 1);
        assert_eq!(summary.errors.len(), 1);
    }

    #[tokio::test]
    async fn per_repo_failures_do_not_abort_the_batch() {
        let f = fixture();
        let engine = engine(&f, IgnoreSet::from_patterns([]), null_sink());

        // A path that exists but is not a git repository fails its task.
        let bad = RepoName::parse("github.com/acme/notgit").expect("name");
        std::fs::create_dir_all(f.workspace.repo_path(&bad)).expect("mkdir");

        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        tx.send(remote("https://github.com/acme/notgit.git", false))
            .await
            .expect("send");
        tx.send(remote("https://github.com/acme/fine.git", false))
            .await
            .expect("send");
        drop(tx);

        let summary = engine.run(rx).await;
        assert_eq!(summary.total, 2);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].contains("notgit"));
    }

    #[tokio::test]
    async fn cancelled_tasks_are_tallied_separately() {
        let f = fixture();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let engine = SyncEngine::new(
            Arc::clone(&f.workspace),
            IgnoreSet::from_patterns([]),
            Arc::new(MockGitRunner::new()),
            null_sink(),
            SyncOptions::default(),
            cancel,
        );

        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        for i in 0..3 {
            tx.send(remote(&format!("https://github.com/acme/r{i}.git"), false))
                .await
                .expect("send");
        }
        drop(tx);

        let summary = engine.run(rx).await;
        assert_eq!(summary.cancelled, 3);
        assert!(summary.errors.is_empty());
        assert!(!summary.is_success());
    }
}
