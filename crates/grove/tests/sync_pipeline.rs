//! End-to-end pipeline tests: channel → ingest filter → worker pool,
//! with a scripted git runner standing in for the real binary.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use grove::git::{GitError, GitOutput, GitRunner, GitStatus};
use grove::provider::RemoteRepo;
use grove::repo_name::RepoName;
use grove::sync::{SyncEngine, SyncOptions, QUEUE_CAPACITY, WORKER_LIMIT};
use grove::workspace::{IgnoreSet, Workspace};

/// Succeeds at everything while tracking how many invocations run at
/// once.
#[derive(Default)]
struct CountingRunner {
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl GitRunner for CountingRunner {
    fn run(&self, _dir: &Path, _args: &[&str]) -> Result<GitOutput, GitError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);

        // Long enough for tasks to overlap, short enough not to matter.
        std::thread::sleep(std::time::Duration::from_millis(2));

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(GitOutput {
            stdout: String::new(),
            stderr: String::new(),
            status: GitStatus::Exited(0),
        })
    }
}

fn remote(url: &str, archived: bool) -> RemoteRepo {
    RemoteRepo {
        clone_url: url.to_string(),
        is_archived: archived,
        default_branch: None,
    }
}

fn null_sink() -> grove::sync::events::EventSink {
    Arc::new(|_| {})
}

#[tokio::test]
async fn a_full_batch_conserves_its_counts() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let workspace = Arc::new(Workspace::new(tmp.path().to_path_buf()));
    let runner = Arc::new(CountingRunner::default());

    let engine = SyncEngine::new(
        Arc::clone(&workspace),
        IgnoreSet::from_patterns(["github.com/acme/ignored-*"]),
        Arc::clone(&runner) as Arc<dyn GitRunner>,
        null_sink(),
        SyncOptions::default(),
        CancellationToken::new(),
    );

    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    let feeder = tokio::spawn(async move {
        for i in 0..40 {
            tx.send(remote(&format!("https://github.com/acme/repo{i}.git"), false))
                .await
                .expect("send");
        }
        for i in 0..5 {
            tx.send(remote(
                &format!("https://github.com/acme/ignored-{i}.git"),
                false,
            ))
            .await
            .expect("send");
        }
        // Archived without a local checkout: dropped from the total.
        tx.send(remote("https://github.com/acme/dead.git", true))
            .await
            .expect("send");
    });

    let summary = engine.run(rx).await;
    feeder.await.expect("feeder");

    assert_eq!(summary.total, 40);
    assert_eq!(summary.completed, 40);
    assert_eq!(summary.ignored, 5);
    assert_eq!(summary.ignored_archived, 1);
    assert!(summary.errors.is_empty());
    assert_eq!(summary.cancelled, 0);
    assert_eq!(
        summary.total,
        summary.completed + summary.archived + summary.errors.len() + summary.cancelled
    );
    assert!(summary.is_success());
}

#[tokio::test]
async fn worker_concurrency_never_exceeds_the_bound() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let workspace = Arc::new(Workspace::new(tmp.path().to_path_buf()));
    let runner = Arc::new(CountingRunner::default());

    let engine = SyncEngine::new(
        Arc::clone(&workspace),
        IgnoreSet::from_patterns([]),
        Arc::clone(&runner) as Arc<dyn GitRunner>,
        null_sink(),
        SyncOptions::default(),
        CancellationToken::new(),
    );

    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    let feeder = tokio::spawn(async move {
        for i in 0..300 {
            tx.send(remote(&format!("https://github.com/acme/r{i}.git"), false))
                .await
                .expect("send");
        }
    });

    let summary = engine.run(rx).await;
    feeder.await.expect("feeder");

    assert_eq!(summary.total, 300);
    assert!(runner.calls.load(Ordering::SeqCst) >= 300);
    let peak = runner.peak.load(Ordering::SeqCst);
    assert!(
        peak <= WORKER_LIMIT,
        "peak concurrency {peak} exceeded the {WORKER_LIMIT}-worker bound"
    );
}

#[tokio::test]
async fn archived_repos_move_and_collisions_refuse() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let workspace = Arc::new(Workspace::new(tmp.path().to_path_buf()));

    let present = RepoName::parse("github.com/acme/retired").expect("name");
    std::fs::create_dir_all(workspace.repo_path(&present).join(".git")).expect("mkdir");

    let collided = RepoName::parse("github.com/acme/collided").expect("name");
    std::fs::create_dir_all(workspace.repo_path(&collided).join(".git")).expect("mkdir");
    std::fs::create_dir_all(workspace.archive_path(&collided)).expect("mkdir archive");

    let engine = SyncEngine::new(
        Arc::clone(&workspace),
        IgnoreSet::from_patterns([]),
        Arc::new(CountingRunner::default()),
        null_sink(),
        SyncOptions::default(),
        CancellationToken::new(),
    );

    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    tx.send(remote("https://github.com/acme/retired.git", true))
        .await
        .expect("send");
    tx.send(remote("https://github.com/acme/collided.git", true))
        .await
        .expect("send");
    drop(tx);

    let summary = engine.run(rx).await;

    assert_eq!(summary.archived, 1);
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].contains("collided"));

    // The clean archive happened.
    assert!(workspace.archive_path(&present).join(".git").is_dir());
    assert!(!workspace.repo_path(&present).exists());
    // The collision moved nothing.
    assert!(workspace.repo_path(&collided).join(".git").is_dir());
}
