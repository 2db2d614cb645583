//! The tidy pass: reconcile the local tree against the remote.
//!
//! After a sync run, directories can be left behind that the listing no
//! longer mentions — deleted remotes, renamed projects, or plain
//! directories that never belonged. Tidy walks the synced subtree
//! breadth-first, prunes everything the run already processed, and
//! resolves the rest with single-repository lookups: gone means trash,
//! renamed means move.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::provider::{ProviderError, RepoLookup};
use crate::repo_name::RepoName;
use crate::sync::events::{emit, EventSink, SyncEvent};
use crate::workspace::{move_dir, Workspace, ARCHIVE_DIR, TRASH_DIR};

/// Canonical names a sync run accepted, with descendant queries.
pub struct ProcessedSet {
    names: Vec<String>,
}

impl ProcessedSet {
    pub fn new(names: impl IntoIterator<Item = String>) -> Self {
        Self {
            names: names.into_iter().collect(),
        }
    }

    /// Whether `rel` is a processed repository or lies inside one.
    pub fn covers(&self, rel: &str) -> bool {
        self.names
            .iter()
            .any(|name| rel == name || rel.starts_with(&format!("{name}/")))
    }

    /// Whether any processed repository lies below `rel`.
    pub fn has_descendant_of(&self, rel: &str) -> bool {
        let prefix = format!("{rel}/");
        self.names.iter().any(|name| name.starts_with(&prefix))
    }
}

/// Tallies for one tidy pass.
#[derive(Debug, Default)]
pub struct TidySummary {
    /// Directories moved to the trash subtree.
    pub trashed: usize,
    /// Repositories moved to their new canonical path.
    pub moved: usize,
    /// Lookups or moves that failed; the pass continued.
    pub errors: Vec<String>,
}

/// One reconciliation decision for an unprocessed directory.
enum TidyAction {
    Trashed,
    Moved,
    LeftAlone,
}

/// Walks the workspace and resolves drift.
pub struct TidyWalker {
    workspace: Arc<Workspace>,
    lookup: Arc<dyn RepoLookup>,
    processed: ProcessedSet,
    events: EventSink,
}

impl TidyWalker {
    pub fn new(
        workspace: Arc<Workspace>,
        lookup: Arc<dyn RepoLookup>,
        processed: ProcessedSet,
        events: EventSink,
    ) -> Self {
        Self {
            workspace,
            lookup,
            processed,
            events,
        }
    }

    /// Walk `<workspace>/<start_rel>` and resolve every drifted entry.
    ///
    /// Drifted repositories are resolved concurrently; the set is
    /// expected to be small, so the tasks are unbounded.
    pub async fn run(&self, start_rel: &str, cancel: &CancellationToken) -> TidySummary {
        let mut summary = TidySummary::default();
        let mut actions: JoinSet<Result<TidyAction, String>> = JoinSet::new();

        let start = self.workspace.path_for(start_rel);
        let mut queue: VecDeque<PathBuf> = VecDeque::new();
        if start.is_dir() {
            queue.push_back(start);
        }

        while let Some(dir) = queue.pop_front() {
            if cancel.is_cancelled() {
                break;
            }

            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(err) => {
                    summary.errors.push(format!("{}: {err}", dir.display()));
                    continue;
                }
            };

            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_dir() {
                    continue;
                }

                let file_name = entry.file_name();
                let file_name = file_name.to_string_lossy();
                if file_name == ARCHIVE_DIR || file_name == TRASH_DIR || file_name == ".git" {
                    continue;
                }

                let rel = match self.workspace.rel_name(&path) {
                    Some(rel) => rel,
                    None => continue,
                };

                if self.processed.covers(&rel) {
                    continue;
                }
                if self.processed.has_descendant_of(&rel) {
                    queue.push_back(path);
                    continue;
                }

                if path.join(".git").is_dir() {
                    self.spawn_repo_action(&mut actions, rel, path);
                } else {
                    self.spawn_trash_action(&mut actions, rel, path);
                }
            }
        }

        while let Some(joined) = actions.join_next().await {
            match joined {
                Ok(Ok(TidyAction::Trashed)) => summary.trashed += 1,
                Ok(Ok(TidyAction::Moved)) => summary.moved += 1,
                Ok(Ok(TidyAction::LeftAlone)) => {}
                Ok(Err(message)) => {
                    emit(
                        &self.events,
                        SyncEvent::Info {
                            message: message.clone(),
                        },
                    );
                    summary.errors.push(message);
                }
                Err(join_err) => summary.errors.push(format!("tidy task failed: {join_err}")),
            }
        }

        summary
    }

    /// Resolve a git directory the sync never saw.
    fn spawn_repo_action(
        &self,
        actions: &mut JoinSet<Result<TidyAction, String>>,
        rel: String,
        path: PathBuf,
    ) {
        let workspace = Arc::clone(&self.workspace);
        let lookup = Arc::clone(&self.lookup);
        let events = Arc::clone(&self.events);

        actions.spawn(async move {
            let name = RepoName::parse(&rel).map_err(|err| format!("{rel}: {err}"))?;

            match lookup.lookup(&name).await {
                Err(ProviderError::NotFound { .. }) => {
                    let dst = workspace.trash_path(&name);
                    move_dir(&path, &dst).map_err(|err| format!("{rel}: {err}"))?;
                    emit(
                        &events,
                        SyncEvent::Info {
                            message: format!("tidy: trashed {rel} (gone from remote)"),
                        },
                    );
                    Ok(TidyAction::Trashed)
                }
                Err(err) => Err(format!("{rel}: looking up: {err}")),
                Ok(remote) => {
                    let canonical = RepoName::parse(&remote.clone_url)
                        .map_err(|err| format!("{rel}: {err}"))?;
                    if canonical == name {
                        return Ok(TidyAction::LeftAlone);
                    }

                    let dst = workspace.repo_path(&canonical);
                    move_dir(&path, &dst).map_err(|err| format!("{rel}: {err}"))?;
                    emit(
                        &events,
                        SyncEvent::Info {
                            message: format!("tidy: moved {rel} to {canonical} (renamed on remote)"),
                        },
                    );
                    Ok(TidyAction::Moved)
                }
            }
        });
    }

    /// A plain directory below the repo boundary: drift, into the trash.
    fn spawn_trash_action(
        &self,
        actions: &mut JoinSet<Result<TidyAction, String>>,
        rel: String,
        path: PathBuf,
    ) {
        let workspace = Arc::clone(&self.workspace);
        let events = Arc::clone(&self.events);

        actions.spawn(async move {
            let dst = workspace.trash_path_for(&rel);
            move_dir(&path, &dst).map_err(|err| format!("{rel}: {err}"))?;
            emit(
                &events,
                SyncEvent::Info {
                    message: format!("tidy: trashed {rel}"),
                },
            );
            Ok(TidyAction::Trashed)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::provider::{RemoteRepo, Result as ProviderResult};
    use crate::sync::events::null_sink;

    /// Scripted lookup with a record of what was asked.
    #[derive(Default)]
    struct FakeLookup {
        responses: Mutex<HashMap<String, ProviderResult<RemoteRepo>>>,
        asked: Mutex<Vec<String>>,
    }

    impl FakeLookup {
        fn not_found(&self, name: &str) {
            self.responses.lock().unwrap_or_else(|e| e.into_inner()).insert(
                name.to_string(),
                Err(ProviderError::not_found(name.to_string())),
            );
        }

        fn found_at(&self, name: &str, clone_url: &str) {
            self.responses.lock().unwrap_or_else(|e| e.into_inner()).insert(
                name.to_string(),
                Ok(RemoteRepo {
                    clone_url: clone_url.to_string(),
                    is_archived: false,
                    default_branch: None,
                }),
            );
        }

        fn asked(&self) -> Vec<String> {
            self.asked.lock().unwrap_or_else(|e| e.into_inner()).clone()
        }
    }

    #[async_trait]
    impl RepoLookup for FakeLookup {
        async fn lookup(&self, name: &RepoName) -> ProviderResult<RemoteRepo> {
            let key = name.to_string();
            self.asked
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(key.clone());
            match self
                .responses
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&key)
            {
                Some(result) => result,
                None => Err(ProviderError::not_found(key)),
            }
        }
    }

    fn make_repo(workspace: &Workspace, rel: &str) {
        std::fs::create_dir_all(workspace.path_for(rel).join(".git")).expect("mkdir");
    }

    fn walker(
        workspace: &Arc<Workspace>,
        lookup: Arc<FakeLookup>,
        processed: &[&str],
    ) -> TidyWalker {
        TidyWalker::new(
            Arc::clone(workspace),
            lookup,
            ProcessedSet::new(processed.iter().map(|s| s.to_string())),
            null_sink(),
        )
    }

    #[test]
    fn processed_set_covers_repos_and_their_contents() {
        let set = ProcessedSet::new(["gitlab.com/example/path1/path2".to_string()]);

        assert!(set.covers("gitlab.com/example/path1/path2"));
        assert!(set.covers("gitlab.com/example/path1/path2/path3"));
        assert!(!set.covers("gitlab.com/example/path1/path2other"));
        assert!(!set.covers("gitlab.com/example/path1/path2.git"));
        assert!(!set.covers("gitlab.com/example/path1.git"));
        assert!(!set.covers("gitlab.com/example/path1"));
        assert!(!set.covers("github.com/example"));
        assert!(!set.covers("github.com"));

        assert!(set.has_descendant_of("gitlab.com/example/path1"));
        assert!(set.has_descendant_of("gitlab.com/example"));
        assert!(!set.has_descendant_of("gitlab.com/other"));
    }

    #[tokio::test]
    async fn gone_repos_move_to_trash() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let workspace = Arc::new(Workspace::new(tmp.path().to_path_buf()));
        make_repo(&workspace, "github.com/acme/kept");
        make_repo(&workspace, "github.com/acme/gone");

        let lookup = Arc::new(FakeLookup::default());
        lookup.not_found("github.com/acme/gone");

        let walker = walker(&workspace, lookup, &["github.com/acme/kept"]);
        let summary = walker
            .run("github.com/acme", &CancellationToken::new())
            .await;

        assert_eq!(summary.trashed, 1);
        assert!(summary.errors.is_empty());
        assert!(!workspace.path_for("github.com/acme/gone").exists());
        assert!(workspace
            .path_for(".trash/github.com/acme/gone")
            .join(".git")
            .is_dir());
        assert!(workspace.path_for("github.com/acme/kept").is_dir());
    }

    #[tokio::test]
    async fn renamed_repos_move_to_their_new_path() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let workspace = Arc::new(Workspace::new(tmp.path().to_path_buf()));
        make_repo(&workspace, "github.com/acme/oldname");

        let lookup = Arc::new(FakeLookup::default());
        lookup.found_at(
            "github.com/acme/oldname",
            "https://github.com/acme/newname.git",
        );

        let walker = walker(&workspace, lookup, &[]);
        let summary = walker
            .run("github.com/acme", &CancellationToken::new())
            .await;

        assert_eq!(summary.moved, 1);
        assert!(!workspace.path_for("github.com/acme/oldname").exists());
        assert!(workspace
            .path_for("github.com/acme/newname")
            .join(".git")
            .is_dir());
    }

    #[tokio::test]
    async fn rename_refuses_an_occupied_destination() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let workspace = Arc::new(Workspace::new(tmp.path().to_path_buf()));
        make_repo(&workspace, "github.com/acme/oldname");
        make_repo(&workspace, "github.com/acme/newname");

        let lookup = Arc::new(FakeLookup::default());
        lookup.found_at(
            "github.com/acme/oldname",
            "https://github.com/acme/newname.git",
        );
        lookup.found_at(
            "github.com/acme/newname",
            "https://github.com/acme/newname.git",
        );

        let walker = walker(&workspace, lookup, &[]);
        let summary = walker
            .run("github.com/acme", &CancellationToken::new())
            .await;

        assert_eq!(summary.moved, 0);
        assert_eq!(summary.errors.len(), 1);
        // Both directories untouched.
        assert!(workspace.path_for("github.com/acme/oldname").is_dir());
        assert!(workspace.path_for("github.com/acme/newname").is_dir());
    }

    #[tokio::test]
    async fn processed_subtrees_are_never_visited() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let workspace = Arc::new(Workspace::new(tmp.path().to_path_buf()));
        make_repo(&workspace, "github.com/acme/kept");
        // A git directory nested inside a processed repo must not be
        // looked up or touched.
        std::fs::create_dir_all(
            workspace
                .path_for("github.com/acme/kept/vendor/dep")
                .join(".git"),
        )
        .expect("mkdir");

        let lookup = Arc::new(FakeLookup::default());
        let walker = walker(&workspace, lookup.clone(), &["github.com/acme/kept"]);
        let summary = walker
            .run("github.com/acme", &CancellationToken::new())
            .await;

        assert!(lookup.asked().is_empty());
        assert_eq!(summary.trashed, 0);
        assert!(workspace
            .path_for("github.com/acme/kept/vendor/dep")
            .is_dir());
    }

    #[tokio::test]
    async fn plain_directories_below_the_repo_boundary_are_trashed() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let workspace = Arc::new(Workspace::new(tmp.path().to_path_buf()));
        make_repo(&workspace, "github.com/acme/kept");
        std::fs::create_dir_all(workspace.path_for("github.com/acme/leftover/stuff"))
            .expect("mkdir");

        let lookup = Arc::new(FakeLookup::default());
        let walker = walker(&workspace, lookup, &["github.com/acme/kept"]);
        let summary = walker
            .run("github.com/acme", &CancellationToken::new())
            .await;

        assert_eq!(summary.trashed, 1);
        assert!(!workspace.path_for("github.com/acme/leftover").exists());
        assert!(workspace
            .path_for(".trash/github.com/acme/leftover/stuff")
            .is_dir());
    }
}
