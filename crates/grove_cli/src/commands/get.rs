//! The `get` subcommand: one repository into its canonical place.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use grove::git::update::update_repo;
use grove::git::{clone_repo, ReportingRunner, SystemGitRunner};
use grove::repo_name::RepoName;
use grove::sync::events::EventSink;
use grove::workspace::Workspace;

use crate::progress::{LogLevel, ProgressLogger};

pub async fn run(
    workspace: Workspace,
    level: LogLevel,
    project_urls: &[String],
    update: bool,
) -> i32 {
    let workspace = Arc::new(workspace);
    let logger = ProgressLogger::new(level, CancellationToken::new());
    let mut failed = false;

    for raw in project_urls {
        let (reference, requested_ref) = split_ref(raw);
        let name = match RepoName::parse(reference) {
            Ok(name) => name,
            Err(err) => {
                eprintln!("{err}");
                failed = true;
                continue;
            }
        };

        let outcome = {
            let workspace = Arc::clone(&workspace);
            let events = logger.sink();
            let name = name.clone();
            let requested_ref = requested_ref.map(str::to_string);
            tokio::task::spawn_blocking(move || {
                fetch_one(&workspace, events, &name, requested_ref.as_deref(), update)
            })
            .await
        };

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(message)) => {
                logger.info(&message);
                failed = true;
            }
            Err(join_err) => {
                logger.info(&format!("{name}: {join_err}"));
                failed = true;
            }
        }
    }

    i32::from(failed)
}

/// Clone the repository, or bring an existing checkout up to date when
/// asked to. Blocking.
fn fetch_one(
    workspace: &Workspace,
    events: EventSink,
    name: &RepoName,
    requested_ref: Option<&str>,
    update: bool,
) -> Result<(), String> {
    let dir = workspace.repo_path(name);
    let runner = ReportingRunner::new(Arc::new(SystemGitRunner), events, name.to_string());
    let clone_url = name.clone_url();

    if !dir.is_dir() {
        return clone_repo(&runner, workspace.root(), &clone_url, &dir, requested_ref)
            .map_err(|err| err.to_string());
    }

    if !update {
        return Err(format!(
            "{name}: already exists; pass --update to update it"
        ));
    }

    update_repo(&runner, &dir, &clone_url, requested_ref)
        .map(|_| ())
        .map_err(|err| format!("{name}: {err}"))
}

/// Split a `PROJECT_URL[@COMMIT]` argument.
fn split_ref(raw: &str) -> (&str, Option<&str>) {
    match raw.split_once('@') {
        Some((reference, commit)) if !commit.is_empty() => (reference, Some(commit)),
        Some((reference, _)) => (reference, None),
        None => (raw, None),
    }
}
