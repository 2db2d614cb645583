//! The `pristine` subcommand: stash, reset and clean every checkout.

use std::path::{Path, PathBuf};

use tokio::task::JoinSet;

use grove::git::{run_checked, GitError, SystemGitRunner};
use grove::workspace::{git_dirs_under, Workspace};

pub async fn run(workspace: Workspace, dir: Option<PathBuf>) -> i32 {
    let base = dir.unwrap_or_else(|| workspace.root().to_path_buf());

    let dirs = match git_dirs_under(&base) {
        Ok(dirs) => dirs,
        Err(err) => {
            eprintln!("{}: {err}", base.display());
            return 1;
        }
    };

    let mut runs: JoinSet<Result<(), String>> = JoinSet::new();
    for dir in dirs {
        runs.spawn_blocking(move || make_pristine(&dir).map_err(|err| err.to_string()));
    }

    let mut failed = false;
    while let Some(joined) = runs.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(message)) => {
                eprintln!("{message}");
                failed = true;
            }
            Err(join_err) => {
                eprintln!("{join_err}");
                failed = true;
            }
        }
    }

    i32::from(failed)
}

/// Fetch, then hard-reset the checkout onto the remote HEAD and drop
/// everything untracked.
fn make_pristine(dir: &Path) -> Result<(), GitError> {
    let runner = SystemGitRunner;

    run_checked(&runner, dir, &["fetch"])?;
    let head = run_checked(
        &runner,
        dir,
        &["symbolic-ref", "--short", "refs/remotes/origin/HEAD"],
    )?;
    let head = head.stdout.trim().to_string();

    run_checked(&runner, dir, &["stash", "-u"])?;
    run_checked(&runner, dir, &["reset", "--hard", &head])?;
    run_checked(&runner, dir, &["clean", "-ffdx"])?;
    Ok(())
}
