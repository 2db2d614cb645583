//! The `list` subcommand: print git directories in the workspace.

use std::path::{Path, PathBuf};

use tokio::task::JoinSet;

use grove::git::{is_dirty, SystemGitRunner};
use grove::workspace::{git_dirs_under, Workspace, ARCHIVE_DIR};

pub async fn run(workspace: Workspace, dirty: bool, full_path: bool, archived: bool) -> i32 {
    let base = if archived {
        workspace.root().join(ARCHIVE_DIR)
    } else {
        workspace.root().to_path_buf()
    };

    let dirs = match git_dirs_under(&base) {
        Ok(dirs) => dirs,
        Err(err) => {
            eprintln!("{}: {err}", base.display());
            return 1;
        }
    };

    let mut checks: JoinSet<Result<Option<String>, String>> = JoinSet::new();
    for dir in dirs {
        let display = display_path(&base, &dir, full_path);
        checks.spawn_blocking(move || {
            if dirty {
                match is_dirty(&SystemGitRunner, &dir) {
                    Ok(true) => Ok(Some(display)),
                    Ok(false) => Ok(None),
                    Err(err) => Err(err.to_string()),
                }
            } else {
                Ok(Some(display))
            }
        });
    }

    let mut failed = false;
    while let Some(joined) = checks.join_next().await {
        match joined {
            Ok(Ok(Some(line))) => println!("{line}"),
            Ok(Ok(None)) => {}
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

fn display_path(base: &Path, dir: &Path, full_path: bool) -> String {
    if full_path {
        return dir.display().to_string();
    }
    dir.strip_prefix(base)
        .unwrap_or(dir)
        .display()
        .to_string()
}
