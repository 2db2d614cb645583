//! The `exec` subcommand: run a shell command in every git directory.

use std::path::{Path, PathBuf};
use std::process::Command;

use tokio::task::JoinSet;

use grove::workspace::{git_dirs_under, Workspace};

pub async fn run(workspace: Workspace, command: &str, dir: Option<PathBuf>) -> i32 {
    let base = dir.unwrap_or_else(|| workspace.root().to_path_buf());

    let dirs = match git_dirs_under(&base) {
        Ok(dirs) => dirs,
        Err(err) => {
            eprintln!("{}: {err}", base.display());
            return 1;
        }
    };

    let mut runs: JoinSet<Option<String>> = JoinSet::new();
    for dir in dirs {
        let command = command.to_string();
        runs.spawn_blocking(move || exec_in(&dir, &command));
    }

    // Joining one at a time keeps per-directory reports whole.
    let mut failed = false;
    while let Some(joined) = runs.join_next().await {
        match joined {
            Ok(Some(report)) => print!("{report}"),
            Ok(None) => {}
            Err(join_err) => {
                eprintln!("{join_err}");
                failed = true;
            }
        }
    }

    i32::from(failed)
}

/// Run `sh -c command` in `dir`.
///
/// Quiet success produces no report; anything with output or a non-zero
/// exit is prefixed with the directory and exit status.
fn exec_in(dir: &Path, command: &str) -> Option<String> {
    let output = match Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(dir)
        .output()
    {
        Ok(output) => output,
        Err(err) => {
            return Some(format!("in {}: {err}\n\n", dir.display()));
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let combined = format!("{}{}", stdout, stderr);
    let combined = combined.trim_end();

    if combined.is_empty() && output.status.success() {
        return None;
    }

    let code = output.status.code().unwrap_or(-1);
    Some(format!(
        "in {}: exit status {code}\n{combined}\n\n",
        dir.display()
    ))
}
