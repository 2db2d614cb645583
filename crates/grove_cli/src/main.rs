//! grove CLI - organise fleets of git repositories into a local
//! workspace.

mod commands;
mod progress;
mod shutdown;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use console::Term;
use tracing_subscriber::EnvFilter;

use grove::workspace::Workspace;

use crate::progress::LogLevel;

#[derive(Parser)]
#[command(name = "grove")]
#[command(version)]
#[command(about = "Organise fleets of git repositories into a local workspace")]
#[command(
    long_about = "Grove mirrors every repository of a user, organisation or group \
(GitHub, GitLab, or self-hosted GitLab instances) into a uniform local tree, \
keeps the tree in sync over repeated runs, and tidies it when remote \
repositories are archived, renamed or deleted."
)]
#[command(after_long_help = r#"EXAMPLES
    Mirror a GitHub organisation:
        $ grove sync github.com/rust-lang

    Mirror a GitLab group, pruning repositories deleted on the remote:
        $ grove sync gitlab.com/my-company/platform --tidy

    Clone one repository into its canonical place:
        $ grove get github.com/rust-lang/cargo

    List every dirty checkout in the workspace:
        $ grove list --dirty

ENVIRONMENT VARIABLES
    GROVE_WORKSPACE   Workspace root (default: ~/grove)
    GITLAB_HOSTS      Comma-separated additional GitLab hosts to register

CREDENTIALS
    Tokens are read from ~/.netrc, keyed by machine name: api.github.com
    for GitHub, the host itself for GitLab.
"#)]
struct Cli {
    /// Output verbosity
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror every repository of a user, organisation or group
    Sync {
        /// Provider principal, e.g. github.com/rust-lang
        org_url: String,

        /// Don't clone repositories that are missing locally
        #[arg(long)]
        no_clone: bool,

        /// Don't update repositories that exist locally
        #[arg(long)]
        no_update: bool,

        /// Don't move remote-archived repositories into the archive
        #[arg(long)]
        no_archive: bool,

        /// Reconcile local directories the remote no longer reports
        #[arg(long)]
        tidy: bool,
    },
    /// Clone a repository into its canonical workspace path
    Get {
        /// One or more PROJECT_URL[@COMMIT] references
        #[arg(required = true)]
        project_urls: Vec<String>,

        /// Update the checkout when it already exists
        #[arg(long)]
        update: bool,
    },
    /// List git repositories in the workspace
    List {
        /// Only checkouts with uncommitted changes
        #[arg(long)]
        dirty: bool,

        /// Print absolute paths
        #[arg(long)]
        full_path: bool,

        /// List the archive subtree instead
        #[arg(long)]
        archived: bool,
    },
    /// Run a shell command in every git directory
    Exec {
        /// Command passed to `sh -c`
        command: String,

        /// Base directory (default: the workspace root)
        dir: Option<PathBuf>,
    },
    /// Return every checkout to a pristine state (stash, reset, clean)
    Pristine {
        /// Base directory (default: the workspace root)
        dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Structured logs are for non-interactive runs; the interactive
    // progress renderer owns the terminal otherwise.
    if !Term::stderr().is_term() {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("grove=warn,grove_cli=warn"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let cli = Cli::parse();

    let workspace = match Workspace::from_env() {
        Ok(workspace) => workspace,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let code = match cli.command {
        Commands::Sync {
            org_url,
            no_clone,
            no_update,
            no_archive,
            tidy,
        } => {
            commands::sync::run(
                workspace,
                cli.log_level,
                &org_url,
                commands::sync::Flags {
                    clone: !no_clone,
                    update: !no_update,
                    archive: !no_archive,
                    tidy,
                },
            )
            .await
        }
        Commands::Get {
            project_urls,
            update,
        } => commands::get::run(workspace, cli.log_level, &project_urls, update).await,
        Commands::List {
            dirty,
            full_path,
            archived,
        } => commands::list::run(workspace, dirty, full_path, archived).await,
        Commands::Exec { command, dir } => commands::exec::run(workspace, &command, dir).await,
        Commands::Pristine { dir } => commands::pristine::run(workspace, dir).await,
    };

    if code == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
