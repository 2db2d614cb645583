//! The `sync` subcommand: the orchestrator.
//!
//! Wires provider → bounded channel → engine, installs the signal
//! handler, and runs the optional tidy pass once the pool has drained.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use grove::git::SystemGitRunner;
use grove::provider::{GitProvider, ProviderError};
use grove::sync::tidy::{ProcessedSet, TidyWalker};
use grove::sync::{SyncEngine, SyncOptions, QUEUE_CAPACITY};
use grove::workspace::{IgnoreSet, Workspace};

use crate::progress::{LogLevel, ProgressLogger};
use crate::shutdown;

pub struct Flags {
    pub clone: bool,
    pub update: bool,
    pub archive: bool,
    pub tidy: bool,
}

pub async fn run(workspace: Workspace, level: LogLevel, org_url: &str, flags: Flags) -> i32 {
    let provider = match GitProvider::provider_for(org_url) {
        Ok(provider) => provider,
        Err(err) => {
            eprintln!("{err}");
            return 1;
        }
    };
    let principal = match provider.principal_from_url(org_url) {
        Ok(principal) => principal,
        Err(err) => {
            eprintln!("{err}");
            return 1;
        }
    };

    let workspace = Arc::new(workspace);
    let cancel = CancellationToken::new();
    let logger = ProgressLogger::new(level, cancel.clone());
    shutdown::install(cancel.clone(), Arc::clone(&logger));

    let ignores = IgnoreSet::load(&workspace);
    let options = SyncOptions {
        clone: flags.clone,
        update: flags.update,
        archive: flags.archive,
    };

    // Archived repositories are only worth fetching when we may act on
    // them; otherwise the provider filters them out of the stream.
    let include_archived = flags.archive;

    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    let listing = {
        let provider = provider.clone();
        let principal = principal.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { provider.list(&principal, include_archived, tx, cancel).await })
    };

    let engine = SyncEngine::new(
        Arc::clone(&workspace),
        ignores,
        Arc::new(SystemGitRunner),
        logger.sink(),
        options,
        cancel.clone(),
    );
    let summary = engine.run(rx).await;

    let listing_result = match listing.await {
        Ok(result) => result,
        Err(join_err) => Err(ProviderError::internal(join_err.to_string())),
    };

    let mut failed = !summary.errors.is_empty();
    match listing_result {
        Ok(()) | Err(ProviderError::Cancelled) => {}
        Err(err) => {
            logger.info(&format!("error listing repositories: {err}"));
            failed = true;
        }
    }

    if flags.tidy && !cancel.is_cancelled() {
        let processed = ProcessedSet::new(summary.processed.iter().cloned());
        let walker = TidyWalker::new(
            Arc::clone(&workspace),
            Arc::new(provider.clone()),
            processed,
            logger.sink(),
        );
        let start_rel = format!("{}/{}", provider.host(), principal);
        let tidy_summary = walker.run(&start_rel, &cancel).await;
        failed |= !tidy_summary.errors.is_empty();
    }

    if cancel.is_cancelled() {
        // The signal handler already finalised the line.
        return 1;
    }

    logger.end_progress_line(if failed { "didn't fully complete" } else { "done" });
    i32::from(failed)
}
