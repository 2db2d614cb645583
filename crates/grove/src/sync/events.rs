//! Progress events emitted by the sync engine.
//!
//! Workers never see the progress renderer; they only hold an
//! [`EventSink`] handed to the engine at construction. The CLI decides
//! what each event looks like per log level.

use std::sync::Arc;

/// One observable step of a sync run.
///
/// Repository names are canonical `host/path` strings.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A repository was accepted into the batch.
    Queued { name: String },
    /// A repository was cloned.
    Cloned { name: String },
    /// An existing checkout was brought up to date.
    Updated { name: String },
    /// A repository was left as-is (the relevant action is disabled).
    Skipped { name: String },
    /// A local checkout was moved to the archive subtree.
    Archived { name: String },
    /// A repository matched the ignore set and was dropped.
    Ignored { name: String },
    /// A remote-archived repository with no local checkout; dropped from
    /// the batch total.
    IgnoredArchived { name: String },
    /// A repository failed; the batch continues.
    RepoError { name: String, message: String },
    /// A shell command is about to run (echoed at debug level).
    ExecCmd { name: String, command: String },
    /// Output captured from a shell command (shown at debug level).
    ExecOutput { name: String, output: String },
    /// An informational line for the operator.
    Info { message: String },
}

/// Shared callback the engine and its workers report through.
pub type EventSink = Arc<dyn Fn(SyncEvent) + Send + Sync>;

/// Send an event to the sink.
pub fn emit(sink: &EventSink, event: SyncEvent) {
    sink(event);
}

/// A sink that drops every event.
pub fn null_sink() -> EventSink {
    Arc::new(|_| {})
}
