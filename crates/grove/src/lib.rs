//! grove - organise fleets of git repositories into a local workspace.
//!
//! Given a user, organisation or group on a supported hosting provider,
//! grove materialises every repository it owns into a uniform local
//! tree, keeps the tree in sync over repeated runs, and tidies it when
//! remote repositories are archived, renamed or deleted.
//!
//! The pipeline:
//!
//! ```text
//! provider adapter ── bounded channel ──▶ ingest filter ──▶ worker pool
//!                                                             │
//!                                              clone / update / archive / skip
//! ```
//!
//! # Example
//!
//! ```ignore
//! use grove::provider::GitProvider;
//! use grove::sync::{SyncEngine, SyncOptions, QUEUE_CAPACITY};
//!
//! let provider = GitProvider::provider_for("github.com/acme")?;
//! let (tx, rx) = tokio::sync::mpsc::channel(QUEUE_CAPACITY);
//! tokio::spawn(async move { provider.list("acme", true, tx, cancel).await });
//! let summary = engine.run(rx).await;
//! ```

pub mod auth;
pub mod git;
pub mod provider;
pub mod repo_name;
pub mod sync;
pub mod workspace;

pub use repo_name::{RepoName, RepoNameError};
pub use workspace::{IgnoreSet, Workspace, WorkspaceError};
