//! The on-disk workspace.
//!
//! Every repository lives at `<root>/<host>/<path>`. Two reserved
//! subtrees hold repositories the sync has moved aside: `.archive` for
//! remotes marked archived, and `.trash` for local directories the tidy
//! pass could no longer find on the remote. An optional `.groveignore`
//! file at the root carries gitignore-style patterns matched against
//! canonical `host/path` names.

use std::io;
use std::path::{Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use thiserror::Error;
use walkdir::WalkDir;

use crate::repo_name::RepoName;

/// Environment variable overriding the workspace root.
pub const WORKSPACE_ENV: &str = "GROVE_WORKSPACE";

/// Subtree for repositories whose remote is archived.
pub const ARCHIVE_DIR: &str = ".archive";

/// Subtree for repositories tidied out of the workspace.
pub const TRASH_DIR: &str = ".trash";

/// Ignore-pattern file at the workspace root.
pub const IGNORE_FILE: &str = ".groveignore";

const DEFAULT_DIR_NAME: &str = "grove";

/// Errors from workspace resolution and filesystem moves.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// The home directory could not be determined and no override was set.
    #[error("cannot determine home directory; set {WORKSPACE_ENV}")]
    NoHome,

    /// A move was refused because the destination already exists.
    #[error("destination already exists: {}", dst.display())]
    DestinationExists { dst: PathBuf },

    /// An underlying filesystem operation failed.
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The process-wide workspace root. Read-only after construction.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Resolve the workspace from `GROVE_WORKSPACE`, falling back to
    /// `~/grove`.
    pub fn from_env() -> Result<Self, WorkspaceError> {
        if let Ok(root) = std::env::var(WORKSPACE_ENV) {
            if !root.is_empty() {
                return Ok(Self::new(PathBuf::from(root)));
            }
        }

        let dirs = directories::UserDirs::new().ok_or(WorkspaceError::NoHome)?;
        Ok(Self::new(dirs.home_dir().join(DEFAULT_DIR_NAME)))
    }

    /// A workspace rooted at an explicit path.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical on-disk location of a repository.
    pub fn repo_path(&self, name: &RepoName) -> PathBuf {
        join_name(&self.root, name)
    }

    /// Location a repository is moved to when its remote is archived.
    pub fn archive_path(&self, name: &RepoName) -> PathBuf {
        join_name(&self.root.join(ARCHIVE_DIR), name)
    }

    /// Location a repository is moved to when tidy can no longer find it.
    pub fn trash_path(&self, name: &RepoName) -> PathBuf {
        join_name(&self.root.join(TRASH_DIR), name)
    }

    /// Trash location for an arbitrary workspace-relative directory.
    pub fn trash_path_for(&self, rel: &str) -> PathBuf {
        join_rel(&self.root.join(TRASH_DIR), rel)
    }

    /// Absolute path for a workspace-relative name like `host/path`.
    pub fn path_for(&self, rel: &str) -> PathBuf {
        join_rel(&self.root, rel)
    }

    /// Workspace-relative name of a path, with forward slashes on every
    /// platform so it can be compared against canonical `host/path` names.
    pub fn rel_name(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if parts.is_empty() {
            return None;
        }
        Some(parts.join("/"))
    }
}

fn join_name(base: &Path, name: &RepoName) -> PathBuf {
    let mut path = base.join(name.host());
    for segment in name.path().split('/') {
        path.push(segment);
    }
    path
}

fn join_rel(base: &Path, rel: &str) -> PathBuf {
    let mut path = base.to_path_buf();
    for segment in rel.split('/').filter(|s| !s.is_empty()) {
        path.push(segment);
    }
    path
}

/// Move a directory, refusing to clobber an existing destination.
///
/// The existence check races against other processes by design; the only
/// realistic racer is another invocation of this tool by the same user.
pub fn move_dir(src: &Path, dst: &Path) -> Result<(), WorkspaceError> {
    if dst.exists() {
        return Err(WorkspaceError::DestinationExists {
            dst: dst.to_path_buf(),
        });
    }
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent).map_err(|source| WorkspaceError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    std::fs::rename(src, dst).map_err(|source| WorkspaceError::Io {
        path: src.to_path_buf(),
        source,
    })
}

/// Collect every git directory under `base`, skipping the reserved
/// subtrees and not descending into repositories.
///
/// Returns absolute paths. A missing `base` yields an empty list.
pub fn git_dirs_under(base: &Path) -> io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    if !base.is_dir() {
        return Ok(dirs);
    }

    let mut walker = WalkDir::new(base).min_depth(1).into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry.map_err(io::Error::other)?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy();
        if file_name == ARCHIVE_DIR || file_name == TRASH_DIR || file_name == ".git" {
            walker.skip_current_dir();
            continue;
        }
        if entry.path().join(".git").is_dir() {
            dirs.push(entry.path().to_path_buf());
            walker.skip_current_dir();
        }
    }

    Ok(dirs)
}

/// Ignore patterns matched against canonical `host/path` names.
///
/// Patterns use gitignore syntax. A missing ignore file is an empty set.
pub struct IgnoreSet {
    matcher: Option<Gitignore>,
}

impl IgnoreSet {
    /// Load `<root>/.groveignore`.
    pub fn load(workspace: &Workspace) -> Self {
        let path = workspace.root().join(IGNORE_FILE);
        match std::fs::read_to_string(&path) {
            Ok(contents) => Self::from_patterns(contents.lines()),
            Err(_) => Self { matcher: None },
        }
    }

    /// Build a set from pattern lines.
    pub fn from_patterns<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Self {
        let mut builder = GitignoreBuilder::new("");
        let mut any = false;
        for line in patterns {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if builder.add_line(None, line).is_ok() {
                any = true;
            }
        }
        if !any {
            return Self { matcher: None };
        }
        Self {
            matcher: builder.build().ok(),
        }
    }

    /// Whether a canonical name matches the ignore set.
    pub fn is_ignored(&self, name: &RepoName) -> bool {
        match &self.matcher {
            Some(matcher) => matcher
                .matched(name.to_string(), true)
                .is_ignore(),
            None => false,
        }
    }
}
