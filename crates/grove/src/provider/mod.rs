//! Provider adapters: turn a principal reference into a stream of
//! repositories.
//!
//! The provider set is closed — GitHub, plus one GitLab adapter per
//! configured host — so it is a single enum rather than a trait
//! hierarchy. Both variants share only URL-prefix matching; listing and
//! lookup semantics are their own.

mod github;
mod gitlab;

pub use github::GitHubProvider;
pub use gitlab::GitLabProvider;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::repo_name::RepoName;

/// Extra GitLab hosts, comma-separated, registered alongside gitlab.com.
pub const GITLAB_HOSTS_ENV: &str = "GITLAB_HOSTS";

/// One repository as reported by a provider.
#[derive(Debug, Clone)]
pub struct RemoteRepo {
    /// HTTPS clone URL.
    pub clone_url: String,
    /// Whether the remote has marked the repository archived.
    pub is_archived: bool,
    /// Default branch, when the provider reports one.
    pub default_branch: Option<String>,
}

/// Errors from provider operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The principal or repository does not exist (or is invisible).
    #[error("not found: {resource}")]
    NotFound { resource: String },

    /// The provider answered with an error status.
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// The request never completed.
    #[error("network error: {message}")]
    Network { message: String },

    /// The operation observed cancellation.
    #[error("cancelled")]
    Cancelled,

    /// No registered provider matches the reference.
    #[error("no provider found for '{url}'")]
    NoProvider { url: String },

    /// The reference matched a provider but no principal could be read.
    #[error("invalid url '{url}'")]
    InvalidUrl { url: String },

    /// A bug on our side.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl ProviderError {
    #[inline]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    #[inline]
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    #[inline]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    #[inline]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this is the distinguished not-found case tidy branches on.
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network {
            message: err.to_string(),
        }
    }
}

/// Result type for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Single-repository lookup, the narrow capability the tidy pass needs.
#[async_trait]
pub trait RepoLookup: Send + Sync {
    async fn lookup(&self, name: &RepoName) -> Result<RemoteRepo>;
}

/// A registered provider adapter.
#[derive(Debug, Clone)]
pub enum GitProvider {
    GitHub(GitHubProvider),
    GitLab(GitLabProvider),
}

impl GitProvider {
    /// All providers known to this process: GitHub, gitlab.com, and every
    /// host named in `GITLAB_HOSTS`.
    pub fn known_providers() -> Vec<GitProvider> {
        let mut providers = vec![GitProvider::GitHub(GitHubProvider::new())];

        let mut hosts: Vec<String> = std::env::var(GITLAB_HOSTS_ENV)
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .collect();
        hosts.push("gitlab.com".to_string());
        hosts.sort();
        hosts.dedup();

        providers.extend(
            hosts
                .into_iter()
                .map(|host| GitProvider::GitLab(GitLabProvider::new(host))),
        );
        providers
    }

    /// Select the provider whose prefix matches the reference.
    pub fn provider_for(url: &str) -> Result<GitProvider> {
        Self::known_providers()
            .into_iter()
            .find(|p| p.matches(url))
            .ok_or_else(|| ProviderError::NoProvider {
                url: url.to_string(),
            })
    }

    /// The host this adapter serves, e.g. `github.com`.
    pub fn host(&self) -> &str {
        match self {
            GitProvider::GitHub(p) => p.host(),
            GitProvider::GitLab(p) => p.host(),
        }
    }

    /// Whether this adapter's `host/` prefix matches the reference
    /// (ignoring an `http(s)://` scheme).
    pub fn matches(&self, url: &str) -> bool {
        strip_scheme(url).starts_with(&format!("{}/", self.host()))
    }

    /// Extract the principal (user, organisation or group path) from an
    /// org URL.
    pub fn principal_from_url(&self, url: &str) -> Result<String> {
        let rest = strip_scheme(url);
        let path = rest
            .strip_prefix(&format!("{}/", self.host()))
            .ok_or_else(|| ProviderError::InvalidUrl {
                url: url.to_string(),
            })?
            .trim_matches('/');

        if path.is_empty() {
            return Err(ProviderError::InvalidUrl {
                url: url.to_string(),
            });
        }

        let principal = match self {
            // GitHub principals are a single path segment.
            GitProvider::GitHub(_) => path.split('/').next().unwrap_or(path).to_string(),
            // GitLab groups may be nested.
            GitProvider::GitLab(_) => path.to_string(),
        };
        Ok(principal)
    }

    /// Stream every accessible repository for `principal` into `tx`.
    ///
    /// When `include_archived` is false, archived repositories are
    /// omitted from the stream entirely. Cancellation is honoured
    /// between page requests.
    pub async fn list(
        &self,
        principal: &str,
        include_archived: bool,
        tx: mpsc::Sender<RemoteRepo>,
        cancel: CancellationToken,
    ) -> Result<()> {
        match self {
            GitProvider::GitHub(p) => p.list(principal, include_archived, tx, cancel).await,
            GitProvider::GitLab(p) => p.list(principal, include_archived, tx, cancel).await,
        }
    }
}

#[async_trait]
impl RepoLookup for GitProvider {
    async fn lookup(&self, name: &RepoName) -> Result<RemoteRepo> {
        match self {
            GitProvider::GitHub(p) => p.lookup(name).await,
            GitProvider::GitLab(p) => p.lookup(name).await,
        }
    }
}

fn strip_scheme(url: &str) -> &str {
    url.strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_matching_ignores_the_scheme() {
        let github = GitProvider::GitHub(GitHubProvider::new());
        assert!(github.matches("github.com/acme"));
        assert!(github.matches("https://github.com/acme"));
        assert!(github.matches("http://github.com/acme/repo"));
        assert!(!github.matches("gitlab.com/acme"));
        assert!(!github.matches("github.common/acme"));
    }

    #[test]
    fn github_principal_is_the_first_segment() {
        let github = GitProvider::GitHub(GitHubProvider::new());
        assert_eq!(
            github.principal_from_url("github.com/acme").expect("ok"),
            "acme"
        );
        assert_eq!(
            github
                .principal_from_url("https://github.com/acme/widget")
                .expect("ok"),
            "acme"
        );
        assert!(github.principal_from_url("github.com/").is_err());
    }

    #[test]
    fn gitlab_principal_keeps_subgroups() {
        let gitlab = GitProvider::GitLab(GitLabProvider::new("gitlab.com"));
        assert_eq!(
            gitlab
                .principal_from_url("gitlab.com/group/subgroup")
                .expect("ok"),
            "group/subgroup"
        );
    }

    #[test]
    fn unknown_prefixes_have_no_provider() {
        let err = GitProvider::provider_for("sourcehut.example/acme").expect_err("no match");
        assert!(matches!(err, ProviderError::NoProvider { .. }));
    }
}
