//! GitHub listing adapter.
//!
//! Listing probes `/orgs/{principal}` first; organisations are listed
//! through the org endpoint, anything else falls back to the user
//! endpoint. Pages follow the `Link` header `rel="next"` chain until it
//! runs out.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, LINK, USER_AGENT};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{ProviderError, RemoteRepo, Result};
use crate::auth;
use crate::repo_name::RepoName;

const API_ROOT: &str = "https://api.github.com";
const PAGE_SIZE: u32 = 100;

/// Machine name tokens are filed under in `~/.netrc`.
const NETRC_MACHINE: &str = "api.github.com";

/// The github.com adapter.
#[derive(Debug, Clone)]
pub struct GitHubProvider {
    host: String,
}

/// Repository shape shared by the org, user and single-repo endpoints.
#[derive(Debug, Deserialize)]
struct GitHubRepo {
    clone_url: String,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    default_branch: Option<String>,
}

impl From<GitHubRepo> for RemoteRepo {
    fn from(repo: GitHubRepo) -> Self {
        RemoteRepo {
            clone_url: repo.clone_url,
            is_archived: repo.archived,
            default_branch: repo.default_branch,
        }
    }
}

impl Default for GitHubProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl GitHubProvider {
    pub fn new() -> Self {
        Self {
            host: "github.com".to_string(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn client(&self) -> Result<reqwest::Client> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("grove"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        // A token that will not fit in a header is as good as no token.
        if let Some(token) = auth::netrc_password(NETRC_MACHINE) {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
                headers.insert(AUTHORIZATION, value);
            }
        }

        reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(ProviderError::from)
    }

    /// Stream every repository of `principal`.
    pub async fn list(
        &self,
        principal: &str,
        include_archived: bool,
        tx: mpsc::Sender<RemoteRepo>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let client = self.client()?;

        let route = if self.is_org(&client, principal).await {
            format!("{API_ROOT}/orgs/{principal}/repos")
        } else {
            format!("{API_ROOT}/users/{principal}/repos")
        };

        let mut page = 1u32;
        loop {
            if cancel.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }

            let url = format!("{route}?per_page={PAGE_SIZE}&page={page}");
            tracing::debug!(url = %url, "fetching repository page");

            let response = client.get(&url).send().await?;
            let status = response.status();
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(ProviderError::not_found(principal));
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ProviderError::api(status.as_u16(), snippet(&body)));
            }

            let next = response
                .headers()
                .get(LINK)
                .and_then(|v| v.to_str().ok())
                .and_then(next_page_from_link);

            let repos: Vec<GitHubRepo> = response.json().await?;
            for repo in repos {
                if repo.archived && !include_archived {
                    continue;
                }
                if tx.send(repo.into()).await.is_err() {
                    // Receiver gone: the run is shutting down.
                    return Err(ProviderError::Cancelled);
                }
            }

            match next {
                Some(next_page) => page = next_page,
                None => break,
            }
        }

        Ok(())
    }

    /// Single-repository lookup for the tidy pass.
    pub async fn lookup(&self, name: &RepoName) -> Result<RemoteRepo> {
        let client = self.client()?;
        let url = format!("{API_ROOT}/repos/{}", name.path());

        let response = client.get(&url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ProviderError::not_found(name.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::api(status.as_u16(), snippet(&body)));
        }

        let repo: GitHubRepo = response.json().await?;
        Ok(repo.into())
    }

    async fn is_org(&self, client: &reqwest::Client, principal: &str) -> bool {
        let url = format!("{API_ROOT}/orgs/{principal}");
        match client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

/// Extract the `rel="next"` page number from a `Link` header.
///
/// GitHub Link headers look like:
/// `<https://api.github.com/...repos?per_page=100&page=2>; rel="next",
///  <...&page=7>; rel="last"`
fn next_page_from_link(value: &str) -> Option<u32> {
    for part in value.split(',') {
        let part = part.trim();

        let mut url = None;
        let mut rel = None;
        for segment in part.split(';') {
            let segment = segment.trim();
            if segment.starts_with('<') && segment.ends_with('>') {
                url = Some(&segment[1..segment.len() - 1]);
            } else if let Some(rel_value) = segment.strip_prefix("rel=") {
                rel = Some(rel_value.trim_matches('"'));
            }
        }

        if rel == Some("next") {
            return url.and_then(page_param);
        }
    }
    None
}

fn page_param(url: &str) -> Option<u32> {
    let query = &url[url.find('?')? + 1..];
    query
        .split('&')
        .find_map(|param| param.strip_prefix("page="))
        .and_then(|value| value.parse().ok())
}

fn snippet(body: &str) -> String {
    const LIMIT: usize = 200;
    let line = body.lines().next().unwrap_or_default();
    if line.chars().count() > LIMIT {
        let truncated: String = line.chars().take(LIMIT).collect();
        format!("{truncated}...")
    } else {
        line.to_string()
    }
}
