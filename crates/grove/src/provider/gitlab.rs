//! GitLab listing adapter.
//!
//! Groups are tried first (including subgroups, developer access and
//! up); a not-found falls back to the user projects endpoint. Pages are
//! ordered `id desc` — newer projects first, and statistically fewer
//! archived ones — and fetched by a small pool of in-flight requests
//! that cancels the rest on the first error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::{ProviderError, RemoteRepo, Result};
use crate::auth;
use crate::repo_name::RepoName;

const PAGE_SIZE: usize = 100;

/// In-flight page requests per listing.
const PAGE_WORKERS: usize = 3;

/// A GitLab host adapter (gitlab.com or a self-hosted instance).
#[derive(Debug, Clone)]
pub struct GitLabProvider {
    host: String,
}

#[derive(Debug, Deserialize)]
struct GitLabProject {
    http_url_to_repo: String,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    default_branch: Option<String>,
    #[serde(default)]
    repository_access_level: Option<String>,
}

impl GitLabProject {
    fn has_repository(&self) -> bool {
        self.repository_access_level.as_deref() != Some("disabled")
    }
}

impl From<GitLabProject> for RemoteRepo {
    fn from(project: GitLabProject) -> Self {
        RemoteRepo {
            clone_url: project.http_url_to_repo,
            is_archived: project.archived,
            default_branch: project.default_branch,
        }
    }
}

impl GitLabProvider {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn api_root(&self) -> String {
        format!("https://{}/api/v4", self.host)
    }

    fn client(&self) -> Result<reqwest::Client> {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            HeaderValue::from_static("grove"),
        );
        if let Some(token) = auth::netrc_password(&self.host) {
            if let Ok(value) = HeaderValue::from_str(&token) {
                headers.insert("PRIVATE-TOKEN", value);
            }
        }

        reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(ProviderError::from)
    }

    /// Stream every accessible project for `principal`.
    pub async fn list(
        &self,
        principal: &str,
        include_archived: bool,
        tx: mpsc::Sender<RemoteRepo>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let group_route = format!(
            "{}/groups/{}/projects?per_page={PAGE_SIZE}&order_by=id&sort=desc\
             &include_subgroups=true&min_access_level=30",
            self.api_root(),
            encode(principal),
        );

        match self
            .list_pages(group_route, include_archived, tx.clone(), cancel.clone())
            .await
        {
            Err(err) if err.is_not_found() => {
                tracing::debug!(principal, "group not found, listing as user");
                let user_route = format!(
                    "{}/users/{}/projects?per_page={PAGE_SIZE}&order_by=id&sort=desc\
                     &min_access_level=30",
                    self.api_root(),
                    encode(principal),
                );
                self.list_pages(user_route, include_archived, tx, cancel)
                    .await
            }
            result => result,
        }
    }

    /// Single-project lookup for the tidy pass.
    pub async fn lookup(&self, name: &RepoName) -> Result<RemoteRepo> {
        let client = self.client()?;
        let url = format!("{}/projects/{}", self.api_root(), encode(name.path()));

        let response = client.get(&url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ProviderError::not_found(name.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::api(
                status.as_u16(),
                body.lines().next().unwrap_or_default().to_string(),
            ));
        }

        let project: GitLabProject = response.json().await?;
        Ok(project.into())
    }

    /// Fetch pages of `route` with a small request pool.
    ///
    /// Page numbers are scheduled optimistically; a worker that sees the
    /// end of the listing (or a send failure) stops further scheduling,
    /// and the first error cancels the requests still in flight.
    async fn list_pages(
        &self,
        route: String,
        include_archived: bool,
        tx: mpsc::Sender<RemoteRepo>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let route = if include_archived {
            route
        } else {
            format!("{route}&archived=false")
        };

        let client = self.client()?;
        let pool_cancel = cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(PAGE_WORKERS));
        let no_more = Arc::new(AtomicBool::new(false));
        let mut requests: JoinSet<Result<()>> = JoinSet::new();

        let mut page = 1u32;
        loop {
            if no_more.load(Ordering::Acquire) || pool_cancel.is_cancelled() {
                break;
            }

            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let url = format!("{route}&page={page}");
            let client = client.clone();
            let tx = tx.clone();
            let no_more = Arc::clone(&no_more);
            let pool_cancel = pool_cancel.clone();

            requests.spawn(async move {
                let _permit = permit;
                if pool_cancel.is_cancelled() {
                    return Err(ProviderError::Cancelled);
                }

                tracing::debug!(url = %url, "fetching project page");
                let outcome = fetch_page(&client, &url, include_archived, &tx, &no_more).await;
                if outcome.is_err() {
                    no_more.store(true, Ordering::Release);
                    pool_cancel.cancel();
                }
                outcome
            });

            page += 1;
        }

        let mut result = Ok(());
        while let Some(joined) = requests.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    // Keep the first real error; cancellations of the
                    // remaining requests are a consequence, not a cause.
                    if result.is_ok() && !matches!(err, ProviderError::Cancelled) {
                        result = Err(err);
                    }
                }
                Err(join_err) => {
                    if result.is_ok() {
                        result = Err(ProviderError::internal(join_err.to_string()));
                    }
                }
            }
        }

        if result.is_ok() && cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        result
    }
}

async fn fetch_page(
    client: &reqwest::Client,
    url: &str,
    include_archived: bool,
    tx: &mpsc::Sender<RemoteRepo>,
    no_more: &AtomicBool,
) -> Result<()> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ProviderError::not_found(url.to_string()));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::api(
            status.as_u16(),
            body.lines().next().unwrap_or_default().to_string(),
        ));
    }

    let next_page = response
        .headers()
        .get("x-next-page")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .is_some();

    let projects: Vec<GitLabProject> = response.json().await?;
    if !next_page || projects.len() < PAGE_SIZE {
        no_more.store(true, Ordering::Release);
    }

    for project in projects {
        if !project.has_repository() {
            continue;
        }
        if project.archived && !include_archived {
            continue;
        }
        if tx.send(project.into()).await.is_err() {
            no_more.store(true, Ordering::Release);
            return Err(ProviderError::Cancelled);
        }
    }

    Ok(())
}

fn encode(path: &str) -> String {
    utf8_percent_encode(path, NON_ALPHANUMERIC).to_string()
}
