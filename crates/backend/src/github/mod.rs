//! Minimal GitHub REST client.
//!
//! Covers the two calls the pipeline makes: probing a repository path
//! (validator) and listing an organization's repositories (collector).

mod checker;

use std::time::Instant;

use chrono::{DateTime, Utc};
use reqwest::{
  Response, StatusCode, Url,
  header::{ACCEPT, HeaderMap, LINK},
};
use serde::Deserialize;
use tracing::{debug, error, trace, warn};

pub use checker::GitHubChecker;

use crate::{config::GitHubConfig, record::RepositoryRecord};

const USER_AGENT: &str = concat!("secflow/", env!("CARGO_PKG_VERSION"));
const API_VERSION: &str = "2022-11-28";
const PER_PAGE: u32 = 100;
const MAX_ERROR_BODY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum GitHubError {
  #[error("No GitHub token configured")]
  NoToken,
  #[error("Failed to build HTTP client: {0}")]
  Client(#[source] reqwest::Error),
  #[error("Invalid GitHub API URL {0:?}")]
  InvalidUrl(String),
  #[error("GitHub authentication failed ({status}): {body}")]
  Unauthorized { status: u16, body: String },
  #[error("GitHub rate limit exceeded (resets at {reset_at:?})")]
  RateLimited { reset_at: Option<u64> },
  #[error("GitHub returned {status}: {body}")]
  Status { status: u16, body: String },
  #[error("Network error: {0}")]
  Network(String),
  #[error("Request timed out")]
  Timeout,
  #[error("Failed to decode GitHub response: {0}")]
  Decode(String),
}

impl GitHubError {
  fn from_transport(e: reqwest::Error) -> Self {
    if e.is_timeout() {
      Self::Timeout
    } else {
      Self::Network(e.to_string())
    }
  }

  async fn from_response(response: Response) -> Self {
    let status = response.status();
    let remaining = header_value(response.headers(), "x-ratelimit-remaining");
    let reset_at = header_value(response.headers(), "x-ratelimit-reset").and_then(|v| v.parse().ok());
    let body: String = response
      .text()
      .await
      .unwrap_or_default()
      .chars()
      .take(MAX_ERROR_BODY)
      .collect();

    let rate_limited = status == StatusCode::TOO_MANY_REQUESTS
      || (status == StatusCode::FORBIDDEN && remaining.as_deref() == Some("0"));

    if rate_limited {
      warn!(status = %status, reset_at, "GitHub rate limit exceeded");
      Self::RateLimited { reset_at }
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
      error!(status = %status, "GitHub authentication failed");
      Self::Unauthorized {
        status: status.as_u16(),
        body,
      }
    } else {
      Self::Status {
        status: status.as_u16(),
        body,
      }
    }
  }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
  headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

/// Extract the `rel="next"` target from a `Link` header.
fn next_page_url(headers: &HeaderMap) -> Option<String> {
  let link = headers.get(LINK)?.to_str().ok()?;
  link.split(',').find_map(|part| {
    let mut pieces = part.split(';');
    let target = pieces.next()?.trim();
    let is_next = pieces.any(|param| param.trim() == "rel=\"next\"");
    if !is_next {
      return None;
    }
    target
      .strip_prefix('<')
      .and_then(|t| t.strip_suffix('>'))
      .map(str::to_string)
  })
}

/// Repository object as returned by `GET /orgs/{org}/repos`.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubRepository {
  pub name: String,
  #[serde(default)]
  pub clone_url: Option<String>,
  #[serde(default)]
  pub ssh_url: Option<String>,
  #[serde(default)]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub updated_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub language: Option<String>,
  #[serde(default)]
  pub topics: Option<Vec<String>>,
}

impl From<GitHubRepository> for RepositoryRecord {
  fn from(repo: GitHubRepository) -> Self {
    let clone_url = repo.clone_url.unwrap_or_default();
    Self {
      name: repo.name,
      https_url: clone_url.clone(),
      clone_url,
      ssh_url: repo.ssh_url.unwrap_or_default(),
      created_at: repo.created_at.unwrap_or_default(),
      updated_at: repo.updated_at.unwrap_or_default(),
      language: repo.language.unwrap_or_default(),
      topics: repo.topics.unwrap_or_default(),
    }
  }
}

/// Authenticated GitHub API client. Cheap to clone.
#[derive(Debug, Clone)]
pub struct GitHubClient {
  client: reqwest::Client,
  api_url: String,
  token: String,
}

impl GitHubClient {
  pub fn new(config: &GitHubConfig) -> Result<Self, GitHubError> {
    if config.token.is_empty() {
      return Err(GitHubError::NoToken);
    }

    let client = reqwest::Client::builder()
      .user_agent(USER_AGENT)
      .timeout(config.request_timeout())
      .build()
      .map_err(GitHubError::Client)?;

    Ok(Self {
      client,
      api_url: config.api_url.trim_end_matches('/').to_string(),
      token: config.token.clone(),
    })
  }

  pub fn api_url(&self) -> &str {
    &self.api_url
  }

  /// `{api_url}/repos/{owner}/{repo}/contents/{path}` with every segment
  /// percent-encoded, so no argument can change which endpoint is hit.
  fn contents_url(&self, owner: &str, repo: &str, path: &str) -> Result<Url, GitHubError> {
    let mut url = Url::parse(&self.api_url).map_err(|_| GitHubError::InvalidUrl(self.api_url.clone()))?;
    url
      .path_segments_mut()
      .map_err(|_| GitHubError::InvalidUrl(self.api_url.clone()))?
      .pop_if_empty()
      .extend(["repos", owner, repo, "contents"])
      .extend(path.split('/').filter(|segment| !segment.is_empty()));
    Ok(url)
  }

  async fn get(&self, url: impl reqwest::IntoUrl) -> Result<Response, GitHubError> {
    self
      .client
      .get(url)
      .bearer_auth(&self.token)
      .header(ACCEPT, "application/vnd.github+json")
      .header("X-GitHub-Api-Version", API_VERSION)
      .send()
      .await
      .map_err(GitHubError::from_transport)
  }

  /// Check whether `path` exists in the default branch of `owner/repo`.
  ///
  /// Any successful contents response counts, file or directory. A 404 is
  /// answered with `Ok(false)`; every other failure is an error.
  pub async fn get_contents(&self, owner: &str, repo: &str, path: &str) -> Result<bool, GitHubError> {
    let url = self.contents_url(owner, repo, path)?;

    let start = Instant::now();
    let response = self.get(url).await?;
    let status = response.status();
    trace!(owner, repo, path, status = %status, elapsed_ms = start.elapsed().as_millis(), "Contents response");

    if status.is_success() {
      return Ok(true);
    }
    if status == StatusCode::NOT_FOUND {
      return Ok(false);
    }
    Err(GitHubError::from_response(response).await)
  }

  /// List every repository of `org`, following pagination to the end.
  pub async fn list_org_repos(&self, org: &str) -> Result<Vec<GitHubRepository>, GitHubError> {
    let mut next = Some(format!("{}/orgs/{}/repos?per_page={}", self.api_url, org, PER_PAGE));
    let mut repos = Vec::new();
    let mut pages = 0usize;

    while let Some(url) = next.take() {
      let response = self.get(url).await?;
      if !response.status().is_success() {
        return Err(GitHubError::from_response(response).await);
      }

      next = next_page_url(response.headers());
      let page: Vec<GitHubRepository> = response
        .json()
        .await
        .map_err(|e| GitHubError::Decode(e.to_string()))?;

      pages += 1;
      trace!(org, page = pages, count = page.len(), has_next = next.is_some(), "Fetched repository page");
      repos.extend(page);
    }

    debug!(org, pages, total = repos.len(), "Listed organization repositories");
    Ok(repos)
  }
}
