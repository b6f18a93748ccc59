//! Shared test doubles.
//!
//! - `MockGitHub`: a local axum server answering the two GitHub endpoints the
//!   crate calls, with scriptable contents, org pages and forced failures
//! - `ScriptedChecker` / `BlockingChecker`: in-process `ExistenceChecker`s
//! - record and config builders plus polling helpers

use std::{
  collections::{HashMap, HashSet},
  sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
  },
  time::Duration,
};

use async_trait::async_trait;
use axum::{
  Json,
  extract::{Path, Query, State},
  http::{HeaderMap, HeaderValue, StatusCode, header},
  response::{IntoResponse, Response},
  routing::get,
};
use bytes::Bytes;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::{
  bus::MemoryBus,
  checker::{CheckError, ExistenceChecker},
  config::GitHubConfig,
  github::GitHubError,
  pipeline::PipelineOptions,
  record::RepositoryRecord,
  router::RouteConfig,
};

// ============================================================================
// Builders
// ============================================================================

pub fn github_config(api_url: &str) -> GitHubConfig {
  GitHubConfig {
    org: "testorg".to_string(),
    token: "test-token".to_string(),
    api_url: api_url.to_string(),
    request_timeout_secs: 5,
  }
}

pub fn route_config() -> RouteConfig {
  RouteConfig {
    valid_subject: "repos.valid".to_string(),
    invalid_subject: "repos.invalid".to_string(),
    probe_path: crate::DEFAULT_PROBE_PATH.to_string(),
  }
}

/// Options with a short drain idle timeout so tests finish quickly.
pub fn pipeline_options() -> PipelineOptions {
  PipelineOptions {
    source_subject: "github.repositories".to_string(),
    routes: route_config(),
    process_startup_messages: true,
    drain_idle_timeout: Duration::from_millis(100),
    max_in_flight: 64,
  }
}

pub fn record_bytes(name: &str, clone_url: &str) -> Bytes {
  let record = RepositoryRecord {
    name: name.to_string(),
    clone_url: clone_url.to_string(),
    https_url: clone_url.to_string(),
    ..Default::default()
  };
  Bytes::from(record.encode().expect("encode record"))
}

/// Record for `acme/{name}` on the default host.
pub fn acme_record(name: &str) -> Bytes {
  record_bytes(name, &format!("https://github.com/acme/{name}.git"))
}

// ============================================================================
// Polling
// ============================================================================

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn wait_for<F, Fut>(timeout: Duration, mut check: F) -> bool
where
  F: FnMut() -> Fut,
  Fut: std::future::Future<Output = bool>,
{
  let start = std::time::Instant::now();
  let poll_interval = Duration::from_millis(20);

  while start.elapsed() < timeout {
    if check().await {
      return true;
    }
    tokio::time::sleep(poll_interval).await;
  }

  false
}

/// Wait until at least `count` payloads have been published to `subject`.
pub async fn wait_for_published(bus: &MemoryBus, subject: &str, count: usize) -> bool {
  let bus = bus.clone();
  let subject = subject.to_string();
  wait_for(Duration::from_secs(5), move || {
    let bus = bus.clone();
    let subject = subject.clone();
    async move { bus.published(&subject).len() >= count }
  })
  .await
}

// ============================================================================
// Checkers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
  Exists,
  Missing,
  Fail,
}

pub type CallLog = Arc<Mutex<Vec<(String, String, String)>>>;

/// Answers from a script and records every call in order.
pub struct ScriptedChecker {
  default: Answer,
  overrides: HashMap<String, Answer>,
  calls: CallLog,
}

impl ScriptedChecker {
  pub fn new(default: Answer) -> Self {
    Self {
      default,
      overrides: HashMap::new(),
      calls: Arc::default(),
    }
  }

  /// Answer `answer` for repository `repo` regardless of the default.
  pub fn with(mut self, repo: &str, answer: Answer) -> Self {
    self.overrides.insert(repo.to_string(), answer);
    self
  }

  pub fn calls(&self) -> CallLog {
    Arc::clone(&self.calls)
  }
}

#[async_trait]
impl ExistenceChecker for ScriptedChecker {
  async fn exists(&self, owner: &str, repo: &str, path: &str, _cancel: &CancellationToken) -> Result<bool, CheckError> {
    self
      .calls
      .lock()
      .unwrap()
      .push((owner.to_string(), repo.to_string(), path.to_string()));

    match self.overrides.get(repo).copied().unwrap_or(self.default) {
      Answer::Exists => Ok(true),
      Answer::Missing => Ok(false),
      Answer::Fail => Err(CheckError::GitHub(GitHubError::Network("connection reset".to_string()))),
    }
  }
}

/// Holds every call until the test releases it, ignoring cancellation.
///
/// Lets a test put a known number of units in flight and observe what the
/// controller does while they are stuck.
#[derive(Clone)]
pub struct BlockingChecker {
  gate: Arc<Semaphore>,
  started: Arc<AtomicUsize>,
}

impl BlockingChecker {
  pub fn new() -> Self {
    Self {
      gate: Arc::new(Semaphore::new(0)),
      started: Arc::default(),
    }
  }

  pub fn started(&self) -> usize {
    self.started.load(Ordering::SeqCst)
  }

  /// Let `n` blocked calls finish.
  pub fn release(&self, n: usize) {
    self.gate.add_permits(n);
  }

  pub async fn wait_started(&self, n: usize) -> bool {
    let this = self.clone();
    wait_for(Duration::from_secs(5), move || {
      let this = this.clone();
      async move { this.started() >= n }
    })
    .await
  }
}

#[async_trait]
impl ExistenceChecker for BlockingChecker {
  async fn exists(&self, _owner: &str, _repo: &str, _path: &str, _cancel: &CancellationToken) -> Result<bool, CheckError> {
    self.started.fetch_add(1, Ordering::SeqCst);
    let permit = self.gate.acquire().await.map_err(|e| CheckError::Other(e.to_string()))?;
    permit.forget();
    Ok(true)
  }
}

// ============================================================================
// Mock GitHub API
// ============================================================================

#[derive(Default)]
struct MockState {
  base_url: String,
  paths: HashSet<String>,
  org_pages: HashMap<String, Vec<Vec<String>>>,
  forced_status: Option<u16>,
  last_authorization: Option<String>,
}

type Shared = Arc<Mutex<MockState>>;

/// Local stand-in for `api.github.com`.
pub struct MockGitHub {
  pub url: String,
  state: Shared,
}

impl MockGitHub {
  pub async fn start() -> Self {
    let state: Shared = Arc::default();
    let app = axum::Router::new()
      .route("/repos/{owner}/{repo}/contents/{*path}", get(contents))
      .route("/orgs/{org}/repos", get(org_repos))
      .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind mock");
    let url = format!("http://{}", listener.local_addr().expect("local addr"));
    state.lock().unwrap().base_url = url.clone();

    tokio::spawn(async move {
      axum::serve(listener, app).await.expect("mock server");
    });

    Self { url, state }
  }

  /// Make `owner/repo` contain `path`.
  pub fn add_path(&self, owner: &str, repo: &str, path: &str) {
    self.state.lock().unwrap().paths.insert(format!("{owner}/{repo}/{path}"));
  }

  /// Serve `org`'s repositories split into the given pages.
  pub fn set_org_pages(&self, org: &str, pages: Vec<Vec<&str>>) {
    let pages = pages
      .into_iter()
      .map(|page| page.into_iter().map(str::to_string).collect())
      .collect();
    self.state.lock().unwrap().org_pages.insert(org.to_string(), pages);
  }

  /// Answer every request with `status`.
  pub fn respond_with(&self, status: u16) {
    self.state.lock().unwrap().forced_status = Some(status);
  }

  pub fn last_authorization(&self) -> Option<String> {
    self.state.lock().unwrap().last_authorization.clone()
  }
}

fn note_auth(state: &mut MockState, headers: &HeaderMap) {
  state.last_authorization = headers
    .get(header::AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .map(str::to_string);
}

fn forced(state: &MockState) -> Option<Response> {
  let status = StatusCode::from_u16(state.forced_status?).ok()?;
  Some((status, Json(serde_json::json!({ "message": "forced failure" }))).into_response())
}

async fn contents(
  State(state): State<Shared>,
  Path((owner, repo, path)): Path<(String, String, String)>,
  headers: HeaderMap,
) -> Response {
  let mut state = state.lock().unwrap();
  note_auth(&mut state, &headers);
  if let Some(response) = forced(&state) {
    return response;
  }

  if state.paths.contains(&format!("{owner}/{repo}/{path}")) {
    Json(serde_json::json!({ "type": "file", "name": path, "path": path })).into_response()
  } else {
    (StatusCode::NOT_FOUND, Json(serde_json::json!({ "message": "Not Found" }))).into_response()
  }
}

async fn org_repos(
  State(state): State<Shared>,
  Path(org): Path<String>,
  Query(query): Query<HashMap<String, String>>,
  headers: HeaderMap,
) -> Response {
  let mut state = state.lock().unwrap();
  note_auth(&mut state, &headers);
  if let Some(response) = forced(&state) {
    return response;
  }

  let Some(pages) = state.org_pages.get(&org) else {
    return (StatusCode::NOT_FOUND, Json(serde_json::json!({ "message": "Not Found" }))).into_response();
  };

  let page: usize = query.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
  let names = pages.get(page.saturating_sub(1)).cloned().unwrap_or_default();
  let body: Vec<serde_json::Value> = names
    .iter()
    .map(|name| {
      serde_json::json!({
        "name": name,
        "clone_url": format!("https://github.com/{org}/{name}.git"),
        "ssh_url": format!("git@github.com:{org}/{name}.git"),
        "created_at": "2023-01-01T00:00:00Z",
        "updated_at": "2024-01-01T00:00:00Z",
        "language": null,
        "topics": []
      })
    })
    .collect();

  let mut response_headers = HeaderMap::new();
  if page < pages.len() {
    let link = format!(
      "<{}/orgs/{}/repos?per_page=100&page={}>; rel=\"next\"",
      state.base_url,
      org,
      page + 1
    );
    if let Ok(value) = HeaderValue::from_str(&link) {
      response_headers.insert(header::LINK, value);
    }
  }

  (response_headers, Json(body)).into_response()
}
