use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::GitHubClient;
use crate::checker::{CheckError, ExistenceChecker};

/// [`ExistenceChecker`] backed by the GitHub contents API.
///
/// The request is raced against the cancellation token so a shutdown never
/// waits on a slow GitHub response.
#[derive(Debug, Clone)]
pub struct GitHubChecker {
  client: GitHubClient,
}

impl GitHubChecker {
  pub fn new(client: GitHubClient) -> Self {
    Self { client }
  }
}

#[async_trait]
impl ExistenceChecker for GitHubChecker {
  async fn exists(&self, owner: &str, repo: &str, path: &str, cancel: &CancellationToken) -> Result<bool, CheckError> {
    tokio::select! {
      biased;

      _ = cancel.cancelled() => {
        debug!(owner, repo, "Existence check cancelled");
        Err(CheckError::Cancelled)
      }

      result = self.client.get_contents(owner, repo, path) => result.map_err(CheckError::from),
    }
  }
}
