use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::github::GitHubError;

#[derive(Debug, thiserror::Error)]
pub enum CheckError {
  #[error(transparent)]
  GitHub(#[from] GitHubError),
  #[error("Existence check cancelled")]
  Cancelled,
  #[error("{0}")]
  Other(String),
}

/// Answers whether a path exists at the root of a repository.
///
/// `Ok(false)` is a successful answer: the path is not there. An `Err` means
/// the question could not be answered at all (auth, network, rate limit,
/// server failure, cancellation). Implementations make one remote call per
/// invocation, with no caching and no retries.
#[async_trait]
pub trait ExistenceChecker: Send + Sync {
  async fn exists(&self, owner: &str, repo: &str, path: &str, cancel: &CancellationToken) -> Result<bool, CheckError>;
}
