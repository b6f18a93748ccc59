//! Per-message routing: decode, derive the owner, probe, republish.

use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
  bus::{BusError, MessageBus},
  checker::ExistenceChecker,
  clone_url::{self, CloneUrl, CloneUrlError},
  config::ValidatorConfig,
  record::RepositoryRecord,
};

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
  #[error("Failed to decode repository record: {0}")]
  Decode(#[from] serde_json::Error),
  #[error("Repository record has an empty name")]
  EmptyName,
  #[error("Repository name {0:?} is not a valid identifier")]
  InvalidName(String),
  #[error("Repository {repo}: {source}")]
  CloneUrl {
    repo: String,
    #[source]
    source: CloneUrlError,
  },
  #[error("Repository {repo}: {source}")]
  Publish {
    repo: String,
    #[source]
    source: BusError,
  },
}

/// Outbound destination chosen for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
  Valid,
  Invalid,
}

impl Route {
  pub fn as_str(&self) -> &'static str {
    match self {
      Route::Valid => "valid",
      Route::Invalid => "invalid",
    }
  }
}

impl std::fmt::Display for Route {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Outbound subjects and the path probed in each repository.
#[derive(Debug, Clone)]
pub struct RouteConfig {
  pub valid_subject: String,
  pub invalid_subject: String,
  pub probe_path: String,
}

impl From<&ValidatorConfig> for RouteConfig {
  fn from(config: &ValidatorConfig) -> Self {
    Self {
      valid_subject: config.valid_subject.clone(),
      invalid_subject: config.invalid_subject.clone(),
      probe_path: config.probe_path.clone(),
    }
  }
}

impl RouteConfig {
  fn subject(&self, route: Route) -> &str {
    match route {
      Route::Valid => &self.valid_subject,
      Route::Invalid => &self.invalid_subject,
    }
  }
}

/// Routes one inbound record to the valid or invalid subject.
///
/// Holds no per-message state, so a single router is shared by every
/// in-flight unit.
pub struct Router {
  bus: Arc<dyn MessageBus>,
  checker: Arc<dyn ExistenceChecker>,
  routes: RouteConfig,
}

impl Router {
  pub fn new(bus: Arc<dyn MessageBus>, checker: Arc<dyn ExistenceChecker>, routes: RouteConfig) -> Self {
    Self { bus, checker, routes }
  }

  pub fn routes(&self) -> &RouteConfig {
    &self.routes
  }

  /// Process one delivery.
  ///
  /// Decode, name and clone-URL failures drop the message without
  /// publishing. A failed existence check is routed as [`Route::Invalid`].
  /// The published payload is always `payload` itself, never a re-encoding.
  pub async fn process(&self, payload: Bytes, cancel: &CancellationToken) -> Result<Route, RouteError> {
    let record = RepositoryRecord::decode(&payload)?;
    if record.name.is_empty() {
      return Err(RouteError::EmptyName);
    }
    // The name becomes a path segment of the probe request
    if !clone_url::is_identifier(&record.name) {
      return Err(RouteError::InvalidName(record.name));
    }

    let clone_url = CloneUrl::parse(&record.clone_url).map_err(|source| RouteError::CloneUrl {
      repo: record.name.clone(),
      source,
    })?;

    let route = match self
      .checker
      .exists(&clone_url.owner, &record.name, &self.routes.probe_path, cancel)
      .await
    {
      Ok(true) => Route::Valid,
      Ok(false) => Route::Invalid,
      Err(e) => {
        warn!(
          repo = %record.name,
          owner = %clone_url.owner,
          error = %e,
          "Existence check failed, routing as invalid"
        );
        Route::Invalid
      }
    };

    let subject = self.routes.subject(route);
    self
      .bus
      .publish(subject, payload)
      .await
      .map_err(|source| RouteError::Publish {
        repo: record.name.clone(),
        source,
      })?;

    debug!(repo = %record.name, owner = %clone_url.owner, route = %route, subject, "Routed repository");
    Ok(route)
  }
}
