//! Organization scan producer.
//!
//! Lists every repository of the configured organization and publishes one
//! [`RepositoryRecord`] per repository onto the collector subject, where the
//! validator stage picks it up.

mod schedule;

use std::{sync::Arc, time::Instant};

use bytes::Bytes;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use schedule::{CronSchedule, ScheduleError, run_scheduled};

use crate::{
  bus::{BusError, MessageBus, NatsBus},
  config::{CollectorConfig, GitHubConfig, NatsConfig},
  github::{GitHubClient, GitHubError},
  record::RepositoryRecord,
};

#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
  #[error("GitHub error: {0}")]
  GitHub(#[from] GitHubError),
  #[error("Bus error: {0}")]
  Bus(#[from] BusError),
  #[error(transparent)]
  Schedule(#[from] ScheduleError),
  #[error("Scan cancelled")]
  Cancelled,
}

/// Outcome of one organization scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
  pub found: usize,
  pub published: usize,
  pub failed: usize,
}

pub struct Collector {
  github: GitHubClient,
  bus: Arc<dyn MessageBus>,
  org: String,
  subject: String,
}

impl Collector {
  pub fn new(github: GitHubClient, bus: Arc<dyn MessageBus>, org: impl Into<String>, subject: impl Into<String>) -> Self {
    Self {
      github,
      bus,
      org: org.into(),
      subject: subject.into(),
    }
  }

  /// Build a collector over a fresh NATS connection.
  pub async fn connect(
    github: &GitHubConfig,
    nats: &NatsConfig,
    collector: &CollectorConfig,
  ) -> Result<Self, CollectorError> {
    let client = GitHubClient::new(github)?;
    let bus = NatsBus::connect(nats).await?;
    Ok(Self::new(client, Arc::new(bus), &github.org, &collector.subject))
  }

  pub fn org(&self) -> &str {
    &self.org
  }

  pub fn subject(&self) -> &str {
    &self.subject
  }

  /// List the organization and publish every repository.
  ///
  /// A listing failure aborts the scan. A failure to publish one record is
  /// logged and counted, and the scan moves on to the next.
  pub async fn scan(&self, cancel: &CancellationToken) -> Result<ScanReport, CollectorError> {
    let start = Instant::now();
    info!(org = %self.org, "Scanning organization");

    let repos = tokio::select! {
      biased;

      _ = cancel.cancelled() => return Err(CollectorError::Cancelled),

      repos = self.github.list_org_repos(&self.org) => repos?,
    };

    let mut report = ScanReport {
      found: repos.len(),
      ..Default::default()
    };

    for repo in repos {
      if cancel.is_cancelled() {
        return Err(CollectorError::Cancelled);
      }

      let record = RepositoryRecord::from(repo);
      let payload = match record.encode() {
        Ok(bytes) => Bytes::from(bytes),
        Err(e) => {
          report.failed += 1;
          warn!(repo = %record.name, error = %e, "Failed to encode repository");
          continue;
        }
      };

      match self.bus.publish(&self.subject, payload).await {
        Ok(()) => {
          report.published += 1;
          debug!(repo = %record.name, subject = %self.subject, "Published repository");
        }
        Err(e) => {
          report.failed += 1;
          warn!(repo = %record.name, error = %e, "Failed to publish repository");
        }
      }
    }

    info!(
      org = %self.org,
      found = report.found,
      published = report.published,
      failed = report.failed,
      elapsed_ms = start.elapsed().as_millis() as u64,
      "Scan complete"
    );
    Ok(report)
  }

  pub async fn close(&self) -> Result<(), CollectorError> {
    self.bus.close().await?;
    Ok(())
  }
}
