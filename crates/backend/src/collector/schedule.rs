use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use croner::Cron;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::{Collector, CollectorError};

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
  #[error("Invalid cron expression {expr:?}: {message}")]
  Invalid { expr: String, message: String },
  #[error("Cron expression {0:?} has no upcoming occurrence")]
  Exhausted(String),
}

/// Five-field cron expression (minute hour day-of-month month day-of-week),
/// evaluated in UTC. Day-of-week accepts both 0 and 7 for Sunday.
pub struct CronSchedule {
  expr: String,
  cron: Cron,
}

impl CronSchedule {
  pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
    let expr = expr.trim();
    if expr.split_whitespace().count() != 5 {
      return Err(ScheduleError::Invalid {
        expr: expr.to_string(),
        message: "expected 5 fields".to_string(),
      });
    }

    let cron = Cron::new(expr).parse().map_err(|e| ScheduleError::Invalid {
      expr: expr.to_string(),
      message: e.to_string(),
    })?;

    Ok(Self {
      expr: expr.to_string(),
      cron,
    })
  }

  pub fn expr(&self) -> &str {
    &self.expr
  }

  /// First occurrence strictly after `after`.
  pub fn next_after(&self, after: &DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
    self
      .cron
      .find_next_occurrence(after, false)
      .map_err(|_| ScheduleError::Exhausted(self.expr.clone()))
  }
}

impl std::fmt::Debug for CronSchedule {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_tuple("CronSchedule").field(&self.expr).finish()
  }
}

/// Run scans on `schedule` until cancelled.
///
/// A failed or timed-out scan is logged and the loop waits for the next
/// occurrence. Only an unusable schedule ends the loop with an error.
pub async fn run_scheduled(
  collector: &Collector,
  schedule: &CronSchedule,
  run_on_startup: bool,
  scan_timeout: Duration,
  cancel: CancellationToken,
) -> Result<(), CollectorError> {
  info!(schedule = %schedule.expr(), run_on_startup, "Collector scheduler started");

  if run_on_startup {
    run_scan(collector, scan_timeout, &cancel).await;
  }

  loop {
    let now = Utc::now();
    let next = schedule.next_after(&now)?;
    let wait = (next - now).to_std().unwrap_or_default();
    info!(next = %next, "Next scan scheduled");

    tokio::select! {
      biased;

      _ = cancel.cancelled() => {
        info!("Collector scheduler shutting down (cancelled)");
        break;
      }

      _ = tokio::time::sleep(wait) => {
        run_scan(collector, scan_timeout, &cancel).await;
      }
    }
  }

  Ok(())
}

async fn run_scan(collector: &Collector, timeout: Duration, cancel: &CancellationToken) {
  let start = Instant::now();
  match tokio::time::timeout(timeout, collector.scan(cancel)).await {
    Ok(Ok(_)) => {}
    Ok(Err(CollectorError::Cancelled)) => info!(org = %collector.org(), "Scan cancelled"),
    Ok(Err(e)) => error!(org = %collector.org(), error = %e, "Scan failed"),
    Err(_) => {
      error!(
        org = %collector.org(),
        timeout_secs = timeout.as_secs(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Scan timed out"
      );
    }
  }
}
