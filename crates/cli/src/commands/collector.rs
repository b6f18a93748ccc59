//! Collector command

use anyhow::{Context, Result};
use secflow::{
  collector::{Collector, CronSchedule, run_scheduled},
  config::Config,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::cancel_on_shutdown_signal;

/// Scan the organization once, or on the configured schedule until interrupted.
pub async fn cmd_collector(config: &Config, once: bool) -> Result<()> {
  config.validate_for_collector().context("Invalid collector configuration")?;
  let schedule = CronSchedule::parse(&config.collector.schedule).context("Invalid CRON_SCHEDULE")?;

  let collector = Collector::connect(&config.github, &config.nats, &config.collector)
    .await
    .context("Failed to start collector")?;

  info!(
    org = %collector.org(),
    subject = %collector.subject(),
    schedule = %schedule.expr(),
    "Collector started"
  );

  let cancel = CancellationToken::new();
  cancel_on_shutdown_signal(cancel.clone());

  let result = if once {
    let scan = tokio::time::timeout(config.collector.scan_timeout(), collector.scan(&cancel))
      .await
      .context("Scan timed out")
      .and_then(|r| r.context("Scan failed"));
    scan.map(|report| {
      println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
    })
  } else {
    run_scheduled(
      &collector,
      &schedule,
      config.collector.run_on_startup,
      config.collector.scan_timeout(),
      cancel,
    )
    .await
    .context("Collector scheduler failed")
  };

  if let Err(e) = collector.close().await {
    warn!(error = %e, "Failed to close bus connection");
  }
  info!("Collector stopped");

  result
}
