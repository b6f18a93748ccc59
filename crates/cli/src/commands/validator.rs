//! Validator command

use anyhow::{Context, Result, bail};
use secflow::{config::Config, pipeline::Pipeline};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::cancel_on_shutdown_signal;

/// Run the validation pipeline until ctrl-c or SIGTERM.
pub async fn cmd_validator(config: &Config) -> Result<()> {
  config.validate_for_validator().context("Invalid validator configuration")?;

  let cancel = CancellationToken::new();
  cancel_on_shutdown_signal(cancel.clone());

  info!(
    source = %config.validator.source_subject,
    valid = %config.validator.valid_subject,
    invalid = %config.validator.invalid_subject,
    probe_path = %config.validator.probe_path,
    "Starting validator"
  );

  let mut pipeline = Pipeline::start(&config.github, &config.nats, &config.validator)
    .await
    .context("Failed to start validator pipeline")?;

  tokio::select! {
    _ = cancel.cancelled() => {}
    _ = pipeline.interrupted() => warn!("Live subscription lost, stopping validator"),
  }

  pipeline.stop().await.context("Failed to stop validator pipeline")?;
  let stats = pipeline.stats();
  info!(
    processed = stats.processed,
    drained = stats.drained,
    valid = stats.valid,
    invalid = stats.invalid,
    failed = stats.failed,
    "Validator stopped"
  );

  if pipeline.is_interrupted() {
    bail!("Validator stopped after losing its NATS subscription");
  }
  Ok(())
}
