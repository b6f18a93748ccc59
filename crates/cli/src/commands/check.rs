//! One-off existence check

use anyhow::{Context, Result};
use secflow::{
  checker::ExistenceChecker,
  config::Config,
  github::{GitHubChecker, GitHubClient},
};
use tokio_util::sync::CancellationToken;

/// Probe `owner/repo` for the configured path and print the route it would take.
pub async fn cmd_check(config: &Config, owner: &str, repo: &str, path: Option<&str>) -> Result<()> {
  let path = path.unwrap_or(&config.validator.probe_path);
  let client = GitHubClient::new(&config.github).context("Failed to create GitHub client")?;
  let checker = GitHubChecker::new(client);

  let exists = checker
    .exists(owner, repo, path, &CancellationToken::new())
    .await
    .with_context(|| format!("Failed to check {owner}/{repo}"))?;

  let subject = if exists {
    &config.validator.valid_subject
  } else {
    &config.validator.invalid_subject
  };

  println!(
    "{}",
    serde_json::json!({
      "owner": owner,
      "repo": repo,
      "path": path,
      "exists": exists,
      "subject": subject,
    })
  );

  Ok(())
}
