//! Config command

use std::path::Path;

use anyhow::{Context, Result};
use secflow::{config::Config, dirs};

/// Print the effective configuration with the token redacted.
pub fn cmd_config_show(config: &Config, explicit: Option<&Path>) -> Result<()> {
  let default_path = dirs::default_config_path();

  match explicit {
    Some(path) => println!("Using config file: {:?}", path),
    None if default_path.exists() => println!("Using user config: {:?}", default_path),
    None => println!("Using default configuration (no config file found)"),
  }
  println!("Environment variables override file values.");
  println!();

  let toml_str = config.to_redacted_toml().context("Failed to render configuration")?;
  println!("{}", toml_str);

  Ok(())
}
