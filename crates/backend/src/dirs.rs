use std::path::PathBuf;

/// Get the default config directory
///
/// Respects the following environment variables (in order of precedence):
/// 1. CONFIG_DIR - explicit config directory override
/// 2. XDG_CONFIG_HOME - standard XDG config home directory
/// 3. dirs::config_dir() - platform default
pub fn default_config_dir() -> PathBuf {
  if let Ok(dir) = std::env::var("CONFIG_DIR") {
    return PathBuf::from(dir);
  }

  if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
    return PathBuf::from(xdg_config).join("secflow");
  }

  dirs::config_dir()
    .unwrap_or_else(|| PathBuf::from("."))
    .join("secflow")
}

/// Path of the user-level config file.
pub fn default_config_path() -> PathBuf {
  default_config_dir().join("config.toml")
}

