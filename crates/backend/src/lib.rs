pub mod bus;
pub mod checker;
pub mod collector;
pub mod dirs;
pub mod github;
pub mod pipeline;
pub mod router;

mod domain;
pub use domain::{clone_url, config, record};

#[cfg(test)]
mod __tests__;

/// File probed at the root of each repository by the validator.
pub const DEFAULT_PROBE_PATH: &str = "appsec-config.yml";
