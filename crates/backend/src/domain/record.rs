//! Repository record carried on the bus between the collector and the
//! validator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{DefaultOnNull, serde_as};

/// Metadata for one repository, serialized as a JSON object.
///
/// `language` and `topics` are left out of the encoding entirely when empty,
/// and decode back to empty when absent or `null`.
///
/// A timestamp that is absent or `null` decodes to the Unix epoch
/// (`1970-01-01T00:00:00Z`), which is also what the collector publishes for a
/// repository the API returned without one. Producers that encode an unset
/// time as `0001-01-01T00:00:00Z` still decode, as that exact instant.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryRecord {
  pub name: String,
  pub clone_url: String,
  pub ssh_url: String,
  pub https_url: String,
  #[serde_as(as = "DefaultOnNull")]
  pub created_at: DateTime<Utc>,
  #[serde_as(as = "DefaultOnNull")]
  pub updated_at: DateTime<Utc>,
  #[serde_as(as = "DefaultOnNull")]
  #[serde(skip_serializing_if = "String::is_empty")]
  pub language: String,
  #[serde_as(as = "DefaultOnNull")]
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub topics: Vec<String>,
}

impl RepositoryRecord {
  pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(self)
  }

  pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
    serde_json::from_slice(bytes)
  }
}
