//! Owner/repository extraction from GitHub clone URLs.
//!
//! Recognized forms:
//!
//! ```text
//! https://github.com/{owner}/{repo}[.git]
//! git@github.com:{owner}/{repo}[.git]
//! ```

use std::fmt;

const HTTPS_PREFIX: &str = "https://github.com/";
const SSH_PREFIX: &str = "git@github.com:";
const GIT_SUFFIX: &str = ".git";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CloneUrlError {
  #[error("unable to parse owner from URL: {0}")]
  Unrecognized(String),
  #[error("no owner in URL: {0}")]
  MissingOwner(String),
  #[error("invalid owner or repository {segment:?} in URL: {url}")]
  InvalidSegment { url: String, segment: String },
}

/// Whether `s` can name a GitHub owner or repository: one or more ASCII
/// letters, digits, `.`, `_` or `-`, and not `.` or `..`.
pub fn is_identifier(s: &str) -> bool {
  !s.is_empty()
    && s != "."
    && s != ".."
    && s.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

/// A parsed clone URL.
///
/// `repo` is `None` for URLs that carry only an owner segment
/// (`https://github.com/acme`); callers fall back to the record name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneUrl {
  pub owner: String,
  pub repo: Option<String>,
}

impl CloneUrl {
  pub fn parse(url: &str) -> Result<Self, CloneUrlError> {
    let remainder = url
      .strip_prefix(HTTPS_PREFIX)
      .or_else(|| url.strip_prefix(SSH_PREFIX))
      .ok_or_else(|| CloneUrlError::Unrecognized(url.to_string()))?;
    let path = remainder.strip_suffix(GIT_SUFFIX).unwrap_or(remainder);

    let mut segments = path.split('/');
    let owner = segments.next().unwrap_or_default();
    if owner.is_empty() {
      return Err(CloneUrlError::MissingOwner(url.to_string()));
    }

    let repo = segments.next().filter(|s| !s.is_empty());

    for segment in std::iter::once(owner).chain(repo) {
      if !is_identifier(segment) {
        return Err(CloneUrlError::InvalidSegment {
          url: url.to_string(),
          segment: segment.to_string(),
        });
      }
    }

    Ok(Self {
      owner: owner.to_string(),
      repo: repo.map(str::to_string),
    })
  }
}

impl fmt::Display for CloneUrl {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.repo {
      Some(repo) => write!(f, "{}/{}", self.owner, repo),
      None => write!(f, "{}", self.owner),
    }
  }
}
