//! Publish/subscribe bus capability.
//!
//! The pipeline only needs four things from a bus: publish bytes to a
//! subject, subscribe to a subject, pull or stream deliveries from that
//! subscription, and close the connection. [`MessageBus`] captures exactly
//! that so the router and controller can run against NATS in production and
//! against [`MemoryBus`] in tests.
//!
//! A [`Subscription`] serves both consumption styles:
//!
//! - pull: [`Subscription::next_message`] with an idle timeout, where
//!   [`BusError::Timeout`] means "nothing queued right now"
//! - push: [`Subscription::next`] in a dispatch loop

mod memory;
mod nats;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

pub use memory::MemoryBus;
pub use nats::NatsBus;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
  #[error("Failed to connect to {url}: {message}")]
  Connect { url: String, message: String },
  #[error("Failed to publish to {subject}: {message}")]
  Publish { subject: String, message: String },
  #[error("Failed to subscribe to {subject}: {message}")]
  Subscribe { subject: String, message: String },
  #[error("Failed to unsubscribe from {subject}: {message}")]
  Unsubscribe { subject: String, message: String },
  #[error("Failed to flush connection: {0}")]
  Flush(String),
  #[error("Timed out waiting for a message")]
  Timeout,
  #[error("Subscription to {0} was closed")]
  SubscriptionClosed(String),
  #[error("Connection is closed")]
  Closed,
}

#[async_trait]
pub trait MessageBus: Send + Sync {
  fn name(&self) -> &str;

  async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError>;
  async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError>;

  /// Release the connection. Closing twice is a no-op.
  async fn close(&self) -> Result<(), BusError>;
}

/// Delivery side of a subscription, implemented per bus.
#[async_trait]
pub trait SubscriptionSource: Send {
  /// Next delivered payload, or `None` once the subscription has ended.
  async fn next(&mut self) -> Option<Bytes>;
  async fn unsubscribe(&mut self) -> Result<(), BusError>;
}

/// An active subscription to one subject.
pub struct Subscription {
  subject: String,
  source: Box<dyn SubscriptionSource>,
}

impl Subscription {
  pub fn new(subject: impl Into<String>, source: impl SubscriptionSource + 'static) -> Self {
    Self {
      subject: subject.into(),
      source: Box::new(source),
    }
  }

  pub fn subject(&self) -> &str {
    &self.subject
  }

  /// Wait for the next delivery. Cancel-safe.
  pub async fn next(&mut self) -> Option<Bytes> {
    self.source.next().await
  }

  /// Pull the next delivery, waiting at most `timeout`.
  ///
  /// Returns [`BusError::Timeout`] when nothing arrives in time and
  /// [`BusError::SubscriptionClosed`] when the subscription has ended.
  pub async fn next_message(&mut self, timeout: Duration) -> Result<Bytes, BusError> {
    match tokio::time::timeout(timeout, self.source.next()).await {
      Ok(Some(payload)) => Ok(payload),
      Ok(None) => Err(BusError::SubscriptionClosed(self.subject.clone())),
      Err(_) => Err(BusError::Timeout),
    }
  }

  pub async fn unsubscribe(mut self) -> Result<(), BusError> {
    self.source.unsubscribe().await
  }
}

impl std::fmt::Debug for Subscription {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Subscription").field("subject", &self.subject).finish()
  }
}
