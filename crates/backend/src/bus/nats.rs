use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tracing::{debug, info};

use super::{BusError, MessageBus, Subscription, SubscriptionSource};
use crate::config::NatsConfig;

/// [`MessageBus`] backed by a core NATS connection.
///
/// The client handle is taken out on [`MessageBus::close`], after which every
/// operation returns [`BusError::Closed`].
pub struct NatsBus {
  url: String,
  client: Mutex<Option<async_nats::Client>>,
}

impl NatsBus {
  pub async fn connect(config: &NatsConfig) -> Result<Self, BusError> {
    let client = async_nats::connect(config.url.as_str())
      .await
      .map_err(|e| BusError::Connect {
        url: config.url.clone(),
        message: e.to_string(),
      })?;

    info!(url = %config.url, "Connected to NATS");

    Ok(Self {
      url: config.url.clone(),
      client: Mutex::new(Some(client)),
    })
  }

  fn client(&self) -> Result<async_nats::Client, BusError> {
    let guard = self.client.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    guard.clone().ok_or(BusError::Closed)
  }
}

#[async_trait]
impl MessageBus for NatsBus {
  fn name(&self) -> &str {
    "nats"
  }

  async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError> {
    self
      .client()?
      .publish(subject.to_string(), payload)
      .await
      .map_err(|e| BusError::Publish {
        subject: subject.to_string(),
        message: e.to_string(),
      })
  }

  async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError> {
    let subscriber = self
      .client()?
      .subscribe(subject.to_string())
      .await
      .map_err(|e| BusError::Subscribe {
        subject: subject.to_string(),
        message: e.to_string(),
      })?;

    debug!(subject, "Subscribed");
    Ok(Subscription::new(
      subject,
      NatsSubscription {
        subject: subject.to_string(),
        inner: subscriber,
      },
    ))
  }

  async fn close(&self) -> Result<(), BusError> {
    let client = {
      let mut guard = self.client.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
      guard.take()
    };

    let Some(client) = client else {
      debug!(url = %self.url, "NATS connection already closed");
      return Ok(());
    };

    // Push out anything still buffered before the handle goes away
    client.flush().await.map_err(|e| BusError::Flush(e.to_string()))?;
    drop(client);

    info!(url = %self.url, "NATS connection closed");
    Ok(())
  }
}

struct NatsSubscription {
  subject: String,
  inner: async_nats::Subscriber,
}

#[async_trait]
impl SubscriptionSource for NatsSubscription {
  async fn next(&mut self) -> Option<Bytes> {
    self.inner.next().await.map(|message| message.payload)
  }

  async fn unsubscribe(&mut self) -> Result<(), BusError> {
    self.inner.unsubscribe().await.map_err(|e| BusError::Unsubscribe {
      subject: self.subject.clone(),
      message: e.to_string(),
    })
  }
}
