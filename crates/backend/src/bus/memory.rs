use std::{
  collections::{HashMap, HashSet, VecDeque},
  sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::trace;

use super::{BusError, MessageBus, Subscription, SubscriptionSource};

/// In-process [`MessageBus`].
///
/// Publishing fans out to every current subscriber of the exact subject.
/// When a subject has no subscriber the payload is queued as that subject's
/// backlog and handed to the next subscriber, which lets a consumer find
/// work already waiting when it starts.
///
/// Every publish is recorded and can be inspected with [`MemoryBus::published`].
#[derive(Clone, Default)]
pub struct MemoryBus {
  state: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
  closed: bool,
  next_id: u64,
  subjects: HashMap<String, SubjectState>,
  published: Vec<(String, Bytes)>,
  failing: HashSet<String>,
  failing_subscribes: HashSet<String>,
}

#[derive(Default)]
struct SubjectState {
  subscribers: Vec<(u64, mpsc::UnboundedSender<Bytes>)>,
  backlog: VecDeque<Bytes>,
}

impl MemoryBus {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, MemoryState> {
    self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Payloads published to `subject`, in publish order.
  pub fn published(&self, subject: &str) -> Vec<Bytes> {
    self
      .lock()
      .published
      .iter()
      .filter(|(s, _)| s == subject)
      .map(|(_, payload)| payload.clone())
      .collect()
  }

  /// Messages waiting for a subscriber on `subject`.
  pub fn backlog_len(&self, subject: &str) -> usize {
    self.lock().subjects.get(subject).map_or(0, |s| s.backlog.len())
  }

  pub fn subscriber_count(&self, subject: &str) -> usize {
    self.lock().subjects.get(subject).map_or(0, |s| s.subscribers.len())
  }

  pub fn is_closed(&self) -> bool {
    self.lock().closed
  }

  /// Make every publish to `subject` fail until cleared.
  pub fn fail_publishes_to(&self, subject: &str) {
    self.lock().failing.insert(subject.to_string());
  }

  /// Make every subscribe to `subject` fail until cleared.
  pub fn fail_subscriptions_to(&self, subject: &str) {
    self.lock().failing_subscribes.insert(subject.to_string());
  }

  pub fn clear_failures(&self) {
    let mut state = self.lock();
    state.failing.clear();
    state.failing_subscribes.clear();
  }
}

#[async_trait]
impl MessageBus for MemoryBus {
  fn name(&self) -> &str {
    "memory"
  }

  async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError> {
    let mut state = self.lock();
    if state.closed {
      return Err(BusError::Closed);
    }
    if state.failing.contains(subject) {
      return Err(BusError::Publish {
        subject: subject.to_string(),
        message: "publish rejected".to_string(),
      });
    }

    state.published.push((subject.to_string(), payload.clone()));

    let entry = state.subjects.entry(subject.to_string()).or_default();
    entry.subscribers.retain(|(_, tx)| !tx.is_closed());

    if entry.subscribers.is_empty() {
      trace!(subject, "No subscribers, queueing message");
      entry.backlog.push_back(payload);
    } else {
      for (_, tx) in &entry.subscribers {
        let _ = tx.send(payload.clone());
      }
    }

    Ok(())
  }

  async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError> {
    let mut state = self.lock();
    if state.closed {
      return Err(BusError::Closed);
    }
    if state.failing_subscribes.contains(subject) {
      return Err(BusError::Subscribe {
        subject: subject.to_string(),
        message: "subscribe rejected".to_string(),
      });
    }

    let id = state.next_id;
    state.next_id += 1;

    let (tx, rx) = mpsc::unbounded_channel();
    let entry = state.subjects.entry(subject.to_string()).or_default();
    for payload in entry.backlog.drain(..) {
      let _ = tx.send(payload);
    }
    entry.subscribers.push((id, tx));

    Ok(Subscription::new(
      subject,
      MemorySubscription {
        id,
        subject: subject.to_string(),
        rx,
        state: Arc::clone(&self.state),
      },
    ))
  }

  async fn close(&self) -> Result<(), BusError> {
    let mut state = self.lock();
    if state.closed {
      return Ok(());
    }
    state.closed = true;
    // Dropping the senders ends every open subscription
    for subject in state.subjects.values_mut() {
      subject.subscribers.clear();
    }
    Ok(())
  }
}

struct MemorySubscription {
  id: u64,
  subject: String,
  rx: mpsc::UnboundedReceiver<Bytes>,
  state: Arc<Mutex<MemoryState>>,
}

#[async_trait]
impl SubscriptionSource for MemorySubscription {
  async fn next(&mut self) -> Option<Bytes> {
    self.rx.recv().await
  }

  async fn unsubscribe(&mut self) -> Result<(), BusError> {
    let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(subject) = state.subjects.get_mut(&self.subject) {
      subject.subscribers.retain(|(id, _)| *id != self.id);
    }
    self.rx.close();
    Ok(())
  }
}
