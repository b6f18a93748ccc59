//! Validator pipeline controller.
//!
//! Owns the bus connection for the validator stage and drives it through a
//! strictly forward lifecycle:
//!
//! ```text
//! Uninitialized -> Draining -> Live -> Stopping -> Closed
//! ```
//!
//! - **Draining**: pull the inbound backlog one message at a time until an
//!   idle timeout passes with nothing queued. Ordered and serial.
//! - **Live**: a dispatcher task pulls deliveries and spawns one tracked unit
//!   per message. A semaphore caps the number of units in flight and a
//!   permit is taken before the next delivery is pulled.
//! - **Stopping**: cancel the shared token, stop the dispatcher (which
//!   unsubscribes), wait for every tracked unit, then close the bus.
//!
//! If the live subscription ends while the pipeline is still `Live` (the
//! connection went away), [`Pipeline::interrupted`] resolves so the owner can
//! stop and exit instead of waiting on a consumer that no longer consumes.

mod stats;

use std::{sync::Arc, time::Duration};

use tokio::{
  sync::{Semaphore, watch},
  task::JoinHandle,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

pub use stats::PipelineStats;
use stats::Counters;

use crate::{
  bus::{BusError, MessageBus, NatsBus, Subscription},
  checker::ExistenceChecker,
  config::{GitHubConfig, NatsConfig, ValidatorConfig},
  github::{GitHubChecker, GitHubClient, GitHubError},
  router::{RouteConfig, Router},
};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
  #[error("GitHub client error: {0}")]
  GitHub(#[from] GitHubError),
  #[error("Bus error: {0}")]
  Bus(#[from] BusError),
  #[error("Backlog drain failed: {0}")]
  Drain(#[source] BusError),
  #[error("Failed to establish live subscription: {0}")]
  Subscribe(#[source] BusError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
  Uninitialized,
  Draining,
  Live,
  Stopping,
  Closed,
}

impl PipelineState {
  pub fn as_str(&self) -> &'static str {
    match self {
      PipelineState::Uninitialized => "uninitialized",
      PipelineState::Draining => "draining",
      PipelineState::Live => "live",
      PipelineState::Stopping => "stopping",
      PipelineState::Closed => "closed",
    }
  }
}

impl std::fmt::Display for PipelineState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
  pub source_subject: String,
  pub routes: RouteConfig,
  pub process_startup_messages: bool,
  pub drain_idle_timeout: Duration,
  pub max_in_flight: usize,
}

impl From<&ValidatorConfig> for PipelineOptions {
  fn from(config: &ValidatorConfig) -> Self {
    Self {
      source_subject: config.source_subject.clone(),
      routes: RouteConfig::from(config),
      process_startup_messages: config.process_startup_messages,
      drain_idle_timeout: config.drain_idle_timeout(),
      max_in_flight: config.max_in_flight.max(1),
    }
  }
}

pub struct Pipeline {
  bus: Arc<dyn MessageBus>,
  router: Arc<Router>,
  options: PipelineOptions,
  cancel: CancellationToken,
  interrupted: CancellationToken,
  tracker: TaskTracker,
  counters: Arc<Counters>,
  state: watch::Sender<PipelineState>,
  dispatcher: Option<JoinHandle<()>>,
}

impl Pipeline {
  /// Connect to NATS, build the GitHub checker, and start the pipeline.
  pub async fn start(
    github: &GitHubConfig,
    nats: &NatsConfig,
    validator: &ValidatorConfig,
  ) -> Result<Self, PipelineError> {
    let checker = GitHubChecker::new(GitHubClient::new(github)?);
    let bus = NatsBus::connect(nats).await?;
    Self::start_with(Arc::new(bus), Arc::new(checker), PipelineOptions::from(validator)).await
  }

  /// Start the pipeline over an already-connected bus.
  ///
  /// On error the bus has been closed and nothing keeps running, so the
  /// caller has nothing to stop.
  pub async fn start_with(
    bus: Arc<dyn MessageBus>,
    checker: Arc<dyn ExistenceChecker>,
    options: PipelineOptions,
  ) -> Result<Self, PipelineError> {
    let router = Arc::new(Router::new(Arc::clone(&bus), checker, options.routes.clone()));
    let (state, _) = watch::channel(PipelineState::Uninitialized);

    let mut pipeline = Self {
      bus,
      router,
      options,
      cancel: CancellationToken::new(),
      interrupted: CancellationToken::new(),
      tracker: TaskTracker::new(),
      counters: Arc::new(Counters::default()),
      state,
      dispatcher: None,
    };

    if let Err(e) = pipeline.run_startup().await {
      warn!(error = %e, "Pipeline startup failed");
      pipeline.cancel.cancel();
      if let Err(close_err) = pipeline.bus.close().await {
        warn!(error = %close_err, "Failed to close bus after startup failure");
      }
      pipeline.set_state(PipelineState::Closed);
      return Err(e);
    }

    Ok(pipeline)
  }

  async fn run_startup(&mut self) -> Result<(), PipelineError> {
    self.set_state(PipelineState::Draining);
    if self.options.process_startup_messages {
      self.drain().await?;
    } else {
      debug!("Startup drain disabled");
    }

    let subscription = self
      .bus
      .subscribe(&self.options.source_subject)
      .await
      .map_err(PipelineError::Subscribe)?;

    let dispatcher = Dispatcher {
      router: Arc::clone(&self.router),
      tracker: self.tracker.clone(),
      cancel: self.cancel.clone(),
      interrupted: self.interrupted.clone(),
      counters: Arc::clone(&self.counters),
      permits: Arc::new(Semaphore::new(self.options.max_in_flight)),
    };
    self.dispatcher = Some(tokio::spawn(dispatcher.run(subscription)));
    self.set_state(PipelineState::Live);

    info!(
      subject = %self.options.source_subject,
      bus = self.bus.name(),
      max_in_flight = self.options.max_in_flight,
      "Pipeline live"
    );
    Ok(())
  }

  /// Serially route everything already queued on the inbound subject.
  async fn drain(&self) -> Result<(), PipelineError> {
    let subject = &self.options.source_subject;
    let mut subscription = self.bus.subscribe(subject).await.map_err(PipelineError::Drain)?;
    info!(subject = %subject, "Draining startup backlog");

    let mut pulled = 0u64;
    loop {
      match subscription.next_message(self.options.drain_idle_timeout).await {
        Ok(payload) => {
          pulled += 1;
          let result = self.router.process(payload, &self.cancel).await;
          if result.is_ok() {
            self.counters.drained();
          }
          self.counters.record(&result);
        }
        Err(BusError::Timeout) => break,
        Err(e) => return Err(PipelineError::Drain(e)),
      }
    }

    subscription.unsubscribe().await.map_err(PipelineError::Drain)?;
    info!(
      pulled,
      drained = self.counters.snapshot().drained,
      "Startup backlog drained"
    );
    Ok(())
  }

  fn set_state(&self, state: PipelineState) {
    let previous = self.state.send_replace(state);
    if previous != state {
      debug!(from = %previous, to = %state, "Pipeline state changed");
    }
  }

  pub fn state(&self) -> PipelineState {
    *self.state.borrow()
  }

  /// Receiver that observes every state transition.
  pub fn watch_state(&self) -> watch::Receiver<PipelineState> {
    self.state.subscribe()
  }

  pub fn stats(&self) -> PipelineStats {
    self.counters.snapshot()
  }

  /// Resolves once the live subscription has ended without [`Pipeline::stop`]
  /// being called. Never resolves for a pipeline that is stopped normally.
  pub async fn interrupted(&self) {
    self.interrupted.cancelled().await
  }

  pub fn is_interrupted(&self) -> bool {
    self.interrupted.is_cancelled()
  }

  /// Stop consuming, wait for every in-flight unit, then close the bus.
  ///
  /// Calling this again after it has returned is a no-op.
  pub async fn stop(&mut self) -> Result<(), PipelineError> {
    if matches!(self.state(), PipelineState::Stopping | PipelineState::Closed) {
      return Ok(());
    }

    self.set_state(PipelineState::Stopping);
    info!(in_flight = self.counters.snapshot().in_flight, "Stopping pipeline");

    self.cancel.cancel();
    if let Some(dispatcher) = self.dispatcher.take()
      && let Err(e) = dispatcher.await
    {
      warn!(error = %e, "Dispatcher task failed");
    }

    self.tracker.close();
    self.tracker.wait().await;

    let closed = self.bus.close().await;
    self.set_state(PipelineState::Closed);
    closed?;

    let stats = self.stats();
    info!(
      processed = stats.processed,
      valid = stats.valid,
      invalid = stats.invalid,
      failed = stats.failed,
      "Pipeline stopped"
    );
    Ok(())
  }
}

impl Drop for Pipeline {
  fn drop(&mut self) {
    self.cancel.cancel();
  }
}

/// Live-phase delivery loop.
struct Dispatcher {
  router: Arc<Router>,
  tracker: TaskTracker,
  cancel: CancellationToken,
  interrupted: CancellationToken,
  counters: Arc<Counters>,
  permits: Arc<Semaphore>,
}

impl Dispatcher {
  async fn run(self, mut subscription: Subscription) {
    loop {
      let permit = tokio::select! {
        biased;

        _ = self.cancel.cancelled() => break,

        permit = Arc::clone(&self.permits).acquire_owned() => match permit {
          Ok(permit) => permit,
          Err(_) => break,
        },
      };

      let payload = tokio::select! {
        biased;

        _ = self.cancel.cancelled() => break,

        next = subscription.next() => match next {
          Some(payload) => payload,
          None => {
            warn!(subject = %subscription.subject(), "Live subscription ended unexpectedly");
            self.interrupted.cancel();
            break;
          }
        },
      };

      let router = Arc::clone(&self.router);
      let counters = Arc::clone(&self.counters);
      let cancel = self.cancel.clone();

      counters.unit_started();
      self.tracker.spawn(async move {
        let result = router.process(payload, &cancel).await;
        counters.record(&result);
        counters.unit_finished();
        drop(permit);
      });
    }

    let subject = subscription.subject().to_string();
    match subscription.unsubscribe().await {
      Ok(()) => debug!(subject = %subject, "Live subscription closed"),
      Err(e) => warn!(subject = %subject, error = %e, "Failed to unsubscribe"),
    }
  }
}
