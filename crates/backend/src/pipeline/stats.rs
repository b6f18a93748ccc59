use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::error;

use crate::router::{Route, RouteError};

/// Point-in-time copy of the controller counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
  /// Messages handed to the router, drain and live combined
  pub processed: u64,
  /// Messages whose processing ended in an error
  pub failed: u64,
  pub valid: u64,
  pub invalid: u64,
  /// Live-phase units spawned but not yet finished
  pub in_flight: u64,
  /// Messages routed successfully during the startup drain
  pub drained: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
  processed: AtomicU64,
  failed: AtomicU64,
  valid: AtomicU64,
  invalid: AtomicU64,
  in_flight: AtomicU64,
  drained: AtomicU64,
}

impl Counters {
  /// Count one finished message and log it if it failed.
  pub fn record(&self, result: &Result<Route, RouteError>) {
    self.processed.fetch_add(1, Ordering::Relaxed);
    match result {
      Ok(Route::Valid) => {
        self.valid.fetch_add(1, Ordering::Relaxed);
      }
      Ok(Route::Invalid) => {
        self.invalid.fetch_add(1, Ordering::Relaxed);
      }
      Err(e) => {
        self.failed.fetch_add(1, Ordering::Relaxed);
        error!(error = %e, "Failed to process message");
      }
    }
  }

  pub fn drained(&self) {
    self.drained.fetch_add(1, Ordering::Relaxed);
  }

  pub fn unit_started(&self) {
    self.in_flight.fetch_add(1, Ordering::SeqCst);
  }

  pub fn unit_finished(&self) {
    self.in_flight.fetch_sub(1, Ordering::SeqCst);
  }

  pub fn snapshot(&self) -> PipelineStats {
    PipelineStats {
      processed: self.processed.load(Ordering::Relaxed),
      failed: self.failed.load(Ordering::Relaxed),
      valid: self.valid.load(Ordering::Relaxed),
      invalid: self.invalid.load(Ordering::Relaxed),
      in_flight: self.in_flight.load(Ordering::SeqCst),
      drained: self.drained.load(Ordering::Relaxed),
    }
  }
}
