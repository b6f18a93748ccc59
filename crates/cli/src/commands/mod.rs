//! CLI command implementations

mod check;
mod collector;
mod config;
mod validator;

pub use check::cmd_check;
pub use collector::cmd_collector;
pub use config::cmd_config_show;
pub use validator::cmd_validator;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancel `cancel` on ctrl-c, or on SIGTERM where available.
fn cancel_on_shutdown_signal(cancel: CancellationToken) {
  tokio::spawn(async move {
    #[cfg(unix)]
    let terminate = async {
      match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut stream) => {
          stream.recv().await;
        }
        Err(e) => {
          warn!(error = %e, "Failed to listen for SIGTERM");
          std::future::pending::<()>().await;
        }
      }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
      result = signal::ctrl_c() => {
        if let Err(e) = result {
          warn!(error = %e, "Failed to listen for ctrl-c");
          return;
        }
        info!("Received ctrl-c, shutting down...");
      }
      _ = terminate => info!("Received SIGTERM, shutting down..."),
    }

    cancel.cancel();
  });
}
