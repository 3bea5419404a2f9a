//! Server-wide shutdown signal for long-lived responses.

use tokio::sync::watch;

/// Ends open `/events/stream` responses once the server begins shutting down,
/// so graceful shutdown does not wait on clients that never disconnect.
///
/// A default value never fires.
#[derive(Debug, Clone)]
pub struct Shutdown(watch::Receiver<bool>);

impl Shutdown {
  /// Returns the trigger and the signal. Sending `true` fires every clone.
  pub fn new() -> (watch::Sender<bool>, Self) {
    let (trigger, signal) = watch::channel(false);
    (trigger, Self(signal))
  }

  /// Resolves once shutdown is requested. A trigger dropped without firing
  /// leaves this pending forever.
  pub async fn requested(mut self) {
    let fired = self.0.wait_for(|&stop| stop).await.is_ok();
    if !fired {
      std::future::pending::<()>().await;
    }
  }
}

impl Default for Shutdown {
  fn default() -> Self { Self(watch::channel(false).1) }
}
