use tokio::sync::watch;

use crate::concurrency::signal::{SignalRx, SignalTx, create_signal};

/// Handle used to cancel a running load.
///
/// Cloning the handle is cheap. Every [`ShutdownRx`] subscribed from it observes the same signal.
#[derive(Debug, Clone)]
pub struct ShutdownTx(SignalTx);

impl ShutdownTx {
    pub fn wrap(tx: SignalTx) -> Self {
        Self(tx)
    }

    /// Requests cancellation.
    ///
    /// Fails only when every receiver is gone, which means the run already finished.
    pub fn shutdown(&self) -> Result<(), watch::error::SendError<()>> {
        self.0.send(())
    }

    pub fn subscribe(&self) -> ShutdownRx {
        self.0.subscribe()
    }
}

pub type ShutdownRx = SignalRx;

/// Outcome of an operation that may have been interrupted by cancellation.
///
/// `I` carries whatever partial work was in hand when cancellation was observed.
#[derive(Debug)]
pub enum ShutdownResult<T, I> {
    Ok(T),
    Shutdown(I),
}

impl<T, I> ShutdownResult<T, I> {
    pub fn should_shutdown(&self) -> bool {
        matches!(self, ShutdownResult::Shutdown(_))
    }
}

/// Returns `true` if cancellation was requested on `shutdown_rx` and not yet acknowledged.
pub fn is_shutdown_requested(shutdown_rx: &ShutdownRx) -> bool {
    shutdown_rx.has_changed().unwrap_or(false)
}

pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = create_signal();
    (ShutdownTx::wrap(tx), rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receivers_only_observe_signals_sent_after_subscription() {
        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
        assert!(!is_shutdown_requested(&shutdown_rx));

        let late_rx = shutdown_tx.subscribe();
        shutdown_tx.shutdown().unwrap();

        assert!(is_shutdown_requested(&shutdown_rx));
        assert!(is_shutdown_requested(&late_rx));
    }

    #[test]
    fn clones_keep_a_signal_sent_before_they_were_made() {
        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
        shutdown_tx.shutdown().unwrap();

        let cloned_rx = shutdown_rx.clone();
        let subscribed_rx = shutdown_tx.subscribe();

        assert!(is_shutdown_requested(&cloned_rx));
        assert!(!is_shutdown_requested(&subscribed_rx));
    }
}
