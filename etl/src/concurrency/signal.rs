//! Payload-free notification channel.

use tokio::sync::watch;

/// Sending half of a signal channel.
pub type SignalTx = watch::Sender<()>;

/// Receiving half of a signal channel.
///
/// Receivers created by [`create_signal`] start with the initial value already seen, so
/// [`watch::Receiver::has_changed`] only reports signals sent afterwards.
pub type SignalRx = watch::Receiver<()>;

/// Creates a new signal channel.
pub fn create_signal() -> (SignalTx, SignalRx) {
    watch::channel(())
}
