//! Notification emitter
//!
//! Intents are handed to the delivery collaborator through a bounded mpsc
//! channel. Emission is fire-and-forget: the engine never waits on delivery
//! confirmation, and a full channel drops the intent with a warning rather
//! than blocking a state transition.

use shared::NotificationIntent;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::Sender<NotificationIntent>,
}

impl Notifier {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<NotificationIntent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }

    /// Emit an intent without waiting.
    pub fn emit(&self, intent: NotificationIntent) {
        match self.tx.try_send(intent) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(intent)) => {
                tracing::warn!(
                    kind = ?intent.kind,
                    recipient = intent.recipient_id,
                    "Notification channel full, intent dropped"
                );
            }
            Err(mpsc::error::TrySendError::Closed(intent)) => {
                tracing::warn!(
                    kind = ?intent.kind,
                    recipient = intent.recipient_id,
                    "Notification receiver gone, intent dropped"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{NotificationKind, RecipientRole};

    #[tokio::test]
    async fn emit_never_blocks_when_channel_is_full() {
        let (notifier, mut rx) = Notifier::new(1);
        for _ in 0..3 {
            notifier.emit(NotificationIntent::new(
                1,
                RecipientRole::Customer,
                NotificationKind::OrderStatusChanged,
                "status changed",
                "/orders/1",
            ));
        }
        // Only the first intent fits; the rest were dropped, not queued.
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }
}
