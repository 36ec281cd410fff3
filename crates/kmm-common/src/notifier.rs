//! Single-value broadcaster for configuration changes
//!
//! A [`Notifier`] holds the latest value of some configuration behind a
//! read-write lock and hands out a notification token every time the value
//! is replaced. Delivery is a rendezvous: [`Notifier::set`] does not return
//! until a receiver has taken the token, so no change is ever dropped.
//! Callers that must not block should call `set` from a dedicated task.

use std::sync::Arc;

use futures::Stream;
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot, Mutex};

/// Token delivered to receivers when the value changes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Notification;

type Handoff = oneshot::Sender<()>;

/// Lock-protected value plus a change notification channel
pub struct Notifier<T> {
    value: RwLock<T>,
    tx: mpsc::Sender<Handoff>,
    rx: Arc<Mutex<mpsc::Receiver<Handoff>>>,
}

impl<T: Clone> Notifier<T> {
    /// Create a notifier holding `value`
    pub fn new(value: T) -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            value: RwLock::new(value),
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Current value
    pub fn get(&self) -> T {
        self.value.read().clone()
    }

    /// Replace the value, then wait until a receiver accepts the notification.
    pub async fn set(&self, value: T) {
        *self.value.write() = value;

        let (handoff, accepted) = oneshot::channel();
        // The notifier owns the receiving half, so the channel cannot close.
        if self.tx.send(handoff).await.is_err() {
            return;
        }
        let _ = accepted.await;
    }

    /// Receiving side of the notification channel.
    ///
    /// Every handle shares the same channel; each notification is taken by
    /// exactly one receiver.
    pub fn channel(&self) -> NotificationReceiver {
        NotificationReceiver {
            rx: Arc::clone(&self.rx),
        }
    }
}

/// Receive-only handle on a [`Notifier`]'s channel
#[derive(Clone)]
pub struct NotificationReceiver {
    rx: Arc<Mutex<mpsc::Receiver<Handoff>>>,
}

impl NotificationReceiver {
    /// Wait for the next notification.
    ///
    /// Returns `None` only once the notifier has been dropped.
    pub async fn recv(&self) -> Option<Notification> {
        let handoff = self.rx.lock().await.recv().await?;
        let _ = handoff.send(());
        Some(Notification)
    }

    /// Turn the receiver into a stream, e.g. to trigger a controller
    /// re-reconcile on every configuration change.
    pub fn into_stream(self) -> impl Stream<Item = Notification> {
        futures::stream::unfold(self, |rx| async move {
            let n = rx.recv().await?;
            Some((n, rx))
        })
    }
}
