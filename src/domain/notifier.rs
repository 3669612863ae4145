//! Broadcast channel for observer notifications.
//!
//! [`Notifier`] wraps a [`tokio::sync::broadcast`] channel. It is created
//! once at process start and handed to every component that publishes, so
//! there is no global channel handle.

use tokio::sync::broadcast;

use super::Notification;

/// Broadcast bus for [`Notification`]s.
///
/// Backed by a `tokio::broadcast` channel with a configurable capacity
/// (default 10 000). When the ring buffer is full, the oldest
/// notifications are dropped for lagging receivers.
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: broadcast::Sender<Notification>,
}

impl Notifier {
    /// Creates a new `Notifier` with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes a notification to all current subscribers.
    ///
    /// Returns the number of receivers that got it. With no receivers the
    /// notification is dropped.
    pub fn publish(&self, notification: Notification) -> usize {
        tracing::trace!(name = notification.name(), "publishing notification");
        self.sender.send(notification).unwrap_or(0)
    }

    /// Creates a new receiver that will receive all future notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Returns the current number of active receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_notification(changed: usize) -> Notification {
        Notification::DeviceStatusChanged {
            source: "access_control".to_string(),
            changed,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn publish_without_receivers_returns_zero() {
        let notifier = Notifier::new(100);
        assert_eq!(notifier.publish(make_notification(1)), 0);
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_notification() {
        let notifier = Notifier::new(100);
        let mut rx1 = notifier.subscribe();
        let mut rx2 = notifier.subscribe();

        assert_eq!(notifier.publish(make_notification(2)), 2);

        let Ok(n1) = rx1.recv().await else {
            panic!("rx1 failed");
        };
        let Ok(n2) = rx2.recv().await else {
            panic!("rx2 failed");
        };
        assert_eq!(n1, n2);
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_notifications() {
        let notifier = Notifier::new(100);
        let _keepalive = notifier.subscribe();
        notifier.publish(make_notification(1));

        let mut late = notifier.subscribe();
        notifier.publish(make_notification(2));

        let Ok(Notification::DeviceStatusChanged { changed, .. }) = late.recv().await else {
            panic!("late subscriber failed");
        };
        assert_eq!(changed, 2);
    }

    #[test]
    fn receiver_count_tracks_subscribers() {
        let notifier = Notifier::new(100);
        assert_eq!(notifier.receiver_count(), 0);

        let rx1 = notifier.subscribe();
        let _rx2 = notifier.subscribe();
        assert_eq!(notifier.receiver_count(), 2);

        drop(rx1);
        assert_eq!(notifier.receiver_count(), 1);
    }
}
