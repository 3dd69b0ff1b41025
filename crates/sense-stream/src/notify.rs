//! Push notifications from the backend ("new message", "progress update").
//!
//! Every subscriber gets its own receiver, so one consumer acknowledging an
//! event never hides it from another.
use futures::{Stream, StreamExt as _};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const DEFAULT_CAPACITY: usize = 64;

/// Kind of push event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A new message (broker email) arrived.
    NewMessage,
    /// A long-running job reported progress.
    ProgressUpdate,
}

impl EventKind {
    /// Maps a backend event name. Unknown names yield `None`.
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "new_email" | "new_message" => Some(Self::NewMessage),
            "progress_update" => Some(Self::ProgressUpdate),
            _ => None,
        }
    }
}

/// One push event.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Notification {
    pub kind: EventKind,
    pub payload: serde_json::Value,
}

impl Notification {
    pub fn new(kind: EventKind, payload: serde_json::Value) -> Self {
        Self { kind, payload }
    }
}

/// Fan-out hub for push events.
#[derive(Clone)]
pub struct NotificationChannel {
    tx: broadcast::Sender<Notification>,
}

impl Default for NotificationChannel {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl NotificationChannel {
    /// Creates a channel that buffers up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Delivers an event to every live subscriber and returns how many
    /// receivers it reached.
    pub fn publish(&self, notification: Notification) -> usize {
        let kind = notification.kind;
        let delivered = self.tx.send(notification).unwrap_or(0);
        debug!(?kind, delivered, "notification published");
        delivered
    }

    /// Subscribes to events of one kind.
    pub fn subscribe(&self, kind: EventKind) -> Subscription {
        Subscription {
            kind,
            rx: self.tx.subscribe(),
        }
    }

    /// Runs `callback` for every event of `kind` on a spawned task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe_with<F>(&self, kind: EventKind, mut callback: F) -> CallbackSubscription
    where
        F: FnMut(Notification) + Send + 'static,
    {
        let mut subscription = self.subscribe(kind);
        let task = tokio::spawn(async move {
            while let Some(notification) = subscription.recv().await {
                callback(notification);
            }
        });
        CallbackSubscription { task }
    }

    /// Publishes every `(event_name, payload)` pair of an external event
    /// source until it ends. Unknown event names are skipped.
    pub fn forward_from<S>(&self, source: S) -> JoinHandle<()>
    where
        S: Stream<Item = (String, serde_json::Value)> + Send + 'static,
    {
        let channel = self.clone();
        tokio::spawn(async move {
            let mut source = std::pin::pin!(source);
            while let Some((name, payload)) = source.next().await {
                match EventKind::from_wire(&name) {
                    Some(kind) => {
                        channel.publish(Notification::new(kind, payload));
                    }
                    None => debug!(event = %name, "ignoring unknown push event"),
                }
            }
            debug!("notification source ended");
        })
    }
}

/// Receiver for one event kind.
pub struct Subscription {
    kind: EventKind,
    rx: broadcast::Receiver<Notification>,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Waits for the next event of this subscription's kind.
    ///
    /// Events dropped because this subscriber fell behind are skipped.
    /// Returns `None` once every `NotificationChannel` clone is gone.
    pub async fn recv(&mut self) -> Option<Notification> {
        loop {
            match self.rx.recv().await {
                Ok(notification) if notification.kind == self.kind => return Some(notification),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(kind = ?self.kind, skipped, "subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Callback subscription; dropping it stops delivery.
pub struct CallbackSubscription {
    task: JoinHandle<()>,
}

impl CallbackSubscription {
    /// Stops delivering events to the callback.
    pub fn unsubscribe(self) {}
}

impl Drop for CallbackSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[tokio::test]
    async fn subscribers_only_receive_their_kind() {
        let channel = NotificationChannel::default();
        let mut messages = channel.subscribe(EventKind::NewMessage);
        let mut progress = channel.subscribe(EventKind::ProgressUpdate);

        channel.publish(Notification::new(
            EventKind::ProgressUpdate,
            serde_json::json!({"pct": 50}),
        ));
        channel.publish(Notification::new(
            EventKind::NewMessage,
            serde_json::json!({"subject": "Loss runs"}),
        ));

        let got = messages.recv().await.expect("new message");
        assert_eq!(got.payload["subject"], "Loss runs");
        let got = progress.recv().await.expect("progress");
        assert_eq!(got.payload["pct"], 50);
    }

    #[tokio::test]
    async fn every_subscriber_gets_every_event() {
        let channel = NotificationChannel::default();
        let mut a = channel.subscribe(EventKind::NewMessage);
        let mut b = channel.subscribe(EventKind::NewMessage);
        let delivered = channel.publish(Notification::new(
            EventKind::NewMessage,
            serde_json::Value::Null,
        ));
        assert_eq!(delivered, 2);
        assert!(a.recv().await.is_some());
        assert!(b.recv().await.is_some());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_dropped() {
        let channel = NotificationChannel::default();
        assert_eq!(
            channel.publish(Notification::new(EventKind::NewMessage, serde_json::Value::Null)),
            0
        );
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_dropped_events() {
        let channel = NotificationChannel::new(2);
        let mut sub = channel.subscribe(EventKind::ProgressUpdate);
        for pct in 0..5 {
            channel.publish(Notification::new(
                EventKind::ProgressUpdate,
                serde_json::json!({ "pct": pct }),
            ));
        }
        let first = sub.recv().await.expect("event after lag");
        assert_eq!(first.payload["pct"], 3);
        let second = sub.recv().await.expect("next event");
        assert_eq!(second.payload["pct"], 4);
    }

    #[tokio::test]
    async fn recv_ends_when_channel_dropped() {
        let channel = NotificationChannel::default();
        let mut sub = channel.subscribe(EventKind::NewMessage);
        drop(channel);
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn callback_subscription_runs_until_dropped() {
        let channel = NotificationChannel::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let subscription = channel.subscribe_with(EventKind::NewMessage, move |n| {
            sink.lock().expect("lock").push(n.payload);
        });

        channel.publish(Notification::new(EventKind::NewMessage, serde_json::json!(1)));
        tokio::time::timeout(Duration::from_secs(1), async {
            while seen.lock().expect("lock").is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("callback ran");

        subscription.unsubscribe();
        channel.publish(Notification::new(EventKind::NewMessage, serde_json::json!(2)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*seen.lock().expect("lock"), vec![serde_json::json!(1)]);
    }

    #[tokio::test]
    async fn forward_from_maps_wire_names() {
        let channel = NotificationChannel::default();
        let mut sub = channel.subscribe(EventKind::NewMessage);
        let source = futures::stream::iter(vec![
            ("connect".to_string(), serde_json::Value::Null),
            ("new_email".to_string(), serde_json::json!({"id": "m1"})),
        ]);
        channel.forward_from(source).await.expect("forwarder");
        let got = sub.recv().await.expect("forwarded");
        assert_eq!(got.payload["id"], "m1");
    }
}
