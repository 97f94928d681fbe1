use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::protocol::LifecycleEvent;

/// Receiving side of one viewer attachment.
pub type ViewerReceiver = mpsc::UnboundedReceiver<LifecycleEvent>;

/// Fan-out of lifecycle events to every attached viewer.
///
/// Each viewer owns an unbounded queue, so a slow viewer never loses events
/// and receives them in publish order. Nothing is buffered for viewers that
/// are not attached yet: an event published while nobody listens is gone.
#[derive(Clone, Default)]
pub struct Relay {
    viewers: Arc<Mutex<Vec<mpsc::UnboundedSender<LifecycleEvent>>>>,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<LifecycleEvent>>> {
        self.viewers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns how many viewers received the event. Detached viewers are
    /// pruned on the way.
    pub fn publish(&self, event: LifecycleEvent) -> usize {
        let mut viewers = self.lock();
        viewers.retain(|tx| tx.send(event.clone()).is_ok());
        let delivered = viewers.len();
        if delivered == 0 {
            tracing::trace!(
                session = %event.stream_id().short(),
                "No viewer attached, dropping {}",
                event.name()
            );
        }
        delivered
    }

    pub fn subscribe(&self) -> ViewerReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    /// Runs `handler` for every event published from now on, in order.
    pub fn subscribe_with<F>(&self, mut handler: F) -> Subscription
    where
        F: FnMut(LifecycleEvent) + Send + 'static,
    {
        let mut rx = self.subscribe();
        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                handler(event);
            }
        });
        Subscription { task: Some(task) }
    }

    /// Event stream for transports that push to remote viewers.
    pub fn event_stream(&self) -> impl Stream<Item = LifecycleEvent> + Send + 'static {
        UnboundedReceiverStream::new(self.subscribe())
    }

    pub fn viewer_count(&self) -> usize {
        let mut viewers = self.lock();
        viewers.retain(|tx| !tx.is_closed());
        viewers.len()
    }
}

/// Handle of a [`Relay::subscribe_with`] registration. Dropping it detaches
/// the handler.
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Detaches the handler and waits until its receiver is released.
    pub async fn unsubscribe(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SessionId;

    fn chunk(text: &str) -> LifecycleEvent {
        LifecycleEvent::Chunk {
            stream_id: SessionId::from("s-1"),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn publish_without_viewers_drops() {
        let relay = Relay::new();
        assert_eq!(relay.publish(chunk("lost")), 0);

        let mut rx = relay.subscribe();
        relay.publish(chunk("kept"));
        assert_eq!(rx.recv().await.unwrap(), chunk("kept"));
    }

    #[tokio::test]
    async fn every_viewer_sees_events_in_order() {
        let relay = Relay::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let _a = relay.subscribe_with(move |e| {
            let _ = tx_a.send(e);
        });
        let _b = relay.subscribe_with(move |e| {
            let _ = tx_b.send(e);
        });
        assert_eq!(relay.viewer_count(), 2);

        for text in ["one", "two", "three"] {
            assert_eq!(relay.publish(chunk(text)), 2);
        }
        for rx in [&mut rx_a, &mut rx_b] {
            for text in ["one", "two", "three"] {
                assert_eq!(rx.recv().await.unwrap(), chunk(text));
            }
        }
    }

    #[tokio::test]
    async fn slow_viewer_receives_every_event() {
        let relay = Relay::new();
        let mut rx = relay.subscribe();

        let texts: Vec<String> = (0..5000).map(|i| format!("{} ", i)).collect();
        for text in &texts {
            assert_eq!(relay.publish(chunk(text)), 1);
        }

        for text in &texts {
            assert_eq!(rx.recv().await.unwrap(), chunk(text));
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_receiver_is_pruned() {
        let relay = Relay::new();
        let rx = relay.subscribe();
        let mut kept = relay.subscribe();
        assert_eq!(relay.viewer_count(), 2);

        drop(rx);
        assert_eq!(relay.publish(chunk("x")), 1);
        assert_eq!(relay.viewer_count(), 1);
        assert_eq!(kept.recv().await.unwrap(), chunk("x"));
    }

    #[tokio::test]
    async fn unsubscribe_detaches_handler() {
        let relay = Relay::new();
        let sub = relay.subscribe_with(|_| {});
        assert_eq!(relay.viewer_count(), 1);
        sub.unsubscribe().await;
        assert_eq!(relay.viewer_count(), 0);
        assert_eq!(relay.publish(chunk("nobody")), 0);
    }
}
