//! Lifecycle of the streaming subscription behind the current view.
//!
//! `SubscriptionHandle::open` bumps a generation counter and spawns one
//! task that connects, pumps messages and reconnects with backoff. The
//! task gives up once a connection attempt fails with no retries left in
//! the policy, i.e. after `max_attempts + 1` consecutive failures. Every
//! event the task emits carries the generation it was spawned with, so the
//! consumer can drop anything produced by a handle that has since been
//! closed or reopened.

use crate::backoff::BackoffPolicy;
use crate::metrics::STREAM_RECONNECTS;
use crate::stream::{Feed, StreamConnection, StreamConnector, StreamMessage};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Connected,
    Message(StreamMessage),
    Disconnected { reason: String },
    /// Reconnect budget spent; the task has exited.
    GaveUp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionEvent {
    pub generation: u64,
    pub event: StreamEvent,
}

struct ActiveSubscription {
    feed: Feed,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct SubscriptionHandle {
    connector: Arc<dyn StreamConnector>,
    policy: BackoffPolicy,
    events: mpsc::UnboundedSender<SubscriptionEvent>,
    generation: u64,
    active: Option<ActiveSubscription>,
}

impl SubscriptionHandle {
    pub fn new(
        connector: Arc<dyn StreamConnector>,
        policy: BackoffPolicy,
        events: mpsc::UnboundedSender<SubscriptionEvent>,
    ) -> Self {
        Self {
            connector,
            policy,
            events,
            generation: 0,
            active: None,
        }
    }

    /// Close any current subscription, then start one for `feed`.
    /// Returns the generation its events will carry.
    pub fn open(&mut self, feed: Feed) -> u64 {
        self.close();
        self.generation += 1;

        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_subscription(
            self.connector.clone(),
            feed.clone(),
            self.generation,
            self.policy.clone(),
            self.events.clone(),
            shutdown_rx,
        ));
        tracing::info!(feed = %feed, generation = self.generation, "Subscription opened");

        self.active = Some(ActiveSubscription {
            feed,
            shutdown,
            task,
        });
        self.generation
    }

    /// Signal the running task to disconnect. Also bumps the generation, so
    /// anything the task emits while winding down is already stale.
    pub fn close(&mut self) {
        if let Some(active) = self.active.take() {
            self.generation += 1;
            let _ = active.shutdown.send(());
            tracing::info!(feed = %active.feed, "Subscription closed");
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn feed(&self) -> Option<&Feed> {
        self.active.as_ref().map(|a| &a.feed)
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.task.abort();
        }
    }
}

async fn run_subscription(
    connector: Arc<dyn StreamConnector>,
    feed: Feed,
    generation: u64,
    policy: BackoffPolicy,
    events: mpsc::UnboundedSender<SubscriptionEvent>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let emit = |event: StreamEvent| events.send(SubscriptionEvent { generation, event }).is_ok();
    let mut backoff = policy.start();

    loop {
        let connected = tokio::select! {
            _ = &mut shutdown => return,
            result = connector.connect(&feed) => result,
        };

        let reason = match connected {
            Ok(mut conn) => {
                backoff.reset();
                if !emit(StreamEvent::Connected) {
                    conn.close().await;
                    return;
                }
                match pump(conn.as_mut(), &mut shutdown, &emit).await {
                    Pumped::Stop => {
                        conn.close().await;
                        return;
                    }
                    Pumped::Lost(reason) => {
                        conn.close().await;
                        reason
                    }
                }
            }
            Err(e) => e.to_string(),
        };

        tracing::warn!(feed = %feed, generation, reason = %reason, "Stream disconnected");
        if !emit(StreamEvent::Disconnected { reason }) {
            return;
        }

        match backoff.next_delay() {
            Some(delay) => {
                STREAM_RECONNECTS.inc();
                tracing::debug!(
                    feed = %feed,
                    attempt = backoff.attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "Reconnecting"
                );
                tokio::select! {
                    _ = &mut shutdown => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            None => {
                tracing::error!(feed = %feed, generation, "Stream reconnect budget spent, giving up");
                emit(StreamEvent::GaveUp);
                return;
            }
        }
    }
}

enum Pumped {
    /// Shutdown requested or nobody is listening any more.
    Stop,
    Lost(String),
}

async fn pump(
    conn: &mut dyn StreamConnection,
    shutdown: &mut oneshot::Receiver<()>,
    emit: &impl Fn(StreamEvent) -> bool,
) -> Pumped {
    loop {
        let next = tokio::select! {
            _ = &mut *shutdown => return Pumped::Stop,
            next = conn.next_message() => next,
        };
        match next {
            Some(Ok(message)) => {
                if !emit(StreamEvent::Message(message)) {
                    return Pumped::Stop;
                }
            }
            Some(Err(e)) => return Pumped::Lost(e.to_string()),
            None => return Pumped::Lost("closed by peer".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::ChannelConnector;
    use crate::subject::SubjectId;
    use std::time::Duration;

    fn policy(max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_millis(5),
            max: Duration::from_millis(20),
            multiplier: 2.0,
            jitter: 0.0,
            max_attempts,
        }
    }

    fn subject(raw: &str) -> SubjectId {
        SubjectId::parse(raw).unwrap()
    }

    fn feed(raw: &str) -> Feed {
        Feed::Subject(subject(raw))
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<SubscriptionEvent>) -> SubscriptionEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("event in time")
            .expect("channel open")
    }

    #[tokio::test]
    async fn test_open_connects_and_forwards_messages() {
        let broker = ChannelConnector::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = SubscriptionHandle::new(Arc::new(broker.clone()), policy(3), tx);

        let generation = handle.open(feed("p1"));
        assert_eq!(next(&mut rx).await, SubscriptionEvent { generation, event: StreamEvent::Connected });

        broker.publish_vitals(&subject("p1"), "{}");
        assert_eq!(
            next(&mut rx).await.event,
            StreamEvent::Message(StreamMessage::Vitals("{}".to_string()))
        );
        assert_eq!(handle.generation(), generation);
    }

    #[tokio::test]
    async fn test_reopen_bumps_generation_and_releases_old_connection() {
        let broker = ChannelConnector::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = SubscriptionHandle::new(Arc::new(broker.clone()), policy(3), tx);

        let first = handle.open(feed("a"));
        next(&mut rx).await;
        let second = handle.open(feed("b"));
        assert!(second > first);
        assert_eq!(handle.generation(), second);

        let connected = next(&mut rx).await;
        assert_eq!(connected, SubscriptionEvent { generation: second, event: StreamEvent::Connected });

        for _ in 0..50 {
            if broker.open_connections(&subject("a")) == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(broker.open_connections(&subject("a")), 0);
        assert_eq!(handle.feed(), Some(&feed("b")));
    }

    #[tokio::test]
    async fn test_gives_up_when_retries_are_spent() {
        let broker = ChannelConnector::new();
        broker.fail_next_connects(10);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = SubscriptionHandle::new(Arc::new(broker.clone()), policy(2), tx);

        handle.open(feed("p1"));
        let mut events = Vec::new();
        loop {
            let event = next(&mut rx).await.event;
            let done = event == StreamEvent::GaveUp;
            events.push(event);
            if done {
                break;
            }
        }
        let disconnects = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::Disconnected { .. }))
            .count();
        // The first attempt plus two retries.
        assert_eq!(disconnects, 3);
        assert_eq!(broker.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_reconnects_after_transport_error() {
        let broker = ChannelConnector::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = SubscriptionHandle::new(Arc::new(broker.clone()), policy(3), tx);

        handle.open(feed("p1"));
        assert_eq!(next(&mut rx).await.event, StreamEvent::Connected);

        broker.break_connections(&subject("p1"));
        assert!(matches!(next(&mut rx).await.event, StreamEvent::Disconnected { .. }));
        assert_eq!(next(&mut rx).await.event, StreamEvent::Connected);
        assert_eq!(broker.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_close_makes_every_generation_stale() {
        let broker = ChannelConnector::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut handle = SubscriptionHandle::new(Arc::new(broker), policy(3), tx);

        let generation = handle.open(feed("p1"));
        handle.close();
        assert!(handle.generation() > generation);
        assert!(handle.feed().is_none());
    }

    #[tokio::test]
    async fn test_ward_feed_forwards_ward_messages() {
        let broker = ChannelConnector::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = SubscriptionHandle::new(Arc::new(broker.clone()), policy(3), tx);

        handle.open(Feed::Ward);
        assert_eq!(next(&mut rx).await.event, StreamEvent::Connected);
        assert_eq!(broker.publish_ward("{}"), 1);
        assert_eq!(
            next(&mut rx).await.event,
            StreamEvent::Message(StreamMessage::Ward("{}".to_string()))
        );
    }
}
