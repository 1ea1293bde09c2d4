// Notification fanout for workflow events

//! # Notification Broadcaster
//!
//! Committed transitions are published to observers through a [`NotificationBroadcaster`].
//! Delivery is best effort and happens after the commit:
//! - a failing or missing subscriber never rolls back or fails a transition
//! - there is no replay; an observer that connects late reads history from the store instead
//!
//! [`TopicBroadcaster`] is the in-process implementation. Subscribers register on a
//! [`Topic`] either with a callback ([`EventHandler`]) or as a channel receiver, and a
//! firehose of every published event is available through a tokio `broadcast` channel.

use dashmap::DashMap;
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::models::{Topic, WorkflowEvent};

/// Callback invoked for every event published on a subscribed topic
pub type EventHandler = Arc<dyn Fn(&WorkflowEvent) + Send + Sync>;

/// Buffered events per firehose receiver before it starts lagging
const FIREHOSE_CAPACITY: usize = 1000;

/// Delivery failures. Logged by the engine, never returned to transition callers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotificationError {
    #[error("{failed} subscriber(s) failed on topic {topic}")]
    Delivery { topic: Topic, failed: usize },

    #[error("Broadcaster unavailable: {0}")]
    Unavailable(String),
}

/// Returned by `subscribe`; pass it back to `unsubscribe`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    topic: Topic,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }
}

/// Topic-addressed event delivery
pub trait NotificationBroadcaster: Send + Sync {
    /// Deliver `event` once to each subscriber of each topic
    ///
    /// Returns the number of deliveries. An error reports subscribers that failed; every
    /// other subscriber has still received the event.
    fn publish(
        &self,
        topics: &BTreeSet<Topic>,
        event: &WorkflowEvent,
    ) -> std::result::Result<usize, NotificationError>;

    fn subscribe(&self, topic: Topic, handler: EventHandler) -> SubscriptionHandle;

    /// `false` when the handle was already removed
    fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool;

    fn subscriber_count(&self, topic: &Topic) -> usize;
}

#[derive(Clone)]
enum Sink {
    Callback(EventHandler),
    Channel(mpsc::UnboundedSender<WorkflowEvent>),
}

impl Sink {
    fn is_closed(&self) -> bool {
        match self {
            Sink::Callback(_) => false,
            Sink::Channel(sender) => sender.is_closed(),
        }
    }

    /// `false` when the subscriber failed to take the event
    fn deliver(&self, event: &WorkflowEvent) -> bool {
        match self {
            Sink::Callback(handler) => {
                panic::catch_unwind(AssertUnwindSafe(|| handler(event))).is_ok()
            }
            Sink::Channel(sender) => sender.send(event.clone()).is_ok(),
        }
    }
}

#[derive(Clone)]
struct Subscriber {
    id: u64,
    sink: Sink,
}

/// In-process broadcaster keyed by topic
pub struct TopicBroadcaster {
    subscribers: DashMap<Topic, Vec<Subscriber>>,
    next_id: AtomicU64,
    firehose: broadcast::Sender<WorkflowEvent>,
}

impl TopicBroadcaster {
    pub fn new() -> Self {
        let (firehose, _) = broadcast::channel(FIREHOSE_CAPACITY);

        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
            firehose,
        }
    }

    /// Subscribe with an unbounded channel instead of a callback
    ///
    /// The subscription is dropped on the next publish after the receiver goes away.
    pub fn subscribe_channel(
        &self,
        topic: Topic,
    ) -> (SubscriptionHandle, mpsc::UnboundedReceiver<WorkflowEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.add(topic, Sink::Channel(tx)), rx)
    }

    /// Every published event once, regardless of topic
    pub fn subscribe_all(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.firehose.subscribe()
    }

    pub fn topic_count(&self) -> usize {
        self.subscribers.len()
    }

    fn add(&self, topic: Topic, sink: Sink) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .entry(topic.clone())
            .or_default()
            .push(Subscriber { id, sink });

        SubscriptionHandle { id, topic }
    }

    fn prune_closed(&self, topic: &Topic) {
        self.subscribers
            .remove_if_mut(topic, |_, subscribers| {
                subscribers.retain(|s| !s.sink.is_closed());
                subscribers.is_empty()
            });
    }
}

impl Default for TopicBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationBroadcaster for TopicBroadcaster {
    fn publish(
        &self,
        topics: &BTreeSet<Topic>,
        event: &WorkflowEvent,
    ) -> std::result::Result<usize, NotificationError> {
        // nobody listening on the firehose is fine
        let _ = self.firehose.send(event.clone());

        let mut delivered = 0;
        let mut first_failure: Option<(Topic, usize)> = None;

        for topic in topics {
            // Snapshot so handlers can subscribe/unsubscribe without deadlocking the shard
            let snapshot: Vec<Subscriber> = match self.subscribers.get(topic) {
                Some(subscribers) => subscribers.clone(),
                None => continue,
            };

            let mut failed = 0;
            let mut saw_closed = false;
            for subscriber in &snapshot {
                if subscriber.sink.is_closed() {
                    saw_closed = true;
                    continue;
                }
                if subscriber.sink.deliver(event) {
                    delivered += 1;
                } else {
                    failed += 1;
                }
            }

            if saw_closed {
                self.prune_closed(topic);
            }
            if failed > 0 && first_failure.is_none() {
                first_failure = Some((topic.clone(), failed));
            }
        }

        match first_failure {
            Some((topic, failed)) => Err(NotificationError::Delivery { topic, failed }),
            None => Ok(delivered),
        }
    }

    fn subscribe(&self, topic: Topic, handler: EventHandler) -> SubscriptionHandle {
        self.add(topic, Sink::Callback(handler))
    }

    fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let mut removed = false;
        self.subscribers
            .remove_if_mut(&handle.topic, |_, subscribers| {
                let before = subscribers.len();
                subscribers.retain(|s| s.id != handle.id);
                removed = subscribers.len() < before;
                subscribers.is_empty()
            });
        removed
    }

    fn subscriber_count(&self, topic: &Topic) -> usize {
        self.subscribers
            .get(topic)
            .map_or(0, |subscribers| subscribers.iter().filter(|s| !s.sink.is_closed()).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobStatus, Metadata, Priority, TransitionRecord, WorkflowInstance};
    use std::sync::atomic::AtomicUsize;

    fn event() -> WorkflowEvent {
        let instance =
            WorkflowInstance::new("JC-5", JobStatus::Created.into(), "design", Priority::Normal);
        let record = TransitionRecord::new(
            instance.id,
            None,
            instance.status,
            "u-1",
            None,
            Metadata::new(),
        );
        WorkflowEvent::from_record(&instance, &record)
    }

    fn topics(list: &[Topic]) -> BTreeSet<Topic> {
        list.iter().cloned().collect()
    }

    fn counter(hits: &Arc<AtomicUsize>) -> EventHandler {
        let hits = Arc::clone(hits);
        Arc::new(move |_event: &WorkflowEvent| {
            hits.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn delivers_once_per_subscribed_topic() {
        let broadcaster = TopicBroadcaster::new();
        let global = Arc::new(AtomicUsize::new(0));
        let job = Arc::new(AtomicUsize::new(0));

        broadcaster.subscribe(Topic::Global, counter(&global));
        broadcaster.subscribe(Topic::job("JC-5"), counter(&job));
        broadcaster.subscribe(Topic::job("JC-6"), counter(&job));

        let delivered = broadcaster
            .publish(&topics(&[Topic::Global, Topic::job("JC-5")]), &event())
            .unwrap();

        assert_eq!(delivered, 2);
        assert_eq!(global.load(Ordering::SeqCst), 1);
        assert_eq!(job.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn no_subscribers_is_not_an_error() {
        let broadcaster = TopicBroadcaster::new();
        assert_eq!(
            broadcaster.publish(&topics(&[Topic::Global]), &event()),
            Ok(0)
        );
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let broadcaster = TopicBroadcaster::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let handle = broadcaster.subscribe(Topic::role("DESIGNER"), counter(&hits));

        assert!(broadcaster.unsubscribe(&handle));
        assert!(!broadcaster.unsubscribe(&handle));
        assert_eq!(broadcaster.subscriber_count(&Topic::role("DESIGNER")), 0);
        assert_eq!(broadcaster.topic_count(), 0);

        broadcaster
            .publish(&topics(&[Topic::role("DESIGNER")]), &event())
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_handler_is_reported_and_isolated() {
        let broadcaster = TopicBroadcaster::new();
        let hits = Arc::new(AtomicUsize::new(0));

        broadcaster.subscribe(
            Topic::Global,
            Arc::new(|_event: &WorkflowEvent| panic!("observer blew up")),
        );
        broadcaster.subscribe(Topic::Global, counter(&hits));

        let result = broadcaster.publish(&topics(&[Topic::Global]), &event());
        assert_eq!(
            result,
            Err(NotificationError::Delivery {
                topic: Topic::Global,
                failed: 1
            })
        );
        // the healthy subscriber still got it
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn channel_subscribers_receive_and_are_pruned() {
        let broadcaster = TopicBroadcaster::new();
        let (_handle, mut rx) = broadcaster.subscribe_channel(Topic::user("u-9"));
        let wanted = topics(&[Topic::user("u-9")]);

        broadcaster.publish(&wanted, &event()).unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.job_id, "JC-5");

        drop(rx);
        assert_eq!(broadcaster.subscriber_count(&Topic::user("u-9")), 0);
        assert_eq!(broadcaster.publish(&wanted, &event()), Ok(0));
        assert_eq!(broadcaster.topic_count(), 0);
    }

    #[tokio::test]
    async fn firehose_sees_every_event() {
        let broadcaster = TopicBroadcaster::new();
        let mut all = broadcaster.subscribe_all();

        broadcaster
            .publish(&topics(&[Topic::job("JC-5")]), &event())
            .unwrap();

        let received = all.recv().await.unwrap();
        assert_eq!(received.to_status, "CREATED");
    }
}
