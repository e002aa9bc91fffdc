//! # Event Publisher
//!
//! Publishing side of the bus. The in-memory bus also keeps per-topic
//! publish counters so a performance summary can show which part of the
//! pipeline is chatty and how much of it nobody was listening to.

use crate::events::{EventFilter, EventTopic, PipelineEvent};
use crate::subscriber::{EventStream, Subscription};
use crate::DEFAULT_CHANNEL_CAPACITY;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Trait for publishing events to the bus.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an event to the bus.
    ///
    /// Returns the number of subscribers holding a copy. Zero is not an
    /// error; observers are optional.
    async fn publish(&self, event: PipelineEvent) -> usize;
}

/// Publish counters of an [`InMemoryEventBus`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    pub published: u64,
    /// Events published while no subscriber was attached.
    pub unobserved: u64,
    pub subscribers: usize,
    pub batching: u64,
    pub load_balancing: u64,
    pub metrics: u64,
    pub targets: u64,
}

impl BusStats {
    /// Events published on `topic`. `All` is the grand total.
    #[must_use]
    pub fn published_on(&self, topic: EventTopic) -> u64 {
        match topic {
            EventTopic::Batching => self.batching,
            EventTopic::LoadBalancing => self.load_balancing,
            EventTopic::Metrics => self.metrics,
            EventTopic::Targets => self.targets,
            EventTopic::All => self.published,
        }
    }
}

#[derive(Default)]
struct PublishCounters {
    unobserved: AtomicU64,
    batching: AtomicU64,
    load_balancing: AtomicU64,
    metrics: AtomicU64,
    targets: AtomicU64,
}

impl PublishCounters {
    fn for_topic(&self, topic: EventTopic) -> Option<&AtomicU64> {
        match topic {
            EventTopic::Batching => Some(&self.batching),
            EventTopic::LoadBalancing => Some(&self.load_balancing),
            EventTopic::Metrics => Some(&self.metrics),
            EventTopic::Targets => Some(&self.targets),
            EventTopic::All => None,
        }
    }
}

/// In-memory event bus over `tokio::sync::broadcast`.
///
/// Filtering happens on the receiving side: every subscriber gets a copy of
/// every event and drops what its [`EventFilter`] rejects.
pub struct InMemoryEventBus {
    sender: broadcast::Sender<PipelineEvent>,
    counters: PublishCounters,
}

impl InMemoryEventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Bus whose subscribers may fall `capacity` events behind before the
    /// oldest are skipped.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            counters: PublishCounters::default(),
        }
    }

    /// Subscribe to events matching a filter.
    ///
    /// Only events published after this call are delivered.
    #[must_use]
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        debug!(topics = ?filter.topics, components = ?filter.components, "New subscription created");
        Subscription::new(self.sender.subscribe(), filter)
    }

    /// Events matching a filter as a `Stream`.
    #[must_use]
    pub fn event_stream(&self, filter: EventFilter) -> EventStream {
        self.subscribe(filter).into()
    }

    #[must_use]
    pub fn stats(&self) -> BusStats {
        let c = &self.counters;
        let batching = c.batching.load(Ordering::Relaxed);
        let load_balancing = c.load_balancing.load(Ordering::Relaxed);
        let metrics = c.metrics.load(Ordering::Relaxed);
        let targets = c.targets.load(Ordering::Relaxed);
        BusStats {
            published: batching + load_balancing + metrics + targets,
            unobserved: c.unobserved.load(Ordering::Relaxed),
            subscribers: self.sender.receiver_count(),
            batching,
            load_balancing,
            metrics,
            targets,
        }
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventBus {
    async fn publish(&self, event: PipelineEvent) -> usize {
        let name = event.name();
        let topic = event.topic();
        if let Some(counter) = self.counters.for_topic(topic) {
            counter.fetch_add(1, Ordering::Relaxed);
        }

        match self.sender.send(event) {
            Ok(receivers) => {
                trace!(event = name, ?topic, receivers, "Event published");
                receivers
            }
            Err(_) => {
                self.counters.unobserved.fetch_add(1, Ordering::Relaxed);
                trace!(event = name, ?topic, "Event published without subscribers");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn node_added() -> PipelineEvent {
        PipelineEvent::WorkerNodeAdded {
            node_id: "node-1".to_string(),
            region: "eu-west".to_string(),
            quantum_ready: false,
            max_capacity: 100,
        }
    }

    fn batch_created() -> PipelineEvent {
        PipelineEvent::BatchCreated {
            batch_id: Uuid::new_v4(),
            tx_count: 100,
            total_gas: 2_100_000,
            trigger: "size".to_string(),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_counted_unobserved() {
        let bus = InMemoryEventBus::new();

        assert_eq!(bus.publish(node_added()).await, 0);

        let stats = bus.stats();
        assert_eq!(stats.published, 1);
        assert_eq!(stats.unobserved, 1);
        assert_eq!(stats.subscribers, 0);
    }

    #[tokio::test]
    async fn test_every_subscriber_gets_a_copy() {
        let bus = InMemoryEventBus::new();
        let _all = bus.subscribe(EventFilter::all());
        let _batching = bus.subscribe(EventFilter::topics(vec![EventTopic::Batching]));

        // Filtering happens on the receiving side.
        assert_eq!(bus.publish(node_added()).await, 2);
        assert_eq!(bus.stats().unobserved, 0);
        assert_eq!(bus.stats().subscribers, 2);
    }

    #[tokio::test]
    async fn test_stats_split_by_topic() {
        let bus = InMemoryEventBus::new();
        bus.publish(batch_created()).await;
        bus.publish(batch_created()).await;
        bus.publish(node_added()).await;

        let stats = bus.stats();
        assert_eq!(stats.published_on(EventTopic::Batching), 2);
        assert_eq!(stats.published_on(EventTopic::LoadBalancing), 1);
        assert_eq!(stats.published_on(EventTopic::Targets), 0);
        assert_eq!(stats.published_on(EventTopic::All), 3);
    }

    #[test]
    fn test_dropped_subscriptions_release_receivers() {
        let bus = InMemoryEventBus::default();
        {
            let _a = bus.subscribe(EventFilter::all());
            let _b = bus.subscribe(EventFilter::all());
            assert_eq!(bus.stats().subscribers, 2);
        }
        assert_eq!(bus.stats().subscribers, 0);
    }
}
