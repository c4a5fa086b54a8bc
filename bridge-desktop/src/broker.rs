//! In-process message broker
//!
//! A single-process stand-in for a partitioned topic broker, with the
//! delivery guarantees the sync pipeline relies on:
//!
//! - **Ordering**: the ordering key is hashed onto a fixed partition; each
//!   partition of a consumer group is handled by one dispatcher at a time
//! - **At-least-once**: a failed delivery retries the same message in place
//! - **Bounded redelivery**: after `max_redelivery` retries the message is
//!   re-published to `%DLQ%<consumer_group>` with the last error attached
//! - **Deferral**: a `NotReady` delivery is retried every `defer_interval`
//!   without spending the redelivery budget, up to `max_deferrals` times;
//!   after that it counts as a failed attempt
//! - **Single dead-letter hop**: a dead-letter message that exhausts its own
//!   budget, or that has no subscriber, is dropped and logged
//! - **Retention**: messages for a regular topic nobody subscribed to yet are
//!   kept and handed to the first group that subscribes
//!
//! Use [`InMemoryBroker::drain`] to process everything synchronously (tests,
//! one-shot runs) or [`InMemoryBroker::start`] to spawn background dispatchers.

use async_trait::async_trait;
use bridge_traits::{
    broker::{
        dead_letter_topic, is_dead_letter_topic, Delivery, HandlerError, MessageBroker,
        MessageHandler, MessageId, OutboundMessage, PublishReceipt, Subscription,
    },
    error::{BridgeError, Result},
};
use bytes::Bytes;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default number of partitions per consumer group
pub const DEFAULT_PARTITIONS: usize = 8;

/// Wait between retries of a message whose handler is not ready for it
pub const DEFAULT_DEFER_INTERVAL: Duration = Duration::from_millis(100);

/// Not-ready retries of one message before they start counting as failures
pub const DEFAULT_MAX_DEFERRALS: u32 = 3000;

/// How long an idle dispatcher sleeps before re-checking its partition
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Tuning of an [`InMemoryBroker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    pub partitions: usize,
    /// Linear backoff between failed attempts; zero retries immediately
    pub redelivery_backoff: Duration,
    pub defer_interval: Duration,
    pub max_deferrals: u32,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            partitions: DEFAULT_PARTITIONS,
            redelivery_backoff: Duration::ZERO,
            defer_interval: DEFAULT_DEFER_INTERVAL,
            max_deferrals: DEFAULT_MAX_DEFERRALS,
        }
    }
}

#[derive(Debug, Clone)]
struct Envelope {
    message_id: MessageId,
    topic: String,
    ordering_key: String,
    message_key: String,
    payload: Bytes,
    last_error: Option<String>,
}

impl Envelope {
    fn from_outbound(message: OutboundMessage) -> Self {
        Self {
            message_id: MessageId::new(),
            topic: message.topic,
            ordering_key: message.ordering_key,
            message_key: message.message_key,
            payload: message.payload,
            last_error: None,
        }
    }

    fn delivery(&self, redelivery_count: u32) -> Delivery {
        Delivery {
            message_id: self.message_id,
            topic: self.topic.clone(),
            ordering_key: self.ordering_key.clone(),
            message_key: self.message_key.clone(),
            payload: self.payload.clone(),
            redelivery_count,
            last_error: self.last_error.clone(),
        }
    }
}

struct Partition {
    queue: Mutex<VecDeque<Envelope>>,
    /// Held while a message of this partition is being handled.
    turn: tokio::sync::Mutex<()>,
}

impl Partition {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            turn: tokio::sync::Mutex::new(()),
        }
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<Envelope>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct ConsumerGroup {
    subscription: Subscription,
    handler: Arc<dyn MessageHandler>,
    partitions: Vec<Partition>,
}

impl ConsumerGroup {
    fn pending(&self) -> usize {
        self.partitions.iter().map(|p| p.queue().len()).sum()
    }
}

#[derive(Default)]
struct Topology {
    /// Consumer groups by topic
    groups: HashMap<String, Vec<Arc<ConsumerGroup>>>,
    /// Messages published to topics without any subscriber yet
    retained: HashMap<String, Vec<Envelope>>,
}

struct BrokerInner {
    settings: BrokerSettings,
    topology: Mutex<Topology>,
    notify: Notify,
    dead_lettered: AtomicU64,
    dropped: AtomicU64,
}

impl BrokerInner {
    fn topology(&self) -> MutexGuard<'_, Topology> {
        self.topology.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn partition_for(&self, ordering_key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        ordering_key.hash(&mut hasher);
        (hasher.finish() % self.settings.partitions as u64) as usize
    }

    fn enqueue(&self, envelope: Envelope) {
        let index = self.partition_for(&envelope.ordering_key);
        {
            let mut guard = self.topology();
            let topology = &mut *guard;
            match topology.groups.get(&envelope.topic) {
                Some(groups) if !groups.is_empty() => {
                    for group in groups {
                        group.partitions[index].queue().push_back(envelope.clone());
                    }
                }
                _ if is_dead_letter_topic(&envelope.topic) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    error!(
                        topic = %envelope.topic,
                        message_key = %envelope.message_key,
                        last_error = envelope.last_error.as_deref().unwrap_or_default(),
                        "No subscriber for dead-letter topic, dropping message"
                    );
                    return;
                }
                _ => topology
                    .retained
                    .entry(envelope.topic.clone())
                    .or_default()
                    .push(envelope),
            }
        }
        self.notify.notify_waiters();
    }

    fn all_groups(&self) -> Vec<Arc<ConsumerGroup>> {
        self.topology()
            .groups
            .values()
            .flat_map(|groups| groups.iter().cloned())
            .collect()
    }

    /// Handle every message currently queued in one partition. Returns the number handled.
    async fn process_partition(&self, group: &ConsumerGroup, index: usize) -> usize {
        let partition = &group.partitions[index];
        let _turn = partition.turn.lock().await;
        let mut handled = 0;

        loop {
            let next = partition.queue().pop_front();
            let Some(envelope) = next else {
                break;
            };
            self.deliver(group, envelope).await;
            handled += 1;
        }

        handled
    }

    async fn deliver(&self, group: &ConsumerGroup, mut envelope: Envelope) {
        let max_redelivery = group.subscription.max_redelivery;
        let mut redelivery_count = 0;
        let mut deferrals = 0;

        loop {
            let delivery = envelope.delivery(redelivery_count);
            match group.handler.handle(&delivery).await {
                Err(HandlerError::NotReady(reason)) if deferrals < self.settings.max_deferrals => {
                    deferrals += 1;
                    debug!(
                        topic = %envelope.topic,
                        consumer_group = %group.subscription.consumer_group,
                        message_key = %envelope.message_key,
                        deferrals,
                        reason = %reason,
                        "Message not ready, deferring"
                    );
                    tokio::time::sleep(self.settings.defer_interval).await;
                }
                Ok(()) => {
                    debug!(
                        topic = %envelope.topic,
                        consumer_group = %group.subscription.consumer_group,
                        message_key = %envelope.message_key,
                        redelivery_count,
                        "Message acknowledged"
                    );
                    return;
                }
                Err(err) => {
                    let err = err.to_string();
                    envelope.last_error = Some(err.clone());

                    if redelivery_count >= max_redelivery {
                        error!(
                            topic = %envelope.topic,
                            consumer_group = %group.subscription.consumer_group,
                            message_key = %envelope.message_key,
                            redelivery_count,
                            error = %err,
                            "Redelivery exhausted, routing to dead-letter topic"
                        );
                        self.dead_letter(group, envelope);
                        return;
                    }

                    redelivery_count += 1;
                    warn!(
                        topic = %envelope.topic,
                        consumer_group = %group.subscription.consumer_group,
                        message_key = %envelope.message_key,
                        redelivery_count,
                        max_redelivery,
                        error = %err,
                        "Message handling failed, redelivering"
                    );

                    let backoff = self.settings.redelivery_backoff;
                    if !backoff.is_zero() {
                        tokio::time::sleep(backoff * redelivery_count).await;
                    }
                }
            }
        }
    }

    fn dead_letter(&self, group: &ConsumerGroup, envelope: Envelope) {
        if is_dead_letter_topic(&envelope.topic) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            error!(
                topic = %envelope.topic,
                consumer_group = %group.subscription.consumer_group,
                message_key = %envelope.message_key,
                last_error = envelope.last_error.as_deref().unwrap_or_default(),
                "Dead-letter handling exhausted, dropping message"
            );
            return;
        }

        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
        self.enqueue(Envelope {
            message_id: MessageId::new(),
            topic: dead_letter_topic(&group.subscription.consumer_group),
            ..envelope
        });
    }
}

/// Partitioned, at-least-once, in-process broker.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl InMemoryBroker {
    /// Create a broker with [`BrokerSettings::default`]
    pub fn new() -> Self {
        Self::with_settings(BrokerSettings::default())
    }

    /// Create a broker with a custom partition count and linear redelivery backoff
    pub fn with_options(partitions: usize, redelivery_backoff: Duration) -> Self {
        Self::with_settings(BrokerSettings {
            partitions,
            redelivery_backoff,
            ..BrokerSettings::default()
        })
    }

    pub fn with_settings(mut settings: BrokerSettings) -> Self {
        settings.partitions = settings.partitions.max(1);
        Self {
            inner: Arc::new(BrokerInner {
                settings,
                topology: Mutex::new(Topology::default()),
                notify: Notify::new(),
                dead_lettered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Process queued messages until every consumer group is idle.
    ///
    /// Dead-lettered messages are picked up in the same call when a group
    /// subscribes to the dead-letter topic.
    pub async fn drain(&self) -> usize {
        let mut total = 0;
        loop {
            let mut handled = 0;
            for group in self.inner.all_groups() {
                for index in 0..group.partitions.len() {
                    handled += self.inner.process_partition(&group, index).await;
                }
            }
            if handled == 0 {
                return total;
            }
            total += handled;
        }
    }

    /// Spawn one dispatcher per partition of every group subscribed so far.
    ///
    /// Dispatchers stop when `shutdown` is cancelled. Groups that subscribe
    /// after this call are only served by [`drain`](Self::drain) or a later `start`.
    pub fn start(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for group in self.inner.all_groups() {
            for index in 0..group.partitions.len() {
                let inner = Arc::clone(&self.inner);
                let group = Arc::clone(&group);
                let shutdown = shutdown.clone();
                handles.push(tokio::spawn(async move {
                    loop {
                        if inner.process_partition(&group, index).await > 0 {
                            continue;
                        }
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = inner.notify.notified() => {}
                            _ = tokio::time::sleep(IDLE_POLL_INTERVAL) => {}
                        }
                    }
                }));
            }
        }
        info!(dispatchers = handles.len(), "Broker dispatchers started");
        handles
    }

    /// Messages waiting in the partitions of every group plus retained messages
    pub fn pending(&self) -> usize {
        let topology = self.inner.topology();
        let queued: usize = topology
            .groups
            .values()
            .flat_map(|groups| groups.iter())
            .map(|g| g.pending())
            .sum();
        queued + topology.retained.values().map(Vec::len).sum::<usize>()
    }

    /// Messages retained for a topic that has no subscriber
    pub fn retained(&self, topic: &str) -> usize {
        self.inner
            .topology()
            .retained
            .get(topic)
            .map_or(0, Vec::len)
    }

    /// Total number of messages routed to a dead-letter topic
    pub fn dead_lettered(&self) -> u64 {
        self.inner.dead_lettered.load(Ordering::Relaxed)
    }

    /// Dead-letter messages discarded instead of being routed further
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, message: OutboundMessage) -> Result<PublishReceipt> {
        if message.topic.is_empty() {
            return Err(BridgeError::Broker("Topic must not be empty".to_string()));
        }

        let envelope = Envelope::from_outbound(message);
        let message_id = envelope.message_id;
        self.inner.enqueue(envelope);
        Ok(PublishReceipt { message_id })
    }

    async fn subscribe(
        &self,
        subscription: Subscription,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<()> {
        let mut topology = self.inner.topology();

        let already = topology
            .groups
            .get(&subscription.topic)
            .is_some_and(|groups| {
                groups
                    .iter()
                    .any(|g| g.subscription.consumer_group == subscription.consumer_group)
            });
        if already {
            return Err(BridgeError::Broker(format!(
                "Consumer group {} already subscribed to {}",
                subscription.consumer_group, subscription.topic
            )));
        }

        let group = Arc::new(ConsumerGroup {
            partitions: (0..self.inner.settings.partitions)
                .map(|_| Partition::new())
                .collect(),
            subscription: subscription.clone(),
            handler,
        });

        if let Some(retained) = topology.retained.remove(&subscription.topic) {
            for envelope in retained {
                let index = self.inner.partition_for(&envelope.ordering_key);
                group.partitions[index].queue().push_back(envelope);
            }
        }

        topology
            .groups
            .entry(subscription.topic.clone())
            .or_default()
            .push(group);

        info!(
            topic = %subscription.topic,
            consumer_group = %subscription.consumer_group,
            max_redelivery = subscription.max_redelivery,
            "Consumer group subscribed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, u32)>>,
        fail_times: Mutex<HashMap<String, u32>>,
    }

    impl Recorder {
        fn failing(key: &str, times: u32) -> Self {
            let recorder = Self::default();
            recorder
                .fail_times
                .lock()
                .unwrap()
                .insert(key.to_string(), times);
            recorder
        }

        fn seen(&self) -> Vec<(String, u32)> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn handle(&self, delivery: &Delivery) -> std::result::Result<(), HandlerError> {
            self.seen
                .lock()
                .unwrap()
                .push((delivery.message_key.clone(), delivery.redelivery_count));

            let mut fail_times = self.fail_times.lock().unwrap();
            if let Some(remaining) = fail_times.get_mut(&delivery.message_key) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(HandlerError::Failed(format!(
                        "injected failure for {}",
                        delivery.message_key
                    )));
                }
            }
            Ok(())
        }
    }

    fn message(topic: &str, key: &str, index: u32) -> OutboundMessage {
        OutboundMessage::new(
            topic,
            key,
            format!("{}_{}", key, index),
            Bytes::from(index.to_string()),
        )
    }

    #[tokio::test]
    async fn test_same_key_keeps_publish_order() {
        let broker = InMemoryBroker::new();
        let recorder = Arc::new(Recorder::default());
        broker
            .subscribe(Subscription::new("t", "g", 3), recorder.clone())
            .await
            .unwrap();

        for i in 0..5 {
            broker.publish(message("t", "d1_2025-01-01", i)).await.unwrap();
        }
        assert_eq!(broker.drain().await, 5);

        let keys: Vec<String> = recorder.seen().into_iter().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            (0..5).map(|i| format!("d1_2025-01-01_{}", i)).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_redelivers_until_success() {
        let broker = InMemoryBroker::new();
        let recorder = Arc::new(Recorder::failing("k_0", 2));
        broker
            .subscribe(Subscription::new("t", "g", 3), recorder.clone())
            .await
            .unwrap();

        broker.publish(message("t", "k", 0)).await.unwrap();
        broker.drain().await;

        let seen = recorder.seen();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen.last().unwrap().1, 2);
        assert_eq!(broker.dead_lettered(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_message_goes_to_dead_letter_topic() {
        let broker = InMemoryBroker::new();
        let main = Arc::new(Recorder::failing("k_0", u32::MAX));
        let dlq = Arc::new(Recorder::default());
        broker
            .subscribe(Subscription::new("t", "g", 3), main.clone())
            .await
            .unwrap();
        broker
            .subscribe(Subscription::new(dead_letter_topic("g"), "g-dlq", 0), dlq.clone())
            .await
            .unwrap();

        broker.publish(message("t", "k", 0)).await.unwrap();
        broker.drain().await;

        // one delivery plus three redeliveries
        assert_eq!(main.seen().len(), 4);
        assert_eq!(dlq.seen(), vec![("k_0".to_string(), 0)]);
        assert_eq!(broker.dead_lettered(), 1);
    }

    #[tokio::test]
    async fn test_dead_letter_delivery_carries_last_error() {
        struct LastError(Mutex<Option<String>>);

        #[async_trait]
        impl MessageHandler for LastError {
            async fn handle(&self, delivery: &Delivery) -> std::result::Result<(), HandlerError> {
                *self.0.lock().unwrap() = delivery.last_error.clone();
                Ok(())
            }
        }

        let broker = InMemoryBroker::new();
        broker
            .subscribe(
                Subscription::new("t", "g", 0),
                Arc::new(Recorder::failing("k_0", 1)),
            )
            .await
            .unwrap();
        let dlq = Arc::new(LastError(Mutex::new(None)));
        broker
            .subscribe(Subscription::new(dead_letter_topic("g"), "g-dlq", 0), dlq.clone())
            .await
            .unwrap();

        broker.publish(message("t", "k", 0)).await.unwrap();
        broker.drain().await;

        assert_eq!(
            dlq.0.lock().unwrap().as_deref(),
            Some("injected failure for k_0")
        );
    }

    /// Not ready for the first `not_ready` deliveries, then acknowledges
    struct LateReady {
        not_ready: u32,
        calls: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl MessageHandler for LateReady {
        async fn handle(&self, delivery: &Delivery) -> std::result::Result<(), HandlerError> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(delivery.redelivery_count);
            if calls.len() as u32 <= self.not_ready {
                return Err(HandlerError::NotReady("producer still running".to_string()));
            }
            Ok(())
        }
    }

    fn quick_defer(max_deferrals: u32) -> BrokerSettings {
        BrokerSettings {
            defer_interval: Duration::from_millis(1),
            max_deferrals,
            ..BrokerSettings::default()
        }
    }

    #[tokio::test]
    async fn test_not_ready_does_not_spend_redelivery_budget() {
        let broker = InMemoryBroker::with_settings(quick_defer(100));
        let handler = Arc::new(LateReady {
            not_ready: 10,
            calls: Mutex::new(Vec::new()),
        });
        broker
            .subscribe(Subscription::new("t", "g", 0), handler.clone())
            .await
            .unwrap();

        broker.publish(message("t", "k", 0)).await.unwrap();
        broker.drain().await;

        let calls = handler.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 11);
        assert!(calls.iter().all(|&count| count == 0));
        assert_eq!(broker.dead_lettered(), 0);
    }

    #[tokio::test]
    async fn test_not_ready_past_deferral_limit_counts_as_failure() {
        let broker = InMemoryBroker::with_settings(quick_defer(2));
        let handler = Arc::new(LateReady {
            not_ready: u32::MAX,
            calls: Mutex::new(Vec::new()),
        });
        let dlq = Arc::new(Recorder::default());
        broker
            .subscribe(Subscription::new("t", "g", 1), handler.clone())
            .await
            .unwrap();
        broker
            .subscribe(Subscription::new(dead_letter_topic("g"), "g-dlq", 0), dlq.clone())
            .await
            .unwrap();

        broker.publish(message("t", "k", 0)).await.unwrap();
        broker.drain().await;

        // two deferrals, then the first attempt and one redelivery fail
        assert_eq!(handler.calls.lock().unwrap().len(), 4);
        assert_eq!(dlq.seen().len(), 1);
        assert_eq!(broker.dead_lettered(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribed_dead_letter_topic_does_not_accumulate() {
        let broker = InMemoryBroker::new();
        broker
            .subscribe(
                Subscription::new("t", "g", 0),
                Arc::new(Recorder::failing("k_0", u32::MAX)),
            )
            .await
            .unwrap();

        broker.publish(message("t", "k", 0)).await.unwrap();
        broker.drain().await;

        assert_eq!(broker.dead_lettered(), 1);
        assert_eq!(broker.dropped(), 1);
        assert_eq!(broker.retained(&dead_letter_topic("g")), 0);
        assert_eq!(broker.pending(), 0);
    }

    #[tokio::test]
    async fn test_failing_dead_letter_handler_gets_no_second_hop() {
        let broker = InMemoryBroker::new();
        broker
            .subscribe(
                Subscription::new("t", "g", 0),
                Arc::new(Recorder::failing("k_0", u32::MAX)),
            )
            .await
            .unwrap();
        let dlq = Arc::new(Recorder::failing("k_0", u32::MAX));
        broker
            .subscribe(Subscription::new(dead_letter_topic("g"), "g-dlq", 2), dlq.clone())
            .await
            .unwrap();

        broker.publish(message("t", "k", 0)).await.unwrap();
        broker.drain().await;

        assert_eq!(dlq.seen().len(), 3);
        assert_eq!(broker.dead_lettered(), 1);
        assert_eq!(broker.dropped(), 1);
        assert_eq!(broker.retained(&dead_letter_topic("g-dlq")), 0);
        assert_eq!(broker.pending(), 0);
    }

    #[tokio::test]
    async fn test_retains_messages_until_subscribed() {
        let broker = InMemoryBroker::new();
        broker.publish(message("t", "k", 0)).await.unwrap();
        assert_eq!(broker.retained("t"), 1);

        let recorder = Arc::new(Recorder::default());
        broker
            .subscribe(Subscription::new("t", "g", 3), recorder.clone())
            .await
            .unwrap();
        assert_eq!(broker.retained("t"), 0);
        assert_eq!(broker.pending(), 1);

        broker.drain().await;
        assert_eq!(recorder.seen().len(), 1);
        assert_eq!(broker.pending(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_group_rejected() {
        let broker = InMemoryBroker::new();
        let recorder = Arc::new(Recorder::default());
        broker
            .subscribe(Subscription::new("t", "g", 3), recorder.clone())
            .await
            .unwrap();
        assert!(broker
            .subscribe(Subscription::new("t", "g", 3), recorder)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_background_dispatchers() {
        let broker = InMemoryBroker::new();
        let recorder = Arc::new(Recorder::default());
        broker
            .subscribe(Subscription::new("t", "g", 3), recorder.clone())
            .await
            .unwrap();

        let shutdown = CancellationToken::new();
        let handles = broker.start(shutdown.clone());

        for i in 0..3 {
            broker.publish(message("t", "k", i)).await.unwrap();
        }

        for _ in 0..100 {
            if recorder.seen().len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(recorder.seen().len(), 3);

        shutdown.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
