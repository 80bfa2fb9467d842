//! Event Bus (C1): ordered, per-subscriber delivery of typed events with
//! back-pressure and priority lanes.

use crate::types::event::BackpressurePolicy;
use crate::types::{Event, EventType, OrchestratorError, OrchestratorResult, Priority, SubscriptionId, Value};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::Duration;

/// A subscriber's handler. Failures are isolated: they are logged and turned
/// into an `ERROR_OCCURRED` meta-event rather than propagated.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event);
}

#[async_trait]
impl<F> EventHandler for F
where
    F: Fn(Event) + Send + Sync,
{
    async fn handle(&self, event: Event) {
        (self)(event)
    }
}

/// A queued delivery. Below the subscriber's high-water mark, entries are
/// appended and drained in strict FIFO-by-`sequence` order — priority plays
/// no role. Only once the queue is saturated does priority affect where a
/// new arrival is inserted; see `insert_with_priority_jump`.
struct Scheduled {
    priority: Priority,
    sequence: u64,
    event: Event,
}

struct Subscription {
    id: SubscriptionId,
    event_type: EventType,
    handler: Arc<dyn EventHandler>,
    policy: BackpressurePolicy,
    high_water_mark: usize,
    queue: Mutex<VecDeque<Scheduled>>,
    notify: mpsc::Sender<()>,
}

/// Inserts `scheduled` ahead of every already-queued entry whose priority is
/// strictly lower, but after every entry whose priority is the same or
/// higher — i.e. it jumps normal-priority backlog without reordering within
/// its own priority class. Only called on the saturated path; the
/// unsaturated path always `push_back`s.
fn insert_with_priority_jump(queue: &mut VecDeque<Scheduled>, scheduled: Scheduled) {
    let insert_at = queue
        .iter()
        .rposition(|queued| queued.priority >= scheduled.priority)
        .map(|i| i + 1)
        .unwrap_or(0);
    queue.insert(insert_at, scheduled);
}

/// The entry `drop_oldest` evicts to make room: lowest priority first, then
/// earliest sequence among ties.
fn lowest_priority_oldest(queue: &VecDeque<Scheduled>) -> Option<usize> {
    queue
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.priority.cmp(&b.priority).then_with(|| a.sequence.cmp(&b.sequence)))
        .map(|(i, _)| i)
}

/// Per-type monotonic sequence counters, so FIFO-per-type ordering is
/// preserved even across priority classes within that type.
struct TypeSequencer {
    counters: RwLock<HashMap<EventType, AtomicU64>>,
}

impl TypeSequencer {
    fn new() -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
        }
    }

    async fn next(&self, event_type: &EventType) -> u64 {
        {
            let counters = self.counters.read().await;
            if let Some(counter) = counters.get(event_type) {
                return counter.fetch_add(1, Ordering::SeqCst);
            }
        }
        let mut counters = self.counters.write().await;
        counters
            .entry(event_type.clone())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::SeqCst)
    }
}

pub struct EventBus {
    subscriptions: RwLock<HashMap<SubscriptionId, Arc<Subscription>>>,
    by_type: RwLock<HashMap<EventType, Vec<SubscriptionId>>>,
    sequencer: TypeSequencer,
    default_high_water_mark: usize,
    default_timeout: Duration,
}

impl EventBus {
    pub fn new(default_high_water_mark: usize, default_timeout_ms: u64) -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            by_type: RwLock::new(HashMap::new()),
            sequencer: TypeSequencer::new(),
            default_high_water_mark,
            default_timeout: Duration::from_millis(default_timeout_ms),
        }
    }

    /// Registers a handler for `event_type`. Returns a subscription id usable
    /// with `unsubscribe`. Takes `self` by `Arc` so the per-subscriber drain
    /// worker can emit `ERROR_OCCURRED` back onto this same bus when a
    /// handler panics.
    pub async fn subscribe(
        self: &Arc<Self>,
        event_type: impl Into<EventType>,
        handler: Arc<dyn EventHandler>,
        policy: BackpressurePolicy,
    ) -> SubscriptionId {
        let event_type = event_type.into();
        let id = crate::types::new_id();
        let (tx, mut rx) = mpsc::channel::<()>(1);
        let sub = Arc::new(Subscription {
            id: id.clone(),
            event_type: event_type.clone(),
            handler: handler.clone(),
            policy,
            high_water_mark: self.default_high_water_mark,
            queue: Mutex::new(VecDeque::new()),
            notify: tx,
        });

        {
            let mut subs = self.subscriptions.write().await;
            subs.insert(id.clone(), sub.clone());
        }
        {
            let mut by_type = self.by_type.write().await;
            by_type.entry(event_type).or_default().push(id.clone());
        }

        // Drain worker: pulls the front of the subscriber's queue each time
        // it's woken. Below the high-water mark that queue is strict FIFO by
        // emit sequence; priority only ever affected where a saturated-path
        // arrival was inserted, never how the queue drains. Each handler
        // invocation runs in its own task so a panicking handler is isolated
        // to that one delivery, never killing the drain worker or affecting
        // other subscribers.
        let worker_sub = sub.clone();
        let bus = self.clone();
        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                let next = {
                    let mut q = worker_sub.queue.lock().await;
                    q.pop_front()
                };
                if let Some(scheduled) = next {
                    let handler = worker_sub.handler.clone();
                    let event_type = scheduled.event.event_type.clone();
                    let event = scheduled.event;
                    let outcome = tokio::spawn(async move { handler.handle(event).await }).await;
                    if let Err(join_err) = outcome {
                        tracing::error!(
                            subscriber_id = %worker_sub.id,
                            event_type = %event_type,
                            error = %join_err,
                            "event handler failed"
                        );
                        let mut payload = HashMap::new();
                        payload.insert("component".to_string(), Value::String("event_bus".to_string()));
                        payload.insert("subscriber_id".to_string(), Value::String(worker_sub.id.clone()));
                        payload.insert("event_type".to_string(), Value::String(event_type));
                        payload.insert("detail".to_string(), Value::String(join_err.to_string()));
                        let _ = bus
                            .emit(Event::new(
                                crate::types::event::event_type::ERROR_OCCURRED,
                                payload,
                                Priority::High,
                            ))
                            .await;
                    }
                }
            }
        });

        id
    }

    pub async fn unsubscribe(&self, subscription_id: &SubscriptionId) {
        let sub = {
            let mut subs = self.subscriptions.write().await;
            subs.remove(subscription_id)
        };
        if let Some(sub) = sub {
            let mut by_type = self.by_type.write().await;
            if let Some(ids) = by_type.get_mut(&sub.event_type) {
                ids.retain(|id| id != subscription_id);
            }
        }
    }

    /// Delivery is at-most-once per subscriber and not required to be
    /// durable. Returns once the event has been scheduled (not handled) for
    /// every current subscriber of its type.
    pub async fn emit(&self, event: Event) -> OrchestratorResult<()> {
        let sequence = self.sequencer.next(&event.event_type).await;
        let sub_ids = {
            let by_type = self.by_type.read().await;
            by_type.get(&event.event_type).cloned().unwrap_or_default()
        };
        let subs: Vec<Arc<Subscription>> = {
            let subs_map = self.subscriptions.read().await;
            sub_ids
                .iter()
                .filter_map(|id| subs_map.get(id).cloned())
                .collect()
        };

        for sub in subs {
            self.deliver_to(&sub, &event, sequence).await?;
        }
        Ok(())
    }

    async fn deliver_to(&self, sub: &Arc<Subscription>, event: &Event, sequence: u64) -> OrchestratorResult<()> {
        let deadline = tokio::time::Instant::now() + self.default_timeout;
        loop {
            let mut queue = sub.queue.lock().await;

            // Unsaturated: strict FIFO-by-sequence append, no priority
            // reordering. Priority only ever affects scheduling once the
            // queue is saturated (spec.md:87).
            if queue.len() < sub.high_water_mark {
                queue.push_back(Scheduled {
                    priority: event.priority,
                    sequence,
                    event: event.clone(),
                });
                drop(queue);
                let _ = sub.notify.try_send(());
                return Ok(());
            }

            match sub.policy {
                BackpressurePolicy::DropOldest => {
                    if let Some(evict_at) = lowest_priority_oldest(&queue) {
                        queue.remove(evict_at);
                    }
                    insert_with_priority_jump(
                        &mut queue,
                        Scheduled {
                            priority: event.priority,
                            sequence,
                            event: event.clone(),
                        },
                    );
                    drop(queue);
                    let _ = sub.notify.try_send(());
                    return Ok(());
                }
                BackpressurePolicy::BlockEmitter => {
                    drop(queue);
                    if tokio::time::Instant::now() >= deadline {
                        return Err(OrchestratorError::BackpressureTimeout(format!(
                            "subscriber {} queue saturated",
                            sub.id
                        )));
                    }
                    tokio::time::sleep(Duration::from_millis(10).min(self.default_timeout)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::event::event_type::RESOURCE_STATE_CHANGED;
    use std::sync::atomic::AtomicUsize;

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _event: Event) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn delivers_events_to_subscriber() {
        let bus = Arc::new(EventBus::new(100, 1000));
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(
            RESOURCE_STATE_CHANGED,
            Arc::new(CountingHandler(count.clone())),
            BackpressurePolicy::DropOldest,
        )
        .await;

        for _ in 0..5 {
            bus.emit(Event::new(RESOURCE_STATE_CHANGED, HashMap::new(), Priority::Normal))
                .await
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = Arc::new(EventBus::new(100, 1000));
        let count = Arc::new(AtomicUsize::new(0));
        let id = bus
            .subscribe(
                RESOURCE_STATE_CHANGED,
                Arc::new(CountingHandler(count.clone())),
                BackpressurePolicy::DropOldest,
            )
            .await;
        bus.unsubscribe(&id).await;

        bus.emit(Event::new(RESOURCE_STATE_CHANGED, HashMap::new(), Priority::Normal))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    struct RecordingHandler(Arc<std::sync::Mutex<Vec<Priority>>>);

    #[async_trait]
    impl EventHandler for RecordingHandler {
        async fn handle(&self, event: Event) {
            self.0.lock().unwrap().push(event.priority);
        }
    }

    #[tokio::test]
    async fn unsaturated_queue_delivers_in_fifo_emit_order_regardless_of_priority() {
        let bus = Arc::new(EventBus::new(100, 1000));
        let received = Arc::new(std::sync::Mutex::new(Vec::new()));
        bus.subscribe(
            RESOURCE_STATE_CHANGED,
            Arc::new(RecordingHandler(received.clone())),
            BackpressurePolicy::DropOldest,
        )
        .await;

        // Queue is nowhere near saturated (high-water mark 100); a HIGH
        // event emitted after a NORMAL one must still be observed after it.
        bus.emit(Event::new(RESOURCE_STATE_CHANGED, HashMap::new(), Priority::Normal))
            .await
            .unwrap();
        bus.emit(Event::new(RESOURCE_STATE_CHANGED, HashMap::new(), Priority::Critical))
            .await
            .unwrap();
        bus.emit(Event::new(RESOURCE_STATE_CHANGED, HashMap::new(), Priority::Normal))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            *received.lock().unwrap(),
            vec![Priority::Normal, Priority::Critical, Priority::Normal]
        );
    }

    struct PanickingHandler;

    #[async_trait]
    impl EventHandler for PanickingHandler {
        async fn handle(&self, _event: Event) {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn panicking_handler_is_isolated_and_reported() {
        let bus = Arc::new(EventBus::new(100, 1000));
        let count = Arc::new(AtomicUsize::new(0));

        bus.subscribe(RESOURCE_STATE_CHANGED, Arc::new(PanickingHandler), BackpressurePolicy::DropOldest)
            .await;
        bus.subscribe(
            crate::types::event::event_type::ERROR_OCCURRED,
            Arc::new(CountingHandler(count.clone())),
            BackpressurePolicy::DropOldest,
        )
        .await;

        bus.emit(Event::new(RESOURCE_STATE_CHANGED, HashMap::new(), Priority::Normal))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
