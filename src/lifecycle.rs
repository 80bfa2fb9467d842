//! Resource Lifecycle (C10): the uniform init/shutdown/identity contract
//! every long-lived component embeds, and the `emit`/`record_metric` surface
//! that replaces mixin-style event emission (REDESIGN FLAGS).

use crate::event_bus::EventBus;
use crate::metrics::MetricsRecorder;
use crate::types::{Event, EventType, OrchestratorResult, Priority, Value};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupPolicy {
    None,
    Ttl,
    Lru,
    OnShutdown,
}

/// Every long-lived component embeds one of these (composition, not a mixin)
/// to initialize/terminate uniformly and to emit events / record metrics
/// through the shared substrate without depending on concrete component types.
pub struct ResourceLifecycle {
    resource_id: String,
    cleanup_policy: CleanupPolicy,
    terminated: AtomicBool,
    event_bus: Arc<EventBus>,
    metrics: Arc<MetricsRecorder>,
}

impl ResourceLifecycle {
    pub fn new(
        resource_id: impl Into<String>,
        cleanup_policy: CleanupPolicy,
        event_bus: Arc<EventBus>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            cleanup_policy,
            terminated: AtomicBool::new(false),
            event_bus,
            metrics,
        }
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn cleanup_policy(&self) -> CleanupPolicy {
        self.cleanup_policy
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Idempotent: a second call is a no-op.
    pub fn mark_terminated(&self) -> bool {
        self.terminated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub async fn emit(&self, event_type: impl Into<EventType>, payload: HashMap<String, Value>, priority: Priority) {
        let mut payload = payload;
        payload
            .entry("component".to_string())
            .or_insert_with(|| Value::String(self.resource_id.clone()));
        let event = Event::new(event_type, payload, priority);
        self.event_bus.emit(event).await;
    }

    pub async fn record_metric(&self, name: impl Into<String>, value: f64, metadata: HashMap<String, Value>) {
        self.metrics.record(name, value, metadata).await;
    }
}

/// Uniform initialize/terminate contract. Components that have their own
/// async setup/teardown beyond the embedded `ResourceLifecycle` (e.g.
/// spawning background workers) implement this.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    async fn initialize(&self) -> OrchestratorResult<()>;
    async fn terminate(&self) -> OrchestratorResult<()>;
    fn resource_id(&self) -> &str;
    fn cleanup_policy(&self) -> CleanupPolicy;
}
