//! Event Bus (C1) wire types.

use super::{EventId, SubscriptionId, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Priority lane an event is scheduled in. Higher priorities jump
/// normal-priority events in a saturated subscriber queue but never reorder
/// within their own class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// The wire-stable event type names every component emits under.
pub mod event_type {
    pub const SYSTEM_HEALTH_CHANGED: &str = "SYSTEM_HEALTH_CHANGED";
    pub const RESOURCE_ALERT_CREATED: &str = "RESOURCE_ALERT_CREATED";
    pub const METRIC_RECORDED: &str = "METRIC_RECORDED";
    pub const ERROR_OCCURRED: &str = "ERROR_OCCURRED";
    pub const RESOURCE_STATE_CHANGED: &str = "RESOURCE_STATE_CHANGED";
}

/// Event type is a plain string rather than a closed enum: components outside
/// the ten named here (and test handlers) are free to mint their own types.
pub type EventType = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub priority: Priority,
    pub correlation_id: Option<String>,
    pub payload: HashMap<String, Value>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, payload: HashMap<String, Value>, priority: Priority) -> Self {
        Self {
            id: super::new_id(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            priority,
            correlation_id: None,
            payload,
        }
    }
}

/// Per-subscription back-pressure policy, applied when a subscriber's queue
/// exceeds its high-water mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    DropOldest,
    BlockEmitter,
}

#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    pub event_type: EventType,
}
