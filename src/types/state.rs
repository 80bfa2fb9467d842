//! State Manager (C2) wire types.

use super::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What kind of resource a state key holds. Drives which `TransitionValidator`
/// (if any) governs `set_state` for that key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceKind {
    Phase,
    Coordination,
    Circuit,
    DecisionEvent,
    FireIntervention,
    RefinementCycle,
    AgentContext,
    Generic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEntry {
    pub key: String,
    pub resource_kind: ResourceKind,
    pub value: Value,
    /// Monotonic, gap-free starting at 1 for a given key.
    pub version: u64,
    pub previous_state: Option<Box<Value>>,
    pub transition_reason: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub snapshot_id: String,
    pub taken_at: DateTime<Utc>,
    pub entries: HashMap<String, StateEntry>,
}
