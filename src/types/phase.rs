//! Phase Coordinator (C5) wire types.

use super::{CheckpointId, PhaseId, Value, ValueMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseType {
    Zero,
    One,
    Two,
    Three,
    Four,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseState {
    Initializing,
    Ready,
    Running,
    Paused,
    Completed,
    Failed,
    Aborted,
}

impl PhaseState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PhaseState::Completed | PhaseState::Failed | PhaseState::Aborted)
    }

    /// Whether `self -> next` is a legal transition in the phase state machine.
    pub fn can_transition_to(self, next: PhaseState) -> bool {
        use PhaseState::*;
        matches!(
            (self, next),
            (Initializing, Ready)
                | (Ready, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Aborted)
                | (Paused, Failed)
                | (Paused, Aborted)
                | (Ready, Aborted)
                | (Initializing, Aborted)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseContext {
    pub phase_id: PhaseId,
    pub phase_type: PhaseType,
    pub state: PhaseState,
    pub parent_id: Option<PhaseId>,
    pub children: HashSet<PhaseId>,
    pub checkpoint_ids: Vec<CheckpointId>,
    pub inputs: ValueMap,
    pub outputs: ValueMap,
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PhaseContext {
    pub fn new(phase_type: PhaseType, inputs: ValueMap, parent_id: Option<PhaseId>) -> Self {
        let now = Utc::now();
        Self {
            phase_id: super::new_id(),
            phase_type,
            state: PhaseState::Initializing,
            parent_id,
            children: HashSet::new(),
            checkpoint_ids: Vec::new(),
            inputs,
            outputs: HashMap::new(),
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Immutable serialized `PhaseContext` at a moment in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: CheckpointId,
    pub phase_id: PhaseId,
    pub taken_at: DateTime<Utc>,
    pub context: PhaseContext,
}
