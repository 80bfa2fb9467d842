//! Coordination Engine ("Water", C6) wire types.

use super::{AgentId, CoordinationId, MisunderstandingId, ValueMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinationMode {
    Standard,
    Preventive,
    Interactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinationStatus {
    Created,
    InProgress,
    Completed,
    Partial,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Misunderstanding {
    pub id: MisunderstandingId,
    pub description: String,
    pub severity: Severity,
    pub affected_elements: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoordinationIteration {
    /// 1-based index; iterations are contiguous starting at 1.
    pub index: u32,
    pub timestamp: Option<DateTime<Utc>>,
    pub first_questions: Vec<String>,
    pub first_responses: HashMap<String, String>,
    pub second_questions: Vec<String>,
    pub second_responses: HashMap<String, String>,
    pub resolved: Vec<MisunderstandingId>,
    pub unresolved: Vec<MisunderstandingId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationContext {
    pub coordination_id: CoordinationId,
    pub first_agent_id: AgentId,
    pub second_agent_id: AgentId,
    pub mode: CoordinationMode,
    pub max_iterations: u32,
    pub severity_threshold: Severity,
    pub status: CoordinationStatus,
    pub first_original: String,
    pub second_original: String,
    pub misunderstandings: Vec<Misunderstanding>,
    pub iterations: Vec<CoordinationIteration>,
    pub resolved_ids: HashSet<MisunderstandingId>,
    pub unresolved: HashMap<MisunderstandingId, Misunderstanding>,
    pub first_final: Option<String>,
    pub second_final: Option<String>,
    pub final_status: Option<CoordinationStatus>,
    pub refinement_summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Raw transcripts dropped by `prune`; final outputs/summaries survive.
    pub pruned: bool,
    pub metadata: ValueMap,
}

impl CoordinationContext {
    pub fn new(
        first_agent_id: AgentId,
        second_agent_id: AgentId,
        first_original: String,
        second_original: String,
        mode: CoordinationMode,
        max_iterations: u32,
        severity_threshold: Severity,
    ) -> Self {
        let now = Utc::now();
        Self {
            coordination_id: super::new_id(),
            first_agent_id,
            second_agent_id,
            mode,
            max_iterations,
            severity_threshold,
            status: CoordinationStatus::Created,
            first_original,
            second_original,
            misunderstandings: Vec::new(),
            iterations: Vec::new(),
            resolved_ids: HashSet::new(),
            unresolved: HashMap::new(),
            first_final: None,
            second_final: None,
            final_status: None,
            refinement_summary: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            pruned: false,
            metadata: HashMap::new(),
        }
    }
}
