//! Historical Context Engine ("Air", C8) wire types.

use super::{AgentId, DecisionEventId, InterventionId, PhaseId, RefinementCycleId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionType(pub String);

impl From<&str> for DecisionType {
    fn from(s: &str) -> Self {
        DecisionType(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionOutcome {
    Success,
    Partial,
    Failure,
    Deferred,
    Superseded,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionEvent {
    pub event_id: DecisionEventId,
    pub decision_agent: AgentId,
    pub decision_type: DecisionType,
    pub timestamp: DateTime<Utc>,
    pub input_context: serde_json::Value,
    pub rationale: String,
    pub details: serde_json::Value,
    pub outcome: DecisionOutcome,
    pub effectiveness_score: Option<f64>,
    pub phase_context: Option<PhaseId>,
    pub operation_id: Option<String>,
    pub lessons: Vec<String>,
    pub success_factors: Vec<String>,
    pub failure_factors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FireIntervention {
    pub intervention_id: InterventionId,
    pub context_tag: String,
    pub timestamp: DateTime<Utc>,
    pub original_score: f64,
    pub final_score: Option<f64>,
    pub reduction: Option<f64>,
    pub strategy: String,
    pub success: bool,
    pub duration_ms: Option<u64>,
    pub lessons: Vec<String>,
    pub effective_techniques: Vec<String>,
    pub challenges: Vec<String>,
    pub operation_id: Option<String>,
    pub triggering_decision: Option<DecisionEventId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementCycle {
    pub cycle_id: RefinementCycleId,
    pub agent_id: AgentId,
    pub phase_context: Option<PhaseId>,
    pub timestamp: DateTime<Utc>,
    pub iterations: u32,
    pub converged: bool,
    pub initial_output: String,
    pub final_output: String,
    pub operation_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternConfidence {
    InsufficientData,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionPattern {
    pub grouping: String,
    pub key: String,
    pub frequency: u32,
    pub success_rate: f64,
    pub confidence: PatternConfidence,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossPhasePattern {
    pub phases: Vec<PhaseId>,
    pub pattern: String,
    pub frequency: u32,
    pub confidence: PatternConfidence,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalContext {
    pub relevant_events: Vec<DecisionEvent>,
    pub success_patterns: Vec<DecisionPattern>,
    pub failure_patterns: Vec<DecisionPattern>,
    pub recommendations: Vec<String>,
    pub cautionary_notes: Vec<String>,
    pub confidence: PatternConfidence,
    pub events_analyzed: u32,
    pub patterns_identified: u32,
}

impl HistoricalContext {
    /// Fail-soft default: never raised as an error, returned whenever the
    /// engine has nothing (or fails internally) to report.
    pub fn insufficient_data(note: impl Into<String>) -> Self {
        Self {
            relevant_events: Vec::new(),
            success_patterns: Vec::new(),
            failure_patterns: Vec::new(),
            recommendations: Vec::new(),
            cautionary_notes: vec![note.into()],
            confidence: PatternConfidence::InsufficientData,
            events_analyzed: 0,
            patterns_identified: 0,
        }
    }
}

pub type PatternFrequencyTable = HashMap<String, u32>;
