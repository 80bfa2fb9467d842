//! Historical Context Engine ("Air", C8): records decision/intervention/
//! refinement events and mines them for patterns that inform future phases.

use crate::config::HistoricalConfig;
use crate::state::json_bridge::{json_to_value, value_to_json};
use crate::state::StateManager;
use crate::types::historical::{
    CrossPhasePattern, DecisionEvent, DecisionOutcome, DecisionPattern, DecisionType, FireIntervention,
    HistoricalContext, PatternConfidence, RefinementCycle,
};
use crate::types::state::ResourceKind;
use crate::types::{new_id, AgentId, DecisionEventId, InterventionId, OrchestratorResult, PhaseId, RefinementCycleId};
use chrono::{Duration as ChronoDuration, Timelike, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// Stand-in values an Air-backed feature would normally derive from the
/// deployment's own decision history before any history has accumulated.
/// TODO: replace with a warm-start import once a seed corpus is available.
pub const DEFAULT_PHASE_TWO_COMPLEXITY: f64 = 50.0;
pub const DEFAULT_SUCCESS_RATE_PRIOR: f64 = 0.5;

fn decision_key(id: &str) -> String {
    format!("air_agent:decision_event:{}", id)
}
fn intervention_key(id: &str) -> String {
    format!("air_agent:fire_intervention:{}", id)
}
fn refinement_key(id: &str) -> String {
    format!("air_agent:refinement_cycle:{}", id)
}

#[derive(Default, Clone)]
pub struct DecisionFilters {
    pub decision_type: Option<DecisionType>,
    pub agent_id: Option<AgentId>,
    pub outcome: Option<DecisionOutcome>,
    pub phase_context: Option<PhaseId>,
    /// Restricts results to events no older than this duration before now.
    pub window: Option<ChronoDuration>,
}

pub struct HistoricalContextEngine {
    state_manager: Arc<StateManager>,
    config: HistoricalConfig,
}

impl HistoricalContextEngine {
    pub fn new(state_manager: Arc<StateManager>, config: HistoricalConfig) -> Self {
        Self { state_manager, config }
    }

    pub async fn track_decision(&self, event: DecisionEvent) -> OrchestratorResult<DecisionEventId> {
        let id = event.event_id.clone();
        let value = json_to_value(serde_json::to_value(&event).unwrap_or(serde_json::Value::Null));
        self.state_manager
            .set_state(decision_key(&id), value, ResourceKind::DecisionEvent, None, None)
            .await?;
        Ok(id)
    }

    pub async fn track_intervention(&self, intervention: FireIntervention) -> OrchestratorResult<InterventionId> {
        let id = intervention.intervention_id.clone();
        let value = json_to_value(serde_json::to_value(&intervention).unwrap_or(serde_json::Value::Null));
        self.state_manager
            .set_state(intervention_key(&id), value, ResourceKind::FireIntervention, None, None)
            .await?;
        Ok(id)
    }

    pub async fn track_refinement_cycle(&self, cycle: RefinementCycle) -> OrchestratorResult<RefinementCycleId> {
        let id = cycle.cycle_id.clone();
        let value = json_to_value(serde_json::to_value(&cycle).unwrap_or(serde_json::Value::Null));
        self.state_manager
            .set_state(refinement_key(&id), value, ResourceKind::RefinementCycle, None, None)
            .await?;
        Ok(id)
    }

    pub async fn get_decision_history(&self, filters: &DecisionFilters, limit: Option<usize>) -> Vec<DecisionEvent> {
        let keys = self.state_manager.find_keys("air_agent:decision_event:").await;
        let mut events = Vec::new();
        for key in keys {
            if let Some(entry) = self.state_manager.get_state(&key).await {
                let json = value_to_json(entry.value);
                if let Ok(event) = serde_json::from_value::<DecisionEvent>(json) {
                    if matches_filters(&event, filters) {
                        events.push(event);
                    }
                }
            }
        }
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = limit {
            events.truncate(limit);
        }
        events
    }

    /// Five independent groupings, matching the source's `by_type`/
    /// `by_agent`/`by_phase`/`by_rationale_keywords` dict keys plus its
    /// standalone hour-of-day temporal pass: by decision type, by agent, by
    /// phase, by keyword in rationale, and by hour of day. Confidence
    /// tiering: HIGH requires frequency >= 10 with at least one *other*
    /// grouping corroborating via an overlapping, equally frequent group;
    /// MEDIUM requires frequency >= 5; anything else below `min_frequency`
    /// is dropped, and fewer than 3 total events analyzed falls back to
    /// INSUFFICIENT_DATA rather than a spurious pattern.
    pub fn analyze_patterns(&self, events: &[DecisionEvent], min_frequency: u32) -> Vec<DecisionPattern> {
        if events.len() < 3 {
            return Vec::new();
        }

        let mut by_type: HashMap<String, Vec<&DecisionEvent>> = HashMap::new();
        let mut by_agent: HashMap<String, Vec<&DecisionEvent>> = HashMap::new();
        let mut by_phase: HashMap<String, Vec<&DecisionEvent>> = HashMap::new();
        let mut by_keyword: HashMap<String, Vec<&DecisionEvent>> = HashMap::new();
        let mut by_hour: HashMap<String, Vec<&DecisionEvent>> = HashMap::new();

        for event in events {
            by_type.entry(event.decision_type.0.clone()).or_default().push(event);
            by_agent.entry(event.decision_agent.clone()).or_default().push(event);
            by_phase
                .entry(event.phase_context.clone().unwrap_or_else(|| "unknown".to_string()))
                .or_default()
                .push(event);
            for keyword in rationale_keywords(&event.rationale) {
                by_keyword.entry(keyword).or_default().push(event);
            }
            by_hour.entry(format!("hour_{:02}", event.timestamp.hour())).or_default().push(event);
        }

        let groupings: [(&str, &HashMap<String, Vec<&DecisionEvent>>); 5] = [
            ("decision_type", &by_type),
            ("agent", &by_agent),
            ("phase", &by_phase),
            ("rationale_keyword", &by_keyword),
            ("hour_of_day", &by_hour),
        ];

        let mut patterns = Vec::new();
        for &(grouping_name, map) in groupings.iter() {
            for (key, group) in map.iter() {
                let frequency = group.len() as u32;
                if frequency < min_frequency {
                    continue;
                }
                let successes = group.iter().filter(|e| e.outcome == DecisionOutcome::Success).count();
                let success_rate = successes as f64 / group.len() as f64;

                let corroborated = groupings.iter().any(|&(other_name, other_map)| {
                    other_name != grouping_name
                        && other_map
                            .values()
                            .any(|other_group| other_group.len() as u32 >= 10 && groups_overlap(group, other_group))
                });

                let confidence = if frequency >= 10 && corroborated {
                    PatternConfidence::High
                } else if frequency >= 5 {
                    PatternConfidence::Medium
                } else {
                    PatternConfidence::Low
                };

                patterns.push(DecisionPattern {
                    grouping: grouping_name.to_string(),
                    key: key.clone(),
                    frequency,
                    success_rate,
                    confidence,
                    description: format!(
                        "{} grouping '{}' occurred {} time(s) with a {:.0}% success rate",
                        grouping_name,
                        key,
                        frequency,
                        success_rate * 100.0
                    ),
                });
            }
        }
        patterns
    }

    pub fn analyze_cross_phase_patterns(&self, events: &[DecisionEvent], min_frequency: u32) -> Vec<CrossPhasePattern> {
        let mut by_phase_pair: HashMap<(Option<PhaseId>, String), u32> = HashMap::new();
        for event in events {
            *by_phase_pair
                .entry((event.phase_context.clone(), event.decision_type.0.clone()))
                .or_insert(0) += 1;
        }
        by_phase_pair
            .into_iter()
            .filter(|(_, freq)| *freq >= min_frequency)
            .filter_map(|((phase, decision_type), freq)| {
                phase.map(|p| CrossPhasePattern {
                    phases: vec![p],
                    pattern: decision_type,
                    frequency: freq,
                    confidence: if freq >= 10 {
                        PatternConfidence::High
                    } else if freq >= 5 {
                        PatternConfidence::Medium
                    } else {
                        PatternConfidence::Low
                    },
                })
            })
            .collect()
    }

    /// Fail-soft: any internal error collapses to
    /// `HistoricalContext::insufficient_data` rather than propagating, since
    /// a caller blocked on historical context would otherwise stall a phase
    /// indefinitely over what is, by design, an optional enrichment.
    pub async fn provide_context(&self, filters: &DecisionFilters) -> HistoricalContext {
        let events = self.get_decision_history(filters, Some(500)).await;
        if events.is_empty() {
            return HistoricalContext::insufficient_data("no decision history recorded yet");
        }

        let patterns = self.analyze_patterns(&events, self.config.min_pattern_frequency);
        if patterns.is_empty() {
            return HistoricalContext::insufficient_data("insufficient frequency to establish a pattern");
        }

        let success_patterns: Vec<DecisionPattern> = patterns.iter().filter(|p| p.success_rate >= 0.6).cloned().collect();
        let failure_patterns: Vec<DecisionPattern> = patterns.iter().filter(|p| p.success_rate < 0.4).cloned().collect();

        let confidence = patterns.iter().map(|p| p.confidence).max().unwrap_or(PatternConfidence::InsufficientData);

        let recommendations = success_patterns
            .iter()
            .map(|p| format!("favor approaches similar to {} ({:.0}% success)", p.key, p.success_rate * 100.0))
            .collect();
        let cautionary_notes = failure_patterns
            .iter()
            .map(|p| format!("approach {} has historically underperformed ({:.0}% success)", p.key, p.success_rate * 100.0))
            .collect();

        HistoricalContext {
            relevant_events: events.clone(),
            success_patterns,
            failure_patterns,
            recommendations,
            cautionary_notes,
            confidence,
            events_analyzed: events.len() as u32,
            patterns_identified: patterns.len() as u32,
        }
    }

    /// Deletes decision/intervention/refinement records older than the
    /// configured retention window. Returns the number of records removed.
    pub async fn clear_old_history(&self, retention_days: Option<u32>) -> usize {
        let retention = retention_days.unwrap_or(self.config.retention_days);
        let cutoff = Utc::now() - ChronoDuration::days(retention as i64);
        let mut removed = 0;
        for prefix in ["air_agent:decision_event:", "air_agent:fire_intervention:", "air_agent:refinement_cycle:"] {
            for key in self.state_manager.find_keys(prefix).await {
                if let Some(entry) = self.state_manager.get_state(&key).await {
                    if entry.timestamp < cutoff {
                        self.state_manager.delete_state(&key).await;
                        removed += 1;
                    }
                }
            }
        }
        removed
    }
}

/// Common decision-related keywords scanned out of a rationale string,
/// mirroring the source's `_extract_keywords_from_rationale`.
const RATIONALE_KEYWORDS: &[&str] = &[
    "complexity",
    "performance",
    "optimization",
    "refinement",
    "decomposition",
    "strategy",
    "validation",
    "improvement",
    "critical",
    "urgent",
    "necessary",
    "optional",
];

fn rationale_keywords(rationale: &str) -> Vec<String> {
    let lower = rationale.to_lowercase();
    RATIONALE_KEYWORDS
        .iter()
        .filter(|kw| lower.contains(*kw))
        .map(|kw| kw.to_string())
        .collect()
}

fn groups_overlap(a: &[&DecisionEvent], b: &[&DecisionEvent]) -> bool {
    a.iter().any(|ea| b.iter().any(|eb| ea.event_id == eb.event_id))
}

fn matches_filters(event: &DecisionEvent, filters: &DecisionFilters) -> bool {
    if let Some(dt) = &filters.decision_type {
        if &event.decision_type != dt {
            return false;
        }
    }
    if let Some(agent) = &filters.agent_id {
        if &event.decision_agent != agent {
            return false;
        }
    }
    if let Some(outcome) = &filters.outcome {
        if &event.outcome != outcome {
            return false;
        }
    }
    if let Some(phase) = &filters.phase_context {
        if event.phase_context.as_ref() != Some(phase) {
            return false;
        }
    }
    if let Some(window) = filters.window {
        if event.timestamp < Utc::now() - window {
            return false;
        }
    }
    true
}

#[allow(dead_code)]
fn new_decision_id() -> DecisionEventId {
    new_id()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::backend::MemoryBackend;

    async fn engine() -> HistoricalContextEngine {
        let state_manager = Arc::new(StateManager::new(Arc::new(MemoryBackend::new())).await.unwrap());
        HistoricalContextEngine::new(state_manager, HistoricalConfig::default())
    }

    fn sample_event(decision_type: &str, agent: &str, outcome: DecisionOutcome) -> DecisionEvent {
        DecisionEvent {
            event_id: new_id(),
            decision_agent: agent.to_string(),
            decision_type: DecisionType::from(decision_type),
            timestamp: Utc::now(),
            input_context: serde_json::Value::Null,
            rationale: "because".to_string(),
            details: serde_json::Value::Null,
            outcome,
            effectiveness_score: None,
            phase_context: None,
            operation_id: None,
            lessons: Vec::new(),
            success_factors: Vec::new(),
            failure_factors: Vec::new(),
        }
    }

    #[tokio::test]
    async fn track_and_retrieve_decision_round_trips() {
        let engine = engine().await;
        let event = sample_event("approach-selection", "agent-1", DecisionOutcome::Success);
        let id = engine.track_decision(event.clone()).await.unwrap();

        let history = engine.get_decision_history(&DecisionFilters::default(), None).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].event_id, id);
    }

    #[tokio::test]
    async fn insufficient_events_yields_no_patterns() {
        let engine = engine().await;
        let events = vec![sample_event("x", "a", DecisionOutcome::Success)];
        assert!(engine.analyze_patterns(&events, 1).is_empty());
    }

    #[tokio::test]
    async fn provide_context_is_fail_soft_with_no_history() {
        let engine = engine().await;
        let context = engine.provide_context(&DecisionFilters::default()).await;
        assert_eq!(context.confidence, PatternConfidence::InsufficientData);
        assert!(context.relevant_events.is_empty());
    }

    #[tokio::test]
    async fn frequent_pattern_reaches_medium_confidence() {
        let engine = engine().await;
        let events: Vec<DecisionEvent> = (0..6)
            .map(|i| sample_event("retry-backoff", &format!("agent-{}", i % 2), DecisionOutcome::Success))
            .collect();
        let patterns = engine.analyze_patterns(&events, 5);
        let by_type = patterns
            .iter()
            .find(|p| p.grouping == "decision_type" && p.key == "retry-backoff")
            .expect("decision_type grouping should surface the frequent pattern");
        assert_eq!(by_type.confidence, PatternConfidence::Medium);
        assert_eq!(by_type.frequency, 6);
        // Per-agent groups (3 each) never reach `min_frequency`, so no
        // `agent` grouping pattern should appear alongside it.
        assert!(!patterns.iter().any(|p| p.grouping == "agent"));
    }

    #[tokio::test]
    async fn analyze_patterns_surfaces_all_five_groupings() {
        let engine = engine().await;
        let events: Vec<DecisionEvent> = (0..10)
            .map(|_| {
                let mut event = sample_event("approach-selection", "agent-1", DecisionOutcome::Success);
                event.rationale = "chosen for performance and validation".to_string();
                event.phase_context = Some("phase-two".to_string());
                event
            })
            .collect();
        let patterns = engine.analyze_patterns(&events, 5);
        for grouping in ["decision_type", "agent", "phase", "rationale_keyword", "hour_of_day"] {
            assert!(
                patterns.iter().any(|p| p.grouping == grouping),
                "missing grouping {}",
                grouping
            );
        }
        let type_pattern = patterns.iter().find(|p| p.grouping == "decision_type").unwrap();
        assert_eq!(type_pattern.confidence, PatternConfidence::High);
    }
}
