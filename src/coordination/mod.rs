//! Coordination Engine ("Water", C6): detects semantic misunderstandings
//! between two sequential agents' outputs, drives iterative Q&A rounds, and
//! produces reconciled outputs with a persisted coordination context.

pub mod detector;

pub use detector::{EchoAssessor, MisunderstandingDetector, NullDetector, ResolutionAssessor};

use crate::agent::AgentPort;
use crate::state::json_bridge::json_to_value;
use crate::state::StateManager;
use crate::types::coordination::{
    CoordinationContext, CoordinationIteration, CoordinationMode, CoordinationStatus, Severity,
};
use crate::types::state::ResourceKind;
use crate::types::{AgentId, CoordinationId, OrchestratorError, OrchestratorResult, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Duration;

fn coordination_key(id: &str) -> String {
    format!("water_agent:coordination:{}", id)
}

pub struct CoordinationParams {
    pub mode: CoordinationMode,
    pub max_iterations: u32,
    pub severity_threshold: Severity,
    pub response_timeout: Duration,
}

impl Default for CoordinationParams {
    fn default() -> Self {
        Self {
            mode: CoordinationMode::Standard,
            max_iterations: 5,
            severity_threshold: Severity::Medium,
            response_timeout: Duration::from_secs(30),
        }
    }
}

pub struct CoordinationEngine {
    state_manager: Arc<StateManager>,
    contexts: RwLock<HashMap<CoordinationId, CoordinationContext>>,
    detector: Arc<dyn MisunderstandingDetector>,
    assessor: Arc<dyn ResolutionAssessor>,
    /// Responses cached within a context, keyed by question, so a repeated
    /// question across iterations does not re-invoke the agent.
    response_cache: RwLock<HashMap<CoordinationId, HashMap<String, String>>>,
}

impl CoordinationEngine {
    pub fn new(
        state_manager: Arc<StateManager>,
        detector: Arc<dyn MisunderstandingDetector>,
        assessor: Arc<dyn ResolutionAssessor>,
    ) -> Self {
        Self {
            state_manager,
            contexts: RwLock::new(HashMap::new()),
            detector,
            assessor,
            response_cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn coordinate(
        &self,
        first_agent: &dyn AgentPort,
        first_agent_id: AgentId,
        first_output: String,
        second_agent: &dyn AgentPort,
        second_agent_id: AgentId,
        second_output: String,
        params: CoordinationParams,
    ) -> OrchestratorResult<(String, String, CoordinationContext)> {
        let mut context = CoordinationContext::new(
            first_agent_id,
            second_agent_id,
            first_output.clone(),
            second_output.clone(),
            params.mode,
            params.max_iterations,
            params.severity_threshold,
        );

        let detection = match self.detector.detect(&context).await {
            Ok(d) => d,
            Err(e) => {
                context.status = CoordinationStatus::Failed;
                context.first_final = Some(first_output.clone());
                context.second_final = Some(second_output.clone());
                self.persist(&context).await?;
                return Err(OrchestratorError::CoordinationError(e.to_string()));
            }
        };

        let relevant: Vec<_> = detection
            .misunderstandings
            .into_iter()
            .filter(|m| m.severity >= context.severity_threshold)
            .collect();

        if relevant.is_empty() {
            context.status = CoordinationStatus::Completed;
            context.first_final = Some(first_output.clone());
            context.second_final = Some(second_output.clone());
            context.completed_at = Some(chrono::Utc::now());
            self.persist(&context).await?;
            self.contexts.write().await.insert(context.coordination_id.clone(), context.clone());
            return Ok((first_output, second_output, context));
        }

        context.misunderstandings = relevant.clone();
        for m in &relevant {
            context.unresolved.insert(m.id.clone(), m.clone());
        }
        context.status = CoordinationStatus::InProgress;

        let mut questions_a = detection.questions_for_first;
        let mut questions_b = detection.questions_for_second;
        let mut all_timed_out_ever = false;

        for iteration_index in 1..=context.max_iterations {
            // A's and B's response gathering run concurrently within an
            // iteration; the iteration barrier below is the join.
            let (first_result, second_result) = tokio::join!(
                self.gather_responses(&context.coordination_id, first_agent, &questions_a, params.response_timeout),
                self.gather_responses(&context.coordination_id, second_agent, &questions_b, params.response_timeout)
            );
            let (first_responses, first_timed_out) = first_result;
            let (second_responses, second_timed_out) = second_result;

            // "All responses time out" means every response expected this
            // iteration across *both* agents, not each side independently
            // having nonempty questions that all timed out — a side with no
            // questions at all must not mask the other side's full timeout.
            let expected = questions_a.len() + questions_b.len();
            if expected > 0 && first_timed_out + second_timed_out == expected {
                all_timed_out_ever = true;
                break;
            }

            let assessment = self
                .assessor
                .assess(&context, &first_responses, &second_responses)
                .await
                .map_err(|e| OrchestratorError::CoordinationError(e.to_string()))?;

            let mut iteration = CoordinationIteration {
                index: iteration_index,
                timestamp: Some(chrono::Utc::now()),
                first_questions: questions_a.clone(),
                first_responses,
                second_questions: questions_b.clone(),
                second_responses,
                resolved: assessment.resolved.clone(),
                unresolved: assessment.unresolved.clone(),
            };

            for id in &assessment.resolved {
                context.resolved_ids.insert(id.clone());
                context.unresolved.remove(id);
            }

            context.iterations.push(std::mem::take(&mut iteration));
            context.updated_at = chrono::Utc::now();

            if context.unresolved.is_empty() || !assessment.require_further {
                break;
            }

            questions_a = assessment.new_questions_first;
            questions_b = assessment.new_questions_second;
        }

        let (final_first, final_second) = self.generate_reconciled(&context, &first_output, &second_output);

        if all_timed_out_ever {
            context.status = CoordinationStatus::Failed;
            context.first_final = Some(first_output.clone());
            context.second_final = Some(second_output.clone());
        } else if context.unresolved.is_empty() {
            context.status = CoordinationStatus::Completed;
            context.first_final = Some(final_first.clone());
            context.second_final = Some(final_second.clone());
        } else {
            context.status = CoordinationStatus::Partial;
            context.first_final = Some(final_first.clone());
            context.second_final = Some(final_second.clone());
        }
        context.final_status = Some(context.status);
        context.completed_at = Some(chrono::Utc::now());
        context.refinement_summary = Some(format!(
            "{} of {} misunderstandings resolved over {} iteration(s)",
            context.resolved_ids.len(),
            context.misunderstandings.len(),
            context.iterations.len()
        ));

        self.persist(&context).await?;
        self.contexts.write().await.insert(context.coordination_id.clone(), context.clone());
        self.response_cache.write().await.remove(&context.coordination_id);

        let (out_a, out_b) = match context.status {
            CoordinationStatus::Failed => (first_output, second_output),
            _ => (final_first, final_second),
        };

        Ok((out_a, out_b, context))
    }

    /// Returns the gathered responses and the count of questions that timed
    /// out (rather than a single "did every question here time out" bool),
    /// so the caller can judge "all responses time out" over the union of
    /// both agents' expected responses for the iteration.
    async fn gather_responses(
        &self,
        coordination_id: &CoordinationId,
        agent: &dyn AgentPort,
        questions: &[String],
        timeout: Duration,
    ) -> (HashMap<String, String>, usize) {
        if questions.is_empty() {
            return (HashMap::new(), 0);
        }
        let mut responses = HashMap::new();
        let mut timed_out = 0usize;

        for question in questions {
            if let Some(cached) = self.cached_response(coordination_id, question).await {
                responses.insert(question.clone(), cached);
                continue;
            }
            match tokio::time::timeout(timeout, agent.clarify(question)).await {
                Ok(Ok(answer)) => {
                    self.cache_response(coordination_id, question, &answer).await;
                    responses.insert(question.clone(), answer);
                }
                _ => {
                    timed_out += 1;
                }
            }
        }

        (responses, timed_out)
    }

    async fn cached_response(&self, coordination_id: &CoordinationId, question: &str) -> Option<String> {
        let cache = self.response_cache.read().await;
        cache.get(coordination_id).and_then(|m| m.get(question)).cloned()
    }

    async fn cache_response(&self, coordination_id: &CoordinationId, question: &str, answer: &str) {
        let mut cache = self.response_cache.write().await;
        cache
            .entry(coordination_id.clone())
            .or_default()
            .insert(question.to_string(), answer.to_string());
    }

    fn generate_reconciled(&self, context: &CoordinationContext, first_output: &str, second_output: &str) -> (String, String) {
        if context.resolved_ids.is_empty() {
            return (first_output.to_string(), second_output.to_string());
        }
        let note = format!(
            "\n\n[coordination: {} clarification(s) applied]",
            context.resolved_ids.len()
        );
        (format!("{}{}", first_output, note), format!("{}{}", second_output, note))
    }

    async fn persist(&self, context: &CoordinationContext) -> OrchestratorResult<()> {
        let value = serde_json::to_value(context)
            .map_err(|e| OrchestratorError::SerializationError(e.to_string()))?;
        self.state_manager
            .set_state(
                coordination_key(&context.coordination_id),
                json_to_value(value),
                ResourceKind::Coordination,
                None,
                Some("coordination update".to_string()),
            )
            .await?;
        Ok(())
    }

    /// Drops raw transcripts, keeps final outputs/summaries. A pruned
    /// context still ages out normally via `cleanup_old_contexts` — pruning
    /// only shrinks a still-live context, it never exempts it from TTL.
    pub async fn prune(&self, coordination_id: &CoordinationId) -> OrchestratorResult<()> {
        let mut contexts = self.contexts.write().await;
        let context = contexts
            .get_mut(coordination_id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("coordination {}", coordination_id)))?;
        for iteration in &mut context.iterations {
            iteration.first_responses.clear();
            iteration.second_responses.clear();
        }
        context.pruned = true;
        let snapshot = context.clone();
        drop(contexts);
        self.persist(&snapshot).await
    }

    /// Unconditionally deletes contexts older than `ttl`, regardless of
    /// prune state. TTL deletion always wins over prune state.
    pub async fn cleanup_old_contexts(&self, ttl: Duration) -> usize {
        let cutoff = chrono::Utc::now() - chrono::Duration::from_std(ttl).unwrap_or_default();
        let mut contexts = self.contexts.write().await;
        let before = contexts.len();
        contexts.retain(|_, ctx| ctx.created_at > cutoff);
        before - contexts.len()
    }

    pub async fn get_context(&self, coordination_id: &CoordinationId) -> Option<CoordinationContext> {
        self.contexts.read().await.get(coordination_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentPort, NoopAgent};
    use crate::state::backend::MemoryBackend;

    /// Never answers within any realistic timeout; used to exercise the
    /// "all responses time out" path deterministically.
    struct StallingAgent;

    #[async_trait::async_trait]
    impl AgentPort for StallingAgent {
        fn agent_id(&self) -> &str {
            "stalling"
        }
        async fn clarify(&self, _question: &str) -> OrchestratorResult<String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!("clarify should have been cancelled by the timeout")
        }
        async fn apply_update(&self, _original: &str, _updated: &str) -> OrchestratorResult<bool> {
            Ok(true)
        }
    }

    async fn engine(detector: Arc<dyn MisunderstandingDetector>, assessor: Arc<dyn ResolutionAssessor>) -> CoordinationEngine {
        let state_manager = Arc::new(StateManager::new(Arc::new(MemoryBackend::new())).await.unwrap());
        CoordinationEngine::new(state_manager, detector, assessor)
    }

    #[tokio::test]
    async fn happy_path_with_no_misunderstandings() {
        let engine = engine(Arc::new(NullDetector), Arc::new(EchoAssessor)).await;
        let (a, b, ctx) = engine
            .coordinate(
                &NoopAgent,
                "agent-a".to_string(),
                "Oa".to_string(),
                &NoopAgent,
                "agent-b".to_string(),
                "Ob".to_string(),
                CoordinationParams::default(),
            )
            .await
            .unwrap();

        assert_eq!(a, "Oa");
        assert_eq!(b, "Ob");
        assert_eq!(ctx.status, CoordinationStatus::Completed);
        assert_eq!(ctx.iterations.len(), 0);
    }

    #[tokio::test]
    async fn max_iterations_never_exceeded() {
        use crate::coordination::detector::AlwaysUnresolvedAssessor;
        use crate::coordination::detector::OneIssueDetector;

        let engine = engine(Arc::new(OneIssueDetector), Arc::new(AlwaysUnresolvedAssessor)).await;
        let mut params = CoordinationParams::default();
        params.max_iterations = 2;
        let (_, _, ctx) = engine
            .coordinate(
                &NoopAgent,
                "agent-a".to_string(),
                "Oa".to_string(),
                &NoopAgent,
                "agent-b".to_string(),
                "Ob".to_string(),
                params,
            )
            .await
            .unwrap();

        assert!(ctx.iterations.len() <= 2);
        assert_eq!(ctx.status, CoordinationStatus::Partial);
    }

    #[tokio::test]
    async fn all_timed_out_when_one_side_has_no_questions_this_iteration() {
        use crate::coordination::detector::{AlwaysUnresolvedAssessor, SecondAgentOnlyDetector};

        let engine = engine(Arc::new(SecondAgentOnlyDetector), Arc::new(AlwaysUnresolvedAssessor)).await;
        let mut params = CoordinationParams::default();
        params.response_timeout = Duration::from_millis(20);

        let (a, b, ctx) = engine
            .coordinate(
                &NoopAgent,
                "agent-a".to_string(),
                "Oa".to_string(),
                &StallingAgent,
                "agent-b".to_string(),
                "Ob".to_string(),
                params,
            )
            .await
            .unwrap();

        // First agent had zero questions this iteration; second agent's lone
        // question fully timed out. That is "all responses time out" even
        // though the first agent was never independently non-empty.
        assert_eq!(ctx.status, CoordinationStatus::Failed);
        assert_eq!(a, "Oa");
        assert_eq!(b, "Ob");
    }

    #[tokio::test]
    async fn resolves_over_two_iterations() {
        use crate::coordination::detector::{OneIssueDetector, ResolvesOnSecondCallAssessor};

        let engine = engine(Arc::new(OneIssueDetector), Arc::new(ResolvesOnSecondCallAssessor::new())).await;
        let (_, _, ctx) = engine
            .coordinate(
                &NoopAgent,
                "agent-a".to_string(),
                "Oa".to_string(),
                &NoopAgent,
                "agent-b".to_string(),
                "Ob".to_string(),
                CoordinationParams::default(),
            )
            .await
            .unwrap();

        assert_eq!(ctx.iterations.len(), 2);
        assert!(ctx.resolved_ids.contains("M1"));
        assert!(ctx.refinement_summary.is_some());
    }
}
