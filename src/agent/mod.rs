//! Agent capability set and Agent Coordination Interface (C9).
//!
//! The Coordination Engine depends only on `AgentPort`, never a concrete
//! agent type; a concrete agent depends only on `CoordinationPort`. Both
//! ends are wired together by a small constructor graph, replacing the
//! cyclic coordination/agent/state-manager references flagged for
//! re-architecture.

use crate::metrics::MetricsRecorder;
use crate::types::agent::{AgentResponse, ConversationTurn, ProcessOutcome};
use crate::types::state::ResourceKind;
use crate::types::{AgentId, OperationId, OrchestratorError, OrchestratorResult, PhaseId, Value};
use crate::state::StateManager;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A concrete agent: any service providing conversational responses,
/// pipeline-step processing, and (optionally) clarification.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn get_response(
        &self,
        conversation: &[ConversationTurn],
        system_prompt: &str,
        current_phase: Option<&PhaseId>,
        operation_id: &str,
    ) -> OrchestratorResult<AgentResponse>;

    async fn process(&self, input: serde_json::Value) -> OrchestratorResult<ProcessOutcome>;

    /// Default clarify: echoes the question back as an unhelpful but
    /// well-formed answer. Real agents override this; when they don't, the
    /// Agent Coordination Interface's cache still applies uniformly.
    async fn clarify(&self, question: &str) -> OrchestratorResult<String> {
        Ok(format!("unable to clarify: {}", question))
    }
}

/// What the Coordination Engine is allowed to know about an agent: just
/// enough to participate in a handoff.
#[async_trait]
pub trait AgentPort: Send + Sync {
    fn agent_id(&self) -> &str;
    async fn clarify(&self, question: &str) -> OrchestratorResult<String>;
    async fn apply_update(&self, original: &str, updated: &str) -> OrchestratorResult<bool>;
}

/// What a concrete agent is allowed to know about coordination: just enough
/// to hand off to the next agent, never the concrete `CoordinationEngine`.
#[async_trait]
pub trait CoordinationPort: Send + Sync {
    async fn coordinate_with_next(
        &self,
        next: Arc<dyn AgentPort>,
        my_output: String,
        other_output: String,
        params: crate::coordination::CoordinationParams,
    ) -> OrchestratorResult<(String, String, crate::types::coordination::CoordinationContext)>;
}

/// A deterministic no-op agent so the CLI launcher is runnable standalone
/// without any concrete LLM-backed agent injected.
pub struct NoopAgent;

#[async_trait]
impl Agent for NoopAgent {
    async fn get_response(
        &self,
        _conversation: &[ConversationTurn],
        _system_prompt: &str,
        _current_phase: Option<&PhaseId>,
        _operation_id: &str,
    ) -> OrchestratorResult<AgentResponse> {
        Ok(AgentResponse {
            response: String::new(),
            content: None,
        })
    }

    async fn process(&self, _input: serde_json::Value) -> OrchestratorResult<ProcessOutcome> {
        Ok(ProcessOutcome {
            status: crate::types::agent::ProcessStatus::Success,
            output: Some(serde_json::Value::Null),
            error: None,
        })
    }
}

#[async_trait]
impl AgentPort for NoopAgent {
    fn agent_id(&self) -> &str {
        "noop"
    }

    async fn clarify(&self, question: &str) -> OrchestratorResult<String> {
        Ok(format!("no-op clarification for: {}", question))
    }

    async fn apply_update(&self, _original: &str, _updated: &str) -> OrchestratorResult<bool> {
        Ok(true)
    }
}

/// Per-agent adapter satisfying the `AgentPort` capability set over a
/// concrete `Agent`, with a per-interface clarification cache keyed on a
/// stable hash of the question (not on agent identity — confirmed scope per
/// the design notes: two interfaces never share a cache even for the same
/// logical agent).
pub struct AgentCoordinationInterface {
    agent_id: AgentId,
    agent: Arc<dyn Agent>,
    state_manager: Arc<StateManager>,
    metrics: Arc<MetricsRecorder>,
    cache: RwLock<HashMap<u64, String>>,
    /// Set when this interface should be able to initiate a handoff with the
    /// next agent in the pipeline via `coordinate_with_next`; `None` for
    /// interfaces only ever acting as the *target* side of a handoff.
    coordination: Option<Arc<crate::coordination::CoordinationEngine>>,
}

impl AgentCoordinationInterface {
    pub fn new(
        agent_id: AgentId,
        agent: Arc<dyn Agent>,
        state_manager: Arc<StateManager>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            agent_id,
            agent,
            state_manager,
            metrics,
            cache: RwLock::new(HashMap::new()),
            coordination: None,
        }
    }

    /// Attaches a shared `CoordinationEngine`, enabling `coordinate_with_next`.
    pub fn with_coordination_engine(mut self, engine: Arc<crate::coordination::CoordinationEngine>) -> Self {
        self.coordination = Some(engine);
        self
    }

    fn hash_question(question: &str) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        question.hash(&mut hasher);
        hasher.finish()
    }

    async fn metric(&self, suffix: &str) {
        self.metrics
            .record(format!("agent:{}:{}", self.agent_id, suffix), 1.0, HashMap::new())
            .await;
    }

    /// Stores the updated output under `agent_context:{agent_id}:latest`
    /// with history appended. A no-op update (original == updated) appends
    /// no history entry.
    pub async fn update_output(&self, original: &str, updated: &str) -> OrchestratorResult<bool> {
        if original == updated {
            return Ok(false);
        }
        let key = format!("agent_context:{}:latest", self.agent_id);
        let mut history: Vec<Value> = self
            .state_manager
            .get_state(&key)
            .await
            .and_then(|e| match e.value {
                Value::Map(m) => m.get("output_history").cloned(),
                _ => None,
            })
            .and_then(|v| match v {
                Value::Array(a) => Some(a),
                _ => None,
            })
            .unwrap_or_default();
        history.push(Value::String(original.to_string()));

        let mut record = HashMap::new();
        record.insert("output".to_string(), Value::String(updated.to_string()));
        record.insert("output_history".to_string(), Value::Array(history));
        record.insert("coordination_applied".to_string(), Value::Bool(true));

        self.state_manager
            .set_state(key, Value::Map(record), ResourceKind::AgentContext, None, None)
            .await?;
        self.metric("output_update").await;
        Ok(true)
    }
}

#[async_trait]
impl AgentPort for AgentCoordinationInterface {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    async fn clarify(&self, question: &str) -> OrchestratorResult<String> {
        self.metric("clarification_request").await;
        let key = Self::hash_question(question);
        if let Some(cached) = self.cache.read().await.get(&key).cloned() {
            return Ok(cached);
        }

        let answer = match self.agent.clarify(question).await {
            Ok(a) => a,
            Err(e) => {
                self.metric("error").await;
                return Err(e);
            }
        };

        self.cache.write().await.insert(key, answer.clone());
        self.metric("clarification_response").await;
        Ok(answer)
    }

    async fn apply_update(&self, original: &str, updated: &str) -> OrchestratorResult<bool> {
        self.update_output(original, updated).await
    }
}

#[async_trait]
impl CoordinationPort for AgentCoordinationInterface {
    /// Delegates to the shared `CoordinationEngine`, metrics-tagging the
    /// start/completion/error so a handoff initiated by this agent is
    /// observable the same way a clarification or output update is.
    async fn coordinate_with_next(
        &self,
        next: Arc<dyn AgentPort>,
        my_output: String,
        other_output: String,
        params: crate::coordination::CoordinationParams,
    ) -> OrchestratorResult<(String, String, crate::types::coordination::CoordinationContext)> {
        let engine = self.coordination.as_ref().ok_or_else(|| {
            OrchestratorError::CoordinationError(format!(
                "agent {} has no coordination engine attached",
                self.agent_id
            ))
        })?;

        self.metric("coordination_start").await;
        let next_id = next.agent_id().to_string();
        let result = engine
            .coordinate(self, self.agent_id.clone(), my_output, next.as_ref(), next_id, other_output, params)
            .await;

        match &result {
            Ok(_) => self.metric("coordination_complete").await,
            Err(_) => self.metric("error").await,
        }
        result
    }
}

/// Part of the `Agent`-capability-set error surface: agent operations that
/// fail are reported as `{status: "error", ...}` rather than by unwrapping a
/// panic in caller code.
pub fn process_error(message: impl Into<String>) -> OrchestratorError {
    OrchestratorError::CoordinationError(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::backend::MemoryBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingAgent(Arc<AtomicUsize>);

    #[async_trait]
    impl Agent for CountingAgent {
        async fn get_response(
            &self,
            _c: &[ConversationTurn],
            _s: &str,
            _p: Option<&PhaseId>,
            _o: &str,
        ) -> OrchestratorResult<AgentResponse> {
            unimplemented!()
        }
        async fn process(&self, _input: serde_json::Value) -> OrchestratorResult<ProcessOutcome> {
            unimplemented!()
        }
        async fn clarify(&self, question: &str) -> OrchestratorResult<String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(format!("answer to {}", question))
        }
    }

    async fn interface(calls: Arc<AtomicUsize>) -> AgentCoordinationInterface {
        let state_manager = Arc::new(StateManager::new(Arc::new(MemoryBackend::new())).await.unwrap());
        let metrics = MetricsRecorder::new(100);
        AgentCoordinationInterface::new(
            "agent-1".to_string(),
            Arc::new(CountingAgent(calls)),
            state_manager,
            metrics,
        )
    }

    #[tokio::test]
    async fn clarify_is_cached_per_question() {
        let calls = Arc::new(AtomicUsize::new(0));
        let iface = interface(calls.clone()).await;

        let a1 = iface.clarify("what is X?").await.unwrap();
        let a2 = iface.clarify("what is X?").await.unwrap();
        assert_eq!(a1, a2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn update_output_noop_when_unchanged() {
        let iface = interface(Arc::new(AtomicUsize::new(0))).await;
        assert!(!iface.update_output("same", "same").await.unwrap());
        assert!(iface.update_output("old", "new").await.unwrap());
    }

    #[tokio::test]
    async fn coordinate_with_next_delegates_to_engine() {
        use crate::coordination::{CoordinationEngine, CoordinationParams, EchoAssessor, NullDetector};

        let state_manager = Arc::new(StateManager::new(Arc::new(MemoryBackend::new())).await.unwrap());
        let engine = Arc::new(CoordinationEngine::new(
            state_manager.clone(),
            Arc::new(NullDetector),
            Arc::new(EchoAssessor),
        ));
        let iface = AgentCoordinationInterface::new(
            "agent-a".to_string(),
            Arc::new(CountingAgent(Arc::new(AtomicUsize::new(0)))),
            state_manager,
            MetricsRecorder::new(100),
        )
        .with_coordination_engine(engine);

        let (mine, theirs, ctx) = iface
            .coordinate_with_next(Arc::new(NoopAgent), "Oa".to_string(), "Ob".to_string(), CoordinationParams::default())
            .await
            .unwrap();

        assert_eq!(mine, "Oa");
        assert_eq!(theirs, "Ob");
        assert_eq!(ctx.first_agent_id, "agent-a");
        assert_eq!(ctx.second_agent_id, "noop");
    }

    #[tokio::test]
    async fn coordinate_with_next_errors_without_engine() {
        let iface = interface(Arc::new(AtomicUsize::new(0))).await;
        let result = iface
            .coordinate_with_next(Arc::new(NoopAgent), "Oa".to_string(), "Ob".to_string(), crate::coordination::CoordinationParams::default())
            .await;
        assert!(matches!(result, Err(OrchestratorError::CoordinationError(_))));
    }
}
