//! Phase Coordinator (C5): phase lifecycle state machine, dependency graph,
//! checkpointing, rollback, and nested-phase queueing.

use crate::event_bus::EventBus;
use crate::state::json_bridge::{json_to_value, value_to_json};
use crate::state::StateManager;
use crate::types::phase::{Checkpoint, PhaseContext, PhaseState, PhaseType};
use crate::types::state::ResourceKind;
use crate::types::{Event, OrchestratorError, OrchestratorResult, PhaseId, Priority, Value, ValueMap};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

fn checkpoint_key(checkpoint_id: &str) -> String {
    format!("phase_checkpoint:{}", checkpoint_id)
}

pub struct PhaseCoordinator {
    contexts: RwLock<HashMap<PhaseId, PhaseContext>>,
    /// Dependencies a phase must see COMPLETED before it can `start`.
    dependencies: RwLock<HashMap<PhaseId, HashSet<PhaseId>>>,
    /// FIFO queue of pending nested-phase specs per parent; at most one is
    /// admitted to running at a time per parent.
    nested_queues: RwLock<HashMap<PhaseId, VecDeque<PhaseId>>>,
    active_nested: RwLock<HashMap<PhaseId, PhaseId>>,
    state_manager: Arc<StateManager>,
    event_bus: Arc<EventBus>,
    max_parallel: usize,
}

impl PhaseCoordinator {
    pub fn new(state_manager: Arc<StateManager>, event_bus: Arc<EventBus>, max_parallel: usize) -> Self {
        Self {
            contexts: RwLock::new(HashMap::new()),
            dependencies: RwLock::new(HashMap::new()),
            nested_queues: RwLock::new(HashMap::new()),
            active_nested: RwLock::new(HashMap::new()),
            state_manager,
            event_bus,
            max_parallel,
        }
    }

    pub async fn create_phase(
        &self,
        phase_type: PhaseType,
        inputs: ValueMap,
        parent_id: Option<PhaseId>,
    ) -> OrchestratorResult<PhaseId> {
        let context = PhaseContext::new(phase_type, inputs, parent_id.clone());
        let phase_id = context.phase_id.clone();

        if let Some(parent_id) = &parent_id {
            let mut contexts = self.contexts.write().await;
            let parent = contexts
                .get_mut(parent_id)
                .ok_or_else(|| OrchestratorError::NotFound(format!("phase {}", parent_id)))?;
            parent.children.insert(phase_id.clone());
        }

        self.contexts.write().await.insert(phase_id.clone(), context);
        self.dependencies.write().await.insert(phase_id.clone(), HashSet::new());
        Ok(phase_id)
    }

    pub async fn add_dependency(&self, phase_id: &PhaseId, depends_on: PhaseId) {
        let mut deps = self.dependencies.write().await;
        deps.entry(phase_id.clone()).or_default().insert(depends_on);
    }

    async fn transition(&self, phase_id: &PhaseId, next: PhaseState) -> OrchestratorResult<PhaseContext> {
        let mut contexts = self.contexts.write().await;
        let context = contexts
            .get_mut(phase_id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("phase {}", phase_id)))?;

        if !context.state.can_transition_to(next) {
            return Err(OrchestratorError::InvalidTransition(format!(
                "{:?} -> {:?}",
                context.state, next
            )));
        }
        context.state = next;
        context.updated_at = chrono::Utc::now();
        Ok(context.clone())
    }

    /// Moves a phase INITIALIZING -> READY once it has no unmet declared
    /// dependencies of its own initialization order. Phases created fresh
    /// are INITIALIZING; callers move them to READY explicitly here.
    pub async fn mark_ready(&self, phase_id: &PhaseId) -> OrchestratorResult<()> {
        self.transition(phase_id, PhaseState::Ready).await?;
        Ok(())
    }

    /// Requires READY and all declared dependencies COMPLETED.
    pub async fn start(&self, phase_id: &PhaseId) -> OrchestratorResult<()> {
        let deps = self.dependencies.read().await.get(phase_id).cloned().unwrap_or_default();
        for dep in &deps {
            let dep_context = self
                .contexts
                .read()
                .await
                .get(dep)
                .cloned()
                .ok_or_else(|| OrchestratorError::NotFound(format!("phase {}", dep)))?;
            if dep_context.state != PhaseState::Completed {
                return Err(OrchestratorError::InvalidTransition(format!(
                    "dependency {} not completed",
                    dep
                )));
            }
        }
        self.transition(phase_id, PhaseState::Running).await?;
        Ok(())
    }

    pub async fn pause(&self, phase_id: &PhaseId) -> OrchestratorResult<()> {
        self.transition(phase_id, PhaseState::Paused).await?;
        Ok(())
    }

    pub async fn resume(&self, phase_id: &PhaseId) -> OrchestratorResult<()> {
        self.transition(phase_id, PhaseState::Running).await?;
        Ok(())
    }

    /// A parent cannot complete while any child is non-terminal.
    pub async fn complete(&self, phase_id: &PhaseId, outputs: ValueMap) -> OrchestratorResult<()> {
        let children = {
            let contexts = self.contexts.read().await;
            let context = contexts
                .get(phase_id)
                .ok_or_else(|| OrchestratorError::NotFound(format!("phase {}", phase_id)))?;
            context.children.clone()
        };
        for child_id in &children {
            let child = self
                .contexts
                .read()
                .await
                .get(child_id)
                .cloned()
                .ok_or_else(|| OrchestratorError::NotFound(format!("phase {}", child_id)))?;
            if !child.state.is_terminal() {
                return Err(OrchestratorError::InvalidTransition(format!(
                    "child {} not terminal",
                    child_id
                )));
            }
        }

        let mut contexts = self.contexts.write().await;
        let context = contexts.get_mut(phase_id).unwrap();
        if !context.state.can_transition_to(PhaseState::Completed) {
            return Err(OrchestratorError::InvalidTransition(format!(
                "{:?} -> COMPLETED",
                context.state
            )));
        }
        context.state = PhaseState::Completed;
        context.outputs = outputs;
        context.updated_at = chrono::Utc::now();
        let parent_id = context.parent_id.clone();
        drop(contexts);
        if let Some(parent_id) = parent_id {
            self.release_nested_slot(&parent_id, phase_id).await;
        }
        Ok(())
    }

    /// A failed child does not automatically fail its parent; the caller
    /// decides via the emitted event.
    pub async fn fail(&self, phase_id: &PhaseId, reason: impl Into<String>) -> OrchestratorResult<()> {
        let reason = reason.into();
        let mut context = self.transition(phase_id, PhaseState::Failed).await?;
        context
            .metadata
            .insert("failure_reason".to_string(), Value::String(reason.clone()));
        let parent_id = context.parent_id.clone();
        self.contexts.write().await.insert(phase_id.clone(), context);
        if let Some(parent_id) = parent_id {
            self.release_nested_slot(&parent_id, phase_id).await;
        }
        self.emit_state_changed(phase_id, "failed").await;
        Ok(())
    }

    pub async fn abort(&self, phase_id: &PhaseId, reason: impl Into<String>) -> OrchestratorResult<()> {
        let reason = reason.into();
        let mut context = self.transition(phase_id, PhaseState::Aborted).await?;
        context
            .metadata
            .insert("failure_reason".to_string(), Value::String(reason));
        let parent_id = context.parent_id.clone();
        self.contexts.write().await.insert(phase_id.clone(), context);
        if let Some(parent_id) = parent_id {
            self.release_nested_slot(&parent_id, phase_id).await;
        }
        self.emit_state_changed(phase_id, "aborted").await;
        Ok(())
    }

    /// Allows a non-terminal phase back to READY, used by rollback.
    async fn reset_to_ready(&self, phase_id: &PhaseId) {
        let mut contexts = self.contexts.write().await;
        if let Some(context) = contexts.get_mut(phase_id) {
            context.state = PhaseState::Ready;
            context.updated_at = chrono::Utc::now();
        }
    }

    pub async fn checkpoint(&self, phase_id: &PhaseId) -> OrchestratorResult<String> {
        let context = self
            .contexts
            .read()
            .await
            .get(phase_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound(format!("phase {}", phase_id)))?;

        let taken_at = chrono::Utc::now();
        let hash_input = serde_json::to_vec(&context)
            .map_err(|e| OrchestratorError::SerializationError(e.to_string()))?;
        let checkpoint_id = crate::types::content_id(&hash_input);
        let checkpoint = Checkpoint {
            checkpoint_id: checkpoint_id.clone(),
            phase_id: phase_id.clone(),
            taken_at,
            context: context.clone(),
        };

        let value = serde_json::to_value(&checkpoint)
            .map_err(|e| OrchestratorError::SerializationError(e.to_string()))?;
        self.state_manager
            .set_state(
                checkpoint_key(&checkpoint_id),
                json_to_value(value),
                ResourceKind::Phase,
                None,
                Some("checkpoint".to_string()),
            )
            .await?;

        let mut contexts = self.contexts.write().await;
        let context = contexts.get_mut(phase_id).unwrap();
        context.checkpoint_ids.push(checkpoint_id.clone());
        Ok(checkpoint_id)
    }

    /// Restores the phase to the snapshotted context and resets it to
    /// RUNNING's predecessor state (READY) for any non-terminal children, so
    /// rollback re-opens undone work instead of leaving it stuck terminal.
    pub async fn rollback(&self, checkpoint_id: &str) -> OrchestratorResult<PhaseId> {
        let entry = self
            .state_manager
            .get_state(&checkpoint_key(checkpoint_id))
            .await
            .ok_or_else(|| OrchestratorError::NotFound(format!("checkpoint {}", checkpoint_id)))?;

        let checkpoint: Checkpoint = serde_json::from_value(value_to_json(entry.value))
            .map_err(|e| OrchestratorError::SerializationError(e.to_string()))?;

        let phase_id = checkpoint.phase_id.clone();
        {
            let mut contexts = self.contexts.write().await;
            contexts.insert(phase_id.clone(), checkpoint.context.clone());
        }

        for child_id in &checkpoint.context.children {
            let child_state = self.contexts.read().await.get(child_id).map(|c| c.state);
            if let Some(state) = child_state {
                if !state.is_terminal() || state == PhaseState::Failed {
                    self.reset_to_ready(child_id).await;
                }
            }
        }

        self.emit_state_changed(&phase_id, "rolled_back").await;
        Ok(phase_id)
    }

    /// Admits a child phase spec into the parent's FIFO queue; at most one
    /// nested phase runs per parent at a time.
    pub async fn enqueue_nested(&self, phase_id: &PhaseId, nested_id: PhaseId) -> OrchestratorResult<()> {
        let mut queues = self.nested_queues.write().await;
        let queue = queues.entry(phase_id.clone()).or_default();
        queue.push_back(nested_id);
        self.try_admit_nested(phase_id, &mut queues).await;
        Ok(())
    }

    /// Clears the parent's occupied nested-queue slot once its currently
    /// admitted nested phase reaches a terminal state, then admits the next
    /// queued nested phase for that parent, if any.
    async fn release_nested_slot(&self, parent_id: &PhaseId, completed_nested_id: &PhaseId) {
        {
            let mut active = self.active_nested.write().await;
            if active.get(parent_id) == Some(completed_nested_id) {
                active.remove(parent_id);
            }
        }
        let mut queues = self.nested_queues.write().await;
        self.try_admit_nested(parent_id, &mut queues).await;
    }

    async fn try_admit_nested(&self, parent_id: &PhaseId, queues: &mut HashMap<PhaseId, VecDeque<PhaseId>>) {
        let mut active = self.active_nested.write().await;
        if active.contains_key(parent_id) {
            return;
        }
        if let Some(queue) = queues.get_mut(parent_id) {
            if let Some(next) = queue.pop_front() {
                active.insert(parent_id.clone(), next);
                let _ = self.mark_ready(&next).await;
            }
        }
    }

    pub async fn get_context(&self, phase_id: &PhaseId) -> Option<PhaseContext> {
        self.contexts.read().await.get(phase_id).cloned()
    }

    /// Runnable frontier: READY phases whose dependencies are all COMPLETED,
    /// bounded by the configured parallelism.
    pub async fn runnable_frontier(&self) -> Vec<PhaseId> {
        let contexts = self.contexts.read().await;
        let dependencies = self.dependencies.read().await;
        let mut runnable = Vec::new();
        for (id, context) in contexts.iter() {
            if context.state != PhaseState::Ready {
                continue;
            }
            let deps = dependencies.get(id).cloned().unwrap_or_default();
            let satisfied = deps.iter().all(|dep| {
                contexts
                    .get(dep)
                    .map(|d| d.state == PhaseState::Completed)
                    .unwrap_or(false)
            });
            if satisfied {
                runnable.push(id.clone());
            }
        }
        runnable.truncate(self.max_parallel);
        runnable
    }

    async fn emit_state_changed(&self, phase_id: &PhaseId, state: &str) {
        let mut payload = HashMap::new();
        payload.insert("component".to_string(), Value::String("phase_coordinator".to_string()));
        payload.insert("phase_id".to_string(), Value::String(phase_id.clone()));
        payload.insert("state".to_string(), Value::String(state.to_string()));
        let _ = self
            .event_bus
            .emit(Event::new(
                crate::types::event::event_type::RESOURCE_STATE_CHANGED,
                payload,
                Priority::Normal,
            ))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::backend::MemoryBackend;

    async fn coordinator() -> PhaseCoordinator {
        let state_manager = Arc::new(StateManager::new(Arc::new(MemoryBackend::new())).await.unwrap());
        let event_bus = Arc::new(EventBus::new(100, 1000));
        PhaseCoordinator::new(state_manager, event_bus, 4)
    }

    #[tokio::test]
    async fn phase_progression_and_checkpoint_restore() {
        let coord = coordinator().await;
        let parent = coord
            .create_phase(PhaseType::One, HashMap::new(), None)
            .await
            .unwrap();
        let child_a = coord
            .create_phase(PhaseType::One, HashMap::new(), Some(parent.clone()))
            .await
            .unwrap();
        let child_b = coord
            .create_phase(PhaseType::One, HashMap::new(), Some(parent.clone()))
            .await
            .unwrap();

        coord.mark_ready(&parent).await.unwrap();
        coord.start(&parent).await.unwrap();

        coord.mark_ready(&child_a).await.unwrap();
        coord.start(&child_a).await.unwrap();
        coord.complete(&child_a, HashMap::new()).await.unwrap();

        let checkpoint_id = coord.checkpoint(&parent).await.unwrap();

        coord.mark_ready(&child_b).await.unwrap();
        coord.start(&child_b).await.unwrap();
        coord.fail(&child_b, "boom").await.unwrap();

        coord.rollback(&checkpoint_id).await.unwrap();

        let parent_ctx = coord.get_context(&parent).await.unwrap();
        assert_eq!(parent_ctx.state, PhaseState::Running);
        assert_eq!(parent_ctx.checkpoint_ids.len(), 1);

        let child_a_ctx = coord.get_context(&child_a).await.unwrap();
        assert_eq!(child_a_ctx.state, PhaseState::Completed);

        let child_b_ctx = coord.get_context(&child_b).await.unwrap();
        assert_eq!(child_b_ctx.state, PhaseState::Ready);
    }

    #[tokio::test]
    async fn complete_rejected_while_child_nonterminal() {
        let coord = coordinator().await;
        let parent = coord
            .create_phase(PhaseType::One, HashMap::new(), None)
            .await
            .unwrap();
        let _child = coord
            .create_phase(PhaseType::One, HashMap::new(), Some(parent.clone()))
            .await
            .unwrap();

        coord.mark_ready(&parent).await.unwrap();
        coord.start(&parent).await.unwrap();

        let result = coord.complete(&parent, HashMap::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn invalid_transition_rejected() {
        let coord = coordinator().await;
        let phase = coord
            .create_phase(PhaseType::Zero, HashMap::new(), None)
            .await
            .unwrap();
        let result = coord.complete(&phase, HashMap::new()).await;
        assert!(matches!(result, Err(OrchestratorError::InvalidTransition(_))));
    }
}
