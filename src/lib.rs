//! Forge Loom — a domain-agnostic, multi-phase, multi-agent workflow
//! orchestrator.
//!
//! # Architecture
//!
//! The crate owns exactly the cross-cutting substrate and coordination
//! logic a software-design pipeline needs, and nothing about what the
//! pipeline's agents actually produce:
//!
//! - An event bus (`event_bus`) for ordered, per-subscriber delivery.
//! - A versioned state manager (`state`) with pluggable durable backends.
//! - A metrics recorder (`metrics`) and a circuit-breaker-protected system
//!   monitor (`monitor`).
//! - A phase coordinator (`phase`) driving the phase lifecycle state
//!   machine, checkpoints, and nested-phase queues.
//! - A coordination engine (`coordination`, "Water") that reconciles
//!   sequential agents' outputs through iterative clarification.
//! - A complexity engine (`complexity`, "Fire") that scores and decomposes
//!   overly complex artifacts.
//! - A historical context engine (`historical`, "Air") that mines past
//!   decisions and interventions for patterns.
//! - An agent coordination interface (`agent`) adapting concrete agents to
//!   the coordination engine without either depending on the other's
//!   concrete type.
//!
//! Concrete LLM-backed agents, prompt templates, and domain schemas are
//! narrow external collaborators this crate routes around, never owns.
//!
//! # Core principles
//!
//! - Route, schedule, persist, reconcile — never interpret content.
//! - Values over exceptions for expected outcomes: `DecompositionResult`,
//!   `CoordinationContext::status`, `ComplexityAnalysis::exceeds_threshold`.
//! - No ambient singletons — every component is constructed explicitly and
//!   wired through `Orchestrator::new`.

pub mod agent;
pub mod bridge;
pub mod cli;
pub mod complexity;
pub mod config;
pub mod coordination;
pub mod event_bus;
pub mod historical;
pub mod lifecycle;
pub mod metrics;
pub mod monitor;
pub mod phase;
pub mod state;
pub mod types;

pub use config::OrchestratorConfig;
pub use types::*;

use agent::NoopAgent;
use async_trait::async_trait;
use complexity::ComplexityEngine;
use coordination::detector::{EchoAssessor, NullDetector};
use coordination::CoordinationEngine;
use event_bus::EventBus;
use historical::HistoricalContextEngine;
use lifecycle::{CleanupPolicy, Lifecycle, ResourceLifecycle};
use metrics::MetricsRecorder;
use monitor::SystemMonitor;
use phase::PhaseCoordinator;
use state::backend::build_backend;
use state::StateManager;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use types::circuit::CircuitConfig;
use types::phase::{PhaseState, PhaseType};
use types::{OperationId, OrchestratorError, OrchestratorResult, PhaseId};

/// Initializes `tracing` with a crate-scoped default filter, overridable via
/// `RUST_LOG`.
pub fn init_logging() {
    init_logging_with_level("info");
}

pub fn init_logging_with_level(level: &str) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| format!("forge_loom={},hyper=warn", level));

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| env_filter.into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false),
        )
        .init();
}

/// Composes a long-lived component with the uniform `ResourceLifecycle`
/// contract (C10) without requiring the component itself to know about
/// initialize/terminate/cleanup-policy. `Deref`s to the inner component so
/// call sites read exactly like holding the component directly.
pub struct ManagedResource<T> {
    pub inner: Arc<T>,
    lifecycle: ResourceLifecycle,
}

impl<T> ManagedResource<T> {
    fn new(
        inner: Arc<T>,
        resource_id: impl Into<String>,
        cleanup_policy: CleanupPolicy,
        event_bus: Arc<EventBus>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            inner,
            lifecycle: ResourceLifecycle::new(resource_id, cleanup_policy, event_bus, metrics),
        }
    }
}

impl<T> Deref for ManagedResource<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: Send + Sync> Lifecycle for ManagedResource<T> {
    async fn initialize(&self) -> OrchestratorResult<()> {
        Ok(())
    }

    /// Idempotent: a second call observes the same terminated state and
    /// emits nothing further.
    async fn terminate(&self) -> OrchestratorResult<()> {
        if self.lifecycle.mark_terminated() {
            let mut payload = HashMap::new();
            payload.insert(
                "resource_id".to_string(),
                types::Value::String(self.lifecycle.resource_id().to_string()),
            );
            self.lifecycle
                .emit(
                    types::event::event_type::RESOURCE_STATE_CHANGED,
                    payload,
                    types::Priority::Low,
                )
                .await;
        }
        Ok(())
    }

    fn resource_id(&self) -> &str {
        self.lifecycle.resource_id()
    }

    fn cleanup_policy(&self) -> CleanupPolicy {
        self.lifecycle.cleanup_policy()
    }
}

/// The fixed ONE..FOUR progression `step` advances an operation through.
/// Phase ZERO is the operation's root: it opens on `start` and is the one
/// thing `step` never creates directly, closing only once every phase this
/// constant names has reached a terminal state.
const PHASE_SEQUENCE: [PhaseType; 4] = [PhaseType::One, PhaseType::Two, PhaseType::Three, PhaseType::Four];

struct OperationState {
    root: PhaseId,
    next_index: usize,
    active_child: Option<PhaseId>,
}

/// A point-in-time view of an operation's progress, returned by
/// `Orchestrator::status` and surfaced by the `status` CLI subcommand.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OperationStatus {
    pub operation_id: OperationId,
    pub phase_id: PhaseId,
    pub phase_type: PhaseType,
    pub state: PhaseState,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub done: bool,
}

/// Wires every cross-cutting resource and coordination engine in dependency
/// order: event bus, state manager, metrics, system monitor, lifecycle,
/// complexity/historical engines, coordination engine, phase coordinator,
/// agent coordination interface.
pub struct Orchestrator {
    pub config: OrchestratorConfig,
    pub event_bus: Arc<EventBus>,
    pub state_manager: Arc<StateManager>,
    pub metrics: Arc<MetricsRecorder>,
    pub monitor: ManagedResource<SystemMonitor>,
    pub complexity_engine: ManagedResource<ComplexityEngine>,
    pub historical_engine: ManagedResource<HistoricalContextEngine>,
    pub coordination_engine: ManagedResource<CoordinationEngine>,
    pub phase_coordinator: ManagedResource<PhaseCoordinator>,
    operations: RwLock<HashMap<OperationId, OperationState>>,
    background: RwLock<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    pub async fn new(config: OrchestratorConfig) -> OrchestratorResult<Self> {
        tracing::info!("initializing orchestrator");

        // C1
        let event_bus = Arc::new(EventBus::new(
            config.event_bus.queue_high_water_mark,
            config.event_bus.block_emitter_timeout_ms,
        ));

        // C2
        let backend = build_backend(&config.state.backend, &config.state.state_dir)?;
        let state_manager = Arc::new(StateManager::new(backend).await?);

        // C3
        let metrics = MetricsRecorder::new(config.metrics.ring_capacity);

        // C4
        let monitor_inner = Arc::new(SystemMonitor::new(
            config.monitor.memory_budget_bytes,
            config.monitor.memory_warn_pct,
            config.monitor.memory_critical_pct,
            event_bus.clone(),
        ));
        let circuit_config = CircuitConfig {
            failure_threshold: config.monitor.circuit_failure_threshold,
            recovery_timeout_secs: config.monitor.circuit_recovery_timeout_secs,
            half_open_success_threshold: config.monitor.circuit_half_open_success_threshold,
        };
        for name in ["phase_step", "coordination", "historical_context"] {
            monitor_inner.register(name, circuit_config).await;
        }

        // C10: every long-lived engine below is composed with the uniform
        // init/terminate/cleanup-policy contract via `ManagedResource`.
        let monitor = ManagedResource::new(
            monitor_inner,
            "system_monitor",
            CleanupPolicy::OnShutdown,
            event_bus.clone(),
            metrics.clone(),
        );

        // C7, C8 (no mutual dependency between them)
        let complexity_engine = ManagedResource::new(
            Arc::new(ComplexityEngine::new(config.complexity.clone())),
            "complexity_engine",
            CleanupPolicy::None,
            event_bus.clone(),
            metrics.clone(),
        );
        let historical_engine = ManagedResource::new(
            Arc::new(HistoricalContextEngine::new(state_manager.clone(), config.historical.clone())),
            "historical_engine",
            CleanupPolicy::Ttl,
            event_bus.clone(),
            metrics.clone(),
        );

        // C6 — depends only on the `AgentPort` capability set (agent module),
        // never a concrete agent, per the cyclic-reference redesign flag.
        let coordination_engine = ManagedResource::new(
            Arc::new(CoordinationEngine::new(
                state_manager.clone(),
                Arc::new(NullDetector),
                Arc::new(EchoAssessor),
            )),
            "coordination_engine",
            CleanupPolicy::Ttl,
            event_bus.clone(),
            metrics.clone(),
        );

        // C5
        let phase_coordinator = ManagedResource::new(
            Arc::new(PhaseCoordinator::new(
                state_manager.clone(),
                event_bus.clone(),
                config.phase.max_parallel_phases,
            )),
            "phase_coordinator",
            CleanupPolicy::OnShutdown,
            event_bus.clone(),
            metrics.clone(),
        );

        let orchestrator = Self {
            config,
            event_bus,
            state_manager,
            metrics,
            monitor,
            complexity_engine,
            historical_engine,
            coordination_engine,
            phase_coordinator,
            operations: RwLock::new(HashMap::new()),
            background: RwLock::new(Vec::new()),
        };

        orchestrator.spawn_background_workers();
        Ok(orchestrator)
    }

    /// Per-operation background tasks (coordination-context TTL sweep,
    /// historical-history retention) as cooperating workers with lifetimes
    /// tied to this orchestrator, cancelled on `terminate` — replacing the
    /// source's ambient per-operation background tasks per the redesign
    /// flags.
    fn spawn_background_workers(&self) {
        let coordination = self.coordination_engine.inner.clone();
        let ttl = std::time::Duration::from_secs(self.config.coordination.context_ttl_secs);
        let coordination_sweep = tokio::spawn(async move {
            let mut interval = tokio::time::interval(ttl.max(std::time::Duration::from_secs(1)));
            loop {
                interval.tick().await;
                let removed = coordination.cleanup_old_contexts(ttl).await;
                if removed > 0 {
                    tracing::debug!(removed, "pruned expired coordination contexts");
                }
            }
        });

        let historical = self.historical_engine.inner.clone();
        let retention_days = self.config.historical.retention_days;
        let historical_sweep = tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(86_400));
            loop {
                interval.tick().await;
                let removed = historical.clear_old_history(Some(retention_days)).await;
                if removed > 0 {
                    tracing::debug!(removed, "pruned expired historical records");
                }
            }
        });

        // Held synchronously: `spawn_background_workers` is called from the
        // non-async constructor path only after `self` exists, so a blocking
        // write here never crosses a suspension point under contention.
        if let Ok(mut background) = self.background.try_write() {
            background.push(coordination_sweep);
            background.push(historical_sweep);
        }
    }

    /// Idempotent shutdown: aborts background workers and terminates every
    /// managed resource. A second call observes every resource already
    /// terminated and is a no-op.
    pub async fn terminate(&self) -> OrchestratorResult<()> {
        for handle in self.background.write().await.drain(..) {
            handle.abort();
        }
        self.monitor.terminate().await?;
        self.complexity_engine.terminate().await?;
        self.historical_engine.terminate().await?;
        self.coordination_engine.terminate().await?;
        self.phase_coordinator.terminate().await?;
        Ok(())
    }

    /// `start <prompt>`: opens a root (ZERO) phase for the operation and
    /// admits the first (ONE) phase into its nested queue, starting it.
    /// Returns the root phase id, used as the operation id for `status` and
    /// `step`.
    pub async fn start(&self, prompt: impl Into<String>) -> OrchestratorResult<OperationId> {
        let mut inputs = types::ValueMap::new();
        inputs.insert("prompt".to_string(), types::Value::String(prompt.into()));

        let root = self.phase_coordinator.create_phase(PhaseType::Zero, inputs, None).await?;
        self.phase_coordinator.mark_ready(&root).await?;
        self.phase_coordinator.start(&root).await?;

        let first_child = self
            .phase_coordinator
            .create_phase(PHASE_SEQUENCE[0], types::ValueMap::new(), Some(root.clone()))
            .await?;
        self.phase_coordinator.enqueue_nested(&root, first_child.clone()).await?;
        self.phase_coordinator.start(&first_child).await?;

        self.operations.write().await.insert(
            root.clone(),
            OperationState {
                root: root.clone(),
                next_index: 0,
                active_child: Some(first_child),
            },
        );

        self.metrics.record("orchestrator:operations_started", 1.0, HashMap::new()).await;
        Ok(root)
    }

    /// `status <operation_id>`.
    pub async fn status(&self, operation_id: &OperationId) -> OrchestratorResult<OperationStatus> {
        let operations = self.operations.read().await;
        let op = operations
            .get(operation_id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("operation {}", operation_id)))?;

        let phase_id = op.active_child.clone().unwrap_or_else(|| op.root.clone());
        drop(operations);

        let context = self
            .phase_coordinator
            .get_context(&phase_id)
            .await
            .ok_or_else(|| OrchestratorError::NotFound(format!("phase {}", phase_id)))?;

        Ok(OperationStatus {
            operation_id: operation_id.clone(),
            phase_id: context.phase_id,
            phase_type: context.phase_type,
            state: context.state,
            created_at: context.created_at,
            updated_at: context.updated_at,
            done: context.state == PhaseState::Completed && context.phase_type == PhaseType::Zero,
        })
    }

    /// `step <operation_id>`: completes the active child phase and admits
    /// the next one in the ONE..FOUR sequence, or completes the root once
    /// every sequence phase is terminal. Wrapped in the `phase_step` circuit
    /// breaker since advancing a phase may invoke caller-supplied pipeline
    /// logic in a fuller deployment.
    pub async fn step(&self, operation_id: &OperationId) -> OrchestratorResult<OperationStatus> {
        let (root, active_child, next_index) = {
            let operations = self.operations.read().await;
            let op = operations
                .get(operation_id)
                .ok_or_else(|| OrchestratorError::NotFound(format!("operation {}", operation_id)))?;
            (op.root.clone(), op.active_child.clone(), op.next_index)
        };

        let Some(active) = active_child else {
            return self.status(operation_id).await;
        };

        let phase_coordinator = self.phase_coordinator.inner.clone();
        let active_for_complete = active.clone();
        self.monitor
            .call("phase_step", move || {
                let phase_coordinator = phase_coordinator.clone();
                let active = active_for_complete.clone();
                async move { phase_coordinator.complete(&active, types::ValueMap::new()).await }
            })
            .await?;

        let next_index = next_index + 1;
        let new_active = if next_index < PHASE_SEQUENCE.len() {
            let child = self
                .phase_coordinator
                .create_phase(PHASE_SEQUENCE[next_index], types::ValueMap::new(), Some(root.clone()))
                .await?;
            self.phase_coordinator.enqueue_nested(&root, child.clone()).await?;
            self.phase_coordinator.start(&child).await?;
            Some(child)
        } else {
            self.phase_coordinator.complete(&root, types::ValueMap::new()).await?;
            None
        };

        {
            let mut operations = self.operations.write().await;
            if let Some(op) = operations.get_mut(operation_id) {
                op.next_index = next_index;
                op.active_child = new_active;
            }
        }

        self.status(operation_id).await
    }
}

/// A standalone-runnable agent pair (both `NoopAgent`) so the CLI launcher
/// can exercise the coordination engine without any concrete LLM-backed
/// agent injected. Real deployments construct their own `Arc<dyn
/// agent::AgentPort>` pair and call `coordination_engine.coordinate`
/// directly.
pub fn default_agent_pair() -> (Arc<NoopAgent>, Arc<NoopAgent>) {
    (Arc::new(NoopAgent), Arc::new(NoopAgent))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn orchestrator() -> Orchestrator {
        Orchestrator::new(OrchestratorConfig::default()).await.unwrap()
    }

    #[tokio::test]
    async fn start_status_step_progress_through_phase_sequence() {
        let orch = orchestrator().await;
        let op_id = orch.start("build a thing").await.unwrap();

        let status = orch.status(&op_id).await.unwrap();
        assert_eq!(status.phase_type, PhaseType::One);
        assert!(!status.done);

        let status = orch.step(&op_id).await.unwrap();
        assert_eq!(status.phase_type, PhaseType::Two);

        let status = orch.step(&op_id).await.unwrap();
        assert_eq!(status.phase_type, PhaseType::Three);

        let status = orch.step(&op_id).await.unwrap();
        assert_eq!(status.phase_type, PhaseType::Four);

        let status = orch.step(&op_id).await.unwrap();
        assert!(status.done);
    }

    #[tokio::test]
    async fn status_on_unknown_operation_is_not_found() {
        let orch = orchestrator().await;
        let result = orch.status(&"missing".to_string()).await;
        assert!(matches!(result, Err(OrchestratorError::NotFound(_))));
    }

    #[tokio::test]
    async fn terminate_is_idempotent() {
        let orch = orchestrator().await;
        orch.terminate().await.unwrap();
        orch.terminate().await.unwrap();
    }
}
