//! Core type definitions for the Forge Loom orchestrator.
//!
//! Every entity here is a plain serializable record with no behavior beyond
//! what its owning component needs. Enums serialize as their symbolic
//! (SCREAMING_SNAKE_CASE) names so persisted state and emitted events stay
//! wire-stable across versions.

pub mod event;
pub mod state;
pub mod phase;
pub mod coordination;
pub mod complexity;
pub mod historical;
pub mod circuit;
pub mod metrics;
pub mod agent;

pub use event::{Event, EventType, Priority};
pub use state::{StateEntry, StateSnapshot, ResourceKind};
pub use phase::{PhaseContext, PhaseType, PhaseState, Checkpoint};
pub use coordination::{
    CoordinationContext, CoordinationMode, CoordinationStatus, Misunderstanding,
    CoordinationIteration, Severity,
};
pub use complexity::{
    ComplexityAnalysis, ComplexityLevel, ComplexityCause, DecompositionStrategy,
    DecompositionResult,
};
pub use historical::{
    DecisionEvent, DecisionType, DecisionOutcome, FireIntervention, DecisionPattern,
    HistoricalContext, CrossPhasePattern, PatternConfidence,
};
pub use circuit::{CircuitBreakerState, CircuitState, CircuitConfig, SystemHealth, HealthStatus};
pub use metrics::MetricSample;
pub use agent::{AgentResponse, ConversationTurn, ProcessOutcome};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque identifier. Uniqueness is the only contract; no ordering is implied.
pub type Id = String;

pub type EventId = Id;
pub type PhaseId = Id;
pub type CheckpointId = Id;
pub type CoordinationId = Id;
pub type MisunderstandingId = Id;
pub type DecisionEventId = Id;
pub type InterventionId = Id;
pub type RefinementCycleId = Id;
pub type SubscriptionId = Id;
pub type AgentId = Id;
pub type OperationId = Id;

/// Generates a new opaque identifier. Centralized so every id in the system
/// has the same shape (hyphenated-lowercase v4 uuid) regardless of which
/// component mints it.
pub fn new_id() -> Id {
    uuid::Uuid::new_v4().to_string()
}

/// Content-addressed id for an immutable serialized record (a checkpoint or a
/// state snapshot): a hex-encoded BLAKE3 digest of the record's bytes salted
/// with a fresh uuid, so two checkpoints taken back-to-back with identical
/// content still mint distinct ids. Mirrors the teacher's content-hashing
/// pattern for file contents (`file_system::mod`'s `Blake3Hasher` usage),
/// applied here to checkpoint/snapshot payloads instead of file bytes.
pub fn content_id(bytes: &[u8]) -> Id {
    let mut hasher = blake3::Hasher::new();
    hasher.update(bytes);
    hasher.update(new_id().as_bytes());
    hex::encode(hasher.finalize().as_bytes())
}

/// Generic structured value used for event payloads, metric metadata, and
/// other free-form maps that cross component boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Map(HashMap<String, Value>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(a) => write!(f, "[{} items]", a.len()),
            Value::Map(m) => write!(f, "{{{} keys}}", m.len()),
        }
    }
}

pub type ValueMap = HashMap<String, Value>;

/// Result type used throughout the crate.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Error kinds. Variant names are the symbolic kind vocabulary, not Rust
/// convention, so `ERROR_OCCURRED` events and logs carry the same names as
/// `kind()`.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("circuit open: {0}")]
    CircuitOpen(String),

    #[error("backpressure timeout: {0}")]
    BackpressureTimeout(String),

    #[error("coordination error: {0}")]
    CoordinationError(String),

    #[error("decomposition error: {0}")]
    DecompositionError(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("cancellation requested: {0}")]
    CancellationRequested(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}

impl OrchestratorError {
    /// The symbolic component-agnostic kind name, used as the `error` field
    /// in surfaced `{status: "error", ...}` responses and `ERROR_OCCURRED`
    /// event payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorError::InvalidTransition(_) => "InvalidTransition",
            OrchestratorError::Timeout(_) => "Timeout",
            OrchestratorError::CircuitOpen(_) => "CircuitOpen",
            OrchestratorError::BackpressureTimeout(_) => "BackpressureTimeout",
            OrchestratorError::CoordinationError(_) => "CoordinationError",
            OrchestratorError::DecompositionError(_) => "DecompositionError",
            OrchestratorError::NotFound(_) => "NotFound",
            OrchestratorError::CancellationRequested(_) => "CancellationRequested",
            OrchestratorError::ConfigError(_) => "ConfigError",
            OrchestratorError::SerializationError(_) => "SerializationError",
            OrchestratorError::IoError(_) => "IoError",
        }
    }

    /// Whether `with_backoff`'s retry policy applies: transient errors get 3
    /// attempts with exponential backoff capped at 30s.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Timeout(_)
                | OrchestratorError::CircuitOpen(_)
                | OrchestratorError::BackpressureTimeout(_)
        )
    }
}

/// A structured `{status: "error", ...}` surface for reporting an exhausted
/// retry or an otherwise-unrecoverable operation failure to a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationFailure {
    pub status: String,
    pub error: String,
    pub message: String,
    pub attempts: u32,
    pub execution_time_ms: u64,
}

impl OperationFailure {
    pub fn new(err: &OrchestratorError, attempts: u32, execution_time_ms: u64) -> Self {
        Self {
            status: "error".to_string(),
            error: err.kind().to_string(),
            message: err.to_string(),
            attempts,
            execution_time_ms,
        }
    }
}

/// Retry policy helper: 3 attempts, exponential base 2, capped at 30s. Not
/// invoked automatically — callers of transient-error-prone operations opt in
/// explicitly.
pub async fn with_backoff<F, Fut, T>(mut op: F) -> OrchestratorResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = OrchestratorResult<T>>,
{
    const MAX_ATTEMPTS: u32 = 3;
    const CAP_SECS: u64 = 30;

    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                let backoff_secs = (2u64.pow(attempt - 1)).min(CAP_SECS);
                tracing::warn!(
                    attempt,
                    backoff_secs,
                    error = %e,
                    "transient error, retrying with backoff"
                );
                tokio::time::sleep(std::time::Duration::from_secs(backoff_secs)).await;
            }
            Err(e) => return Err(e),
        }
    }
}
