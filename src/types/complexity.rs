//! Complexity Engine ("Fire", C7) wire types.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplexityLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComplexityCause {
    MultipleResponsibilities,
    HighDependencyCount,
    CrossCuttingConcerns,
    BroadScope,
    UnclearBoundaries,
    NestedComplexity,
    IntegrationComplexity,
    ConflictingRequirements,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecompositionStrategy {
    ResponsibilityExtraction,
    DependencyReduction,
    ConcernIsolation,
    ScopeNarrowing,
    LayerSeparation,
    FunctionalSeparation,
}

impl DecompositionStrategy {
    /// Priority order used when no strategy is explicitly requested.
    pub const PRIORITY: [DecompositionStrategy; 6] = [
        DecompositionStrategy::ResponsibilityExtraction,
        DecompositionStrategy::DependencyReduction,
        DecompositionStrategy::ConcernIsolation,
        DecompositionStrategy::ScopeNarrowing,
        DecompositionStrategy::LayerSeparation,
        DecompositionStrategy::FunctionalSeparation,
    ];
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplexityAnalysis {
    pub score: f64,
    pub level: ComplexityLevel,
    pub exceeds_threshold: bool,
    pub causes: HashSet<ComplexityCause>,
    pub context_tag: String,
    pub recommended_strategy: Option<DecompositionStrategy>,
    pub opportunities: Vec<String>,
    pub confidence: f64,
    pub urgency: String,
    pub risk: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecompositionResult {
    pub success: bool,
    pub original_score: f64,
    pub new_score: Option<f64>,
    pub reduction: Option<f64>,
    pub strategy_used: Option<DecompositionStrategy>,
    pub decomposed_elements: Vec<serde_json::Value>,
    pub simplified_artifact: Option<serde_json::Value>,
    pub lessons: Vec<String>,
    pub warnings: Vec<String>,
    pub follow_ups: Vec<String>,
    pub success_metrics: std::collections::HashMap<String, f64>,
}
