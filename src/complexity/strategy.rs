//! Per-strategy artifact transformations used by `ComplexityEngine::decompose`.

use super::ArtifactShape;
use crate::types::complexity::DecompositionStrategy;

/// Applies a decomposition strategy to an artifact's structural shape,
/// returning the transformed shape and a human-readable list of the elements
/// the strategy split out. Each strategy trims the dimension it targets;
/// callers re-score the result to confirm the reduction actually happened.
pub fn apply(strategy: DecompositionStrategy, artifact: &ArtifactShape) -> (ArtifactShape, Vec<serde_json::Value>) {
    match strategy {
        DecompositionStrategy::ResponsibilityExtraction => extract_responsibilities(artifact),
        DecompositionStrategy::DependencyReduction => reduce_dependencies(artifact),
        DecompositionStrategy::ConcernIsolation => isolate_concerns(artifact),
        DecompositionStrategy::ScopeNarrowing => narrow_scope(artifact),
        DecompositionStrategy::LayerSeparation => separate_layers(artifact),
        DecompositionStrategy::FunctionalSeparation => separate_functions(artifact),
    }
}

fn json_str(s: impl Into<String>) -> serde_json::Value {
    serde_json::Value::String(s.into())
}

fn extract_responsibilities(artifact: &ArtifactShape) -> (ArtifactShape, Vec<serde_json::Value>) {
    let half = artifact.responsibility_items.len() / 2;
    let extracted: Vec<String> = artifact.responsibility_items[half..].to_vec();
    let mut transformed = clone_shape(artifact);
    transformed.responsibility_items = artifact.responsibility_items[..half].to_vec();
    let elements = extracted
        .into_iter()
        .map(|r| json_str(format!("extracted responsibility: {}", r)))
        .collect();
    (transformed, elements)
}

fn reduce_dependencies(artifact: &ArtifactShape) -> (ArtifactShape, Vec<serde_json::Value>) {
    let mut transformed = clone_shape(artifact);
    let reduced = artifact.dependency_count / 2;
    transformed.dependency_count = artifact.dependency_count - reduced;
    transformed.fan_out = artifact.fan_out.saturating_sub(reduced / 2);
    (
        transformed,
        vec![json_str(format!("reduced {} direct dependencies behind a facade", reduced))],
    )
}

fn isolate_concerns(artifact: &ArtifactShape) -> (ArtifactShape, Vec<serde_json::Value>) {
    let mut transformed = clone_shape(artifact);
    let isolated = artifact.fan_out / 2;
    transformed.fan_out = artifact.fan_out - isolated;
    transformed.integration_points = artifact.integration_points.saturating_sub(isolated / 2);
    (
        transformed,
        vec![json_str(format!("isolated {} cross-cutting concern(s) into a dedicated module", isolated))],
    )
}

fn narrow_scope(artifact: &ArtifactShape) -> (ArtifactShape, Vec<serde_json::Value>) {
    let mut transformed = clone_shape(artifact);
    let dropped = artifact.scope_items / 3;
    transformed.scope_items = artifact.scope_items - dropped;
    (
        transformed,
        vec![json_str(format!("deferred {} out-of-scope item(s) to a follow-up", dropped))],
    )
}

fn separate_layers(artifact: &ArtifactShape) -> (ArtifactShape, Vec<serde_json::Value>) {
    let mut transformed = clone_shape(artifact);
    transformed.nesting_depth = artifact.nesting_depth.saturating_sub(2);
    transformed.key_count = (artifact.key_count as f64 * 0.7) as usize;
    (
        transformed,
        vec![json_str("separated presentation, domain, and storage layers")],
    )
}

fn separate_functions(artifact: &ArtifactShape) -> (ArtifactShape, Vec<serde_json::Value>) {
    let mut transformed = clone_shape(artifact);
    let split = artifact.integration_points / 2;
    transformed.integration_points = artifact.integration_points - split;
    transformed.nesting_depth = artifact.nesting_depth.saturating_sub(1);
    (
        transformed,
        vec![json_str(format!("split {} integration point(s) into independent functional units", split))],
    )
}

fn clone_shape(artifact: &ArtifactShape) -> ArtifactShape {
    ArtifactShape {
        key_count: artifact.key_count,
        nesting_depth: artifact.nesting_depth,
        dependency_count: artifact.dependency_count,
        fan_out: artifact.fan_out,
        scope_items: artifact.scope_items,
        responsibility_items: artifact.responsibility_items.clone(),
        integration_points: artifact.integration_points,
        has_conflicting_requirements: artifact.has_conflicting_requirements,
    }
}
