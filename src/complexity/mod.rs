//! Complexity Engine ("Fire", C7): scores structural complexity of an
//! artifact and, when a threshold is crossed, decomposes it using a named
//! strategy.

pub mod strategy;

use crate::config::ComplexityConfig;
use crate::types::complexity::{
    ComplexityAnalysis, ComplexityCause, ComplexityLevel, DecompositionResult, DecompositionStrategy,
};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

/// Keyword patterns for concerns that tend to cut across a single artifact's
/// stated responsibilities (logging, persistence, auth, validation,
/// networking). A responsibility list touching two or more of these
/// concerns is a sign of cross-cutting complexity even when `fan_out`
/// itself is still small.
fn concern_patterns() -> &'static [(&'static str, Regex)] {
    static PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            ("logging", Regex::new(r"(?i)\b(log|logging|audit)\b").unwrap()),
            ("persistence", Regex::new(r"(?i)\b(persist|storage|database|cache)\b").unwrap()),
            ("auth", Regex::new(r"(?i)\b(auth|permission|credential)\b").unwrap()),
            ("validation", Regex::new(r"(?i)\b(validat\w*|sanitiz\w*)\b").unwrap()),
            ("networking", Regex::new(r"(?i)\b(network|http|socket|protocol)\b").unwrap()),
        ]
    })
}

/// Counts how many distinct concern categories appear across a
/// responsibility list's free-text descriptions.
fn distinct_concerns_touched(responsibility_items: &[String]) -> usize {
    concern_patterns()
        .iter()
        .filter(|(_, pattern)| responsibility_items.iter().any(|item| pattern.is_match(item)))
        .count()
}

/// `[structure, dependencies, scope, responsibilities, integration]` weights
/// per context tag. An explicit, reviewable table rather than something
/// loaded from config, per the component's "explicit table" requirement.
fn weight_table() -> &'static HashMap<&'static str, [f64; 5]> {
    static TABLE: OnceLock<HashMap<&'static str, [f64; 5]>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = HashMap::new();
        table.insert("guideline", [0.25, 0.20, 0.20, 0.20, 0.15]);
        table.insert("feature", [0.20, 0.25, 0.15, 0.25, 0.15]);
        table.insert("component", [0.20, 0.25, 0.15, 0.20, 0.20]);
        table
    })
}

fn weights_for(context_tag: &str) -> [f64; 5] {
    *weight_table().get(context_tag).unwrap_or(&[0.2, 0.2, 0.2, 0.2, 0.2])
}

/// Structural shape the engine reads off an artifact — key counts, nesting
/// depth, enumerated lists — never its content, keeping the engine
/// domain-agnostic.
pub struct ArtifactShape {
    pub key_count: usize,
    pub nesting_depth: usize,
    pub dependency_count: usize,
    pub fan_out: usize,
    pub scope_items: usize,
    pub responsibility_items: Vec<String>,
    pub integration_points: usize,
    pub has_conflicting_requirements: bool,
}

impl ArtifactShape {
    pub fn empty() -> Self {
        Self {
            key_count: 0,
            nesting_depth: 0,
            dependency_count: 0,
            fan_out: 0,
            scope_items: 0,
            responsibility_items: Vec::new(),
            integration_points: 0,
            has_conflicting_requirements: false,
        }
    }
}

fn sub_score(value: f64, scale: f64) -> f64 {
    (value / scale * 100.0).min(100.0)
}

pub struct ComplexityEngine {
    config: ComplexityConfig,
}

impl ComplexityEngine {
    pub fn new(config: ComplexityConfig) -> Self {
        Self { config }
    }

    pub fn analyze(&self, artifact: &ArtifactShape, context_tag: &str) -> ComplexityAnalysis {
        let weights = weights_for(context_tag);

        let structure = sub_score((artifact.key_count + artifact.nesting_depth * 5) as f64, 50.0);
        let dependencies = sub_score((artifact.dependency_count + artifact.fan_out) as f64, 20.0);
        let scope = sub_score(artifact.scope_items as f64, 15.0);
        let responsibilities = sub_score(artifact.responsibility_items.len() as f64, 8.0);
        let integration = sub_score(artifact.integration_points as f64, 10.0);

        let score = structure * weights[0]
            + dependencies * weights[1]
            + scope * weights[2]
            + responsibilities * weights[3]
            + integration * weights[4];

        let level = if score >= self.config.critical_threshold {
            ComplexityLevel::Critical
        } else if score >= self.config.high_threshold {
            ComplexityLevel::High
        } else if score >= self.config.medium_threshold {
            ComplexityLevel::Medium
        } else {
            ComplexityLevel::Low
        };

        let exceeds_threshold = matches!(level, ComplexityLevel::High | ComplexityLevel::Critical)
            || (context_tag == "feature" && level == ComplexityLevel::Medium);

        let causes = self.identify_causes(artifact, responsibilities, dependencies, integration);
        let recommended_strategy = if exceeds_threshold {
            Some(self.select_strategy(&causes))
        } else {
            None
        };

        let opportunities = causes
            .iter()
            .map(|c| format!("address {:?}", c))
            .collect();

        ComplexityAnalysis {
            score,
            level,
            exceeds_threshold,
            causes,
            context_tag: context_tag.to_string(),
            recommended_strategy,
            opportunities,
            confidence: if artifact.key_count == 0 { 0.0 } else { 0.8 },
            urgency: level_to_urgency(level),
            risk: level_to_risk(level),
        }
    }

    fn identify_causes(
        &self,
        artifact: &ArtifactShape,
        responsibilities: f64,
        dependencies: f64,
        integration: f64,
    ) -> HashSet<ComplexityCause> {
        let mut causes = HashSet::new();
        if artifact.responsibility_items.len() > 3 || responsibilities > 60.0 {
            causes.insert(ComplexityCause::MultipleResponsibilities);
        }
        if artifact.dependency_count > 8 || dependencies > 60.0 {
            causes.insert(ComplexityCause::HighDependencyCount);
        }
        if artifact.integration_points > 4 || integration > 60.0 {
            causes.insert(ComplexityCause::IntegrationComplexity);
        }
        if artifact.nesting_depth > 3 {
            causes.insert(ComplexityCause::NestedComplexity);
        }
        if artifact.scope_items > 10 {
            causes.insert(ComplexityCause::BroadScope);
        }
        if artifact.fan_out > 5 || distinct_concerns_touched(&artifact.responsibility_items) >= 2 {
            causes.insert(ComplexityCause::CrossCuttingConcerns);
        }
        if artifact.has_conflicting_requirements {
            causes.insert(ComplexityCause::ConflictingRequirements);
        }
        if artifact.key_count > 0 && artifact.scope_items == 0 {
            causes.insert(ComplexityCause::UnclearBoundaries);
        }
        causes
    }

    fn select_strategy(&self, causes: &HashSet<ComplexityCause>) -> DecompositionStrategy {
        for strategy in DecompositionStrategy::PRIORITY {
            if strategy_matches(strategy, causes) {
                return strategy;
            }
        }
        DecompositionStrategy::PRIORITY[0]
    }

    pub fn decompose(
        &self,
        artifact: &ArtifactShape,
        context_tag: &str,
        strategy: Option<DecompositionStrategy>,
    ) -> DecompositionResult {
        let original = self.analyze(artifact, context_tag);
        let strategy = strategy.unwrap_or_else(|| self.select_strategy(&original.causes));

        let (transformed, decomposed_elements) = strategy::apply(strategy, artifact);
        let new_analysis = self.analyze(&transformed, context_tag);

        let success = new_analysis.score < original.score;
        let mut warnings = Vec::new();
        if !success {
            warnings.push("decomposition did not reduce complexity".to_string());
        }

        DecompositionResult {
            success,
            original_score: original.score,
            new_score: Some(new_analysis.score),
            reduction: Some(original.score - new_analysis.score),
            strategy_used: Some(strategy),
            decomposed_elements,
            simplified_artifact: None,
            lessons: Vec::new(),
            warnings,
            follow_ups: Vec::new(),
            success_metrics: HashMap::new(),
        }
    }
}

fn strategy_matches(strategy: DecompositionStrategy, causes: &HashSet<ComplexityCause>) -> bool {
    use ComplexityCause::*;
    use DecompositionStrategy::*;
    match strategy {
        ResponsibilityExtraction => causes.contains(&MultipleResponsibilities),
        DependencyReduction => causes.contains(&HighDependencyCount),
        ConcernIsolation => causes.contains(&CrossCuttingConcerns),
        ScopeNarrowing => causes.contains(&BroadScope),
        LayerSeparation => causes.contains(&UnclearBoundaries),
        FunctionalSeparation => causes.contains(&IntegrationComplexity) || causes.contains(&NestedComplexity),
    }
}

fn level_to_urgency(level: ComplexityLevel) -> String {
    match level {
        ComplexityLevel::Low => "none",
        ComplexityLevel::Medium => "low",
        ComplexityLevel::High => "high",
        ComplexityLevel::Critical => "immediate",
    }
    .to_string()
}

fn level_to_risk(level: ComplexityLevel) -> String {
    match level {
        ComplexityLevel::Low => "low",
        ComplexityLevel::Medium => "moderate",
        ComplexityLevel::High => "elevated",
        ComplexityLevel::Critical => "severe",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_artifact_scores_zero() {
        let engine = ComplexityEngine::new(ComplexityConfig::default());
        let analysis = engine.analyze(&ArtifactShape::empty(), "feature");
        assert_eq!(analysis.score, 0.0);
        assert_eq!(analysis.level, ComplexityLevel::Low);
        assert!(!analysis.exceeds_threshold);
    }

    #[test]
    fn highly_complex_component_triggers_threshold() {
        let engine = ComplexityEngine::new(ComplexityConfig::default());
        let artifact = ArtifactShape {
            key_count: 40,
            nesting_depth: 5,
            dependency_count: 12,
            fan_out: 8,
            scope_items: 12,
            responsibility_items: (0..10).map(|i| format!("r{}", i)).collect(),
            integration_points: 6,
            has_conflicting_requirements: false,
        };
        let analysis = engine.analyze(&artifact, "component");
        assert!(analysis.exceeds_threshold);
        assert!(analysis.recommended_strategy.is_some());
    }

    #[test]
    fn mixed_concern_keywords_trigger_cross_cutting_cause_without_high_fan_out() {
        let engine = ComplexityEngine::new(ComplexityConfig::default());
        let artifact = ArtifactShape {
            key_count: 10,
            nesting_depth: 1,
            dependency_count: 2,
            fan_out: 1,
            scope_items: 3,
            responsibility_items: vec![
                "writes audit log entries".to_string(),
                "validates incoming request payloads".to_string(),
            ],
            integration_points: 1,
            has_conflicting_requirements: false,
        };
        let analysis = engine.analyze(&artifact, "component");
        assert!(analysis.causes.contains(&ComplexityCause::CrossCuttingConcerns));
    }

    #[test]
    fn decompose_reduces_score_for_responsibility_heavy_artifact() {
        let engine = ComplexityEngine::new(ComplexityConfig::default());
        let artifact = ArtifactShape {
            key_count: 20,
            nesting_depth: 2,
            dependency_count: 12,
            fan_out: 3,
            scope_items: 5,
            responsibility_items: (0..10).map(|i| format!("r{}", i)).collect(),
            integration_points: 2,
            has_conflicting_requirements: false,
        };
        let result = engine.decompose(&artifact, "component", Some(DecompositionStrategy::ResponsibilityExtraction));
        assert!(result.success);
        assert!(result.new_score.unwrap() < result.original_score);
        assert!(result.decomposed_elements.len() >= 2);
    }
}
