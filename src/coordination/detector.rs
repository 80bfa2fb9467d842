//! Pluggable misunderstanding detection and resolution assessment. Concrete,
//! semantically-aware implementations are supplied by the caller — they are
//! the LLM-backed agents this crate never owns. The defaults here exist so
//! the engine is testable and runnable standalone.

use crate::types::coordination::{CoordinationContext, Misunderstanding};
use crate::types::MisunderstandingId;
use async_trait::async_trait;
use std::collections::HashMap;

pub struct DetectionResult {
    pub misunderstandings: Vec<Misunderstanding>,
    pub questions_for_first: Vec<String>,
    pub questions_for_second: Vec<String>,
}

pub struct AssessmentResult {
    pub resolved: Vec<MisunderstandingId>,
    pub unresolved: Vec<MisunderstandingId>,
    pub new_questions_first: Vec<String>,
    pub new_questions_second: Vec<String>,
    pub require_further: bool,
}

/// Detectors and assessors must be pure with respect to their inputs: they
/// receive the context by shared reference and must not mutate it.
#[async_trait]
pub trait MisunderstandingDetector: Send + Sync {
    async fn detect(&self, context: &CoordinationContext) -> anyhow::Result<DetectionResult>;
}

#[async_trait]
pub trait ResolutionAssessor: Send + Sync {
    async fn assess(
        &self,
        context: &CoordinationContext,
        first_responses: &HashMap<String, String>,
        second_responses: &HashMap<String, String>,
    ) -> anyhow::Result<AssessmentResult>;
}

/// Finds nothing. Used as the default so a coordination with no injected
/// detector completes immediately with originals unchanged.
pub struct NullDetector;

#[async_trait]
impl MisunderstandingDetector for NullDetector {
    async fn detect(&self, _context: &CoordinationContext) -> anyhow::Result<DetectionResult> {
        Ok(DetectionResult {
            misunderstandings: Vec::new(),
            questions_for_first: Vec::new(),
            questions_for_second: Vec::new(),
        })
    }
}

/// Resolves everything on the first iteration it sees. Used as the default
/// assessor so a coordination with an injected detector but no injected
/// assessor still terminates.
pub struct EchoAssessor;

#[async_trait]
impl ResolutionAssessor for EchoAssessor {
    async fn assess(
        &self,
        context: &CoordinationContext,
        _first_responses: &HashMap<String, String>,
        _second_responses: &HashMap<String, String>,
    ) -> anyhow::Result<AssessmentResult> {
        let resolved: Vec<MisunderstandingId> = context.unresolved.keys().cloned().collect();
        Ok(AssessmentResult {
            resolved,
            unresolved: Vec::new(),
            new_questions_first: Vec::new(),
            new_questions_second: Vec::new(),
            require_further: false,
        })
    }
}

#[cfg(test)]
pub struct OneIssueDetector;

#[cfg(test)]
#[async_trait]
impl MisunderstandingDetector for OneIssueDetector {
    async fn detect(&self, _context: &CoordinationContext) -> anyhow::Result<DetectionResult> {
        use crate::types::coordination::Severity;
        Ok(DetectionResult {
            misunderstandings: vec![Misunderstanding {
                id: "M1".to_string(),
                description: "assumption mismatch".to_string(),
                severity: Severity::Medium,
                affected_elements: vec!["component_x".to_string()],
            }],
            questions_for_first: vec!["what did you mean by X?".to_string()],
            questions_for_second: vec!["what do you assume about X?".to_string()],
        })
    }
}

/// One misunderstanding, but only the second agent has a question this
/// iteration — models the asymmetric-timeout scenario where the first agent
/// has nothing left to answer while the second agent's responses all time
/// out.
#[cfg(test)]
pub struct SecondAgentOnlyDetector;

#[cfg(test)]
#[async_trait]
impl MisunderstandingDetector for SecondAgentOnlyDetector {
    async fn detect(&self, _context: &CoordinationContext) -> anyhow::Result<DetectionResult> {
        use crate::types::coordination::Severity;
        Ok(DetectionResult {
            misunderstandings: vec![Misunderstanding {
                id: "M1".to_string(),
                description: "assumption mismatch".to_string(),
                severity: Severity::Medium,
                affected_elements: vec!["component_x".to_string()],
            }],
            questions_for_first: Vec::new(),
            questions_for_second: vec!["what do you assume about X?".to_string()],
        })
    }
}

#[cfg(test)]
pub struct AlwaysUnresolvedAssessor;

#[cfg(test)]
#[async_trait]
impl ResolutionAssessor for AlwaysUnresolvedAssessor {
    async fn assess(
        &self,
        context: &CoordinationContext,
        _first_responses: &HashMap<String, String>,
        _second_responses: &HashMap<String, String>,
    ) -> anyhow::Result<AssessmentResult> {
        Ok(AssessmentResult {
            resolved: Vec::new(),
            unresolved: context.unresolved.keys().cloned().collect(),
            new_questions_first: vec!["follow up?".to_string()],
            new_questions_second: vec!["follow up?".to_string()],
            require_further: true,
        })
    }
}

/// Unresolved on its first call, resolved on the second — models the
/// iterative-resolution end-to-end scenario.
#[cfg(test)]
pub struct ResolvesOnSecondCallAssessor {
    pub calls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl ResolvesOnSecondCallAssessor {
    pub fn new() -> Self {
        Self {
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl ResolutionAssessor for ResolvesOnSecondCallAssessor {
    async fn assess(
        &self,
        context: &CoordinationContext,
        _first_responses: &HashMap<String, String>,
        _second_responses: &HashMap<String, String>,
    ) -> anyhow::Result<AssessmentResult> {
        let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if call == 0 {
            Ok(AssessmentResult {
                resolved: Vec::new(),
                unresolved: context.unresolved.keys().cloned().collect(),
                new_questions_first: vec!["follow up on X?".to_string()],
                new_questions_second: vec!["follow up on X?".to_string()],
                require_further: true,
            })
        } else {
            Ok(AssessmentResult {
                resolved: context.unresolved.keys().cloned().collect(),
                unresolved: Vec::new(),
                new_questions_first: Vec::new(),
                new_questions_second: Vec::new(),
                require_further: false,
            })
        }
    }
}
