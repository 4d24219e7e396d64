// flightrec-core/src/evaluation.rs
// ============================================================================
// Module: Evaluation Verdict
// Description: The scored outcome of running a rubric, judge, or policy
//              check against a trace.
// Purpose: Define the Verdict entity shared by every evaluator family.
// Dependencies: serde, serde_json, crate::ids
// ============================================================================

//! ## Overview
//! A trace may accumulate any number of verdicts; there is no uniqueness
//! constraint on `evaluator_name`. Every evaluator family (rubric, judge,
//! policy check) writes through the same shape.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::ids::EvalId;
use crate::ids::TraceId;

/// Which family of evaluator produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluatorType {
    /// A deterministic, pattern- or preset-based rubric.
    Rubric,
    /// An external language-model judge.
    LlmJudge,
    /// A guardrail policy check.
    PolicyCheck,
}

/// The scored outcome of an evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// Opaque verdict identifier.
    pub id: EvalId,
    /// Owning trace identifier.
    pub trace_id: TraceId,
    /// Which family of evaluator produced this verdict.
    pub evaluator_type: EvaluatorType,
    /// Name of the specific evaluator (preset name, custom rubric name, or
    /// policy name).
    pub evaluator_name: String,
    /// Numeric score in `[0, 1]`.
    pub score: f64,
    /// Whether the verdict counts as a pass.
    pub passed: bool,
    /// Evaluator-specific supporting details.
    pub details: Value,
    /// Timestamp the evaluation ran, as an ISO-8601 string.
    pub evaluated_at: String,
}

/// Caller-supplied input for `create_eval`.
#[derive(Debug, Clone)]
pub struct EvalInput {
    /// Which family of evaluator produced this verdict.
    pub evaluator_type: EvaluatorType,
    /// Name of the specific evaluator.
    pub evaluator_name: String,
    /// Numeric score; clamped to `[0, 1]` before storage.
    pub score: f64,
    /// Whether the verdict counts as a pass.
    pub passed: bool,
    /// Evaluator-specific supporting details.
    pub details: Value,
}

/// Clamps a raw score into the `[0, 1]` range expected of every verdict.
#[must_use]
pub fn clamp_score(score: f64) -> f64 {
    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::clamp_score;

    #[test]
    fn clamp_score_bounds_to_unit_interval() {
        assert!((clamp_score(-0.5) - 0.0).abs() < f64::EPSILON);
        assert!((clamp_score(1.5) - 1.0).abs() < f64::EPSILON);
        assert!((clamp_score(0.42) - 0.42).abs() < f64::EPSILON);
    }
}
