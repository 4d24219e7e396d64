// flightrec-core/src/diff.rs
// ============================================================================
// Module: Diff Engine
// Description: Step-wise comparator between two resolved traces.
// Purpose: Produce an ordered list of field-level differences and the first
//          divergence step number.
// Dependencies: serde, serde_json, crate::resolver, crate::step
// ============================================================================

//! ## Overview
//! Comparison aligns both step lists by `step_number` in parallel positions;
//! it does not re-sort or deduplicate. `input`/`output` equality is by
//! byte-equal persisted JSON text (`serde_json::Value`'s `PartialEq`, which
//! is structural but order-sensitive for object key order only at the
//! `Value::Object` level — see the design note in the crate root docs).

use serde::Serialize;
use serde_json::Value;

use crate::resolver::ResolvedTrace;
use crate::step::Step;

/// A single field-level mismatch between two traces at a given step number.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepDiff {
    /// Step number at which the mismatch was observed.
    pub step_number: u32,
    /// Name of the field that differs, or `"missing_left"`/`"missing_right"`.
    pub field: &'static str,
    /// Value on the left side, or `None` when the step is absent on the left.
    pub left_value: Option<Value>,
    /// Value on the right side, or `None` when the step is absent on the right.
    pub right_value: Option<Value>,
}

/// The outcome of comparing two resolved traces.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diff {
    /// Number of steps in the left trace.
    pub left_step_count: usize,
    /// Number of steps in the right trace.
    pub right_step_count: usize,
    /// Step number of the first emitted diff, if any.
    pub divergence_step: Option<u32>,
    /// Every emitted diff, in iteration order.
    pub diffs: Vec<StepDiff>,
}

/// Compares two resolved traces step-by-step and returns their diff.
///
/// Steps are aligned in parallel positions by ascending `step_number`,
/// covering `1 ..= max(left.max_step_number(), right.max_step_number())`.
#[must_use]
pub fn diff_traces(left: &ResolvedTrace, right: &ResolvedTrace) -> Diff {
    let max_step = left
        .max_step_number()
        .into_iter()
        .chain(right.max_step_number())
        .max()
        .unwrap_or(0);

    let mut diffs = Vec::new();
    for step_number in 1..=max_step {
        let left_step = left.step(step_number);
        let right_step = right.step(step_number);
        match (left_step, right_step) {
            (Some(l), Some(r)) => diffs.extend(compare_steps(l, r)),
            (Some(l), None) => diffs.push(StepDiff {
                step_number,
                field: "missing_right",
                left_value: Some(Value::String(l.name.clone())),
                right_value: None,
            }),
            (None, Some(r)) => diffs.push(StepDiff {
                step_number,
                field: "missing_left",
                left_value: None,
                right_value: Some(Value::String(r.name.clone())),
            }),
            (None, None) => {}
        }
    }

    let divergence_step = diffs.first().map(|d| d.step_number);

    Diff {
        left_step_count: left.steps.len(),
        right_step_count: right.steps.len(),
        divergence_step,
        diffs,
    }
}

/// Compares the four ordered fields of two steps sharing a step number.
fn compare_steps(left: &Step, right: &Step) -> Vec<StepDiff> {
    let mut diffs = Vec::new();
    let step_number = left.step_number;

    if left.step_type != right.step_type {
        diffs.push(StepDiff {
            step_number,
            field: "step_type",
            left_value: Some(Value::String(format!("{:?}", left.step_type))),
            right_value: Some(Value::String(format!("{:?}", right.step_type))),
        });
    }
    if left.name != right.name {
        diffs.push(StepDiff {
            step_number,
            field: "name",
            left_value: Some(Value::String(left.name.clone())),
            right_value: Some(Value::String(right.name.clone())),
        });
    }
    if left.input != right.input {
        diffs.push(StepDiff {
            step_number,
            field: "input",
            left_value: Some(left.input.clone()),
            right_value: Some(right.input.clone()),
        });
    }
    if left.output != right.output {
        diffs.push(StepDiff {
            step_number,
            field: "output",
            left_value: left.output.clone(),
            right_value: right.output.clone(),
        });
    }

    diffs
}

#[cfg(test)]
mod tests {
    use super::diff_traces;
    use crate::evaluation::Verdict;
    use crate::ids::{StepId, TraceId};
    use crate::resolver::ResolvedTrace;
    use crate::step::{Step, StepType};
    use crate::trace::{Trace, TraceStatus, Trigger};
    use serde_json::json;

    fn sample_trace(step_types: &[StepType]) -> ResolvedTrace {
        let trace_id = TraceId::mint();
        let trace = Trace {
            id: trace_id.clone(),
            agent_name: "a".to_string(),
            agent_version: None,
            trigger: Trigger::Manual,
            status: TraceStatus::Running,
            input: json!({}),
            output: None,
            started_at: "2026-01-01T00:00:00Z".to_string(),
            ended_at: None,
            totals: None,
            error: None,
            tags: Vec::new(),
            metadata: json!({}),
            parent_trace_id: None,
            forked_from_step: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
        };
        let steps = step_types
            .iter()
            .enumerate()
            .map(|(idx, step_type)| Step {
                id: StepId::mint(),
                trace_id: trace_id.clone(),
                step_number: u32::try_from(idx + 1).expect("step index fits in u32"),
                step_type: *step_type,
                name: format!("step-{idx}"),
                input: json!({}),
                output: None,
                started_at: "2026-01-01T00:00:00Z".to_string(),
                ended_at: None,
                duration_ms: None,
                tokens_used: None,
                model: None,
                error: None,
                metadata: json!({}),
            })
            .collect();
        ResolvedTrace { trace, steps, verdicts: Vec::<Verdict>::new() }
    }

    #[test]
    fn identical_traces_do_not_diverge() {
        let left = sample_trace(&[StepType::Thought, StepType::ToolCall, StepType::Output]);
        let right = sample_trace(&[StepType::Thought, StepType::ToolCall, StepType::Output]);
        let diff = diff_traces(&left, &right);
        assert_eq!(diff.divergence_step, None);
        assert!(diff.diffs.is_empty());
    }

    #[test]
    fn step_type_mismatch_is_the_divergence_point() {
        let left = sample_trace(&[StepType::Thought, StepType::ToolCall, StepType::Output]);
        let right = sample_trace(&[StepType::Thought, StepType::LlmCall, StepType::Output]);
        let diff = diff_traces(&left, &right);
        assert_eq!(diff.divergence_step, Some(2));
        assert!(diff.diffs.iter().any(|d| d.field == "step_type"));
    }

    #[test]
    fn extra_right_step_emits_missing_left() {
        let left = sample_trace(&[StepType::Thought]);
        let right = sample_trace(&[StepType::Thought, StepType::Output]);
        let diff = diff_traces(&left, &right);
        assert_eq!(diff.divergence_step, Some(2));
        assert_eq!(diff.diffs[0].field, "missing_left");
    }
}
