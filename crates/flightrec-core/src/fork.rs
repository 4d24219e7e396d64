// flightrec-core/src/fork.rs
// ============================================================================
// Module: Fork Engine
// Description: Plans a child trace that copies a prefix of a parent's steps.
// Purpose: Validate fork preconditions and compute the new trace/step/
//          snapshot rows a repository must insert inside one transaction.
// Dependencies: std::collections::BTreeMap, serde_json, crate::{error, ids,
//               resolver, snapshot, step, trace}
// ============================================================================

//! ## Overview
//! `plan_fork` is pure: it validates preconditions and mints fresh
//! identifiers but performs no I/O. The repository drives the plan inside a
//! single `do_tx`, feeding it the parent's per-step snapshots looked up
//! ahead of time (snapshots live outside [`crate::resolver::ResolvedTrace`]).

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use serde_json::json;

use crate::error::CoreError;
use crate::ids::{SnapshotId, StepId, TraceId};
use crate::resolver::ResolvedTrace;
use crate::snapshot::Snapshot;
use crate::step::Step;
use crate::trace::{Trace, TraceStatus, Trigger};

/// The new rows a fork must insert, computed ahead of the transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct ForkPlan {
    /// The new child trace row.
    pub new_trace: Trace,
    /// Copied steps, in ascending `step_number` order, with fresh ids.
    pub new_steps: Vec<Step>,
    /// Copied snapshots, keyed by the copied step's fresh id.
    pub new_snapshots: Vec<Snapshot>,
}

/// The caller-facing summary of a completed fork.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForkResult {
    /// Identifier of the trace that was forked.
    pub original_trace_id: TraceId,
    /// Identifier of the newly created child trace.
    pub forked_trace_id: TraceId,
    /// Step number the fork was taken from.
    pub forked_from_step: u32,
    /// Number of steps copied into the child trace.
    pub steps_copied: u32,
}

/// Plans a fork of `parent` at `from_step`.
///
/// # Errors
///
/// Returns [`CoreError::InvalidInput`] when `from_step` is zero, or
/// [`CoreError::InvalidState`] when `parent` has no steps or `from_step`
/// exceeds its highest step number.
pub fn plan_fork(
    parent: &ResolvedTrace,
    from_step: u32,
    modified_input: Option<Value>,
    modified_env: Option<Value>,
    parent_snapshots: &BTreeMap<u32, Snapshot>,
) -> Result<ForkPlan, CoreError> {
    if from_step == 0 {
        return Err(CoreError::InvalidInput("from_step must be a positive integer".to_string()));
    }
    let max_step = parent.max_step_number().ok_or_else(|| {
        CoreError::InvalidState("cannot fork a trace with zero steps".to_string())
    })?;
    if from_step > max_step {
        return Err(CoreError::InvalidState(format!(
            "from_step {from_step} exceeds parent's highest step number {max_step}"
        )));
    }

    let new_trace_id = TraceId::mint();
    let now = crate::clock::now_iso8601();

    let new_trace = Trace {
        id: new_trace_id.clone(),
        agent_name: parent.trace.agent_name.clone(),
        agent_version: parent.trace.agent_version.clone(),
        trigger: Trigger::Manual,
        status: TraceStatus::Running,
        input: modified_input.unwrap_or_else(|| parent.trace.input.clone()),
        output: None,
        started_at: now.clone(),
        ended_at: None,
        totals: None,
        error: None,
        tags: parent.trace.tags.clone(),
        metadata: json!({
            "forked_from": parent.trace.id.as_str(),
            "forked_at_step": from_step,
        }),
        parent_trace_id: Some(parent.trace.id.clone()),
        forked_from_step: Some(from_step),
        created_at: now,
    };

    let mut new_steps = Vec::new();
    let mut new_snapshots = Vec::new();

    for parent_step in parent.steps.iter().filter(|step| step.step_number <= from_step) {
        let new_step_id = StepId::mint();
        new_steps.push(Step {
            id: new_step_id.clone(),
            trace_id: new_trace_id.clone(),
            ..parent_step.clone()
        });

        if let Some(parent_snapshot) = parent_snapshots.get(&parent_step.step_number) {
            let environment = if parent_step.step_number == from_step {
                modified_env.clone().unwrap_or_else(|| parent_snapshot.environment.clone())
            } else {
                parent_snapshot.environment.clone()
            };
            new_snapshots.push(Snapshot {
                id: SnapshotId::mint(),
                step_id: new_step_id,
                context_window: parent_snapshot.context_window.clone(),
                environment,
                tool_state: parent_snapshot.tool_state.clone(),
                token_count: parent_snapshot.token_count,
            });
        }
    }

    Ok(ForkPlan { new_trace, new_steps, new_snapshots })
}

#[cfg(test)]
mod tests {
    use super::plan_fork;
    use crate::evaluation::Verdict;
    use crate::ids::{StepId, TraceId};
    use crate::resolver::ResolvedTrace;
    use crate::step::{Step, StepType};
    use crate::trace::{Trace, TraceStatus, Trigger};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn three_step_parent() -> ResolvedTrace {
        let trace_id = TraceId::mint();
        let trace = Trace {
            id: trace_id.clone(),
            agent_name: "a".to_string(),
            agent_version: None,
            trigger: Trigger::Manual,
            status: TraceStatus::Completed,
            input: json!({"q": "hi"}),
            output: Some(json!({"a": "bye"})),
            started_at: "2026-01-01T00:00:00Z".to_string(),
            ended_at: Some("2026-01-01T00:01:00Z".to_string()),
            totals: None,
            error: None,
            tags: vec!["t1".to_string()],
            metadata: json!({}),
            parent_trace_id: None,
            forked_from_step: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
        };
        let steps = (1..=3)
            .map(|n| Step {
                id: StepId::mint(),
                trace_id: trace_id.clone(),
                step_number: n,
                step_type: StepType::Thought,
                name: format!("step-{n}"),
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
    fn copies_only_the_prefix_up_to_from_step() {
        let parent = three_step_parent();
        let plan = plan_fork(&parent, 2, None, None, &BTreeMap::new()).expect("plan succeeds");
        assert_eq!(plan.new_steps.len(), 2);
        assert_eq!(plan.new_trace.forked_from_step, Some(2));
        assert_eq!(plan.new_trace.status, TraceStatus::Running);
        assert_eq!(plan.new_trace.parent_trace_id, Some(parent.trace.id.clone()));
    }

    #[test]
    fn rejects_from_step_past_the_end() {
        let parent = three_step_parent();
        let result = plan_fork(&parent, 4, None, None, &BTreeMap::new());
        assert!(result.is_err());
    }

    #[test]
    fn rejects_empty_parent() {
        let mut parent = three_step_parent();
        parent.steps.clear();
        let result = plan_fork(&parent, 1, None, None, &BTreeMap::new());
        assert!(result.is_err());
    }
}
