// flightrec-core/src/guardrail.rs
// ============================================================================
// Module: Guardrail Matcher
// Description: Evaluates enabled guardrail policies against each step of a
//              resolved trace.
// Purpose: Implement the conjunctive match-pattern semantics shared by every
//          policy.
// Dependencies: regex, serde, serde_json, crate::{error, policy, resolver,
//               step}
// ============================================================================

//! ## Overview
//! A pattern with zero populated keys matches nothing, by design — an empty
//! pattern is not an accidental wildcard. An invalid `name_regex` is treated
//! as non-matching rather than propagated as an error, the same fail-closed
//! posture applied throughout this crate's other pattern-matching paths.

use regex::RegexBuilder;
use serde::Serialize;
use serde_json::Value;

use crate::error::CoreError;
use crate::policy::GuardAction;
use crate::policy::GuardrailPolicy;
use crate::policy::MatchPattern;
use crate::resolver::ResolvedTrace;
use crate::step::Step;

/// One policy match recorded against a single step.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyMatch {
    /// Name of the policy that matched.
    pub policy: String,
    /// Action the policy recommends.
    pub action: GuardAction,
    /// Comma-joined description of the keys that matched.
    pub reason: String,
}

/// The guardrail outcome for a single step.
#[derive(Debug, Clone, Serialize)]
pub struct StepMatches {
    /// Step number the matches apply to.
    pub step_number: u32,
    /// Every policy match against this step, in policy priority order.
    pub matches: Vec<PolicyMatch>,
}

/// Evaluates every enabled policy (highest `priority` first) against every
/// step of `trace`.
///
/// # Errors
///
/// Returns [`CoreError::NotFound`] when the trace has no steps.
pub fn test_policies(
    trace: &ResolvedTrace,
    policies: &[GuardrailPolicy],
) -> Result<Vec<StepMatches>, CoreError> {
    if trace.steps.is_empty() {
        return Err(CoreError::NotFound("trace has no steps to match against".to_string()));
    }

    let mut enabled: Vec<&GuardrailPolicy> = policies.iter().filter(|p| p.enabled).collect();
    enabled.sort_by(|a, b| b.priority.cmp(&a.priority));

    Ok(trace
        .steps
        .iter()
        .map(|step| StepMatches {
            step_number: step.step_number,
            matches: enabled
                .iter()
                .filter_map(|policy| {
                    match_step(step, &policy.match_pattern).map(|reason| PolicyMatch {
                        policy: policy.name.clone(),
                        action: policy.action,
                        reason,
                    })
                })
                .collect(),
        })
        .collect())
}

/// Tests one step against one pattern, returning the match reason if every
/// populated key matches.
fn match_step(step: &Step, pattern: &MatchPattern) -> Option<String> {
    let mut reasons = Vec::new();
    let mut populated = false;

    if let Some(expected) = pattern.step_type {
        populated = true;
        if step.step_type != expected {
            return None;
        }
        reasons.push("step_type".to_string());
    }

    if let Some(needle) = &pattern.name_contains {
        populated = true;
        if !contains_ci(&step.name, needle) {
            return None;
        }
        reasons.push("name_contains".to_string());
    }

    if let Some(pattern_str) = &pattern.name_regex {
        populated = true;
        match RegexBuilder::new(pattern_str).case_insensitive(true).build() {
            Ok(regex) if regex.is_match(&step.name) => reasons.push("name_regex".to_string()),
            _ => return None,
        }
    }

    if let Some(needle) = &pattern.input_contains {
        populated = true;
        if !contains_ci(&json_text(&step.input), needle) {
            return None;
        }
        reasons.push("input_contains".to_string());
    }

    if let Some(needle) = &pattern.output_contains {
        populated = true;
        let output_text = step.output.as_ref().map_or_else(String::new, json_text);
        if !contains_ci(&output_text, needle) {
            return None;
        }
        reasons.push("output_contains".to_string());
    }

    if !populated {
        return None;
    }

    Some(reasons.join(", "))
}

/// Serialises a JSON value to text for substring matching.
fn json_text(value: &Value) -> String {
    value.to_string()
}

/// Case-insensitive substring test.
fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::test_policies;
    use crate::evaluation::Verdict;
    use crate::ids::{PolicyId, StepId, TraceId};
    use crate::policy::{GuardAction, GuardrailPolicy, MatchPattern};
    use crate::resolver::ResolvedTrace;
    use crate::step::{Step, StepType};
    use crate::trace::{Trace, TraceStatus, Trigger};
    use serde_json::json;

    fn trace_with_step(name: &str, step_type: StepType) -> ResolvedTrace {
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
        let step = Step {
            id: StepId::mint(),
            trace_id,
            step_number: 1,
            step_type,
            name: name.to_string(),
            input: json!({}),
            output: None,
            started_at: "2026-01-01T00:00:00Z".to_string(),
            ended_at: None,
            duration_ms: None,
            tokens_used: None,
            model: None,
            error: None,
            metadata: json!({}),
        };
        ResolvedTrace { trace, steps: vec![step], verdicts: Vec::<Verdict>::new() }
    }

    fn policy(name: &str, pattern: MatchPattern) -> GuardrailPolicy {
        GuardrailPolicy {
            id: PolicyId::mint(),
            name: name.to_string(),
            description: None,
            action: GuardAction::Deny,
            priority: 0,
            enabled: true,
            match_pattern: pattern,
            action_params: None,
            tags: Vec::new(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn empty_pattern_matches_nothing() {
        let trace = trace_with_step("delete_users", StepType::ToolCall);
        let policies = vec![policy("catch-all", MatchPattern::default())];
        let result = test_policies(&trace, &policies).expect("trace has steps");
        assert!(result[0].matches.is_empty());
    }

    #[test]
    fn name_contains_matches_case_insensitively() {
        let trace = trace_with_step("Delete_Users", StepType::ToolCall);
        let mut pattern = MatchPattern::default();
        pattern.name_contains = Some("delete".to_string());
        let policies = vec![policy("no-delete", pattern)];
        let result = test_policies(&trace, &policies).expect("trace has steps");
        assert_eq!(result[0].matches.len(), 1);
        assert_eq!(result[0].matches[0].reason, "name_contains");
    }

    #[test]
    fn invalid_regex_does_not_match_or_panic() {
        let trace = trace_with_step("delete_users", StepType::ToolCall);
        let mut pattern = MatchPattern::default();
        pattern.name_regex = Some("(".to_string());
        let policies = vec![policy("broken", pattern)];
        let result = test_policies(&trace, &policies).expect("trace has steps");
        assert!(result[0].matches.is_empty());
    }

    #[test]
    fn empty_trace_fails_with_not_found() {
        let mut trace = trace_with_step("x", StepType::Thought);
        trace.steps.clear();
        let result = test_policies(&trace, &[]);
        assert!(result.is_err());
    }
}
