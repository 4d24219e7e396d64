// flightrec-core/src/trace.rs
// ============================================================================
// Module: Trace
// Description: The top-level recorded agent execution and its ingest input.
// Purpose: Define the Trace entity, its enumerations, and the defaulting
//          rules applied on ingest.
// Dependencies: serde, serde_json, crate::ids
// ============================================================================

//! ## Overview
//! A trace is one recorded agent execution: an ordered sequence of steps
//! (held by the repository, not inline here) plus the run-level metadata
//! describing who ran it, how it was triggered, and how it ended.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::ids::TraceId;

/// How a trace's execution was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Manually started by an operator.
    Manual,
    /// Started in response to an inbound user message.
    UserMessage,
    /// Started by a scheduled cron job.
    Cron,
    /// Started by an inbound webhook.
    Webhook,
    /// Started via a direct API call.
    Api,
    /// Started in response to an internal event.
    Event,
}

/// Lifecycle status of a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    /// The trace is still accepting steps.
    Running,
    /// The trace finished without error.
    Completed,
    /// The trace finished with an error.
    Failed,
    /// The trace was abandoned after exceeding its time budget.
    Timeout,
}

impl TraceStatus {
    /// Returns whether the status accepts further `append_step` calls.
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }
}

/// Aggregate totals recorded once a trace reaches a terminal status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceTotals {
    /// Wall-clock duration of the whole trace, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Total tokens consumed across every step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
    /// Total estimated cost in USD across every step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
}

impl TraceTotals {
    /// Returns `true` when every populated field is non-negative and
    /// finite.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let cost_ok = self.cost_usd.is_none_or(f64::is_finite);
        cost_ok && self.cost_usd.is_none_or(|cost| cost >= 0.0)
    }
}

/// One recorded agent execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    /// Opaque trace identifier.
    pub id: TraceId,
    /// Name of the agent that produced this trace.
    pub agent_name: String,
    /// Optional version string for the agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_version: Option<String>,
    /// What triggered this execution.
    pub trigger: Trigger,
    /// Current lifecycle status.
    pub status: TraceStatus,
    /// Input supplied to the agent at the start of the run.
    pub input: Value,
    /// Output produced by the agent, once available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Timestamp the run started, as an ISO-8601 string.
    pub started_at: String,
    /// Timestamp the run ended, as an ISO-8601 string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    /// Aggregate totals, populated once the trace is terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub totals: Option<TraceTotals>,
    /// Error message, if the trace failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: Value,
    /// Parent trace identifier, set only for forked traces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_trace_id: Option<TraceId>,
    /// Step number the fork was taken from, set only for forked traces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forked_from_step: Option<u32>,
    /// Timestamp the row was created, as an ISO-8601 string.
    pub created_at: String,
}

/// Caller-supplied input for [`crate::repository::TraceRepository::ingest_trace`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TraceInput {
    /// Name of the agent that produced this trace.
    pub agent_name: String,
    /// Optional version string for the agent.
    #[serde(default)]
    pub agent_version: Option<String>,
    /// What triggered this execution; defaults to [`Trigger::Manual`].
    #[serde(default)]
    pub trigger: Option<Trigger>,
    /// Explicit status override; defaults per [`crate::trace`] module docs.
    #[serde(default)]
    pub status: Option<TraceStatus>,
    /// Input supplied to the agent; defaults to `{}`.
    #[serde(default)]
    pub input: Option<Value>,
    /// Output produced by the agent, if already known.
    #[serde(default)]
    pub output: Option<Value>,
    /// Timestamp the run started; defaults to "now".
    #[serde(default)]
    pub started_at: Option<String>,
    /// Timestamp the run ended, if already known.
    #[serde(default)]
    pub ended_at: Option<String>,
    /// Aggregate totals, if already known.
    #[serde(default)]
    pub totals: Option<TraceTotals>,
    /// Error message, if already known.
    #[serde(default)]
    pub error: Option<String>,
    /// Free-form tags; defaults to an empty list.
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    /// Free-form metadata; defaults to `{}`.
    #[serde(default)]
    pub metadata: Option<Value>,
    /// Steps to ingest alongside the trace, in order.
    #[serde(default)]
    pub steps: Vec<crate::step::StepInput>,
}

/// Partial update applied to a trace by `update_trace`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TracePatch {
    /// New status, if present.
    #[serde(default)]
    pub status: Option<TraceStatus>,
    /// New output, if present.
    #[serde(default)]
    pub output: Option<Value>,
    /// New end timestamp, if present.
    #[serde(default)]
    pub ended_at: Option<String>,
    /// New totals, if present.
    #[serde(default)]
    pub totals: Option<TraceTotals>,
    /// New error message, if present.
    #[serde(default)]
    pub error: Option<String>,
    /// New tags, if present.
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    /// New metadata, if present.
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Resolves the default status for an ingested trace per spec: `completed`
/// when an end timestamp is supplied and no explicit status was given,
/// `running` otherwise.
#[must_use]
pub fn default_status(explicit: Option<TraceStatus>, ended_at: Option<&str>) -> TraceStatus {
    match explicit {
        Some(status) => status,
        None if ended_at.is_some() => TraceStatus::Completed,
        None => TraceStatus::Running,
    }
}

#[cfg(test)]
mod tests {
    use super::TraceStatus;
    use super::TraceTotals;
    use super::default_status;

    #[test]
    fn totals_with_no_cost_are_valid() {
        assert!(TraceTotals { duration_ms: Some(10), tokens: Some(5), cost_usd: None }.is_valid());
    }

    #[test]
    fn totals_reject_negative_cost() {
        assert!(!TraceTotals { cost_usd: Some(-0.01), ..TraceTotals::default() }.is_valid());
    }

    #[test]
    fn totals_reject_non_finite_cost() {
        assert!(!TraceTotals { cost_usd: Some(f64::NAN), ..TraceTotals::default() }.is_valid());
        assert!(!TraceTotals { cost_usd: Some(f64::INFINITY), ..TraceTotals::default() }.is_valid());
    }

    #[test]
    fn defaults_to_running_without_end_timestamp() {
        assert_eq!(default_status(None, None), TraceStatus::Running);
    }

    #[test]
    fn defaults_to_completed_with_end_timestamp() {
        assert_eq!(default_status(None, Some("2026-01-01T00:00:00Z")), TraceStatus::Completed);
    }

    #[test]
    fn explicit_status_wins() {
        assert_eq!(
            default_status(Some(TraceStatus::Failed), Some("2026-01-01T00:00:00Z")),
            TraceStatus::Failed
        );
    }
}
