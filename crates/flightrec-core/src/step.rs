// flightrec-core/src/step.rs
// ============================================================================
// Module: Step
// Description: One atomic action recorded within a trace.
// Purpose: Define the Step entity, its step-type enumeration, and ingest
//          input defaults.
// Dependencies: serde, serde_json, crate::ids, crate::snapshot
// ============================================================================

//! ## Overview
//! Steps are immutable once inserted and totally ordered within a trace by
//! `step_number`. `(trace_id, step_number)` is unique; this invariant is
//! enforced by the repository, not here.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;

use crate::ids::StepId;
use crate::ids::TraceId;
use crate::snapshot::SnapshotInput;

/// The kind of action a step records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    /// An internal reasoning step.
    Thought,
    /// A tool invocation.
    ToolCall,
    /// A call to a language model.
    LlmCall,
    /// A retrieval against a knowledge source.
    Retrieval,
    /// The final output step.
    Output,
    /// A branching decision point.
    Decision,
    /// An error encountered during execution.
    Error,
    /// A guardrail policy check.
    GuardCheck,
}

/// One atomic action within a trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Opaque step identifier.
    pub id: StepId,
    /// Owning trace identifier.
    pub trace_id: TraceId,
    /// Position within the trace; unique per trace, starting at 1.
    pub step_number: u32,
    /// The kind of action this step records.
    pub step_type: StepType,
    /// Human-readable name for the step.
    pub name: String,
    /// Input supplied to the step.
    pub input: Value,
    /// Output produced by the step, once available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Timestamp the step started, as an ISO-8601 string.
    pub started_at: String,
    /// Timestamp the step ended, as an ISO-8601 string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    /// Duration of the step, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Tokens consumed by the step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    /// Model name used to produce this step, if applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Error encountered while executing the step, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: Value,
}

/// Caller-supplied input for `append_step` and for steps nested inside
/// [`crate::trace::TraceInput`].
#[derive(Debug, Clone, Deserialize)]
pub struct StepInput {
    /// Position within the trace; unique per trace, starting at 1.
    pub step_number: u32,
    /// The kind of action this step records.
    pub step_type: StepType,
    /// Human-readable name for the step.
    pub name: String,
    /// Input supplied to the step; defaults to `{}`.
    #[serde(default)]
    pub input: Option<Value>,
    /// Output produced by the step, once available.
    #[serde(default)]
    pub output: Option<Value>,
    /// Timestamp the step started; defaults to "now".
    #[serde(default)]
    pub started_at: Option<String>,
    /// Timestamp the step ended, if already known.
    #[serde(default)]
    pub ended_at: Option<String>,
    /// Duration of the step, in milliseconds.
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// Tokens consumed by the step.
    #[serde(default)]
    pub tokens_used: Option<u64>,
    /// Model name used to produce this step, if applicable.
    #[serde(default)]
    pub model: Option<String>,
    /// Error encountered while executing the step, if any.
    #[serde(default)]
    pub error: Option<String>,
    /// Free-form metadata; defaults to `{}`.
    #[serde(default)]
    pub metadata: Option<Value>,
    /// Snapshot to attach to this step, if any.
    #[serde(default)]
    pub snapshot: Option<SnapshotInput>,
}

impl StepInput {
    /// Returns the step's input, defaulting to an empty object.
    #[must_use]
    pub fn input_or_default(&self) -> Value {
        self.input.clone().unwrap_or_else(|| json!({}))
    }

    /// Returns the step's metadata, defaulting to an empty object.
    #[must_use]
    pub fn metadata_or_default(&self) -> Value {
        self.metadata.clone().unwrap_or_else(|| json!({}))
    }
}
