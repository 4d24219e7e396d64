// flightrec-core/src/repository.rs
// ============================================================================
// Module: Trace Repository Interface
// Description: Backend-agnostic CRUD contract over traces, steps,
//              snapshots, evaluations, and guardrail policies.
// Purpose: Let flightrec-core express ingest/append/fork/evaluate logic
//          without depending on a concrete storage engine.
// Dependencies: crate::{error, evaluation, fork, policy, resolver, snapshot,
//               step, trace}
// ============================================================================

//! ## Overview
//! `TraceRepository` is the sole writer of durable trace state; every other
//! component (diff, fork planning, evaluators, guardrail matcher) composes
//! on top of it. Implementations MUST perform every multi-row write inside
//! a single transaction.

use serde::Deserialize;
use serde::Serialize;

use crate::error::CoreError;
use crate::evaluation::EvalInput;
use crate::evaluation::Verdict;
use crate::fork::ForkResult;
use crate::ids::TraceId;
use crate::policy::GuardrailPolicy;
use crate::policy::PolicyInput;
use crate::resolver::ResolvedTrace;
use crate::snapshot::Snapshot;
use crate::step::StepInput;
use crate::step::Step;
use crate::trace::Trace;
use crate::trace::TraceInput;
use crate::trace::TracePatch;

/// Sort key accepted by `list_traces`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceSort {
    /// Sort by `started_at`.
    #[default]
    StartedAt,
    /// Sort by `total_duration_ms`.
    Duration,
    /// Sort by total token count.
    Tokens,
    /// Sort by total cost.
    Cost,
    /// Sort by agent name.
    AgentName,
}

/// Sort direction accepted by `list_traces`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    /// Ascending order.
    Asc,
    /// Descending order.
    #[default]
    Desc,
}

/// Filter and pagination parameters for `list_traces`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TraceFilter {
    /// Restrict to traces with this exact status.
    #[serde(default)]
    pub status: Option<crate::trace::TraceStatus>,
    /// Restrict to traces whose `agent_name` contains this substring.
    #[serde(default)]
    pub agent_name: Option<String>,
    /// Restrict to traces whose `tags` array contains this value.
    #[serde(default)]
    pub tag: Option<String>,
    /// Restrict to traces with `started_at >= since`.
    #[serde(default)]
    pub since: Option<String>,
    /// Sort key; defaults to [`TraceSort::StartedAt`].
    #[serde(default)]
    pub sort: TraceSort,
    /// Sort direction; defaults to [`SortDirection::Desc`].
    #[serde(default)]
    pub direction: SortDirection,
    /// Maximum rows to return; defaults to 25.
    #[serde(default)]
    pub limit: Option<u32>,
    /// Rows to skip before the first returned row; defaults to 0.
    #[serde(default)]
    pub offset: Option<u32>,
}

/// Default page size applied when `limit` is not supplied.
pub const DEFAULT_LIMIT: u32 = 25;

impl TraceFilter {
    /// Returns the effective limit, applying [`DEFAULT_LIMIT`] when unset.
    #[must_use]
    pub fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_LIMIT)
    }

    /// Returns the effective offset, applying 0 when unset.
    #[must_use]
    pub fn effective_offset(&self) -> u32 {
        self.offset.unwrap_or(0)
    }
}

/// A page of traces plus the unpaginated total count.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TracePage {
    /// Traces in this page, already sorted and paginated.
    pub items: Vec<Trace>,
    /// Total number of traces matching the filter, ignoring pagination.
    pub total: u64,
}

/// Backend-agnostic CRUD contract over traces, steps, snapshots, and
/// evaluation verdicts.
pub trait TraceRepository {
    /// Ingests a fully materialized trace, with any nested steps and
    /// snapshots, inside a single transaction.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidInput`] when a required field or
    /// enumeration is violated.
    fn ingest_trace(&self, input: TraceInput) -> Result<Trace, CoreError>;

    /// Appends one step (and optional snapshot) to a running trace.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] when the trace does not exist,
    /// [`CoreError::InvalidState`] when the trace is not `running`, or
    /// [`CoreError::InvalidInput`] when the step is malformed or its
    /// `step_number` collides with an existing step.
    fn append_step(&self, trace_id: &TraceId, step: StepInput) -> Result<Step, CoreError>;

    /// Resolves a trace by exact ID or unique ID prefix, together with its
    /// steps and verdicts.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] variants surfaced by the storage backend.
    fn get_trace(&self, id_or_prefix: &str) -> Result<Option<ResolvedTrace>, CoreError>;

    /// Lists traces matching a filter, paginated.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] variants surfaced by the storage backend.
    fn list_traces(&self, filter: &TraceFilter) -> Result<TracePage, CoreError>;

    /// Applies a partial update to a trace.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] when the trace does not exist.
    fn update_trace(&self, id: &TraceId, patch: TracePatch) -> Result<Trace, CoreError>;

    /// Deletes a trace, cascading to its steps, their snapshots, and every
    /// verdict for the trace.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] when the trace does not exist.
    fn delete_trace(&self, id: &TraceId) -> Result<(), CoreError>;

    /// Returns the snapshot for a given step number within a trace, if one
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] variants surfaced by the storage backend.
    fn get_step_snapshot(
        &self,
        trace_id: &TraceId,
        step_number: u32,
    ) -> Result<Option<Snapshot>, CoreError>;

    /// Stores an evaluation verdict for a trace.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] variants surfaced by the storage backend.
    fn create_eval(&self, trace_id: &TraceId, input: EvalInput) -> Result<Verdict, CoreError>;

    /// Creates a child trace by copying a prefix of a parent trace's steps.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] when the parent does not exist, or
    /// [`CoreError::InvalidState`] when the parent has no steps or
    /// `from_step` exceeds the parent's maximum step number.
    fn fork_trace(
        &self,
        parent_id: &TraceId,
        from_step: u32,
        modified_input: Option<serde_json::Value>,
        modified_env: Option<serde_json::Value>,
    ) -> Result<ForkResult, CoreError>;
}

/// Backend-agnostic CRUD contract over guardrail policies.
pub trait PolicyRepository {
    /// Adds a new guardrail policy.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidInput`] when `name` is not unique or a
    /// required field is missing.
    fn add_policy(&self, input: PolicyInput) -> Result<GuardrailPolicy, CoreError>;

    /// Lists every stored guardrail policy.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] variants surfaced by the storage backend.
    fn list_policies(&self) -> Result<Vec<GuardrailPolicy>, CoreError>;

    /// Removes a policy by ID or by exact name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] when no matching policy exists.
    fn remove_policy(&self, id_or_name: &str) -> Result<(), CoreError>;
}
