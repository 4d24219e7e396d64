// flightrec-core/src/lib.rs
// ============================================================================
// Crate: flightrec-core
// Description: Backend-agnostic domain model and algorithms for the agent
//              execution trace recorder.
// Purpose: Define entities, the diff/fork/rubric/judge/summarise/guardrail
//          algorithms, and the repository trait interfaces a storage
//          backend implements.
// Dependencies: async-trait, rand, regex, serde, serde_json, thiserror, time
// ============================================================================

//! # flightrec-core
//!
//! Backend-agnostic domain model for the agent execution trace recorder:
//! traces, steps, snapshots, evaluation verdicts, and guardrail policies,
//! plus the pure algorithms that operate on them (diff, fork planning,
//! deterministic rubric scoring, judge-backed scoring, trace
//! summarisation, and guardrail matching). No SQL and no I/O beyond the
//! [`repository::TraceRepository`]/[`repository::PolicyRepository`] trait
//! boundary and the [`judge::LanguageJudge`] capability boundary.
//!
//! This crate performs no logging of its own; every failure surfaces
//! through [`error::CoreError`] for a caller to log or report.

pub mod clock;
pub mod diff;
pub mod error;
pub mod evaluation;
pub mod fork;
pub mod guardrail;
pub mod ids;
pub mod judge;
pub mod mint;
pub mod policy;
pub mod repository;
pub mod resolver;
pub mod rubric;
pub mod snapshot;
pub mod step;
pub mod summarize;
pub mod trace;

pub use diff::{diff_traces, Diff, StepDiff};
pub use error::CoreError;
pub use evaluation::{EvalInput, EvaluatorType, Verdict};
pub use fork::{plan_fork, ForkPlan, ForkResult};
pub use guardrail::{test_policies, PolicyMatch, StepMatches};
pub use ids::{EvalId, PolicyId, SnapshotId, StepId, TraceId};
pub use judge::{
    estimate_judge_cost, run_judge, JudgeCallError, JudgeCallParams, JudgeOpts, JudgePreset,
    JudgeResponse, LanguageJudge,
};
pub use policy::{GuardAction, GuardrailPolicy, MatchPattern, PolicyInput};
pub use repository::{PolicyRepository, SortDirection, TraceFilter, TracePage, TraceRepository, TraceSort};
pub use resolver::ResolvedTrace;
pub use rubric::{run_custom_rubric, CustomRubricInput, RubricContext, RubricPreset};
pub use snapshot::{Snapshot, SnapshotInput};
pub use step::{Step, StepInput, StepType};
pub use summarize::{extract_json, summarize_diff_for_llm, summarize_trace, Summary};
pub use trace::{Trace, TraceInput, TracePatch, TraceStatus, TraceTotals, Trigger};
