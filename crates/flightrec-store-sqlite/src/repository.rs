// flightrec-store-sqlite/src/repository.rs
// ============================================================================
// Module: SQLite Repository Implementation
// Description: TraceRepository/PolicyRepository backed by the schema this
//              crate owns.
// Purpose: Translate the domain traits into SQL against the five tables
//          created in store.rs, with every multi-row write inside one
//          transaction.
// Dependencies: flightrec-core, rusqlite, serde_json
// ============================================================================

//! ## Overview
//! Every write method opens exactly one [`crate::store::Store::do_tx`] call.
//! Reads that need a consistent multi-row view (`get_trace`, `fork_trace`)
//! also run inside `do_tx`, since `SQLite`'s single-writer model makes this
//! free of read/write contention with the busy timeout configured in
//! `store.rs`.

use std::collections::BTreeMap;

use flightrec_core::CoreError;
use flightrec_core::EvalInput;
use flightrec_core::ForkResult;
use flightrec_core::GuardAction;
use flightrec_core::GuardrailPolicy;
use flightrec_core::MatchPattern;
use flightrec_core::PolicyInput;
use flightrec_core::PolicyRepository;
use flightrec_core::ResolvedTrace;
use flightrec_core::Snapshot;
use flightrec_core::SnapshotInput;
use flightrec_core::SortDirection;
use flightrec_core::Step;
use flightrec_core::StepInput;
use flightrec_core::StepType;
use flightrec_core::Trace;
use flightrec_core::TraceFilter;
use flightrec_core::TraceId;
use flightrec_core::TracePage;
use flightrec_core::TracePatch;
use flightrec_core::TraceRepository;
use flightrec_core::TraceSort;
use flightrec_core::Trigger;
use flightrec_core::Verdict;
use flightrec_core::evaluation::EvaluatorType;
use flightrec_core::ids::EvalId;
use flightrec_core::ids::PolicyId;
use flightrec_core::ids::SnapshotId;
use flightrec_core::ids::StepId;
use flightrec_core::trace::TraceInput;
use flightrec_core::trace::TraceStatus;
use flightrec_core::trace::default_status;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::Transaction;
use rusqlite::params;
use serde_json::Value;
use serde_json::json;

use crate::store::SqliteStoreError;
use crate::store::Store;

/// Converts a stored `i64` into a `u32`, saturating instead of truncating.
fn u32_from_i64(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

/// Converts a stored `i64` into a `u64`, saturating instead of truncating.
fn u64_from_i64(value: i64) -> u64 {
    u64::try_from(value.max(0)).unwrap_or(u64::MAX)
}

/// Converts a domain `u64` into the `i64` `SQLite` column type, saturating
/// instead of truncating.
fn i64_from_u64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Wraps a row-decode failure into the `rusqlite::Error` a `query_map`/
/// `query_row` closure must return.
fn wrap<T>(result: Result<T, SqliteStoreError>) -> rusqlite::Result<T> {
    result.map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))
}

/// Maps a [`Trigger`] to its stored column value.
fn trigger_to_str(trigger: Trigger) -> &'static str {
    match trigger {
        Trigger::Manual => "manual",
        Trigger::UserMessage => "user_message",
        Trigger::Cron => "cron",
        Trigger::Webhook => "webhook",
        Trigger::Api => "api",
        Trigger::Event => "event",
    }
}

/// Parses a stored column value back into a [`Trigger`].
fn trigger_from_str(value: &str) -> Result<Trigger, SqliteStoreError> {
    match value {
        "manual" => Ok(Trigger::Manual),
        "user_message" => Ok(Trigger::UserMessage),
        "cron" => Ok(Trigger::Cron),
        "webhook" => Ok(Trigger::Webhook),
        "api" => Ok(Trigger::Api),
        "event" => Ok(Trigger::Event),
        other => Err(SqliteStoreError::Invalid(format!("unknown trigger: {other}"))),
    }
}

/// Maps a [`TraceStatus`] to its stored column value.
fn status_to_str(status: TraceStatus) -> &'static str {
    match status {
        TraceStatus::Running => "running",
        TraceStatus::Completed => "completed",
        TraceStatus::Failed => "failed",
        TraceStatus::Timeout => "timeout",
    }
}

/// Parses a stored column value back into a [`TraceStatus`].
fn status_from_str(value: &str) -> Result<TraceStatus, SqliteStoreError> {
    match value {
        "running" => Ok(TraceStatus::Running),
        "completed" => Ok(TraceStatus::Completed),
        "failed" => Ok(TraceStatus::Failed),
        "timeout" => Ok(TraceStatus::Timeout),
        other => Err(SqliteStoreError::Invalid(format!("unknown trace status: {other}"))),
    }
}

/// Maps a [`StepType`] to its stored column value.
fn step_type_to_str(step_type: StepType) -> &'static str {
    match step_type {
        StepType::Thought => "thought",
        StepType::ToolCall => "tool_call",
        StepType::LlmCall => "llm_call",
        StepType::Retrieval => "retrieval",
        StepType::Output => "output",
        StepType::Decision => "decision",
        StepType::Error => "error",
        StepType::GuardCheck => "guard_check",
    }
}

/// Parses a stored column value back into a [`StepType`].
fn step_type_from_str(value: &str) -> Result<StepType, SqliteStoreError> {
    match value {
        "thought" => Ok(StepType::Thought),
        "tool_call" => Ok(StepType::ToolCall),
        "llm_call" => Ok(StepType::LlmCall),
        "retrieval" => Ok(StepType::Retrieval),
        "output" => Ok(StepType::Output),
        "decision" => Ok(StepType::Decision),
        "error" => Ok(StepType::Error),
        "guard_check" => Ok(StepType::GuardCheck),
        other => Err(SqliteStoreError::Invalid(format!("unknown step type: {other}"))),
    }
}

/// Maps an [`EvaluatorType`] to its stored column value.
fn evaluator_type_to_str(evaluator_type: EvaluatorType) -> &'static str {
    match evaluator_type {
        EvaluatorType::Rubric => "rubric",
        EvaluatorType::LlmJudge => "llm_judge",
        EvaluatorType::PolicyCheck => "policy_check",
    }
}

/// Parses a stored column value back into an [`EvaluatorType`].
fn evaluator_type_from_str(value: &str) -> Result<EvaluatorType, SqliteStoreError> {
    match value {
        "rubric" => Ok(EvaluatorType::Rubric),
        "llm_judge" => Ok(EvaluatorType::LlmJudge),
        "policy_check" => Ok(EvaluatorType::PolicyCheck),
        other => Err(SqliteStoreError::Invalid(format!("unknown evaluator type: {other}"))),
    }
}

/// Maps a [`GuardAction`] to its stored column value.
fn action_to_str(action: GuardAction) -> &'static str {
    match action {
        GuardAction::Allow => "allow",
        GuardAction::Deny => "deny",
        GuardAction::Warn => "warn",
        GuardAction::RequireReview => "require_review",
    }
}

/// Parses a stored column value back into a [`GuardAction`].
fn action_from_str(value: &str) -> Result<GuardAction, SqliteStoreError> {
    match value {
        "allow" => Ok(GuardAction::Allow),
        "deny" => Ok(GuardAction::Deny),
        "warn" => Ok(GuardAction::Warn),
        "require_review" => Ok(GuardAction::RequireReview),
        other => Err(SqliteStoreError::Invalid(format!("unknown guard action: {other}"))),
    }
}

/// Maps a [`TraceSort`] to the column it orders by.
fn sort_column(sort: TraceSort) -> &'static str {
    match sort {
        TraceSort::StartedAt => "started_at",
        TraceSort::Duration => "total_duration_ms",
        TraceSort::Tokens => "total_tokens",
        TraceSort::Cost => "total_cost_usd",
        TraceSort::AgentName => "agent_name",
    }
}

/// Maps a [`SortDirection`] to its `ORDER BY` keyword.
fn direction_keyword(direction: SortDirection) -> &'static str {
    match direction {
        SortDirection::Asc => "ASC",
        SortDirection::Desc => "DESC",
    }
}

/// Parses a required JSON column into a [`Value`].
fn parse_json_object(text: &str) -> Result<Value, SqliteStoreError> {
    serde_json::from_str(text).map_err(|err| SqliteStoreError::Invalid(format!("corrupt json column: {err}")))
}

/// Parses an optional JSON column into an `Option<Value>`.
fn parse_json_opt(text: &Option<String>) -> Result<Option<Value>, SqliteStoreError> {
    text.as_deref().map(parse_json_object).transpose()
}

/// Parses the `tags` JSON-array column into a `Vec<String>`.
fn parse_tags(text: &str) -> Result<Vec<String>, SqliteStoreError> {
    serde_json::from_str(text).map_err(|err| SqliteStoreError::Invalid(format!("corrupt tags column: {err}")))
}

/// Decodes one `agent_traces` row into a [`Trace`].
fn row_to_trace(row: &Row<'_>) -> Result<Trace, SqliteStoreError> {
    let trigger: String = row.get("trigger")?;
    let status: String = row.get("status")?;
    let input: String = row.get("input")?;
    let output: Option<String> = row.get("output")?;
    let tags: String = row.get("tags")?;
    let metadata: String = row.get("metadata")?;
    let total_duration_ms: Option<i64> = row.get("total_duration_ms")?;
    let total_tokens: Option<i64> = row.get("total_tokens")?;
    let total_cost_usd: Option<f64> = row.get("total_cost_usd")?;

    let totals = if total_duration_ms.is_none() && total_tokens.is_none() && total_cost_usd.is_none() {
        None
    } else {
        Some(flightrec_core::trace::TraceTotals {
            duration_ms: total_duration_ms.map(u64_from_i64),
            tokens: total_tokens.map(u64_from_i64),
            cost_usd: total_cost_usd,
        })
    };

    Ok(Trace {
        id: TraceId::new(row.get::<_, String>("id")?),
        agent_name: row.get("agent_name")?,
        agent_version: row.get("agent_version")?,
        trigger: trigger_from_str(&trigger)?,
        status: status_from_str(&status)?,
        input: parse_json_object(&input)?,
        output: parse_json_opt(&output)?,
        started_at: row.get("started_at")?,
        ended_at: row.get("ended_at")?,
        totals,
        error: row.get("error")?,
        tags: parse_tags(&tags)?,
        metadata: parse_json_object(&metadata)?,
        parent_trace_id: row.get::<_, Option<String>>("parent_trace_id")?.map(TraceId::new),
        forked_from_step: row.get::<_, Option<i64>>("forked_from_step")?.map(u32_from_i64),
        created_at: row.get("created_at")?,
    })
}

/// Decodes one `agent_trace_steps` row into a [`Step`].
fn row_to_step(row: &Row<'_>) -> Result<Step, SqliteStoreError> {
    let step_type: String = row.get("step_type")?;
    let input: String = row.get("input")?;
    let output: Option<String> = row.get("output")?;
    let metadata: String = row.get("metadata")?;

    Ok(Step {
        id: StepId::new(row.get::<_, String>("id")?),
        trace_id: TraceId::new(row.get::<_, String>("trace_id")?),
        step_number: u32_from_i64(row.get("step_number")?),
        step_type: step_type_from_str(&step_type)?,
        name: row.get("name")?,
        input: parse_json_object(&input)?,
        output: parse_json_opt(&output)?,
        started_at: row.get("started_at")?,
        ended_at: row.get("ended_at")?,
        duration_ms: row.get::<_, Option<i64>>("duration_ms")?.map(u64_from_i64),
        tokens_used: row.get::<_, Option<i64>>("tokens_used")?.map(u64_from_i64),
        model: row.get("model")?,
        error: row.get("error")?,
        metadata: parse_json_object(&metadata)?,
    })
}

/// Decodes one `agent_trace_snapshots` row into a [`Snapshot`].
fn row_to_snapshot(row: &Row<'_>) -> Result<Snapshot, SqliteStoreError> {
    let context_window: String = row.get("context_window")?;
    let environment: String = row.get("environment")?;
    let tool_state: String = row.get("tool_state")?;

    Ok(Snapshot {
        id: SnapshotId::new(row.get::<_, String>("id")?),
        step_id: StepId::new(row.get::<_, String>("step_id")?),
        context_window: parse_json_object(&context_window)?,
        environment: parse_json_object(&environment)?,
        tool_state: parse_json_object(&tool_state)?,
        token_count: u64_from_i64(row.get("token_count")?),
    })
}

/// Decodes one `agent_trace_evals` row into a [`Verdict`].
fn row_to_verdict(row: &Row<'_>) -> Result<Verdict, SqliteStoreError> {
    let evaluator_type: String = row.get("evaluator_type")?;
    let details: String = row.get("details")?;

    Ok(Verdict {
        id: EvalId::new(row.get::<_, String>("id")?),
        trace_id: TraceId::new(row.get::<_, String>("trace_id")?),
        evaluator_type: evaluator_type_from_str(&evaluator_type)?,
        evaluator_name: row.get("evaluator_name")?,
        score: row.get("score")?,
        passed: row.get::<_, i64>("passed")? != 0,
        details: parse_json_object(&details)?,
        evaluated_at: row.get("evaluated_at")?,
    })
}

/// Decodes one `guardrail_policies` row into a [`GuardrailPolicy`].
fn row_to_policy(row: &Row<'_>) -> Result<GuardrailPolicy, SqliteStoreError> {
    let action: String = row.get("action")?;
    let match_pattern: String = row.get("match_pattern")?;
    let tags: String = row.get("tags")?;
    let action_params: Option<String> = row.get("action_params")?;

    let pattern: MatchPattern = serde_json::from_str(&match_pattern)
        .map_err(|err| SqliteStoreError::Invalid(format!("corrupt match_pattern column: {err}")))?;

    Ok(GuardrailPolicy {
        id: PolicyId::new(row.get::<_, String>("id")?),
        name: row.get("name")?,
        description: row.get("description")?,
        action: action_from_str(&action)?,
        priority: row.get("priority")?,
        enabled: row.get::<_, i64>("enabled")? != 0,
        match_pattern: pattern,
        action_params: parse_json_opt(&action_params)?,
        tags: parse_tags(&tags)?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Resolves `id_or_prefix` to an exact row id, preferring an exact match
/// over a unique prefix match.
fn resolve_trace_id(tx: &Transaction<'_>, id_or_prefix: &str) -> rusqlite::Result<Option<String>> {
    let exact: Option<String> = tx
        .query_row("SELECT id FROM agent_traces WHERE id = ?1", params![id_or_prefix], |row| row.get(0))
        .optional()?;
    if exact.is_some() {
        return Ok(exact);
    }

    let like_pattern = format!("{id_or_prefix}%");
    let mut statement = tx.prepare("SELECT id FROM agent_traces WHERE id LIKE ?1 ORDER BY id LIMIT 1")?;
    statement.query_row(params![like_pattern], |row| row.get(0)).optional()
}

/// Loads every step of `trace_id`, ordered by step number.
fn fetch_steps(tx: &Transaction<'_>, trace_id: &str) -> rusqlite::Result<Vec<Step>> {
    let mut statement = tx.prepare(
        "SELECT id, trace_id, step_number, step_type, name, input, output, started_at, ended_at,
                duration_ms, tokens_used, model, error, metadata
         FROM agent_trace_steps WHERE trace_id = ?1 ORDER BY step_number ASC",
    )?;
    let rows = statement.query_map(params![trace_id], |row| wrap(row_to_step(row)))?;
    rows.collect()
}

/// Loads every evaluation verdict for `trace_id`, newest first.
fn fetch_verdicts(tx: &Transaction<'_>, trace_id: &str) -> rusqlite::Result<Vec<Verdict>> {
    let mut statement = tx.prepare(
        "SELECT id, trace_id, evaluator_type, evaluator_name, score, passed, details, evaluated_at
         FROM agent_trace_evals WHERE trace_id = ?1 ORDER BY evaluated_at DESC",
    )?;
    let rows = statement.query_map(params![trace_id], |row| wrap(row_to_verdict(row)))?;
    rows.collect()
}

/// Resolves `id_or_prefix` and loads its trace, steps, and verdicts together.
fn fetch_resolved_trace(
    tx: &Transaction<'_>,
    id_or_prefix: &str,
) -> Result<Option<ResolvedTrace>, SqliteStoreError> {
    let Some(id) = resolve_trace_id(tx, id_or_prefix)? else { return Ok(None) };
    let trace = tx.query_row(
        "SELECT id, agent_name, agent_version, trigger, status, input, output, started_at,
                ended_at, total_duration_ms, total_tokens, total_cost_usd, error, tags,
                metadata, parent_trace_id, forked_from_step, created_at
         FROM agent_traces WHERE id = ?1",
        params![id],
        |row| wrap(row_to_trace(row)),
    )?;
    let steps = fetch_steps(tx, &id)?;
    let verdicts = fetch_verdicts(tx, &id)?;
    Ok(Some(ResolvedTrace { trace, steps, verdicts }))
}

fn fetch_snapshot_by_step_id(tx: &Transaction<'_>, step_id: &str) -> Result<Option<Snapshot>, SqliteStoreError> {
    let snapshot = tx
        .query_row(
            "SELECT id, step_id, context_window, environment, tool_state, token_count
             FROM agent_trace_snapshots WHERE step_id = ?1",
            params![step_id],
            |row| wrap(row_to_snapshot(row)),
        )
        .optional()?;
    Ok(snapshot)
}

/// Inserts one step row belonging to `trace_id`.
fn insert_step(tx: &Transaction<'_>, trace_id: &str, step: &Step) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO agent_trace_steps
            (id, trace_id, step_number, step_type, name, input, output, started_at, ended_at,
             duration_ms, tokens_used, model, error, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            step.id.as_str(),
            trace_id,
            step.step_number,
            step_type_to_str(step.step_type),
            step.name,
            step.input.to_string(),
            step.output.as_ref().map(ToString::to_string),
            step.started_at,
            step.ended_at,
            step.duration_ms.map(i64_from_u64),
            step.tokens_used.map(i64_from_u64),
            step.model,
            step.error,
            step.metadata.to_string(),
        ],
    )?;
    Ok(())
}

/// Inserts one context snapshot row for its owning step.
fn insert_snapshot(tx: &Transaction<'_>, snapshot: &Snapshot) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO agent_trace_snapshots (id, step_id, context_window, environment, tool_state, token_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            snapshot.id.as_str(),
            snapshot.step_id.as_str(),
            snapshot.context_window.to_string(),
            snapshot.environment.to_string(),
            snapshot.tool_state.to_string(),
            i64_from_u64(snapshot.token_count),
        ],
    )?;
    Ok(())
}

/// Inserts one trace row.
fn insert_trace(tx: &Transaction<'_>, trace: &Trace) -> rusqlite::Result<()> {
    let (duration_ms, tokens, cost_usd) = match &trace.totals {
        Some(totals) => (totals.duration_ms.map(i64_from_u64), totals.tokens.map(i64_from_u64), totals.cost_usd),
        None => (None, None, None),
    };
    tx.execute(
        "INSERT INTO agent_traces
            (id, agent_name, agent_version, trigger, status, input, output, started_at, ended_at,
             total_duration_ms, total_tokens, total_cost_usd, error, tags, metadata,
             parent_trace_id, forked_from_step, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
        params![
            trace.id.as_str(),
            trace.agent_name,
            trace.agent_version,
            trigger_to_str(trace.trigger),
            status_to_str(trace.status),
            trace.input.to_string(),
            trace.output.as_ref().map(ToString::to_string),
            trace.started_at,
            trace.ended_at,
            duration_ms,
            tokens,
            cost_usd,
            trace.error,
            serde_json::to_string(&trace.tags).unwrap_or_else(|_| "[]".to_string()),
            trace.metadata.to_string(),
            trace.parent_trace_id.as_ref().map(TraceId::as_str),
            trace.forked_from_step.map(i64::from),
            trace.created_at,
        ],
    )?;
    Ok(())
}

/// Rejects a [`StepInput`] whose `step_number` is below 1 or whose `name` is
/// blank.
fn validate_step_input(input: &StepInput) -> Result<(), CoreError> {
    if input.step_number < 1 {
        return Err(CoreError::InvalidInput(format!(
            "step_number must be >= 1, got {}",
            input.step_number
        )));
    }
    if input.name.trim().is_empty() {
        return Err(CoreError::InvalidInput("step name is required".to_string()));
    }
    Ok(())
}

/// Builds a [`Step`] from ingest input, minting an id and filling ingest-time
/// defaults.
fn build_step(trace_id: &TraceId, input: &StepInput) -> Step {
    let now = flightrec_core::clock::now_iso8601();
    Step {
        id: StepId::mint(),
        trace_id: trace_id.clone(),
        step_number: input.step_number,
        step_type: input.step_type,
        name: input.name.clone(),
        input: input.input_or_default(),
        output: input.output.clone(),
        started_at: input.started_at.clone().unwrap_or(now),
        ended_at: input.ended_at.clone(),
        duration_ms: input.duration_ms,
        tokens_used: input.tokens_used,
        model: input.model.clone(),
        error: input.error.clone(),
        metadata: input.metadata_or_default(),
    }
}

/// Builds a [`Snapshot`] from ingest input, minting an id and filling
/// ingest-time defaults.
fn build_snapshot(step_id: &StepId, input: &SnapshotInput) -> Snapshot {
    Snapshot {
        id: SnapshotId::mint(),
        step_id: step_id.clone(),
        context_window: input.context_window_or_default(),
        environment: input.environment_or_default(),
        tool_state: input.tool_state_or_default(),
        token_count: input.token_count.unwrap_or(0),
    }
}

impl TraceRepository for Store {
    fn ingest_trace(&self, input: TraceInput) -> Result<Trace, CoreError> {
        if input.agent_name.trim().is_empty() {
            return Err(CoreError::InvalidInput("agent_name is required".to_string()));
        }
        for step_input in &input.steps {
            validate_step_input(step_input)?;
        }
        if let Some(totals) = input.totals {
            if !totals.is_valid() {
                return Err(CoreError::InvalidInput("totals.cost_usd must be finite and non-negative".to_string()));
            }
        }

        self.do_tx(|tx| {
            let now = flightrec_core::clock::now_iso8601();
            let status = default_status(input.status, input.ended_at.as_deref());
            let trace = Trace {
                id: TraceId::mint(),
                agent_name: input.agent_name.clone(),
                agent_version: input.agent_version.clone(),
                trigger: input.trigger.unwrap_or(Trigger::Manual),
                status,
                input: input.input.clone().unwrap_or_else(|| json!({})),
                output: input.output.clone(),
                started_at: input.started_at.clone().unwrap_or_else(|| now.clone()),
                ended_at: input.ended_at.clone(),
                totals: input.totals,
                error: input.error.clone(),
                tags: input.tags.clone().unwrap_or_default(),
                metadata: input.metadata.clone().unwrap_or_else(|| json!({})),
                parent_trace_id: None,
                forked_from_step: None,
                created_at: now,
            };
            insert_trace(tx, &trace).map_err(|err| CoreError::from(SqliteStoreError::from(err)))?;

            for step_input in &input.steps {
                let step = build_step(&trace.id, step_input);
                insert_step(tx, trace.id.as_str(), &step)
                    .map_err(|err| CoreError::from(SqliteStoreError::from(err)))?;
                if let Some(snapshot_input) = &step_input.snapshot {
                    let snapshot = build_snapshot(&step.id, snapshot_input);
                    insert_snapshot(tx, &snapshot).map_err(|err| CoreError::from(SqliteStoreError::from(err)))?;
                }
            }

            Ok(trace)
        })
    }

    fn append_step(&self, trace_id: &TraceId, step: StepInput) -> Result<Step, CoreError> {
        validate_step_input(&step)?;
        self.do_tx(|tx| {
            let status: Option<String> = tx
                .query_row("SELECT status FROM agent_traces WHERE id = ?1", params![trace_id.as_str()], |row| {
                    row.get(0)
                })
                .optional()
                .map_err(|err| CoreError::from(SqliteStoreError::from(err)))?;
            let Some(status) = status else {
                return Err(CoreError::NotFound(format!("trace not found: {trace_id}")));
            };
            let status = status_from_str(&status).map_err(CoreError::from)?;
            if !status.is_running() {
                return Err(CoreError::InvalidState(format!("trace {trace_id} is not running")));
            }

            let new_step = build_step(trace_id, &step);
            insert_step(tx, trace_id.as_str(), &new_step).map_err(|err| CoreError::from(SqliteStoreError::from(err)))?;
            if let Some(snapshot_input) = &step.snapshot {
                let snapshot = build_snapshot(&new_step.id, snapshot_input);
                insert_snapshot(tx, &snapshot).map_err(|err| CoreError::from(SqliteStoreError::from(err)))?;
            }
            Ok(new_step)
        })
    }

    fn get_trace(&self, id_or_prefix: &str) -> Result<Option<ResolvedTrace>, CoreError> {
        self.do_tx(|tx| fetch_resolved_trace(tx, id_or_prefix).map_err(CoreError::from))
    }

    fn list_traces(&self, filter: &TraceFilter) -> Result<TracePage, CoreError> {
        self.do_tx(|tx| {
            let mut clauses = Vec::new();
            let mut bind: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

            if let Some(status) = filter.status {
                clauses.push("status = ?".to_string());
                bind.push(Box::new(status_to_str(status)));
            }
            if let Some(agent_name) = &filter.agent_name {
                clauses.push("agent_name LIKE ?".to_string());
                bind.push(Box::new(format!("%{agent_name}%")));
            }
            if let Some(tag) = &filter.tag {
                clauses.push("tags LIKE ?".to_string());
                bind.push(Box::new(format!("%\"{tag}\"%")));
            }
            if let Some(since) = &filter.since {
                clauses.push("started_at >= ?".to_string());
                bind.push(Box::new(since.clone()));
            }

            let where_clause =
                if clauses.is_empty() { String::new() } else { format!("WHERE {}", clauses.join(" AND ")) };

            let count_sql = format!("SELECT COUNT(*) FROM agent_traces {where_clause}");
            let params_refs: Vec<&dyn rusqlite::ToSql> = bind.iter().map(|b| b.as_ref()).collect();
            let total: i64 = tx
                .query_row(&count_sql, params_refs.as_slice(), |row| row.get(0))
                .map_err(|err| CoreError::from(SqliteStoreError::from(err)))?;

            let sql = format!(
                "SELECT id, agent_name, agent_version, trigger, status, input, output, started_at,
                        ended_at, total_duration_ms, total_tokens, total_cost_usd, error, tags,
                        metadata, parent_trace_id, forked_from_step, created_at
                 FROM agent_traces {where_clause}
                 ORDER BY {} {} LIMIT ? OFFSET ?",
                sort_column(filter.sort),
                direction_keyword(filter.direction)
            );
            let mut statement =
                tx.prepare(&sql).map_err(|err| CoreError::from(SqliteStoreError::from(err)))?;
            let limit = i64::from(filter.effective_limit());
            let offset = i64::from(filter.effective_offset());
            let mut all_params = params_refs;
            all_params.push(&limit);
            all_params.push(&offset);

            let rows = statement
                .query_map(all_params.as_slice(), |row| wrap(row_to_trace(row)))
                .map_err(|err| CoreError::from(SqliteStoreError::from(err)))?;
            let mut items = Vec::new();
            for row in rows {
                items.push(row.map_err(|err| CoreError::from(SqliteStoreError::from(err)))?);
            }

            Ok(TracePage { items, total: u64_from_i64(total) })
        })
    }

    fn update_trace(&self, id: &TraceId, patch: TracePatch) -> Result<Trace, CoreError> {
        if let Some(totals) = patch.totals {
            if !totals.is_valid() {
                return Err(CoreError::InvalidInput("totals.cost_usd must be finite and non-negative".to_string()));
            }
        }

        self.do_tx(|tx| {
            let existing = fetch_resolved_trace(tx, id.as_str()).map_err(CoreError::from)?;
            let Some(resolved) = existing else {
                return Err(CoreError::NotFound(format!("trace not found: {id}")));
            };
            let mut trace = resolved.trace;

            if let Some(status) = patch.status {
                trace.status = status;
            }
            if let Some(output) = patch.output {
                trace.output = Some(output);
            }
            if let Some(ended_at) = patch.ended_at {
                trace.ended_at = Some(ended_at);
            }
            if let Some(totals) = patch.totals {
                trace.totals = Some(totals);
            }
            if let Some(error) = patch.error {
                trace.error = Some(error);
            }
            if let Some(tags) = patch.tags {
                trace.tags = tags;
            }
            if let Some(metadata) = patch.metadata {
                trace.metadata = metadata;
            }

            let (duration_ms, tokens, cost_usd) = match &trace.totals {
                Some(totals) => (totals.duration_ms.map(i64_from_u64), totals.tokens.map(i64_from_u64), totals.cost_usd),
                None => (None, None, None),
            };

            tx.execute(
                "UPDATE agent_traces SET status = ?2, output = ?3, ended_at = ?4, total_duration_ms = ?5,
                    total_tokens = ?6, total_cost_usd = ?7, error = ?8, tags = ?9, metadata = ?10
                 WHERE id = ?1",
                params![
                    trace.id.as_str(),
                    status_to_str(trace.status),
                    trace.output.as_ref().map(ToString::to_string),
                    trace.ended_at,
                    duration_ms,
                    tokens,
                    cost_usd,
                    trace.error,
                    serde_json::to_string(&trace.tags).unwrap_or_else(|_| "[]".to_string()),
                    trace.metadata.to_string(),
                ],
            )
            .map_err(|err| CoreError::from(SqliteStoreError::from(err)))?;

            Ok(trace)
        })
    }

    fn delete_trace(&self, id: &TraceId) -> Result<(), CoreError> {
        self.do_tx(|tx| {
            let affected = tx
                .execute("DELETE FROM agent_traces WHERE id = ?1", params![id.as_str()])
                .map_err(|err| CoreError::from(SqliteStoreError::from(err)))?;
            if affected == 0 {
                return Err(CoreError::NotFound(format!("trace not found: {id}")));
            }
            Ok(())
        })
    }

    fn get_step_snapshot(&self, trace_id: &TraceId, step_number: u32) -> Result<Option<Snapshot>, CoreError> {
        self.do_tx(|tx| {
            let step_id: Option<String> = tx
                .query_row(
                    "SELECT id FROM agent_trace_steps WHERE trace_id = ?1 AND step_number = ?2",
                    params![trace_id.as_str(), step_number],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|err| CoreError::from(SqliteStoreError::from(err)))?;
            let Some(step_id) = step_id else { return Ok(None) };
            fetch_snapshot_by_step_id(tx, &step_id).map_err(CoreError::from)
        })
    }

    fn create_eval(&self, trace_id: &TraceId, input: EvalInput) -> Result<Verdict, CoreError> {
        self.do_tx(|tx| {
            let exists: Option<String> = tx
                .query_row("SELECT id FROM agent_traces WHERE id = ?1", params![trace_id.as_str()], |row| {
                    row.get(0)
                })
                .optional()
                .map_err(|err| CoreError::from(SqliteStoreError::from(err)))?;
            if exists.is_none() {
                return Err(CoreError::NotFound(format!("trace not found: {trace_id}")));
            }

            let verdict = Verdict {
                id: EvalId::mint(),
                trace_id: trace_id.clone(),
                evaluator_type: input.evaluator_type,
                evaluator_name: input.evaluator_name,
                score: flightrec_core::evaluation::clamp_score(input.score),
                passed: input.passed,
                details: input.details,
                evaluated_at: flightrec_core::clock::now_iso8601(),
            };

            tx.execute(
                "INSERT INTO agent_trace_evals (id, trace_id, evaluator_type, evaluator_name, score, passed, details, evaluated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    verdict.id.as_str(),
                    verdict.trace_id.as_str(),
                    evaluator_type_to_str(verdict.evaluator_type),
                    verdict.evaluator_name,
                    verdict.score,
                    i64::from(verdict.passed),
                    verdict.details.to_string(),
                    verdict.evaluated_at,
                ],
            )
            .map_err(|err| CoreError::from(SqliteStoreError::from(err)))?;

            Ok(verdict)
        })
    }

    fn fork_trace(
        &self,
        parent_id: &TraceId,
        from_step: u32,
        modified_input: Option<Value>,
        modified_env: Option<Value>,
    ) -> Result<ForkResult, CoreError> {
        self.do_tx(|tx| {
            let parent = fetch_resolved_trace(tx, parent_id.as_str()).map_err(CoreError::from)?;
            let Some(parent) = parent else {
                return Err(CoreError::NotFound(format!("trace not found: {parent_id}")));
            };

            let mut snapshots: BTreeMap<u32, Snapshot> = BTreeMap::new();
            for step in &parent.steps {
                if step.step_number > from_step {
                    continue;
                }
                if let Some(snapshot) = fetch_snapshot_by_step_id(tx, step.id.as_str()).map_err(CoreError::from)? {
                    snapshots.insert(step.step_number, snapshot);
                }
            }

            let plan = flightrec_core::fork::plan_fork(&parent, from_step, modified_input, modified_env, &snapshots)?;

            insert_trace(tx, &plan.new_trace).map_err(|err| CoreError::from(SqliteStoreError::from(err)))?;
            for step in &plan.new_steps {
                insert_step(tx, plan.new_trace.id.as_str(), step)
                    .map_err(|err| CoreError::from(SqliteStoreError::from(err)))?;
            }
            for snapshot in &plan.new_snapshots {
                insert_snapshot(tx, snapshot).map_err(|err| CoreError::from(SqliteStoreError::from(err)))?;
            }

            Ok(ForkResult {
                original_trace_id: parent_id.clone(),
                forked_trace_id: plan.new_trace.id,
                forked_from_step: from_step,
                steps_copied: u32::try_from(plan.new_steps.len()).unwrap_or(u32::MAX),
            })
        })
    }
}

impl PolicyRepository for Store {
    fn add_policy(&self, input: PolicyInput) -> Result<GuardrailPolicy, CoreError> {
        if input.name.trim().is_empty() {
            return Err(CoreError::InvalidInput("policy name is required".to_string()));
        }

        self.do_tx(|tx| {
            let now = flightrec_core::clock::now_iso8601();
            let policy = GuardrailPolicy {
                id: PolicyId::mint(),
                name: input.name.clone(),
                description: input.description.clone(),
                action: input.action,
                priority: input.priority.unwrap_or(0),
                enabled: input.enabled.unwrap_or(true),
                match_pattern: input.match_pattern.clone(),
                action_params: input.action_params.clone(),
                tags: input.tags.clone().unwrap_or_default(),
                created_at: now.clone(),
                updated_at: now,
            };

            let match_pattern_json =
                serde_json::to_string(&policy.match_pattern).map_err(|err| CoreError::Parse(err.to_string()))?;

            tx.execute(
                "INSERT INTO guardrail_policies
                    (id, name, description, action, priority, enabled, match_pattern, action_params,
                     tags, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    policy.id.as_str(),
                    policy.name,
                    policy.description,
                    action_to_str(policy.action),
                    policy.priority,
                    i64::from(policy.enabled),
                    match_pattern_json,
                    policy.action_params.as_ref().map(ToString::to_string),
                    serde_json::to_string(&policy.tags).unwrap_or_else(|_| "[]".to_string()),
                    policy.created_at,
                    policy.updated_at,
                ],
            )
            .map_err(|err| CoreError::from(SqliteStoreError::from(err)))?;

            Ok(policy)
        })
    }

    fn list_policies(&self) -> Result<Vec<GuardrailPolicy>, CoreError> {
        self.do_tx(|tx| {
            let mut statement = tx
                .prepare(
                    "SELECT id, name, description, action, priority, enabled, match_pattern, action_params,
                            tags, created_at, updated_at
                     FROM guardrail_policies ORDER BY priority DESC, name ASC",
                )
                .map_err(|err| CoreError::from(SqliteStoreError::from(err)))?;
            let rows = statement
                .query_map(params![], |row| wrap(row_to_policy(row)))
                .map_err(|err| CoreError::from(SqliteStoreError::from(err)))?;
            let mut policies = Vec::new();
            for row in rows {
                policies.push(row.map_err(|err| CoreError::from(SqliteStoreError::from(err)))?);
            }
            Ok(policies)
        })
    }

    fn remove_policy(&self, id_or_name: &str) -> Result<(), CoreError> {
        self.do_tx(|tx| {
            let affected = tx
                .execute("DELETE FROM guardrail_policies WHERE id = ?1 OR name = ?1", params![id_or_name])
                .map_err(|err| CoreError::from(SqliteStoreError::from(err)))?;
            if affected == 0 {
                return Err(CoreError::NotFound(format!("policy not found: {id_or_name}")));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("traces.db");
        let store = Store::open(&path).expect("store opens");
        (store, dir)
    }

    fn minimal_step(step_number: u32, name: &str) -> StepInput {
        StepInput {
            step_number,
            step_type: StepType::Thought,
            name: name.to_string(),
            input: None,
            output: None,
            started_at: None,
            ended_at: None,
            duration_ms: None,
            tokens_used: None,
            model: None,
            error: None,
            metadata: None,
            snapshot: None,
        }
    }

    #[test]
    fn ingests_and_resolves_a_trace_with_steps() {
        let (store, _dir) = temp_store();
        let trace = store
            .ingest_trace(TraceInput {
                agent_name: "billing-agent".to_string(),
                steps: vec![minimal_step(1, "plan")],
                ..Default::default()
            })
            .expect("ingest succeeds");

        let resolved = store.get_trace(trace.id.as_str()).expect("lookup succeeds").expect("trace exists");
        assert_eq!(resolved.steps.len(), 1);
        assert_eq!(resolved.trace.status, TraceStatus::Running);
    }

    #[test]
    fn append_step_rejects_non_running_trace() {
        let (store, _dir) = temp_store();
        let trace = store
            .ingest_trace(TraceInput {
                agent_name: "a".to_string(),
                status: Some(TraceStatus::Completed),
                ..Default::default()
            })
            .expect("ingest succeeds");

        let result = store.append_step(&trace.id, minimal_step(1, "late"));
        assert!(matches!(result, Err(CoreError::InvalidState(_))));
    }

    #[test]
    fn delete_trace_reports_not_found_for_missing_id() {
        let (store, _dir) = temp_store();
        let result = store.delete_trace(&TraceId::new("trc_doesnotexist"));
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }

    #[test]
    fn forks_a_trace_copying_only_the_requested_prefix() {
        let (store, _dir) = temp_store();
        let trace = store
            .ingest_trace(TraceInput {
                agent_name: "a".to_string(),
                steps: vec![minimal_step(1, "s1"), minimal_step(2, "s2"), minimal_step(3, "s3")],
                ..Default::default()
            })
            .expect("ingest succeeds");

        let result = store.fork_trace(&trace.id, 2, None, None).expect("fork succeeds");
        assert_eq!(result.steps_copied, 2);

        let forked = store.get_trace(result.forked_trace_id.as_str()).expect("lookup succeeds").expect("exists");
        assert_eq!(forked.steps.len(), 2);
        assert_eq!(forked.trace.parent_trace_id, Some(trace.id));
    }
}
