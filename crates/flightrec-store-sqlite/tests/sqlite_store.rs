// flightrec-store-sqlite/tests/sqlite_store.rs
// ============================================================================
// Module: SQLite Store Tests
// Description: Validate the SQLite-backed TraceRepository/PolicyRepository.
// Purpose: Ensure durable persistence, filtering, and fork/evaluation
//          behavior across repository operations.
// Dependencies: flightrec-store-sqlite, flightrec-core, rusqlite, tempfile
// ============================================================================

//! ## Overview
//! Conformance tests for the SQLite-backed trace store. Exercises
//! persistence across instances, filtering/pagination, append-step state
//! guards, forking, and policy CRUD.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use flightrec_core::CoreError;
use flightrec_core::EvalInput;
use flightrec_core::GuardAction;
use flightrec_core::MatchPattern;
use flightrec_core::PolicyInput;
use flightrec_core::PolicyRepository;
use flightrec_core::SortDirection;
use flightrec_core::StepInput;
use flightrec_core::StepType;
use flightrec_core::TraceFilter;
use flightrec_core::TraceId;
use flightrec_core::TraceInput;
use flightrec_core::TracePatch;
use flightrec_core::TraceRepository;
use flightrec_core::TraceSort;
use flightrec_core::TraceStatus;
use flightrec_core::TraceTotals;
use flightrec_core::evaluation::EvaluatorType;
use flightrec_store_sqlite::Store;
use serde_json::json;
use tempfile::TempDir;

fn store_for(path: &std::path::Path) -> Store {
    Store::open(path).expect("store opens")
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
fn persists_a_trace_across_store_instances() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("traces.db");
    let trace_id = {
        let store = store_for(&path);
        store
            .ingest_trace(TraceInput {
                agent_name: "billing-agent".to_string(),
                steps: vec![minimal_step(1, "plan")],
                ..Default::default()
            })
            .unwrap()
            .id
    };

    let store = store_for(&path);
    let resolved = store.get_trace(trace_id.as_str()).unwrap().expect("trace exists");
    assert_eq!(resolved.trace.agent_name, "billing-agent");
    assert_eq!(resolved.steps.len(), 1);
}

#[test]
fn get_trace_resolves_by_unique_id_prefix() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("traces.db"));
    let trace = store.ingest_trace(TraceInput { agent_name: "a".to_string(), ..Default::default() }).unwrap();
    let prefix = &trace.id.as_str()[.. 8];

    let resolved = store.get_trace(prefix).unwrap().expect("prefix resolves");
    assert_eq!(resolved.trace.id, trace.id);
}

#[test]
fn get_trace_returns_none_for_missing_id() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("traces.db"));
    assert!(store.get_trace("trc_doesnotexist").unwrap().is_none());
}

#[test]
fn list_traces_filters_by_status_and_paginates() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("traces.db"));
    for index in 0 .. 5 {
        let status = if index % 2 == 0 { TraceStatus::Completed } else { TraceStatus::Failed };
        store
            .ingest_trace(TraceInput {
                agent_name: format!("agent-{index}"),
                status: Some(status),
                ended_at: Some("2026-01-01T00:00:00Z".to_string()),
                ..Default::default()
            })
            .unwrap();
    }

    let page = store
        .list_traces(&TraceFilter {
            status: Some(TraceStatus::Completed),
            sort: TraceSort::AgentName,
            direction: SortDirection::Asc,
            limit: Some(2),
            ..Default::default()
        })
        .unwrap();

    assert_eq!(page.total, 3);
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.items[0].agent_name, "agent-0");
    assert_eq!(page.items[1].agent_name, "agent-2");
}

#[test]
fn append_step_rejects_non_running_trace() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("traces.db"));
    let trace = store
        .ingest_trace(TraceInput { agent_name: "a".to_string(), status: Some(TraceStatus::Completed), ..Default::default() })
        .unwrap();

    let result = store.append_step(&trace.id, minimal_step(1, "late"));
    assert!(matches!(result, Err(CoreError::InvalidState(_))));
}

#[test]
fn ingest_trace_rejects_a_non_positive_step_number() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("traces.db"));
    let result = store.ingest_trace(TraceInput {
        agent_name: "a".to_string(),
        steps: vec![minimal_step(0, "bad")],
        ..Default::default()
    });
    assert!(matches!(result, Err(CoreError::InvalidInput(_))));
}

#[test]
fn ingest_trace_rejects_a_blank_step_name() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("traces.db"));
    let result = store.ingest_trace(TraceInput {
        agent_name: "a".to_string(),
        steps: vec![minimal_step(1, "  ")],
        ..Default::default()
    });
    assert!(matches!(result, Err(CoreError::InvalidInput(_))));
}

#[test]
fn append_step_rejects_a_non_positive_step_number() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("traces.db"));
    let trace = store.ingest_trace(TraceInput { agent_name: "a".to_string(), ..Default::default() }).unwrap();
    let result = store.append_step(&trace.id, minimal_step(0, "bad"));
    assert!(matches!(result, Err(CoreError::InvalidInput(_))));
}

#[test]
fn append_step_rejects_missing_trace() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("traces.db"));
    let result = store.append_step(&TraceId::new("trc_missing"), minimal_step(1, "x"));
    assert!(matches!(result, Err(CoreError::NotFound(_))));
}

#[test]
fn ingest_trace_rejects_invalid_totals() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("traces.db"));
    let result = store.ingest_trace(TraceInput {
        agent_name: "a".to_string(),
        totals: Some(TraceTotals { cost_usd: Some(-1.0), ..TraceTotals::default() }),
        ..Default::default()
    });
    assert!(matches!(result, Err(CoreError::InvalidInput(_))));
}

#[test]
fn update_trace_rejects_invalid_totals() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("traces.db"));
    let trace = store.ingest_trace(TraceInput { agent_name: "a".to_string(), ..Default::default() }).unwrap();

    let result = store.update_trace(
        &trace.id,
        TracePatch { totals: Some(TraceTotals { cost_usd: Some(f64::NAN), ..TraceTotals::default() }), ..Default::default() },
    );
    assert!(matches!(result, Err(CoreError::InvalidInput(_))));
}

#[test]
fn update_trace_applies_only_patched_fields() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("traces.db"));
    let trace = store.ingest_trace(TraceInput { agent_name: "a".to_string(), ..Default::default() }).unwrap();

    let updated = store
        .update_trace(&trace.id, TracePatch { status: Some(TraceStatus::Completed), ..Default::default() })
        .unwrap();

    assert_eq!(updated.status, TraceStatus::Completed);
    assert_eq!(updated.agent_name, "a");
    assert!(updated.ended_at.is_none());
}

#[test]
fn delete_trace_cascades_to_steps_and_reports_not_found_for_missing_id() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("traces.db"));
    let trace = store
        .ingest_trace(TraceInput { agent_name: "a".to_string(), steps: vec![minimal_step(1, "s1")], ..Default::default() })
        .unwrap();

    store.delete_trace(&trace.id).unwrap();
    assert!(store.get_trace(trace.id.as_str()).unwrap().is_none());

    let result = store.delete_trace(&trace.id);
    assert!(matches!(result, Err(CoreError::NotFound(_))));
}

#[test]
fn create_eval_clamps_score_and_requires_existing_trace() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("traces.db"));
    let trace = store.ingest_trace(TraceInput { agent_name: "a".to_string(), ..Default::default() }).unwrap();

    let verdict = store
        .create_eval(
            &trace.id,
            EvalInput {
                evaluator_type: EvaluatorType::Rubric,
                evaluator_name: "json-valid".to_string(),
                score: 1.5,
                passed: true,
                details: json!({}),
            },
        )
        .unwrap();
    assert!((verdict.score - 1.0).abs() < f64::EPSILON);

    let result = store.create_eval(
        &TraceId::new("trc_missing"),
        EvalInput {
            evaluator_type: EvaluatorType::Rubric,
            evaluator_name: "x".to_string(),
            score: 0.5,
            passed: false,
            details: json!({}),
        },
    );
    assert!(matches!(result, Err(CoreError::NotFound(_))));
}

#[test]
fn fork_trace_copies_only_the_requested_prefix_and_rejects_out_of_range() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("traces.db"));
    let trace = store
        .ingest_trace(TraceInput {
            agent_name: "a".to_string(),
            steps: vec![minimal_step(1, "s1"), minimal_step(2, "s2"), minimal_step(3, "s3")],
            ..Default::default()
        })
        .unwrap();

    let result = store.fork_trace(&trace.id, 2, Some(json!({"q": "new"})), None).unwrap();
    assert_eq!(result.steps_copied, 2);
    assert_eq!(result.original_trace_id, trace.id);

    let forked = store.get_trace(result.forked_trace_id.as_str()).unwrap().expect("forked trace exists");
    assert_eq!(forked.steps.len(), 2);
    assert_eq!(forked.trace.status, TraceStatus::Running);
    assert_eq!(forked.trace.input, json!({"q": "new"}));

    let out_of_range = store.fork_trace(&trace.id, 10, None, None);
    assert!(matches!(out_of_range, Err(CoreError::InvalidState(_))));
}

#[test]
fn policy_crud_round_trips_and_rejects_duplicate_names() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("traces.db"));

    let policy = store
        .add_policy(PolicyInput {
            name: "no-secrets".to_string(),
            description: Some("blocks secret leakage".to_string()),
            action: GuardAction::Deny,
            priority: Some(10),
            enabled: None,
            match_pattern: MatchPattern { input_contains: Some("api_key".to_string()), ..Default::default() },
            action_params: None,
            tags: None,
        })
        .unwrap();
    assert!(policy.enabled);

    let duplicate = store.add_policy(PolicyInput {
        name: "no-secrets".to_string(),
        description: None,
        action: GuardAction::Warn,
        priority: None,
        enabled: None,
        match_pattern: MatchPattern::default(),
        action_params: None,
        tags: None,
    });
    assert!(matches!(duplicate, Err(CoreError::InvalidInput(_))));

    let policies = store.list_policies().unwrap();
    assert_eq!(policies.len(), 1);

    store.remove_policy("no-secrets").unwrap();
    assert!(store.list_policies().unwrap().is_empty());

    let missing = store.remove_policy("no-secrets");
    assert!(matches!(missing, Err(CoreError::NotFound(_))));
}

#[test]
fn store_rejects_incompatible_schema_version() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("traces.db");
    {
        let _store = store_for(&path);
    }

    let connection = rusqlite::Connection::open(&path).unwrap();
    connection.execute("UPDATE schema_version SET version = 999", rusqlite::params![]).unwrap();
    drop(connection);

    let result = Store::open(&path);
    assert!(matches!(result, Err(CoreError::InvalidState(_))));
}

#[test]
fn allows_concurrent_appends_from_multiple_threads() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("traces.db"));
    let trace = store.ingest_trace(TraceInput { agent_name: "a".to_string(), ..Default::default() }).unwrap();

    let mut handles = Vec::new();
    for index in 0 .. 8 {
        let store = store.clone();
        let trace_id = trace.id.clone();
        handles.push(std::thread::spawn(move || {
            store.append_step(&trace_id, minimal_step(index + 1, &format!("step-{index}"))).unwrap();
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let resolved = store.get_trace(trace.id.as_str()).unwrap().unwrap();
    assert_eq!(resolved.steps.len(), 8);
}
