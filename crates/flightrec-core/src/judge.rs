// flightrec-core/src/judge.rs
// ============================================================================
// Module: Judge Evaluator
// Description: Delegates scoring to an external LanguageJudge capability,
//              with cost accounting.
// Purpose: Implement the seven-step judge protocol, the LanguageJudge
//          capability trait, the built-in judge presets, and cost
//          estimation.
// Dependencies: async-trait, serde_json, crate::{error, evaluation,
//               resolver, rubric, summarize}
// ============================================================================

//! ## Overview
//! `LanguageJudge::call` is the one asynchronous suspension point in this
//! crate, mirroring the single capability-boundary trait pattern used
//! elsewhere in this codebase's ecosystem for out-of-process dependencies.
//! A judge call failure never produces a verdict; a parse failure does
//! (scored zero, with the raw response recorded).

use async_trait::async_trait;
use serde_json::Value;
use serde_json::json;

use crate::error::CoreError;
use crate::evaluation::EvalInput;
use crate::evaluation::EvaluatorType;
use crate::resolver::ResolvedTrace;
use crate::rubric::RubricContext;
use crate::step::StepType;
use crate::summarize::extract_json;
use crate::summarize::summarize_trace;

/// Parameters for a single judge call.
#[derive(Debug, Clone)]
pub struct JudgeCallParams {
    /// System prompt, if the judge distinguishes system from user turns.
    pub system: Option<String>,
    /// User-facing prompt text.
    pub prompt: String,
    /// Maximum tokens the judge may generate.
    pub max_tokens: u32,
}

/// A single judge response.
#[derive(Debug, Clone)]
pub struct JudgeResponse {
    /// Raw response text.
    pub text: String,
    /// Prompt tokens consumed.
    pub input_tokens: u64,
    /// Completion tokens consumed.
    pub output_tokens: u64,
    /// Model name that produced the response.
    pub model: String,
    /// Provider name that served the response.
    pub provider: String,
    /// Estimated cost of the call, in USD.
    pub cost_estimate_usd: f64,
    /// Observed latency of the call, in milliseconds.
    pub latency_ms: u64,
}

/// Failure classification for a judge call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JudgeCallError {
    /// A transport-level failure reaching the provider.
    #[error("network error calling {provider}: {message}")]
    Network {
        /// Provider name.
        provider: String,
        /// HTTP status code, if one was returned.
        status_code: Option<u16>,
        /// Human-readable message.
        message: String,
    },
    /// The provider rejected the request's credentials.
    #[error("auth error calling {provider}: {message}")]
    Auth {
        /// Provider name.
        provider: String,
        /// HTTP status code, if one was returned.
        status_code: Option<u16>,
        /// Human-readable message.
        message: String,
    },
    /// The provider rate-limited the request.
    #[error("rate limited by {provider}: {message}")]
    RateLimit {
        /// Provider name.
        provider: String,
        /// HTTP status code, if one was returned.
        status_code: Option<u16>,
        /// Human-readable message.
        message: String,
    },
    /// The provider returned a server-side error.
    #[error("server error from {provider}: {message}")]
    Server {
        /// Provider name.
        provider: String,
        /// HTTP status code, if one was returned.
        status_code: Option<u16>,
        /// Human-readable message.
        message: String,
    },
}

impl From<JudgeCallError> for CoreError {
    fn from(value: JudgeCallError) -> Self {
        match value {
            JudgeCallError::Network { provider, message, .. } => {
                Self::Network(format!("{provider}: {message}"))
            }
            JudgeCallError::Auth { provider, message, .. } => Self::Auth(format!("{provider}: {message}")),
            JudgeCallError::RateLimit { provider, message, .. } => {
                Self::RateLimit(format!("{provider}: {message}"))
            }
            JudgeCallError::Server { provider, message, .. } => {
                Self::Server(format!("{provider}: {message}"))
            }
        }
    }
}

/// External language-model-based grader capability.
#[async_trait]
pub trait LanguageJudge: Send + Sync {
    /// Issues one judge call.
    ///
    /// # Errors
    ///
    /// Returns a [`JudgeCallError`] classifying the failure.
    async fn call(&self, params: JudgeCallParams) -> Result<JudgeResponse, JudgeCallError>;
}

/// Caller-resolved provider/model context handed to the judge evaluator.
///
/// Configuration and credential resolution are out of scope for this crate;
/// the caller supplies an already-resolved record.
#[derive(Debug, Clone)]
pub struct JudgeOpts {
    /// Model identifier to request from the judge.
    pub model: String,
}

/// The outcome of parsing a judge's raw response text.
#[derive(Debug, Clone)]
struct ParsedJudgeOutput {
    score: f64,
    passed: bool,
    details: Value,
}

/// A named, external-judge evaluator specification.
pub struct JudgePreset {
    /// Preset name.
    pub name: &'static str,
    /// Pass threshold in `[0, 1]`, used when a parser does not set `passed`
    /// explicitly.
    pub threshold: f64,
    /// System prompt sent with every call.
    pub system_prompt: &'static str,
    /// Builds the user prompt from a trace summary.
    pub user_prompt_template: fn(&str) -> String,
    /// Parses the judge's raw response text.
    parse_response: fn(&Value, f64) -> Result<ParsedJudgeOutput, CoreError>,
    /// Returns whether this preset applies to a given trace; `None` means
    /// always applicable.
    pub applicable: Option<fn(&RubricContext<'_>) -> bool>,
}

fn clamp01(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

// ----------------------------------------------------------------------
// ai-root-cause
// ----------------------------------------------------------------------

fn root_cause_applicable(ctx: &RubricContext<'_>) -> bool {
    ctx.error.is_some() || ctx.steps.iter().any(|step| step.step_type == StepType::Error)
}

fn parse_root_cause(value: &Value, _threshold: f64) -> Result<ParsedJudgeOutput, CoreError> {
    let confidence = value["confidence"]
        .as_f64()
        .ok_or_else(|| CoreError::Parse("missing confidence in root-cause response".to_string()))?;
    let score = round3(clamp01(confidence));
    Ok(ParsedJudgeOutput {
        score,
        passed: score >= _threshold,
        details: json!({
            "root_cause": value.get("root_cause"),
            "failing_step": value.get("failing_step"),
            "contributing_factors": value.get("contributing_factors"),
            "suggested_fix": value.get("suggested_fix"),
            "confidence": confidence,
            "severity": value.get("severity"),
        }),
    })
}

/// Builds the `ai-root-cause` preset.
#[must_use]
pub fn ai_root_cause() -> JudgePreset {
    JudgePreset {
        name: "ai-root-cause",
        threshold: 0.5,
        system_prompt: "You are a meticulous root-cause analyst for AI agent failures.",
        user_prompt_template: |summary| {
            format!(
                "Analyze the following agent trace and identify the root cause of its failure.\n\n{summary}\n\nRespond with a JSON object: {{root_cause, failing_step, contributing_factors, suggested_fix, confidence, severity}}."
            )
        },
        parse_response: parse_root_cause,
        applicable: Some(root_cause_applicable),
    }
}

// ----------------------------------------------------------------------
// ai-quality-review
// ----------------------------------------------------------------------

fn parse_quality_review(value: &Value, threshold: f64) -> Result<ParsedJudgeOutput, CoreError> {
    let dims = ["relevance", "completeness", "coherence", "accuracy"];
    let mut sum = 0.0;
    for dim in dims {
        let v = value[dim]
            .as_f64()
            .ok_or_else(|| CoreError::Parse(format!("missing {dim} in quality-review response")))?;
        sum += v;
    }
    let score = round3(sum / 40.0);
    Ok(ParsedJudgeOutput {
        score,
        passed: score >= threshold,
        details: json!({
            "relevance": value.get("relevance"),
            "completeness": value.get("completeness"),
            "coherence": value.get("coherence"),
            "accuracy": value.get("accuracy"),
            "overall_assessment": value.get("overall_assessment"),
            "issues": value.get("issues"),
        }),
    })
}

/// Builds the `ai-quality-review` preset.
#[must_use]
pub fn ai_quality_review() -> JudgePreset {
    JudgePreset {
        name: "ai-quality-review",
        threshold: 0.7,
        system_prompt: "You are an exacting reviewer of AI agent output quality.",
        user_prompt_template: |summary| {
            format!(
                "Review the following agent trace for output quality.\n\n{summary}\n\nRespond with a JSON object: {{relevance, completeness, coherence, accuracy}} (each 0-10), overall_assessment, issues[]."
            )
        },
        parse_response: parse_quality_review,
        applicable: None,
    }
}

// ----------------------------------------------------------------------
// ai-security-audit
// ----------------------------------------------------------------------

fn risk_level_score(level: &str) -> f64 {
    match level {
        "none" => 1.0,
        "low" => 0.8,
        "medium" => 0.5,
        "high" => 0.2,
        "critical" => 0.0,
        _ => 0.5,
    }
}

fn parse_security_audit(value: &Value, _threshold: f64) -> Result<ParsedJudgeOutput, CoreError> {
    let risk_level = value["risk_level"].as_str().unwrap_or("");
    let safe = value["safe"]
        .as_bool()
        .ok_or_else(|| CoreError::Parse("missing safe flag in security-audit response".to_string()))?;
    let score = risk_level_score(risk_level);
    Ok(ParsedJudgeOutput {
        score,
        passed: safe,
        details: json!({
            "risk_level": risk_level,
            "findings": value.get("findings"),
            "recommendations": value.get("recommendations"),
            "safe": safe,
        }),
    })
}

/// Builds the `ai-security-audit` preset.
#[must_use]
pub fn ai_security_audit() -> JudgePreset {
    JudgePreset {
        name: "ai-security-audit",
        threshold: 0.8,
        system_prompt: "You are a security auditor reviewing AI agent tool usage.",
        user_prompt_template: |summary| {
            format!(
                "Audit the following agent trace for security risk.\n\n{summary}\n\nRespond with a JSON object: risk_level (none|low|medium|high|critical), findings[], recommendations[], safe (bool)."
            )
        },
        parse_response: parse_security_audit,
        applicable: None,
    }
}

// ----------------------------------------------------------------------
// ai-optimization
// ----------------------------------------------------------------------

fn parse_optimization(value: &Value, threshold: f64) -> Result<ParsedJudgeOutput, CoreError> {
    let efficiency_score = value["efficiency_score"]
        .as_f64()
        .ok_or_else(|| CoreError::Parse("missing efficiency_score in optimization response".to_string()))?;
    let score = round3(efficiency_score / 10.0);
    Ok(ParsedJudgeOutput {
        score,
        passed: score >= threshold,
        details: json!({
            "efficiency_score": efficiency_score,
            "total_waste_estimate_pct": value.get("total_waste_estimate_pct"),
            "optimizations": value.get("optimizations"),
            "summary": value.get("summary"),
        }),
    })
}

/// Builds the `ai-optimization` preset.
#[must_use]
pub fn ai_optimization() -> JudgePreset {
    JudgePreset {
        name: "ai-optimization",
        threshold: 0.6,
        system_prompt: "You are an efficiency analyst for AI agent execution traces.",
        user_prompt_template: |summary| {
            format!(
                "Analyze the following agent trace for wasted tokens, steps, and tool calls.\n\n{summary}\n\nRespond with a JSON object: efficiency_score (0-10), total_waste_estimate_pct, optimizations[], summary."
            )
        },
        parse_response: parse_optimization,
        applicable: None,
    }
}

/// Looks up a built-in judge preset by name.
#[must_use]
pub fn builtin_preset(name: &str) -> Option<JudgePreset> {
    match name {
        "ai-root-cause" => Some(ai_root_cause()),
        "ai-quality-review" => Some(ai_quality_review()),
        "ai-security-audit" => Some(ai_security_audit()),
        "ai-optimization" => Some(ai_optimization()),
        _ => None,
    }
}

/// Runs the seven-step judge protocol against a resolved trace.
///
/// # Errors
///
/// Returns [`CoreError::InvalidInput`] when `preset_name` is unknown, or a
/// [`CoreError`] translated from a [`JudgeCallError`] when the judge call
/// itself fails (a failed call never produces a verdict). A parse failure
/// in the judge's response does NOT return an error: it produces a
/// zero-score verdict per the protocol.
pub async fn run_judge(
    trace: &ResolvedTrace,
    preset_name: &str,
    judge: &dyn LanguageJudge,
    opts: &JudgeOpts,
) -> Result<EvalInput, CoreError> {
    let preset = builtin_preset(preset_name)
        .ok_or_else(|| CoreError::InvalidInput(format!("unknown judge preset: {preset_name}")))?;

    let ctx = RubricContext::from_trace(trace);
    if let Some(applicable) = preset.applicable {
        if !applicable(&ctx) {
            return Ok(EvalInput {
                evaluator_type: EvaluatorType::LlmJudge,
                evaluator_name: preset.name.to_string(),
                score: 1.0,
                passed: true,
                details: json!({"skipped": true, "reason": "Not applicable to this trace"}),
            });
        }
    }

    let summary = summarize_trace(trace, None);
    let prompt = (preset.user_prompt_template)(&summary.text);

    let response = judge
        .call(JudgeCallParams {
            system: Some(preset.system_prompt.to_string()),
            prompt,
            max_tokens: 1024,
        })
        .await?;

    let parsed = match extract_json(&response.text).and_then(|value| {
        (preset.parse_response)(&value, preset.threshold)
    }) {
        Ok(parsed) => parsed,
        Err(_) => ParsedJudgeOutput {
            score: 0.0,
            passed: false,
            details: json!({
                "parse_error": true,
                "raw_response": response.text.chars().take(2000).collect::<String>(),
            }),
        },
    };

    let mut details = parsed.details;
    if let Value::Object(map) = &mut details {
        map.insert("llm_model".to_string(), json!(response.model));
        map.insert("llm_provider".to_string(), json!(response.provider));
        map.insert("input_tokens".to_string(), json!(response.input_tokens));
        map.insert("output_tokens".to_string(), json!(response.output_tokens));
        map.insert("cost_usd".to_string(), json!(response.cost_estimate_usd));
        map.insert("latency_ms".to_string(), json!(response.latency_ms));
    }

    let _ = &opts.model;

    Ok(EvalInput {
        evaluator_type: EvaluatorType::LlmJudge,
        evaluator_name: preset.name.to_string(),
        score: parsed.score,
        passed: parsed.passed,
        details,
    })
}

/// Per-model cost rate, in USD per million tokens.
#[derive(Debug, Clone, Copy)]
pub struct ModelRate {
    /// Cost per million input tokens.
    pub input_usd_per_1m: f64,
    /// Cost per million output tokens.
    pub output_usd_per_1m: f64,
}

/// Looks up the fixed rate for a model, defaulting to a conservative
/// mid-tier rate for unknown models.
#[must_use]
pub fn rate_for_model(model: &str) -> ModelRate {
    match model {
        "claude-haiku" => ModelRate { input_usd_per_1m: 0.80, output_usd_per_1m: 4.00 },
        "claude-sonnet" => ModelRate { input_usd_per_1m: 3.00, output_usd_per_1m: 15.00 },
        "claude-opus" => ModelRate { input_usd_per_1m: 15.00, output_usd_per_1m: 75.00 },
        "gpt-4o-mini" => ModelRate { input_usd_per_1m: 0.15, output_usd_per_1m: 0.60 },
        "gpt-4o" => ModelRate { input_usd_per_1m: 2.50, output_usd_per_1m: 10.00 },
        _ => ModelRate { input_usd_per_1m: 3.00, output_usd_per_1m: 15.00 },
    }
}

/// One line item in a cost estimate.
#[derive(Debug, Clone)]
pub struct CostBreakdownItem {
    /// Preset this line item estimates the cost of.
    pub preset_name: String,
    /// Estimated cost in USD.
    pub estimated_usd: f64,
}

/// A full cost estimate across several presets.
#[derive(Debug, Clone)]
pub struct CostEstimate {
    /// Sum of every line item's estimated cost.
    pub total_estimated_usd: f64,
    /// Per-preset line items.
    pub breakdown: Vec<CostBreakdownItem>,
}

/// Estimates the cost of running `preset_names` against `trace` with
/// `model`.
#[must_use]
pub fn estimate_judge_cost(trace: &ResolvedTrace, preset_names: &[&str], model: &str) -> CostEstimate {
    let summary = summarize_trace(trace, None);
    let rate = rate_for_model(model);
    let input_tokens = summary.estimated_tokens + 200;
    let output_tokens = 1024u64;

    let breakdown: Vec<CostBreakdownItem> = preset_names
        .iter()
        .map(|name| {
            let input_cost = (input_tokens as f64 / 1_000_000.0) * rate.input_usd_per_1m;
            let output_cost = (output_tokens as f64 / 1_000_000.0) * rate.output_usd_per_1m;
            CostBreakdownItem { preset_name: (*name).to_string(), estimated_usd: input_cost + output_cost }
        })
        .collect();

    let total_estimated_usd = breakdown.iter().map(|item| item.estimated_usd).sum();
    CostEstimate { total_estimated_usd, breakdown }
}

#[cfg(test)]
mod tests {
    use super::JudgeCallError;
    use super::JudgeCallParams;
    use super::JudgeOpts;
    use super::JudgeResponse;
    use super::LanguageJudge;
    use super::run_judge;
    use crate::evaluation::Verdict;
    use crate::ids::{StepId, TraceId};
    use crate::resolver::ResolvedTrace;
    use crate::step::{Step, StepType};
    use crate::trace::{Trace, TraceStatus, Trigger};
    use async_trait::async_trait;
    use serde_json::json;

    fn trace_with_steps(step_types: &[StepType]) -> ResolvedTrace {
        let trace_id = TraceId::mint();
        let trace = Trace {
            id: trace_id.clone(),
            agent_name: "a".to_string(),
            agent_version: None,
            trigger: Trigger::Manual,
            status: TraceStatus::Completed,
            input: json!({}),
            output: Some(json!("done")),
            started_at: "2026-01-01T00:00:00Z".to_string(),
            ended_at: Some("2026-01-01T00:01:00Z".to_string()),
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

    /// A judge that panics if called, used to prove the skip path never
    /// reaches the transport.
    struct UnreachableJudge;

    #[async_trait]
    impl LanguageJudge for UnreachableJudge {
        async fn call(&self, _params: JudgeCallParams) -> Result<JudgeResponse, JudgeCallError> {
            panic!("judge must not be invoked for a non-applicable preset");
        }
    }

    #[tokio::test]
    async fn skips_root_cause_without_invoking_the_judge_when_not_applicable() {
        let trace = trace_with_steps(&[StepType::Thought, StepType::ToolCall, StepType::Output]);
        let opts = JudgeOpts { model: "claude-haiku".to_string() };
        let verdict = run_judge(&trace, "ai-root-cause", &UnreachableJudge, &opts).await.expect("skip succeeds");

        assert!((verdict.score - 1.0).abs() < f64::EPSILON);
        assert!(verdict.passed);
        assert_eq!(verdict.details["skipped"].as_bool(), Some(true));
    }

    struct StubJudge {
        response_text: String,
    }

    #[async_trait]
    impl LanguageJudge for StubJudge {
        async fn call(&self, _params: JudgeCallParams) -> Result<JudgeResponse, JudgeCallError> {
            Ok(JudgeResponse {
                text: self.response_text.clone(),
                input_tokens: 120,
                output_tokens: 40,
                model: "claude-haiku".to_string(),
                provider: "anthropic".to_string(),
                cost_estimate_usd: 0.001,
                latency_ms: 250,
            })
        }
    }

    #[tokio::test]
    async fn runs_root_cause_when_applicable_and_parses_the_response() {
        let trace = trace_with_steps(&[StepType::Thought, StepType::Error]);
        let judge = StubJudge {
            response_text: json!({
                "root_cause": "tool call timed out",
                "failing_step": 2,
                "contributing_factors": [],
                "suggested_fix": "retry with backoff",
                "confidence": 0.9,
                "severity": "high",
            })
            .to_string(),
        };
        let opts = JudgeOpts { model: "claude-haiku".to_string() };
        let verdict = run_judge(&trace, "ai-root-cause", &judge, &opts).await.expect("judge call succeeds");

        assert!((verdict.score - 0.9).abs() < f64::EPSILON);
        assert!(verdict.passed);
        assert_eq!(verdict.details["llm_model"].as_str(), Some("claude-haiku"));
    }

    #[tokio::test]
    async fn unknown_preset_is_rejected() {
        let trace = trace_with_steps(&[StepType::Thought]);
        let opts = JudgeOpts { model: "claude-haiku".to_string() };
        let result = run_judge(&trace, "not-a-real-preset", &UnreachableJudge, &opts).await;
        assert!(result.is_err());
    }
}
