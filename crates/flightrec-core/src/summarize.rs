// flightrec-core/src/summarize.rs
// ============================================================================
// Module: Trace Summariser
// Description: Compresses a resolved trace or a diff into a bounded
//              plain-text digest suitable as judge input.
// Purpose: Implement the budget-driven digest algorithm and the
//          four-stage JSON extractor every judge preset parser uses.
// Dependencies: serde_json, crate::{diff, error, resolver, step, trace}
// ============================================================================

//! ## Overview
//! `summarize_trace` never returns an error: every field it reads is
//! optional, and truncation degrades gracefully. `extract_json` is the one
//! fallible function here, used by every judge preset's response parser.

use serde_json::Value;

use crate::diff::Diff;
use crate::error::CoreError;
use crate::resolver::ResolvedTrace;
use crate::step::Step;
use crate::step::StepType;
use crate::trace::Trace;

/// A bounded plain-text digest plus its estimated token count.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    /// The rendered digest text.
    pub text: String,
    /// `ceil(text.len() / 4)`, a crude token estimate.
    pub estimated_tokens: u64,
}

/// Default token budget applied when the caller does not specify one.
pub const DEFAULT_MAX_TOKEN_BUDGET: u32 = 3000;

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{truncated}...")
    }
}

fn json_truncated(value: &Value, max_chars: usize) -> String {
    truncate(&value.to_string(), max_chars)
}

fn estimate_tokens(text: &str) -> u64 {
    let len = u64::try_from(text.len()).unwrap_or(u64::MAX);
    len.div_ceil(4)
}

/// Converts a `usize` into an `i64`, saturating instead of truncating.
fn i64_from_usize(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Summarises a resolved trace into a bounded digest.
#[must_use]
pub fn summarize_trace(trace: &ResolvedTrace, max_token_budget: Option<u32>) -> Summary {
    let budget = max_token_budget.unwrap_or(DEFAULT_MAX_TOKEN_BUDGET);
    let t = &trace.trace;

    let mut header = format!("TRACE: {}", t.agent_name);
    if let Some(version) = &t.agent_version {
        header.push_str(&format!(" v{version}"));
    }
    header.push_str(&format!(" [{}]", status_label(t)));

    let mut lines = vec![header.clone()];
    lines.push(format!("INPUT: {}", json_truncated(&t.input, 300)));
    if let Some(output) = &t.output {
        lines.push(format!("OUTPUT: {}", json_truncated(output, 300)));
    }

    let mut steps_header = format!("STEPS ({})", trace.steps.len());
    if let Some(totals) = &t.totals {
        if let Some(duration_ms) = totals.duration_ms {
            steps_header.push_str(&format!(", {duration_ms}ms"));
        }
        if let Some(tokens) = totals.tokens {
            steps_header.push_str(&format!(", {tokens} tokens"));
        }
    }
    lines.push(steps_header);

    let header_chars: i64 = lines.iter().map(|l| i64_from_usize(l.chars().count())).sum();
    let char_budget = 4 * i64::from(budget) - header_chars - 200;
    let show_every_step = char_budget > i64_from_usize(trace.steps.len()) * 80;

    let mut current_chars: i64 = header_chars;
    let mut omitted = 0usize;
    for (idx, step) in trace.steps.iter().enumerate() {
        let carries_error = step.error.is_some();
        let always_show = matches!(
            step.step_type,
            StepType::Error | StepType::Output | StepType::Decision
        ) || carries_error;
        if !show_every_step && !always_show {
            omitted += 1;
            continue;
        }

        let line = render_step_line(step, idx + 1, char_budget);
        let line_chars = i64_from_usize(line.chars().count());
        if current_chars + line_chars > char_budget {
            omitted += trace.steps.len() - idx;
            break;
        }
        current_chars += line_chars;
        lines.push(line);
    }
    if omitted > 0 {
        lines.push(format!("... ({omitted} more steps omitted for brevity)"));
    }

    if let Some(error) = &t.error {
        lines.push(format!("ERROR: {}", truncate(error, 300)));
    }
    if !t.tags.is_empty() {
        lines.push(format!("TAGS: {}", t.tags.join(", ")));
    }

    let text = lines.join("\n");
    let estimated_tokens = estimate_tokens(&text);
    Summary { text, estimated_tokens }
}

fn status_label(trace: &Trace) -> String {
    format!("{:?}", trace.status).to_uppercase()
}

fn render_step_line(step: &Step, display_number: usize, char_budget: i64) -> String {
    let mut parts = Vec::new();
    if let Some(duration_ms) = step.duration_ms {
        parts.push(format!("{duration_ms}ms"));
    }
    if let Some(tokens) = step.tokens_used {
        parts.push(format!("{tokens} tokens"));
    }
    if let Some(model) = &step.model {
        parts.push(model.clone());
    }
    let parts_str = if parts.is_empty() { String::new() } else { format!(" ({})", parts.join(", ")) };

    let mut line = format!("{display_number}. [{:?}] {}{}", step.step_type, step.name, parts_str);

    let output_budget = if char_budget > 2000 { 200 } else { 100 };
    if step.step_type == StepType::ToolCall {
        line.push_str(&format!(" input={}", json_truncated(&step.input, output_budget)));
    }
    if let Some(output) = &step.output {
        line.push_str(&format!(" output={}", json_truncated(output, output_budget)));
    }
    if let Some(error) = &step.error {
        line.push_str(&format!(" error={}", truncate(error, output_budget)));
    }
    line
}

/// Summarises a diff between two traces into a bounded digest suitable as
/// judge input.
#[must_use]
pub fn summarize_diff_for_llm(diff: &Diff, left: &ResolvedTrace, right: &ResolvedTrace) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "LEFT: {} [{}] steps={}",
        left.trace.agent_name,
        status_label(&left.trace),
        diff.left_step_count
    ));
    lines.push(format!(
        "RIGHT: {} [{}] steps={}",
        right.trace.agent_name,
        status_label(&right.trace),
        diff.right_step_count
    ));
    lines.push(format!("INPUT LEFT: {}", json_truncated(&left.trace.input, 200)));
    lines.push(format!("INPUT RIGHT: {}", json_truncated(&right.trace.input, 200)));
    if let Some(output) = &left.trace.output {
        lines.push(format!("OUTPUT LEFT: {}", json_truncated(output, 200)));
    }
    if let Some(output) = &right.trace.output {
        lines.push(format!("OUTPUT RIGHT: {}", json_truncated(output, 200)));
    }
    lines.push(match diff.divergence_step {
        Some(step) => format!("DIVERGENCE: step {step}"),
        None => "DIVERGENCE: none".to_string(),
    });

    let shown = diff.diffs.iter().take(15);
    for d in shown {
        let left_value = d.left_value.as_ref().map_or_else(|| "null".to_string(), ToString::to_string);
        let right_value = d.right_value.as_ref().map_or_else(|| "null".to_string(), ToString::to_string);
        lines.push(truncate(
            &format!("- Step {}, {}: LEFT={left_value} | RIGHT={right_value}", d.step_number, d.field),
            80,
        ));
    }
    if diff.diffs.len() > 15 {
        lines.push(format!("... and {} more", diff.diffs.len() - 15));
    }

    if let Some(error) = &left.trace.error {
        lines.push(format!("ERROR LEFT: {}", truncate(error, 200)));
    }
    if let Some(error) = &right.trace.error {
        lines.push(format!("ERROR RIGHT: {}", truncate(error, 200)));
    }

    lines.join("\n")
}

/// Extracts a JSON value from free-form judge response text.
///
/// Tries, in order: a direct parse of the trimmed input; a fenced code
/// block (with or without a `json` language tag); the slice between the
/// first `{` and the last `}`.
///
/// # Errors
///
/// Returns [`CoreError::Parse`] when none of the three strategies succeed.
pub fn extract_json(text: &str) -> Result<Value, CoreError> {
    let trimmed = text.trim();

    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    if let Some(fenced) = extract_fenced_block(trimmed) {
        if let Ok(value) = serde_json::from_str(&fenced) {
            return Ok(value);
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str(&trimmed[start..=end]) {
                return Ok(value);
            }
        }
    }

    Err(CoreError::Parse(format!("could not extract JSON from response: {}", truncate(trimmed, 200))))
}

fn extract_fenced_block(text: &str) -> Option<String> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    let after_lang_tag = after_fence.strip_prefix("json").unwrap_or(after_fence);
    let after_lang_tag = after_lang_tag.strip_prefix('\n').unwrap_or(after_lang_tag);
    let end = after_lang_tag.find("```")?;
    Some(after_lang_tag[..end].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::extract_json;

    #[test]
    fn extracts_json_surrounded_by_prose() {
        let value = extract_json("Analysis: {\"root_cause\":\"x\"} end.").expect("json extracted");
        assert_eq!(value["root_cause"], "x");
    }

    #[test]
    fn extracts_json_from_fenced_block() {
        let value = extract_json("```json\n{\"score\":0.9}\n```").expect("json extracted");
        assert!((value["score"].as_f64().expect("score is numeric") - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn fails_on_text_with_no_json() {
        assert!(extract_json("no json here").is_err());
    }
}
