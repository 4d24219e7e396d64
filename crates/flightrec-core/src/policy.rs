// flightrec-core/src/policy.rs
// ============================================================================
// Module: Guardrail Policy
// Description: A named rule matched against trace steps by the guardrail
//              matcher.
// Purpose: Define the GuardrailPolicy entity, its action enumeration, and
//          the match-pattern input.
// Dependencies: serde, serde_json, crate::ids
// ============================================================================

//! ## Overview
//! Policies are mutable via add/remove; updates are not part of the
//! contract. `name` is globally unique; disabled policies are ignored by
//! [`crate::guardrail::test_policies`].

use serde::Deserialize;
use serde::Serialize;

use crate::ids::PolicyId;

/// The action a matched policy recommends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardAction {
    /// Allow the step to proceed.
    Allow,
    /// Deny the step.
    Deny,
    /// Allow the step but flag a warning.
    Warn,
    /// Require human review before proceeding.
    RequireReview,
}

/// Conjunctive match criteria evaluated against a single step.
///
/// Every populated key must match for the pattern to match; a pattern with
/// no populated keys matches nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchPattern {
    /// Exact equality against the step's `step_type`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_type: Option<crate::step::StepType>,
    /// Case-insensitive substring match against the step's `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_contains: Option<String>,
    /// Case-insensitive regex match against the step's `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_regex: Option<String>,
    /// Case-insensitive substring match against `JSON(step.input)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_contains: Option<String>,
    /// Case-insensitive substring match against `JSON(step.output ?? "")`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_contains: Option<String>,
}

/// A named rule matched against trace steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailPolicy {
    /// Opaque policy identifier.
    pub id: PolicyId,
    /// Globally unique policy name.
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Action recommended when this policy matches.
    pub action: GuardAction,
    /// Evaluation priority; higher priorities are evaluated first.
    pub priority: i64,
    /// Whether this policy is evaluated by the matcher.
    pub enabled: bool,
    /// Conjunctive match criteria.
    pub match_pattern: MatchPattern,
    /// Optional parameters consumed by the recommended action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_params: Option<serde_json::Value>,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Timestamp the policy was created, as an ISO-8601 string.
    pub created_at: String,
    /// Timestamp the policy was last updated, as an ISO-8601 string.
    pub updated_at: String,
}

/// Caller-supplied input for `add_policy`.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyInput {
    /// Globally unique policy name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
    /// Action recommended when this policy matches.
    pub action: GuardAction,
    /// Evaluation priority; defaults to 0.
    #[serde(default)]
    pub priority: Option<i64>,
    /// Whether this policy is evaluated by the matcher; defaults to `true`.
    #[serde(default)]
    pub enabled: Option<bool>,
    /// Conjunctive match criteria.
    pub match_pattern: MatchPattern,
    /// Optional parameters consumed by the recommended action.
    #[serde(default)]
    pub action_params: Option<serde_json::Value>,
    /// Free-form tags; defaults to an empty list.
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}
