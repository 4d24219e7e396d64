// flightrec-core/src/snapshot.rs
// ============================================================================
// Module: Snapshot
// Description: Frozen auxiliary state attached to a single step.
// Purpose: Define the Snapshot entity and its ingest input.
// Dependencies: serde, serde_json, crate::ids
// ============================================================================

//! ## Overview
//! At most one snapshot exists per step. A snapshot freezes the context
//! window, environment, and tool state visible to the agent at that point
//! in the trace.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;

use crate::ids::SnapshotId;
use crate::ids::StepId;

/// Frozen auxiliary state captured at a single step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Opaque snapshot identifier.
    pub id: SnapshotId,
    /// Owning step identifier; unique (at most one snapshot per step).
    pub step_id: StepId,
    /// Opaque context-window payload, typically messages and token counts.
    pub context_window: Value,
    /// Environment visible to the agent at this point.
    pub environment: Value,
    /// Tool state visible to the agent at this point.
    pub tool_state: Value,
    /// Token count recorded for the context window.
    pub token_count: u64,
}

/// Caller-supplied input for a snapshot attached to a step.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SnapshotInput {
    /// Opaque context-window payload; defaults to `{}`.
    #[serde(default)]
    pub context_window: Option<Value>,
    /// Environment visible to the agent; defaults to `{}`.
    #[serde(default)]
    pub environment: Option<Value>,
    /// Tool state visible to the agent; defaults to `{}`.
    #[serde(default)]
    pub tool_state: Option<Value>,
    /// Token count recorded for the context window; defaults to 0.
    #[serde(default)]
    pub token_count: Option<u64>,
}

impl SnapshotInput {
    /// Returns the context window, defaulting to an empty object.
    #[must_use]
    pub fn context_window_or_default(&self) -> Value {
        self.context_window.clone().unwrap_or_else(|| json!({}))
    }

    /// Returns the environment, defaulting to an empty object.
    #[must_use]
    pub fn environment_or_default(&self) -> Value {
        self.environment.clone().unwrap_or_else(|| json!({}))
    }

    /// Returns the tool state, defaulting to an empty object.
    #[must_use]
    pub fn tool_state_or_default(&self) -> Value {
        self.tool_state.clone().unwrap_or_else(|| json!({}))
    }
}
