// flightrec-core/src/resolver.rs
// ============================================================================
// Module: Resolver
// Description: Composite read view combining a trace with its steps and
//              verdicts.
// Purpose: Give diff, fork, evaluator, and guardrail components a single
//          consumption point instead of re-querying the repository.
// Dependencies: crate::{trace, step, evaluation}
// ============================================================================

//! ## Overview
//! `ResolvedTrace` is the object every repository `get_trace` call returns.
//! Steps are ordered by `step_number` ascending; verdicts are ordered by
//! `evaluated_at` descending, matching the repository contract.

use crate::evaluation::Verdict;
use crate::step::Step;
use crate::trace::Trace;

/// A trace together with its ordered steps and verdicts.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTrace {
    /// The trace row itself.
    pub trace: Trace,
    /// Steps ordered by `step_number` ascending.
    pub steps: Vec<Step>,
    /// Verdicts ordered by `evaluated_at` descending.
    pub verdicts: Vec<Verdict>,
}

impl ResolvedTrace {
    /// Returns the step at the given step number, if present.
    #[must_use]
    pub fn step(&self, step_number: u32) -> Option<&Step> {
        self.steps.iter().find(|step| step.step_number == step_number)
    }

    /// Returns the highest step number present, if any.
    #[must_use]
    pub fn max_step_number(&self) -> Option<u32> {
        self.steps.iter().map(|step| step.step_number).max()
    }
}
