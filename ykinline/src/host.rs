//! The interface to the host runtime that embeds the JIT.

use crate::{method::MethodHandle, observation::InlineDecision};
use strum::Display;

/// The outcome of an inlining evaluation, as reported to the host.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum InlineReport {
    #[strum(to_string = "success")]
    Pass,
    #[strum(to_string = "failed this call site")]
    Failure,
    #[strum(to_string = "failed this callee")]
    Never,
}

impl InlineReport {
    /// Map a terminal decision to a report. Returns `None` if `decision` is not yet decided.
    pub fn from_decision(decision: InlineDecision) -> Option<Self> {
        match decision {
            InlineDecision::Success => Some(InlineReport::Pass),
            InlineDecision::Failure => Some(InlineReport::Failure),
            InlineDecision::Never => Some(InlineReport::Never),
            InlineDecision::Undecided | InlineDecision::Candidate => None,
        }
    }
}

/// The host runtime: a source of method identities and a sink for inlining outcomes.
///
/// Reporting is fire-and-forget: nothing here can fail from the point of view of the inliner.
pub trait JitHost {
    /// A human readable name for `method`, used only in dumps.
    fn method_name(&self, method: MethodHandle) -> String;

    /// The metadata token of `method`.
    fn method_token(&self, method: MethodHandle) -> u32;

    /// A hash of `method` that is stable across runs.
    fn method_hash(&self, method: MethodHandle) -> u32;

    /// Record that `callee` can never be inlined, so that future evaluations of it fail fast. This
    /// is the only method attribute the inliner ever writes.
    fn mark_never_inline(&self, callee: MethodHandle);

    /// Report the outcome of one evaluation.
    fn report_inlining_decision(
        &self,
        caller: MethodHandle,
        callee: Option<MethodHandle>,
        report: InlineReport,
        reason: &str,
    );
}
