//! Inlines everything it legally can, up to the configured depth and size limits, ignoring the
//! time budget.

use super::{
    discretionary::DiscretionaryPolicy, model::forward_to_discretionary, InlinePolicy,
    LegalPolicy, PolicyEnv,
};
use crate::{
    log::{self, Verbosity},
    method::MethodInfo,
    observation::InlineObservation,
};
use std::io::{self, Write};

#[derive(Debug)]
pub(crate) struct FullPolicy {
    discretionary: DiscretionaryPolicy,
}

impl FullPolicy {
    pub(super) const NAME: &'static str = "FullPolicy";

    pub(crate) fn new(env: PolicyEnv) -> Self {
        let mut discretionary = DiscretionaryPolicy::new(env);
        discretionary.default.check_budget = false;
        Self { discretionary }
    }
}

impl InlinePolicy for FullPolicy {
    forward_to_discretionary!();

    fn note_int(&mut self, obs: InlineObservation, value: i32) {
        self.discretionary.note_int(obs, value);
    }

    fn determine_profitability(&mut self, _method_info: &MethodInfo) {
        let d = &mut self.discretionary.default;
        if d.settled() {
            return;
        }
        if d.callsite_depth > d.env.max_inline_depth {
            log::log(Verbosity::InlineDecision, "call site is too deep");
            d.legal.set_failure(InlineObservation::CallsiteIsTooDeep);
            return;
        }
        if d.code_size > d.env.max_inline_size {
            log::log(Verbosity::InlineDecision, "callee is too big");
            d.legal.set_failure(InlineObservation::CalleeTooMuchIl);
            return;
        }
        d.legal.accept(
            InlineObservation::CalleeIsProfitableInline,
            InlineObservation::CallsiteIsProfitableInline,
        );
    }
}
