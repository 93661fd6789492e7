//! A stress policy: every callee is a candidate, and discretionary candidates are accepted at
//! random, with smaller callees more likely to be accepted.

use super::{
    discretionary::DiscretionaryPolicy, model::forward_to_discretionary, InlinePolicy,
    LegalPolicy, PolicyEnv,
};
use crate::{
    config::DataLevel,
    log::{self, Verbosity},
    method::MethodInfo,
    observation::InlineObservation,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::io::{self, Write};

/// The percentage chance that a discretionary candidate of `il_size` bytes is accepted.
fn accept_percentage(il_size: u32) -> u32 {
    match il_size {
        0..=16 => 75,
        17..=30 => 50,
        31..=40 => 40,
        41..=50 => 30,
        51..=75 => 20,
        76..=100 => 10,
        101..=200 => 5,
        _ => 1,
    }
}

#[derive(Debug)]
pub(crate) struct RandomPolicy {
    discretionary: DiscretionaryPolicy,
}

impl RandomPolicy {
    pub(super) const NAME: &'static str = "RandomPolicy";

    pub(crate) fn new(env: PolicyEnv) -> Self {
        Self {
            discretionary: DiscretionaryPolicy::new(env),
        }
    }
}

impl InlinePolicy for RandomPolicy {
    forward_to_discretionary!();

    fn note_int(&mut self, obs: InlineObservation, value: i32) {
        self.discretionary.note_int(obs, value);
    }

    fn determine_profitability(&mut self, method_info: &MethodInfo) {
        let p = &mut self.discretionary;
        if p.default.settled() {
            return;
        }
        if p.default.over_budget() {
            p.default
                .legal
                .set_failure(InlineObservation::CallsiteOverBudget);
            return;
        }
        if p.env().data_level != DataLevel::Off {
            p.observe_and_estimate(method_info);
        }

        let threshold = accept_percentage(p.default.code_size);
        let r = StdRng::seed_from_u64(p.env().random_seed).gen_range(1..=100);
        if r > threshold {
            if log::enabled(Verbosity::InlineDecision) {
                log::log(
                    Verbosity::InlineDecision,
                    &format!("random rejection (r={r} > t={threshold})"),
                );
            }
            p.default.legal.reject(
                InlineObservation::CalleeRandomReject,
                InlineObservation::CallsiteRandomReject,
            );
        } else {
            if log::enabled(Verbosity::InlineDecision) {
                log::log(
                    Verbosity::InlineDecision,
                    &format!("random acceptance (r={r} <= t={threshold})"),
                );
            }
            p.default.legal.accept(
                InlineObservation::CalleeRandomAccept,
                InlineObservation::CallsiteRandomAccept,
            );
        }
    }
}
