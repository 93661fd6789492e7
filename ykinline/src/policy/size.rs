//! Accepts a candidate only if the method, with this and every earlier inline, would be no
//! bigger than it was before any inlining.

use super::{
    discretionary::DiscretionaryPolicy, model::forward_to_discretionary, InlinePolicy,
    LegalPolicy, PolicyEnv, SIZE_SCALE,
};
use crate::{
    log::{self, Verbosity},
    method::MethodInfo,
    observation::InlineObservation,
};
use std::io::{self, Write};

#[derive(Debug)]
pub(crate) struct SizePolicy {
    discretionary: DiscretionaryPolicy,
}

impl SizePolicy {
    pub(super) const NAME: &'static str = "SizePolicy";

    pub(crate) fn new(env: PolicyEnv) -> Self {
        Self {
            discretionary: DiscretionaryPolicy::new(env),
        }
    }
}

impl InlinePolicy for SizePolicy {
    forward_to_discretionary!();

    fn note_int(&mut self, obs: InlineObservation, value: i32) {
        self.discretionary.note_int(obs, value);
    }

    fn determine_profitability(&mut self, method_info: &MethodInfo) {
        let p = &mut self.discretionary;
        if p.default.settled() {
            return;
        }
        p.observe_and_estimate(method_info);
        let env = p.env();
        let initial = env.initial_size_estimate;
        let proposed = env.current_size_estimate + p.model_code_size_estimate;
        if log::enabled(Verbosity::InlineDecision) {
            log::log(
                Verbosity::InlineDecision,
                &format!(
                    "size estimate: initial {}, proposed {}",
                    f64::from(initial) / f64::from(SIZE_SCALE),
                    f64::from(proposed) / f64::from(SIZE_SCALE)
                ),
            );
        }
        if proposed <= initial {
            p.default.legal.accept(
                InlineObservation::CalleeIsSizeDecreasingInline,
                InlineObservation::CallsiteIsSizeDecreasingInline,
            );
        } else {
            p.default.legal.reject(
                InlineObservation::CalleeNotProfitableInline,
                InlineObservation::CallsiteNotProfitableInline,
            );
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        method::{MethodHandle, Opcode},
        observation::InlineDecision,
        testing::{test_env, Callee},
    };

    fn env(initial: i32, current: i32) -> PolicyEnv {
        let mut env = test_env();
        env.initial_size_estimate = initial;
        env.current_size_estimate = current;
        env
    }

    #[test]
    fn shrinking_inline_is_accepted() {
        let callee = Callee::new(MethodHandle(2), 20)
            .opcodes(&[Opcode::Ldarg, Opcode::Ldfld, Opcode::Ret])
            .with_this();
        let mut p = SizePolicy::new(env(1000, 1000));
        callee.drive(&mut p);
        assert!(p.code_size_estimate() <= 0);
        assert_eq!(p.decision(), InlineDecision::Success);
        assert_eq!(
            p.observation(),
            InlineObservation::CallsiteIsSizeDecreasingInline
        );
    }

    #[test]
    fn growth_is_paid_for_by_earlier_shrinkage() {
        let callee = Callee::new(MethodHandle(2), 60).opcodes(&[Opcode::Call; 20]);
        let mut p = SizePolicy::new(env(1000, 1000));
        callee.clone().drive(&mut p);
        assert!(p.code_size_estimate() > 0);
        assert_eq!(p.decision(), InlineDecision::Failure);
        assert_eq!(
            p.observation(),
            InlineObservation::CallsiteNotProfitableInline
        );

        let mut p = SizePolicy::new(env(1000, -100_000));
        callee.drive(&mut p);
        assert_eq!(p.decision(), InlineDecision::Success);
    }
}
