//! Policies that decide profitability with the discretionary policy's fitted code size and
//! performance models, rather than the default policy's multiplier heuristic.

use super::{
    discretionary::DiscretionaryPolicy, InlinePolicy, LegalPolicy, PolicyEnv, SIZE_SCALE,
};
use crate::{
    log::{self, Verbosity},
    method::MethodInfo,
    observation::{CallsiteFrequency, InlineObservation},
};
use std::io::{self, Write};

/// The benefit a [ModelPolicy] candidate must exceed.
const MODEL_BENEFIT_THRESHOLD: f64 = 0.20;

/// Accept `p` if the models predict it shrinks the code. Returns `true` if it was accepted.
fn accept_if_size_decreasing(p: &mut DiscretionaryPolicy) -> bool {
    if p.model_code_size_estimate > 0 {
        return false;
    }
    if log::enabled(Verbosity::InlineDecision) {
        log::log(
            Verbosity::InlineDecision,
            &format!(
                "inline profitable, will decrease code size by {} bytes",
                f64::from(-p.model_code_size_estimate) / f64::from(SIZE_SCALE)
            ),
        );
    }
    p.default.legal.accept(
        InlineObservation::CalleeIsSizeDecreasingInline,
        InlineObservation::CallsiteIsSizeDecreasingInline,
    );
    true
}

/// The instructions saved per call, per byte of code added.
fn per_call_benefit(p: &DiscretionaryPolicy) -> f64 {
    -(f64::from(p.per_call_instruction_estimate) / f64::from(p.model_code_size_estimate))
}

fn accept_or_reject(p: &mut DiscretionaryPolicy, benefit: f64, threshold: f64) {
    let should_inline = benefit > threshold;
    if log::enabled(Verbosity::InlineDecision) {
        log::log(
            Verbosity::InlineDecision,
            &format!(
                "inline {} profitable: benefit={benefit} (per call={}, size={})",
                if should_inline { "is" } else { "is not" },
                f64::from(p.per_call_instruction_estimate) / f64::from(SIZE_SCALE),
                f64::from(p.model_code_size_estimate) / f64::from(SIZE_SCALE)
            ),
        );
    }
    if should_inline {
        p.default.legal.accept(
            InlineObservation::CalleeIsProfitableInline,
            InlineObservation::CallsiteIsProfitableInline,
        );
    } else {
        p.default.legal.reject(
            InlineObservation::CalleeNotProfitableInline,
            InlineObservation::CallsiteNotProfitableInline,
        );
    }
}

/// Forward the [InlinePolicy] methods that a model-driven policy doesn't change to its
/// discretionary policy.
macro_rules! forward_to_discretionary {
    () => {
        fn legal(&self) -> &LegalPolicy {
            self.discretionary.legal()
        }

        fn legal_mut(&mut self) -> &mut LegalPolicy {
            self.discretionary.legal_mut()
        }

        fn name(&self) -> &'static str {
            Self::NAME
        }

        fn note_bool(&mut self, obs: InlineObservation, value: bool) {
            self.discretionary.note_bool(obs, value);
        }

        fn note_double(&mut self, obs: InlineObservation, value: f64) {
            self.discretionary.note_double(obs, value);
        }

        fn budget_check(&self) -> bool {
            self.discretionary.budget_check()
        }

        fn propagate_never_to_runtime(&self) -> bool {
            self.discretionary.propagate_never_to_runtime()
        }

        fn code_size_estimate(&self) -> i32 {
            self.discretionary.code_size_estimate()
        }

        fn dump_schema(&self, w: &mut dyn Write) -> io::Result<()> {
            self.discretionary.dump_schema(w)
        }

        fn dump_data(&self, w: &mut dyn Write) -> io::Result<()> {
            self.discretionary.dump_data(w)
        }

        fn on_dump_xml(&self, w: &mut dyn Write) -> io::Result<()> {
            self.discretionary.on_dump_xml(w)
        }
    };
}
#[cfg(feature = "ykd")]
pub(super) use forward_to_discretionary;

/// Inlines a candidate if the code size model predicts it shrinks the code, or if the
/// performance model's per-call saving, weighted by call site frequency, pays for its size.
#[derive(Debug)]
pub(crate) struct ModelPolicy {
    discretionary: DiscretionaryPolicy,
}

impl ModelPolicy {
    pub(super) const NAME: &'static str = "ModelPolicy";

    pub(crate) fn new(env: PolicyEnv) -> Self {
        Self {
            discretionary: DiscretionaryPolicy::new(env),
        }
    }
}

impl InlinePolicy for ModelPolicy {
    forward_to_discretionary!();

    fn note_int(&mut self, obs: InlineObservation, value: i32) {
        self.discretionary.note_int(obs, value);
        if self.decision().is_failure() {
            return;
        }
        // Callees this big almost always have a size estimate no benefit can pay for, so reject
        // them before the opcode scan.
        let d = &mut self.discretionary.default;
        if !d.is_force_inline
            && obs == InlineObservation::CalleeIlCodeSize
            && u32::try_from(value).unwrap_or(u32::MAX) >= d.env.tuning.model_max_il
        {
            d.legal.set_never(InlineObservation::CalleeTooMuchIl);
        }
    }

    fn determine_profitability(&mut self, method_info: &MethodInfo) {
        let p = &mut self.discretionary;
        if p.default.settled() {
            return;
        }
        p.observe_and_estimate(method_info);
        if accept_if_size_decreasing(p) {
            return;
        }
        let weight = match p.default.callsite_frequency {
            CallsiteFrequency::Rare => 0.1,
            CallsiteFrequency::Boring => 1.0,
            CallsiteFrequency::Warm => 1.5,
            CallsiteFrequency::Loop | CallsiteFrequency::Hot => 3.0,
            CallsiteFrequency::Unused => {
                debug_assert!(false, "call site frequency not noted");
                1.0
            }
        };
        let benefit = weight * per_call_benefit(p);
        accept_or_reject(p, benefit, MODEL_BENEFIT_THRESHOLD);
    }
}

/// Like [ModelPolicy], but weighs the per-call benefit by the call site's profile frequency. Call
/// sites without profile data are never inlined.
#[derive(Debug)]
pub(crate) struct ProfilePolicy {
    discretionary: DiscretionaryPolicy,
}

impl ProfilePolicy {
    pub(super) const NAME: &'static str = "ProfilePolicy";

    pub(crate) fn new(env: PolicyEnv) -> Self {
        Self {
            discretionary: DiscretionaryPolicy::new(env),
        }
    }
}

impl InlinePolicy for ProfilePolicy {
    forward_to_discretionary!();

    fn note_int(&mut self, obs: InlineObservation, value: i32) {
        self.discretionary.note_int(obs, value);
        if self.decision().is_failure() {
            return;
        }
        let has_profile = self.discretionary.has_profile;
        let d = &mut self.discretionary.default;
        let value = u32::try_from(value).unwrap_or(u32::MAX);
        match obs {
            InlineObservation::CalleeIlCodeSize
                if !d.is_force_inline && value >= d.env.tuning.profile_max_il =>
            {
                d.legal.set_never(InlineObservation::CalleeTooMuchIl);
            }
            InlineObservation::CalleeNumberOfBasicBlocks => {
                debug_assert!(d.is_force_inline_known && d.is_no_return_known);
                if !d.is_force_inline && d.is_no_return && value == 1 {
                    d.legal.set_never(InlineObservation::CalleeDoesNotReturn);
                } else if !has_profile
                    && !d.is_force_inline
                    && value > d.env.tuning.max_basic_blocks
                {
                    d.legal
                        .set_never(InlineObservation::CalleeTooManyBasicBlocks);
                }
            }
            _ => (),
        }
    }

    fn determine_profitability(&mut self, method_info: &MethodInfo) {
        let p = &mut self.discretionary;
        if p.default.settled() {
            return;
        }
        if !p.has_profile {
            p.default
                .legal
                .set_failure(InlineObservation::CallsiteNotProfitableInline);
            return;
        }
        p.observe_and_estimate(method_info);
        if accept_if_size_decreasing(p) {
            return;
        }
        let benefit = per_call_benefit(p) * p.profile_frequency;
        let threshold = f64::from(p.env().tuning.profile_threshold) / 256.0;
        accept_or_reject(p, benefit, threshold);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        method::{CorType, MethodHandle, Opcode},
        observation::InlineDecision,
        testing::{test_env, Callee},
    };

    #[test]
    fn model_il_limit() {
        let mut p = ModelPolicy::new(test_env());
        p.note_bool(InlineObservation::CalleeIsForceInline, false);
        p.note_int(InlineObservation::CalleeIlCodeSize, 120);
        assert_eq!(p.decision(), InlineDecision::Never);
        assert_eq!(p.observation(), InlineObservation::CalleeTooMuchIl);

        let mut p = ModelPolicy::new(test_env());
        p.note_bool(InlineObservation::CalleeIsForceInline, true);
        p.note_int(InlineObservation::CalleeIlCodeSize, 120);
        assert_eq!(p.observation(), InlineObservation::CalleeIsForceInline);
    }

    #[test]
    fn model_size_decreasing() {
        // Small callees with few features have a negative size estimate.
        let mut p = ModelPolicy::new(test_env());
        Callee::new(MethodHandle(2), 20)
            .opcodes(&[Opcode::Ldarg, Opcode::Ret])
            .drive(&mut p);
        assert!(p.code_size_estimate() <= 0);
        assert_eq!(p.decision(), InlineDecision::Success);
        assert_eq!(
            p.observation(),
            InlineObservation::CallsiteIsSizeDecreasingInline
        );
    }

    #[test]
    fn model_benefit() {
        // Calls and static loads grow the size estimate enough that only a frequently executed
        // call site makes the per-call saving worthwhile.
        let ops = [Opcode::Call, Opcode::Ldsfld, Opcode::Call, Opcode::Ldsfld, Opcode::Ret];
        let callee = Callee::new(MethodHandle(2), 40).opcodes(&ops);

        let mut p = ModelPolicy::new(test_env());
        callee.clone().drive(&mut p);
        assert!(p.code_size_estimate() > 0);
        assert_eq!(p.decision(), InlineDecision::Failure);
        assert_eq!(
            p.observation(),
            InlineObservation::CallsiteNotProfitableInline
        );

        let mut p = ModelPolicy::new(test_env());
        callee
            .clone()
            .frequency(CallsiteFrequency::Loop)
            .drive(&mut p);
        assert_eq!(p.decision(), InlineDecision::Success);
        assert_eq!(
            p.observation(),
            InlineObservation::CallsiteIsProfitableInline
        );

        // With a bool fourth argument the performance model predicts no per-call saving.
        let mut p = ModelPolicy::new(test_env());
        callee
            .args(&[CorType::Int, CorType::Int, CorType::Int, CorType::Bool])
            .frequency(CallsiteFrequency::Loop)
            .drive(&mut p);
        assert_eq!(p.decision(), InlineDecision::Failure);
    }

    #[test]
    fn profile_needs_profile_data() {
        let mut p = ProfilePolicy::new(test_env());
        Callee::new(MethodHandle(2), 20)
            .opcodes(&[Opcode::Ldarg, Opcode::Ret])
            .drive(&mut p);
        assert_eq!(p.decision(), InlineDecision::Failure);
        assert_eq!(
            p.observation(),
            InlineObservation::CallsiteNotProfitableInline
        );

        let mut p = ProfilePolicy::new(test_env());
        p.note_bool(InlineObservation::CallsiteHasProfile, true);
        p.note_double(InlineObservation::CallsiteProfileFrequency, 1.0);
        Callee::new(MethodHandle(2), 20)
            .opcodes(&[Opcode::Ldarg, Opcode::Ret])
            .drive(&mut p);
        assert_eq!(p.decision(), InlineDecision::Success);
    }

    #[test]
    fn profile_limits() {
        let mut p = ProfilePolicy::new(test_env());
        p.note_bool(InlineObservation::CalleeIsForceInline, false);
        p.note_int(InlineObservation::CalleeIlCodeSize, 999);
        assert_eq!(p.decision(), InlineDecision::Candidate);
        p.note_bool(InlineObservation::CalleeDoesNotReturn, false);
        p.note_int(InlineObservation::CalleeNumberOfBasicBlocks, 6);
        assert_eq!(
            p.observation(),
            InlineObservation::CalleeTooManyBasicBlocks
        );

        let mut p = ProfilePolicy::new(test_env());
        p.note_bool(InlineObservation::CallsiteHasProfile, true);
        p.note_bool(InlineObservation::CalleeIsForceInline, false);
        p.note_int(InlineObservation::CalleeIlCodeSize, 999);
        p.note_bool(InlineObservation::CalleeDoesNotReturn, false);
        p.note_int(InlineObservation::CalleeNumberOfBasicBlocks, 6);
        assert_eq!(p.decision(), InlineDecision::Candidate);
        p.note_int(InlineObservation::CalleeIlCodeSize, 1000);
        assert_eq!(p.observation(), InlineObservation::CalleeTooMuchIl);
    }
}
