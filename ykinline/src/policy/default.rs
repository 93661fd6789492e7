//! The default policy: a legacy size/benefit trade-off. A discretionary candidate is inlined if
//! its estimated native size is no bigger than the size of the call it replaces, scaled by a
//! multiplier that rewards features suggesting the inline will enable further optimisation.

use super::{sizemodel::CodeSeqModel, xattr, InlinePolicy, LegalPolicy, PolicyEnv, SIZE_SCALE};
use crate::{
    log::{self, Verbosity},
    method::{CorType, MethodInfo, Opcode, TARGET_POINTER_SIZE},
    observation::{CallsiteFrequency, InlineImpact, InlineObservation},
};
use std::io::{self, Write};

#[derive(Debug)]
pub(crate) struct DefaultPolicy {
    pub(super) legal: LegalPolicy,
    pub(super) env: PolicyEnv,
    pub(super) size_model: Option<CodeSeqModel>,
    /// Is the time budget enforced at the end of the opcode scan?
    pub(super) check_budget: bool,
    pub(super) multiplier: f64,
    pub(super) code_size: u32,
    pub(super) callsite_frequency: CallsiteFrequency,
    pub(super) callsite_depth: u32,
    pub(super) instruction_count: u32,
    pub(super) load_store_count: u32,
    pub(super) arg_feeds_test: u32,
    pub(super) arg_feeds_constant_test: u32,
    pub(super) arg_feeds_range_check: u32,
    pub(super) constant_arg_feeds_constant_test: u32,
    pub(super) callee_native_size_estimate: i32,
    pub(super) callsite_native_size_estimate: i32,
    pub(super) is_force_inline: bool,
    pub(super) is_force_inline_known: bool,
    pub(super) is_instance_ctor: bool,
    pub(super) is_from_promotable_value_class: bool,
    pub(super) has_simd: bool,
    pub(super) looks_like_wrapper_method: bool,
    pub(super) method_is_mostly_load_store: bool,
    pub(super) callsite_is_in_try_region: bool,
    pub(super) callsite_is_in_loop: bool,
    pub(super) is_no_return: bool,
    pub(super) is_no_return_known: bool,
    pub(super) const_arg_feeds_is_known_const: bool,
    pub(super) arg_feeds_is_known_const: bool,
}

impl DefaultPolicy {
    pub(super) const NAME: &'static str = "DefaultPolicy";

    pub(crate) fn new(env: PolicyEnv) -> Self {
        Self {
            legal: LegalPolicy::new(env.is_prejit_root),
            env,
            size_model: None,
            check_budget: true,
            multiplier: 0.0,
            code_size: 0,
            callsite_frequency: CallsiteFrequency::Unused,
            callsite_depth: 0,
            instruction_count: 0,
            load_store_count: 0,
            arg_feeds_test: 0,
            arg_feeds_constant_test: 0,
            arg_feeds_range_check: 0,
            constant_arg_feeds_constant_test: 0,
            callee_native_size_estimate: 0,
            callsite_native_size_estimate: 0,
            is_force_inline: false,
            is_force_inline_known: false,
            is_instance_ctor: false,
            is_from_promotable_value_class: false,
            has_simd: false,
            looks_like_wrapper_method: false,
            method_is_mostly_load_store: false,
            callsite_is_in_try_region: false,
            callsite_is_in_loop: false,
            is_no_return: false,
            is_no_return_known: false,
            const_arg_feeds_is_known_const: false,
            arg_feeds_is_known_const: false,
        }
    }

    /// Record the callee's IL size and update candidacy. Callees no bigger than `max_size` are
    /// discretionary candidates; if `max_size` is `None` every callee is.
    pub(super) fn note_il_size(&mut self, value: i32, max_size: Option<u32>) {
        debug_assert!(self.is_force_inline_known);
        debug_assert!(value > 0);
        self.code_size = u32::try_from(value).unwrap_or(0);
        if self.is_force_inline {
            self.legal
                .set_candidate(InlineObservation::CalleeIsForceInline);
            return;
        }
        match max_size {
            None => self
                .legal
                .set_candidate(InlineObservation::CalleeIsDiscretionaryInline),
            Some(_) if self.code_size <= self.env.tuning.always_inline_size => self
                .legal
                .set_candidate(InlineObservation::CalleeBelowAlwaysInlineSize),
            Some(max) if self.code_size <= max => self
                .legal
                .set_candidate(InlineObservation::CalleeIsDiscretionaryInline),
            Some(_) => self.legal.set_never(InlineObservation::CalleeTooMuchIl),
        }
    }

    /// Record an opcode from the callee's IL stream.
    pub(super) fn note_opcode(&mut self, obs: InlineObservation, value: i32) {
        self.instruction_count += 1;
        let op = opcode(value);
        if let Some(m) = self.size_model.as_mut() {
            m.run(op, obs == InlineObservation::CalleeOpcodeNormed);
        }
        if op.is_load_store() {
            self.load_store_count += 1;
        }
    }

    fn end_opcode_scan(&mut self) {
        if let Some(m) = self.size_model.as_mut() {
            m.end();
        }
        // A mostly load/store method allows for a call, a return and one other instruction, which
        // a percentage alone would not.
        if self.instruction_count - self.load_store_count < 4
            || f64::from(self.load_store_count) / f64::from(self.instruction_count) > 0.9
        {
            self.method_is_mostly_load_store = true;
        }
        // The budget is checked here rather than when the IL size is noted so that a candidate
        // accepted while scanning for candidates can't later exceed the budget.
        if self.over_budget() {
            self.legal
                .set_failure(InlineObservation::CallsiteOverBudget);
        }
    }

    /// Would this inline exceed the time budget? Force inlines at depth 1 are exempt.
    pub(super) fn over_budget(&self) -> bool {
        if !self.check_budget || self.env.is_prejit_root || !self.env.over_budget(self.code_size) {
            return false;
        }
        debug_assert!(self.is_force_inline_known);
        if self.is_force_inline && self.callsite_depth == 1 {
            log::log(
                Verbosity::InlineTrace,
                "allowing over-budget top-level force inline",
            );
            return false;
        }
        true
    }

    pub(super) fn determine_multiplier(&self) -> f64 {
        let mut m = Multiplier::default();
        m.add(self.is_instance_ctor, 1.5, "instance constructor");
        m.add(
            self.is_from_promotable_value_class,
            3.0,
            "method of a promotable struct",
        );
        m.add(
            self.has_simd,
            self.env.tuning.simd_multiplier,
            "SIMD args, locals or return value",
        );
        m.add(self.looks_like_wrapper_method, 1.0, "looks like a wrapper");
        m.add(
            self.arg_feeds_constant_test > 0,
            1.0,
            "arg feeds a constant test",
        );
        m.add(
            self.method_is_mostly_load_store,
            3.0,
            "mostly loads and stores",
        );
        m.add(self.arg_feeds_range_check > 0, 0.5, "arg feeds range check");
        if self.constant_arg_feeds_constant_test > 0 {
            m.add(true, 3.0, "constant arg feeds a conditional");
        } else {
            // Prejit roots don't see their call sites, so optimistically assume constants.
            m.add(
                self.env.is_prejit_root
                    && (self.arg_feeds_constant_test > 0 || self.arg_feeds_test > 0),
                3.0,
                "prejit root has arg feeding a conditional",
            );
        }
        m.frequency(self.callsite_frequency);
        m.add(
            self.env.tuning.additional_multiplier != 0.0,
            self.env.tuning.additional_multiplier,
            "additional multiplier",
        );
        m.0
    }

    /// The estimated native size of the callee's body, in bytes * [SIZE_SCALE]. Zero if the size
    /// model never ran.
    pub(super) fn native_size_estimate(&self) -> i32 {
        self.size_model.as_ref().map_or(0, |m| m.native_size())
    }

    /// The estimated native size of the call being replaced, in bytes * [SIZE_SCALE].
    pub(super) fn callsite_native_size_estimate(method_info: &MethodInfo) -> i32 {
        // A direct call takes 5 bytes, an indirect call 6.
        let mut size = 55;
        if method_info.has_this {
            size += 30;
        }
        for arg in &method_info.args {
            if arg.ty == CorType::ValueClass {
                // Address the struct, then push each pointer-sized slot.
                size += 10;
                size += i32::try_from(arg.size.div_ceil(TARGET_POINTER_SIZE) * 20).unwrap_or(0);
            } else {
                size += 30;
            }
        }
        size
    }

    /// Settle an inline that needs no profitability screen: a failure stays failed, and a
    /// candidate that isn't discretionary (a force inline or a callee below the always-inline
    /// size) succeeds. Returns `true` if nothing is left to decide.
    pub(super) fn settled(&mut self) -> bool {
        if self.legal.decision().is_failure() {
            return true;
        }
        if self.legal.observation() != InlineObservation::CalleeIsDiscretionaryInline {
            self.legal.note_success();
            return true;
        }
        false
    }

    /// Decide profitability using `multiplier` to weigh the callee's size against the call's.
    /// Force inlines and small callees succeed without further analysis.
    pub(super) fn determine_profitability_with(
        &mut self,
        method_info: &MethodInfo,
        multiplier: impl FnOnce(&Self) -> f64,
    ) {
        if self.settled() {
            return;
        }
        if self.env.over_inline_limit() {
            self.legal
                .set_failure(InlineObservation::CallsiteOverInlineLimit);
            return;
        }

        self.callee_native_size_estimate = self.native_size_estimate();
        self.callsite_native_size_estimate = Self::callsite_native_size_estimate(method_info);
        self.multiplier = multiplier(self);
        let threshold = (f64::from(self.callsite_native_size_estimate) * self.multiplier) as i32;
        let scale = f64::from(SIZE_SCALE);
        if self.callee_native_size_estimate > threshold {
            if log::enabled(Verbosity::InlineDecision) {
                log::log(
                    Verbosity::InlineDecision,
                    &format!(
                        "native size estimate exceeds threshold: {} > {} (multiplier = {})",
                        f64::from(self.callee_native_size_estimate) / scale,
                        f64::from(threshold) / scale,
                        self.multiplier
                    ),
                );
            }
            self.legal.reject(
                InlineObservation::CalleeNotProfitableInline,
                InlineObservation::CallsiteNotProfitableInline,
            );
        } else {
            if log::enabled(Verbosity::InlineDecision) {
                log::log(
                    Verbosity::InlineDecision,
                    &format!(
                        "native size estimate within threshold: {} <= {} (multiplier = {})",
                        f64::from(self.callee_native_size_estimate) / scale,
                        f64::from(threshold) / scale,
                        self.multiplier
                    ),
                );
            }
            self.legal.accept(
                InlineObservation::CalleeIsProfitableInline,
                InlineObservation::CallsiteIsProfitableInline,
            );
        }
    }
}

impl InlinePolicy for DefaultPolicy {
    fn legal(&self) -> &LegalPolicy {
        &self.legal
    }

    fn legal_mut(&mut self) -> &mut LegalPolicy {
        &mut self.legal
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn note_bool(&mut self, obs: InlineObservation, value: bool) {
        let impact = obs.impact();
        debug_assert_ne!(impact, InlineImpact::Fatal);
        if impact != InlineImpact::Information {
            self.legal.note_internal(obs);
            return;
        }
        match obs {
            InlineObservation::CalleeIsForceInline => {
                debug_assert!(!self.is_force_inline_known || self.is_force_inline == value);
                self.is_force_inline = value;
                self.is_force_inline_known = true;
            }
            InlineObservation::CalleeIsInstanceCtor => self.is_instance_ctor = value,
            InlineObservation::CalleeClassPromotable => {
                self.is_from_promotable_value_class = value
            }
            InlineObservation::CallsiteInTryRegion => self.callsite_is_in_try_region = value,
            InlineObservation::CalleeHasSimd => self.has_simd = value,
            InlineObservation::CalleeLooksLikeWrapper => self.looks_like_wrapper_method = value,
            InlineObservation::CalleeArgFeedsTest => self.arg_feeds_test += 1,
            InlineObservation::CalleeArgFeedsConstantTest => self.arg_feeds_constant_test += 1,
            InlineObservation::CalleeArgFeedsRangeCheck => self.arg_feeds_range_check += 1,
            InlineObservation::CalleeConstArgFeedsIsconst => {
                self.const_arg_feeds_is_known_const = true
            }
            InlineObservation::CalleeArgFeedsIsconst => self.arg_feeds_is_known_const = true,
            InlineObservation::CalleeUnsupportedOpcode => self.legal.note_internal(obs),
            InlineObservation::CallsiteConstantArgFeedsTest => {
                // Prejit roots know nothing about their callers.
                debug_assert!(!self.env.is_prejit_root);
                self.constant_arg_feeds_constant_test += 1;
            }
            InlineObservation::CalleeBeginOpcodeScan => {
                if self.legal.decision().is_candidate()
                    && self.legal.observation() == InlineObservation::CalleeIsDiscretionaryInline
                {
                    debug_assert!(self.size_model.is_none());
                    self.size_model = Some(CodeSeqModel::new());
                }
            }
            InlineObservation::CalleeEndOpcodeScan => self.end_opcode_scan(),
            InlineObservation::CallsiteInLoop => self.callsite_is_in_loop = true,
            InlineObservation::CalleeDoesNotReturn => {
                self.is_no_return = value;
                self.is_no_return_known = true;
            }
            InlineObservation::CallsiteRareGcStruct => {
                // Zeroing a GC struct in the root's prolog costs more than a rare call saves.
                match self.legal.observation() {
                    InlineObservation::CalleeBelowAlwaysInlineSize
                    | InlineObservation::CalleeIsDiscretionaryInline => {
                        self.legal.set_failure(obs)
                    }
                    _ => (),
                }
            }
            InlineObservation::CalleeHasPinnedLocals if self.callsite_is_in_try_region => {
                // Unpinning would need a try/finally around the inlined body.
                self.legal
                    .set_failure(InlineObservation::CallsitePinInTryRegion);
            }
            _ => (),
        }
    }

    fn note_int(&mut self, obs: InlineObservation, value: i32) {
        match obs {
            InlineObservation::CalleeMaxstack => {
                debug_assert!(self.is_force_inline_known);
                let max_stack = u32::try_from(value).unwrap_or(u32::MAX);
                if !self.is_force_inline && max_stack > self.env.tuning.small_stack_size {
                    self.legal
                        .set_never(InlineObservation::CalleeMaxstackTooBig);
                }
            }
            InlineObservation::CalleeNumberOfBasicBlocks => {
                debug_assert!(self.is_force_inline_known);
                debug_assert!(self.is_no_return_known);
                debug_assert!(value > 0);
                let blocks = u32::try_from(value).unwrap_or(u32::MAX);
                // Force inline overrides does-not-return. Only single block throw helpers are
                // rejected, so that loops doing real work still benefit.
                if !self.is_force_inline && self.is_no_return && blocks == 1 {
                    self.legal
                        .set_never(InlineObservation::CalleeDoesNotReturn);
                } else if !self.is_force_inline && blocks > self.env.tuning.max_basic_blocks {
                    self.legal
                        .set_never(InlineObservation::CalleeTooManyBasicBlocks);
                }
            }
            InlineObservation::CalleeIlCodeSize => {
                let max = self.env.max_inline_size;
                self.note_il_size(value, Some(max));
            }
            InlineObservation::CallsiteDepth => {
                self.callsite_depth = u32::try_from(value).unwrap_or(0);
                if self.callsite_depth > self.env.max_inline_depth {
                    self.legal.set_failure(InlineObservation::CallsiteIsTooDeep);
                }
            }
            InlineObservation::CalleeOpcode | InlineObservation::CalleeOpcodeNormed => {
                self.note_opcode(obs, value)
            }
            InlineObservation::CallsiteFrequency => {
                debug_assert_eq!(self.callsite_frequency, CallsiteFrequency::Unused);
                self.callsite_frequency = frequency(value);
                debug_assert_ne!(self.callsite_frequency, CallsiteFrequency::Unused);
            }
            _ => (),
        }
    }

    fn note_double(&mut self, obs: InlineObservation, _value: f64) {
        debug_assert_eq!(obs, InlineObservation::CallsiteProfileFrequency);
    }

    fn determine_profitability(&mut self, method_info: &MethodInfo) {
        self.determine_profitability_with(method_info, Self::determine_multiplier);
    }

    fn budget_check(&self) -> bool {
        self.over_budget()
    }

    fn propagate_never_to_runtime(&self) -> bool {
        // A no-return callee must be re-analysed at each call site so that the call is marked
        // as not returning.
        self.legal.observation() != InlineObservation::CalleeDoesNotReturn
    }

    fn code_size_estimate(&self) -> i32 {
        if self.size_model.is_some() {
            self.callee_native_size_estimate - self.callsite_native_size_estimate
        } else {
            0
        }
    }

    fn on_dump_xml(&self, w: &mut dyn Write) -> io::Result<()> {
        xattr(w, "Multiplier", self.multiplier)?;
        xattr(w, "CodeSize", self.code_size)?;
        xattr(w, "CallsiteFrequency", self.callsite_frequency as u8)?;
        xattr(w, "CallsiteDepth", self.callsite_depth)?;
        xattr(w, "InstructionCount", self.instruction_count)?;
        xattr(w, "LoadStoreCount", self.load_store_count)?;
        xattr(w, "ArgFeedsTest", self.arg_feeds_test)?;
        xattr(w, "ArgFeedsConstantTest", self.arg_feeds_constant_test)?;
        xattr(w, "ArgFeedsRangeCheck", self.arg_feeds_range_check)?;
        xattr(
            w,
            "ConstantArgFeedsConstantTest",
            self.constant_arg_feeds_constant_test,
        )?;
        xattr(
            w,
            "CalleeNativeSizeEstimate",
            self.callee_native_size_estimate,
        )?;
        xattr(
            w,
            "CallsiteNativeSizeEstimate",
            self.callsite_native_size_estimate,
        )?;
        xattr(w, "IsForceInline", self.is_force_inline)?;
        xattr(w, "IsInstanceCtor", self.is_instance_ctor)?;
        xattr(
            w,
            "IsFromPromotableValueClass",
            self.is_from_promotable_value_class,
        )?;
        xattr(w, "HasSimd", self.has_simd)?;
        xattr(w, "LooksLikeWrapperMethod", self.looks_like_wrapper_method)?;
        xattr(w, "MethodIsMostlyLoadStore", self.method_is_mostly_load_store)?;
        xattr(w, "CallsiteIsInTryRegion", self.callsite_is_in_try_region)?;
        xattr(w, "CallsiteIsInLoop", self.callsite_is_in_loop)?;
        xattr(w, "IsNoReturn", self.is_no_return)
    }
}

/// A profitability multiplier under construction, traced as it changes.
#[derive(Debug, Default)]
pub(super) struct Multiplier(pub(super) f64);

impl Multiplier {
    pub(super) fn add(&mut self, cond: bool, by: f64, why: &str) {
        if cond {
            self.0 += by;
            self.trace(why);
        }
    }

    pub(super) fn scale(&mut self, cond: bool, by: f64, why: &str) {
        if cond {
            self.0 *= by;
            self.trace(why);
        }
    }

    /// Overwrite the multiplier, discarding what has been accumulated so far.
    pub(super) fn set(&mut self, cond: bool, to: f64, why: &str) {
        if cond {
            self.0 = to;
            self.trace(why);
        }
    }

    /// Adjust for how often the call site executes.
    pub(super) fn frequency(&mut self, freq: CallsiteFrequency) {
        match freq {
            CallsiteFrequency::Rare => self.set(true, 1.3, "call site is rare"),
            CallsiteFrequency::Boring => self.add(true, 1.3, "call site is boring"),
            CallsiteFrequency::Warm => self.add(true, 2.0, "call site is warm"),
            CallsiteFrequency::Loop => self.add(true, 3.0, "call site is in a loop"),
            CallsiteFrequency::Hot => self.add(true, 3.0, "call site is hot"),
            CallsiteFrequency::Unused => debug_assert!(false, "call site frequency not noted"),
        }
    }

    fn trace(&self, why: &str) {
        if log::enabled(Verbosity::InlineTrace) {
            log::log(
                Verbosity::InlineTrace,
                &format!("{why}: multiplier now {}", self.0),
            );
        }
    }
}

/// Decode an opcode noted as an integer.
///
/// # Panics
///
/// If `value` is not an [Opcode]: the importer and the policies disagree about the encoding.
pub(super) fn opcode(value: i32) -> Opcode {
    u8::try_from(value)
        .ok()
        .and_then(Opcode::from_repr)
        .unwrap_or_else(|| panic!("invalid opcode {value}"))
}

/// Decode a call site frequency noted as an integer.
///
/// # Panics
///
/// If `value` is not a [CallsiteFrequency].
pub(super) fn frequency(value: i32) -> CallsiteFrequency {
    u8::try_from(value)
        .ok()
        .and_then(CallsiteFrequency::from_repr)
        .unwrap_or_else(|| panic!("invalid call site frequency {value}"))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        method::{ArgInfo, MethodHandle},
        observation::InlineDecision,
        testing::{test_env, Callee},
    };

    fn policy() -> DefaultPolicy {
        DefaultPolicy::new(test_env())
    }

    #[test]
    fn il_size_candidacy() {
        let mut p = policy();
        p.note_bool(InlineObservation::CalleeIsForceInline, false);
        p.note_int(InlineObservation::CalleeIlCodeSize, 16);
        assert_eq!(
            p.observation(),
            InlineObservation::CalleeBelowAlwaysInlineSize
        );

        let mut p = policy();
        p.note_bool(InlineObservation::CalleeIsForceInline, false);
        p.note_int(InlineObservation::CalleeIlCodeSize, 100);
        assert_eq!(
            p.observation(),
            InlineObservation::CalleeIsDiscretionaryInline
        );

        let mut p = policy();
        p.note_bool(InlineObservation::CalleeIsForceInline, false);
        p.note_int(InlineObservation::CalleeIlCodeSize, 101);
        assert_eq!(p.decision(), InlineDecision::Never);
        assert_eq!(p.observation(), InlineObservation::CalleeTooMuchIl);
        assert!(p.propagate_never_to_runtime());

        let mut p = policy();
        p.note_bool(InlineObservation::CalleeIsForceInline, true);
        p.note_int(InlineObservation::CalleeIlCodeSize, 5000);
        assert_eq!(p.observation(), InlineObservation::CalleeIsForceInline);
    }

    #[test]
    fn maxstack_and_blocks() {
        let mut p = policy();
        p.note_bool(InlineObservation::CalleeIsForceInline, false);
        p.note_int(InlineObservation::CalleeMaxstack, 17);
        assert_eq!(p.observation(), InlineObservation::CalleeMaxstackTooBig);

        let mut p = policy();
        p.note_bool(InlineObservation::CalleeIsForceInline, false);
        p.note_bool(InlineObservation::CalleeDoesNotReturn, true);
        p.note_int(InlineObservation::CalleeNumberOfBasicBlocks, 1);
        assert_eq!(p.decision(), InlineDecision::Never);
        assert_eq!(p.observation(), InlineObservation::CalleeDoesNotReturn);
        assert!(!p.propagate_never_to_runtime());

        let mut p = policy();
        p.note_bool(InlineObservation::CalleeIsForceInline, false);
        p.note_bool(InlineObservation::CalleeDoesNotReturn, false);
        p.note_int(InlineObservation::CalleeNumberOfBasicBlocks, 6);
        assert_eq!(
            p.observation(),
            InlineObservation::CalleeTooManyBasicBlocks
        );

        let mut p = policy();
        p.note_bool(InlineObservation::CalleeIsForceInline, true);
        p.note_bool(InlineObservation::CalleeDoesNotReturn, true);
        p.note_int(InlineObservation::CalleeNumberOfBasicBlocks, 1);
        assert_eq!(p.decision(), InlineDecision::Undecided);
    }

    #[test]
    fn returning_callee_stays_candidate() {
        let mut p = policy();
        p.note_bool(InlineObservation::CalleeIsForceInline, false);
        p.note_int(InlineObservation::CalleeIlCodeSize, 30);
        p.note_bool(InlineObservation::CalleeDoesNotReturn, false);
        assert_eq!(p.decision(), InlineDecision::Candidate);
        assert!(p.is_no_return_known);
        assert!(!p.is_no_return);
        p.note_int(InlineObservation::CalleeNumberOfBasicBlocks, 1);
        assert_eq!(p.decision(), InlineDecision::Candidate);
        assert_eq!(
            p.observation(),
            InlineObservation::CalleeIsDiscretionaryInline
        );
    }

    #[test]
    fn always_and_force_inlines_skip_the_size_model() {
        for callee in [
            Callee::new(MethodHandle(2), 10),
            Callee::new(MethodHandle(3), 40).force_inline(),
        ] {
            let mut p = policy();
            callee.drive(&mut p);
            assert_eq!(p.decision(), InlineDecision::Success);
            assert_eq!(p.multiplier, 0.0);
            assert!(p.size_model.is_none());
            assert_eq!(p.code_size_estimate(), 0);
        }
    }

    #[test]
    fn depth() {
        let mut p = policy();
        p.note_int(InlineObservation::CallsiteDepth, 21);
        assert_eq!(p.decision(), InlineDecision::Failure);
        assert_eq!(p.observation(), InlineObservation::CallsiteIsTooDeep);
    }

    #[test]
    fn pinned_locals_in_try() {
        let mut p = policy();
        p.note_bool(InlineObservation::CalleeHasPinnedLocals, true);
        assert_eq!(p.decision(), InlineDecision::Undecided);
        p.note_bool(InlineObservation::CallsiteInTryRegion, true);
        p.note_bool(InlineObservation::CalleeHasPinnedLocals, true);
        assert_eq!(p.observation(), InlineObservation::CallsitePinInTryRegion);
    }

    #[test]
    fn unsupported_opcode_propagates() {
        let mut p = policy();
        p.note_bool(InlineObservation::CalleeUnsupportedOpcode, true);
        assert_eq!(p.decision(), InlineDecision::Never);
    }

    #[test]
    fn callsite_size() {
        let mut mi = MethodInfo::new(MethodHandle(1), 20);
        assert_eq!(DefaultPolicy::callsite_native_size_estimate(&mi), 55);
        mi.has_this = true;
        mi.args = vec![ArgInfo::new(CorType::Int), ArgInfo::value_class(12)];
        assert_eq!(
            DefaultPolicy::callsite_native_size_estimate(&mi),
            55 + 30 + 30 + 10 + 2 * 20
        );
    }

    #[test]
    fn multiplier() {
        let mut p = policy();
        p.callsite_frequency = CallsiteFrequency::Boring;
        assert_eq!(p.determine_multiplier(), 1.3);
        p.is_instance_ctor = true;
        p.method_is_mostly_load_store = true;
        p.callsite_frequency = CallsiteFrequency::Loop;
        assert_eq!(p.determine_multiplier(), 1.5 + 3.0 + 3.0);
        // Rare call sites cap the multiplier.
        p.callsite_frequency = CallsiteFrequency::Rare;
        assert_eq!(p.determine_multiplier(), 1.3);
    }

    #[test]
    fn small_getter_is_profitable() {
        let callee = Callee::new(MethodHandle(2), 30)
            .opcodes(&[Opcode::Ldarg, Opcode::Ldfld, Opcode::Ret])
            .with_this();
        let mut p = policy();
        callee.drive(&mut p);
        assert_eq!(p.decision(), InlineDecision::Success);
        assert_eq!(
            p.observation(),
            InlineObservation::CallsiteIsProfitableInline
        );
        assert_eq!(p.code_size_estimate(), 35 - 85);
    }

    #[test]
    fn big_body_is_unprofitable() {
        let ops = [Opcode::Newobj, Opcode::Call, Opcode::Box, Opcode::Throw].repeat(4);
        let callee = Callee::new(MethodHandle(2), 60).opcodes(&ops);
        let mut p = policy();
        callee.drive(&mut p);
        assert_eq!(p.decision(), InlineDecision::Failure);
        assert_eq!(
            p.observation(),
            InlineObservation::CallsiteNotProfitableInline
        );
    }

    #[test]
    fn inline_limit() {
        let mut env = test_env();
        env.inline_limit = Some(0);
        let mut p = DefaultPolicy::new(env);
        Callee::new(MethodHandle(2), 30)
            .opcodes(&[Opcode::Ldarg, Opcode::Ret])
            .drive(&mut p);
        assert_eq!(p.observation(), InlineObservation::CallsiteOverInlineLimit);

        // Small callees aren't subject to the limit.
        let mut env = test_env();
        env.inline_limit = Some(0);
        let mut p = DefaultPolicy::new(env);
        Callee::new(MethodHandle(2), 10).drive(&mut p);
        assert_eq!(p.decision(), InlineDecision::Success);
    }

    #[test]
    fn over_budget() {
        let mut env = test_env();
        env.time_estimate = 210;
        env.time_budget = 2100;
        let mut p = DefaultPolicy::new(env.clone());
        Callee::new(MethodHandle(2), 1000)
            .force_inline()
            .depth(2)
            .drive(&mut p);
        assert_eq!(p.decision(), InlineDecision::Failure);
        assert_eq!(p.observation(), InlineObservation::CallsiteOverBudget);

        // A top-level force inline may exceed the budget.
        let mut p = DefaultPolicy::new(env);
        Callee::new(MethodHandle(2), 1000)
            .force_inline()
            .depth(1)
            .drive(&mut p);
        assert_eq!(p.decision(), InlineDecision::Success);
        assert_eq!(p.observation(), InlineObservation::CalleeIsForceInline);
    }

    #[test]
    fn xml() {
        let p = policy();
        let mut buf = Vec::new();
        p.dump_xml(&mut buf, 2).unwrap();
        let s = String::from_utf8(buf).unwrap();
        assert!(s.starts_with("  <DefaultPolicy Multiplier=\"0\" CodeSize=\"0\""));
        assert!(s.ends_with(" IsNoReturn=\"false\" />\n"));
    }
}
