//! The extended default policy: the default policy's size/benefit trade-off, informed by a
//! richer set of observations about constant folding opportunities, struct traffic and profile
//! data.

use super::{
    default::{DefaultPolicy, Multiplier},
    xattr, InlinePolicy, LegalPolicy, PolicyEnv,
};
use crate::{method::MethodInfo, observation::InlineObservation};
use std::io::{self, Write};

/// Callers with more locals than this start to discourage inlining.
const CALLER_LOCALS_THRESHOLD: u32 = 64;

#[derive(Debug, Default)]
struct Features {
    profile_frequency: f64,
    binary_expr_with_cns: u32,
    arg_casted: u32,
    arg_is_struct_by_value: u32,
    fld_access_over_arg_struct: u32,
    foldable_box: u32,
    intrinsic: u32,
    backward_jump: u32,
    throw_block: u32,
    arg_is_exact_cls: u32,
    arg_is_exact_cls_sig_is_not: u32,
    arg_is_const: u32,
    arg_is_boxed_at_callsite: u32,
    foldable_intrinsic: u32,
    foldable_expr: u32,
    foldable_expr_un: u32,
    foldable_branch: u32,
    foldable_switch: u32,
    switch: u32,
    div_by_cns: u32,
    caller_locals: u32,
    returns_struct_by_value: bool,
    is_from_value_class: bool,
    non_generic_calls_generic: bool,
    is_callsite_in_no_return_region: bool,
    has_profile: bool,
}

impl Features {
    fn multiplier(&self, d: &DefaultPolicy) -> f64 {
        let prejit = d.env.is_prejit_root;
        let mut m = Multiplier::default();
        m.add(d.is_instance_ctor, 1.5, "instance constructor");
        m.add(self.is_from_value_class, 3.0, "method of a value class");
        if self.returns_struct_by_value {
            m.add(true, 2.0, "returns a struct by value");
        } else if self.arg_is_struct_by_value > 0 {
            m.add(true, 2.0, "struct arg passed by value");
        } else {
            m.add(
                self.fld_access_over_arg_struct > 0,
                1.0,
                "field access over struct arg",
            );
        }
        m.add(d.looks_like_wrapper_method, 1.0, "looks like a wrapper");
        m.add(d.method_is_mostly_load_store, 3.0, "mostly loads and stores");
        m.add(d.arg_feeds_range_check > 0, 1.0, "arg feeds range check");
        m.add(
            self.non_generic_calls_generic,
            2.0,
            "non-generic caller calls generic callee",
        );
        if self.foldable_branch > 0 {
            m.add(
                true,
                3.0 + f64::from(self.foldable_branch),
                "foldable branches",
            );
        } else if d.constant_arg_feeds_constant_test > 0 {
            m.add(true, 3.0, "constant arg feeds a conditional");
        } else {
            m.add(
                self.arg_is_const > 0 && self.foldable_expr < 1,
                3.0,
                "constant args",
            );
        }
        m.add(
            self.foldable_box > 0 && self.non_generic_calls_generic,
            3.0,
            "foldable box",
        );
        m.add(
            d.has_simd,
            d.env.tuning.simd_multiplier,
            "SIMD args, locals or return value",
        );
        m.add(
            self.intrinsic > 0,
            1.0 + f64::from(self.intrinsic) * 0.3,
            "intrinsic calls",
        );
        m.add(
            self.arg_is_boxed_at_callsite > 0,
            0.5,
            "arg boxed at call site",
        );
        m.add(
            self.arg_is_exact_cls_sig_is_not > 0,
            2.5,
            "exact class arg where the signature is not",
        );
        m.add(
            self.foldable_intrinsic > 0,
            1.0 + f64::from(self.foldable_intrinsic),
            "foldable intrinsics",
        );
        m.add(
            self.foldable_expr > 0,
            1.0 + f64::from(self.foldable_expr),
            "foldable binary expressions",
        );
        m.add(
            self.foldable_expr_un > 0,
            f64::from(self.foldable_expr_un),
            "foldable unary expressions",
        );
        m.add(self.div_by_cns > 0, 3.0, "divides by a constant arg");
        if self.binary_expr_with_cns > 0 {
            // Some foldable expressions can't be detected, so count potential constant tests.
            m.add(
                true,
                f64::from(self.binary_expr_with_cns) * 0.5,
                "binary expressions with constants",
            );
            // Prejit roots don't see their call sites, so assume constants are passed.
            m.add(
                prejit,
                f64::from(self.binary_expr_with_cns),
                "prejit root has binary expressions with constants",
            );
        }
        if d.arg_feeds_constant_test > 0 {
            m.add(
                true,
                if prejit { 3.0 } else { 1.0 },
                "arg feeds a constant test",
            );
        } else {
            m.add(
                prejit && d.arg_feeds_test > 0,
                3.0,
                "prejit root has arg feeding a conditional",
            );
        }
        m.frequency(d.callsite_frequency);
        if self.foldable_switch > 0 {
            m.add(true, 6.0, "foldable switches");
        } else if self.switch > 0 {
            if prejit {
                m.add(true, 6.0, "prejit root has switches");
            } else {
                m.set(true, 0.0, "non-foldable switches");
            }
        }
        if self.has_profile {
            let trust = f64::from(d.env.tuning.profile_trust) / 10.0;
            let scale = f64::from(d.env.tuning.profile_scale) / 10.0;
            let freq = self.profile_frequency.min(1.0) * scale;
            if d.env.has_trusted_profile {
                m.scale(true, (1.0 - trust) + freq, "trusted profile frequency");
            } else {
                m.scale(true, freq, "profile frequency");
            }
        }
        if self.caller_locals > CALLER_LOCALS_THRESHOLD {
            let fullness = (f64::from(self.caller_locals)
                / f64::from(d.env.tuning.max_locals_to_track))
            .min(1.0);
            m.scale(true, 1.0 - fullness, "caller has many locals");
        }
        m.scale(self.backward_jump > 0, 0.7, "backward jumps");
        // Throw helpers aren't recognised yet, so calls feeding a throw are kept out of line.
        m.set(
            self.is_callsite_in_no_return_region,
            1.0,
            "call site in a no-return region",
        );
        m.add(
            d.env.tuning.additional_multiplier != 0.0,
            d.env.tuning.additional_multiplier,
            "additional multiplier",
        );
        m.0
    }
}

#[derive(Debug)]
pub(crate) struct ExtendedDefaultPolicy {
    default: DefaultPolicy,
    features: Features,
}

impl ExtendedDefaultPolicy {
    pub(super) const NAME: &'static str = "ExtendedDefaultPolicy";

    pub(crate) fn new(env: PolicyEnv) -> Self {
        Self {
            default: DefaultPolicy::new(env),
            features: Features::default(),
        }
    }
}

impl InlinePolicy for ExtendedDefaultPolicy {
    fn legal(&self) -> &LegalPolicy {
        &self.default.legal
    }

    fn legal_mut(&mut self) -> &mut LegalPolicy {
        &mut self.default.legal
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn note_bool(&mut self, obs: InlineObservation, value: bool) {
        let f = &mut self.features;
        match obs {
            InlineObservation::CalleeReturnsStruct => f.returns_struct_by_value = value,
            InlineObservation::CalleeClassValuetype => f.is_from_value_class = value,
            InlineObservation::CallsiteNongenericCallsGeneric => {
                f.non_generic_calls_generic = value
            }
            InlineObservation::CalleeBinaryExprWithCns => f.binary_expr_with_cns += 1,
            InlineObservation::CalleeArgStruct => f.arg_is_struct_by_value += 1,
            InlineObservation::CalleeArgStructFieldAccess => f.fld_access_over_arg_struct += 1,
            InlineObservation::CalleeArgFeedsCast => f.arg_casted += 1,
            InlineObservation::CalleeFoldableBox => f.foldable_box += 1,
            InlineObservation::CalleeIntrinsic => f.intrinsic += 1,
            InlineObservation::CalleeBackwardJump => f.backward_jump += 1,
            InlineObservation::CalleeThrowBlock => f.throw_block += 1,
            InlineObservation::CallsiteArgExactCls => f.arg_is_exact_cls += 1,
            InlineObservation::CallsiteArgBoxed => f.arg_is_boxed_at_callsite += 1,
            InlineObservation::CallsiteArgConst => f.arg_is_const += 1,
            InlineObservation::CallsiteArgExactClsSigIsNot => f.arg_is_exact_cls_sig_is_not += 1,
            InlineObservation::CallsiteFoldableIntrinsic => f.foldable_intrinsic += 1,
            InlineObservation::CallsiteFoldableExpr => f.foldable_expr += 1,
            InlineObservation::CallsiteFoldableExprUn => f.foldable_expr_un += 1,
            InlineObservation::CallsiteFoldableBranch => f.foldable_branch += 1,
            InlineObservation::CallsiteFoldableSwitch => f.foldable_switch += 1,
            InlineObservation::CalleeHasSwitch => f.switch += 1,
            InlineObservation::CallsiteDivByCns => f.div_by_cns += 1,
            InlineObservation::CallsiteHasProfile => f.has_profile = value,
            InlineObservation::CallsiteInNoreturnRegion => {
                f.is_callsite_in_no_return_region = value
            }
            _ => self.default.note_bool(obs, value),
        }
    }

    fn note_int(&mut self, obs: InlineObservation, value: i32) {
        match obs {
            InlineObservation::CalleeIlCodeSize => {
                let tuning = &self.default.env.tuning;
                let max = if self.features.has_profile && self.default.env.has_trusted_profile {
                    tuning.extended_max_il_profile
                } else {
                    tuning.extended_max_il
                };
                self.default.note_il_size(value, Some(max));
            }
            InlineObservation::CalleeNumberOfBasicBlocks => {
                let d = &mut self.default;
                let f = &self.features;
                let blocks = u32::try_from(value).unwrap_or(u32::MAX);
                if !d.is_force_inline && d.is_no_return && blocks == 1 {
                    d.legal.set_never(InlineObservation::CalleeDoesNotReturn);
                } else if !d.is_force_inline
                    && !f.has_profile
                    && !d.const_arg_feeds_is_known_const
                    && !d.arg_feeds_is_known_const
                {
                    let mut limit = d.env.tuning.extended_max_basic_blocks;
                    if d.env.is_prejit_root {
                        // Arg-specific foldable branches can't be seen without a call site.
                        limit += 5 + f.switch * 10;
                    }
                    limit += f.foldable_branch + f.foldable_switch * 10;
                    if blocks > limit {
                        d.legal
                            .set_never(InlineObservation::CalleeTooManyBasicBlocks);
                    }
                }
            }
            InlineObservation::CallerNumberOfLocals => {
                self.features.caller_locals = u32::try_from(value).unwrap_or(0);
            }
            _ => self.default.note_int(obs, value),
        }
    }

    fn note_double(&mut self, obs: InlineObservation, value: f64) {
        debug_assert_eq!(obs, InlineObservation::CallsiteProfileFrequency);
        self.features.profile_frequency = value;
    }

    fn determine_profitability(&mut self, method_info: &MethodInfo) {
        let features = &self.features;
        self.default
            .determine_profitability_with(method_info, |d| features.multiplier(d));
    }

    fn budget_check(&self) -> bool {
        self.default.budget_check()
    }

    fn propagate_never_to_runtime(&self) -> bool {
        self.default.propagate_never_to_runtime()
    }

    fn code_size_estimate(&self) -> i32 {
        self.default.code_size_estimate()
    }

    fn on_dump_xml(&self, w: &mut dyn Write) -> io::Result<()> {
        self.default.on_dump_xml(w)?;
        let f = &self.features;
        xattr(w, "ProfileFrequency", f.profile_frequency)?;
        xattr(w, "BinaryExprWithCns", f.binary_expr_with_cns)?;
        xattr(w, "ArgCasted", f.arg_casted)?;
        xattr(w, "ArgIsStructByValue", f.arg_is_struct_by_value)?;
        xattr(w, "FldAccessOverArgStruct", f.fld_access_over_arg_struct)?;
        xattr(w, "FoldableBox", f.foldable_box)?;
        xattr(w, "Intrinsic", f.intrinsic)?;
        xattr(w, "BackwardJump", f.backward_jump)?;
        xattr(w, "ThrowBlock", f.throw_block)?;
        xattr(w, "ArgIsExactCls", f.arg_is_exact_cls)?;
        xattr(w, "ArgIsExactClsSigIsNot", f.arg_is_exact_cls_sig_is_not)?;
        xattr(w, "ArgIsConst", f.arg_is_const)?;
        xattr(w, "ArgIsBoxedAtCallsite", f.arg_is_boxed_at_callsite)?;
        xattr(w, "FoldableIntrinsic", f.foldable_intrinsic)?;
        xattr(w, "FoldableExpr", f.foldable_expr)?;
        xattr(w, "FoldableExprUn", f.foldable_expr_un)?;
        xattr(w, "FoldableBranch", f.foldable_branch)?;
        xattr(w, "FoldableSwitch", f.foldable_switch)?;
        xattr(w, "Switch", f.switch)?;
        xattr(w, "DivByCns", f.div_by_cns)?;
        xattr(w, "ReturnsStructByValue", f.returns_struct_by_value)?;
        xattr(w, "IsFromValueClass", f.is_from_value_class)?;
        xattr(w, "NonGenericCallsGeneric", f.non_generic_calls_generic)?;
        xattr(
            w,
            "IsCallsiteInNoReturnRegion",
            f.is_callsite_in_no_return_region,
        )?;
        xattr(w, "HasProfile", f.has_profile)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        method::{MethodHandle, Opcode},
        observation::{CallsiteFrequency, InlineDecision},
        testing::{test_env, Callee},
    };

    fn policy() -> ExtendedDefaultPolicy {
        ExtendedDefaultPolicy::new(test_env())
    }

    fn multiplier(p: &ExtendedDefaultPolicy) -> f64 {
        p.features.multiplier(&p.default)
    }

    #[test]
    fn larger_il_limit() {
        let mut p = policy();
        p.note_bool(InlineObservation::CalleeIsForceInline, false);
        p.note_int(InlineObservation::CalleeIlCodeSize, 128);
        assert_eq!(
            p.observation(),
            InlineObservation::CalleeIsDiscretionaryInline
        );

        let mut p = policy();
        p.note_bool(InlineObservation::CalleeIsForceInline, false);
        p.note_int(InlineObservation::CalleeIlCodeSize, 129);
        assert_eq!(p.observation(), InlineObservation::CalleeTooMuchIl);

        // Trusted profile data raises the limit further.
        let mut env = test_env();
        env.has_trusted_profile = true;
        let mut p = ExtendedDefaultPolicy::new(env);
        p.note_bool(InlineObservation::CallsiteHasProfile, true);
        p.note_bool(InlineObservation::CalleeIsForceInline, false);
        p.note_int(InlineObservation::CalleeIlCodeSize, 1024);
        assert_eq!(
            p.observation(),
            InlineObservation::CalleeIsDiscretionaryInline
        );
    }

    #[test]
    fn basic_block_limit() {
        let blocks = |p: &mut ExtendedDefaultPolicy, n| {
            p.note_bool(InlineObservation::CalleeIsForceInline, false);
            p.note_bool(InlineObservation::CalleeDoesNotReturn, false);
            p.note_int(InlineObservation::CalleeNumberOfBasicBlocks, n);
        };
        let mut p = policy();
        blocks(&mut p, 7);
        assert_eq!(p.decision(), InlineDecision::Undecided);
        let mut p = policy();
        blocks(&mut p, 8);
        assert_eq!(
            p.observation(),
            InlineObservation::CalleeTooManyBasicBlocks
        );

        // Foldable branches and switches each raise the limit.
        let mut p = policy();
        p.note_bool(InlineObservation::CallsiteFoldableBranch, true);
        p.note_bool(InlineObservation::CallsiteFoldableSwitch, true);
        blocks(&mut p, 18);
        assert_eq!(p.decision(), InlineDecision::Undecided);

        // As does knowing an arg is constant.
        let mut p = policy();
        p.note_bool(InlineObservation::CalleeArgFeedsIsconst, true);
        blocks(&mut p, 100);
        assert_eq!(p.decision(), InlineDecision::Undecided);
    }

    #[test]
    fn multipliers() {
        let mut p = policy();
        p.default.callsite_frequency = CallsiteFrequency::Boring;
        assert_eq!(multiplier(&p), 1.3);

        p.note_bool(InlineObservation::CallsiteFoldableBranch, true);
        p.note_bool(InlineObservation::CallsiteFoldableBranch, true);
        assert_eq!(multiplier(&p), 5.0 + 1.3);

        // Non-foldable switches rule out a benefit.
        p.note_bool(InlineObservation::CalleeHasSwitch, true);
        assert_eq!(multiplier(&p), 0.0);

        let mut p = policy();
        p.default.callsite_frequency = CallsiteFrequency::Loop;
        p.note_bool(InlineObservation::CallsiteDivByCns, true);
        p.note_bool(InlineObservation::CalleeBackwardJump, true);
        assert_eq!(multiplier(&p), 6.0 * 0.7);
        p.note_bool(InlineObservation::CallsiteInNoreturnRegion, true);
        assert_eq!(multiplier(&p), 1.0);
    }

    #[test]
    fn caller_locals_and_profile() {
        let mut p = policy();
        p.default.callsite_frequency = CallsiteFrequency::Warm;
        p.note_int(InlineObservation::CallerNumberOfLocals, 512);
        assert_eq!(multiplier(&p), 1.0);
        p.note_int(InlineObservation::CallerNumberOfLocals, 2048);
        assert_eq!(multiplier(&p), 0.0);

        let mut p = policy();
        p.default.callsite_frequency = CallsiteFrequency::Warm;
        p.note_bool(InlineObservation::CallsiteHasProfile, true);
        p.note_double(InlineObservation::CallsiteProfileFrequency, 0.5);
        let m = multiplier(&p);
        assert!((m - 2.0 * 0.5 * 4.2).abs() < 1e-9, "{m}");
    }

    #[test]
    fn foldable_callee_is_profitable() {
        // Too big for the default policy's heuristics, but the constant folding opportunities
        // pay for it.
        let ops = [Opcode::Ldarg, Opcode::LdcI4, Opcode::Ceq, Opcode::BrCond, Opcode::Call]
            .repeat(3);
        let mut p = policy();
        p.note_bool(InlineObservation::CallsiteFoldableBranch, true);
        p.note_bool(InlineObservation::CallsiteFoldableBranch, true);
        p.note_bool(InlineObservation::CallsiteFoldableBranch, true);
        Callee::new(MethodHandle(2), 40).opcodes(&ops).drive(&mut p);
        assert_eq!(p.decision(), InlineDecision::Success);

        let mut p = DefaultPolicy::new(test_env());
        Callee::new(MethodHandle(2), 40).opcodes(&ops).drive(&mut p);
        assert_eq!(p.decision(), InlineDecision::Failure);
    }

    #[test]
    fn xml() {
        let p = policy();
        let mut buf = Vec::new();
        p.dump_xml(&mut buf, 0).unwrap();
        let s = String::from_utf8(buf).unwrap();
        assert!(s.starts_with("<ExtendedDefaultPolicy Multiplier=\"0\""));
        assert!(s.contains(" ProfileFrequency=\"0\" BinaryExprWithCns=\"0\""));
        assert!(s.ends_with(" HasProfile=\"false\" />\n"));
    }
}
