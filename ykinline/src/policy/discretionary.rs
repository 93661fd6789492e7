//! The discretionary policy: every callee that is not ruled out is a discretionary candidate,
//! and a broad set of features is recorded for each. Profitability is still decided by the
//! default policy's heuristic; the recorded features and the code size and performance models
//! estimated from them exist to feed the model, profile and diagnostic policies, and the data
//! dump.

use super::{default::DefaultPolicy, InlinePolicy, LegalPolicy, PolicyEnv, MAX_ARGS, SIZE_SCALE};
use crate::{
    method::{CorType, MethodInfo, Opcode, TARGET_POINTER_SIZE},
    observation::{CallsiteFrequency, InlineObservation},
};
use std::io::{self, Write};
use strum::{EnumCount, EnumIter, IntoEnumIterator};

/// Opcodes binned by their rough impact on code generation.
#[repr(u8)]
#[derive(Clone, Copy, Debug, EnumCount, EnumIter, Eq, PartialEq)]
pub(super) enum OpcodeBin {
    ArgAccess,
    LocalAccess,
    IntConstant,
    FloatConstant,
    IntLoad,
    FloatLoad,
    IntStore,
    FloatStore,
    SimpleMath,
    ComplexMath,
    OverflowMath,
    IntArrayLoad,
    FloatArrayLoad,
    RefArrayLoad,
    StructArrayLoad,
    IntArrayStore,
    FloatArrayStore,
    RefArrayStore,
    StructArrayStore,
    StructOperation,
    ObjectModel,
    FieldLoad,
    FieldStore,
    StaticFieldLoad,
    StaticFieldStore,
    LoadAddress,
    Throw,
    Return,
    Call,
}

impl OpcodeBin {
    fn of(op: Opcode) -> Option<Self> {
        use Opcode::*;
        Some(match op {
            Ldarg | Starg => OpcodeBin::ArgAccess,
            Ldloc | Stloc => OpcodeBin::LocalAccess,
            Ldnull | LdcI4 => OpcodeBin::IntConstant,
            LdcR4 | LdcR8 => OpcodeBin::FloatConstant,
            LdindI => OpcodeBin::IntLoad,
            LdindR => OpcodeBin::FloatLoad,
            StindI => OpcodeBin::IntStore,
            StindR => OpcodeBin::FloatStore,
            Sub | And | Or | Xor | Shl | Shr | ShrUn | Neg | Not | ConvI => OpcodeBin::SimpleMath,
            Mul | Div | DivUn | Rem | RemUn | ConvR => OpcodeBin::ComplexMath,
            ConvOvf | AddOvf | MulOvf | SubOvf | Ckfinite => OpcodeBin::OverflowMath,
            LdelemI => OpcodeBin::IntArrayLoad,
            LdelemR => OpcodeBin::FloatArrayLoad,
            LdelemRef => OpcodeBin::RefArrayLoad,
            Ldelem => OpcodeBin::StructArrayLoad,
            StelemI => OpcodeBin::IntArrayStore,
            StelemR => OpcodeBin::FloatArrayStore,
            StelemRef => OpcodeBin::RefArrayStore,
            Stelem => OpcodeBin::StructArrayStore,
            Cpobj | Ldobj | Cpblk | Initblk | Stobj => OpcodeBin::StructOperation,
            Castclass | Isinst | Unbox | Box | UnboxAny | Ldftn | Ldvirtftn | Sizeof => {
                OpcodeBin::ObjectModel
            }
            Ldfld | Ldlen | Refanytype | Refanyval => OpcodeBin::FieldLoad,
            Stfld => OpcodeBin::FieldStore,
            Ldsfld => OpcodeBin::StaticFieldLoad,
            Stsfld => OpcodeBin::StaticFieldStore,
            Ldelema | Ldsflda | Ldflda | Ldstr | Ldarga | Ldloca => OpcodeBin::LoadAddress,
            Call | Calli | Callvirt | Newobj | Newarr | Jmp => OpcodeBin::Call,
            Throw | Rethrow => OpcodeBin::Throw,
            Ret => OpcodeBin::Return,
            _ => return None,
        })
    }
}

#[derive(Debug)]
pub(crate) struct DiscretionaryPolicy {
    pub(super) default: DefaultPolicy,
    pub(super) profile_frequency: f64,
    pub(super) has_profile: bool,
    block_count: u32,
    maxstack: u32,
    arg_count: u32,
    arg_type: [CorType; MAX_ARGS],
    arg_size: [u32; MAX_ARGS],
    local_count: u32,
    return_type: CorType,
    return_size: u32,
    bins: [u32; OpcodeBin::COUNT],
    callsite_weight: u32,
    is_class_ctor: bool,
    is_same_this: bool,
    caller_has_new_array: bool,
    caller_has_new_obj: bool,
    callee_has_gc_struct: bool,
    pub(super) model_code_size_estimate: i32,
    pub(super) per_call_instruction_estimate: i32,
}

impl DiscretionaryPolicy {
    pub(super) const NAME: &'static str = "DiscretionaryPolicy";

    pub(crate) fn new(env: PolicyEnv) -> Self {
        Self {
            default: DefaultPolicy::new(env),
            profile_frequency: 0.0,
            has_profile: false,
            block_count: 0,
            maxstack: 0,
            arg_count: 0,
            arg_type: [CorType::Undef; MAX_ARGS],
            arg_size: [0; MAX_ARGS],
            local_count: 0,
            return_type: CorType::Undef,
            return_size: 0,
            bins: [0; OpcodeBin::COUNT],
            callsite_weight: 0,
            is_class_ctor: false,
            is_same_this: false,
            caller_has_new_array: false,
            caller_has_new_obj: false,
            callee_has_gc_struct: false,
            model_code_size_estimate: 0,
            per_call_instruction_estimate: 0,
        }
    }

    pub(super) fn env(&self) -> &PolicyEnv {
        &self.default.env
    }

    fn bin(&self, bin: OpcodeBin) -> f64 {
        f64::from(self.bins[bin as usize])
    }

    /// Record the facts the importer doesn't observe directly: argument, local and return type
    /// information.
    pub(super) fn method_info_observations(&mut self, method_info: &MethodInfo) {
        self.local_count = method_info.locals;
        self.arg_count = u32::try_from(method_info.args.len()).unwrap_or(u32::MAX);

        let mut slots = Vec::with_capacity(MAX_ARGS);
        if method_info.has_this {
            slots.push((CorType::Class, TARGET_POINTER_SIZE));
            self.arg_count += 1;
        }
        if method_info.has_type_arg {
            slots.push((CorType::NativeInt, TARGET_POINTER_SIZE));
            self.arg_count += 1;
        }
        for arg in &method_info.args {
            if slots.len() == MAX_ARGS {
                break;
            }
            let size = match arg.ty {
                CorType::ValueClass => arg.size.next_multiple_of(TARGET_POINTER_SIZE),
                _ => TARGET_POINTER_SIZE,
            };
            slots.push((arg.ty, size));
        }
        slots.resize(MAX_ARGS, (CorType::Undef, 0));
        for (i, (ty, size)) in slots.into_iter().enumerate() {
            self.arg_type[i] = ty;
            self.arg_size[i] = size;
        }

        self.return_type = method_info.return_type;
        self.return_size = match method_info.return_type {
            CorType::ValueClass => method_info
                .return_size
                .next_multiple_of(TARGET_POINTER_SIZE),
            CorType::Void => 0,
            _ => TARGET_POINTER_SIZE,
        };
    }

    /// Estimate the change in code size, in bytes * [SIZE_SCALE], with a linear model fitted to
    /// measured inlines.
    pub(super) fn estimate_code_size(&mut self) {
        let d = &mut self.default;
        d.callee_native_size_estimate = d.native_size_estimate();
        let d = &self.default;
        let b = |bin: OpcodeBin| self.bin(bin);
        let size_estimate = -13.532
            + 0.359 * f64::from(d.callsite_frequency as u8)
            + -0.015 * f64::from(self.arg_count)
            + -1.553 * f64::from(self.arg_size[5])
            + 2.326 * f64::from(self.local_count)
            + 0.287 * f64::from(self.return_size)
            + 0.561 * b(OpcodeBin::IntConstant)
            + 1.932 * b(OpcodeBin::FloatConstant)
            + -0.822 * b(OpcodeBin::SimpleMath)
            + -7.591 * b(OpcodeBin::IntArrayLoad)
            + 4.784 * b(OpcodeBin::RefArrayLoad)
            + 12.778 * b(OpcodeBin::StructArrayLoad)
            + 1.452 * b(OpcodeBin::FieldLoad)
            + 8.811 * b(OpcodeBin::StaticFieldLoad)
            + 2.752 * b(OpcodeBin::StaticFieldStore)
            + -6.566 * b(OpcodeBin::Throw)
            + 6.021 * b(OpcodeBin::Call)
            + -0.238 * f64::from(u8::from(d.is_instance_ctor))
            + -5.357 * f64::from(u8::from(d.is_from_promotable_value_class))
            + -7.901 * f64::from(u8::from(d.constant_arg_feeds_constant_test > 0))
            + 0.065 * f64::from(d.callee_native_size_estimate);
        self.model_code_size_estimate = (f64::from(SIZE_SCALE) * size_estimate) as i32;
    }

    /// Estimate the per-call change in instructions executed, in instructions * [SIZE_SCALE]. A
    /// negative estimate means the inline saves work.
    pub(super) fn estimate_performance_impact(&mut self) {
        let freq = self.default.callsite_frequency;
        let per_call_savings_estimate = -7.35
            + if freq == CallsiteFrequency::Boring { 0.76 } else { 0.0 }
            + if freq == CallsiteFrequency::Loop { -2.02 } else { 0.0 }
            + if self.arg_type[0] == CorType::Class { 3.51 } else { 0.0 }
            + if self.arg_type[3] == CorType::Bool { 20.7 } else { 0.0 }
            + if self.arg_type[4] == CorType::Class { 0.38 } else { 0.0 }
            + if self.return_type == CorType::Class { 2.32 } else { 0.0 };
        self.per_call_instruction_estimate =
            (f64::from(SIZE_SCALE) * per_call_savings_estimate) as i32;
    }

    /// Make the method info observations and run both models.
    pub(super) fn observe_and_estimate(&mut self, method_info: &MethodInfo) {
        self.method_info_observations(method_info);
        self.estimate_code_size();
        self.estimate_performance_impact();
    }
}

impl InlinePolicy for DiscretionaryPolicy {
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
        match obs {
            InlineObservation::CalleeIsClassCtor => self.is_class_ctor = value,
            InlineObservation::CallsiteIsSameThis => self.is_same_this = value,
            InlineObservation::CallerHasNewarray => self.caller_has_new_array = value,
            InlineObservation::CallerHasNewobj => self.caller_has_new_obj = value,
            InlineObservation::CalleeHasGcStruct => self.callee_has_gc_struct = value,
            // Call site frequency is tracked for every candidate.
            InlineObservation::CallsiteRareGcStruct => (),
            InlineObservation::CallsiteHasProfile => self.has_profile = value,
            _ => self.default.note_bool(obs, value),
        }
    }

    fn note_int(&mut self, obs: InlineObservation, value: i32) {
        match obs {
            InlineObservation::CalleeIlCodeSize => self.default.note_il_size(value, None),
            InlineObservation::CalleeOpcode | InlineObservation::CalleeOpcodeNormed => {
                if let Some(bin) = OpcodeBin::of(super::default::opcode(value)) {
                    self.bins[bin as usize] += 1;
                }
                self.default.note_int(obs, value);
            }
            InlineObservation::CalleeMaxstack => {
                self.maxstack = u32::try_from(value).unwrap_or(0)
            }
            InlineObservation::CalleeNumberOfBasicBlocks => {
                self.block_count = u32::try_from(value).unwrap_or(0)
            }
            InlineObservation::CallsiteWeight => {
                self.callsite_weight = u32::try_from(value).unwrap_or(0)
            }
            _ => self.default.note_int(obs, value),
        }
    }

    fn note_double(&mut self, obs: InlineObservation, value: f64) {
        debug_assert_eq!(obs, InlineObservation::CallsiteProfileFrequency);
        debug_assert!(value >= 0.0);
        self.profile_frequency = value;
    }

    fn determine_profitability(&mut self, method_info: &MethodInfo) {
        if self.default.legal.decision().is_failure() {
            return;
        }
        // The models' estimates are recorded for the data dump; the decision is the default
        // policy's.
        self.observe_and_estimate(method_info);
        self.default
            .determine_profitability_with(method_info, DefaultPolicy::determine_multiplier);
    }

    fn budget_check(&self) -> bool {
        self.default.budget_check()
    }

    fn propagate_never_to_runtime(&self) -> bool {
        // Viable but unprofitable callees may be profitable elsewhere.
        !matches!(
            self.default.legal.observation(),
            InlineObservation::CalleeNotProfitableInline | InlineObservation::CalleeDoesNotReturn
        )
    }

    fn code_size_estimate(&self) -> i32 {
        self.model_code_size_estimate
    }

    fn dump_schema(&self, w: &mut dyn Write) -> io::Result<()> {
        write!(
            w,
            "ILSize,CallsiteFrequency,InstructionCount,LoadStoreCount,BlockCount,Maxstack,ArgCount"
        )?;
        for i in 0..MAX_ARGS {
            write!(w, ",Arg{i}Type")?;
        }
        for i in 0..MAX_ARGS {
            write!(w, ",Arg{i}Size")?;
        }
        write!(w, ",LocalCount,ReturnType,ReturnSize")?;
        for bin in OpcodeBin::iter() {
            write!(w, ",{bin:?}Count")?;
        }
        write!(
            w,
            ",CallSiteWeight,IsForceInline,IsInstanceCtor,IsFromPromotableValueClass,HasSimd\
             ,LooksLikeWrapperMethod,ArgFeedsConstantTest,IsMostlyLoadStore,ArgFeedsRangeCheck\
             ,ConstArgFeedsIsKnownConst,ArgFeedsIsKnownConst,ConstantArgFeedsConstantTest\
             ,CalleeNativeSizeEstimate,CallsiteNativeSizeEstimate,ModelCodeSizeEstimate\
             ,ModelPerCallInstructionEstimate,IsClassCtor,IsSameThis,CallerHasNewArray\
             ,CallerHasNewObj,CalleeDoesNotReturn,CalleeHasGCStruct,CallsiteDepth"
        )
    }

    fn dump_data(&self, w: &mut dyn Write) -> io::Result<()> {
        let d = &self.default;
        write!(
            w,
            "{},{},{},{},{},{},{}",
            d.code_size,
            d.callsite_frequency as u8,
            d.instruction_count,
            d.load_store_count,
            self.block_count,
            self.maxstack,
            self.arg_count
        )?;
        for ty in self.arg_type {
            write!(w, ",{}", ty as u8)?;
        }
        for size in self.arg_size {
            write!(w, ",{size}")?;
        }
        write!(
            w,
            ",{},{},{}",
            self.local_count, self.return_type as u8, self.return_size
        )?;
        for count in self.bins {
            write!(w, ",{count}")?;
        }
        let flag = |b: bool| u8::from(b);
        write!(
            w,
            ",{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            self.callsite_weight,
            flag(d.is_force_inline),
            flag(d.is_instance_ctor),
            flag(d.is_from_promotable_value_class),
            flag(d.has_simd),
            flag(d.looks_like_wrapper_method),
            d.arg_feeds_constant_test,
            flag(d.method_is_mostly_load_store),
            d.arg_feeds_range_check,
            flag(d.const_arg_feeds_is_known_const),
            flag(d.arg_feeds_is_known_const),
            d.constant_arg_feeds_constant_test,
            d.callee_native_size_estimate,
            d.callsite_native_size_estimate,
            self.model_code_size_estimate,
            self.per_call_instruction_estimate,
            flag(self.is_class_ctor),
            flag(self.is_same_this),
            flag(self.caller_has_new_array),
            flag(self.caller_has_new_obj),
            flag(d.is_no_return),
            flag(self.callee_has_gc_struct),
            d.callsite_depth
        )
    }

    fn on_dump_xml(&self, w: &mut dyn Write) -> io::Result<()> {
        self.default.on_dump_xml(w)
    }
}
