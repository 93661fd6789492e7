//! The fixed vocabulary shared by every inlining policy: observations (facts noted about a call
//! site or callee), who those facts are about, how serious they are, and the decision a policy
//! reaches from them.
//!
//! Observations are plain enumerants. Their description, [InlineTarget] and [InlineImpact] live
//! in a table generated alongside the enum, so looking them up is a single index.

use static_assertions::const_assert;
use std::fmt;
use strum::{Display, EnumCount, EnumIter, FromRepr};

/// Who an observation is about.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum InlineTarget {
    #[strum(to_string = "callee")]
    Callee,
    #[strum(to_string = "caller")]
    Caller,
    #[strum(to_string = "call site")]
    CallSite,
}

/// How much an observation matters to the decision.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum InlineImpact {
    /// Inlining would be incorrect.
    #[strum(to_string = "correctness")]
    Fatal,
    /// Inlining is impossible by the nature of the callee or call site.
    #[strum(to_string = "critical")]
    Fundamental,
    /// Inlining is possible in principle but exceeds an implementation limit.
    #[strum(to_string = "limitation")]
    Limitation,
    /// Inlining is possible but judged not worthwhile.
    #[strum(to_string = "performance")]
    Performance,
    /// Neutral input to the heuristics.
    #[strum(to_string = "information")]
    Information,
}

impl InlineImpact {
    /// Can an observation of this impact only be recorded via `note_fatal`?
    pub fn is_fatal_class(self) -> bool {
        match self {
            InlineImpact::Fatal | InlineImpact::Fundamental | InlineImpact::Limitation => true,
            InlineImpact::Performance | InlineImpact::Information => false,
        }
    }
}

struct ObservationInfo {
    description: &'static str,
    target: InlineTarget,
    impact: InlineImpact,
}

macro_rules! inline_observations {
    ($($name:ident: $target:ident, $impact:ident, $desc:literal;)*) => {
        /// A fact observed about a call site, its caller, or its callee.
        ///
        /// The first and last variants are sentinels bounding the valid range. The root
        /// [crate::InlineContext] carries [InlineObservation::UnusedInitial].
        #[repr(u8)]
        #[derive(Clone, Copy, Debug, EnumCount, EnumIter, FromRepr, Eq, Hash, Ord, PartialEq, PartialOrd)]
        pub enum InlineObservation {
            UnusedInitial,
            $($name,)*
            UnusedFinal,
        }

        static OBSERVATIONS: [ObservationInfo; InlineObservation::COUNT] = [
            ObservationInfo {
                description: "unused initial observation",
                target: InlineTarget::Callee,
                impact: InlineImpact::Fatal,
            },
            $(ObservationInfo {
                description: $desc,
                target: InlineTarget::$target,
                impact: InlineImpact::$impact,
            },)*
            ObservationInfo {
                description: "unused final observation",
                target: InlineTarget::Callee,
                impact: InlineImpact::Fatal,
            },
        ];
    };
}

inline_observations! {
    // Callee: reasons a callee can never be inlined anywhere.
    CalleeBadArgumentNumber: Callee, Fatal, "invalid argument number";
    CalleeBadLocalNumber: Callee, Fatal, "invalid local number";
    CalleeCompilationError: Callee, Fatal, "compilation error";
    CalleeHasEh: Callee, Fundamental, "has exception handling";
    CalleeHasEndfilter: Callee, Fundamental, "has endfilter";
    CalleeHasEndfinally: Callee, Fundamental, "has endfinally";
    CalleeHasLeave: Callee, Fundamental, "has leave";
    CalleeHasManagedVarargs: Callee, Fundamental, "managed varargs";
    CalleeHasNativeVarargs: Callee, Fundamental, "native varargs";
    CalleeHasNoBody: Callee, Fundamental, "has no body";
    CalleeHasNullForLdelem: Callee, Fundamental, "has null pointer for ldelem";
    CalleeIsArrayMethod: Callee, Fundamental, "is array method";
    CalleeIsGeneric: Callee, Fundamental, "generic method";
    CalleeIsJitNoinline: Callee, Fundamental, "noinline per hash range";
    CalleeIsNoinline: Callee, Fundamental, "noinline per IL/cached result";
    CalleeIsSynchronized: Callee, Fundamental, "is synchronized";
    CalleeIsVmNoinline: Callee, Fundamental, "noinline per VM";
    CalleeLacksReturn: Callee, Fundamental, "no return opcode";
    CalleeLdfldNeedsHelper: Callee, Fundamental, "ldfld needs helper";
    CalleeMarkedAsSkipped: Callee, Fundamental, "skipped by user request";
    CalleeNoMethodInfo: Callee, Fundamental, "cannot get method info";
    CalleeStfldNeedsHelper: Callee, Fundamental, "stfld needs helper";
    CalleeThrowWithInvalidStack: Callee, Fundamental, "throw with invalid stack";
    CalleeMaxstackTooBig: Callee, Limitation, "maxstack too big";
    CalleeTooManyArguments: Callee, Limitation, "too many arguments";
    CalleeTooManyBasicBlocks: Callee, Limitation, "too many basic blocks";
    CalleeTooManyLocals: Callee, Limitation, "too many locals";
    CalleeTooMuchIl: Callee, Limitation, "too many il bytes";
    CalleeLogReplayReject: Callee, Performance, "rejected by log replay";
    CalleeNotProfitableInline: Callee, Performance, "unprofitable inline";
    CalleeRandomReject: Callee, Performance, "random reject";

    // Callee: neutral facts.
    CalleeArgFeedsCast: Callee, Information, "argument feeds cast";
    CalleeArgFeedsConstantTest: Callee, Information, "argument feeds constant test";
    CalleeArgFeedsIsconst: Callee, Information, "argument feeds is-constant check";
    CalleeArgFeedsRangeCheck: Callee, Information, "argument feeds range check";
    CalleeArgFeedsTest: Callee, Information, "argument feeds test";
    CalleeArgStruct: Callee, Information, "argument is a struct passed by value";
    CalleeArgStructFieldAccess: Callee, Information, "field access over struct argument";
    CalleeBackwardJump: Callee, Information, "has backward jump";
    CalleeBeginOpcodeScan: Callee, Information, "prepare to look at opcodes";
    CalleeBelowAlwaysInlineSize: Callee, Information, "below ALWAYS_INLINE size";
    CalleeBinaryExprWithCns: Callee, Information, "binary expression with constant";
    CalleeClassPromotable: Callee, Information, "promotable value class";
    CalleeClassValuetype: Callee, Information, "method of a value class";
    CalleeConstArgFeedsIsconst: Callee, Information, "constant argument feeds is-constant check";
    CalleeDoesNotReturn: Callee, Information, "does not return";
    CalleeEndOpcodeScan: Callee, Information, "done looking at opcodes";
    CalleeFoldableBox: Callee, Information, "has foldable box";
    CalleeHasGcStruct: Callee, Information, "has gc struct local";
    CalleeHasLocalloc: Callee, Information, "has localloc";
    CalleeHasPinnedLocals: Callee, Information, "has pinned locals";
    CalleeHasSimd: Callee, Information, "has SIMD arg, local, or ret";
    CalleeHasSwitch: Callee, Information, "has switch";
    CalleeIlCodeSize: Callee, Information, "number of bytes of IL";
    CalleeIntrinsic: Callee, Information, "call marked as intrinsic";
    CalleeIsClassCtor: Callee, Information, "class constructor";
    CalleeIsDiscretionaryInline: Callee, Information, "can inline, check heuristics";
    CalleeIsForceInline: Callee, Information, "aggressive inline attribute";
    CalleeIsInstanceCtor: Callee, Information, "instance constructor";
    CalleeIsProfitableInline: Callee, Information, "profitable inline";
    CalleeIsSizeDecreasingInline: Callee, Information, "size decreasing inline";
    CalleeLogReplayAccept: Callee, Information, "accepted by log replay";
    CalleeLooksLikeWrapper: Callee, Information, "thin wrapper around a call";
    CalleeMaxstack: Callee, Information, "maxstack";
    CalleeNumberOfArguments: Callee, Information, "number of arguments";
    CalleeNumberOfBasicBlocks: Callee, Information, "number of basic blocks";
    CalleeNumberOfLocals: Callee, Information, "number of locals";
    CalleeOpcode: Callee, Information, "next opcode in IL stream";
    CalleeOpcodeNormed: Callee, Information, "next opcode in IL stream, normed";
    CalleeRandomAccept: Callee, Information, "random accept";
    CalleeReturnsStruct: Callee, Information, "returns a struct by value";
    CalleeThrowBlock: Callee, Information, "has throw block";
    CalleeUnsupportedOpcode: Callee, Information, "unsupported opcode";

    // Caller: reasons this caller cannot take inlines.
    CallerDebugCodegen: Caller, Fundamental, "debug codegen";
    CallerIsJitNoinline: Caller, Fundamental, "noinline per hash range";
    CallerNeedsSecurityCheck: Caller, Fundamental, "needs security check";

    // Caller: neutral facts.
    CallerHasNewarray: Caller, Information, "has newarray";
    CallerHasNewobj: Caller, Information, "has newobj";
    CallerNumberOfLocals: Caller, Information, "number of locals in caller";

    // Call site: reasons this particular call cannot be inlined.
    CallsiteArgTypesMismatch: CallSite, Fatal, "argument types mismatch";
    CallsiteCompilationError: CallSite, Fatal, "compilation error";
    CallsiteCompilationFailure: CallSite, Fatal, "failed to compile";
    CallsiteExplicitTailPrefix: CallSite, Fatal, "explicit tail prefix";
    CallsiteReturnTypeMismatch: CallSite, Fatal, "return type mismatch";
    CallsiteGenericDictionaryLookup: CallSite, Fundamental, "runtime dictionary lookup";
    CallsiteHasComplexHandle: CallSite, Fundamental, "complex handle access";
    CallsiteImplicitRecTailCall: CallSite, Fundamental, "implicit recursive tail call";
    CallsiteIsCallToHelper: CallSite, Fundamental, "target is helper";
    CallsiteIsNotDirect: CallSite, Fundamental, "target not direct";
    CallsiteIsRecursive: CallSite, Fundamental, "recursive";
    CallsiteIsVirtual: CallSite, Fundamental, "virtual";
    CallsiteIsWithinCatch: CallSite, Fundamental, "within catch region";
    CallsiteIsWithinFilter: CallSite, Fundamental, "within filter region";
    CallsiteLdargaNotLocalVar: CallSite, Fundamental, "ldarga not on local var";
    CallsiteNotCandidate: CallSite, Fundamental, "not inline candidate";
    CallsiteIsTooDeep: CallSite, Limitation, "too deep";
    CallsitePinInTryRegion: CallSite, Limitation, "within try region, pinned";
    CallsiteTooManyLocals: CallSite, Limitation, "too many locals";
    CallsiteLogReplayReject: CallSite, Performance, "rejected by log replay";
    CallsiteNotProfitableInline: CallSite, Performance, "unprofitable inline";
    CallsiteOverBudget: CallSite, Performance, "inline exceeds budget";
    CallsiteOverInlineLimit: CallSite, Performance, "limited by inline limit";
    CallsiteRandomReject: CallSite, Performance, "random reject";

    // Call site: neutral facts.
    CallsiteArgBoxed: CallSite, Information, "argument is boxed at call site";
    CallsiteArgConst: CallSite, Information, "argument is a constant";
    CallsiteArgExactCls: CallSite, Information, "argument is an exact class";
    CallsiteArgExactClsSigIsNot: CallSite, Information, "argument is exact, signature is not";
    CallsiteConstantArgFeedsTest: CallSite, Information, "constant argument feeds test";
    CallsiteDepth: CallSite, Information, "depth";
    CallsiteDivByCns: CallSite, Information, "callee divides by a constant argument";
    CallsiteFoldableBranch: CallSite, Information, "foldable branch";
    CallsiteFoldableExpr: CallSite, Information, "foldable binary expression";
    CallsiteFoldableExprUn: CallSite, Information, "foldable unary expression";
    CallsiteFoldableIntrinsic: CallSite, Information, "foldable intrinsic";
    CallsiteFoldableSwitch: CallSite, Information, "foldable switch";
    CallsiteFrequency: CallSite, Information, "rough call site frequency";
    CallsiteHasProfile: CallSite, Information, "profile data is available";
    CallsiteInLoop: CallSite, Information, "call site is in a loop";
    CallsiteInNoreturnRegion: CallSite, Information, "call site is in a no-return region";
    CallsiteInTryRegion: CallSite, Information, "call site in try region";
    CallsiteIsProfitableInline: CallSite, Information, "profitable inline";
    CallsiteIsSameThis: CallSite, Information, "same this as root caller";
    CallsiteIsSizeDecreasingInline: CallSite, Information, "size decreasing inline";
    CallsiteLogReplayAccept: CallSite, Information, "accepted by log replay";
    CallsiteNongenericCallsGeneric: CallSite, Information, "non-generic caller calls generic callee";
    CallsiteProfileFrequency: CallSite, Information, "profile frequency of call site";
    CallsiteRandomAccept: CallSite, Information, "random accept";
    CallsiteRareGcStruct: CallSite, Information, "rarely called, has gc struct";
    CallsiteWeight: CallSite, Information, "call site frequency weight";
}

const_assert!(InlineObservation::COUNT <= u8::MAX as usize + 1);

impl InlineObservation {
    fn info(self) -> &'static ObservationInfo {
        &OBSERVATIONS[self as usize]
    }

    /// A human readable description of this observation.
    pub fn description(self) -> &'static str {
        self.info().description
    }

    pub fn target(self) -> InlineTarget {
        self.info().target
    }

    pub fn impact(self) -> InlineImpact {
        self.info().impact
    }

    /// Is this observation strictly between the two sentinels?
    pub fn is_valid(self) -> bool {
        self > InlineObservation::UnusedInitial && self < InlineObservation::UnusedFinal
    }
}

impl fmt::Display for InlineObservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// The state of one inlining evaluation.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum InlineDecision {
    #[strum(to_string = "undecided")]
    Undecided,
    #[strum(to_string = "candidate")]
    Candidate,
    #[strum(to_string = "success")]
    Success,
    /// Failed at this call site only.
    #[strum(to_string = "failed this call site")]
    Failure,
    /// Failed for every call site of this callee.
    #[strum(to_string = "failed this callee")]
    Never,
}

impl InlineDecision {
    pub fn is_failure(self) -> bool {
        match self {
            InlineDecision::Failure | InlineDecision::Never => true,
            InlineDecision::Undecided | InlineDecision::Candidate | InlineDecision::Success => {
                false
            }
        }
    }

    pub fn is_success(self) -> bool {
        match self {
            InlineDecision::Success => true,
            InlineDecision::Undecided
            | InlineDecision::Candidate
            | InlineDecision::Failure
            | InlineDecision::Never => false,
        }
    }

    pub fn is_never(self) -> bool {
        match self {
            InlineDecision::Never => true,
            InlineDecision::Undecided
            | InlineDecision::Candidate
            | InlineDecision::Success
            | InlineDecision::Failure => false,
        }
    }

    /// Has inlining not (yet) been ruled out?
    pub fn is_candidate(self) -> bool {
        !self.is_failure()
    }

    /// Has a terminal state been reached?
    pub fn is_decided(self) -> bool {
        match self {
            InlineDecision::Success | InlineDecision::Failure | InlineDecision::Never => true,
            InlineDecision::Undecided | InlineDecision::Candidate => false,
        }
    }
}

/// A rough classification of how often a call site executes, noted via
/// [InlineObservation::CallsiteFrequency].
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, EnumCount, EnumIter, FromRepr, Eq, PartialEq, PartialOrd)]
pub enum CallsiteFrequency {
    /// Not yet noted.
    #[default]
    Unused,
    /// Executes rarely (e.g. in a throw path or class constructor).
    Rare,
    /// Nothing special known.
    Boring,
    /// Has some profile weight.
    Warm,
    /// In a loop.
    Loop,
    /// Very hot according to profile data.
    Hot,
}
