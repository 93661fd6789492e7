//! Fixtures shared by the unit tests.

use crate::{
    config::{Tuning, DEFAULT_MAX_INLINE_DEPTH, DEFAULT_MAX_INLINE_SIZE},
    host::{InlineReport, JitHost},
    method::{ArgInfo, CorType, MethodHandle, MethodInfo, Opcode},
    observation::{CallsiteFrequency, InlineObservation},
    policy::{InlinePolicy, PolicyEnv},
};
#[cfg(feature = "ykd")]
use crate::config::DataLevel;
use std::cell::RefCell;

/// An environment with the default limits, nothing inlined yet, and a budget nothing will exceed.
pub(crate) fn test_env() -> PolicyEnv {
    PolicyEnv {
        is_prejit_root: false,
        max_inline_size: DEFAULT_MAX_INLINE_SIZE,
        max_inline_depth: DEFAULT_MAX_INLINE_DEPTH,
        time_estimate: 0,
        time_budget: i32::MAX / 2,
        #[cfg(feature = "ykd")]
        initial_size_estimate: 0,
        #[cfg(feature = "ykd")]
        current_size_estimate: 0,
        inline_count: 0,
        inline_limit: None,
        has_trusted_profile: false,
        #[cfg(feature = "ykd")]
        data_level: DataLevel::Off,
        tuning: Tuning::default(),
        #[cfg(feature = "ykd")]
        random_seed: 0,
        #[cfg(feature = "ykd")]
        root_token: 0,
        #[cfg(feature = "ykd")]
        root_hash: 0,
        #[cfg(feature = "ykd")]
        replay: None,
    }
}

/// A callee, and the facts the importer would note about a call to it.
#[derive(Clone, Debug)]
pub(crate) struct Callee {
    info: MethodInfo,
    opcodes: Vec<Opcode>,
    force_inline: bool,
    depth: u32,
    frequency: CallsiteFrequency,
    blocks: u32,
}

impl Callee {
    pub(crate) fn new(handle: MethodHandle, il_size: u32) -> Self {
        Self {
            info: MethodInfo::new(handle, il_size),
            opcodes: vec![Opcode::Ret],
            force_inline: false,
            depth: 1,
            frequency: CallsiteFrequency::Boring,
            blocks: 1,
        }
    }

    pub(crate) fn opcodes(mut self, opcodes: &[Opcode]) -> Self {
        self.opcodes = opcodes.to_vec();
        self
    }

    pub(crate) fn with_this(mut self) -> Self {
        self.info.has_this = true;
        self
    }

    pub(crate) fn force_inline(mut self) -> Self {
        self.force_inline = true;
        self
    }

    pub(crate) fn depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub(crate) fn frequency(mut self, frequency: CallsiteFrequency) -> Self {
        self.frequency = frequency;
        self
    }

    pub(crate) fn args(mut self, args: &[CorType]) -> Self {
        self.info.args = args.iter().map(|t| ArgInfo::new(*t)).collect();
        self
    }

    pub(crate) fn method_info(&self) -> &MethodInfo {
        &self.info
    }

    /// Note everything the importer would, in the order it would, stopping early once the
    /// decision is a failure. Finishes with a profitability decision.
    pub(crate) fn drive<P: InlinePolicy + ?Sized>(&self, p: &mut P) {
        let il_size = i32::try_from(self.info.il_size).unwrap();
        p.note_bool(InlineObservation::CalleeIsForceInline, self.force_inline);
        p.note_int(InlineObservation::CalleeIlCodeSize, il_size);
        if p.decision().is_failure() {
            return;
        }
        p.note_int(
            InlineObservation::CalleeMaxstack,
            i32::try_from(self.info.max_stack).unwrap(),
        );
        p.note_int(
            InlineObservation::CallsiteDepth,
            i32::try_from(self.depth).unwrap(),
        );
        p.note_int(InlineObservation::CallsiteFrequency, self.frequency as i32);
        if p.decision().is_failure() {
            return;
        }
        p.note_bool(InlineObservation::CalleeBeginOpcodeScan, true);
        for op in &self.opcodes {
            p.note_int(InlineObservation::CalleeOpcode, *op as i32);
        }
        p.note_bool(InlineObservation::CalleeEndOpcodeScan, true);
        if p.decision().is_failure() {
            return;
        }
        p.note_bool(InlineObservation::CalleeDoesNotReturn, false);
        p.note_int(
            InlineObservation::CalleeNumberOfBasicBlocks,
            i32::try_from(self.blocks).unwrap(),
        );
        if p.decision().is_failure() {
            return;
        }
        p.determine_profitability(&self.info);
    }
}

/// A host whose method `n` is named `Mn`, has token `0x0600000n` and hash `n`, and which records
/// everything the inliner tells it.
#[derive(Default)]
pub(crate) struct MockHost {
    pub(crate) never: RefCell<Vec<MethodHandle>>,
    pub(crate) reports: RefCell<Vec<(MethodHandle, Option<MethodHandle>, InlineReport, String)>>,
}

impl MockHost {
    pub(crate) fn is_never(&self, m: MethodHandle) -> bool {
        self.never.borrow().contains(&m)
    }
}

impl JitHost for MockHost {
    fn method_name(&self, method: MethodHandle) -> String {
        format!("M{}", method.0)
    }

    fn method_token(&self, method: MethodHandle) -> u32 {
        0x0600_0000 | u32::try_from(method.0).unwrap()
    }

    fn method_hash(&self, method: MethodHandle) -> u32 {
        u32::try_from(method.0).unwrap()
    }

    fn mark_never_inline(&self, callee: MethodHandle) {
        self.never.borrow_mut().push(callee);
    }

    fn report_inlining_decision(
        &self,
        caller: MethodHandle,
        callee: Option<MethodHandle>,
        report: InlineReport,
        reason: &str,
    ) {
        self.reports
            .borrow_mut()
            .push((caller, callee, report, reason.to_owned()));
    }
}
