//! The outcome of evaluating one call site (or one prejit root).
//!
//! An [InlineResult] wraps a fresh policy for the duration of an evaluation. The importer notes
//! observations through it, and once it is dropped the decision is reported to the host exactly
//! once. A callee that can never be inlined is marked as such on the host so that later
//! evaluations fail fast.

use crate::{
    context::{ContextIdx, InlineSite},
    host::{InlineReport, JitHost},
    log::{self, Verbosity},
    method::{CallSite, MethodHandle, MethodInfo},
    observation::{InlineDecision, InlineObservation},
    policy::PolicyRef,
    strategy::InlineStrategy,
};

pub struct InlineResult<'h> {
    host: &'h dyn JitHost,
    policy: PolicyRef,
    call: Option<CallSite>,
    context: Option<ContextIdx>,
    caller: MethodHandle,
    callee: Option<MethodHandle>,
    imported_il_size: Option<u32>,
    description: &'static str,
    reported: bool,
}

impl<'h> InlineResult<'h> {
    /// Start evaluating `call`, which is in the statement whose inline context is `context`.
    /// `description` names the phase doing the evaluation in log messages.
    pub fn new(
        strategy: &mut InlineStrategy,
        host: &'h dyn JitHost,
        context: Option<ContextIdx>,
        call: &CallSite,
        description: &'static str,
    ) -> Self {
        let policy = strategy.new_policy(false);
        let caller = match context {
            Some(c) => strategy.context(c).callee(),
            None => strategy.root().handle,
        };
        if let Some(c) = context {
            let mut chain = strategy.inline_chain(c, host);
            chain.push(InlineSite::new(host, call.callee, call.il_offset));
            let mut p = policy.borrow_mut();
            p.note_context(&chain);
            p.note_offset(call.il_offset);
        }
        Self {
            host,
            policy,
            call: Some(call.clone()),
            context,
            caller,
            callee: Some(call.callee),
            imported_il_size: None,
            description,
            reported: false,
        }
    }

    /// Start evaluating `method` as a whole, as a prejit root.
    pub fn new_prejit_root(
        strategy: &mut InlineStrategy,
        host: &'h dyn JitHost,
        method: MethodHandle,
        description: &'static str,
    ) -> Self {
        Self {
            host,
            policy: strategy.new_policy(true),
            call: None,
            context: None,
            caller: method,
            callee: Some(method),
            imported_il_size: None,
            description,
            reported: false,
        }
    }

    pub fn policy(&self) -> &PolicyRef {
        &self.policy
    }

    pub fn decision(&self) -> InlineDecision {
        self.policy.borrow().decision()
    }

    pub fn observation(&self) -> InlineObservation {
        self.policy.borrow().observation()
    }

    pub fn is_failure(&self) -> bool {
        self.decision().is_failure()
    }

    pub fn is_success(&self) -> bool {
        self.decision().is_success()
    }

    pub fn is_never(&self) -> bool {
        self.decision().is_never()
    }

    pub fn is_candidate(&self) -> bool {
        self.decision().is_candidate()
    }

    /// Is this a candidate that still needs its profitability assessed?
    pub fn is_discretionary_candidate(&self) -> bool {
        let p = self.policy.borrow();
        p.decision().is_candidate()
            && p.observation() == InlineObservation::CalleeIsDiscretionaryInline
    }

    pub fn is_decided(&self) -> bool {
        self.decision().is_decided()
    }

    pub fn note_bool(&mut self, obs: InlineObservation, value: bool) {
        self.policy.borrow_mut().note_bool(obs, value);
    }

    pub fn note_int(&mut self, obs: InlineObservation, value: i32) {
        self.policy.borrow_mut().note_int(obs, value);
    }

    pub fn note_double(&mut self, obs: InlineObservation, value: f64) {
        self.policy.borrow_mut().note_double(obs, value);
    }

    /// Note an observation that makes the inline impossible.
    pub fn note_fatal(&mut self, obs: InlineObservation) {
        self.policy.borrow_mut().note_fatal(obs);
        debug_assert!(self.is_failure());
    }

    /// Restore the failure an earlier screen of this call site reached.
    #[cfg(feature = "ykd")]
    pub fn note_prior_failure(&mut self, obs: InlineObservation) {
        self.policy.borrow_mut().note_prior_failure(obs);
    }

    pub fn determine_profitability(&mut self, method_info: &MethodInfo) {
        self.policy.borrow_mut().determine_profitability(method_info);
    }

    pub fn caller(&self) -> MethodHandle {
        self.caller
    }

    pub fn callee(&self) -> Option<MethodHandle> {
        self.callee
    }

    pub fn call(&self) -> Option<&CallSite> {
        self.call.as_ref()
    }

    pub fn context(&self) -> Option<ContextIdx> {
        self.context
    }

    /// How many IL bytes of the callee were imported. Zero until set.
    pub fn imported_il_size(&self) -> u32 {
        self.imported_il_size.unwrap_or(0)
    }

    /// Record how many IL bytes of the callee were imported. May only be set once.
    pub fn set_imported_il_size(&mut self, il_size: u32) {
        debug_assert!(self.imported_il_size.is_none());
        self.imported_il_size = Some(il_size);
    }

    /// Don't report this result: the caller will evaluate the call site again.
    pub fn set_reported(&mut self) {
        self.reported = true;
    }

    /// Report the decision, unless it has already been reported. Undecided results are logged but
    /// not reported to the host.
    pub fn report(&mut self) {
        if self.reported {
            return;
        }
        self.reported = true;

        let (decision, obs, propagate) = {
            let p = self.policy.borrow();
            (p.decision(), p.observation(), p.propagate_never_to_runtime())
        };
        if log::enabled(Verbosity::InlineDecision) {
            log::log(
                Verbosity::InlineDecision,
                &format!(
                    "INLINER: during '{}' result '{decision}' reason '{obs}'",
                    self.description
                ),
            );
        }

        // A callee noted as never inlineable from a cached result is already marked.
        if decision.is_never() && propagate && obs != InlineObservation::CalleeIsNoinline {
            if let Some(callee) = self.callee {
                log::log(
                    Verbosity::InlineTrace,
                    &format!("marking {} as never inline", self.host.method_name(callee)),
                );
                self.host.mark_never_inline(callee);
            }
        }

        if let Some(report) = InlineReport::from_decision(decision) {
            self.host
                .report_inlining_decision(self.caller, self.callee, report, &obs.to_string());
        }
    }
}

impl Drop for InlineResult<'_> {
    fn drop(&mut self) {
        self.report();
    }
}
