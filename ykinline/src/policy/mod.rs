//! Inlining policies.
//!
//! A policy is created for every call site (or, in prejit-root mode, for every method) that the
//! importer evaluates. The importer feeds it observations and then asks it whether the inline is
//! profitable. All policies share the legality rules in [LegalPolicy]. The concrete heuristics
//! are layered by composition: the extended policy wraps the default policy, and the model,
//! profile and diagnostic policies wrap the discretionary policy, which itself wraps the default
//! policy.

use crate::{
    config::{PolicyKind, Tuning},
    context::InlineSite,
    log::{self, Verbosity},
    method::{MethodInfo, RootMethod},
    observation::{InlineDecision, InlineObservation, InlineTarget},
    strategy::estimate_inline_time,
};
use std::{
    cell::RefCell,
    fmt::{self, Display},
    io::{self, Write},
    rc::Rc,
};
#[cfg(feature = "ykd")]
use crate::config::DataLevel;
#[cfg(feature = "ykd")]
use std::sync::Arc;

mod default;
mod discretionary;
mod extended;
#[cfg(feature = "ykd")]
mod full;
mod model;
#[cfg(feature = "ykd")]
mod random;
#[cfg(feature = "ykd")]
pub(crate) mod replay;
#[cfg(feature = "ykd")]
mod size;
pub(crate) mod sizemodel;

use default::DefaultPolicy;
#[cfg(feature = "ykd")]
use discretionary::DiscretionaryPolicy;
use extended::ExtendedDefaultPolicy;
#[cfg(feature = "ykd")]
use full::FullPolicy;
use model::{ModelPolicy, ProfilePolicy};
#[cfg(feature = "ykd")]
use random::RandomPolicy;
#[cfg(feature = "ykd")]
use replay::{ReplayLog, ReplayPolicy};
#[cfg(feature = "ykd")]
use size::SizePolicy;

/// Native size estimates are in bytes scaled up by this factor.
pub const SIZE_SCALE: i32 = 10;

/// The number of argument slots the discretionary policy records.
pub(crate) const MAX_ARGS: usize = 6;

/// A policy shared between the [crate::InlineResult] evaluating it, the strategy (which remembers
/// the last successful policy) and, in `ykd` builds, the [crate::InlineContext] it produced.
pub type PolicyRef = Rc<RefCell<dyn InlinePolicy>>;

/// The state of the enclosing compilation that a policy may consult. This is a snapshot taken
/// when the policy is created: no inline can succeed while a policy is being evaluated, so it
/// never goes stale.
#[derive(Clone, Debug)]
pub(crate) struct PolicyEnv {
    /// Is the policy evaluating a method as a whole, rather than a call site?
    pub(crate) is_prejit_root: bool,
    pub(crate) max_inline_size: u32,
    pub(crate) max_inline_depth: u32,
    pub(crate) time_estimate: i32,
    pub(crate) time_budget: i32,
    #[cfg(feature = "ykd")]
    pub(crate) initial_size_estimate: i32,
    #[cfg(feature = "ykd")]
    pub(crate) current_size_estimate: i32,
    pub(crate) inline_count: u32,
    pub(crate) inline_limit: Option<u32>,
    pub(crate) has_trusted_profile: bool,
    #[cfg(feature = "ykd")]
    pub(crate) data_level: DataLevel,
    pub(crate) tuning: Tuning,
    #[cfg(feature = "ykd")]
    pub(crate) random_seed: u64,
    #[cfg(feature = "ykd")]
    pub(crate) root_token: u32,
    #[cfg(feature = "ykd")]
    pub(crate) root_hash: u32,
    #[cfg(feature = "ykd")]
    pub(crate) replay: Option<Arc<ReplayLog>>,
}

impl PolicyEnv {
    /// Would inlining a callee of `il_size` IL bytes exceed the time budget?
    pub(crate) fn over_budget(&self, il_size: u32) -> bool {
        estimate_inline_time(il_size).saturating_add(self.time_estimate) > self.time_budget
    }

    /// Has the configured inline limit been reached? Never true for prejit roots.
    pub(crate) fn over_inline_limit(&self) -> bool {
        !self.is_prejit_root
            && self
                .inline_limit
                .is_some_and(|limit| self.inline_count >= limit)
    }
}

/// The legality state machine shared by every policy: the current [InlineDecision] and the
/// [InlineObservation] that explains it.
#[derive(Debug)]
pub struct LegalPolicy {
    decision: InlineDecision,
    observation: InlineObservation,
    is_prejit_root: bool,
}

impl LegalPolicy {
    pub(crate) fn new(is_prejit_root: bool) -> Self {
        Self {
            decision: InlineDecision::Undecided,
            observation: InlineObservation::UnusedInitial,
            is_prejit_root,
        }
    }

    pub fn decision(&self) -> InlineDecision {
        self.decision
    }

    pub fn observation(&self) -> InlineObservation {
        self.observation
    }

    pub fn is_prejit_root(&self) -> bool {
        self.is_prejit_root
    }

    /// All checks have passed.
    pub(crate) fn note_success(&mut self) {
        debug_assert_eq!(self.decision, InlineDecision::Candidate);
        if self.decision == InlineDecision::Candidate {
            self.decision = InlineDecision::Success;
        }
    }

    /// Note an observation that rules the inline out. Once failed, later fatal observations are
    /// ignored so that the first reason is the one reported.
    pub(crate) fn note_fatal(&mut self, obs: InlineObservation) {
        debug_assert!(
            obs.impact().is_fatal_class(),
            "{obs:?} has impact {}",
            obs.impact()
        );
        if self.decision.is_failure() {
            if self.observation.impact() != obs.impact() {
                log::log(
                    Verbosity::Warning,
                    &format!(
                        "ignoring {} observation '{obs}' after {} observation '{}'",
                        obs.impact(),
                        self.observation.impact(),
                        self.observation
                    ),
                );
            }
            return;
        }
        self.note_internal(obs);
        debug_assert!(self.decision.is_failure());
    }

    /// Resurrect a failure from an earlier screen, so that failure contexts explain themselves.
    #[cfg(feature = "ykd")]
    pub(crate) fn note_prior_failure(&mut self, obs: InlineObservation) {
        self.note_internal(obs);
        debug_assert!(self.decision.is_failure());
    }

    /// Fail because of `obs`: observations about the callee rule it out everywhere.
    pub(crate) fn note_internal(&mut self, obs: InlineObservation) {
        match obs.target() {
            InlineTarget::Callee => self.set_never(obs),
            InlineTarget::Caller | InlineTarget::CallSite => self.set_failure(obs),
        }
    }

    /// Fail at this call site. A failure is terminal, so repeats are ignored.
    pub(crate) fn set_failure(&mut self, obs: InlineObservation) {
        debug_assert!(obs.is_valid());
        match self.decision {
            InlineDecision::Failure | InlineDecision::Never => (),
            InlineDecision::Undecided | InlineDecision::Candidate | InlineDecision::Success => {
                self.decision = InlineDecision::Failure;
                self.observation = obs;
            }
        }
    }

    /// Fail at every call site of this callee. A failure is terminal, so repeats are ignored.
    pub(crate) fn set_never(&mut self, obs: InlineObservation) {
        debug_assert!(obs.is_valid());
        match self.decision {
            InlineDecision::Failure | InlineDecision::Never => (),
            InlineDecision::Undecided | InlineDecision::Candidate | InlineDecision::Success => {
                self.decision = InlineDecision::Never;
                self.observation = obs;
            }
        }
    }

    /// Record (or replace) the reason the inline is still a candidate. Ignored once failed.
    pub(crate) fn set_candidate(&mut self, obs: InlineObservation) {
        if self.decision.is_failure() {
            return;
        }
        debug_assert!(!self.decision.is_success());
        self.decision = InlineDecision::Candidate;
        self.observation = obs;
    }

    /// Accept a profitable candidate, recording `callee_obs` for a prejit root and `callsite_obs`
    /// otherwise.
    pub(crate) fn accept(
        &mut self,
        callee_obs: InlineObservation,
        callsite_obs: InlineObservation,
    ) {
        if self.is_prejit_root {
            self.set_candidate(callee_obs);
        } else {
            self.set_candidate(callsite_obs);
        }
        self.note_success();
    }

    /// Reject an unprofitable candidate. A prejit root has no call site, so its rejection applies
    /// to the callee.
    pub(crate) fn reject(
        &mut self,
        callee_obs: InlineObservation,
        callsite_obs: InlineObservation,
    ) {
        if self.is_prejit_root {
            self.set_never(callee_obs);
        } else {
            self.set_failure(callsite_obs);
        }
    }
}

/// An inlining policy: a consumer of observations that reaches an [InlineDecision].
pub trait InlinePolicy: fmt::Debug {
    /// The shared legality state.
    fn legal(&self) -> &LegalPolicy;
    fn legal_mut(&mut self) -> &mut LegalPolicy;

    /// The policy's name, as it appears in dumps.
    fn name(&self) -> &'static str;

    fn decision(&self) -> InlineDecision {
        self.legal().decision()
    }

    fn observation(&self) -> InlineObservation {
        self.legal().observation()
    }

    fn is_prejit_root(&self) -> bool {
        self.legal().is_prejit_root()
    }

    fn note_success(&mut self) {
        self.legal_mut().note_success();
    }

    fn note_fatal(&mut self, obs: InlineObservation) {
        self.legal_mut().note_fatal(obs);
    }

    #[cfg(feature = "ykd")]
    fn note_prior_failure(&mut self, obs: InlineObservation) {
        self.legal_mut().note_prior_failure(obs);
    }

    fn note_bool(&mut self, obs: InlineObservation, value: bool);
    fn note_int(&mut self, obs: InlineObservation, value: i32);
    fn note_double(&mut self, obs: InlineObservation, value: f64);

    /// Note the path of inlines from the root method to the call site, outermost first. The last
    /// element is the call site being evaluated.
    fn note_context(&mut self, _chain: &[InlineSite]) {}

    /// Note the IL offset of the call site in its immediate caller.
    fn note_offset(&mut self, _offset: Option<u32>) {}

    /// Decide whether a candidate is profitable. Accepting marks the decision a success.
    fn determine_profitability(&mut self, method_info: &MethodInfo);

    /// Would this inline exceed the strategy's time budget?
    fn budget_check(&self) -> bool;

    /// Should a [InlineDecision::Never] be recorded on the callee, so that later evaluations fail
    /// fast?
    fn propagate_never_to_runtime(&self) -> bool;

    /// The estimated change in code size if this inline happens, in bytes * [SIZE_SCALE].
    fn code_size_estimate(&self) -> i32;

    /// Should this policy's data be preferred when dumping per-method data?
    fn is_data_collection_target(&self) -> bool {
        false
    }

    /// Write the CSV column names for [Self::dump_data].
    fn dump_schema(&self, _w: &mut dyn Write) -> io::Result<()> {
        Ok(())
    }

    /// Write the CSV data supporting this policy's decision.
    fn dump_data(&self, _w: &mut dyn Write) -> io::Result<()> {
        Ok(())
    }

    /// Write this policy's state as XML attributes.
    fn on_dump_xml(&self, _w: &mut dyn Write) -> io::Result<()> {
        Ok(())
    }

    /// Write this policy's state as a single XML element.
    fn dump_xml(&self, w: &mut dyn Write, indent: usize) -> io::Result<()> {
        write!(w, "{:indent$}<{}", "", self.name())?;
        self.on_dump_xml(w)?;
        writeln!(w, " />")
    }
}

/// Write a single XML attribute.
pub(crate) fn xattr(w: &mut dyn Write, name: &str, value: impl Display) -> io::Result<()> {
    write!(w, " {name}=\"{value}\"")
}

/// The concrete policy a strategy hands out.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum PolicyChoice {
    Default,
    Extended,
    Model,
    Profile,
    #[cfg(feature = "ykd")]
    Discretionary,
    #[cfg(feature = "ykd")]
    Random,
    #[cfg(feature = "ykd")]
    Full,
    #[cfg(feature = "ykd")]
    Size,
    #[cfg(feature = "ykd")]
    Replay,
}

impl PolicyChoice {
    /// Choose the policy for `root`. `kind` is a request: the profile policy needs profile data,
    /// and the extended policy is only used for prejit roots, for JIT compilation, or for AOT
    /// compilation favouring speed. The default policy is the fallback for both.
    pub(crate) fn select(kind: PolicyKind, root: &RootMethod, is_prejit_root: bool) -> Self {
        let extended_or_default = || {
            if is_prejit_root || !root.is_prejit || root.is_speed_opt {
                PolicyChoice::Extended
            } else {
                PolicyChoice::Default
            }
        };
        match kind {
            #[cfg(feature = "ykd")]
            PolicyKind::Random => PolicyChoice::Random,
            #[cfg(feature = "ykd")]
            PolicyKind::Replay => PolicyChoice::Replay,
            #[cfg(feature = "ykd")]
            PolicyKind::Size => PolicyChoice::Size,
            #[cfg(feature = "ykd")]
            PolicyKind::Full => PolicyChoice::Full,
            #[cfg(feature = "ykd")]
            PolicyKind::Discretionary => PolicyChoice::Discretionary,
            #[cfg(not(feature = "ykd"))]
            PolicyKind::Random
            | PolicyKind::Replay
            | PolicyKind::Size
            | PolicyKind::Full
            | PolicyKind::Discretionary => {
                log::log(
                    Verbosity::Warning,
                    &format!("the {kind} policy needs the ykd feature"),
                );
                extended_or_default()
            }
            PolicyKind::Model => PolicyChoice::Model,
            PolicyKind::Profile if root.has_profile_data => PolicyChoice::Profile,
            PolicyKind::Profile | PolicyKind::Extended => extended_or_default(),
            PolicyKind::Default => PolicyChoice::Default,
        }
    }

    #[cfg(test)]
    pub(crate) fn name(self) -> &'static str {
        match self {
            PolicyChoice::Default => DefaultPolicy::NAME,
            PolicyChoice::Extended => ExtendedDefaultPolicy::NAME,
            PolicyChoice::Model => ModelPolicy::NAME,
            PolicyChoice::Profile => ProfilePolicy::NAME,
            #[cfg(feature = "ykd")]
            PolicyChoice::Discretionary => DiscretionaryPolicy::NAME,
            #[cfg(feature = "ykd")]
            PolicyChoice::Random => RandomPolicy::NAME,
            #[cfg(feature = "ykd")]
            PolicyChoice::Full => FullPolicy::NAME,
            #[cfg(feature = "ykd")]
            PolicyChoice::Size => SizePolicy::NAME,
            #[cfg(feature = "ykd")]
            PolicyChoice::Replay => ReplayPolicy::NAME,
        }
    }

    pub(crate) fn build(self, env: PolicyEnv) -> PolicyRef {
        match self {
            PolicyChoice::Default => Rc::new(RefCell::new(DefaultPolicy::new(env))),
            PolicyChoice::Extended => Rc::new(RefCell::new(ExtendedDefaultPolicy::new(env))),
            PolicyChoice::Model => Rc::new(RefCell::new(ModelPolicy::new(env))),
            PolicyChoice::Profile => Rc::new(RefCell::new(ProfilePolicy::new(env))),
            #[cfg(feature = "ykd")]
            PolicyChoice::Discretionary => Rc::new(RefCell::new(DiscretionaryPolicy::new(env))),
            #[cfg(feature = "ykd")]
            PolicyChoice::Random => Rc::new(RefCell::new(RandomPolicy::new(env))),
            #[cfg(feature = "ykd")]
            PolicyChoice::Full => Rc::new(RefCell::new(FullPolicy::new(env))),
            #[cfg(feature = "ykd")]
            PolicyChoice::Size => Rc::new(RefCell::new(SizePolicy::new(env))),
            #[cfg(feature = "ykd")]
            PolicyChoice::Replay => Rc::new(RefCell::new(ReplayPolicy::new(env))),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{method::MethodHandle, testing::test_env};
    use proptest::prelude::*;

    fn any_observation() -> impl Strategy<Value = InlineObservation> {
        (1u8..(InlineObservation::UnusedFinal as u8))
            .prop_map(|i| InlineObservation::from_repr(i).unwrap())
    }

    #[derive(Clone, Debug)]
    enum Op {
        Fatal(InlineObservation),
        Failure(InlineObservation),
        Never(InlineObservation),
        Candidate(InlineObservation),
    }

    fn any_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            any_observation()
                .prop_filter("fatal class", |o| o.impact().is_fatal_class())
                .prop_map(Op::Fatal),
            any_observation().prop_map(Op::Failure),
            any_observation().prop_map(Op::Never),
            any_observation().prop_map(Op::Candidate),
        ]
    }

    proptest! {
        #[test]
        fn failure_is_terminal(ops in prop::collection::vec(any_op(), 1..20)) {
            let mut l = LegalPolicy::new(false);
            let mut first_failure = None;
            for op in ops {
                match op {
                    Op::Fatal(o) => l.note_fatal(o),
                    Op::Failure(o) => l.set_failure(o),
                    Op::Never(o) => l.set_never(o),
                    Op::Candidate(o) => l.set_candidate(o),
                }
                match first_failure {
                    None if l.decision().is_failure() => {
                        first_failure = Some((l.decision(), l.observation()));
                    }
                    None => (),
                    Some(x) => prop_assert_eq!(x, (l.decision(), l.observation())),
                }
            }
        }
    }

    #[test]
    fn note_internal_targets() {
        let mut l = LegalPolicy::new(false);
        l.note_fatal(InlineObservation::CalleeHasEh);
        assert_eq!(l.decision(), InlineDecision::Never);
        assert_eq!(l.observation(), InlineObservation::CalleeHasEh);

        let mut l = LegalPolicy::new(false);
        l.note_fatal(InlineObservation::CallsiteIsVirtual);
        assert_eq!(l.decision(), InlineDecision::Failure);

        let mut l = LegalPolicy::new(false);
        l.note_fatal(InlineObservation::CallerDebugCodegen);
        assert_eq!(l.decision(), InlineDecision::Failure);
        // A second fatal observation doesn't displace the first.
        l.note_fatal(InlineObservation::CalleeTooMuchIl);
        assert_eq!(l.observation(), InlineObservation::CallerDebugCodegen);
    }

    #[test]
    fn candidate_and_success() {
        let mut l = LegalPolicy::new(false);
        l.set_candidate(InlineObservation::CalleeIsDiscretionaryInline);
        assert_eq!(l.decision(), InlineDecision::Candidate);
        l.accept(
            InlineObservation::CalleeIsProfitableInline,
            InlineObservation::CallsiteIsProfitableInline,
        );
        assert_eq!(l.decision(), InlineDecision::Success);
        assert_eq!(
            l.observation(),
            InlineObservation::CallsiteIsProfitableInline
        );
        // A late failure is still possible after success...
        l.set_failure(InlineObservation::CallsiteTooManyLocals);
        assert_eq!(l.decision(), InlineDecision::Failure);
        // ...but nothing escapes failure.
        l.set_candidate(InlineObservation::CalleeIsForceInline);
        assert_eq!(l.decision(), InlineDecision::Failure);
    }

    #[test]
    fn prejit_root_rejection_is_never() {
        let mut l = LegalPolicy::new(true);
        l.set_candidate(InlineObservation::CalleeIsDiscretionaryInline);
        l.reject(
            InlineObservation::CalleeNotProfitableInline,
            InlineObservation::CallsiteNotProfitableInline,
        );
        assert_eq!(l.decision(), InlineDecision::Never);
        assert_eq!(
            l.observation(),
            InlineObservation::CalleeNotProfitableInline
        );
    }

    #[test]
    fn selection() {
        let mut root = RootMethod::new(MethodHandle(1), 0x0600_0001, 1, 50);
        assert_eq!(
            PolicyChoice::select(PolicyKind::Extended, &root, false),
            PolicyChoice::Extended
        );
        assert_eq!(
            PolicyChoice::select(PolicyKind::Profile, &root, false),
            PolicyChoice::Extended
        );
        root.is_prejit = true;
        assert_eq!(
            PolicyChoice::select(PolicyKind::Extended, &root, false),
            PolicyChoice::Default
        );
        assert_eq!(
            PolicyChoice::select(PolicyKind::Extended, &root, true),
            PolicyChoice::Extended
        );
        root.is_speed_opt = true;
        assert_eq!(
            PolicyChoice::select(PolicyKind::Extended, &root, false),
            PolicyChoice::Extended
        );
        root.has_profile_data = true;
        assert_eq!(
            PolicyChoice::select(PolicyKind::Profile, &root, false),
            PolicyChoice::Profile
        );
        assert_eq!(
            PolicyChoice::select(PolicyKind::Model, &root, false),
            PolicyChoice::Model
        );
        assert_eq!(
            PolicyChoice::select(PolicyKind::Default, &root, false),
            PolicyChoice::Default
        );
        #[cfg(feature = "ykd")]
        assert_eq!(
            PolicyChoice::select(PolicyKind::Random, &root, false),
            PolicyChoice::Random
        );
    }

    #[test]
    fn built_policies_start_undecided() {
        let choices = [
            PolicyChoice::Default,
            PolicyChoice::Extended,
            PolicyChoice::Model,
            PolicyChoice::Profile,
        ];
        for c in choices {
            let p = c.build(test_env());
            let p = p.borrow();
            assert_eq!(p.name(), c.name());
            assert_eq!(p.decision(), InlineDecision::Undecided);
            assert_eq!(p.observation(), InlineObservation::UnusedInitial);
            assert!(!p.is_prejit_root());
        }
    }

    #[test]
    fn env_limits() {
        let mut env = test_env();
        env.time_estimate = 210;
        env.time_budget = 2100;
        assert!(!env.over_budget(900));
        assert!(env.over_budget(1000));
        assert!(!env.over_inline_limit());
        env.inline_limit = Some(2);
        env.inline_count = 2;
        assert!(env.over_inline_limit());
        env.is_prejit_root = true;
        assert!(!env.over_inline_limit());
    }
}
