//! The inlining strategy of one compilation.
//!
//! An [InlineStrategy] owns the tree of [InlineContext]s for one root method, the time and size
//! estimates that make up the inlining budget, and the counters behind the stats stream. It hands
//! out a fresh policy for each evaluation and, once the compilation is over, writes whichever
//! dumps are configured.

use crate::{
    config::{
        DataLevel, InlineConfig, Output, XmlLevel, IMPLEMENTATION_MAX_INLINE_DEPTH,
        IMPLEMENTATION_MAX_INLINE_SIZE,
    },
    context::{ContextIdx, ContextTree, InlineContext, InlineSite, XmlOptions},
    host::JitHost,
    log::{
        self,
        stats::{self, InlineStats},
        xml, Verbosity,
    },
    method::{CallSite, MethodHandle, RootMethod},
    observation::{InlineDecision, InlineObservation},
    policy::{PolicyChoice, PolicyEnv, PolicyRef, SIZE_SCALE},
    result::InlineResult,
};
#[cfg(feature = "ykd")]
use crate::{config::PolicyKind, policy::replay::{self, ReplayLog}};
use parking_lot::Mutex;
#[cfg(feature = "ykd")]
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::io::{self, Write};
#[cfg(feature = "ykd")]
use std::sync::Arc;

/// The outputs that have had the per-method data header written to them.
static DATA_HEADERS_WRITTEN: Mutex<Vec<Output>> = parking_lot::const_mutex(Vec::new());

fn saturating_i32(x: u32) -> i32 {
    i32::try_from(x).unwrap_or(i32::MAX)
}

/// The estimated change in compile time from importing `il_size` IL bytes of an inlinee.
pub(crate) fn estimate_inline_time(il_size: u32) -> i32 {
    saturating_i32(il_size).saturating_mul(2).saturating_sub(14)
}

/// The estimated compile time of a root method with `il_size` IL bytes and no inlines.
fn estimate_root_time(il_size: u32) -> i32 {
    saturating_i32(il_size).saturating_mul(3).saturating_add(60)
}

/// The estimated native size, in bytes * [SIZE_SCALE], of a root method with `il_size` IL bytes.
fn estimate_root_size(il_size: u32) -> i32 {
    saturating_i32(il_size).saturating_mul(228).saturating_add(1312) / 10
}

/// Add `delta` to the size estimate `current`, ignoring deltas that would leave nothing.
fn add_size_delta(current: i32, delta: i32) -> i32 {
    let next = current.saturating_add(delta);
    if next <= 0 {
        current
    } else {
        next
    }
}

/// What the importer knows about an inline that has just succeeded.
pub struct InlineInfo<'a> {
    /// The context of the statement containing the call.
    pub context: ContextIdx,
    pub call: &'a CallSite,
    /// The callee's IL size.
    pub il_size: u32,
}

pub struct InlineStrategy {
    config: InlineConfig,
    root: RootMethod,
    contexts: ContextTree,
    root_context: Option<ContextIdx>,
    /// The most recent success, unless an earlier success was a data collection target.
    last_context: Option<ContextIdx>,
    last_successful_policy: Option<PolicyRef>,
    stats: InlineStats,
    initial_time_estimate: i32,
    current_time_estimate: i32,
    initial_time_budget: i32,
    current_time_budget: i32,
    initial_size_estimate: i32,
    current_size_estimate: i32,
    has_force_via_discretionary: bool,
    prejit_root: Option<(InlineDecision, InlineObservation)>,
    #[cfg(feature = "ykd")]
    rng: StdRng,
    #[cfg(feature = "ykd")]
    replay: Option<Arc<ReplayLog>>,
}

impl InlineStrategy {
    /// Create the strategy for compiling `root`. Limits in `config` beyond what the
    /// implementation supports are clamped.
    pub fn new(config: &InlineConfig, root: RootMethod) -> Self {
        let mut config = config.clone();
        config.max_inline_size = config.max_inline_size.min(IMPLEMENTATION_MAX_INLINE_SIZE);
        config.max_inline_depth = config.max_inline_depth.min(IMPLEMENTATION_MAX_INLINE_DEPTH);

        #[cfg(feature = "ykd")]
        let replay = match (&config.policy, &config.replay_file) {
            (PolicyKind::Replay, Some(p)) => replay::shared_log(p, config.xml_level != XmlLevel::Off),
            (PolicyKind::Replay, None) => {
                log::log(
                    Verbosity::Warning,
                    "the replay policy needs YK_INLINE_REPLAY_FILE: rejecting every inline",
                );
                None
            }
            _ => None,
        };

        Self {
            #[cfg(feature = "ykd")]
            rng: StdRng::seed_from_u64(config.random_seed ^ u64::from(root.hash)),
            #[cfg(feature = "ykd")]
            replay,
            config,
            root,
            contexts: ContextTree::default(),
            root_context: None,
            last_context: None,
            last_successful_policy: None,
            stats: InlineStats::default(),
            initial_time_estimate: 0,
            current_time_estimate: 0,
            initial_time_budget: 0,
            current_time_budget: 0,
            initial_size_estimate: 0,
            current_size_estimate: 0,
            has_force_via_discretionary: false,
            prejit_root: None,
        }
    }

    /// The root context, created (and the budget established) on first use.
    pub fn root_context(&mut self) -> ContextIdx {
        if let Some(idx) = self.root_context {
            return idx;
        }
        let idx = self
            .contexts
            .push_root(InlineContext::root(self.root.handle, self.root.il_size));
        self.initial_time_estimate = estimate_root_time(self.root.il_size);
        self.current_time_estimate = self.initial_time_estimate;
        self.initial_time_budget = self
            .initial_time_estimate
            .saturating_mul(saturating_i32(self.config.budget));
        self.current_time_budget = self.initial_time_budget;
        self.initial_size_estimate = estimate_root_size(self.root.il_size);
        self.current_size_estimate = self.initial_size_estimate;
        self.root_context = Some(idx);
        self.last_context = Some(idx);
        idx
    }

    pub fn root(&self) -> &RootMethod {
        &self.root
    }

    pub fn context(&self, idx: ContextIdx) -> &InlineContext {
        &self.contexts[idx]
    }

    /// The children of `idx` in the order they were inlined.
    pub fn children(&self, idx: ContextIdx) -> Vec<ContextIdx> {
        self.contexts.children(idx)
    }

    pub fn last_context(&self) -> Option<ContextIdx> {
        self.last_context
    }

    /// Has inlining been disabled for this root method by configuration?
    pub fn is_inlining_disabled(&self) -> bool {
        self.config
            .disable_range
            .as_ref()
            .is_some_and(|r| r.contains(self.root.hash))
    }

    pub fn max_inline_size(&self) -> u32 {
        self.config.max_inline_size
    }

    pub fn max_inline_depth(&self) -> u32 {
        self.config.max_inline_depth
    }

    /// Would importing `il_size` more IL bytes exceed the time budget?
    pub fn budget_check(&self, il_size: u32) -> bool {
        let delta = estimate_inline_time(il_size);
        let over = delta.saturating_add(self.current_time_estimate) > self.current_time_budget;
        if over {
            log::log(
                Verbosity::InlineTrace,
                &format!(
                    "budget: delta {delta} takes estimate {} over budget {}",
                    self.current_time_estimate, self.current_time_budget
                ),
            );
        }
        over
    }

    pub fn note_call(&mut self) {
        self.stats.calls += 1;
    }

    pub fn note_candidate(&mut self) {
        debug_assert!(self.stats.candidates < self.stats.calls);
        self.stats.candidates += 1;
    }

    pub fn note_unprofitable(&mut self) {
        self.stats.unprofitable += 1;
    }

    pub fn note_import(&mut self) {
        debug_assert!(self.stats.imports < self.stats.candidates);
        self.stats.imports += 1;
    }

    /// Count an inline about to be attempted under the reason it is a candidate.
    pub fn note_attempt(&mut self, result: &InlineResult) {
        debug_assert!(result.is_candidate());
        match result.observation() {
            InlineObservation::CalleeBelowAlwaysInlineSize => self.stats.always += 1,
            InlineObservation::CalleeIsForceInline => self.stats.force += 1,
            _ => self.stats.discretionary += 1,
        }
    }

    /// Record the outcome of evaluating the root method itself as a prejit root.
    pub fn note_prejit_root(&mut self, result: &InlineResult) {
        debug_assert!(result.policy().borrow().is_prejit_root());
        self.prejit_root = Some((result.decision(), result.observation()));
    }

    pub fn stats(&self) -> InlineStats {
        self.stats
    }

    pub fn call_count(&self) -> u32 {
        self.stats.calls
    }

    pub fn candidate_count(&self) -> u32 {
        self.stats.candidates
    }

    pub fn import_count(&self) -> u32 {
        self.stats.imports
    }

    pub fn inline_count(&self) -> u32 {
        self.stats.inlines
    }

    pub fn initial_time_estimate(&self) -> i32 {
        self.initial_time_estimate
    }

    pub fn current_time_estimate(&self) -> i32 {
        self.current_time_estimate
    }

    pub fn initial_time_budget(&self) -> i32 {
        self.initial_time_budget
    }

    pub fn current_time_budget(&self) -> i32 {
        self.current_time_budget
    }

    pub fn initial_size_estimate(&self) -> i32 {
        self.initial_size_estimate
    }

    pub fn current_size_estimate(&self) -> i32 {
        self.current_size_estimate
    }

    /// Did a discretionary inline bring in a force inline?
    pub fn has_force_via_discretionary(&self) -> bool {
        self.has_force_via_discretionary
    }

    /// A snapshot of this compilation for a new policy.
    pub(crate) fn policy_env(&mut self, is_prejit_root: bool) -> PolicyEnv {
        self.root_context();
        PolicyEnv {
            is_prejit_root,
            max_inline_size: self.config.max_inline_size,
            max_inline_depth: self.config.max_inline_depth,
            time_estimate: self.current_time_estimate,
            time_budget: self.current_time_budget,
            #[cfg(feature = "ykd")]
            initial_size_estimate: self.initial_size_estimate,
            #[cfg(feature = "ykd")]
            current_size_estimate: self.current_size_estimate,
            inline_count: self.stats.inlines,
            inline_limit: self.config.inline_limit,
            has_trusted_profile: self.root.has_trusted_profile,
            #[cfg(feature = "ykd")]
            data_level: self.config.data_level,
            tuning: self.config.tuning.clone(),
            #[cfg(feature = "ykd")]
            random_seed: self.rng.gen(),
            #[cfg(feature = "ykd")]
            root_token: self.root.token,
            #[cfg(feature = "ykd")]
            root_hash: self.root.hash,
            #[cfg(feature = "ykd")]
            replay: self.replay.clone(),
        }
    }

    /// A new policy of the configured kind.
    pub(crate) fn new_policy(&mut self, is_prejit_root: bool) -> PolicyRef {
        let choice = PolicyChoice::select(self.config.policy, &self.root, is_prejit_root);
        choice.build(self.policy_env(is_prejit_root))
    }

    /// Record a successful inline, returning its new context.
    pub fn new_success(&mut self, info: &InlineInfo, result: &InlineResult) -> ContextIdx {
        debug_assert!(result.is_success());
        let mut ctx = InlineContext::attempt(info.call, result.observation(), true);
        ctx.set_sizes(
            info.il_size,
            result.imported_il_size(),
            result.policy().borrow().code_size_estimate(),
        );
        ctx.set_ordinal(self.stats.inlines + 1);
        #[cfg(feature = "ykd")]
        ctx.set_policy(result.policy().clone());
        let idx = self.contexts.push_child(info.context, ctx);
        self.note_outcome(idx, result.policy());
        idx
    }

    /// Record a failed inline of `call` from the statement in `context`.
    #[cfg(feature = "ykd")]
    pub fn new_failure(
        &mut self,
        context: ContextIdx,
        call: &CallSite,
        result: &InlineResult,
    ) -> ContextIdx {
        debug_assert!(result.is_failure());
        let mut ctx = InlineContext::attempt(call, result.observation(), false);
        ctx.set_policy(result.policy().clone());
        let idx = self.contexts.push_child(context, ctx);
        self.note_outcome(idx, result.policy());
        idx
    }

    /// Account for a new context: successes count towards the inline count and the estimates.
    fn note_outcome(&mut self, idx: ContextIdx, policy: &PolicyRef) {
        if !self.contexts[idx].is_success() {
            return;
        }
        self.stats.inlines += 1;

        let keep_last = self
            .last_successful_policy
            .as_ref()
            .is_some_and(|p| p.borrow().is_data_collection_target());
        if keep_last {
            debug_assert!(!policy.borrow().is_data_collection_target());
        } else {
            self.last_context = Some(idx);
            self.last_successful_policy = Some(policy.clone());
        }

        // A force inline grows the budget, but only if every inline above it was forced too.
        let mut all_forced = false;
        for c in self.contexts.ancestors(idx) {
            let c = &self.contexts[c];
            if c.is_root() {
                break;
            }
            if c.observation() != InlineObservation::CalleeIsForceInline {
                if all_forced {
                    self.has_force_via_discretionary = true;
                }
                all_forced = false;
                break;
            }
            all_forced = true;
        }

        let c = &self.contexts[idx];
        let time_delta = estimate_inline_time(c.imported_il_size());
        if all_forced && time_delta > 0 {
            self.current_time_budget = self.current_time_budget.saturating_add(time_delta);
        }
        self.current_time_estimate = self.current_time_estimate.saturating_add(time_delta);
        self.current_size_estimate =
            add_size_delta(self.current_size_estimate, c.code_size_estimate());
    }

    /// The path of inlines leading to `context`, outermost first, not including the root.
    pub(crate) fn inline_chain(&self, context: ContextIdx, host: &dyn JitHost) -> Vec<InlineSite> {
        let mut chain = self
            .contexts
            .ancestors(context)
            .map(|c| &self.contexts[c])
            .filter(|c| !c.is_root())
            .map(|c| InlineSite::new(host, c.callee(), c.offset()))
            .collect::<Vec<_>>();
        chain.reverse();
        chain
    }

    /// Is `callee` already being inlined at `context` or any context above it?
    pub fn find_recursive_inline(
        &self,
        context: ContextIdx,
        callee: MethodHandle,
    ) -> Option<ContextIdx> {
        self.contexts
            .ancestors(context)
            .find(|c| self.contexts[*c].callee() == callee)
    }

    /// Note the depth of a call to `callee` from `context`, or fail it as recursive. Returns the
    /// depth, where a call from the root method has depth 1.
    pub fn check_depth_and_recursion(
        &self,
        context: ContextIdx,
        callee: MethodHandle,
        result: &mut InlineResult,
    ) -> u32 {
        let mut depth = 0;
        for c in self.contexts.ancestors(context) {
            depth += 1;
            if self.contexts[c].callee() == callee {
                result.note_fatal(InlineObservation::CallsiteIsRecursive);
                return depth;
            }
            if depth > IMPLEMENTATION_MAX_INLINE_DEPTH {
                break;
            }
        }
        result.note_int(
            InlineObservation::CallsiteDepth,
            i32::try_from(depth).unwrap_or(i32::MAX),
        );
        depth
    }

    /// Write the inline tree and, if `show_budget`, how the budget was spent.
    pub fn dump(&mut self, w: &mut dyn Write, host: &dyn JitHost, show_budget: bool) -> io::Result<()> {
        let root = self.root_context();
        self.contexts.dump(w, host, root, 0)?;
        if !show_budget {
            return Ok(());
        }
        writeln!(
            w,
            "Budget: initialTime={}, finalTime={}, initialBudget={}, currentBudget={}",
            self.initial_time_estimate,
            self.current_time_estimate,
            self.initial_time_budget,
            self.current_time_budget
        )?;
        if self.current_time_budget > self.initial_time_budget {
            writeln!(
                w,
                "Budget: increased by {} because of force inlines",
                self.current_time_budget - self.initial_time_budget
            )?;
        }
        if self.current_time_estimate > self.current_time_budget {
            writeln!(
                w,
                "Budget: went over budget by {}",
                self.current_time_estimate - self.current_time_budget
            )?;
        }
        if self.has_force_via_discretionary {
            writeln!(w, "Budget: discretionary inline caused a force inline")?;
        }
        writeln!(
            w,
            "Budget: initialSize={}, finalSize={}",
            self.initial_size_estimate, self.current_size_estimate
        )
    }

    /// The policy whose data describes this compilation: the last successful one or, if nothing
    /// was inlined, a new one.
    fn data_policy(&mut self) -> PolicyRef {
        match &self.last_successful_policy {
            Some(p) => p.clone(),
            None => {
                let p = self.new_policy(true);
                self.last_successful_policy = Some(p.clone());
                p
            }
        }
    }

    fn data_schema(policy: &PolicyRef) -> io::Result<String> {
        let mut w = b"Method,Version,SizeEstimate,TimeEstimate,".to_vec();
        policy.borrow().dump_schema(&mut w)?;
        String::from_utf8(w).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// The per-method data line: how far the estimates moved, then the policy's data.
    fn data_line(&self, policy: &PolicyRef) -> io::Result<String> {
        let mut w = format!(
            "{:08X},{},{},{},",
            self.root.token,
            self.stats.inlines,
            (self.current_size_estimate - self.initial_size_estimate) / SIZE_SCALE,
            self.current_time_estimate - self.initial_time_estimate
        )
        .into_bytes();
        policy.borrow().dump_data(&mut w)?;
        String::from_utf8(w).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn dump_data(&mut self, host: &dyn JitHost) -> io::Result<()> {
        let policy = self.data_policy();
        let output = self.config.data_output.clone();
        match self.config.data_level {
            DataLevel::Off => Ok(()),
            DataLevel::PerMethod => {
                let mut s = String::new();
                let mut written = DATA_HEADERS_WRITTEN.lock();
                let needs_header = !written.contains(&output);
                if needs_header {
                    output.truncate()?;
                    let limit = self.config.inline_limit.map_or(-1, i64::from);
                    s.push_str(&format!(
                        "*** Inline Data: Policy={} InlineLimit={limit}\n",
                        policy.borrow().name()
                    ));
                    s.push_str(&Self::data_schema(&policy)?);
                    s.push('\n');
                }
                s.push_str(&self.data_line(&policy)?);
                s.push('\n');
                output.append(&s)?;
                if needs_header {
                    written.push(output);
                }
                Ok(())
            }
            DataLevel::PerInline => {
                let root = self.root_context();
                let mut w = Vec::new();
                self.contexts.dump_data(
                    &mut w,
                    host,
                    root,
                    0,
                    self.stats.inlines,
                    policy.borrow().name(),
                )?;
                output.append(&String::from_utf8_lossy(&w))
            }
        }
    }

    /// This compilation's `<Method>` element.
    fn xml_method(&mut self, host: &dyn JitHost, method_data: Option<&str>) -> io::Result<String> {
        let root = self.root_context();
        let mut w = Vec::new();
        // Method names can contain generic arguments.
        let name = host
            .method_name(self.root.handle)
            .replace('<', "[")
            .replace('>', "]");
        writeln!(w, "<Method>")?;
        writeln!(w, "  <Token>{:08x}</Token>", self.root.token)?;
        writeln!(w, "  <Hash>{:08x}</Hash>", self.root.hash)?;
        writeln!(w, "  <Name>{name}</Name>")?;
        writeln!(w, "  <InlineCount>{}</InlineCount>", self.stats.inlines)?;
        writeln!(
            w,
            "  <SizeEstimate>{}</SizeEstimate>",
            self.current_size_estimate / SIZE_SCALE
        )?;
        writeln!(w, "  <TimeEstimate>{}</TimeEstimate>", self.current_time_estimate)?;
        if let Some((decision, obs)) = self.prejit_root {
            writeln!(w, "  <PrejitDecision>{decision}</PrejitDecision>")?;
            writeln!(w, "  <PrejitObservation>{obs}</PrejitObservation>")?;
        }
        let opts = XmlOptions {
            level: self.config.xml_level,
            data_level: self.config.data_level,
            last_context: self.last_context,
            method_data,
        };
        self.contexts.dump_xml(&mut w, host, root, 2, &opts)?;
        writeln!(w, "</Method>")?;
        String::from_utf8(w).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn dump_xml(&mut self, host: &dyn JitHost) -> io::Result<()> {
        let level = self.config.xml_level;
        if level == XmlLevel::Off || (self.stats.inlines == 0 && level >= XmlLevel::InlinesOnly) {
            return Ok(());
        }
        let policy = self.data_policy();
        let (schema, method_data) = match self.config.data_level {
            DataLevel::Off => (None, None),
            DataLevel::PerMethod => (
                Some(Self::data_schema(&policy)?),
                Some(self.data_line(&policy)?),
            ),
            DataLevel::PerInline => {
                let mut w = Vec::new();
                policy.borrow().dump_schema(&mut w)?;
                (Some(String::from_utf8_lossy(&w).into_owned()), None)
            }
        };
        let header = xml::header(policy.borrow().name(), schema.as_deref());
        let method = self.xml_method(host, method_data.as_deref())?;
        xml::append_method(&self.config.xml_output, &header, Some(&method))
    }

    /// Write the stats, data and XML dumps for this compilation, as configured. Root methods
    /// smaller than the dump floor are skipped.
    pub fn finish(&mut self, host: &dyn JitHost) -> io::Result<()> {
        if self.root.il_size < self.config.dump_floor {
            return Ok(());
        }
        if let Some(output) = &self.config.stats_output {
            stats::write(output, &self.stats)?;
        }
        self.dump_data(host)?;
        self.dump_xml(host)
    }

    /// Close the XML forest of `config`, if any method was written to it.
    pub fn finalize_xml(config: &InlineConfig) -> io::Result<()> {
        if config.xml_level == XmlLevel::Off {
            return Ok(());
        }
        xml::finalize(&config.xml_output)
    }

    /// Forget every XML forest, so that the next method written starts a new one.
    pub fn reset_xml() {
        xml::reset();
    }
}
