//! The replay policy: reproduce the inlines recorded in an XML forest captured by an earlier run.
//! A call site is inlined if, and only if, the log records an inline of the same callee at the
//! same IL offset along the same path of inlines from the same root method.

use super::{
    discretionary::DiscretionaryPolicy, InlinePolicy, LegalPolicy, PolicyEnv,
};
use crate::{
    config::DataLevel,
    context::InlineSite,
    log::{self, Verbosity},
    method::MethodInfo,
    observation::InlineObservation,
};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

/// A replay log, held in memory as lines.
#[derive(Debug)]
pub(crate) struct ReplayLog {
    lines: Vec<String>,
    /// The line after each root method's `<Hash>` element, keyed by (token, hash). `None` records
    /// that the method isn't in the log.
    methods: Mutex<HashMap<(u32, u32), Option<usize>>>,
}

/// Extract the contents of `<name>...</name>` from `line`, ignoring surrounding whitespace.
fn element<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    line.trim()
        .strip_prefix('<')?
        .strip_prefix(name)?
        .strip_prefix('>')?
        .strip_suffix('>')?
        .strip_suffix(name)?
        .strip_suffix("</")
}

fn hex_element(line: &str, name: &str) -> Option<u32> {
    element(line, name).and_then(|x| u32::from_str_radix(x, 16).ok())
}

impl ReplayLog {
    pub(crate) fn parse(s: &str) -> Self {
        Self {
            lines: s.lines().map(str::to_owned).collect(),
            methods: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn load(path: &Path) -> io::Result<Self> {
        Ok(Self::parse(&fs::read_to_string(path)?))
    }

    /// Find the root method `(token, hash)`, returning the line after its `<Hash>` element.
    fn find_method(&self, token: u32, hash: u32) -> Option<usize> {
        *self
            .methods
            .lock()
            .entry((token, hash))
            .or_insert_with(|| {
                let mut i = 0;
                while i + 2 < self.lines.len() {
                    if !self.lines[i].contains("<Method>") {
                        i += 1;
                        continue;
                    }
                    i += 1;
                    if hex_element(&self.lines[i], "Token") != Some(token) {
                        continue;
                    }
                    i += 1;
                    if hex_element(&self.lines[i], "Hash") != Some(hash) {
                        continue;
                    }
                    return Some(i + 1);
                }
                None
            })
    }

    /// Find `site` among the direct inlines of the node whose contents start at line `pos`.
    /// Returns the line to continue searching from for nested inlines, and whether the inline is
    /// marked as the data collection target.
    fn find_inline(&self, mut pos: usize, site: &InlineSite) -> Option<(usize, bool)> {
        let offset = site.offset.unwrap_or(u32::MAX);
        let mut depth = 0;
        let next = |pos: &mut usize| {
            let line = self.lines.get(*pos).map(String::as_str);
            *pos += 1;
            line
        };
        while let Some(line) = next(&mut pos) {
            if line.contains("</Method>") {
                break;
            }
            if line.contains("<Inlines />") {
                if depth == 0 {
                    break;
                }
                continue;
            }
            if line.contains("<Inlines>") {
                depth += 1;
                continue;
            }
            if line.contains("</Inlines>") {
                depth -= 1;
                if depth == 0 {
                    break;
                }
                continue;
            }
            if depth != 1 || !line.contains("<Inline>") {
                continue;
            }
            if next(&mut pos).and_then(|l| hex_element(l, "Token")) != Some(site.token) {
                continue;
            }
            if next(&mut pos).and_then(|l| hex_element(l, "Hash")) != Some(site.hash) {
                continue;
            }
            let found_offset = next(&mut pos)
                .and_then(|l| element(l, "Offset"))
                .and_then(|x| x.parse::<u32>().ok());
            if found_offset != Some(offset) {
                continue;
            }
            let collect = match self
                .lines
                .get(pos)
                .and_then(|l| element(l, "CollectData"))
            {
                Some(x) => {
                    pos += 1;
                    x == "1"
                }
                None => false,
            };
            return Some((pos, collect));
        }
        None
    }

    /// Is the inline at the end of `chain`, within the root method `(token, hash)`, recorded in
    /// the log? Returns `Some(collect)` if so, where `collect` is true if the inline is marked as
    /// the data collection target.
    pub(crate) fn find(&self, token: u32, hash: u32, chain: &[InlineSite]) -> Option<bool> {
        let mut pos = self.find_method(token, hash)?;
        let mut collect = false;
        for site in chain {
            (pos, collect) = self.find_inline(pos, site)?;
        }
        Some(collect)
    }
}

/// The process-wide replay log, and the file it was read from. A log that couldn't be read is
/// cached as `None` so that every call site is rejected.
static REPLAY_LOG: Mutex<Option<(PathBuf, Option<Arc<ReplayLog>>)>> =
    parking_lot::const_mutex(None);

/// The replay log for `path`, read on first use. The first read announces itself on stderr
/// unless `quiet`.
pub(crate) fn shared_log(path: &Path, quiet: bool) -> Option<Arc<ReplayLog>> {
    let mut cache = REPLAY_LOG.lock();
    match &*cache {
        Some((p, log)) if p == path => return log.clone(),
        _ => (),
    }
    let log = match ReplayLog::load(path) {
        Ok(log) => Some(Arc::new(log)),
        Err(e) => {
            log::log(
                Verbosity::Warning,
                &format!("can't read replay file {}: {e}", path.display()),
            );
            None
        }
    };
    if !quiet {
        eprintln!(
            "*** {} inlines from {}",
            if log.is_some() {
                "Replaying"
            } else {
                "Unable to replay"
            },
            path.display()
        );
    }
    *cache = Some((path.to_owned(), log.clone()));
    log
}

#[derive(Debug)]
pub(crate) struct ReplayPolicy {
    discretionary: DiscretionaryPolicy,
    chain: Vec<InlineSite>,
    was_force_inline: bool,
    is_data_collection_target: bool,
}

impl ReplayPolicy {
    pub(super) const NAME: &'static str = "ReplayPolicy";

    pub(crate) fn new(env: PolicyEnv) -> Self {
        Self {
            discretionary: DiscretionaryPolicy::new(env),
            chain: Vec::new(),
            was_force_inline: false,
            is_data_collection_target: false,
        }
    }
}

impl InlinePolicy for ReplayPolicy {
    fn legal(&self) -> &LegalPolicy {
        self.discretionary.legal()
    }

    fn legal_mut(&mut self) -> &mut LegalPolicy {
        self.discretionary.legal_mut()
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn note_bool(&mut self, obs: InlineObservation, mut value: bool) {
        // Force inlines are replayed like any other inline, so the log has the final say.
        if !self.is_prejit_root() && obs == InlineObservation::CalleeIsForceInline {
            self.was_force_inline = value;
            value = false;
        }
        self.discretionary.note_bool(obs, value);
    }

    fn note_int(&mut self, obs: InlineObservation, value: i32) {
        self.discretionary.note_int(obs, value);
    }

    fn note_double(&mut self, obs: InlineObservation, value: f64) {
        self.discretionary.note_double(obs, value);
    }

    fn note_context(&mut self, chain: &[InlineSite]) {
        self.chain = chain.to_vec();
    }

    fn determine_profitability(&mut self, method_info: &MethodInfo) {
        if self.is_prejit_root() {
            self.discretionary.determine_profitability(method_info);
            return;
        }
        let p = &mut self.discretionary;
        if p.default.settled() {
            return;
        }
        if p.env().data_level != DataLevel::Off {
            p.observe_and_estimate(method_info);
            p.default.is_force_inline = self.was_force_inline;
        }
        let env = p.env();
        let found = match &env.replay {
            Some(log) if !self.chain.is_empty() => {
                log.find(env.root_token, env.root_hash, &self.chain)
            }
            _ => None,
        };
        match found {
            Some(collect) => {
                log::log(Verbosity::InlineDecision, "inline accepted via log replay");
                self.is_data_collection_target = collect;
                p.default.legal.accept(
                    InlineObservation::CalleeLogReplayAccept,
                    InlineObservation::CallsiteLogReplayAccept,
                );
            }
            None => {
                log::log(Verbosity::InlineDecision, "inline rejected via log replay");
                p.default.legal.reject(
                    InlineObservation::CalleeLogReplayReject,
                    InlineObservation::CallsiteLogReplayReject,
                );
            }
        }
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

    fn is_data_collection_target(&self) -> bool {
        self.is_data_collection_target
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
}
