//! The inline tree of one compilation.
//!
//! Every inline that succeeds, and in `ykd` builds every inline that conclusively fails, becomes an
//! [InlineContext] in a tree rooted at the method being compiled. Contexts live in an arena owned
//! by the [crate::InlineStrategy] and refer to each other by [ContextIdx]. A parent's children are
//! a singly linked list with the newest child first: [ContextTree::children] undoes that so that
//! every dump presents inlines in the order the importer found them.

use crate::{
    config::{DataLevel, XmlLevel},
    host::JitHost,
    method::{CallSite, MethodHandle},
    observation::InlineObservation,
};
#[cfg(feature = "ykd")]
use crate::policy::PolicyRef;
use std::{
    io::{self, Write},
    ops::Index,
};
use typed_index_collections::TiVec;

/// Identify an [InlineContext] within one compilation.
///
/// This is guaranteed to be an index into an array that is freely convertible to/from [usize].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ContextIdx(usize);

impl From<usize> for ContextIdx {
    fn from(v: usize) -> Self {
        Self(v)
    }
}

impl From<ContextIdx> for usize {
    fn from(v: ContextIdx) -> Self {
        v.0
    }
}

/// One step of a path of inlines: the callee's identity and where it was called from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct InlineSite {
    pub token: u32,
    pub hash: u32,
    /// The IL offset of the call in its immediate caller.
    pub offset: Option<u32>,
}

impl InlineSite {
    pub(crate) fn new(host: &dyn JitHost, callee: MethodHandle, offset: Option<u32>) -> Self {
        Self {
            token: host.method_token(callee),
            hash: host.method_hash(callee),
            offset,
        }
    }
}

/// A concluded inline attempt, or the root method.
#[derive(Debug)]
pub struct InlineContext {
    parent: Option<ContextIdx>,
    /// The most recently added child.
    child: Option<ContextIdx>,
    /// The previously added child of our parent.
    sibling: Option<ContextIdx>,
    callee: MethodHandle,
    il_size: u32,
    imported_il_size: u32,
    offset: Option<u32>,
    observation: InlineObservation,
    success: bool,
    devirtualized: bool,
    guarded: bool,
    unboxed: bool,
    code_size_estimate: i32,
    ordinal: u32,
    tree_id: u32,
    #[cfg(feature = "ykd")]
    policy: Option<PolicyRef>,
}

impl InlineContext {
    pub(crate) fn root(method: MethodHandle, il_size: u32) -> Self {
        Self {
            parent: None,
            child: None,
            sibling: None,
            callee: method,
            il_size,
            imported_il_size: il_size,
            offset: None,
            observation: InlineObservation::UnusedInitial,
            success: true,
            devirtualized: false,
            guarded: false,
            unboxed: false,
            code_size_estimate: 0,
            ordinal: 0,
            tree_id: 0,
            #[cfg(feature = "ykd")]
            policy: None,
        }
    }

    /// An attempt to inline `call`. The caller links it into the tree.
    pub(crate) fn attempt(call: &CallSite, observation: InlineObservation, success: bool) -> Self {
        debug_assert!(observation.is_valid());
        Self {
            parent: None,
            child: None,
            sibling: None,
            callee: call.callee,
            il_size: 0,
            imported_il_size: 0,
            offset: call.il_offset,
            observation,
            success,
            devirtualized: call.devirtualized,
            guarded: call.guarded,
            unboxed: call.unboxed,
            code_size_estimate: 0,
            ordinal: 0,
            tree_id: call.tree_id,
            #[cfg(feature = "ykd")]
            policy: None,
        }
    }

    pub(crate) fn set_sizes(&mut self, il_size: u32, imported_il_size: u32, code_size_estimate: i32) {
        self.il_size = il_size;
        self.imported_il_size = imported_il_size;
        self.code_size_estimate = code_size_estimate;
    }

    pub(crate) fn set_ordinal(&mut self, ordinal: u32) {
        self.ordinal = ordinal;
    }

    #[cfg(feature = "ykd")]
    pub(crate) fn set_policy(&mut self, policy: PolicyRef) {
        self.policy = Some(policy);
    }

    pub fn parent(&self) -> Option<ContextIdx> {
        self.parent
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// The method this context inlined, or the root method.
    pub fn callee(&self) -> MethodHandle {
        self.callee
    }

    pub fn il_size(&self) -> u32 {
        self.il_size
    }

    /// How many IL bytes were actually imported. For the root, its IL size.
    pub fn imported_il_size(&self) -> u32 {
        self.imported_il_size
    }

    pub fn offset(&self) -> Option<u32> {
        self.offset
    }

    pub fn observation(&self) -> InlineObservation {
        self.observation
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn is_devirtualized(&self) -> bool {
        self.devirtualized
    }

    pub fn is_guarded(&self) -> bool {
        self.guarded
    }

    pub fn is_unboxed(&self) -> bool {
        self.unboxed
    }

    /// The estimated change in native code size, in bytes * [crate::SIZE_SCALE]. Zero for
    /// failures and the root.
    pub fn code_size_estimate(&self) -> i32 {
        self.code_size_estimate
    }

    /// The success sequence number within the compilation, starting at 1. Zero for failures and
    /// the root.
    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    pub fn tree_id(&self) -> u32 {
        self.tree_id
    }

    #[cfg(feature = "ykd")]
    pub fn policy(&self) -> Option<&PolicyRef> {
        self.policy.as_ref()
    }
}

/// What the XML dump of a tree should contain.
pub(crate) struct XmlOptions<'a> {
    pub(crate) level: XmlLevel,
    pub(crate) data_level: DataLevel,
    pub(crate) last_context: Option<ContextIdx>,
    /// The per-method data line, attached to `last_context` at [DataLevel::PerMethod].
    pub(crate) method_data: Option<&'a str>,
}

#[derive(Debug, Default)]
pub(crate) struct ContextTree {
    contexts: TiVec<ContextIdx, InlineContext>,
}

impl ContextTree {
    pub(crate) fn push_root(&mut self, root: InlineContext) -> ContextIdx {
        debug_assert!(self.contexts.is_empty());
        debug_assert!(root.is_root());
        self.contexts.push_and_get_key(root)
    }

    /// Add `ctx` as the newest child of `parent`.
    pub(crate) fn push_child(&mut self, parent: ContextIdx, mut ctx: InlineContext) -> ContextIdx {
        ctx.parent = Some(parent);
        ctx.sibling = self.contexts[parent].child;
        ctx.child = None;
        let idx = self.contexts.push_and_get_key(ctx);
        self.contexts[parent].child = Some(idx);
        idx
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.contexts.len()
    }

    /// The children of `idx`, oldest first.
    pub(crate) fn children(&self, idx: ContextIdx) -> Vec<ContextIdx> {
        let mut children = Vec::new();
        let mut next = self.contexts[idx].child;
        while let Some(c) = next {
            children.push(c);
            next = self.contexts[c].sibling;
        }
        children.reverse();
        children
    }

    /// `idx` followed by each of its ancestors, ending with the root.
    pub(crate) fn ancestors(&self, idx: ContextIdx) -> impl Iterator<Item = ContextIdx> + '_ {
        std::iter::successors(Some(idx), |c| self.contexts[*c].parent)
    }

    /// Write one line per context, indenting children under their parents.
    pub(crate) fn dump(
        &self,
        w: &mut dyn Write,
        host: &dyn JitHost,
        idx: ContextIdx,
        indent: usize,
    ) -> io::Result<()> {
        let c = &self[idx];
        let token = host.method_token(c.callee);
        let name = host.method_name(c.callee);
        if c.is_root() {
            writeln!(w, "{:indent$}Inlines into {token:08X} {name}", "")?;
        } else {
            let offset = c
                .offset
                .map_or_else(|| "????".to_owned(), |o| format!("{o:04}"));
            writeln!(
                w,
                "{:indent$}[{} IL={offset} TR={:06} {token:08X}] [{}{}{}{}{}] {name}",
                "",
                c.ordinal,
                c.tree_id,
                if c.success { "" } else { "FAILED: " },
                c.observation,
                if c.guarded { " guarded" } else { "" },
                if c.devirtualized { " devirt" } else { "" },
                if c.unboxed { " unboxed" } else { "" },
            )?;
        }
        for child in self.children(idx) {
            self.dump(w, host, child, indent + 2)?;
        }
        Ok(())
    }

    /// Write a CSV line of policy data for each successful inline. The root's line summarises the
    /// compilation instead.
    pub(crate) fn dump_data(
        &self,
        w: &mut dyn Write,
        host: &dyn JitHost,
        idx: ContextIdx,
        indent: usize,
        inline_count: u32,
        policy_name: &str,
    ) -> io::Result<()> {
        let c = &self[idx];
        let name = host.method_name(c.callee);
        if c.is_root() {
            writeln!(w)?;
            writeln!(w, "Inlines [{inline_count}] into \"{name}\" [{policy_name}]")?;
        } else if c.success {
            write!(w, "{:indent$}{},\"{}\",\"{name}\",", "", c.ordinal, c.observation)?;
            #[cfg(feature = "ykd")]
            if let Some(p) = &c.policy {
                p.borrow().dump_data(w)?;
            }
            writeln!(w)?;
        }
        for child in self.children(idx) {
            self.dump_data(w, host, child, indent + 2, inline_count, policy_name)?;
        }
        Ok(())
    }

    /// Write the subtree at `idx` as XML. Every node gets an `<Inlines>` element, even if it has
    /// no children.
    pub(crate) fn dump_xml(
        &self,
        w: &mut dyn Write,
        host: &dyn JitHost,
        idx: ContextIdx,
        indent: usize,
        opts: &XmlOptions,
    ) -> io::Result<()> {
        let c = &self[idx];
        if opts.level == XmlLevel::SuccessesOnly && !c.success {
            return Ok(());
        }
        let kind = if c.success { "Inline" } else { "FailedInline" };
        let mut inner = indent;
        if !c.is_root() {
            inner += 2;
            writeln!(w, "{:indent$}<{kind}>", "")?;
            writeln!(w, "{:inner$}<Token>{:08x}</Token>", "", host.method_token(c.callee))?;
            writeln!(w, "{:inner$}<Hash>{:08x}</Hash>", "", host.method_hash(c.callee))?;
            writeln!(
                w,
                "{:inner$}<Offset>{}</Offset>",
                "",
                c.offset.unwrap_or(u32::MAX)
            )?;
            writeln!(w, "{:inner$}<Reason>{}</Reason>", "", c.observation)?;
            match opts.data_level {
                DataLevel::PerMethod if opts.last_context == Some(idx) => {
                    if let Some(data) = opts.method_data {
                        writeln!(w, "{:inner$}<Data>{data}</Data>", "")?;
                    }
                }
                #[cfg(feature = "ykd")]
                DataLevel::PerInline => {
                    if let Some(p) = &c.policy {
                        let p = p.borrow();
                        write!(w, "{:inner$}<Data>", "")?;
                        p.dump_data(w)?;
                        writeln!(w, "</Data>")?;
                        p.dump_xml(w, inner)?;
                    }
                }
                _ => (),
            }
        }
        if c.child.is_some() {
            writeln!(w, "{:inner$}<Inlines>", "")?;
            for child in self.children(idx) {
                self.dump_xml(w, host, child, inner + 2, opts)?;
            }
            writeln!(w, "{:inner$}</Inlines>", "")?;
        } else {
            writeln!(w, "{:inner$}<Inlines />", "")?;
        }
        if !c.is_root() {
            writeln!(w, "{:indent$}</{kind}>", "")?;
        }
        Ok(())
    }
}

impl Index<ContextIdx> for ContextTree {
    type Output = InlineContext;

    fn index(&self, idx: ContextIdx) -> &Self::Output {
        &self.contexts[idx]
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::MockHost;
    use proptest::prelude::*;

    fn call(n: u64, offset: Option<u32>) -> CallSite {
        CallSite::new(u32::try_from(n).unwrap(), MethodHandle(n), offset)
    }

    fn success(n: u64) -> InlineContext {
        let mut c = InlineContext::attempt(
            &call(n, Some(u32::try_from(n).unwrap() * 4)),
            InlineObservation::CallsiteIsProfitableInline,
            true,
        );
        c.set_ordinal(u32::try_from(n).unwrap());
        c
    }

    fn to_string(f: impl FnOnce(&mut Vec<u8>) -> io::Result<()>) -> String {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    /// root -> {2 -> {4}, 3}, plus a failed 5 under the root.
    fn sample() -> (ContextTree, ContextIdx) {
        let mut t = ContextTree::default();
        let root = t.push_root(InlineContext::root(MethodHandle(1), 50));
        let c2 = t.push_child(root, success(2));
        t.push_child(root, success(3));
        t.push_child(c2, success(4));
        let mut failed = InlineContext::attempt(
            &call(5, None),
            InlineObservation::CalleeTooMuchIl,
            false,
        );
        failed.devirtualized = true;
        t.push_child(root, failed);
        (t, root)
    }

    #[test]
    fn linkage() {
        let (t, root) = sample();
        assert_eq!(t.len(), 5);
        let children = t.children(root);
        assert_eq!(
            children
                .iter()
                .map(|c| t[*c].callee())
                .collect::<Vec<_>>(),
            vec![MethodHandle(2), MethodHandle(3), MethodHandle(5)]
        );
        // Stored newest first.
        assert_eq!(t[root].child, Some(children[2]));
        let c4 = t.children(children[0])[0];
        assert_eq!(
            t.ancestors(c4).collect::<Vec<_>>(),
            vec![c4, children[0], root]
        );
        assert_eq!(t[root].observation(), InlineObservation::UnusedInitial);
        assert!(t[root].is_root());
    }

    #[test]
    fn text_dump() {
        let (t, root) = sample();
        let host = MockHost::default();
        let s = to_string(|w| t.dump(w, &host, root, 0));
        let ptn = "Inlines into 06000001 M1
  [2 IL=0008 TR=000002 06000002] [profitable inline] M2
    [4 IL=0016 TR=000004 06000004] [profitable inline] M4
  [3 IL=0012 TR=000003 06000003] [profitable inline] M3
  [0 IL=???? TR=000005 06000005] [FAILED: too many il bytes devirt] M5
";
        let fmm = fm::FMBuilder::new(ptn).unwrap().build().unwrap();
        if let Err(e) = fmm.matches(&s) {
            panic!("{e}");
        }
    }

    #[test]
    fn data_dump() {
        let (t, root) = sample();
        let host = MockHost::default();
        let s = to_string(|w| t.dump_data(w, &host, root, 0, 3, "DefaultPolicy"));
        let ptn = "
Inlines [3] into \"M1\" [DefaultPolicy]
  2,\"profitable inline\",\"M2\",
    4,\"profitable inline\",\"M4\",
  3,\"profitable inline\",\"M3\",
";
        assert_eq!(s, ptn);
    }

    #[test]
    fn xml_dump() {
        let (t, root) = sample();
        let host = MockHost::default();
        let opts = XmlOptions {
            level: XmlLevel::All,
            data_level: DataLevel::Off,
            last_context: None,
            method_data: None,
        };
        let s = to_string(|w| t.dump_xml(w, &host, root, 0, &opts));
        let ptn = "<Inlines>
  <Inline>
    <Token>06000002</Token>
    <Hash>00000002</Hash>
    <Offset>8</Offset>
    <Reason>profitable inline</Reason>
    <Inlines>
      <Inline>
        ...
        <Inlines />
      </Inline>
    </Inlines>
  </Inline>
  <Inline>
    <Token>06000003</Token>
    ...
    <Inlines />
  </Inline>
  <FailedInline>
    <Token>06000005</Token>
    <Hash>00000005</Hash>
    <Offset>4294967295</Offset>
    <Reason>too many il bytes</Reason>
    <Inlines />
  </FailedInline>
</Inlines>
";
        let fmm = fm::FMBuilder::new(ptn).unwrap().build().unwrap();
        if let Err(e) = fmm.matches(&s) {
            panic!("{e}");
        }

        let opts = XmlOptions {
            level: XmlLevel::SuccessesOnly,
            ..opts
        };
        let s = to_string(|w| t.dump_xml(w, &host, root, 0, &opts));
        assert!(!s.contains("FailedInline"));
        assert!(!s.contains("06000005"));
        assert_eq!(s.matches("<Inline>").count(), 3);
    }

    #[test]
    fn xml_method_data_on_last_context() {
        let (t, root) = sample();
        let host = MockHost::default();
        let last = t.children(root)[1];
        let opts = XmlOptions {
            level: XmlLevel::All,
            data_level: DataLevel::PerMethod,
            last_context: Some(last),
            method_data: Some("06000001,3,1,2,"),
        };
        let s = to_string(|w| t.dump_xml(w, &host, root, 0, &opts));
        assert_eq!(s.matches("<Data>").count(), 1);
        let data = s.find("<Data>06000001,3,1,2,</Data>").unwrap();
        assert!(s.find("<Token>06000003</Token>").unwrap() < data);
        assert!(data < s.find("<Token>06000005</Token>").unwrap());
    }

    proptest! {
        #[test]
        fn children_in_insertion_order(parents in prop::collection::vec(any::<prop::sample::Index>(), 1..40)) {
            let mut t = ContextTree::default();
            let root = t.push_root(InlineContext::root(MethodHandle(0), 10));
            let mut nodes = vec![root];
            let mut expected: Vec<Vec<ContextIdx>> = vec![Vec::new()];
            for p in parents {
                let pi = p.index(nodes.len());
                let idx = t.push_child(nodes[pi], success(u64::try_from(nodes.len()).unwrap()));
                expected[pi].push(idx);
                nodes.push(idx);
                expected.push(Vec::new());
            }
            for (i, n) in nodes.iter().enumerate() {
                prop_assert_eq!(&t.children(*n), &expected[i]);
            }
        }
    }
}
