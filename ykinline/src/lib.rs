//! Inlining decisions for a method JIT.
//!
//! The importer drives this crate. For each compilation it creates an [InlineStrategy]; for each
//! call site it evaluates it creates an [InlineResult], feeds it observations about the callee and
//! the call site, and asks the chosen policy whether the inline is worth it. Successful (and, in
//! `ykd` builds, failed) inlines are recorded in a tree of [InlineContext]s, which is what the
//! text, CSV and XML dumps describe.
//!
//! Configuration comes from `YK_INLINE_*` environment variables (see [config::InlineConfig]) and
//! logging from `YKD_INLINE_LOG`.

#![allow(clippy::comparison_chain)]

pub mod config;
mod context;
pub mod host;
mod log;
pub mod method;
pub mod observation;
mod policy;
mod result;
mod strategy;
#[cfg(test)]
mod testing;

pub use self::context::{ContextIdx, InlineContext, InlineSite};
pub use self::log::stats::InlineStats;
pub use self::policy::{InlinePolicy, LegalPolicy, PolicyRef, SIZE_SCALE};
pub use self::result::InlineResult;
pub use self::strategy::{InlineInfo, InlineStrategy};
