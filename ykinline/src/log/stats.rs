//! The CSV stats stream: a header line, then one line of counters per compiled method.

use crate::config::Output;
use parking_lot::Mutex;
use std::io;

const HEADER: &str = "InlineCalls,InlineCandidates,InlineAlways,InlineForce,InlineDiscretionary,\
InlineUnprofitable,InlineEarlyReject,InlineImport,InlineLateReject,InlineSuccess";

/// The outputs that have had a header written to them.
static HEADERS_WRITTEN: Mutex<Vec<Output>> = parking_lot::const_mutex(Vec::new());

/// Counts of the inlining events of one compilation.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct InlineStats {
    /// Calls seen by the importer.
    pub calls: u32,
    /// Calls recognised as inline candidates.
    pub candidates: u32,
    /// Candidates accepted because they were below the always-inline size.
    pub always: u32,
    /// Candidates accepted because they were marked as force inline.
    pub force: u32,
    /// Candidates accepted on their merits.
    pub discretionary: u32,
    /// Discretionary candidates rejected as unprofitable.
    pub unprofitable: u32,
    /// Candidates whose IL import began.
    pub imports: u32,
    /// Successful inlines.
    pub inlines: u32,
}

impl InlineStats {
    /// Candidates rejected before their IL was imported.
    pub fn early_reject(&self) -> u32 {
        let profitable = self.discretionary.saturating_sub(self.unprofitable);
        self.candidates
            .saturating_sub(self.always)
            .saturating_sub(self.force)
            .saturating_sub(profitable)
    }

    /// Candidates rejected after their IL import began.
    pub fn late_reject(&self) -> u32 {
        self.imports.saturating_sub(self.inlines)
    }

    fn csv(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{},{},{}",
            self.calls,
            self.candidates,
            self.always,
            self.force,
            self.discretionary,
            self.unprofitable,
            self.early_reject(),
            self.imports,
            self.late_reject(),
            self.inlines
        )
    }
}

/// Append `stats` to `output`. The first line written to an output is preceded by the header,
/// and a file output is emptied first.
pub(crate) fn write(output: &Output, stats: &InlineStats) -> io::Result<()> {
    let mut written = HEADERS_WRITTEN.lock();
    let needs_header = !written.contains(output);
    let mut s = String::new();
    if needs_header {
        output.truncate()?;
        s.push_str(HEADER);
        s.push('\n');
    }
    s.push_str(&stats.csv());
    s.push('\n');
    output.append(&s)?;
    if needs_header {
        written.push(output.clone());
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;

    #[test]
    fn derived_counts() {
        let s = InlineStats {
            calls: 20,
            candidates: 10,
            always: 2,
            force: 1,
            discretionary: 5,
            unprofitable: 2,
            imports: 6,
            inlines: 5,
        };
        assert_eq!(s.early_reject(), 4);
        assert_eq!(s.late_reject(), 1);
        assert_eq!(s.csv(), "20,10,2,1,5,2,4,6,1,5");
        assert_eq!(InlineStats::default().early_reject(), 0);
    }

    #[test]
    fn header_once_per_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = Output::File(dir.path().join("stats.csv"));
        let s = InlineStats {
            calls: 1,
            ..Default::default()
        };
        write(&out, &s).unwrap();
        write(&out, &s).unwrap();
        let Output::File(p) = &out else { unreachable!() };
        let lines = fs::read_to_string(p).unwrap();
        let lines = lines.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], HEADER);
        assert_eq!(lines[0].split(',').count(), lines[1].split(',').count());
        assert_eq!(lines[1], "1,0,0,0,0,0,0,0,0,0");
    }
}
