//! The XML inline forest. Compilations on different threads share an output, so each method is
//! appended whole under a process-wide lock, and the forest's header is written once per output
//! before the first method.

use crate::config::Output;
use parking_lot::Mutex;
use std::io;

/// The outputs whose header has been written but whose footer has not.
static OPEN_FORESTS: Mutex<Vec<Output>> = parking_lot::const_mutex(Vec::new());

/// The forest's header. `schema` is the CSV schema of the `<Data>` elements, if any.
pub(crate) fn header(policy_name: &str, schema: Option<&str>) -> String {
    let mut s = format!("<?xml version=\"1.0\"?>\n<InlineForest>\n<Policy>{policy_name}</Policy>\n");
    if let Some(schema) = schema {
        s.push_str(&format!("<DataSchema>{schema}</DataSchema>\n"));
    }
    s.push_str("<Methods>\n");
    s
}

/// Append `method` to `output`. If the forest isn't open yet, a file output is emptied and `header`
/// written first. A `method` of `None` only opens the forest.
pub(crate) fn append_method(output: &Output, header: &str, method: Option<&str>) -> io::Result<()> {
    let mut open = OPEN_FORESTS.lock();
    let opening = !open.contains(output);
    let mut s = String::new();
    if opening {
        output.truncate()?;
        s.push_str(header);
    }
    if let Some(m) = method {
        s.push_str(m);
    }
    if !s.is_empty() {
        output.append(&s)?;
    }
    if opening {
        open.push(output.clone());
    }
    Ok(())
}

/// Close the forest written to `output`, if one is open.
pub(crate) fn finalize(output: &Output) -> io::Result<()> {
    let mut open = OPEN_FORESTS.lock();
    if let Some(i) = open.iter().position(|o| o == output) {
        output.append("</Methods>\n</InlineForest>\n")?;
        open.swap_remove(i);
    }
    Ok(())
}

/// Forget every open forest, so that the next method written to any output starts a new one.
pub(crate) fn reset() {
    OPEN_FORESTS.lock().clear();
}
