//! The implementation of the `YKD_INLINE_LOG` environment variable and the inliner's dump
//! streams.

use std::{env, error::Error, fs::File, io::Write, path::PathBuf, sync::LazyLock};
use strum::{EnumCount, FromRepr};

pub mod stats;
pub mod xml;

/// How verbose should the inliner's logging be?
#[repr(u8)]
#[derive(Copy, Clone, Debug, EnumCount, FromRepr, PartialEq, PartialOrd)]
pub(crate) enum Verbosity {
    /// Disable logging entirely.
    Disabled,
    /// Log errors.
    Error,
    /// Log warnings, including misuse of the legality protocol.
    Warning,
    /// Log each inlining decision.
    InlineDecision,
    /// Log the inputs to each profitability decision.
    InlineTrace,
}

pub(crate) struct Log {
    /// The requested [Verbosity] level for logging.
    level: Verbosity,
    /// The path to write to. A value of `None` means stderr.
    path: Option<PathBuf>,
}

impl Log {
    pub(crate) fn new() -> Result<Self, Box<dyn Error>> {
        Self::from_spec(env::var("YKD_INLINE_LOG").ok().as_deref())
    }

    fn from_spec(spec: Option<&str>) -> Result<Self, Box<dyn Error>> {
        let Some(s) = spec else {
            return Ok(Self {
                path: None,
                level: Verbosity::Error,
            });
        };
        let (path, level) = match s.split(':').collect::<Vec<_>>()[..] {
            [path, level] => {
                if path == "-" {
                    (None, level)
                } else {
                    let path = PathBuf::from(path);
                    // If there's an existing log file, truncate (i.e. empty it), so that later
                    // appends to the log aren't appending to a previous log run.
                    File::create(&path).ok();
                    (Some(path), level)
                }
            }
            [level] => (None, level),
            [..] => {
                return Err("YKD_INLINE_LOG must be of the format `[<path|->:]<level>`".into())
            }
        };
        let level = level
            .parse::<u8>()
            .map_err(|e| format!("Invalid YKD_INLINE_LOG level '{s}': {e}"))?;
        // This unwrap can only fail dynamically if we've got the types wrong statically
        // (i.e. it'll fail as soon as this code is executed for the first time).
        let max_level = u8::try_from(Verbosity::COUNT).unwrap() - 1;
        let level = Verbosity::from_repr(level)
            .ok_or_else(|| format!("YKD_INLINE_LOG level {level} exceeds maximum {max_level}"))?;
        Ok(Self { path, level })
    }

    /// Would a message at `level` be logged?
    pub(crate) fn enabled(&self, level: Verbosity) -> bool {
        level != Verbosity::Disabled && level <= self.level
    }

    /// Log `msg` with the [Verbosity] level `verbosity`.
    ///
    /// # Panics
    ///
    /// If `level == Verbosity::Disabled`.
    pub(crate) fn log(&self, level: Verbosity, msg: &str) {
        if level <= self.level {
            let prefix = match level {
                Verbosity::Disabled => panic!(),
                Verbosity::Error => "yk-inline-error",
                Verbosity::Warning => "yk-inline-warning",
                Verbosity::InlineDecision => "yk-inline-decision",
                Verbosity::InlineTrace => "yk-inline-trace",
            };
            match &self.path {
                Some(p) => {
                    let s = format!("{prefix}: {msg}\n");
                    File::options()
                        .append(true)
                        .open(p)
                        .map(|mut x| x.write(s.as_bytes()))
                        .ok();
                }
                None => {
                    eprintln!("{prefix}: {msg}");
                }
            }
        }
    }
}

static LOG: LazyLock<Log> = LazyLock::new(|| Log::new().unwrap_or_else(|e| panic!("{e}")));

/// Log `msg` at `level` to the process-wide log.
pub(crate) fn log(level: Verbosity, msg: &str) {
    LOG.log(level, msg);
}

/// Would a message at `level` be logged to the process-wide log? Use this to avoid formatting
/// messages nobody will see.
pub(crate) fn enabled(level: Verbosity) -> bool {
    LOG.enabled(level)
}
