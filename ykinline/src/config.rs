//! Inliner configuration, read from `YK_INLINE_*` and `YKD_INLINE_*` environment variables.

use std::{
    env,
    fs::File,
    io::{self, Write},
    path::PathBuf,
    str::FromStr,
};
use strum::{Display, EnumCount, EnumString, FromRepr};
use thiserror::Error;

/// The default maximum IL size of a discretionary candidate.
pub const DEFAULT_MAX_INLINE_SIZE: u32 = 100;
/// The default maximum depth of nested inlines.
pub const DEFAULT_MAX_INLINE_DEPTH: u32 = 20;
/// The default time budget, as a multiple of the root method's time estimate.
pub const DEFAULT_INLINE_BUDGET: u32 = 10;
/// The largest [InlineConfig::max_inline_size] we will honour.
pub const IMPLEMENTATION_MAX_INLINE_SIZE: u32 = u16::MAX as u32;
/// The largest [InlineConfig::max_inline_depth] we will honour.
pub const IMPLEMENTATION_MAX_INLINE_DEPTH: u32 = 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}: invalid value '{value}': {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("YK_INLINE_POLICY: unknown policy '{0}'")]
    UnknownPolicy(String),
    #[error("YK_INLINE_DISABLE_RANGE: invalid range '{0}'")]
    InvalidRange(String),
}

/// Which inlining policy should evaluate candidates?
#[derive(Clone, Copy, Debug, Display, EnumString, Eq, PartialEq)]
#[strum(serialize_all = "snake_case")]
pub enum PolicyKind {
    Default,
    Extended,
    Model,
    Profile,
    Discretionary,
    Random,
    Full,
    Size,
    Replay,
}

/// How much of the inline tree should the XML forest contain?
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, EnumCount, FromRepr, Eq, PartialEq, PartialOrd)]
pub enum XmlLevel {
    #[default]
    Off,
    /// Every method, with successful and failed inlines.
    All,
    /// Only methods with at least one inline.
    InlinesOnly,
    /// Only methods with at least one inline, and only successful inlines.
    SuccessesOnly,
}

/// How much policy data should be dumped?
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, EnumCount, FromRepr, Eq, PartialEq, PartialOrd)]
pub enum DataLevel {
    #[default]
    Off,
    /// One line per method, from the last successful policy, with size and time deltas.
    PerMethod,
    /// One line per successful inline.
    PerInline,
}

/// Where should a dump be written?
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum Output {
    #[default]
    Stderr,
    File(PathBuf),
}

impl Output {
    /// Append `s` to this output.
    pub fn append(&self, s: &str) -> io::Result<()> {
        match self {
            Output::Stderr => io::stderr().lock().write_all(s.as_bytes()),
            Output::File(p) => File::options()
                .create(true)
                .append(true)
                .open(p)?
                .write_all(s.as_bytes()),
        }
    }

    /// Empty this output, if it is a file.
    pub fn truncate(&self) -> io::Result<()> {
        match self {
            Output::Stderr => Ok(()),
            Output::File(p) => File::create(p).map(|_| ()),
        }
    }
}

/// A set of inclusive ranges of method hashes.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MethodRange {
    ranges: Vec<(u32, u32)>,
}

impl MethodRange {
    /// Does this range include `hash`?
    pub fn contains(&self, hash: u32) -> bool {
        self.ranges.iter().any(|(lo, hi)| *lo <= hash && hash <= *hi)
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

impl FromStr for MethodRange {
    type Err = ConfigError;

    /// Parse a comma separated list of hashes `h` or ranges `lo-hi`. Hashes may be decimal or
    /// `0x` prefixed hex.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        fn hash(s: &str, whole: &str) -> Result<u32, ConfigError> {
            let s = s.trim();
            match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(x) => u32::from_str_radix(x, 16),
                None => s.parse::<u32>(),
            }
            .map_err(|_| ConfigError::InvalidRange(whole.to_owned()))
        }

        let mut ranges = Vec::new();
        for part in s.split(',').filter(|x| !x.trim().is_empty()) {
            let (lo, hi) = match part.split_once('-') {
                Some((lo, hi)) => (hash(lo, s)?, hash(hi, s)?),
                None => {
                    let h = hash(part, s)?;
                    (h, h)
                }
            };
            if lo > hi {
                return Err(ConfigError::InvalidRange(s.to_owned()));
            }
            ranges.push((lo, hi));
        }
        Ok(Self { ranges })
    }
}

/// The empirical constants the heuristics are tuned with.
#[derive(Clone, Debug, PartialEq)]
pub struct Tuning {
    /// Callees of at most this many IL bytes are always candidates.
    pub always_inline_size: u32,
    /// Callees with a larger maxstack are never inlined by the default policy.
    pub small_stack_size: u32,
    /// Callees with more basic blocks are never inlined by the default policy.
    pub max_basic_blocks: u32,
    pub simd_multiplier: f64,
    /// Added to every multiplier. Diagnostic.
    pub additional_multiplier: f64,
    pub extended_max_il: u32,
    /// The extended policy's IL limit when trusted profile data is available.
    pub extended_max_il_profile: u32,
    pub extended_max_basic_blocks: u32,
    /// How much the extended policy trusts profile data, in tenths.
    pub profile_trust: u32,
    /// How the extended policy scales profile frequency, in tenths.
    pub profile_scale: u32,
    /// Callers with more locals than this gain nothing from further inlines.
    pub max_locals_to_track: u32,
    pub model_max_il: u32,
    pub profile_max_il: u32,
    /// The profile policy's benefit threshold, in 256ths.
    pub profile_threshold: u32,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            always_inline_size: 16,
            small_stack_size: 16,
            max_basic_blocks: 5,
            simd_multiplier: 3.0,
            additional_multiplier: 0.0,
            extended_max_il: 0x80,
            extended_max_il_profile: 0x400,
            extended_max_basic_blocks: 7,
            profile_trust: 7,
            profile_scale: 42,
            max_locals_to_track: 1024,
            model_max_il: 120,
            profile_max_il: 1000,
            profile_threshold: 40,
        }
    }
}

/// How the inliner should behave for a compilation.
#[derive(Clone, Debug)]
pub struct InlineConfig {
    pub max_inline_size: u32,
    pub max_inline_depth: u32,
    pub policy: PolicyKind,
    /// The time budget, as a multiple of the root method's time estimate.
    pub budget: u32,
    /// Stop accepting inlines after this many successes.
    pub inline_limit: Option<u32>,
    /// Root methods whose hash falls in this range get no inlines.
    pub disable_range: Option<MethodRange>,
    pub random_seed: u64,
    pub replay_file: Option<PathBuf>,
    pub xml_level: XmlLevel,
    pub xml_output: Output,
    pub data_level: DataLevel,
    pub data_output: Output,
    /// Skip all dumps for root methods smaller than this many IL bytes.
    pub dump_floor: u32,
    /// Where to write CSV stats. `None` disables stats.
    pub stats_output: Option<Output>,
    pub tuning: Tuning,
}

impl Default for InlineConfig {
    fn default() -> Self {
        Self {
            max_inline_size: DEFAULT_MAX_INLINE_SIZE,
            max_inline_depth: DEFAULT_MAX_INLINE_DEPTH,
            policy: PolicyKind::Extended,
            budget: DEFAULT_INLINE_BUDGET,
            inline_limit: None,
            disable_range: None,
            random_seed: 0,
            replay_file: None,
            xml_level: XmlLevel::Off,
            xml_output: Output::Stderr,
            data_level: DataLevel::Off,
            data_output: Output::Stderr,
            dump_floor: 0,
            stats_output: None,
            tuning: Tuning::default(),
        }
    }
}

impl InlineConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| env::var(k).ok())
    }

    /// Read the configuration from `lookup`, which maps variable names to values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(v) = lookup("YK_INLINE_MAX_SIZE") {
            cfg.max_inline_size = parse_num("YK_INLINE_MAX_SIZE", &v)?;
        }
        if let Some(v) = lookup("YK_INLINE_MAX_DEPTH") {
            cfg.max_inline_depth = parse_num("YK_INLINE_MAX_DEPTH", &v)?;
        }
        if let Some(v) = lookup("YK_INLINE_POLICY") {
            cfg.policy =
                PolicyKind::from_str(v.trim()).map_err(|_| ConfigError::UnknownPolicy(v.clone()))?;
        }
        if let Some(v) = lookup("YK_INLINE_BUDGET") {
            cfg.budget = parse_num("YK_INLINE_BUDGET", &v)?;
        }
        if let Some(v) = lookup("YK_INLINE_LIMIT") {
            cfg.inline_limit = Some(parse_num("YK_INLINE_LIMIT", &v)?);
        }
        if let Some(v) = lookup("YK_INLINE_DISABLE_RANGE") {
            let r = MethodRange::from_str(&v)?;
            if !r.is_empty() {
                cfg.disable_range = Some(r);
            }
        }
        if let Some(v) = lookup("YK_INLINE_RANDOM_SEED") {
            cfg.random_seed = parse_num("YK_INLINE_RANDOM_SEED", &v)?;
        }
        if let Some(v) = lookup("YK_INLINE_REPLAY_FILE") {
            cfg.replay_file = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("YKD_INLINE_DUMP_XML") {
            let (output, level) = parse_level_spec("YKD_INLINE_DUMP_XML", &v, XmlLevel::COUNT)?;
            cfg.xml_output = output;
            // `parse_level_spec` has checked `level` against `XmlLevel::COUNT`.
            cfg.xml_level = XmlLevel::from_repr(level).unwrap_or_default();
        }
        if let Some(v) = lookup("YKD_INLINE_DUMP_DATA") {
            let (output, level) = parse_level_spec("YKD_INLINE_DUMP_DATA", &v, DataLevel::COUNT)?;
            cfg.data_output = output;
            cfg.data_level = DataLevel::from_repr(level).unwrap_or_default();
        }
        if let Some(v) = lookup("YKD_INLINE_DUMP_FLOOR") {
            cfg.dump_floor = parse_num("YKD_INLINE_DUMP_FLOOR", &v)?;
        }
        if let Some(v) = lookup("YKD_INLINE_STATS") {
            cfg.stats_output = Some(match v.as_str() {
                "-" => Output::Stderr,
                p => Output::File(PathBuf::from(p)),
            });
        }
        Ok(cfg)
    }
}

fn parse_num<T: FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue {
            var,
            value: value.to_owned(),
            reason: e.to_string(),
        })
}

/// Parse `[<path>|-:]<level>`, where `level` must be less than `count`.
fn parse_level_spec(
    var: &'static str,
    value: &str,
    count: usize,
) -> Result<(Output, u8), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidValue {
        var,
        value: value.to_owned(),
        reason,
    };
    let (output, level) = match value.rsplit_once(':') {
        Some(("-", level)) => (Output::Stderr, level),
        Some((path, level)) => (Output::File(PathBuf::from(path)), level),
        None => (Output::Stderr, value),
    };
    let level = level
        .parse::<u8>()
        .map_err(|e| invalid(format!("must be of the format `[<path>|-:]<level>`: {e}")))?;
    if usize::from(level) >= count {
        return Err(invalid(format!(
            "level {level} exceeds maximum {}",
            count - 1
        )));
    }
    Ok((output, level))
}
