//! # pruning
//!
//! why: operators decide how much history to keep with a short string;
//! the log needs it as a rule over its segments
//! relations: parsed from LogConfig, consulted by SegmentedRaftLog::prune
//! what: PruningStrategy, SegmentStats, PruningStrategyError

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Size and length of one segment, newest last
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentStats {
    pub entries: u64,
    pub bytes: u64,
}

/// How much history must survive a prune
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruningStrategy {
    KeepAll,
    /// everything but the segment being written
    KeepNone,
    /// at least this many of the newest entries
    Entries(u64),
    /// at least this many bytes of the newest segments
    Size(u64),
    /// this many of the newest segment files
    Files(u64),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid log pruning strategy '{input}': {reason}")]
pub struct PruningStrategyError {
    pub input: String,
    pub reason: String,
}

impl PruningStrategy {
    /// How many of the oldest segments the strategy lets go.
    /// The newest segment is never counted.
    pub fn removable_segments(&self, segments: &[SegmentStats]) -> usize {
        let ceiling = segments.len().saturating_sub(1);
        let count = match *self {
            Self::KeepAll => 0,
            Self::KeepNone => ceiling,
            Self::Files(files) => segments.len().saturating_sub(files.max(1) as usize),
            Self::Entries(wanted) => keep_newest(segments, wanted, |s| s.entries),
            Self::Size(wanted) => keep_newest(segments, wanted, |s| s.bytes),
        };
        count.min(ceiling)
    }
}

/// Walk back from the newest segment until `wanted` is covered; everything
/// older than that segment may go
fn keep_newest(segments: &[SegmentStats], wanted: u64, measure: impl Fn(&SegmentStats) -> u64) -> usize {
    let mut kept = 0u64;
    for (position, stats) in segments.iter().enumerate().rev() {
        kept += measure(stats);
        if kept >= wanted {
            return position;
        }
    }
    0
}

fn parse_amount(input: &str, amount: &str) -> Result<u64, PruningStrategyError> {
    let error = |reason: &str| PruningStrategyError {
        input: input.to_string(),
        reason: reason.to_string(),
    };
    let (digits, multiplier) = match amount.chars().last() {
        Some('k') => (&amount[..amount.len() - 1], 1024),
        Some('m') => (&amount[..amount.len() - 1], 1024 * 1024),
        Some('g') => (&amount[..amount.len() - 1], 1024 * 1024 * 1024),
        _ => (amount, 1),
    };
    let value: u64 = digits.parse().map_err(|_| error("amount is not a number"))?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| error("amount is too large"))
}

impl FromStr for PruningStrategy {
    type Err = PruningStrategyError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "keep_all" | "true" => return Ok(Self::KeepAll),
            "keep_none" | "false" => return Ok(Self::KeepNone),
            _ => {}
        }

        let parts: Vec<&str> = normalized.split_whitespace().collect();
        let [amount, kind] = parts.as_slice() else {
            return Err(PruningStrategyError {
                input: input.to_string(),
                reason: "expected '<amount> <entries|size|files>'".into(),
            });
        };
        let amount = parse_amount(input, amount)?;
        match *kind {
            "entries" => Ok(Self::Entries(amount)),
            "size" => Ok(Self::Size(amount)),
            "files" => Ok(Self::Files(amount)),
            other => Err(PruningStrategyError {
                input: input.to_string(),
                reason: format!("unknown threshold type '{other}'"),
            }),
        }
    }
}

impl fmt::Display for PruningStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeepAll => write!(f, "keep all"),
            Self::KeepNone => write!(f, "keep none"),
            Self::Entries(n) => write!(f, "keep {n} entries"),
            Self::Size(n) => write!(f, "keep {n} bytes"),
            Self::Files(n) => write!(f, "keep {n} files"),
        }
    }
}
