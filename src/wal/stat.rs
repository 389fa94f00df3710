use std::fmt;
use std::fmt::Formatter;

use crate::num::format_pad9_u64;

/// A point-in-time description of the live segment set, for operators and
/// tests. Deliberately free of wall-clock fields so output is
/// deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalStat {
    pub first_index: u64,
    pub last_index: u64,
    /// One entry per live segment, ascending by `base_index`.
    pub segments: Vec<SegmentStat>,
}

impl fmt::Display for WalStat {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let lb = if f.alternate() { "\n" } else { "" };
        let idt = if f.alternate() { "  " } else { "" };
        write!(
            f,
            "WalStat{{{lb} first={}, last={},{lb} segments: [{lb}{idt}{}{lb} ]{lb}}}",
            format_pad9_u64(self.first_index),
            format_pad9_u64(self.last_index),
            self.segments
                .iter()
                .map(|s| format!("{}", s))
                .collect::<Vec<String>>()
                .join(&format!(",{lb}{idt}")),
        )
    }
}

/// Stat line for a single segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentStat {
    pub id: u64,
    pub base_index: u64,
    pub min_index: u64,
    pub max_index: u64,
    pub sealed: bool,
}

impl fmt::Display for SegmentStat {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Segment({}){{base={}, retained=[{}, {}], sealed={}}}",
            self.id,
            format_pad9_u64(self.base_index),
            format_pad9_u64(self.min_index),
            format_pad9_u64(self.max_index),
            self.sealed
        )
    }
}
