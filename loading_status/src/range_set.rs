use serde::{Deserialize, Serialize};
use std::fmt;

/// A half-open byte range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        // Reversed ranges are representable and count as empty.
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Shifts the range by `offset`, saturating at `u64::MAX`.
    pub fn shifted(&self, offset: u64) -> ByteRange {
        ByteRange {
            start: self.start.saturating_add(offset),
            end: self.end.saturating_add(offset),
        }
    }

    /// Clips the range to `[0, limit)`.
    pub fn clamped(&self, limit: u64) -> ByteRange {
        ByteRange {
            start: self.start.min(limit),
            end: self.end.min(limit),
        }
    }

    fn merge(&self, other: &ByteRange) -> ByteRange {
        ByteRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// A set of disjoint, sorted byte ranges.
///
/// Invariants:
/// - Ranges are stored in ascending order.
/// - No ranges overlap or touch (adjacent ranges are merged).
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeSet {
    ranges: Vec<ByteRange>,
}

impl RangeSet {
    pub fn new() -> Self {
        Self { ranges: Vec::new() }
    }

    pub fn ranges(&self) -> &[ByteRange] {
        &self.ranges
    }

    pub fn total_len(&self) -> u64 {
        self.ranges.iter().map(ByteRange::len).sum()
    }

    /// Returns true if every byte of `[start, end)` is in the set.
    ///
    /// Since ranges never touch, a covered range lies inside a single stored
    /// range.
    pub fn contains_range(&self, start: u64, end: u64) -> bool {
        if start >= end {
            return true;
        }
        let idx = self.ranges.partition_point(|r| r.end <= start);
        match self.ranges.get(idx) {
            Some(r) => r.start <= start && r.end >= end,
            None => false,
        }
    }

    /// Adds `[start, end)`, merging every range it overlaps or touches.
    pub fn insert(&mut self, start: u64, end: u64) {
        let mut merged = ByteRange::new(start, end);
        if merged.is_empty() {
            return;
        }

        // Ranges before `first` end strictly before the new one starts.
        let first = self.ranges.partition_point(|r| r.end < merged.start);
        let mut last = first;
        while let Some(r) = self.ranges.get(last) {
            if r.start > merged.end {
                break;
            }
            merged = merged.merge(r);
            last += 1;
        }
        self.ranges.splice(first..last, std::iter::once(merged));
    }
}
