//! Source ranges in editor coordinates.
//!
//! Lines and columns are 1-based. The end position is exclusive: it names the
//! position immediately after the last covered character, the convention used
//! by text editors. Positions order lexicographically by `(line, column)`.

use std::cmp::Ordering;
use std::fmt;

/// A single line/column position in source text.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl Ord for Position {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.line, self.column).cmp(&(other.line, other.column))
    }
}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A span of source text, `start` inclusive and `end` exclusive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Range {
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

impl Range {
    pub const fn new(start_line: u32, start_column: u32, end_line: u32, end_column: u32) -> Self {
        Self {
            start_line,
            start_column,
            end_line,
            end_column,
        }
    }

    /// Builds a range from two positions.
    pub const fn from_positions(start: Position, end: Position) -> Self {
        Self::new(start.line, start.column, end.line, end.column)
    }

    /// Zero-width range located at `at`.
    pub const fn point(at: Position) -> Self {
        Self::from_positions(at, at)
    }

    pub const fn start(&self) -> Position {
        Position::new(self.start_line, self.start_column)
    }

    pub const fn end(&self) -> Position {
        Position::new(self.end_line, self.end_column)
    }

    /// Returns true if the range covers no characters.
    pub fn is_empty(&self) -> bool {
        self.end() <= self.start()
    }

    /// Smallest range covering both `self` and `other`.
    pub fn merge(&self, other: &Range) -> Range {
        merge(self, other)
    }

    /// Returns true if `inner` lies within `self`; see [`contains`].
    pub fn contains(&self, inner: &Range, inclusive: bool) -> bool {
        contains(self, inner, inclusive)
    }

    /// Returns true if the two ranges share at least one character.
    pub fn overlaps(&self, other: &Range) -> bool {
        self.start() < other.end() && other.start() < self.end()
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start(), self.end())
    }
}

/// Smallest range whose start is the earlier start and whose end is the later end.
pub fn merge(a: &Range, b: &Range) -> Range {
    Range::from_positions(a.start().min(b.start()), a.end().max(b.end()))
}

/// Merges every range in `ranges`, returning `None` for an empty slice.
pub fn merge_all(ranges: &[Range]) -> Option<Range> {
    let (first, rest) = ranges.split_first()?;
    Some(rest.iter().fold(*first, |acc, range| merge(&acc, range)))
}

/// Returns true iff `outer.start <= inner.start` and `inner.end <= outer.end`.
///
/// With `inclusive = false`, equal ranges are not considered contained.
pub fn contains(outer: &Range, inner: &Range, inclusive: bool) -> bool {
    let within = outer.start() <= inner.start() && inner.end() <= outer.end();
    if inclusive {
        within
    } else {
        within && outer != inner
    }
}
