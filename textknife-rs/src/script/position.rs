//! Cursor positions, position specs, and character ranges.
//!
//! A [`Position`] is a 1-based `(line, column)` pair.  Columns run from 1 to
//! `len + 1`, where `len + 1` is the end-of-line (append) point.  Scripts
//! address positions with [`PositionSpec`]s:
//!
//! | Spec      | Meaning                                              |
//! |-----------|------------------------------------------------------|
//! | `3:7`     | line 3, column 7                                     |
//! | `+1:-2`   | one line down, two columns left of the base          |
//! | `0:1`     | first column of the last line                        |
//! | `5:0`     | end of line 5                                        |
//! | `+1`      | one line down, column kept                           |
//! | `4`       | line 4, column 1                                     |
//!
//! Resolution clamps to the buffer's extents and never fails.

use std::fmt;
use std::str::FromStr;

/// A 1-based cursor position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub const ORIGIN: Position = Position { line: 1, column: 1 };

    pub fn new(line: usize, column: usize) -> Self {
        Position { line, column }
    }
}

impl Default for Position {
    fn default() -> Self {
        Position::ORIGIN
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

impl FromStr for Position {
    type Err = String;

    /// Parse an absolute `L:C` pair (no relative components, no anchors).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (l, c) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| format!("'{s}' is not a position"))?;
        let line = l.parse().map_err(|_| format!("'{s}' is not a position"))?;
        let column = c.parse().map_err(|_| format!("'{s}' is not a position"))?;
        Ok(Position { line, column })
    }
}

// ── Specs ─────────────────────────────────────────────────────────────────────

/// One component of a position spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coord {
    /// An absolute index; `0` anchors to the last line / end of line.
    Absolute(usize),
    /// An offset from the base position.
    Relative(i64),
}

/// An unresolved position as written in a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionSpec {
    pub line: Coord,
    pub column: Option<Coord>,
}

fn parse_coord(s: &str) -> Option<Coord> {
    if s.is_empty() {
        return None;
    }
    if s.starts_with('+') || s.starts_with('-') {
        if !s[1..].chars().all(|c| c.is_ascii_digit()) || s.len() == 1 {
            return None;
        }
        return s.parse().ok().map(Coord::Relative);
    }
    if !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    s.parse().ok().map(Coord::Absolute)
}

impl PositionSpec {
    /// Parse `L`, `L:C`, with each component absolute or signed-relative.
    pub fn parse(s: &str) -> Option<PositionSpec> {
        let s = s.trim();
        match s.split_once(':') {
            Some((l, c)) => Some(PositionSpec {
                line: parse_coord(l)?,
                column: Some(parse_coord(c)?),
            }),
            None => Some(PositionSpec {
                line: parse_coord(s)?,
                column: None,
            }),
        }
    }

    /// Resolve against `base` within `lines`, clamping to the buffer.
    pub fn resolve(&self, base: Position, lines: &[String]) -> Position {
        let last = lines.len().max(1);
        let line = match self.line {
            Coord::Absolute(0) => last,
            Coord::Absolute(n) => n,
            Coord::Relative(d) => offset(base.line, d),
        }
        .clamp(1, last);

        let eol = line_len(lines, line) + 1;
        let column = match (self.column, self.line) {
            (None, Coord::Absolute(_)) => 1,
            (None, Coord::Relative(_)) => base.column,
            (Some(Coord::Absolute(0)), _) => eol,
            (Some(Coord::Absolute(n)), _) => n,
            (Some(Coord::Relative(d)), _) => offset(base.column, d),
        }
        .clamp(1, eol);

        Position { line, column }
    }
}

fn offset(base: usize, delta: i64) -> usize {
    let base = i64::try_from(base).unwrap_or(i64::MAX);
    usize::try_from(base.saturating_add(delta).max(0)).unwrap_or(0)
}

/// Character length of `line` (1-based); 0 for lines past the end.
pub fn line_len(lines: &[String], line: usize) -> usize {
    line.checked_sub(1)
        .and_then(|i| lines.get(i))
        .map(|l| l.chars().count())
        .unwrap_or(0)
}

/// Clamp `pos` to the buffer's extents.
pub fn clamp(pos: Position, lines: &[String]) -> Position {
    let line = pos.line.clamp(1, lines.len().max(1));
    let column = pos.column.clamp(1, line_len(lines, line) + 1);
    Position { line, column }
}

/// Move `pos` forward by `n` characters; a line break counts as one.
///
/// Stops at the end of the last line.
pub fn step_forward(lines: &[String], pos: Position, n: usize) -> Position {
    let mut pos = clamp(pos, lines);
    let last = lines.len().max(1);
    let mut remaining = n;
    while remaining > 0 {
        let eol = line_len(lines, pos.line) + 1;
        let room = eol - pos.column;
        if remaining <= room {
            pos.column += remaining;
            break;
        }
        if pos.line == last {
            pos.column = eol;
            break;
        }
        remaining -= room + 1;
        pos = Position::new(pos.line + 1, 1);
    }
    pos
}

// ── Ranges ────────────────────────────────────────────────────────────────────

/// How a range's far end is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeEnd {
    Including(Position),
    Excluding(Position),
    Count(usize),
}

/// Compute the half-open character range `[start, end)` for
/// `from|behind start including|excluding|count end`.
///
/// A reversed range collapses to an empty one at its start.
pub fn char_range(
    lines: &[String],
    start: Position,
    start_inclusive: bool,
    end: RangeEnd,
) -> (Position, Position) {
    let start = clamp(start, lines);
    let from = if start_inclusive {
        start
    } else {
        step_forward(lines, start, 1)
    };
    let to = match end {
        RangeEnd::Including(p) => step_forward(lines, p, 1),
        RangeEnd::Excluding(p) => clamp(p, lines),
        RangeEnd::Count(n) => step_forward(lines, from, n),
    };
    if to < from {
        (from, from)
    } else {
        (from, to)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
