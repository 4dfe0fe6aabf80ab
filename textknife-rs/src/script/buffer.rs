//! Named line buffers with a cursor, a mark stack, and the last match.
//!
//! Every buffer is an ordered list of lines (no trailing newlines stored).
//! Columns are counted in characters; conversions to byte offsets happen at
//! the edges where the [`Matcher`] is called.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::RuntimeError;
use crate::pattern::Matcher;

use super::position::{clamp, line_len, Position, PositionSpec};

/// Name of the default buffer.
pub const MAIN_BUFFER: &str = "_main";
/// Name of the buffer external script calls return their results in.
pub const RESULT_BUFFER: &str = "_result";

// ── MatchState ────────────────────────────────────────────────────────────────

/// Outcome of the most recent scan on a buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchState {
    pub found: bool,
    pub start: Position,
    /// Position just past the matched text.
    pub end: Position,
    pub hit: String,
}

// ── Buffer ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Buffer {
    name: String,
    lines: Vec<String>,
    cursor: Position,
    marks: Vec<Position>,
    last_match: MatchState,
    file: Option<PathBuf>,
    replaced: usize,
}

/// Byte index of 1-based `column` in `line`; columns past the end map to `len`.
fn byte_at(line: &str, column: usize) -> usize {
    line.char_indices()
        .nth(column.saturating_sub(1))
        .map(|(i, _)| i)
        .unwrap_or(line.len())
}

/// 1-based column of byte index `byte` in `line`.
fn column_at(line: &str, byte: usize) -> usize {
    line[..byte.min(line.len())].chars().count() + 1
}

/// Split text on `\n` into lines; a lone trailing `\n` does not add a line.
pub fn split_lines(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    text.strip_suffix('\n')
        .unwrap_or(text)
        .split('\n')
        .map(str::to_owned)
        .collect()
}

impl Buffer {
    pub fn new(name: impl Into<String>) -> Self {
        Buffer {
            name: name.into(),
            lines: Vec::new(),
            cursor: Position::ORIGIN,
            marks: vec![Position::ORIGIN],
            last_match: MatchState::default(),
            file: None,
            replaced: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The buffer contents joined with `\n`.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    pub fn cursor(&self) -> Position {
        self.cursor
    }

    pub fn last_match(&self) -> &MatchState {
        &self.last_match
    }

    pub fn file(&self) -> Option<&PathBuf> {
        self.file.as_ref()
    }

    pub fn set_file(&mut self, path: PathBuf) {
        self.file = Some(path);
    }

    /// Substitutions made by the most recent [`Buffer::replace`].
    pub fn replaced(&self) -> usize {
        self.replaced
    }

    /// Text of the cursor line.
    pub fn current_line(&self) -> &str {
        self.lines
            .get(self.cursor.line - 1)
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Replace the whole contents and reset cursor, marks, and match state.
    pub fn set_lines(&mut self, lines: Vec<String>) {
        self.lines = lines;
        self.cursor = Position::ORIGIN;
        self.marks = vec![Position::ORIGIN];
        self.last_match = MatchState::default();
    }

    pub fn append_lines(&mut self, lines: impl IntoIterator<Item = String>) {
        self.lines.extend(lines);
    }

    pub fn clear(&mut self) {
        self.set_lines(Vec::new());
    }

    /// Move the cursor, clamping to the buffer.
    pub fn set_cursor(&mut self, pos: Position) {
        self.cursor = clamp(pos, &self.lines);
    }

    /// Resolve `spec` against the cursor and move there.
    pub fn move_to(&mut self, spec: &PositionSpec) -> Position {
        self.cursor = spec.resolve(self.cursor, &self.lines);
        self.cursor
    }

    pub fn resolve(&self, spec: &PositionSpec) -> Position {
        spec.resolve(self.cursor, &self.lines)
    }

    fn fix_cursor(&mut self) {
        self.cursor = clamp(self.cursor, &self.lines);
    }

    // ── Marks ──────────────────────────────────────────────────────────────────

    pub fn mark(&self) -> Position {
        self.marks.last().copied().unwrap_or(Position::ORIGIN)
    }

    /// Overwrite the top of the mark stack.
    pub fn mark_set(&mut self, pos: Position) {
        let pos = clamp(pos, &self.lines);
        match self.marks.last_mut() {
            Some(top) => *top = pos,
            None => self.marks.push(pos),
        }
    }

    pub fn mark_push(&mut self, pos: Position) {
        let pos = clamp(pos, &self.lines);
        self.marks.push(pos);
    }

    /// Remove the top mark and move the cursor there.
    pub fn mark_pop(&mut self) -> Result<Position, RuntimeError> {
        if self.marks.len() <= 1 {
            return Err(RuntimeError::MarkStackEmpty(self.name.clone()));
        }
        let pos = self.marks.pop().unwrap_or(Position::ORIGIN);
        self.set_cursor(pos);
        Ok(self.cursor)
    }

    /// Swap the cursor with the top mark.
    pub fn mark_exchange(&mut self) {
        let top = self.mark();
        self.mark_set(self.cursor);
        self.set_cursor(top);
    }

    // ── Searching ──────────────────────────────────────────────────────────────

    /// Scan forward from the cursor for `matcher` and record the outcome.
    ///
    /// With `whole_buffer` the buffer is searched as a single text so matches
    /// may span lines; otherwise each line is searched on its own.  When
    /// `advance` is set a successful match moves the cursor to the match end.
    /// An empty match exactly at the cursor is skipped so repeated scans make
    /// progress.
    pub fn search(&mut self, matcher: &dyn Matcher, whole_buffer: bool, advance: bool) -> bool {
        let origin = self.cursor;
        let found = if whole_buffer {
            self.find_joined(matcher, origin)
        } else {
            self.find_by_line(matcher, origin)
        };
        match found {
            Some(state) => {
                if advance {
                    self.cursor = state.end;
                }
                self.last_match = state;
                true
            }
            None => {
                self.last_match = MatchState {
                    found: false,
                    start: origin,
                    end: origin,
                    hit: String::new(),
                };
                false
            }
        }
    }

    fn find_by_line(&self, matcher: &dyn Matcher, origin: Position) -> Option<MatchState> {
        for (idx, line) in self.lines.iter().enumerate().skip(origin.line - 1) {
            let lineno = idx + 1;
            let mut start = if lineno == origin.line {
                byte_at(line, origin.column)
            } else {
                0
            };
            loop {
                let Some(caps) = matcher.find_at(line, start) else { break };
                let s = Position::new(lineno, column_at(line, caps.start()));
                if caps.start() == caps.end() && s == origin {
                    match line[start..].chars().next() {
                        Some(c) => {
                            start += c.len_utf8();
                            continue;
                        }
                        None => break,
                    }
                }
                return Some(MatchState {
                    found: true,
                    start: s,
                    end: Position::new(lineno, column_at(line, caps.end())),
                    hit: caps.whole().to_owned(),
                });
            }
        }
        None
    }

    fn find_joined(&self, matcher: &dyn Matcher, origin: Position) -> Option<MatchState> {
        let text = self.text();
        let mut start = self.byte_offset(origin);
        loop {
            let caps = matcher.find_at(&text, start)?;
            let s = self.position_of(caps.start());
            if caps.start() == caps.end() && s == origin {
                let c = text[start..].chars().next()?;
                start += c.len_utf8();
                continue;
            }
            return Some(MatchState {
                found: true,
                start: s,
                end: self.position_of(caps.end()),
                hit: caps.whole().to_owned(),
            });
        }
    }

    /// Byte offset of `pos` within [`Buffer::text`].
    pub fn byte_offset(&self, pos: Position) -> usize {
        let pos = clamp(pos, &self.lines);
        let before: usize = self
            .lines
            .iter()
            .take(pos.line - 1)
            .map(|l| l.len() + 1)
            .sum();
        let line = self.lines.get(pos.line - 1).map(String::as_str).unwrap_or("");
        before + byte_at(line, pos.column)
    }

    /// Position of byte offset `offset` within [`Buffer::text`].
    pub fn position_of(&self, offset: usize) -> Position {
        let mut rest = offset;
        for (idx, line) in self.lines.iter().enumerate() {
            if rest <= line.len() {
                return Position::new(idx + 1, column_at(line, rest));
            }
            rest -= line.len() + 1;
        }
        let last = self.lines.len().max(1);
        Position::new(last, line_len(&self.lines, last) + 1)
    }

    // ── Editing ────────────────────────────────────────────────────────────────

    /// Splice `text` in at `pos`; embedded newlines split the line.
    ///
    /// The cursor ends up just past the inserted text.
    pub fn insert(&mut self, pos: Position, text: &str) -> Position {
        if self.lines.is_empty() {
            self.lines.push(String::new());
        }
        let pos = clamp(pos, &self.lines);
        let idx = pos.line - 1;
        let at = byte_at(&self.lines[idx], pos.column);
        let tail = self.lines[idx].split_off(at);
        let mut pieces = text.split('\n');
        if let Some(first) = pieces.next() {
            self.lines[idx].push_str(first);
        }
        let mut last_idx = idx;
        for piece in pieces {
            last_idx += 1;
            self.lines.insert(last_idx, piece.to_owned());
        }
        let end_col = self.lines[last_idx].chars().count() + 1;
        self.lines[last_idx].push_str(&tail);
        self.cursor = Position::new(last_idx + 1, end_col);
        self.cursor
    }

    /// Remove the half-open character range `[from, to)` and return it.
    ///
    /// Bounds are clamped; a range crossing line breaks joins the lines.
    pub fn delete_range(&mut self, from: Position, to: Position) -> String {
        if self.lines.is_empty() {
            return String::new();
        }
        let from = clamp(from, &self.lines);
        let to = clamp(to, &self.lines);
        if to <= from {
            return String::new();
        }
        let (fi, ti) = (from.line - 1, to.line - 1);
        let fb = byte_at(&self.lines[fi], from.column);
        let tb = byte_at(&self.lines[ti], to.column);
        let removed;
        if fi == ti {
            removed = self.lines[fi][fb..tb].to_owned();
            self.lines[fi].replace_range(fb..tb, "");
        } else {
            let mut cut = vec![self.lines[fi][fb..].to_owned()];
            cut.extend(self.lines[fi + 1..ti].iter().cloned());
            cut.push(self.lines[ti][..tb].to_owned());
            removed = cut.join("\n");
            let tail = self.lines[ti][tb..].to_owned();
            self.lines[fi].truncate(fb);
            self.lines[fi].push_str(&tail);
            self.lines.drain(fi + 1..=ti);
        }
        self.cursor = from;
        self.fix_cursor();
        removed
    }

    /// Remove `count` whole lines starting at 1-based `first`; returns how many went.
    pub fn delete_lines(&mut self, first: usize, count: usize) -> usize {
        let start = first.max(1) - 1;
        if start >= self.lines.len() {
            return 0;
        }
        let end = start.saturating_add(count).min(self.lines.len());
        self.lines.drain(start..end);
        self.cursor = Position::new(first.max(1), 1);
        self.fix_cursor();
        end - start
    }

    /// Substitute matches of `matcher` with `replacement`.
    ///
    /// * `limit` caps the number of substitutions.
    /// * `whole_buffer` treats the buffer as one text; otherwise each line is
    ///   processed separately and no match spans a line break.
    /// * `filter`, when given, restricts substitution to lines it matches
    ///   (or, in whole-buffer mode, to buffers it matches).
    /// * `range` restricts substitution to the half-open `[from, to)`.
    ///
    /// Records the first substituted match as the buffer's match state.
    pub fn replace(
        &mut self,
        matcher: &dyn Matcher,
        replacement: &str,
        limit: Option<usize>,
        whole_buffer: bool,
        filter: Option<&dyn Matcher>,
        range: Option<(Position, Position)>,
    ) -> usize {
        let count = if whole_buffer {
            self.replace_joined(matcher, replacement, limit, filter, range)
        } else {
            self.replace_by_line(matcher, replacement, limit, filter, range)
        };
        if count == 0 {
            self.last_match = MatchState {
                found: false,
                start: self.cursor,
                end: self.cursor,
                hit: String::new(),
            };
        }
        self.replaced = count;
        self.fix_cursor();
        count
    }

    fn replace_joined(
        &mut self,
        matcher: &dyn Matcher,
        replacement: &str,
        limit: Option<usize>,
        filter: Option<&dyn Matcher>,
        range: Option<(Position, Position)>,
    ) -> usize {
        let text = self.text();
        if filter.is_some_and(|f| !f.is_match(&text)) {
            return 0;
        }
        let (lo, hi) = match range {
            Some((from, to)) => (self.byte_offset(from), self.byte_offset(to)),
            None => (0, text.len()),
        };
        if hi < lo {
            return 0;
        }
        let first = matcher
            .find_at(&text, lo)
            .filter(|caps| caps.end() <= hi)
            .map(|caps| (caps.start(), caps.end(), caps.whole().to_owned()));
        let (rebuilt, count) = matcher.replace_in(&text, lo..hi, replacement, limit);
        if count == 0 {
            return 0;
        }
        if let Some((s, e, hit)) = first {
            self.last_match = MatchState {
                found: true,
                start: self.position_of(s),
                end: self.position_of(e),
                hit,
            };
        }
        self.lines = rebuilt.split('\n').map(str::to_owned).collect();
        count
    }

    fn replace_by_line(
        &mut self,
        matcher: &dyn Matcher,
        replacement: &str,
        limit: Option<usize>,
        filter: Option<&dyn Matcher>,
        range: Option<(Position, Position)>,
    ) -> usize {
        let (first_line, last_line) = match range {
            Some((from, to)) => (from.line, to.line),
            None => (1, self.lines.len()),
        };
        let old = std::mem::take(&mut self.lines);
        let mut out = Vec::with_capacity(old.len());
        let mut total = 0;
        let mut first_hit = None;
        for (idx, line) in old.into_iter().enumerate() {
            let lineno = idx + 1;
            let remaining = limit.map(|n| n.saturating_sub(total));
            if lineno < first_line
                || lineno > last_line
                || remaining == Some(0)
                || filter.is_some_and(|f| !f.is_match(&line))
            {
                out.push(line);
                continue;
            }
            let lo = match range {
                Some((from, _)) if from.line == lineno => byte_at(&line, from.column),
                _ => 0,
            };
            let hi = match range {
                Some((_, to)) if to.line == lineno => byte_at(&line, to.column),
                _ => line.len(),
            };
            if hi < lo {
                out.push(line);
                continue;
            }
            let (rebuilt, count) = matcher.replace_in(&line, lo..hi, replacement, remaining);
            if count == 0 {
                out.push(line);
                continue;
            }
            if first_hit.is_none() {
                first_hit = matcher
                    .find_at(&line, lo)
                    .filter(|caps| caps.end() <= hi)
                    .map(|caps| MatchState {
                        found: true,
                        start: Position::new(out.len() + 1, column_at(&line, caps.start())),
                        end: Position::new(out.len() + 1, column_at(&line, caps.end())),
                        hit: caps.whole().to_owned(),
                    });
            }
            total += count;
            // Lines produced by a replacement containing `\n` are not rescanned.
            out.extend(rebuilt.split('\n').map(str::to_owned));
        }
        self.lines = out;
        if let Some(state) = first_hit {
            self.last_match = state;
        }
        total
    }

    // ── Line-list helpers ──────────────────────────────────────────────────────

    /// Remove and return the first line.
    pub fn shift(&mut self) -> Option<String> {
        if self.lines.is_empty() {
            return None;
        }
        let line = self.lines.remove(0);
        self.fix_cursor();
        Some(line)
    }

    /// Remove and return the last line.
    pub fn pop(&mut self) -> Option<String> {
        let line = self.lines.pop();
        self.fix_cursor();
        line
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn join(&self, sep: &str) -> String {
        self.lines.join(sep)
    }

    /// Replace contents with the pieces of `text` split on `sep`; returns the count.
    pub fn split_from(&mut self, text: &str, sep: &str) -> usize {
        let pieces: Vec<String> = if text.is_empty() {
            Vec::new()
        } else if sep.is_empty() {
            text.chars().map(String::from).collect()
        } else {
            text.split(sep).map(str::to_owned).collect()
        };
        let n = pieces.len();
        self.set_lines(pieces);
        n
    }

    /// Sort lines lexically (byte order).
    pub fn sort(&mut self) {
        self.lines.sort();
    }
}

// ── BufferStore ───────────────────────────────────────────────────────────────

/// Owner of every buffer in an engine instance.
#[derive(Debug, Clone)]
pub struct BufferStore {
    buffers: HashMap<String, Buffer>,
}

impl Default for BufferStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferStore {
    /// A store holding only the empty `_main` buffer.
    pub fn new() -> Self {
        let mut buffers = HashMap::new();
        buffers.insert(MAIN_BUFFER.to_owned(), Buffer::new(MAIN_BUFFER));
        BufferStore { buffers }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.buffers.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<&Buffer, RuntimeError> {
        self.buffers
            .get(name)
            .ok_or_else(|| RuntimeError::UnknownBuffer(name.to_owned()))
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut Buffer, RuntimeError> {
        self.buffers
            .get_mut(name)
            .ok_or_else(|| RuntimeError::UnknownBuffer(name.to_owned()))
    }

    /// Fetch a buffer, creating it empty on first reference.
    pub fn entry(&mut self, name: &str) -> &mut Buffer {
        self.buffers
            .entry(name.to_owned())
            .or_insert_with(|| Buffer::new(name))
    }

    /// Drop every buffer except an emptied `_main`.
    pub fn reset(&mut self) {
        *self = BufferStore::new();
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.buffers.keys().map(String::as_str)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
