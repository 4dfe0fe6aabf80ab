//! Regex literals and the [`Matcher`] capability.
//!
//! Scripts write patterns as literals: `s/pattern/` for a case-sensitive
//! search, `r/pattern/flags` when flags are needed.  The engine only talks to
//! patterns through [`Matcher`] (find from an offset, substitute with capture
//! references), so the concrete regex engine stays swappable.  The default
//! implementation, [`RegexMatcher`], is backed by the [`regex`] crate.
//!
//! ## Flags
//!
//! | Flag | Meaning |
//! |------|---------|
//! | `i`  | ignore case |
//! | `L`  | whole-buffer unit: the buffer is matched as one text, matches may span lines |
//! | `m`  | `^`/`$` match at line boundaries (implied by `L`) |
//! | `s`  | `.` matches a newline |
//! | `x`  | verbose pattern syntax |

use std::ops::Range;
use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use thiserror::Error;

// ── Public types ─────────────────────────────────────────────────────────────

/// Error returned when a pattern literal or pattern cannot be compiled.
#[derive(Debug, Error)]
pub enum PatternError {
    #[error("regex error: {0}")]
    InvalidRegex(#[from] regex::Error),
    #[error("unterminated regex literal: {0}")]
    Unterminated(String),
    #[error("unknown regex flag '{flag}' in {literal}")]
    UnknownFlag { flag: char, literal: String },
}

/// Options attached to a regex literal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RegexFlags {
    pub ignore_case: bool,
    pub whole_buffer: bool,
    pub multi_line: bool,
    pub dot_all: bool,
    pub verbose: bool,
}

/// A parsed `s/…/` or `r/…/flags` literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegexSpec {
    pub pattern: String,
    pub flags: RegexFlags,
}

impl RegexSpec {
    pub fn new(pattern: impl Into<String>) -> Self {
        RegexSpec {
            pattern: pattern.into(),
            flags: RegexFlags::default(),
        }
    }

    pub fn with_flags(mut self, flags: RegexFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Returns `true` if `s` starts with a complete regex literal: `s/` or `r/`,
/// a closing `/`, optional flag letters, then whitespace or the end.
///
/// `s/data.txt` and `s/dir/file.txt` are words, not patterns.
pub fn is_regex_literal(s: &str) -> bool {
    let Some(body) = s.strip_prefix("s/").or_else(|| s.strip_prefix("r/")) else {
        return false;
    };
    let Some(close) = closing_slash(body) else {
        return false;
    };
    let after = &body[close + 1..];
    after
        .trim_start_matches(|c: char| c.is_ascii_alphabetic())
        .chars()
        .next()
        .map_or(true, char::is_whitespace)
}

/// Byte offset of the first unescaped `/` in `body`.
fn closing_slash(body: &str) -> Option<usize> {
    let mut chars = body.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '/' => return Some(i),
            _ => {}
        }
    }
    None
}

/// Parse a regex literal at the start of `s`.
///
/// Returns the spec and the unparsed remainder (leading whitespace trimmed).
/// `\/` inside the pattern stands for a literal slash; other escapes are
/// passed through to the regex engine untouched.
pub fn parse_regex_literal(s: &str) -> Result<(RegexSpec, &str), PatternError> {
    let body = s
        .strip_prefix("s/")
        .or_else(|| s.strip_prefix("r/"))
        .ok_or_else(|| PatternError::Unterminated(s.to_owned()))?;

    let mut pattern = String::new();
    let mut chars = body.char_indices();
    let mut close = None;
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, '/')) => pattern.push('/'),
                Some((_, other)) => {
                    pattern.push('\\');
                    pattern.push(other);
                }
                None => pattern.push('\\'),
            },
            '/' => {
                close = Some(i);
                break;
            }
            c => pattern.push(c),
        }
    }
    let close = close.ok_or_else(|| PatternError::Unterminated(s.to_owned()))?;

    let after = &body[close + 1..];
    let flag_end = after
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(after.len());
    let mut flags = RegexFlags::default();
    for flag in after[..flag_end].chars() {
        match flag {
            'i' => flags.ignore_case = true,
            'L' => {
                flags.whole_buffer = true;
                flags.multi_line = true;
            }
            'm' => flags.multi_line = true,
            's' => flags.dot_all = true,
            'x' => flags.verbose = true,
            other => {
                return Err(PatternError::UnknownFlag {
                    flag: other,
                    literal: s[..s.len() - after.len() + flag_end].to_owned(),
                })
            }
        }
    }
    Ok((RegexSpec { pattern, flags }, after[flag_end..].trim_start()))
}

// ── Matcher capability ────────────────────────────────────────────────────────

/// A compiled pattern the engine can search and substitute with.
pub trait Matcher {
    /// Find the first match starting at byte offset `start` of `text`.
    ///
    /// Anchors keep their meaning relative to the whole `text`: `^` does not
    /// match at `start` unless `start` is a line start.
    fn find_at<'t>(&self, text: &'t str, start: usize) -> Option<Captures<'t>>;

    /// Substitute up to `limit` matches (all when `None`) lying wholly inside
    /// the byte range `span` of `text`.
    ///
    /// Matching runs on the whole `text`, so anchors and word boundaries see
    /// the characters around `span`.  `replacement` may reference capture
    /// groups as `$1`, `${1}`, `${name}`; any other `$` is literal.
    /// Returns the entire new text and the number of substitutions made.
    fn replace_in(
        &self,
        text: &str,
        span: Range<usize>,
        replacement: &str,
        limit: Option<usize>,
    ) -> (String, usize);

    /// Substitute up to `limit` matches anywhere in `text`.
    fn replace(&self, text: &str, replacement: &str, limit: Option<usize>) -> (String, usize) {
        self.replace_in(text, 0..text.len(), replacement, limit)
    }

    /// Returns `true` if the pattern matches anywhere in `text`.
    fn is_match(&self, text: &str) -> bool {
        self.find_at(text, 0).is_some()
    }
}

/// A successful match with access to capture groups.
#[derive(Debug, Clone)]
pub struct Captures<'t> {
    text: &'t str,
    start: usize,
    end: usize,
    /// (start, end) byte offsets per capture group; `None` = group didn't participate.
    groups: Vec<Option<(usize, usize)>>,
}

impl<'t> Captures<'t> {
    /// Byte offset of the match start.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Byte offset just past the match.
    pub fn end(&self) -> usize {
        self.end
    }

    /// The entire matched substring.
    pub fn whole(&self) -> &'t str {
        &self.text[self.start..self.end]
    }

    /// The nth capture group, 1-based.
    pub fn group(&self, n: usize) -> Option<&'t str> {
        self.groups
            .get(n.checked_sub(1)?)?
            .as_ref()
            .map(|&(s, e)| &self.text[s..e])
    }

    /// Number of capture groups (excluding the overall match).
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

// ── regex-backed implementation ───────────────────────────────────────────────

/// [`Matcher`] backed by the `regex` crate.
///
/// Clone is a cheap reference-count increment, not a recompile.
#[derive(Clone)]
pub struct RegexMatcher {
    src: String,
    compiled: Arc<Regex>,
}

impl std::fmt::Debug for RegexMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegexMatcher").field("src", &self.src).finish()
    }
}

impl RegexMatcher {
    /// Compile `spec`.
    pub fn new(spec: &RegexSpec) -> Result<Self, PatternError> {
        let compiled = RegexBuilder::new(&spec.pattern)
            .case_insensitive(spec.flags.ignore_case)
            .multi_line(spec.flags.multi_line)
            .dot_matches_new_line(spec.flags.dot_all)
            .ignore_whitespace(spec.flags.verbose)
            .build()?;
        Ok(RegexMatcher {
            src: spec.pattern.clone(),
            compiled: Arc::new(compiled),
        })
    }

    /// The original pattern source.
    pub fn src(&self) -> &str {
        &self.src
    }
}

impl Matcher for RegexMatcher {
    fn find_at<'t>(&self, text: &'t str, start: usize) -> Option<Captures<'t>> {
        if start > text.len() {
            return None;
        }
        let caps = self.compiled.captures_at(text, start)?;
        let whole = caps.get(0)?;
        let groups = (1..caps.len())
            .map(|i| caps.get(i).map(|m| (m.start(), m.end())))
            .collect();
        Some(Captures {
            text,
            start: whole.start(),
            end: whole.end(),
            groups,
        })
    }

    fn replace_in(
        &self,
        text: &str,
        span: Range<usize>,
        replacement: &str,
        limit: Option<usize>,
    ) -> (String, usize) {
        let end = span.end.min(text.len());
        let template = capture_template(replacement);
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        let mut at = span.start;
        let mut prev_end = None;
        let mut count = 0;
        while at <= end && !limit.is_some_and(|n| count >= n) {
            let Some(caps) = self.compiled.captures_at(text, at) else { break };
            let Some(whole) = caps.get(0) else { break };
            if whole.end() > end {
                break;
            }
            // No empty match directly after the previous one.
            if whole.is_empty() && prev_end == Some(whole.start()) {
                at = next_char(text, whole.start());
                continue;
            }
            out.push_str(&text[last..whole.start()]);
            caps.expand(&template, &mut out);
            last = whole.end();
            prev_end = Some(whole.end());
            count += 1;
            at = if whole.is_empty() {
                next_char(text, whole.end())
            } else {
                whole.end()
            };
        }
        out.push_str(&text[last..]);
        (out, count)
    }
}

fn next_char(text: &str, at: usize) -> usize {
    at + text[at..].chars().next().map_or(1, char::len_utf8)
}

/// Rewrite a replacement into the `regex` crate's template syntax.
///
/// `$12` becomes `${12}` so a following letter is not read as part of a
/// group name; `${…}` passes through; every other `$` is escaped.
fn capture_template(replacement: &str) -> String {
    let mut out = String::with_capacity(replacement.len() + 8);
    let mut rest = replacement;
    while let Some(i) = rest.find('$') {
        out.push_str(&rest[..i]);
        let tail = &rest[i + 1..];
        let digits = tail.len() - tail.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        if digits > 0 {
            out.push_str("${");
            out.push_str(&tail[..digits]);
            out.push('}');
            rest = &tail[digits..];
        } else if let Some(close) = tail.strip_prefix('{').and_then(|t| t.find('}')) {
            out.push('$');
            out.push_str(&tail[..close + 2]);
            rest = &tail[close + 2..];
        } else {
            out.push_str("$$");
            rest = tail;
        }
    }
    out.push_str(rest);
    out
}

/// Compile a spec with the default engine.
pub fn compile(spec: &RegexSpec) -> Result<Arc<dyn Matcher>, PatternError> {
    Ok(Arc::new(RegexMatcher::new(spec)?))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
