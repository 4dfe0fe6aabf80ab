//! Statement AST and script parser.
//!
//! A script is a sequence of lines, one statement per line.  Blank lines and
//! lines starting with `#` are skipped; a trailing `\` joins the next line.
//! `copy <<TAG` opens a heredoc whose body runs verbatim up to a line equal
//! to `TAG`.  Block statements nest:
//!
//! ```text
//! if cond … [else …] endif
//! while cond … endwhile
//! script name … endscript      (top level only)
//! ```
//!
//! Every parse failure carries the script name and the 1-based line number
//! of the offending statement.

use std::collections::HashMap;

use crate::error::{ParseError, ParseErrorKind};
use crate::pattern::{is_regex_literal, parse_regex_literal, RegexSpec};

use super::expand::{is_ident, SigilProfile};
use super::expr::{parse_expr, Expr};
use super::position::PositionSpec;

/// Namespaces whose `ns.fn` form on the right of `=` is a function call.
pub const NAMESPACES: &[&str] = &["string", "buffer", "os", "math"];

// ── Arguments ─────────────────────────────────────────────────────────────────

/// One whitespace-separated argument token.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// Bare word; interpolated.
    Word(String),
    /// `"…"`; escapes resolved at parse time, interpolated at run time.
    Quoted(String),
    /// `'…'`; never interpolated.
    Literal(String),
    /// `~name` (or `!name`).
    Buffer(String),
    /// `s/…/` or `r/…/flags`.
    Regex(RegexSpec),
    /// `key=value`.
    Opt(String, Box<Arg>),
}

impl Arg {
    pub fn buffer_name(&self) -> Option<&str> {
        match self {
            Arg::Buffer(name) => Some(name),
            _ => None,
        }
    }

    /// The bare word, if this is one.
    pub fn word(&self) -> Option<&str> {
        match self {
            Arg::Word(w) => Some(w),
            _ => None,
        }
    }

    pub fn is_word(&self, w: &str) -> bool {
        self.word() == Some(w)
    }
}

fn read_quoted(s: &str, quote: char) -> Result<(String, &str), String> {
    let mut out = String::new();
    let mut chars = s.char_indices().skip(1);
    while let Some((i, c)) = chars.next() {
        match c {
            c if c == quote => return Ok((out, &s[i + c.len_utf8()..])),
            '\\' if quote == '"' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, '"')) => out.push('"'),
                Some((_, '\\')) => out.push('\\'),
                Some((_, other)) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            },
            c => out.push(c),
        }
    }
    Err(format!("unterminated string {s}"))
}

fn classify_bare(word: &str, sigils: SigilProfile) -> Arg {
    match sigils.buffer_ref(word) {
        Some(name) => Arg::Buffer(name.to_owned()),
        None => Arg::Word(word.to_owned()),
    }
}

/// Read one argument from the start of `s` (no leading whitespace).
fn read_arg(s: &str, sigils: SigilProfile) -> Result<(Arg, &str), String> {
    if is_regex_literal(s) {
        let (spec, rest) = parse_regex_literal(s).map_err(|e| e.to_string())?;
        return Ok((Arg::Regex(spec), rest));
    }
    if let Some(q @ ('"' | '\'')) = s.chars().next() {
        let (text, rest) = read_quoted(s, q)?;
        let arg = if q == '"' {
            Arg::Quoted(text)
        } else {
            Arg::Literal(text)
        };
        return Ok((arg, rest));
    }

    let end = s.find(char::is_whitespace).unwrap_or(s.len());
    if let Some(eq) = s[..end].find('=') {
        let key = &s[..eq];
        if is_ident(key) {
            let value = &s[eq + 1..];
            let (arg, rest) = match value.chars().next() {
                Some('"' | '\'') => read_arg(value, sigils)?,
                _ => {
                    let vend = value.find(char::is_whitespace).unwrap_or(value.len());
                    (classify_bare(&value[..vend], sigils), &value[vend..])
                }
            };
            return Ok((Arg::Opt(key.to_owned(), Box::new(arg)), rest));
        }
    }
    Ok((classify_bare(&s[..end], sigils), &s[end..]))
}

/// Split an argument string into tokens.
pub fn split_args(text: &str, sigils: SigilProfile) -> Result<Vec<Arg>, String> {
    let mut args = Vec::new();
    let mut rest = text.trim_start();
    while !rest.is_empty() {
        let (arg, tail) = read_arg(rest, sigils)?;
        args.push(arg);
        rest = tail.trim_start();
    }
    Ok(args)
}

// ── AST ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignKind {
    /// `=`
    Plain,
    /// `:=`
    Numeric,
    /// `?=`
    Conditional,
}

/// Right-hand side of an assignment, or the text of `log` / `stop`.
#[derive(Debug, Clone, PartialEq)]
pub enum Rhs {
    Expr(Expr),
    Call(Call),
    /// A sole quoted, literal, or buffer token.
    Value(Arg),
    /// Several tokens, at least one quoted; rendered and joined by spaces.
    Args(Vec<Arg>),
    /// Raw text, interpolated at run time.
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub namespace: String,
    pub function: String,
    pub args: Vec<Arg>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitScope {
    Local,
    Global,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MoveTarget {
    Regex(RegexSpec),
    Position(Arg),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MarkOp {
    /// Store the cursor into a variable.
    Save(String),
    /// Overwrite the top mark with a position (default: cursor).
    Set(Option<Arg>),
    /// Move the cursor to a saved position.
    Restore(Arg),
    Exchange,
    Push(Option<Arg>),
    Pop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectOp {
    Set(String),
    Push(String),
    Pop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CopySource {
    Args(Vec<Arg>),
    Heredoc { lines: Vec<String>, interpolate: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RangeEndSpec {
    Including(Arg),
    Excluding(Arg),
    Count(Arg),
}

/// `from|behind A including|excluding B` or `from|behind A count N`.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeSpec {
    pub start: Arg,
    pub start_inclusive: bool,
    pub end: RangeEndSpec,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeleteSpec {
    Range(RangeSpec),
    Lines { first: Arg, count: Option<Arg> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CondTest {
    /// `[~buf] s/…/`: scan from the cursor without moving it.
    Regex {
        buffer: Option<String>,
        spec: RegexSpec,
    },
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cond {
    pub negate: bool,
    pub test: CondTest,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Replace {
    pub buffer: Option<String>,
    pub pattern: RegexSpec,
    pub replacement: Arg,
    pub count: Option<Arg>,
    pub filter: Option<RegexSpec>,
    pub range: Option<RangeSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Assign {
        var: String,
        kind: AssignKind,
        rhs: Rhs,
    },
    Call(Call),
    If {
        cond: Cond,
        then_block: Vec<Stmt>,
        else_block: Vec<Stmt>,
    },
    While {
        cond: Cond,
        body: Vec<Stmt>,
    },
    Leave(usize),
    Stop(Option<Rhs>),
    Exit {
        code: Option<Arg>,
        scope: ExitScope,
    },
    /// `None` logs every line of the selected buffer.
    Log(Option<Rhs>),
    Move {
        buffer: Option<String>,
        target: MoveTarget,
    },
    Mark {
        buffer: Option<String>,
        op: MarkOp,
    },
    Select(SelectOp),
    Load {
        buffer: Option<String>,
        path: Arg,
    },
    Store {
        buffer: Option<String>,
        path: Arg,
    },
    Copy {
        append: bool,
        source: CopySource,
        buffer: Option<String>,
    },
    Insert {
        buffer: Option<String>,
        position: Option<Arg>,
        text: Vec<Arg>,
    },
    Delete {
        buffer: Option<String>,
        spec: DeleteSpec,
    },
    Replace(Box<Replace>),
    CallScript {
        target: Arg,
        args: Vec<Arg>,
    },
    Assert(Vec<Arg>),
}

/// A parsed statement with its source location.
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub line: usize,
    /// The logical source line, for tracing.
    pub text: String,
    pub kind: StmtKind,
}

/// A parsed script: top-level statements plus `script … endscript` bodies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Script {
    pub name: String,
    pub body: Vec<Stmt>,
    pub subs: HashMap<String, Vec<Stmt>>,
}

// ── Parser ────────────────────────────────────────────────────────────────────

/// Parse script source into a [`Script`].
pub fn parse_script(name: &str, src: &str, sigils: SigilProfile) -> Result<Script, ParseError> {
    let mut parser = StmtParser {
        script: name,
        lines: src.lines().collect(),
        pos: 0,
        sigils,
        loop_depth: 0,
        block_depth: 0,
        subs: HashMap::new(),
    };
    let (body, _) = parser.parse_block_until(&[], None)?;
    Ok(Script {
        name: name.to_owned(),
        body,
        subs: parser.subs,
    })
}

const CLOSERS: &[&str] = &["else", "endif", "endwhile", "endscript"];

struct StmtParser<'a> {
    script: &'a str,
    lines: Vec<&'a str>,
    pos: usize,
    sigils: SigilProfile,
    loop_depth: usize,
    block_depth: usize,
    subs: HashMap<String, Vec<Stmt>>,
}

impl StmtParser<'_> {
    fn error(&self, line: usize, kind: ParseErrorKind) -> ParseError {
        ParseError {
            script: self.script.to_owned(),
            line,
            kind,
        }
    }

    fn syntax(&self, line: usize, msg: impl Into<String>) -> ParseError {
        self.error(line, ParseErrorKind::Syntax(msg.into()))
    }

    /// Next logical line as `(line number, text)`, skipping blanks and
    /// comments and joining `\` continuations.
    fn next_line(&mut self) -> Option<(usize, String)> {
        while let Some(raw) = self.lines.get(self.pos) {
            let no = self.pos + 1;
            self.pos += 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let mut text = String::new();
            let mut cur = trimmed.to_owned();
            while let Some(stripped) = cur.strip_suffix('\\') {
                text.push_str(stripped);
                cur = match self.lines.get(self.pos) {
                    Some(next) => {
                        self.pos += 1;
                        next.trim().to_owned()
                    }
                    None => String::new(),
                };
            }
            text.push_str(&cur);
            return Some((no, text.trim().to_owned()));
        }
        None
    }

    /// Parse statements until one of `closers` (returned) or end of input.
    ///
    /// `opener` names the enclosing block for the "never closed" error.
    fn parse_block_until(
        &mut self,
        closers: &[&str],
        opener: Option<(&str, usize)>,
    ) -> Result<(Vec<Stmt>, Option<String>), ParseError> {
        let mut stmts = Vec::new();
        loop {
            let Some((no, text)) = self.next_line() else {
                return match opener {
                    Some((kw, line)) => Err(self.error(
                        line,
                        ParseErrorKind::Unclosed {
                            opener: kw.to_owned(),
                            line,
                        },
                    )),
                    None => Ok((stmts, None)),
                };
            };
            let (kw, rest) = split_keyword(&text);
            if closers.contains(&kw) {
                if !rest.is_empty() {
                    return Err(self.syntax(no, format!("unexpected text after '{kw}'")));
                }
                return Ok((stmts, Some(kw.to_owned())));
            }
            if CLOSERS.contains(&kw) {
                return Err(self.error(no, ParseErrorKind::UnmatchedCloser(kw.to_owned())));
            }
            if let Some(stmt) = self.parse_one(no, &text)? {
                stmts.push(stmt);
            }
        }
    }

    fn args(&self, line: usize, text: &str) -> Result<Vec<Arg>, ParseError> {
        split_args(text, self.sigils).map_err(|e| self.syntax(line, e))
    }

    fn parse_one(&mut self, no: usize, text: &str) -> Result<Option<Stmt>, ParseError> {
        let kind = if let Some((var, kind, rhs)) = split_assignment(text) {
            let rhs = self.parse_rhs(no, kind, rhs)?;
            StmtKind::Assign {
                var: var.to_owned(),
                kind,
                rhs,
            }
        } else {
            let (kw, rest) = split_keyword(text);
            match kw {
                "if" => self.parse_if(no, rest)?,
                "while" => self.parse_while(no, rest)?,
                "script" => {
                    self.parse_script_def(no, rest)?;
                    return Ok(None);
                }
                "leave" => self.parse_leave(no, rest)?,
                "stop" => StmtKind::Stop(self.parse_text(no, rest)?),
                "exit" => self.parse_exit(no, rest)?,
                "log" => StmtKind::Log(self.parse_text(no, rest)?),
                "move" => self.parse_move(no, rest)?,
                "mark" => self.parse_mark(no, rest)?,
                "select" => self.parse_select(no, rest)?,
                "load" | "store" => self.parse_file_op(no, kw, rest)?,
                "copy" => self.parse_copy(no, rest)?,
                "insert" => self.parse_insert(no, rest)?,
                "delete" => self.parse_delete(no, rest)?,
                "replace" => self.parse_replace(no, rest)?,
                "call" => {
                    let mut args = self.args(no, rest)?;
                    if args.is_empty() {
                        return Err(self.syntax(no, "call needs a subroutine or script name"));
                    }
                    let target = args.remove(0);
                    StmtKind::CallScript { target, args }
                }
                "assert" => StmtKind::Assert(self.args(no, rest)?),
                _ => match self.parse_call(no, text, false)? {
                    Some(call) => StmtKind::Call(call),
                    None => {
                        return Err(self.error(no, ParseErrorKind::UnknownStatement(kw.to_owned())))
                    }
                },
            }
        };
        Ok(Some(Stmt {
            line: no,
            text: text.to_owned(),
            kind,
        }))
    }

    // ── Blocks ─────────────────────────────────────────────────────────────────

    fn parse_if(&mut self, no: usize, rest: &str) -> Result<StmtKind, ParseError> {
        let cond = self.parse_cond(no, rest)?;
        self.block_depth += 1;
        let (then_block, closer) = self.parse_block_until(&["else", "endif"], Some(("if", no)))?;
        let else_block = if closer.as_deref() == Some("else") {
            self.parse_block_until(&["endif"], Some(("if", no)))?.0
        } else {
            Vec::new()
        };
        self.block_depth -= 1;
        Ok(StmtKind::If {
            cond,
            then_block,
            else_block,
        })
    }

    fn parse_while(&mut self, no: usize, rest: &str) -> Result<StmtKind, ParseError> {
        let cond = self.parse_cond(no, rest)?;
        self.block_depth += 1;
        self.loop_depth += 1;
        let (body, _) = self.parse_block_until(&["endwhile"], Some(("while", no)))?;
        self.loop_depth -= 1;
        self.block_depth -= 1;
        Ok(StmtKind::While { cond, body })
    }

    fn parse_script_def(&mut self, no: usize, rest: &str) -> Result<(), ParseError> {
        if self.block_depth > 0 {
            return Err(self.error(no, ParseErrorKind::NestedScript));
        }
        let name = rest.trim();
        if !is_ident(name) {
            return Err(self.syntax(no, format!("'{name}' is not a valid subroutine name")));
        }
        let saved_loops = std::mem::take(&mut self.loop_depth);
        self.block_depth += 1;
        let (body, _) = self.parse_block_until(&["endscript"], Some(("script", no)))?;
        self.block_depth -= 1;
        self.loop_depth = saved_loops;
        self.subs.insert(name.to_owned(), body);
        Ok(())
    }

    fn parse_leave(&self, no: usize, rest: &str) -> Result<StmtKind, ParseError> {
        let rest = rest.trim();
        let levels = if rest.is_empty() {
            1
        } else {
            rest.parse::<usize>()
                .ok()
                .filter(|&n| n > 0)
                .ok_or_else(|| self.syntax(no, format!("leave expects a positive count, got '{rest}'")))?
        };
        if levels > self.loop_depth {
            return Err(self.error(
                no,
                ParseErrorKind::LeaveDepth {
                    levels,
                    depth: self.loop_depth,
                },
            ));
        }
        Ok(StmtKind::Leave(levels))
    }

    // ── Conditions and right-hand sides ────────────────────────────────────────

    /// `s/…/` or `~buf s/…/` at the start of `s`.
    fn is_regex_test(&self, s: &str) -> bool {
        if is_regex_literal(s) {
            return true;
        }
        let (first, tail) = split_keyword(s);
        self.sigils.buffer_ref(first).is_some() && is_regex_literal(tail)
    }

    fn parse_cond(&self, no: usize, text: &str) -> Result<Cond, ParseError> {
        let mut rest = text.trim();
        let mut negate = false;
        loop {
            if let Some(r) = rest.strip_prefix("not ") {
                negate = !negate;
                rest = r.trim_start();
                continue;
            }
            // `!` before an expression is left to the expression parser.
            if !self.is_regex_test(rest) {
                if let Some(after) = rest.strip_prefix('!').map(str::trim_start) {
                    if self.is_regex_test(after) {
                        negate = !negate;
                        rest = after;
                        continue;
                    }
                }
            }
            break;
        }
        if rest.is_empty() {
            return Err(self.syntax(no, "missing condition"));
        }

        let regex_test = |buffer: Option<String>, lit: &str| -> Result<CondTest, ParseError> {
            let (spec, tail) = parse_regex_literal(lit).map_err(|e| self.syntax(no, e.to_string()))?;
            if !tail.is_empty() {
                return Err(self.syntax(no, format!("unexpected '{tail}' after regex")));
            }
            Ok(CondTest::Regex { buffer, spec })
        };

        let test = if is_regex_literal(rest) {
            regex_test(None, rest)?
        } else {
            let (first, tail) = split_keyword(rest);
            match self.sigils.buffer_ref(first) {
                Some(name) if is_regex_literal(tail) => regex_test(Some(name.to_owned()), tail)?,
                _ => CondTest::Expr(
                    parse_expr(rest, self.sigils).map_err(|e| self.syntax(no, e))?,
                ),
            }
        };
        Ok(Cond { negate, test })
    }

    /// `ns.fn args…` at the start of `text`.  With `known_only`, the
    /// namespace must be one of [`NAMESPACES`].
    fn parse_call(&self, no: usize, text: &str, known_only: bool) -> Result<Option<Call>, ParseError> {
        let (head, rest) = split_keyword(text);
        let Some((ns, func)) = head.split_once('.') else {
            return Ok(None);
        };
        if !is_ident(ns) || !is_ident(func) || (known_only && !NAMESPACES.contains(&ns)) {
            return Ok(None);
        }
        Ok(Some(Call {
            namespace: ns.to_owned(),
            function: func.to_owned(),
            args: self.args(no, rest)?,
        }))
    }

    fn parse_rhs(&self, no: usize, kind: AssignKind, rhs: &str) -> Result<Rhs, ParseError> {
        let rhs = rhs.trim();
        if let Some(call) = self.parse_call(no, rhs, true)? {
            return Ok(Rhs::Call(call));
        }
        match kind {
            AssignKind::Numeric => parse_expr(rhs, self.sigils)
                .map(Rhs::Expr)
                .map_err(|e| self.syntax(no, e)),
            _ => Ok(self.text_rhs(rhs)),
        }
    }

    fn text_rhs(&self, text: &str) -> Rhs {
        match split_args(text, self.sigils) {
            Ok(mut args)
                if args.len() == 1
                    && matches!(args[0], Arg::Quoted(_) | Arg::Literal(_) | Arg::Buffer(_)) =>
            {
                Rhs::Value(args.remove(0))
            }
            Ok(args)
                if args.iter().any(|a| matches!(a, Arg::Quoted(_) | Arg::Literal(_)))
                    && !args.iter().any(|a| matches!(a, Arg::Regex(_))) =>
            {
                Rhs::Args(args)
            }
            _ => Rhs::Text(text.to_owned()),
        }
    }

    fn parse_text(&self, _no: usize, rest: &str) -> Result<Option<Rhs>, ParseError> {
        let rest = rest.trim();
        Ok((!rest.is_empty()).then(|| self.text_rhs(rest)))
    }

    // ── Simple statements ──────────────────────────────────────────────────────

    fn parse_exit(&self, no: usize, rest: &str) -> Result<StmtKind, ParseError> {
        let mut args = self.args(no, rest)?;
        let mut scope = ExitScope::Local;
        if let Some(last) = args.last() {
            if last.is_word("global") || last.is_word("local") {
                if last.is_word("global") {
                    scope = ExitScope::Global;
                }
                args.pop();
            }
        }
        if args.len() > 1 {
            return Err(self.syntax(no, "usage: exit [code] [local|global]"));
        }
        Ok(StmtKind::Exit {
            code: args.pop(),
            scope,
        })
    }

    /// Strip a leading buffer reference from `args`.
    fn take_buffer(args: &mut Vec<Arg>) -> Option<String> {
        match args.first() {
            Some(Arg::Buffer(name)) => {
                let name = name.clone();
                args.remove(0);
                Some(name)
            }
            _ => None,
        }
    }

    fn parse_move(&self, no: usize, rest: &str) -> Result<StmtKind, ParseError> {
        let mut args = self.args(no, rest)?;
        let buffer = Self::take_buffer(&mut args);
        if args.len() != 1 {
            return Err(self.syntax(no, "usage: move [~buffer] position|regex"));
        }
        let target = match args.remove(0) {
            Arg::Regex(spec) => MoveTarget::Regex(spec),
            other => MoveTarget::Position(other),
        };
        Ok(StmtKind::Move { buffer, target })
    }

    fn parse_mark(&self, no: usize, rest: &str) -> Result<StmtKind, ParseError> {
        let mut args = self.args(no, rest)?;
        let buffer = Self::take_buffer(&mut args);
        if args.is_empty() {
            return Err(self.syntax(no, "mark needs an operation"));
        }
        let op_word = args.remove(0);
        let operand = match args.len() {
            0 => None,
            1 => args.pop(),
            _ => return Err(self.syntax(no, "too many arguments to mark")),
        };
        let op = match (op_word.word(), operand) {
            (Some("save"), Some(Arg::Word(var))) if is_ident(&var) => MarkOp::Save(var),
            (Some("save"), _) => return Err(self.syntax(no, "usage: mark save variable")),
            (Some("restore"), Some(arg)) => MarkOp::Restore(arg),
            (Some("restore"), None) => return Err(self.syntax(no, "usage: mark restore variable")),
            (Some("set"), arg) => MarkOp::Set(arg),
            (Some("push"), arg) => MarkOp::Push(arg),
            (Some("pop"), None) => MarkOp::Pop,
            (Some("exchange"), None) => MarkOp::Exchange,
            _ => return Err(self.syntax(no, format!("unknown mark operation: {rest}"))),
        };
        Ok(StmtKind::Mark { buffer, op })
    }

    fn parse_select(&self, no: usize, rest: &str) -> Result<StmtKind, ParseError> {
        let args = self.args(no, rest)?;
        let name_of = |arg: &Arg| -> Option<String> {
            match arg {
                Arg::Buffer(name) => Some(name.clone()),
                Arg::Word(w) if is_ident(w) => Some(w.clone()),
                _ => None,
            }
        };
        let op = match args.as_slice() {
            [a] if a.is_word("pop") => SelectOp::Pop,
            [p, b] if p.is_word("push") => {
                SelectOp::Push(name_of(b).ok_or_else(|| self.syntax(no, "select push needs a buffer"))?)
            }
            [b] => SelectOp::Set(name_of(b).ok_or_else(|| self.syntax(no, "select needs a buffer"))?),
            _ => return Err(self.syntax(no, "usage: select [push] ~buffer | select pop")),
        };
        Ok(StmtKind::Select(op))
    }

    fn parse_file_op(&self, no: usize, kw: &str, rest: &str) -> Result<StmtKind, ParseError> {
        let mut args = self.args(no, rest)?;
        let buffer = Self::take_buffer(&mut args);
        if args.len() != 1 {
            return Err(self.syntax(no, format!("usage: {kw} [~buffer] path")));
        }
        let path = args.remove(0);
        Ok(if kw == "load" {
            StmtKind::Load { buffer, path }
        } else {
            StmtKind::Store { buffer, path }
        })
    }

    fn parse_copy(&mut self, no: usize, rest: &str) -> Result<StmtKind, ParseError> {
        let mut rest = rest.trim();
        let mut append = false;
        if let Some(r) = rest.strip_prefix("append") {
            if r.is_empty() || r.starts_with(char::is_whitespace) {
                append = true;
                rest = r.trim_start();
            }
        }

        if let Some(heredoc) = rest.strip_prefix("<<") {
            let (tag_token, tail) = split_keyword(heredoc);
            let (tag, interpolate) = match tag_token.chars().next() {
                Some(q @ ('\'' | '"')) => {
                    let inner = tag_token
                        .strip_prefix(q)
                        .and_then(|t| t.strip_suffix(q))
                        .ok_or_else(|| self.error(no, ParseErrorKind::Heredoc(format!("bad tag {tag_token}"))))?;
                    (inner, false)
                }
                _ => (tag_token, true),
            };
            if tag.is_empty() || !tag.chars().all(|c| c.is_alphanumeric() || c == '_') {
                return Err(self.error(no, ParseErrorKind::Heredoc(format!("bad tag '{tag_token}'"))));
            }
            let mut tail_args = self.args(no, tail)?;
            let buffer = Self::take_buffer(&mut tail_args);
            if !tail_args.is_empty() {
                return Err(self.error(
                    no,
                    ParseErrorKind::Heredoc("only a target buffer may follow the tag".into()),
                ));
            }
            let mut lines = Vec::new();
            loop {
                let Some(raw) = self.lines.get(self.pos) else {
                    return Err(self.error(no, ParseErrorKind::UnterminatedHeredoc(tag.to_owned())));
                };
                self.pos += 1;
                if raw.trim() == tag {
                    break;
                }
                lines.push(raw.trim_end_matches('\r').to_owned());
            }
            return Ok(StmtKind::Copy {
                append,
                source: CopySource::Heredoc { lines, interpolate },
                buffer,
            });
        }

        let mut args = self.args(no, rest)?;
        if args.is_empty() {
            return Err(self.syntax(no, "usage: copy [append] text ~buffer"));
        }
        let buffer = match args.last() {
            Some(Arg::Buffer(name)) if args.len() > 1 => {
                let name = name.clone();
                args.pop();
                Some(name)
            }
            _ => None,
        };
        Ok(StmtKind::Copy {
            append,
            source: CopySource::Args(args),
            buffer,
        })
    }

    fn parse_insert(&self, no: usize, rest: &str) -> Result<StmtKind, ParseError> {
        let mut args = self.args(no, rest)?;
        let buffer = Self::take_buffer(&mut args);
        if args.is_empty() {
            return Err(self.syntax(no, "usage: insert [~buffer] [position] text"));
        }
        let position = (args.len() > 1 && self.looks_like_position(&args[0])).then(|| args.remove(0));
        Ok(StmtKind::Insert {
            buffer,
            position,
            text: args,
        })
    }

    /// A literal position (`3:4`, `+1`) or a whole variable reference.
    fn looks_like_position(&self, arg: &Arg) -> bool {
        let Arg::Word(w) = arg else { return false };
        if PositionSpec::parse(w).is_some() {
            return true;
        }
        w.strip_prefix(self.sigils.var_sigil())
            .and_then(|r| r.strip_prefix('('))
            .and_then(|r| r.strip_suffix(')'))
            .is_some_and(|name| !name.contains(')'))
    }

    fn parse_range(&self, no: usize, args: &mut Vec<Arg>) -> Result<RangeSpec, ParseError> {
        if args.len() < 4 {
            return Err(self.syntax(no, "range needs: from|behind A including|excluding|count B"));
        }
        let mut it = args.drain(..4);
        let (kw, start, end_kw, end) = match (it.next(), it.next(), it.next(), it.next()) {
            (Some(a), Some(b), Some(c), Some(d)) => (a, b, c, d),
            _ => return Err(self.syntax(no, "incomplete range")),
        };
        drop(it);
        let start_inclusive = match kw.word() {
            Some("from") => true,
            Some("behind") => false,
            _ => return Err(self.syntax(no, "range must start with 'from' or 'behind'")),
        };
        let end = match end_kw.word() {
            Some("including") => RangeEndSpec::Including(end),
            Some("excluding") => RangeEndSpec::Excluding(end),
            Some("count") => RangeEndSpec::Count(end),
            _ => return Err(self.syntax(no, "expected 'including', 'excluding' or 'count'")),
        };
        Ok(RangeSpec {
            start,
            start_inclusive,
            end,
        })
    }

    fn parse_delete(&self, no: usize, rest: &str) -> Result<StmtKind, ParseError> {
        let mut args = self.args(no, rest)?;
        let buffer = Self::take_buffer(&mut args);
        let spec = if args.first().is_some_and(|a| a.is_word("line")) {
            args.remove(0);
            let first = if args.is_empty() {
                return Err(self.syntax(no, "usage: delete [~buffer] line N [count M]"));
            } else {
                args.remove(0)
            };
            let count = match args.as_slice() {
                [] => None,
                [kw, _] if kw.is_word("count") => args.pop(),
                _ => return Err(self.syntax(no, "usage: delete [~buffer] line N [count M]")),
            };
            DeleteSpec::Lines { first, count }
        } else {
            let range = self.parse_range(no, &mut args)?;
            if !args.is_empty() {
                return Err(self.syntax(no, "unexpected arguments after range"));
            }
            DeleteSpec::Range(range)
        };
        Ok(StmtKind::Delete { buffer, spec })
    }

    fn parse_replace(&self, no: usize, rest: &str) -> Result<StmtKind, ParseError> {
        let mut args = self.args(no, rest)?;
        let buffer = Self::take_buffer(&mut args);
        let usage = "usage: replace [~buffer] regex replacement [count=N] [if regex] [range]";
        if args.len() < 2 {
            return Err(self.syntax(no, usage));
        }
        let pattern = match args.remove(0) {
            Arg::Regex(spec) => spec,
            _ => return Err(self.syntax(no, usage)),
        };
        let replacement = args.remove(0);
        if matches!(replacement, Arg::Opt(..) | Arg::Regex(_)) {
            return Err(self.syntax(no, usage));
        }

        let mut count = None;
        let mut filter = None;
        let mut range = None;
        while !args.is_empty() {
            match &args[0] {
                Arg::Opt(key, _) if key == "count" => {
                    if let Arg::Opt(_, value) = args.remove(0) {
                        count = Some(*value);
                    }
                }
                Arg::Word(w) if w == "if" => {
                    args.remove(0);
                    match (args.is_empty(), args.first()) {
                        (false, Some(Arg::Regex(_))) => {
                            if let Arg::Regex(spec) = args.remove(0) {
                                filter = Some(spec);
                            }
                        }
                        _ => return Err(self.syntax(no, "'if' must be followed by a regex")),
                    }
                }
                Arg::Word(w) if w == "from" || w == "behind" => {
                    range = Some(self.parse_range(no, &mut args)?);
                }
                other => return Err(self.syntax(no, format!("unexpected argument {other:?}"))),
            }
        }
        Ok(StmtKind::Replace(Box::new(Replace {
            buffer,
            pattern,
            replacement,
            count,
            filter,
            range,
        })))
    }
}

// ── Small utilities ───────────────────────────────────────────────────────────

/// Split `word rest` → `("word", "rest")`.
fn split_keyword(line: &str) -> (&str, &str) {
    let line = line.trim();
    match line.find(char::is_whitespace) {
        Some(i) => (&line[..i], line[i..].trim_start()),
        None => (line, ""),
    }
}

/// Recognise `name = …`, `name := …`, `name ?= …`.
fn split_assignment(text: &str) -> Option<(&str, AssignKind, &str)> {
    let end = text
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(text.len());
    let name = &text[..end];
    if !is_ident(name) {
        return None;
    }
    let after = text[end..].trim_start();
    if let Some(rhs) = after.strip_prefix(":=") {
        Some((name, AssignKind::Numeric, rhs))
    } else if let Some(rhs) = after.strip_prefix("?=") {
        Some((name, AssignKind::Conditional, rhs))
    } else if let Some(rhs) = after.strip_prefix('=') {
        (!rhs.starts_with('=')).then_some((name, AssignKind::Plain, rhs))
    } else {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
