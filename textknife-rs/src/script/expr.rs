//! Expression lexer, AST, parser, and evaluator.
//!
//! Expressions appear on the right of `:=` and in `if` / `while`
//! conditions.  Operator precedence (lowest → highest):
//!
//!   `||`  →  `&&`  →  `!` / `not`  →  comparison  →  `+ -`  →  `* / %`  →
//!   unary `-`  →  primary
//!
//! Comparisons come in two families: numeric (`== != < <= > >=`) and
//! lexical (`-eq -ne -lt -le -gt -ge`).  Numeric `==` / `!=` fall back to
//! text comparison when either side is not an integer; the ordering
//! operators require integers.
//!
//! Primaries are integer literals, quoted strings (`"…"` interpolated when
//! evaluated, `'…'` verbatim), identifiers (variable lookup, unbound → ""),
//! `$(name)` references in the active sigil profile, and parentheses.

use super::expand::{interpolate, SigilProfile};
use super::value::Value;

// ── EvalContext ───────────────────────────────────────────────────────────────

/// What the evaluator needs from its surroundings.
///
/// The [`Interpreter`](super::interp::Interpreter) implements this over its
/// scope stack and buffer store; tests use small map-backed contexts.
pub trait EvalContext {
    /// Look up a variable, including reserved `__` names.
    fn get_var(&self, name: &str) -> Option<Value>;

    /// Lines of buffer `name` joined with `\n`, or `None` if it does not exist.
    fn buffer_text(&self, name: &str) -> Option<String>;

    /// The sigil profile used for interpolation.
    fn sigils(&self) -> SigilProfile;
}

// ── Token ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(i64),
    /// Quoted text; `true` when it is interpolated at evaluation time.
    Str(String, bool),
    Ident(String),
    /// `$(name)` / `!(name)`; the name is interpolated at evaluation time.
    VarRef(String),

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,

    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    StrEq,
    StrNe,
    StrLt,
    StrLe,
    StrGt,
    StrGe,

    And,
    Or,

    LParen,
    RParen,
    Eof,
}

// ── Lexer ─────────────────────────────────────────────────────────────────────

struct Lexer {
    src: Vec<char>,
    pos: usize,
    sigils: SigilProfile,
}

impl Lexer {
    fn new(src: &str, sigils: SigilProfile) -> Self {
        Lexer {
            src: src.chars().collect(),
            pos: 0,
            sigils,
        }
    }

    fn peek(&self) -> Option<char> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, off: usize) -> Option<char> {
        self.src.get(self.pos + off).copied()
    }

    fn eat(&mut self, ch: char) -> bool {
        if self.peek() == Some(ch) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn read_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if pred(c)) {
            self.pos += 1;
        }
        self.src[start..self.pos].iter().collect()
    }

    fn read_number(&mut self) -> Result<Token, String> {
        let digits = self.read_while(|c| c.is_ascii_digit());
        digits
            .parse()
            .map(Token::Int)
            .map_err(|_| format!("integer literal {digits} out of range"))
    }

    fn read_string(&mut self, quote: char) -> Result<Token, String> {
        let mut s = String::new();
        loop {
            match self.peek() {
                None => return Err(format!("unterminated string {quote}{s}")),
                Some(c) if c == quote => {
                    self.pos += 1;
                    break;
                }
                Some('\\') if quote == '"' => {
                    self.pos += 1;
                    match self.peek() {
                        Some('n') => s.push('\n'),
                        Some('t') => s.push('\t'),
                        Some(c) => s.push(c),
                        None => s.push('\\'),
                    }
                    self.pos += 1;
                }
                Some(c) => {
                    s.push(c);
                    self.pos += 1;
                }
            }
        }
        Ok(Token::Str(s, quote == '"'))
    }

    /// `$(` … `)` with nesting; the cursor sits on the sigil.
    fn read_var_ref(&mut self) -> Result<Token, String> {
        self.pos += 2;
        let start = self.pos;
        let mut depth = 1usize;
        while let Some(c) = self.peek() {
            self.pos += 1;
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        let name = self.src[start..self.pos - 1].iter().collect();
                        return Ok(Token::VarRef(name));
                    }
                }
                _ => {}
            }
        }
        Err("unterminated variable reference".into())
    }

    /// `-eq`, `-ne`, … when followed by a non-identifier character.
    fn lexical_op(&self) -> Option<Token> {
        let a = self.peek_at(1)?;
        let b = self.peek_at(2)?;
        if matches!(self.peek_at(3), Some(c) if c.is_alphanumeric() || c == '_') {
            return None;
        }
        Some(match (a, b) {
            ('e', 'q') => Token::StrEq,
            ('n', 'e') => Token::StrNe,
            ('l', 't') => Token::StrLt,
            ('l', 'e') => Token::StrLe,
            ('g', 't') => Token::StrGt,
            ('g', 'e') => Token::StrGe,
            _ => return None,
        })
    }

    fn next_token(&mut self) -> Result<Token, String> {
        self.skip_ws();
        let Some(ch) = self.peek() else {
            return Ok(Token::Eof);
        };

        if ch == self.sigils.var_sigil() && self.peek_at(1) == Some('(') {
            return self.read_var_ref();
        }
        if ch.is_ascii_digit() {
            return self.read_number();
        }
        if ch.is_alphabetic() || ch == '_' {
            return Ok(Token::Ident(
                self.read_while(|c| c.is_alphanumeric() || c == '_'),
            ));
        }
        if ch == '-' {
            if let Some(tok) = self.lexical_op() {
                self.pos += 3;
                return Ok(tok);
            }
        }

        self.pos += 1;
        Ok(match ch {
            '"' | '\'' => return self.read_string(ch),
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '!' => {
                if self.eat('=') {
                    Token::Ne
                } else {
                    Token::Bang
                }
            }
            '=' => {
                if self.eat('=') {
                    Token::Eq
                } else {
                    return Err("'=' is not an operator (use '==' or -eq)".into());
                }
            }
            '<' => {
                if self.eat('=') {
                    Token::Le
                } else {
                    Token::Lt
                }
            }
            '>' => {
                if self.eat('=') {
                    Token::Ge
                } else {
                    Token::Gt
                }
            }
            '&' if self.eat('&') => Token::And,
            '|' if self.eat('|') => Token::Or,
            c => return Err(format!("unexpected character '{c}' in expression")),
        })
    }

    fn tokenize(mut self) -> Result<Vec<Token>, String> {
        let mut tokens = Vec::new();
        loop {
            let t = self.next_token()?;
            let done = t == Token::Eof;
            tokens.push(t);
            if done {
                break;
            }
        }
        Ok(tokens)
    }
}

// ── AST ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    StrEq,
    StrNe,
    StrLt,
    StrLe,
    StrGt,
    StrGe,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Double-quoted text, interpolated on evaluation.
    Text(String),
    Var(String),
    /// `$(name)`: `name` is interpolated, then looked up.
    VarRef(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

// ── Parser ────────────────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens.get(self.pos).cloned().unwrap_or(Token::Eof);
        self.pos += 1;
        t
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == expected {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::Or) {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_not()?;
        while self.eat(&Token::And) {
            let rhs = self.parse_not()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, String> {
        let is_not = match self.peek() {
            Token::Bang => true,
            Token::Ident(w) => w == "not",
            _ => false,
        };
        if is_not {
            self.pos += 1;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.parse_not()?)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, String> {
        let lhs = self.parse_additive()?;
        let op = match self.peek() {
            Token::Eq => BinOp::Eq,
            Token::Ne => BinOp::Ne,
            Token::Lt => BinOp::Lt,
            Token::Le => BinOp::Le,
            Token::Gt => BinOp::Gt,
            Token::Ge => BinOp::Ge,
            Token::StrEq => BinOp::StrEq,
            Token::StrNe => BinOp::StrNe,
            Token::StrLt => BinOp::StrLt,
            Token::StrLe => BinOp::StrLe,
            Token::StrGt => BinOp::StrGt,
            Token::StrGe => BinOp::StrGe,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.parse_additive()?;
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_additive(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::Percent => BinOp::Rem,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        if self.eat(&Token::Minus) {
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.advance() {
            Token::Int(n) => Ok(Expr::Literal(Value::Int(n))),
            Token::Str(s, true) => Ok(Expr::Text(s)),
            Token::Str(s, false) => Ok(Expr::Literal(Value::Str(s))),
            Token::Ident(name) => Ok(Expr::Var(name)),
            Token::VarRef(name) => Ok(Expr::VarRef(name)),
            Token::LParen => {
                let inner = self.parse_or()?;
                if !self.eat(&Token::RParen) {
                    return Err("expected ')'".into());
                }
                Ok(inner)
            }
            Token::Eof => Err("unexpected end of expression".into()),
            other => Err(format!("unexpected token {other:?}")),
        }
    }
}

/// Parse an expression.
pub fn parse_expr(src: &str, sigils: SigilProfile) -> Result<Expr, String> {
    let tokens = Lexer::new(src, sigils).tokenize()?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    match parser.peek() {
        Token::Eof => Ok(expr),
        other => Err(format!("unexpected {other:?} after expression")),
    }
}

// ── Evaluator ─────────────────────────────────────────────────────────────────

/// Evaluate `expr` against `ctx`.
pub fn eval_expr(expr: &Expr, ctx: &dyn EvalContext) -> Result<Value, String> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Text(s) => Ok(Value::Str(interpolate(s, ctx))),
        Expr::Var(name) => Ok(ctx.get_var(name).unwrap_or_default()),
        Expr::VarRef(raw) => {
            let name = interpolate(raw, ctx);
            Ok(ctx.get_var(name.trim()).unwrap_or_default())
        }
        Expr::Unary(UnaryOp::Neg, inner) => eval_expr(inner, ctx)?.arith_neg(),
        Expr::Unary(UnaryOp::Not, inner) => Ok(Value::from(!eval_expr(inner, ctx)?.as_bool())),
        Expr::Binary(BinOp::And, lhs, rhs) => {
            let ok = eval_expr(lhs, ctx)?.as_bool() && eval_expr(rhs, ctx)?.as_bool();
            Ok(Value::from(ok))
        }
        Expr::Binary(BinOp::Or, lhs, rhs) => {
            let ok = eval_expr(lhs, ctx)?.as_bool() || eval_expr(rhs, ctx)?.as_bool();
            Ok(Value::from(ok))
        }
        Expr::Binary(op, lhs, rhs) => {
            let l = eval_expr(lhs, ctx)?;
            let r = eval_expr(rhs, ctx)?;
            eval_binop(*op, &l, &r)
        }
    }
}

fn eval_binop(op: BinOp, l: &Value, r: &Value) -> Result<Value, String> {
    use std::cmp::Ordering;

    let numeric = |sym: &str| -> Result<Ordering, String> {
        match (l.as_int(), r.as_int()) {
            (Some(a), Some(b)) => Ok(a.cmp(&b)),
            _ => Err(format!("cannot compare '{l}' {sym} '{r}' numerically")),
        }
    };
    let lexical = || l.as_str().cmp(&r.as_str());

    Ok(match op {
        BinOp::Add => l.arith_add(r)?,
        BinOp::Sub => l.arith_sub(r)?,
        BinOp::Mul => l.arith_mul(r)?,
        BinOp::Div => l.arith_div(r)?,
        BinOp::Rem => l.arith_rem(r)?,
        BinOp::Eq | BinOp::Ne => {
            let equal = match (l.as_int(), r.as_int()) {
                (Some(a), Some(b)) => a == b,
                _ => l.as_str() == r.as_str(),
            };
            Value::from(equal == (op == BinOp::Eq))
        }
        BinOp::Lt => Value::from(numeric("<")? == Ordering::Less),
        BinOp::Le => Value::from(numeric("<=")? != Ordering::Greater),
        BinOp::Gt => Value::from(numeric(">")? == Ordering::Greater),
        BinOp::Ge => Value::from(numeric(">=")? != Ordering::Less),
        BinOp::StrEq => Value::from(lexical() == Ordering::Equal),
        BinOp::StrNe => Value::from(lexical() != Ordering::Equal),
        BinOp::StrLt => Value::from(lexical() == Ordering::Less),
        BinOp::StrLe => Value::from(lexical() != Ordering::Greater),
        BinOp::StrGt => Value::from(lexical() == Ordering::Greater),
        BinOp::StrGe => Value::from(lexical() != Ordering::Less),
        BinOp::And | BinOp::Or => unreachable!("short-circuit operators handled by eval_expr"),
    })
}

/// Parse and evaluate `src` in one step.
pub fn eval_str(src: &str, ctx: &dyn EvalContext) -> Result<Value, String> {
    let expr = parse_expr(src, ctx.sigils())?;
    eval_expr(&expr, ctx)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
