//! Script interpreter.
//!
//! The [`Interpreter`] owns the buffer store, the call-frame stack and the
//! buffer-selection stack, and executes parsed [`Stmt`] trees.  It
//! implements [`EvalContext`] so interpolation and the expression evaluator
//! can call back into it for variable and buffer lookups.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use tracing::Level;

use crate::clock;
use crate::error::RuntimeError;
use crate::host::Host;
use crate::pattern::{compile, Matcher, RegexSpec};

use super::{
    buffer::{split_lines, BufferStore, MAIN_BUFFER, RESULT_BUFFER},
    builtins::{call_builtin, BuiltinEnv, CallArg, CallArgs},
    expand::{interpolate, interpolate_pattern, is_ident, SigilProfile},
    expr::{eval_expr, EvalContext},
    position::{char_range, Position, PositionSpec, RangeEnd},
    stmt::{
        parse_script, Arg, AssignKind, Call, Cond, CondTest, CopySource, DeleteSpec, ExitScope,
        MarkOp, MoveTarget, RangeEndSpec, RangeSpec, Rhs, Script, SelectOp, Stmt, StmtKind,
    },
    value::Value,
};

/// Default bound on nested `call`s.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 200;

// ── ControlFlow ───────────────────────────────────────────────────────────────

/// Non-error signals that unwind blocks and call frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlow {
    /// `leave N`: unwind N enclosing loops.
    Leave(usize),
    Exit { code: i64, scope: ExitScope },
    Stop,
}

/// How a top-level run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Exit(i64),
    Stop,
}

// ── Call frame ────────────────────────────────────────────────────────────────

struct Frame {
    vars: HashMap<String, Value>,
    /// Script whose statements this frame runs; subroutines resolve here.
    script: Rc<Script>,
    /// Directory script-file calls are resolved against.
    dir: Option<PathBuf>,
}

// ── Interpreter ───────────────────────────────────────────────────────────────

pub struct Interpreter {
    pub buffers: BufferStore,
    pub host: Host,
    frames: Vec<Frame>,
    /// Buffer-selection stack; never empty while running.
    selection: Vec<String>,
    /// Buffer the `__` match and cursor variables report on: the one last
    /// targeted by a cursor statement, regex test, or `select`.
    focus: String,
    sigils: SigilProfile,
    max_call_depth: usize,
    trace: Option<Box<dyn Write>>,
    /// Parsed script files, keyed by resolved path.
    file_cache: HashMap<PathBuf, Rc<Script>>,
}

impl Interpreter {
    pub fn new(host: Host, sigils: SigilProfile) -> Self {
        Interpreter {
            buffers: BufferStore::new(),
            host,
            frames: Vec::new(),
            selection: vec![MAIN_BUFFER.to_owned()],
            focus: MAIN_BUFFER.to_owned(),
            sigils,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            trace: None,
            file_cache: HashMap::new(),
        }
    }

    pub fn set_max_call_depth(&mut self, depth: usize) {
        self.max_call_depth = depth;
    }

    /// Write each executed statement to `sink` (`None` disables tracing).
    pub fn set_trace(&mut self, sink: Option<Box<dyn Write>>) {
        self.trace = sink;
    }

    pub fn sigil_profile(&self) -> SigilProfile {
        self.sigils
    }

    /// Name of the currently selected buffer.
    pub fn selected(&self) -> &str {
        self.selection.last().map(String::as_str).unwrap_or(MAIN_BUFFER)
    }

    // ── Execution ─────────────────────────────────────────────────────────────

    /// Run `script` from a clean buffer store with `vars` in the root scope.
    pub fn run(
        &mut self,
        script: Rc<Script>,
        dir: Option<PathBuf>,
        vars: HashMap<String, Value>,
    ) -> Result<Outcome, RuntimeError> {
        self.buffers.reset();
        self.selection = vec![MAIN_BUFFER.to_owned()];
        self.focus = MAIN_BUFFER.to_owned();
        self.frames = vec![Frame {
            vars,
            script: Rc::clone(&script),
            dir,
        }];
        let flow = self.exec_block(&script.body);
        self.frames.clear();
        Ok(match flow? {
            None | Some(ControlFlow::Leave(_)) => Outcome::Completed,
            Some(ControlFlow::Exit { code, .. }) => Outcome::Exit(code),
            Some(ControlFlow::Stop) => Outcome::Stop,
        })
    }

    /// Execute a block of statements.
    pub fn exec_block(&mut self, stmts: &[Stmt]) -> Result<Option<ControlFlow>, RuntimeError> {
        for stmt in stmts {
            if let Some(cf) = self.exec_stmt(stmt)? {
                return Ok(Some(cf));
            }
        }
        Ok(None)
    }

    /// Execute a single statement; errors are tagged with its location.
    pub fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Option<ControlFlow>, RuntimeError> {
        self.trace_stmt(stmt);
        self.exec_kind(&stmt.kind)
            .map_err(|e| e.at(&self.script_name(), stmt.line))
    }

    fn script_name(&self) -> String {
        self.frames
            .last()
            .map(|f| f.script.name.clone())
            .unwrap_or_default()
    }

    fn trace_stmt(&mut self, stmt: &Stmt) {
        let name = self.script_name();
        if let Some(sink) = self.trace.as_mut() {
            if let Err(e) = writeln!(sink, "{name}:{}: {}", stmt.line, stmt.text) {
                tracing::warn!(error = %e, "trace sink failed, tracing disabled");
                self.trace = None;
            }
        }
    }

    fn exec_kind(&mut self, kind: &StmtKind) -> Result<Option<ControlFlow>, RuntimeError> {
        match kind {
            StmtKind::Assign { var, kind, rhs } => {
                if *kind == AssignKind::Conditional && self.local(var).is_some() {
                    return Ok(None);
                }
                let value = self.eval_rhs(rhs)?;
                self.set_var(var, value);
                Ok(None)
            }

            StmtKind::Call(call) => {
                self.invoke_builtin(call)?;
                Ok(None)
            }

            StmtKind::If {
                cond,
                then_block,
                else_block,
            } => {
                let block = if self.eval_cond(cond)? {
                    then_block
                } else {
                    else_block
                };
                self.exec_block(block)
            }

            StmtKind::While { cond, body } => {
                while self.eval_cond(cond)? {
                    match self.exec_block(body)? {
                        Some(ControlFlow::Leave(n)) if n > 1 => {
                            return Ok(Some(ControlFlow::Leave(n - 1)))
                        }
                        Some(ControlFlow::Leave(_)) => break,
                        Some(cf) => return Ok(Some(cf)),
                        None => {}
                    }
                }
                Ok(None)
            }

            StmtKind::Leave(n) => Ok(Some(ControlFlow::Leave(*n))),

            StmtKind::Stop(text) => {
                if let Some(rhs) = text {
                    let msg = self.eval_rhs(rhs)?.as_str();
                    self.host.log.log(Level::ERROR, &msg);
                }
                Ok(Some(ControlFlow::Stop))
            }

            StmtKind::Exit { code, scope } => {
                let code = match code {
                    Some(arg) => {
                        let text = self.render(arg)?;
                        text.trim().parse().map_err(|_| {
                            RuntimeError::Eval(format!("exit code must be an integer, got '{text}'"))
                        })?
                    }
                    None => 0,
                };
                Ok(Some(ControlFlow::Exit {
                    code,
                    scope: *scope,
                }))
            }

            StmtKind::Log(text) => {
                match text {
                    Some(rhs) => {
                        let msg = self.eval_rhs(rhs)?.as_str();
                        self.host.log.log(Level::INFO, &msg);
                    }
                    None => {
                        let lines = self.buffers.get(self.selected())?.lines().to_vec();
                        for line in &lines {
                            self.host.log.log(Level::INFO, line);
                        }
                    }
                }
                Ok(None)
            }

            StmtKind::Move { buffer, target } => {
                let name = self.target(buffer);
                self.focus.clone_from(&name);
                match target {
                    MoveTarget::Regex(spec) => {
                        let matcher = self.matcher(spec)?;
                        self.buffers.get_mut(&name)?.search(
                            matcher.as_ref(),
                            spec.flags.whole_buffer,
                            true,
                        );
                    }
                    MoveTarget::Position(arg) => {
                        let spec = self.position_spec(arg)?;
                        self.buffers.get_mut(&name)?.move_to(&spec);
                    }
                }
                Ok(None)
            }

            StmtKind::Mark { buffer, op } => {
                let name = self.target(buffer);
                self.exec_mark(&name, op)?;
                self.focus = name;
                Ok(None)
            }

            StmtKind::Select(op) => {
                match op {
                    SelectOp::Set(name) => {
                        self.buffers.entry(name);
                        match self.selection.last_mut() {
                            Some(top) => *top = name.clone(),
                            None => self.selection.push(name.clone()),
                        }
                    }
                    SelectOp::Push(name) => {
                        self.buffers.entry(name);
                        self.selection.push(name.clone());
                    }
                    SelectOp::Pop => {
                        if self.selection.len() <= 1 {
                            return Err(RuntimeError::SelectionStackEmpty);
                        }
                        self.selection.pop();
                    }
                }
                self.focus = self.selected().to_owned();
                Ok(None)
            }

            StmtKind::Load { buffer, path } => {
                let path = self.host.os.resolve(Path::new(&self.render(path)?));
                let lines = self
                    .host
                    .files
                    .read_lines(&path)
                    .map_err(|source| RuntimeError::Io {
                        op: "load",
                        path: path.clone(),
                        source,
                    })?;
                let name = self.target(buffer);
                let buf = self.buffers.entry(&name);
                buf.set_lines(lines);
                buf.set_file(path);
                self.focus = name;
                Ok(None)
            }

            StmtKind::Store { buffer, path } => {
                let path = self.host.os.resolve(Path::new(&self.render(path)?));
                let name = self.target(buffer);
                let buf = self.buffers.get_mut(&name)?;
                self.host
                    .files
                    .write_lines(&path, buf.lines())
                    .map_err(|source| RuntimeError::Io {
                        op: "store",
                        path: path.clone(),
                        source,
                    })?;
                buf.set_file(path);
                self.focus = name;
                Ok(None)
            }

            StmtKind::Copy {
                append,
                source,
                buffer,
            } => {
                let lines = match source {
                    CopySource::Args(args) => split_lines(&self.render_joined(args)?),
                    CopySource::Heredoc { lines, .. } if lines.is_empty() => Vec::new(),
                    CopySource::Heredoc { lines, interpolate: expand } => {
                        let text = lines.join("\n");
                        let text = if *expand {
                            interpolate(&text, self)
                        } else {
                            text
                        };
                        text.split('\n').map(str::to_owned).collect()
                    }
                };
                let name = self.target(buffer);
                let buf = self.buffers.entry(&name);
                if *append {
                    buf.append_lines(lines);
                } else {
                    buf.set_lines(lines);
                }
                Ok(None)
            }

            StmtKind::Insert {
                buffer,
                position,
                text,
            } => {
                let text = self.render_joined(text)?;
                let spec = position.as_ref().map(|p| self.position_spec(p)).transpose()?;
                let name = self.target(buffer);
                let buf = self.buffers.entry(&name);
                let at = spec.map(|s| buf.resolve(&s)).unwrap_or_else(|| buf.cursor());
                buf.insert(at, &text);
                self.focus = name;
                Ok(None)
            }

            StmtKind::Delete { buffer, spec } => {
                let name = self.target(buffer);
                match spec {
                    DeleteSpec::Range(range) => {
                        let (from, to) = self.resolve_range(&name, range)?;
                        self.buffers.get_mut(&name)?.delete_range(from, to);
                    }
                    DeleteSpec::Lines { first, count } => {
                        let spec = self.position_spec(first)?;
                        let count = match count {
                            Some(arg) => self.render_count(arg)?,
                            None => 1,
                        };
                        let buf = self.buffers.get_mut(&name)?;
                        let line = buf.resolve(&spec).line;
                        buf.delete_lines(line, count);
                    }
                }
                self.focus = name;
                Ok(None)
            }

            StmtKind::Replace(r) => {
                let name = self.target(&r.buffer);
                let matcher = self.matcher(&r.pattern)?;
                let replacement = self.render(&r.replacement)?;
                let limit = r.count.as_ref().map(|c| self.render_count(c)).transpose()?;
                let filter = r.filter.as_ref().map(|f| self.matcher(f)).transpose()?;
                let range = r
                    .range
                    .as_ref()
                    .map(|range| self.resolve_range(&name, range))
                    .transpose()?;
                self.buffers.get_mut(&name)?.replace(
                    matcher.as_ref(),
                    &replacement,
                    limit,
                    r.pattern.flags.whole_buffer,
                    filter.as_deref(),
                    range,
                );
                self.focus = name;
                Ok(None)
            }

            StmtKind::CallScript { target, args } => self.call_script(target, args),

            StmtKind::Assert(names) => {
                let mut failed = Vec::new();
                for arg in names {
                    let (label, ok) = match arg {
                        Arg::Buffer(name) => (
                            format!("{}{name}", self.sigils.buffer_sigil()),
                            self.buffers.get(name).is_ok_and(|b| !b.is_empty()),
                        ),
                        Arg::Word(name) if is_ident(name) => (
                            name.clone(),
                            self.get_var(name).is_some_and(|v| v.as_bool()),
                        ),
                        other => {
                            let text = self.render(other)?;
                            let ok = Value::Str(text.clone()).as_bool();
                            (text, ok)
                        }
                    };
                    if !ok {
                        failed.push(label);
                    }
                }
                if failed.is_empty() {
                    Ok(None)
                } else {
                    Err(RuntimeError::AssertionFailed(failed))
                }
            }
        }
    }

    // ── Marks ─────────────────────────────────────────────────────────────────

    fn exec_mark(&mut self, name: &str, op: &MarkOp) -> Result<(), RuntimeError> {
        let spec = match op {
            MarkOp::Set(Some(arg)) | MarkOp::Push(Some(arg)) | MarkOp::Restore(arg) => {
                Some(self.position_spec(arg)?)
            }
            _ => None,
        };
        let buf = self.buffers.get_mut(name)?;
        let at = spec.map(|s| buf.resolve(&s)).unwrap_or_else(|| buf.cursor());
        match op {
            MarkOp::Save(var) => {
                let cursor = buf.cursor().to_string();
                self.set_var(var, Value::Str(cursor));
            }
            MarkOp::Set(_) => buf.mark_set(at),
            MarkOp::Push(_) => buf.mark_push(at),
            MarkOp::Restore(_) => buf.set_cursor(at),
            MarkOp::Exchange => buf.mark_exchange(),
            MarkOp::Pop => {
                buf.mark_pop()?;
            }
        }
        Ok(())
    }

    // ── Conditions and values ─────────────────────────────────────────────────

    fn eval_cond(&mut self, cond: &Cond) -> Result<bool, RuntimeError> {
        let hit = match &cond.test {
            CondTest::Regex { buffer, spec } => {
                let matcher = self.matcher(spec)?;
                let name = self.target(buffer);
                let hit = self
                    .buffers
                    .get_mut(&name)?
                    .search(matcher.as_ref(), spec.flags.whole_buffer, false);
                self.focus = name;
                hit
            }
            CondTest::Expr(expr) => eval_expr(expr, self)?.as_bool(),
        };
        Ok(hit != cond.negate)
    }

    fn eval_rhs(&mut self, rhs: &Rhs) -> Result<Value, RuntimeError> {
        Ok(match rhs {
            Rhs::Expr(expr) => eval_expr(expr, self)?,
            Rhs::Call(call) => self.invoke_builtin(call)?,
            Rhs::Value(arg) => Value::Str(self.render(arg)?),
            Rhs::Args(args) => Value::Str(self.render_joined(args)?),
            Rhs::Text(text) => Value::Str(interpolate(text, self)),
        })
    }

    /// Text of one argument token.
    fn render(&self, arg: &Arg) -> Result<String, RuntimeError> {
        Ok(match arg {
            Arg::Word(s) | Arg::Quoted(s) => interpolate(s, self),
            Arg::Literal(s) => s.clone(),
            Arg::Buffer(name) => self.buffers.get(name)?.text(),
            Arg::Regex(spec) => interpolate_pattern(&spec.pattern, self),
            Arg::Opt(key, value) => format!("{key}={}", self.render(value)?),
        })
    }

    fn render_joined(&self, args: &[Arg]) -> Result<String, RuntimeError> {
        let parts = args
            .iter()
            .map(|a| self.render(a))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(parts.join(" "))
    }

    /// `spec` with variable and buffer references in its pattern expanded.
    fn expand_spec(&self, spec: &RegexSpec) -> RegexSpec {
        RegexSpec {
            pattern: interpolate_pattern(&spec.pattern, self),
            ..spec.clone()
        }
    }

    fn matcher(&self, spec: &RegexSpec) -> Result<Arc<dyn Matcher>, RuntimeError> {
        Ok(compile(&self.expand_spec(spec))?)
    }

    fn render_count(&self, arg: &Arg) -> Result<usize, RuntimeError> {
        let text = self.render(arg)?;
        text.trim()
            .parse()
            .map_err(|_| RuntimeError::Eval(format!("'{text}' is not a count")))
    }

    /// Parse a position token; a bare identifier names a variable.
    fn position_spec(&self, arg: &Arg) -> Result<PositionSpec, RuntimeError> {
        let text = match arg {
            Arg::Word(w) if is_ident(w) => self
                .get_var(w)
                .map(|v| v.as_str())
                .unwrap_or_else(|| w.clone()),
            other => self.render(other)?,
        };
        PositionSpec::parse(&text).ok_or(RuntimeError::InvalidPosition(text))
    }

    fn resolve_range(
        &self,
        name: &str,
        range: &RangeSpec,
    ) -> Result<(Position, Position), RuntimeError> {
        let buf = self.buffers.get(name)?;
        let start = buf.resolve(&self.position_spec(&range.start)?);
        let end = match &range.end {
            RangeEndSpec::Including(arg) => {
                RangeEnd::Including(buf.resolve(&self.position_spec(arg)?))
            }
            RangeEndSpec::Excluding(arg) => {
                RangeEnd::Excluding(buf.resolve(&self.position_spec(arg)?))
            }
            RangeEndSpec::Count(arg) => RangeEnd::Count(self.render_count(arg)?),
        };
        Ok(char_range(buf.lines(), start, range.start_inclusive, end))
    }

    fn target(&self, explicit: &Option<String>) -> String {
        explicit
            .clone()
            .unwrap_or_else(|| self.selected().to_owned())
    }

    // ── Variables ─────────────────────────────────────────────────────────────

    fn local(&self, name: &str) -> Option<&Value> {
        self.frames.last().and_then(|f| f.vars.get(name))
    }

    pub fn set_var(&mut self, name: &str, value: Value) {
        if let Some(frame) = self.frames.last_mut() {
            frame.vars.insert(name.to_owned(), value);
        }
    }

    /// Reserved `__name` variables, computed against the focus buffer (or
    /// the selected one once the focus buffer is gone).
    fn reserved(&self, name: &str) -> Option<Value> {
        let buf = self
            .buffers
            .get(&self.focus)
            .or_else(|_| self.buffers.get(self.selected()))
            .ok();
        let m = buf.map(|b| b.last_match());
        Some(match name {
            "__date" => Value::Str(clock::today()),
            "__time" => Value::Str(clock::now()),
            "__position" => Value::Str(buf?.cursor().to_string()),
            "__start" => Value::Str(m?.start.to_string()),
            "__end" => Value::Str(m?.end.to_string()),
            "__hit" => Value::Str(m.filter(|m| m.found).map(|m| m.hit.clone()).unwrap_or_default()),
            "__mark" => Value::Str(buf?.mark().to_string()),
            "__file" => Value::Str(
                buf.and_then(|b| b.file())
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            ),
            "__line" => Value::Str(buf?.current_line().to_owned()),
            "__lines" => Value::from(buf?.len()),
            "__replaced" => Value::from(buf?.replaced()),
            _ => return None,
        })
    }

    // ── Calls ─────────────────────────────────────────────────────────────────

    fn invoke_builtin(&mut self, call: &Call) -> Result<Value, RuntimeError> {
        let mut args = CallArgs::default();
        for arg in &call.args {
            match arg {
                Arg::Opt(key, value) => {
                    let value = Value::Str(self.render(value)?);
                    args.options.push((key.clone(), value));
                }
                Arg::Buffer(name) => args.positional.push(CallArg::Buffer(name.clone())),
                Arg::Regex(spec) => args.positional.push(CallArg::Regex(self.expand_spec(spec))),
                other => args
                    .positional
                    .push(CallArg::Value(Value::Str(self.render(other)?))),
            }
        }
        let mut env = BuiltinEnv {
            buffers: &mut self.buffers,
            host: &mut self.host,
        };
        call_builtin(&call.namespace, &call.function, &args, &mut env).unwrap_or_else(|| {
            Err(RuntimeError::UnknownFunction {
                namespace: call.namespace.clone(),
                function: call.function.clone(),
            })
        })
    }

    /// Build the callee's scope from `key=value` options, `~params`
    /// buffers of `key=value` lines, and positional `arg1..argN`.
    fn call_scope(&self, args: &[Arg]) -> Result<HashMap<String, Value>, RuntimeError> {
        let mut vars = HashMap::new();
        let mut positional = 0usize;
        for arg in args {
            match arg {
                Arg::Opt(key, value) => {
                    vars.insert(key.clone(), Value::Str(self.render(value)?));
                }
                Arg::Buffer(name) => {
                    for line in self.buffers.get(name)?.lines() {
                        if let Some((k, v)) = line.split_once('=') {
                            let k = k.trim();
                            if is_ident(k) {
                                vars.insert(k.to_owned(), Value::from(v.trim()));
                            }
                        }
                    }
                }
                other => {
                    positional += 1;
                    vars.insert(format!("arg{positional}"), Value::Str(self.render(other)?));
                }
            }
        }
        vars.insert("argc".to_owned(), Value::from(positional));
        Ok(vars)
    }

    fn call_script(
        &mut self,
        target: &Arg,
        args: &[Arg],
    ) -> Result<Option<ControlFlow>, RuntimeError> {
        let name = self.render(target)?;
        if self.frames.len() > self.max_call_depth {
            return Err(RuntimeError::RecursionLimit(self.max_call_depth));
        }
        let vars = self.call_scope(args)?;
        let (caller_script, caller_dir) = match self.frames.last() {
            Some(f) => (Rc::clone(&f.script), f.dir.clone()),
            None => return Err(RuntimeError::UnknownScript(name)),
        };

        let (script, dir, is_file) = if caller_script.subs.contains_key(&name) {
            tracing::debug!(subroutine = %name, depth = self.frames.len(), "call");
            (caller_script, caller_dir, false)
        } else {
            let path = match &caller_dir {
                Some(dir) if Path::new(&name).is_relative() => dir.join(&name),
                _ => self.host.os.resolve(Path::new(&name)),
            };
            let script = self.load_file(&name, &path)?;
            tracing::debug!(script = %path.display(), depth = self.frames.len(), "call");
            self.buffers.entry(RESULT_BUFFER).clear();
            let dir = path.parent().map(Path::to_path_buf);
            (script, dir, true)
        };

        self.frames.push(Frame {
            vars,
            script: Rc::clone(&script),
            dir,
        });
        let body: &[Stmt] = if is_file {
            &script.body
        } else {
            script.subs.get(&name).map(Vec::as_slice).unwrap_or(&[])
        };
        let result = self.exec_block(body);
        let frame = self.frames.pop();
        let flow = result?;

        let rc = match flow {
            Some(ControlFlow::Exit {
                code,
                scope: ExitScope::Local,
            }) => Value::Int(code),
            Some(cf @ ControlFlow::Exit { .. }) | Some(cf @ ControlFlow::Stop) => {
                return Ok(Some(cf))
            }
            _ => frame
                .and_then(|mut f| f.vars.remove("_rc"))
                .unwrap_or(Value::Int(0)),
        };
        self.set_var("_rc", rc);
        Ok(None)
    }

    /// Parse a script file once and cache it by path.
    fn load_file(&mut self, name: &str, path: &Path) -> Result<Rc<Script>, RuntimeError> {
        if let Some(script) = self.file_cache.get(path) {
            return Ok(Rc::clone(script));
        }
        if !self.host.os.exists(path) {
            return Err(RuntimeError::UnknownScript(name.to_owned()));
        }
        let lines = self
            .host
            .files
            .read_lines(path)
            .map_err(|source| RuntimeError::Io {
                op: "read script",
                path: path.to_path_buf(),
                source,
            })?;
        let script_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.to_owned());
        let script = Rc::new(parse_script(&script_name, &lines.join("\n"), self.sigils)?);
        tracing::debug!(path = %path.display(), subs = script.subs.len(), "script file parsed");
        self.file_cache.insert(path.to_path_buf(), Rc::clone(&script));
        Ok(script)
    }
}

// ── EvalContext impl ──────────────────────────────────────────────────────────

impl EvalContext for Interpreter {
    fn get_var(&self, name: &str) -> Option<Value> {
        if name.starts_with("__") {
            if let Some(v) = self.reserved(name) {
                return Some(v);
            }
        }
        self.local(name).cloned()
    }

    fn buffer_text(&self, name: &str) -> Option<String> {
        self.buffers.get(name).ok().map(|b| b.text())
    }

    fn sigils(&self) -> SigilProfile {
        self.sigils
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{MemorySink, StdFiles, StdOs};

    struct Run {
        interp: Interpreter,
        sink: MemorySink,
        outcome: Result<Outcome, RuntimeError>,
    }

    fn run_in(dir: &Path, src: &str) -> Run {
        let sink = MemorySink::new();
        let host = Host::new(
            Box::new(StdFiles),
            Box::new(StdOs::in_dir(dir)),
            Box::new(sink.clone()),
        );
        let mut interp = Interpreter::new(host, SigilProfile::Dollar);
        let script = Rc::new(parse_script("test", src, SigilProfile::Dollar).expect("parse failed"));
        let outcome = interp.run(script, Some(dir.to_path_buf()), HashMap::new());
        Run {
            interp,
            sink,
            outcome,
        }
    }

    fn run(src: &str) -> Run {
        let dir = std::env::temp_dir();
        run_in(&dir, src)
    }

    fn output(src: &str) -> Vec<String> {
        let r = run(src);
        assert!(r.outcome.is_ok(), "run failed: {:?}", r.outcome);
        r.sink.messages()
    }

    fn lines(r: &Run, name: &str) -> Vec<String> {
        r.interp.buffers.get(name).unwrap().lines().to_vec()
    }

    #[test]
    fn log_and_assign() {
        assert_eq!(output("x = World\nlog Hello $(x)"), vec!["Hello World"]);
        assert_eq!(output("x := 6 * 7\nlog $(x)"), vec!["42"]);
    }

    #[test]
    fn conditional_assign() {
        assert_eq!(output("x := 3\nx ?= 2\ny ?= \"Hi\"\nlog $(x) $(y)"), vec!["3 Hi"]);
    }

    #[test]
    fn if_else() {
        assert_eq!(output("x := 1\nif x > 3\nlog big\nelse\nlog small\nendif"), vec!["small"]);
    }

    #[test]
    fn while_and_leave() {
        let src = "i := 0\nwhile 1\n  i := i + 1\n  if i == 3\n    leave\n  endif\nendwhile\nlog $(i)";
        assert_eq!(output(src), vec!["3"]);
        let src = "i := 0\nwhile 1\n  while 1\n    i := i + 1\n    leave 2\n  endwhile\n  log unreachable\nendwhile\nlog $(i)";
        assert_eq!(output(src), vec!["1"]);
    }

    #[test]
    fn exit_and_stop_outcomes() {
        assert_eq!(run("exit 3\nlog no").outcome.unwrap(), Outcome::Exit(3));
        let r = run("stop bad input\nlog no");
        assert_eq!(r.outcome.unwrap(), Outcome::Stop);
        assert_eq!(r.sink.records(), vec![(Level::ERROR, "bad input".to_owned())]);
        assert_eq!(run("log ok").outcome.unwrap(), Outcome::Completed);
    }

    #[test]
    fn move_scenario() {
        let src = "copy <<EOS\nLine1\nLine2\nLine3 abc\nEOS\n\
                   move s/bc/\nlog $(__position) $(__hit)\n\
                   move 1:3\nmove +1:-1\nlog $(__position)\nmove +1\nmove 0:+99\n\
                   log $(__position) $(__mark)";
        assert_eq!(output(src), vec!["3:10 bc", "2:2", "3:10 1:1"]);
    }

    #[test]
    fn regex_condition_does_not_move() {
        let src = "copy \"alpha beta\"\nif s/beta/\nlog found $(__start) $(__position)\nendif\nif ! s/gamma/\nlog absent\nendif";
        assert_eq!(output(src), vec!["found 1:7 1:1", "absent"]);
    }

    #[test]
    fn marks() {
        let src = "copy \"abcdef\"\nmove 1:4\nmark save here\nmove 1:1\nmark restore here\nlog $(__position)\nmark set 1:2\nmark exchange\nlog $(__position) $(__mark)";
        assert_eq!(output(src), vec!["1:4", "1:2 1:4"]);
        let r = run("mark pop");
        assert!(matches!(r.outcome, Err(RuntimeError::At { .. })));
    }

    #[test]
    fn selection_stack() {
        let src = "copy one ~a\nselect push ~a\nlog\nselect pop\nlog $(__lines)";
        assert_eq!(output(src), vec!["one", "0"]);
        let e = run("select pop").outcome.unwrap_err();
        assert_eq!(e.to_string(), "test:1: buffer selection stack cannot be popped further");
    }

    #[test]
    fn insert_and_delete() {
        let r = run("copy <<EOS\nabcd\na23456\nb23456\nc23456\nEOS\ndelete from 2:2 excluding 2:3\ndelete behind 3:2 excluding 3:5\ndelete from 4:2 count 3\ninsert 1:1 \">\"");
        r.outcome.as_ref().unwrap();
        assert_eq!(lines(&r, MAIN_BUFFER), vec![">abcd", "a3456", "b256", "c56"]);
    }

    #[test]
    fn replace_with_options() {
        let r = run("copy \"a1 b2 c3\"\nreplace s/(\\d)/ \"<$1>\" count=2\nlog $(__replaced)");
        assert_eq!(r.sink.messages(), vec!["2"]);
        assert_eq!(lines(&r, MAIN_BUFFER), vec!["a<1> b<2> c3"]);
    }

    #[test]
    fn delete_including_end_column() {
        // The `including` end column is deleted along with the start column.
        let r = run("copy \"a23456\"\ndelete from 1:2 including 1:4");
        r.outcome.as_ref().unwrap();
        assert_eq!(lines(&r, MAIN_BUFFER), vec!["a56"]);
    }

    #[test]
    fn patterns_expand_variables() {
        let src = "copy \"xyz abc\"\nx = bc\nmove s/$(x)/\nlog hit=$(__hit) pos=$(__position)\n\
                   n = string.replace \"abc\" s/$(x)/ Z\nlog $(n)\n\
                   replace s/$(x)/ Q\nif ! s/$(x)/\nlog gone\nendif";
        let r = run(src);
        r.outcome.as_ref().unwrap();
        assert_eq!(r.sink.messages(), vec!["hit=bc pos=1:8", "aZ", "gone"]);
        assert_eq!(lines(&r, MAIN_BUFFER), vec!["xyz aQ"]);
    }

    #[test]
    fn match_variables_follow_targeted_buffer() {
        let src = "copy <<EOS ~other\nfoo bar\nEOS\nmove ~other s/bar/\n\
                   log hit=$(__hit) pos=$(__position) start=$(__start)\n\
                   select push ~other\nselect pop\nlog $(__lines)";
        assert_eq!(output(src), vec!["hit=bar pos=1:8 start=1:5", "0"]);
    }

    #[test]
    fn log_strips_quotes_per_token() {
        let src = "x = 5\nlog \"Value:\" $(x) 'raw $(x)'";
        assert_eq!(output(src), vec!["Value: 5 raw $(x)"]);
    }

    #[test]
    fn insert_without_position() {
        let r = run("copy \"ab\"\ninsert hello world\ninsert 1:0 \"!\"");
        r.outcome.as_ref().unwrap();
        assert_eq!(lines(&r, MAIN_BUFFER), vec!["hello worldab!"]);
    }

    #[test]
    fn heredoc_interpolation() {
        let r = run("x = v\ncopy <<'EOS' ~lit\n$(x)\nEOS\ncopy <<EOS ~exp\n$(x)\nEOS");
        assert_eq!(lines(&r, "lit"), vec!["$(x)"]);
        assert_eq!(lines(&r, "exp"), vec!["v"]);
    }

    #[test]
    fn subroutine_scope_and_rc() {
        let src = "x = outer\ncall greet who=World\nlog $(_rc) $(x)\nscript greet\n  log Hello $(who) [$(x)]\n  exit 7 local\nendscript";
        assert_eq!(output(src), vec!["Hello World []", "7 outer"]);
        let src = "call setrc\nlog $(_rc)\nscript setrc\n_rc = done\nendscript";
        assert_eq!(output(src), vec!["done"]);
    }

    #[test]
    fn params_buffer() {
        let src = "copy <<EOS ~p\na=1\nb = two\nEOS\ncall show ~p\nscript show\nlog $(a) $(b)\nendscript";
        assert_eq!(output(src), vec!["1 two"]);
    }

    #[test]
    fn exit_global_from_subroutine() {
        let r = run("call quit\nlog no\nscript quit\nexit 4 global\nendscript");
        assert_eq!(r.outcome.unwrap(), Outcome::Exit(4));
        assert!(r.sink.messages().is_empty());
    }

    #[test]
    fn recursion_limit() {
        let host = Host::with_sink(Box::new(MemorySink::new()));
        let mut interp = Interpreter::new(host, SigilProfile::Dollar);
        interp.set_max_call_depth(16);
        let src = "call again\nscript again\ncall again\nendscript";
        let script = Rc::new(parse_script("test", src, SigilProfile::Dollar).unwrap());
        let e = interp.run(script, None, HashMap::new()).unwrap_err();
        assert_eq!(e.to_string(), "test:3: call depth limit of 16 exceeded");
    }

    #[test]
    fn script_file_call_uses_result_buffer() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("child.tk"), "copy \"first\" ~_result\ncopy append \"$(n)\" ~_result\n").unwrap();
        let r = run_in(dir.path(), "call child.tk n=5\nx = buffer.shift ~_result\nlog $(x) ~_result");
        assert_eq!(r.sink.messages(), vec!["first 5"]);
    }

    #[test]
    fn unknown_call_target() {
        let e = run("call nowhere").outcome.unwrap_err();
        assert!(e.to_string().contains("no subroutine or script file named 'nowhere'"));
    }

    #[test]
    fn unknown_function_is_fatal() {
        let e = run("log a\nstring.frob x").outcome.unwrap_err();
        assert_eq!(e.to_string(), "test:2: unknown function string.frob");
    }

    #[test]
    fn load_and_store() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("in.txt"), "one\r\ntwo\n").unwrap();
        let r = run_in(dir.path(), "load in.txt\nreplace s/o/ 0\nstore out.txt\nlog $(__file)");
        r.outcome.as_ref().unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("out.txt")).unwrap(), "0ne\ntw0\n");
        assert!(r.sink.messages()[0].ends_with("out.txt"));
        let e = run_in(dir.path(), "load missing.txt").outcome.unwrap_err();
        assert!(e.to_string().starts_with("test:1: load "));
    }

    #[test]
    fn assert_reports_failures() {
        let e = run("a = 1\nb = 0\ncopy x ~data\nassert a b ~data ~_main").outcome.unwrap_err();
        assert_eq!(e.to_string(), "test:4: assertion failed: b, ~_main");
        assert!(run("a = 1\ncopy x ~data\nassert a ~data").outcome.is_ok());
    }

    #[test]
    fn reading_unknown_buffer_fails() {
        let e = run("move ~ghost 1:1").outcome.unwrap_err();
        assert_eq!(e.to_string(), "test:1: unknown buffer 'ghost'");
    }

    #[test]
    fn trace_writes_statements() {
        #[derive(Clone, Default)]
        struct Shared(Rc<std::cell::RefCell<Vec<u8>>>);
        impl Write for Shared {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.borrow_mut().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        let shared = Shared::default();
        let host = Host::with_sink(Box::new(MemorySink::new()));
        let mut interp = Interpreter::new(host, SigilProfile::Dollar);
        interp.set_trace(Some(Box::new(shared.clone())));
        let script = Rc::new(parse_script("t", "x = 1\n\nlog $(x)", SigilProfile::Dollar).unwrap());
        interp.run(script, None, HashMap::new()).unwrap();
        let text = String::from_utf8(shared.0.borrow().clone()).unwrap();
        assert_eq!(text, "t:1: x = 1\nt:3: log $(x)\n");
    }
}
