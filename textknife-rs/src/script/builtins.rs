//! Built-in `namespace.function` calls.
//!
//! Each function receives already-evaluated [`CallArg`]s plus the buffer
//! store and host, and returns a [`Value`].  The interpreter calls
//! [`call_builtin`] for both bare calls and `var = ns.fn …` assignments.

use std::path::Path;

use rand::Rng;

use crate::error::RuntimeError;
use crate::host::Host;
use crate::pattern::{compile, RegexSpec};

use super::buffer::BufferStore;
use super::value::Value;

/// One positional argument after evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum CallArg {
    Value(Value),
    /// A `~name` reference, passed by name.
    Buffer(String),
    Regex(RegexSpec),
}

/// Evaluated arguments of one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    pub positional: Vec<CallArg>,
    /// `key=value` options in source order.
    pub options: Vec<(String, Value)>,
}

/// What builtins may touch.
pub struct BuiltinEnv<'a> {
    pub buffers: &'a mut BufferStore,
    pub host: &'a mut Host,
}

/// Dispatch a built-in call.
///
/// Returns `None` if `(namespace, function)` is not a built-in.
pub fn call_builtin(
    namespace: &str,
    function: &str,
    args: &CallArgs,
    env: &mut BuiltinEnv<'_>,
) -> Option<Result<Value, RuntimeError>> {
    // Inner function returns Result<Option<Value>, _>:
    //   Ok(None)    → not a builtin
    //   Ok(Some(v)) → success
    //   Err(e)      → call failed
    fn inner(
        namespace: &str,
        function: &str,
        args: &CallArgs,
        env: &mut BuiltinEnv<'_>,
    ) -> Result<Option<Value>, RuntimeError> {
        let a = Args {
            name: format!("{namespace}.{function}"),
            args,
        };
        Ok(Some(match (namespace, function) {
            // ── string ───────────────────────────────────────────────────────
            ("string", "length") => {
                a.arity(1, 1, "1")?;
                Value::from(a.str(0, env.buffers)?.chars().count())
            }
            ("string", "substring") => {
                a.arity(2, 2, "2")?;
                let s = a.str(0, env.buffers)?;
                let start = a.int(1, env.buffers)?;
                Value::Str(substring(&s, start, &a)?)
            }
            ("string", "replace") => {
                a.arity(3, 3, "3")?;
                let s = a.str(0, env.buffers)?;
                let matcher = compile(&a.regex(1, env.buffers)?)?;
                let replacement = a.str(2, env.buffers)?;
                let limit = a.opt_count("count")?;
                Value::Str(matcher.replace(&s, &replacement, limit).0)
            }
            ("string", "index") => {
                a.arity(2, 3, "2 or 3")?;
                let s = a.str(0, env.buffers)?;
                let needle = a.str(1, env.buffers)?;
                let index = match a.args.positional.get(2) {
                    Some(_) => {
                        let delim = a.str(2, env.buffers)?;
                        let found = pieces(&s, &delim).position(|p| p == needle);
                        found.map(|i| i + 1)
                    }
                    None => s
                        .find(&needle)
                        .map(|byte| s[..byte].chars().count() + 1),
                };
                Value::from(index.unwrap_or(0))
            }
            ("string", "piece") => {
                a.arity(3, 3, "3")?;
                let s = a.str(0, env.buffers)?;
                let delim = a.str(1, env.buffers)?;
                let n = a.int(2, env.buffers)?;
                let piece = usize::try_from(n)
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|i| pieces(&s, &delim).nth(i))
                    .unwrap_or("");
                Value::from(piece)
            }
            ("string", "upper") => {
                a.arity(1, 1, "1")?;
                Value::Str(a.str(0, env.buffers)?.to_uppercase())
            }
            ("string", "lower") => {
                a.arity(1, 1, "1")?;
                Value::Str(a.str(0, env.buffers)?.to_lowercase())
            }
            ("string", "trim") => {
                a.arity(1, 1, "1")?;
                Value::from(a.str(0, env.buffers)?.trim())
            }

            // ── buffer ───────────────────────────────────────────────────────
            ("buffer", "shift") | ("buffer", "pop") => {
                a.arity(1, 1, "1")?;
                let buf = env.buffers.get_mut(a.buffer(0)?)?;
                let line = if function == "shift" {
                    buf.shift()
                } else {
                    buf.pop()
                };
                Value::Str(line.unwrap_or_default())
            }
            ("buffer", "push") => {
                a.arity(2, 2, "2")?;
                let text = a.str(1, env.buffers)?;
                let buf = env.buffers.entry(a.buffer(0)?);
                buf.push(text);
                Value::from(buf.len())
            }
            ("buffer", "join") => {
                a.arity(1, 2, "1 or 2")?;
                let sep = match a.args.positional.get(1) {
                    Some(_) => a.str(1, env.buffers)?,
                    None => String::new(),
                };
                Value::Str(env.buffers.get(a.buffer(0)?)?.join(&sep))
            }
            ("buffer", "split") => {
                a.arity(3, 3, "3")?;
                let text = a.str(1, env.buffers)?;
                let sep = a.str(2, env.buffers)?;
                Value::from(env.buffers.entry(a.buffer(0)?).split_from(&text, &sep))
            }
            ("buffer", "sort") => {
                a.arity(1, 1, "1")?;
                let buf = env.buffers.get_mut(a.buffer(0)?)?;
                buf.sort();
                Value::from(buf.len())
            }
            ("buffer", "difference") => {
                a.arity(2, 3, "2 or 3")?;
                let left = env.buffers.get(a.buffer(0)?)?;
                let right = env.buffers.get(a.buffer(1)?)?;
                let only: Vec<String> = left
                    .lines()
                    .iter()
                    .filter(|line| !right.lines().contains(line))
                    .cloned()
                    .collect();
                let count = only.len();
                if a.args.positional.len() == 3 {
                    env.buffers.entry(a.buffer(2)?).set_lines(only);
                }
                Value::from(count)
            }
            ("buffer", "count") => {
                a.arity(1, 1, "1")?;
                Value::from(env.buffers.get(a.buffer(0)?)?.len())
            }
            ("buffer", "clear") => {
                a.arity(1, 1, "1")?;
                env.buffers.entry(a.buffer(0)?).clear();
                Value::Int(0)
            }

            // ── os ───────────────────────────────────────────────────────────
            ("os", "basename") => {
                a.arity(1, 1, "1")?;
                Value::Str(env.host.os.basename(&a.str(0, env.buffers)?))
            }
            ("os", "dirname") => {
                a.arity(1, 1, "1")?;
                Value::Str(env.host.os.dirname(&a.str(0, env.buffers)?))
            }
            ("os", "changeextension") => {
                a.arity(2, 2, "2")?;
                let path = a.str(0, env.buffers)?;
                let ext = a.str(1, env.buffers)?;
                Value::Str(env.host.os.change_extension(&path, &ext))
            }
            ("os", "pwd") => {
                a.arity(0, 0, "0")?;
                Value::Str(env.host.os.pwd().display().to_string())
            }
            ("os", "cd") | ("os", "pushd") => {
                a.arity(1, 1, "1")?;
                let path = a.str(0, env.buffers)?;
                let result = if function == "cd" {
                    env.host.os.cd(Path::new(&path))
                } else {
                    env.host.os.pushd(Path::new(&path))
                };
                result.map_err(|source| RuntimeError::Io {
                    op: if function == "cd" { "cd" } else { "pushd" },
                    path: path.into(),
                    source,
                })?;
                Value::Str(env.host.os.pwd().display().to_string())
            }
            ("os", "popd") => {
                a.arity(0, 0, "0")?;
                let dir = env.host.os.popd().map_err(|source| RuntimeError::Io {
                    op: "popd",
                    path: env.host.os.pwd(),
                    source,
                })?;
                Value::Str(dir.display().to_string())
            }
            ("os", "mkdir") => {
                a.arity(1, 1, "1")?;
                Value::from(env.host.os.mkdir(Path::new(&a.str(0, env.buffers)?)))
            }
            ("os", "isdir") => {
                a.arity(1, 1, "1")?;
                Value::from(env.host.os.isdir(Path::new(&a.str(0, env.buffers)?)))
            }
            ("os", "exists") => {
                a.arity(1, 1, "1")?;
                Value::from(env.host.os.exists(Path::new(&a.str(0, env.buffers)?)))
            }
            ("os", "listfiles") => {
                a.arity(2, 2, "2")?;
                let dir = a.str(0, env.buffers)?;
                let out = a.buffer(1)?;
                let include = a.opt_regex("include")?;
                let exclude = a.opt_regex("exclude")?;
                let files_only = a.opt("filesonly").is_some_and(Value::as_bool);
                let names = env
                    .host
                    .os
                    .list_files(
                        Path::new(&dir),
                        include.as_deref(),
                        exclude.as_deref(),
                        files_only,
                    )
                    .map_err(|source| RuntimeError::Io {
                        op: "list",
                        path: env.host.os.resolve(Path::new(&dir)),
                        source,
                    })?;
                let count = names.len();
                env.buffers.entry(out).set_lines(names);
                Value::from(count)
            }
            ("os", "copy") => {
                a.arity(2, 2, "2")?;
                let src = a.str(0, env.buffers)?;
                let dst = a.str(1, env.buffers)?;
                Value::from(env.host.os.copy(Path::new(&src), Path::new(&dst)))
            }

            // ── math ─────────────────────────────────────────────────────────
            ("math", "random") => {
                a.arity(1, 2, "1 or 2")?;
                let max = a.int(0, env.buffers)?;
                let min = match a.args.positional.get(1) {
                    Some(_) => a.int(1, env.buffers)?,
                    None => 0,
                };
                let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
                Value::Int(rand::thread_rng().gen_range(lo..=hi))
            }

            _ => return Ok(None),
        }))
    }
    inner(namespace, function, args, env).transpose()
}

// ── Argument access ───────────────────────────────────────────────────────────

struct Args<'a> {
    name: String,
    args: &'a CallArgs,
}

impl Args<'_> {
    fn arity(&self, min: usize, max: usize, expected: &'static str) -> Result<(), RuntimeError> {
        let got = self.args.positional.len();
        if got < min || got > max {
            return Err(RuntimeError::Arity {
                function: self.name.clone(),
                expected,
                got,
            });
        }
        Ok(())
    }

    fn kind_error(&self, index: usize, expected: &'static str) -> RuntimeError {
        RuntimeError::ArgumentKind {
            function: self.name.clone(),
            index: index + 1,
            expected,
        }
    }

    /// Positional argument as text; a buffer yields its joined lines.
    fn str(&self, index: usize, buffers: &BufferStore) -> Result<String, RuntimeError> {
        match self.args.positional.get(index) {
            Some(CallArg::Value(v)) => Ok(v.as_str()),
            Some(CallArg::Buffer(name)) => Ok(buffers.get(name)?.text()),
            Some(CallArg::Regex(spec)) => Ok(spec.pattern.clone()),
            None => Err(self.kind_error(index, "a string")),
        }
    }

    fn int(&self, index: usize, buffers: &BufferStore) -> Result<i64, RuntimeError> {
        let text = self.str(index, buffers)?;
        text.trim()
            .parse()
            .map_err(|_| self.kind_error(index, "an integer"))
    }

    fn buffer(&self, index: usize) -> Result<&str, RuntimeError> {
        match self.args.positional.get(index) {
            Some(CallArg::Buffer(name)) => Ok(name),
            _ => Err(self.kind_error(index, "a buffer reference")),
        }
    }

    /// A regex literal, or text taken as a pattern.
    fn regex(&self, index: usize, buffers: &BufferStore) -> Result<RegexSpec, RuntimeError> {
        match self.args.positional.get(index) {
            Some(CallArg::Regex(spec)) => Ok(spec.clone()),
            _ => Ok(RegexSpec::new(self.str(index, buffers)?)),
        }
    }

    fn opt(&self, key: &str) -> Option<&Value> {
        self.args
            .options
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    fn opt_count(&self, key: &str) -> Result<Option<usize>, RuntimeError> {
        match self.opt(key) {
            None => Ok(None),
            Some(v) => v
                .as_int()
                .and_then(|n| usize::try_from(n).ok())
                .map(Some)
                .ok_or_else(|| {
                    RuntimeError::Eval(format!("{}: {key}= must be a non-negative integer", self.name))
                }),
        }
    }

    fn opt_regex(
        &self,
        key: &str,
    ) -> Result<Option<std::sync::Arc<dyn crate::pattern::Matcher>>, RuntimeError> {
        match self.opt(key) {
            Some(v) if !v.as_str().is_empty() => Ok(Some(compile(&RegexSpec::new(v.as_str()))?)),
            _ => Ok(None),
        }
    }
}

// ── String helpers ────────────────────────────────────────────────────────────

/// Pieces of `s` split on `delim`; an empty delimiter yields `s` whole.
fn pieces<'s>(s: &'s str, delim: &'s str) -> Box<dyn Iterator<Item = &'s str> + 's> {
    if delim.is_empty() {
        Box::new(std::iter::once(s))
    } else {
        Box::new(s.split(delim))
    }
}

/// `string.substring`: from 1-based `start`, bounded by `count=`,
/// `excluding=` (up to the first occurrence of a marker), or `including=`
/// (through it).  Without a bound, to the end of the string.
fn substring(s: &str, start: i64, a: &Args<'_>) -> Result<String, RuntimeError> {
    let skip = usize::try_from(start.max(1) - 1).unwrap_or(0);
    let tail: String = s.chars().skip(skip).collect();
    if let Some(n) = a.opt_count("count")? {
        return Ok(tail.chars().take(n).collect());
    }
    if let Some(marker) = a.opt("excluding").map(Value::as_str) {
        return Ok(match tail.find(&marker) {
            Some(i) => tail[..i].to_owned(),
            None => tail,
        });
    }
    if let Some(marker) = a.opt("including").map(Value::as_str) {
        return Ok(match tail.find(&marker) {
            Some(i) => tail[..i + marker.len()].to_owned(),
            None => tail,
        });
    }
    Ok(tail)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{MemorySink, StdFiles, StdOs};

    fn host_in(dir: &Path) -> Host {
        Host::new(
            Box::new(StdFiles),
            Box::new(StdOs::in_dir(dir)),
            Box::new(MemorySink::new()),
        )
    }

    fn v(s: &str) -> CallArg {
        CallArg::Value(Value::from(s))
    }

    fn b(s: &str) -> CallArg {
        CallArg::Buffer(s.to_owned())
    }

    fn args(positional: Vec<CallArg>) -> CallArgs {
        CallArgs {
            positional,
            options: Vec::new(),
        }
    }

    fn with_opt(mut a: CallArgs, k: &str, val: &str) -> CallArgs {
        a.options.push((k.to_owned(), Value::from(val)));
        a
    }

    fn call(ns: &str, f: &str, a: CallArgs, buffers: &mut BufferStore) -> Result<Value, RuntimeError> {
        let dir = tempfile::tempdir().unwrap();
        let mut host = host_in(dir.path());
        let mut env = BuiltinEnv {
            buffers,
            host: &mut host,
        };
        call_builtin(ns, f, &a, &mut env).expect("not a builtin")
    }

    fn s(ns: &str, f: &str, a: CallArgs) -> String {
        call(ns, f, a, &mut BufferStore::new()).unwrap().as_str()
    }

    #[test]
    fn unknown_function_is_none() {
        let mut buffers = BufferStore::new();
        let mut host = Host::default();
        let mut env = BuiltinEnv {
            buffers: &mut buffers,
            host: &mut host,
        };
        assert!(call_builtin("string", "frob", &CallArgs::default(), &mut env).is_none());
        assert!(call_builtin("net", "get", &CallArgs::default(), &mut env).is_none());
    }

    #[test]
    fn string_functions() {
        assert_eq!(s("string", "length", args(vec![v("héllo")])), "5");
        assert_eq!(s("string", "upper", args(vec![v("abc")])), "ABC");
        assert_eq!(s("string", "trim", args(vec![v("  x ")])), "x");
        assert_eq!(s("string", "index", args(vec![v("hello"), v("ll")])), "3");
        assert_eq!(s("string", "index", args(vec![v("hello"), v("z")])), "0");
        assert_eq!(s("string", "index", args(vec![v("a,b,c"), v("c"), v(",")])), "3");
        assert_eq!(s("string", "piece", args(vec![v("a,b,c"), v(","), v("2")])), "b");
        assert_eq!(s("string", "piece", args(vec![v("a,b,c"), v(","), v("9")])), "");
    }

    #[test]
    fn index_of_delimited_piece() {
        assert_eq!(s("string", "index", args(vec![v("x;y;z"), v("y"), v(";")])), "2");
        assert_eq!(s("string", "index", args(vec![v("x;y;z"), v("w"), v(";")])), "0");
        assert_eq!(s("string", "index", args(vec![v("whole"), v("whole"), v("")])), "1");
    }

    #[test]
    fn substring_modifiers() {
        let base = || args(vec![v("key=value;rest"), v("5")]);
        assert_eq!(s("string", "substring", base()), "value;rest");
        assert_eq!(s("string", "substring", with_opt(base(), "count", "3")), "val");
        assert_eq!(s("string", "substring", with_opt(base(), "excluding", ";")), "value");
        assert_eq!(s("string", "substring", with_opt(base(), "including", ";")), "value;");
        assert_eq!(s("string", "substring", args(vec![v("abc"), v("10")])), "");
    }

    #[test]
    fn string_replace_with_count() {
        let a = args(vec![v("a1b2c3"), CallArg::Regex(RegexSpec::new(r"\d")), v("#")]);
        assert_eq!(s("string", "replace", a.clone()), "a#b#c#");
        assert_eq!(s("string", "replace", with_opt(a, "count", "2")), "a#b#c3");
    }

    #[test]
    fn arity_and_kind_errors() {
        let e = call("string", "length", args(vec![]), &mut BufferStore::new()).unwrap_err();
        assert!(matches!(e, RuntimeError::Arity { got: 0, .. }));
        let e = call("buffer", "count", args(vec![v("x")]), &mut BufferStore::new()).unwrap_err();
        assert!(matches!(e, RuntimeError::ArgumentKind { index: 1, .. }));
        let e = call("string", "piece", args(vec![v("a"), v(","), v("x")]), &mut BufferStore::new())
            .unwrap_err();
        assert_eq!(e.to_string(), "string.piece: argument 3 must be an integer");
    }

    #[test]
    fn split_sort_join() {
        let mut buffers = BufferStore::new();
        let n = call("buffer", "split", args(vec![b("data"), v("Jonny,Charly,Adam,Berta"), v(",")]), &mut buffers)
            .unwrap();
        assert_eq!(n, Value::Int(4));
        call("buffer", "sort", args(vec![b("data")]), &mut buffers).unwrap();
        let joined = call("buffer", "join", args(vec![b("data"), v(";")]), &mut buffers).unwrap();
        assert_eq!(joined.as_str(), "Adam;Berta;Charly;Jonny");
    }

    #[test]
    fn shift_pop_push_count() {
        let mut buffers = BufferStore::new();
        buffers.entry("q").set_lines(vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(call("buffer", "shift", args(vec![b("q")]), &mut buffers).unwrap().as_str(), "a");
        assert_eq!(call("buffer", "pop", args(vec![b("q")]), &mut buffers).unwrap().as_str(), "c");
        assert_eq!(call("buffer", "push", args(vec![b("q"), v("d")]), &mut buffers).unwrap(), Value::Int(2));
        assert_eq!(call("buffer", "count", args(vec![b("q")]), &mut buffers).unwrap(), Value::Int(2));
        let e = call("buffer", "shift", args(vec![b("nope")]), &mut buffers).unwrap_err();
        assert!(matches!(e, RuntimeError::UnknownBuffer(_)));
    }

    #[test]
    fn difference_both_ways() {
        let mut buffers = BufferStore::new();
        buffers.entry("a").set_lines(vec!["x".into(), "y".into(), "z".into()]);
        buffers.entry("b").set_lines(vec!["y".into()]);
        assert_eq!(call("buffer", "difference", args(vec![b("a"), b("b"), b("out")]), &mut buffers).unwrap(), Value::Int(2));
        assert_eq!(buffers.get("out").unwrap().lines(), ["x", "z"]);
        assert_eq!(call("buffer", "difference", args(vec![b("b"), b("a")]), &mut buffers).unwrap(), Value::Int(0));
    }

    #[test]
    fn os_functions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "1\n").unwrap();
        std::fs::write(dir.path().join("b.log"), "2\n").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let mut host = host_in(dir.path());
        let mut buffers = BufferStore::new();
        let mut env = BuiltinEnv {
            buffers: &mut buffers,
            host: &mut host,
        };
        let mut run = |f: &str, a: CallArgs| call_builtin("os", f, &a, &mut env).unwrap().unwrap();

        assert_eq!(run("basename", args(vec![v("/x/y/z.txt")])).as_str(), "z.txt");
        assert_eq!(run("changeextension", args(vec![v("z.txt"), v("md")])).as_str(), "z.md");
        assert_eq!(run("exists", args(vec![v("a.txt")])), Value::Int(1));
        assert_eq!(run("isdir", args(vec![v("sub")])), Value::Int(1));
        assert_eq!(run("copy", args(vec![v("a.txt"), v("c.txt")])), Value::Int(1));
        let listed = with_opt(with_opt(args(vec![v("."), b("out")]), "exclude", r"\.log$"), "filesonly", "1");
        assert_eq!(run("listfiles", listed), Value::Int(2));
        run("pushd", args(vec![v("sub")]));
        assert!(run("pwd", args(vec![])).as_str().ends_with("sub"));
        run("popd", args(vec![]));
        assert_eq!(run("exists", args(vec![v("c.txt")])), Value::Int(1));
        drop(run);
        assert_eq!(buffers.get("out").unwrap().lines(), ["a.txt", "c.txt"]);
    }

    #[test]
    fn cd_to_missing_dir_fails() {
        let e = call("os", "cd", args(vec![v("no/such/dir")]), &mut BufferStore::new()).unwrap_err();
        assert!(matches!(e, RuntimeError::Io { op: "cd", .. }));
    }

    #[test]
    fn random_in_range() {
        for _ in 0..50 {
            let n = call("math", "random", args(vec![v("5"), v("3")]), &mut BufferStore::new())
                .unwrap()
                .as_int()
                .unwrap();
            assert!((3..=5).contains(&n));
        }
        let n = call("math", "random", args(vec![v("0")]), &mut BufferStore::new()).unwrap();
        assert_eq!(n, Value::Int(0));
    }
}
