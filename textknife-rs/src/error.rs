//! Error types.
//!
//! Three layers: [`ParseError`] is raised before anything runs,
//! [`RuntimeError`] aborts a running script, and [`EngineError`] is what the
//! [`ScriptEngine`](crate::engine::ScriptEngine) facade hands to its caller.
//! `stop` and `exit` are not errors; they travel as control flow.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::pattern::PatternError;

/// What went wrong while parsing a script.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseErrorKind {
    #[error("'{0}' without a matching opener")]
    UnmatchedCloser(String),
    #[error("'{opener}' opened on line {line} is never closed")]
    Unclosed { opener: String, line: usize },
    #[error("unknown statement '{0}'")]
    UnknownStatement(String),
    #[error("malformed heredoc: {0}")]
    Heredoc(String),
    #[error("heredoc '{0}' is never terminated")]
    UnterminatedHeredoc(String),
    #[error("script definitions are only allowed at top level")]
    NestedScript,
    #[error("leave {levels} with only {depth} enclosing loop(s)")]
    LeaveDepth { levels: usize, depth: usize },
    #[error("{0}")]
    Syntax(String),
}

/// A parse failure, located by script name and 1-based line number.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{script}:{line}: {kind}")]
pub struct ParseError {
    pub script: String,
    pub line: usize,
    pub kind: ParseErrorKind,
}

/// A fatal error raised while a script runs.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("unknown function {namespace}.{function}")]
    UnknownFunction { namespace: String, function: String },
    #[error("{function}: expected {expected} argument(s), got {got}")]
    Arity {
        function: String,
        expected: &'static str,
        got: usize,
    },
    #[error("{function}: argument {index} must be {expected}")]
    ArgumentKind {
        function: String,
        index: usize,
        expected: &'static str,
    },
    #[error("unknown buffer '{0}'")]
    UnknownBuffer(String),
    #[error("mark stack of buffer '{0}' cannot be popped further")]
    MarkStackEmpty(String),
    #[error("buffer selection stack cannot be popped further")]
    SelectionStackEmpty,
    #[error("'{0}' is not a position")]
    InvalidPosition(String),
    #[error("{0}")]
    Eval(String),
    #[error("{op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Pattern(#[from] PatternError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("call depth limit of {0} exceeded")]
    RecursionLimit(usize),
    #[error("no subroutine or script file named '{0}'")]
    UnknownScript(String),
    #[error("assertion failed: {}", .0.join(", "))]
    AssertionFailed(Vec<String>),
    #[error("{script}:{line}: {source}")]
    At {
        script: String,
        line: usize,
        #[source]
        source: Box<RuntimeError>,
    },
}

impl RuntimeError {
    /// Attach a script location unless one is already attached.
    pub fn at(self, script: &str, line: usize) -> RuntimeError {
        match self {
            e @ RuntimeError::At { .. } => e,
            e => RuntimeError::At {
                script: script.to_owned(),
                line,
                source: Box::new(e),
            },
        }
    }
}

impl From<String> for RuntimeError {
    fn from(msg: String) -> Self {
        RuntimeError::Eval(msg)
    }
}

/// Errors surfaced by the engine facade.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("cannot read script {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no script named '{0}' is loaded")]
    UnknownScript(String),
    #[error("no script selected")]
    NoActiveScript,
    #[error("cannot open trace sink {}: {source}", .path.display())]
    Trace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
