//! Script engine facade.
//!
//! [`ScriptEngine`] is what a driver (the CLI, or an embedding program)
//! talks to: load scripts by name, pick the active one, pre-seed root-scope
//! variables and run.  All state lives in one value; two engines never
//! share buffers or scopes.
//!
//! ```rust
//! use textknife::engine::ScriptEngine;
//! use textknife::config::EngineConfig;
//! use textknife::host::{Host, MemorySink};
//!
//! let sink = MemorySink::new();
//! let mut engine = ScriptEngine::with_host(Host::with_sink(Box::new(sink.clone())), EngineConfig::default());
//! engine.load_script_str("hello", "log Hello $(who)\nexit 4").unwrap();
//! engine.select_script("hello").unwrap();
//! engine.define_variable("who", "World");
//! assert_eq!(engine.test_and_run(), 4);
//! assert_eq!(sink.messages(), vec!["Hello World"]);
//! ```

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::Level;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::host::Host;
use crate::script::{
    buffer::BufferStore,
    interp::{Interpreter, Outcome},
    stmt::{parse_script, Script},
    value::Value,
};

/// Exit status for a script ended by `stop`.
pub const EXIT_STOP: i32 = 1;
/// Exit status for a script aborted by a runtime error.
pub const EXIT_ERROR: i32 = 2;

struct Loaded {
    script: Rc<Script>,
    /// Directory script-file calls resolve against.
    dir: Option<PathBuf>,
}

pub struct ScriptEngine {
    interp: Interpreter,
    scripts: HashMap<String, Loaded>,
    active: Option<String>,
    defines: HashMap<String, Value>,
    config: EngineConfig,
}

impl ScriptEngine {
    /// Engine with the standard filesystem and `tracing` output.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_host(Host::default(), config)
    }

    /// `config.trace` is not opened here; pass it to [`set_trace`](Self::set_trace).
    pub fn with_host(host: Host, config: EngineConfig) -> Self {
        let mut interp = Interpreter::new(host, config.sigils);
        interp.set_max_call_depth(config.max_call_depth);
        let defines = config
            .defines
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.as_str()).normalized()))
            .collect();
        ScriptEngine {
            interp,
            scripts: HashMap::new(),
            active: None,
            defines,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Loading ───────────────────────────────────────────────────────────────

    /// Parse the file at `path` and register it as `name`.
    ///
    /// The first script loaded becomes the active one.
    pub fn load_script(&mut self, name: &str, path: &Path) -> Result<(), EngineError> {
        let lines = self
            .interp
            .host
            .files
            .read_lines(path)
            .map_err(|source| EngineError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let script = parse_script(name, &lines.join("\n"), self.config.sigils)?;
        tracing::debug!(
            script = name,
            path = %path.display(),
            statements = script.body.len(),
            subs = script.subs.len(),
            "script loaded"
        );
        let dir = path.parent().map(Path::to_path_buf);
        self.register(name, script, dir);
        Ok(())
    }

    /// Parse `source` and register it as `name`.  Script-file calls made
    /// from it resolve against the host's working directory.
    pub fn load_script_str(&mut self, name: &str, source: &str) -> Result<(), EngineError> {
        let script = parse_script(name, source, self.config.sigils)?;
        tracing::debug!(script = name, statements = script.body.len(), "script loaded");
        self.register(name, script, None);
        Ok(())
    }

    fn register(&mut self, name: &str, script: Script, dir: Option<PathBuf>) {
        self.scripts.insert(
            name.to_owned(),
            Loaded {
                script: Rc::new(script),
                dir,
            },
        );
        if self.active.is_none() {
            self.active = Some(name.to_owned());
        }
    }

    /// Make `name` the script [`run`](Self::run) executes.
    pub fn select_script(&mut self, name: &str) -> Result<(), EngineError> {
        if !self.scripts.contains_key(name) {
            return Err(EngineError::UnknownScript(name.to_owned()));
        }
        self.active = Some(name.to_owned());
        Ok(())
    }

    pub fn active_script(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Bind `name` in the root scope of every subsequent run.
    pub fn define_variable(&mut self, name: &str, value: impl Into<Value>) {
        self.defines
            .insert(name.to_owned(), value.into().normalized());
    }

    // ── Tracing ───────────────────────────────────────────────────────────────

    /// Trace executed statements to stderr (`"-"`) or to the file `sink`.
    pub fn set_trace(&mut self, sink: &str) -> Result<(), EngineError> {
        let out: Box<dyn Write> = if sink == "-" {
            Box::new(io::stderr())
        } else {
            let path = PathBuf::from(sink);
            let file = File::create(&path).map_err(|source| EngineError::Trace { path, source })?;
            Box::new(BufWriter::new(file))
        };
        self.interp.set_trace(Some(out));
        Ok(())
    }

    /// Route the trace to an arbitrary writer.
    pub fn set_trace_writer(&mut self, out: Box<dyn Write>) {
        self.interp.set_trace(Some(out));
    }

    pub fn clear_trace(&mut self) {
        self.interp.set_trace(None);
    }

    // ── Running ───────────────────────────────────────────────────────────────

    /// Run the active script to completion, `stop` or `exit`.
    pub fn run(&mut self) -> Result<Outcome, EngineError> {
        let name = self.active.clone().ok_or(EngineError::NoActiveScript)?;
        let loaded = self
            .scripts
            .get(&name)
            .ok_or_else(|| EngineError::UnknownScript(name.clone()))?;
        let script = Rc::clone(&loaded.script);
        let dir = loaded.dir.clone();
        tracing::debug!(script = %name, "run started");
        let outcome = self.interp.run(script, dir, self.defines.clone())?;
        tracing::debug!(script = %name, ?outcome, "run finished");
        Ok(outcome)
    }

    /// Run the active script and map the result to a process exit status:
    /// `0` on completion, the code of `exit`, `1` after `stop`, `2` after
    /// an error (which is logged at error level).
    pub fn test_and_run(&mut self) -> i32 {
        match self.run() {
            Ok(Outcome::Completed) => 0,
            Ok(Outcome::Exit(code)) => i32::try_from(code).unwrap_or(EXIT_ERROR),
            Ok(Outcome::Stop) => EXIT_STOP,
            Err(e) => {
                self.interp.host.log.log(Level::ERROR, &e.to_string());
                EXIT_ERROR
            }
        }
    }

    /// Buffers left behind by the last run.
    pub fn buffers(&self) -> &BufferStore {
        &self.interp.buffers
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
