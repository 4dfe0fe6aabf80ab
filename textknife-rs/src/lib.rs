//! textknife: a line-buffer scripting engine for searching and transforming
//! text files.
//!
//! Scripts are parsed into statement trees by [`script::stmt`] and executed
//! by [`script::Interpreter`]; [`engine::ScriptEngine`] wraps both for
//! drivers such as the `textknife` binary.  File access, OS primitives and
//! script output go through the traits in [`host`].

pub mod cli;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod pattern;
pub mod script;
