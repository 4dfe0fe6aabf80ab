//! The text-knife scripting language.
//!
//! A tree-walking interpreter for a small line-editing language:
//!
//! - Named line buffers with a `line:column` cursor, marks and match state
//! - Regex navigation (`move s/pat/`) and substitution (`replace`)
//! - Variable interpolation (`$(name)` / `~buf`, or `!(name)` / `!buf`)
//! - Integer arithmetic and numeric / lexical comparisons
//! - Control flow: `if` … `else` … `endif`, `while` … `endwhile`, `leave`,
//!   `stop`, `exit`
//! - Subroutines (`script` … `endscript`) and script-file calls
//! - Namespaced built-ins: `string.*`, `buffer.*`, `os.*`, `math.*`
//!
//! # Quick start
//!
//! ```rust
//! use std::collections::HashMap;
//! use std::rc::Rc;
//! use textknife::host::{Host, MemorySink};
//! use textknife::script::{parse_script, Interpreter, SigilProfile};
//!
//! let sink = MemorySink::new();
//! let mut interp = Interpreter::new(Host::with_sink(Box::new(sink.clone())), SigilProfile::Dollar);
//! let script = parse_script("demo", "x := 6 * 7\nlog $(x)", SigilProfile::Dollar).unwrap();
//! interp.run(Rc::new(script), None, HashMap::new()).unwrap();
//! assert_eq!(sink.messages(), vec!["42"]);
//! ```

pub mod buffer;
pub mod builtins;
pub mod expand;
pub mod expr;
pub mod interp;
pub mod position;
pub mod stmt;
pub mod value;

// Re-exports for convenience.
pub use buffer::{Buffer, BufferStore};
pub use expand::SigilProfile;
pub use expr::EvalContext;
pub use interp::{Interpreter, Outcome};
pub use position::Position;
pub use stmt::{parse_script, Script};
pub use value::Value;
