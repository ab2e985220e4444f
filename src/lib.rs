//! An interactive POSIX-flavoured command shell.
//!
//! The crate provides the building blocks of a small login-style shell: a
//! raw-mode terminal line editor with history and TAB completion, a
//! quoting-aware tokenizer, and a pipeline executor that dispatches each
//! stage to an in-process builtin or an external program found via `PATH`.
//!
//! The binary in `main.rs` wires these together into a REPL; each component
//! is usable on its own, which is how the tests drive them.

pub mod builtin;
pub mod editor;
pub mod env;
pub mod executor;
pub mod history;
pub mod io_adapters;
pub mod lexer;
pub mod resolver;
pub mod terminal;

pub use editor::{Action, LineEditor};
pub use env::Environment;
pub use executor::{ExecContext, Pipeline};
pub use history::History;
pub use resolver::PathResolver;
pub use terminal::{Key, Terminal};
