//! ember-lang: a small dynamically-typed scripting language — scanner,
//! Pratt parser, register-allocating compiler, and a refcounted-heap
//! bytecode VM. See `vm` for the execution pipeline (§2 of the design doc).

pub mod errors;
pub mod lexer;
pub mod parser;
pub mod vm;

pub use vm::machine::{RuntimeError, RuntimeErrorKind, State, StateOptions};
pub use vm::{compile, FrontendError};
