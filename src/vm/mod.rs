//! The register-based virtual machine: instruction/prototype model (§4.B),
//! the refcounted heap runtime (§4.A), the register-allocating compiler
//! (§4.E), the dispatch-loop interpreter (§4.F), and the call-frame model
//! that threads them together (§3 `State`).

pub mod bytecode;
pub mod compiler;
pub mod frame;
pub mod heap;
pub mod machine;
pub mod value;

use crate::lexer::{LexError, Lexer};
use crate::parser::{ParseError, Parser};
use bytecode::Prototype;
use compiler::CompileError;

/// The union of everything that can go wrong before a program starts
/// executing (§7): scanning, parsing, or register/constant-pool compilation.
#[derive(Debug, Clone)]
pub enum FrontendError {
    Scan(LexError),
    Parse(ParseError),
    Compile(CompileError),
}

impl FrontendError {
    pub fn line(&self) -> usize {
        match self {
            FrontendError::Scan(e) => e.line,
            FrontendError::Parse(e) => e.line,
            FrontendError::Compile(e) => e.line,
        }
    }

    pub fn col(&self) -> usize {
        match self {
            FrontendError::Scan(e) => e.col,
            FrontendError::Parse(e) => e.col,
            FrontendError::Compile(e) => e.col,
        }
    }
}

impl std::fmt::Display for FrontendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrontendError::Scan(e) => write!(f, "{}", e),
            FrontendError::Parse(e) => write!(f, "{}", e),
            FrontendError::Compile(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for FrontendError {}

impl From<LexError> for FrontendError {
    fn from(e: LexError) -> Self {
        FrontendError::Scan(e)
    }
}

impl From<ParseError> for FrontendError {
    fn from(e: ParseError) -> Self {
        FrontendError::Parse(e)
    }
}

impl From<CompileError> for FrontendError {
    fn from(e: CompileError) -> Self {
        FrontendError::Compile(e)
    }
}

/// Source text → `Prototype`, the whole front end in one call (§2's data
/// flow C → D → E). `known_names` lets an embedder that has already
/// `register_host`-ed its standard library catch an unresolved call target
/// at compile time rather than at runtime (§10.3).
pub fn compile(heap: &mut heap::Heap, src: &str, known_names: &[&str]) -> Result<Prototype, FrontendError> {
    tracing::debug!(len = src.len(), "compile enter");
    let tokens = Lexer::new(src).tokenize()?;
    let program = Parser::new(tokens).parse_program()?;
    let proto = compiler::compile(heap, &program, known_names)?;
    tracing::debug!(instructions = proto.code.len(), constants = proto.constants.len(), "compile exit");
    Ok(proto)
}
