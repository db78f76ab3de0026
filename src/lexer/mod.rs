pub mod lexer;
pub mod token;

pub use lexer::{LexError, Lexer};
pub use token::{Spanned, Token};
