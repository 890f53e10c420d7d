//! lsc-lex - Lexer for LineScript source.
//!
//! Transforms source bytes into a finite token stream ending in `Eof`.
//! Newlines are significant (they terminate statements) and are emitted as
//! explicit tokens for the parser to consume or skip. Line comments and
//! other whitespace are dropped here but still advance source coordinates.

mod cursor;
mod lexer;
mod token;

pub use cursor::Cursor;
pub use lexer::{tokenize, Lexer};
pub use token::{keyword_from_ident, Token, TokenKind};
