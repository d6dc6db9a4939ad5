//! BQL Lexer/Tokenizer
//!
//! This module provides a hand-written lexer for BQL that produces a
//! stream of tokens. Keywords are matched case-insensitively with
//! fallback to identifiers; parameters (`?`, `?N`, `:name`, `@name`,
//! `$name`) are recognized directly.

mod span;
mod token;
mod tokenizer;

pub use span::Span;
pub use token::{Keyword, Token, TokenKind};
pub use tokenizer::Lexer;
