//! # bayesdb-bql
//!
//! Lexer, parser, and AST for BQL — an SQL-compatible query language
//! extended with probabilistic operators and a model-definition language
//! (populations, generators, models).
//!
//! This crate is purely the language front end: it turns text into typed
//! phrases and can print them back. Name resolution, compilation to SQL,
//! and execution live in `bayesdb-core`.
//!
//! ```rust
//! use bayesdb_bql::parser::Parser;
//! use bayesdb_bql::ast::{Phrase, Query};
//!
//! let phrases = Parser::parse("ESTIMATE a FROM p;").unwrap();
//! assert!(matches!(&phrases[0], Phrase::Query(Query::Estimate(_))));
//! ```

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod unparse;

pub use ast::{Expr, Phrase, Query};
pub use lexer::{Lexer, Span, Token, TokenKind};
pub use parser::{LexicalError, ParamTable, ParseError, Parser, SyntaxError};
pub use unparse::{expr_to_string, unparse_phrase, unparse_query};
