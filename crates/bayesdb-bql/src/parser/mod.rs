//! BQL Parser
//!
//! A hand-written recursive descent parser with Pratt expression parsing
//! for BQL: an SQL-compatible query language extended with probabilistic
//! operator forms and a model-definition language.
//!
//! # Phrases
//!
//! Input is a sequence of semicolon-separated phrases. A phrase is a
//! transaction command (`BEGIN`/`COMMIT`/`ROLLBACK`), a DDL command
//! (`CREATE`/`DROP`/`ALTER TABLE`), a model-definition command
//! (`CREATE`/`ALTER`/`DROP POPULATION` or `GENERATOR`, `INITIALIZE`,
//! `ANALYZE`, `DROP MODELS`), a query (`SELECT`, `ESTIMATE`, `INFER`,
//! `SIMULATE`), or empty.
//!
//! # Probabilistic operator forms
//!
//! Recognized at the unary-expression level and carried as dedicated AST
//! nodes: `PREDICTIVE PROBABILITY OF`, `PROBABILITY DENSITY OF`,
//! `SIMILARITY [TO (…)] [IN THE CONTEXT OF …]`,
//! `DEPENDENCE PROBABILITY`, `MUTUAL INFORMATION`, `CORRELATION
//! [PVALUE]`. The parser does not check which forms are legal in which
//! query context; that is the compiler's job, and source spans are kept
//! so its errors can be localized.
//!
//! # Errors
//!
//! Syntax errors report the expected and found tokens with a byte span;
//! lexical errors resolve to line/column. After an error the parser can
//! recover to the phrase following the next semicolon.

mod error;
mod parser;
mod pratt;

pub use error::{LexicalError, ParseError, SyntaxError};
pub use parser::{ParamTable, Parser};
