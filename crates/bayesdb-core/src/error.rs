//! Error types for the BQL engine.

/// Errors that can occur while executing BQL.
#[derive(Debug, thiserror::Error)]
pub enum BqlError {
    /// The lexer rejected the input.
    #[error(transparent)]
    Lexical(#[from] bayesdb_bql::LexicalError),

    /// The parser rejected the input.
    #[error(transparent)]
    Parse(#[from] bayesdb_bql::ParseError),

    /// No such table.
    #[error("No such table: {0}")]
    NoSuchTable(String),

    /// No such population.
    #[error("No such population: {0}")]
    NoSuchPopulation(String),

    /// No such generator.
    #[error("No such generator: {0}")]
    NoSuchGenerator(String),

    /// No such variable in the population.
    #[error("No such variable in population {population}: {name}")]
    NoSuchVariable {
        /// The population searched.
        population: String,
        /// The missing variable.
        name: String,
    },

    /// No such column in the base table.
    #[error("No such column in table {table}: {name}")]
    NoSuchColumn {
        /// The table searched.
        table: String,
        /// The missing column.
        name: String,
    },

    /// No backend registered under this name.
    #[error("No such backend: {0}")]
    NoSuchBackend(String),

    /// The table has several generators and no declared default.
    #[error("Table {0} has multiple generators and no default")]
    AmbiguousDefault(String),

    /// An operator was used outside the context that defines it.
    #[error("{operator} is not meaningful in {context} context")]
    WrongContext {
        /// The operator.
        operator: &'static str,
        /// The context the query header fixed.
        context: &'static str,
    },

    /// Statistical types the operator cannot combine.
    #[error("{operator} cannot combine statistical types {stattype0} and {stattype1}")]
    IncompatibleStattype {
        /// The operator.
        operator: &'static str,
        /// First variable's statistical type.
        stattype0: String,
        /// Second variable's statistical type.
        stattype1: String,
    },

    /// A model index that does not exist in the generator.
    #[error("Generator {generator} has no model {modelno}")]
    InvalidModel {
        /// The generator searched.
        generator: String,
        /// The missing model index.
        modelno: i64,
    },

    /// Catalog or statement shape violation.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Wrong number of parameters supplied to a phrase.
    #[error("Phrase takes {expected} parameters, got {got}")]
    ParameterCount {
        /// Slots the phrase requires.
        expected: usize,
        /// Values supplied.
        got: usize,
    },

    /// Transaction misuse (nesting, ANALYZE inside a transaction).
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// A backend failed; the backend's identity is preserved.
    #[error("Backend {backend}: {message}")]
    Backend {
        /// The backend that failed.
        backend: String,
        /// Its message.
        message: String,
    },

    /// The phrase was interrupted.
    #[error("Interrupted")]
    Cancelled,

    /// Invariant violation inside the engine.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Error from the underlying store.
    #[error("Store error: {0}")]
    Sqlite(rusqlite::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<bayesdb_bql::SyntaxError> for BqlError {
    fn from(e: bayesdb_bql::SyntaxError) -> Self {
        match e {
            bayesdb_bql::SyntaxError::Lexical(e) => Self::Lexical(e),
            bayesdb_bql::SyntaxError::Parse(e) => Self::Parse(e),
        }
    }
}

impl From<rusqlite::Error> for BqlError {
    fn from(e: rusqlite::Error) -> Self {
        // Errors raised inside our own scalar functions come back wrapped;
        // unwrap them so backend and cancellation failures keep their kind.
        if let rusqlite::Error::UserFunctionError(inner) = e {
            match inner.downcast::<Self>() {
                Ok(bql) => *bql,
                Err(other) => Self::Sqlite(rusqlite::Error::UserFunctionError(other)),
            }
        } else {
            Self::Sqlite(e)
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, BqlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_function_error_unwraps() {
        let inner = BqlError::Backend {
            backend: String::from("toy"),
            message: String::from("boom"),
        };
        let wrapped = rusqlite::Error::UserFunctionError(Box::new(inner));
        let unwrapped: BqlError = wrapped.into();
        assert!(matches!(unwrapped, BqlError::Backend { .. }));
    }

    #[test]
    fn test_display() {
        let e = BqlError::NoSuchPopulation(String::from("p"));
        assert_eq!(e.to_string(), "No such population: p");
    }
}
