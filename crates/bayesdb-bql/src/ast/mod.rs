//! Abstract Syntax Tree (AST) types for BQL phrases.

mod expression;
mod mml;
mod statement;
mod types;

pub use expression::{
    BinaryOp, BqlFn, ColumnPair, Constraint, Expr, FunctionCall, Literal, UnaryOp,
};
pub use mml::{
    AlterGenerator, AlterGeneratorCmd, AlterPopulation, AlterPopulationCmd, AnalysisBudget,
    Analyze, CreateGenerator, CreatePopulation, DropModels, Initialize, PopulationClause, TimeUnit,
};
pub use statement::{
    EstimateFrom, EstimateStatement, InferStatement, InferTarget, JoinClause, JoinType, ModelRange,
    ModelSpec, OrderBy, OrderDirection, Query, SelectColumn, SelectStatement, SimulateStatement,
    TableRef,
};
pub use types::DataType;

/// One command of an `ALTER TABLE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlterTableCmd {
    /// `RENAME TO t2`.
    RenameTo(String),
}

/// A complete BQL phrase.
#[derive(Debug, Clone, PartialEq)]
pub enum Phrase {
    /// The empty phrase (a bare `;`).
    Empty,

    /// `BEGIN [TRANSACTION]`.
    Begin,
    /// `COMMIT`.
    Commit,
    /// `ROLLBACK`.
    Rollback,

    /// A query.
    Query(Query),

    /// `CREATE [TEMP] TABLE [IF NOT EXISTS] t AS query`.
    CreateTableAs {
        /// Temporary table.
        temp: bool,
        /// Suppress the error if the table exists.
        if_not_exists: bool,
        /// Table name.
        name: String,
        /// The defining query.
        query: Box<Query>,
    },
    /// `CREATE [TEMP] TABLE [IF NOT EXISTS] t (column defs)`.
    ///
    /// The column definitions are passed through to the store verbatim.
    CreateTable {
        /// Temporary table.
        temp: bool,
        /// Suppress the error if the table exists.
        if_not_exists: bool,
        /// Table name.
        name: String,
        /// Raw column definitions (text between parentheses).
        defs: String,
    },
    /// `DROP TABLE [IF EXISTS] t`.
    DropTable {
        /// Suppress the error if the table is missing.
        if_exists: bool,
        /// Table name.
        name: String,
    },
    /// `ALTER TABLE t <commands>`.
    AlterTable {
        /// Table name.
        table: String,
        /// The commands, applied in order.
        commands: Vec<AlterTableCmd>,
    },

    /// `CREATE POPULATION …`.
    CreatePopulation(CreatePopulation),
    /// `ALTER POPULATION …`.
    AlterPopulation(AlterPopulation),
    /// `DROP POPULATION [IF EXISTS] p`.
    DropPopulation {
        /// Suppress the error if the population is missing.
        if_exists: bool,
        /// Population name.
        name: String,
    },
    /// `CREATE GENERATOR …`.
    CreateGenerator(CreateGenerator),
    /// `ALTER GENERATOR …`.
    AlterGenerator(AlterGenerator),
    /// `DROP GENERATOR [IF EXISTS] g`.
    DropGenerator {
        /// Suppress the error if the generator is missing.
        if_exists: bool,
        /// Generator name.
        name: String,
    },
    /// `INITIALIZE …`.
    Initialize(Initialize),
    /// `ANALYZE …`.
    Analyze(Analyze),
    /// `DROP MODELS …`.
    DropModels(DropModels),
}

impl Phrase {
    /// Returns true for phrases that read but never mutate.
    #[must_use]
    pub const fn is_query(&self) -> bool {
        matches!(self, Self::Query(_))
    }
}
