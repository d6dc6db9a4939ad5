//! Model-definition (MML) statement AST types.

use super::statement::ModelRange;

/// One clause of a population schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopulationClause {
    /// `MODEL cols AS stattype` / `SET STATTYPES OF cols TO stattype`.
    Model {
        /// The modeled base-table columns.
        columns: Vec<String>,
        /// The assigned statistical type.
        stattype: String,
    },
    /// `IGNORE cols` — columns deliberately left unmodeled.
    Ignore {
        /// The ignored base-table columns.
        columns: Vec<String>,
    },
}

/// `CREATE POPULATION [IF NOT EXISTS] p FOR t WITH SCHEMA (…)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePopulation {
    /// Suppress the error if the population already exists.
    pub if_not_exists: bool,
    /// Population name.
    pub name: String,
    /// Base table name.
    pub table: String,
    /// Schema clauses.
    pub clauses: Vec<PopulationClause>,
}

/// One command of an `ALTER POPULATION`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlterPopulationCmd {
    /// `ADD VARIABLE c stattype`.
    AddVariable {
        /// New variable name (must be a base-table column).
        name: String,
        /// Its statistical type.
        stattype: String,
    },
    /// `SET STATTYPE[S] OF cols TO stattype`.
    SetStattypes {
        /// The variables to retype.
        columns: Vec<String>,
        /// The new statistical type.
        stattype: String,
    },
    /// `RENAME TO p2`.
    RenameTo(String),
}

/// `ALTER POPULATION p <commands>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlterPopulation {
    /// Population name.
    pub population: String,
    /// The commands, applied in order.
    pub commands: Vec<AlterPopulationCmd>,
}

/// `CREATE GENERATOR [IF NOT EXISTS] g FOR p USING backend(…)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateGenerator {
    /// Suppress the error if the generator already exists.
    pub if_not_exists: bool,
    /// Generator name.
    pub name: String,
    /// Population name.
    pub population: String,
    /// Backend name.
    pub backend: String,
    /// Opaque schema blob (raw text between the backend's parentheses).
    pub schema: String,
}

/// One command of an `ALTER GENERATOR`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlterGeneratorCmd {
    /// `RENAME TO g2`.
    RenameTo(String),
}

/// `ALTER GENERATOR g <commands>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlterGenerator {
    /// Generator name.
    pub generator: String,
    /// The commands, applied in order.
    pub commands: Vec<AlterGeneratorCmd>,
}

/// `INITIALIZE n MODELS [IF NOT EXISTS] FOR g`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Initialize {
    /// How many models to create.
    pub n_models: u32,
    /// Keep existing models instead of failing.
    pub if_not_exists: bool,
    /// Generator name.
    pub generator: String,
}

/// The unit of an analysis budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    /// Inference iterations.
    Iterations,
    /// Wall-clock seconds.
    Seconds,
    /// Wall-clock minutes.
    Minutes,
}

/// An amount of analysis work, e.g. `FOR 10 ITERATIONS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisBudget {
    /// The amount in `unit`s.
    pub amount: u64,
    /// The unit.
    pub unit: TimeUnit,
}

/// `ANALYZE g [MODELS ranges] FOR budget [CHECKPOINT budget] [(program)]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Analyze {
    /// Generator name.
    pub generator: String,
    /// Model subset; `None` means all models.
    pub models: Option<Vec<ModelRange>>,
    /// The overall budget.
    pub budget: AnalysisBudget,
    /// Commit-and-continue granularity.
    pub checkpoint: Option<AnalysisBudget>,
    /// Backend-specific program (raw text between parentheses).
    pub program: Option<String>,
}

/// `DROP MODELS [ranges] FROM g`.
#[derive(Debug, Clone, PartialEq)]
pub struct DropModels {
    /// Generator name.
    pub generator: String,
    /// Model subset; `None` drops all models.
    pub models: Option<Vec<ModelRange>>,
}
