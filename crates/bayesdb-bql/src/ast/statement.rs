//! Query statement AST types.

use core::fmt;

use super::expression::{Constraint, Expr};

/// Order direction for ORDER BY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderDirection {
    /// Ascending order (default).
    #[default]
    Asc,
    /// Descending order.
    Desc,
}

impl OrderDirection {
    /// Returns the SQL representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ORDER BY clause entry.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    /// The expression to order by.
    pub expr: Expr,
    /// The direction (ASC or DESC).
    pub direction: OrderDirection,
    /// Whether the direction keyword appeared in the source.
    pub explicit_direction: bool,
}

/// Join type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    /// INNER JOIN.
    Inner,
    /// LEFT OUTER JOIN.
    Left,
    /// RIGHT OUTER JOIN.
    Right,
    /// FULL OUTER JOIN.
    Full,
    /// CROSS JOIN.
    Cross,
}

impl JoinType {
    /// Returns the SQL representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Inner => "JOIN",
            Self::Left => "LEFT JOIN",
            Self::Right => "RIGHT JOIN",
            Self::Full => "FULL JOIN",
            Self::Cross => "CROSS JOIN",
        }
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A JOIN clause.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    /// The type of join.
    pub join_type: JoinType,
    /// The table to join.
    pub table: TableRef,
    /// The join condition (for non-CROSS joins).
    pub on: Option<Expr>,
    /// USING columns (alternative to ON).
    pub using: Vec<String>,
}

/// A table reference in a FROM clause.
#[derive(Debug, Clone, PartialEq)]
pub enum TableRef {
    /// A simple table name.
    Table {
        /// Table name.
        name: String,
        /// Alias.
        alias: Option<String>,
    },
    /// A subquery.
    Subquery {
        /// The subquery.
        query: Box<SelectStatement>,
        /// Alias (required for subqueries).
        alias: String,
    },
    /// A joined table.
    Join {
        /// Left side of the join.
        left: Box<TableRef>,
        /// The join clause.
        join: Box<JoinClause>,
    },
}

impl TableRef {
    /// Creates a simple table reference.
    #[must_use]
    pub fn table(name: impl Into<String>) -> Self {
        Self::Table {
            name: name.into(),
            alias: None,
        }
    }
}

/// A projected column with optional alias.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectColumn {
    /// The projected expression.
    pub expr: Expr,
    /// Optional alias.
    pub alias: Option<String>,
}

/// A SELECT statement.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    /// Whether DISTINCT was specified.
    pub distinct: bool,
    /// The projected columns.
    pub columns: Vec<SelectColumn>,
    /// The FROM clause (optional for pure expressions).
    pub from: Option<TableRef>,
    /// The WHERE clause.
    pub where_clause: Option<Expr>,
    /// GROUP BY expressions.
    pub group_by: Vec<Expr>,
    /// The HAVING clause.
    pub having: Option<Expr>,
    /// ORDER BY entries.
    pub order_by: Vec<OrderBy>,
    /// The LIMIT expression.
    pub limit: Option<Expr>,
    /// The OFFSET expression.
    pub offset: Option<Expr>,
}

/// The source clause of an ESTIMATE query, fixing its implied context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EstimateFrom {
    /// `FROM p` — one implied row.
    Rows,
    /// `FROM PAIRWISE p` — two implied rows.
    PairwiseRows,
    /// `FROM VARIABLES OF p` — one implied variable.
    Variables,
    /// `FROM PAIRWISE VARIABLES OF p [FOR (subcols)]` — two implied
    /// variables, optionally restricted to a subset.
    PairwiseVariables {
        /// The `FOR` subset, empty when absent.
        subcols: Vec<String>,
    },
}

/// A range of model indices, e.g. `0-3` or a single `5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelRange {
    /// First model index.
    pub lo: u32,
    /// Last model index (inclusive), if a range.
    pub hi: Option<u32>,
}

/// Generator and model-set selection shared by the model-backed queries.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModelSpec {
    /// `MODELED BY g`.
    pub modeled_by: Option<String>,
    /// `USING MODEL n` / `USING MODELS ranges`; `None` means all models.
    pub models: Option<Vec<ModelRange>>,
}

/// An ESTIMATE statement.
#[derive(Debug, Clone, PartialEq)]
pub struct EstimateStatement {
    /// Whether DISTINCT was specified.
    pub distinct: bool,
    /// The projected columns.
    pub columns: Vec<SelectColumn>,
    /// The context-fixing source form.
    pub from: EstimateFrom,
    /// The population name.
    pub population: String,
    /// Generator/model selection.
    pub models: ModelSpec,
    /// The WHERE clause.
    pub where_clause: Option<Expr>,
    /// GROUP BY expressions.
    pub group_by: Vec<Expr>,
    /// The HAVING clause.
    pub having: Option<Expr>,
    /// ORDER BY entries.
    pub order_by: Vec<OrderBy>,
    /// The LIMIT expression.
    pub limit: Option<Expr>,
    /// The OFFSET expression.
    pub offset: Option<Expr>,
}

/// A projection item of an INFER statement.
#[derive(Debug, Clone, PartialEq)]
pub enum InferTarget {
    /// `*` — every variable of the population (implicit mode).
    Star,
    /// A plain variable, filled in when missing (implicit mode).
    Column {
        /// Variable name.
        name: String,
        /// Optional alias.
        alias: Option<String>,
    },
    /// An arbitrary expression (explicit mode).
    Expr {
        /// The expression.
        expr: Expr,
        /// Optional alias.
        alias: Option<String>,
    },
    /// `PREDICT c AS n CONFIDENCE cn [USING k SAMPLES]` (explicit mode).
    Predict {
        /// Variable to predict.
        column: String,
        /// Output name for the predicted value.
        alias: Option<String>,
        /// Output name for the confidence.
        confidence: String,
        /// Predictive sample count.
        samples: Option<Expr>,
    },
}

/// An INFER statement.
#[derive(Debug, Clone, PartialEq)]
pub struct InferStatement {
    /// True for `INFER EXPLICIT`.
    pub explicit: bool,
    /// The projection items.
    pub targets: Vec<InferTarget>,
    /// `WITH CONFIDENCE expr` (implicit mode only).
    pub confidence: Option<Expr>,
    /// The population name.
    pub population: String,
    /// Generator/model selection.
    pub models: ModelSpec,
    /// The WHERE clause.
    pub where_clause: Option<Expr>,
    /// GROUP BY expressions.
    pub group_by: Vec<Expr>,
    /// ORDER BY entries.
    pub order_by: Vec<OrderBy>,
    /// The LIMIT expression.
    pub limit: Option<Expr>,
    /// The OFFSET expression.
    pub offset: Option<Expr>,
}

/// A SIMULATE statement.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulateStatement {
    /// The simulated variables.
    pub columns: Vec<String>,
    /// The population name.
    pub population: String,
    /// Generator/model selection.
    pub models: ModelSpec,
    /// `GIVEN` constraints.
    pub givens: Vec<Constraint>,
    /// The number of rows to draw.
    pub limit: Expr,
}

/// A query phrase.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Plain SQL SELECT.
    Select(SelectStatement),
    /// ESTIMATE.
    Estimate(EstimateStatement),
    /// INFER.
    Infer(InferStatement),
    /// SIMULATE.
    Simulate(SimulateStatement),
}
