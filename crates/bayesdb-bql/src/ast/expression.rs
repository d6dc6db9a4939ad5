//! Expression AST types.

use crate::lexer::Span;

/// A literal value.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// Integer literal.
    Integer(i64),
    /// Float literal.
    Float(f64),
    /// String literal.
    String(String),
    /// Blob literal.
    Blob(Vec<u8>),
    /// Boolean literal.
    Boolean(bool),
    /// NULL literal.
    Null,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    // Comparison
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,

    // Logical
    And,
    Or,

    // String
    Concat,
    Like,
    NotLike,

    // Bitwise
    BitAnd,
    BitOr,
    LeftShift,
    RightShift,
}

impl BinaryOp {
    /// Returns the SQL representation of the operator.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Concat => "||",
            Self::Like => "LIKE",
            Self::NotLike => "NOT LIKE",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::LeftShift => "<<",
            Self::RightShift => ">>",
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Negation (-)
    Neg,
    /// Logical NOT
    Not,
    /// Bitwise NOT (~)
    BitNot,
}

impl UnaryOp {
    /// Returns the SQL representation of the operator.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Neg => "-",
            Self::Not => "NOT",
            Self::BitNot => "~",
        }
    }
}

/// A function call expression.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    /// The function name.
    pub name: String,
    /// The arguments.
    pub args: Vec<Expr>,
    /// Whether DISTINCT was specified.
    pub distinct: bool,
}

/// A `variable = expression` term from a `GIVEN` (or density target) list.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    /// The constrained variable.
    pub column: String,
    /// The constraining value expression.
    pub value: Expr,
}

/// The column arguments of a two-column estimator.
///
/// `DEPENDENCE PROBABILITY` (bare) takes both columns from a pairwise
/// context; `… WITH c` takes one from a single-column context; `… OF c0
/// WITH c1` is fully bound and legal in any population context.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ColumnPair {
    /// The `OF` column, if bound.
    pub of: Option<String>,
    /// The `WITH` column, if bound.
    pub with: Option<String>,
}

/// A probabilistic (model-backed) expression form.
///
/// These are recognized at the unary-expression level of the grammar;
/// which forms are legal where is decided by the compiler, not the
/// parser.
#[derive(Debug, Clone, PartialEq)]
pub enum BqlFn {
    /// `PREDICTIVE PROBABILITY OF c [GIVEN (…)]`
    PredictiveProbability {
        /// Target variable.
        column: String,
        /// Conditioning constraints.
        givens: Vec<Constraint>,
    },

    /// `PROBABILITY DENSITY OF c = v[, …] [GIVEN (…)]`
    ProbabilityDensity {
        /// Joint density targets.
        targets: Vec<Constraint>,
        /// Conditioning constraints.
        givens: Vec<Constraint>,
    },

    /// `PROBABILITY DENSITY OF VALUE v [GIVEN (…)]`
    ProbabilityOfValue {
        /// The value whose density is requested in the one-variable
        /// context.
        value: Box<Expr>,
        /// Conditioning constraints.
        givens: Vec<Constraint>,
    },

    /// `SIMILARITY [TO (expr)] [IN THE CONTEXT OF c]`
    Similarity {
        /// Condition selecting the row to compare against; absent in a
        /// pairwise row context.
        to: Option<Box<Expr>>,
        /// The variable in whose context similarity is measured.
        context: Option<String>,
    },

    /// `DEPENDENCE PROBABILITY [[OF c0] WITH c1]`
    DependenceProbability {
        /// Column bindings.
        pair: ColumnPair,
    },

    /// `MUTUAL INFORMATION [[OF c0] WITH c1] [GIVEN (…)] [USING n SAMPLES]`
    MutualInformation {
        /// Column bindings.
        pair: ColumnPair,
        /// Conditioning constraints.
        givens: Vec<Constraint>,
        /// Monte Carlo sample count.
        samples: Option<Box<Expr>>,
    },

    /// `CORRELATION [PVALUE] [[OF c0] WITH c1]`
    Correlation {
        /// Column bindings.
        pair: ColumnPair,
        /// True for `CORRELATION PVALUE`.
        pvalue: bool,
    },
}

/// A BQL expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A literal value.
    Literal(Literal),

    /// A column reference (optionally qualified with table name).
    Column {
        /// Table name or alias (optional).
        table: Option<String>,
        /// Column name.
        name: String,
        /// Source span.
        span: Span,
    },

    /// A binary expression.
    Binary {
        /// Left operand.
        left: Box<Expr>,
        /// Operator.
        op: BinaryOp,
        /// Right operand.
        right: Box<Expr>,
    },

    /// A unary expression.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: Box<Expr>,
    },

    /// A function call.
    Function(FunctionCall),

    /// A subquery.
    Subquery(Box<super::SelectStatement>),

    /// EXISTS (subquery). `NOT EXISTS` parses as unary NOT around this.
    Exists {
        /// The subquery.
        query: Box<super::SelectStatement>,
    },

    /// IS NULL expression.
    IsNull {
        /// The expression to check.
        expr: Box<Expr>,
        /// Whether this is IS NOT NULL.
        negated: bool,
    },

    /// IN expression.
    In {
        /// The expression to check.
        expr: Box<Expr>,
        /// The list of values.
        list: Vec<Expr>,
        /// Whether this is NOT IN.
        negated: bool,
    },

    /// BETWEEN expression.
    Between {
        /// The expression to check.
        expr: Box<Expr>,
        /// Lower bound.
        low: Box<Expr>,
        /// Upper bound.
        high: Box<Expr>,
        /// Whether this is NOT BETWEEN.
        negated: bool,
    },

    /// CASE expression.
    Case {
        /// The operand (if any).
        operand: Option<Box<Expr>>,
        /// WHEN/THEN clauses.
        when_clauses: Vec<(Expr, Expr)>,
        /// ELSE clause.
        else_clause: Option<Box<Expr>>,
    },

    /// CAST expression.
    Cast {
        /// Expression to cast.
        expr: Box<Expr>,
        /// Target type.
        data_type: super::DataType,
    },

    /// COLLATE expression.
    Collate {
        /// The collated expression.
        expr: Box<Expr>,
        /// Collation name.
        collation: String,
    },

    /// Parenthesized expression.
    Paren(Box<Expr>),

    /// A parameter placeholder (`?`, `?N`, `:name`, `@name`, `$name`).
    Parameter {
        /// The parameter name including sigil, for named parameters.
        name: Option<String>,
        /// 1-based slot index.
        position: usize,
    },

    /// Wildcard (*) in SELECT.
    Wildcard {
        /// Table qualifier (optional).
        table: Option<String>,
    },

    /// A probabilistic operator form.
    Bql(Box<BqlFn>),
}

impl Expr {
    /// Creates a new column reference.
    #[must_use]
    pub fn column(name: impl Into<String>) -> Self {
        Self::Column {
            table: None,
            name: name.into(),
            span: Span::default(),
        }
    }

    /// Creates a new qualified column reference.
    #[must_use]
    pub fn qualified_column(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Column {
            table: Some(table.into()),
            name: name.into(),
            span: Span::default(),
        }
    }

    /// Creates a new integer literal.
    #[must_use]
    pub const fn integer(value: i64) -> Self {
        Self::Literal(Literal::Integer(value))
    }

    /// Creates a new float literal.
    #[must_use]
    pub const fn float(value: f64) -> Self {
        Self::Literal(Literal::Float(value))
    }

    /// Creates a new string literal.
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self::Literal(Literal::String(value.into()))
    }

    /// Creates a NULL literal.
    #[must_use]
    pub const fn null() -> Self {
        Self::Literal(Literal::Null)
    }

    /// Creates a binary expression.
    #[must_use]
    pub fn binary(self, op: BinaryOp, right: Self) -> Self {
        Self::Binary {
            left: Box::new(self),
            op,
            right: Box::new(right),
        }
    }

    /// Creates an equality expression.
    #[must_use]
    pub fn eq(self, right: Self) -> Self {
        self.binary(BinaryOp::Eq, right)
    }

    /// Creates an AND expression.
    #[must_use]
    pub fn and(self, right: Self) -> Self {
        self.binary(BinaryOp::And, right)
    }

    /// Returns true if the expression or any subexpression is a
    /// probabilistic operator form.
    #[must_use]
    pub fn contains_bql(&self) -> bool {
        match self {
            Self::Bql(_) => true,
            Self::Literal(_) | Self::Column { .. } | Self::Parameter { .. } | Self::Wildcard { .. } => {
                false
            }
            Self::Binary { left, right, .. } => left.contains_bql() || right.contains_bql(),
            Self::Unary { operand, .. } => operand.contains_bql(),
            Self::Function(f) => f.args.iter().any(Self::contains_bql),
            Self::Subquery(_) | Self::Exists { .. } => false,
            Self::IsNull { expr, .. } => expr.contains_bql(),
            Self::In { expr, list, .. } => {
                expr.contains_bql() || list.iter().any(Self::contains_bql)
            }
            Self::Between {
                expr, low, high, ..
            } => expr.contains_bql() || low.contains_bql() || high.contains_bql(),
            Self::Case {
                operand,
                when_clauses,
                else_clause,
            } => {
                operand.as_deref().is_some_and(Self::contains_bql)
                    || when_clauses
                        .iter()
                        .any(|(w, t)| w.contains_bql() || t.contains_bql())
                    || else_clause.as_deref().is_some_and(Self::contains_bql)
            }
            Self::Cast { expr, .. } | Self::Collate { expr, .. } | Self::Paren(expr) => {
                expr.contains_bql()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expr_builders() {
        let col = Expr::column("age");
        assert!(matches!(col, Expr::Column { name, .. } if name == "age"));

        let lit = Expr::integer(42);
        assert!(matches!(lit, Expr::Literal(Literal::Integer(42))));
    }

    #[test]
    fn test_contains_bql() {
        let plain = Expr::column("a").eq(Expr::integer(1));
        assert!(!plain.contains_bql());

        let bql = Expr::Bql(Box::new(BqlFn::DependenceProbability {
            pair: ColumnPair::default(),
        }));
        assert!(bql.contains_bql());
        assert!(Expr::Paren(Box::new(bql)).contains_bql());
    }
}
