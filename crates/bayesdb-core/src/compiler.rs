//! The BQL-to-SQL compiler.
//!
//! Queries lower to SQL over the base table (row contexts) or over
//! `bayesdb_variable` (column contexts); probabilistic operator forms
//! become calls to the registered model operators with compiler-injected
//! context arguments. Pure SQL SELECTs pass through untouched. Work that
//! cannot run inside the store — simulation, the data correlations —
//! is returned as preludes the executor performs before the statement.

use std::fmt::Write as _;

use bayesdb_bql::ast::{
    BinaryOp, BqlFn, ColumnPair, Constraint, EstimateFrom, EstimateStatement, Expr,
    InferStatement, InferTarget, Literal, ModelRange, Query, SelectColumn, SelectStatement,
    SimulateStatement, TableRef, UnaryOp,
};
use bayesdb_bql::unparse;
use tracing::debug;

use crate::backend::Backend;
use crate::bdb::Bdb;
use crate::catalog::{stattype_nominal, Generator, Population, Variable};
use crate::error::{BqlError, Result};
use crate::operators::{DEFAULT_PREDICT_SAMPLES, KIND_CYCLIC, KIND_NOMINAL, KIND_NUMERICAL};

/// Default Monte Carlo sample count for MUTUAL INFORMATION.
const DEFAULT_MI_SAMPLES: i64 = 100;

/// One correlation the executor must compute before the query runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CorrPair {
    pub c0: i64,
    pub c1: i64,
    pub name0: String,
    pub name1: String,
    pub stattype0: String,
    pub stattype1: String,
}

/// A SIMULATE materialization plan.
#[derive(Debug, Clone)]
pub(crate) struct SimulatePlan {
    pub temp_table: String,
    pub generator_id: i64,
    pub model_ids: Vec<i64>,
    /// Output column names, parallel to `varnos`.
    pub columns: Vec<String>,
    pub varnos: Vec<i64>,
    /// `(varno, SQL expression)` pairs evaluated with the phrase's
    /// parameters.
    pub givens: Vec<(i64, String)>,
    /// SQL expression for the row count.
    pub limit_sql: String,
}

/// Work the executor performs before running the compiled SQL.
#[derive(Debug, Clone)]
pub(crate) enum Prelude {
    Correlations {
        population_id: i64,
        table: String,
        pairs: Vec<CorrPair>,
    },
    Simulate(SimulatePlan),
}

/// A lowered query.
#[derive(Debug, Clone, Default)]
pub(crate) struct CompiledQuery {
    pub sql: String,
    pub preludes: Vec<Prelude>,
    /// Temp tables to drop once the statement's rows are drained.
    pub temp_tables: Vec<String>,
}

/// The implied context fixed by a query header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ctx {
    /// One implied row of the base table.
    Row,
    /// Two implied rows, aliased `t0` and `t1`.
    PairRow,
    /// One implied variable, aliased `v`.
    Var,
    /// Two implied variables, aliased `v0` and `v1`.
    PairVar,
    /// No implied row or variable (SIMULATE givens, limits).
    Constant,
}

impl Ctx {
    const fn describe(self) -> &'static str {
        match self {
            Self::Row => "a one-row",
            Self::PairRow => "a two-row",
            Self::Var => "a one-variable",
            Self::PairVar => "a two-variable",
            Self::Constant => "a constant",
        }
    }
}

struct QueryPlan<'a> {
    bdb: &'a Bdb,
    population: Population,
    generator: Generator,
    backend: std::sync::Arc<dyn Backend>,
    variables: Vec<Variable>,
    modelset: i64,
    ctx: Ctx,
    subcols: Option<Vec<Variable>>,
    corr_pairs: Vec<CorrPair>,
    preludes: Vec<Prelude>,
    temp_tables: Vec<String>,
}

/// Always-quoted identifier for emitted SQL.
fn q(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Compiles one query to SQL plus executor preludes.
pub(crate) fn compile_query(bdb: &Bdb, query: &Query) -> Result<CompiledQuery> {
    let compiled = match query {
        Query::Select(stmt) => {
            assert_sql_only_select(stmt)?;
            CompiledQuery {
                sql: unparse::unparse_query(&Query::Select(stmt.clone())),
                ..CompiledQuery::default()
            }
        }
        Query::Estimate(stmt) => compile_estimate(bdb, stmt)?,
        Query::Infer(stmt) => compile_infer(bdb, stmt)?,
        Query::Simulate(stmt) => compile_simulate(bdb, stmt)?,
    };
    debug!(sql = %compiled.sql, "Compiled query");
    Ok(compiled)
}

// ---- pure-SQL guard ----

fn wrong_context(operator: &'static str, ctx: &'static str) -> BqlError {
    BqlError::WrongContext {
        operator,
        context: ctx,
    }
}

fn assert_sql_only_select(stmt: &SelectStatement) -> Result<()> {
    for column in &stmt.columns {
        assert_sql_only_expr(&column.expr)?;
    }
    if let Some(from) = &stmt.from {
        assert_sql_only_table_ref(from)?;
    }
    for e in stmt
        .where_clause
        .iter()
        .chain(&stmt.group_by)
        .chain(stmt.having.iter())
        .chain(stmt.order_by.iter().map(|o| &o.expr))
        .chain(stmt.limit.iter())
        .chain(stmt.offset.iter())
    {
        assert_sql_only_expr(e)?;
    }
    Ok(())
}

fn assert_sql_only_table_ref(table_ref: &TableRef) -> Result<()> {
    match table_ref {
        TableRef::Table { .. } => Ok(()),
        TableRef::Subquery { query, .. } => assert_sql_only_select(query),
        TableRef::Join { left, join } => {
            assert_sql_only_table_ref(left)?;
            assert_sql_only_table_ref(&join.table)?;
            if let Some(on) = &join.on {
                assert_sql_only_expr(on)?;
            }
            Ok(())
        }
    }
}

fn assert_sql_only_expr(expr: &Expr) -> Result<()> {
    match expr {
        Expr::Bql(_) => Err(wrong_context("A model estimator", "plain SQL")),
        Expr::Literal(_)
        | Expr::Column { .. }
        | Expr::Parameter { .. }
        | Expr::Wildcard { .. } => Ok(()),
        Expr::Binary { left, right, .. } => {
            assert_sql_only_expr(left)?;
            assert_sql_only_expr(right)
        }
        Expr::Unary { operand, .. } => assert_sql_only_expr(operand),
        Expr::Function(f) => f.args.iter().try_for_each(assert_sql_only_expr),
        Expr::Subquery(s) => assert_sql_only_select(s),
        Expr::Exists { query } => assert_sql_only_select(query),
        Expr::IsNull { expr, .. } => assert_sql_only_expr(expr),
        Expr::In { expr, list, .. } => {
            assert_sql_only_expr(expr)?;
            list.iter().try_for_each(assert_sql_only_expr)
        }
        Expr::Between {
            expr, low, high, ..
        } => {
            assert_sql_only_expr(expr)?;
            assert_sql_only_expr(low)?;
            assert_sql_only_expr(high)
        }
        Expr::Case {
            operand,
            when_clauses,
            else_clause,
        } => {
            if let Some(e) = operand {
                assert_sql_only_expr(e)?;
            }
            for (w, t) in when_clauses {
                assert_sql_only_expr(w)?;
                assert_sql_only_expr(t)?;
            }
            if let Some(e) = else_clause {
                assert_sql_only_expr(e)?;
            }
            Ok(())
        }
        Expr::Cast { expr, .. } | Expr::Collate { expr, .. } | Expr::Paren(expr) => {
            assert_sql_only_expr(expr)
        }
    }
}

// ---- plan construction ----

fn make_plan<'a>(
    bdb: &'a Bdb,
    population_name: &str,
    modeled_by: Option<&str>,
    ranges: Option<&[ModelRange]>,
    ctx: Ctx,
) -> Result<QueryPlan<'a>> {
    let population = bdb.population_by_name(population_name)?;
    let generator = bdb.resolve_generator(&population, modeled_by)?;
    let backend = bdb.bind_generator(&generator)?;
    let model_ids = resolve_model_set(bdb, &generator, ranges)?;
    let modelset = bdb.intern_model_set(model_ids);
    let variables = bdb.population_variables(population.id, Some(generator.id))?;
    Ok(QueryPlan {
        bdb,
        population,
        generator,
        backend,
        variables,
        modelset,
        ctx,
        subcols: None,
        corr_pairs: Vec::new(),
        preludes: Vec::new(),
        temp_tables: Vec::new(),
    })
}

pub(crate) fn resolve_model_set(
    bdb: &Bdb,
    generator: &Generator,
    ranges: Option<&[ModelRange]>,
) -> Result<Vec<i64>> {
    let existing = bdb.model_numbers(generator.id)?;
    let Some(ranges) = ranges else {
        if existing.is_empty() {
            return Err(BqlError::Schema(format!(
                "Generator {} has no models; INITIALIZE some first",
                generator.name
            )));
        }
        return Ok(existing);
    };
    let mut models = Vec::new();
    for range in ranges {
        let hi = range.hi.unwrap_or(range.lo);
        for m in range.lo..=hi {
            let m = i64::from(m);
            if !existing.contains(&m) {
                return Err(BqlError::InvalidModel {
                    generator: generator.name.clone(),
                    modelno: m,
                });
            }
            if !models.contains(&m) {
                models.push(m);
            }
        }
    }
    if models.is_empty() {
        return Err(BqlError::Schema(String::from("Empty model set")));
    }
    Ok(models)
}

impl QueryPlan<'_> {
    fn table(&self) -> &str {
        &self.population.table
    }

    fn resolve_variable(&self, name: &str) -> Result<Variable> {
        self.bdb
            .variable_by_name(&self.population, Some(self.generator.id), name)
    }

    fn observed_variables(&self) -> Vec<&Variable> {
        self.variables.iter().filter(|v| !v.is_latent()).collect()
    }

    fn kind_of(&self, variable: &Variable) -> i64 {
        if stattype_nominal(&variable.stattype) {
            KIND_NOMINAL
        } else if variable.stattype == "cyclic" {
            KIND_CYCLIC
        } else {
            KIND_NUMERICAL
        }
    }

    /// The `rowid` argument injected for row-context operators.
    fn rowid_arg(&self) -> String {
        format!("{}._rowid_", q(self.table()))
    }

    /// Translates a nominal literal through the backend's value map.
    fn translate_value(&self, variable: &Variable, value: &Expr) -> Result<Option<String>> {
        let Expr::Literal(Literal::String(label)) = value else {
            return Ok(None);
        };
        if !stattype_nominal(&variable.stattype) {
            return Ok(None);
        }
        let map = self
            .backend
            .column_value_map(self.generator.id, variable.colno)
            .map_err(|e| BqlError::Backend {
                backend: e.backend,
                message: e.message,
            })?;
        Ok(map.and_then(|m| m.get(label).map(|code| code.to_string())))
    }
}

// ---- expression compilation ----

fn compile_expr(plan: &mut QueryPlan<'_>, expr: &Expr, out: &mut String) -> Result<()> {
    compile_expr_prec(plan, expr, 0, out)
}

fn expr_prec(expr: &Expr) -> u8 {
    match expr {
        Expr::Binary { op, .. } => match op {
            BinaryOp::Or => 1,
            BinaryOp::And => 3,
            BinaryOp::Eq
            | BinaryOp::NotEq
            | BinaryOp::Lt
            | BinaryOp::LtEq
            | BinaryOp::Gt
            | BinaryOp::GtEq
            | BinaryOp::Like
            | BinaryOp::NotLike => 5,
            BinaryOp::BitOr => 7,
            BinaryOp::BitAnd => 9,
            BinaryOp::LeftShift | BinaryOp::RightShift => 11,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Concat => 13,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 15,
        },
        Expr::Unary { op, .. } => match op {
            UnaryOp::Not => 4,
            UnaryOp::Neg | UnaryOp::BitNot => 19,
        },
        Expr::IsNull { .. } | Expr::In { .. } | Expr::Between { .. } => 5,
        Expr::Collate { .. } => 17,
        _ => 21,
    }
}

fn compile_expr_prec(
    plan: &mut QueryPlan<'_>,
    expr: &Expr,
    min_prec: u8,
    out: &mut String,
) -> Result<()> {
    if expr_prec(expr) < min_prec {
        out.push('(');
        compile_expr_text(plan, expr, out)?;
        out.push(')');
        Ok(())
    } else {
        compile_expr_text(plan, expr, out)
    }
}

fn compile_expr_text(plan: &mut QueryPlan<'_>, expr: &Expr, out: &mut String) -> Result<()> {
    match expr {
        Expr::Literal(lit) => out.push_str(&unparse::literal_to_string(lit)),
        Expr::Column { table, name, .. } => compile_column(plan, table.as_deref(), name, out)?,
        Expr::Binary { left, op, right } => {
            let prec = expr_prec(expr);
            compile_expr_prec(plan, left, prec, out)?;
            out.push(' ');
            out.push_str(op.as_str());
            out.push(' ');
            compile_expr_prec(plan, right, prec + 1, out)?;
        }
        Expr::Unary { op, operand } => {
            let prec = expr_prec(expr);
            match op {
                UnaryOp::Not => out.push_str("NOT "),
                other => out.push_str(other.as_str()),
            }
            compile_expr_prec(plan, operand, prec, out)?;
        }
        Expr::Function(f) => {
            out.push_str(&unparse::quote_name(&f.name));
            out.push('(');
            if f.distinct {
                out.push_str("DISTINCT ");
            }
            for (i, arg) in f.args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                compile_expr(plan, arg, out)?;
            }
            out.push(')');
        }
        Expr::Subquery(s) => {
            assert_sql_only_select(s)?;
            out.push('(');
            out.push_str(&unparse::unparse_query(&Query::Select((**s).clone())));
            out.push(')');
        }
        Expr::Exists { query } => {
            assert_sql_only_select(query)?;
            out.push_str("EXISTS (");
            out.push_str(&unparse::unparse_query(&Query::Select((**query).clone())));
            out.push(')');
        }
        Expr::IsNull { expr, negated } => {
            compile_expr_prec(plan, expr, 6, out)?;
            out.push_str(if *negated { " IS NOT NULL" } else { " IS NULL" });
        }
        Expr::In {
            expr,
            list,
            negated,
        } => {
            compile_expr_prec(plan, expr, 6, out)?;
            out.push_str(if *negated { " NOT IN (" } else { " IN (" });
            for (i, item) in list.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                compile_expr(plan, item, out)?;
            }
            out.push(')');
        }
        Expr::Between {
            expr,
            low,
            high,
            negated,
        } => {
            compile_expr_prec(plan, expr, 6, out)?;
            out.push_str(if *negated { " NOT BETWEEN " } else { " BETWEEN " });
            compile_expr_prec(plan, low, 6, out)?;
            out.push_str(" AND ");
            compile_expr_prec(plan, high, 6, out)?;
        }
        Expr::Case {
            operand,
            when_clauses,
            else_clause,
        } => {
            out.push_str("CASE");
            if let Some(e) = operand {
                out.push(' ');
                compile_expr(plan, e, out)?;
            }
            for (when, then) in when_clauses {
                out.push_str(" WHEN ");
                compile_expr(plan, when, out)?;
                out.push_str(" THEN ");
                compile_expr(plan, then, out)?;
            }
            if let Some(e) = else_clause {
                out.push_str(" ELSE ");
                compile_expr(plan, e, out)?;
            }
            out.push_str(" END");
        }
        Expr::Cast { expr, data_type } => {
            out.push_str("CAST(");
            compile_expr(plan, expr, out)?;
            let _ = write!(out, " AS {data_type})");
        }
        Expr::Collate { expr, collation } => {
            compile_expr_prec(plan, expr, 17, out)?;
            let _ = write!(out, " COLLATE {}", unparse::quote_name(collation));
        }
        Expr::Paren(inner) => {
            out.push('(');
            compile_expr(plan, inner, out)?;
            out.push(')');
        }
        Expr::Parameter { position, .. } => {
            let _ = write!(out, "?{position}");
        }
        Expr::Wildcard { table } => match table {
            Some(t) => {
                let _ = write!(out, "{}.*", q(t));
            }
            None => out.push('*'),
        },
        Expr::Bql(bql) => compile_bql(plan, bql, out)?,
    }
    Ok(())
}

fn compile_column(
    plan: &mut QueryPlan<'_>,
    table: Option<&str>,
    name: &str,
    out: &mut String,
) -> Result<()> {
    match plan.ctx {
        Ctx::Row => {
            if let Some(t) = table {
                let _ = write!(out, "{}.", q(t));
            }
            out.push_str(&q(name));
        }
        Ctx::PairRow => {
            if let Some(t) = table {
                let _ = write!(out, "{}.{}", q(t), q(name));
            } else if name.eq_ignore_ascii_case("rowid0") {
                out.push_str("t0._rowid_");
            } else if name.eq_ignore_ascii_case("rowid1") {
                out.push_str("t1._rowid_");
            } else {
                out.push_str(&q(name));
            }
        }
        Ctx::Var => {
            if name.eq_ignore_ascii_case("name") {
                out.push_str("v.name");
            } else {
                return Err(BqlError::NoSuchColumn {
                    table: String::from("variables"),
                    name: String::from(name),
                });
            }
        }
        Ctx::PairVar => {
            if name.eq_ignore_ascii_case("name0") {
                out.push_str("v0.name");
            } else if name.eq_ignore_ascii_case("name1") {
                out.push_str("v1.name");
            } else {
                return Err(BqlError::NoSuchColumn {
                    table: String::from("variables"),
                    name: String::from(name),
                });
            }
        }
        Ctx::Constant => {
            return Err(BqlError::NoSuchColumn {
                table: plan.population.table.clone(),
                name: String::from(name),
            });
        }
    }
    Ok(())
}

// ---- estimator compilation ----

/// Emits a length-prefixed `(varno, value)` argument vector.
fn compile_pairs(
    plan: &mut QueryPlan<'_>,
    constraints: &[Constraint],
    out: &mut String,
) -> Result<()> {
    let _ = write!(out, ", {}", constraints.len());
    for constraint in constraints {
        let variable = plan.resolve_variable(&constraint.column)?;
        let _ = write!(out, ", {}, ", variable.colno);
        match plan.translate_value(&variable, &constraint.value)? {
            Some(code) => out.push_str(&code),
            None => compile_expr(plan, &constraint.value, out)?,
        }
    }
    Ok(())
}

fn literal_samples(samples: Option<&Expr>, default: i64) -> Result<i64> {
    match samples {
        None => Ok(default),
        Some(Expr::Literal(Literal::Integer(n))) if *n > 0 => Ok(*n),
        Some(_) => Err(BqlError::Schema(String::from(
            "Sample count must be a positive integer literal",
        ))),
    }
}

fn compile_bql(plan: &mut QueryPlan<'_>, bql: &BqlFn, out: &mut String) -> Result<()> {
    let gen = plan.generator.id;
    let ms = plan.modelset;
    match bql {
        BqlFn::PredictiveProbability { column, givens } => {
            if plan.ctx != Ctx::Row {
                return Err(wrong_context(
                    "PREDICTIVE PROBABILITY",
                    plan.ctx.describe(),
                ));
            }
            let variable = plan.resolve_variable(column)?;
            if variable.is_latent() {
                return Err(BqlError::Schema(format!(
                    "Latent variable {} has no stored values",
                    variable.name
                )));
            }
            let _ = write!(
                out,
                "bql_row_prob({gen}, {ms}, {}, {}, {}.{}",
                plan.rowid_arg(),
                variable.colno,
                q(plan.table()),
                q(&variable.name),
            );
            compile_pairs(plan, givens, out)?;
            out.push(')');
        }

        BqlFn::ProbabilityDensity { targets, givens } => {
            if matches!(plan.ctx, Ctx::Constant) {
                return Err(wrong_context("PROBABILITY DENSITY", plan.ctx.describe()));
            }
            let _ = write!(out, "bql_pdf_joint({gen}, {ms}");
            compile_pairs(plan, targets, out)?;
            compile_pairs(plan, givens, out)?;
            out.push(')');
        }

        BqlFn::ProbabilityOfValue { value, givens } => {
            if plan.ctx != Ctx::Var {
                return Err(wrong_context(
                    "PROBABILITY DENSITY OF VALUE",
                    plan.ctx.describe(),
                ));
            }
            let _ = write!(out, "bql_pdf_joint({gen}, {ms}, 1, v.colno, ");
            compile_expr(plan, value, out)?;
            compile_pairs(plan, givens, out)?;
            out.push(')');
        }

        BqlFn::Similarity { to, context } => {
            let context = context.as_ref().ok_or_else(|| {
                BqlError::Schema(String::from("SIMILARITY requires IN THE CONTEXT OF"))
            })?;
            let variable = plan.resolve_variable(context)?;
            match (to, plan.ctx) {
                (Some(cond), Ctx::Row) => {
                    let _ = write!(
                        out,
                        "bql_row_similarity({gen}, {ms}, {}, ",
                        plan.rowid_arg()
                    );
                    // First matching row, by rowid, decides the target.
                    let mut cond_sql = String::new();
                    compile_expr(plan, cond, &mut cond_sql)?;
                    let _ = write!(
                        out,
                        "(SELECT _rowid_ FROM {} WHERE {} ORDER BY _rowid_ LIMIT 1)",
                        q(plan.table()),
                        cond_sql
                    );
                    let _ = write!(out, ", {})", variable.colno);
                }
                (None, Ctx::PairRow) => {
                    let _ = write!(
                        out,
                        "bql_row_similarity({gen}, {ms}, t0._rowid_, t1._rowid_, {})",
                        variable.colno
                    );
                }
                (Some(_), _) => {
                    return Err(wrong_context("SIMILARITY TO", plan.ctx.describe()));
                }
                (None, _) => {
                    return Err(wrong_context("Pairwise SIMILARITY", plan.ctx.describe()));
                }
            }
        }

        BqlFn::DependenceProbability { pair } => {
            let (a0, a1) = column_pair_args(plan, pair, "DEPENDENCE PROBABILITY", None)?;
            let _ = write!(out, "bql_depprob({gen}, {ms}, {a0}, {a1})");
        }

        BqlFn::MutualInformation {
            pair,
            givens,
            samples,
        } => {
            if !givens.is_empty() && !plan.bdb.wizard_mode() {
                return Err(BqlError::Schema(String::from(
                    "Conditional MUTUAL INFORMATION is experimental; \
                     set BAYESDB_WIZARD_MODE to enable it",
                )));
            }
            let (a0, a1) = column_pair_args(plan, pair, "MUTUAL INFORMATION", None)?;
            let n = literal_samples(samples.as_deref(), DEFAULT_MI_SAMPLES)?;
            let _ = write!(out, "bql_mutinf({gen}, {ms}, {a0}, {a1}, {n}");
            compile_pairs(plan, givens, out)?;
            out.push(')');
        }

        BqlFn::Correlation { pair, pvalue } => {
            let op = if *pvalue {
                "bql_correlation_pvalue"
            } else {
                "bql_correlation"
            };
            let mut pairs = Vec::new();
            let (a0, a1) = column_pair_args(plan, pair, "CORRELATION", Some(&mut pairs))?;
            plan.corr_pairs.extend(pairs);
            let _ = write!(out, "{op}({}, {a0}, {a1})", plan.population.id);
        }
    }
    Ok(())
}

/// Resolves the column arguments of a two-column estimator against the
/// context, optionally enumerating the concrete pairs the expression can
/// reach (needed by the correlation prelude).
fn column_pair_args(
    plan: &mut QueryPlan<'_>,
    pair: &ColumnPair,
    operator: &'static str,
    mut enumerate: Option<&mut Vec<CorrPair>>,
) -> Result<(String, String)> {
    let enumerable: Vec<Variable> = match &plan.subcols {
        Some(subset) => subset.clone(),
        None => plan.observed_variables().into_iter().cloned().collect(),
    };

    match (&pair.of, &pair.with) {
        (Some(c0), Some(c1)) => {
            let v0 = plan.resolve_variable(c0)?;
            let v1 = plan.resolve_variable(c1)?;
            if let Some(pairs) = enumerate.as_deref_mut() {
                pairs.push(corr_pair(&v0, &v1));
            }
            Ok((v0.colno.to_string(), v1.colno.to_string()))
        }
        (None, Some(c1)) => {
            if plan.ctx != Ctx::Var {
                return Err(wrong_context(operator, plan.ctx.describe()));
            }
            let v1 = plan.resolve_variable(c1)?;
            if let Some(pairs) = enumerate.as_deref_mut() {
                for v0 in &enumerable {
                    pairs.push(corr_pair(v0, &v1));
                }
            }
            Ok((String::from("v.colno"), v1.colno.to_string()))
        }
        (None, None) => {
            if plan.ctx != Ctx::PairVar {
                return Err(wrong_context(operator, plan.ctx.describe()));
            }
            if let Some(pairs) = enumerate.as_deref_mut() {
                for v0 in &enumerable {
                    for v1 in &enumerable {
                        pairs.push(corr_pair(v0, v1));
                    }
                }
            }
            Ok((String::from("v0.colno"), String::from("v1.colno")))
        }
        (Some(_), None) => Err(BqlError::Schema(format!(
            "{operator} takes OF only together with WITH"
        ))),
    }
}

fn corr_pair(v0: &Variable, v1: &Variable) -> CorrPair {
    CorrPair {
        c0: v0.colno,
        c1: v1.colno,
        name0: v0.name.clone(),
        name1: v1.name.clone(),
        stattype0: v0.stattype.clone(),
        stattype1: v1.stattype.clone(),
    }
}

// ---- query emission ----

fn push_projection(
    plan: &mut QueryPlan<'_>,
    columns: &[SelectColumn],
    out: &mut String,
) -> Result<()> {
    for (i, column) in columns.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        match (&column.expr, plan.ctx) {
            (Expr::Wildcard { table: None }, Ctx::Var) => {
                out.push_str("v.name AS name");
            }
            (Expr::Wildcard { table: None }, Ctx::PairVar) => {
                out.push_str("v0.name AS name0, v1.name AS name1");
            }
            (Expr::Wildcard { table: None }, Ctx::PairRow) => {
                out.push_str("t0._rowid_ AS rowid0, t1._rowid_ AS rowid1");
            }
            _ => {
                compile_expr(plan, &column.expr, out)?;
                if let Some(alias) = &column.alias {
                    let _ = write!(out, " AS {}", q(alias));
                }
            }
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn push_tail(
    plan: &mut QueryPlan<'_>,
    base_where: Option<String>,
    where_clause: Option<&Expr>,
    group_by: &[Expr],
    having: Option<&Expr>,
    order_by: &[bayesdb_bql::ast::OrderBy],
    limit: Option<&Expr>,
    offset: Option<&Expr>,
    out: &mut String,
) -> Result<()> {
    match (base_where, where_clause) {
        (Some(base), Some(user)) => {
            let _ = write!(out, " WHERE {base} AND (");
            compile_expr(plan, user, out)?;
            out.push(')');
        }
        (Some(base), None) => {
            let _ = write!(out, " WHERE {base}");
        }
        (None, Some(user)) => {
            out.push_str(" WHERE ");
            compile_expr(plan, user, out)?;
        }
        (None, None) => {}
    }
    if !group_by.is_empty() {
        out.push_str(" GROUP BY ");
        for (i, e) in group_by.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            compile_expr(plan, e, out)?;
        }
    }
    if let Some(h) = having {
        out.push_str(" HAVING ");
        compile_expr(plan, h, out)?;
    }
    if !order_by.is_empty() {
        out.push_str(" ORDER BY ");
        for (i, o) in order_by.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            compile_expr(plan, &o.expr, out)?;
            if o.explicit_direction {
                out.push(' ');
                out.push_str(o.direction.as_str());
            }
        }
    }
    if let Some(l) = limit {
        out.push_str(" LIMIT ");
        compile_expr(plan, l, out)?;
    }
    if let Some(o) = offset {
        out.push_str(" OFFSET ");
        compile_expr(plan, o, out)?;
    }
    Ok(())
}

fn finish_plan(mut plan: QueryPlan<'_>, sql: String) -> CompiledQuery {
    if !plan.corr_pairs.is_empty() {
        plan.corr_pairs.dedup();
        plan.preludes.push(Prelude::Correlations {
            population_id: plan.population.id,
            table: plan.population.table.clone(),
            pairs: plan.corr_pairs,
        });
    }
    CompiledQuery {
        sql,
        preludes: plan.preludes,
        temp_tables: plan.temp_tables,
    }
}

fn compile_estimate(bdb: &Bdb, stmt: &EstimateStatement) -> Result<CompiledQuery> {
    let ctx = match &stmt.from {
        EstimateFrom::Rows => Ctx::Row,
        EstimateFrom::PairwiseRows => Ctx::PairRow,
        EstimateFrom::Variables => Ctx::Var,
        EstimateFrom::PairwiseVariables { .. } => Ctx::PairVar,
    };
    let mut plan = make_plan(
        bdb,
        &stmt.population,
        stmt.models.modeled_by.as_deref(),
        stmt.models.models.as_deref(),
        ctx,
    )?;

    if let EstimateFrom::PairwiseVariables { subcols } = &stmt.from {
        if !subcols.is_empty() {
            let subset = subcols
                .iter()
                .map(|name| plan.resolve_variable(name))
                .collect::<Result<Vec<_>>>()?;
            plan.subcols = Some(subset);
        }
    }

    let mut sql = String::from("SELECT ");
    if stmt.distinct {
        sql.push_str("DISTINCT ");
    }
    push_projection(&mut plan, &stmt.columns, &mut sql)?;

    let base_where = match plan.ctx {
        Ctx::Row => {
            let _ = write!(sql, " FROM {}", q(plan.table()));
            None
        }
        Ctx::PairRow => {
            let _ = write!(
                sql,
                " FROM {t} AS t0, {t} AS t1",
                t = q(plan.table())
            );
            None
        }
        Ctx::Var => {
            sql.push_str(" FROM bayesdb_variable AS v");
            Some(format!(
                "v.population_id = {} AND \
                 (v.generator_id IS NULL OR v.generator_id = {})",
                plan.population.id, plan.generator.id
            ))
        }
        Ctx::PairVar => {
            sql.push_str(" FROM bayesdb_variable AS v0, bayesdb_variable AS v1");
            let mut base = format!(
                "v0.population_id = {p} AND \
                 (v0.generator_id IS NULL OR v0.generator_id = {g}) AND \
                 v1.population_id = {p} AND \
                 (v1.generator_id IS NULL OR v1.generator_id = {g})",
                p = plan.population.id,
                g = plan.generator.id
            );
            if let Some(subset) = &plan.subcols {
                let colnos: Vec<String> =
                    subset.iter().map(|v| v.colno.to_string()).collect();
                let list = colnos.join(", ");
                let _ = write!(base, " AND v0.colno IN ({list}) AND v1.colno IN ({list})");
            }
            Some(base)
        }
        Ctx::Constant => unreachable!("estimate contexts are never constant"),
    };

    push_tail(
        &mut plan,
        base_where,
        stmt.where_clause.as_ref(),
        &stmt.group_by,
        stmt.having.as_ref(),
        &stmt.order_by,
        stmt.limit.as_ref(),
        stmt.offset.as_ref(),
        &mut sql,
    )?;

    Ok(finish_plan(plan, sql))
}

fn compile_infer(bdb: &Bdb, stmt: &InferStatement) -> Result<CompiledQuery> {
    let mut plan = make_plan(
        bdb,
        &stmt.population,
        stmt.models.modeled_by.as_deref(),
        stmt.models.models.as_deref(),
        Ctx::Row,
    )?;

    let mut sql = String::from("SELECT ");
    if stmt.explicit {
        compile_infer_explicit_targets(&mut plan, &stmt.targets, &mut sql)?;
    } else {
        compile_infer_implicit_targets(&mut plan, stmt, &mut sql)?;
    }

    let _ = write!(sql, " FROM {}", q(plan.table()));
    push_tail(
        &mut plan,
        None,
        stmt.where_clause.as_ref(),
        &stmt.group_by,
        None,
        &stmt.order_by,
        stmt.limit.as_ref(),
        stmt.offset.as_ref(),
        &mut sql,
    )?;

    Ok(finish_plan(plan, sql))
}

/// Emits `varno, "t"."col"` pairs for every observed variable except the
/// target, giving prediction its row conditions.
fn push_row_constraints(
    plan: &QueryPlan<'_>,
    except: i64,
    out: &mut String,
) {
    let others: Vec<&Variable> = plan
        .observed_variables()
        .into_iter()
        .filter(|v| v.colno != except)
        .collect();
    let _ = write!(out, ", {}", others.len());
    for v in others {
        let _ = write!(out, ", {}, {}.{}", v.colno, q(plan.table()), q(&v.name));
    }
}

fn compile_infer_implicit_targets(
    plan: &mut QueryPlan<'_>,
    stmt: &InferStatement,
    out: &mut String,
) -> Result<()> {
    let mut confidence_sql = String::new();
    match &stmt.confidence {
        Some(e) => compile_expr(plan, e, &mut confidence_sql)?,
        None => confidence_sql.push('0'),
    }

    let mut targets: Vec<(Variable, Option<String>)> = Vec::new();
    for target in &stmt.targets {
        match target {
            InferTarget::Star => {
                for v in plan.observed_variables() {
                    targets.push((v.clone(), None));
                }
            }
            InferTarget::Column { name, alias } => {
                let v = plan.resolve_variable(name)?;
                if v.is_latent() {
                    return Err(BqlError::Schema(format!(
                        "Latent variable {} cannot be inferred implicitly",
                        v.name
                    )));
                }
                targets.push((v, alias.clone()));
            }
            InferTarget::Expr { .. } | InferTarget::Predict { .. } => {
                return Err(BqlError::Schema(String::from(
                    "Expressions in INFER require INFER EXPLICIT",
                )));
            }
        }
    }

    let gen = plan.generator.id;
    let ms = plan.modelset;
    for (i, (variable, alias)) in targets.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(
            out,
            "bql_infer({gen}, {ms}, {}, {}, {}, {confidence_sql}, {}.{}, {}",
            plan.rowid_arg(),
            variable.colno,
            plan.kind_of(variable),
            q(plan.table()),
            q(&variable.name),
            DEFAULT_PREDICT_SAMPLES,
        );
        push_row_constraints(plan, variable.colno, out);
        let _ = write!(out, ") AS {}", q(alias.as_deref().unwrap_or(&variable.name)));
    }
    Ok(())
}

fn compile_infer_explicit_targets(
    plan: &mut QueryPlan<'_>,
    targets: &[InferTarget],
    out: &mut String,
) -> Result<()> {
    let mut first = true;
    for target in targets {
        if !first {
            out.push_str(", ");
        }
        first = false;
        match target {
            InferTarget::Star => {
                out.push('*');
            }
            InferTarget::Column { name, alias } => {
                out.push_str(&q(name));
                if let Some(a) = alias {
                    let _ = write!(out, " AS {}", q(a));
                }
            }
            InferTarget::Expr { expr, alias } => {
                compile_expr(plan, expr, out)?;
                if let Some(a) = alias {
                    let _ = write!(out, " AS {}", q(a));
                }
            }
            InferTarget::Predict {
                column,
                alias,
                confidence,
                samples,
            } => {
                let variable = plan.resolve_variable(column)?;
                let n = literal_samples(samples.as_ref(), DEFAULT_PREDICT_SAMPLES)?;
                let gen = plan.generator.id;
                let ms = plan.modelset;
                let mut args = String::new();
                let _ = write!(
                    args,
                    "{gen}, {ms}, {}, {}, {}, {n}",
                    plan.rowid_arg(),
                    variable.colno,
                    plan.kind_of(&variable),
                );
                push_row_constraints(plan, variable.colno, &mut args);
                let _ = write!(
                    out,
                    "bql_predict({args}) AS {}, bql_predict_confidence({args}) AS {}",
                    q(alias.as_deref().unwrap_or(&variable.name)),
                    q(confidence),
                );
            }
        }
    }
    Ok(())
}

fn compile_simulate(bdb: &Bdb, stmt: &SimulateStatement) -> Result<CompiledQuery> {
    let mut plan = make_plan(
        bdb,
        &stmt.population,
        stmt.models.modeled_by.as_deref(),
        stmt.models.models.as_deref(),
        Ctx::Constant,
    )?;

    let mut columns = Vec::new();
    let mut varnos = Vec::new();
    for name in &stmt.columns {
        let variable = plan.resolve_variable(name)?;
        columns.push(variable.name.clone());
        varnos.push(variable.colno);
    }

    let mut givens = Vec::new();
    for constraint in &stmt.givens {
        let variable = plan.resolve_variable(&constraint.column)?;
        let mut value_sql = String::new();
        match plan.translate_value(&variable, &constraint.value)? {
            Some(code) => value_sql.push_str(&code),
            None => compile_expr(&mut plan, &constraint.value, &mut value_sql)?,
        }
        givens.push((variable.colno, value_sql));
    }

    let mut limit_sql = String::new();
    compile_expr(&mut plan, &stmt.limit, &mut limit_sql)?;

    let temp_table = plan.bdb.next_temp_table("bql_sim");
    let projection: Vec<String> = columns.iter().map(|c| q(c)).collect();
    let sql = format!(
        "SELECT {} FROM temp.{}",
        projection.join(", "),
        q(&temp_table)
    );

    plan.preludes.push(Prelude::Simulate(SimulatePlan {
        temp_table: temp_table.clone(),
        generator_id: plan.generator.id,
        model_ids: plan.bdb.model_set(plan.modelset),
        columns,
        varnos,
        givens,
        limit_sql,
    }));
    plan.temp_tables.push(temp_table);

    Ok(finish_plan(plan, sql))
}
