//! AST pretty-printer.
//!
//! Renders a parsed phrase back to BQL text. Reparsing the output yields
//! an equivalent AST; for plain SQL written in canonical form (uppercase
//! keywords, unquoted names) the output matches the input up to
//! whitespace.

use crate::ast::{
    AlterGeneratorCmd, AlterPopulationCmd, AlterTableCmd, AnalysisBudget, BqlFn, ColumnPair,
    Constraint, EstimateFrom, Expr, InferTarget, Literal, ModelRange, ModelSpec, OrderBy, Phrase,
    Query, SelectColumn, SelectStatement, TableRef, TimeUnit, UnaryOp,
};
use crate::lexer::Keyword;

/// Quotes `name` if it cannot be written bare.
///
/// A name is bare when it looks like an identifier and does not collide
/// with any keyword; otherwise it is double-quoted with doubled-quote
/// escapes.
#[must_use]
pub fn quote_name(name: &str) -> String {
    let plain = !name.is_empty()
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && Keyword::from_str(name).is_none();
    if plain {
        String::from(name)
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// Renders a literal as BQL text.
#[must_use]
pub fn literal_to_string(lit: &Literal) -> String {
    match lit {
        Literal::Integer(n) => n.to_string(),
        Literal::Float(f) => {
            // Keep a decimal point so the literal reparses as a float.
            let s = f.to_string();
            if s.contains('.') || s.contains('e') || s.contains("inf") || s.contains("NaN") {
                s
            } else {
                format!("{s}.0")
            }
        }
        Literal::String(s) => format!("'{}'", s.replace('\'', "''")),
        Literal::Blob(bytes) => {
            let mut out = String::from("X'");
            for b in bytes {
                out.push_str(&format!("{b:02X}"));
            }
            out.push('\'');
            out
        }
        Literal::Boolean(true) => String::from("TRUE"),
        Literal::Boolean(false) => String::from("FALSE"),
        Literal::Null => String::from("NULL"),
    }
}

/// Renders a phrase as BQL text (without a trailing semicolon).
#[must_use]
pub fn unparse_phrase(phrase: &Phrase) -> String {
    match phrase {
        Phrase::Empty => String::new(),
        Phrase::Begin => String::from("BEGIN"),
        Phrase::Commit => String::from("COMMIT"),
        Phrase::Rollback => String::from("ROLLBACK"),
        Phrase::Query(q) => unparse_query(q),
        Phrase::CreateTableAs {
            temp,
            if_not_exists,
            name,
            query,
        } => {
            let mut out = String::from("CREATE ");
            if *temp {
                out.push_str("TEMP ");
            }
            out.push_str("TABLE ");
            if *if_not_exists {
                out.push_str("IF NOT EXISTS ");
            }
            out.push_str(&quote_name(name));
            out.push_str(" AS ");
            out.push_str(&unparse_query(query));
            out
        }
        Phrase::CreateTable {
            temp,
            if_not_exists,
            name,
            defs,
        } => {
            let mut out = String::from("CREATE ");
            if *temp {
                out.push_str("TEMP ");
            }
            out.push_str("TABLE ");
            if *if_not_exists {
                out.push_str("IF NOT EXISTS ");
            }
            out.push_str(&quote_name(name));
            out.push_str(" (");
            out.push_str(defs);
            out.push(')');
            out
        }
        Phrase::DropTable { if_exists, name } => {
            format!(
                "DROP TABLE {}{}",
                if *if_exists { "IF EXISTS " } else { "" },
                quote_name(name)
            )
        }
        Phrase::AlterTable { table, commands } => {
            let cmds: Vec<String> = commands
                .iter()
                .map(|c| match c {
                    AlterTableCmd::RenameTo(n) => format!("RENAME TO {}", quote_name(n)),
                })
                .collect();
            format!("ALTER TABLE {} {}", quote_name(table), cmds.join(", "))
        }
        Phrase::CreatePopulation(cp) => {
            let mut out = String::from("CREATE POPULATION ");
            if cp.if_not_exists {
                out.push_str("IF NOT EXISTS ");
            }
            out.push_str(&quote_name(&cp.name));
            out.push_str(" FOR ");
            out.push_str(&quote_name(&cp.table));
            out.push_str(" WITH SCHEMA (");
            let clauses: Vec<String> = cp
                .clauses
                .iter()
                .map(|c| match c {
                    crate::ast::PopulationClause::Model { columns, stattype } => format!(
                        "MODEL {} AS {}",
                        names_list(columns),
                        quote_name(stattype)
                    ),
                    crate::ast::PopulationClause::Ignore { columns } => {
                        format!("IGNORE {}", names_list(columns))
                    }
                })
                .collect();
            out.push_str(&clauses.join("; "));
            out.push(')');
            out
        }
        Phrase::AlterPopulation(ap) => {
            let cmds: Vec<String> = ap
                .commands
                .iter()
                .map(|c| match c {
                    AlterPopulationCmd::AddVariable { name, stattype } => {
                        format!("ADD VARIABLE {} {}", quote_name(name), quote_name(stattype))
                    }
                    AlterPopulationCmd::SetStattypes { columns, stattype } => format!(
                        "SET STATTYPES OF {} TO {}",
                        names_list(columns),
                        quote_name(stattype)
                    ),
                    AlterPopulationCmd::RenameTo(n) => format!("RENAME TO {}", quote_name(n)),
                })
                .collect();
            format!(
                "ALTER POPULATION {} {}",
                quote_name(&ap.population),
                cmds.join(", ")
            )
        }
        Phrase::DropPopulation { if_exists, name } => format!(
            "DROP POPULATION {}{}",
            if *if_exists { "IF EXISTS " } else { "" },
            quote_name(name)
        ),
        Phrase::CreateGenerator(cg) => {
            let mut out = String::from("CREATE GENERATOR ");
            if cg.if_not_exists {
                out.push_str("IF NOT EXISTS ");
            }
            out.push_str(&quote_name(&cg.name));
            out.push_str(" FOR ");
            out.push_str(&quote_name(&cg.population));
            out.push_str(" USING ");
            out.push_str(&quote_name(&cg.backend));
            out.push('(');
            out.push_str(&cg.schema);
            out.push(')');
            out
        }
        Phrase::AlterGenerator(ag) => {
            let cmds: Vec<String> = ag
                .commands
                .iter()
                .map(|c| match c {
                    AlterGeneratorCmd::RenameTo(n) => format!("RENAME TO {}", quote_name(n)),
                })
                .collect();
            format!(
                "ALTER GENERATOR {} {}",
                quote_name(&ag.generator),
                cmds.join(", ")
            )
        }
        Phrase::DropGenerator { if_exists, name } => format!(
            "DROP GENERATOR {}{}",
            if *if_exists { "IF EXISTS " } else { "" },
            quote_name(name)
        ),
        Phrase::Initialize(init) => format!(
            "INITIALIZE {} MODELS {}FOR {}",
            init.n_models,
            if init.if_not_exists {
                "IF NOT EXISTS "
            } else {
                ""
            },
            quote_name(&init.generator)
        ),
        Phrase::Analyze(a) => {
            let mut out = format!("ANALYZE {}", quote_name(&a.generator));
            if let Some(ranges) = &a.models {
                out.push_str(" MODELS ");
                out.push_str(&ranges_list(ranges));
            }
            out.push_str(" FOR ");
            out.push_str(&budget_to_string(&a.budget));
            if let Some(cp) = &a.checkpoint {
                out.push_str(" CHECKPOINT ");
                out.push_str(&budget_to_string(cp));
            }
            if let Some(program) = &a.program {
                out.push_str(" (");
                out.push_str(program);
                out.push(')');
            }
            out
        }
        Phrase::DropModels(d) => {
            let mut out = String::from("DROP MODELS");
            if let Some(ranges) = &d.models {
                out.push(' ');
                out.push_str(&ranges_list(ranges));
            }
            out.push_str(" FROM ");
            out.push_str(&quote_name(&d.generator));
            out
        }
    }
}

/// Renders a query as BQL text.
#[must_use]
pub fn unparse_query(query: &Query) -> String {
    match query {
        Query::Select(s) => unparse_select(s),
        Query::Estimate(e) => {
            let mut out = String::from("ESTIMATE ");
            if e.distinct {
                out.push_str("DISTINCT ");
            }
            out.push_str(&columns_list(&e.columns));
            out.push_str(" FROM ");
            match &e.from {
                EstimateFrom::Rows => {}
                EstimateFrom::PairwiseRows => out.push_str("PAIRWISE "),
                EstimateFrom::Variables => out.push_str("VARIABLES OF "),
                EstimateFrom::PairwiseVariables { .. } => out.push_str("PAIRWISE VARIABLES OF "),
            }
            out.push_str(&quote_name(&e.population));
            if let EstimateFrom::PairwiseVariables { subcols } = &e.from {
                if !subcols.is_empty() {
                    out.push_str(" FOR (");
                    out.push_str(&names_list(subcols));
                    out.push(')');
                }
            }
            out.push_str(&model_spec_to_string(&e.models));
            push_query_tail(
                &mut out,
                e.where_clause.as_ref(),
                &e.group_by,
                e.having.as_ref(),
                &e.order_by,
                e.limit.as_ref(),
                e.offset.as_ref(),
            );
            out
        }
        Query::Infer(i) => {
            let mut out = String::from("INFER ");
            if i.explicit {
                out.push_str("EXPLICIT ");
            }
            let targets: Vec<String> = i.targets.iter().map(infer_target_to_string).collect();
            out.push_str(&targets.join(", "));
            if let Some(conf) = &i.confidence {
                out.push_str(" WITH CONFIDENCE ");
                out.push_str(&expr_to_string(conf));
            }
            out.push_str(" FROM ");
            out.push_str(&quote_name(&i.population));
            out.push_str(&model_spec_to_string(&i.models));
            push_query_tail(
                &mut out,
                i.where_clause.as_ref(),
                &i.group_by,
                None,
                &i.order_by,
                i.limit.as_ref(),
                i.offset.as_ref(),
            );
            out
        }
        Query::Simulate(s) => {
            let mut out = String::from("SIMULATE ");
            out.push_str(&names_list(&s.columns));
            out.push_str(" FROM ");
            out.push_str(&quote_name(&s.population));
            if !s.givens.is_empty() {
                out.push_str(" GIVEN ");
                let givens: Vec<String> = s
                    .givens
                    .iter()
                    .map(|c| constraint_to_string(c, 7))
                    .collect();
                out.push_str(&givens.join(", "));
            }
            out.push_str(&model_spec_to_string(&s.models));
            out.push_str(" LIMIT ");
            out.push_str(&expr_to_string(&s.limit));
            out
        }
    }
}

fn unparse_select(s: &SelectStatement) -> String {
    let mut out = String::from("SELECT ");
    if s.distinct {
        out.push_str("DISTINCT ");
    }
    out.push_str(&columns_list(&s.columns));
    if let Some(from) = &s.from {
        out.push_str(" FROM ");
        out.push_str(&table_ref_to_string(from));
    }
    push_query_tail(
        &mut out,
        s.where_clause.as_ref(),
        &s.group_by,
        s.having.as_ref(),
        &s.order_by,
        s.limit.as_ref(),
        s.offset.as_ref(),
    );
    out
}

fn push_query_tail(
    out: &mut String,
    where_clause: Option<&Expr>,
    group_by: &[Expr],
    having: Option<&Expr>,
    order_by: &[OrderBy],
    limit: Option<&Expr>,
    offset: Option<&Expr>,
) {
    if let Some(w) = where_clause {
        out.push_str(" WHERE ");
        out.push_str(&expr_to_string(w));
    }
    if !group_by.is_empty() {
        out.push_str(" GROUP BY ");
        let items: Vec<String> = group_by.iter().map(expr_to_string).collect();
        out.push_str(&items.join(", "));
    }
    if let Some(h) = having {
        out.push_str(" HAVING ");
        out.push_str(&expr_to_string(h));
    }
    if !order_by.is_empty() {
        out.push_str(" ORDER BY ");
        let items: Vec<String> = order_by
            .iter()
            .map(|o| {
                let mut s = expr_to_string(&o.expr);
                if o.explicit_direction {
                    s.push(' ');
                    s.push_str(o.direction.as_str());
                }
                s
            })
            .collect();
        out.push_str(&items.join(", "));
    }
    if let Some(l) = limit {
        out.push_str(" LIMIT ");
        out.push_str(&expr_to_string(l));
    }
    if let Some(o) = offset {
        out.push_str(" OFFSET ");
        out.push_str(&expr_to_string(o));
    }
}

fn columns_list(columns: &[SelectColumn]) -> String {
    let items: Vec<String> = columns
        .iter()
        .map(|c| match &c.alias {
            Some(alias) => format!("{} AS {}", expr_to_string(&c.expr), quote_name(alias)),
            None => expr_to_string(&c.expr),
        })
        .collect();
    items.join(", ")
}

fn names_list(names: &[String]) -> String {
    let items: Vec<String> = names.iter().map(|n| quote_name(n)).collect();
    items.join(", ")
}

fn ranges_list(ranges: &[ModelRange]) -> String {
    let items: Vec<String> = ranges
        .iter()
        .map(|r| match r.hi {
            Some(hi) => format!("{}-{}", r.lo, hi),
            None => r.lo.to_string(),
        })
        .collect();
    items.join(", ")
}

fn model_spec_to_string(spec: &ModelSpec) -> String {
    let mut out = String::new();
    if let Some(g) = &spec.modeled_by {
        out.push_str(" MODELED BY ");
        out.push_str(&quote_name(g));
    }
    if let Some(ranges) = &spec.models {
        out.push_str(" USING MODELS ");
        out.push_str(&ranges_list(ranges));
    }
    out
}

fn budget_to_string(budget: &AnalysisBudget) -> String {
    let unit = match budget.unit {
        TimeUnit::Iterations => "ITERATIONS",
        TimeUnit::Seconds => "SECONDS",
        TimeUnit::Minutes => "MINUTES",
    };
    format!("{} {}", budget.amount, unit)
}

fn infer_target_to_string(target: &InferTarget) -> String {
    match target {
        InferTarget::Star => String::from("*"),
        InferTarget::Column { name, alias } => match alias {
            Some(a) => format!("{} AS {}", quote_name(name), quote_name(a)),
            None => quote_name(name),
        },
        InferTarget::Expr { expr, alias } => match alias {
            Some(a) => format!("{} AS {}", expr_to_string(expr), quote_name(a)),
            None => expr_to_string(expr),
        },
        InferTarget::Predict {
            column,
            alias,
            confidence,
            samples,
        } => {
            let mut out = format!("PREDICT {}", quote_name(column));
            if let Some(a) = alias {
                out.push_str(" AS ");
                out.push_str(&quote_name(a));
            }
            out.push_str(" CONFIDENCE ");
            out.push_str(&quote_name(confidence));
            if let Some(n) = samples {
                out.push_str(" USING ");
                out.push_str(&expr_to_string(n));
                out.push_str(" SAMPLES");
            }
            out
        }
    }
}

fn table_ref_to_string(table_ref: &TableRef) -> String {
    match table_ref {
        TableRef::Table { name, alias } => match alias {
            Some(a) => format!("{} AS {}", quote_name(name), quote_name(a)),
            None => quote_name(name),
        },
        TableRef::Subquery { query, alias } => {
            format!("({}) AS {}", unparse_select(query), quote_name(alias))
        }
        TableRef::Join { left, join } => {
            let mut out = format!(
                "{} {} {}",
                table_ref_to_string(left),
                join.join_type.as_str(),
                table_ref_to_string(&join.table)
            );
            if let Some(on) = &join.on {
                out.push_str(" ON ");
                out.push_str(&expr_to_string(on));
            } else if !join.using.is_empty() {
                out.push_str(" USING (");
                out.push_str(&names_list(&join.using));
                out.push(')');
            }
            out
        }
    }
}

/// Precedence used to decide where the printer must parenthesize.
/// Mirrors the parser's infix binding powers; primaries are highest.
fn expr_prec(expr: &Expr) -> u8 {
    match expr {
        Expr::Binary { op, .. } => match op {
            crate::ast::BinaryOp::Or => 1,
            crate::ast::BinaryOp::And => 3,
            crate::ast::BinaryOp::Eq
            | crate::ast::BinaryOp::NotEq
            | crate::ast::BinaryOp::Lt
            | crate::ast::BinaryOp::LtEq
            | crate::ast::BinaryOp::Gt
            | crate::ast::BinaryOp::GtEq
            | crate::ast::BinaryOp::Like
            | crate::ast::BinaryOp::NotLike => 5,
            crate::ast::BinaryOp::BitOr => 7,
            crate::ast::BinaryOp::BitAnd => 9,
            crate::ast::BinaryOp::LeftShift | crate::ast::BinaryOp::RightShift => 11,
            crate::ast::BinaryOp::Add
            | crate::ast::BinaryOp::Sub
            | crate::ast::BinaryOp::Concat => 13,
            crate::ast::BinaryOp::Mul
            | crate::ast::BinaryOp::Div
            | crate::ast::BinaryOp::Mod => 15,
        },
        Expr::Unary { op, .. } => match op {
            UnaryOp::Not => 4,
            UnaryOp::Neg | UnaryOp::BitNot => 19,
        },
        Expr::IsNull { .. } | Expr::In { .. } | Expr::Between { .. } => 5,
        Expr::Collate { .. } => 17,
        Expr::Bql(_) => 20,
        _ => 21,
    }
}

/// Renders an expression as BQL text.
#[must_use]
pub fn expr_to_string(expr: &Expr) -> String {
    expr_with_prec(expr, 0)
}

fn expr_with_prec(expr: &Expr, min_prec: u8) -> String {
    let text = expr_text(expr);
    if expr_prec(expr) < min_prec {
        format!("({text})")
    } else {
        text
    }
}

fn expr_text(expr: &Expr) -> String {
    match expr {
        Expr::Literal(lit) => literal_to_string(lit),
        Expr::Column { table, name, .. } => match table {
            Some(t) => format!("{}.{}", quote_name(t), quote_name(name)),
            None => quote_name(name),
        },
        Expr::Binary { left, op, right } => {
            let prec = expr_prec(expr);
            format!(
                "{} {} {}",
                expr_with_prec(left, prec),
                op.as_str(),
                expr_with_prec(right, prec + 1)
            )
        }
        Expr::Unary { op, operand } => {
            let prec = expr_prec(expr);
            match op {
                UnaryOp::Not => format!("NOT {}", expr_with_prec(operand, prec)),
                _ => format!("{}{}", op.as_str(), expr_with_prec(operand, prec)),
            }
        }
        Expr::Function(f) => {
            let args: Vec<String> = f.args.iter().map(expr_to_string).collect();
            format!(
                "{}({}{})",
                quote_name(&f.name),
                if f.distinct { "DISTINCT " } else { "" },
                args.join(", ")
            )
        }
        Expr::Subquery(q) => format!("({})", unparse_select(q)),
        Expr::Exists { query } => format!("EXISTS ({})", unparse_select(query)),
        Expr::IsNull { expr, negated } => format!(
            "{} IS {}NULL",
            expr_with_prec(expr, 6),
            if *negated { "NOT " } else { "" }
        ),
        Expr::In {
            expr,
            list,
            negated,
        } => {
            let items: Vec<String> = list.iter().map(expr_to_string).collect();
            format!(
                "{} {}IN ({})",
                expr_with_prec(expr, 6),
                if *negated { "NOT " } else { "" },
                items.join(", ")
            )
        }
        Expr::Between {
            expr,
            low,
            high,
            negated,
        } => format!(
            "{} {}BETWEEN {} AND {}",
            expr_with_prec(expr, 6),
            if *negated { "NOT " } else { "" },
            expr_with_prec(low, 6),
            expr_with_prec(high, 6)
        ),
        Expr::Case {
            operand,
            when_clauses,
            else_clause,
        } => {
            let mut out = String::from("CASE");
            if let Some(op) = operand {
                out.push(' ');
                out.push_str(&expr_to_string(op));
            }
            for (when, then) in when_clauses {
                out.push_str(" WHEN ");
                out.push_str(&expr_to_string(when));
                out.push_str(" THEN ");
                out.push_str(&expr_to_string(then));
            }
            if let Some(e) = else_clause {
                out.push_str(" ELSE ");
                out.push_str(&expr_to_string(e));
            }
            out.push_str(" END");
            out
        }
        Expr::Cast { expr, data_type } => {
            format!("CAST({} AS {})", expr_to_string(expr), data_type)
        }
        Expr::Collate { expr, collation } => {
            format!("{} COLLATE {}", expr_with_prec(expr, 17), quote_name(collation))
        }
        Expr::Paren(inner) => format!("({})", expr_to_string(inner)),
        Expr::Parameter { name, position } => match name {
            Some(n) => n.clone(),
            None => format!("?{position}"),
        },
        Expr::Wildcard { table } => match table {
            Some(t) => format!("{}.*", quote_name(t)),
            None => String::from("*"),
        },
        Expr::Bql(bql) => bql_fn_to_string(bql),
    }
}

fn constraint_to_string(c: &Constraint, value_prec: u8) -> String {
    format!(
        "{} = {}",
        quote_name(&c.column),
        expr_with_prec(&c.value, value_prec)
    )
}

fn givens_to_string(givens: &[Constraint]) -> String {
    if givens.is_empty() {
        return String::new();
    }
    let items: Vec<String> = givens.iter().map(|c| constraint_to_string(c, 0)).collect();
    format!(" GIVEN ({})", items.join(", "))
}

fn pair_to_string(pair: &ColumnPair) -> String {
    let mut out = String::new();
    if let Some(of) = &pair.of {
        out.push_str(" OF ");
        out.push_str(&quote_name(of));
    }
    if let Some(with) = &pair.with {
        out.push_str(" WITH ");
        out.push_str(&quote_name(with));
    }
    out
}

fn bql_fn_to_string(bql: &BqlFn) -> String {
    match bql {
        BqlFn::PredictiveProbability { column, givens } => format!(
            "PREDICTIVE PROBABILITY OF {}{}",
            quote_name(column),
            givens_to_string(givens)
        ),
        BqlFn::ProbabilityDensity { targets, givens } => {
            let body = if targets.len() == 1 {
                constraint_to_string(&targets[0], 7)
            } else {
                let items: Vec<String> =
                    targets.iter().map(|c| constraint_to_string(c, 0)).collect();
                format!("({})", items.join(", "))
            };
            format!(
                "PROBABILITY DENSITY OF {}{}",
                body,
                givens_to_string(givens)
            )
        }
        BqlFn::ProbabilityOfValue { value, givens } => format!(
            "PROBABILITY DENSITY OF VALUE {}{}",
            expr_with_prec(value, 7),
            givens_to_string(givens)
        ),
        BqlFn::Similarity { to, context } => {
            let mut out = String::from("SIMILARITY");
            if let Some(cond) = to {
                out.push_str(" TO (");
                out.push_str(&expr_to_string(cond));
                out.push(')');
            }
            if let Some(c) = context {
                out.push_str(" IN THE CONTEXT OF ");
                out.push_str(&quote_name(c));
            }
            out
        }
        BqlFn::DependenceProbability { pair } => {
            format!("DEPENDENCE PROBABILITY{}", pair_to_string(pair))
        }
        BqlFn::MutualInformation {
            pair,
            givens,
            samples,
        } => {
            let mut out = format!("MUTUAL INFORMATION{}", pair_to_string(pair));
            out.push_str(&givens_to_string(givens));
            if let Some(n) = samples {
                out.push_str(" USING ");
                out.push_str(&expr_to_string(n));
                out.push_str(" SAMPLES");
            }
            out
        }
        BqlFn::Correlation { pair, pvalue } => format!(
            "CORRELATION{}{}",
            if *pvalue { " PVALUE" } else { "" },
            pair_to_string(pair)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn roundtrip(input: &str) {
        let mut parser = Parser::new(input);
        let phrase = parser
            .parse_phrase()
            .unwrap_or_else(|e| panic!("parse {input:?}: {e}"))
            .expect("phrase");
        let printed = unparse_phrase(&phrase);
        let mut reparser = Parser::new(&printed);
        let reparsed = reparser
            .parse_phrase()
            .unwrap_or_else(|e| panic!("reparse {printed:?}: {e}"))
            .expect("phrase");
        assert_eq!(phrase, reparsed, "{input:?} -> {printed:?}");
    }

    #[test]
    fn test_roundtrip_select() {
        roundtrip("SELECT 1");
        roundtrip("SELECT a, b + 1 AS c FROM t WHERE a > 2 AND b < 3 ORDER BY c DESC LIMIT 10");
        roundtrip("SELECT DISTINCT x FROM t GROUP BY y HAVING count(*) > 1");
        roundtrip("SELECT * FROM t JOIN u ON t.id = u.id");
        roundtrip("SELECT (a + b) * c FROM t");
        roundtrip("SELECT CASE WHEN a THEN 1 ELSE 2 END FROM t");
        roundtrip("SELECT CAST(a AS INTEGER) FROM t");
        roundtrip("SELECT a FROM t WHERE b IS NOT NULL AND c IN (1, 2, 3)");
        roundtrip("SELECT count(DISTINCT a) FROM t");
        roundtrip("SELECT \"odd name\" FROM \"odd table\"");
    }

    #[test]
    fn test_roundtrip_estimate() {
        roundtrip("ESTIMATE a, PREDICTIVE PROBABILITY OF a AS pp FROM p ORDER BY pp DESC LIMIT 2");
        roundtrip("ESTIMATE PROBABILITY DENSITY OF a = 2 GIVEN (b = 3) FROM p");
        roundtrip("ESTIMATE PROBABILITY DENSITY OF (a = 1, b = 2) FROM p MODELED BY g");
        roundtrip("ESTIMATE PROBABILITY DENSITY OF VALUE 5 FROM VARIABLES OF p");
        roundtrip("ESTIMATE DEPENDENCE PROBABILITY FROM PAIRWISE VARIABLES OF p FOR (a, b)");
        roundtrip("ESTIMATE MUTUAL INFORMATION OF a WITH b USING 100 SAMPLES FROM p");
        roundtrip("ESTIMATE CORRELATION PVALUE OF a WITH b FROM p");
        roundtrip("ESTIMATE SIMILARITY TO (rowid = 1) IN THE CONTEXT OF a FROM p");
        roundtrip("ESTIMATE SIMILARITY IN THE CONTEXT OF a FROM PAIRWISE p USING MODELS 0-2");
    }

    #[test]
    fn test_roundtrip_infer_simulate() {
        roundtrip("INFER a, b WITH CONFIDENCE 0.9 FROM p WHERE a IS NULL");
        roundtrip("INFER EXPLICIT a, PREDICT b AS bp CONFIDENCE bc FROM p WHERE rowid = 1");
        roundtrip("SIMULATE a, b FROM p GIVEN c = 3 LIMIT 5");
        roundtrip("SIMULATE a FROM p MODELED BY g USING MODELS 1 LIMIT ?1");
    }

    #[test]
    fn test_roundtrip_mml() {
        roundtrip("CREATE POPULATION p FOR t WITH SCHEMA (MODEL a, b, c AS numerical)");
        roundtrip("CREATE POPULATION p FOR t WITH SCHEMA (MODEL a AS nominal; IGNORE b)");
        roundtrip("ALTER POPULATION p ADD VARIABLE d numerical, RENAME TO q");
        roundtrip("CREATE GENERATOR g FOR p USING diag_gauss()");
        roundtrip("ALTER GENERATOR g RENAME TO h");
        roundtrip("INITIALIZE 4 MODELS FOR g");
        roundtrip("ANALYZE g MODELS 0-1 FOR 10 ITERATIONS CHECKPOINT 2 ITERATIONS");
        roundtrip("DROP MODELS 0-3 FROM g");
        roundtrip("DROP GENERATOR IF EXISTS g");
        roundtrip("DROP POPULATION p");
        roundtrip("CREATE TEMP TABLE u AS SELECT * FROM t");
        roundtrip("DROP TABLE IF EXISTS t");
        roundtrip("ALTER TABLE t RENAME TO u");
        roundtrip("BEGIN");
        roundtrip("COMMIT");
        roundtrip("ROLLBACK");
    }

    #[test]
    fn test_quote_name() {
        assert_eq!(quote_name("plain"), "plain");
        assert_eq!(quote_name("select"), "\"select\"");
        assert_eq!(quote_name("odd name"), "\"odd name\"");
        assert_eq!(quote_name("has\"quote"), "\"has\"\"quote\"");
    }

    #[test]
    fn test_literals() {
        assert_eq!(literal_to_string(&Literal::Integer(42)), "42");
        assert_eq!(literal_to_string(&Literal::Float(2.0)), "2.0");
        assert_eq!(literal_to_string(&Literal::String(String::from("a'b"))), "'a''b'");
        assert_eq!(literal_to_string(&Literal::Null), "NULL");
    }
}
