//! Model operators: the scalar functions the compiled SQL calls.
//!
//! Each operator is a thin shim registered with the store. It decodes its
//! arguments (variable ids, the interned model set, and length-prefixed
//! constraint vectors), resolves the generator's backend, applies the
//! model-set reduction, and returns a plain SQL value. Probabilities and
//! densities average across models in probability space; similarity,
//! dependence, and mutual information average arithmetically; prediction
//! summarizes one predictive sample shared by value and confidence.

use std::collections::BTreeMap;
use std::sync::Arc;

use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::Connection;
use tracing::debug;

use crate::backend::{Backend, BackendError, VarId};
use crate::bdb::{Bdb, SharedState};
use crate::catalog::{stattype_nominal, stattype_numericalish};
use crate::compiler::CorrPair;
use crate::error::{BqlError, Result};
use crate::stats;
use crate::value::Value;

/// Statistical-type discriminant the compiler passes to prediction
/// operators.
pub(crate) const KIND_NUMERICAL: i64 = 0;
/// Nominal discriminant.
pub(crate) const KIND_NOMINAL: i64 = 1;
/// Cyclic discriminant.
pub(crate) const KIND_CYCLIC: i64 = 2;

/// Default predictive sample count for PREDICT and INFER.
pub(crate) const DEFAULT_PREDICT_SAMPLES: i64 = 100;

type UdfResult<T> = std::result::Result<T, rusqlite::Error>;

fn udf_err(e: BqlError) -> rusqlite::Error {
    rusqlite::Error::UserFunctionError(Box::new(e))
}

fn backend_err(e: BackendError) -> rusqlite::Error {
    udf_err(BqlError::Backend {
        backend: e.backend,
        message: e.message,
    })
}

/// Average of probabilities given in log space.
pub(crate) fn logmeanexp(logs: &[f64]) -> f64 {
    if logs.is_empty() {
        return f64::NEG_INFINITY;
    }
    let max = logs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    let sum: f64 = logs.iter().map(|l| (l - max).exp()).sum();
    max + (sum / logs.len() as f64).ln()
}

fn resolve_backend(state: &SharedState, generator_id: i64) -> UdfResult<Arc<dyn Backend>> {
    state
        .instances
        .lock()
        .expect("instances lock")
        .get(&generator_id)
        .cloned()
        .ok_or_else(|| {
            udf_err(BqlError::Internal(format!(
                "Generator {generator_id} has no bound backend"
            )))
        })
}

fn resolve_models(state: &SharedState, modelset_id: i64) -> UdfResult<Vec<i64>> {
    let sets = state.model_sets.lock().expect("model_sets lock");
    usize::try_from(modelset_id)
        .ok()
        .and_then(|i| sets.get(i).cloned())
        .ok_or_else(|| {
            udf_err(BqlError::Internal(format!(
                "Unknown model set {modelset_id}"
            )))
        })
}

/// Reads a length-prefixed `(varno, value)` vector starting at `idx`.
/// NULL-valued entries are dropped; you cannot condition on a missing
/// value. Returns the pairs and the index past the vector.
fn read_pairs(ctx: &Context<'_>, idx: usize) -> UdfResult<(Vec<(VarId, Value)>, usize)> {
    let count: i64 = ctx.get(idx)?;
    let count = usize::try_from(count)
        .map_err(|_| udf_err(BqlError::Internal(String::from("Negative pair count"))))?;
    let mut pairs = Vec::with_capacity(count);
    let mut i = idx + 1;
    for _ in 0..count {
        let varno: i64 = ctx.get(i)?;
        let value: Value = ctx.get(i + 1)?;
        if !value.is_null() {
            pairs.push((varno, value));
        }
        i += 2;
    }
    Ok((pairs, i))
}

/// Key for a Value usable in count maps.
fn value_key(value: &Value) -> String {
    match value {
        Value::Null => String::from("\u{0}null"),
        Value::Integer(i) => format!("i{i}"),
        Value::Real(f) => format!("r{f}"),
        Value::Text(t) => format!("t{t}"),
        Value::Blob(b) => format!("b{b:?}"),
    }
}

fn quantile(sorted: &[f64], q: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let pos = q * (n - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] * (1.0 - frac) + sorted[hi] * frac
}

/// Reduces a predictive sample to a (value, confidence) pair.
pub(crate) fn summarize_sample(kind: i64, sample: &[Value]) -> (Value, f64) {
    if sample.is_empty() {
        return (Value::Null, 0.0);
    }
    if kind == KIND_NOMINAL {
        let mut counts: BTreeMap<String, (usize, Value)> = BTreeMap::new();
        for v in sample {
            let entry = counts.entry(value_key(v)).or_insert((0, v.clone()));
            entry.0 += 1;
        }
        let (count, value) = counts
            .into_values()
            .max_by_key(|(n, _)| *n)
            .expect("nonempty sample");
        return (value, count as f64 / sample.len() as f64);
    }

    let mut xs: Vec<f64> = sample.iter().filter_map(Value::as_f64).collect();
    if xs.is_empty() {
        return (Value::Null, 0.0);
    }

    if kind == KIND_CYCLIC {
        let tau = 2.0 * core::f64::consts::PI;
        let (mut s, mut c) = (0.0, 0.0);
        for &x in &xs {
            s += x.sin();
            c += x.cos();
        }
        let n = xs.len() as f64;
        let direction = s.atan2(c).rem_euclid(tau);
        let resultant = (s * s + c * c).sqrt() / n;
        return (Value::Real(direction), resultant.clamp(0.0, 1.0));
    }

    xs.sort_by(|a, b| a.partial_cmp(b).expect("finite samples"));
    let median = quantile(&xs, 0.5);
    let iqr = quantile(&xs, 0.75) - quantile(&xs, 0.25);
    let confidence = 1.0 - iqr / (iqr + median.abs().max(1.0));
    (Value::Real(median), confidence.clamp(0.0, 1.0))
}

/// Computes (or fetches) the memoized predictive (value, confidence) for
/// one cell, so paired projections observe a single draw.
fn predict_pair(
    state: &SharedState,
    generator_id: i64,
    modelset_id: i64,
    rowid: i64,
    varno: VarId,
    kind: i64,
    n_samples: i64,
    constraints: &[(VarId, Value)],
) -> UdfResult<(Value, f64)> {
    let key = (generator_id, modelset_id, rowid, varno);
    if let Some(hit) = state
        .predict_cache
        .lock()
        .expect("predict cache lock")
        .get(&key)
    {
        return Ok(hit.clone());
    }

    let backend = resolve_backend(state, generator_id)?;
    let models = resolve_models(state, modelset_id)?;
    let n = usize::try_from(n_samples.max(1)).expect("positive sample count");
    let sample = backend
        .simulate_joint(generator_id, &models, &[varno], constraints, n)
        .map_err(backend_err)?;
    let column: Vec<Value> = sample.into_iter().filter_map(|mut r| {
        if r.is_empty() { None } else { Some(r.remove(0)) }
    }).collect();
    let pair = summarize_sample(kind, &column);

    state
        .predict_cache
        .lock()
        .expect("predict cache lock")
        .insert(key, pair.clone());
    Ok(pair)
}

/// Registers every model operator on the connection.
pub(crate) fn register_operators(conn: &Connection, state: &Arc<SharedState>) -> Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8;

    // PROBABILITY DENSITY OF (...) [GIVEN (...)]
    let st = Arc::clone(state);
    conn.create_scalar_function("bql_pdf_joint", -1, flags, move |ctx| {
        let generator_id: i64 = ctx.get(0)?;
        let modelset_id: i64 = ctx.get(1)?;
        let n_targets: i64 = ctx.get(2)?;
        let (targets, next) = read_pairs(ctx, 2)?;
        if targets.len() < usize::try_from(n_targets).unwrap_or(0) {
            // A NULL target has no density.
            return Ok(Value::Null);
        }
        let (constraints, _) = read_pairs(ctx, next)?;
        let backend = resolve_backend(&st, generator_id)?;
        let models = resolve_models(&st, modelset_id)?;
        let mut logs = Vec::with_capacity(models.len());
        for &m in &models {
            logs.push(
                backend
                    .logpdf_joint(generator_id, m, &targets, &constraints)
                    .map_err(backend_err)?,
            );
        }
        Ok(Value::Real(logmeanexp(&logs).exp()))
    })?;

    // PREDICTIVE PROBABILITY OF c [GIVEN (...)]
    let st = Arc::clone(state);
    conn.create_scalar_function("bql_row_prob", -1, flags, move |ctx| {
        let generator_id: i64 = ctx.get(0)?;
        let modelset_id: i64 = ctx.get(1)?;
        let rowid: i64 = ctx.get(2)?;
        let varno: i64 = ctx.get(3)?;
        let stored: Value = ctx.get(4)?;
        if stored.is_null() {
            return Ok(Value::Null);
        }
        let (constraints, _) = read_pairs(ctx, 5)?;
        let backend = resolve_backend(&st, generator_id)?;
        let models = resolve_models(&st, modelset_id)?;
        let mut logs = Vec::with_capacity(models.len());
        for &m in &models {
            logs.push(
                backend
                    .row_predictive_probability(
                        generator_id,
                        m,
                        rowid,
                        varno,
                        &stored,
                        &constraints,
                    )
                    .map_err(backend_err)?,
            );
        }
        Ok(Value::Real(logmeanexp(&logs).exp()))
    })?;

    // SIMILARITY ... IN THE CONTEXT OF c
    let st = Arc::clone(state);
    conn.create_scalar_function("bql_row_similarity", 5, flags, move |ctx| {
        let generator_id: i64 = ctx.get(0)?;
        let modelset_id: i64 = ctx.get(1)?;
        let row0: Value = ctx.get(2)?;
        let row1: Value = ctx.get(3)?;
        let context: i64 = ctx.get(4)?;
        let (Some(row0), Some(row1)) = (row0.as_i64(), row1.as_i64()) else {
            // The TO condition matched no row.
            return Ok(Value::Null);
        };
        let backend = resolve_backend(&st, generator_id)?;
        let models = resolve_models(&st, modelset_id)?;
        let mut total = 0.0;
        for &m in &models {
            total += backend
                .row_similarity(generator_id, m, row0, row1, context)
                .map_err(backend_err)?;
        }
        Ok(Value::Real(total / models.len().max(1) as f64))
    })?;

    // DEPENDENCE PROBABILITY
    let st = Arc::clone(state);
    conn.create_scalar_function("bql_depprob", 4, flags, move |ctx| {
        let generator_id: i64 = ctx.get(0)?;
        let modelset_id: i64 = ctx.get(1)?;
        let v0: i64 = ctx.get(2)?;
        let v1: i64 = ctx.get(3)?;
        let backend = resolve_backend(&st, generator_id)?;
        let models = resolve_models(&st, modelset_id)?;
        let mut total = 0.0;
        for &m in &models {
            total += backend
                .column_dependence_probability(generator_id, m, v0, v1)
                .map_err(backend_err)?;
        }
        Ok(Value::Real(total / models.len().max(1) as f64))
    })?;

    // MUTUAL INFORMATION [GIVEN (...)] [USING n SAMPLES]
    let st = Arc::clone(state);
    conn.create_scalar_function("bql_mutinf", -1, flags, move |ctx| {
        let generator_id: i64 = ctx.get(0)?;
        let modelset_id: i64 = ctx.get(1)?;
        let v0: i64 = ctx.get(2)?;
        let v1: i64 = ctx.get(3)?;
        let n_samples: i64 = ctx.get(4)?;
        let (constraints, _) = read_pairs(ctx, 5)?;
        let backend = resolve_backend(&st, generator_id)?;
        let models = resolve_models(&st, modelset_id)?;
        let n = usize::try_from(n_samples.max(1)).expect("positive sample count");
        let mut total = 0.0;
        for &m in &models {
            total += backend
                .column_mutual_information(generator_id, m, v0, v1, &constraints, n)
                .map_err(backend_err)?;
        }
        Ok(Value::Real(total / models.len().max(1) as f64))
    })?;

    // CORRELATION / CORRELATION PVALUE read the per-statement cache the
    // executor fills before the query runs.
    let st = Arc::clone(state);
    conn.create_scalar_function("bql_correlation", 3, flags, move |ctx| {
        lookup_correlation(&st, ctx, false)
    })?;
    let st = Arc::clone(state);
    conn.create_scalar_function("bql_correlation_pvalue", 3, flags, move |ctx| {
        lookup_correlation(&st, ctx, true)
    })?;

    // PREDICT c CONFIDENCE cn: paired projections over one memoized draw.
    let st = Arc::clone(state);
    conn.create_scalar_function("bql_predict", -1, flags, move |ctx| {
        predict_from_ctx(&st, ctx).map(|(value, _)| value)
    })?;
    let st = Arc::clone(state);
    conn.create_scalar_function("bql_predict_confidence", -1, flags, move |ctx| {
        predict_from_ctx(&st, ctx).map(|(_, confidence)| Value::Real(confidence))
    })?;

    // INFER implicit mode: stored value, else confident prediction, else
    // NULL.
    let st = Arc::clone(state);
    conn.create_scalar_function("bql_infer", -1, flags, move |ctx| {
        let generator_id: i64 = ctx.get(0)?;
        let modelset_id: i64 = ctx.get(1)?;
        let rowid: i64 = ctx.get(2)?;
        let varno: i64 = ctx.get(3)?;
        let kind: i64 = ctx.get(4)?;
        let threshold: f64 = ctx.get(5)?;
        let stored: Value = ctx.get(6)?;
        if !stored.is_null() {
            return Ok(stored);
        }
        let n_samples: i64 = ctx.get(7)?;
        let (constraints, _) = read_pairs(ctx, 8)?;
        let (value, confidence) = predict_pair(
            &st,
            generator_id,
            modelset_id,
            rowid,
            varno,
            kind,
            n_samples,
            &constraints,
        )?;
        if confidence >= threshold {
            Ok(value)
        } else {
            Ok(Value::Null)
        }
    })?;

    debug!("Model operators registered");
    Ok(())
}

fn predict_from_ctx(state: &SharedState, ctx: &Context<'_>) -> UdfResult<(Value, f64)> {
    let generator_id: i64 = ctx.get(0)?;
    let modelset_id: i64 = ctx.get(1)?;
    let rowid: i64 = ctx.get(2)?;
    let varno: i64 = ctx.get(3)?;
    let kind: i64 = ctx.get(4)?;
    let n_samples: i64 = ctx.get(5)?;
    let (constraints, _) = read_pairs(ctx, 6)?;
    predict_pair(
        state,
        generator_id,
        modelset_id,
        rowid,
        varno,
        kind,
        n_samples,
        &constraints,
    )
}

fn lookup_correlation(
    state: &SharedState,
    ctx: &Context<'_>,
    pvalue: bool,
) -> UdfResult<Value> {
    let population_id: i64 = ctx.get(0)?;
    let v0: i64 = ctx.get(1)?;
    let v1: i64 = ctx.get(2)?;
    let cache = state.correlations.lock().expect("correlations lock");
    let (corr, p) = cache.get(&(population_id, v0, v1)).ok_or_else(|| {
        udf_err(BqlError::Internal(format!(
            "Correlation of ({v0}, {v1}) was not prepared"
        )))
    })?;
    let chosen = if pvalue { p } else { corr };
    Ok(match chosen {
        Some(x) => Value::Real(*x),
        None => Value::Null,
    })
}

impl Bdb {
    /// Computes the correlations a compiled query needs and parks them
    /// where the correlation operators can see them.
    pub(crate) fn load_correlations(
        &self,
        population_id: i64,
        table: &str,
        pairs: &[CorrPair],
    ) -> Result<()> {
        for pair in pairs {
            let key = (population_id, pair.c0, pair.c1);
            if self
                .state
                .correlations
                .lock()
                .expect("correlations lock")
                .contains_key(&key)
            {
                continue;
            }
            let result = self.correlation_of(table, pair)?;
            self.state
                .correlations
                .lock()
                .expect("correlations lock")
                .insert(key, result);
        }
        Ok(())
    }

    fn correlation_of(
        &self,
        table: &str,
        pair: &CorrPair,
    ) -> Result<(Option<f64>, Option<f64>)> {
        let q = |name: &str| format!("\"{}\"", name.replace('"', "\"\""));
        let sql = format!(
            "SELECT {c0}, {c1} FROM {t}
              WHERE {c0} IS NOT NULL AND {c1} IS NOT NULL",
            c0 = q(&pair.name0),
            c1 = q(&pair.name1),
            t = q(table),
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        let mut observed: Vec<(Value, Value)> = Vec::new();
        while let Some(row) = rows.next()? {
            observed.push((row.get(0)?, row.get(1)?));
        }

        let num0 = stattype_numericalish(&pair.stattype0);
        let num1 = stattype_numericalish(&pair.stattype1);
        let nom0 = stattype_nominal(&pair.stattype0);
        let nom1 = stattype_nominal(&pair.stattype1);

        let result = if num0 && num1 {
            let xs: Vec<f64> = observed.iter().filter_map(|(x, _)| x.as_f64()).collect();
            let ys: Vec<f64> = observed.iter().filter_map(|(_, y)| y.as_f64()).collect();
            stats::pearsonr(&xs, &ys)
        } else if nom0 && nom1 {
            cramer_table(&observed).as_deref().and_then(stats::cramerv)
        } else if nom0 && num1 {
            stats::anova_r2(&group_by_label(observed.iter().map(|(a, b)| (a, b))))
        } else if num0 && nom1 {
            stats::anova_r2(&group_by_label(observed.iter().map(|(a, b)| (b, a))))
        } else {
            return Err(BqlError::IncompatibleStattype {
                operator: "CORRELATION",
                stattype0: pair.stattype0.clone(),
                stattype1: pair.stattype1.clone(),
            });
        };

        Ok(match result {
            Some((value, p)) => (Some(value), Some(p)),
            None => (None, None),
        })
    }
}

fn label_of(value: &Value) -> String {
    match value {
        Value::Text(t) => t.clone(),
        other => value_key(other),
    }
}

fn cramer_table(observed: &[(Value, Value)]) -> Option<Vec<Vec<f64>>> {
    let mut labels0: Vec<String> = Vec::new();
    let mut labels1: Vec<String> = Vec::new();
    for (a, b) in observed {
        let (la, lb) = (label_of(a), label_of(b));
        if !labels0.contains(&la) {
            labels0.push(la);
        }
        if !labels1.contains(&lb) {
            labels1.push(lb);
        }
    }
    if labels0.is_empty() {
        return None;
    }
    let mut table = vec![vec![0.0; labels1.len()]; labels0.len()];
    for (a, b) in observed {
        let i = labels0.iter().position(|l| *l == label_of(a))?;
        let j = labels1.iter().position(|l| *l == label_of(b))?;
        table[i][j] += 1.0;
    }
    Some(table)
}

fn group_by_label<'a>(
    observed: impl Iterator<Item = (&'a Value, &'a Value)>,
) -> Vec<Vec<f64>> {
    let mut groups: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for (label, value) in observed {
        if let Some(x) = value.as_f64() {
            groups.entry(label_of(label)).or_default().push(x);
        }
    }
    groups.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logmeanexp() {
        let one = logmeanexp(&[0.0]);
        assert!((one - 0.0).abs() < 1e-12);
        // mean of exp([-1, -1]) is exp(-1)
        let same = logmeanexp(&[-1.0, -1.0]);
        assert!((same - (-1.0)).abs() < 1e-12);
        assert_eq!(logmeanexp(&[]), f64::NEG_INFINITY);
        assert_eq!(logmeanexp(&[f64::NEG_INFINITY]), f64::NEG_INFINITY);
    }

    #[test]
    fn test_quantile() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        assert!((quantile(&xs, 0.5) - 2.5).abs() < 1e-12);
        assert!((quantile(&xs, 0.0) - 1.0).abs() < 1e-12);
        assert!((quantile(&xs, 1.0) - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_summarize_nominal_mode() {
        let sample = vec![
            Value::Text(String::from("a")),
            Value::Text(String::from("b")),
            Value::Text(String::from("a")),
            Value::Text(String::from("a")),
        ];
        let (value, confidence) = summarize_sample(KIND_NOMINAL, &sample);
        assert_eq!(value, Value::Text(String::from("a")));
        assert!((confidence - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_summarize_numerical_median() {
        let sample: Vec<Value> = [1.0, 2.0, 3.0, 4.0, 100.0]
            .iter()
            .map(|&x| Value::Real(x))
            .collect();
        let (value, confidence) = summarize_sample(KIND_NUMERICAL, &sample);
        assert_eq!(value, Value::Real(3.0));
        assert!((0.0..=1.0).contains(&confidence));
    }

    #[test]
    fn test_summarize_constant_sample_is_confident() {
        let sample: Vec<Value> = std::iter::repeat(Value::Real(7.0)).take(10).collect();
        let (value, confidence) = summarize_sample(KIND_NUMERICAL, &sample);
        assert_eq!(value, Value::Real(7.0));
        assert!((confidence - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_summarize_cyclic() {
        let tau = 2.0 * core::f64::consts::PI;
        let sample: Vec<Value> = [0.1, tau - 0.1].iter().map(|&x| Value::Real(x)).collect();
        let (value, confidence) = summarize_sample(KIND_CYCLIC, &sample);
        let Value::Real(direction) = value else { panic!() };
        // Mean direction wraps to ~0 rather than pi.
        assert!(direction < 0.2 || direction > tau - 0.2);
        assert!(confidence > 0.9);
    }

    #[test]
    fn test_summarize_empty() {
        let (value, confidence) = summarize_sample(KIND_NUMERICAL, &[]);
        assert_eq!(value, Value::Null);
        assert_eq!(confidence, 0.0);
    }
}
