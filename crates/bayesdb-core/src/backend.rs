//! The protocol between the engine and pluggable statistical backends.
//!
//! A backend owns the model state of the generators created through it.
//! Query-side methods take a single model index; averaging across a model
//! set is the engine's job. Training-side methods receive the population
//! data as a materialized [`DataSet`] and may poll the interrupt flag.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::value::Value;

/// A variable id: the column number of the variable in its population.
pub type VarId = i64;

/// A backend failure, surfaced as `BqlError::Backend`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    /// The backend that failed.
    pub backend: String,
    /// What went wrong.
    pub message: String,
}

impl BackendError {
    /// Creates a new backend error.
    #[must_use]
    pub fn new(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            message: message.into(),
        }
    }
}

impl core::fmt::Display for BackendError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}: {}", self.backend, self.message)
    }
}

impl std::error::Error for BackendError {}

/// Result type for backend operations.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Cooperative cancellation flag shared between a connection, its
/// operators, and backends.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    /// Creates a cleared flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Safe to call from another thread.
    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Clears the flag.
    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Returns true if cancellation was requested.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One variable of a population, as seen by backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableView {
    /// Variable id (column number).
    pub varno: VarId,
    /// Variable name.
    pub name: String,
    /// Statistical type name, lowercase.
    pub stattype: String,
}

/// A population, as seen by backends at generator creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopulationView {
    /// Population name.
    pub name: String,
    /// Base table name.
    pub table: String,
    /// The modeled variables in colno order.
    pub variables: Vec<VariableView>,
}

impl PopulationView {
    /// Looks up a variable by id.
    #[must_use]
    pub fn variable(&self, varno: VarId) -> Option<&VariableView> {
        self.variables.iter().find(|v| v.varno == varno)
    }
}

/// The population data handed to `analyze_models`: one row per base-table
/// row, one value per modeled variable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataSet {
    /// Base-table rowids, parallel to `rows`.
    pub rowids: Vec<i64>,
    /// Variable ids, parallel to each row's values.
    pub varnos: Vec<VarId>,
    /// The observations; `rows[i][j]` is variable `varnos[j]` of row
    /// `rowids[i]`.
    pub rows: Vec<Vec<Value>>,
}

impl DataSet {
    /// Number of observation rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The values of one variable across all rows.
    #[must_use]
    pub fn column(&self, varno: VarId) -> Option<Vec<&Value>> {
        let j = self.varnos.iter().position(|&v| v == varno)?;
        Some(self.rows.iter().map(|r| &r[j]).collect())
    }

    /// The values of one variable for one rowid.
    #[must_use]
    pub fn cell(&self, rowid: i64, varno: VarId) -> Option<&Value> {
        let i = self.rowids.iter().position(|&r| r == rowid)?;
        let j = self.varnos.iter().position(|&v| v == varno)?;
        Some(&self.rows[i][j])
    }
}

/// A pluggable statistical backend.
///
/// Methods are called from a single logical thread per connection;
/// implementations may parallelize internally but must not touch the
/// connection. All numeric outputs are double precision; log densities
/// may be `-inf` for impossible observations.
pub trait Backend: Send + Sync {
    /// The name this backend registers under.
    fn name(&self) -> &str;

    /// Admits (or rejects) a new generator with the given opaque schema.
    fn create_generator(
        &self,
        generator_id: i64,
        schema: &str,
        population: &PopulationView,
    ) -> BackendResult<()>;

    /// Discards all state of a generator.
    fn drop_generator(&self, generator_id: i64) -> BackendResult<()>;

    /// Creates the given model replicas.
    fn initialize_models(&self, generator_id: i64, model_ids: &[i64]) -> BackendResult<()>;

    /// Discards the given model replicas.
    fn drop_models(&self, generator_id: i64, model_ids: &[i64]) -> BackendResult<()>;

    /// Trains the given models on `data` for `iterations` rounds (zero
    /// rounds still admits a closed-form fit). `program` is the raw
    /// analysis sub-clause text, interpreted by the backend alone.
    fn analyze_models(
        &self,
        generator_id: i64,
        model_ids: &[i64],
        data: &DataSet,
        iterations: u64,
        program: Option<&str>,
        interrupt: &InterruptFlag,
    ) -> BackendResult<()>;

    /// Log density of `targets` given `constraints` under one model;
    /// unmentioned variables are marginalized.
    fn logpdf_joint(
        &self,
        generator_id: i64,
        model_id: i64,
        targets: &[(VarId, Value)],
        constraints: &[(VarId, Value)],
    ) -> BackendResult<f64>;

    /// Draws `n_samples` joint realizations of `targets` given
    /// `constraints`; each draw comes from one uniformly chosen model of
    /// `model_ids`. Returns an `n_samples x targets.len()` matrix.
    fn simulate_joint(
        &self,
        generator_id: i64,
        model_ids: &[i64],
        targets: &[VarId],
        constraints: &[(VarId, Value)],
        n_samples: usize,
    ) -> BackendResult<Vec<Vec<Value>>>;

    /// Probability in [0, 1] that two variables are dependent, under one
    /// model.
    fn column_dependence_probability(
        &self,
        generator_id: i64,
        model_id: i64,
        v0: VarId,
        v1: VarId,
    ) -> BackendResult<f64>;

    /// Mutual information in bits between two variables under one model,
    /// Monte Carlo estimated with `n_samples` draws where the backend is
    /// approximate.
    fn column_mutual_information(
        &self,
        generator_id: i64,
        model_id: i64,
        v0: VarId,
        v1: VarId,
        constraints: &[(VarId, Value)],
        n_samples: usize,
    ) -> BackendResult<f64>;

    /// Backend-defined nonnegative similarity of two rows in the context
    /// of one variable, under one model.
    fn row_similarity(
        &self,
        generator_id: i64,
        model_id: i64,
        row0: i64,
        row1: i64,
        context: VarId,
    ) -> BackendResult<f64>;

    /// Log predictive density of `value` for `(rowid, varno)` given
    /// `constraints`. Defaults to the joint density of the single target.
    fn row_predictive_probability(
        &self,
        generator_id: i64,
        model_id: i64,
        rowid: i64,
        varno: VarId,
        value: &Value,
        constraints: &[(VarId, Value)],
    ) -> BackendResult<f64> {
        let _ = rowid;
        self.logpdf_joint(
            generator_id,
            model_id,
            &[(varno, value.clone())],
            constraints,
        )
    }

    /// Mapping from nominal labels to integer codes, when the backend
    /// codes a variable's values. Used to translate literals in `GIVEN`.
    fn column_value_map(
        &self,
        generator_id: i64,
        varno: VarId,
    ) -> BackendResult<Option<BTreeMap<String, i64>>> {
        let _ = (generator_id, varno);
        Ok(None)
    }

    /// Reseeds the backend's random stream.
    fn set_seed(&self, seed: u64) {
        let _ = seed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_flag() {
        let flag = InterruptFlag::new();
        assert!(!flag.is_set());
        let other = flag.clone();
        other.set();
        assert!(flag.is_set());
        flag.clear();
        assert!(!other.is_set());
    }

    #[test]
    fn test_dataset_lookup() {
        let data = DataSet {
            rowids: vec![1, 2],
            varnos: vec![0, 2],
            rows: vec![
                vec![Value::Integer(1), Value::Integer(3)],
                vec![Value::Integer(2), Value::Integer(6)],
            ],
        };
        assert_eq!(data.len(), 2);
        assert_eq!(
            data.column(2).unwrap(),
            vec![&Value::Integer(3), &Value::Integer(6)]
        );
        assert_eq!(data.cell(2, 0), Some(&Value::Integer(2)));
        assert_eq!(data.cell(3, 0), None);
    }
}
