//! Engine integration tests with a deterministic mock backend.

use std::sync::Arc;

use bayesdb_core::{
    Backend, BackendResult, Bdb, BqlError, DataSet, InterruptFlag, PopulationView, Value,
};

/// A backend with fixed closed-form answers: every target has log
/// density -1, simulation always draws 1.0, dependence is 0.5.
struct MockBackend;

impl Backend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }
    fn create_generator(
        &self,
        _generator_id: i64,
        _schema: &str,
        _population: &PopulationView,
    ) -> BackendResult<()> {
        Ok(())
    }
    fn drop_generator(&self, _generator_id: i64) -> BackendResult<()> {
        Ok(())
    }
    fn initialize_models(&self, _generator_id: i64, _model_ids: &[i64]) -> BackendResult<()> {
        Ok(())
    }
    fn drop_models(&self, _generator_id: i64, _model_ids: &[i64]) -> BackendResult<()> {
        Ok(())
    }
    fn analyze_models(
        &self,
        _generator_id: i64,
        _model_ids: &[i64],
        _data: &DataSet,
        _iterations: u64,
        _program: Option<&str>,
        _interrupt: &InterruptFlag,
    ) -> BackendResult<()> {
        Ok(())
    }
    fn logpdf_joint(
        &self,
        _generator_id: i64,
        _model_id: i64,
        targets: &[(i64, Value)],
        _constraints: &[(i64, Value)],
    ) -> BackendResult<f64> {
        Ok(-(targets.len() as f64))
    }
    fn simulate_joint(
        &self,
        _generator_id: i64,
        _model_ids: &[i64],
        targets: &[i64],
        _constraints: &[(i64, Value)],
        n_samples: usize,
    ) -> BackendResult<Vec<Vec<Value>>> {
        Ok(vec![vec![Value::Real(1.0); targets.len()]; n_samples])
    }
    fn column_dependence_probability(
        &self,
        _generator_id: i64,
        _model_id: i64,
        _v0: i64,
        _v1: i64,
    ) -> BackendResult<f64> {
        Ok(0.5)
    }
    fn column_mutual_information(
        &self,
        _generator_id: i64,
        _model_id: i64,
        v0: i64,
        v1: i64,
        _constraints: &[(i64, Value)],
        _n_samples: usize,
    ) -> BackendResult<f64> {
        Ok(if v0 == v1 { 1.0 } else { 0.25 })
    }
    fn row_similarity(
        &self,
        _generator_id: i64,
        _model_id: i64,
        row0: i64,
        row1: i64,
        _context: i64,
    ) -> BackendResult<f64> {
        Ok(if row0 == row1 { 1.0 } else { 0.5 })
    }
}

fn setup() -> Bdb {
    let bdb = Bdb::open_in_memory().expect("open");
    bdb.register_backend(Arc::new(MockBackend));
    bdb.execute_script(
        "CREATE TABLE t (a REAL, b REAL, c REAL);
         CREATE POPULATION p FOR t WITH SCHEMA (MODEL a, b, c AS numerical);
         CREATE GENERATOR g FOR p USING mock();
         INITIALIZE 2 MODELS FOR g;",
    )
    .expect("setup script");
    bdb.sql_execute(
        "INSERT INTO t VALUES (1, 2, 3), (2, 4, 6), (3, 6, NULL)",
        &[],
    )
    .expect("seed rows");
    bdb
}

fn count(bdb: &Bdb, sql: &str) -> i64 {
    let mut cursor = bdb.execute(sql, &[]).expect("count query");
    cursor.next_row().expect("one row")[0]
        .as_i64()
        .expect("integer count")
}

#[test]
fn test_select_passthrough() {
    let bdb = setup();
    let mut cursor = bdb
        .execute("SELECT a, b FROM t WHERE a > 1 ORDER BY a", &[])
        .unwrap();
    assert_eq!(cursor.column_names(), &["a", "b"]);
    assert_eq!(
        cursor.next_row(),
        Some(vec![Value::Real(2.0), Value::Real(4.0)])
    );
    assert_eq!(
        cursor.next_row(),
        Some(vec![Value::Real(3.0), Value::Real(6.0)])
    );
    assert_eq!(cursor.next_row(), None);
}

#[test]
fn test_estimate_density_average_over_models() {
    let bdb = setup();
    let mut cursor = bdb
        .execute("ESTIMATE PROBABILITY DENSITY OF a = 2 FROM p LIMIT 1", &[])
        .unwrap();
    let row = cursor.next_row().unwrap();
    // Both models report log density -1; the average is exp(-1).
    let density = row[0].as_f64().unwrap();
    assert!((density - (-1.0_f64).exp()).abs() < 1e-12);
}

#[test]
fn test_dependence_probability_in_unit_interval() {
    let bdb = setup();
    let mut cursor = bdb
        .execute(
            "ESTIMATE DEPENDENCE PROBABILITY FROM PAIRWISE VARIABLES OF p",
            &[],
        )
        .unwrap();
    let mut rows = 0;
    while let Some(row) = cursor.next_row() {
        let p = row.last().unwrap().as_f64().unwrap();
        assert!((0.0..=1.0).contains(&p));
        rows += 1;
    }
    // Both orderings of 3 variables.
    assert_eq!(rows, 9);
}

#[test]
fn test_simulate_row_counts() {
    let bdb = setup();
    let mut cursor = bdb
        .execute("SIMULATE a, b FROM p LIMIT 5", &[])
        .unwrap();
    assert_eq!(cursor.column_names(), &["a", "b"]);
    assert_eq!(cursor.len(), 5);
    let row = cursor.next_row().unwrap();
    assert_eq!(row, vec![Value::Real(1.0), Value::Real(1.0)]);

    let empty = bdb.execute("SIMULATE a FROM p LIMIT 0", &[]).unwrap();
    assert_eq!(empty.len(), 0);

    let err = bdb.execute("SIMULATE a FROM p LIMIT -1", &[]).unwrap_err();
    assert!(matches!(err, BqlError::Schema(_)));
}

#[test]
fn test_simulate_with_parameterized_limit() {
    let bdb = setup();
    let cursor = bdb
        .execute("SIMULATE a FROM p LIMIT ?1", &[Value::Integer(3)])
        .unwrap();
    assert_eq!(cursor.len(), 3);
}

#[test]
fn test_infer_fills_only_missing_values() {
    let bdb = setup();
    // Row 3 has c = NULL; the mock backend predicts 1.0 with a constant
    // sample, so confidence is 1.
    let mut cursor = bdb
        .execute("INFER c WITH CONFIDENCE 0.5 FROM p ORDER BY rowid", &[])
        .unwrap();
    assert_eq!(cursor.next_row(), Some(vec![Value::Real(3.0)]));
    assert_eq!(cursor.next_row(), Some(vec![Value::Real(6.0)]));
    assert_eq!(cursor.next_row(), Some(vec![Value::Real(1.0)]));
}

#[test]
fn test_infer_respects_confidence_threshold() {
    let bdb = setup();
    // Threshold above 1 can never be met, so the missing cell stays NULL.
    let mut cursor = bdb
        .execute(
            "INFER c WITH CONFIDENCE 1.5 FROM p WHERE c IS NULL",
            &[],
        )
        .unwrap();
    assert_eq!(cursor.next_row(), Some(vec![Value::Null]));
    assert_eq!(cursor.next_row(), None);
}

#[test]
fn test_infer_explicit_predict_pair() {
    let bdb = setup();
    let mut cursor = bdb
        .execute(
            "INFER EXPLICIT a, PREDICT b AS bp CONFIDENCE bc FROM p WHERE rowid = 1",
            &[],
        )
        .unwrap();
    assert_eq!(cursor.column_names(), &["a", "bp", "bc"]);
    let row = cursor.next_row().unwrap();
    assert_eq!(row[0], Value::Real(1.0));
    assert_eq!(row[1], Value::Real(1.0));
    let confidence = row[2].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&confidence));
}

#[test]
fn test_similarity_to_condition() {
    let bdb = setup();
    let mut cursor = bdb
        .execute(
            "ESTIMATE SIMILARITY TO (a = 2) IN THE CONTEXT OF b FROM p WHERE a = 2",
            &[],
        )
        .unwrap();
    // Same row on both sides of the comparison.
    assert_eq!(cursor.next_row(), Some(vec![Value::Real(1.0)]));
}

#[test]
fn test_population_create_drop_roundtrip() {
    let bdb = setup();
    let populations = count(&bdb, "SELECT COUNT(*) FROM bayesdb_population");
    let variables = count(&bdb, "SELECT COUNT(*) FROM bayesdb_variable");

    bdb.execute_script(
        "CREATE TABLE u (x REAL);
         CREATE POPULATION q FOR u WITH SCHEMA (MODEL x AS numerical);
         DROP POPULATION q;
         DROP TABLE u;",
    )
    .unwrap();

    assert_eq!(
        count(&bdb, "SELECT COUNT(*) FROM bayesdb_population"),
        populations
    );
    assert_eq!(
        count(&bdb, "SELECT COUNT(*) FROM bayesdb_variable"),
        variables
    );
}

#[test]
fn test_initialize_and_drop_models_exactly() {
    let bdb = setup();
    bdb.execute_script(
        "CREATE GENERATOR h FOR p USING mock();
         INITIALIZE 4 MODELS FOR h;",
    )
    .unwrap();
    assert_eq!(
        count(
            &bdb,
            "SELECT COUNT(*) FROM bayesdb_generator_model
              WHERE generator_id = (SELECT id FROM bayesdb_generator WHERE name = 'h')"
        ),
        4
    );
    // Models of g are untouched by dropping h's.
    bdb.execute("DROP MODELS 0-3 FROM h", &[]).unwrap();
    assert_eq!(
        count(
            &bdb,
            "SELECT COUNT(*) FROM bayesdb_generator_model
              WHERE generator_id = (SELECT id FROM bayesdb_generator WHERE name = 'h')"
        ),
        0
    );
    assert_eq!(
        count(&bdb, "SELECT COUNT(*) FROM bayesdb_generator_model"),
        2
    );
    bdb.execute("DROP GENERATOR h", &[]).unwrap();
}

#[test]
fn test_transaction_rollback_hides_generator() {
    let bdb = setup();
    bdb.execute("BEGIN", &[]).unwrap();
    bdb.execute("CREATE GENERATOR h FOR p USING mock()", &[])
        .unwrap();
    bdb.execute("ROLLBACK", &[]).unwrap();
    let err = bdb
        .execute("ESTIMATE a FROM p MODELED BY h", &[])
        .unwrap_err();
    assert!(matches!(err, BqlError::NoSuchGenerator(_)));
}

#[test]
fn test_transaction_nesting_fails() {
    let bdb = setup();
    bdb.execute("BEGIN", &[]).unwrap();
    let err = bdb.execute("BEGIN", &[]).unwrap_err();
    assert!(matches!(err, BqlError::Transaction(_)));
    bdb.execute("COMMIT", &[]).unwrap();
    let err = bdb.execute("COMMIT", &[]).unwrap_err();
    assert!(matches!(err, BqlError::Transaction(_)));
}

#[test]
fn test_analyze_refuses_transaction() {
    let bdb = setup();
    bdb.execute("BEGIN", &[]).unwrap();
    let err = bdb
        .execute("ANALYZE g FOR 1 ITERATIONS", &[])
        .unwrap_err();
    assert!(matches!(err, BqlError::Transaction(_)));
    bdb.execute("ROLLBACK", &[]).unwrap();
}

#[test]
fn test_analyze_updates_iteration_counters() {
    let bdb = setup();
    bdb.execute("ANALYZE g FOR 6 ITERATIONS CHECKPOINT 2 ITERATIONS", &[])
        .unwrap();
    let mut cursor = bdb
        .execute(
            "SELECT DISTINCT iterations FROM bayesdb_generator_model",
            &[],
        )
        .unwrap();
    assert_eq!(cursor.next_row(), Some(vec![Value::Integer(6)]));
    assert_eq!(cursor.next_row(), None);
}

#[test]
fn test_failed_phrase_leaves_no_trace() {
    let bdb = setup();
    // The second clause names a missing column, so nothing may persist.
    let err = bdb
        .execute(
            "CREATE POPULATION q FOR t WITH SCHEMA (MODEL a, b, c AS numerical; MODEL nope AS numerical)",
            &[],
        )
        .unwrap_err();
    assert!(matches!(err, BqlError::NoSuchColumn { .. }));
    assert_eq!(count(&bdb, "SELECT COUNT(*) FROM bayesdb_population"), 1);
}

#[test]
fn test_parameter_count_checked() {
    let bdb = setup();
    let err = bdb.execute("SELECT ?1", &[]).unwrap_err();
    assert!(matches!(
        err,
        BqlError::ParameterCount {
            expected: 1,
            got: 0
        }
    ));
}

#[test]
fn test_interrupt_cancels_and_connection_survives() {
    let bdb = setup();
    bdb.interrupt_handle().set();
    let err = bdb.execute("SELECT 1", &[]).unwrap_err();
    assert!(matches!(err, BqlError::Cancelled));
    // The flag was cleared; the connection keeps working.
    let mut cursor = bdb.execute("SELECT 1", &[]).unwrap();
    assert_eq!(cursor.next_row(), Some(vec![Value::Integer(1)]));
}

#[test]
fn test_multiple_phrases_rejected_by_execute() {
    let bdb = setup();
    let err = bdb.execute("SELECT 1; SELECT 2", &[]).unwrap_err();
    assert!(matches!(err, BqlError::Schema(_)));
}

#[test]
fn test_correlation_of_linear_columns() {
    let bdb = setup();
    let mut cursor = bdb
        .execute("ESTIMATE CORRELATION OF a WITH b FROM p LIMIT 1", &[])
        .unwrap();
    let r = cursor.next_row().unwrap()[0].as_f64().unwrap();
    // b is exactly 2a in the seeded data.
    assert!((r - 1.0).abs() < 1e-9);

    let mut cursor = bdb
        .execute("ESTIMATE CORRELATION PVALUE OF a WITH b FROM p LIMIT 1", &[])
        .unwrap();
    let p = cursor.next_row().unwrap()[0].as_f64().unwrap();
    assert!(p < 1e-6);
}

#[test]
fn test_persistence_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.bdb");
    {
        let bdb = Bdb::open(&path).unwrap();
        bdb.register_backend(Arc::new(MockBackend));
        bdb.execute_script(
            "CREATE TABLE t (a REAL);
             CREATE POPULATION p FOR t WITH SCHEMA (MODEL a AS numerical);
             CREATE GENERATOR g FOR p USING mock();
             INITIALIZE 3 MODELS FOR g;",
        )
        .unwrap();
    }
    let bdb = Bdb::open(&path).unwrap();
    bdb.register_backend(Arc::new(MockBackend));
    assert_eq!(
        count(&bdb, "SELECT COUNT(*) FROM bayesdb_generator_model"),
        3
    );
    // The catalog resolves the generator by name after reopening.
    let cursor = bdb.execute("SIMULATE a FROM p MODELED BY g LIMIT 2", &[]).unwrap();
    assert_eq!(cursor.len(), 2);
}

#[test]
fn test_default_generator_resolution() {
    let bdb = setup();
    bdb.execute("CREATE GENERATOR h FOR p USING mock()", &[])
        .unwrap();
    bdb.execute("INITIALIZE 1 MODELS FOR h", &[]).unwrap();
    // Two generators, no default: ambiguous.
    let err = bdb.execute("ESTIMATE a FROM p", &[]).unwrap_err();
    assert!(matches!(err, BqlError::AmbiguousDefault(_)));

    bdb.set_default_generator("t", Some("h")).unwrap();
    bdb.execute("ESTIMATE a FROM p", &[]).unwrap();

    bdb.set_default_generator("t", None).unwrap();
    let err = bdb.execute("ESTIMATE a FROM p", &[]).unwrap_err();
    assert!(matches!(err, BqlError::AmbiguousDefault(_)));
}

#[test]
fn test_alter_table_rename_propagates() {
    let bdb = setup();
    bdb.execute("ALTER TABLE t RENAME TO t2", &[]).unwrap();
    // The population follows the rename.
    let mut cursor = bdb
        .execute("SELECT tabname FROM bayesdb_population WHERE name = 'p'", &[])
        .unwrap();
    assert_eq!(
        cursor.next_row(),
        Some(vec![Value::Text(String::from("t2"))])
    );
    // Queries keep working against the renamed base table.
    bdb.execute("ESTIMATE a FROM p LIMIT 1", &[]).unwrap();
}

#[test]
fn test_create_table_as_simulate() {
    let bdb = setup();
    bdb.execute("CREATE TABLE sim AS SIMULATE a, b FROM p LIMIT 4", &[])
        .unwrap();
    assert_eq!(count(&bdb, "SELECT COUNT(*) FROM sim"), 4);
}
