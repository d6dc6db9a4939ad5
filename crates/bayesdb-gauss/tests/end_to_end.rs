//! End-to-end scenarios: BQL text in, statistics out, through the full
//! lexer/parser/compiler/operator pipeline with the diagonal-Gaussian
//! backend.

use std::sync::Arc;

use bayesdb_core::{Bdb, BqlError, Value};
use bayesdb_gauss::DiagGauss;

const TAU: f64 = 2.0 * core::f64::consts::PI;

/// Opens a database over the three-row table of the scenarios: rows
/// (1,2,3), (2,4,6), (3,6,9) with population p and analyzed generator g.
fn setup() -> Bdb {
    let bdb = Bdb::open_in_memory().expect("open");
    bdb.register_backend(Arc::new(DiagGauss::new()));
    bdb.set_seed(42);
    bdb.execute_script(
        "CREATE TABLE t (a REAL, b REAL, c REAL);
         CREATE POPULATION p FOR t WITH SCHEMA (MODEL a, b, c AS numerical);
         CREATE GENERATOR g FOR p USING diag_gauss();
         INITIALIZE 1 MODELS FOR g;",
    )
    .expect("setup");
    bdb.sql_execute("INSERT INTO t VALUES (1, 2, 3), (2, 4, 6), (3, 6, 9)", &[])
        .expect("seed");
    bdb.execute("ANALYZE g FOR 0 ITERATIONS", &[]).expect("analyze");
    bdb
}

fn scalar(bdb: &Bdb, bql: &str) -> f64 {
    let mut cursor = bdb.execute(bql, &[]).expect(bql);
    cursor.next_row().expect("one row")[0]
        .as_f64()
        .expect("numeric result")
}

fn gauss_pdf(x: f64, mean: f64, variance: f64) -> f64 {
    (-(x - mean) * (x - mean) / (2.0 * variance)).exp() / (TAU * variance).sqrt()
}

#[test]
fn test_density_matches_fitted_gaussian() {
    let bdb = setup();
    // Column a has MLE mean 2, variance 2/3.
    let density = scalar(&bdb, "ESTIMATE PROBABILITY DENSITY OF a = 2 FROM p LIMIT 1");
    assert!((density - gauss_pdf(2.0, 2.0, 2.0 / 3.0)).abs() < 1e-9);

    let off_mode = scalar(&bdb, "ESTIMATE PROBABILITY DENSITY OF a = 1 FROM p LIMIT 1");
    assert!((off_mode - gauss_pdf(1.0, 2.0, 2.0 / 3.0)).abs() < 1e-9);
    assert!(off_mode < density);
}

#[test]
fn test_density_averages_models_in_probability_space() {
    let bdb = setup();
    // With several identically fitted models, the average over all of
    // them equals any single model's density.
    bdb.execute("INITIALIZE 3 MODELS IF NOT EXISTS FOR g", &[])
        .unwrap();
    bdb.execute("ANALYZE g FOR 0 ITERATIONS", &[]).unwrap();
    let all = scalar(&bdb, "ESTIMATE PROBABILITY DENSITY OF a = 2 FROM p LIMIT 1");
    let one = scalar(
        &bdb,
        "ESTIMATE PROBABILITY DENSITY OF a = 2 FROM p USING MODEL 2 LIMIT 1",
    );
    assert!((all - one).abs() < 1e-12);
}

#[test]
fn test_simulate_returns_requested_rows() {
    let bdb = setup();
    let mut cursor = bdb.execute("SIMULATE a, b FROM p LIMIT 5", &[]).unwrap();
    assert_eq!(cursor.column_names(), &["a", "b"]);
    let mut rows = 0;
    while let Some(row) = cursor.next_row() {
        assert_eq!(row.len(), 2);
        assert!(row.iter().all(|v| v.as_f64().is_some()));
        rows += 1;
    }
    assert_eq!(rows, 5);
}

#[test]
fn test_simulate_given_pins_constrained_variable() {
    let bdb = setup();
    let mut cursor = bdb
        .execute("SIMULATE a FROM p GIVEN a = 7 LIMIT 3", &[])
        .unwrap();
    while let Some(row) = cursor.next_row() {
        assert_eq!(row[0].as_f64(), Some(7.0));
    }
}

#[test]
fn test_dependence_probability_is_zero_for_independent_model() {
    let bdb = setup();
    let p = scalar(
        &bdb,
        "ESTIMATE DEPENDENCE PROBABILITY OF a WITH b FROM p LIMIT 1",
    );
    assert_eq!(p, 0.0);
}

#[test]
fn test_predictive_probability_ranks_rows_by_density() {
    let bdb = setup();
    let mut cursor = bdb
        .execute(
            "ESTIMATE a, PREDICTIVE PROBABILITY OF a AS pp FROM p ORDER BY pp DESC LIMIT 2",
            &[],
        )
        .unwrap();
    // a = 2 sits at the fitted mean, so its stored value is the likeliest.
    let best = cursor.next_row().unwrap();
    assert_eq!(best[0].as_f64(), Some(2.0));
    let second = cursor.next_row().unwrap();
    assert!(matches!(second[0].as_f64(), Some(x) if x == 1.0 || x == 3.0));
    assert!(best[1].as_f64() >= second[1].as_f64());
}

#[test]
fn test_order_by_estimator_consistent_with_projection() {
    let bdb = setup();
    let mut cursor = bdb
        .execute(
            "ESTIMATE PREDICTIVE PROBABILITY OF a AS pp FROM p ORDER BY pp DESC",
            &[],
        )
        .unwrap();
    let mut previous = f64::INFINITY;
    while let Some(row) = cursor.next_row() {
        let pp = row[0].as_f64().unwrap();
        // The projected value agrees with the sort key even though the
        // estimator is evaluated once per clause.
        assert!(pp <= previous);
        previous = pp;
    }
}

#[test]
fn test_infer_explicit_predicts_missing_cell() {
    let bdb = setup();
    let mut cursor = bdb
        .execute(
            "INFER EXPLICIT a, PREDICT b AS bp CONFIDENCE bc FROM p WHERE rowid = 1",
            &[],
        )
        .unwrap();
    let row = cursor.next_row().unwrap();
    assert_eq!(row[0].as_f64(), Some(1.0));
    // b is fitted as N(4, 8/3); the median of the predictive sample
    // lands near 4.
    let bp = row[1].as_f64().unwrap();
    assert!((bp - 4.0).abs() < 2.0, "predicted {bp}");
    let bc = row[2].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&bc));
    assert_eq!(cursor.next_row(), None);
}

#[test]
fn test_infer_implicit_returns_value_or_null_only() {
    let bdb = setup();
    bdb.sql_execute("INSERT INTO t VALUES (4, NULL, 12)", &[])
        .unwrap();
    // Confidence 1 is unattainable for a spread-out Gaussian sample.
    let mut cursor = bdb
        .execute("INFER b WITH CONFIDENCE 1.0 FROM p WHERE b IS NULL", &[])
        .unwrap();
    assert_eq!(cursor.next_row(), Some(vec![Value::Null]));

    // Confidence 0 always accepts the prediction.
    let mut cursor = bdb
        .execute("INFER b WITH CONFIDENCE 0.0 FROM p WHERE b IS NULL", &[])
        .unwrap();
    let inferred = cursor.next_row().unwrap()[0].as_f64().unwrap();
    assert!((inferred - 4.0).abs() < 3.0);
}

#[test]
fn test_mutual_information_boundaries() {
    let bdb = setup();
    let self_mi = scalar(
        &bdb,
        "ESTIMATE MUTUAL INFORMATION OF a WITH a FROM p LIMIT 1",
    );
    // Self-information equals the fitted column entropy.
    let variance: f64 = 2.0 / 3.0;
    let entropy = 0.5 * (TAU * core::f64::consts::E * variance).ln() / core::f64::consts::LN_2;
    assert!(self_mi >= 0.0);
    assert!((self_mi - entropy).abs() < 1e-9);

    let cross_mi = scalar(
        &bdb,
        "ESTIMATE MUTUAL INFORMATION OF a WITH b FROM p LIMIT 1",
    );
    assert_eq!(cross_mi, 0.0);
}

#[test]
fn test_similarity_in_context() {
    let bdb = setup();
    let mut cursor = bdb
        .execute(
            "ESTIMATE a, SIMILARITY TO (a = 1) IN THE CONTEXT OF a AS s FROM p ORDER BY a",
            &[],
        )
        .unwrap();
    let mut sims = Vec::new();
    while let Some(row) = cursor.next_row() {
        sims.push(row[1].as_f64().unwrap());
    }
    // Identical row first, then decreasing with distance in a.
    assert!((sims[0] - 1.0).abs() < 1e-12);
    assert!(sims[0] > sims[1]);
    assert!(sims[1] > sims[2]);
}

#[test]
fn test_pairwise_variables_dependence_grid() {
    let bdb = setup();
    let mut cursor = bdb
        .execute(
            "ESTIMATE name0, name1, DEPENDENCE PROBABILITY AS d
               FROM PAIRWISE VARIABLES OF p ORDER BY name0, name1",
            &[],
        )
        .unwrap();
    let mut rows = 0;
    while let Some(row) = cursor.next_row() {
        let d = row[2].as_f64().unwrap();
        let (Value::Text(n0), Value::Text(n1)) = (&row[0], &row[1]) else {
            panic!("expected variable names");
        };
        if n0 == n1 {
            assert_eq!(d, 1.0);
        } else {
            assert_eq!(d, 0.0);
        }
        rows += 1;
    }
    assert_eq!(rows, 9);
}

#[test]
fn test_correlation_in_variables_context() {
    let bdb = setup();
    let mut cursor = bdb
        .execute(
            "ESTIMATE name, CORRELATION WITH a AS r FROM VARIABLES OF p ORDER BY name",
            &[],
        )
        .unwrap();
    // a, b, c are all exact multiples of one another.
    let mut rows = 0;
    while let Some(row) = cursor.next_row() {
        let r = row[1].as_f64().unwrap();
        assert!((r - 1.0).abs() < 1e-9);
        rows += 1;
    }
    assert_eq!(rows, 3);
}

#[test]
fn test_rollback_hides_created_generator() {
    let bdb = setup();
    bdb.execute("BEGIN", &[]).unwrap();
    bdb.execute("CREATE GENERATOR h FOR p USING diag_gauss()", &[])
        .unwrap();
    bdb.execute("ROLLBACK", &[]).unwrap();
    let err = bdb
        .execute("ESTIMATE a FROM p MODELED BY h", &[])
        .unwrap_err();
    assert!(matches!(err, BqlError::NoSuchGenerator(_)));
    // The default generator still answers.
    bdb.execute("ESTIMATE a FROM p LIMIT 1", &[]).unwrap();
}

#[test]
fn test_simulate_reproducible_under_seed() {
    let bdb = setup();
    bdb.set_seed(1234);
    let first: Vec<Vec<Value>> = bdb
        .execute("SIMULATE a, b FROM p LIMIT 4", &[])
        .unwrap()
        .collect();
    bdb.set_seed(1234);
    let second: Vec<Vec<Value>> = bdb
        .execute("SIMULATE a, b FROM p LIMIT 4", &[])
        .unwrap()
        .collect();
    assert_eq!(first, second);
}

#[test]
fn test_backend_error_preserves_identity() {
    let bdb = setup();
    let err = bdb
        .execute(
            "CREATE GENERATOR bad FOR p USING diag_gauss(SUBSAMPLE(10))",
            &[],
        )
        .unwrap_err();
    let BqlError::Backend { backend, .. } = err else {
        panic!("expected a backend error, got {err}");
    };
    assert_eq!(backend, "diag_gauss");
    // The failed phrase left no generator behind.
    let err = bdb.execute("ESTIMATE a FROM p MODELED BY bad", &[]).unwrap_err();
    assert!(matches!(err, BqlError::NoSuchGenerator(_)));
}

#[test]
fn test_on_disk_database_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gauss.bdb");
    {
        let bdb = Bdb::open(&path).unwrap();
        bdb.register_backend(Arc::new(DiagGauss::new()));
        bdb.execute_script(
            "CREATE TABLE t (a REAL, b REAL, c REAL);
             CREATE POPULATION p FOR t WITH SCHEMA (MODEL a, b, c AS numerical);
             CREATE GENERATOR g FOR p USING diag_gauss();
             INITIALIZE 1 MODELS FOR g;",
        )
        .unwrap();
        bdb.sql_execute("INSERT INTO t VALUES (1, 2, 3), (2, 4, 6), (3, 6, 9)", &[])
            .unwrap();
    }
    let bdb = Bdb::open(&path).unwrap();
    bdb.register_backend(Arc::new(DiagGauss::new()));
    // Model state is owned by the backend, so a fresh process re-fits.
    bdb.execute("ANALYZE g FOR 0 ITERATIONS", &[]).unwrap();
    let density = scalar(&bdb, "ESTIMATE PROBABILITY DENSITY OF a = 2 FROM p LIMIT 1");
    assert!((density - gauss_pdf(2.0, 2.0, 2.0 / 3.0)).abs() < 1e-9);
}
