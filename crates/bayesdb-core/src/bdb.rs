//! The BQL database connection.
//!
//! A [`Bdb`] wraps one store connection, the per-connection catalog
//! cache, the transaction bookkeeping, and the state shared with the
//! model operators. Access is single-threaded and cooperative: the only
//! blocking points are store I/O and backend calls, and cancellation is
//! polled between result rows and between analysis chunks.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

use bayesdb_bql::ast::{Phrase, Query};
use bayesdb_bql::Parser;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::analyze;
use crate::backend::{Backend, InterruptFlag};
use crate::catalog::{CatalogCache, Generator};
use crate::compiler::{self, CompiledQuery, Prelude, SimulatePlan};
use crate::error::{BqlError, Result};
use crate::mml;
use crate::schema;
use crate::value::Value;

/// Environment variable enabling experimental constructs.
pub const WIZARD_MODE_VAR: &str = "BAYESDB_WIZARD_MODE";

/// State shared between the connection and its registered operators.
#[derive(Default)]
pub(crate) struct SharedState {
    /// Backends by registration name.
    pub backends: Mutex<HashMap<String, Arc<dyn Backend>>>,
    /// Backend bound to each generator id.
    pub instances: Mutex<HashMap<i64, Arc<dyn Backend>>>,
    /// Interned model sets; operators receive an index into this table.
    pub model_sets: Mutex<Vec<Vec<i64>>>,
    /// Per-statement memo pairing PREDICT values with confidences.
    pub predict_cache: Mutex<HashMap<(i64, i64, i64, i64), (Value, f64)>>,
    /// Per-statement correlation results keyed (population, c0, c1).
    pub correlations: Mutex<HashMap<(i64, i64, i64), (Option<f64>, Option<f64>)>>,
    /// Cooperative cancellation flag.
    pub interrupt: InterruptFlag,
}

/// A BQL database connection.
pub struct Bdb {
    pub(crate) conn: Connection,
    pub(crate) state: Arc<SharedState>,
    pub(crate) cache: RefCell<CatalogCache>,
    txn_active: Cell<bool>,
    savepoint_counter: Cell<u64>,
    temp_counter: Cell<u64>,
    wizard: bool,
}

impl Bdb {
    /// Opens (or creates) a database file.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be opened or carries a newer catalog
    /// schema than this binary supports.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Opens a transient in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        let check_version = std::env::var_os(schema::DISABLE_VERSION_CHECK_VAR).is_none();
        schema::ensure_schema(&conn, check_version)?;
        let state = Arc::new(SharedState::default());
        crate::operators::register_operators(&conn, &state)?;
        let wizard = std::env::var_os(WIZARD_MODE_VAR)
            .is_some_and(|v| !v.is_empty() && v != "0");
        Ok(Self {
            conn,
            state,
            cache: RefCell::new(CatalogCache::default()),
            txn_active: Cell::new(false),
            savepoint_counter: Cell::new(0),
            temp_counter: Cell::new(0),
            wizard,
        })
    }

    /// True when experimental constructs are enabled.
    #[must_use]
    pub const fn wizard_mode(&self) -> bool {
        self.wizard
    }

    /// Closes the connection, reporting any failure to flush.
    ///
    /// # Errors
    ///
    /// Returns the store's error; the connection is gone either way.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| BqlError::Sqlite(e))
    }

    /// A handle that cancels the connection's current work when set.
    #[must_use]
    pub fn interrupt_handle(&self) -> InterruptFlag {
        self.state.interrupt.clone()
    }

    /// Registers a backend under its own name.
    pub fn register_backend(&self, backend: Arc<dyn Backend>) {
        let name = String::from(backend.name());
        info!(backend = %name, "Registered backend");
        self.state
            .backends
            .lock()
            .expect("backends lock")
            .insert(name, backend);
    }

    /// Reseeds every registered backend.
    pub fn set_seed(&self, seed: u64) {
        for backend in self
            .state
            .backends
            .lock()
            .expect("backends lock")
            .values()
        {
            backend.set_seed(seed);
        }
    }

    pub(crate) fn backend_by_name(&self, name: &str) -> Result<Arc<dyn Backend>> {
        self.state
            .backends
            .lock()
            .expect("backends lock")
            .get(name)
            .cloned()
            .ok_or_else(|| BqlError::NoSuchBackend(String::from(name)))
    }

    pub(crate) fn bind_backend_instance(&self, generator_id: i64, backend: Arc<dyn Backend>) {
        self.state
            .instances
            .lock()
            .expect("instances lock")
            .insert(generator_id, backend);
    }

    pub(crate) fn unbind_backend_instance(&self, generator_id: i64) {
        self.state
            .instances
            .lock()
            .expect("instances lock")
            .remove(&generator_id);
    }

    /// Ensures the generator's backend is bound for the operators.
    ///
    /// The first binding on a connection re-announces a generator loaded
    /// from the catalog — model state is backend-owned and in-memory, so
    /// a reopened database starts from declared-but-unanalyzed models.
    pub(crate) fn bind_generator(&self, generator: &Generator) -> Result<Arc<dyn Backend>> {
        if let Some(backend) = self
            .state
            .instances
            .lock()
            .expect("instances lock")
            .get(&generator.id)
        {
            return Ok(Arc::clone(backend));
        }
        let backend = self.backend_by_name(&generator.backend)?;
        let population = self.population_by_id(generator.population_id)?;
        let view = self.population_view(&population, Some(generator.id))?;
        backend
            .create_generator(generator.id, &generator.schema, &view)
            .map_err(|e| BqlError::Backend {
                backend: e.backend,
                message: e.message,
            })?;
        let models = self.model_numbers(generator.id)?;
        if !models.is_empty() {
            backend
                .initialize_models(generator.id, &models)
                .map_err(|e| BqlError::Backend {
                    backend: e.backend,
                    message: e.message,
                })?;
        }
        self.bind_backend_instance(generator.id, Arc::clone(&backend));
        Ok(backend)
    }

    /// Interns a model set and returns the index operators receive.
    pub(crate) fn intern_model_set(&self, models: Vec<i64>) -> i64 {
        let mut sets = self.state.model_sets.lock().expect("model_sets lock");
        if let Some(i) = sets.iter().position(|s| *s == models) {
            return i64::try_from(i).expect("set index fits");
        }
        sets.push(models);
        i64::try_from(sets.len() - 1).expect("set index fits")
    }

    /// The models behind an interned set index.
    pub(crate) fn model_set(&self, id: i64) -> Vec<i64> {
        self.state
            .model_sets
            .lock()
            .expect("model_sets lock")
            .get(usize::try_from(id).expect("valid set index"))
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn next_temp_table(&self, prefix: &str) -> String {
        let n = self.temp_counter.get();
        self.temp_counter.set(n + 1);
        format!("{prefix}_{n}")
    }

    // ---- transactions ----

    /// True while a user `BEGIN` is open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.txn_active.get()
    }

    fn begin_transaction(&self) -> Result<()> {
        if self.txn_active.get() {
            return Err(BqlError::Transaction(String::from(
                "Already in a transaction",
            )));
        }
        self.conn.execute_batch("BEGIN")?;
        self.txn_active.set(true);
        Ok(())
    }

    fn commit_transaction(&self) -> Result<()> {
        if !self.txn_active.get() {
            return Err(BqlError::Transaction(String::from("No transaction is open")));
        }
        self.conn.execute_batch("COMMIT")?;
        self.txn_active.set(false);
        Ok(())
    }

    fn rollback_transaction(&self) -> Result<()> {
        if !self.txn_active.get() {
            return Err(BqlError::Transaction(String::from("No transaction is open")));
        }
        self.conn.execute_batch("ROLLBACK")?;
        self.txn_active.set(false);
        self.invalidate_catalog_cache();
        Ok(())
    }

    /// Runs `f` inside a savepoint; on error the savepoint (and the
    /// catalog cache) is rolled back.
    pub(crate) fn with_savepoint<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        let n = self.savepoint_counter.get();
        self.savepoint_counter.set(n + 1);
        let name = format!("bayesdb_sp_{n}");
        self.conn.execute_batch(&format!("SAVEPOINT {name}"))?;
        match f(self) {
            Ok(value) => {
                self.conn.execute_batch(&format!("RELEASE {name}"))?;
                Ok(value)
            }
            Err(e) => {
                let _ = self
                    .conn
                    .execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name}"));
                self.invalidate_catalog_cache();
                Err(e)
            }
        }
    }

    fn cancelled(&self) -> BqlError {
        self.state.interrupt.clear();
        if self.txn_active.get() {
            let _ = self.rollback_transaction();
        }
        BqlError::Cancelled
    }

    // ---- execution ----

    /// Executes exactly one BQL phrase and returns a cursor over its
    /// results (empty for non-queries).
    ///
    /// # Errors
    ///
    /// Any failure aborts the phrase without partial effects; only the
    /// enclosing user transaction, if any, stays open.
    pub fn execute(&self, bql: &str, params: &[Value]) -> Result<Cursor> {
        let mut parser = Parser::new(bql);
        let phrase = loop {
            match parser.parse_phrase()? {
                None => {
                    return Err(BqlError::Schema(String::from(
                        "No BQL phrase to execute",
                    )))
                }
                Some(Phrase::Empty) => continue,
                Some(phrase) => break phrase,
            }
        };
        let n_params = parser.params().len();
        // Only empty phrases may follow.
        loop {
            match parser.parse_phrase()? {
                None => break,
                Some(Phrase::Empty) => continue,
                Some(_) => {
                    return Err(BqlError::Schema(String::from(
                        "execute takes one phrase; use execute_script for several",
                    )))
                }
            }
        }
        if params.len() != n_params {
            return Err(BqlError::ParameterCount {
                expected: n_params,
                got: params.len(),
            });
        }
        self.execute_phrase(&phrase, params)
    }

    /// Executes a script of phrases, none of which may take parameters.
    ///
    /// # Errors
    ///
    /// Stops at the first failing phrase.
    pub fn execute_script(&self, bql: &str) -> Result<()> {
        let mut parser = Parser::new(bql);
        while let Some(phrase) = parser.parse_phrase()? {
            if parser.params().len() != 0 {
                return Err(BqlError::ParameterCount {
                    expected: parser.params().len(),
                    got: 0,
                });
            }
            self.execute_phrase(&phrase, &[])?;
        }
        Ok(())
    }

    fn execute_phrase(&self, phrase: &Phrase, params: &[Value]) -> Result<Cursor> {
        if self.state.interrupt.is_set() {
            return Err(self.cancelled());
        }
        match phrase {
            Phrase::Empty => Ok(Cursor::empty()),
            Phrase::Begin => self.begin_transaction().map(|()| Cursor::empty()),
            Phrase::Commit => self.commit_transaction().map(|()| Cursor::empty()),
            Phrase::Rollback => self.rollback_transaction().map(|()| Cursor::empty()),

            Phrase::Query(query) => self.run_query(query, params),

            Phrase::Analyze(stmt) => {
                analyze::run_analyze(self, stmt).map(|()| Cursor::empty())
            }

            Phrase::CreateTableAs {
                temp,
                if_not_exists,
                name,
                query,
            } => self
                .with_savepoint(|bdb| {
                    mml::create_table_as(bdb, *temp, *if_not_exists, name, query, params)
                })
                .map(|()| Cursor::empty()),
            Phrase::CreateTable {
                temp,
                if_not_exists,
                name,
                defs,
            } => self
                .with_savepoint(|bdb| mml::create_table(bdb, *temp, *if_not_exists, name, defs))
                .map(|()| Cursor::empty()),
            Phrase::DropTable { if_exists, name } => self
                .with_savepoint(|bdb| mml::drop_table(bdb, *if_exists, name))
                .map(|()| Cursor::empty()),
            Phrase::AlterTable { table, commands } => self
                .with_savepoint(|bdb| mml::alter_table(bdb, table, commands))
                .map(|()| Cursor::empty()),

            Phrase::CreatePopulation(stmt) => self
                .with_savepoint(|bdb| mml::create_population(bdb, stmt))
                .map(|()| Cursor::empty()),
            Phrase::AlterPopulation(stmt) => self
                .with_savepoint(|bdb| mml::alter_population(bdb, &stmt.population, &stmt.commands))
                .map(|()| Cursor::empty()),
            Phrase::DropPopulation { if_exists, name } => self
                .with_savepoint(|bdb| mml::drop_population(bdb, *if_exists, name))
                .map(|()| Cursor::empty()),
            Phrase::CreateGenerator(stmt) => self
                .with_savepoint(|bdb| mml::create_generator(bdb, stmt))
                .map(|()| Cursor::empty()),
            Phrase::AlterGenerator(stmt) => self
                .with_savepoint(|bdb| mml::alter_generator(bdb, &stmt.generator, &stmt.commands))
                .map(|()| Cursor::empty()),
            Phrase::DropGenerator { if_exists, name } => self
                .with_savepoint(|bdb| mml::drop_generator(bdb, *if_exists, name))
                .map(|()| Cursor::empty()),
            Phrase::Initialize(stmt) => self
                .with_savepoint(|bdb| mml::initialize_models(bdb, stmt))
                .map(|()| Cursor::empty()),
            Phrase::DropModels(stmt) => self
                .with_savepoint(|bdb| mml::drop_models(bdb, stmt))
                .map(|()| Cursor::empty()),
        }
    }

    /// Runs raw SQL directly against the store, bypassing BQL. Intended
    /// for loading and inspecting base-table data.
    ///
    /// # Errors
    ///
    /// Surfaces store errors unchanged.
    pub fn sql_execute(&self, sql: &str, params: &[Value]) -> Result<Cursor> {
        self.fetch_all(sql, params)
    }

    fn run_query(&self, query: &Query, params: &[Value]) -> Result<Cursor> {
        // Statement-scoped operator state starts fresh.
        self.state
            .predict_cache
            .lock()
            .expect("predict cache lock")
            .clear();
        self.state
            .correlations
            .lock()
            .expect("correlations lock")
            .clear();

        let compiled: CompiledQuery = compiler::compile_query(self, query)?;
        self.run_preludes(&compiled.preludes, params)?;
        let result = self.fetch_all(&compiled.sql, params);
        self.drop_temp_tables(&compiled.temp_tables);
        result
    }

    pub(crate) fn run_preludes(&self, preludes: &[Prelude], params: &[Value]) -> Result<()> {
        for prelude in preludes {
            match prelude {
                Prelude::Correlations {
                    population_id,
                    table,
                    pairs,
                } => self.load_correlations(*population_id, table, pairs)?,
                Prelude::Simulate(plan) => self.run_simulate(plan, params)?,
            }
        }
        Ok(())
    }

    fn run_simulate(&self, plan: &SimulatePlan, params: &[Value]) -> Result<()> {
        let limit = self
            .eval_scalar(&plan.limit_sql, params)?
            .as_i64()
            .ok_or_else(|| {
                BqlError::Schema(String::from("SIMULATE LIMIT must be an integer"))
            })?;
        if limit < 0 {
            return Err(BqlError::Schema(format!(
                "SIMULATE LIMIT must be nonnegative, got {limit}"
            )));
        }

        let mut constraints = Vec::with_capacity(plan.givens.len());
        for (varno, value_sql) in &plan.givens {
            let value = self.eval_scalar(value_sql, params)?;
            if !value.is_null() {
                constraints.push((*varno, value));
            }
        }

        let backend = self
            .state
            .instances
            .lock()
            .expect("instances lock")
            .get(&plan.generator_id)
            .cloned()
            .ok_or_else(|| {
                BqlError::Internal(format!(
                    "Generator {} has no bound backend",
                    plan.generator_id
                ))
            })?;
        let rows = backend
            .simulate_joint(
                plan.generator_id,
                &plan.model_ids,
                &plan.varnos,
                &constraints,
                usize::try_from(limit).expect("nonnegative limit"),
            )
            .map_err(|e| BqlError::Backend {
                backend: e.backend,
                message: e.message,
            })?;

        let columns: Vec<String> = plan
            .columns
            .iter()
            .map(|c| format!("\"{}\"", c.replace('"', "\"\"")))
            .collect();
        self.conn.execute_batch(&format!(
            "CREATE TEMP TABLE \"{}\" ({})",
            plan.temp_table.replace('"', "\"\""),
            columns.join(", ")
        ))?;
        let placeholders: Vec<String> =
            (1..=plan.columns.len()).map(|i| format!("?{i}")).collect();
        let insert = format!(
            "INSERT INTO temp.\"{}\" VALUES ({})",
            plan.temp_table.replace('"', "\"\""),
            placeholders.join(", ")
        );
        let mut stmt = self.conn.prepare(&insert)?;
        for row in &rows {
            if self.state.interrupt.is_set() {
                drop(stmt);
                return Err(self.cancelled());
            }
            if row.len() != plan.columns.len() {
                return Err(BqlError::Internal(format!(
                    "Backend simulated {} values for {} targets",
                    row.len(),
                    plan.columns.len()
                )));
            }
            stmt.execute(rusqlite::params_from_iter(row.iter()))?;
        }
        debug!(rows = rows.len(), table = %plan.temp_table, "Materialized simulation");
        Ok(())
    }

    pub(crate) fn drop_temp_tables(&self, names: &[String]) {
        for name in names {
            let _ = self.conn.execute_batch(&format!(
                "DROP TABLE IF EXISTS temp.\"{}\"",
                name.replace('"', "\"\"")
            ));
        }
    }

    /// Evaluates one scalar SQL expression with the phrase's parameters.
    pub(crate) fn eval_scalar(&self, expr_sql: &str, params: &[Value]) -> Result<Value> {
        let sql = format!("SELECT {expr_sql}");
        let mut stmt = self.conn.prepare(&sql)?;
        self.bind_params(&mut stmt, params)?;
        let mut rows = stmt.raw_query();
        let row = rows
            .next()?
            .ok_or_else(|| BqlError::Internal(String::from("Scalar query returned no row")))?;
        Ok(row.get(0)?)
    }

    /// Runs arbitrary SQL (no result rows) with the phrase's parameters.
    pub(crate) fn execute_sql_with_params(&self, sql: &str, params: &[Value]) -> Result<()> {
        let mut stmt = self.conn.prepare(sql)?;
        self.bind_params(&mut stmt, params)?;
        stmt.raw_execute()?;
        Ok(())
    }

    fn bind_params(&self, stmt: &mut rusqlite::Statement<'_>, params: &[Value]) -> Result<()> {
        let wanted = stmt.parameter_count();
        if wanted > params.len() {
            return Err(BqlError::ParameterCount {
                expected: wanted,
                got: params.len(),
            });
        }
        for i in 1..=wanted {
            stmt.raw_bind_parameter(i, &params[i - 1])?;
        }
        Ok(())
    }

    fn fetch_all(&self, sql: &str, params: &[Value]) -> Result<Cursor> {
        debug!(sql = %sql, "Running compiled SQL");
        let mut stmt = self.conn.prepare(sql)?;
        self.bind_params(&mut stmt, params)?;
        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();
        let n_columns = columns.len();

        let mut buffered = VecDeque::new();
        let mut rows = stmt.raw_query();
        loop {
            if self.state.interrupt.is_set() {
                drop(rows);
                return Err(self.cancelled());
            }
            let Some(row) = rows.next()? else { break };
            let mut values = Vec::with_capacity(n_columns);
            for i in 0..n_columns {
                values.push(row.get::<_, Value>(i)?);
            }
            buffered.push_back(values);
        }
        Ok(Cursor {
            columns,
            rows: buffered,
        })
    }
}

/// A cursor over the rows of one executed phrase.
///
/// Rows were fetched under the interrupt flag; iterating the cursor
/// itself never touches the store again.
#[derive(Debug, Default)]
pub struct Cursor {
    columns: Vec<String>,
    rows: VecDeque<Vec<Value>>,
}

impl Cursor {
    pub(crate) fn empty() -> Self {
        Self::default()
    }

    /// The output column names.
    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    /// Remaining row count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when no rows remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Takes the next row.
    pub fn next_row(&mut self) -> Option<Vec<Value>> {
        self.rows.pop_front()
    }
}

impl Iterator for Cursor {
    type Item = Vec<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row()
    }
}
