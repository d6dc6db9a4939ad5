//! # bayesdb-core
//!
//! The BQL execution engine: a probabilistic database layering the
//! Bayesian Query Language over an embedded SQLite store. BQL extends
//! SQL with predictive probabilities, joint densities, simulation,
//! inference of missing values, and similarity/dependence estimators,
//! delegating the statistical work to pluggable [`backend::Backend`]s.
//!
//! The pipeline: the language crate parses phrases; the compiler lowers
//! probabilistic constructs into SQL calling registered model-operator
//! functions; the [`Bdb`] connection drives the store, the catalog of
//! populations/generators/models, transactions, and cancellation.
//!
//! ```rust,no_run
//! use bayesdb_core::{Bdb, Value};
//!
//! let bdb = Bdb::open("my.bdb")?;
//! // bdb.register_backend(...);
//! let mut cursor = bdb.execute(
//!     "ESTIMATE PROBABILITY DENSITY OF a = ?1 FROM p",
//!     &[Value::Real(2.0)],
//! )?;
//! while let Some(row) = cursor.next_row() {
//!     println!("{row:?}");
//! }
//! # Ok::<(), bayesdb_core::BqlError>(())
//! ```

mod analyze;
pub mod backend;
mod bdb;
mod catalog;
mod compiler;
mod error;
mod mml;
mod operators;
mod schema;
pub mod stats;
mod value;

pub use backend::{
    Backend, BackendError, BackendResult, DataSet, InterruptFlag, PopulationView, VarId,
    VariableView,
};
pub use bdb::{Bdb, Cursor, WIZARD_MODE_VAR};
pub use catalog::{Generator, Population, Variable};
pub use error::{BqlError, Result};
pub use schema::{CURRENT_VERSION, DISABLE_VERSION_CHECK_VAR};
pub use value::Value;
