//! The ANALYZE driver.
//!
//! Training runs in chunks bounded by the checkpoint clause; each chunk's
//! catalog bookkeeping commits on its own, so an interrupt loses at most
//! one chunk of work. ANALYZE manages its own transactions and therefore
//! refuses to run inside a user transaction. The driver always makes at
//! least one backend call, so a zero budget still admits a closed-form
//! fit.

use std::time::{Duration, Instant};

use bayesdb_bql::ast::{Analyze, TimeUnit};
use tracing::{debug, info};

use crate::bdb::Bdb;
use crate::compiler::resolve_model_set;
use crate::error::{BqlError, Result};

pub(crate) fn run_analyze(bdb: &Bdb, stmt: &Analyze) -> Result<()> {
    if bdb.in_transaction() {
        return Err(BqlError::Transaction(String::from(
            "ANALYZE cannot run inside a transaction",
        )));
    }

    let generator = bdb.generator_by_name(&stmt.generator)?;
    let backend = bdb.bind_generator(&generator)?;
    let models = resolve_model_set(bdb, &generator, stmt.models.as_deref())?;
    let population = bdb.population_by_id(generator.population_id)?;
    let data = bdb.dataset_for(&population)?;
    let interrupt = bdb.interrupt_handle();
    let program = stmt.program.as_deref();

    let chunk_iterations = match &stmt.checkpoint {
        Some(cp) if cp.unit == TimeUnit::Iterations => cp.amount.max(1),
        _ => match stmt.budget.unit {
            TimeUnit::Iterations => stmt.budget.amount.max(1),
            // Time budgets without an iteration checkpoint commit after
            // every round.
            TimeUnit::Seconds | TimeUnit::Minutes => 1,
        },
    };
    let deadline = match stmt.budget.unit {
        TimeUnit::Iterations => None,
        TimeUnit::Seconds => Some(Duration::from_secs(stmt.budget.amount)),
        TimeUnit::Minutes => Some(Duration::from_secs(stmt.budget.amount * 60)),
    };

    info!(
        generator = %generator.name,
        models = models.len(),
        budget = stmt.budget.amount,
        "Analyzing models"
    );

    let started = Instant::now();
    let mut done: u64 = 0;
    loop {
        if interrupt.is_set() {
            interrupt.clear();
            return Err(BqlError::Cancelled);
        }

        let chunk = match stmt.budget.unit {
            TimeUnit::Iterations => {
                chunk_iterations.min(stmt.budget.amount.saturating_sub(done))
            }
            TimeUnit::Seconds | TimeUnit::Minutes => chunk_iterations,
        };

        bdb.with_savepoint(|bdb| {
            backend
                .analyze_models(generator.id, &models, &data, chunk, program, &interrupt)
                .map_err(|e| BqlError::Backend {
                    backend: e.backend,
                    message: e.message,
                })?;
            let model_list: Vec<String> = models.iter().map(ToString::to_string).collect();
            bdb.conn.execute(
                &format!(
                    "UPDATE bayesdb_generator_model
                        SET iterations = iterations + ?1
                      WHERE generator_id = ?2 AND modelno IN ({})",
                    model_list.join(", ")
                ),
                rusqlite::params![i64::try_from(chunk).unwrap_or(i64::MAX), generator.id],
            )?;
            Ok(())
        })?;
        done += chunk;
        debug!(iterations = done, "Analysis checkpoint");

        match deadline {
            None => {
                if done >= stmt.budget.amount {
                    break;
                }
            }
            Some(limit) => {
                if started.elapsed() >= limit {
                    break;
                }
            }
        }
    }

    info!(generator = %generator.name, iterations = done, "Analysis finished");
    Ok(())
}
