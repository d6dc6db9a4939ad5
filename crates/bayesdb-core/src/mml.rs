//! Execution of model-definition (MML) and DDL phrases.
//!
//! Every handler runs inside a savepoint opened by the connection, so a
//! failure leaves neither catalog rows nor backend registrations behind.

use bayesdb_bql::ast::{
    AlterGeneratorCmd, AlterPopulationCmd, AlterTableCmd, CreateGenerator, CreatePopulation,
    DropModels, Initialize, PopulationClause, Query,
};
use tracing::info;

use crate::bdb::Bdb;
use crate::compiler;
use crate::error::{BqlError, Result};
use crate::value::Value;

fn q(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub(crate) fn create_population(bdb: &Bdb, stmt: &CreatePopulation) -> Result<()> {
    if bdb.population_by_name(&stmt.name).is_ok() {
        if stmt.if_not_exists {
            return Ok(());
        }
        return Err(BqlError::Schema(format!(
            "Population {} already exists",
            stmt.name
        )));
    }
    let columns = bdb.table_columns(&stmt.table)?;

    // Assign a stattype (or an explicit ignore) to every base column.
    let mut assignment: Vec<(i64, String, Option<String>)> = Vec::new();
    let find = |name: &str| -> Result<(i64, String)> {
        columns
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| BqlError::NoSuchColumn {
                table: stmt.table.clone(),
                name: String::from(name),
            })
    };
    for clause in &stmt.clauses {
        match clause {
            PopulationClause::Model { columns, stattype } => {
                for name in columns {
                    let (colno, canonical) = find(name)?;
                    push_assignment(
                        &mut assignment,
                        colno,
                        canonical,
                        Some(stattype.to_lowercase()),
                    )?;
                }
            }
            PopulationClause::Ignore { columns } => {
                for name in columns {
                    let (colno, canonical) = find(name)?;
                    push_assignment(&mut assignment, colno, canonical, None)?;
                }
            }
        }
    }

    let unaccounted: Vec<String> = columns
        .iter()
        .filter(|(colno, _)| !assignment.iter().any(|(c, _, _)| c == colno))
        .map(|(_, name)| name.clone())
        .collect();
    if !unaccounted.is_empty() {
        return Err(BqlError::Schema(format!(
            "Columns not accounted for by the population schema: {}",
            unaccounted.join(", ")
        )));
    }

    bdb.invalidate_catalog_cache();
    bdb.conn.execute(
        "INSERT INTO bayesdb_population (name, tabname) VALUES (?1, ?2)",
        rusqlite::params![stmt.name, stmt.table],
    )?;
    let population_id = bdb.conn.last_insert_rowid();
    for (colno, name, stattype) in assignment {
        if let Some(stattype) = stattype {
            bdb.conn.execute(
                "INSERT INTO bayesdb_variable
                     (population_id, generator_id, colno, name, stattype)
                 VALUES (?1, NULL, ?2, ?3, ?4)",
                rusqlite::params![population_id, colno, name, stattype],
            )?;
        }
    }
    bdb.guarantee_columns(&stmt.table)?;
    info!(population = %stmt.name, table = %stmt.table, "Created population");
    Ok(())
}

fn push_assignment(
    assignment: &mut Vec<(i64, String, Option<String>)>,
    colno: i64,
    name: String,
    stattype: Option<String>,
) -> Result<()> {
    if assignment.iter().any(|(c, _, _)| *c == colno) {
        return Err(BqlError::Schema(format!(
            "Column {name} appears twice in the population schema"
        )));
    }
    assignment.push((colno, name, stattype));
    Ok(())
}

pub(crate) fn alter_population(
    bdb: &Bdb,
    population_name: &str,
    commands: &[AlterPopulationCmd],
) -> Result<()> {
    let mut population = bdb.population_by_name(population_name)?;
    bdb.invalidate_catalog_cache();
    for command in commands {
        match command {
            AlterPopulationCmd::AddVariable { name, stattype } => {
                let columns = bdb.table_columns(&population.table)?;
                let (colno, canonical) = columns
                    .iter()
                    .find(|(_, n)| n.eq_ignore_ascii_case(name))
                    .cloned()
                    .ok_or_else(|| BqlError::NoSuchColumn {
                        table: population.table.clone(),
                        name: name.clone(),
                    })?;
                if bdb
                    .variable_by_name(&population, None, &canonical)
                    .is_ok()
                {
                    return Err(BqlError::Schema(format!(
                        "Variable {canonical} already exists in population {}",
                        population.name
                    )));
                }
                bdb.conn.execute(
                    "INSERT INTO bayesdb_variable
                         (population_id, generator_id, colno, name, stattype)
                     VALUES (?1, NULL, ?2, ?3, ?4)",
                    rusqlite::params![
                        population.id,
                        colno,
                        canonical,
                        stattype.to_lowercase()
                    ],
                )?;
            }
            AlterPopulationCmd::SetStattypes { columns, stattype } => {
                for name in columns {
                    let variable = bdb.variable_by_name(&population, None, name)?;
                    bdb.conn.execute(
                        "UPDATE bayesdb_variable SET stattype = ?1
                          WHERE population_id = ?2 AND colno = ?3",
                        rusqlite::params![
                            stattype.to_lowercase(),
                            population.id,
                            variable.colno
                        ],
                    )?;
                }
            }
            AlterPopulationCmd::RenameTo(new_name) => {
                bdb.conn.execute(
                    "UPDATE bayesdb_population SET name = ?1 WHERE id = ?2",
                    rusqlite::params![new_name, population.id],
                )?;
                population.name = new_name.clone();
            }
        }
    }
    Ok(())
}

pub(crate) fn drop_population(bdb: &Bdb, if_exists: bool, name: &str) -> Result<()> {
    let population = match bdb.population_by_name(name) {
        Ok(p) => p,
        Err(BqlError::NoSuchPopulation(_)) if if_exists => return Ok(()),
        Err(e) => return Err(e),
    };
    let generators = bdb.generators_of(population.id)?;
    if !generators.is_empty() {
        return Err(BqlError::Schema(format!(
            "Population {} still has generators: {}",
            population.name,
            generators
                .iter()
                .map(|g| g.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }
    bdb.invalidate_catalog_cache();
    bdb.conn.execute(
        "DELETE FROM bayesdb_variable WHERE population_id = ?1",
        [population.id],
    )?;
    bdb.conn.execute(
        "DELETE FROM bayesdb_population WHERE id = ?1",
        [population.id],
    )?;
    info!(population = %population.name, "Dropped population");
    Ok(())
}

pub(crate) fn create_generator(bdb: &Bdb, stmt: &CreateGenerator) -> Result<()> {
    if bdb.generator_by_name(&stmt.name).is_ok() {
        if stmt.if_not_exists {
            return Ok(());
        }
        return Err(BqlError::Schema(format!(
            "Generator {} already exists",
            stmt.name
        )));
    }
    let population = bdb.population_by_name(&stmt.population)?;
    let backend = bdb.backend_by_name(&stmt.backend)?;

    bdb.invalidate_catalog_cache();
    bdb.conn.execute(
        "INSERT INTO bayesdb_generator (name, population_id, backend, schema_json)
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![stmt.name, population.id, stmt.backend, stmt.schema],
    )?;
    let generator_id = bdb.conn.last_insert_rowid();
    let view = bdb.population_view(&population, Some(generator_id))?;
    backend
        .create_generator(generator_id, &stmt.schema, &view)
        .map_err(|e| BqlError::Backend {
            backend: e.backend,
            message: e.message,
        })?;
    bdb.bind_backend_instance(generator_id, backend);
    info!(generator = %stmt.name, backend = %stmt.backend, "Created generator");
    Ok(())
}

pub(crate) fn alter_generator(
    bdb: &Bdb,
    generator_name: &str,
    commands: &[AlterGeneratorCmd],
) -> Result<()> {
    let generator = bdb.generator_by_name(generator_name)?;
    bdb.invalidate_catalog_cache();
    for command in commands {
        match command {
            AlterGeneratorCmd::RenameTo(new_name) => {
                bdb.conn.execute(
                    "UPDATE bayesdb_generator SET name = ?1 WHERE id = ?2",
                    rusqlite::params![new_name, generator.id],
                )?;
            }
        }
    }
    Ok(())
}

pub(crate) fn drop_generator(bdb: &Bdb, if_exists: bool, name: &str) -> Result<()> {
    let generator = match bdb.generator_by_name(name) {
        Ok(g) => g,
        Err(BqlError::NoSuchGenerator(_)) if if_exists => return Ok(()),
        Err(e) => return Err(e),
    };
    let backend = bdb.bind_generator(&generator)?;
    let models = bdb.model_numbers(generator.id)?;
    if !models.is_empty() {
        backend
            .drop_models(generator.id, &models)
            .map_err(|e| BqlError::Backend {
                backend: e.backend,
                message: e.message,
            })?;
    }
    backend
        .drop_generator(generator.id)
        .map_err(|e| BqlError::Backend {
            backend: e.backend,
            message: e.message,
        })?;
    bdb.invalidate_catalog_cache();
    bdb.unbind_backend_instance(generator.id);
    // Model rows go with the generator via the cascading foreign key.
    bdb.conn.execute(
        "DELETE FROM bayesdb_generator WHERE id = ?1",
        [generator.id],
    )?;
    info!(generator = %generator.name, "Dropped generator");
    Ok(())
}

pub(crate) fn initialize_models(bdb: &Bdb, stmt: &Initialize) -> Result<()> {
    let generator = bdb.generator_by_name(&stmt.generator)?;
    let backend = bdb.bind_generator(&generator)?;
    let existing = bdb.model_numbers(generator.id)?;

    let requested: Vec<i64> = (0..i64::from(stmt.n_models)).collect();
    let new: Vec<i64> = requested
        .iter()
        .copied()
        .filter(|m| !existing.contains(m))
        .collect();
    if new.len() < requested.len() && !stmt.if_not_exists {
        return Err(BqlError::Schema(format!(
            "Generator {} already has initialized models",
            generator.name
        )));
    }
    if new.is_empty() {
        return Ok(());
    }

    bdb.invalidate_catalog_cache();
    for &modelno in &new {
        bdb.conn.execute(
            "INSERT INTO bayesdb_generator_model (generator_id, modelno, iterations)
             VALUES (?1, ?2, 0)",
            rusqlite::params![generator.id, modelno],
        )?;
    }
    backend
        .initialize_models(generator.id, &new)
        .map_err(|e| BqlError::Backend {
            backend: e.backend,
            message: e.message,
        })?;
    info!(generator = %generator.name, n = new.len(), "Initialized models");
    Ok(())
}

pub(crate) fn drop_models(bdb: &Bdb, stmt: &DropModels) -> Result<()> {
    let generator = bdb.generator_by_name(&stmt.generator)?;
    let backend = bdb.bind_generator(&generator)?;
    let existing = bdb.model_numbers(generator.id)?;

    let doomed: Vec<i64> = match &stmt.models {
        None => existing.clone(),
        Some(ranges) => {
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
            models
        }
    };
    if doomed.is_empty() {
        return Ok(());
    }

    backend
        .drop_models(generator.id, &doomed)
        .map_err(|e| BqlError::Backend {
            backend: e.backend,
            message: e.message,
        })?;
    bdb.invalidate_catalog_cache();
    for &modelno in &doomed {
        bdb.conn.execute(
            "DELETE FROM bayesdb_generator_model
              WHERE generator_id = ?1 AND modelno = ?2",
            rusqlite::params![generator.id, modelno],
        )?;
    }
    info!(generator = %generator.name, n = doomed.len(), "Dropped models");
    Ok(())
}

// ---- tables ----

pub(crate) fn create_table_as(
    bdb: &Bdb,
    temp: bool,
    if_not_exists: bool,
    name: &str,
    query: &Query,
    params: &[Value],
) -> Result<()> {
    let compiled = compiler::compile_query(bdb, query)?;
    bdb.run_preludes(&compiled.preludes, params)?;
    let sql = format!(
        "CREATE {}TABLE {}{} AS {}",
        if temp { "TEMP " } else { "" },
        if if_not_exists { "IF NOT EXISTS " } else { "" },
        q(name),
        compiled.sql
    );
    let result = bdb.execute_sql_with_params(&sql, params);
    bdb.drop_temp_tables(&compiled.temp_tables);
    result?;
    if !temp {
        bdb.guarantee_columns(name)?;
    }
    Ok(())
}

pub(crate) fn create_table(
    bdb: &Bdb,
    temp: bool,
    if_not_exists: bool,
    name: &str,
    defs: &str,
) -> Result<()> {
    let sql = format!(
        "CREATE {}TABLE {}{} ({defs})",
        if temp { "TEMP " } else { "" },
        if if_not_exists { "IF NOT EXISTS " } else { "" },
        q(name),
    );
    bdb.conn.execute_batch(&sql)?;
    if !temp {
        bdb.guarantee_columns(name)?;
    }
    Ok(())
}

pub(crate) fn drop_table(bdb: &Bdb, if_exists: bool, name: &str) -> Result<()> {
    if !bdb.table_exists(name)? {
        if if_exists {
            return Ok(());
        }
        return Err(BqlError::NoSuchTable(String::from(name)));
    }
    let populations: i64 = bdb.conn.query_row(
        "SELECT COUNT(*) FROM bayesdb_population WHERE tabname = ?1 COLLATE NOCASE",
        [name],
        |row| row.get(0),
    )?;
    if populations > 0 {
        return Err(BqlError::Schema(format!(
            "Table {name} still has populations"
        )));
    }
    bdb.invalidate_catalog_cache();
    bdb.conn.execute_batch(&format!("DROP TABLE {}", q(name)))?;
    bdb.conn.execute(
        "DELETE FROM bayesdb_column WHERE tabname = ?1 COLLATE NOCASE",
        [name],
    )?;
    Ok(())
}

pub(crate) fn alter_table(bdb: &Bdb, table: &str, commands: &[AlterTableCmd]) -> Result<()> {
    let mut current = String::from(table);
    for command in commands {
        match command {
            AlterTableCmd::RenameTo(new_name) => {
                if !bdb.table_exists(&current)? {
                    return Err(BqlError::NoSuchTable(current));
                }
                bdb.invalidate_catalog_cache();
                bdb.conn.execute_batch(&format!(
                    "ALTER TABLE {} RENAME TO {}",
                    q(&current),
                    q(new_name)
                ))?;
                // Rename propagates through the catalog atomically; the
                // enclosing savepoint makes it all-or-nothing.
                bdb.conn.execute(
                    "UPDATE bayesdb_population SET tabname = ?1
                      WHERE tabname = ?2 COLLATE NOCASE",
                    rusqlite::params![new_name, current],
                )?;
                bdb.conn.execute(
                    "UPDATE bayesdb_column SET tabname = ?1
                      WHERE tabname = ?2 COLLATE NOCASE",
                    rusqlite::params![new_name, current],
                )?;
                current = new_name.clone();
            }
        }
    }
    Ok(())
}
