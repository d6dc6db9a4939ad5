//! Catalog access: populations, variables, generators, models.
//!
//! Reads go through a small per-connection cache keyed by name; every
//! mutation (and any rollback) invalidates it wholesale, so the cache can
//! never outlive the transaction that filled it.

use std::collections::HashMap;

use rusqlite::OptionalExtension;
use tracing::debug;

use crate::backend::{DataSet, PopulationView, VariableView};
use crate::bdb::Bdb;
use crate::error::{BqlError, Result};
use crate::value::Value;

/// A named set of typed variables over one base table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Population {
    /// Catalog id.
    pub id: i64,
    /// Population name.
    pub name: String,
    /// Base table name.
    pub table: String,
}

/// One variable of a population.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    /// Owning population.
    pub population_id: i64,
    /// Set when the variable is latent, added through this generator.
    pub generator_id: Option<i64>,
    /// Stable id; the base-table column number for observed variables,
    /// negative for latent ones.
    pub colno: i64,
    /// Variable name.
    pub name: String,
    /// Statistical type, lowercase.
    pub stattype: String,
}

impl Variable {
    /// True for variables that exist only through one generator.
    #[must_use]
    pub const fn is_latent(&self) -> bool {
        self.generator_id.is_some()
    }
}

/// A named probabilistic model of a population, provided by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generator {
    /// Catalog id.
    pub id: i64,
    /// Generator name.
    pub name: String,
    /// Owning population.
    pub population_id: i64,
    /// Backend name.
    pub backend: String,
    /// Opaque schema blob.
    pub schema: String,
    /// True when this is the default generator of its base table.
    pub defaultp: bool,
}

/// True for statistical types the numerical correlation methods accept.
pub(crate) fn stattype_numericalish(stattype: &str) -> bool {
    matches!(stattype, "numerical" | "count" | "magnitude")
}

/// True for the categorical statistical type.
pub(crate) fn stattype_nominal(stattype: &str) -> bool {
    stattype == "nominal"
}

/// Per-connection name-keyed catalog cache.
#[derive(Debug, Default)]
pub(crate) struct CatalogCache {
    populations: HashMap<String, Population>,
    generators: HashMap<String, Generator>,
}

impl CatalogCache {
    pub(crate) fn clear(&mut self) {
        self.populations.clear();
        self.generators.clear();
    }
}

impl Bdb {
    /// Drops every cached catalog entry.
    pub(crate) fn invalidate_catalog_cache(&self) {
        self.cache.borrow_mut().clear();
        debug!("Catalog cache invalidated");
    }

    /// Returns true if `name` is a table in the store.
    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master
              WHERE type IN ('table', 'view') AND name = ?1 COLLATE NOCASE",
            [name],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    /// The columns of a base table as `(colno, name)` pairs.
    pub(crate) fn table_columns(&self, table: &str) -> Result<Vec<(i64, String)>> {
        if !self.table_exists(table)? {
            return Err(BqlError::NoSuchTable(String::from(table)));
        }
        let mut stmt = self
            .conn
            .prepare("SELECT cid, name FROM pragma_table_info(?1)")?;
        let mut rows = stmt.query([table])?;
        let mut columns = Vec::new();
        while let Some(row) = rows.next()? {
            columns.push((row.get(0)?, row.get(1)?));
        }
        Ok(columns)
    }

    /// Records a table's columns in `bayesdb_column`.
    pub(crate) fn guarantee_columns(&self, table: &str) -> Result<()> {
        for (colno, name) in self.table_columns(table)? {
            self.conn.execute(
                "INSERT OR REPLACE INTO bayesdb_column (tabname, colno, name)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![table, colno, name],
            )?;
        }
        Ok(())
    }

    /// Looks up a population by name.
    pub fn population_by_name(&self, name: &str) -> Result<Population> {
        let key = name.to_lowercase();
        if let Some(p) = self.cache.borrow().populations.get(&key) {
            return Ok(p.clone());
        }
        let found = self
            .conn
            .query_row(
                "SELECT id, name, tabname FROM bayesdb_population
                  WHERE name = ?1 COLLATE NOCASE",
                [name],
                |row| {
                    Ok(Population {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        table: row.get(2)?,
                    })
                },
            )
            .optional()?;
        let population =
            found.ok_or_else(|| BqlError::NoSuchPopulation(String::from(name)))?;
        self.cache
            .borrow_mut()
            .populations
            .insert(key, population.clone());
        Ok(population)
    }

    pub(crate) fn population_by_id(&self, id: i64) -> Result<Population> {
        self.conn
            .query_row(
                "SELECT id, name, tabname FROM bayesdb_population WHERE id = ?1",
                [id],
                |row| {
                    Ok(Population {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        table: row.get(2)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| BqlError::Internal(format!("Dangling population id {id}")))
    }

    /// Looks up a generator by name.
    pub fn generator_by_name(&self, name: &str) -> Result<Generator> {
        let key = name.to_lowercase();
        if let Some(g) = self.cache.borrow().generators.get(&key) {
            return Ok(g.clone());
        }
        let found = self
            .conn
            .query_row(
                "SELECT id, name, population_id, backend, schema_json, defaultp
                   FROM bayesdb_generator WHERE name = ?1 COLLATE NOCASE",
                [name],
                row_to_generator,
            )
            .optional()?;
        let generator = found.ok_or_else(|| BqlError::NoSuchGenerator(String::from(name)))?;
        self.cache
            .borrow_mut()
            .generators
            .insert(key, generator.clone());
        Ok(generator)
    }

    /// All generators of a population, in creation order.
    pub(crate) fn generators_of(&self, population_id: i64) -> Result<Vec<Generator>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, population_id, backend, schema_json, defaultp
               FROM bayesdb_generator WHERE population_id = ?1 ORDER BY id",
        )?;
        let generators = stmt
            .query_map([population_id], row_to_generator)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(generators)
    }

    /// The variables of a population visible through `generator_id`:
    /// observed variables plus that generator's latent ones.
    pub(crate) fn population_variables(
        &self,
        population_id: i64,
        generator_id: Option<i64>,
    ) -> Result<Vec<Variable>> {
        let mut stmt = self.conn.prepare(
            "SELECT population_id, generator_id, colno, name, stattype
               FROM bayesdb_variable
              WHERE population_id = ?1
                AND (generator_id IS NULL OR generator_id = ?2)
              ORDER BY colno",
        )?;
        let variables = stmt
            .query_map(
                rusqlite::params![population_id, generator_id],
                row_to_variable,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(variables)
    }

    /// Resolves a variable by name within a population.
    pub(crate) fn variable_by_name(
        &self,
        population: &Population,
        generator_id: Option<i64>,
        name: &str,
    ) -> Result<Variable> {
        self.conn
            .query_row(
                "SELECT population_id, generator_id, colno, name, stattype
                   FROM bayesdb_variable
                  WHERE population_id = ?1
                    AND (generator_id IS NULL OR generator_id = ?2)
                    AND name = ?3 COLLATE NOCASE",
                rusqlite::params![population.id, generator_id, name],
                row_to_variable,
            )
            .optional()?
            .ok_or_else(|| BqlError::NoSuchVariable {
                population: population.name.clone(),
                name: String::from(name),
            })
    }

    /// The model numbers of a generator, ascending.
    pub(crate) fn model_numbers(&self, generator_id: i64) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT modelno FROM bayesdb_generator_model
              WHERE generator_id = ?1 ORDER BY modelno",
        )?;
        let models = stmt
            .query_map([generator_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(models)
    }

    /// Resolves `MODELED BY` — or, absent one, the base table's default
    /// generator, or the population's only generator.
    pub(crate) fn resolve_generator(
        &self,
        population: &Population,
        modeled_by: Option<&str>,
    ) -> Result<Generator> {
        if let Some(name) = modeled_by {
            let generator = self.generator_by_name(name)?;
            if generator.population_id != population.id {
                return Err(BqlError::Schema(format!(
                    "Generator {} does not model population {}",
                    generator.name, population.name
                )));
            }
            return Ok(generator);
        }

        let generators = self.generators_of(population.id)?;
        match generators.len() {
            0 => Err(BqlError::Schema(format!(
                "Population {} has no generators",
                population.name
            ))),
            1 => Ok(generators.into_iter().next().expect("len checked")),
            _ => generators
                .into_iter()
                .find(|g| g.defaultp)
                .ok_or_else(|| BqlError::AmbiguousDefault(population.table.clone())),
        }
    }

    /// Declares (or clears) the default generator of a base table.
    pub fn set_default_generator(&self, table: &str, generator: Option<&str>) -> Result<()> {
        self.invalidate_catalog_cache();
        self.conn.execute(
            "UPDATE bayesdb_generator SET defaultp = 0
              WHERE population_id IN
                    (SELECT id FROM bayesdb_population
                      WHERE tabname = ?1 COLLATE NOCASE)",
            [table],
        )?;
        if let Some(name) = generator {
            let g = self.generator_by_name(name)?;
            let population = self.population_by_id(g.population_id)?;
            if !population.table.eq_ignore_ascii_case(table) {
                return Err(BqlError::Schema(format!(
                    "Generator {name} does not model table {table}"
                )));
            }
            self.conn.execute(
                "UPDATE bayesdb_generator SET defaultp = 1 WHERE id = ?1",
                [g.id],
            )?;
        }
        Ok(())
    }

    /// The backend-facing view of a population's variables.
    pub(crate) fn population_view(
        &self,
        population: &Population,
        generator_id: Option<i64>,
    ) -> Result<PopulationView> {
        let variables = self
            .population_variables(population.id, generator_id)?
            .into_iter()
            .map(|v| VariableView {
                varno: v.colno,
                name: v.name,
                stattype: v.stattype,
            })
            .collect();
        Ok(PopulationView {
            name: population.name.clone(),
            table: population.table.clone(),
            variables,
        })
    }

    /// Materializes the population's observed data for training.
    pub(crate) fn dataset_for(&self, population: &Population) -> Result<DataSet> {
        let variables: Vec<Variable> = self
            .population_variables(population.id, None)?
            .into_iter()
            .filter(|v| !v.is_latent())
            .collect();
        let cols: Vec<String> = variables
            .iter()
            .map(|v| format!("\"{}\"", v.name.replace('"', "\"\"")))
            .collect();
        let sql = format!(
            "SELECT _rowid_, {} FROM \"{}\" ORDER BY _rowid_",
            cols.join(", "),
            population.table.replace('"', "\"\"")
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        let mut data = DataSet {
            rowids: Vec::new(),
            varnos: variables.iter().map(|v| v.colno).collect(),
            rows: Vec::new(),
        };
        while let Some(row) = rows.next()? {
            data.rowids.push(row.get(0)?);
            let mut values = Vec::with_capacity(variables.len());
            for i in 0..variables.len() {
                values.push(row.get::<_, Value>(i + 1)?);
            }
            data.rows.push(values);
        }
        Ok(data)
    }
}

fn row_to_generator(row: &rusqlite::Row<'_>) -> rusqlite::Result<Generator> {
    Ok(Generator {
        id: row.get(0)?,
        name: row.get(1)?,
        population_id: row.get(2)?,
        backend: row.get(3)?,
        schema: row.get(4)?,
        defaultp: row.get::<_, i64>(5)? != 0,
    })
}

fn row_to_variable(row: &rusqlite::Row<'_>) -> rusqlite::Result<Variable> {
    Ok(Variable {
        population_id: row.get(0)?,
        generator_id: row.get(1)?,
        colno: row.get(2)?,
        name: row.get(3)?,
        stattype: row.get(4)?,
    })
}
