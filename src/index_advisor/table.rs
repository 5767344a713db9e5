//! Table statistics fetched from the catalog

use super::sql;
use crate::executor::{execute_plain, Executor};
use crate::Result;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnStats {
    pub name: String,
    /// Absolute distinct-value estimate
    pub n_distinct: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableContext {
    pub schema: String,
    pub name: String,
    pub reltuples: f64,
    pub partitioned: bool,
    pub columns: Vec<ColumnStats>,
}

impl TableContext {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnStats> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// `1 / n_distinct`, lower is more selective
    pub fn selectivity(&self, column: &str) -> Option<f64> {
        self.column(column)
            .filter(|c| c.n_distinct > 0.0)
            .map(|c| 1.0 / c.n_distinct)
    }
}

/// Split `schema.table` or a bare table name
pub fn split_table_name<'a>(name: &'a str, default_schema: &'a str) -> (&'a str, &'a str) {
    match name.split_once('.') {
        Some((schema, table)) => (schema, table),
        None => (default_schema, name),
    }
}

/// Run-scoped cache of table statistics
#[derive(Debug, Default)]
pub struct TableCatalog {
    tables: RwLock<HashMap<String, Option<Arc<TableContext>>>>,
}

impl TableCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preload statistics for tables that are already known
    pub fn insert(&self, table: TableContext) {
        self.tables
            .write()
            .insert(table.qualified_name(), Some(Arc::new(table)));
    }

    pub fn get(&self, qualified: &str) -> Option<Arc<TableContext>> {
        self.tables.read().get(qualified).cloned().flatten()
    }

    /// Statistics of the named tables; unknown tables are silently dropped
    pub fn fetch(
        &self,
        executor: &dyn Executor,
        default_schema: &str,
        names: &[String],
    ) -> Result<Vec<Arc<TableContext>>> {
        let mut missing: BTreeMap<String, Vec<String>> = BTreeMap::new();
        {
            let cached = self.tables.read();
            for name in names {
                let (schema, table) = split_table_name(name, default_schema);
                let qualified = format!("{}.{}", schema, table);
                if !cached.contains_key(&qualified) {
                    missing
                        .entry(schema.to_string())
                        .or_default()
                        .push(table.to_string());
                }
            }
        }

        for (schema, tables) in missing {
            let loaded = load_tables(executor, &schema, &tables)?;
            let mut cache = self.tables.write();
            for table in &tables {
                let qualified = format!("{}.{}", schema, table);
                let context = loaded.get(table).cloned().map(Arc::new);
                cache.entry(qualified).or_insert(context);
            }
        }

        let cache = self.tables.read();
        Ok(names
            .iter()
            .filter_map(|name| {
                let (schema, table) = split_table_name(name, default_schema);
                cache.get(&format!("{}.{}", schema, table)).cloned().flatten()
            })
            .collect())
    }
}

fn load_tables(
    executor: &dyn Executor,
    schema: &str,
    tables: &[String],
) -> Result<HashMap<String, TableContext>> {
    let rows = execute_plain(executor, "stats", &[sql::table_stats_sql(schema, tables)])?;
    let mut contexts: HashMap<String, TableContext> = HashMap::new();
    for row in rows.iter().filter(|r| r.len() >= 3) {
        let reltuples = row[1].trim().parse::<f64>().unwrap_or(0.0);
        contexts.insert(
            row[0].clone(),
            TableContext {
                schema: schema.to_string(),
                name: row[0].clone(),
                reltuples,
                partitioned: row[2].trim() == "p",
                columns: Vec::new(),
            },
        );
    }
    if contexts.is_empty() {
        return Ok(contexts);
    }

    let rows = execute_plain(executor, "stats", &[sql::column_stats_sql(schema, tables)])?;
    for row in rows.iter().filter(|r| r.len() >= 3) {
        let Some(context) = contexts.get_mut(&row[0]) else {
            continue;
        };
        let raw = row[2].trim().parse::<f64>().unwrap_or(0.0);
        // negative estimates are a fraction of the row count
        let n_distinct = if raw < 0.0 { -raw * context.reltuples } else { raw };
        if n_distinct <= 0.0 {
            continue;
        }
        context.columns.push(ColumnStats {
            name: row[1].clone(),
            n_distinct,
        });
    }
    debug!(schema = schema, tables = contexts.len(), "Loaded table statistics");
    Ok(contexts)
}
