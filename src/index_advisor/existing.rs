//! Indexes already present in the schema

use super::report::{UselessIndex, UselessKind};
use super::workload::WorkLoad;
use super::{is_column_prefix, sql, ExistingIndex};
use crate::executor::{execute_plain, Executor};
use crate::Result;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Read the existing indexes of a schema from the catalog
pub fn load_existing_indexes(executor: &dyn Executor, schema: &str) -> Result<Vec<ExistingIndex>> {
    let rows = execute_plain(executor, "catalog", &[sql::existing_indexes_sql(schema)])?;
    let mut indexes: Vec<ExistingIndex> = rows
        .into_iter()
        .filter(|row| row.len() >= 5)
        .map(|row| {
            let flag = row[4].trim().to_ascii_lowercase();
            ExistingIndex {
                columns: sql::parse_index_columns(&row[3]),
                schema: row[0].clone(),
                table: row[1].clone(),
                name: row[2].clone(),
                definition: row[3].clone(),
                is_primary_or_unique: flag == "t" || flag == "true",
            }
        })
        .collect();
    indexes.sort_by(|a, b| (&a.table, &a.name).cmp(&(&b.table, &b.name)));
    debug!(schema = schema, count = indexes.len(), "Loaded existing indexes");
    Ok(indexes)
}

/// Existing indexes on workload tables that are never used or covered by another
pub fn useless_indexes(
    existing: &[ExistingIndex],
    workload: &WorkLoad,
    related_tables: &BTreeSet<String>,
) -> Result<Vec<UselessIndex>> {
    let mut used: BTreeSet<&str> = BTreeSet::new();
    for position in 0..workload.queries().len() {
        used.extend(workload.used_index_names(position, &[])?.iter().map(String::as_str));
    }

    let mut useless = Vec::new();
    for index in existing.iter().filter(|i| related_tables.contains(&i.qualified_table())) {
        if !index.is_primary_or_unique && !used.contains(index.qualified_name().as_str()) {
            useless.push(UselessIndex::new(index, UselessKind::Unused, Vec::new()));
        }
    }

    for index in existing.iter().filter(|i| !i.is_primary_or_unique) {
        let covering: Vec<String> = existing
            .iter()
            .filter(|other| {
                other.name != index.name
                    && other.qualified_table() == index.qualified_table()
                    && is_column_prefix(&index.columns, &other.columns)
                    // of two identical indexes only the later one is reported
                    && (other.columns.len() > index.columns.len() || other.name < index.name)
            })
            .map(|other| other.qualified_name())
            .collect();
        if !covering.is_empty() && !index.columns.is_empty() {
            useless.push(UselessIndex::new(index, UselessKind::Redundant, covering));
        }
    }
    if !useless.is_empty() {
        info!(count = useless.len(), "Useless existing indexes found");
    }
    Ok(useless)
}
