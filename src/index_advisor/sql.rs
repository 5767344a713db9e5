//! Statement generation and result parsing for the optimizer round-trips

use super::AdvisedIndex;
use crate::executor::Row;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref PLAN_COST: Regex = Regex::new(r"cost=(\d+(?:\.\d+)?)\.\.(\d+(?:\.\d+)?)").unwrap();
    static ref PLAN_INDEX: Regex = Regex::new(
        r#"(?i)(?:index only scan|index scan|bitmap index scan)(?:\s+backward)?\s+(?:using|on)\s+"?([^\s"]+)"?"#
    ).unwrap();
}

pub const EXPLAIN_PERF_MODE: &str = "SET explain_perf_mode = normal";

pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn literal_list<S: AsRef<str>>(values: &[S]) -> String {
    values
        .iter()
        .map(|v| quote_literal(v.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn hypo_create_sql(index: &AdvisedIndex) -> String {
    format!(
        "SELECT * FROM hypopg_create_index({})",
        quote_literal(&index.hypo_statement())
    )
}

pub fn explain_sql(statement: &str) -> String {
    format!("EXPLAIN {}", statement.trim().trim_end_matches(';'))
}

pub fn estimate_size_sql() -> String {
    "SELECT indexname, hypopg_estimate_size(indexrelid) FROM hypopg_display_index()".to_string()
}

/// Row estimate and partitioning of tables: (relname, reltuples, parttype)
pub fn table_stats_sql(schema: &str, tables: &[String]) -> String {
    format!(
        "SELECT c.relname, c.reltuples, c.parttype FROM pg_class c \
         JOIN pg_namespace n ON c.relnamespace = n.oid \
         WHERE n.nspname = {} AND c.relkind = 'r' AND c.relname IN ({})",
        quote_literal(schema),
        literal_list(tables)
    )
}

/// Distinct estimates of columns: (tablename, attname, n_distinct)
pub fn column_stats_sql(schema: &str, tables: &[String]) -> String {
    format!(
        "SELECT tablename, attname, n_distinct FROM pg_stats \
         WHERE schemaname = {} AND tablename IN ({})",
        quote_literal(schema),
        literal_list(tables)
    )
}

/// Indexes already present: (schema, table, index, definition, primary-or-unique)
pub fn existing_indexes_sql(schema: &str) -> String {
    format!(
        "SELECT n.nspname, t.relname, i.relname, pg_get_indexdef(i.oid), \
         (x.indisprimary OR x.indisunique) FROM pg_index x \
         JOIN pg_class t ON t.oid = x.indrelid \
         JOIN pg_class i ON i.oid = x.indexrelid \
         JOIN pg_namespace n ON n.oid = t.relnamespace \
         WHERE n.nspname = {}",
        quote_literal(schema)
    )
}

/// Total cost of a plan line, `cost=startup..total`
pub fn parse_plan_cost(line: &str) -> Option<f64> {
    PLAN_COST
        .captures(line)
        .and_then(|caps| caps.get(2))
        .and_then(|m| m.as_str().parse().ok())
}

/// Lines of the `EXPLAIN` output among mixed batch results
pub fn plan_lines(rows: &[Row]) -> Vec<String> {
    rows.iter()
        .filter(|row| row.len() == 1 && !row[0].trim().is_empty())
        .map(|row| row[0].clone())
        .collect()
}

/// Cost of the top plan node
pub fn plan_top_cost<S: AsRef<str>>(plan: &[S]) -> Option<f64> {
    plan.iter().find_map(|line| {
        let line = line.as_ref();
        if line.contains("(cost=") {
            parse_plan_cost(line)
        } else {
            None
        }
    })
}

/// Index names scanned by a plan, in plan order
pub fn plan_index_names<S: AsRef<str>>(plan: &[S]) -> Vec<String> {
    let mut names = Vec::new();
    for line in plan {
        for caps in PLAN_INDEX.captures_iter(line.as_ref()) {
            if let Some(name) = caps.get(1) {
                let name = name.as_str().to_string();
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
    }
    names
}

/// Names returned by `hypopg_create_index`, in creation order
pub fn created_hypo_names(rows: &[Row]) -> Vec<String> {
    rows.iter()
        .filter(|row| row.len() == 2 && row[1].starts_with('<'))
        .map(|row| row[1].clone())
        .collect()
}

/// Estimated sizes in bytes keyed by hypothetical index name
pub fn estimated_sizes(rows: &[Row]) -> Vec<(String, f64)> {
    rows.iter()
        .filter(|row| row.len() == 2 && row[0].starts_with('<'))
        .filter_map(|row| {
            let bytes = row[1].trim().parse::<f64>().ok()?;
            Some((row[0].clone(), bytes))
        })
        .collect()
}

/// Key columns of an index definition as printed by `pg_get_indexdef`
pub fn parse_index_columns(definition: &str) -> Vec<String> {
    let lowered = definition.to_ascii_lowercase();
    let start = match lowered.find(" using ") {
        Some(pos) => pos,
        None => match lowered.find(" on ") {
            Some(pos) => pos,
            None => return Vec::new(),
        },
    };
    let open = match definition[start..].find('(') {
        Some(pos) => start + pos + 1,
        None => return Vec::new(),
    };
    let mut depth = 1;
    let mut end = open;
    for (offset, c) in definition[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    end = open + offset;
                    break;
                }
            }
            _ => {}
        }
    }
    definition[open..end]
        .split(',')
        .filter_map(|part| part.split_whitespace().next())
        .map(|column| column.trim_matches('"').to_string())
        .filter(|column| !column.is_empty())
        .collect()
}
