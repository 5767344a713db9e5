//! Single-column candidate generation
//!
//! For every statement the tables it touches are looked up in the catalog.
//! Tables with too few rows are skipped. Columns come from the conditions of
//! the baseline plan plus the identifiers of the statement itself, restricted
//! to real columns of the table, and only selective ones (low `1/n_distinct`)
//! are kept.

use super::context::{per_query, AdvisorContext};
use super::query::StatementKind;
use super::{parser, sql, IndexId, IndexKey, IndexKind, QueryItem, TableContext};
use crate::executor::execute_plain;
use crate::{metrics, Result};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Candidates of one statement
pub fn query_candidates(context: &AdvisorContext<'_>, query: &QueryItem) -> Result<Vec<IndexId>> {
    if !matches!(
        query.kind(),
        StatementKind::Select | StatementKind::Update | StatementKind::Delete
    ) {
        return Ok(Vec::new());
    }
    let names = parser::parse_tables(query.statement());
    if names.is_empty() {
        return Ok(Vec::new());
    }
    let tables = context
        .catalog
        .fetch(context.executor, context.schema(), &names)?;
    context.record_query_tables(
        query.statement(),
        tables.iter().map(|t| t.qualified_name()).collect(),
    );

    let rows = execute_plain(
        context.executor,
        "explain",
        &[sql::EXPLAIN_PERF_MODE.to_string(), sql::explain_sql(query.statement())],
    )?;
    let mut referenced = parser::plan_condition_columns(&sql::plan_lines(&rows));
    referenced.extend(parser::identifiers(query.statement()));

    let gsi = context.config.multi_node && context.config.advise_gsi;
    let mut candidates = Vec::new();
    for table in &tables {
        if table.reltuples <= context.config.min_reltuples {
            debug!(table = %table.qualified_name(), rows = table.reltuples, "Table too small for indexes");
            continue;
        }
        let table_columns: Vec<&str> = referenced
            .iter()
            .filter(|c| table.column(c).is_some())
            .map(String::as_str)
            .collect();
        for column in selective_columns(table, &table_columns, context.config.max_n_distinct, context.config.max_candidates_per_table) {
            for kind in IndexKind::for_table(table.partitioned, gsi) {
                let containing = if kind == IndexKind::Gsi {
                    table_columns
                        .iter()
                        .filter(|c| **c != column)
                        .map(|c| c.to_string())
                        .collect()
                } else {
                    Vec::new()
                };
                candidates.push(context.factory.intern(
                    IndexKey {
                        table: table.qualified_name(),
                        columns: vec![column.to_string()],
                        kind,
                        containing,
                    },
                    None,
                ));
            }
        }
    }
    Ok(candidates)
}

/// Referenced columns passing the selectivity cut, most selective first
fn selective_columns<'c>(table: &TableContext, columns: &[&'c str], max_n_distinct: f64, cap: usize) -> Vec<&'c str> {
    let mut scored: Vec<(&str, f64)> = columns
        .iter()
        .filter_map(|c| table.selectivity(c).map(|s| (*c, s)))
        .filter(|(_, s)| *s <= max_n_distinct)
        .collect();
    scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal).then(a.0.cmp(b.0)));
    scored.truncate(cap);
    scored.into_iter().map(|(c, _)| c).collect()
}

/// Candidates of every statement, in workload order, plus the de-duplicated union
pub fn generate_candidates(context: &AdvisorContext<'_>, queries: &[QueryItem]) -> Result<(Vec<Vec<IndexId>>, Vec<IndexId>)> {
    let all: Mutex<BTreeSet<IndexId>> = Mutex::new(BTreeSet::new());
    let per_statement = context.map_items(queries, |_, query| {
        let result = query_candidates(context, query);
        let candidates = per_query("candidates", query.statement(), result, Vec::new())?;
        all.lock().extend(candidates.iter().copied());
        Ok(candidates)
    });
    let per_statement = per_statement.into_iter().collect::<Result<Vec<_>>>()?;

    let mut union: Vec<IndexId> = all.into_inner().into_iter().collect();
    union.sort_by(|a, b| context.factory.index(*a).key().cmp(context.factory.index(*b).key()));
    metrics::record_candidates(union.len());
    info!(candidates = union.len(), "Candidate indexes generated");
    Ok((per_statement, union))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdvisorConfig;
    use crate::testing::SimulatedDatabase;

    fn db() -> SimulatedDatabase {
        SimulatedDatabase::new("public")
            .table("t", 100_000.0, &[("a", 50_000.0), ("b", 20.0), ("c", 5_000.0)])
            .table("tiny", 100.0, &[("a", 100.0)])
            .partitioned_table("p", 200_000.0, &[("x", 100_000.0)])
    }

    fn labels(context: &AdvisorContext<'_>, ids: &[IndexId]) -> Vec<String> {
        ids.iter().map(|id| context.factory.index(*id).to_string()).collect()
    }

    #[test]
    fn test_selective_columns_only() {
        let db = db();
        let config = AdvisorConfig::new("public");
        let context = AdvisorContext::new(&db, &config).unwrap();
        let query = QueryItem::new("select * from t where a = 1 and b = 2 and c = 3", 1.0);
        let ids = query_candidates(&context, &query).unwrap();
        // b has only 20 distinct values
        assert_eq!(labels(&context, &ids), vec!["public.t(a)", "public.t(c)"]);
        assert_eq!(context.query_tables(query.statement()), vec!["public.t"]);
    }

    #[test]
    fn test_small_tables_and_inserts_skipped() {
        let db = db();
        let config = AdvisorConfig::new("public");
        let context = AdvisorContext::new(&db, &config).unwrap();
        let small = QueryItem::new("select * from tiny where a = 1", 1.0);
        assert!(query_candidates(&context, &small).unwrap().is_empty());
        let insert = QueryItem::new("insert into t values (1, 2, 3)", 1.0);
        assert!(query_candidates(&context, &insert).unwrap().is_empty());
    }

    #[test]
    fn test_partitioned_kinds() {
        let db = db();
        let config = AdvisorConfig::new("public");
        let context = AdvisorContext::new(&db, &config).unwrap();
        let query = QueryItem::new("select * from p where x = 1", 1.0);
        let ids = query_candidates(&context, &query).unwrap();
        assert_eq!(labels(&context, &ids), vec!["public.p(x) local", "public.p(x) global"]);
    }

    #[test]
    fn test_gsi_candidates_cover_other_columns() {
        let db = db();
        let mut config = AdvisorConfig::new("public");
        config.multi_node = true;
        config.advise_gsi = true;
        let context = AdvisorContext::new(&db, &config).unwrap();
        let query = QueryItem::new("select c from t where a = 1", 1.0);
        let ids = query_candidates(&context, &query).unwrap();
        let labels = labels(&context, &ids);
        assert!(labels.contains(&"public.t(a) gsi containing(c)".to_string()));
        assert!(labels.contains(&"public.t(a)".to_string()));
    }

    #[test]
    fn test_gsi_flag_ignored_on_single_node() {
        let db = db();
        let mut config = AdvisorConfig::new("public");
        config.advise_gsi = true;
        let context = AdvisorContext::new(&db, &config).unwrap();
        let query = QueryItem::new("select c from t where a = 1", 1.0);
        let ids = query_candidates(&context, &query).unwrap();
        let labels = labels(&context, &ids);
        assert!(labels.contains(&"public.t(a)".to_string()));
        assert!(labels.iter().all(|label| !label.contains("gsi")), "{:?}", labels);
    }

    #[test]
    fn test_failing_statement_is_skipped() {
        let db = db().fail_on("where c = 9");
        let config = AdvisorConfig::new("public");
        let context = AdvisorContext::new(&db, &config).unwrap();
        let queries = vec![
            QueryItem::new("select * from t where c = 9", 1.0),
            QueryItem::new("select * from t where a = 1", 1.0),
        ];
        let (per_statement, union) = generate_candidates(&context, &queries).unwrap();
        assert!(per_statement[0].is_empty());
        assert_eq!(labels(&context, &union), vec!["public.t(a)"]);
    }
}
