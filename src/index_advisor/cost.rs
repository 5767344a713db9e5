//! Workload cost under a configuration
//!
//! A statement is only re-planned when the configuration touches one of its
//! tables; all other statements keep their baseline answer.

use super::context::{per_query, AdvisorContext};
use super::workload::{config_key, QueryEvaluation, WorkLoad};
use super::{sql, IndexId, QueryItem};
use crate::executor::HypoSession;
use crate::{Error, Result};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Map plan index names to stable labels: candidates by their description,
/// physical indexes by their schema-qualified name.
fn label_used_indexes(
    context: &AdvisorContext<'_>,
    used: Vec<String>,
    hypo_names: &HashMap<String, IndexId>,
) -> Vec<String> {
    used.into_iter()
        .map(|name| match hypo_names.get(&name) {
            Some(id) => context.factory.index(*id).to_string(),
            None if name.contains('.') => name,
            None => format!("{}.{}", context.schema(), name),
        })
        .collect()
}

/// Plan one statement with the given hypothetical indexes
pub fn evaluate_query(context: &AdvisorContext<'_>, statement: &str, config: &[IndexId]) -> Result<QueryEvaluation> {
    let mut batch = vec![sql::EXPLAIN_PERF_MODE.to_string()];
    batch.extend(config.iter().map(|id| sql::hypo_create_sql(&context.factory.index(*id))));
    batch.push(sql::explain_sql(statement));

    let session = HypoSession::open(context.executor, "cost");
    let rows = session.run(batch)?;
    let names = sql::created_hypo_names(&rows);
    if names.len() != config.len() {
        return Err(Error::Parse(format!(
            "created {} hypothetical indexes, expected {}",
            names.len(),
            config.len()
        )));
    }
    let hypo_names: HashMap<String, IndexId> = names.into_iter().zip(config.iter().copied()).collect();
    let plan = sql::plan_lines(&rows);
    let cost = sql::plan_top_cost(&plan)
        .ok_or_else(|| Error::Parse(format!("no cost in plan of {}", statement)))?;
    let used = label_used_indexes(context, sql::plan_index_names(&plan), &hypo_names);
    Ok(QueryEvaluation {
        cost,
        index_names: used,
        plan,
    })
}

/// Indexes of `config` on tables the statement touches
fn relevant_indexes(context: &AdvisorContext<'_>, query: &QueryItem, config: &[IndexId]) -> Vec<IndexId> {
    let tables = context.query_tables(query.statement());
    config
        .iter()
        .filter(|id| tables.iter().any(|t| t == context.factory.index(**id).table()))
        .copied()
        .collect()
}

/// Evaluate a configuration over the whole workload and record it
pub fn estimate_workload_cost(context: &AdvisorContext<'_>, workload: &mut WorkLoad, config: &[IndexId]) -> Result<()> {
    let config = config_key(config);
    if workload.has_indexes(&config) {
        return Ok(());
    }
    let baseline = config.is_empty();
    let evaluations = {
        let workload: &WorkLoad = workload;
        context.map_items(workload.queries(), |position, query| {
            if baseline {
                let result = evaluate_query(context, query.statement(), &[]);
                // a statement the optimizer rejects contributes nothing
                return per_query("baseline", query.statement(), result, QueryEvaluation::default());
            }
            let fallback = workload.evaluation(position, &[])?;
            let relevant = relevant_indexes(context, query, &config);
            if relevant.is_empty() {
                return Ok(fallback);
            }
            let result = evaluate_query(context, query.statement(), &relevant);
            per_query("cost", query.statement(), result, fallback)
        })
    };
    let evaluations = evaluations.into_iter().collect::<Result<Vec<_>>>()?;
    debug!(config = %context.factory.describe(&config), "Configuration evaluated");
    workload.add_evaluations(&config, evaluations)
}

/// Estimate the storage of every candidate in one batch
pub fn estimate_storage(context: &AdvisorContext<'_>, candidates: &[IndexId]) -> Result<()> {
    if candidates.is_empty() {
        return Ok(());
    }
    let mut batch: Vec<String> = candidates
        .iter()
        .map(|id| sql::hypo_create_sql(&context.factory.index(*id)))
        .collect();
    batch.push(sql::estimate_size_sql());

    let session = HypoSession::open(context.executor, "storage");
    let rows = match session.run(batch) {
        Ok(rows) => rows,
        Err(e) if e.is_per_query() => {
            warn!(error = %e, "Storage estimation failed, assuming zero sizes");
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    let names = sql::created_hypo_names(&rows);
    if names.len() != candidates.len() {
        warn!(
            created = names.len(),
            candidates = candidates.len(),
            "Hypothetical index names do not line up with candidates, assuming zero sizes"
        );
        return Ok(());
    }
    let sizes: HashMap<String, f64> = sql::estimated_sizes(&rows).into_iter().collect();
    for (name, id) in names.iter().zip(candidates) {
        if let Some(bytes) = sizes.get(name) {
            let megabytes = bytes / 1024.0 / 1024.0;
            context.factory.index(*id).update_stats(|stats| stats.storage_mb = megabytes);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdvisorConfig;
    use crate::index_advisor::IndexKind;
    use crate::testing::SimulatedDatabase;

    fn db() -> SimulatedDatabase {
        SimulatedDatabase::new("public")
            .table("t", 100_000.0, &[("a", 10_000.0), ("b", 100.0)])
            .table("u", 100_000.0, &[("x", 10_000.0)])
            .index("idx_t_b", "t", &["b"])
    }

    fn workload() -> WorkLoad {
        WorkLoad::new(vec![
            QueryItem::new("select * from t where a = 1", 10.0),
            QueryItem::new("select * from u where x = 1", 1.0),
            QueryItem::new("select * from t where b = 1", 1.0),
        ])
    }

    #[test]
    fn test_baseline_and_single_index() {
        let db = db();
        let config = AdvisorConfig::new("public");
        let context = AdvisorContext::new(&db, &config).unwrap();
        let mut workload = workload();
        let a = context.factory.get_index("public.t", &["a".to_string()], IndexKind::Ordinary);

        assert!(matches!(
            estimate_workload_cost(&context, &mut workload, &[a]),
            Err(Error::MissingBaseline)
        ));
        estimate_workload_cost(&context, &mut workload, &[]).unwrap();
        estimate_workload_cost(&context, &mut workload, &[a]).unwrap();

        assert!(workload.benefit(&[a]).unwrap() > 0.0);
        assert_eq!(workload.used_index_names(0, &[a]).unwrap(), &["public.t(a)".to_string()]);
        assert_eq!(workload.used_index_names(2, &[]).unwrap(), &["public.idx_t_b".to_string()]);
        // u is untouched by an index on t
        assert_eq!(workload.cost_of_query(1, &[a]).unwrap(), workload.origin_cost_of_query(1).unwrap());
    }

    #[test]
    fn test_only_relevant_statements_replanned() {
        let db = db();
        let config = AdvisorConfig::new("public");
        let context = AdvisorContext::new(&db, &config).unwrap();
        let mut workload = workload();
        estimate_workload_cost(&context, &mut workload, &[]).unwrap();
        let calls = db.call_count();
        let x = context.factory.get_index("public.u", &["x".to_string()], IndexKind::Ordinary);
        estimate_workload_cost(&context, &mut workload, &[x]).unwrap();
        assert_eq!(db.call_count(), calls + 1);
        // already evaluated
        estimate_workload_cost(&context, &mut workload, &[x]).unwrap();
        assert_eq!(db.call_count(), calls + 1);
    }

    #[test]
    fn test_storage_estimation() {
        let db = db();
        let config = AdvisorConfig::new("public");
        let context = AdvisorContext::new(&db, &config).unwrap();
        let a = context.factory.get_index("public.t", &["a".to_string()], IndexKind::Ordinary);
        let ab = context
            .factory
            .get_index("public.t", &["a".to_string(), "b".to_string()], IndexKind::Ordinary);
        estimate_storage(&context, &[a, ab]).unwrap();
        let single = context.factory.index(a).storage_mb();
        let double = context.factory.index(ab).storage_mb();
        assert!((single - 100_000.0 * 24.0 / 1024.0 / 1024.0).abs() < 1e-9);
        assert!(double > single);
    }

    #[test]
    fn test_storage_mismatch_assumes_zero_sizes() {
        // the index on t(b) is created but its name never comes back
        let db = db().silent_on("public.t(b)");
        let config = AdvisorConfig::new("public");
        let context = AdvisorContext::new(&db, &config).unwrap();
        let b = context.factory.get_index("public.t", &["b".to_string()], IndexKind::Ordinary);
        let a = context.factory.get_index("public.t", &["a".to_string()], IndexKind::Ordinary);
        estimate_storage(&context, &[b, a]).unwrap();
        assert_eq!(context.factory.index(a).storage_mb(), 0.0);
        assert_eq!(context.factory.index(b).storage_mb(), 0.0);
    }

    #[test]
    fn test_failed_statement_keeps_baseline_cost() {
        let db = db().fail_on("hypopg_create_index('create index on public.u");
        let config = AdvisorConfig::new("public");
        let context = AdvisorContext::new(&db, &config).unwrap();
        let mut workload = workload();
        estimate_workload_cost(&context, &mut workload, &[]).unwrap();
        let x = context.factory.get_index("public.u", &["x".to_string()], IndexKind::Ordinary);
        estimate_workload_cost(&context, &mut workload, &[x]).unwrap();
        assert_eq!(workload.benefit(&[x]).unwrap(), 0.0);
    }
}
