//! Workload-driven index advisor
//!
//! This module recommends indexes for a SQL workload by asking the target
//! database's optimizer, through hypothetical indexes, what each candidate
//! would save:
//! - Compresses the workload into templates with sampled statements
//! - Generates single-column candidates from statistics and plans
//! - Keeps only candidates the optimizer actually uses, widening them when worth it
//! - Costs configurations and searches combinations (greedy or tree search)
//! - Filters the result and reports unused or redundant existing indexes

use crate::config::AdvisorConfig;
use crate::executor::Executor;
use crate::logging::StageTimer;
use crate::metrics::RunTimer;
use crate::Result;
use std::cmp::Ordering;
use std::path::Path;
use tracing::{info, warn};

pub mod candidate;
pub mod compress;
pub mod context;
pub mod cost;
pub mod existing;
pub mod filter;
pub mod index;
pub mod mcts;
pub mod parser;
pub mod query;
pub mod report;
pub mod search;
pub mod sql;
pub mod table;
pub mod validity;
pub mod workload;

pub use context::AdvisorContext;
pub use index::{is_column_prefix, AdvisedIndex, ExistingIndex, IndexFactory, IndexId, IndexKey, IndexKind, IndexStats};
pub use query::{QueryItem, StatementKind};
pub use report::{AdvisorReport, CreatedIndex, RecommendedIndex, SqlDetail, UselessIndex, UselessKind};
pub use table::{ColumnStats, TableCatalog, TableContext};
pub use workload::{Config, QueryEffect, WorkLoad};

/// Entry point of an advisor run
pub struct IndexAdvisor<'a> {
    executor: &'a dyn Executor,
    config: AdvisorConfig,
}

impl<'a> IndexAdvisor<'a> {
    pub fn new(executor: &'a dyn Executor, config: AdvisorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { executor, config })
    }

    pub fn config(&self) -> &AdvisorConfig {
        &self.config
    }

    /// Compress a workload file and advise on it
    pub fn advise_file<P: AsRef<Path>>(&self, path: P, json: bool) -> Result<AdvisorReport> {
        let (queries, workload_count) = {
            let _stage = StageTimer::new("compress");
            compress::compress_file(path, json, self.config.sample_num, self.config.seed)?
        };
        self.advise(queries, workload_count)
    }

    /// Advise on an already compressed workload
    pub fn advise(&self, queries: Vec<QueryItem>, workload_count: u64) -> Result<AdvisorReport> {
        let _run = RunTimer::start();
        let mut context = AdvisorContext::new(self.executor, &self.config)?;

        let existing_indexes = match existing::load_existing_indexes(self.executor, context.schema()) {
            Ok(indexes) => indexes,
            Err(e) if e.is_per_query() => {
                warn!(error = %e, "Existing indexes unavailable");
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        context.set_existing_indexes(existing_indexes);

        let mut queries = queries;
        let candidates = {
            let _stage = StageTimer::new("candidates");
            let (per_statement, _) = candidate::generate_candidates(&context, &queries)?;
            let valid = validity::validate_candidates(&context, &queries, &per_statement)?;
            for (query, indexes) in queries.iter_mut().zip(&valid) {
                query.set_valid_indexes(indexes.clone());
            }
            validity::valid_union(&context, &valid)
        };

        let mut workload = WorkLoad::new(queries);
        {
            let _stage = StageTimer::new("baseline");
            cost::estimate_workload_cost(&context, &mut workload, &[])?;
        }

        let mut report = AdvisorReport {
            created_indexes: context.existing_indexes().iter().map(CreatedIndex::from).collect(),
            useless_indexes: existing::useless_indexes(
                context.existing_indexes(),
                &workload,
                &context.related_tables(),
            )?,
            workload_count,
            ..Default::default()
        };
        if candidates.is_empty() {
            info!("No valid candidate index");
            return Ok(report);
        }

        let chosen = self.choose(&context, &mut workload, &candidates)?;
        let final_set = self.post_filter(&context, &mut workload, chosen)?;
        self.fill_report(&context, &mut workload, &final_set, &mut report)?;
        info!(
            recommended = report.recommend_indexes.len(),
            positive_statements = report.positive_stmt_count,
            optimized = report.workload_optimized,
            "Index advice ready"
        );
        Ok(report)
    }

    /// Single-index costs, then either benefit ranking or a combination search
    fn choose(&self, context: &AdvisorContext<'_>, workload: &mut WorkLoad, candidates: &[IndexId]) -> Result<Vec<IndexId>> {
        let _stage = StageTimer::new("search");
        cost::estimate_storage(context, candidates)?;
        for id in candidates {
            cost::estimate_workload_cost(context, workload, &[*id])?;
        }
        assign_index_stats(context, workload, candidates)?;

        if !self.config.multi_iter_mode {
            let factory = &context.factory;
            let mut ranked = candidates.to_vec();
            ranked.sort_by(|a, b| {
                factory
                    .index(*b)
                    .benefit()
                    .partial_cmp(&factory.index(*a).benefit())
                    .unwrap_or(Ordering::Equal)
            });
            return Ok(ranked);
        }

        let atomic = search::generate_atomic_configs(&context.factory, workload, candidates);
        search::evaluate_atomic_configs(context, workload, &atomic)?;
        search::record_portfolio_returns(&context.factory, workload, &atomic, self.config.portfolio_threshold)?;
        let inference = search::BenefitInference::new(workload, &atomic);
        match self.config.max_index_storage {
            Some(budget) => mcts::MctsSearch::new(
                &inference,
                &context.factory,
                candidates,
                budget,
                self.config.max_index_num,
                self.config.mcts_iterations,
                self.config.seed,
            )?
            .run(),
            None => search::greedy_determine_opt_config(&inference, candidates, self.config.max_index_num),
        }
    }

    /// Cost the chosen set, attribute statements to the indexes they use, then filter
    fn post_filter(&self, context: &AdvisorContext<'_>, workload: &mut WorkLoad, chosen: Vec<IndexId>) -> Result<Vec<IndexId>> {
        let _stage = StageTimer::new("filter");
        let factory = &context.factory;
        cost::estimate_workload_cost(context, workload, &chosen)?;
        attribute_final_set(context, workload, &chosen)?;

        for (short, long) in search::same_column_pairs(factory, &chosen) {
            cost::estimate_workload_cost(context, workload, &[short, long])?;
        }
        let mut indexes = chosen;
        filter::filter_same_columns_indexes(factory, workload, &mut indexes, self.config.containment_ratio)?;
        filter::filter_redundant_indexes(factory, &mut indexes);
        filter::filter_low_benefit_indexes(factory, workload, &mut indexes, &self.config)?;
        Ok(indexes)
    }

    fn fill_report(
        &self,
        context: &AdvisorContext<'_>,
        workload: &mut WorkLoad,
        final_set: &[IndexId],
        out: &mut AdvisorReport,
    ) -> Result<()> {
        cost::estimate_workload_cost(context, workload, final_set)?;
        let mut benefits = Vec::with_capacity(workload.queries().len());
        for position in 0..workload.queries().len() {
            benefits.push(workload.query_benefit(position, final_set)?);
        }
        for (query, benefit) in workload.queries_mut().iter_mut().zip(&benefits) {
            query.set_benefit(*benefit);
        }

        out.positive_stmt_count = benefits.iter().filter(|b| **b > 0.0).count();
        out.workload_optimized =
            report::workload_percentage(workload.benefit(final_set)?, workload.total_origin_cost()?);
        for id in final_set {
            out.recommend_indexes.push(report::recommended_index(
                &context.factory.index(*id),
                workload,
                compress::templatize,
            )?);
        }
        Ok(())
    }
}

/// Single-index benefit and statement classification of every candidate
fn assign_index_stats(context: &AdvisorContext<'_>, workload: &WorkLoad, candidates: &[IndexId]) -> Result<()> {
    for id in candidates {
        let index = context.factory.index(*id);
        let benefit = workload.benefit(&[*id])?;
        let (mut positive, mut negative, mut ineffective) = (Vec::new(), Vec::new(), Vec::new());
        for (position, query) in workload.queries().iter().enumerate() {
            if !context.query_tables(query.statement()).iter().any(|t| t == index.table()) {
                continue;
            }
            match workload.classify(position, *id)? {
                QueryEffect::Positive => positive.push(position),
                QueryEffect::Negative => negative.push(position),
                QueryEffect::Ineffective => ineffective.push(position),
            }
        }
        index.update_stats(|stats| {
            stats.benefit = benefit;
            stats.positive_queries = positive;
            stats.negative_queries = negative;
            stats.ineffective_queries = ineffective;
        });
    }
    Ok(())
}

/// Keep only the positive statements whose plan under the whole set uses the index
fn attribute_final_set(context: &AdvisorContext<'_>, workload: &WorkLoad, chosen: &[IndexId]) -> Result<()> {
    for id in chosen {
        let index = context.factory.index(*id);
        let label = index.to_string();
        let mut attributed = Vec::new();
        for position in index.stats().positive_queries {
            if workload.used_index_names(position, chosen)?.contains(&label) {
                attributed.push(position);
            }
        }
        index.update_stats(|stats| stats.positive_queries = attributed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SimulatedDatabase;

    #[test]
    fn test_invalid_config_rejected_before_database_work() {
        let db = SimulatedDatabase::new("public");
        let mut config = AdvisorConfig::new("public");
        config.max_index_num = Some(0);
        assert!(IndexAdvisor::new(&db, config).is_err());
        assert_eq!(db.call_count(), 0);
    }

    #[test]
    fn test_simple_mode_single_query() {
        let db = SimulatedDatabase::new("public").table("t", 100_000.0, &[("a", 50_000.0), ("b", 3.0)]);
        let advisor = IndexAdvisor::new(&db, AdvisorConfig::new("public")).unwrap();
        let report = advisor
            .advise(vec![QueryItem::new("select * from t where a = 7", 1.0)], 1)
            .unwrap();
        assert_eq!(report.recommend_indexes.len(), 1);
        assert_eq!(report.recommend_indexes[0].columns, "a");
        assert_eq!(report.positive_stmt_count, 1);
        assert!(report.workload_optimized > 90.0);
    }
}
