//! Cost accumulator over index configurations
//!
//! A configuration is a sorted set of candidate handles; the empty
//! configuration is the baseline (no hypothetical index). Every row records,
//! per query, the optimizer cost, the index names the plan used and the plan
//! text. All benefits are relative to the baseline row, which therefore has to
//! be recorded first and exactly once.

use super::{IndexId, QueryItem};
use crate::{Error, Result};
use dashmap::DashMap;
use smallvec::SmallVec;
use std::collections::HashMap;
use tracing::debug;

/// Sorted, de-duplicated set of candidate handles
pub type Config = SmallVec<[IndexId; 4]>;

pub fn config_key(indexes: &[IndexId]) -> Config {
    let mut config: Config = indexes.iter().copied().collect();
    config.sort_unstable();
    config.dedup();
    config
}

/// Whether every member of `subset` is in `config` (both sorted)
pub fn is_subset(subset: &[IndexId], config: &[IndexId]) -> bool {
    subset.iter().all(|id| config.binary_search(id).is_ok())
}

/// How a single index changes the cost of one query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryEffect {
    Positive,
    Negative,
    Ineffective,
}

/// Optimizer answer for one query under one configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryEvaluation {
    pub cost: f64,
    pub index_names: Vec<String>,
    pub plan: Vec<String>,
}

#[derive(Debug)]
struct ConfigRow {
    costs: Vec<f64>,
    index_names: Vec<Vec<String>>,
    plans: Vec<Vec<String>>,
}

#[derive(Debug)]
pub struct WorkLoad {
    queries: Vec<QueryItem>,
    rows: Vec<ConfigRow>,
    positions: HashMap<Config, usize>,
    total_cost_memo: DashMap<Config, f64>,
}

impl WorkLoad {
    pub fn new(queries: Vec<QueryItem>) -> Self {
        Self {
            queries,
            rows: Vec::new(),
            positions: HashMap::new(),
            total_cost_memo: DashMap::new(),
        }
    }

    pub fn queries(&self) -> &[QueryItem] {
        &self.queries
    }

    pub fn queries_mut(&mut self) -> &mut [QueryItem] {
        &mut self.queries
    }

    pub fn query(&self, position: usize) -> &QueryItem {
        &self.queries[position]
    }

    pub fn has_baseline(&self) -> bool {
        self.positions.contains_key(&Config::new())
    }

    pub fn has_indexes(&self, config: &[IndexId]) -> bool {
        self.positions.contains_key(&config_key(config))
    }

    /// Configurations recorded so far, in insertion order
    pub fn configs(&self) -> Vec<Config> {
        let mut configs: Vec<(usize, Config)> =
            self.positions.iter().map(|(c, p)| (*p, c.clone())).collect();
        configs.sort_by_key(|(p, _)| *p);
        configs.into_iter().map(|(_, c)| c).collect()
    }

    /// Record the optimizer results of one configuration
    pub fn add_indexes(
        &mut self,
        config: &[IndexId],
        costs: Vec<f64>,
        index_names: Vec<Vec<String>>,
        plans: Vec<Vec<String>>,
    ) -> Result<()> {
        let n = self.queries.len();
        if costs.len() != n || index_names.len() != n || plans.len() != n {
            return Err(Error::Workload(format!(
                "expected {} results per configuration, got {}/{}/{}",
                n,
                costs.len(),
                index_names.len(),
                plans.len()
            )));
        }
        let key = config_key(config);
        if key.is_empty() && self.has_baseline() {
            return Err(Error::Workload("baseline configuration recorded twice".to_string()));
        }
        if !key.is_empty() && !self.has_baseline() {
            return Err(Error::MissingBaseline);
        }
        if self.positions.contains_key(&key) {
            debug!(config = ?key, "Configuration already evaluated");
            return Ok(());
        }
        self.positions.insert(key, self.rows.len());
        self.rows.push(ConfigRow {
            costs,
            index_names,
            plans,
        });
        Ok(())
    }

    /// Record per-query evaluations of one configuration
    pub fn add_evaluations(&mut self, config: &[IndexId], evaluations: Vec<QueryEvaluation>) -> Result<()> {
        let mut costs = Vec::with_capacity(evaluations.len());
        let mut names = Vec::with_capacity(evaluations.len());
        let mut plans = Vec::with_capacity(evaluations.len());
        for evaluation in evaluations {
            costs.push(evaluation.cost);
            names.push(evaluation.index_names);
            plans.push(evaluation.plan);
        }
        self.add_indexes(config, costs, names, plans)
    }

    fn row(&self, config: &[IndexId]) -> Result<&ConfigRow> {
        if !self.has_baseline() {
            return Err(Error::MissingBaseline);
        }
        let key = config_key(config);
        self.positions
            .get(&key)
            .map(|p| &self.rows[*p])
            .ok_or_else(|| Error::UnknownConfiguration(format!("{:?}", key)))
    }

    pub fn cost_of_query(&self, query: usize, config: &[IndexId]) -> Result<f64> {
        Ok(self.row(config)?.costs[query])
    }

    pub fn origin_cost_of_query(&self, query: usize) -> Result<f64> {
        self.cost_of_query(query, &[])
    }

    pub fn evaluation(&self, query: usize, config: &[IndexId]) -> Result<QueryEvaluation> {
        let row = self.row(config)?;
        Ok(QueryEvaluation {
            cost: row.costs[query],
            index_names: row.index_names[query].clone(),
            plan: row.plans[query].clone(),
        })
    }

    /// Unweighted cost reduction of one query
    pub fn query_benefit(&self, query: usize, config: &[IndexId]) -> Result<f64> {
        Ok(self.origin_cost_of_query(query)? - self.cost_of_query(query, config)?)
    }

    pub fn used_index_names(&self, query: usize, config: &[IndexId]) -> Result<&[String]> {
        Ok(&self.row(config)?.index_names[query])
    }

    pub fn plan_of_query(&self, query: usize, config: &[IndexId]) -> Result<&[String]> {
        Ok(&self.row(config)?.plans[query])
    }

    /// Frequency-weighted workload cost under a configuration
    pub fn total_cost(&self, config: &[IndexId]) -> Result<f64> {
        let key = config_key(config);
        if let Some(cost) = self.total_cost_memo.get(&key) {
            return Ok(*cost);
        }
        let row = self.row(&key)?;
        let total = self
            .queries
            .iter()
            .zip(&row.costs)
            .map(|(query, cost)| cost * query.frequency())
            .sum();
        self.total_cost_memo.insert(key, total);
        Ok(total)
    }

    pub fn total_origin_cost(&self) -> Result<f64> {
        self.total_cost(&[])
    }

    /// Frequency-weighted cost reduction of a configuration
    pub fn benefit(&self, config: &[IndexId]) -> Result<f64> {
        Ok(self.total_origin_cost()? - self.total_cost(config)?)
    }

    pub fn classify(&self, query: usize, index: IndexId) -> Result<QueryEffect> {
        let origin = self.origin_cost_of_query(query)?;
        let cost = self.cost_of_query(query, &[index])?;
        Ok(if cost < origin {
            QueryEffect::Positive
        } else if cost > origin {
            QueryEffect::Negative
        } else {
            QueryEffect::Ineffective
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index_advisor::{IndexFactory, IndexKind};

    fn setup() -> (WorkLoad, IndexId, IndexId) {
        let factory = IndexFactory::new();
        let a = factory.get_index("public.t", &["a".to_string()], IndexKind::Ordinary);
        let b = factory.get_index("public.t", &["b".to_string()], IndexKind::Ordinary);
        let workload = WorkLoad::new(vec![
            QueryItem::new("select * from t where a = 1", 2.0),
            QueryItem::new("insert into t values (1, 2)", 1.0),
        ]);
        (workload, a, b)
    }

    fn names(n: usize) -> Vec<Vec<String>> {
        vec![Vec::new(); n]
    }

    #[test]
    fn test_lookups_require_baseline() {
        let (mut workload, a, _) = setup();
        assert!(matches!(workload.total_cost(&[a]), Err(Error::MissingBaseline)));
        assert!(matches!(workload.benefit(&[a]), Err(Error::MissingBaseline)));
        assert!(matches!(
            workload.add_indexes(&[a], vec![1.0, 1.0], names(2), names(2)),
            Err(Error::MissingBaseline)
        ));
    }

    #[test]
    fn test_baseline_only_once() {
        let (mut workload, _, _) = setup();
        workload.add_indexes(&[], vec![100.0, 1.0], names(2), names(2)).unwrap();
        assert!(workload.add_indexes(&[], vec![100.0, 1.0], names(2), names(2)).is_err());
    }

    #[test]
    fn test_benefit_and_classification() {
        let (mut workload, a, b) = setup();
        workload.add_indexes(&[], vec![100.0, 1.0], names(2), names(2)).unwrap();
        workload.add_indexes(&[a], vec![10.0, 1.5], names(2), names(2)).unwrap();
        workload.add_indexes(&[b, a], vec![5.0, 2.0], names(2), names(2)).unwrap();

        assert_eq!(workload.total_origin_cost().unwrap(), 201.0);
        assert_eq!(workload.total_cost(&[a]).unwrap(), 21.5);
        assert_eq!(workload.benefit(&[a]).unwrap(), 179.5);
        // order of a configuration does not matter
        assert_eq!(workload.total_cost(&[a, b]).unwrap(), 12.0);
        assert!(workload.has_indexes(&[a, b]));

        assert_eq!(workload.classify(0, a).unwrap(), QueryEffect::Positive);
        assert_eq!(workload.classify(1, a).unwrap(), QueryEffect::Negative);
        assert!(matches!(workload.cost_of_query(0, &[b]), Err(Error::UnknownConfiguration(_))));
    }

    #[test]
    fn test_mismatched_lengths_rejected() {
        let (mut workload, _, _) = setup();
        assert!(workload.add_indexes(&[], vec![1.0], names(2), names(2)).is_err());
    }

    #[test]
    fn test_subset_helpers() {
        let (_, a, b) = setup();
        let both = config_key(&[b, a]);
        assert!(is_subset(&config_key(&[a]), &both));
        assert!(is_subset(&[], &both));
        assert!(!is_subset(&both, &config_key(&[a])));
    }
}
