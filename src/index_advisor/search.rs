//! Combination search over candidate indexes
//!
//! Only a small set of *atomic* configurations is ever sent to the optimizer.
//! The cost of a statement under any larger configuration is inferred as the
//! cheapest cost among the atomic configurations contained in it, which keeps
//! the number of optimizer calls linear in the workload size.

use super::context::AdvisorContext;
use super::cost::estimate_workload_cost;
use super::workload::{config_key, is_subset, Config, WorkLoad};
use super::{IndexFactory, IndexId};
use crate::Result;
use dashmap::DashMap;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Most tables per statement that take part in combined configurations
const MAX_ATOMIC_TABLES: usize = 2;
/// Most indexes per table that take part in combined configurations
const MAX_ATOMIC_INDEXES_PER_TABLE: usize = 2;
/// Largest combined configuration
const MAX_ATOMIC_SIZE: usize = 3;

/// Same-table, same-kind pairs where the first index's columns lead the second's
pub fn same_column_pairs(factory: &IndexFactory, indexes: &[IndexId]) -> Vec<(IndexId, IndexId)> {
    let mut pairs = Vec::new();
    for short in indexes {
        let short_index = factory.index(*short);
        for long in indexes {
            if short == long {
                continue;
            }
            let long_index = factory.index(*long);
            if short_index.kind() == long_index.kind()
                && short_index.columns().len() < long_index.columns().len()
                && short_index.is_prefix_of(&long_index)
            {
                pairs.push((*short, *long));
            }
        }
    }
    pairs
}

fn power_set(indexes: &[IndexId], min: usize, max: usize) -> Vec<Config> {
    let mut configs = Vec::new();
    let n = indexes.len();
    for mask in 1u32..(1u32 << n) {
        let size = mask.count_ones() as usize;
        if size < min || size > max {
            continue;
        }
        let members: Vec<IndexId> = (0..n).filter(|i| mask & (1 << i) != 0).map(|i| indexes[i]).collect();
        configs.push(config_key(&members));
    }
    configs
}

/// Baseline, every single candidate, and the small combinations statements can use together
pub fn generate_atomic_configs(factory: &IndexFactory, workload: &WorkLoad, candidates: &[IndexId]) -> Vec<Config> {
    let mut seen: BTreeSet<Config> = BTreeSet::new();
    let mut configs = Vec::new();
    let mut push = |config: Config, configs: &mut Vec<Config>| {
        if seen.insert(config.clone()) {
            configs.push(config);
        }
    };

    push(Config::new(), &mut configs);
    for id in candidates {
        push(config_key(&[*id]), &mut configs);
    }

    for query in workload.queries() {
        let mut tables: Vec<(String, Vec<IndexId>)> = Vec::new();
        for id in query.valid_indexes().iter().filter(|id| candidates.contains(id)) {
            let table = factory.index(*id).table().to_string();
            match tables.iter_mut().find(|(t, _)| *t == table) {
                Some((_, ids)) => ids.push(*id),
                None => tables.push((table, vec![*id])),
            }
        }
        let members: Vec<IndexId> = tables
            .into_iter()
            .take(MAX_ATOMIC_TABLES)
            .flat_map(|(_, ids)| ids.into_iter().take(MAX_ATOMIC_INDEXES_PER_TABLE))
            .collect();
        for config in power_set(&members, 2, MAX_ATOMIC_SIZE) {
            push(config, &mut configs);
        }
    }

    for (short, long) in same_column_pairs(factory, candidates) {
        push(config_key(&[short, long]), &mut configs);
    }
    configs
}

/// Evaluate every atomic configuration not yet in the workload
pub fn evaluate_atomic_configs(context: &AdvisorContext<'_>, workload: &mut WorkLoad, atomic: &[Config]) -> Result<()> {
    for config in atomic {
        estimate_workload_cost(context, workload, config)?;
    }
    info!(atomic_configs = atomic.len(), "Atomic configurations evaluated");
    Ok(())
}

/// Benefit of arbitrary configurations inferred from the atomic ones
pub struct BenefitInference<'w> {
    workload: &'w WorkLoad,
    atomic: Vec<Config>,
    memo: DashMap<Config, f64>,
}

impl<'w> BenefitInference<'w> {
    pub fn new(workload: &'w WorkLoad, atomic: &[Config]) -> Self {
        let atomic = atomic
            .iter()
            .filter(|c| workload.has_indexes(c))
            .cloned()
            .collect();
        Self {
            workload,
            atomic,
            memo: DashMap::new(),
        }
    }

    pub fn workload(&self) -> &WorkLoad {
        self.workload
    }

    /// Inferred cost of one statement: the cheapest contained atomic configuration
    pub fn query_cost(&self, query: usize, config: &[IndexId]) -> Result<f64> {
        let mut best = self.workload.origin_cost_of_query(query)?;
        for atomic in self.atomic.iter().filter(|a| is_subset(a, config)) {
            best = best.min(self.workload.cost_of_query(query, atomic)?);
        }
        Ok(best)
    }

    /// Inferred frequency-weighted benefit of a configuration
    pub fn infer_benefit(&self, config: &[IndexId]) -> Result<f64> {
        let key = config_key(config);
        if let Some(benefit) = self.memo.get(&key) {
            return Ok(*benefit);
        }
        let mut benefit = 0.0;
        for (position, query) in self.workload.queries().iter().enumerate() {
            let origin = self.workload.origin_cost_of_query(position)?;
            benefit += (origin - self.query_cost(position, &key)?) * query.frequency();
        }
        self.memo.insert(key, benefit);
        Ok(benefit)
    }
}

/// Record, per index, the extra return it only realises together with other indexes
pub fn record_portfolio_returns(
    factory: &IndexFactory,
    workload: &WorkLoad,
    atomic: &[Config],
    threshold: f64,
) -> Result<()> {
    for config in atomic.iter().filter(|c| c.len() > 1 && workload.has_indexes(c)) {
        let singles_known = config.iter().all(|id| workload.has_indexes(&[*id]));
        if !singles_known {
            continue;
        }
        for (position, query) in workload.queries().iter().enumerate() {
            let origin = workload.origin_cost_of_query(position)?;
            if origin <= 0.0 {
                continue;
            }
            let mut individual = 0.0;
            for id in config {
                individual += workload.query_benefit(position, &[*id])?;
            }
            let combined = workload.query_benefit(position, config)?;
            let excess = combined - individual;
            if excess / origin <= threshold {
                continue;
            }
            for id in config {
                let partners = config
                    .iter()
                    .filter(|other| *other != id)
                    .map(|other| factory.index(*other).to_string())
                    .collect::<Vec<_>>()
                    .join("; ");
                factory.index(*id).update_stats(|stats| {
                    stats
                        .association_indexes
                        .entry(partners)
                        .or_default()
                        .push(excess * query.frequency());
                });
            }
        }
    }
    Ok(())
}

/// Add the candidate with the best marginal inferred benefit until nothing improves
pub fn greedy_determine_opt_config(
    inference: &BenefitInference<'_>,
    candidates: &[IndexId],
    max_index_num: Option<usize>,
) -> Result<Vec<IndexId>> {
    let limit = max_index_num.unwrap_or(candidates.len());
    let mut chosen: Vec<IndexId> = Vec::new();
    let mut current = inference.infer_benefit(&[])?;
    while chosen.len() < limit {
        let mut best: Option<(IndexId, f64)> = None;
        for id in candidates.iter().filter(|id| !chosen.contains(id)) {
            let mut trial = chosen.clone();
            trial.push(*id);
            let benefit = inference.infer_benefit(&trial)?;
            if benefit > current && best.map_or(true, |(_, b)| benefit > b) {
                best = Some((*id, benefit));
            }
        }
        match best {
            Some((id, benefit)) => {
                debug!(index = %id, benefit, "Greedy step");
                chosen.push(id);
                current = benefit;
            }
            None => break,
        }
    }
    Ok(chosen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index_advisor::{IndexKind, QueryItem};

    fn ids(factory: &IndexFactory) -> (IndexId, IndexId, IndexId) {
        (
            factory.get_index("public.t", &["a".to_string()], IndexKind::Ordinary),
            factory.get_index("public.t", &["a".to_string(), "b".to_string()], IndexKind::Ordinary),
            factory.get_index("public.u", &["x".to_string()], IndexKind::Ordinary),
        )
    }

    fn names(n: usize) -> Vec<Vec<String>> {
        vec![Vec::new(); n]
    }

    #[test]
    fn test_same_column_pairs() {
        let factory = IndexFactory::new();
        let (a, ab, x) = ids(&factory);
        let global = factory.get_index("public.t", &["a".to_string(), "b".to_string()], IndexKind::Global);
        assert_eq!(same_column_pairs(&factory, &[a, ab, x, global]), vec![(a, ab)]);
    }

    #[test]
    fn test_atomic_configs_cover_joint_usage() {
        let factory = IndexFactory::new();
        let (a, ab, x) = ids(&factory);
        let mut query = QueryItem::new("select * from t join u on t.id = u.id where a = 1 and x = 2", 1.0);
        query.set_valid_indexes(vec![a, x]);
        let workload = WorkLoad::new(vec![query]);
        let atomic = generate_atomic_configs(&factory, &workload, &[a, ab, x]);

        assert_eq!(atomic[0], Config::new());
        assert!(atomic.contains(&config_key(&[a, x])));
        assert!(atomic.contains(&config_key(&[a, ab])));
        assert!(!atomic.contains(&config_key(&[ab, x])));
        assert_eq!(atomic.len(), 6);
    }

    #[test]
    fn test_inference_and_greedy() {
        let factory = IndexFactory::new();
        let (a, _, x) = ids(&factory);
        let mut workload = WorkLoad::new(vec![
            QueryItem::new("select * from t where a = 1", 1.0),
            QueryItem::new("select * from u where x = 1", 2.0),
        ]);
        workload.add_indexes(&[], vec![100.0, 50.0], names(2), names(2)).unwrap();
        workload.add_indexes(&[a], vec![10.0, 50.0], names(2), names(2)).unwrap();
        workload.add_indexes(&[x], vec![100.0, 5.0], names(2), names(2)).unwrap();
        let atomic = vec![Config::new(), config_key(&[a]), config_key(&[x])];
        let inference = BenefitInference::new(&workload, &atomic);

        // never evaluated together, inferred from the singles
        assert_eq!(inference.infer_benefit(&[a, x]).unwrap(), 90.0 + 90.0);
        assert_eq!(greedy_determine_opt_config(&inference, &[a, x], None).unwrap(), vec![a, x]);
        assert_eq!(greedy_determine_opt_config(&inference, &[a, x], Some(1)).unwrap().len(), 1);
    }

    #[test]
    fn test_portfolio_returns_recorded() {
        let factory = IndexFactory::new();
        let (a, _, x) = ids(&factory);
        let mut workload = WorkLoad::new(vec![QueryItem::new("select * from t join u on t.id = u.id", 1.0)]);
        workload.add_indexes(&[], vec![100.0], names(1), names(1)).unwrap();
        workload.add_indexes(&[a], vec![95.0], names(1), names(1)).unwrap();
        workload.add_indexes(&[x], vec![95.0], names(1), names(1)).unwrap();
        workload.add_indexes(&[a, x], vec![20.0], names(1), names(1)).unwrap();
        let atomic = vec![Config::new(), config_key(&[a]), config_key(&[x]), config_key(&[a, x])];

        record_portfolio_returns(&factory, &workload, &atomic, 0.01).unwrap();
        let stats = factory.index(a).stats();
        assert_eq!(stats.association_indexes.get("public.u(x)"), Some(&vec![70.0]));
    }
}
