//! Post-filters applied to the chosen configuration

use super::search::same_column_pairs;
use super::workload::WorkLoad;
use super::{IndexFactory, IndexId, IndexKind};
use crate::config::AdvisorConfig;
use crate::Result;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Drop one index of a prefix pair when the other alone yields most of the pair's benefit.
///
/// Pairs whose combined configuration was never evaluated are left alone.
pub fn filter_same_columns_indexes(
    factory: &IndexFactory,
    workload: &WorkLoad,
    indexes: &mut Vec<IndexId>,
    ratio: f64,
) -> Result<()> {
    let mut dropped: BTreeSet<IndexId> = BTreeSet::new();
    for (short, long) in same_column_pairs(factory, indexes) {
        if dropped.contains(&short) || dropped.contains(&long) || !workload.has_indexes(&[short, long]) {
            continue;
        }
        let combined = workload.benefit(&[short, long])?;
        if combined <= 0.0 {
            continue;
        }
        let short_benefit = workload.benefit(&[short])?;
        let long_benefit = workload.benefit(&[long])?;
        if short_benefit / combined > ratio {
            debug!(kept = %factory.index(short), dropped = %factory.index(long), "Shorter index covers the pair");
            dropped.insert(long);
        } else if long_benefit / combined > ratio {
            debug!(kept = %factory.index(long), dropped = %factory.index(short), "Longer index covers the pair");
            dropped.insert(short);
        }
    }
    indexes.retain(|id| !dropped.contains(id));
    Ok(())
}

/// Of two indexes on one table where one's columns lead the other's, keep the higher benefit.
///
/// On equal benefit a global index beats any other kind, then the narrower index stays.
pub fn filter_redundant_indexes(factory: &IndexFactory, indexes: &mut Vec<IndexId>) {
    let mut dropped: BTreeSet<IndexId> = BTreeSet::new();
    for (position, a) in indexes.iter().enumerate() {
        for b in indexes.iter().skip(position + 1) {
            if dropped.contains(a) || dropped.contains(b) {
                continue;
            }
            let (x, y) = (factory.index(*a), factory.index(*b));
            if !(x.is_prefix_of(&y) || y.is_prefix_of(&x)) {
                continue;
            }
            if x.columns() == y.columns() && x.kind() == y.kind() {
                continue;
            }
            let loser = if x.benefit() > y.benefit() {
                *b
            } else if y.benefit() > x.benefit() {
                *a
            } else {
                match (x.kind(), y.kind()) {
                    (IndexKind::Global, other) if other != IndexKind::Global => *b,
                    (other, IndexKind::Global) if other != IndexKind::Global => *a,
                    _ if y.columns().len() < x.columns().len() => *a,
                    _ => *b,
                }
            };
            dropped.insert(loser);
        }
    }
    for id in &dropped {
        debug!(index = %factory.index(*id), "Redundant recommendation removed");
    }
    indexes.retain(|id| !dropped.contains(id));
}

/// Mean relative cost reduction over the statements an index improves
fn improvement_rate(workload: &WorkLoad, id: IndexId, positive: &[usize]) -> Result<f64> {
    if positive.is_empty() {
        return Ok(0.0);
    }
    let mut sum = 0.0;
    for position in positive {
        let origin = workload.origin_cost_of_query(*position)?;
        if origin > 0.0 {
            sum += 1.0 - workload.cost_of_query(*position, &[id])? / origin;
        }
    }
    Ok(sum / positive.len() as f64)
}

/// Drop indexes that help no statement, help too little, or exceed the count and storage caps
pub fn filter_low_benefit_indexes(
    factory: &IndexFactory,
    workload: &WorkLoad,
    indexes: &mut Vec<IndexId>,
    config: &AdvisorConfig,
) -> Result<()> {
    let mut kept = Vec::new();
    let mut storage = 0.0;
    for id in indexes.iter() {
        let index = factory.index(*id);
        let stats = index.stats();
        if stats.positive_queries.is_empty() {
            debug!(index = %index, "No statement benefits");
            continue;
        }
        if !config.multi_iter_mode && stats.benefit <= 0.0 {
            debug!(index = %index, benefit = stats.benefit, "Non-positive benefit");
            continue;
        }
        let rate = improvement_rate(workload, *id, &stats.positive_queries)?;
        // a large enough absolute benefit excuses a small relative one
        let large = config.max_benefit_threshold.is_some_and(|max| stats.benefit >= max);
        if rate < config.min_improved_rate && !large {
            debug!(index = %index, rate, "Improvement below threshold");
            continue;
        }
        if config.max_index_num.is_some_and(|max| kept.len() >= max) {
            continue;
        }
        if let Some(budget) = config.max_index_storage {
            if storage + stats.storage_mb > budget {
                debug!(index = %index, storage_mb = stats.storage_mb, "Storage budget exhausted");
                continue;
            }
        }
        storage += stats.storage_mb;
        kept.push(*id);
    }
    if kept.len() != indexes.len() {
        info!(before = indexes.len(), after = kept.len(), "Low-benefit filter applied");
    }
    *indexes = kept;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index_advisor::QueryItem;

    fn names(n: usize) -> Vec<Vec<String>> {
        vec![Vec::new(); n]
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_redundant_prefix_removed() {
        let factory = IndexFactory::new();
        let a = factory.get_index("public.t", &cols(&["a"]), IndexKind::Ordinary);
        let ab = factory.get_index("public.t", &cols(&["a", "b"]), IndexKind::Ordinary);
        let u = factory.get_index("public.u", &cols(&["a"]), IndexKind::Ordinary);
        factory.index(a).update_stats(|s| s.benefit = 10.0);
        factory.index(ab).update_stats(|s| s.benefit = 12.0);
        let mut indexes = vec![a, ab, u];
        filter_redundant_indexes(&factory, &mut indexes);
        assert_eq!(indexes, vec![ab, u]);

        // equal benefit keeps the narrower one
        factory.index(ab).update_stats(|s| s.benefit = 10.0);
        let mut indexes = vec![ab, a];
        filter_redundant_indexes(&factory, &mut indexes);
        assert_eq!(indexes, vec![a]);
    }

    #[test]
    fn test_global_wins_between_kinds() {
        let factory = IndexFactory::new();
        let local = factory.get_index("public.p", &cols(&["x"]), IndexKind::Local);
        let global = factory.get_index("public.p", &cols(&["x"]), IndexKind::Global);
        let mut indexes = vec![local, global];
        filter_redundant_indexes(&factory, &mut indexes);
        assert_eq!(indexes, vec![global]);
    }

    #[test]
    fn test_same_columns_short_covers_pair() {
        let factory = IndexFactory::new();
        let a = factory.get_index("public.t", &cols(&["a"]), IndexKind::Ordinary);
        let ab = factory.get_index("public.t", &cols(&["a", "b"]), IndexKind::Ordinary);
        let mut workload = WorkLoad::new(vec![QueryItem::new("select * from t where a = 1", 1.0)]);
        workload.add_indexes(&[], vec![100.0], names(1), names(1)).unwrap();
        workload.add_indexes(&[a], vec![10.0], names(1), names(1)).unwrap();
        workload.add_indexes(&[ab], vec![50.0], names(1), names(1)).unwrap();
        workload.add_indexes(&[a, ab], vec![10.0], names(1), names(1)).unwrap();

        let mut indexes = vec![a, ab];
        filter_same_columns_indexes(&factory, &workload, &mut indexes, 0.8).unwrap();
        assert_eq!(indexes, vec![a]);
    }

    #[test]
    fn test_low_benefit_and_caps() {
        let factory = IndexFactory::new();
        let a = factory.get_index("public.t", &cols(&["a"]), IndexKind::Ordinary);
        let b = factory.get_index("public.t", &cols(&["b"]), IndexKind::Ordinary);
        let c = factory.get_index("public.t", &cols(&["c"]), IndexKind::Ordinary);
        let mut workload = WorkLoad::new(vec![
            QueryItem::new("select * from t where a = 1", 1.0),
            QueryItem::new("select * from t where b = 1", 1.0),
        ]);
        workload.add_indexes(&[], vec![100.0, 100.0], names(2), names(2)).unwrap();
        workload.add_indexes(&[a], vec![10.0, 100.0], names(2), names(2)).unwrap();
        workload.add_indexes(&[b], vec![100.0, 95.0], names(2), names(2)).unwrap();
        workload.add_indexes(&[c], vec![100.0, 100.0], names(2), names(2)).unwrap();
        factory.index(a).update_stats(|s| {
            s.benefit = 90.0;
            s.positive_queries = vec![0];
        });
        factory.index(b).update_stats(|s| {
            s.benefit = 5.0;
            s.positive_queries = vec![1];
        });

        let config = AdvisorConfig::new("public");
        let mut indexes = vec![a, b, c];
        filter_low_benefit_indexes(&factory, &workload, &mut indexes, &config).unwrap();
        // b improves its statement by only 5%, c by nothing
        assert_eq!(indexes, vec![a]);

        let mut capped = AdvisorConfig::new("public");
        capped.min_improved_rate = 0.0;
        capped.max_index_num = Some(1);
        let mut indexes = vec![b, a];
        filter_low_benefit_indexes(&factory, &workload, &mut indexes, &capped).unwrap();
        assert_eq!(indexes, vec![b]);
    }

    #[test]
    fn test_large_benefit_excuses_low_rate() {
        let factory = IndexFactory::new();
        let b = factory.get_index("public.t", &cols(&["b"]), IndexKind::Ordinary);
        let mut workload = WorkLoad::new(vec![QueryItem::new("select * from t where b = 1", 1000.0)]);
        workload.add_indexes(&[], vec![100.0], names(1), names(1)).unwrap();
        workload.add_indexes(&[b], vec![95.0], names(1), names(1)).unwrap();
        factory.index(b).update_stats(|s| {
            s.benefit = 5000.0;
            s.positive_queries = vec![0];
        });

        // a 5% improvement alone is below the default rate
        let config = AdvisorConfig::new("public");
        let mut indexes = vec![b];
        filter_low_benefit_indexes(&factory, &workload, &mut indexes, &config).unwrap();
        assert!(indexes.is_empty());

        let mut generous = AdvisorConfig::new("public");
        generous.max_benefit_threshold = Some(5000.0);
        let mut indexes = vec![b];
        filter_low_benefit_indexes(&factory, &workload, &mut indexes, &generous).unwrap();
        assert_eq!(indexes, vec![b]);

        generous.max_benefit_threshold = Some(5000.1);
        let mut indexes = vec![b];
        filter_low_benefit_indexes(&factory, &workload, &mut indexes, &generous).unwrap();
        assert!(indexes.is_empty());
    }
}
