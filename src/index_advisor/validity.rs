//! Which candidates the optimizer actually uses
//!
//! Candidates of a statement are created as hypothetical indexes together and
//! the statement is explained; the ones that appear in the plan are valid.
//! Valid indexes are then widened one column at a time while the plan cost
//! keeps improving, and finally re-checked in both creation orders because the
//! optimizer breaks cost ties by creation order.

use super::context::{per_query, AdvisorContext};
use super::{sql, IndexId, IndexKey, IndexKind, QueryItem};
use crate::executor::HypoSession;
use crate::{Error, Result};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Outcome of one hypothetical check
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckResult {
    /// Indexes the plan used, in creation order
    pub valid: Vec<IndexId>,
    pub cost: Option<f64>,
}

/// Create `indexes` hypothetically, explain `statement` and report the used ones.
///
/// With `widest_first` the indexes are created in descending column count, so
/// on a tie the optimizer picks the narrower index.
pub fn query_index_check(
    context: &AdvisorContext<'_>,
    statement: &str,
    indexes: &[IndexId],
    widest_first: bool,
) -> Result<CheckResult> {
    if indexes.is_empty() {
        return Ok(CheckResult::default());
    }
    let mut ordered: Vec<IndexId> = indexes.to_vec();
    if widest_first {
        ordered.sort_by_key(|id| std::cmp::Reverse(context.factory.index(*id).columns().len()));
    }

    let mut batch = vec![sql::EXPLAIN_PERF_MODE.to_string()];
    batch.extend(ordered.iter().map(|id| sql::hypo_create_sql(&context.factory.index(*id))));
    batch.push(sql::explain_sql(statement));

    let session = HypoSession::open(context.executor, "check");
    let rows = session.run(batch)?;
    let names = sql::created_hypo_names(&rows);
    if names.len() != ordered.len() {
        return Err(Error::Parse(format!(
            "created {} hypothetical indexes, expected {}",
            names.len(),
            ordered.len()
        )));
    }
    let plan = sql::plan_lines(&rows);
    let used = sql::plan_index_names(&plan);
    let valid = ordered
        .iter()
        .zip(&names)
        .filter(|(_, name)| used.contains(name))
        .map(|(id, _)| *id)
        .collect();
    Ok(CheckResult {
        valid,
        cost: sql::plan_top_cost(&plan),
    })
}

/// Keep at most `cap` candidates per table, the ones with the lowest single-index cost
fn filter_candidates_by_cost(
    context: &AdvisorContext<'_>,
    statement: &str,
    candidates: Vec<IndexId>,
) -> Result<Vec<IndexId>> {
    let cap = context.config.max_candidate_columns;
    let mut by_table: BTreeMap<String, Vec<IndexId>> = BTreeMap::new();
    for id in &candidates {
        by_table
            .entry(context.factory.index(*id).table().to_string())
            .or_default()
            .push(*id);
    }
    if by_table.values().all(|ids| ids.len() <= cap) {
        return Ok(candidates);
    }

    let mut kept = Vec::new();
    for (table, ids) in by_table {
        if ids.len() <= cap {
            kept.extend(ids);
            continue;
        }
        let mut scored = Vec::new();
        for id in ids {
            let check = query_index_check(context, statement, &[id], false)?;
            if let (false, Some(cost)) = (check.valid.is_empty(), check.cost) {
                scored.push((cost, id));
            }
        }
        scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal).then(a.1.cmp(&b.1)));
        scored.truncate(cap);
        debug!(table = %table, kept = scored.len(), "Pre-filtered candidates by single-index cost");
        kept.extend(scored.into_iter().map(|(_, id)| id));
    }
    Ok(candidates.into_iter().filter(|id| kept.contains(id)).collect())
}

/// Multi-column extensions of width `width` built from the accepted set and existing indexes
fn widen(
    context: &AdvisorContext<'_>,
    accepted: &[IndexId],
    singles: &[IndexId],
    width: usize,
) -> Vec<IndexId> {
    let factory = &context.factory;
    let mut bases: Vec<(IndexKey, Option<String>)> = accepted
        .iter()
        .map(|id| factory.index(*id))
        .filter(|index| index.columns().len() == width - 1)
        .map(|index| (index.key().clone(), index.source_index().map(str::to_string)))
        .collect();

    // existing indexes of the right width on tables with valid singles
    let mut seen_tables: Vec<(String, IndexKind)> = Vec::new();
    for single in singles.iter().map(|id| factory.index(*id)) {
        let slot = (single.table().to_string(), single.kind());
        if seen_tables.contains(&slot) || single.kind() == IndexKind::Gsi {
            continue;
        }
        for existing in context.existing_on_table(single.table()) {
            if existing.columns.len() == width - 1 {
                bases.push((
                    IndexKey {
                        table: slot.0.clone(),
                        columns: existing.columns.clone(),
                        kind: slot.1,
                        containing: Vec::new(),
                    },
                    Some(existing.qualified_name()),
                ));
            }
        }
        seen_tables.push(slot);
    }

    let mut widened = Vec::new();
    for (base, source) in &bases {
        for single in singles.iter().map(|id| factory.index(*id)) {
            if single.table() != base.table || single.kind() != base.kind {
                continue;
            }
            let column = &single.columns()[0];
            if base.columns.contains(column) {
                continue;
            }
            let mut columns = base.columns.clone();
            columns.push(column.clone());
            let id = factory.intern(
                IndexKey {
                    table: base.table.clone(),
                    columns,
                    kind: base.kind,
                    containing: base.containing.iter().filter(|c| *c != column).cloned().collect(),
                },
                source.as_deref(),
            );
            if !accepted.contains(&id) && !widened.contains(&id) {
                widened.push(id);
            }
        }
    }
    widened
}

/// Valid indexes of one statement, starting from its single-column candidates
pub fn get_valid_indexes(
    context: &AdvisorContext<'_>,
    query: &QueryItem,
    candidates: &[IndexId],
) -> Result<Vec<IndexId>> {
    let statement = query.statement();
    // every surviving single is a widening column, used in the plan or not
    let singles = filter_candidates_by_cost(context, statement, candidates.to_vec())?;
    let first = query_index_check(context, statement, &singles, true)?;
    let (mut accepted, mut accepted_cost) = (first.valid, first.cost);
    if accepted.is_empty() {
        return Ok(Vec::new());
    }

    for width in 2..=context.config.max_index_columns {
        let widened = widen(context, &accepted, &singles, width);
        if widened.is_empty() {
            break;
        }
        let mut trial = accepted.clone();
        trial.extend(widened);
        let check = query_index_check(context, statement, &trial, true)?;
        match (accepted_cost, check.cost) {
            (Some(previous), Some(current)) if previous - current > previous * context.config.widening_min_gain => {
                debug!(statement = %statement, width, previous, current, "Widened candidates");
                accepted = check.valid;
                accepted_cost = check.cost;
            }
            _ => break,
        }
    }

    if accepted.len() > 1 {
        accepted = permutation_check(context, statement, &accepted)?;
    }

    let factory = &context.factory;
    accepted.retain(|id| {
        let index = factory.index(*id);
        let duplicate = context
            .existing_on_table(index.table())
            .any(|existing| existing.columns == index.columns());
        !duplicate
    });
    Ok(accepted)
}

/// Union of the indexes used in both creation orders
fn permutation_check(context: &AdvisorContext<'_>, statement: &str, indexes: &[IndexId]) -> Result<Vec<IndexId>> {
    let forward = query_index_check(context, statement, indexes, true)?;
    let mut reversed: Vec<IndexId> = indexes.to_vec();
    reversed.sort_by_key(|id| context.factory.index(*id).columns().len());
    let backward = query_index_check(context, statement, &reversed, false)?;
    Ok(indexes
        .iter()
        .filter(|id| forward.valid.contains(id) || backward.valid.contains(id))
        .copied()
        .collect())
}

/// Validate the candidates of every statement; statements are independent
pub fn validate_candidates(
    context: &AdvisorContext<'_>,
    queries: &[QueryItem],
    candidates: &[Vec<IndexId>],
) -> Result<Vec<Vec<IndexId>>> {
    let results = context.map_items(queries, |position, query| {
        let own = &candidates[position];
        if own.is_empty() {
            return Ok(Vec::new());
        }
        let result = get_valid_indexes(context, query, own);
        per_query("validity", query.statement(), result, Vec::new())
    });
    results.into_iter().collect()
}

/// Sorted union of the valid indexes of all statements
pub fn valid_union(context: &AdvisorContext<'_>, valid: &[Vec<IndexId>]) -> Vec<IndexId> {
    let mut seen: HashSet<IndexId> = HashSet::new();
    let mut union: Vec<IndexId> = valid
        .iter()
        .flatten()
        .filter(|id| seen.insert(**id))
        .copied()
        .collect();
    union.sort_by(|a, b| context.factory.index(*a).key().cmp(context.factory.index(*b).key()));
    union
}
