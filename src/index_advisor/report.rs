//! Advisor output

use super::query::StatementKind;
use super::workload::{QueryEffect, WorkLoad};
use super::{AdvisedIndex, ExistingIndex, IndexKind};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationType {
    Positive,
    Ineffective,
    Negative,
}

impl From<QueryEffect> for CorrelationType {
    fn from(effect: QueryEffect) -> Self {
        match effect {
            QueryEffect::Positive => CorrelationType::Positive,
            QueryEffect::Ineffective => CorrelationType::Ineffective,
            QueryEffect::Negative => CorrelationType::Negative,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlDetail {
    pub sql_template: String,
    pub sql: String,
    pub sql_count: f64,
    /// Percentage cost reduction of the statement
    pub optimized: f64,
    pub correlation_type: CorrelationType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedIndex {
    pub schema_name: String,
    pub tb_name: String,
    pub columns: String,
    pub index_type: IndexKind,
    pub statement: String,
    /// Percentage of the workload cost removed by this index alone
    pub workload_optimized: f64,
    pub benefit: f64,
    /// Estimated size in MB
    pub storage: f64,
    pub dml_count: f64,
    pub select_ratio: f64,
    pub insert_ratio: f64,
    pub update_ratio: f64,
    pub delete_ratio: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_index: Option<String>,
    pub sql_details: Vec<SqlDetail>,
    pub association_indexes: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UselessKind {
    Unused,
    Redundant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UselessIndex {
    pub schema_name: String,
    pub tb_name: String,
    pub index_name: String,
    pub columns: String,
    pub statement: String,
    #[serde(rename = "type")]
    pub kind: UselessKind,
    /// Existing indexes covering a redundant one
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub covered_by: Vec<String>,
}

impl UselessIndex {
    pub fn new(index: &ExistingIndex, kind: UselessKind, covered_by: Vec<String>) -> Self {
        Self {
            schema_name: index.schema.clone(),
            tb_name: index.table.clone(),
            index_name: index.name.clone(),
            columns: index.columns.join(", "),
            statement: format!("DROP INDEX {};", index.qualified_name()),
            kind,
            covered_by,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedIndex {
    pub schema_name: String,
    pub tb_name: String,
    pub index_name: String,
    pub columns: String,
    pub statement: String,
}

impl From<&ExistingIndex> for CreatedIndex {
    fn from(index: &ExistingIndex) -> Self {
        Self {
            schema_name: index.schema.clone(),
            tb_name: index.table.clone(),
            index_name: index.name.clone(),
            columns: index.columns.join(", "),
            statement: index.definition.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvisorReport {
    pub recommend_indexes: Vec<RecommendedIndex>,
    pub useless_indexes: Vec<UselessIndex>,
    pub created_indexes: Vec<CreatedIndex>,
    /// Statements in the raw workload
    pub workload_count: u64,
    /// Statements whose cost the recommendation lowers
    pub positive_stmt_count: usize,
    /// Percentage of the workload cost removed by the whole recommendation
    pub workload_optimized: f64,
}

impl AdvisorReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn percentage(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        (part / whole * 10_000.0).round() / 100.0
    } else {
        0.0
    }
}

/// Report entry of one recommended index
pub fn recommended_index(index: &AdvisedIndex, workload: &WorkLoad, template_of: impl Fn(&str) -> String) -> Result<RecommendedIndex> {
    let stats = index.stats();
    let origin = workload.total_origin_cost()?;

    let mut counts: BTreeMap<&'static str, f64> = BTreeMap::new();
    let mut details = Vec::new();
    let mut related: Vec<(usize, CorrelationType)> = stats
        .positive_queries
        .iter()
        .map(|q| (*q, CorrelationType::Positive))
        .chain(stats.ineffective_queries.iter().map(|q| (*q, CorrelationType::Ineffective)))
        .chain(stats.negative_queries.iter().map(|q| (*q, CorrelationType::Negative)))
        .collect();
    related.sort_by_key(|(q, _)| *q);

    for (position, correlation) in related {
        let query = workload.query(position);
        let kind = match query.kind() {
            StatementKind::Select => "select",
            StatementKind::Insert => "insert",
            StatementKind::Update => "update",
            StatementKind::Delete => "delete",
            StatementKind::Other => continue,
        };
        *counts.entry(kind).or_default() += query.frequency();
        let query_origin = workload.origin_cost_of_query(position)?;
        let optimized = if workload.has_indexes(&[index.id()]) {
            percentage(workload.query_benefit(position, &[index.id()])?, query_origin)
        } else {
            0.0
        };
        details.push(SqlDetail {
            sql_template: template_of(query.statement()),
            sql: query.statement().to_string(),
            sql_count: query.frequency(),
            optimized,
            correlation_type: correlation,
        });
    }
    let total: f64 = counts.values().sum();
    let ratio = |kind: &str| percentage(counts.get(kind).copied().unwrap_or(0.0), total);

    Ok(RecommendedIndex {
        schema_name: index.schema_name().to_string(),
        tb_name: index.table_name().to_string(),
        columns: index.columns_label(),
        index_type: index.kind(),
        statement: index.statement(),
        workload_optimized: percentage(stats.benefit, origin),
        benefit: stats.benefit,
        storage: stats.storage_mb,
        dml_count: total,
        select_ratio: ratio("select"),
        insert_ratio: ratio("insert"),
        update_ratio: ratio("update"),
        delete_ratio: ratio("delete"),
        source_index: index.source_index().map(str::to_string),
        sql_details: details,
        association_indexes: stats
            .association_indexes
            .iter()
            .map(|(partners, returns)| (partners.clone(), returns.iter().sum()))
            .collect(),
    })
}

pub(crate) fn workload_percentage(benefit: f64, origin: f64) -> f64 {
    percentage(benefit, origin)
}

/// Human-readable rendering of a report
pub fn render_text(report: &AdvisorReport, show_detail: bool, show_benefits: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:*^60}", " Recommended indexes ");
    if report.recommend_indexes.is_empty() {
        let _ = writeln!(out, "No index is recommended.");
    }
    for (n, index) in report.recommend_indexes.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", n + 1, index.statement);
        if show_benefits {
            let _ = writeln!(
                out,
                "   workload optimized: {:.2}%  benefit: {:.2}  storage: {:.2} MB",
                index.workload_optimized, index.benefit, index.storage
            );
            for (partners, returns) in &index.association_indexes {
                let _ = writeln!(out, "   with {}: +{:.2}", partners, returns);
            }
        }
        if show_detail {
            let _ = writeln!(
                out,
                "   select {:.2}%  insert {:.2}%  update {:.2}%  delete {:.2}%",
                index.select_ratio, index.insert_ratio, index.update_ratio, index.delete_ratio
            );
            for detail in &index.sql_details {
                let _ = writeln!(
                    out,
                    "   [{:?}] x{} {:.2}%  {}",
                    detail.correlation_type, detail.sql_count, detail.optimized, detail.sql
                );
            }
        }
    }
    if !report.useless_indexes.is_empty() {
        let _ = writeln!(out, "{:*^60}", " Useless indexes ");
        for index in &report.useless_indexes {
            let _ = writeln!(out, "{:?}: {}", index.kind, index.statement);
        }
    }
    let _ = writeln!(out, "{:*^60}", " Summary ");
    let _ = writeln!(
        out,
        "workload statements: {}  improved: {}  optimized: {:.2}%",
        report.workload_count, report.positive_stmt_count, report.workload_optimized
    );
    out
}
