//! Workload compression
//!
//! Raw statements are grouped by template (literals replaced with a
//! placeholder). Each template keeps a bounded reservoir of representative
//! statements, and its execution count is spread evenly over them.

use super::QueryItem;
use crate::{Error, Result};
use lazy_static::lazy_static;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

pub const PLACEHOLDER: &str = "@@@";

lazy_static! {
    static ref QUOTED_LITERAL: Regex = Regex::new(r"'(?:[^']|'')*'").unwrap();
    static ref NUMBER_SET: Regex = Regex::new(
        r"\(\s*[-+]?\d+(?:\.\d+)?\s*(?:,\s*[-+]?\d+(?:\.\d+)?\s*)*,?\s*\)"
    ).unwrap();
    static ref NUMBER: Regex = Regex::new(r"\b\d+(?:\.\d+)?\b").unwrap();
    static ref DML_STATEMENT: Regex =
        Regex::new(r"(?i)(?:\A|[\s(,])(?:select|delete|insert|update)[\s*(]").unwrap();
    static ref BLANKS: Regex = Regex::new(r"\s+").unwrap();
}

/// Samples and total execution count of one template
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateEntry {
    pub cnt: u64,
    pub samples: Vec<String>,
    /// Statements folded into the reservoir so far
    #[serde(skip)]
    seen: u64,
}

impl TemplateEntry {
    pub fn new(cnt: u64, samples: Vec<String>) -> Self {
        Self {
            cnt,
            samples,
            seen: 0,
        }
    }
}

pub type TemplateStore = BTreeMap<String, TemplateEntry>;

/// Replace literal constants with the placeholder
pub fn templatize(sql: &str) -> String {
    let template = QUOTED_LITERAL.replace_all(sql, PLACEHOLDER);
    let template = NUMBER_SET.replace_all(&template, format!("({})", PLACEHOLDER).as_str());
    NUMBER.replace_all(&template, PLACEHOLDER).into_owned()
}

/// Split SQL text on `;`, ignoring separators inside quotes and comments
pub fn split_statements(text: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    let mut in_single = false;
    let mut in_double = false;

    while let Some(c) = chars.next() {
        if in_single {
            current.push(c);
            if c == '\'' {
                in_single = false;
            }
            continue;
        }
        if in_double {
            current.push(c);
            if c == '"' {
                in_double = false;
            }
            continue;
        }
        match c {
            '\'' => {
                in_single = true;
                current.push(c);
            }
            '"' => {
                in_double = true;
                current.push(c);
            }
            '-' if chars.peek() == Some(&'-') => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        break;
                    }
                }
                current.push(' ');
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for skipped in chars.by_ref() {
                    if prev == '*' && skipped == '/' {
                        break;
                    }
                    prev = skipped;
                }
                current.push(' ');
            }
            ';' => {
                let statement = current.trim();
                if !statement.is_empty() {
                    statements.push(statement.to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    let statement = current.trim();
    if !statement.is_empty() {
        statements.push(statement.to_string());
    }
    statements
}

/// Distinct DML statements of a SQL text with their occurrence counts, in order of first appearance
pub fn load_workload(text: &str) -> Vec<(String, u64)> {
    let mut order = Vec::new();
    let mut counts: HashMap<String, u64> = HashMap::new();
    for statement in split_statements(text) {
        if !DML_STATEMENT.is_match(&statement) {
            debug!(statement = %statement, "Skipping non-DML statement");
            continue;
        }
        let normalized = BLANKS.replace_all(statement.trim(), " ").into_owned();
        let count = counts.entry(normalized.clone()).or_insert(0);
        if *count == 0 {
            order.push(normalized);
        }
        *count += 1;
    }
    order
        .into_iter()
        .map(|sql| {
            let cnt = counts.get(&sql).copied().unwrap_or(1);
            (sql, cnt)
        })
        .collect()
}

/// Group statements by template, keeping at most `sample_num` reservoir-sampled statements each
pub fn build_templates(statements: &[(String, u64)], sample_num: usize, seed: u64) -> TemplateStore {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut templates = TemplateStore::new();
    for (statement, frequency) in statements {
        let entry = templates.entry(templatize(statement)).or_default();
        entry.cnt += frequency;
        entry.seen += 1;
        if entry.samples.len() < sample_num {
            entry.samples.push(statement.clone());
        } else if rng.random_range(0..entry.seen) < sample_num as u64 {
            let slot = rng.random_range(0..sample_num);
            entry.samples[slot] = statement.clone();
        }
    }
    templates
}

/// Spread each template's count over its samples
pub fn compress(templates: &TemplateStore) -> (Vec<QueryItem>, u64) {
    let mut queries = Vec::new();
    let mut total = 0;
    for (template, entry) in templates {
        if entry.samples.is_empty() {
            debug!(template = %template, "Template has no samples");
            continue;
        }
        let frequency = entry.cnt as f64 / entry.samples.len() as f64;
        for sample in &entry.samples {
            queries.push(QueryItem::new(sample.trim(), frequency));
        }
        total += entry.cnt;
    }
    (queries, total)
}

/// Load and compress a workload file, either raw SQL or a JSON template store
pub fn compress_file<P: AsRef<Path>>(
    path: P,
    json: bool,
    sample_num: usize,
    seed: u64,
) -> Result<(Vec<QueryItem>, u64)> {
    let text = fs::read_to_string(path.as_ref())?;
    let templates = if json {
        serde_json::from_str::<TemplateStore>(&text)
            .map_err(|e| Error::Workload(format!("invalid template store: {}", e)))?
    } else {
        build_templates(&load_workload(&text), sample_num, seed)
    };
    let (queries, total) = compress(&templates);
    info!(
        templates = templates.len(),
        statements = queries.len(),
        total_count = total,
        "Workload compressed"
    );
    Ok((queries, total))
}
