use super::IndexId;
use serde::{Deserialize, Serialize};

/// Statement class, used for the DML ratios of a recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Other,
}

impl StatementKind {
    pub fn of(statement: &str) -> Self {
        let lowered = statement.trim_start().to_ascii_lowercase();
        let first = lowered
            .split(|c: char| c.is_whitespace() || c == '(')
            .find(|w| !w.is_empty())
            .unwrap_or("");
        match first {
            "select" => StatementKind::Select,
            "insert" => StatementKind::Insert,
            "update" => StatementKind::Update,
            "delete" => StatementKind::Delete,
            // the first top-level verb after the CTE list decides
            "with" => top_level_words(&lowered)
                .into_iter()
                .find_map(|w| match w.as_str() {
                    "select" => Some(StatementKind::Select),
                    "insert" => Some(StatementKind::Insert),
                    "update" => Some(StatementKind::Update),
                    "delete" => Some(StatementKind::Delete),
                    _ => None,
                })
                .unwrap_or(StatementKind::Select),
            _ => StatementKind::Other,
        }
    }

    pub fn is_dml(&self) -> bool {
        matches!(self, StatementKind::Insert | StatementKind::Update | StatementKind::Delete)
    }
}

fn top_level_words(sql: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in sql.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            c if depth == 0 && (c.is_ascii_alphanumeric() || c == '_') => {
                current.push(c);
                continue;
            }
            _ => {}
        }
        if !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// A representative workload statement and its estimated execution count
#[derive(Debug, Clone)]
pub struct QueryItem {
    statement: String,
    frequency: f64,
    kind: StatementKind,
    valid_indexes: Vec<IndexId>,
    benefit: f64,
}

impl QueryItem {
    pub fn new(statement: impl Into<String>, frequency: f64) -> Self {
        let statement = statement.into();
        let kind = StatementKind::of(&statement);
        Self {
            statement,
            frequency,
            kind,
            valid_indexes: Vec::new(),
            benefit: 0.0,
        }
    }

    pub fn statement(&self) -> &str {
        &self.statement
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    /// Candidates the optimizer actually used for this statement
    pub fn valid_indexes(&self) -> &[IndexId] {
        &self.valid_indexes
    }

    pub fn set_valid_indexes(&mut self, indexes: Vec<IndexId>) {
        self.valid_indexes = indexes;
    }

    pub fn benefit(&self) -> f64 {
        self.benefit
    }

    pub fn set_benefit(&mut self, benefit: f64) {
        self.benefit = benefit;
    }
}

impl PartialEq for QueryItem {
    fn eq(&self, other: &Self) -> bool {
        self.statement == other.statement
    }
}

impl Eq for QueryItem {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_kind() {
        assert_eq!(StatementKind::of("  SELECT * FROM t"), StatementKind::Select);
        assert_eq!(StatementKind::of("insert into t values (1)"), StatementKind::Insert);
        assert_eq!(StatementKind::of("(select 1)"), StatementKind::Select);
        assert_eq!(
            StatementKind::of("with x as (select a from t) delete from u where a in (select a from x)"),
            StatementKind::Delete
        );
        assert_eq!(
            StatementKind::of("with x as (select a from t) update u set b = 1"),
            StatementKind::Update
        );
        assert_eq!(StatementKind::of("vacuum t"), StatementKind::Other);
    }

    #[test]
    fn test_identity_by_statement() {
        let a = QueryItem::new("select 1", 1.0);
        let b = QueryItem::new("select 1", 7.0);
        assert_eq!(a, b);
    }
}
