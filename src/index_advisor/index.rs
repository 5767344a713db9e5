//! Index model
//!
//! Candidate indexes are interned by [`IndexFactory`]: two requests for the
//! same (table, columns, kind, containing) return the same [`IndexId`], so
//! configurations can be compared, hashed and de-duplicated by handle.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Physical flavour of an index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// Plain index on an unpartitioned table
    Ordinary,
    /// Partition-local index
    Local,
    /// Partition-global index
    Global,
    /// Distributed global secondary index, optionally covering extra columns
    Gsi,
}

impl IndexKind {
    pub fn label(&self) -> &'static str {
        match self {
            IndexKind::Ordinary => "",
            IndexKind::Local => "local",
            IndexKind::Global => "global",
            IndexKind::Gsi => "gsi",
        }
    }

    /// Kinds an index on a table may take
    pub fn for_table(partitioned: bool, gsi: bool) -> Vec<IndexKind> {
        let mut kinds = if partitioned {
            vec![IndexKind::Local, IndexKind::Global]
        } else {
            vec![IndexKind::Ordinary]
        };
        if gsi {
            kinds.push(IndexKind::Gsi);
        }
        kinds
    }

    fn create_clause(&self, table: &str, columns: &str, containing: &[String], name: Option<&str>) -> String {
        let name = name.map(|n| format!("{} ", n)).unwrap_or_default();
        match self {
            IndexKind::Ordinary => format!("CREATE INDEX {}ON {}({})", name, table, columns),
            IndexKind::Local => format!("CREATE INDEX {}ON {}({}) LOCAL", name, table, columns),
            IndexKind::Global => format!("CREATE INDEX {}ON {}({}) GLOBAL", name, table, columns),
            IndexKind::Gsi if containing.is_empty() => {
                format!("CREATE GLOBAL INDEX {}ON {}({})", name, table, columns)
            }
            IndexKind::Gsi => format!(
                "CREATE GLOBAL INDEX {}ON {}({}) CONTAINING ({})",
                name,
                table,
                columns,
                containing.join(", ")
            ),
        }
    }
}

/// Interned handle of an [`AdvisedIndex`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexId(u32);

impl IndexId {
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of a candidate index
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexKey {
    pub table: String,
    pub columns: Vec<String>,
    pub kind: IndexKind,
    pub containing: Vec<String>,
}

/// Mutable evaluation results of a candidate
#[derive(Debug, Clone, Default)]
pub struct IndexStats {
    /// Estimated size in MB
    pub storage_mb: f64,
    /// Frequency-weighted workload benefit of the index alone
    pub benefit: f64,
    /// Query positions whose cost the index strictly reduces
    pub positive_queries: Vec<usize>,
    /// Query positions whose cost the index strictly increases
    pub negative_queries: Vec<usize>,
    /// Related query positions the index leaves unchanged
    pub ineffective_queries: Vec<usize>,
    /// Other members of a configuration -> portfolio returns realised with them
    pub association_indexes: BTreeMap<String, Vec<f64>>,
}

/// A candidate index proposed by the advisor
#[derive(Debug)]
pub struct AdvisedIndex {
    id: IndexId,
    key: IndexKey,
    source_index: Option<String>,
    stats: RwLock<IndexStats>,
}

impl AdvisedIndex {
    pub fn id(&self) -> IndexId {
        self.id
    }

    pub fn key(&self) -> &IndexKey {
        &self.key
    }

    /// Schema-qualified table name
    pub fn table(&self) -> &str {
        &self.key.table
    }

    pub fn schema_name(&self) -> &str {
        self.key.table.split_once('.').map(|(s, _)| s).unwrap_or("")
    }

    pub fn table_name(&self) -> &str {
        self.key
            .table
            .split_once('.')
            .map(|(_, t)| t)
            .unwrap_or(&self.key.table)
    }

    pub fn columns(&self) -> &[String] {
        &self.key.columns
    }

    pub fn columns_label(&self) -> String {
        self.key.columns.join(", ")
    }

    pub fn kind(&self) -> IndexKind {
        self.key.kind
    }

    pub fn containing(&self) -> &[String] {
        &self.key.containing
    }

    /// Existing index this candidate was widened from
    pub fn source_index(&self) -> Option<&str> {
        self.source_index.as_deref()
    }

    pub fn stats(&self) -> IndexStats {
        self.stats.read().clone()
    }

    pub fn update_stats<F: FnOnce(&mut IndexStats)>(&self, f: F) {
        f(&mut self.stats.write());
    }

    pub fn benefit(&self) -> f64 {
        self.stats.read().benefit
    }

    pub fn storage_mb(&self) -> f64 {
        self.stats.read().storage_mb
    }

    /// Statement handed to `hypopg_create_index`
    pub fn hypo_statement(&self) -> String {
        self.key
            .kind
            .create_clause(&self.key.table, &self.columns_label(), &self.key.containing, None)
    }

    /// Generated index name used in recommendations
    pub fn index_name(&self) -> String {
        let mut parts = vec!["idx".to_string(), self.table_name().to_string()];
        if !self.key.kind.label().is_empty() {
            parts.push(self.key.kind.label().to_string());
        }
        parts.extend(self.key.columns.iter().cloned());
        parts.join("_")
    }

    /// DDL of the recommendation
    pub fn statement(&self) -> String {
        format!(
            "{};",
            self.key.kind.create_clause(
                &self.key.table,
                &self.columns_label(),
                &self.key.containing,
                Some(&self.index_name()),
            )
        )
    }

    /// True if both indexes live on the same table and `self`'s columns lead `other`'s
    pub fn is_prefix_of(&self, other: &AdvisedIndex) -> bool {
        self.table() == other.table() && is_column_prefix(self.columns(), other.columns())
    }
}

impl fmt::Display for AdvisedIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.key.table, self.columns_label())?;
        if !self.key.kind.label().is_empty() {
            write!(f, " {}", self.key.kind.label())?;
        }
        if !self.key.containing.is_empty() {
            write!(f, " containing({})", self.key.containing.join(", "))?;
        }
        Ok(())
    }
}

/// `short` is a (non-strict) leading prefix of `long`
pub fn is_column_prefix(short: &[String], long: &[String]) -> bool {
    short.len() <= long.len() && short.iter().zip(long).all(|(a, b)| a == b)
}

/// Interning arena for candidate indexes, owned by one advisor run
#[derive(Debug, Default)]
pub struct IndexFactory {
    keys: Mutex<HashMap<IndexKey, IndexId>>,
    arena: RwLock<Vec<Arc<AdvisedIndex>>>,
}

impl IndexFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_index(&self, table: &str, columns: &[String], kind: IndexKind) -> IndexId {
        self.intern(
            IndexKey {
                table: table.to_string(),
                columns: columns.to_vec(),
                kind,
                containing: Vec::new(),
            },
            None,
        )
    }

    /// Intern a key, remembering the existing index it was derived from on first sight
    pub fn intern(&self, key: IndexKey, source_index: Option<&str>) -> IndexId {
        let mut keys = self.keys.lock();
        if let Some(id) = keys.get(&key) {
            return *id;
        }
        let mut arena = self.arena.write();
        let id = IndexId(arena.len() as u32);
        arena.push(Arc::new(AdvisedIndex {
            id,
            key: key.clone(),
            source_index: source_index.map(str::to_string),
            stats: RwLock::new(IndexStats::default()),
        }));
        keys.insert(key, id);
        id
    }

    pub fn lookup(&self, key: &IndexKey) -> Option<IndexId> {
        self.keys.lock().get(key).copied()
    }

    pub fn index(&self, id: IndexId) -> Arc<AdvisedIndex> {
        Arc::clone(&self.arena.read()[id.as_usize()])
    }

    pub fn len(&self) -> usize {
        self.arena.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Human-readable label of a configuration
    pub fn describe(&self, config: &[IndexId]) -> String {
        if config.is_empty() {
            return "<baseline>".to_string();
        }
        config
            .iter()
            .map(|id| self.index(*id).to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// An index already present in the target schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingIndex {
    pub schema: String,
    pub table: String,
    pub name: String,
    pub columns: Vec<String>,
    pub definition: String,
    pub is_primary_or_unique: bool,
}

impl ExistingIndex {
    pub fn qualified_table(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

impl fmt::Display for ExistingIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}.{}({})", self.name, self.schema, self.table, self.columns.join(", "))
    }
}
