use crate::executor::{Executor, Row};
use crate::index_advisor::parser;
use crate::index_advisor::query::StatementKind;
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

const SEQ_STARTUP: f64 = 1.0;
const SEQ_ROW_COST: f64 = 0.0125;
const INDEX_STARTUP: f64 = 0.5;
const INDEX_COLUMN_COST: f64 = 0.02;
const INDEX_ROW_COST: f64 = 0.05;
const LOCAL_INDEX_PENALTY: f64 = 0.2;
const GSI_PENALTY: f64 = 1.0;
const WRITE_BASE_COST: f64 = 0.02;
const INDEX_MAINTENANCE_COST: f64 = 0.4;

#[derive(Debug, Clone)]
struct SimTable {
    name: String,
    rows: f64,
    /// (column, n_distinct as stored in pg_stats)
    columns: Vec<(String, f64)>,
    partitioned: bool,
}

impl SimTable {
    fn distinct(&self, column: &str) -> Option<f64> {
        self.columns.iter().find(|(c, _)| c == column).map(|(_, nd)| {
            if *nd < 0.0 {
                -nd * self.rows
            } else {
                *nd
            }
        })
    }

    fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|(c, _)| c == column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimIndexKind {
    Plain,
    Local,
    Global,
    Gsi,
}

#[derive(Debug, Clone)]
struct SimIndex {
    oid: u32,
    name: String,
    table: String,
    columns: Vec<String>,
    kind: SimIndexKind,
    unique: bool,
}

/// Chosen access path for one table
struct Access {
    line: String,
    detail: Option<String>,
    cost: f64,
    rows: f64,
}

/// Deterministic in-process database used by tests
#[derive(Debug)]
pub struct SimulatedDatabase {
    schema: String,
    tables: BTreeMap<String, SimTable>,
    indexes: Vec<SimIndex>,
    failing: Vec<String>,
    silent: Vec<String>,
    next_oid: AtomicU32,
    calls: AtomicUsize,
}

impl SimulatedDatabase {
    pub fn new(schema: &str) -> Self {
        Self {
            schema: schema.to_string(),
            tables: BTreeMap::new(),
            indexes: Vec::new(),
            failing: Vec::new(),
            silent: Vec::new(),
            next_oid: AtomicU32::new(16384),
            calls: AtomicUsize::new(0),
        }
    }

    /// Add a table; a negative n_distinct is a fraction of the row count
    pub fn table(self, name: &str, rows: f64, columns: &[(&str, f64)]) -> Self {
        self.add_table(name, rows, columns, false)
    }

    pub fn partitioned_table(self, name: &str, rows: f64, columns: &[(&str, f64)]) -> Self {
        self.add_table(name, rows, columns, true)
    }

    fn add_table(mut self, name: &str, rows: f64, columns: &[(&str, f64)], partitioned: bool) -> Self {
        self.tables.insert(
            name.to_string(),
            SimTable {
                name: name.to_string(),
                rows,
                columns: columns.iter().map(|(c, nd)| (c.to_string(), *nd)).collect(),
                partitioned,
            },
        );
        self
    }

    /// Add a physical index
    pub fn index(self, name: &str, table: &str, columns: &[&str]) -> Self {
        self.add_index(name, table, columns, false)
    }

    pub fn primary_key(self, name: &str, table: &str, columns: &[&str]) -> Self {
        self.add_index(name, table, columns, true)
    }

    fn add_index(mut self, name: &str, table: &str, columns: &[&str], unique: bool) -> Self {
        let oid = self.next_oid.fetch_add(1, Ordering::SeqCst);
        self.indexes.push(SimIndex {
            oid,
            name: name.to_string(),
            table: table.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            kind: SimIndexKind::Plain,
            unique,
        });
        self
    }

    /// Any statement containing `fragment` fails
    pub fn fail_on(mut self, fragment: &str) -> Self {
        self.failing.push(fragment.to_ascii_lowercase());
        self
    }

    /// Any hypothetical index whose statement contains `fragment` is created
    /// without reporting its name
    pub fn silent_on(mut self, fragment: &str) -> Self {
        self.silent.push(fragment.to_ascii_lowercase());
        self
    }

    /// Batches executed so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn bare_table<'a>(&self, name: &'a str) -> &'a str {
        name.rsplit('.').next().unwrap_or(name)
    }

    fn quoted_tables(&self, sql: &str) -> Vec<&SimTable> {
        self.tables
            .values()
            .filter(|t| sql.contains(&format!("'{}'", t.name)))
            .collect()
    }

    fn schema_matches(&self, sql: &str) -> bool {
        sql.contains(&format!("'{}'", self.schema))
    }

    fn create_hypo(&self, sql: &str) -> Result<SimIndex> {
        let start = sql.find('\'').ok_or_else(|| Error::Executor("ERROR: bad hypopg call".into()))?;
        let end = sql.rfind('\'').filter(|e| *e > start).ok_or_else(|| Error::Executor("ERROR: bad hypopg call".into()))?;
        let ddl = sql[start + 1..end].replace("''", "'");
        let lowered = ddl.to_ascii_lowercase();

        let on = lowered.find(" on ").ok_or_else(|| Error::Executor(format!("ERROR: syntax error in {}", ddl)))?;
        let open = lowered[on..].find('(').map(|p| on + p).ok_or_else(|| Error::Executor(format!("ERROR: syntax error in {}", ddl)))?;
        let close = lowered[open..].find(')').map(|p| open + p).ok_or_else(|| Error::Executor(format!("ERROR: syntax error in {}", ddl)))?;

        let table = self.bare_table(lowered[on + 4..open].trim()).to_string();
        let columns: Vec<String> = lowered[open + 1..close]
            .split(',')
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        let sim_table = self
            .tables
            .get(&table)
            .ok_or_else(|| Error::Executor(format!("ERROR: relation \"{}\" does not exist", table)))?;
        if let Some(missing) = columns.iter().find(|c| !sim_table.has_column(c)) {
            return Err(Error::Executor(format!("ERROR: column \"{}\" does not exist", missing)));
        }

        let kind = if lowered.starts_with("create global index") {
            SimIndexKind::Gsi
        } else if lowered[close..].contains("local") {
            SimIndexKind::Local
        } else if lowered[close..].contains("global") {
            SimIndexKind::Global
        } else {
            SimIndexKind::Plain
        };
        let prefix = match kind {
            SimIndexKind::Plain => "",
            SimIndexKind::Local => "local_",
            SimIndexKind::Global => "global_",
            SimIndexKind::Gsi => "gsi_",
        };
        let oid = self.next_oid.fetch_add(1, Ordering::SeqCst);
        Ok(SimIndex {
            oid,
            name: format!("<{}>btree_{}{}_{}", oid, prefix, table, columns.join("_")),
            table,
            columns,
            kind,
            unique: false,
        })
    }

    fn index_size(&self, index: &SimIndex) -> f64 {
        let rows = self.tables.get(&index.table).map(|t| t.rows).unwrap_or(0.0);
        rows * (16.0 + 8.0 * index.columns.len() as f64)
    }

    fn access_path(&self, table: &SimTable, predicates: &BTreeSet<String>, available: &[&SimIndex]) -> Access {
        let selectivity: f64 = predicates
            .iter()
            .filter_map(|c| table.distinct(c))
            .map(|nd| 1.0 / nd.max(1.0))
            .product();
        let out_rows = (table.rows * selectivity).max(1.0);
        let filter = if predicates.is_empty() {
            None
        } else {
            Some(format!(
                "Filter: ({})",
                predicates.iter().map(|c| format!("{} = $1", c)).collect::<Vec<_>>().join(" AND ")
            ))
        };
        let mut best = Access {
            line: format!(
                "Seq Scan on {}  (cost=0.00..{:.2} rows={:.0} width=8)",
                table.name,
                SEQ_STARTUP + table.rows * SEQ_ROW_COST,
                out_rows
            ),
            detail: filter,
            cost: SEQ_STARTUP + table.rows * SEQ_ROW_COST,
            rows: out_rows,
        };

        for index in available.iter().filter(|i| i.table == table.name) {
            let matched: Vec<&String> = index
                .columns
                .iter()
                .take_while(|c| predicates.contains(*c))
                .collect();
            if matched.is_empty() {
                continue;
            }
            let matched_selectivity: f64 = matched
                .iter()
                .filter_map(|c| table.distinct(c))
                .map(|nd| 1.0 / nd.max(1.0))
                .product();
            let matched_rows = (table.rows * matched_selectivity).max(1.0);
            let mut cost = INDEX_STARTUP
                + INDEX_COLUMN_COST * index.columns.len() as f64
                + INDEX_ROW_COST * matched_rows;
            match index.kind {
                SimIndexKind::Local => cost += LOCAL_INDEX_PENALTY,
                SimIndexKind::Gsi => cost += GSI_PENALTY,
                SimIndexKind::Plain | SimIndexKind::Global => {}
            }
            // ties go to the index created last
            if cost <= best.cost {
                best = Access {
                    line: format!(
                        "Index Scan using {} on {}  (cost=0.00..{:.2} rows={:.0} width=8)",
                        index.name, table.name, cost, out_rows
                    ),
                    detail: Some(format!(
                        "Index Cond: ({})",
                        matched.iter().map(|c| format!("{} = $1", c)).collect::<Vec<_>>().join(" AND ")
                    )),
                    cost,
                    rows: out_rows,
                };
            }
        }
        best
    }

    fn explain(&self, statement: &str, hypo: &[SimIndex]) -> Result<Vec<Row>> {
        let kind = StatementKind::of(statement);
        let mut tables = Vec::new();
        for name in parser::parse_tables(statement) {
            let bare = self.bare_table(&name);
            let table = self
                .tables
                .get(bare)
                .ok_or_else(|| Error::Executor(format!("ERROR: relation \"{}\" does not exist", bare)))?;
            tables.push(table);
        }
        if tables.is_empty() {
            return Ok(vec![vec!["Result  (cost=0.00..0.01 rows=1 width=0)".to_string()]]);
        }

        let available: Vec<&SimIndex> = self.indexes.iter().chain(hypo.iter()).collect();
        let lowered = statement.to_ascii_lowercase();
        let where_part = lowered.find(" where ").map(|p| &lowered[p + 7..]).unwrap_or("");
        let mentioned = parser::identifiers(where_part);

        let mut lines = Vec::new();
        match kind {
            StatementKind::Insert => {
                let target = tables[0];
                let maintained = available.iter().filter(|i| i.table == target.name).count();
                let cost = WRITE_BASE_COST + INDEX_MAINTENANCE_COST * maintained as f64;
                lines.push(format!("Insert on {}  (cost=0.00..{:.2} rows=1 width=0)", target.name, cost));
                lines.push("  ->  Result  (cost=0.00..0.01 rows=1 width=0)".to_string());
            }
            StatementKind::Update | StatementKind::Delete => {
                let target = tables[0];
                let predicates: BTreeSet<String> =
                    mentioned.iter().filter(|c| target.has_column(c)).cloned().collect();
                let access = self.access_path(target, &predicates, &available);
                let maintained = available.iter().filter(|i| i.table == target.name).count();
                let cost = access.cost + WRITE_BASE_COST + INDEX_MAINTENANCE_COST * maintained as f64;
                let verb = if kind == StatementKind::Update { "Update" } else { "Delete" };
                lines.push(format!(
                    "{} on {}  (cost=0.00..{:.2} rows={:.0} width=8)",
                    verb, target.name, cost, access.rows
                ));
                lines.push(format!("  ->  {}", access.line));
                if let Some(detail) = access.detail {
                    lines.push(format!("        {}", detail));
                }
            }
            _ => {
                let accesses: Vec<Access> = tables
                    .iter()
                    .map(|table| {
                        let predicates: BTreeSet<String> =
                            mentioned.iter().filter(|c| table.has_column(c)).cloned().collect();
                        self.access_path(table, &predicates, &available)
                    })
                    .collect();
                if accesses.len() == 1 {
                    let access = &accesses[0];
                    lines.push(access.line.clone());
                    if let Some(detail) = &access.detail {
                        lines.push(format!("  {}", detail));
                    }
                } else {
                    let total: f64 = accesses.iter().map(|a| a.cost).sum::<f64>() + 0.01 * accesses.len() as f64;
                    let rows = accesses.iter().map(|a| a.rows).fold(1.0, f64::max);
                    lines.push(format!("Hash Join  (cost=0.00..{:.2} rows={:.0} width=16)", total, rows));
                    for access in &accesses {
                        lines.push(format!("  ->  {}", access.line));
                        if let Some(detail) = &access.detail {
                            lines.push(format!("        {}", detail));
                        }
                    }
                }
            }
        }
        Ok(lines.into_iter().map(|l| vec![l]).collect())
    }
}

impl Executor for SimulatedDatabase {
    fn execute_sqls(&self, sqls: &[String]) -> Result<Vec<Row>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut rows = Vec::new();
        let mut hypo: Vec<SimIndex> = Vec::new();
        let mut hypo_enabled = false;

        for sql in sqls {
            let trimmed = sql.trim().trim_end_matches(';');
            let lowered = trimmed.to_ascii_lowercase();
            if let Some(fragment) = self.failing.iter().find(|f| lowered.contains(f.as_str())) {
                return Err(Error::Executor(format!("ERROR: simulated failure on '{}'", fragment)));
            }

            if lowered.starts_with("set ") {
                if lowered.contains("enable_hypo_index") {
                    hypo_enabled = lowered.ends_with("on");
                }
            } else if lowered.contains("hypopg_create_index(") {
                let index = self.create_hypo(trimmed)?;
                if !self.silent.iter().any(|f| lowered.contains(f.as_str())) {
                    rows.push(vec![index.oid.to_string(), index.name.clone()]);
                }
                hypo.push(index);
            } else if lowered.contains("hypopg_reset_index") {
                hypo.clear();
            } else if lowered.contains("hypopg_estimate_size") {
                for index in &hypo {
                    rows.push(vec![index.name.clone(), format!("{:.0}", self.index_size(index))]);
                }
            } else if lowered.contains("hypopg_display_index") {
                for index in &hypo {
                    rows.push(vec![
                        index.name.clone(),
                        index.oid.to_string(),
                        index.table.clone(),
                        format!("({})", index.columns.join(", ")),
                    ]);
                }
            } else if lowered.contains("from pg_class") {
                if self.schema_matches(trimmed) {
                    for table in self.quoted_tables(trimmed) {
                        rows.push(vec![
                            table.name.clone(),
                            format!("{}", table.rows),
                            if table.partitioned { "p" } else { "n" }.to_string(),
                        ]);
                    }
                }
            } else if lowered.contains("from pg_stats") {
                if self.schema_matches(trimmed) {
                    for table in self.quoted_tables(trimmed) {
                        for (column, n_distinct) in &table.columns {
                            rows.push(vec![table.name.clone(), column.clone(), format!("{}", n_distinct)]);
                        }
                    }
                }
            } else if lowered.contains("from pg_index") {
                if self.schema_matches(trimmed) {
                    for index in &self.indexes {
                        rows.push(vec![
                            self.schema.clone(),
                            index.table.clone(),
                            index.name.clone(),
                            format!(
                                "CREATE {}INDEX {} ON {}.{} USING btree ({}) TABLESPACE pg_default",
                                if index.unique { "UNIQUE " } else { "" },
                                index.name,
                                self.schema,
                                index.table,
                                index.columns.join(", ")
                            ),
                            if index.unique { "t" } else { "f" }.to_string(),
                        ]);
                    }
                }
            } else if let Some(statement) = lowered.strip_prefix("explain ") {
                let statement = &trimmed[trimmed.len() - statement.len()..];
                let visible: &[SimIndex] = if hypo_enabled { &hypo } else { &[] };
                rows.extend(self.explain(statement, visible)?);
            }
        }
        Ok(rows)
    }

    fn schema(&self) -> &str {
        &self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> SimulatedDatabase {
        SimulatedDatabase::new("public")
            .table("t", 100_000.0, &[("a", 1000.0), ("b", 50.0), ("c", 2.0)])
            .index("idx_t_c", "t", &["c"])
    }

    fn batch(sqls: &[&str]) -> Vec<String> {
        sqls.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_seq_scan_without_indexes() {
        let rows = db().execute_sqls(&batch(&["EXPLAIN SELECT * FROM t WHERE a = 1"])).unwrap();
        assert!(rows[0][0].starts_with("Seq Scan on t"));
        assert!(rows[1][0].contains("Filter: (a = $1)"));
    }

    #[test]
    fn test_hypothetical_index_is_used() {
        let rows = db()
            .execute_sqls(&batch(&[
                "SET enable_hypo_index = on",
                "SELECT * FROM hypopg_create_index('CREATE INDEX ON public.t(a)')",
                "EXPLAIN SELECT * FROM t WHERE a = 1",
                "SELECT * FROM hypopg_reset_index()",
            ]))
            .unwrap();
        assert_eq!(rows[0].len(), 2);
        assert!(rows[1][0].starts_with(&format!("Index Scan using {} on t", rows[0][1])));
    }

    #[test]
    fn test_hypothetical_indexes_do_not_leak_between_batches() {
        let db = db();
        db.execute_sqls(&batch(&[
            "SET enable_hypo_index = on",
            "SELECT * FROM hypopg_create_index('CREATE INDEX ON public.t(a)')",
        ]))
        .unwrap();
        let rows = db.execute_sqls(&batch(&["EXPLAIN SELECT * FROM t WHERE a = 1"])).unwrap();
        assert!(rows[0][0].starts_with("Seq Scan"));
    }

    #[test]
    fn test_unknown_column_rejected() {
        let result = db().execute_sqls(&batch(&[
            "SELECT * FROM hypopg_create_index('CREATE INDEX ON public.t(zzz)')",
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_insert_cost_grows_with_indexes() {
        let rows = db().execute_sqls(&batch(&["EXPLAIN INSERT INTO t VALUES (1, 2, 3)"])).unwrap();
        assert!(rows[0][0].contains("cost=0.00..0.42"));
    }

    #[test]
    fn test_catalog_queries() {
        let db = db();
        let rows = db
            .execute_sqls(&batch(&[
                "SELECT c.relname, c.reltuples, c.parttype FROM pg_class c JOIN pg_namespace n ON c.relnamespace = n.oid WHERE n.nspname = 'public' AND c.relname IN ('t')",
            ]))
            .unwrap();
        assert_eq!(rows, vec![vec!["t".to_string(), "100000".to_string(), "n".to_string()]]);
        assert_eq!(db.call_count(), 1);
    }
}
