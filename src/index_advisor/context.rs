use super::{parser, ExistingIndex, IndexFactory, TableCatalog};
use crate::config::AdvisorConfig;
use crate::executor::Executor;
use crate::metrics;
use crate::Error;
use parking_lot::RwLock;
use rayon::prelude::*;
use rayon::ThreadPool;
use std::collections::{BTreeSet, HashMap};
use tracing::warn;

/// State shared by the stages of one advisor run
pub struct AdvisorContext<'a> {
    pub executor: &'a dyn Executor,
    pub config: &'a AdvisorConfig,
    pub factory: IndexFactory,
    pub catalog: TableCatalog,
    query_tables: RwLock<HashMap<String, Vec<String>>>,
    existing: Vec<ExistingIndex>,
    pool: Option<ThreadPool>,
}

impl<'a> AdvisorContext<'a> {
    pub fn new(executor: &'a dyn Executor, config: &'a AdvisorConfig) -> crate::Result<Self> {
        let pool = if config.multi_thread_num > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.multi_thread_num)
                .thread_name(|i| format!("advisor-worker-{}", i))
                .build()
                .map_err(|e| Error::Generic(format!("failed to build worker pool: {}", e)))?;
            Some(pool)
        } else {
            None
        };
        Ok(Self {
            executor,
            config,
            factory: IndexFactory::new(),
            catalog: TableCatalog::new(),
            query_tables: RwLock::new(HashMap::new()),
            existing: Vec::new(),
            pool,
        })
    }

    pub fn schema(&self) -> &str {
        &self.config.schema
    }

    pub fn set_existing_indexes(&mut self, existing: Vec<ExistingIndex>) {
        self.existing = existing;
    }

    pub fn existing_indexes(&self) -> &[ExistingIndex] {
        &self.existing
    }

    pub fn existing_on_table<'s>(&'s self, qualified_table: &'s str) -> impl Iterator<Item = &'s ExistingIndex> + 's {
        self.existing
            .iter()
            .filter(move |e| e.qualified_table() == qualified_table)
    }

    pub fn record_query_tables(&self, statement: &str, tables: Vec<String>) {
        self.query_tables.write().insert(statement.to_string(), tables);
    }

    /// Schema-qualified tables a statement touches
    pub fn query_tables(&self, statement: &str) -> Vec<String> {
        if let Some(tables) = self.query_tables.read().get(statement) {
            return tables.clone();
        }
        parser::parse_tables(statement)
            .into_iter()
            .map(|name| {
                if name.contains('.') {
                    name
                } else {
                    format!("{}.{}", self.schema(), name)
                }
            })
            .collect()
    }

    /// Every table some workload statement touches
    pub fn related_tables(&self) -> BTreeSet<String> {
        self.query_tables
            .read()
            .values()
            .flat_map(|tables| tables.iter().cloned())
            .collect()
    }

    /// Map over items on the worker pool, or serially without one. Output order follows input order.
    pub fn map_items<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(usize, &T) -> R + Sync + Send,
    {
        match &self.pool {
            Some(pool) => pool.install(|| {
                items
                    .par_iter()
                    .enumerate()
                    .map(|(i, item)| f(i, item))
                    .collect()
            }),
            None => items.iter().enumerate().map(|(i, item)| f(i, item)).collect(),
        }
    }
}

/// Per-query error boundary: log, count and fall back
pub fn per_query<T>(stage: &'static str, statement: &str, result: crate::Result<T>, fallback: T) -> crate::Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(e) if e.is_per_query() => {
            warn!(stage = stage, statement = %statement, error = %e, "Statement skipped");
            metrics::record_query_failure(stage);
            Ok(fallback)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SimulatedDatabase;

    #[test]
    fn test_query_tables_fallback_qualifies_names() {
        let db = SimulatedDatabase::new("public");
        let config = AdvisorConfig::new("public");
        let context = AdvisorContext::new(&db, &config).unwrap();
        assert_eq!(
            context.query_tables("select * from t join s.u on t.id = u.id"),
            vec!["public.t", "s.u"]
        );
        context.record_query_tables("select 1", vec!["public.x".to_string()]);
        assert_eq!(context.query_tables("select 1"), vec!["public.x"]);
        assert!(context.related_tables().contains("public.x"));
    }

    #[test]
    fn test_map_items_keeps_order_on_pool() {
        let db = SimulatedDatabase::new("public");
        let mut config = AdvisorConfig::new("public");
        config.multi_thread_num = 3;
        let context = AdvisorContext::new(&db, &config).unwrap();
        let items: Vec<usize> = (0..50).collect();
        let doubled = context.map_items(&items, |_, v| v * 2);
        assert_eq!(doubled, items.iter().map(|v| v * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_per_query_boundary() {
        let skipped = per_query("check", "select 1", Err::<u32, _>(Error::Executor("x".into())), 7);
        assert_eq!(skipped.unwrap(), 7);
        let fatal = per_query("check", "select 1", Err::<u32, _>(Error::MissingBaseline), 7);
        assert!(fatal.is_err());
    }
}
