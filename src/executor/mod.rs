//! Executor abstraction
//!
//! The advisor never talks to the database directly. Every catalog lookup,
//! hypothetical index and `EXPLAIN` goes through an [`Executor`], which runs a
//! batch of statements in one session and returns all produced rows in order.

use crate::metrics;
use crate::Result;
use std::cell::Cell;
use tracing::{debug, warn};

pub mod gsql;

pub use gsql::GsqlExecutor;

/// One result row, every column rendered as text
pub type Row = Vec<String>;

pub const ENABLE_HYPO_INDEX: &str = "SET enable_hypo_index = on";
pub const RESET_HYPO_INDEX: &str = "SELECT * FROM hypopg_reset_index()";

/// Runs statement batches against the target database
pub trait Executor: Send + Sync {
    /// Execute a batch of statements in a single session.
    ///
    /// Rows of every statement are concatenated in statement order.
    /// Hypothetical indexes never outlive the batch.
    fn execute_sqls(&self, sqls: &[String]) -> Result<Vec<Row>>;

    /// Schema the workload runs against
    fn schema(&self) -> &str;

    /// All schemas visible to the advisor
    fn schemas(&self) -> Vec<String> {
        vec![self.schema().to_string()]
    }
}

/// Session scope for hypothetical indexes.
///
/// Each batch run through the session is wrapped so that hypothetical indexes
/// are enabled first and reset last. If a batch fails half way, the session
/// issues one more reset when dropped.
pub struct HypoSession<'a> {
    executor: &'a dyn Executor,
    purpose: &'static str,
    dirty: Cell<bool>,
}

impl<'a> HypoSession<'a> {
    pub fn open(executor: &'a dyn Executor, purpose: &'static str) -> Self {
        Self {
            executor,
            purpose,
            dirty: Cell::new(false),
        }
    }

    pub fn executor(&self) -> &'a dyn Executor {
        self.executor
    }

    /// Run statements with hypothetical indexes enabled
    pub fn run(&self, statements: Vec<String>) -> Result<Vec<Row>> {
        let mut batch = Vec::with_capacity(statements.len() + 2);
        batch.push(ENABLE_HYPO_INDEX.to_string());
        batch.extend(statements);
        batch.push(RESET_HYPO_INDEX.to_string());

        let result = self.executor.execute_sqls(&batch);
        metrics::record_optimizer_call(self.purpose, result.is_ok());
        if result.is_err() {
            self.dirty.set(true);
        }
        result
    }
}

impl Drop for HypoSession<'_> {
    fn drop(&mut self) {
        if !self.dirty.get() {
            return;
        }
        debug!(purpose = self.purpose, "Resetting hypothetical indexes after a failed batch");
        if let Err(e) = self.executor.execute_sqls(&[RESET_HYPO_INDEX.to_string()]) {
            warn!(error = %e, "Failed to reset hypothetical indexes");
        }
    }
}

/// Run plain statements, recording the round-trip
pub fn execute_plain(executor: &dyn Executor, purpose: &'static str, sqls: &[String]) -> Result<Vec<Row>> {
    let result = executor.execute_sqls(sqls);
    metrics::record_optimizer_call(purpose, result.is_ok());
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use parking_lot::Mutex;

    struct RecordingExecutor {
        batches: Mutex<Vec<Vec<String>>>,
        fail: bool,
    }

    impl Executor for RecordingExecutor {
        fn execute_sqls(&self, sqls: &[String]) -> Result<Vec<Row>> {
            self.batches.lock().push(sqls.to_vec());
            if self.fail && sqls.len() > 1 {
                return Err(Error::Executor("boom".to_string()));
            }
            Ok(Vec::new())
        }

        fn schema(&self) -> &str {
            "public"
        }
    }

    #[test]
    fn test_session_wraps_batch() {
        let executor = RecordingExecutor {
            batches: Mutex::new(Vec::new()),
            fail: false,
        };
        {
            let session = HypoSession::open(&executor, "check");
            session.run(vec!["EXPLAIN SELECT 1".to_string()]).unwrap();
        }
        let batches = executor.batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].first().map(String::as_str), Some(ENABLE_HYPO_INDEX));
        assert_eq!(batches[0].last().map(String::as_str), Some(RESET_HYPO_INDEX));
    }

    #[test]
    fn test_failed_batch_resets_on_drop() {
        let executor = RecordingExecutor {
            batches: Mutex::new(Vec::new()),
            fail: true,
        };
        {
            let session = HypoSession::open(&executor, "check");
            assert!(session.run(vec!["EXPLAIN SELECT 1".to_string()]).is_err());
        }
        let batches = executor.batches.lock();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1], vec![RESET_HYPO_INDEX.to_string()]);
    }
}
