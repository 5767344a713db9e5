//! Advisor configuration
//!
//! Every tunable of an advisor run lives here. The struct is loaded from an
//! optional JSON file, overridden by command-line flags and validated once
//! before any database work starts.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::warn;

/// Configuration of a single advisor invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    /// Schema the workload runs against
    pub schema: String,
    /// Upper bound on the number of recommended indexes
    pub max_index_num: Option<usize>,
    /// Upper bound on the total storage of recommended indexes, in MB
    pub max_index_storage: Option<f64>,
    /// Run the atomic-configuration search instead of single-index ranking
    pub multi_iter_mode: bool,
    /// Highest column selectivity (1 / n_distinct) still worth indexing
    pub max_n_distinct: f64,
    /// Minimum mean cost improvement over the positive queries of an index
    pub min_improved_rate: f64,
    /// Widest index the advisor will propose
    pub max_index_columns: usize,
    /// Tables with fewer estimated rows are never indexed
    pub min_reltuples: f64,
    /// Target is a distributed deployment
    pub multi_node: bool,
    /// Propose distributed global secondary indexes (requires `multi_node`)
    pub advise_gsi: bool,
    /// Worker threads for validation and costing; 0 runs serially
    pub multi_thread_num: usize,
    /// Single-column candidates kept per table, lowest selectivity first
    pub max_candidates_per_table: usize,
    /// Per-table candidate count above which the cost pre-filter kicks in
    pub max_candidate_columns: usize,
    /// Relative cost reduction a wider index must achieve over the narrower one
    pub widening_min_gain: f64,
    /// Share of a combined benefit above which one index of a prefix pair suffices
    pub containment_ratio: f64,
    /// Share of a query's baseline cost above which a portfolio return is recorded
    pub portfolio_threshold: f64,
    /// Total benefit that overrides a low improvement rate
    pub max_benefit_threshold: Option<f64>,
    /// Representative statements kept per workload template
    pub sample_num: usize,
    /// MCTS iterations when a storage budget is present
    pub mcts_iterations: usize,
    /// Seed for sampling and MCTS rollouts
    pub seed: u64,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            schema: "public".to_string(),
            max_index_num: None,
            max_index_storage: None,
            multi_iter_mode: false,
            max_n_distinct: 0.01,
            min_improved_rate: 0.1,
            max_index_columns: 5,
            min_reltuples: 10_000.0,
            multi_node: false,
            advise_gsi: false,
            multi_thread_num: 0,
            max_candidates_per_table: 20,
            max_candidate_columns: 40,
            widening_min_gain: 0.05,
            containment_ratio: 0.8,
            portfolio_threshold: 0.01,
            max_benefit_threshold: None,
            sample_num: 5,
            mcts_iterations: 200,
            seed: 0x5eed,
        }
    }
}

impl AdvisorConfig {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            ..Default::default()
        }
    }

    /// Load a configuration from a JSON file; missing fields take defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let config: AdvisorConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Reject out-of-range settings before the run touches the database
    pub fn validate(&self) -> Result<()> {
        if self.schema.trim().is_empty() {
            return Err(Error::Config("schema must not be empty".to_string()));
        }
        if self.max_index_num == Some(0) {
            return Err(Error::Config("max_index_num must be positive".to_string()));
        }
        if let Some(storage) = self.max_index_storage {
            if !(storage.is_finite() && storage > 0.0) {
                return Err(Error::Config(format!(
                    "max_index_storage must be a positive number of MB, got {}",
                    storage
                )));
            }
        }
        if !(self.max_n_distinct > 0.0 && self.max_n_distinct <= 1.0) {
            return Err(Error::Config(format!(
                "max_n_distinct must be in (0, 1], got {}",
                self.max_n_distinct
            )));
        }
        if !(0.0..=1.0).contains(&self.min_improved_rate) {
            return Err(Error::Config(format!(
                "min_improved_rate must be in [0, 1], got {}",
                self.min_improved_rate
            )));
        }
        if self.max_index_columns == 0 {
            return Err(Error::Config("max_index_columns must be at least 1".to_string()));
        }
        if !(self.min_reltuples >= 0.0) {
            return Err(Error::Config("min_reltuples must not be negative".to_string()));
        }
        if self.advise_gsi && !self.multi_node {
            warn!("advise_gsi is ignored without multi_node");
        }
        if self.max_candidates_per_table == 0 || self.max_candidate_columns == 0 {
            return Err(Error::Config("candidate caps must be positive".to_string()));
        }
        for (name, value) in [
            ("widening_min_gain", self.widening_min_gain),
            ("containment_ratio", self.containment_ratio),
            ("portfolio_threshold", self.portfolio_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!("{} must be in [0, 1], got {}", name, value)));
            }
        }
        if self.sample_num == 0 {
            return Err(Error::Config("sample_num must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AdvisorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_index_columns, 5);
        assert_eq!(config.min_reltuples, 10_000.0);
    }

    #[test]
    fn test_negative_storage_rejected() {
        let config = AdvisorConfig {
            max_index_storage: Some(-1.0),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_gsi_without_multi_node_is_accepted() {
        let config = AdvisorConfig {
            advise_gsi: true,
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        let config = AdvisorConfig {
            advise_gsi: true,
            multi_node: true,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_index_num_rejected() {
        let config = AdvisorConfig {
            max_index_num: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"schema": "tpcc", "max_index_num": 3}}"#).unwrap();

        let config = AdvisorConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.schema, "tpcc");
        assert_eq!(config.max_index_num, Some(3));
        assert_eq!(config.max_n_distinct, 0.01);
    }
}
