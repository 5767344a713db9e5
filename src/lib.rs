pub mod config;
pub mod error;
pub mod executor;
pub mod index_advisor;
pub mod logging;
pub mod metrics;
pub mod testing;

pub use config::AdvisorConfig;
pub use error::{Error, Result};
pub use executor::{Executor, GsqlExecutor, HypoSession, Row};
pub use index_advisor::{
    AdvisedIndex, AdvisorReport, ExistingIndex, IndexAdvisor, IndexFactory, IndexId, IndexKind, QueryItem,
    WorkLoad,
};
