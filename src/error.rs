use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Workload error: {0}")]
    Workload(String),

    #[error("Baseline cost has not been recorded")]
    MissingBaseline,

    #[error("Configuration {0} has not been evaluated")]
    UnknownConfiguration(String),

    #[error("Generic error: {0}")]
    Generic(String),
}

impl Error {
    pub fn error_code(&self) -> i32 {
        match self {
            Error::Io(_) => -1,
            Error::Json(_) => -2,
            Error::Config(_) => -3,
            Error::Executor(_) => -4,
            Error::Parse(_) => -5,
            Error::Workload(_) => -6,
            Error::MissingBaseline => -7,
            Error::UnknownConfiguration(_) => -8,
            Error::Generic(_) => -99,
        }
    }

    /// Errors that only invalidate a single statement; the run carries on.
    pub fn is_per_query(&self) -> bool {
        matches!(self, Error::Executor(_) | Error::Parse(_))
    }
}
