use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced by the pipeline stages.
///
/// `Partition` is local to one input file and is collected by the scheduler;
/// every other variant stops the run.
#[derive(Error, Debug)]
pub enum SiftError {
    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("partitioning {} failed: {source}", path.display())]
    Partition {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("merge of {group} partitions failed during {operation}: {source:#}")]
    Merge {
        group: &'static str,
        operation: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("domain aggregation failed: {message}")]
    Aggregation {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl SiftError {
    pub fn configuration(message: impl Into<String>) -> Self {
        SiftError::Configuration { message: message.into() }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        SiftError::Io { context: context.into(), source }
    }

    pub fn aggregation(message: impl Into<String>) -> Self {
        SiftError::Aggregation { message: message.into(), source: None }
    }

    /// Short name of the stage that failed, for diagnostics.
    pub fn stage(&self) -> &'static str {
        match self {
            SiftError::Configuration { .. } => "configuration",
            SiftError::Partition { .. } => "partition",
            SiftError::Merge { .. } => "merge",
            SiftError::Aggregation { .. } => "aggregation",
            SiftError::Io { .. } => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, SiftError>;
