// Token grammar and per-line classification
pub mod classifier;
pub mod grammar;
pub mod record;

// Stages
pub mod aggregate;
pub mod merge;
pub mod partition;
pub mod pipeline;
pub mod scheduler;

// Out-of-core sorting backends used by the merge and aggregate stages
pub mod external_sort;

pub mod config;
pub mod constants;
pub mod error;
pub mod utils;

// Re-export main types for convenience
pub use classifier::{classify, Classification};
pub use config::{RunContext, SiftConfig};
pub use error::SiftError;
pub use external_sort::{ExternalSorter, MemoryBudget, SortBackend};
pub use pipeline::{Pipeline, RunSummary};
