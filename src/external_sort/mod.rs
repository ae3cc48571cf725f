pub mod budget;
pub mod chunk;
pub mod in_memory;
pub mod merger;
pub mod processor;
pub mod system;


pub use budget::MemoryBudget;
pub use in_memory::InMemorySorter;
pub use processor::ChunkedMergeSorter;
pub use system::SystemSort;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Sorts line records byte-wise across many input files into one output.
///
/// Implementations must produce a total byte-wise order, collapse equal
/// records to one when `request.dedup` is set, stay within `request.budget`,
/// and leave no partially written `output` claimed as complete on error.
pub trait ExternalSorter: Send + Sync {
    fn name(&self) -> &'static str;

    fn sort(&self, inputs: &[PathBuf], output: &Path, request: &SortRequest) -> Result<SortStats>;
}

#[derive(Debug, Clone)]
pub struct SortRequest {
    pub budget: MemoryBudget,
    pub dedup: bool,
    pub scratch_dir: PathBuf,
    pub threads: usize,
    pub io_buffer_size: usize,
}

impl SortRequest {
    pub fn new(budget: MemoryBudget, scratch_dir: PathBuf) -> Self {
        Self {
            budget,
            dedup: true,
            scratch_dir,
            threads: 1,
            io_buffer_size: crate::constants::DEFAULT_IO_BUFFER_SIZE_KB * crate::constants::BYTES_PER_KB,
        }
    }

    pub fn with_dedup(mut self, dedup: bool) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn with_io_buffer_size(mut self, io_buffer_size: usize) -> Self {
        self.io_buffer_size = io_buffer_size;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SortStats {
    /// Unknown when the backend cannot see individual input records.
    pub records_in: Option<u64>,
    pub records_out: u64,
    pub runs_written: usize,
    pub merge_passes: usize,
}

impl SortStats {
    pub fn duplicates_removed(&self) -> Option<u64> {
        self.records_in.map(|n| n.saturating_sub(self.records_out))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortBackend {
    /// In-process spill-and-merge sort.
    Builtin,
    /// `sort(1)` with `LC_ALL=C`.
    System,
}

impl SortBackend {
    pub fn sorter(self) -> Arc<dyn ExternalSorter> {
        match self {
            SortBackend::Builtin => Arc::new(ChunkedMergeSorter::new()),
            SortBackend::System => Arc::new(SystemSort::new()),
        }
    }
}

impl std::str::FromStr for SortBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "builtin" => Ok(SortBackend::Builtin),
            "system" => Ok(SortBackend::System),
            other => Err(anyhow::anyhow!("unknown sort backend '{}', expected 'builtin' or 'system'", other)),
        }
    }
}
