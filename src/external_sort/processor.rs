use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, info};

use crate::constants::MAX_MERGE_FAN_IN;
use crate::external_sort::chunk::ChunkProcessor;
use crate::external_sort::merger::RunMerger;
use crate::external_sort::{ExternalSorter, SortRequest, SortStats};

/// In-process external merge sort: spill budget-sized sorted runs, then
/// k-way merge them with a heap.
pub struct ChunkedMergeSorter {
    fan_in: usize,
    sequence: AtomicUsize,
}

impl ChunkedMergeSorter {
    pub fn new() -> Self {
        Self {
            fan_in: MAX_MERGE_FAN_IN,
            sequence: AtomicUsize::new(0),
        }
    }

    pub fn with_fan_in(mut self, fan_in: usize) -> Self {
        self.fan_in = fan_in.max(2);
        self
    }

    fn run_directory(&self, request: &SortRequest) -> PathBuf {
        let id = self.sequence.fetch_add(1, Ordering::Relaxed);
        request
            .scratch_dir
            .join(format!("sort_{}_{}", std::process::id(), id))
    }
}

impl Default for ChunkedMergeSorter {
    fn default() -> Self {
        Self::new()
    }
}

impl ExternalSorter for ChunkedMergeSorter {
    fn name(&self) -> &'static str {
        "builtin external merge sort"
    }

    fn sort(&self, inputs: &[PathBuf], output: &Path, request: &SortRequest) -> Result<SortStats> {
        let start = Instant::now();
        let run_directory = self.run_directory(request);
        std::fs::create_dir_all(&run_directory)
            .with_context(|| format!("failed to create scratch directory {}", run_directory.display()))?;

        let result = self.sort_in(&run_directory, inputs, output, request);

        if let Err(e) = std::fs::remove_dir_all(&run_directory) {
            debug!("Could not remove scratch directory {}: {}", run_directory.display(), e);
        }

        let stats = result?;
        info!(
            "Sorted {} inputs into {}: {} records in, {} out, {} runs, {} merge passes ({:.2}s)",
            inputs.len(),
            output.display(),
            stats.records_in.unwrap_or(0),
            stats.records_out,
            stats.runs_written,
            stats.merge_passes,
            start.elapsed().as_secs_f64()
        );
        Ok(stats)
    }
}

impl ChunkedMergeSorter {
    fn sort_in(
        &self,
        run_directory: &Path,
        inputs: &[PathBuf],
        output: &Path,
        request: &SortRequest,
    ) -> Result<SortStats> {
        let mut chunk_processor = ChunkProcessor::new(
            request.budget.bytes(),
            request.io_buffer_size,
            run_directory.to_path_buf(),
            request.dedup,
        );

        let runs = chunk_processor.process_files_to_runs(inputs)?;
        let runs_written = runs.len();
        debug!("Spilled {} runs for {}", runs_written, output.display());

        let merger = RunMerger::new(request.budget, request.dedup, run_directory.to_path_buf())
            .with_fan_in(self.fan_in);
        // Run files left behind on error go with the scratch directory.
        let outcome = merger.merge_runs(runs, chunk_processor.next_run_id(), output)?;

        Ok(SortStats {
            records_in: Some(chunk_processor.records_read()),
            records_out: outcome.records_written,
            runs_written,
            merge_passes: outcome.passes,
        })
    }
}
