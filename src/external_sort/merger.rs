use anyhow::{Context, Result};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::constants::*;
use crate::external_sort::chunk::{cleanup_runs, run_path, RunFile};
use crate::external_sort::MemoryBudget;
use crate::record::{read_record, write_record};

pub struct RunMerger {
    budget: MemoryBudget,
    fan_in: usize,
    dedup: bool,
    run_directory: PathBuf,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MergeOutcome {
    pub records_written: u64,
    pub duplicates_removed: u64,
    pub passes: usize,
}

#[derive(Debug, PartialEq, Eq)]
struct MergeEntry {
    record: Vec<u8>,
    source: usize,
}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.record
            .cmp(&other.record)
            .then_with(|| self.source.cmp(&other.source))
    }
}

impl RunMerger {
    pub fn new(budget: MemoryBudget, dedup: bool, run_directory: PathBuf) -> Self {
        Self {
            budget,
            fan_in: MAX_MERGE_FAN_IN,
            dedup,
            run_directory,
        }
    }

    pub fn with_fan_in(mut self, fan_in: usize) -> Self {
        self.fan_in = fan_in.max(2);
        self
    }

    /// Merges `runs` into `output`, consuming (deleting) the run files.
    ///
    /// With more runs than the fan-in, groups of runs are first merged into
    /// intermediate runs so no pass holds more than `fan_in` readers open.
    pub fn merge_runs(&self, mut runs: Vec<RunFile>, next_run_id: usize, output: &Path) -> Result<MergeOutcome> {
        let mut outcome = MergeOutcome::default();
        let mut next_run_id = next_run_id;

        while runs.len() > self.fan_in {
            let mut merged = Vec::with_capacity(runs.len() / self.fan_in + 1);
            for group in runs.chunks(self.fan_in) {
                let path = run_path(&self.run_directory, next_run_id);
                let (written, dropped) = self.merge_into(group, &path)?;
                cleanup_runs(group);
                outcome.duplicates_removed += dropped;
                merged.push(RunFile {
                    run_id: next_run_id,
                    file_path: path,
                    record_count: written,
                });
                next_run_id += 1;
            }
            outcome.passes += 1;
            debug!("Intermediate merge pass {} left {} runs", outcome.passes, merged.len());
            runs = merged;
        }

        let (written, dropped) = self.merge_into(&runs, output)?;
        cleanup_runs(&runs);
        outcome.passes += 1;
        outcome.records_written = written;
        outcome.duplicates_removed += dropped;
        Ok(outcome)
    }

    fn merge_into(&self, runs: &[RunFile], output: &Path) -> Result<(u64, u64)> {
        let reader_buffer = self.budget.share(
            runs.len() + 1,
            MIN_MERGE_READER_BUFFER,
            MAX_MERGE_READER_BUFFER,
        );

        let mut readers = Vec::with_capacity(runs.len());
        for run in runs {
            let file = File::open(&run.file_path)
                .with_context(|| format!("failed to open run {}", run.file_path.display()))?;
            readers.push(BufReader::with_capacity(reader_buffer, file));
        }

        let file = File::create(output)
            .with_context(|| format!("failed to create merge output {}", output.display()))?;
        let mut writer = BufWriter::with_capacity(OUTPUT_BUFFER_SIZE_KB * BYTES_PER_KB, file);

        let mut heap = BinaryHeap::with_capacity(readers.len());
        for (source, reader) in readers.iter_mut().enumerate() {
            let mut record = Vec::new();
            if read_record(reader, &mut record)? {
                heap.push(Reverse(MergeEntry { record, source }));
            }
        }

        let mut last_written: Option<Vec<u8>> = None;
        let mut records_written = 0u64;
        let mut duplicates_removed = 0u64;

        while let Some(Reverse(entry)) = heap.pop() {
            let source = entry.source;

            let mut next = Vec::new();
            if read_record(&mut readers[source], &mut next)? {
                heap.push(Reverse(MergeEntry { record: next, source }));
            }

            if self.dedup && last_written.as_deref() == Some(entry.record.as_slice()) {
                duplicates_removed += 1;
                continue;
            }

            write_record(&mut writer, &entry.record)?;
            records_written += 1;
            if self.dedup {
                last_written = Some(entry.record);
            }
        }

        let file = writer
            .into_inner()
            .map_err(|e| e.into_error())
            .with_context(|| format!("failed to flush merge output {}", output.display()))?;
        file.sync_all()?;

        Ok((records_written, duplicates_removed))
    }
}
