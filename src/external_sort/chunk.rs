use anyhow::{Context, Result};
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::constants::*;
use crate::record::{estimated_size, read_record, write_record};

/// A sorted run spilled to disk.
#[derive(Debug, Clone)]
pub struct RunFile {
    pub run_id: usize,
    pub file_path: PathBuf,
    pub record_count: u64,
}

/// Reads inputs into memory until the budget is reached, then sorts the
/// buffered records and spills them as one run.
pub struct ChunkProcessor {
    budget_bytes: usize,
    io_buffer_size: usize,
    run_directory: PathBuf,
    dedup: bool,
    next_run_id: usize,
    records_read: u64,
}

impl ChunkProcessor {
    pub fn new(budget_bytes: usize, io_buffer_size: usize, run_directory: PathBuf, dedup: bool) -> Self {
        Self {
            budget_bytes,
            io_buffer_size,
            run_directory,
            dedup,
            next_run_id: 0,
            records_read: 0,
        }
    }

    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    pub fn next_run_id(&self) -> usize {
        self.next_run_id
    }

    pub fn process_files_to_runs(&mut self, inputs: &[PathBuf]) -> Result<Vec<RunFile>> {
        let mut runs = Vec::new();
        let mut current_chunk: Vec<Vec<u8>> = Vec::new();
        let mut current_size = 0;
        let mut line = Vec::new();

        for input in inputs {
            let file = File::open(input)
                .with_context(|| format!("failed to open sort input {}", input.display()))?;
            let mut reader = BufReader::with_capacity(self.io_buffer_size, file);

            while read_record(&mut reader, &mut line)
                .with_context(|| format!("failed to read sort input {}", input.display()))?
            {
                let record_size = estimated_size(&line);
                if current_size + record_size > self.budget_bytes && !current_chunk.is_empty() {
                    runs.push(self.sort_and_write_run(std::mem::take(&mut current_chunk))?);
                    current_size = 0;
                }

                current_size += record_size;
                current_chunk.push(line.clone());
                self.records_read += 1;
            }
        }

        if !current_chunk.is_empty() {
            runs.push(self.sort_and_write_run(current_chunk)?);
        }

        Ok(runs)
    }

    pub fn sort_and_write_run(&mut self, mut records: Vec<Vec<u8>>) -> Result<RunFile> {
        records.par_sort_unstable();
        if self.dedup {
            records.dedup();
        }

        let run_id = self.next_run_id;
        self.next_run_id += 1;
        let run_file = run_path(&self.run_directory, run_id);

        let file = File::create(&run_file)
            .with_context(|| format!("failed to create run file {}", run_file.display()))?;
        let mut writer = BufWriter::with_capacity(self.io_buffer_size, file);
        for record in &records {
            write_record(&mut writer, record)?;
        }
        writer.flush()?;

        debug!("Spilled run {} with {} records", run_id, records.len());

        Ok(RunFile {
            run_id,
            file_path: run_file,
            record_count: records.len() as u64,
        })
    }
}

pub fn run_path(run_directory: &Path, run_id: usize) -> PathBuf {
    run_directory.join(format!("{}{}{}", RUN_FILE_PREFIX, run_id, RUN_FILE_EXTENSION))
}

pub fn cleanup_runs(runs: &[RunFile]) {
    for run in runs {
        if let Err(e) = std::fs::remove_file(&run.file_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove run {}: {}", run.file_path.display(), e);
            }
        }
    }
}
