use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::classifier::{classify, find_tokens, whitespace_fields, Classification};
use crate::constants::*;
use crate::error::{Result, SiftError};
use crate::record::{read_record, trim_carriage_return, write_record};

/// The pair of files one partitioner invocation owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPaths {
    pub conforming: PathBuf,
    pub non_conforming: PathBuf,
}

impl PartitionPaths {
    /// `good_<index>_<basename>` and `bad_<index>_<basename>` in `temp_dir`.
    /// The index keeps names unique when inputs share a basename.
    pub fn for_input(temp_dir: &Path, index: usize, input: &Path) -> Self {
        let base = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input".to_string());
        let stem = format!("{:0width$}_{}", index, base, width = PARTITION_INDEX_WIDTH);

        Self {
            conforming: temp_dir.join(format!("{}{}", CONFORMING_PARTITION_PREFIX, stem)),
            non_conforming: temp_dir.join(format!("{}{}", NON_CONFORMING_PARTITION_PREFIX, stem)),
        }
    }

    fn remove(&self) {
        for path in [&self.conforming, &self.non_conforming] {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove partition {}: {}", path.display(), e);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionStats {
    pub lines_read: u64,
    pub conforming_lines: u64,
    pub tokens_written: u64,
    pub non_conforming_lines: u64,
    /// Tokens rescued from multi-field lines; zero unless salvaging.
    pub salvaged_tokens: u64,
}

impl PartitionStats {
    pub fn absorb(&mut self, other: &PartitionStats) {
        self.lines_read += other.lines_read;
        self.conforming_lines += other.conforming_lines;
        self.tokens_written += other.tokens_written;
        self.non_conforming_lines += other.non_conforming_lines;
        self.salvaged_tokens += other.salvaged_tokens;
    }
}

/// One unit of work for the worker pool: turn `input` into the partition
/// pair at `paths`.
pub trait Partitioner: Send + Sync + 'static {
    fn partition(&self, input: &Path, paths: &PartitionPaths) -> Result<PartitionStats>;
}

/// Splits one input file into its conforming and non-conforming partitions.
#[derive(Debug, Clone)]
pub struct FilePartitioner {
    io_buffer_size: usize,
    salvage_multi_field_tokens: bool,
}

impl FilePartitioner {
    pub fn new(io_buffer_size: usize, salvage_multi_field_tokens: bool) -> Self {
        Self {
            io_buffer_size,
            salvage_multi_field_tokens,
        }
    }

    /// On success both partition files exist, even if empty. On failure
    /// neither does.
    pub fn partition_file(&self, input: &Path, paths: &PartitionPaths) -> Result<PartitionStats> {
        match self.write_partitions(input, paths) {
            Ok(stats) => {
                debug!(
                    "Partitioned {}: {} lines, {} tokens, {} non-conforming",
                    input.display(),
                    stats.lines_read,
                    stats.tokens_written,
                    stats.non_conforming_lines
                );
                Ok(stats)
            }
            Err(source) => {
                paths.remove();
                Err(SiftError::Partition {
                    path: input.to_path_buf(),
                    source,
                })
            }
        }
    }

    fn write_partitions(&self, input: &Path, paths: &PartitionPaths) -> io::Result<PartitionStats> {
        let file = File::open(input)?;
        let mut reader = BufReader::with_capacity(self.io_buffer_size, file);

        let mut good = BufWriter::with_capacity(self.io_buffer_size, File::create(&paths.conforming)?);
        let mut bad = BufWriter::with_capacity(self.io_buffer_size, File::create(&paths.non_conforming)?);

        let mut stats = PartitionStats::default();
        let mut line = Vec::new();

        while read_record(&mut reader, &mut line)? {
            stats.lines_read += 1;
            let record = trim_carriage_return(&line);

            match classify(record) {
                Classification::Conforming(tokens) => {
                    stats.conforming_lines += 1;
                    for token in tokens {
                        write_record(&mut good, token)?;
                        stats.tokens_written += 1;
                    }
                }
                Classification::NonConforming(raw) => {
                    stats.non_conforming_lines += 1;
                    write_record(&mut bad, raw)?;

                    if self.salvage_multi_field_tokens && whitespace_fields(raw) > 1 {
                        for token in find_tokens(raw) {
                            write_record(&mut good, token)?;
                            stats.tokens_written += 1;
                            stats.salvaged_tokens += 1;
                        }
                    }
                }
            }
        }

        good.flush()?;
        bad.flush()?;
        Ok(stats)
    }
}

impl Partitioner for FilePartitioner {
    fn partition(&self, input: &Path, paths: &PartitionPaths) -> Result<PartitionStats> {
        self.partition_file(input, paths)
    }
}
