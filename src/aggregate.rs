use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::constants::DOMAIN_SCRATCH_FILE;
use crate::error::{Result, SiftError};
use crate::external_sort::{ExternalSorter, SortRequest};
use crate::grammar::SEPARATOR_REGEX;
use crate::merge::{publish, remove_if_exists};
use crate::record::{read_record, write_record};
use crate::utils::partial_path;

/// Text after the first separator, up to the next `@` if any (what
/// `cut -f 2 -d @` would print). `None` when there is no separator.
pub fn domain_of(token: &[u8]) -> Option<&[u8]> {
    let separator = SEPARATOR_REGEX.find(token)?;
    let rest = &token[separator.end()..];
    let end = rest.iter().position(|&b| b == b'@').unwrap_or(rest.len());
    Some(&rest[..end])
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AggregateStats {
    pub tokens_counted: u64,
    pub domains: u64,
}

/// Counts runs of equal lines in byte-sorted input and writes
/// `<count> <domain>` per run.
pub fn count_sorted_domains<R: BufRead, W: Write>(reader: &mut R, writer: &mut W) -> io::Result<AggregateStats> {
    let mut stats = AggregateStats::default();
    let mut current: Option<Vec<u8>> = None;
    let mut count = 0u64;
    let mut line = Vec::new();

    while read_record(reader, &mut line)? {
        stats.tokens_counted += 1;
        if current.as_deref() == Some(line.as_slice()) {
            count += 1;
            continue;
        }
        if let Some(domain) = current.take() {
            write_count(writer, count, &domain)?;
            stats.domains += 1;
        }
        current = Some(line.clone());
        count = 1;
    }

    if let Some(domain) = current {
        write_count(writer, count, &domain)?;
        stats.domains += 1;
    }

    Ok(stats)
}

fn write_count<W: Write>(writer: &mut W, count: u64, domain: &[u8]) -> io::Result<()> {
    write!(writer, "{} ", count)?;
    write_record(writer, domain)
}

/// Builds the per-domain summary from the conforming master.
///
/// Sorting whole tokens does not make equal domains adjacent, so domains are
/// re-sorted on their own (keeping duplicates) before the counting pass.
pub struct DomainAggregator {
    sorter: Arc<dyn ExternalSorter>,
    request: SortRequest,
}

impl DomainAggregator {
    pub fn new(sorter: Arc<dyn ExternalSorter>, request: SortRequest) -> Self {
        Self {
            sorter,
            request: request.with_dedup(false),
        }
    }

    /// Writes `summary` atomically. The master is never modified.
    pub fn aggregate(&self, master: &Path, summary: &Path) -> Result<AggregateStats> {
        fs::create_dir_all(&self.request.scratch_dir).map_err(|e| {
            SiftError::io(
                format!("cannot create scratch directory {}", self.request.scratch_dir.display()),
                e,
            )
        })?;

        let unsorted = self.request.scratch_dir.join(DOMAIN_SCRATCH_FILE);
        let sorted = partial_path(&unsorted);
        let partial = partial_path(summary);

        let result = self.aggregate_via(master, &unsorted, &sorted, &partial, summary);

        remove_if_exists(&unsorted);
        remove_if_exists(&sorted);
        if result.is_err() {
            remove_if_exists(&partial);
        }
        result
    }

    fn aggregate_via(
        &self,
        master: &Path,
        unsorted: &Path,
        sorted: &Path,
        partial: &Path,
        summary: &Path,
    ) -> Result<AggregateStats> {
        let extracted = self.extract_domains(master, unsorted)?;
        info!("Extracted domains of {} tokens from {}", extracted, master.display());

        self.sorter
            .sort(&[unsorted.to_path_buf()], sorted, &self.request)
            .map_err(|source| SiftError::Aggregation {
                message: format!("sorting domains with {} failed", self.sorter.name()),
                source: Some(source),
            })?;

        let stats = write_summary(sorted, partial).map_err(|e| SiftError::Aggregation {
            message: format!("writing {} failed", partial.display()),
            source: Some(e.into()),
        })?;

        publish(partial, summary).map_err(|e| SiftError::Aggregation {
            message: format!("replacing {} failed", summary.display()),
            source: Some(e.into()),
        })?;

        info!(
            "Domain summary written: {} domains over {} tokens",
            stats.domains, stats.tokens_counted
        );
        Ok(stats)
    }

    fn extract_domains(&self, master: &Path, unsorted: &Path) -> Result<u64> {
        let file = File::open(master)
            .map_err(|e| io_failure(format!("cannot open {}", master.display()), e))?;
        let mut reader = BufReader::with_capacity(self.request.io_buffer_size, file);
        let out = File::create(unsorted)
            .map_err(|e| io_failure(format!("cannot create {}", unsorted.display()), e))?;
        let mut writer = BufWriter::with_capacity(self.request.io_buffer_size, out);

        let mut line = Vec::new();
        let mut line_number = 0u64;
        while read_record(&mut reader, &mut line)
            .map_err(|e| io_failure(format!("cannot read {}", master.display()), e))?
        {
            line_number += 1;
            let domain = match domain_of(&line) {
                Some(domain) if !domain.is_empty() => domain,
                _ => {
                    return Err(SiftError::aggregation(format!(
                        "{} line {} is not a token: {:?}",
                        master.display(),
                        line_number,
                        String::from_utf8_lossy(&line)
                    )))
                }
            };
            write_record(&mut writer, domain)
                .map_err(|e| io_failure(format!("cannot write {}", unsorted.display()), e))?;
        }
        writer
            .flush()
            .map_err(|e| io_failure(format!("cannot write {}", unsorted.display()), e))?;

        Ok(line_number)
    }
}

fn io_failure(message: String, e: io::Error) -> SiftError {
    SiftError::Aggregation {
        message,
        source: Some(e.into()),
    }
}

fn write_summary(sorted: &Path, partial: &Path) -> io::Result<AggregateStats> {
    let mut reader = BufReader::new(File::open(sorted)?);
    let mut writer = BufWriter::new(File::create(partial)?);
    let stats = count_sorted_domains(&mut reader, &mut writer)?;
    writer.flush()?;
    Ok(stats)
}
