use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::external_sort::{ExternalSorter, SortRequest, SortStats};
use crate::record::{read_record, write_record};

/// Loads everything and sorts it in memory. Ignores the budget, so it is
/// only suitable for small fixtures.
#[derive(Debug, Default)]
pub struct InMemorySorter;

impl ExternalSorter for InMemorySorter {
    fn name(&self) -> &'static str {
        "in-memory sort"
    }

    fn sort(&self, inputs: &[PathBuf], output: &Path, request: &SortRequest) -> Result<SortStats> {
        let mut records = Vec::new();
        let mut line = Vec::new();
        for input in inputs {
            let file = File::open(input).with_context(|| format!("failed to open {}", input.display()))?;
            let mut reader = BufReader::new(file);
            while read_record(&mut reader, &mut line)? {
                records.push(line.clone());
            }
        }

        let records_in = records.len() as u64;
        records.sort();
        if request.dedup {
            records.dedup();
        }

        let mut writer = BufWriter::new(File::create(output)?);
        for record in &records {
            write_record(&mut writer, record)?;
        }
        writer.flush()?;

        Ok(SortStats {
            records_in: Some(records_in),
            records_out: records.len() as u64,
            runs_written: 0,
            merge_passes: 0,
        })
    }
}
