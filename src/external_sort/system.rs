use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};

use crate::constants::SYSTEM_SORT_PROGRAM;
use crate::external_sort::{ExternalSorter, SortRequest, SortStats};

/// Delegates to `sort(1)` under the C locale, which gives byte-wise collation.
/// Assumes GNU coreutils for `--parallel`.
pub struct SystemSort {
    program: PathBuf,
}

impl SystemSort {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from(SYSTEM_SORT_PROGRAM),
        }
    }

    pub fn with_program<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn command(&self, inputs: &[PathBuf], output: &Path, request: &SortRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.env("LC_ALL", "C");
        if request.dedup {
            cmd.arg("-u");
        }
        cmd.arg(format!("--parallel={}", request.threads.max(1)))
            .arg("-S")
            .arg(format!("{}b", request.budget.bytes()))
            .arg("-T")
            .arg(&request.scratch_dir)
            .arg("-o")
            .arg(output)
            .args(inputs)
            .stdin(Stdio::null());
        cmd
    }

    pub fn describe(cmd: &Command) -> String {
        let mut text = cmd.get_program().to_string_lossy().into_owned();
        for arg in cmd.get_args() {
            text.push(' ');
            text.push_str(&arg.to_string_lossy());
        }
        text
    }
}

impl Default for SystemSort {
    fn default() -> Self {
        Self::new()
    }
}

impl ExternalSorter for SystemSort {
    fn name(&self) -> &'static str {
        "sort(1)"
    }

    fn sort(&self, inputs: &[PathBuf], output: &Path, request: &SortRequest) -> Result<SortStats> {
        // sort(1) reads stdin when given no files.
        if inputs.is_empty() {
            File::create(output)
                .with_context(|| format!("failed to create {}", output.display()))?;
            return Ok(SortStats {
                records_in: Some(0),
                ..Default::default()
            });
        }

        std::fs::create_dir_all(&request.scratch_dir).with_context(|| {
            format!("failed to create scratch directory {}", request.scratch_dir.display())
        })?;

        let mut cmd = self.command(inputs, output, request);
        let description = Self::describe(&cmd);
        info!("Running command: LC_ALL=C {}", description);

        let result = cmd
            .output()
            .with_context(|| format!("failed to start `{}`", description))?;
        if !result.status.success() {
            anyhow::bail!(
                "`{}` exited with {}: {}",
                description,
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            );
        }

        let records_out = count_lines(output)?;
        debug!("{} produced {} records", SYSTEM_SORT_PROGRAM, records_out);

        Ok(SortStats {
            records_in: None,
            records_out,
            runs_written: 0,
            merge_passes: 1,
        })
    }
}

/// Number of `\n`-terminated records in `path`.
pub(crate) fn count_lines(path: &Path) -> Result<u64> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut count = 0u64;
    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            break;
        }
        count += buf.iter().filter(|&&b| b == b'\n').count() as u64;
        let len = buf.len();
        reader.consume(len);
    }
    Ok(count)
}
