use serde::{Deserialize, Serialize};
use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::aggregate::{AggregateStats, DomainAggregator};
use crate::config::RunContext;
use crate::error::{Result, SiftError};
use crate::external_sort::{ExternalSorter, SortRequest};
use crate::merge::{MergeReport, PartitionMerger};
use crate::partition::FilePartitioner;
use crate::scheduler::{ScheduleReport, WorkerPool};
use crate::utils::discover_input_files;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// `None` for a merge-only run.
    pub schedule: Option<ScheduleReport>,
    pub merge: MergeReport,
    pub aggregate: AggregateStats,
    pub elapsed_ms: u64,
}

/// Drives partition → merge → aggregate for one run directory.
pub struct Pipeline {
    ctx: RunContext,
    sorter: Arc<dyn ExternalSorter>,
}

impl Pipeline {
    pub fn new(ctx: RunContext) -> Self {
        let sorter = ctx.sort_backend.sorter();
        Self { ctx, sorter }
    }

    pub fn with_sorter(ctx: RunContext, sorter: Arc<dyn ExternalSorter>) -> Self {
        Self { ctx, sorter }
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub async fn run(&self) -> Result<RunSummary> {
        let start = Instant::now();
        self.ensure_data_dir()?;

        let inputs = discover_input_files(&self.ctx.data_dir).map_err(|e| {
            SiftError::configuration(format!(
                "cannot walk {}: {:#}",
                self.ctx.data_dir.display(),
                e
            ))
        })?;
        info!("Found {} input files under {}", inputs.len(), self.ctx.data_dir.display());

        self.reset_temp_dir()?;

        let pool = WorkerPool::new(
            self.ctx.concurrency,
            Duration::from_secs(self.ctx.progress_interval_seconds),
        );
        let partitioner = FilePartitioner::new(self.ctx.io_buffer_size, self.ctx.salvage_multi_field_tokens);
        let schedule = pool.run(&inputs, &self.ctx.temp_dir, partitioner).await?;

        let (merge, aggregate) = self.merge_and_aggregate(false).await?;
        self.cleanup();

        Ok(RunSummary {
            schedule: Some(schedule),
            merge,
            aggregate,
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Merges and aggregates the partitions already in `temp_out/`, e.g.
    /// after a failed merge was fixed. A group whose partitions are gone
    /// keeps the master an earlier attempt published.
    pub async fn merge_only(&self) -> Result<RunSummary> {
        let start = Instant::now();
        if !self.ctx.temp_dir.is_dir() {
            return Err(SiftError::configuration(format!(
                "no partition directory at {}",
                self.ctx.temp_dir.display()
            )));
        }

        let (merge, aggregate) = self.merge_and_aggregate(true).await?;
        self.cleanup();

        Ok(RunSummary {
            schedule: None,
            merge,
            aggregate,
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn ensure_data_dir(&self) -> Result<()> {
        if self.ctx.data_dir.is_dir() {
            Ok(())
        } else {
            Err(SiftError::configuration(format!(
                "target path {} must contain a '{}' directory",
                self.ctx.root.display(),
                crate::constants::DATA_DIR_NAME
            )))
        }
    }

    /// Partitions from an interrupted run are never resumed.
    fn reset_temp_dir(&self) -> Result<()> {
        let temp_dir = &self.ctx.temp_dir;
        if temp_dir.exists() {
            fs::remove_dir_all(temp_dir)
                .map_err(|e| SiftError::io(format!("cannot clear {}", temp_dir.display()), e))?;
        }
        fs::create_dir_all(temp_dir)
            .map_err(|e| SiftError::io(format!("cannot create {}", temp_dir.display()), e))
    }

    fn sort_request(&self) -> SortRequest {
        SortRequest::new(self.ctx.budget, self.ctx.scratch_dir.clone())
            .with_threads(self.ctx.concurrency)
            .with_io_buffer_size(self.ctx.io_buffer_size)
    }

    async fn merge_and_aggregate(&self, retry: bool) -> Result<(MergeReport, AggregateStats)> {
        let merger = PartitionMerger::new(self.sorter.clone(), self.sort_request());
        let aggregator = DomainAggregator::new(self.sorter.clone(), self.sort_request());
        let ctx = self.ctx.clone();

        tokio::task::spawn_blocking(move || {
            let merge = if retry {
                merger.merge_pending(&ctx.temp_dir, &ctx.conforming_master, &ctx.non_conforming_master)?
            } else {
                merger.merge_all(&ctx.temp_dir, &ctx.conforming_master, &ctx.non_conforming_master)?
            };
            let aggregate = aggregator.aggregate(&ctx.conforming_master, &ctx.domain_summary)?;
            Ok((merge, aggregate))
        })
        .await
        .map_err(|e| SiftError::io("merge stage worker failed", std::io::Error::other(e)))?
    }

    fn cleanup(&self) {
        if self.ctx.keep_intermediate {
            return;
        }

        if let Err(e) = fs::remove_file(&self.ctx.conforming_master) {
            warn!("Could not remove {}: {}", self.ctx.conforming_master.display(), e);
        }
        if let Err(e) = fs::remove_dir_all(&self.ctx.temp_dir) {
            warn!("Could not remove {}: {}", self.ctx.temp_dir.display(), e);
        }
    }
}
