use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{Result, SiftError};
use crate::partition::{PartitionPaths, PartitionStats, Partitioner};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionFailure {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleReport {
    pub files_total: usize,
    pub files_completed: usize,
    pub failures: Vec<PartitionFailure>,
    pub totals: PartitionStats,
    pub elapsed_ms: u64,
}

/// Shared by every worker; logs at most once per interval.
struct ProgressTracker {
    total: usize,
    completed: AtomicUsize,
    interval: Duration,
    last_report: Mutex<Instant>,
}

impl ProgressTracker {
    fn new(total: usize, interval: Duration) -> Self {
        Self {
            total,
            completed: AtomicUsize::new(0),
            interval,
            last_report: Mutex::new(Instant::now()),
        }
    }

    fn record_completion(&self) {
        let done = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        let mut last = self.last_report.lock();
        if done == self.total || last.elapsed() >= self.interval {
            info!("Partitioned {}/{} files", done, self.total);
            *last = Instant::now();
        }
    }
}

/// Runs one partitioner per input file on a bounded set of blocking threads.
pub struct WorkerPool {
    concurrency: usize,
    progress_interval: Duration,
}

impl WorkerPool {
    pub fn new(concurrency: usize, progress_interval: Duration) -> Self {
        Self {
            concurrency: concurrency.max(1),
            progress_interval,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Partitions every input exactly once and returns only after all of them
    /// have finished. Per-file failures land in the report.
    pub async fn run<P: Partitioner>(
        &self,
        inputs: &[PathBuf],
        temp_dir: &Path,
        partitioner: P,
    ) -> Result<ScheduleReport> {
        let start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let progress = Arc::new(ProgressTracker::new(inputs.len(), self.progress_interval));
        let partitioner = Arc::new(partitioner);
        let mut tasks = JoinSet::new();

        info!(
            "Scheduling {} files across {} workers",
            inputs.len(),
            self.concurrency
        );

        for (index, input) in inputs.iter().enumerate() {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| SiftError::io("worker pool closed", std::io::Error::other(e)))?;

            let paths = PartitionPaths::for_input(temp_dir, index, input);
            let input = input.clone();
            let partitioner = partitioner.clone();
            let progress = progress.clone();

            tasks.spawn_blocking(move || {
                let _permit = permit;
                let result = partitioner.partition(&input, &paths);
                progress.record_completion();
                (index, result)
            });
        }

        let mut report = ScheduleReport {
            files_total: inputs.len(),
            ..Default::default()
        };
        let mut reported = HashSet::with_capacity(inputs.len());

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(stats))) => {
                    reported.insert(index);
                    report.files_completed += 1;
                    report.totals.absorb(&stats);
                }
                Ok((index, Err(e))) => {
                    reported.insert(index);
                    warn!("Skipping {}: {}", inputs[index].display(), e);
                    report.failures.push(PartitionFailure {
                        path: inputs[index].clone(),
                        error: e.to_string(),
                    });
                }
                Err(e) => {
                    debug!("Partition worker did not finish: {}", e);
                }
            }
        }

        // A worker that panicked never reported its index.
        for (index, input) in inputs.iter().enumerate() {
            if !reported.contains(&index) {
                let paths = PartitionPaths::for_input(temp_dir, index, input);
                for path in [&paths.conforming, &paths.non_conforming] {
                    let _ = std::fs::remove_file(path);
                }
                warn!("Worker for {} terminated before reporting", input.display());
                report.failures.push(PartitionFailure {
                    path: input.clone(),
                    error: "partition worker terminated unexpectedly".to_string(),
                });
            }
        }

        report.failures.sort_by(|a, b| a.path.cmp(&b.path));
        report.elapsed_ms = start.elapsed().as_millis() as u64;

        info!(
            "Partitioning finished: {}/{} files, {} failed, {} tokens, {} non-conforming lines",
            report.files_completed,
            report.files_total,
            report.failures.len(),
            report.totals.tokens_written,
            report.totals.non_conforming_lines
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::FilePartitioner;
    use std::fs;
    use tempfile::tempdir;

    /// Holds each file for a while and records how many were in flight.
    struct SlowPartitioner {
        inner: FilePartitioner,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl Partitioner for SlowPartitioner {
        fn partition(&self, input: &Path, paths: &PartitionPaths) -> Result<PartitionStats> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(25));
            let result = self.inner.partition_file(input, paths);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    fn partitioner() -> FilePartitioner {
        FilePartitioner::new(4096, false)
    }

    #[tokio::test]
    async fn test_every_file_is_partitioned_once() {
        let dir = tempdir().unwrap();
        let temp_out = dir.path().join("temp_out");
        fs::create_dir_all(&temp_out).unwrap();

        let mut inputs = Vec::new();
        for i in 0..12 {
            let path = dir.path().join(format!("in_{}.txt", i));
            fs::write(&path, format!("user{}@example.com\nnoise line {}\n", i, i)).unwrap();
            inputs.push(path);
        }

        let pool = WorkerPool::new(3, Duration::from_secs(60));
        let report = pool.run(&inputs, &temp_out, partitioner()).await.unwrap();

        assert_eq!(report.files_total, 12);
        assert_eq!(report.files_completed, 12);
        assert!(report.failures.is_empty());
        assert_eq!(report.totals.tokens_written, 12);
        assert_eq!(report.totals.non_conforming_lines, 12);
        assert_eq!(fs::read_dir(&temp_out).unwrap().count(), 24);
    }

    #[tokio::test]
    async fn test_failed_file_does_not_stop_the_others() {
        let dir = tempdir().unwrap();
        let temp_out = dir.path().join("temp_out");
        fs::create_dir_all(&temp_out).unwrap();

        let good_a = dir.path().join("a.txt");
        let good_b = dir.path().join("b.txt");
        fs::write(&good_a, "a@x.com\n").unwrap();
        fs::write(&good_b, "b@y.com\n").unwrap();
        let missing = dir.path().join("vanished.txt");

        let inputs = vec![good_a, missing.clone(), good_b];
        let pool = WorkerPool::new(2, Duration::from_secs(60));
        let report = pool.run(&inputs, &temp_out, partitioner()).await.unwrap();

        assert_eq!(report.files_completed, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, missing);
        assert_eq!(fs::read_dir(&temp_out).unwrap().count(), 4);
    }

    #[tokio::test]
    async fn test_empty_input_list() {
        let dir = tempdir().unwrap();
        let pool = WorkerPool::new(4, Duration::from_secs(1));
        let report = pool.run(&[], dir.path(), partitioner()).await.unwrap();
        assert_eq!(report.files_total, 0);
        assert_eq!(report.files_completed, 0);
    }

    #[test]
    fn test_concurrency_floor() {
        assert_eq!(WorkerPool::new(0, Duration::from_secs(1)).concurrency(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_at_most_concurrency_files_in_flight() {
        let dir = tempdir().unwrap();
        let temp_out = dir.path().join("temp_out");
        fs::create_dir_all(&temp_out).unwrap();

        let inputs: Vec<PathBuf> = (0..10)
            .map(|i| {
                let path = dir.path().join(format!("slow_{}.txt", i));
                fs::write(&path, format!("user{}@example.com\n", i)).unwrap();
                path
            })
            .collect();

        let peak = Arc::new(AtomicUsize::new(0));
        let partitioner = SlowPartitioner {
            inner: partitioner(),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: peak.clone(),
        };

        let pool = WorkerPool::new(2, Duration::from_secs(60));
        let report = pool.run(&inputs, &temp_out, partitioner).await.unwrap();

        assert_eq!(report.files_completed, 10);
        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= 2, "{} partitioners ran at once", peak);
        assert!(peak >= 1);
    }
}
