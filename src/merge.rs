use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::constants::*;
use crate::error::{Result, SiftError};
use crate::external_sort::system::count_lines;
use crate::external_sort::{ExternalSorter, SortRequest, SortStats};
use crate::utils::partial_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionGroup {
    Conforming,
    NonConforming,
}

impl PartitionGroup {
    pub fn prefix(self) -> &'static str {
        match self {
            PartitionGroup::Conforming => CONFORMING_PARTITION_PREFIX,
            PartitionGroup::NonConforming => NON_CONFORMING_PARTITION_PREFIX,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PartitionGroup::Conforming => "conforming",
            PartitionGroup::NonConforming => "non-conforming",
        }
    }

    pub fn of(file_name: &str) -> Option<Self> {
        [PartitionGroup::Conforming, PartitionGroup::NonConforming]
            .into_iter()
            .find(|group| file_name.starts_with(group.prefix()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredPartitions {
    pub conforming: Vec<PathBuf>,
    pub non_conforming: Vec<PathBuf>,
}

impl DiscoveredPartitions {
    pub fn group(&self, group: PartitionGroup) -> &[PathBuf] {
        match group {
            PartitionGroup::Conforming => &self.conforming,
            PartitionGroup::NonConforming => &self.non_conforming,
        }
    }
}

/// Partition files directly inside `temp_dir`, grouped by name prefix.
/// Anything else there (scratch directories, stray files) is ignored.
pub fn discover_partitions(temp_dir: &Path) -> Result<DiscoveredPartitions> {
    let entries = fs::read_dir(temp_dir).map_err(|e| {
        SiftError::io(format!("cannot list partitions in {}", temp_dir.display()), e)
    })?;

    let mut found = DiscoveredPartitions::default();
    for entry in entries {
        let entry = entry.map_err(|e| {
            SiftError::io(format!("cannot list partitions in {}", temp_dir.display()), e)
        })?;
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        if !is_file {
            continue;
        }

        let name = entry.file_name();
        match PartitionGroup::of(&name.to_string_lossy()) {
            Some(PartitionGroup::Conforming) => found.conforming.push(entry.path()),
            Some(PartitionGroup::NonConforming) => found.non_conforming.push(entry.path()),
            None => {}
        }
    }

    found.conforming.sort();
    found.non_conforming.sort();
    Ok(found)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMergeReport {
    pub group: PartitionGroup,
    pub partitions: usize,
    pub master: PathBuf,
    pub sort: SortStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeReport {
    pub conforming: GroupMergeReport,
    pub non_conforming: GroupMergeReport,
}

/// Folds each partition group into one sorted, deduplicated master file.
pub struct PartitionMerger {
    sorter: Arc<dyn ExternalSorter>,
    request: SortRequest,
}

impl PartitionMerger {
    pub fn new(sorter: Arc<dyn ExternalSorter>, request: SortRequest) -> Self {
        Self {
            sorter,
            request: request.with_dedup(true),
        }
    }

    pub fn merge_all(
        &self,
        temp_dir: &Path,
        conforming_master: &Path,
        non_conforming_master: &Path,
    ) -> Result<MergeReport> {
        self.merge_discovered(temp_dir, conforming_master, non_conforming_master, false)
    }

    /// Like [`PartitionMerger::merge_all`], but a group with no partitions
    /// left whose master already exists keeps that master. This is the
    /// state after a later stage failed, when the partitions of that group
    /// have already been folded in and deleted.
    pub fn merge_pending(
        &self,
        temp_dir: &Path,
        conforming_master: &Path,
        non_conforming_master: &Path,
    ) -> Result<MergeReport> {
        self.merge_discovered(temp_dir, conforming_master, non_conforming_master, true)
    }

    fn merge_discovered(
        &self,
        temp_dir: &Path,
        conforming_master: &Path,
        non_conforming_master: &Path,
        keep_published: bool,
    ) -> Result<MergeReport> {
        let partitions = discover_partitions(temp_dir)?;
        info!(
            "Found {} conforming and {} non-conforming partitions",
            partitions.conforming.len(),
            partitions.non_conforming.len()
        );

        let conforming = self.merge_or_keep(
            PartitionGroup::Conforming,
            partitions.group(PartitionGroup::Conforming),
            conforming_master,
            keep_published,
        )?;
        let non_conforming = self.merge_or_keep(
            PartitionGroup::NonConforming,
            partitions.group(PartitionGroup::NonConforming),
            non_conforming_master,
            keep_published,
        )?;

        // Partitions go only once both masters are published, so a failure
        // in either group can be retried from the full partition set.
        remove_partitions(&partitions.conforming);
        remove_partitions(&partitions.non_conforming);

        Ok(MergeReport {
            conforming,
            non_conforming,
        })
    }

    fn merge_or_keep(
        &self,
        group: PartitionGroup,
        partitions: &[PathBuf],
        master: &Path,
        keep_published: bool,
    ) -> Result<GroupMergeReport> {
        if keep_published && partitions.is_empty() && master.is_file() {
            return keep_master(group, master);
        }
        self.merge_group(group, partitions, master)
    }

    /// Sorts `partitions` into `master.partial`, syncs it and renames it over
    /// `master`. The partitions are not touched; on failure any previous
    /// master is left alone.
    pub fn merge_group(
        &self,
        group: PartitionGroup,
        partitions: &[PathBuf],
        master: &Path,
    ) -> Result<GroupMergeReport> {
        let partial = partial_path(master);
        info!(
            "Merging {} {} partitions into {} with {}",
            partitions.len(),
            group.label(),
            master.display(),
            self.sorter.name()
        );

        let sort = match self.sorter.sort(partitions, &partial, &self.request) {
            Ok(stats) => stats,
            Err(source) => {
                remove_if_exists(&partial);
                return Err(SiftError::Merge {
                    group: group.label(),
                    operation: self.sorter.name().to_string(),
                    source,
                });
            }
        };

        if let Err(e) = publish(&partial, master) {
            remove_if_exists(&partial);
            return Err(SiftError::Merge {
                group: group.label(),
                operation: format!("replacing {}", master.display()),
                source: e.into(),
            });
        }

        info!(
            "{} master written: {} unique records",
            group.label(),
            sort.records_out
        );

        Ok(GroupMergeReport {
            group,
            partitions: partitions.len(),
            master: master.to_path_buf(),
            sort,
        })
    }
}

fn keep_master(group: PartitionGroup, master: &Path) -> Result<GroupMergeReport> {
    let records_out = count_lines(master).map_err(|source| SiftError::Merge {
        group: group.label(),
        operation: format!("reading {}", master.display()),
        source,
    })?;
    info!(
        "No {} partitions left, keeping {} ({} records)",
        group.label(),
        master.display(),
        records_out
    );

    Ok(GroupMergeReport {
        group,
        partitions: 0,
        master: master.to_path_buf(),
        sort: SortStats {
            records_out,
            ..Default::default()
        },
    })
}

fn remove_partitions(partitions: &[PathBuf]) {
    for partition in partitions {
        if let Err(e) = fs::remove_file(partition) {
            warn!("Could not delete merged partition {}: {}", partition.display(), e);
        }
    }
}

/// Makes `partial` durable, then atomically moves it over `target`.
pub fn publish(partial: &Path, target: &Path) -> std::io::Result<()> {
    fs::File::open(partial)?.sync_all()?;
    fs::rename(partial, target)
}

pub fn remove_if_exists(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external_sort::{ChunkedMergeSorter, InMemorySorter, MemoryBudget};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct FailingSorter;

    impl ExternalSorter for FailingSorter {
        fn name(&self) -> &'static str {
            "failing sort"
        }

        fn sort(&self, _inputs: &[PathBuf], output: &Path, _request: &SortRequest) -> anyhow::Result<SortStats> {
            fs::write(output, "half a file").unwrap();
            anyhow::bail!("No space left on device")
        }
    }

    /// Delegates to the in-memory sorter except on the `fail_on`-th call.
    struct FailOnCall {
        calls: AtomicUsize,
        fail_on: usize,
    }

    impl FailOnCall {
        fn new(fail_on: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_on,
            }
        }
    }

    impl ExternalSorter for FailOnCall {
        fn name(&self) -> &'static str {
            "flaky sort"
        }

        fn sort(&self, inputs: &[PathBuf], output: &Path, request: &SortRequest) -> anyhow::Result<SortStats> {
            if self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
                anyhow::bail!("disk full");
            }
            InMemorySorter.sort(inputs, output, request)
        }
    }

    fn request(scratch: &Path) -> SortRequest {
        SortRequest::new(MemoryBudget::from_bytes(1 << 20), scratch.to_path_buf())
    }

    fn seed(temp_out: &Path) {
        fs::create_dir_all(temp_out.join(SORT_SCRATCH_DIR_NAME)).unwrap();
        fs::write(temp_out.join("good_000000_a.txt"), "a@x.com\nb@y.com\n").unwrap();
        fs::write(temp_out.join("good_000001_b.txt"), "b@y.com\nc@z.com\n").unwrap();
        fs::write(temp_out.join("bad_000000_a.txt"), "noise one\n\n").unwrap();
        fs::write(temp_out.join("bad_000001_b.txt"), "noise one\nnoise two\n").unwrap();
        fs::write(temp_out.join("notes.md"), "not a partition\n").unwrap();
    }

    #[test]
    fn test_discovery_groups_by_prefix() {
        let dir = tempdir().unwrap();
        seed(dir.path());

        let found = discover_partitions(dir.path()).unwrap();
        assert_eq!(found.conforming.len(), 2);
        assert_eq!(found.non_conforming.len(), 2);
        assert!(found.conforming[0].ends_with("good_000000_a.txt"));
    }

    #[test]
    fn test_overlapping_partitions_merge_to_unique_master() {
        let dir = tempdir().unwrap();
        let temp_out = dir.path().join("temp_out");
        seed(&temp_out);
        let good = dir.path().join("mad_out.txt");
        let bad = dir.path().join("run_su_bad.txt");

        let merger = PartitionMerger::new(
            Arc::new(ChunkedMergeSorter::new()),
            request(&temp_out.join(SORT_SCRATCH_DIR_NAME)),
        );
        let report = merger.merge_all(&temp_out, &good, &bad).unwrap();

        assert_eq!(fs::read_to_string(&good).unwrap(), "a@x.com\nb@y.com\nc@z.com\n");
        assert_eq!(fs::read_to_string(&bad).unwrap(), "\nnoise one\nnoise two\n");
        assert_eq!(report.conforming.partitions, 2);
        assert_eq!(report.conforming.sort.records_out, 3);

        let left = discover_partitions(&temp_out).unwrap();
        assert!(left.conforming.is_empty());
        assert!(left.non_conforming.is_empty());
        assert!(temp_out.join("notes.md").exists());
        assert!(!partial_path(&good).exists());
    }

    #[test]
    fn test_previous_master_is_replaced() {
        let dir = tempdir().unwrap();
        let temp_out = dir.path().join("temp_out");
        seed(&temp_out);
        let good = dir.path().join("mad_out.txt");
        fs::write(&good, "stale@old.com\n").unwrap();

        let merger = PartitionMerger::new(Arc::new(InMemorySorter), request(&temp_out));
        let partitions = discover_partitions(&temp_out).unwrap();
        merger
            .merge_group(PartitionGroup::Conforming, &partitions.conforming, &good)
            .unwrap();

        assert_eq!(fs::read_to_string(&good).unwrap(), "a@x.com\nb@y.com\nc@z.com\n");
    }

    #[test]
    fn test_failed_merge_keeps_partitions_and_prior_master() {
        let dir = tempdir().unwrap();
        let temp_out = dir.path().join("temp_out");
        seed(&temp_out);
        let good = dir.path().join("mad_out.txt");
        let bad = dir.path().join("run_su_bad.txt");
        fs::write(&good, "previous@run.com\n").unwrap();

        let merger = PartitionMerger::new(Arc::new(FailingSorter), request(&temp_out));
        let err = merger.merge_all(&temp_out, &good, &bad).unwrap_err();

        match &err {
            SiftError::Merge { group, operation, .. } => {
                assert_eq!(*group, "conforming");
                assert_eq!(operation, "failing sort");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.to_string().contains("No space left on device"));
        assert_eq!(fs::read_to_string(&good).unwrap(), "previous@run.com\n");
        assert!(!partial_path(&good).exists());
        assert!(!bad.exists());

        let left = discover_partitions(&temp_out).unwrap();
        assert_eq!(left.conforming.len(), 2);
        assert_eq!(left.non_conforming.len(), 2);
    }

    #[test]
    fn test_empty_group_writes_empty_master() {
        let dir = tempdir().unwrap();
        let master = dir.path().join("run_su_bad.txt");
        let merger = PartitionMerger::new(Arc::new(ChunkedMergeSorter::new()), request(dir.path()));
        let report = merger
            .merge_group(PartitionGroup::NonConforming, &[], &master)
            .unwrap();
        assert_eq!(report.partitions, 0);
        assert_eq!(fs::read(&master).unwrap().len(), 0);
    }

    #[test]
    fn test_second_group_failure_keeps_every_partition() {
        let dir = tempdir().unwrap();
        let temp_out = dir.path().join("temp_out");
        seed(&temp_out);
        let good = dir.path().join("mad_out.txt");
        let bad = dir.path().join("run_su_bad.txt");

        let merger = PartitionMerger::new(Arc::new(FailOnCall::new(2)), request(&temp_out));
        let err = merger.merge_all(&temp_out, &good, &bad).unwrap_err();
        assert!(matches!(err, SiftError::Merge { group: "non-conforming", .. }));

        // the conforming master was published, but its partitions stay
        assert_eq!(fs::read_to_string(&good).unwrap(), "a@x.com\nb@y.com\nc@z.com\n");
        let left = discover_partitions(&temp_out).unwrap();
        assert_eq!(left.conforming.len(), 2);
        assert_eq!(left.non_conforming.len(), 2);

        let retry = PartitionMerger::new(Arc::new(InMemorySorter), request(&temp_out));
        let report = retry.merge_pending(&temp_out, &good, &bad).unwrap();
        assert_eq!(report.conforming.partitions, 2);
        assert_eq!(fs::read_to_string(&good).unwrap(), "a@x.com\nb@y.com\nc@z.com\n");
        assert_eq!(fs::read_to_string(&bad).unwrap(), "\nnoise one\nnoise two\n");
    }

    #[test]
    fn test_pending_merge_keeps_published_masters() {
        let dir = tempdir().unwrap();
        let temp_out = dir.path().join("temp_out");
        fs::create_dir_all(&temp_out).unwrap();
        let good = dir.path().join("mad_out.txt");
        let bad = dir.path().join("run_su_bad.txt");
        fs::write(&good, "a@x.com\nb@y.com\n").unwrap();
        fs::write(&bad, "noise\n").unwrap();

        let merger = PartitionMerger::new(Arc::new(FailingSorter), request(&temp_out));
        let report = merger.merge_pending(&temp_out, &good, &bad).unwrap();

        assert_eq!(report.conforming.partitions, 0);
        assert_eq!(report.conforming.sort.records_out, 2);
        assert_eq!(report.non_conforming.sort.records_out, 1);
        assert_eq!(fs::read_to_string(&good).unwrap(), "a@x.com\nb@y.com\n");
        assert_eq!(fs::read_to_string(&bad).unwrap(), "noise\n");
    }

    #[test]
    fn test_pending_merge_without_master_writes_empty_one() {
        let dir = tempdir().unwrap();
        let temp_out = dir.path().join("temp_out");
        fs::create_dir_all(&temp_out).unwrap();
        fs::write(temp_out.join("bad_000000_a.txt"), "noise\n").unwrap();
        let good = dir.path().join("mad_out.txt");
        let bad = dir.path().join("run_su_bad.txt");

        let merger = PartitionMerger::new(Arc::new(InMemorySorter), request(&temp_out));
        merger.merge_pending(&temp_out, &good, &bad).unwrap();

        assert_eq!(fs::read_to_string(&good).unwrap(), "");
        assert_eq!(fs::read_to_string(&bad).unwrap(), "noise\n");
    }
}
