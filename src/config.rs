use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

use crate::constants::*;
use crate::external_sort::{MemoryBudget, SortBackend};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiftConfig {
    /// Partitioner workers; 0 picks available parallelism minus one.
    pub concurrency: usize,
    /// Share of available memory the merge stage may use.
    pub memory_budget_percent: f64,
    /// Exact merge budget in bytes, overriding the percentage.
    pub memory_budget_bytes: Option<usize>,
    pub io_buffer_size_kb: usize,
    pub sort_backend: SortBackend,
    /// Also keep tokens found in multi-field lines.
    pub salvage_multi_field_tokens: bool,
    /// Leave `temp_out/` and `mad_out.txt` behind after a successful run.
    pub keep_intermediate: bool,
    pub progress_interval_seconds: u64,
    pub verbosity: String,
}

impl Default for SiftConfig {
    fn default() -> Self {
        Self {
            concurrency: 0,
            memory_budget_percent: DEFAULT_MEMORY_BUDGET_PERCENT,
            memory_budget_bytes: None,
            io_buffer_size_kb: DEFAULT_IO_BUFFER_SIZE_KB,
            sort_backend: SortBackend::Builtin,
            salvage_multi_field_tokens: false,
            keep_intermediate: false,
            progress_interval_seconds: DEFAULT_PROGRESS_INTERVAL_SECONDS,
            verbosity: DEFAULT_VERBOSITY.to_string(),
        }
    }
}

impl SiftConfig {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        let config: SiftConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.memory_budget_percent < MIN_MEMORY_BUDGET_PERCENT
            || self.memory_budget_percent > MAX_MEMORY_BUDGET_PERCENT
        {
            anyhow::bail!(
                "memory_budget_percent must be between {} and {}",
                MIN_MEMORY_BUDGET_PERCENT,
                MAX_MEMORY_BUDGET_PERCENT
            );
        }

        if self.memory_budget_bytes == Some(0) {
            anyhow::bail!("memory_budget_bytes must be greater than zero");
        }

        if self.io_buffer_size_kb < MIN_IO_BUFFER_SIZE_KB
            || self.io_buffer_size_kb > MAX_IO_BUFFER_SIZE_KB
        {
            anyhow::bail!(
                "io_buffer_size_kb must be between {} and {}",
                MIN_IO_BUFFER_SIZE_KB,
                MAX_IO_BUFFER_SIZE_KB
            );
        }

        if self.concurrency > MAX_CONCURRENCY {
            anyhow::bail!("concurrency cannot exceed {}", MAX_CONCURRENCY);
        }

        if self.progress_interval_seconds == 0 {
            anyhow::bail!("progress_interval_seconds must be at least 1");
        }

        if !matches!(self.verbosity.as_str(), "silent" | "normal" | "verbose") {
            anyhow::bail!("verbosity must be 'silent', 'normal', or 'verbose'");
        }

        Ok(())
    }

    pub fn effective_concurrency(&self) -> usize {
        if self.concurrency == 0 {
            default_concurrency()
        } else {
            self.concurrency
        }
    }

    pub fn memory_budget(&self) -> MemoryBudget {
        match self.memory_budget_bytes {
            Some(bytes) => MemoryBudget::from_bytes(bytes),
            None => MemoryBudget::from_percent_of_available(self.memory_budget_percent),
        }
    }

    pub fn io_buffer_size_bytes(&self) -> usize {
        self.io_buffer_size_kb * BYTES_PER_KB
    }
}

/// Available parallelism minus one, never below one.
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

/// Everything a run needs, resolved once from the target path and config and
/// handed to each stage.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub root: PathBuf,
    pub data_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub conforming_master: PathBuf,
    pub non_conforming_master: PathBuf,
    pub domain_summary: PathBuf,
    pub concurrency: usize,
    pub budget: MemoryBudget,
    pub io_buffer_size: usize,
    pub sort_backend: SortBackend,
    pub salvage_multi_field_tokens: bool,
    pub keep_intermediate: bool,
    pub progress_interval_seconds: u64,
}

impl RunContext {
    pub fn new<P: AsRef<Path>>(root: P, config: &SiftConfig) -> Self {
        let root = root.as_ref().to_path_buf();
        let temp_dir = root.join(TEMP_DIR_NAME);
        let context = Self {
            data_dir: root.join(DATA_DIR_NAME),
            scratch_dir: temp_dir.join(SORT_SCRATCH_DIR_NAME),
            conforming_master: root.join(CONFORMING_MASTER_FILE),
            non_conforming_master: root.join(NON_CONFORMING_MASTER_FILE),
            domain_summary: root.join(DOMAIN_SUMMARY_FILE),
            temp_dir,
            root,
            concurrency: config.effective_concurrency(),
            budget: config.memory_budget(),
            io_buffer_size: config.io_buffer_size_bytes(),
            sort_backend: config.sort_backend,
            salvage_multi_field_tokens: config.salvage_multi_field_tokens,
            keep_intermediate: config.keep_intermediate,
            progress_interval_seconds: config.progress_interval_seconds,
        };

        info!(
            "Run context: root={}, workers={}, merge budget={}",
            context.root.display(),
            context.concurrency,
            crate::utils::format_bytes(context.budget.bytes() as u64)
        );

        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = SiftConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.memory_budget_percent, 10.0);
        assert_eq!(config.sort_backend, SortBackend::Builtin);
        assert!(!config.salvage_multi_field_tokens);
    }

    #[test]
    fn test_config_validation() {
        let mut config = SiftConfig::default();

        config.memory_budget_percent = 0.5;
        assert!(config.validate().is_err());

        config.memory_budget_percent = 95.0;
        assert!(config.validate().is_err());

        config.memory_budget_percent = 25.0;
        config.io_buffer_size_kb = 1;
        assert!(config.validate().is_err());

        config.io_buffer_size_kb = 64;
        config.verbosity = "loud".to_string();
        assert!(config.validate().is_err());

        config.verbosity = "verbose".to_string();
        config.memory_budget_bytes = Some(0);
        assert!(config.validate().is_err());

        config.memory_budget_bytes = Some(4096);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_effective_concurrency() {
        let mut config = SiftConfig::default();
        assert!(config.effective_concurrency() >= 1);
        config.concurrency = 3;
        assert_eq!(config.effective_concurrency(), 3);
    }

    #[test]
    fn test_explicit_budget_wins() {
        let config = SiftConfig {
            memory_budget_bytes: Some(1234),
            ..Default::default()
        };
        assert_eq!(config.memory_budget().bytes(), 1234);
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dumpsift.json");

        let config = SiftConfig {
            concurrency: 2,
            sort_backend: SortBackend::System,
            keep_intermediate: true,
            ..Default::default()
        };
        config.save(&path).await.unwrap();

        let loaded = SiftConfig::load(&path).await.unwrap();
        assert_eq!(loaded.concurrency, 2);
        assert_eq!(loaded.sort_backend, SortBackend::System);
        assert!(loaded.keep_intermediate);
    }

    #[tokio::test]
    async fn test_partial_config_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.json");
        std::fs::write(&path, r#"{ "sort_backend": "system", "concurrency": 4 }"#).unwrap();

        let loaded = SiftConfig::load(&path).await.unwrap();
        assert_eq!(loaded.concurrency, 4);
        assert_eq!(loaded.memory_budget_percent, DEFAULT_MEMORY_BUDGET_PERCENT);
        assert_eq!(loaded.verbosity, "normal");
    }

    #[test]
    fn test_run_context_layout() {
        let config = SiftConfig {
            memory_budget_bytes: Some(1 << 20),
            ..Default::default()
        };
        let ctx = RunContext::new("/corpus", &config);
        assert_eq!(ctx.data_dir, PathBuf::from("/corpus/data"));
        assert_eq!(ctx.temp_dir, PathBuf::from("/corpus/temp_out"));
        assert_eq!(ctx.conforming_master, PathBuf::from("/corpus/mad_out.txt"));
        assert_eq!(ctx.non_conforming_master, PathBuf::from("/corpus/run_su_bad.txt"));
        assert_eq!(ctx.domain_summary, PathBuf::from("/corpus/run_su_good.txt"));
        assert!(ctx.scratch_dir.starts_with(&ctx.temp_dir));
    }
}
