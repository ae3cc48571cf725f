pub const BYTES_PER_KB: usize = 1024;
pub const BYTES_PER_MB: usize = 1_048_576;
pub const PERCENT_100: f64 = 100.0;

// Run layout, relative to the target path
pub const DATA_DIR_NAME: &str = "data";
pub const TEMP_DIR_NAME: &str = "temp_out";
pub const CONFORMING_MASTER_FILE: &str = "mad_out.txt";
pub const NON_CONFORMING_MASTER_FILE: &str = "run_su_bad.txt";
pub const DOMAIN_SUMMARY_FILE: &str = "run_su_good.txt";
pub const PARTIAL_FILE_SUFFIX: &str = ".partial";
pub const SORT_SCRATCH_DIR_NAME: &str = ".sort_scratch";
pub const DOMAIN_SCRATCH_FILE: &str = "domains.unsorted";

// Partition naming
pub const CONFORMING_PARTITION_PREFIX: &str = "good_";
pub const NON_CONFORMING_PARTITION_PREFIX: &str = "bad_";
pub const PARTITION_INDEX_WIDTH: usize = 6;

// Configuration defaults and bounds
pub const DEFAULT_MEMORY_BUDGET_PERCENT: f64 = 10.0;
pub const MIN_MEMORY_BUDGET_PERCENT: f64 = 1.0;
pub const MAX_MEMORY_BUDGET_PERCENT: f64 = 90.0;
pub const DEFAULT_IO_BUFFER_SIZE_KB: usize = 64;
pub const MIN_IO_BUFFER_SIZE_KB: usize = 4;
pub const MAX_IO_BUFFER_SIZE_KB: usize = 16 * 1024;
pub const MAX_CONCURRENCY: usize = 512;
pub const DEFAULT_PROGRESS_INTERVAL_SECONDS: u64 = 30;
pub const DEFAULT_VERBOSITY: &str = "normal";

// External sort tuning
pub const MIN_BUDGET_BYTES: usize = 16 * BYTES_PER_MB;
pub const RECORD_OVERHEAD_BYTES: usize = 32;
pub const MAX_MERGE_FAN_IN: usize = 64;
pub const MIN_MERGE_READER_BUFFER: usize = 4 * BYTES_PER_KB;
pub const MAX_MERGE_READER_BUFFER: usize = BYTES_PER_MB;
pub const OUTPUT_BUFFER_SIZE_KB: usize = 512;
pub const RUN_FILE_PREFIX: &str = "run_";
pub const RUN_FILE_EXTENSION: &str = ".txt";
pub const SYSTEM_SORT_PROGRAM: &str = "sort";
