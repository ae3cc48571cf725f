use anyhow::Result;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};
use walkdir::WalkDir;

use crate::constants::{BYTES_PER_KB, PARTIAL_FILE_SUFFIX};

/// Maps the config verbosity to the level used for this crate's targets.
/// Unknown values fall back to `normal`.
pub fn log_level(verbosity: &str) -> Level {
    match verbosity {
        "silent" => Level::ERROR,
        "verbose" => Level::DEBUG,
        _ => Level::INFO,
    }
}

/// Installs the global subscriber. `RUST_LOG` directives still apply to
/// other crates.
pub fn setup_logging(verbosity: &str) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("dumpsift={}", log_level(verbosity)).parse()?);

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

/// Every regular file under `directory`, recursively, sorted by path so
/// partition indices are stable between runs. Symlinks are not followed.
pub fn discover_input_files<P: AsRef<Path>>(directory: P) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(directory).follow_links(false) {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }

    files.sort();
    Ok(files)
}

/// `path` with `.partial` appended, in the same directory so a rename is atomic.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(PARTIAL_FILE_SUFFIX);
    PathBuf::from(name)
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let step = BYTES_PER_KB as f64;
    let mut size = bytes as f64;
    let mut unit = 0;

    while size >= step && unit < UNITS.len() - 1 {
        size /= step;
        unit += 1;
    }

    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", size, UNITS[unit])
    }
}

/// Short human form of a stage or run duration; sub-second runs are common
/// on small corpora, so milliseconds are kept there.
pub fn format_duration(elapsed: Duration) -> String {
    let seconds = elapsed.as_secs_f64();
    if seconds < 1.0 {
        format!("{}ms", elapsed.as_millis())
    } else if seconds < 60.0 {
        format!("{:.1}s", seconds)
    } else if seconds < 3600.0 {
        format!("{:.1}m", seconds / 60.0)
    } else {
        format!("{:.1}h", seconds / 3600.0)
    }
}
