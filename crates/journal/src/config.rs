//! Disk journal configuration.

use dtx_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_part1() -> PathBuf {
    PathBuf::from("part1.tlog")
}

fn default_part2() -> PathBuf {
    PathBuf::from("part2.tlog")
}

fn default_max_log_size_bytes() -> u64 {
    2 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

/// Configuration of one disk journal (one pair of fragment files)
///
/// Frozen by value: the journal takes a snapshot at construction, so there is
/// nothing to re-check at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskJournalConfig {
    /// Path of the first fragment file (default `part1.tlog`)
    #[serde(default = "default_part1")]
    pub log_part1_filename: PathBuf,

    /// Path of the second fragment file (default `part2.tlog`)
    #[serde(default = "default_part2")]
    pub log_part2_filename: PathBuf,

    /// Fragment rotation threshold in bytes (default 2 MB)
    ///
    /// Larger fragments let transactions stay in-doubt longer but make the
    /// pause at fragment swap longer. The public knob is megabytes
    /// (`with_max_log_size_mb`); the raw byte field exists so tests can
    /// rotate without writing megabytes.
    #[serde(default = "default_max_log_size_bytes")]
    pub max_log_size_bytes: u64,

    /// Fsync records to disk on `force` (default true)
    ///
    /// Do not disable in production: without the disk force, integrity after
    /// a crash is not guaranteed.
    #[serde(default = "default_true")]
    pub forced_write_enabled: bool,

    /// Coalesce redundant forces (default true)
    ///
    /// When enabled, a `force` that follows another `force` with no
    /// intervening write is a no-op.
    #[serde(default = "default_true")]
    pub force_batching_enabled: bool,

    /// Write only the mandatory statuses (default false)
    ///
    /// When enabled, everything but `Committing` and `Committed` is
    /// suppressed. Lowers fragment space usage, makes debugging harder.
    #[serde(default)]
    pub filter_log_status: bool,

    /// Tolerate corrupted records on read (default false)
    ///
    /// When disabled, the first corrupted record aborts a scan. When enabled,
    /// the record's index is reported in the corrupted set and scanning
    /// continues past its claimed length.
    #[serde(default)]
    pub skip_corrupted_logs: bool,
}

impl Default for DiskJournalConfig {
    fn default() -> Self {
        DiskJournalConfig {
            log_part1_filename: default_part1(),
            log_part2_filename: default_part2(),
            max_log_size_bytes: default_max_log_size_bytes(),
            forced_write_enabled: true,
            force_batching_enabled: true,
            filter_log_status: false,
            skip_corrupted_logs: false,
        }
    }
}

impl DiskJournalConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fragment file paths (builder pattern)
    pub fn with_log_files(mut self, part1: impl Into<PathBuf>, part2: impl Into<PathBuf>) -> Self {
        self.log_part1_filename = part1.into();
        self.log_part2_filename = part2.into();
        self
    }

    /// Set the fragment rotation threshold in megabytes (builder pattern)
    pub fn with_max_log_size_mb(mut self, mb: u64) -> Self {
        self.max_log_size_bytes = mb * 1024 * 1024;
        self
    }

    /// Set whether records are fsynced on `force` (builder pattern)
    pub fn with_forced_write_enabled(mut self, enabled: bool) -> Self {
        self.forced_write_enabled = enabled;
        self
    }

    /// Set whether redundant forces are coalesced (builder pattern)
    pub fn with_force_batching_enabled(mut self, enabled: bool) -> Self {
        self.force_batching_enabled = enabled;
        self
    }

    /// Set whether only mandatory statuses are written (builder pattern)
    pub fn with_filter_log_status(mut self, filter: bool) -> Self {
        self.filter_log_status = filter;
        self
    }

    /// Set whether corrupted records are skipped on read (builder pattern)
    pub fn with_skip_corrupted_logs(mut self, skip: bool) -> Self {
        self.skip_corrupted_logs = skip;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_log_size_bytes < 1024 {
            return Err(Error::invalid_input(
                "max log size must be at least 1 KB per fragment",
            ));
        }
        if self.log_part1_filename == self.log_part2_filename {
            return Err(Error::invalid_input(
                "the two fragment files must have distinct paths",
            ));
        }
        Ok(())
    }

    /// Create a configuration for tests: fragments in `dir`, 64 KB rotation
    pub fn for_testing(dir: &Path) -> Self {
        DiskJournalConfig {
            log_part1_filename: dir.join("part1.tlog"),
            log_part2_filename: dir.join("part2.tlog"),
            max_log_size_bytes: 64 * 1024,
            ..Self::default()
        }
    }
}
