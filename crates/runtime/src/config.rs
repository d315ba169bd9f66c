//! Transaction manager configuration
//!
//! A frozen-by-value snapshot: build it, hand it to a services instance, and
//! it cannot change afterwards: each sub-service receives the snapshot at
//! construction, so there is no runtime "already started" check to trip
//! over. Property-file parsing is out of scope; the structs derive serde so
//! an embedding application can load them from whatever format it uses.

use dtx_core::uid::MAX_SERVER_ID_LENGTH;
use dtx_core::Result;
use dtx_journal::DiskJournalConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Server id used when none is configured; unsafe for production
const FALLBACK_SERVER_ID: &[u8] = b"127.0.0.1";

/// Which journal implementation to run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalKind {
    /// Two-fragment disk journal (the default)
    Disk,
    /// Accept-and-discard journal; no durability at all
    Null,
    /// Dual-leg high-availability journal
    Multiplexed,
    /// A journal built by a factory registered under this name
    Custom(String),
}

impl Default for JournalKind {
    fn default() -> Self {
        JournalKind::Disk
    }
}

fn default_journal() -> JournalKind {
    JournalKind::default()
}

fn default_secondary_disk() -> DiskJournalConfig {
    DiskJournalConfig::default().with_log_files("part3.tlog", "part4.tlog")
}

fn default_true() -> bool {
    true
}

fn default_interval() -> u64 {
    60
}

/// Configuration of one transaction manager instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// ASCII id uniquely identifying this node, at most 51 bytes
    ///
    /// Embedded in every Uid this node generates; recovery uses it to tell
    /// this node's transactions apart from other nodes'. When omitted the
    /// loopback address is used, with a warning; that is unsafe for
    /// production because two nodes would then claim each other's
    /// transactions.
    #[serde(default)]
    pub server_id: Option<String>,

    /// Journal implementation to use
    #[serde(default = "default_journal")]
    pub journal: JournalKind,

    /// Fragment configuration of the plain disk journal
    #[serde(default)]
    pub disk: DiskJournalConfig,

    /// Implementation of the multiplexed primary leg (`Disk`, `Null` or `Custom`)
    #[serde(default = "default_journal")]
    pub primary_journal: JournalKind,

    /// Implementation of the multiplexed secondary leg
    #[serde(default = "default_journal")]
    pub secondary_journal: JournalKind,

    /// Fragment configuration of the multiplexed primary leg
    #[serde(default)]
    pub primary_disk: DiskJournalConfig,

    /// Fragment configuration of the multiplexed secondary leg
    #[serde(default = "default_secondary_disk")]
    pub secondary_disk: DiskJournalConfig,

    /// Fail a multiplexed read when both legs report the same corrupted
    /// record (default true)
    #[serde(default = "default_true")]
    pub fail_on_record_corruption: bool,

    /// Recover only Xids carrying this node's server id prefix (default true)
    #[serde(default = "default_true")]
    pub current_node_only_recovery: bool,

    /// Seconds between background recovery passes; 0 disables (default 60)
    #[serde(default = "default_interval")]
    pub background_recovery_interval_secs: u64,

    /// Default transaction timeout in seconds (default 60)
    #[serde(default = "default_interval")]
    pub default_transaction_timeout_secs: u64,

    /// Seconds to wait for in-flight work at shutdown (default 60)
    #[serde(default = "default_interval")]
    pub graceful_shutdown_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server_id: None,
            journal: JournalKind::Disk,
            disk: DiskJournalConfig::default(),
            primary_journal: JournalKind::Disk,
            secondary_journal: JournalKind::Disk,
            primary_disk: DiskJournalConfig::default(),
            secondary_disk: default_secondary_disk(),
            fail_on_record_corruption: true,
            current_node_only_recovery: true,
            background_recovery_interval_secs: 60,
            default_transaction_timeout_secs: 60,
            graceful_shutdown_interval_secs: 60,
        }
    }
}

impl Config {
    /// Create a configuration with default values
    pub fn new() -> Config {
        Config::default()
    }

    /// Set the server id (builder pattern)
    pub fn with_server_id(mut self, server_id: impl Into<String>) -> Self {
        self.server_id = Some(server_id.into());
        self
    }

    /// Select the journal implementation (builder pattern)
    pub fn with_journal(mut self, journal: JournalKind) -> Self {
        self.journal = journal;
        self
    }

    /// Set the disk journal configuration (builder pattern)
    pub fn with_disk(mut self, disk: DiskJournalConfig) -> Self {
        self.disk = disk;
        self
    }

    /// Set the multiplexed leg configurations (builder pattern)
    pub fn with_multiplexed_disks(
        mut self,
        primary: DiskJournalConfig,
        secondary: DiskJournalConfig,
    ) -> Self {
        self.journal = JournalKind::Multiplexed;
        self.primary_disk = primary;
        self.secondary_disk = secondary;
        self
    }

    /// Set the both-legs-corrupted policy (builder pattern)
    pub fn with_fail_on_record_corruption(mut self, fail: bool) -> Self {
        self.fail_on_record_corruption = fail;
        self
    }

    /// Set current-node-only recovery (builder pattern)
    pub fn with_current_node_only_recovery(mut self, only: bool) -> Self {
        self.current_node_only_recovery = only;
        self
    }

    /// Set the background recovery interval, 0 to disable (builder pattern)
    pub fn with_background_recovery_interval_secs(mut self, secs: u64) -> Self {
        self.background_recovery_interval_secs = secs;
        self
    }

    /// The effective server id bytes for Uid generation
    ///
    /// Truncated to 51 bytes with a warning if longer; falls back to the
    /// loopback address (with a warning) when absent or not US-ASCII.
    pub fn server_id_bytes(&self) -> Vec<u8> {
        match &self.server_id {
            None => {
                warn!(
                    "no server id configured, using the loopback address; unsafe for production"
                );
                FALLBACK_SERVER_ID.to_vec()
            }
            Some(id) if !id.is_ascii() => {
                warn!(server_id = %id, "server id is not US-ASCII, using the loopback address");
                FALLBACK_SERVER_ID.to_vec()
            }
            Some(id) if id.len() > MAX_SERVER_ID_LENGTH => {
                warn!(
                    server_id = %id,
                    max = MAX_SERVER_ID_LENGTH,
                    "server id too long, truncating"
                );
                id.as_bytes()[..MAX_SERVER_ID_LENGTH].to_vec()
            }
            Some(id) => id.as_bytes().to_vec(),
        }
    }

    /// Validate the snapshot before services start
    pub fn validate(&self) -> Result<()> {
        self.disk.validate()?;
        if self.journal == JournalKind::Multiplexed {
            self.primary_disk.validate()?;
            self.secondary_disk.validate()?;
        }
        Ok(())
    }

    /// Configuration for tests: disk journal in `dir`, background recovery off
    pub fn for_testing(dir: &Path) -> Config {
        Config {
            server_id: Some("test-node".to_string()),
            disk: DiskJournalConfig::for_testing(dir),
            background_recovery_interval_secs: 0,
            ..Config::default()
        }
    }
}
