//! Configuration for mounting fatdisk volumes.
//!
//! This module defines the fixed parameters of the on-disk fault model and
//! the per-mount settings handed to [`crate::FatVolume`].

/// Number of loader threads used when nothing else is configured.
pub const DEFAULT_WORKERS: usize = 3;

/// Upper bound (inclusive) of the repair roll. A roll of
/// [`REPAIR_ROLL`] repairs the cluster, so the chance is 1 in 101.
pub const DEFAULT_REPAIR_RANGE: u32 = 100;

/// The roll value that counts as a successful in-place repair.
pub const REPAIR_ROLL: u32 = 0;

/// Byte repeated at both ends of a cluster to simulate a failed sector.
pub const FAULT_SIGNATURE_BYTE: u8 = b'F';

/// Byte the signature is downgraded to once it has been observed.
pub const PATCHED_SIGNATURE_BYTE: u8 = b'f';

/// Length of the signature at each end of the cluster.
pub const FAULT_SIGNATURE_LEN: usize = 8;

/// Maximum name length stored in a directory entry.
pub const MAX_NAME_LEN: usize = 12;

/// Names may not start with this prefix: it is what a downgraded
/// signature looks like at the head of a directory cluster.
pub const RESERVED_NAME_PREFIX: &str = "ffffffff";

/// Rows printed by the table dump when no count is given.
pub const DEFAULT_TABLE_ROWS: usize = 20;

/// Settings applied when mounting a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountConfig {
    /// Number of threads used to load the directory tree (at least 1).
    pub workers: usize,
    /// Inclusive upper bound of the repair roll.
    pub repair_range: u32,
    /// Seed for the repair roll; `None` draws from the OS.
    pub seed: Option<u64>,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            repair_range: DEFAULT_REPAIR_RANGE,
            seed: None,
        }
    }
}

impl MountConfig {
    /// Creates a configuration with an explicit worker count and repair range.
    ///
    /// # Examples
    ///
    /// ```
    /// # use fatdisk::config::MountConfig;
    /// let config = MountConfig::new(8, 100);
    /// assert_eq!(config.workers, 8);
    /// ```
    pub fn new(workers: usize, repair_range: u32) -> Self {
        Self {
            workers: workers.max(1),
            repair_range,
            seed: None,
        }
    }

    /// Returns a copy using `workers` loader threads (clamped to 1).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Returns a copy whose repair roll is seeded deterministically.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Loads the tree on a single thread.
    pub fn single_threaded() -> Self {
        Self::default().with_workers(1)
    }
}
