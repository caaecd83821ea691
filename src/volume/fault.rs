//! Bad-cluster detection
//!
//! A cluster is considered failing when its first and last
//! [`FAULT_SIGNATURE_LEN`] bytes are all [`FAULT_SIGNATURE_BYTE`]. Once seen,
//! the signature is downgraded on disk so the same failure is reported only
//! once, and a repair roll decides whether the cluster recovered in place or
//! has to be moved.

use std::sync::Mutex;

use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

use crate::config::{
    MountConfig, FAULT_SIGNATURE_BYTE, FAULT_SIGNATURE_LEN, PATCHED_SIGNATURE_BYTE, REPAIR_ROLL,
};
use crate::error::Result;

use super::header::Layout;
use super::io::Disk;

/// Returns true if `buf` starts and ends with the fault signature
pub fn has_fault_signature(buf: &[u8]) -> bool {
    if buf.len() < FAULT_SIGNATURE_LEN {
        return false;
    }
    let head = &buf[..FAULT_SIGNATURE_LEN];
    let tail = &buf[buf.len() - FAULT_SIGNATURE_LEN..];
    head == tail && head.iter().all(|&b| b == FAULT_SIGNATURE_BYTE)
}

/// Rewrites both ends of the buffer with the observed-fault marker
pub fn downgrade_signature(buf: &mut [u8]) {
    fill_ends(buf, PATCHED_SIGNATURE_BYTE);
}

/// Stamps the fault signature on both ends of the buffer
pub fn stamp_fault_signature(buf: &mut [u8]) {
    fill_ends(buf, FAULT_SIGNATURE_BYTE);
}

fn fill_ends(buf: &mut [u8], byte: u8) {
    let len = buf.len();
    if len < FAULT_SIGNATURE_LEN {
        return;
    }
    buf[..FAULT_SIGNATURE_LEN].fill(byte);
    buf[len - FAULT_SIGNATURE_LEN..].fill(byte);
}

/// Source of repair rolls
pub trait RepairRoll: Send {
    /// Uniform value in `0..=range`
    fn roll(&mut self, range: u32) -> u32;
}

/// Rolls drawn from any random number generator
pub struct RandomRoll<R>(pub R);

impl<R: RngCore + Send> RepairRoll for RandomRoll<R> {
    fn roll(&mut self, range: u32) -> u32 {
        self.0.random_range(0..=range)
    }
}

/// Always returns the same roll, so tests can force either outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedRoll(pub u32);

impl FixedRoll {
    /// A roll that always repairs
    pub fn repaired() -> Self {
        FixedRoll(REPAIR_ROLL)
    }

    /// A roll that never repairs
    pub fn failed() -> Self {
        FixedRoll(REPAIR_ROLL + 1)
    }
}

impl RepairRoll for FixedRoll {
    fn roll(&mut self, _range: u32) -> u32 {
        self.0
    }
}

/// Outcome of inspecting a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterHealth {
    /// No signature
    Healthy,
    /// Signature seen and downgraded, cluster usable in place
    Repaired,
    /// Signature seen and downgraded, cluster must be relocated
    Bad,
}

/// Shared detector used by the loader threads and by file reads
pub struct FaultInspector {
    roll: Mutex<Box<dyn RepairRoll>>,
    range: u32,
}

impl FaultInspector {
    pub fn new(roll: Box<dyn RepairRoll>, range: u32) -> Self {
        Self {
            roll: Mutex::new(roll),
            range,
        }
    }

    /// Seeded or OS-random rolls, as configured
    pub fn from_config(config: &MountConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self::new(Box::new(RandomRoll(rng)), config.repair_range)
    }

    /// Checks a freshly read cluster
    ///
    /// A detected signature is downgraded in `buf` and written back to the
    /// same cluster before the repair roll is drawn.
    pub fn inspect(
        &self,
        disk: &Disk,
        layout: &Layout,
        cluster: u32,
        buf: &mut [u8],
    ) -> Result<ClusterHealth> {
        if !has_fault_signature(buf) {
            return Ok(ClusterHealth::Healthy);
        }

        warn!("bad sector signature found in cluster {cluster}");
        downgrade_signature(buf);
        disk.write_cluster(layout, cluster, buf)?;

        let roll = self.roll.lock()?.roll(self.range);
        if roll == REPAIR_ROLL {
            info!("cluster {cluster} repaired in place");
            Ok(ClusterHealth::Repaired)
        } else {
            warn!("cluster {cluster} could not be repaired (roll {roll})");
            Ok(ClusterHealth::Bad)
        }
    }
}
