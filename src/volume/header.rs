//! Boot record and derived layout
//!
//! The boot record is stored in the first [`HEADER_SIZE`] bytes of the image.
//! Its byte layout is fixed (little-endian, with C struct alignment padding):
//!
//! ```text
//! offset  size  field
//!      0   250  volume label, NUL padded
//!    250     1  fat_type (i8)
//!    251     1  copies (i8)
//!    252     2  cluster_size (i16)
//!    254     2  padding
//!    256     4  usable_cluster_count (i32)
//!    260     9  signature, NUL padded
//!    269     3  padding
//! ```

use std::io::Write;

use crate::error::{FatError, Result};

use super::format::DIR_ENTRY_SIZE;
use super::io::Disk;
use super::table::TABLE_ENTRY_SIZE;

/// Size of the boot record in bytes
pub const HEADER_SIZE: usize = 272;

const LABEL_LEN: usize = 250;
const SIGNATURE_LEN: usize = 9;

const FAT_TYPE_OFFSET: usize = 250;
const COPIES_OFFSET: usize = 251;
const CLUSTER_SIZE_OFFSET: usize = 252;
const CLUSTER_COUNT_OFFSET: usize = 256;
const SIGNATURE_OFFSET: usize = 260;

/// Spare bytes a directory cluster must keep after its last entry
const DIRECTORY_SLACK: usize = 8;

/// Fixed-size header at the start of every image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootRecord {
    label: [u8; LABEL_LEN],
    fat_type: i8,
    copies: i8,
    cluster_size: i16,
    cluster_count: i32,
    signature: [u8; SIGNATURE_LEN],
}

impl BootRecord {
    /// Creates a boot record with the default type and signature
    ///
    /// # Arguments
    ///
    /// * `label` - Volume description, truncated to 249 bytes
    /// * `copies` - Number of redundant allocation tables
    /// * `cluster_size` - Bytes per cluster
    /// * `cluster_count` - Clusters in the data region
    pub fn new(label: &str, copies: u8, cluster_size: u16, cluster_count: u32) -> Self {
        let mut record = Self {
            label: [0u8; LABEL_LEN],
            fat_type: 8,
            copies: copies.min(i8::MAX as u8) as i8,
            cluster_size: cluster_size.min(i16::MAX as u16) as i16,
            cluster_count: cluster_count.min(i32::MAX as u32) as i32,
            signature: [0u8; SIGNATURE_LEN],
        };
        record.set_label(label);
        record
    }

    /// Sets the table-entry width class
    pub fn with_fat_type(mut self, fat_type: i8) -> Self {
        self.fat_type = fat_type;
        self
    }

    /// Sets the author signature, truncated to 8 bytes
    pub fn with_signature(mut self, signature: &str) -> Self {
        self.signature = [0u8; SIGNATURE_LEN];
        copy_nul_terminated(&mut self.signature, signature);
        self
    }

    fn set_label(&mut self, label: &str) {
        self.label = [0u8; LABEL_LEN];
        copy_nul_terminated(&mut self.label, label);
    }

    /// Serializes the record to exactly [`HEADER_SIZE`] bytes
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[..LABEL_LEN].copy_from_slice(&self.label);
        bytes[FAT_TYPE_OFFSET] = self.fat_type as u8;
        bytes[COPIES_OFFSET] = self.copies as u8;
        bytes[CLUSTER_SIZE_OFFSET..CLUSTER_SIZE_OFFSET + 2]
            .copy_from_slice(&self.cluster_size.to_le_bytes());
        bytes[CLUSTER_COUNT_OFFSET..CLUSTER_COUNT_OFFSET + 4]
            .copy_from_slice(&self.cluster_count.to_le_bytes());
        bytes[SIGNATURE_OFFSET..SIGNATURE_OFFSET + SIGNATURE_LEN].copy_from_slice(&self.signature);
        bytes
    }

    /// Deserializes a record from bytes
    ///
    /// # Errors
    ///
    /// Returns `ImageFormat` if fewer than [`HEADER_SIZE`] bytes are given.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(FatError::image_format(format!(
                "boot record is {} bytes, expected {HEADER_SIZE}",
                bytes.len()
            )));
        }

        let mut label = [0u8; LABEL_LEN];
        label.copy_from_slice(&bytes[..LABEL_LEN]);
        let mut signature = [0u8; SIGNATURE_LEN];
        signature.copy_from_slice(&bytes[SIGNATURE_OFFSET..SIGNATURE_OFFSET + SIGNATURE_LEN]);

        Ok(Self {
            label,
            fat_type: bytes[FAT_TYPE_OFFSET] as i8,
            copies: bytes[COPIES_OFFSET] as i8,
            cluster_size: i16::from_le_bytes([
                bytes[CLUSTER_SIZE_OFFSET],
                bytes[CLUSTER_SIZE_OFFSET + 1],
            ]),
            cluster_count: i32::from_le_bytes([
                bytes[CLUSTER_COUNT_OFFSET],
                bytes[CLUSTER_COUNT_OFFSET + 1],
                bytes[CLUSTER_COUNT_OFFSET + 2],
                bytes[CLUSTER_COUNT_OFFSET + 3],
            ]),
            signature,
        })
    }

    /// Reads and validates the record at the start of the disk
    pub fn read_from(disk: &Disk) -> Result<Self> {
        let mut bytes = [0u8; HEADER_SIZE];
        let read = disk.read_at(0, &mut bytes)?;
        if read != HEADER_SIZE {
            return Err(FatError::image_format("error while reading boot record"));
        }
        let record = Self::from_bytes(&bytes)?;
        record.validate()?;
        Ok(record)
    }

    /// Writes the record to a writer
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.to_bytes())?;
        Ok(())
    }

    /// Rejects values no image can be mounted with
    pub fn validate(&self) -> Result<()> {
        if self.copies < 1 {
            return Err(FatError::image_format(format!(
                "table copy count {} must be at least 1",
                self.copies
            )));
        }
        if self.cluster_size <= 0 {
            return Err(FatError::image_format(format!(
                "cluster size {} must be positive",
                self.cluster_size
            )));
        }
        if self.cluster_count < 1 {
            return Err(FatError::image_format(format!(
                "usable cluster count {} must be at least 1",
                self.cluster_count
            )));
        }
        Ok(())
    }

    /// Returns the volume label
    pub fn label(&self) -> String {
        nul_terminated_str(&self.label)
    }

    /// Returns the author signature
    pub fn signature(&self) -> String {
        nul_terminated_str(&self.signature)
    }

    /// Returns the table-entry width class
    pub fn fat_type(&self) -> i8 {
        self.fat_type
    }

    /// Returns the number of redundant tables
    pub fn copies(&self) -> usize {
        self.copies.max(0) as usize
    }

    /// Returns the cluster size in bytes
    pub fn cluster_size(&self) -> usize {
        self.cluster_size.max(0) as usize
    }

    /// Returns the number of clusters in the data region
    pub fn cluster_count(&self) -> usize {
        self.cluster_count.max(0) as usize
    }
}

/// Offsets and capacities derived from a validated boot record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    copies: usize,
    cluster_size: usize,
    cluster_count: usize,
    max_dirs: usize,
    data_start: u64,
}

impl Layout {
    /// Computes the layout of an image
    ///
    /// # Errors
    ///
    /// Returns `ImageFormat` if the header is invalid or a cluster cannot
    /// hold at least one directory entry.
    pub fn from_header(header: &BootRecord) -> Result<Self> {
        header.validate()?;

        let cluster_size = header.cluster_size();
        let mut max_dirs = cluster_size / DIR_ENTRY_SIZE;
        if cluster_size % DIR_ENTRY_SIZE < DIRECTORY_SLACK {
            if max_dirs <= 1 {
                return Err(FatError::image_format("not enough room for directories"));
            }
            max_dirs -= 1;
        }
        if max_dirs == 0 {
            return Err(FatError::image_format("not enough room for directories"));
        }

        let table_bytes = header.copies() * header.cluster_count() * TABLE_ENTRY_SIZE;

        Ok(Self {
            copies: header.copies(),
            cluster_size,
            cluster_count: header.cluster_count(),
            max_dirs,
            data_start: (HEADER_SIZE + table_bytes) as u64,
        })
    }

    /// Number of redundant tables
    pub fn copies(&self) -> usize {
        self.copies
    }

    /// Bytes per cluster
    pub fn cluster_size(&self) -> usize {
        self.cluster_size
    }

    /// Clusters in the data region
    pub fn cluster_count(&self) -> usize {
        self.cluster_count
    }

    /// Directory entries that fit in one cluster
    pub fn max_dirs(&self) -> usize {
        self.max_dirs
    }

    /// Byte offset of cluster 0
    pub fn data_start(&self) -> u64 {
        self.data_start
    }

    /// Total image size in bytes
    pub fn image_size(&self) -> u64 {
        self.data_start + (self.cluster_count * self.cluster_size) as u64
    }

    /// Clusters needed to hold `bytes` bytes
    pub fn clusters_for(&self, bytes: usize) -> usize {
        bytes.div_ceil(self.cluster_size)
    }

    /// Returns true if `cluster` lies inside the data region
    pub fn contains(&self, cluster: u32) -> bool {
        (cluster as usize) < self.cluster_count
    }

    /// Byte offset of a cluster
    pub fn cluster_offset(&self, cluster: u32) -> Result<u64> {
        if !self.contains(cluster) {
            return Err(FatError::InvalidCluster(cluster));
        }
        Ok(self.data_start + cluster as u64 * self.cluster_size as u64)
    }
}

fn copy_nul_terminated(dest: &mut [u8], value: &str) {
    let len = value.len().min(dest.len() - 1);
    dest[..len].copy_from_slice(&value.as_bytes()[..len]);
}

fn nul_terminated_str(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::io::MemoryBackend;

    #[test]
    fn test_record_serialization() {
        let record = BootRecord::new("big empty fat", 2, 256, 1000).with_signature("smartine");
        let bytes = record.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);

        let parsed = BootRecord::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, record);
        assert_eq!(parsed.label(), "big empty fat");
        assert_eq!(parsed.signature(), "smartine");
        assert_eq!(parsed.copies(), 2);
        assert_eq!(parsed.cluster_size(), 256);
        assert_eq!(parsed.cluster_count(), 1000);
        assert_eq!(parsed.fat_type(), 8);
    }

    #[test]
    fn test_field_offsets() {
        let bytes = BootRecord::new("x", 3, 0x0102, 0x0A0B0C0D).to_bytes();
        assert_eq!(bytes[251], 3);
        assert_eq!(&bytes[252..254], &[0x02, 0x01]);
        assert_eq!(&bytes[256..260], &[0x0D, 0x0C, 0x0B, 0x0A]);
    }

    #[test]
    fn test_short_record() {
        let result = BootRecord::from_bytes(&[0u8; 100]);
        assert!(matches!(result, Err(FatError::ImageFormat(_))));

        let disk = Disk::new(Box::new(MemoryBackend::new(100)));
        assert!(matches!(BootRecord::read_from(&disk), Err(FatError::ImageFormat(_))));
    }

    #[test]
    fn test_zero_copies_rejected() {
        let record = BootRecord::new("x", 0, 256, 10);
        assert!(matches!(record.validate(), Err(FatError::ImageFormat(_))));
    }

    #[test]
    fn test_max_dirs_with_slack() {
        // 64 / 24 = 2 remainder 16: enough slack
        let layout = Layout::from_header(&BootRecord::new("x", 1, 64, 10)).unwrap();
        assert_eq!(layout.max_dirs(), 2);

        // 72 / 24 = 3 remainder 0: one entry is given up
        let layout = Layout::from_header(&BootRecord::new("x", 1, 72, 10)).unwrap();
        assert_eq!(layout.max_dirs(), 2);

        // 256 / 24 = 10 remainder 16
        let layout = Layout::from_header(&BootRecord::new("x", 1, 256, 10)).unwrap();
        assert_eq!(layout.max_dirs(), 10);
    }

    #[test]
    fn test_not_enough_room_for_directories() {
        // 24 / 24 = 1 remainder 0
        assert!(Layout::from_header(&BootRecord::new("x", 1, 24, 10)).is_err());
        // 16 / 24 = 0 remainder 16
        assert!(Layout::from_header(&BootRecord::new("x", 1, 16, 10)).is_err());
    }

    #[test]
    fn test_data_start() {
        let layout = Layout::from_header(&BootRecord::new("x", 2, 64, 10)).unwrap();
        assert_eq!(layout.data_start(), (HEADER_SIZE + 2 * 10 * 4) as u64);
        assert_eq!(layout.cluster_offset(3).unwrap(), layout.data_start() + 192);
        assert_eq!(layout.image_size(), layout.data_start() + 640);
        assert_eq!(layout.clusters_for(130), 3);
        assert_eq!(layout.clusters_for(128), 2);
    }

    #[test]
    fn test_label_truncated() {
        let long = "a".repeat(400);
        let record = BootRecord::new(&long, 1, 64, 10);
        assert_eq!(record.label().len(), LABEL_LEN - 1);
    }
}
