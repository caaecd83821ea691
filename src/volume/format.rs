//! On-disk directory format and image creation
//!
//! A directory owns exactly one cluster, filled with fixed-size entries:
//!
//! ```text
//! offset  size  field
//!      0    13  name, up to 12 bytes + NUL
//!     13     1  is_file (0 = directory, 1 = file)
//!     14     2  padding
//!     16     4  size in bytes (i32, 0 for directories)
//!     20     4  start cluster (i32)
//! ```
//!
//! Entries are read in order and the first one whose start cluster is 0 ends
//! the listing. Writers never leave a hole: a directory cluster is always
//! rewritten as a whole, zeroed first, then filled with the children in order.
//!
//! ## Image Layout
//!
//! ```text
//! [boot record][table 0]...[table N-1][cluster 0][cluster 1]...
//! ```
//!
//! A fresh image has every table entry `UNUSED` except entry 0, which is the
//! root directory, and an all-zero data region.

use std::io::Write;
use std::path::Path;

use crate::config::{MAX_NAME_LEN, RESERVED_NAME_PREFIX};
use crate::error::{FatError, PathError, Result};
use crate::storage;

use super::header::{BootRecord, Layout};
use super::table::AllocationTables;

/// Size of one directory entry in bytes
pub const DIR_ENTRY_SIZE: usize = 24;

const NAME_FIELD_LEN: usize = MAX_NAME_LEN + 1;
const IS_FILE_OFFSET: usize = 13;
const SIZE_OFFSET: usize = 16;
const START_OFFSET: usize = 20;

/// One record of a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_file: bool,
    pub size: u32,
    pub start_cluster: u32,
}

impl DirEntry {
    /// Encodes the entry; names longer than 12 bytes are cut
    pub fn to_bytes(&self) -> [u8; DIR_ENTRY_SIZE] {
        let mut bytes = [0u8; DIR_ENTRY_SIZE];
        let name = self.name.as_bytes();
        let len = name.len().min(MAX_NAME_LEN);
        bytes[..len].copy_from_slice(&name[..len]);
        bytes[IS_FILE_OFFSET] = self.is_file as u8;
        bytes[SIZE_OFFSET..SIZE_OFFSET + 4].copy_from_slice(&(self.size as i32).to_le_bytes());
        bytes[START_OFFSET..START_OFFSET + 4]
            .copy_from_slice(&(self.start_cluster as i32).to_le_bytes());
        bytes
    }

    /// Decodes an entry
    ///
    /// Returns `None` for the terminating entry (start cluster 0).
    ///
    /// # Errors
    ///
    /// Returns `ImageFormat` for negative sizes or start clusters.
    pub fn from_bytes(bytes: &[u8; DIR_ENTRY_SIZE]) -> Result<Option<Self>> {
        let start = read_i32(bytes, START_OFFSET);
        if start == 0 {
            return Ok(None);
        }

        let name_field = &bytes[..NAME_FIELD_LEN - 1];
        let name_end = name_field.iter().position(|&b| b == 0).unwrap_or(name_field.len());
        let name = String::from_utf8_lossy(&name_field[..name_end]).into_owned();
        let size = read_i32(bytes, SIZE_OFFSET);

        if start < 0 || size < 0 {
            return Err(FatError::image_format(format!(
                "directory entry {name:?} has start cluster {start} and size {size}"
            )));
        }

        Ok(Some(Self {
            name,
            is_file: bytes[IS_FILE_OFFSET] != 0,
            size: size as u32,
            start_cluster: start as u32,
        }))
    }
}

fn read_i32(bytes: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Reads the entries of a directory cluster up to the terminator
pub fn decode_directory(cluster: &[u8], max_dirs: usize) -> Result<Vec<DirEntry>> {
    let mut entries = Vec::new();
    for chunk in cluster.chunks_exact(DIR_ENTRY_SIZE).take(max_dirs) {
        let mut record = [0u8; DIR_ENTRY_SIZE];
        record.copy_from_slice(chunk);
        match DirEntry::from_bytes(&record)? {
            Some(entry) => entries.push(entry),
            None => break,
        }
    }
    Ok(entries)
}

/// Builds a full directory cluster: entries packed from offset 0, rest zero
pub fn encode_directory(entries: &[DirEntry], cluster_size: usize) -> Vec<u8> {
    let mut cluster = vec![0u8; cluster_size];
    for (slot, entry) in cluster.chunks_exact_mut(DIR_ENTRY_SIZE).zip(entries) {
        slot.copy_from_slice(&entry.to_bytes());
    }
    cluster
}

/// Checks a file or directory name before it is stored
pub fn validate_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        Some("name is empty")
    } else if name.len() > MAX_NAME_LEN {
        Some("maximum name length is 12 characters")
    } else if name.contains(['/', '\\', '\0']) {
        Some("name contains a path separator")
    } else if name.starts_with(RESERVED_NAME_PREFIX) {
        Some("names starting with ffffffff are forbidden")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(PathError::InvalidName {
            name: name.to_string(),
            reason,
        }
        .into()),
        None => Ok(()),
    }
}

/// Last component of a host path, split on `/` and `\`
pub fn extract_filename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Parameters of a freshly created image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSpec {
    pub label: String,
    pub signature: String,
    pub fat_type: i8,
    pub copies: u8,
    pub cluster_size: u16,
    pub cluster_count: u32,
}

impl Default for ImageSpec {
    fn default() -> Self {
        Self {
            label: "big empty fat".to_string(),
            signature: "smartine".to_string(),
            fat_type: 8,
            copies: 2,
            cluster_size: 256,
            cluster_count: 1024,
        }
    }
}

impl ImageSpec {
    /// Spec with the default label and two table copies
    pub fn new(cluster_count: u32, cluster_size: u16) -> Self {
        Self {
            cluster_count,
            cluster_size,
            ..Self::default()
        }
    }

    /// Returns a copy with `copies` redundant tables
    pub fn with_copies(mut self, copies: u8) -> Self {
        self.copies = copies;
        self
    }

    /// The boot record this spec produces
    pub fn boot_record(&self) -> BootRecord {
        BootRecord::new(&self.label, self.copies, self.cluster_size, self.cluster_count)
            .with_fat_type(self.fat_type)
            .with_signature(&self.signature)
    }

    /// Writes a complete formatted image
    ///
    /// # Errors
    ///
    /// Returns `ImageFormat` if the parameters cannot be mounted.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let header = self.boot_record();
        let layout = Layout::from_header(&header)?;

        header.write_to(writer)?;
        let tables = AllocationTables::new_formatted(layout.copies(), layout.cluster_count());
        writer.write_all(&tables.to_bytes())?;

        let empty = vec![0u8; layout.cluster_size()];
        for _ in 0..layout.cluster_count() {
            writer.write_all(&empty)?;
        }
        Ok(())
    }

    /// The complete formatted image in memory
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut image = Vec::new();
        self.write_to(&mut image)?;
        Ok(image)
    }
}

/// Creates a formatted image file atomically
///
/// # Examples
///
/// ```no_run
/// # use fatdisk::volume::format::{create_image, ImageSpec};
/// # use std::path::Path;
/// create_image(Path::new("empty.fat"), &ImageSpec::new(1000, 256)).unwrap();
/// ```
pub fn create_image(path: &Path, spec: &ImageSpec) -> Result<()> {
    // Fail on bad parameters before touching the filesystem
    Layout::from_header(&spec.boot_record())?;
    storage::write_atomically(path, |file| {
        let mut writer = std::io::BufWriter::new(file);
        spec.write_to(&mut writer)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        writer.flush()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::header::HEADER_SIZE;
    use crate::volume::table::{TableEntry, TABLE_ENTRY_SIZE};

    fn entry(name: &str, is_file: bool, size: u32, start: u32) -> DirEntry {
        DirEntry {
            name: name.to_string(),
            is_file,
            size,
            start_cluster: start,
        }
    }

    #[test]
    fn test_entry_layout() {
        let bytes = entry("README.TXT", true, 130, 7).to_bytes();
        assert_eq!(&bytes[..10], b"README.TXT");
        assert_eq!(bytes[12], 0);
        assert_eq!(bytes[13], 1);
        assert_eq!(&bytes[16..20], &130i32.to_le_bytes());
        assert_eq!(&bytes[20..24], &7i32.to_le_bytes());
    }

    #[test]
    fn test_entry_decode() {
        let docs = entry("docs", false, 0, 3);
        let decoded = DirEntry::from_bytes(&docs.to_bytes()).unwrap().unwrap();
        assert_eq!(decoded, docs);
    }

    #[test]
    fn test_terminator() {
        let bytes = [0u8; DIR_ENTRY_SIZE];
        assert_eq!(DirEntry::from_bytes(&bytes).unwrap(), None);
    }

    #[test]
    fn test_negative_start_rejected() {
        let mut bytes = entry("bad", true, 1, 1).to_bytes();
        bytes[20..24].copy_from_slice(&(-4i32).to_le_bytes());
        assert!(matches!(DirEntry::from_bytes(&bytes), Err(FatError::ImageFormat(_))));
    }

    #[test]
    fn test_directory_stops_at_first_terminator() {
        let entries = vec![entry("a", true, 1, 1), entry("b", false, 0, 2)];
        let mut cluster = encode_directory(&entries, 256);
        // A stray entry after the terminator is never read
        let stray = entry("c", true, 1, 9).to_bytes();
        cluster[3 * DIR_ENTRY_SIZE..4 * DIR_ENTRY_SIZE].copy_from_slice(&stray);

        assert_eq!(decode_directory(&cluster, 10).unwrap(), entries);
    }

    #[test]
    fn test_directory_respects_max_dirs() {
        let entries = vec![entry("a", true, 1, 1), entry("b", true, 1, 2), entry("c", true, 1, 3)];
        let cluster = encode_directory(&entries, 96);
        assert_eq!(decode_directory(&cluster, 2).unwrap().len(), 2);
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("file.txt").is_ok());
        assert!(validate_name("abcdefghijkl").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("abcdefghijklm").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("ffffffff").is_err());
        assert!(validate_name("ffffffffx").is_err());
        assert!(validate_name("fffffff").is_ok());
    }

    #[test]
    fn test_extract_filename() {
        assert_eq!(extract_filename("/tmp/dir/data.bin"), "data.bin");
        assert_eq!(extract_filename("C:\\dir\\data.bin"), "data.bin");
        assert_eq!(extract_filename("data.bin"), "data.bin");
    }

    #[test]
    fn test_image_layout() {
        let spec = ImageSpec::new(10, 64).with_copies(3);
        let image = spec.to_bytes().unwrap();
        let table_bytes = 10 * TABLE_ENTRY_SIZE;
        assert_eq!(image.len(), HEADER_SIZE + 3 * table_bytes + 10 * 64);

        let header = BootRecord::from_bytes(&image).unwrap();
        assert_eq!(header.label(), "big empty fat");
        assert_eq!(header.copies(), 3);

        for copy in 0..3 {
            let start = HEADER_SIZE + copy * table_bytes;
            let root = i32::from_le_bytes(image[start..start + 4].try_into().unwrap());
            let next = i32::from_le_bytes(image[start + 4..start + 8].try_into().unwrap());
            assert_eq!(TableEntry::from_raw(root), TableEntry::Directory);
            assert_eq!(TableEntry::from_raw(next), TableEntry::Unused);
        }
        assert!(image[HEADER_SIZE + 3 * table_bytes..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_create_image_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("empty.fat");
        let spec = ImageSpec::new(16, 128);

        create_image(&path, &spec).unwrap();

        let written = std::fs::read(&path).unwrap();
        assert_eq!(written, spec.to_bytes().unwrap());
    }

    #[test]
    fn test_create_image_rejects_tiny_clusters() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("tiny.fat");
        let result = create_image(&path, &ImageSpec::new(16, 24));
        assert!(matches!(result, Err(FatError::ImageFormat(_))));
        assert!(!path.exists());
    }
}
