//! Redundant cluster allocation tables
//!
//! The image carries `copies` identical tables right after the boot record.
//! Each table has one signed 32-bit entry per data cluster: either the index
//! of the next cluster in a chain or one of four sentinels taken from the top
//! of the signed range.
//!
//! Every write path in this module updates all copies before the tables are
//! flushed, so the copies only ever differ inside a single operation.

use std::collections::HashSet;
use std::fmt;

use log::{debug, warn};

use crate::error::{FatError, Result};

use super::header::{BootRecord, Layout, HEADER_SIZE};
use super::io::Disk;

/// Size of one table entry in bytes
pub const TABLE_ENTRY_SIZE: usize = 4;

/// Head of a directory (directories own exactly one cluster)
pub const DIRECTORY: i32 = i32::MAX - 4;
/// Cluster known to be bad, never allocated again
pub const BAD_CLUSTER: i32 = i32::MAX - 3;
/// Last cluster of a file chain
pub const FILE_END: i32 = i32::MAX - 2;
/// Free cluster
pub const UNUSED: i32 = i32::MAX - 1;

/// Decoded table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableEntry {
    /// Next cluster of the chain
    Next(u32),
    Directory,
    BadCluster,
    FileEnd,
    Unused,
    /// Value that is neither a sentinel nor a valid link
    Corrupt(i32),
}

impl TableEntry {
    /// Decodes a raw entry
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            DIRECTORY => TableEntry::Directory,
            BAD_CLUSTER => TableEntry::BadCluster,
            FILE_END => TableEntry::FileEnd,
            UNUSED => TableEntry::Unused,
            n if n >= 0 && n < DIRECTORY => TableEntry::Next(n as u32),
            n => TableEntry::Corrupt(n),
        }
    }

    /// Encodes to the on-disk value
    pub fn to_raw(self) -> i32 {
        match self {
            TableEntry::Next(n) => n as i32,
            TableEntry::Directory => DIRECTORY,
            TableEntry::BadCluster => BAD_CLUSTER,
            TableEntry::FileEnd => FILE_END,
            TableEntry::Unused => UNUSED,
            TableEntry::Corrupt(n) => n,
        }
    }
}

impl fmt::Display for TableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableEntry::Next(n) => write!(f, "{n}"),
            TableEntry::Directory => f.write_str("Directory"),
            TableEntry::BadCluster => f.write_str("Bad cluster"),
            TableEntry::FileEnd => f.write_str("File end"),
            TableEntry::Unused => f.write_str("Unused"),
            TableEntry::Corrupt(n) => write!(f, "Corrupt ({n})"),
        }
    }
}

/// In-memory copy of every allocation table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationTables {
    tables: Vec<Vec<i32>>,
}

impl AllocationTables {
    /// Creates `copies` tables of `cluster_count` free entries with cluster 0
    /// reserved for the root directory.
    pub fn new_formatted(copies: usize, cluster_count: usize) -> Self {
        let mut table = vec![UNUSED; cluster_count];
        if let Some(root) = table.first_mut() {
            *root = DIRECTORY;
        }
        Self {
            tables: vec![table; copies],
        }
    }

    /// Reads all copies sequentially after the boot record
    ///
    /// # Errors
    ///
    /// Returns `ImageFormat` if the image ends inside the table region.
    pub fn load(disk: &Disk, header: &BootRecord) -> Result<Self> {
        let count = header.cluster_count();
        let table_bytes = count * TABLE_ENTRY_SIZE;
        let mut offset = HEADER_SIZE as u64;
        let mut tables = Vec::with_capacity(header.copies());

        for copy in 0..header.copies() {
            let mut bytes = vec![0u8; table_bytes];
            let read = disk.read_at(offset, &mut bytes)?;
            if read != table_bytes {
                return Err(FatError::image_format(format!(
                    "error while reading fat table {copy}: got {read} of {table_bytes} bytes"
                )));
            }
            tables.push(decode_table(&bytes));
            offset += table_bytes as u64;
        }

        let mut loaded = Self { tables };
        loaded.resync_copies();
        Ok(loaded)
    }

    /// Forces every copy to match copy 0
    fn resync_copies(&mut self) {
        let Some((primary, rest)) = self.tables.split_first_mut() else {
            return;
        };
        for (index, copy) in rest.iter_mut().enumerate() {
            if copy != primary {
                let differing = copy.iter().zip(primary.iter()).filter(|(a, b)| a != b).count();
                warn!(
                    "fat table {} differs from table 0 in {differing} entries, resynchronising",
                    index + 1
                );
                copy.clone_from(primary);
            }
        }
    }

    /// Rewrites the whole table region, all copies
    ///
    /// # Errors
    ///
    /// Returns `IoWrite` if the backend accepts fewer bytes than the region.
    pub fn flush(&self, disk: &Disk) -> Result<()> {
        let mut bytes = Vec::with_capacity(self.copies() * self.len() * TABLE_ENTRY_SIZE);
        for table in &self.tables {
            for entry in table {
                bytes.extend_from_slice(&entry.to_le_bytes());
            }
        }

        let written = disk.write_at(HEADER_SIZE as u64, &bytes)?;
        if written != bytes.len() {
            return Err(FatError::IoWrite(format!(
                "can't update fat tables: wrote {written} of {} bytes",
                bytes.len()
            )));
        }
        debug!("flushed {} fat tables ({} bytes)", self.copies(), bytes.len());
        Ok(())
    }

    /// Number of redundant copies
    pub fn copies(&self) -> usize {
        self.tables.len()
    }

    /// Entries per copy
    pub fn len(&self) -> usize {
        self.tables.first().map_or(0, Vec::len)
    }

    /// Returns true if the tables have no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw value of one entry
    pub fn raw(&self, copy: usize, cluster: u32) -> i32 {
        self.tables[copy][cluster as usize]
    }

    /// Decoded value of one entry
    pub fn entry(&self, copy: usize, cluster: u32) -> TableEntry {
        TableEntry::from_raw(self.raw(copy, cluster))
    }

    /// Sets one entry in one copy
    pub fn set(&mut self, copy: usize, cluster: u32, entry: TableEntry) {
        self.tables[copy][cluster as usize] = entry.to_raw();
    }

    /// Sets one entry in every copy
    pub fn set_all(&mut self, cluster: u32, entry: TableEntry) {
        for table in &mut self.tables {
            table[cluster as usize] = entry.to_raw();
        }
    }

    /// First free cluster, scanning copy 0 from index 1
    pub fn find_free_cluster(&self) -> Option<u32> {
        self.free_clusters().next()
    }

    /// Up to `count` free clusters in ascending order
    ///
    /// A result shorter than `count` means the disk is full; nothing has been
    /// reserved, so the caller can drop it.
    pub fn find_free_clusters(&self, count: usize) -> Vec<u32> {
        self.free_clusters().take(count).collect()
    }

    /// Number of free clusters
    pub fn free_count(&self) -> usize {
        self.free_clusters().count()
    }

    fn free_clusters(&self) -> impl Iterator<Item = u32> + '_ {
        self.tables
            .first()
            .into_iter()
            .flat_map(|table| table.iter().enumerate().skip(1))
            .filter(|(_, raw)| **raw == UNUSED)
            .map(|(index, _)| index as u32)
    }

    /// Clusters of a file chain in order, following copy 0 to `FILE_END`
    pub fn chain(&self, start: u32) -> Result<Vec<u32>> {
        self.walk(0, start, TableEntry::FileEnd)
    }

    /// Walks one copy from `start` until a link equals `terminal`
    ///
    /// Rejects links that leave the table, sentinels other than `terminal`,
    /// and loops.
    fn walk(&self, copy: usize, start: u32, terminal: TableEntry) -> Result<Vec<u32>> {
        let table = &self.tables[copy];
        let mut visited = HashSet::new();
        let mut chain = Vec::new();
        let mut cluster = start;

        loop {
            if cluster as usize >= table.len() {
                return Err(FatError::image_format(format!(
                    "chain from cluster {start} leaves the table at {cluster}"
                )));
            }
            if !visited.insert(cluster) {
                return Err(FatError::image_format(format!(
                    "chain from cluster {start} loops back to {cluster}"
                )));
            }
            chain.push(cluster);

            match TableEntry::from_raw(table[cluster as usize]) {
                entry if entry == terminal => return Ok(chain),
                TableEntry::Next(next) => cluster = next,
                other => {
                    return Err(FatError::image_format(format!(
                        "chain from cluster {start} hits {other} at cluster {cluster} in table {copy}"
                    )))
                }
            }
        }
    }

    /// Frees every cluster of a chain in every copy
    ///
    /// Each copy is walked along its own links until the link equals
    /// `terminal` (`FileEnd` for files, `Directory` for a directory, whose
    /// chain is its single cluster). Copy 0 also zero-fills the data of each
    /// freed cluster; the other copies only carry metadata.
    ///
    /// All chains are validated and copy 0's data is zeroed before any entry
    /// changes, so a failed write leaves every copy untouched.
    pub fn release_chain(
        &mut self,
        disk: &Disk,
        layout: &Layout,
        start: u32,
        terminal: TableEntry,
    ) -> Result<()> {
        let chains = (0..self.copies())
            .map(|copy| self.walk(copy, start, terminal))
            .collect::<Result<Vec<_>>>()?;

        if let Some(primary) = chains.first() {
            for &cluster in primary {
                disk.zero_cluster(layout, cluster)?;
            }
        }

        for (copy, chain) in chains.into_iter().enumerate() {
            for cluster in chain {
                self.set(copy, cluster, TableEntry::Unused);
            }
        }
        Ok(())
    }

    /// Returns true if every copy matches copy 0
    pub fn is_consistent(&self) -> bool {
        self.tables.windows(2).all(|pair| pair[0] == pair[1])
    }

    /// Serialized bytes of one copy
    pub fn copy_bytes(&self, copy: usize) -> Vec<u8> {
        self.tables[copy].iter().flat_map(|e| e.to_le_bytes()).collect()
    }

    /// Serialized bytes of every copy, as stored on disk
    pub fn to_bytes(&self) -> Vec<u8> {
        (0..self.copies()).flat_map(|copy| self.copy_bytes(copy)).collect()
    }
}

fn decode_table(bytes: &[u8]) -> Vec<i32> {
    bytes
        .chunks_exact(TABLE_ENTRY_SIZE)
        .map(|chunk| i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::io::MemoryBackend;

    fn setup(copies: u8, clusters: u32) -> (Disk, Layout, BootRecord) {
        let header = BootRecord::new("table", copies, 64, clusters);
        let layout = Layout::from_header(&header).unwrap();
        let mut image = vec![0u8; layout.image_size() as usize];
        image[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
        let tables = AllocationTables::new_formatted(copies as usize, clusters as usize);
        let table_bytes = tables.to_bytes();
        image[HEADER_SIZE..HEADER_SIZE + table_bytes.len()].copy_from_slice(&table_bytes);
        (Disk::new(Box::new(MemoryBackend::from_data(image))), layout, header)
    }

    #[test]
    fn test_sentinels() {
        assert_eq!(DIRECTORY, 2147483643);
        assert_eq!(UNUSED, 2147483646);
        for entry in [
            TableEntry::Directory,
            TableEntry::BadCluster,
            TableEntry::FileEnd,
            TableEntry::Unused,
            TableEntry::Next(17),
        ] {
            assert_eq!(TableEntry::from_raw(entry.to_raw()), entry);
        }
        assert_eq!(TableEntry::from_raw(-5), TableEntry::Corrupt(-5));
        assert_eq!(TableEntry::from_raw(i32::MAX), TableEntry::Corrupt(i32::MAX));
    }

    #[test]
    fn test_load_and_flush() {
        let (disk, _, header) = setup(3, 10);
        let mut tables = AllocationTables::load(&disk, &header).unwrap();
        assert_eq!(tables.copies(), 3);
        assert_eq!(tables.len(), 10);
        assert_eq!(tables.entry(0, 0), TableEntry::Directory);
        assert!(tables.is_consistent());

        tables.set_all(4, TableEntry::FileEnd);
        tables.flush(&disk).unwrap();

        let reloaded = AllocationTables::load(&disk, &header).unwrap();
        assert_eq!(reloaded, tables);
        assert!(reloaded.is_consistent());
        assert_eq!(reloaded.copy_bytes(0), reloaded.copy_bytes(2));
    }

    #[test]
    fn test_load_short_image() {
        let header = BootRecord::new("short", 2, 64, 10);
        let disk = Disk::new(Box::new(MemoryBackend::new(HEADER_SIZE + 50)));
        let result = AllocationTables::load(&disk, &header);
        assert!(matches!(result, Err(FatError::ImageFormat(_))));
    }

    #[test]
    fn test_load_resyncs_divergent_copies() {
        let (disk, _, header) = setup(2, 10);
        // Break entry 5 of the second copy only
        let offset = (HEADER_SIZE + 10 * TABLE_ENTRY_SIZE + 5 * TABLE_ENTRY_SIZE) as u64;
        disk.write_at(offset, &FILE_END.to_le_bytes()).unwrap();

        let tables = AllocationTables::load(&disk, &header).unwrap();
        assert!(tables.is_consistent());
        assert_eq!(tables.entry(1, 5), TableEntry::Unused);
    }

    #[test]
    fn test_find_free_clusters() {
        let mut tables = AllocationTables::new_formatted(2, 10);
        tables.set_all(1, TableEntry::Directory);
        tables.set_all(3, TableEntry::BadCluster);

        assert_eq!(tables.find_free_cluster(), Some(2));
        let free = tables.find_free_clusters(4);
        assert_eq!(free, vec![2, 4, 5, 6]);
        assert!(free.windows(2).all(|w| w[0] < w[1]));
        assert!(free.iter().all(|&c| tables.entry(0, c) == TableEntry::Unused));

        assert_eq!(tables.find_free_clusters(0), Vec::<u32>::new());
        assert_eq!(tables.find_free_clusters(100).len(), 7);
        assert_eq!(tables.free_count(), 7);
    }

    #[test]
    fn test_find_free_skips_root() {
        let mut tables = AllocationTables::new_formatted(1, 3);
        tables.set_all(0, TableEntry::Unused);
        assert_eq!(tables.find_free_cluster(), Some(1));

        tables.set_all(1, TableEntry::FileEnd);
        tables.set_all(2, TableEntry::FileEnd);
        assert_eq!(tables.find_free_cluster(), None);
    }

    #[test]
    fn test_chain() {
        let mut tables = AllocationTables::new_formatted(2, 10);
        tables.set_all(1, TableEntry::Next(5));
        tables.set_all(5, TableEntry::Next(2));
        tables.set_all(2, TableEntry::FileEnd);
        assert_eq!(tables.chain(1).unwrap(), vec![1, 5, 2]);
    }

    #[test]
    fn test_chain_rejects_loops_and_free_links() {
        let mut tables = AllocationTables::new_formatted(1, 10);
        tables.set_all(1, TableEntry::Next(2));
        tables.set_all(2, TableEntry::Next(1));
        assert!(matches!(tables.chain(1), Err(FatError::ImageFormat(_))));

        tables.set_all(2, TableEntry::Unused);
        assert!(matches!(tables.chain(1), Err(FatError::ImageFormat(_))));

        tables.set_all(2, TableEntry::Next(50));
        assert!(matches!(tables.chain(1), Err(FatError::ImageFormat(_))));
    }

    #[test]
    fn test_release_file_chain() {
        let (disk, layout, header) = setup(2, 10);
        let mut tables = AllocationTables::load(&disk, &header).unwrap();
        tables.set_all(1, TableEntry::Next(2));
        tables.set_all(2, TableEntry::Next(3));
        tables.set_all(3, TableEntry::FileEnd);
        for cluster in 1..=3 {
            disk.write_cluster(&layout, cluster, &[0xAB; 64]).unwrap();
        }

        tables.release_chain(&disk, &layout, 1, TableEntry::FileEnd).unwrap();

        for cluster in 1..=3 {
            assert_eq!(tables.entry(0, cluster), TableEntry::Unused);
            assert_eq!(tables.entry(1, cluster), TableEntry::Unused);
            assert_eq!(disk.read_cluster(&layout, cluster).unwrap(), vec![0u8; 64]);
        }
        assert!(tables.is_consistent());
    }

    #[test]
    fn test_release_directory() {
        let (disk, layout, header) = setup(2, 10);
        let mut tables = AllocationTables::load(&disk, &header).unwrap();
        tables.set_all(4, TableEntry::Directory);

        tables.release_chain(&disk, &layout, 4, TableEntry::Directory).unwrap();
        assert_eq!(tables.entry(0, 4), TableEntry::Unused);
        assert_eq!(tables.entry(1, 4), TableEntry::Unused);
    }

    #[test]
    fn test_release_long_chain_is_iterative() {
        let count = 50_000u32;
        let header = BootRecord::new("long", 1, 64, count);
        let layout = Layout::from_header(&header).unwrap();
        let disk = Disk::new(Box::new(MemoryBackend::new(layout.image_size() as usize)));
        let mut tables = AllocationTables::new_formatted(1, count as usize);
        for cluster in 1..count - 1 {
            tables.set_all(cluster, TableEntry::Next(cluster + 1));
        }
        tables.set_all(count - 1, TableEntry::FileEnd);

        tables.release_chain(&disk, &layout, 1, TableEntry::FileEnd).unwrap();
        assert_eq!(tables.free_count(), count as usize - 1);
    }

    #[test]
    fn test_release_malformed_chain_changes_nothing() {
        let (disk, layout, header) = setup(2, 10);
        let mut tables = AllocationTables::load(&disk, &header).unwrap();
        tables.set_all(1, TableEntry::Next(2));
        tables.set_all(2, TableEntry::FileEnd);
        tables.set(1, 2, TableEntry::Unused);
        let before = tables.clone();

        let result = tables.release_chain(&disk, &layout, 1, TableEntry::FileEnd);
        assert!(matches!(result, Err(FatError::ImageFormat(_))));
        assert_eq!(tables, before);
    }

    #[test]
    fn test_flush_short_write() {
        let disk = Disk::new(Box::new(MemoryBackend::new(HEADER_SIZE + 20)));
        let tables = AllocationTables::new_formatted(2, 10);
        assert!(matches!(tables.flush(&disk), Err(FatError::IoWrite(_))));
    }

    #[test]
    fn test_display() {
        assert_eq!(TableEntry::Next(3).to_string(), "3");
        assert_eq!(TableEntry::BadCluster.to_string(), "Bad cluster");
        assert_eq!(TableEntry::FileEnd.to_string(), "File end");
    }
}
