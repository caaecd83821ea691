//! Mounted volume
//!
//! [`FatVolume`] ties the pieces together: it reads the boot record and the
//! allocation tables, loads the directory tree on the worker pool, moves
//! directories whose cluster went bad during the load, and then serves the
//! read-side operations below and the mutations in
//! [`operations`](super::operations).
//!
//! ## Mount Sequence
//!
//! 1. Boot record, validated, then the derived [`Layout`]
//! 2. All table copies, resynchronised from copy 0 if they differ
//! 3. Concurrent tree load from the root cluster
//! 4. Relocation of every directory flagged bad during the load; a bad root
//!    fails the mount with [`FatError::CorruptionFatal`]

use std::fs::OpenOptions;
use std::path::Path;

use log::{info, warn};

use crate::config::MountConfig;
use crate::error::{FatError, PathError, Result, SpaceError};

use super::fault::{stamp_fault_signature, ClusterHealth, FaultInspector, RepairRoll};
use super::format::encode_directory;
use super::header::{BootRecord, Layout};
use super::io::{Disk, FileBackend, StorageBackend};
use super::loader::load_tree;
use super::table::{AllocationTables, TableEntry};
use super::tree::{NodeId, Tree};

/// One line of the tree listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Absolute path, `/` for the root
    pub path: String,
    pub depth: usize,
    pub name: String,
    pub is_file: bool,
    /// First cluster
    pub cluster: u32,
    pub size: u32,
    /// Clusters in the file chain; 1 for directories
    ///
    /// Counted along the chain rather than from `size`, so an empty file,
    /// which still owns one cluster, reports 1.
    pub cluster_count: usize,
}

/// A mounted image
pub struct FatVolume {
    pub(super) disk: Disk,
    pub(super) header: BootRecord,
    pub(super) layout: Layout,
    pub(super) tables: AllocationTables,
    pub(super) tree: Tree,
    pub(super) inspector: FaultInspector,
}

impl FatVolume {
    /// Opens an image file read-write and mounts it
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use fatdisk::{FatVolume, MountConfig};
    /// # use std::path::Path;
    /// let volume = FatVolume::open(Path::new("disk.fat"), &MountConfig::default()).unwrap();
    /// for entry in volume.walk().unwrap() {
    ///     println!("{}", entry.path);
    /// }
    /// ```
    pub fn open(path: &Path, config: &MountConfig) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        info!("mounting {}", path.display());
        Self::mount(Box::new(FileBackend::new(file)), config)
    }

    /// Mounts an image held by any backend
    pub fn mount(backend: Box<dyn StorageBackend>, config: &MountConfig) -> Result<Self> {
        let inspector = FaultInspector::from_config(config);
        Self::mount_with_inspector(backend, config, inspector)
    }

    /// Mounts with an explicit source of repair rolls
    pub fn mount_with_roll(
        backend: Box<dyn StorageBackend>,
        config: &MountConfig,
        roll: Box<dyn RepairRoll>,
    ) -> Result<Self> {
        let inspector = FaultInspector::new(roll, config.repair_range);
        Self::mount_with_inspector(backend, config, inspector)
    }

    fn mount_with_inspector(
        backend: Box<dyn StorageBackend>,
        config: &MountConfig,
        inspector: FaultInspector,
    ) -> Result<Self> {
        let disk = Disk::new(backend);
        let header = BootRecord::read_from(&disk)?;
        let layout = Layout::from_header(&header)?;

        let size = disk.size()?;
        if size < layout.image_size() {
            return Err(FatError::image_format(format!(
                "image is {size} bytes, layout needs {}",
                layout.image_size()
            )));
        }

        let tables = AllocationTables::load(&disk, &header)?;
        let outcome = load_tree(&disk, &layout, &inspector, config.workers)?;

        let mut volume = Self {
            disk,
            header,
            layout,
            tables,
            tree: outcome.tree,
            inspector,
        };
        volume.relocate_bad_directories(&outcome.bad_dirs)?;

        info!(
            "mounted {:?}: {} clusters of {} bytes, {} table copies, {} nodes",
            volume.header.label(),
            layout.cluster_count(),
            layout.cluster_size(),
            layout.copies(),
            volume.tree.len()
        );
        Ok(volume)
    }

    /// Moves every flagged directory to a fresh cluster
    ///
    /// # Errors
    ///
    /// Returns `CorruptionFatal` without changing anything if the root is
    /// among them, and `SpaceError` when no free cluster is left.
    pub fn relocate_bad_directories(&mut self, bad_dirs: &[NodeId]) -> Result<()> {
        if bad_dirs.contains(&NodeId::ROOT) {
            return Err(FatError::CorruptionFatal {
                cluster: self.tree[NodeId::ROOT].cluster,
            });
        }
        for &dir in bad_dirs {
            self.relocate_directory(dir)?;
        }
        Ok(())
    }

    fn relocate_directory(&mut self, dir: NodeId) -> Result<()> {
        let old = self.tree[dir].cluster;
        let new = self.allocate_one()?;

        self.disk.move_cluster(&self.layout, old, new)?;
        self.tables.set_all(new, TableEntry::Directory);
        self.tables.set_all(old, TableEntry::BadCluster);
        self.tables.flush(&self.disk)?;

        self.tree.set_cluster(dir, new);
        if let Some(parent) = self.tree[dir].parent {
            self.rewrite_directory(parent)?;
        }
        warn!(
            "directory {} moved from bad cluster {old} to {new}",
            self.tree.path_of(dir)
        );
        Ok(())
    }

    /// Moves one file cluster to a fresh cluster and splices it into the chain
    ///
    /// `prev` is the cluster linking to `old`, `None` when `old` starts the
    /// chain. Returns the new cluster.
    fn relocate_file_cluster(&mut self, file: NodeId, prev: Option<u32>, old: u32) -> Result<u32> {
        let new = self.allocate_one()?;
        self.disk.move_cluster(&self.layout, old, new)?;

        for copy in 0..self.tables.copies() {
            let link = self.tables.entry(copy, old);
            self.tables.set(copy, new, link);
            if let Some(prev) = prev {
                self.tables.set(copy, prev, TableEntry::Next(new));
            }
            self.tables.set(copy, old, TableEntry::BadCluster);
        }
        self.tables.flush(&self.disk)?;

        if prev.is_none() {
            self.tree.set_cluster(file, new);
            if let Some(parent) = self.tree[file].parent {
                self.rewrite_directory(parent)?;
            }
        }
        warn!(
            "cluster {old} of {} moved to {new}",
            self.tree.path_of(file)
        );
        Ok(new)
    }

    fn allocate_one(&self) -> Result<u32> {
        self.tables.find_free_cluster().ok_or_else(|| {
            SpaceError::NotEnoughClusters {
                needed: 1,
                available: 0,
            }
            .into()
        })
    }

    /// Writes a directory's whole listing to its cluster
    pub(super) fn rewrite_directory(&self, dir: NodeId) -> Result<()> {
        let listing = encode_directory(&self.tree.entries(dir), self.layout.cluster_size());
        self.disk
            .write_cluster(&self.layout, self.tree[dir].cluster, &listing)
    }

    /// Resolves a path from the root; leading and trailing `/` are ignored
    pub fn resolve(&self, path: &str) -> Result<NodeId> {
        self.tree
            .find(NodeId::ROOT, path.trim_matches('/'))
            .ok_or_else(|| PathError::NotFound(path.to_string()).into())
    }

    pub(super) fn resolve_file(&self, path: &str) -> Result<NodeId> {
        let node = self.resolve(path)?;
        if !self.tree[node].is_file {
            return Err(PathError::NotAFile(path.to_string()).into());
        }
        Ok(node)
    }

    pub(super) fn resolve_dir(&self, path: &str) -> Result<NodeId> {
        let node = self.resolve(path)?;
        if self.tree[node].is_file {
            return Err(PathError::NotADirectory(path.to_string()).into());
        }
        Ok(node)
    }

    /// Clusters of a file in chain order
    pub fn list_clusters(&self, path: &str) -> Result<Vec<u32>> {
        let file = self.resolve_file(path)?;
        self.tables.chain(self.tree[file].cluster)
    }

    /// Reads a file's content
    ///
    /// Clusters carrying the fault signature are downgraded; a cluster that
    /// fails its repair roll is moved to a free cluster and marked bad before
    /// its bytes are returned.
    pub fn read_file(&mut self, path: &str) -> Result<Vec<u8>> {
        let file = self.resolve_file(path)?;
        let chain = self.tables.chain(self.tree[file].cluster)?;
        let mut content = Vec::with_capacity(chain.len() * self.layout.cluster_size());
        let mut prev = None;

        for cluster in chain {
            let mut buf = self.disk.read_cluster(&self.layout, cluster)?;
            let health = self
                .inspector
                .inspect(&self.disk, &self.layout, cluster, &mut buf)?;
            let current = match health {
                ClusterHealth::Bad => self.relocate_file_cluster(file, prev, cluster)?,
                ClusterHealth::Healthy | ClusterHealth::Repaired => cluster,
            };
            content.extend_from_slice(&buf);
            prev = Some(current);
        }

        content.truncate(self.tree[file].size as usize);
        Ok(content)
    }

    /// Every node in pre-order with its listing details
    pub fn walk(&self) -> Result<Vec<TreeEntry>> {
        self.tree
            .walk()
            .into_iter()
            .map(|(id, depth)| -> Result<TreeEntry> {
                let node = &self.tree[id];
                let cluster_count = if node.is_file {
                    self.tables.chain(node.cluster)?.len()
                } else {
                    1
                };
                Ok(TreeEntry {
                    path: self.tree.path_of(id),
                    depth,
                    name: node.name.clone(),
                    is_file: node.is_file,
                    cluster: node.cluster,
                    size: node.size,
                    cluster_count,
                })
            })
            .collect()
    }

    /// The first `count` entries of table copy 0
    pub fn table_rows(&self, count: usize) -> Vec<(u32, TableEntry)> {
        (0..count.min(self.tables.len()) as u32)
            .map(|cluster| (cluster, self.tables.entry(0, cluster)))
            .collect()
    }

    /// Stamps the fault signature on a cluster, keeping its other bytes
    pub fn inject_bad_signature(&self, cluster: u32) -> Result<()> {
        let mut buf = self.disk.read_cluster(&self.layout, cluster)?;
        stamp_fault_signature(&mut buf);
        self.disk.write_cluster(&self.layout, cluster, &buf)?;
        self.disk.flush()?;
        info!("fault signature written to cluster {cluster}");
        Ok(())
    }

    /// The whole image as currently stored
    pub fn image_bytes(&self) -> Result<Vec<u8>> {
        let mut image = vec![0u8; self.disk.size()? as usize];
        let read = self.disk.read_at(0, &mut image)?;
        image.truncate(read);
        Ok(image)
    }

    pub fn header(&self) -> &BootRecord {
        &self.header
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn tables(&self) -> &AllocationTables {
        &self.tables
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }
}
