//! Mutating operations on a mounted volume
//!
//! Each operation checks everything it can before touching the image: names,
//! paths, directory room and free space. Once the checks pass it updates the
//! tables in every copy, flushes them, and rewrites the affected directory
//! listing as a whole.

use std::path::Path;

use log::info;

use crate::error::{PathError, Result, SpaceError};
use crate::storage;

use super::container::FatVolume;
use super::format::{extract_filename, validate_name};
use super::table::TableEntry;
use super::tree::NodeId;

/// What `remove` expects to find at the path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

impl FatVolume {
    /// Copies a host file into `dest_dir`, named after the last component of
    /// `source`
    pub fn add_file(&mut self, source: &Path, dest_dir: &str) -> Result<NodeId> {
        let data = storage::read_file(source)?;
        let source_name = source.to_string_lossy();
        let name = extract_filename(&source_name);
        self.add_bytes(name, &data, dest_dir)
    }

    /// Stores `data` as a new file `name` in `dest_dir`
    ///
    /// An empty file still owns one cluster.
    ///
    /// # Errors
    ///
    /// - `PathError` if the name is invalid, `dest_dir` is not a directory or
    ///   already holds `name`
    /// - `SpaceError` if the directory is full or there are not enough free
    ///   clusters; the image is unchanged in both cases
    pub fn add_bytes(&mut self, name: &str, data: &[u8], dest_dir: &str) -> Result<NodeId> {
        validate_name(name)?;
        let dir = self.resolve_dir(dest_dir)?;
        self.check_room(dir, name)?;

        if data.len() > i32::MAX as usize {
            return Err(SpaceError::FileTooLarge {
                size: data.len() as u64,
            }
            .into());
        }

        let needed = self.layout.clusters_for(data.len()).max(1);
        let clusters = self.tables.find_free_clusters(needed);
        if clusters.len() < needed {
            return Err(SpaceError::NotEnoughClusters {
                needed,
                available: clusters.len(),
            }
            .into());
        }

        let cluster_size = self.layout.cluster_size();
        for (index, &cluster) in clusters.iter().enumerate() {
            let start = (index * cluster_size).min(data.len());
            let end = (start + cluster_size).min(data.len());
            self.disk
                .write_cluster(&self.layout, cluster, &data[start..end])?;
        }

        // Link only once every data cluster is on disk
        for (index, &cluster) in clusters.iter().enumerate() {
            let link = match clusters.get(index + 1) {
                Some(&next) => TableEntry::Next(next),
                None => TableEntry::FileEnd,
            };
            self.tables.set_all(cluster, link);
        }

        let node = self
            .tree
            .add_child(dir, name, clusters[0], true, data.len() as u32);
        self.tables.flush(&self.disk)?;
        self.rewrite_directory(dir)?;
        self.disk.flush()?;

        info!(
            "added {} ({} bytes, {} clusters from {})",
            self.tree.path_of(node),
            data.len(),
            clusters.len(),
            clusters[0]
        );
        Ok(node)
    }

    /// Creates an empty directory `name` inside `parent`
    ///
    /// # Errors
    ///
    /// Same as [`add_bytes`](Self::add_bytes), for a single cluster.
    pub fn create_dir(&mut self, name: &str, parent: &str) -> Result<NodeId> {
        validate_name(name)?;
        let dir = self.resolve_dir(parent)?;
        self.check_room(dir, name)?;

        let cluster = self
            .tables
            .find_free_cluster()
            .ok_or(SpaceError::NotEnoughClusters {
                needed: 1,
                available: 0,
            })?;

        self.disk.zero_cluster(&self.layout, cluster)?;
        self.tables.set_all(cluster, TableEntry::Directory);
        let node = self.tree.add_child(dir, name, cluster, false, 0);
        self.tables.flush(&self.disk)?;
        self.rewrite_directory(dir)?;
        self.disk.flush()?;

        info!("created directory {} at cluster {cluster}", self.tree.path_of(node));
        Ok(node)
    }

    /// Removes a file or an empty directory
    ///
    /// # Errors
    ///
    /// `PathError` if the path is missing, is not of `kind`, is a non-empty
    /// directory, or is the root. Nothing is changed in those cases.
    pub fn remove(&mut self, path: &str, kind: EntryKind) -> Result<()> {
        let node = self.resolve(path)?;
        if node == NodeId::ROOT {
            return Err(PathError::RootNotRemovable.into());
        }

        let target = &self.tree[node];
        let terminal = match kind {
            EntryKind::File if !target.is_file => {
                return Err(PathError::NotAFile(path.to_string()).into())
            }
            EntryKind::Directory if target.is_file => {
                return Err(PathError::NotADirectory(path.to_string()).into())
            }
            EntryKind::Directory if !target.children.is_empty() => {
                return Err(PathError::NotEmpty(path.to_string()).into())
            }
            EntryKind::File => TableEntry::FileEnd,
            EntryKind::Directory => TableEntry::Directory,
        };
        let cluster = target.cluster;
        let removed_path = self.tree.path_of(node);

        self.tables
            .release_chain(&self.disk, &self.layout, cluster, terminal)?;
        self.tables.flush(&self.disk)?;
        if let Some(parent) = self.tree.detach(node) {
            self.rewrite_directory(parent)?;
        }
        self.disk.flush()?;

        info!("removed {removed_path}");
        Ok(())
    }

    fn check_room(&self, dir: NodeId, name: &str) -> Result<()> {
        if self.tree.find_child(dir, name).is_some() {
            return Err(PathError::AlreadyExists(name.to_string()).into());
        }
        let max = self.layout.max_dirs();
        if self.tree.children(dir).len() >= max {
            return Err(SpaceError::DirectoryFull { max }.into());
        }
        Ok(())
    }
}
