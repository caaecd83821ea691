//! Concurrent directory-tree loader
//!
//! Mounting rebuilds the tree by expanding directories breadth-first on a
//! fixed pool of worker threads. Each worker claims a pending directory from
//! a shared [`WorkQueue`], reads its cluster, appends the children to the tree
//! and queues the child directories. The pool shuts down once the queue is
//! empty and no claimed directory is still being expanded.
//!
//! ## Locks
//!
//! - the disk mutex inside [`Disk`], one positioned transfer at a time
//! - the queue mutex, paired with a condition variable
//! - the tree mutex, which also guards the set of directory clusters seen
//! - the bad-directory list
//! - the first-error slot
//!
//! No lock is held while another is taken, except the disk lock taken inside
//! a cluster read.

use std::collections::{HashSet, VecDeque};
use std::sync::{Condvar, Mutex, PoisonError};
use std::thread;

use log::{debug, error};

use crate::error::{FatError, Result};

use super::fault::{ClusterHealth, FaultInspector};
use super::format::decode_directory;
use super::header::Layout;
use super::io::Disk;
use super::tree::{NodeId, Tree};

struct QueueState {
    pending: VecDeque<NodeId>,
    in_flight: usize,
}

/// Pending directories plus a count of directories being expanded
pub struct WorkQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                in_flight: 0,
            }),
            ready: Condvar::new(),
        }
    }

    /// Queues a directory and wakes one idle worker
    pub fn push(&self, node: NodeId) -> Result<()> {
        self.state.lock()?.pending.push_back(node);
        self.ready.notify_one();
        Ok(())
    }

    /// Takes the next directory to expand
    ///
    /// Blocks only while the queue is empty and another worker may still
    /// push. Returns `None` once the queue is empty and nothing is in flight.
    /// The returned claim marks the directory done when dropped.
    pub fn claim(&self) -> Result<Option<Claim<'_>>> {
        let mut state = self.state.lock()?;
        loop {
            if let Some(node) = state.pending.pop_front() {
                state.in_flight += 1;
                return Ok(Some(Claim { queue: self, node }));
            }
            if state.in_flight == 0 {
                return Ok(None);
            }
            state = self.ready.wait(state)?;
        }
    }

    fn complete(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.in_flight -= 1;
        if state.in_flight == 0 {
            self.ready.notify_all();
        }
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// A directory claimed from the queue
///
/// Dropping the claim completes it, including when the worker unwinds.
pub struct Claim<'a> {
    queue: &'a WorkQueue,
    node: NodeId,
}

impl Claim<'_> {
    pub fn node(&self) -> NodeId {
        self.node
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.queue.complete();
    }
}

/// Result of a tree load
#[derive(Debug)]
pub struct LoadOutcome {
    pub tree: Tree,
    /// Directories whose cluster failed its repair roll, ordered by cluster
    pub bad_dirs: Vec<NodeId>,
}

struct TreeState {
    tree: Tree,
    directory_clusters: HashSet<u32>,
}

struct Loader<'a> {
    disk: &'a Disk,
    layout: &'a Layout,
    inspector: &'a FaultInspector,
    queue: WorkQueue,
    tree: Mutex<TreeState>,
    bad_dirs: Mutex<Vec<NodeId>>,
    first_error: Mutex<Option<FatError>>,
}

impl Loader<'_> {
    fn run_worker(&self, worker: usize) {
        loop {
            let claim = match self.queue.claim() {
                Ok(Some(claim)) => claim,
                Ok(None) => break,
                Err(e) => {
                    self.record_error(e);
                    break;
                }
            };
            if let Err(e) = self.expand(claim.node()) {
                error!("worker {worker}: failed to load directory: {e}");
                self.record_error(e);
            }
        }
        debug!("worker {worker} finished");
    }

    fn expand(&self, dir: NodeId) -> Result<()> {
        let cluster = self.tree.lock()?.tree[dir].cluster;
        let mut buf = self.disk.read_cluster(self.layout, cluster)?;

        if self.inspector.inspect(self.disk, self.layout, cluster, &mut buf)?
            == ClusterHealth::Bad
        {
            self.bad_dirs.lock()?.push(dir);
        }

        let entries = decode_directory(&buf, self.layout.max_dirs())?;
        let mut subdirs = Vec::new();
        {
            let mut state = self.tree.lock()?;
            for entry in entries {
                if !self.layout.contains(entry.start_cluster) {
                    return Err(FatError::image_format(format!(
                        "entry {:?} in cluster {cluster} points at cluster {} outside the data region",
                        entry.name, entry.start_cluster
                    )));
                }
                if !entry.is_file && !state.directory_clusters.insert(entry.start_cluster) {
                    return Err(FatError::image_format(format!(
                        "directory {:?} in cluster {cluster} reuses cluster {}",
                        entry.name, entry.start_cluster
                    )));
                }
                let child = state.tree.add_child(
                    dir,
                    entry.name,
                    entry.start_cluster,
                    entry.is_file,
                    entry.size,
                );
                if !entry.is_file {
                    subdirs.push(child);
                }
            }
        }

        debug!("cluster {cluster}: {} subdirectories queued", subdirs.len());
        for child in subdirs {
            self.queue.push(child)?;
        }
        Ok(())
    }

    fn record_error(&self, e: FatError) {
        let mut slot = self.first_error.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(e);
        }
    }
}

/// Rebuilds the directory tree from the root cluster
///
/// # Errors
///
/// Returns the first error any worker hit. Every worker still drains the
/// queue before the error is returned.
pub fn load_tree(
    disk: &Disk,
    layout: &Layout,
    inspector: &FaultInspector,
    workers: usize,
) -> Result<LoadOutcome> {
    let tree = Tree::new();
    let root_cluster = tree[NodeId::ROOT].cluster;
    let loader = Loader {
        disk,
        layout,
        inspector,
        queue: WorkQueue::new(),
        tree: Mutex::new(TreeState {
            tree,
            directory_clusters: HashSet::from([root_cluster]),
        }),
        bad_dirs: Mutex::new(Vec::new()),
        first_error: Mutex::new(None),
    };
    loader.queue.push(NodeId::ROOT)?;

    let workers = workers.max(1);
    thread::scope(|scope| {
        for worker in 0..workers {
            let loader = &loader;
            scope.spawn(move || loader.run_worker(worker));
        }
    });

    if let Some(e) = loader.first_error.into_inner()? {
        return Err(e);
    }

    let state = loader.tree.into_inner()?;
    let mut bad_dirs = loader.bad_dirs.into_inner()?;
    bad_dirs.sort_by_key(|&id| state.tree[id].cluster);

    debug!(
        "loaded {} nodes with {workers} workers, {} bad directories",
        state.tree.len(),
        bad_dirs.len()
    );
    Ok(LoadOutcome {
        tree: state.tree,
        bad_dirs,
    })
}
