//! FAT-style volume stored in a single image file
//!
//! This module covers the on-disk layout (boot record, redundant allocation
//! tables, directory clusters), the concurrent tree loader run at mount time,
//! bad-cluster detection and relocation, and the operations on a mounted
//! [`FatVolume`].

pub mod container;
pub mod fault;
pub mod format;
pub mod header;
pub mod io;
pub mod loader;
pub mod operations;
pub mod table;
pub mod tree;

pub use container::{FatVolume, TreeEntry};
pub use fault::{ClusterHealth, FaultInspector, FixedRoll, RandomRoll, RepairRoll};
pub use format::{create_image, DirEntry, ImageSpec, DIR_ENTRY_SIZE};
pub use header::{BootRecord, Layout, HEADER_SIZE};
pub use io::{Disk, FileBackend, MemoryBackend, StorageBackend};
pub use loader::{load_tree, LoadOutcome, WorkQueue};
pub use operations::EntryKind;
pub use table::{AllocationTables, TableEntry};
pub use tree::{Node, NodeId, Tree};
