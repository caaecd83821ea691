//! fatdisk - a FAT-style filesystem inside a single image file
//!
//! The image holds a boot record, several redundant cluster allocation
//! tables, and a data region of fixed-size clusters. Directories own one
//! cluster each; files are chains of clusters linked through the tables.
//!
//! # Features
//!
//! - **Redundant tables**: every table write updates all copies
//! - **Concurrent mount**: the directory tree is loaded on a worker pool
//! - **Bad-cluster recovery**: clusters carrying a fault signature are
//!   repaired in place or moved to a free cluster
//! - **Atomic formatting**: new images are written through a temporary file
//!
//! # Example
//!
//! ```no_run
//! use fatdisk::{create_image, EntryKind, FatVolume, ImageSpec, MountConfig};
//! use std::path::Path;
//!
//! let path = Path::new("disk.fat");
//! create_image(path, &ImageSpec::new(1000, 256)).unwrap();
//!
//! let mut volume = FatVolume::open(path, &MountConfig::default()).unwrap();
//! volume.create_dir("docs", "/").unwrap();
//! volume.add_bytes("notes.txt", b"hello", "docs").unwrap();
//! assert_eq!(volume.read_file("docs/notes.txt").unwrap(), b"hello");
//! volume.remove("docs/notes.txt", EntryKind::File).unwrap();
//! ```

pub mod config;
pub mod error;
pub mod storage;
pub mod volume;

// Re-export commonly used types
pub use config::MountConfig;
pub use error::{FatError, PathError, Result, SpaceError};
pub use volume::{
    create_image, EntryKind, FatVolume, FixedRoll, ImageSpec, NodeId, TableEntry, TreeEntry,
};
