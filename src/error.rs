//! Error types for the fatdisk library.
//!
//! Every operation on a mounted volume reports failure through [`FatError`].
//! All variants except [`FatError::CorruptionFatal`] are local to the
//! operation that raised them: the volume stays usable afterwards.

use thiserror::Error;

/// Main error type for all volume operations.
#[derive(Error, Debug)]
pub enum FatError {
    /// I/O error occurred while talking to the backing storage.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Header or allocation table is truncated or carries impossible values.
    #[error("Invalid image format: {0}")]
    ImageFormat(String),

    /// A path could not be used for the requested operation.
    #[error("{0}")]
    Path(#[from] PathError),

    /// Not enough room for the requested allocation.
    #[error("{0}")]
    Space(#[from] SpaceError),

    /// A write to the table region or the cluster region came up short.
    #[error("Write failed: {0}")]
    IoWrite(String),

    /// The root directory's own cluster is bad and cannot be relocated.
    #[error("Corrupted FAT: root directory cluster {cluster} is bad")]
    CorruptionFatal { cluster: u32 },

    /// Cluster index outside the data region.
    #[error("Cluster {0} is outside the data region")]
    InvalidCluster(u32),

    /// Lock poisoned by a panicking worker.
    #[error("Lock poisoned")]
    LockPoisoned,
}

impl FatError {
    /// Returns true for failures that must abort the whole mount.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FatError::CorruptionFatal { .. })
    }

    pub(crate) fn image_format(msg: impl Into<String>) -> Self {
        FatError::ImageFormat(msg.into())
    }
}

/// Path resolution and tree-shape errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Not a file: {0}")]
    NotAFile(String),

    #[error("File/Dir with same name already in path: {0}")]
    AlreadyExists(String),

    #[error("Directory not empty: {0}")]
    NotEmpty(String),

    /// Names are 1 to 12 bytes, without separators, and not reserved.
    #[error("Invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("The root directory cannot be removed")]
    RootNotRemovable,
}

/// Allocation failures. Always raised before any table or disk mutation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpaceError {
    #[error("Not enough disc space: need {needed} clusters, {available} free")]
    NotEnoughClusters { needed: usize, available: usize },

    #[error("Directory is full ({max} entries per cluster)")]
    DirectoryFull { max: usize },

    #[error("File of {size} bytes exceeds the maximum entry size")]
    FileTooLarge { size: u64 },
}

/// Type alias for Results using FatError.
pub type Result<T> = std::result::Result<T, FatError>;

impl<T> From<std::sync::PoisonError<T>> for FatError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        FatError::LockPoisoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FatError::from(PathError::NotFound("a/b".to_string()));
        assert_eq!(err.to_string(), "Path not found: a/b");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: FatError = io_err.into();
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_space_error_display() {
        let err = FatError::from(SpaceError::NotEnoughClusters { needed: 3, available: 2 });
        assert!(err.to_string().contains("need 3 clusters, 2 free"));
    }

    #[test]
    fn test_only_corruption_is_fatal() {
        assert!(FatError::CorruptionFatal { cluster: 0 }.is_fatal());
        assert!(!FatError::image_format("short header").is_fatal());
        assert!(!FatError::from(PathError::RootNotRemovable).is_fatal());
        assert!(!FatError::IoWrite("tables".into()).is_fatal());
    }
}
