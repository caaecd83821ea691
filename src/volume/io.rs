//! Storage backends and the shared disk handle
//!
//! Every byte of a volume image goes through [`Disk`]. It owns the backend
//! behind a single mutex: the backend has one cursor, so each seek+read or
//! seek+write pair must run under that lock while the loader threads share
//! the disk.
//!
//! ## Backend Types
//!
//! - `FileBackend`: any `Read + Write + Seek` handle, normally the image file
//! - `MemoryBackend`: a byte vector, for tests and benchmarks

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

use crate::error::{FatError, Result};

use super::header::Layout;

/// Trait for storage backends
///
/// This abstraction allows a volume to live in a file or in memory.
pub trait StorageBackend: Send {
    /// Read bytes from the storage at the given offset
    ///
    /// # Returns
    /// Number of bytes actually read
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Write bytes to the storage at the given offset
    ///
    /// # Returns
    /// Number of bytes actually written
    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<usize>;

    /// Flush any buffered writes to storage
    fn flush(&mut self) -> io::Result<()>;

    /// Get the total size of the storage
    fn size(&mut self) -> io::Result<u64>;
}

/// File-based storage backend for image files
pub struct FileBackend<F> {
    file: F,
}

impl<F> FileBackend<F> {
    /// Creates a new file backend
    pub fn new(file: F) -> Self {
        Self { file }
    }
}

impl<F: Read + Write + Seek + Send> StorageBackend for FileBackend<F> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read(buf)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }

    fn size(&mut self) -> io::Result<u64> {
        self.file.seek(SeekFrom::End(0))
    }
}

/// In-memory storage backend for testing
pub struct MemoryBackend {
    data: Vec<u8>,
}

impl MemoryBackend {
    /// Creates a new zero-filled memory backend with the given size
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0u8; size],
        }
    }

    /// Creates a memory backend from existing data
    pub fn from_data(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Returns the underlying data
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

impl StorageBackend for MemoryBackend {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let offset = offset as usize;
        if offset >= self.data.len() {
            return Ok(0);
        }
        let available = self.data.len() - offset;
        let to_read = buf.len().min(available);
        buf[..to_read].copy_from_slice(&self.data[offset..offset + to_read]);
        Ok(to_read)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<usize> {
        let offset = offset as usize;
        if offset >= self.data.len() {
            return Ok(0);
        }
        let available = self.data.len() - offset;
        let to_write = data.len().min(available);
        self.data[offset..offset + to_write].copy_from_slice(&data[..to_write]);
        Ok(to_write)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn size(&mut self) -> io::Result<u64> {
        Ok(self.data.len() as u64)
    }
}

/// Shared handle to the volume image.
///
/// The mutex around the backend is the disk-cursor lock: it is held for
/// exactly one positioned transfer at a time.
pub struct Disk {
    backend: Mutex<Box<dyn StorageBackend>>,
}

impl Disk {
    /// Wraps a backend.
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self {
            backend: Mutex::new(backend),
        }
    }

    /// Reads until `buf` is full or the backend runs dry.
    ///
    /// # Returns
    /// Number of bytes read; less than `buf.len()` means the image is short.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut backend = self.backend.lock()?;
        let mut filled = 0;
        while filled < buf.len() {
            match backend.read_at(offset + filled as u64, &mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }

    /// Writes all of `data` or reports how much made it.
    ///
    /// # Returns
    /// Number of bytes written; less than `data.len()` is a short write.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<usize> {
        let mut backend = self.backend.lock()?;
        let mut written = 0;
        while written < data.len() {
            match backend.write_at(offset + written as u64, &data[written..]) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(written)
    }

    /// Flushes the backend.
    pub fn flush(&self) -> Result<()> {
        self.backend.lock()?.flush()?;
        Ok(())
    }

    /// Total size of the image in bytes.
    pub fn size(&self) -> Result<u64> {
        Ok(self.backend.lock()?.size()?)
    }

    /// Reads one whole cluster.
    pub fn read_cluster(&self, layout: &Layout, cluster: u32) -> Result<Vec<u8>> {
        let offset = layout.cluster_offset(cluster)?;
        let mut buf = vec![0u8; layout.cluster_size()];
        let read = self.read_at(offset, &mut buf)?;
        if read != buf.len() {
            return Err(FatError::image_format(format!(
                "failed read of cluster {cluster}: got {read} of {} bytes",
                buf.len()
            )));
        }
        Ok(buf)
    }

    /// Writes one whole cluster. `data` shorter than a cluster is zero-padded.
    pub fn write_cluster(&self, layout: &Layout, cluster: u32, data: &[u8]) -> Result<()> {
        let offset = layout.cluster_offset(cluster)?;
        let size = layout.cluster_size();
        if data.len() > size {
            return Err(FatError::IoWrite(format!(
                "{} bytes do not fit in a {size}-byte cluster",
                data.len()
            )));
        }

        let padded;
        let bytes = if data.len() == size {
            data
        } else {
            let mut buf = vec![0u8; size];
            buf[..data.len()].copy_from_slice(data);
            padded = buf;
            &padded
        };

        let written = self.write_at(offset, bytes)?;
        if written != size {
            return Err(FatError::IoWrite(format!(
                "cluster {cluster}: wrote {written} of {size} bytes"
            )));
        }
        Ok(())
    }

    /// Fills a cluster with zeros.
    pub fn zero_cluster(&self, layout: &Layout, cluster: u32) -> Result<()> {
        self.write_cluster(layout, cluster, &[])
    }

    /// Copies `from` into `to`, then zeroes `from`.
    pub fn move_cluster(&self, layout: &Layout, from: u32, to: u32) -> Result<()> {
        let data = self.read_cluster(layout, from)?;
        self.write_cluster(layout, to, &data)?;
        self.zero_cluster(layout, from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::header::BootRecord;
    use std::io::Cursor;

    fn layout(cluster_size: u16, clusters: u32) -> Layout {
        Layout::from_header(&BootRecord::new("io", 1, cluster_size, clusters)).unwrap()
    }

    #[test]
    fn test_memory_backend_short_read() {
        let mut backend = MemoryBackend::from_data(vec![1, 2, 3, 4]);
        let mut buf = [0u8; 8];
        assert_eq!(backend.read_at(2, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[3, 4]);
        assert_eq!(backend.read_at(10, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_memory_backend_short_write() {
        let mut backend = MemoryBackend::new(4);
        assert_eq!(backend.write_at(3, &[9, 9]).unwrap(), 1);
        assert_eq!(backend.into_data(), vec![0, 0, 0, 9]);
    }

    #[test]
    fn test_file_backend_roundtrip() {
        let mut backend = FileBackend::new(Cursor::new(vec![0u8; 16]));
        backend.write_at(4, b"abcd").unwrap();
        let mut buf = [0u8; 4];
        backend.read_at(4, &mut buf).unwrap();
        assert_eq!(&buf, b"abcd");
        assert_eq!(backend.size().unwrap(), 16);
    }

    #[test]
    fn test_disk_cluster_io() {
        let layout = layout(64, 4);
        let disk = Disk::new(Box::new(MemoryBackend::new(layout.image_size() as usize)));

        disk.write_cluster(&layout, 2, b"hello").unwrap();
        let cluster = disk.read_cluster(&layout, 2).unwrap();
        assert_eq!(cluster.len(), 64);
        assert_eq!(&cluster[..5], b"hello");
        assert!(cluster[5..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_disk_move_cluster() {
        let layout = layout(64, 4);
        let disk = Disk::new(Box::new(MemoryBackend::new(layout.image_size() as usize)));

        disk.write_cluster(&layout, 1, &[7u8; 64]).unwrap();
        disk.move_cluster(&layout, 1, 3).unwrap();

        assert_eq!(disk.read_cluster(&layout, 3).unwrap(), vec![7u8; 64]);
        assert_eq!(disk.read_cluster(&layout, 1).unwrap(), vec![0u8; 64]);
    }

    #[test]
    fn test_truncated_image_read_fails() {
        let layout = layout(64, 4);
        let short = layout.image_size() as usize - 10;
        let disk = Disk::new(Box::new(MemoryBackend::new(short)));

        let result = disk.read_cluster(&layout, 3);
        assert!(matches!(result, Err(FatError::ImageFormat(_))));
    }

    #[test]
    fn test_truncated_image_write_fails() {
        let layout = layout(64, 4);
        let short = layout.image_size() as usize - 10;
        let disk = Disk::new(Box::new(MemoryBackend::new(short)));

        let result = disk.write_cluster(&layout, 3, &[1u8; 64]);
        assert!(matches!(result, Err(FatError::IoWrite(_))));
    }

    #[test]
    fn test_cluster_out_of_range() {
        let layout = layout(64, 4);
        let disk = Disk::new(Box::new(MemoryBackend::new(layout.image_size() as usize)));
        assert!(matches!(disk.read_cluster(&layout, 4), Err(FatError::InvalidCluster(4))));
    }
}
