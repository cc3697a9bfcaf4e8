//! Flash Devices
//!
//! Minimal sector-erase flash abstraction for the NVS backend. Programming
//! can only clear bits, so a region must be erased (all `0xFF`) before it is
//! written with new content.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::sync_dir;

/// Value of an erased flash byte
pub const ERASED: u8 = 0xFF;

pub trait FlashDevice {
    fn sector_size(&self) -> usize;

    fn sector_count(&self) -> usize;

    fn capacity(&self) -> usize {
        self.sector_size() * self.sector_count()
    }

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> io::Result<()>;

    /// Program `data` at `offset`. Bits already cleared stay cleared.
    fn write(&mut self, offset: usize, data: &[u8]) -> io::Result<()>;

    fn erase_sector(&mut self, sector: usize) -> io::Result<()>;

    /// Erase every sector overlapping `[start, start + len)`.
    fn erase_range(&mut self, start: usize, len: usize) -> io::Result<()> {
        if len == 0 {
            return Ok(());
        }
        let first = start / self.sector_size();
        let last = (start + len - 1) / self.sector_size();
        for sector in first..=last {
            self.erase_sector(sector)?;
        }
        Ok(())
    }
}

/// Total size of `sector_count` sectors, rejecting empty or overflowing
/// geometry.
pub fn geometry_capacity(sector_size: usize, sector_count: usize) -> io::Result<usize> {
    if sector_size == 0 || sector_count == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "flash geometry must be non-zero",
        ));
    }
    sector_size.checked_mul(sector_count).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("flash geometry {} x {} overflows", sector_count, sector_size),
        )
    })
}

fn sector_start(sector: usize, sector_size: usize) -> io::Result<usize> {
    sector.checked_mul(sector_size).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("sector {} out of range", sector))
    })
}

fn check_bounds(capacity: usize, offset: usize, len: usize) -> io::Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("flash access {}+{} beyond capacity {}", offset, len, capacity),
        )),
    }
}

/// In-memory flash, used for simulation and tests.
#[derive(Debug, Clone)]
pub struct RamFlash {
    data: Vec<u8>,
    sector_size: usize,
    tear_after: Option<usize>,
}

impl RamFlash {
    pub fn new(sector_size: usize, sector_count: usize) -> io::Result<Self> {
        let capacity = geometry_capacity(sector_size, sector_count)?;
        Ok(Self {
            data: vec![ERASED; capacity],
            sector_size,
            tear_after: None,
        })
    }

    /// Rebuild a device from a previously captured image.
    pub fn from_image(data: Vec<u8>, sector_size: usize) -> Self {
        Self {
            data,
            sector_size,
            tear_after: None,
        }
    }

    pub fn image(&self) -> &[u8] {
        &self.data
    }

    /// Simulate power loss: the next write programs only `keep` bytes and
    /// then fails.
    pub fn tear_next_write(&mut self, keep: usize) {
        self.tear_after = Some(keep);
    }
}

impl FlashDevice for RamFlash {
    fn sector_size(&self) -> usize {
        self.sector_size
    }

    fn sector_count(&self) -> usize {
        self.data.len() / self.sector_size
    }

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> io::Result<()> {
        check_bounds(self.data.len(), offset, buf.len())?;
        buf.copy_from_slice(&self.data[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> io::Result<()> {
        check_bounds(self.data.len(), offset, data.len())?;
        let (programmed, torn) = match self.tear_after.take() {
            Some(keep) if keep < data.len() => (&data[..keep], true),
            _ => (data, false),
        };
        for (dst, src) in self.data[offset..].iter_mut().zip(programmed) {
            *dst &= *src;
        }
        if torn {
            return Err(io::Error::new(io::ErrorKind::Interrupted, "power lost during write"));
        }
        Ok(())
    }

    fn erase_sector(&mut self, sector: usize) -> io::Result<()> {
        let start = sector_start(sector, self.sector_size)?;
        check_bounds(self.data.len(), start, self.sector_size)?;
        self.data[start..start + self.sector_size].fill(ERASED);
        Ok(())
    }
}

/// Flash image kept in a regular file, for hosts without a real partition.
pub struct ImageFlash {
    path: PathBuf,
    file: File,
    sector_size: usize,
    sector_count: usize,
}

impl ImageFlash {
    /// Open the image at `path`, creating an erased one if it does not exist.
    ///
    /// A new image is filled in a temporary sibling and renamed into place.
    /// An image shorter than the geometry is padded with erased bytes, since
    /// the missing tail was never programmed; a longer one is rejected.
    pub fn open(path: &Path, sector_size: usize, sector_count: usize) -> io::Result<Self> {
        let capacity = geometry_capacity(sector_size, sector_count)?;
        if !path.exists() {
            Self::create_erased(path, capacity)?;
        }

        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        if len > capacity as u64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "flash image {} is {} bytes, expected {}",
                    path.display(),
                    len,
                    capacity
                ),
            ));
        }
        if len < capacity as u64 {
            tracing::warn!(
                "Flash image {} is short ({} of {} bytes), padding with erased bytes",
                path.display(),
                len,
                capacity
            );
            file.seek(SeekFrom::Start(len))?;
            file.write_all(&vec![ERASED; capacity - len as usize])?;
            file.sync_all()?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            sector_size,
            sector_count,
        })
    }

    fn create_erased(path: &Path, capacity: usize) -> io::Result<()> {
        tracing::info!("Creating flash image {} ({} bytes)", path.display(), capacity);
        let mut temp_name = path.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);

        let result = (|| -> io::Result<()> {
            let mut file = File::create(&temp_path)?;
            file.write_all(&vec![ERASED; capacity])?;
            file.sync_all()?;
            fs::rename(&temp_path, path)?;
            match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => sync_dir(parent),
                _ => Ok(()),
            }
        })();
        if result.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        result
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FlashDevice for ImageFlash {
    fn sector_size(&self) -> usize {
        self.sector_size
    }

    fn sector_count(&self) -> usize {
        self.sector_count
    }

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> io::Result<()> {
        check_bounds(self.capacity(), offset, buf.len())?;
        self.file.seek(SeekFrom::Start(offset as u64))?;
        self.file.read_exact(buf)
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> io::Result<()> {
        let mut current = vec![0u8; data.len()];
        self.read(offset, &mut current)?;
        for (dst, src) in current.iter_mut().zip(data) {
            *dst &= *src;
        }
        self.file.seek(SeekFrom::Start(offset as u64))?;
        self.file.write_all(&current)?;
        self.file.sync_data()
    }

    fn erase_sector(&mut self, sector: usize) -> io::Result<()> {
        let start = sector_start(sector, self.sector_size)?;
        check_bounds(self.capacity(), start, self.sector_size)?;
        self.file.seek(SeekFrom::Start(start as u64))?;
        self.file.write_all(&vec![ERASED; self.sector_size])?;
        self.file.sync_data()
    }
}
