//! Byte-Blob Backends
//!
//! Named-item storage the update store is built on. One trait, several
//! platform variants picked by configuration:
//! - `file` - one file per item under a storage root
//! - `nvs` - flash key/value area with A/B banks
//! - `stub` - reports every operation as not implemented

pub mod file;
pub mod flash;
pub mod nvs;
pub mod stub;

use std::fs::File;
use std::io;
use std::path::Path;

use super::config::{BackendKind, StoreConfig};
use super::error::{Result, StoreError};

pub use file::FileBackend;
pub use flash::{FlashDevice, ImageFlash, RamFlash};
pub use nvs::NvsBackend;
pub use stub::NoopBackend;

/// Per-item byte storage.
///
/// `read` must return `StoreError::NotFound` for an absent or empty item so
/// callers can tell absence from failure. `delete` on an absent item also
/// reports `NotFound`.
pub trait BlobBackend {
    fn write(&mut self, name: &str, data: &[u8]) -> Result<()>;
    fn read(&mut self, name: &str) -> Result<Vec<u8>>;
    fn delete(&mut self, name: &str) -> Result<()>;
}

impl<B: BlobBackend + ?Sized> BlobBackend for Box<B> {
    fn write(&mut self, name: &str, data: &[u8]) -> Result<()> {
        (**self).write(name, data)
    }

    fn read(&mut self, name: &str) -> Result<Vec<u8>> {
        (**self).read(name)
    }

    fn delete(&mut self, name: &str) -> Result<()> {
        (**self).delete(name)
    }
}

/// Flush directory metadata so a rename or unlink inside `dir` survives
/// power loss.
#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

/// Open the backend named by `config`, rooted at `config.storage_root`.
pub fn open_backend(config: &StoreConfig) -> Result<Box<dyn BlobBackend>> {
    config
        .validate()
        .map_err(|e| StoreError::InvalidInput(e.to_string()))?;
    let root: &Path = &config.storage_root;
    match config.backend {
        BackendKind::File => Ok(Box::new(FileBackend::open(root)?)),
        BackendKind::Nvs => {
            std::fs::create_dir_all(root)?;
            let image = root.join(&config.nvs.image);
            let flash = ImageFlash::open(&image, config.nvs.sector_size, config.nvs.sector_count)?;
            Ok(Box::new(NvsBackend::mount(flash)?))
        }
        BackendKind::Stub => Ok(Box::new(NoopBackend)),
    }
}
