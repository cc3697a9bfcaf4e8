//! File Backend
//!
//! One file per item under a storage root. Writes go to a temporary sibling
//! which is synced and then renamed over the target, so a power cut leaves
//! either the old content or the new one.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use super::{sync_dir, BlobBackend};
use crate::engine::error::{Result, StoreError};

const TEMP_SUFFIX: &str = ".tmp";

pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    /// Open (creating if needed) a backend rooted at `root`.
    ///
    /// Temporary files left behind by an interrupted write are removed.
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;

        for entry in fs::read_dir(root)? {
            let path = entry?.path();
            let is_temp = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.ends_with(TEMP_SUFFIX));
            if is_temp && path.is_file() {
                tracing::debug!("Removing interrupted write {}", path.display());
                fs::remove_file(&path)?;
            }
        }

        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn item_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty()
            || name.contains(['/', '\\'])
            || name == "."
            || name == ".."
            || name.ends_with(TEMP_SUFFIX)
        {
            return Err(StoreError::UnknownItem(name.to_string()));
        }
        Ok(self.root.join(name))
    }
}

impl BlobBackend for FileBackend {
    fn write(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let path = self.item_path(name)?;
        let temp_path = self.root.join(format!("{}{}", name, TEMP_SUFFIX));

        let result = (|| -> io::Result<()> {
            let mut file = File::create(&temp_path)?;
            file.write_all(data)?;
            file.sync_all()?;
            fs::rename(&temp_path, &path)?;
            sync_dir(&self.root)
        })();

        if let Err(e) = result {
            tracing::error!("Unable to write {}: {}", path.display(), e);
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        Ok(())
    }

    fn read(&mut self, name: &str) -> Result<Vec<u8>> {
        let path = self.item_path(name)?;
        match fs::read(&path) {
            Ok(data) if data.is_empty() => {
                tracing::info!("File {} is empty", path.display());
                Err(StoreError::NotFound(name.to_string()))
            }
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(name.to_string()))
            }
            Err(e) => {
                tracing::error!("Unable to read {}: {}", path.display(), e);
                Err(e.into())
            }
        }
    }

    fn delete(&mut self, name: &str) -> Result<()> {
        let path = self.item_path(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(sync_dir(&self.root)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_replaces_content() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(dir.path()).unwrap();

        backend.write("deployment-data.json", b"{\"id\":\"long-deployment\"}").unwrap();
        backend.write("deployment-data.json", b"{}").unwrap();

        assert_eq!(backend.read("deployment-data.json").unwrap(), b"{}");
        assert!(!dir.path().join("deployment-data.json.tmp").exists());
    }

    #[test]
    fn test_write_lands_in_root_directory() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("ota");
        let mut backend = FileBackend::open(&root).unwrap();

        backend.write("um_state.dat", b"\x02\x00\x00\x00app").unwrap();
        let names: Vec<_> = fs::read_dir(&root)
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("um_state.dat")]);

        backend.delete("um_state.dat").unwrap();
        assert_eq!(fs::read_dir(&root).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_and_empty_are_not_found() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(dir.path()).unwrap();

        assert!(backend.read("key.der").unwrap_err().is_not_found());

        fs::write(dir.path().join("key.der"), b"").unwrap();
        assert!(backend.read("key.der").unwrap_err().is_not_found());
    }

    #[test]
    fn test_delete_absent_reports_not_found() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(dir.path()).unwrap();

        assert!(backend.delete("provides.txt").unwrap_err().is_not_found());
        backend.write("provides.txt", b"a=b").unwrap();
        backend.delete("provides.txt").unwrap();
        assert!(!dir.path().join("provides.txt").exists());
    }

    #[test]
    fn test_open_removes_stale_temp_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("um_state.dat.tmp"), b"torn").unwrap();
        fs::write(dir.path().join("um_state.dat"), b"kept").unwrap();

        let mut backend = FileBackend::open(dir.path()).unwrap();
        assert!(!dir.path().join("um_state.dat.tmp").exists());
        assert_eq!(backend.read("um_state.dat").unwrap(), b"kept");
    }

    #[test]
    fn test_rejects_path_like_names() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(dir.path()).unwrap();

        assert!(matches!(
            backend.write("../escape", b"x"),
            Err(StoreError::UnknownItem(_))
        ));
        assert!(matches!(
            backend.read("key.der.tmp"),
            Err(StoreError::UnknownItem(_))
        ));
    }
}
