//! Persistent Update-State Store
//!
//! The durable record the update state machine reads on boot: authentication
//! keys, pending deployment, lifecycle checkpoint, provides and the installed
//! artifact name.
//!
//! Every getter distinguishes "absent" (`StoreError::NotFound`, nothing to
//! resume) from "present but unusable" (any other error, do not trust it).
//! The store never retries; the caller owns retry policy. It is not
//! internally synchronized, see `engine::lock` for serializing access.

use zeroize::Zeroizing;

use super::backend::{open_backend, BlobBackend};
use super::codec;
use super::config::{DuplicatePolicy, RecordFormat, StoreConfig};
use super::error::{Result, StoreError};
use super::items;
use super::record::{AuthenticationKeyPair, ProvidesMap, UpdateState, UpdateStateRecord};

/// Artifact name reported when none was ever stored
pub const DEFAULT_ARTIFACT_NAME: &str = "unknown";

pub struct UpdateStore<B: BlobBackend = Box<dyn BlobBackend>> {
    backend: B,
    record_format: RecordFormat,
    provides_duplicates: DuplicatePolicy,
}

impl UpdateStore<Box<dyn BlobBackend>> {
    /// Open the store described by `config`.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let backend = open_backend(config)?;
        tracing::debug!(
            "Opened {:?} store at {}",
            config.backend,
            config.storage_root.display()
        );
        Ok(Self::new(backend)
            .with_record_format(config.record_format)
            .with_duplicate_policy(config.provides_duplicates))
    }
}

impl<B: BlobBackend> UpdateStore<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            record_format: RecordFormat::default(),
            provides_duplicates: DuplicatePolicy::default(),
        }
    }

    pub fn with_record_format(mut self, format: RecordFormat) -> Self {
        self.record_format = format;
        self
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.provides_duplicates = policy;
        self
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    // ========== Authentication keys ==========

    /// Store both halves of the key pair.
    ///
    /// The private key is written first. If the public key write then fails
    /// the private key is left in place; treat any error as "keys in unknown
    /// state" and retry the whole call.
    pub fn set_authentication_keys(&mut self, private_key: &[u8], public_key: &[u8]) -> Result<()> {
        if private_key.is_empty() || public_key.is_empty() {
            return Err(StoreError::InvalidInput(
                "authentication keys must not be empty".to_string(),
            ));
        }
        self.write_item(items::PRIVATE_KEY, private_key)?;
        self.write_item(items::PUBLIC_KEY, public_key)
    }

    /// Load the key pair. A lone private key is reported as `NotFound` and
    /// its buffer is wiped before returning.
    pub fn get_authentication_keys(&mut self) -> Result<AuthenticationKeyPair> {
        let private_key = match self.backend.read(items::PRIVATE_KEY) {
            Ok(data) => Zeroizing::new(data),
            Err(e) => {
                if e.is_not_found() {
                    tracing::info!("Private key not available");
                } else {
                    tracing::error!("Unable to read private key: {}", e);
                }
                return Err(e);
            }
        };

        match self.backend.read(items::PUBLIC_KEY) {
            Ok(public_key) => Ok(AuthenticationKeyPair::from_parts(private_key, public_key)),
            Err(e) => {
                if e.is_not_found() {
                    tracing::info!("Public key not available");
                } else {
                    tracing::error!("Unable to read public key: {}", e);
                }
                drop(private_key);
                Err(e)
            }
        }
    }

    /// Remove both keys. Both deletions are attempted; if either fails the
    /// authentication state is indeterminate and the device should be
    /// re-provisioned.
    pub fn delete_authentication_keys(&mut self) -> Result<()> {
        let private = self.delete_item(items::PRIVATE_KEY);
        let public = self.delete_item(items::PUBLIC_KEY);
        if private.is_err() || public.is_err() {
            tracing::error!("Unable to erase authentication keys");
        }
        private.and(public)
    }

    // ========== Deployment data ==========

    pub fn set_deployment_data(&mut self, deployment_data: &[u8]) -> Result<()> {
        if deployment_data.is_empty() {
            return Err(StoreError::InvalidInput("deployment data is empty".to_string()));
        }
        self.write_item(items::DEPLOYMENT_DATA, deployment_data)
    }

    pub fn get_deployment_data(&mut self) -> Result<Vec<u8>> {
        self.read_item(items::DEPLOYMENT_DATA, "Deployment data")
    }

    pub fn delete_deployment_data(&mut self) -> Result<()> {
        self.delete_item(items::DEPLOYMENT_DATA)
    }

    // ========== Update state ==========

    /// Checkpoint the lifecycle phase and artifact type as one record.
    pub fn save_update_state(&mut self, state: UpdateState, artifact_type: &str) -> Result<()> {
        let record = UpdateStateRecord::new(state, artifact_type);
        let bytes = codec::encode_update_state(&record, self.record_format)?;
        self.write_item(items::UPDATE_STATE, &bytes)?;
        tracing::debug!("Saved update state {} ({})", state, artifact_type);
        Ok(())
    }

    /// Read the last checkpoint. A record that cannot be fully decoded is
    /// logged and reported as corrupt; it is left on storage untouched.
    pub fn get_update_state(&mut self) -> Result<UpdateStateRecord> {
        let bytes = match self.backend.read(items::UPDATE_STATE) {
            Ok(bytes) => bytes,
            Err(e) => {
                if e.is_not_found() {
                    tracing::debug!("No update state");
                } else {
                    tracing::error!("Unable to read update state: {}", e);
                }
                return Err(e);
            }
        };

        codec::decode_update_state(&bytes).map_err(|e| {
            tracing::error!("Incomplete or invalid update state, ignoring: {}", e);
            e
        })
    }

    pub fn delete_update_state(&mut self) -> Result<()> {
        self.delete_item(items::UPDATE_STATE)
    }

    // ========== Provides ==========

    pub fn set_provides(&mut self, provides: &ProvidesMap) -> Result<()> {
        let text = codec::encode_provides(provides)?;
        if text.is_empty() {
            // An empty item reads back as absent
            return self.delete_provides();
        }
        self.write_item(items::PROVIDES, text.as_bytes())
    }

    pub fn get_provides(&mut self) -> Result<ProvidesMap> {
        let bytes = self.read_item(items::PROVIDES, "Provides")?;
        let policy = self.provides_duplicates;
        String::from_utf8(bytes)
            .map_err(|_| StoreError::Codec("provides is not UTF-8".to_string()))
            .and_then(|text| codec::decode_provides(text.trim_end_matches('\0'), policy))
            .map_err(|e| {
                tracing::error!("Unable to parse provides: {}", e);
                e
            })
    }

    pub fn delete_provides(&mut self) -> Result<()> {
        self.delete_item(items::PROVIDES)
    }

    // ========== Artifact name ==========

    pub fn set_artifact_name(&mut self, artifact_name: &str) -> Result<()> {
        if artifact_name.is_empty() {
            return Err(StoreError::InvalidInput("artifact name is empty".to_string()));
        }
        self.write_item(items::ARTIFACT_NAME, artifact_name.as_bytes())
    }

    /// Name of the installed artifact, `"unknown"` if none was ever set.
    pub fn get_artifact_name(&mut self) -> Result<String> {
        match self.backend.read(items::ARTIFACT_NAME) {
            Ok(bytes) => {
                let name = String::from_utf8(bytes)
                    .map_err(|_| StoreError::Codec("artifact name is not UTF-8".to_string()))?;
                // Tolerate a stored NUL terminator
                Ok(name.trim_end_matches('\0').to_string())
            }
            Err(e) if e.is_not_found() => Ok(DEFAULT_ARTIFACT_NAME.to_string()),
            Err(e) => {
                tracing::error!("Unable to read artifact name: {}", e);
                Err(e)
            }
        }
    }

    // ========== Helpers ==========

    fn write_item(&mut self, name: &str, data: &[u8]) -> Result<()> {
        self.backend.write(name, data).map_err(|e| {
            tracing::error!("Unable to write {}: {}", name, e);
            e
        })
    }

    fn read_item(&mut self, name: &str, what: &str) -> Result<Vec<u8>> {
        self.backend.read(name).map_err(|e| {
            if e.is_not_found() {
                tracing::info!("{} not available", what);
            } else {
                tracing::error!("Unable to read {}: {}", name, e);
            }
            e
        })
    }

    /// Delete an item; an item that is already absent counts as deleted.
    fn delete_item(&mut self, name: &str) -> Result<()> {
        match self.backend.delete(name) {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                tracing::debug!("{} already absent", name);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Unable to delete {}: {}", name, e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::backend::{FileBackend, NoopBackend, NvsBackend, RamFlash};
    use crate::engine::error::ErrorKind;
    use std::collections::{HashMap, HashSet};
    use std::fs;
    use std::io;
    use tempfile::tempdir;

    /// In-memory backend that fails operations on chosen items.
    #[derive(Default)]
    struct FaultyBackend {
        items: HashMap<String, Vec<u8>>,
        fail_writes: HashSet<&'static str>,
        fail_reads: HashSet<&'static str>,
        fail_deletes: HashSet<&'static str>,
    }

    fn io_error() -> StoreError {
        StoreError::Io(io::Error::new(io::ErrorKind::Other, "injected"))
    }

    impl BlobBackend for FaultyBackend {
        fn write(&mut self, name: &str, data: &[u8]) -> Result<()> {
            if self.fail_writes.contains(name) {
                return Err(io_error());
            }
            self.items.insert(name.to_string(), data.to_vec());
            Ok(())
        }

        fn read(&mut self, name: &str) -> Result<Vec<u8>> {
            if self.fail_reads.contains(name) {
                return Err(io_error());
            }
            match self.items.get(name) {
                Some(data) if !data.is_empty() => Ok(data.clone()),
                _ => Err(StoreError::NotFound(name.to_string())),
            }
        }

        fn delete(&mut self, name: &str) -> Result<()> {
            if self.fail_deletes.contains(name) {
                return Err(io_error());
            }
            self.items
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| StoreError::NotFound(name.to_string()))
        }
    }

    fn file_store(dir: &std::path::Path) -> UpdateStore<FileBackend> {
        UpdateStore::new(FileBackend::open(dir).unwrap())
    }

    #[test]
    fn test_everything_absent_on_first_boot() {
        let dir = tempdir().unwrap();
        let mut store = file_store(dir.path());

        assert!(store.get_authentication_keys().unwrap_err().is_not_found());
        assert!(store.get_deployment_data().unwrap_err().is_not_found());
        assert!(store.get_update_state().unwrap_err().is_not_found());
        assert!(store.get_provides().unwrap_err().is_not_found());
        assert_eq!(store.get_artifact_name().unwrap(), DEFAULT_ARTIFACT_NAME);
    }

    #[test]
    fn test_update_state_roundtrip_all_phases() {
        let dir = tempdir().unwrap();
        for format in [RecordFormat::Plain, RecordFormat::Checked] {
            let mut store = file_store(dir.path()).with_record_format(format);
            for state in UpdateState::ALL {
                for artifact_type in ["", "rootfs-image", "zephyr-image"] {
                    store.save_update_state(state, artifact_type).unwrap();
                    let record = store.get_update_state().unwrap();
                    assert_eq!(record, UpdateStateRecord::new(state, artifact_type));
                }
            }
        }
    }

    #[test]
    fn test_update_state_written_in_plain_layout() {
        let dir = tempdir().unwrap();
        let mut store = file_store(dir.path()).with_record_format(RecordFormat::Plain);
        store.save_update_state(UpdateState::Reboot, "rootfs-image").unwrap();

        let raw = fs::read(dir.path().join(items::UPDATE_STATE)).unwrap();
        assert_eq!(&raw[..4], &2u32.to_le_bytes());
        assert_eq!(&raw[4..], b"rootfs-image");
    }

    #[test]
    fn test_truncated_update_state_is_failed() {
        let dir = tempdir().unwrap();
        let mut store = file_store(dir.path());

        fs::write(dir.path().join(items::UPDATE_STATE), [3u8, 0]).unwrap();
        let err = store.get_update_state().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Failed);

        // Corrupt record stays on storage, only the read is refused
        assert!(dir.path().join(items::UPDATE_STATE).exists());
    }

    #[test]
    fn test_empty_update_state_is_not_found() {
        let dir = tempdir().unwrap();
        let mut store = file_store(dir.path());
        fs::write(dir.path().join(items::UPDATE_STATE), b"").unwrap();
        assert!(store.get_update_state().unwrap_err().is_not_found());
    }

    #[test]
    fn test_large_artifact_type_roundtrip() {
        let nvs = NvsBackend::mount(RamFlash::new(1024, 2).unwrap()).unwrap();
        let capacity = nvs.payload_capacity();
        // Leave room for the entry header and the state envelope
        let artifact_type = "t".repeat(capacity - 6 - 16 - 4);

        let mut store = UpdateStore::new(nvs);
        store.save_update_state(UpdateState::Install, &artifact_type).unwrap();
        let record = store.get_update_state().unwrap();
        assert_eq!(record.artifact_type.len(), artifact_type.len());
        assert_eq!(record.artifact_type, artifact_type);

        // One byte more no longer fits, and the previous record survives
        let too_long = format!("{}t", artifact_type);
        let err = store.save_update_state(UpdateState::Install, &too_long).unwrap_err();
        assert!(matches!(err, StoreError::StorageFull { .. }));
        assert_eq!(store.get_update_state().unwrap().artifact_type, artifact_type);
    }

    #[test]
    fn test_keys_roundtrip_and_delete() {
        let dir = tempdir().unwrap();
        let mut store = file_store(dir.path());

        store.set_authentication_keys(b"private-der", b"public-der").unwrap();
        let keys = store.get_authentication_keys().unwrap();
        assert_eq!(keys.private_key(), b"private-der");
        assert_eq!(keys.public_key(), b"public-der");

        store.delete_authentication_keys().unwrap();
        assert!(store.get_authentication_keys().unwrap_err().is_not_found());
        // Deleting again is tolerated
        store.delete_authentication_keys().unwrap();
    }

    #[test]
    fn test_lone_private_key_is_not_found() {
        let dir = tempdir().unwrap();
        let mut store = file_store(dir.path());

        store.set_authentication_keys(b"private-der", b"public-der").unwrap();
        fs::remove_file(dir.path().join(items::PUBLIC_KEY)).unwrap();

        let err = store.get_authentication_keys().unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_public_key_read_failure_is_failed() {
        let mut backend = FaultyBackend::default();
        backend.fail_reads.insert(items::PUBLIC_KEY);
        let mut store = UpdateStore::new(backend);

        store.set_authentication_keys(b"private-der", b"public-der").unwrap();
        assert_eq!(store.get_authentication_keys().unwrap_err().kind(), ErrorKind::Failed);
    }

    #[test]
    fn test_set_keys_partial_failure() {
        let mut backend = FaultyBackend::default();
        backend.fail_writes.insert(items::PUBLIC_KEY);
        let mut store = UpdateStore::new(backend);

        let err = store.set_authentication_keys(b"private-der", b"public-der").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Failed);
        // No rollback of the first write, and no half pair is ever returned
        assert!(store.backend_mut().items.contains_key(items::PRIVATE_KEY));
        assert!(store.get_authentication_keys().unwrap_err().is_not_found());
    }

    #[test]
    fn test_set_keys_rejects_empty() {
        let dir = tempdir().unwrap();
        let mut store = file_store(dir.path());
        assert!(store.set_authentication_keys(b"", b"public").is_err());
        assert!(store.set_authentication_keys(b"private", b"").is_err());
    }

    #[test]
    fn test_delete_keys_partial_failure() {
        let mut backend = FaultyBackend::default();
        backend.fail_deletes.insert(items::PRIVATE_KEY);
        let mut store = UpdateStore::new(backend);
        store.set_authentication_keys(b"private-der", b"public-der").unwrap();

        let err = store.delete_authentication_keys().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Failed);
        // The public key was still removed and is not restored
        assert!(!store.backend_mut().items.contains_key(items::PUBLIC_KEY));
    }

    #[test]
    fn test_deployment_data_delete_then_get() {
        let dir = tempdir().unwrap();
        let mut store = file_store(dir.path());
        let deployment = br#"{"id":"3f1c","artifact_name":"release-2","types":["rootfs-image"]}"#;

        store.set_deployment_data(deployment).unwrap();
        assert_eq!(store.get_deployment_data().unwrap(), deployment.to_vec());

        store.delete_deployment_data().unwrap();
        assert!(store.get_deployment_data().unwrap_err().is_not_found());
        store.delete_deployment_data().unwrap();
    }

    #[test]
    fn test_deployment_data_io_failure() {
        let mut backend = FaultyBackend::default();
        backend.fail_reads.insert(items::DEPLOYMENT_DATA);
        backend.fail_deletes.insert(items::DEPLOYMENT_DATA);
        let mut store = UpdateStore::new(backend);

        assert_eq!(store.get_deployment_data().unwrap_err().kind(), ErrorKind::Failed);
        assert_eq!(store.delete_deployment_data().unwrap_err().kind(), ErrorKind::Failed);
    }

    #[test]
    fn test_provides_roundtrip_and_policies() {
        let dir = tempdir().unwrap();
        let mut store = file_store(dir.path());
        let provides: ProvidesMap = [
            ("rootfs-image.version", "2.1.0"),
            ("rootfs-image.checksum", "9f86d081"),
        ]
        .into_iter()
        .collect();

        store.set_provides(&provides).unwrap();
        assert_eq!(store.get_provides().unwrap(), provides);

        fs::write(dir.path().join(items::PROVIDES), "k=1\nk=2").unwrap();
        assert_eq!(store.get_provides().unwrap().get("k"), Some("2"));

        let mut store = store.with_duplicate_policy(DuplicatePolicy::Reject);
        assert_eq!(store.get_provides().unwrap_err().kind(), ErrorKind::Failed);

        store.delete_provides().unwrap();
        assert!(store.get_provides().unwrap_err().is_not_found());
    }

    #[test]
    fn test_non_utf8_provides_is_failed() {
        let dir = tempdir().unwrap();
        let mut store = file_store(dir.path());
        fs::write(dir.path().join(items::PROVIDES), [b'k', b'=', 0xC3, 0x28]).unwrap();

        let err = store.get_provides().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Failed);
        assert!(matches!(err, StoreError::Codec(_)));
    }

    #[test]
    fn test_empty_provides_is_stored_as_absent() {
        let dir = tempdir().unwrap();
        let mut store = file_store(dir.path());
        store.set_provides(&ProvidesMap::new()).unwrap();
        assert!(store.get_provides().unwrap_err().is_not_found());
    }

    #[test]
    fn test_artifact_name() {
        let dir = tempdir().unwrap();
        let mut store = file_store(dir.path());

        store.set_artifact_name("release-2").unwrap();
        assert_eq!(store.get_artifact_name().unwrap(), "release-2");

        fs::write(dir.path().join(items::ARTIFACT_NAME), b"release-3\0").unwrap();
        assert_eq!(store.get_artifact_name().unwrap(), "release-3");

        assert!(store.set_artifact_name("").is_err());
    }

    #[test]
    fn test_artifact_name_read_failure_propagates() {
        let mut backend = FaultyBackend::default();
        backend.fail_reads.insert(items::ARTIFACT_NAME);
        let mut store = UpdateStore::new(backend);
        assert_eq!(store.get_artifact_name().unwrap_err().kind(), ErrorKind::Failed);
    }

    #[test]
    fn test_stub_backend_reports_not_implemented() {
        let mut store = UpdateStore::new(NoopBackend);
        assert_eq!(
            store.get_update_state().unwrap_err().kind(),
            ErrorKind::NotImplemented
        );
        assert_eq!(
            store.get_artifact_name().unwrap_err().kind(),
            ErrorKind::NotImplemented
        );
        assert_eq!(
            store.delete_deployment_data().unwrap_err().kind(),
            ErrorKind::NotImplemented
        );
    }
}
