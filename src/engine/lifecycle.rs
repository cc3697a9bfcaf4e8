//! Boot Decision
//!
//! What the update state machine does after a (possibly unexpected) restart,
//! decided from the persisted lifecycle checkpoint.

use serde::Serialize;

use super::backend::BlobBackend;
use super::error::{ErrorKind, Result};
use super::record::UpdateState;
use super::store::UpdateStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BootAction {
    /// No update in progress
    FreshStart,
    /// Continue the lifecycle from `state`
    Resume {
        state: UpdateState,
        artifact_type: String,
    },
    /// Abandon the update and return to the previous artifact
    Rollback { reason: String },
}

impl BootAction {
    pub fn is_rollback(&self) -> bool {
        matches!(self, Self::Rollback { .. })
    }
}

/// Decide how to continue after boot.
///
/// An absent checkpoint means nothing to resume. A checkpoint that cannot be
/// trusted, or one left before the new artifact was ever booted, leads to a
/// rollback. `NotImplemented` is returned to the caller.
pub fn decide_boot_action<B: BlobBackend>(store: &mut UpdateStore<B>) -> Result<BootAction> {
    let record = match store.get_update_state() {
        Ok(record) => record,
        Err(e) => {
            return match e.kind() {
                ErrorKind::NotFound => Ok(BootAction::FreshStart),
                ErrorKind::NotImplemented => Err(e),
                ErrorKind::Failed => {
                    tracing::warn!("Update state unusable, rolling back: {}", e);
                    Ok(BootAction::Rollback {
                        reason: e.to_string(),
                    })
                }
            };
        }
    };

    let action = match record.state {
        UpdateState::Download | UpdateState::Install => BootAction::Rollback {
            reason: format!("update interrupted during {}", record.state),
        },
        _ => BootAction::Resume {
            state: record.state,
            artifact_type: record.artifact_type,
        },
    };
    tracing::info!("Boot decision: {:?}", action);
    Ok(action)
}

/// Drop the records of a finished deployment. The artifact name and provides
/// describe the installed artifact and are kept.
pub fn finish_deployment<B: BlobBackend>(store: &mut UpdateStore<B>) -> Result<()> {
    store.delete_update_state()?;
    store.delete_deployment_data()?;
    tracing::info!("Deployment records cleared");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::backend::{FileBackend, NoopBackend};
    use crate::engine::items;
    use tempfile::tempdir;

    #[test]
    fn test_fresh_start_without_record() {
        let dir = tempdir().unwrap();
        let mut store = UpdateStore::new(FileBackend::open(dir.path()).unwrap());
        assert_eq!(decide_boot_action(&mut store).unwrap(), BootAction::FreshStart);
    }

    #[test]
    fn test_resume_after_reboot_phases() {
        let dir = tempdir().unwrap();
        let mut store = UpdateStore::new(FileBackend::open(dir.path()).unwrap());

        for state in [
            UpdateState::Reboot,
            UpdateState::VerifyReboot,
            UpdateState::Commit,
            UpdateState::Cleanup,
            UpdateState::Rollback,
            UpdateState::RollbackReboot,
            UpdateState::RollbackVerifyReboot,
            UpdateState::Failure,
            UpdateState::End,
        ] {
            store.save_update_state(state, "rootfs-image").unwrap();
            assert_eq!(
                decide_boot_action(&mut store).unwrap(),
                BootAction::Resume {
                    state,
                    artifact_type: "rootfs-image".to_string(),
                }
            );
        }
    }

    #[test]
    fn test_interrupted_install_rolls_back() {
        let dir = tempdir().unwrap();
        let mut store = UpdateStore::new(FileBackend::open(dir.path()).unwrap());

        store.save_update_state(UpdateState::Download, "rootfs-image").unwrap();
        assert!(decide_boot_action(&mut store).unwrap().is_rollback());

        store.save_update_state(UpdateState::Install, "rootfs-image").unwrap();
        assert!(decide_boot_action(&mut store).unwrap().is_rollback());
    }

    #[test]
    fn test_corrupt_record_rolls_back() {
        let dir = tempdir().unwrap();
        let mut store = UpdateStore::new(FileBackend::open(dir.path()).unwrap());
        std::fs::write(dir.path().join(items::UPDATE_STATE), [2u8, 0]).unwrap();

        assert!(decide_boot_action(&mut store).unwrap().is_rollback());
    }

    #[test]
    fn test_not_implemented_propagates() {
        let mut store = UpdateStore::new(NoopBackend);
        assert_eq!(
            decide_boot_action(&mut store).unwrap_err().kind(),
            ErrorKind::NotImplemented
        );
    }

    #[test]
    fn test_finish_deployment_keeps_artifact_name() {
        let dir = tempdir().unwrap();
        let mut store = UpdateStore::new(FileBackend::open(dir.path()).unwrap());
        store.set_deployment_data(br#"{"id":"d-1"}"#).unwrap();
        store.save_update_state(UpdateState::End, "rootfs-image").unwrap();
        store.set_artifact_name("release-2").unwrap();

        finish_deployment(&mut store).unwrap();
        finish_deployment(&mut store).unwrap();

        assert_eq!(decide_boot_action(&mut store).unwrap(), BootAction::FreshStart);
        assert!(store.get_deployment_data().unwrap_err().is_not_found());
        assert_eq!(store.get_artifact_name().unwrap(), "release-2");
    }
}
