//! Persisted Record Types
//!
//! The logical records the update store keeps across reboots.

use serde::{Deserialize, Serialize};
use std::collections::btree_map::{self, BTreeMap};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroizing;

/// Phase of the update lifecycle, persisted as a fixed-size value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum UpdateState {
    /// Artifact is being downloaded and written to the inactive slot
    Download = 0,
    /// Artifact written, installation being finalized
    Install = 1,
    /// Restart requested to boot the new artifact
    Reboot = 2,
    /// Booted into the new artifact, waiting for confirmation
    VerifyReboot = 3,
    /// New artifact accepted
    Commit = 4,
    /// Post-update housekeeping
    Cleanup = 5,
    /// Reverting to the previous artifact
    Rollback = 6,
    /// Restart requested to boot the previous artifact
    RollbackReboot = 7,
    /// Booted back into the previous artifact
    RollbackVerifyReboot = 8,
    /// Update failed, reporting the failure
    Failure = 9,
    /// Lifecycle finished
    End = 10,
}

impl UpdateState {
    pub const ALL: [UpdateState; 11] = [
        Self::Download,
        Self::Install,
        Self::Reboot,
        Self::VerifyReboot,
        Self::Commit,
        Self::Cleanup,
        Self::Rollback,
        Self::RollbackReboot,
        Self::RollbackVerifyReboot,
        Self::Failure,
        Self::End,
    ];

    pub fn value(self) -> u32 {
        self as u32
    }

    pub fn from_value(value: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|state| state.value() == value)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Install => "install",
            Self::Reboot => "reboot",
            Self::VerifyReboot => "verify_reboot",
            Self::Commit => "commit",
            Self::Cleanup => "cleanup",
            Self::Rollback => "rollback",
            Self::RollbackReboot => "rollback_reboot",
            Self::RollbackVerifyReboot => "rollback_verify_reboot",
            Self::Failure => "failure",
            Self::End => "end",
        }
    }

    /// Phases persisted right before or right after a restart.
    pub fn spans_reboot(self) -> bool {
        matches!(
            self,
            Self::Reboot | Self::VerifyReboot | Self::RollbackReboot | Self::RollbackVerifyReboot
        )
    }
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdateState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == wanted)
            .ok_or_else(|| format!("unknown update state: {}", s))
    }
}

/// What the device was doing, and with which kind of artifact, at the last
/// checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStateRecord {
    pub state: UpdateState,
    pub artifact_type: String,
}

impl UpdateStateRecord {
    pub fn new(state: UpdateState, artifact_type: impl Into<String>) -> Self {
        Self {
            state,
            artifact_type: artifact_type.into(),
        }
    }
}

/// Device authentication keys. The private half is wiped from memory when
/// the pair is dropped.
#[derive(Clone)]
pub struct AuthenticationKeyPair {
    private_key: Zeroizing<Vec<u8>>,
    public_key: Vec<u8>,
}

impl AuthenticationKeyPair {
    pub fn new(private_key: Vec<u8>, public_key: Vec<u8>) -> Self {
        Self {
            private_key: Zeroizing::new(private_key),
            public_key,
        }
    }

    pub(crate) fn from_parts(private_key: Zeroizing<Vec<u8>>, public_key: Vec<u8>) -> Self {
        Self {
            private_key,
            public_key,
        }
    }

    pub fn private_key(&self) -> &[u8] {
        &self.private_key
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }
}

impl fmt::Debug for AuthenticationKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationKeyPair")
            .field("private_key", &format_args!("<{} bytes>", self.private_key.len()))
            .field("public_key", &format_args!("<{} bytes>", self.public_key.len()))
            .finish()
    }
}

/// Capabilities provided by the installed artifact(s), one value per key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProvidesMap(BTreeMap<String, String>);

impl ProvidesMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pair, returning the value it replaced.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, String> {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ProvidesMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

impl<'a> IntoIterator for &'a ProvidesMap {
    type Item = (&'a String, &'a String);
    type IntoIter = btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
