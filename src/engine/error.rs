//! Store Error Types

use std::io;
use thiserror::Error;

/// Coarse classification the update state machine acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Item absent or empty, expected on first use
    NotFound,
    /// I/O error, corrupt record, codec error: do not trust the record
    Failed,
    /// Capability absent on this platform
    NotImplemented,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Corrupt record {item}: {reason}")]
    Corrupt { item: String, reason: String },

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage full: {needed} bytes needed, {available} available")]
    StorageFull { needed: usize, available: usize },

    #[error("Unknown item: {0}")]
    UnknownItem(String),

    #[error("Timed out waiting for lock")]
    Timeout,

    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::NotImplemented(_) => ErrorKind::NotImplemented,
            _ => ErrorKind::Failed,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub(crate) fn corrupt(item: &str, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            item: item.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
