//! Stub Backend
//!
//! For platforms without persistent storage. Every call reports
//! `NotImplemented` so callers can detect the missing capability instead of
//! mistaking it for an empty store.

use super::BlobBackend;
use crate::engine::error::{Result, StoreError};

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBackend;

impl BlobBackend for NoopBackend {
    fn write(&mut self, _name: &str, _data: &[u8]) -> Result<()> {
        Err(StoreError::NotImplemented("blob write"))
    }

    fn read(&mut self, _name: &str) -> Result<Vec<u8>> {
        Err(StoreError::NotImplemented("blob read"))
    }

    fn delete(&mut self, _name: &str) -> Result<()> {
        Err(StoreError::NotImplemented("blob delete"))
    }
}
