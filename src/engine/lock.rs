//! Store Mutex
//!
//! The store is not internally synchronized. Callers that share one between
//! tasks serialize access through a `StoreMutex`. Platforms without a
//! scheduler get `NoopMutex`, which reports `NotImplemented` instead of
//! pretending to lock.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use super::error::{Result, StoreError};

/// How long `take` may block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    Forever,
    Timeout(Duration),
}

impl Wait {
    /// Negative values wait forever.
    pub fn from_millis(ms: i64) -> Self {
        if ms < 0 {
            Self::Forever
        } else {
            Self::Timeout(Duration::from_millis(ms as u64))
        }
    }
}

pub trait StoreMutex {
    fn create() -> Result<Self>
    where
        Self: Sized;

    fn take(&self, wait: Wait) -> Result<()>;

    fn give(&self) -> Result<()>;

    fn delete(self) -> Result<()>
    where
        Self: Sized;

    /// Take the mutex and give it back when the guard drops.
    fn lock(&self, wait: Wait) -> Result<MutexGuard<'_, Self>> {
        self.take(wait)?;
        Ok(MutexGuard { mutex: self })
    }
}

/// RAII guard returned by `StoreMutex::lock`
pub struct MutexGuard<'a, M: StoreMutex + ?Sized> {
    mutex: &'a M,
}

impl<M: StoreMutex + ?Sized> Drop for MutexGuard<'_, M> {
    fn drop(&mut self) {
        if let Err(e) = self.mutex.give() {
            tracing::warn!("Failed to release store mutex: {}", e);
        }
    }
}

/// Hosted mutex on `std::sync` primitives. Unlike `std::sync::Mutex` the
/// holder is not tied to a scope, so `take` and `give` may be split.
#[derive(Debug, Default)]
pub struct StdMutex {
    locked: Mutex<bool>,
    released: Condvar,
}

impl StoreMutex for StdMutex {
    fn create() -> Result<Self> {
        Ok(Self::default())
    }

    fn take(&self, wait: Wait) -> Result<()> {
        // the flag stays consistent even if a holder panicked
        let locked = self.locked.lock().unwrap_or_else(PoisonError::into_inner);
        let mut locked = match wait {
            Wait::Forever => self
                .released
                .wait_while(locked, |held| *held)
                .unwrap_or_else(PoisonError::into_inner),
            Wait::Timeout(timeout) => {
                let (locked, result) = self
                    .released
                    .wait_timeout_while(locked, timeout, |held| *held)
                    .unwrap_or_else(PoisonError::into_inner);
                if result.timed_out() && *locked {
                    return Err(StoreError::Timeout);
                }
                locked
            }
        };
        *locked = true;
        Ok(())
    }

    fn give(&self) -> Result<()> {
        let mut locked = self.locked.lock().unwrap_or_else(PoisonError::into_inner);
        if !*locked {
            return Err(StoreError::InvalidInput("mutex is not held".to_string()));
        }
        *locked = false;
        self.released.notify_one();
        Ok(())
    }

    fn delete(self) -> Result<()> {
        let locked = self.locked.into_inner().unwrap_or_else(PoisonError::into_inner);
        if locked {
            return Err(StoreError::InvalidInput("mutex is still held".to_string()));
        }
        Ok(())
    }
}

/// Mutex for single-task platforms.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMutex;

impl StoreMutex for NoopMutex {
    fn create() -> Result<Self> {
        Err(StoreError::NotImplemented("mutex create"))
    }

    fn take(&self, _wait: Wait) -> Result<()> {
        Err(StoreError::NotImplemented("mutex take"))
    }

    fn give(&self) -> Result<()> {
        Err(StoreError::NotImplemented("mutex give"))
    }

    fn delete(self) -> Result<()> {
        Err(StoreError::NotImplemented("mutex delete"))
    }
}
