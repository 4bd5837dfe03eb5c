//! Device access broker.
//!
//! A binary semaphore guarding the reader. The asynchronous session path uses
//! [`DeviceBroker::try_acquire`] and fails fast with `DeviceBusy`; the
//! blocking enroll path uses [`DeviceBroker::acquire`] with a bounded wait.
//! The returned [`DeviceToken`] releases on drop, so every exit path of the
//! holder, including a panic unwinding through it, frees the device.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::debug;

use scanbridge_core::{Error, Result, SessionId};

#[derive(Debug, Clone)]
pub struct DeviceBroker {
    permits: Arc<Semaphore>,
    holder: Arc<Mutex<Option<SessionId>>>,
}

impl Default for DeviceBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceBroker {
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(1)),
            holder: Arc::new(Mutex::new(None)),
        }
    }

    /// Take the device without waiting.
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceBusy` if another session holds the device.
    pub fn try_acquire(&self, owner: &SessionId) -> Result<DeviceToken> {
        match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => Ok(self.grant(owner, permit)),
            Err(TryAcquireError::NoPermits) => Err(self.busy()),
            Err(TryAcquireError::Closed) => Err(Error::DeviceBusy("device broker closed".to_string())),
        }
    }

    /// Take the device, waiting at most `wait` for the current holder.
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceBusy` if the device is still held after `wait`.
    pub async fn acquire(&self, owner: &SessionId, wait: Duration) -> Result<DeviceToken> {
        let permits = Arc::clone(&self.permits);
        match tokio::time::timeout(wait, permits.acquire_owned()).await {
            Ok(Ok(permit)) => Ok(self.grant(owner, permit)),
            Ok(Err(_)) => Err(Error::DeviceBusy("device broker closed".to_string())),
            Err(_) => Err(self.busy()),
        }
    }

    /// Session currently holding the device.
    pub fn holder(&self) -> Option<SessionId> {
        lock(&self.holder).clone()
    }

    pub fn is_held(&self) -> bool {
        self.permits.available_permits() == 0
    }

    fn grant(&self, owner: &SessionId, permit: OwnedSemaphorePermit) -> DeviceToken {
        *lock(&self.holder) = Some(owner.clone());
        debug!(session_id = %owner, "device acquired");
        DeviceToken {
            owner: owner.clone(),
            permit: Some(permit),
            holder: Arc::clone(&self.holder),
        }
    }

    fn busy(&self) -> Error {
        match self.holder() {
            Some(holder) => Error::DeviceBusy(format!("device is held by session {holder}")),
            None => Error::DeviceBusy("device is in use".to_string()),
        }
    }
}

fn lock(holder: &Mutex<Option<SessionId>>) -> MutexGuard<'_, Option<SessionId>> {
    holder.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Exclusive right to drive the device.
#[derive(Debug)]
pub struct DeviceToken {
    owner: SessionId,
    permit: Option<OwnedSemaphorePermit>,
    holder: Arc<Mutex<Option<SessionId>>>,
}

impl DeviceToken {
    pub fn owner(&self) -> &SessionId {
        &self.owner
    }

    pub fn is_held(&self) -> bool {
        self.permit.is_some()
    }

    /// Give the device back. Safe to call more than once.
    pub fn release(&mut self) {
        let Some(permit) = self.permit.take() else {
            return;
        };
        {
            let mut holder = lock(&self.holder);
            if holder.as_ref() == Some(&self.owner) {
                *holder = None;
            }
        }
        drop(permit);
        debug!(session_id = %self.owner, "device released");
    }
}

impl Drop for DeviceToken {
    fn drop(&mut self) {
        self.release();
    }
}
