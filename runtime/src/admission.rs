//! Session admission control.
//!
//! A counting semaphore with one permit per session slot. A registration
//! takes a permit before its session is queued, and the permit travels with
//! the session until it terminates; dropping it frees the slot and wakes the
//! oldest waiting registration.

use crate::error::AdmissionError;
use crate::metrics::SessionMetrics;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

/// Bounds the number of sessions that exist at once.
#[derive(Debug, Clone)]
pub struct SessionAdmission {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl SessionAdmission {
    /// Admission control with `capacity` session slots
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Take a slot, waiting until one is free.
    ///
    /// Waiters are served in arrival order.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Closed`] if admission was closed.
    pub async fn acquire(&self) -> Result<AdmissionPermit, AdmissionError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| AdmissionError::Closed)?;
        Ok(AdmissionPermit::new(permit))
    }

    /// Take a slot if one is free right now.
    ///
    /// # Errors
    ///
    /// - [`AdmissionError::Capacity`] if every slot is taken
    /// - [`AdmissionError::Closed`] if admission was closed
    pub fn try_acquire(&self) -> Result<AdmissionPermit, AdmissionError> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => Ok(AdmissionPermit::new(permit)),
            Err(TryAcquireError::NoPermits) => Err(AdmissionError::Capacity { max: self.capacity }),
            Err(TryAcquireError::Closed) => Err(AdmissionError::Closed),
        }
    }

    /// Number of slots currently held
    #[must_use]
    pub fn active(&self) -> usize {
        self.capacity.saturating_sub(self.semaphore.available_permits())
    }

    /// Total number of slots
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Reject every current and future `acquire`
    pub fn close(&self) {
        self.semaphore.close();
    }
}

/// One held session slot. Freed on drop.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionPermit {
    fn new(permit: OwnedSemaphorePermit) -> Self {
        SessionMetrics::record_slot_acquired();
        Self { _permit: permit }
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        SessionMetrics::record_slot_released();
    }
}
