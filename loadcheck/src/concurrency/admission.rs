use std::sync::Arc;

use metrics::gauge;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{ErrorKind, LoadCheckResult};
use crate::loadcheck_error;
use crate::metrics::LOADCHECK_ADMISSION_IN_FLIGHT;

/// Process wide limit on row submissions in flight, shared by every load driver.
///
/// A permit is held by the insert callback of a row and returned when that callback finishes,
/// or when the backend drops the callback of a rejected call.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Waits for a free permit.
    pub async fn acquire(&self) -> LoadCheckResult<AdmissionPermit> {
        let permit = self.semaphore.clone().acquire_owned().await.map_err(|err| {
            loadcheck_error!(
                ErrorKind::AdmissionGateClosed,
                "Admission gate was closed",
                source: err
            )
        })?;

        gauge!(LOADCHECK_ADMISSION_IN_FLIGHT).increment(1.0);

        Ok(AdmissionPermit { _permit: permit })
    }

    /// Returns the number of permits currently held.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Closes the gate. Pending and future acquisitions fail.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

/// One admitted row submission. Returned to the gate on drop.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        gauge!(LOADCHECK_ADMISSION_IN_FLIGHT).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn permits_are_returned_on_drop() {
        let gate = AdmissionGate::new(2);

        let first = gate.acquire().await.unwrap();
        let second = gate.acquire().await.unwrap();
        assert_eq!(gate.in_flight(), 2);
        assert_eq!(gate.available(), 0);

        drop(first);
        assert_eq!(gate.in_flight(), 1);

        drop(second);
        assert_eq!(gate.available(), 2);
    }

    #[tokio::test]
    async fn acquire_waits_when_exhausted() {
        let gate = AdmissionGate::new(1);
        let permit = gate.acquire().await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), gate.acquire()).await;
        assert!(blocked.is_err());

        drop(permit);
        let unblocked = tokio::time::timeout(Duration::from_secs(1), gate.acquire()).await;
        assert!(unblocked.is_ok());
    }

    #[tokio::test]
    async fn closed_gate_fails_acquisition() {
        let gate = AdmissionGate::new(1);
        gate.close();

        let err = gate.acquire().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AdmissionGateClosed);
    }
}
