//! Single-flight gate for credential acquisition.

use std::sync::Arc;

use hostlink_core::HostError;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Binary gate: at most one credential flow holds it at a time.
///
/// Waiters are woken in arrival order. The gate starts open.
#[derive(Debug, Clone)]
pub struct CredentialGate {
    semaphore: Arc<Semaphore>,
}

/// Proof of holding the gate. Dropping it reopens the gate.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl Default for CredentialGate {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialGate {
    #[must_use]
    pub fn new() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
        }
    }

    /// Wait until the gate is open, then close it.
    ///
    /// # Errors
    /// Returns `HostError::InvalidState` if the gate was shut down.
    pub async fn acquire(&self) -> Result<GatePermit, HostError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| HostError::InvalidState("credential gate closed".to_string()))?;
        Ok(GatePermit { _permit: permit })
    }

    /// Close the gate if it is open, without waiting.
    #[must_use]
    pub fn try_acquire(&self) -> Option<GatePermit> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| GatePermit { _permit: permit })
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.semaphore.available_permits() > 0
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_gate_is_exclusive() {
        let gate = CredentialGate::new();
        assert!(gate.is_open());

        let permit = gate.acquire().await.unwrap();
        assert!(!gate.is_open());
        assert!(gate.try_acquire().is_none());

        drop(permit);
        assert!(gate.is_open());
        assert!(gate.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_release() {
        let gate = CredentialGate::new();
        let permit = gate.acquire().await.unwrap();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire().await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(permit);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
