use crate::error::RotationError;
use crate::harness::admin::Admin;
use crate::jitter::JitterTicker;
use crate::secret::{generate_secret, CredentialStore};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Changes the principal's secret and kills every session opened with the old one.
///
/// Sole writer of the [`CredentialStore`].
pub struct Rotator<A: Admin> {
    admin: Arc<A>,
    store: CredentialStore,
    rotations: u64,
}

impl<A: Admin + 'static> Rotator<A> {
    pub fn new(admin: Arc<A>, store: CredentialStore) -> Self {
        Self {
            admin,
            store,
            rotations: 0,
        }
    }

    pub fn rotations(&self) -> u64 {
        self.rotations
    }

    /// One rotation: new secret at the server, then in the store, then kill the
    /// principal's sessions. Returns how many sessions were terminated.
    pub async fn rotate_once(&mut self) -> Result<usize, RotationError> {
        let principal = self.store.principal();
        let secret = generate_secret();
        self.admin
            .set_secret(&principal, &secret)
            .await
            .map_err(|e| RotationError::admin("set secret", e))?;
        self.store.set_secret(secret);
        let sessions = self
            .admin
            .sessions(&principal)
            .await
            .map_err(|e| RotationError::admin("list sessions", e))?;
        let mut terminated = 0;
        for session in sessions {
            let ended = self
                .admin
                .terminate(session)
                .await
                .map_err(|e| RotationError::admin("terminate session", e))?;
            if ended {
                terminated += 1;
            } else {
                tracing::debug!(%session, "session ended before it could be terminated");
            }
        }
        self.rotations += 1;
        tracing::info!(rotation = self.rotations, terminated, "rotated secret");
        Ok(terminated)
    }

    /// Rotate on every tick of `ticker` until [`RotatorHandle::stop`].
    ///
    /// A rotation that has started always runs to completion; cancellation is
    /// only observed between ticks.
    pub fn spawn(mut self, mut ticker: JitterTicker) -> RotatorHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                self.rotate_once().await?;
            }
            Ok::<u64, RotationError>(self.rotations)
        });
        RotatorHandle { cancel, task }
    }
}

/// Stop signal plus completion acknowledgement for a spawned [`Rotator`].
pub struct RotatorHandle {
    cancel: CancellationToken,
    task: JoinHandle<Result<u64, RotationError>>,
}

impl RotatorHandle {
    /// Ask the rotator to stop after its current tick.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the rotator task to end and return its rotation count.
    ///
    /// Must not be polled again once it has returned.
    pub async fn join(&mut self) -> Result<u64, RotationError> {
        match (&mut self.task).await {
            Ok(result) => result,
            Err(e) => Err(RotationError::Rotator(e)),
        }
    }

    pub async fn stop(mut self) -> Result<u64, RotationError> {
        self.cancel();
        self.join().await
    }
}
