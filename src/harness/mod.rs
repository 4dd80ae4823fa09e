//! Credential rotation stress harness.
//!
//! A run creates an isolated database and principal, then writes through a
//! [`DynamicManager`]-backed pool while a background [`Rotator`] keeps changing
//! the principal's secret and killing its sessions. After the rotator has been
//! stopped, the number of stored rows must equal the number of writes that
//! reported success.
//!
//! ```text
//! Setup -> RotatingAndLoading -> Draining -> Verifying -> Teardown -> Done
//!                                                              \-> Failed
//! ```
//!
//! Teardown runs whatever happened before it.

pub mod admin;
pub mod config;
pub mod rotator;
pub mod workload;

pub use admin::{Admin, SessionId};
pub use config::HarnessConfig;
pub use rotator::{Rotator, RotatorHandle};
pub use workload::{Storage, Workload};

use crate::dynamic::{ConnectorFactory, DynamicManager};
use crate::error::RotationError;
use crate::jitter::JitterTicker;
use crate::pool::Pool;
use crate::secret::{generate_secret, CredentialStore, Credentials};
use crate::state::State;
use crate::{BadConn, Manager};
use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Setup,
    RotatingAndLoading,
    Draining,
    Verifying,
    Teardown,
    Done,
    Failed,
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Setup => "setup",
            Phase::RotatingAndLoading => "rotating_and_loading",
            Phase::Draining => "draining",
            Phase::Verifying => "verifying",
            Phase::Teardown => "teardown",
            Phase::Done => "done",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Writes the workload saw succeed
    pub writes: u64,
    /// Rows found in storage afterwards
    pub stored_rows: u64,
    pub rotations: u64,
    pub pool: State,
}

pub struct RotationHarness<A: Admin> {
    admin: Arc<A>,
    config: HarnessConfig,
    phase: Phase,
}

impl<A: Admin + 'static> RotationHarness<A> {
    pub fn new(admin: A, config: HarnessConfig) -> Self {
        Self::with_shared(Arc::new(admin), config)
    }

    pub fn with_shared(admin: Arc<A>, config: HarnessConfig) -> Self {
        Self {
            admin,
            config,
            phase: Phase::Setup,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    fn enter(&mut self, phase: Phase) {
        tracing::info!(from = %self.phase, to = %phase, "harness phase");
        self.phase = phase;
    }

    /// Run the whole protocol. `build` turns the credentials current at connect
    /// time into a connector; it is called once per physical connection.
    pub async fn run<C, B>(&mut self, build: B) -> Result<RunReport, RotationError>
    where
        B: Fn(&Credentials) -> C,
        C: Manager + Send,
        C::Connection: Storage<Error = C::Error> + Send,
        C::Error: BadConn + std::error::Error + Send + Sync + 'static,
    {
        self.config.validate()?;
        self.enter(Phase::Setup);
        let result = match self.setup().await {
            Ok(store) => {
                let reader = store.clone();
                let manager = DynamicManager::new(move || {
                    Ok::<C, Infallible>(build(&reader.snapshot()))
                });
                let pool = Pool::new(manager);
                pool.set_max_open(self.config.max_open);
                let mut workload = Workload::new(pool.clone(), &self.config.table);
                let result = self.exercise(store, &mut workload).await;
                drop(workload);
                pool.close_idle();
                result
            }
            Err(e) => Err(e),
        };
        self.enter(Phase::Teardown);
        let teardown = self.teardown().await;
        match (result, teardown) {
            (Ok(report), Ok(())) => {
                self.enter(Phase::Done);
                Ok(report)
            }
            (Err(e), teardown) => {
                if let Err(te) = teardown {
                    tracing::error!(error = %te, "teardown failed after run error");
                }
                self.enter(Phase::Failed);
                Err(e)
            }
            (Ok(_), Err(te)) => {
                self.enter(Phase::Failed);
                Err(te)
            }
        }
    }

    async fn setup(&self) -> Result<CredentialStore, RotationError> {
        let config = &self.config;
        let admin = &self.admin;
        admin
            .drop_database(&config.database)
            .await
            .map_err(|e| RotationError::admin("drop database", e))?;
        admin
            .create_database(&config.database)
            .await
            .map_err(|e| RotationError::admin("create database", e))?;
        admin
            .drop_principal(&config.principal)
            .await
            .map_err(|e| RotationError::admin("drop principal", e))?;
        let secret = generate_secret();
        admin
            .create_principal(&config.principal, &secret)
            .await
            .map_err(|e| RotationError::admin("create principal", e))?;
        admin
            .create_table(&config.database, &config.table)
            .await
            .map_err(|e| RotationError::admin("create table", e))?;
        admin
            .grant(&config.principal, &config.database, &config.table)
            .await
            .map_err(|e| RotationError::admin("grant", e))?;
        tracing::info!(
            database = %config.database,
            principal = %config.principal,
            "created isolated database and principal"
        );
        Ok(CredentialStore::new(Credentials::new(
            config.address.clone(),
            config.principal.clone(),
            secret,
            config.database.clone(),
        )))
    }

    async fn exercise<F>(
        &mut self,
        store: CredentialStore,
        workload: &mut Workload<F>,
    ) -> Result<RunReport, RotationError>
    where
        F: ConnectorFactory,
        F::Connector: Send,
        <F::Connector as Manager>::Connection:
            Storage<Error = <F::Connector as Manager>::Error> + Send,
        <F::Connector as Manager>::Error: BadConn + std::error::Error + Send + Sync + 'static,
    {
        let config = self.config.clone();
        self.enter(Phase::RotatingAndLoading);
        let mut rotator = Rotator::new(self.admin.clone(), store).spawn(JitterTicker::new(
            config.rotate_interval,
            config.rotate_stdev,
        ));
        let mut writes = JitterTicker::new(config.write_interval, config.write_stdev);
        let deadline = tokio::time::sleep(config.duration);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                biased;
                _ = &mut deadline => break,
                early = rotator.join() => {
                    return Err(match early {
                        Err(e) => e,
                        Ok(_) => RotationError::admin("rotate", "rotator stopped before the run ended"),
                    });
                }
                _ = writes.tick() => {
                    if let Err(e) = workload.write().await {
                        if let Err(re) = rotator.stop().await {
                            tracing::error!(error = %re, "rotator failed while stopping");
                        }
                        return Err(e);
                    }
                }
            }
        }

        self.enter(Phase::Draining);
        rotator.cancel();
        let rotations = loop {
            tokio::select! {
                biased;
                done = rotator.join() => break done?,
                _ = writes.tick() => {
                    if let Err(e) = workload.write().await {
                        if let Err(re) = rotator.join().await {
                            tracing::error!(error = %re, "rotator failed while stopping");
                        }
                        return Err(e);
                    }
                }
            }
        };
        tracing::info!(rotations, writes = workload.writes(), "rotator stopped");

        self.enter(Phase::Verifying);
        let stored_rows = workload.verify().await?;
        Ok(RunReport {
            writes: workload.writes(),
            stored_rows,
            rotations,
            pool: workload.pool().state(),
        })
    }

    /// Kill the principal's sessions, then drop principal and database.
    /// Every step is attempted; the first failure is returned.
    async fn teardown(&self) -> Result<(), RotationError> {
        let config = &self.config;
        let mut first: Option<RotationError> = None;
        let mut record = |op: &'static str, e: A::Error| {
            tracing::error!(op, error = %e, "teardown step failed");
            first.get_or_insert(RotationError::admin(op, e));
        };
        if let Err(e) = self.admin.terminate_all(&config.principal).await {
            record("terminate sessions", e);
        }
        if let Err(e) = self.admin.drop_principal(&config.principal).await {
            record("drop principal", e);
        }
        if let Err(e) = self.admin.drop_database(&config.database).await {
            record("drop database", e);
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
