use crate::dynamic::{ConnectorFactory, DynamicManager};
use crate::error::{ConnectError, RotationError};
use crate::pool::Pool;
use crate::{BadConn, Manager};
use async_trait::async_trait;
use std::sync::Arc;

/// Statements the workload issues on a pooled connection.
#[async_trait]
pub trait Storage: Send {
    type Error;

    /// Append one row to `table`.
    async fn insert(&mut self, table: &str) -> Result<(), Self::Error>;

    async fn count(&mut self, table: &str) -> Result<u64, Self::Error>;
}

type Connector<F> = <F as ConnectorFactory>::Connector;
type Conn<F> = <Connector<F> as Manager>::Connection;
type ConnError<F> = <Connector<F> as Manager>::Error;

/// Issues writes through a factory-backed pool and counts the ones that succeeded.
pub struct Workload<F: ConnectorFactory> {
    pool: Pool<DynamicManager<F>>,
    table: Arc<str>,
    writes: u64,
}

impl<F> Workload<F>
where
    F: ConnectorFactory,
    Connector<F>: Send,
    Conn<F>: Storage<Error = ConnError<F>> + Send,
    ConnError<F>: BadConn + std::error::Error + Send + Sync + 'static,
{
    pub fn new(pool: Pool<DynamicManager<F>>, table: &str) -> Self {
        Self {
            pool,
            table: Arc::from(table),
            writes: 0,
        }
    }

    pub fn pool(&self) -> &Pool<DynamicManager<F>> {
        &self.pool
    }

    /// Writes that returned success so far.
    pub fn writes(&self) -> u64 {
        self.writes
    }

    /// Insert one row. Broken connections are retried by the pool; anything
    /// that still fails is fatal to the run and does not count.
    pub async fn write(&mut self) -> Result<(), RotationError> {
        let table = self.table.clone();
        self.pool
            .exec(move |conn| {
                let table = table.clone();
                Box::pin(async move { conn.insert(&table).await.map_err(ConnectError::Connector) })
            })
            .await
            .map_err(RotationError::workload)?;
        self.writes += 1;
        Ok(())
    }

    /// Row count of the workload table as seen through the same pool.
    pub async fn stored_rows(&self) -> Result<u64, RotationError> {
        let table = self.table.clone();
        self.pool
            .exec(move |conn| {
                let table = table.clone();
                Box::pin(async move { conn.count(&table).await.map_err(ConnectError::Connector) })
            })
            .await
            .map_err(|e| RotationError::Verify(e.into()))
    }

    /// Compare the stored row count with the success counter.
    pub async fn verify(&self) -> Result<u64, RotationError> {
        let actual = self.stored_rows().await?;
        if actual != self.writes {
            return Err(RotationError::ConsistencyViolation {
                expected: self.writes,
                actual,
            });
        }
        Ok(actual)
    }
}
