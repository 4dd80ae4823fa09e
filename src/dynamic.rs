use crate::context::Context;
use crate::error::{BoxError, ConnectError, FactoryError, UnsupportedOperationError};
use crate::Manager;
use std::fmt::{Debug, Formatter};
use std::ops::{Deref, DerefMut};

/// Produces a fresh connector on every connect attempt.
///
/// Implemented for every `Fn() -> Result<C, E>`, so a closure reading the
/// current credentials is enough:
///
/// ```no_run
/// use dynamic_pool::memory::MemoryServer;
/// use dynamic_pool::secret::{CredentialStore, Credentials};
/// use dynamic_pool::{DynamicManager, FactoryError, Pool};
///
/// let server = MemoryServer::new();
/// let store = CredentialStore::new(Credentials::new("mem", "user", "secret", "db"));
/// let reader = store.clone();
/// let manager = DynamicManager::new(move || {
///     Ok::<_, FactoryError>(server.connector(&reader.snapshot()))
/// });
/// let pool = Pool::new(manager);
/// ```
pub trait ConnectorFactory {
    type Connector: Manager;

    fn create(&self) -> Result<Self::Connector, FactoryError>;
}

impl<F, C, E> ConnectorFactory for F
where
    F: Fn() -> Result<C, E>,
    C: Manager,
    E: Into<BoxError>,
{
    type Connector = C;

    fn create(&self) -> Result<C, FactoryError> {
        (self)().map_err(FactoryError::new)
    }
}

type ConnectorError<F> = <<F as ConnectorFactory>::Connector as Manager>::Error;

/// Manager that builds its connector at connect time instead of at pool construction.
///
/// The factory is called once per connect attempt and its result is never
/// cached, so each new physical connection sees whatever configuration the
/// factory returns at that moment. No state is mutated by `connect`, any number
/// of attempts can run concurrently.
pub struct DynamicManager<F: ConnectorFactory> {
    factory: F,
}

impl<F: ConnectorFactory> DynamicManager<F> {
    pub fn new(factory: F) -> Self {
        Self { factory }
    }

    /// Legacy string-configured entry point. Always fails: a string cannot
    /// say "call this function for fresh credentials".
    pub fn open(
        &self,
        name: &str,
    ) -> Result<FactoryConnection<F::Connector>, ConnectError<ConnectorError<F>>> {
        tracing::debug!(name_len = name.len(), "rejecting string-configured open");
        Err(UnsupportedOperationError.into())
    }
}

impl<F: ConnectorFactory> Debug for DynamicManager<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicManager").finish_non_exhaustive()
    }
}

impl<F: ConnectorFactory> Manager for DynamicManager<F> {
    type Connection = FactoryConnection<F::Connector>;
    type Error = ConnectError<ConnectorError<F>>;

    async fn connect(&self, ctx: &Context) -> Result<Self::Connection, Self::Error> {
        let connector = self.factory.create()?;
        let inner = connector
            .connect(ctx)
            .await
            .map_err(ConnectError::Connector)?;
        Ok(FactoryConnection { connector, inner })
    }

    async fn check(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        let FactoryConnection { connector, inner } = conn;
        connector.check(inner).await.map_err(ConnectError::Connector)
    }
}

/// A connection together with the connector that opened it.
pub struct FactoryConnection<C: Manager> {
    connector: C,
    inner: C::Connection,
}

impl<C: Manager> FactoryConnection<C> {
    pub fn connector(&self) -> &C {
        &self.connector
    }
}

impl<C: Manager> Debug for FactoryConnection<C>
where
    C::Connection: Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryConnection")
            .field("inner", &self.inner)
            .finish()
    }
}

impl<C: Manager> Deref for FactoryConnection<C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<C: Manager> DerefMut for FactoryConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}
