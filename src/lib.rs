#![allow(async_fn_in_trait)]

#[macro_use]
mod defer;
pub mod context;
pub mod dynamic;
pub mod error;
pub mod guard;
pub mod harness;
pub mod jitter;
pub mod memory;
pub mod pool;
pub mod secret;
pub mod sql;
pub mod state;

/// Manager opens a physical Connection and checks pooled Connections
pub trait Manager {
    type Connection;

    type Error: for<'a> From<&'a str>;

    ///open one Connection, honouring the cancellation and deadline carried by `ctx`
    async fn connect(&self, ctx: &Context) -> Result<Self::Connection, Self::Error>;
    ///check Connection is alive? if not return Error(Connection will be discarded)
    async fn check(&self, conn: &mut Self::Connection) -> Result<(), Self::Error>;
}

/// Marks errors meaning the statement never ran because the session is gone.
///
/// Only these errors are retried by [`Pool::exec`].
pub trait BadConn {
    fn is_bad_conn(&self) -> bool;
}

pub use context::Context;
pub use dynamic::{ConnectorFactory, DynamicManager, FactoryConnection};
pub use error::{ConnectError, FactoryError, RotationError, UnsupportedOperationError};
pub use guard::ConnectionGuard;
pub use harness::{RotationHarness, RunReport};
pub use pool::Pool;
pub use state::State;
