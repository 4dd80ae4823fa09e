use crate::BadConn;
use std::error::Error as StdError;

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// The connector factory failed, so no connect attempt was made.
#[derive(Debug, thiserror::Error)]
#[error("error creating connector from factory: {source}")]
pub struct FactoryError {
    #[source]
    source: BoxError,
}

impl FactoryError {
    pub fn new(cause: impl Into<BoxError>) -> Self {
        Self {
            source: cause.into(),
        }
    }

    /// The error returned by the factory.
    pub fn cause(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.source.as_ref()
    }
}

/// The legacy string-configured open path was used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("open is not supported, connections are only created through the connector factory")]
pub struct UnsupportedOperationError;

/// Error of a connect attempt made through [`crate::DynamicManager`].
///
/// `Connector` carries the underlying connector's own error unchanged.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError<E> {
    #[error(transparent)]
    Factory(#[from] FactoryError),
    #[error(transparent)]
    Unsupported(#[from] UnsupportedOperationError),
    #[error("{0}")]
    Connector(E),
    /// Raised by the pool itself: acquire timeouts, check timeouts, closed channels.
    #[error("pool: {0}")]
    Pool(String),
}

impl<E> ConnectError<E> {
    pub fn is_factory(&self) -> bool {
        matches!(self, ConnectError::Factory(_))
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, ConnectError::Unsupported(_))
    }

    pub fn connector(&self) -> Option<&E> {
        match self {
            ConnectError::Connector(e) => Some(e),
            _ => None,
        }
    }

    pub fn into_connector(self) -> Option<E> {
        match self {
            ConnectError::Connector(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> From<&str> for ConnectError<E> {
    fn from(value: &str) -> Self {
        ConnectError::Pool(value.to_string())
    }
}

impl<E: BadConn> BadConn for ConnectError<E> {
    fn is_bad_conn(&self) -> bool {
        match self {
            ConnectError::Connector(e) => e.is_bad_conn(),
            _ => false,
        }
    }
}

/// Failure of a rotation harness run.
#[derive(Debug, thiserror::Error)]
pub enum RotationError {
    /// Setup, rotation or teardown statement against the database failed.
    #[error("administrative operation `{op}` failed: {source}")]
    Administrative {
        op: &'static str,
        #[source]
        source: BoxError,
    },
    #[error("error inserting row: {0}")]
    Workload(#[source] BoxError),
    #[error("error counting number of inserted rows: {0}")]
    Verify(#[source] BoxError),
    #[error("inserted rows in database does not match number of insertions, expected {expected}, got {actual}")]
    ConsistencyViolation { expected: u64, actual: u64 },
    #[error("rotator task failed: {0}")]
    Rotator(#[from] tokio::task::JoinError),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl RotationError {
    pub fn admin(op: &'static str, source: impl Into<BoxError>) -> Self {
        RotationError::Administrative {
            op,
            source: source.into(),
        }
    }

    pub fn workload(source: impl Into<BoxError>) -> Self {
        RotationError::Workload(source.into())
    }

    pub fn is_consistency_violation(&self) -> bool {
        matches!(self, RotationError::ConsistencyViolation { .. })
    }
}
