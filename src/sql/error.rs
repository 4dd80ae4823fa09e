use crate::BadConn;

#[derive(Debug, thiserror::Error)]
pub enum SqlError {
    /// The session was found dead before the statement was sent, so the
    /// statement never ran.
    #[error("bad connection: {0}")]
    Gone(#[source] sqlx::Error),
    #[error(transparent)]
    Driver(#[from] sqlx::Error),
    #[error("{0}")]
    Other(String),
}

impl From<&str> for SqlError {
    fn from(value: &str) -> Self {
        SqlError::Other(value.to_string())
    }
}

impl BadConn for SqlError {
    fn is_bad_conn(&self) -> bool {
        matches!(self, SqlError::Gone(_))
    }
}
