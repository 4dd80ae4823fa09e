use async_trait::async_trait;
use std::fmt::{Display, Formatter};

/// Server-side identifier of one live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Privileged session used to build, rotate and tear down the test principal.
///
/// `drop_*` are idempotent: dropping something that does not exist succeeds.
#[async_trait]
pub trait Admin: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn drop_database(&self, database: &str) -> Result<(), Self::Error>;

    async fn create_database(&self, database: &str) -> Result<(), Self::Error>;

    async fn drop_principal(&self, principal: &str) -> Result<(), Self::Error>;

    async fn create_principal(&self, principal: &str, secret: &str) -> Result<(), Self::Error>;

    async fn create_table(&self, database: &str, table: &str) -> Result<(), Self::Error>;

    /// Allow `principal` to read and write `database.table`. The table must exist.
    async fn grant(&self, principal: &str, database: &str, table: &str)
        -> Result<(), Self::Error>;

    async fn set_secret(&self, principal: &str, secret: &str) -> Result<(), Self::Error>;

    /// Live sessions authenticated as `principal`.
    async fn sessions(&self, principal: &str) -> Result<Vec<SessionId>, Self::Error>;

    /// Forcibly end a session. `Ok(false)` when it had already gone away.
    async fn terminate(&self, session: SessionId) -> Result<bool, Self::Error>;

    /// Terminate every live session of `principal`, returning how many were ended.
    async fn terminate_all(&self, principal: &str) -> Result<usize, Self::Error> {
        let mut terminated = 0;
        for session in self.sessions(principal).await? {
            if self.terminate(session).await? {
                terminated += 1;
            } else {
                tracing::debug!(%session, "session ended before it could be terminated");
            }
        }
        Ok(terminated)
    }
}
