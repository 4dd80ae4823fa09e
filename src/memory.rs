//! In-process database server.
//!
//! Models exactly what the rotation protocol touches: databases with
//! append-only tables, principals with one secret each, table grants, and live
//! sessions that authenticate at connect time and can be killed by an
//! administrator. A killed session fails its next statement with
//! [`MemoryError::BadConnection`] without executing it.

use crate::context::Context;
use crate::harness::admin::{Admin, SessionId};
use crate::harness::workload::Storage;
use crate::secret::Credentials;
use crate::{BadConn, Manager};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    #[error("access denied for user '{0}'")]
    AccessDenied(String),
    #[error("unknown database '{0}'")]
    UnknownDatabase(String),
    #[error("database '{0}' already exists")]
    DatabaseExists(String),
    #[error("unknown user '{0}'")]
    UnknownPrincipal(String),
    #[error("user '{0}' already exists")]
    PrincipalExists(String),
    #[error("table '{0}' doesn't exist")]
    UnknownTable(String),
    #[error("table '{0}' already exists")]
    TableExists(String),
    #[error("command denied to user '{principal}' for table '{table}'")]
    PermissionDenied { principal: String, table: String },
    #[error("bad connection: session was terminated")]
    BadConnection,
    #[error("{0}")]
    Other(String),
}

impl From<&str> for MemoryError {
    fn from(value: &str) -> Self {
        MemoryError::Other(value.to_string())
    }
}

impl BadConn for MemoryError {
    fn is_bad_conn(&self) -> bool {
        matches!(self, MemoryError::BadConnection)
    }
}

#[derive(Debug)]
struct Session {
    principal: String,
    database: String,
}

#[derive(Debug, Default)]
struct ServerState {
    databases: HashMap<String, HashMap<String, Vec<i64>>>,
    principals: HashMap<String, String>,
    grants: HashSet<(String, String, String)>,
    sessions: BTreeMap<u64, Session>,
    next_session: u64,
    rejected_writes: u64,
}

impl ServerState {
    fn authorize(&self, session: u64, table: &str) -> Result<&Session, MemoryError> {
        let s = self.sessions.get(&session).ok_or(MemoryError::BadConnection)?;
        let key = (s.principal.clone(), s.database.clone(), table.to_string());
        if !self.grants.contains(&key) {
            return Err(MemoryError::PermissionDenied {
                principal: s.principal.clone(),
                table: table.to_string(),
            });
        }
        Ok(s)
    }
}

/// Cloneable handle to one in-memory server.
#[derive(Debug, Clone, Default)]
pub struct MemoryServer {
    state: Arc<Mutex<ServerState>>,
    latency: Duration,
    connect_latency: Duration,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every statement sleeps this long before it runs, so a kill can land
    /// while the statement is in flight.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Time between authentication and the connection being handed out.
    pub fn with_connect_latency(mut self, latency: Duration) -> Self {
        self.connect_latency = latency;
        self
    }

    /// Connector that will authenticate with exactly these credentials.
    pub fn connector(&self, credentials: &Credentials) -> MemoryConnector {
        MemoryConnector {
            server: self.clone(),
            credentials: credentials.clone(),
        }
    }

    pub fn database_exists(&self, database: &str) -> bool {
        self.state.lock().databases.contains_key(database)
    }

    pub fn principal_exists(&self, principal: &str) -> bool {
        self.state.lock().principals.contains_key(principal)
    }

    pub fn session_count(&self, principal: &str) -> usize {
        self.state
            .lock()
            .sessions
            .values()
            .filter(|s| s.principal == principal)
            .count()
    }

    /// Row count of a table, bypassing authentication.
    pub fn rows(&self, database: &str, table: &str) -> Option<usize> {
        self.state
            .lock()
            .databases
            .get(database)
            .and_then(|tables| tables.get(table))
            .map(Vec::len)
    }

    /// Statements refused because their session had been terminated.
    pub fn rejected_writes(&self) -> u64 {
        self.state.lock().rejected_writes
    }

    fn open_session(&self, credentials: &Credentials) -> Result<u64, MemoryError> {
        let mut state = self.state.lock();
        match state.principals.get(&credentials.principal) {
            Some(secret) if *secret == credentials.secret => {}
            _ => return Err(MemoryError::AccessDenied(credentials.principal.clone())),
        }
        if !state.databases.contains_key(&credentials.database) {
            return Err(MemoryError::UnknownDatabase(credentials.database.clone()));
        }
        state.next_session += 1;
        let id = state.next_session;
        state.sessions.insert(
            id,
            Session {
                principal: credentials.principal.clone(),
                database: credentials.database.clone(),
            },
        );
        tracing::debug!(session = id, principal = %credentials.principal, "session opened");
        Ok(id)
    }

    fn ping(&self, session: u64) -> Result<(), MemoryError> {
        if self.state.lock().sessions.contains_key(&session) {
            Ok(())
        } else {
            Err(MemoryError::BadConnection)
        }
    }

    fn close_session(&self, session: u64) {
        self.state.lock().sessions.remove(&session);
    }

    fn insert(&self, session: u64, table: &str) -> Result<(), MemoryError> {
        let mut state = self.state.lock();
        let authorized = state.authorize(session, table).map(|s| s.database.clone());
        let database = match authorized {
            Ok(database) => database,
            Err(MemoryError::BadConnection) => {
                state.rejected_writes += 1;
                return Err(MemoryError::BadConnection);
            }
            Err(e) => return Err(e),
        };
        let rows = state
            .databases
            .get_mut(&database)
            .ok_or_else(|| MemoryError::UnknownDatabase(database.clone()))?
            .get_mut(table)
            .ok_or_else(|| MemoryError::UnknownTable(table.to_string()))?;
        rows.push(1);
        Ok(())
    }

    fn count(&self, session: u64, table: &str) -> Result<u64, MemoryError> {
        let state = self.state.lock();
        let database = &state.authorize(session, table)?.database;
        let rows = state
            .databases
            .get(database)
            .ok_or_else(|| MemoryError::UnknownDatabase(database.clone()))?
            .get(table)
            .ok_or_else(|| MemoryError::UnknownTable(table.to_string()))?;
        Ok(rows.len() as u64)
    }
}

#[async_trait]
impl Admin for MemoryServer {
    type Error = MemoryError;

    async fn drop_database(&self, database: &str) -> Result<(), Self::Error> {
        let mut state = self.state.lock();
        state.databases.remove(database);
        state.grants.retain(|(_, db, _)| db != database);
        Ok(())
    }

    async fn create_database(&self, database: &str) -> Result<(), Self::Error> {
        let mut state = self.state.lock();
        if state.databases.contains_key(database) {
            return Err(MemoryError::DatabaseExists(database.to_string()));
        }
        state.databases.insert(database.to_string(), HashMap::new());
        Ok(())
    }

    async fn drop_principal(&self, principal: &str) -> Result<(), Self::Error> {
        let mut state = self.state.lock();
        state.principals.remove(principal);
        state.grants.retain(|(p, _, _)| p != principal);
        Ok(())
    }

    async fn create_principal(&self, principal: &str, secret: &str) -> Result<(), Self::Error> {
        let mut state = self.state.lock();
        if state.principals.contains_key(principal) {
            return Err(MemoryError::PrincipalExists(principal.to_string()));
        }
        state
            .principals
            .insert(principal.to_string(), secret.to_string());
        Ok(())
    }

    async fn create_table(&self, database: &str, table: &str) -> Result<(), Self::Error> {
        let mut state = self.state.lock();
        let tables = state
            .databases
            .get_mut(database)
            .ok_or_else(|| MemoryError::UnknownDatabase(database.to_string()))?;
        if tables.contains_key(table) {
            return Err(MemoryError::TableExists(table.to_string()));
        }
        tables.insert(table.to_string(), Vec::new());
        Ok(())
    }

    async fn grant(&self, principal: &str, database: &str, table: &str) -> Result<(), Self::Error> {
        let mut state = self.state.lock();
        if !state.principals.contains_key(principal) {
            return Err(MemoryError::UnknownPrincipal(principal.to_string()));
        }
        let tables = state
            .databases
            .get(database)
            .ok_or_else(|| MemoryError::UnknownDatabase(database.to_string()))?;
        if !tables.contains_key(table) {
            return Err(MemoryError::UnknownTable(table.to_string()));
        }
        state.grants.insert((
            principal.to_string(),
            database.to_string(),
            table.to_string(),
        ));
        Ok(())
    }

    async fn set_secret(&self, principal: &str, secret: &str) -> Result<(), Self::Error> {
        let mut state = self.state.lock();
        match state.principals.get_mut(principal) {
            Some(current) => {
                *current = secret.to_string();
                Ok(())
            }
            None => Err(MemoryError::UnknownPrincipal(principal.to_string())),
        }
    }

    async fn sessions(&self, principal: &str) -> Result<Vec<SessionId>, Self::Error> {
        let state = self.state.lock();
        Ok(state
            .sessions
            .iter()
            .filter(|(_, s)| s.principal == principal)
            .map(|(id, _)| SessionId(*id))
            .collect())
    }

    async fn terminate(&self, session: SessionId) -> Result<bool, Self::Error> {
        let removed = self.state.lock().sessions.remove(&session.0).is_some();
        if removed {
            tracing::debug!(%session, "session terminated");
        }
        Ok(removed)
    }
}

/// Connects with one fixed set of credentials.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    server: MemoryServer,
    credentials: Credentials,
}

impl MemoryConnector {
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }
}

impl Manager for MemoryConnector {
    type Connection = MemoryConnection;
    type Error = MemoryError;

    async fn connect(&self, ctx: &Context) -> Result<Self::Connection, Self::Error> {
        ctx.run(async {
            let session = self.server.open_session(&self.credentials)?;
            let conn = MemoryConnection {
                server: self.server.clone(),
                session,
            };
            if !self.server.connect_latency.is_zero() {
                tokio::time::sleep(self.server.connect_latency).await;
                self.server.ping(session)?;
            }
            Ok::<_, MemoryError>(conn)
        })
        .await
    }

    async fn check(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        self.server.ping(conn.session)
    }
}

/// One authenticated session. Dropping it ends the session.
#[derive(Debug)]
pub struct MemoryConnection {
    server: MemoryServer,
    session: u64,
}

impl MemoryConnection {
    pub fn session(&self) -> SessionId {
        SessionId(self.session)
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.server.close_session(self.session);
    }
}

#[async_trait]
impl Storage for MemoryConnection {
    type Error = MemoryError;

    async fn insert(&mut self, table: &str) -> Result<(), Self::Error> {
        if !self.server.latency.is_zero() {
            tokio::time::sleep(self.server.latency).await;
        }
        self.server.insert(self.session, table)
    }

    async fn count(&mut self, table: &str) -> Result<u64, Self::Error> {
        if !self.server.latency.is_zero() {
            tokio::time::sleep(self.server.latency).await;
        }
        self.server.count(self.session, table)
    }
}
