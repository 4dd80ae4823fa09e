use parking_lot::RwLock;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

pub const SECRET_LEN: usize = 30;

/// Random secret of [`SECRET_LEN`] characters drawn uniformly from `[0-9A-Za-z]`
/// using the operating system's CSPRNG.
pub fn generate_secret() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(SECRET_LEN)
        .map(char::from)
        .collect()
}

/// Everything a connector needs to authenticate one session.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub address: String,
    pub principal: String,
    pub secret: String,
    pub database: String,
}

impl Credentials {
    pub fn new(
        address: impl Into<String>,
        principal: impl Into<String>,
        secret: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            principal: principal.into(),
            secret: secret.into(),
            database: database.into(),
        }
    }
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("address", &self.address)
            .field("principal", &self.principal)
            .field("secret", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

/// Shared credential record: the rotator writes it, connector factories read it.
///
/// Readers take a snapshot and drop the lock right away, so no connect ever
/// holds it.
#[derive(Clone, Debug)]
pub struct CredentialStore {
    inner: Arc<RwLock<Credentials>>,
}

impl CredentialStore {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            inner: Arc::new(RwLock::new(credentials)),
        }
    }

    pub fn snapshot(&self) -> Credentials {
        self.inner.read().clone()
    }

    pub fn secret(&self) -> String {
        self.inner.read().secret.clone()
    }

    pub fn principal(&self) -> String {
        self.inner.read().principal.clone()
    }

    pub fn set_secret(&self, secret: String) {
        self.inner.write().secret = secret;
    }
}
