//! Harness configuration.
//!
//! Defaults reproduce the long-running stress profile: three minutes of
//! traffic, a rotation about every second and a write about every second,
//! both with wide normal jitter. Tests shrink these with the `with_*` builders.

use crate::error::RotationError;
use std::env;
use std::time::Duration;

pub const DURATION_ENV: &str = "ROTATION_TEST_DURATION_MS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Handed to the connector builder through [`crate::secret::Credentials`]
    pub address: String,
    pub database: String,
    pub principal: String,
    pub table: String,
    /// How long rotation and writes run before draining
    pub duration: Duration,
    pub rotate_interval: Duration,
    pub rotate_stdev: Duration,
    pub write_interval: Duration,
    pub write_stdev: Duration,
    pub max_open: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            address: "localhost".to_string(),
            database: "rotationtest1".to_string(),
            principal: "rotationuser1".to_string(),
            table: "test_table".to_string(),
            duration: Duration::from_secs(180),
            rotate_interval: Duration::from_secs(1),
            rotate_stdev: Duration::from_secs(2),
            write_interval: Duration::from_secs(1),
            write_stdev: Duration::from_secs(4),
            max_open: 10,
        }
    }
}

impl HarnessConfig {
    /// Defaults, with the run length taken from `ROTATION_TEST_DURATION_MS` when set.
    pub fn from_env() -> Result<Self, RotationError> {
        let mut config = Self::default();
        if let Ok(raw) = env::var(DURATION_ENV) {
            let ms: u64 = raw.trim().parse().map_err(|_| {
                RotationError::Config(format!("{} must be a number of milliseconds, got {:?}", DURATION_ENV, raw))
            })?;
            config.duration = Duration::from_millis(ms);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = principal.into();
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_rotation(mut self, interval: Duration, stdev: Duration) -> Self {
        self.rotate_interval = interval;
        self.rotate_stdev = stdev;
        self
    }

    pub fn with_writes(mut self, interval: Duration, stdev: Duration) -> Self {
        self.write_interval = interval;
        self.write_stdev = stdev;
        self
    }

    pub fn with_max_open(mut self, max_open: u64) -> Self {
        self.max_open = max_open;
        self
    }

    /// Names end up inside administrative statements, so only plain identifiers are accepted.
    pub fn validate(&self) -> Result<(), RotationError> {
        for (field, value) in [
            ("database", &self.database),
            ("principal", &self.principal),
            ("table", &self.table),
        ] {
            if !is_identifier(value) {
                return Err(RotationError::Config(format!(
                    "{} must be a non-empty identifier of [A-Za-z0-9_], got {:?}",
                    field, value
                )));
            }
        }
        if self.max_open == 0 {
            return Err(RotationError::Config("max_open must be at least 1".to_string()));
        }
        Ok(())
    }
}

pub(crate) fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
