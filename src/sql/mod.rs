//! Administrative sessions, connectors and workload statements for real
//! servers. `mysql` and `postgres` are cargo features; both speak their wire
//! protocol through `sqlx`.

#[cfg(any(feature = "mysql", feature = "postgres"))]
mod error;
#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(any(feature = "mysql", feature = "postgres"))]
pub use error::SqlError;

use crate::harness::config::is_identifier;

/// Split `host[:port]`, using `default_port` when no port is given.
/// An empty host means `localhost`.
pub fn split_address(address: &str, default_port: u16) -> Result<(&str, u16), String> {
    let (host, port) = match address.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| format!("invalid port in address {:?}", address))?;
            (host, port)
        }
        None => (address, default_port),
    };
    if host.is_empty() {
        return Ok(("localhost", port));
    }
    Ok((host, port))
}

/// Names are spliced into statements that cannot take bind parameters.
pub(crate) fn identifier(name: &str) -> Result<&str, String> {
    if is_identifier(name) {
        Ok(name)
    } else {
        Err(format!("refusing to use {:?} as an identifier", name))
    }
}

/// Secrets end up inside a quoted literal, so only `[0-9A-Za-z]` is accepted.
pub(crate) fn secret_literal(secret: &str) -> Result<&str, String> {
    if !secret.is_empty() && secret.chars().all(|c| c.is_ascii_alphanumeric()) {
        Ok(secret)
    } else {
        Err("refusing to use a secret outside [0-9A-Za-z]".to_string())
    }
}
