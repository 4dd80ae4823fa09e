use std::fmt::{Display, Formatter};

/// Snapshot of the pool counters
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct State {
    /// Maximum open connections allowed
    pub max_open: u64,
    /// Open connections = in_use + idle
    pub connections: u64,
    /// Connections handed out and not yet returned
    pub in_use: u64,
    /// Idle connections ready for reuse
    pub idle: u64,
    /// Callers waiting in get/exec
    pub waits: u64,
    /// Connect attempts in flight
    pub connecting: u64,
    /// Connections being checked before hand-out
    pub checking: u64,
    /// Physical connections opened since the pool was created
    pub connects: u64,
    /// Connections dropped because they failed a check or broke mid-statement
    pub discarded: u64,
}

impl Display for State {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{ max_open: {}, connections: {}, in_use: {}, idle: {}, connecting: {}, checking: {}, waits: {}, connects: {}, discarded: {} }}",
            self.max_open,
            self.connections,
            self.in_use,
            self.idle,
            self.connecting,
            self.checking,
            self.waits,
            self.connects,
            self.discarded
        )
    }
}
