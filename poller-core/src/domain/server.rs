//! Server domain model
//!
//! Liveness and discovery record for one running poller instance.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::protocol::server_state;

/// A poller instance registered in the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    #[serde(rename = "uuid")]
    pub id: String,
    pub server_group: String,
    pub service_name: String,
    /// Hostname of the machine running the poller
    pub server_name: String,
    #[serde(default)]
    pub server_ips: Vec<String>,
    /// Epoch millis
    pub start_time: i64,
    /// Epoch millis of the last heartbeat
    pub ping_time: i64,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub handlers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handled: Option<Vec<HandledCount>>,
    pub state: ServerState,
}

/// Success and failure counters for one handler
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandledCount {
    pub handler: String,
    pub handled: u64,
    pub not_handled: u64,
}

/// Status of a server record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    /// Registered but not yet polling
    Startup,

    /// Polling for tasks
    Running,

    /// Stopped gracefully
    Shutdown,

    /// Stopped after a fatal error
    Error,
}

impl ServerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerState::Startup => server_state::STARTUP,
            ServerState::Running => server_state::RUNNING,
            ServerState::Shutdown => server_state::SHUTDOWN,
            ServerState::Error => server_state::ERROR,
        }
    }

    /// Parses a stored value, treating unknown values as `Error`
    pub fn parse_lossy(s: &str) -> Self {
        match s {
            server_state::STARTUP => ServerState::Startup,
            server_state::RUNNING => ServerState::Running,
            server_state::SHUTDOWN => ServerState::Shutdown,
            _ => ServerState::Error,
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
