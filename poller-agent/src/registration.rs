//! Server registration
//!
//! Publishes this poller as a discoverable server record: upserted on
//! start, pinged on an interval, flipped to shutdown on stop. Records are
//! never deleted so the table doubles as an audit trail of past instances.

use poller_core::{HandledCount, Server, ServerState, now_millis};
use poller_store::{ServerStateUpdate, Store};
use std::net::UdpSocket;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::AgentPollerConfig;

/// Server record lifecycle for one poller instance
#[derive(Clone)]
pub struct ServerRegistration {
    store: Arc<dyn Store>,
    server_id: String,
}

impl ServerRegistration {
    pub fn new(store: Arc<dyn Store>, server_id: impl Into<String>) -> Self {
        Self {
            store,
            server_id: server_id.into(),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Upserts the server record as running with the given handler names
    ///
    /// A restart with the same server id replaces the stale record.
    pub async fn register(
        &self,
        config: &AgentPollerConfig,
        handler_names: Vec<String>,
    ) -> poller_store::Result<()> {
        let now = now_millis();
        let server = Server {
            id: self.server_id.clone(),
            server_group: config.server_group.clone(),
            service_name: config.service_name.clone(),
            server_name: config.server_name.clone(),
            server_ips: local_ips(),
            start_time: now,
            ping_time: now,
            topics: handler_names.clone(),
            handlers: handler_names,
            handled: None,
            state: ServerState::Running,
        };

        self.store.upsert_server(&server).await?;

        info!(
            "Registered server {} ({} handler(s))",
            self.server_id,
            server.handlers.len()
        );
        Ok(())
    }

    /// Refreshes the ping time. Failures are logged, never returned.
    pub async fn heartbeat(&self) {
        debug!("Sending heartbeat for server {}", self.server_id);

        if let Err(e) = self.store.touch_server(&self.server_id, now_millis()).await {
            warn!("Failed to send heartbeat: {:#}", e);
        }
    }

    /// Publishes per-handler counters. Failures are logged, never returned.
    pub async fn publish_handled(&self, handled: &[HandledCount]) {
        if handled.is_empty() {
            return;
        }

        if let Err(e) = self.store.update_handled(&self.server_id, handled).await {
            warn!("Failed to publish handled counters: {:#}", e);
        }
    }

    /// Marks the server record as shut down, leaving the rest intact
    pub async fn deregister(&self) -> poller_store::Result<()> {
        self.store
            .set_server_state(
                &self.server_id,
                ServerStateUpdate {
                    state: ServerState::Shutdown,
                    ping_time: now_millis(),
                },
            )
            .await?;

        info!("Deregistered server {}", self.server_id);
        Ok(())
    }
}

/// Address of the interface used for outbound traffic
///
/// Connecting a UDP socket sends nothing; it only selects a route.
fn local_ips() -> Vec<String> {
    let socket = match UdpSocket::bind("0.0.0.0:0") {
        Ok(socket) => socket,
        Err(_) => return Vec::new(),
    };

    if socket.connect("8.8.8.8:80").is_err() {
        return Vec::new();
    }

    socket
        .local_addr()
        .map(|addr| vec![addr.ip().to_string()])
        .unwrap_or_default()
}
