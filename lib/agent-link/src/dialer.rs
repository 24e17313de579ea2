//! Outbound connections to sibling agents

use crate::connection::{Endpoint, Outbound};
use crate::frame::{Frame, LinkRole};
use crate::{LinkError, Result};
use agent_api::message::SUBJECT_ROUTERS;
use agent_core::ConnectionId;
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

/// Dials sibling agents and subscribes to their router topology
pub struct Dialer {
    endpoint: Endpoint,
    tls: Option<TlsConnector>,
    connections: Mutex<HashMap<String, (ConnectionId, Outbound)>>,
}

impl Dialer {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            tls: None,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Dial over TLS, trusting the given client configuration
    pub fn with_tls(mut self, config: Arc<ClientConfig>) -> Self {
        self.tls = Some(TlsConnector::from(config));
        self
    }

    fn subscribe_frame() -> Frame {
        Frame::Attach {
            link: SUBJECT_ROUTERS.to_string(),
            role: LinkRole::Receiver,
            source: Some(SUBJECT_ROUTERS.to_string()),
            target: None,
        }
    }

    /// Open a connection to the sibling known as `name`, replacing any
    /// earlier connection under that name
    pub async fn connect(&self, name: &str, host: &str, port: u16) -> Result<ConnectionId> {
        let stream = TcpStream::connect((host, port)).await?;
        let links = vec![Self::subscribe_frame()];
        let (connection, outbound) = match &self.tls {
            None => self.endpoint.spawn(stream, links),
            Some(connector) => {
                let server_name = ServerName::try_from(host.to_string())
                    .map_err(|e| LinkError::Tls(format!("Invalid server name {}: {}", host, e)))?;
                let stream = connector.connect(server_name, stream).await?;
                self.endpoint.spawn(stream, links)
            }
        };
        info!("Connected to sibling {} at {}:{} ({})", name, host, port, connection);

        let previous = self
            .connections
            .lock()
            .await
            .insert(name.to_string(), (connection, outbound));
        if let Some((old, outbound)) = previous {
            debug!("Replacing {} for sibling {}", old, name);
            close_sibling(name, &outbound);
        }
        Ok(connection)
    }

    /// Close the connection to `name`, if any
    pub async fn disconnect(&self, name: &str) -> bool {
        match self.connections.lock().await.remove(name) {
            Some((connection, outbound)) => {
                info!("Disconnecting sibling {} ({})", name, connection);
                close_sibling(name, &outbound);
                true
            }
            None => false,
        }
    }

    pub async fn connected(&self) -> Vec<String> {
        let mut names: Vec<_> = self.connections.lock().await.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Queue a close frame; returns false if the connection was already gone
fn close_sibling(name: &str, outbound: &Outbound) -> bool {
    match outbound.send(Frame::Close { error: None }) {
        Ok(()) => true,
        Err(e) => {
            debug!("Connection to sibling {} already closed: {}", name, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionIds;
    use crate::server::{AgentListener, ListenerConfig};
    use agent_core::{AgentEvent, Peer};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_dial_subscribes_and_disconnect_closes() {
        let ids = ConnectionIds::default();
        let (server_events, mut server_rx) = mpsc::unbounded_channel();
        let listener = AgentListener::bind(
            &ListenerConfig {
                port: Some(0),
                cert_dir: None,
            },
            Endpoint::new("agent-y", server_events, ids.clone()),
        )
        .await
        .unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(listener.run());

        let (events, mut rx) = mpsc::unbounded_channel();
        let dialer = Dialer::new(Endpoint::new("agent-x", events, ids));
        dialer.connect("agent-y", "127.0.0.1", port).await.unwrap();
        assert_eq!(dialer.connected().await, vec!["agent-y".to_string()]);

        assert!(matches!(
            rx.recv().await.unwrap(),
            AgentEvent::PeerOpened {
                peer: Peer::Federation,
                ..
            }
        ));
        assert!(matches!(server_rx.recv().await.unwrap(), AgentEvent::PeerOpened { .. }));
        assert!(matches!(
            server_rx.recv().await.unwrap(),
            AgentEvent::SubscriberAttached { .. }
        ));

        assert!(dialer.disconnect("agent-y").await);
        assert!(!dialer.disconnect("agent-y").await);
        assert!(matches!(server_rx.recv().await.unwrap(), AgentEvent::PeerClosed { .. }));
    }

    #[test]
    fn test_close_tolerates_finished_connection() {
        let (outbound, mut queue) = Outbound::channel();
        assert!(close_sibling("agent-y", &outbound));
        assert!(matches!(queue.try_recv().unwrap(), Frame::Close { error: None }));

        drop(queue);
        assert!(!close_sibling("agent-y", &outbound));
    }
}
