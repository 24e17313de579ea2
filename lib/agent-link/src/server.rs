//! Peer listener

use crate::connection::Endpoint;
use crate::tls::CertificateMaterial;
use crate::Result;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

pub const TLS_PORT: u16 = 55671;
pub const PLAIN_PORT: u16 = 55672;

#[derive(Clone, Debug, Default)]
pub struct ListenerConfig {
    /// Explicit port; defaults to 55671 with TLS and 55672 without
    pub port: Option<u16>,
    /// Directory holding `tls.crt` and `tls.key`
    pub cert_dir: Option<PathBuf>,
}

impl ListenerConfig {
    /// Load the TLS acceptor. Failure falls back to a plain listener.
    fn acceptor(&self) -> Option<TlsAcceptor> {
        let dir = self.cert_dir.as_ref()?;
        match CertificateMaterial::load(dir).and_then(|material| material.to_tls_config()) {
            Ok(tls) => {
                info!("TLS configuration loaded from {}", dir.display());
                Some(TlsAcceptor::from(tls.config))
            }
            Err(e) => {
                warn!(
                    "Failed to load TLS configuration from {}: {}, falling back to plain listener",
                    dir.display(),
                    e
                );
                None
            }
        }
    }

    fn port(&self, tls: bool) -> u16 {
        self.port.unwrap_or(if tls { TLS_PORT } else { PLAIN_PORT })
    }
}

pub struct AgentListener {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    endpoint: Endpoint,
}

impl AgentListener {
    pub async fn bind(config: &ListenerConfig, endpoint: Endpoint) -> Result<Self> {
        let tls = config.acceptor();
        let addr: SocketAddr = ([0, 0, 0, 0], config.port(tls.is_some())).into();
        let listener = TcpListener::bind(&addr).await?;
        info!(
            "Listening for peers on {} ({})",
            listener.local_addr()?,
            if tls.is_some() { "TLS" } else { "plain" }
        );
        Ok(Self {
            listener,
            tls,
            endpoint,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Accept connections until the listener fails
    pub async fn run(self) -> Result<()> {
        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Error accepting peer connection: {}", e);
                    continue;
                }
            };
            debug!("Accepted connection from {}", peer_addr);

            match &self.tls {
                None => {
                    self.endpoint.spawn(stream, Vec::new());
                }
                Some(acceptor) => {
                    let acceptor = acceptor.clone();
                    let endpoint = self.endpoint.clone();
                    tokio::spawn(async move {
                        match acceptor.accept(stream).await {
                            Ok(tls_stream) => {
                                endpoint.spawn(tls_stream, Vec::new());
                            }
                            Err(e) => debug!("TLS error from {}: {}", peer_addr, e),
                        }
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionIds;
    use agent_core::{AgentEvent, Peer};
    use tokio::sync::mpsc;

    #[test]
    fn test_default_ports() {
        let config = ListenerConfig::default();
        assert_eq!(config.port(true), TLS_PORT);
        assert_eq!(config.port(false), PLAIN_PORT);
        let explicit = ListenerConfig {
            port: Some(5672),
            cert_dir: None,
        };
        assert_eq!(explicit.port(true), 5672);
    }

    #[tokio::test]
    async fn test_unreadable_certificates_fall_back_to_plain() {
        let (events, mut rx) = mpsc::unbounded_channel();
        let config = ListenerConfig {
            port: Some(0),
            cert_dir: Some(PathBuf::from("/nonexistent/certs")),
        };
        let listener = AgentListener::bind(&config, Endpoint::new("agent-x", events, ConnectionIds::default()))
            .await
            .unwrap();
        assert!(!listener.is_tls());

        let addr = listener.local_addr().unwrap();
        tokio::spawn(listener.run());

        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (client_events, _client_rx) = mpsc::unbounded_channel();
        let client = Endpoint::new("agent-y", client_events, ConnectionIds::default());
        client.spawn(stream, Vec::new());

        match rx.recv().await.unwrap() {
            AgentEvent::PeerOpened {
                container_id,
                peer: Peer::Federation,
                ..
            } => assert_eq!(container_id, "agent-y"),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
