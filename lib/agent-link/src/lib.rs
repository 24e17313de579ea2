//! Peer transport for the router agent
//!
//! This library provides:
//! - Newline-delimited JSON frames and their codec
//! - Per-connection sessions that classify peers and post control plane events
//! - Remote router and broker handles driven over the `$management` link
//! - The peer listener (TLS with plain fallback) and the sibling dialer

pub mod connection;
pub mod dialer;
pub mod error;
pub mod frame;
pub mod peer;
pub mod server;
pub mod tls;

pub use connection::{ConnectionIds, Endpoint, Outbound};
pub use dialer::Dialer;
pub use error::{LinkError, Result};
pub use frame::{Frame, FrameReader, FrameWriter, LinkRole};
pub use peer::{LinkSender, Management, RemoteBroker, RemoteRouter};
pub use server::{AgentListener, ListenerConfig, PLAIN_PORT, TLS_PORT};
pub use tls::{CertificateMaterial, TlsServerConfig};
