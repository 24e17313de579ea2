//! Per-connection sessions
//!
//! Each connection runs in its own task: a writer draining an outbound frame
//! queue and a reader that performs the open handshake, classifies the peer,
//! and turns inbound frames into control plane events.

use crate::frame::{Frame, FrameReader, FrameWriter, LinkRole};
use crate::peer::{LinkSender, Management, RemoteBroker, RemoteRouter};
use crate::{LinkError, Result};
use agent_api::message::{MANAGEMENT_ADDRESS, SUBJECT_ROUTERS};
use agent_api::peer::PRODUCT_AGENT;
use agent_api::{ConnectionProperties, PeerRole};
use agent_core::{AgentEvent, ConnectionId, EventSender, Peer};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Queue of frames to be written to one connection
#[derive(Clone, Debug)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<Frame>,
}

impl Outbound {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, frame: Frame) -> Result<()> {
        self.tx.send(frame).map_err(|_| LinkError::Closed)
    }
}

/// Process-wide connection id allocator, shared by the listener and the dialer
#[derive(Clone, Debug, Default)]
pub struct ConnectionIds(Arc<AtomicU64>);

impl ConnectionIds {
    pub fn next(&self) -> ConnectionId {
        ConnectionId(self.0.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

/// Local end of every connection: who we are and where events go
#[derive(Clone, Debug)]
pub struct Endpoint {
    container_id: String,
    events: EventSender,
    ids: ConnectionIds,
}

impl Endpoint {
    pub fn new(container_id: impl Into<String>, events: EventSender, ids: ConnectionIds) -> Self {
        Self {
            container_id: container_id.into(),
            events,
            ids,
        }
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// Start serving a connection. `links` are attached right after our open.
    pub fn spawn<S>(&self, stream: S, links: Vec<Frame>) -> (ConnectionId, Outbound)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let connection = self.ids.next();
        let (outbound, mut queue) = Outbound::channel();
        let (reader, writer) = tokio::io::split(stream);

        tokio::spawn(async move {
            let mut writer = FrameWriter::new(writer);
            while let Some(frame) = queue.recv().await {
                let closing = matches!(frame, Frame::Close { .. });
                if let Err(e) = writer.write_frame(&frame).await {
                    debug!("{} write failed: {}", connection, e);
                    break;
                }
                if closing {
                    break;
                }
            }
            if let Err(e) = writer.shutdown().await {
                debug!("{} shutdown failed: {}", connection, e);
            }
        });

        let endpoint = self.clone();
        let session_outbound = outbound.clone();
        tokio::spawn(async move {
            let reader = FrameReader::new(BufReader::new(reader));
            if let Err(e) = endpoint.run(connection, reader, session_outbound, links).await {
                warn!("{} terminated: {}", connection, e);
            }
        });

        (connection, outbound)
    }

    async fn run<R>(
        &self,
        connection: ConnectionId,
        mut reader: FrameReader<R>,
        outbound: Outbound,
        links: Vec<Frame>,
    ) -> Result<()>
    where
        R: tokio::io::AsyncBufRead + Unpin,
    {
        outbound.send(Frame::Open {
            container_id: self.container_id.clone(),
            properties: ConnectionProperties::with_product(PRODUCT_AGENT),
        })?;

        let (container_id, properties) = match reader.next_frame().await? {
            Some(Frame::Open {
                container_id,
                properties,
            }) => (container_id, properties),
            Some(other) => {
                return Err(LinkError::Protocol(format!("expected open, got {}", other.kind())));
            }
            None => return Ok(()),
        };

        let mut session = Session::open(connection, container_id, &properties, outbound, self.events.clone());
        for link in links {
            if let Err(e) = session.attach_local(link) {
                debug!("{} closed before attach: {}", connection, e);
            }
        }

        let result = loop {
            match reader.next_frame().await {
                Ok(Some(frame)) => {
                    if !session.on_frame(frame) {
                        break Ok(());
                    }
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        session.closed();
        result
    }
}

/// State of one opened connection
struct Session {
    connection: ConnectionId,
    container_id: String,
    role: PeerRole,
    outbound: Outbound,
    events: EventSender,
    management: Option<Arc<Management>>,
    local_links: HashSet<String>,
    subscriber_links: HashSet<String>,
    client_links: HashSet<String>,
}

impl Session {
    /// Classify the peer and announce it to the control plane
    fn open(
        connection: ConnectionId,
        container_id: String,
        properties: &ConnectionProperties,
        outbound: Outbound,
        events: EventSender,
    ) -> Self {
        let role = PeerRole::from_properties(properties);
        info!("{} opened by {} as {:?}", connection, container_id, role);

        let mut session = Self {
            connection,
            container_id: container_id.clone(),
            role,
            outbound: outbound.clone(),
            events,
            management: None,
            local_links: HashSet::new(),
            subscriber_links: HashSet::new(),
            client_links: HashSet::new(),
        };

        let peer = match role {
            PeerRole::Router | PeerRole::Broker => {
                let management = Arc::new(Management::new(container_id.clone(), connection, outbound));
                session.management = Some(management.clone());
                if let Err(e) = session.attach_local(Management::attach_frame()) {
                    debug!("{} closed before management attach: {}", connection, e);
                }
                if role == PeerRole::Router {
                    Peer::Router(Arc::new(RemoteRouter::new(management)))
                } else {
                    Peer::Broker(Arc::new(RemoteBroker::new(management)))
                }
            }
            PeerRole::Federation => Peer::Federation,
            PeerRole::Client => Peer::Client,
        };

        session.emit(AgentEvent::PeerOpened {
            connection,
            container_id,
            peer,
        });
        session
    }

    fn attach_local(&mut self, frame: Frame) -> Result<()> {
        if let Frame::Attach { link, .. } = &frame {
            self.local_links.insert(link.clone());
        }
        self.outbound.send(frame)
    }

    fn emit(&self, event: AgentEvent) {
        if self.events.send(event).is_err() {
            debug!("control plane gone, dropping event from {}", self.connection);
        }
    }

    fn reply(&self, frame: Frame) {
        let kind = frame.kind();
        if self.outbound.send(frame).is_err() {
            debug!("{} already closed, dropping {}", self.connection, kind);
        }
    }

    /// Returns false once the connection should be torn down
    fn on_frame(&mut self, frame: Frame) -> bool {
        match frame {
            Frame::Open { .. } => {
                warn!("{} sent a second open", self.container_id);
            }
            Frame::Attach {
                link,
                role,
                source,
                target,
            } => self.on_attach(link, role, source, target),
            Frame::Detach { link } => self.on_detach(link),
            Frame::Transfer { link, message } => {
                if link == MANAGEMENT_ADDRESS {
                    if let Some(management) = &self.management {
                        self.on_management_response(management.clone(), message);
                        return true;
                    }
                }
                self.emit(AgentEvent::MessageReceived {
                    connection: self.connection,
                    message,
                });
            }
            Frame::Close { error } => {
                match error {
                    Some(e) => warn!("{} closed with error: {}", self.container_id, e),
                    None => debug!("{} closed", self.container_id),
                }
                return false;
            }
        }
        true
    }

    fn on_attach(&mut self, link: String, role: LinkRole, source: Option<String>, target: Option<String>) {
        if self.local_links.contains(&link) {
            // peer accepted one of our links
            if link == MANAGEMENT_ADDRESS && self.role == PeerRole::Router {
                self.emit(AgentEvent::Router {
                    connection: self.connection,
                    event: agent_core::RouterEvent::Ready,
                });
            }
            return;
        }

        match (role, source.as_deref()) {
            (LinkRole::Receiver, Some(SUBJECT_ROUTERS)) => {
                let echo = Frame::Attach {
                    link: link.clone(),
                    role: LinkRole::Sender,
                    source: source.clone(),
                    target: None,
                };
                if self.outbound.send(echo).is_err() {
                    return;
                }
                self.subscriber_links.insert(link.clone());
                let sender = LinkSender::new(self.container_id.clone(), link, self.outbound.clone());
                self.emit(AgentEvent::SubscriberAttached {
                    connection: self.connection,
                    sender: Arc::new(sender),
                });
            }
            (LinkRole::Receiver, None) => {
                // dynamic source: the control plane assigns the address
                self.client_links.insert(link.clone());
                let sender = LinkSender::new(self.container_id.clone(), link, self.outbound.clone());
                self.emit(AgentEvent::ClientAttached {
                    connection: self.connection,
                    sender: Arc::new(sender),
                });
            }
            (LinkRole::Receiver, Some(other)) => {
                info!("{} attached to unknown source {}", self.container_id, other);
                self.reply(Frame::Detach { link });
            }
            (LinkRole::Sender, _) => {
                debug!("{} sending on {} to {:?}", self.container_id, link, target);
                self.reply(Frame::Attach {
                    link,
                    role: role.opposite(),
                    source: source.clone(),
                    target,
                });
            }
        }
    }

    fn on_detach(&mut self, link: String) {
        if self.subscriber_links.remove(&link) {
            self.emit(AgentEvent::SubscriberDetached {
                connection: self.connection,
            });
        } else if self.client_links.remove(&link) {
            self.emit(AgentEvent::ClientDetached {
                connection: self.connection,
            });
        }
    }

    fn on_management_response(&self, management: Arc<Management>, message: agent_api::Message) {
        let Some((pending, response)) = management.complete(message) else {
            return;
        };
        let event = match self.role {
            PeerRole::Router => AgentEvent::Router {
                connection: self.connection,
                event: pending.router_event(response),
            },
            PeerRole::Broker => AgentEvent::Broker {
                connection: self.connection,
                event: pending.broker_event(response),
            },
            _ => return,
        };
        self.emit(event);
    }

    fn closed(&self) {
        info!("{} from {} closed", self.connection, self.container_id);
        self.emit(AgentEvent::PeerClosed {
            connection: self.connection,
        });
    }
}
