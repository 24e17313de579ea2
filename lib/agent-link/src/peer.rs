//! Remote peer handles backing the control plane's link traits

use crate::connection::Outbound;
use crate::frame::{Frame, LinkRole};
use agent_api::message::MANAGEMENT_ADDRESS;
use agent_api::{AddressDefinition, ApiError, Connector, ManagementRequest, ManagementResponse, Message};
use agent_core::{BrokerEvent, BrokerLink, ConnectionId, CoreError, MessageSender, RouterEvent, RouterLink};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// What an outstanding management request was for
#[derive(Clone, Debug, PartialEq)]
pub enum Pending {
    Listeners,
    Connectors,
    CreateConnector(Connector),
    DeleteConnector(String),
    RouterSync(u64),
    BrokerSync(u64),
}

impl Pending {
    fn operation(&self) -> &'static str {
        match self {
            Pending::Listeners => "query_listeners",
            Pending::Connectors => "query_connectors",
            Pending::CreateConnector(_) => "create_connector",
            Pending::DeleteConnector(_) => "delete_connector",
            Pending::RouterSync(_) | Pending::BrokerSync(_) => "sync_addresses",
        }
    }

    pub fn router_event(self, response: ManagementResponse) -> RouterEvent {
        match (self, response) {
            (Pending::CreateConnector(connector), ManagementResponse::Ok) => RouterEvent::ConnectorCreated(connector),
            (Pending::CreateConnector(connector), ManagementResponse::Error { description }) => {
                RouterEvent::ConnectorFailed {
                    name: connector.name,
                    error: description,
                }
            }
            (Pending::DeleteConnector(name), ManagementResponse::Ok) => RouterEvent::ConnectorDeleted(name),
            (Pending::DeleteConnector(name), ManagementResponse::Error { description }) => RouterEvent::ConnectorFailed {
                name,
                error: description,
            },
            (Pending::Listeners, ManagementResponse::Listeners { listeners }) => RouterEvent::ListenersRetrieved(listeners),
            (Pending::Connectors, ManagementResponse::Connectors { connectors }) => {
                RouterEvent::ConnectorsRetrieved(connectors)
            }
            (Pending::RouterSync(generation), ManagementResponse::Addresses { addresses }) => RouterEvent::AddressesSynced {
                generation,
                addresses,
            },
            (pending, ManagementResponse::Error { description }) => RouterEvent::RequestFailed {
                operation: pending.operation().to_string(),
                error: description,
            },
            (pending, response) => RouterEvent::RequestFailed {
                operation: pending.operation().to_string(),
                error: format!("unexpected response {:?}", response),
            },
        }
    }

    pub fn broker_event(self, response: ManagementResponse) -> BrokerEvent {
        match (self, response) {
            (Pending::BrokerSync(generation), ManagementResponse::Ok | ManagementResponse::Addresses { .. }) => {
                BrokerEvent::AddressesSynced { generation }
            }
            (pending, ManagementResponse::Error { description }) => BrokerEvent::RequestFailed {
                operation: pending.operation().to_string(),
                error: description,
            },
            (pending, response) => BrokerEvent::RequestFailed {
                operation: pending.operation().to_string(),
                error: format!("unexpected response {:?}", response),
            },
        }
    }
}

/// Request/response correlation over a peer's `$management` link
#[derive(Debug)]
pub struct Management {
    container_id: String,
    connection: ConnectionId,
    outbound: Outbound,
    next_id: AtomicU64,
    pending: Mutex<HashMap<String, Pending>>,
}

impl Management {
    pub fn new(container_id: String, connection: ConnectionId, outbound: Outbound) -> Self {
        Self {
            container_id,
            connection,
            outbound,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Attach frame opening the management link
    pub fn attach_frame() -> Frame {
        Frame::Attach {
            link: MANAGEMENT_ADDRESS.to_string(),
            role: LinkRole::Sender,
            source: None,
            target: Some(MANAGEMENT_ADDRESS.to_string()),
        }
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<String, Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn outstanding(&self) -> usize {
        self.pending().len()
    }

    /// Send a request; its response is matched by correlation id
    pub fn request(&self, request: ManagementRequest, pending: Pending) -> agent_core::Result<()> {
        let correlation_id = format!("{}-{}", self.connection, self.next_id.fetch_add(1, Ordering::SeqCst));
        let body = serde_json::to_value(&request).map_err(ApiError::from)?;
        let message = Message {
            subject: Some(request.operation().to_string()),
            to: Some(MANAGEMENT_ADDRESS.to_string()),
            reply_to: Some(MANAGEMENT_ADDRESS.to_string()),
            correlation_id: Some(correlation_id.clone()),
            body,
        };

        debug!("{} -> {}: {}", correlation_id, self.container_id, request.operation());
        self.pending().insert(correlation_id.clone(), pending);
        let frame = Frame::Transfer {
            link: MANAGEMENT_ADDRESS.to_string(),
            message,
        };
        if self.outbound.send(frame).is_err() {
            self.pending().remove(&correlation_id);
            return Err(CoreError::LinkClosed(self.container_id.clone()));
        }
        Ok(())
    }

    /// Match a response to its request. Unknown or undecodable responses are
    /// logged and dropped.
    pub fn complete(&self, message: Message) -> Option<(Pending, ManagementResponse)> {
        let Some(correlation_id) = message.correlation_id.as_deref() else {
            warn!("Uncorrelated management message from {}", self.container_id);
            return None;
        };
        let Some(pending) = self.pending().remove(correlation_id) else {
            warn!("No request {} outstanding on {}", correlation_id, self.container_id);
            return None;
        };
        match serde_json::from_value(message.body) {
            Ok(response) => Some((pending, response)),
            Err(e) => Some((
                pending,
                ManagementResponse::Error {
                    description: format!("invalid management response: {}", e),
                },
            )),
        }
    }

    fn close(&self) {
        if self.outbound.send(Frame::Close { error: None }).is_err() {
            debug!("{} already closed", self.container_id);
        }
    }
}

#[derive(Debug)]
pub struct RemoteRouter {
    management: Arc<Management>,
}

impl RemoteRouter {
    pub fn new(management: Arc<Management>) -> Self {
        Self { management }
    }
}

impl RouterLink for RemoteRouter {
    fn retrieve_listeners(&self) -> agent_core::Result<()> {
        self.management
            .request(ManagementRequest::QueryListeners, Pending::Listeners)
    }

    fn retrieve_connectors(&self) -> agent_core::Result<()> {
        self.management
            .request(ManagementRequest::QueryConnectors, Pending::Connectors)
    }

    fn create_connector(&self, connector: &Connector) -> agent_core::Result<()> {
        self.management.request(
            ManagementRequest::CreateConnector {
                connector: connector.clone(),
            },
            Pending::CreateConnector(connector.clone()),
        )
    }

    fn delete_connector(&self, name: &str) -> agent_core::Result<()> {
        self.management.request(
            ManagementRequest::DeleteConnector {
                name: name.to_string(),
            },
            Pending::DeleteConnector(name.to_string()),
        )
    }

    fn sync_addresses(&self, generation: u64, addresses: &[AddressDefinition]) -> agent_core::Result<()> {
        self.management.request(
            ManagementRequest::SyncAddresses {
                addresses: addresses.to_vec(),
            },
            Pending::RouterSync(generation),
        )
    }

    fn close(&self) {
        self.management.close();
    }
}

#[derive(Debug)]
pub struct RemoteBroker {
    management: Arc<Management>,
}

impl RemoteBroker {
    pub fn new(management: Arc<Management>) -> Self {
        Self { management }
    }
}

impl BrokerLink for RemoteBroker {
    fn sync_addresses(&self, generation: u64, addresses: &[AddressDefinition]) -> agent_core::Result<()> {
        self.management.request(
            ManagementRequest::SyncAddresses {
                addresses: addresses.to_vec(),
            },
            Pending::BrokerSync(generation),
        )
    }

    fn close(&self) {
        self.management.close();
    }
}

/// Sending end of a link a peer attached as receiver
#[derive(Debug)]
pub struct LinkSender {
    container_id: String,
    link: String,
    outbound: Outbound,
}

impl LinkSender {
    pub fn new(container_id: String, link: String, outbound: Outbound) -> Self {
        Self {
            container_id,
            link,
            outbound,
        }
    }

    fn send_frame(&self, frame: Frame) -> agent_core::Result<()> {
        self.outbound
            .send(frame)
            .map_err(|_| CoreError::LinkClosed(self.container_id.clone()))
    }
}

impl MessageSender for LinkSender {
    fn set_source(&self, address: &str) -> agent_core::Result<()> {
        self.send_frame(Frame::Attach {
            link: self.link.clone(),
            role: LinkRole::Sender,
            source: Some(address.to_string()),
            target: None,
        })
    }

    fn send(&self, message: Message) -> agent_core::Result<()> {
        self.send_frame(Frame::Transfer {
            link: self.link.clone(),
            message,
        })
    }
}
