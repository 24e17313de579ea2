//! Recording link doubles for unit tests

use crate::link::{BrokerLink, MessageSender, RouterLink};
use crate::{CoreError, Result};
use agent_api::{AddressDefinition, Connector, Listener, Message};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

pub fn inter_router_listener(host: &str) -> Listener {
    Listener {
        name: "inter-router".to_string(),
        host: host.to_string(),
        port: "55672".to_string(),
        role: "inter-router".to_string(),
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RouterCall {
    RetrieveListeners,
    RetrieveConnectors,
    CreateConnector(Connector),
    DeleteConnector(String),
    SyncAddresses(u64, Vec<String>),
}

#[derive(Debug, Default)]
pub struct MockRouterLink {
    calls: Mutex<Vec<RouterCall>>,
    fail_connectors: AtomicBool,
    closed: AtomicBool,
}

impl MockRouterLink {
    pub fn failing_connectors() -> Self {
        let link = Self::default();
        link.fail_connectors.store(true, Ordering::SeqCst);
        link
    }

    pub fn calls(&self) -> Vec<RouterCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn created(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RouterCall::CreateConnector(connector) => Some(connector.name),
                _ => None,
            })
            .collect()
    }

    pub fn synced(&self) -> Vec<(u64, Vec<String>)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RouterCall::SyncAddresses(generation, names) => Some((generation, names)),
                _ => None,
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn record(&self, call: RouterCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl RouterLink for MockRouterLink {
    fn retrieve_listeners(&self) -> Result<()> {
        self.record(RouterCall::RetrieveListeners);
        Ok(())
    }

    fn retrieve_connectors(&self) -> Result<()> {
        self.record(RouterCall::RetrieveConnectors);
        Ok(())
    }

    fn create_connector(&self, connector: &Connector) -> Result<()> {
        self.record(RouterCall::CreateConnector(connector.clone()));
        if self.fail_connectors.load(Ordering::SeqCst) {
            return Err(CoreError::LinkClosed("mock router".to_string()));
        }
        Ok(())
    }

    fn delete_connector(&self, name: &str) -> Result<()> {
        self.record(RouterCall::DeleteConnector(name.to_string()));
        if self.fail_connectors.load(Ordering::SeqCst) {
            return Err(CoreError::LinkClosed("mock router".to_string()));
        }
        Ok(())
    }

    fn sync_addresses(&self, generation: u64, addresses: &[AddressDefinition]) -> Result<()> {
        let names = addresses.iter().map(|a| a.address.clone()).collect();
        self.record(RouterCall::SyncAddresses(generation, names));
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub struct MockBrokerLink {
    syncs: Mutex<Vec<(u64, Vec<String>)>>,
    closed: AtomicBool,
}

impl MockBrokerLink {
    pub fn synced(&self) -> Vec<(u64, Vec<String>)> {
        self.syncs.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl BrokerLink for MockBrokerLink {
    fn sync_addresses(&self, generation: u64, addresses: &[AddressDefinition]) -> Result<()> {
        let names = addresses.iter().map(|a| a.address.clone()).collect();
        self.syncs.lock().unwrap().push((generation, names));
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub struct MockSender {
    source: Mutex<Option<String>>,
    sent: Mutex<Vec<Message>>,
}

impl MockSender {
    pub fn source(&self) -> Option<String> {
        self.source.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }
}

impl MessageSender for MockSender {
    fn set_source(&self, address: &str) -> Result<()> {
        *self.source.lock().unwrap() = Some(address.to_string());
        Ok(())
    }

    fn send(&self, message: Message) -> Result<()> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}
