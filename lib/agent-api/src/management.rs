//! Management operations issued to routers and brokers

use crate::{AddressDefinition, Connector, Listener};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum ManagementRequest {
    QueryListeners,
    QueryConnectors,
    CreateConnector { connector: Connector },
    DeleteConnector { name: String },
    /// Reconcile the peer's address configuration to exactly this set
    SyncAddresses { addresses: Vec<AddressDefinition> },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ManagementResponse {
    Listeners { listeners: Vec<Listener> },
    Connectors { connectors: Vec<Connector> },
    /// Address names the peer reports after applying a sync
    Addresses { addresses: Vec<String> },
    Ok,
    Error { description: String },
}

impl ManagementRequest {
    pub fn operation(&self) -> &'static str {
        match self {
            ManagementRequest::QueryListeners => "query_listeners",
            ManagementRequest::QueryConnectors => "query_connectors",
            ManagementRequest::CreateConnector { .. } => "create_connector",
            ManagementRequest::DeleteConnector { .. } => "delete_connector",
            ManagementRequest::SyncAddresses { .. } => "sync_addresses",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_is_tagged_by_operation() {
        let request = ManagementRequest::DeleteConnector {
            name: "r2".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"operation": "delete_connector", "name": "r2"})
        );
        assert_eq!(request.operation(), "delete_connector");
    }

    #[test]
    fn test_response_decodes_error() {
        let response: ManagementResponse =
            serde_json::from_value(json!({"status": "error", "description": "boom"})).unwrap();
        assert_eq!(
            response,
            ManagementResponse::Error {
                description: "boom".to_string()
            }
        );
    }
}
