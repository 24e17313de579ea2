//! Subject-addressed messages exchanged with peers

use crate::{ApiError, Result, RouterTopology};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Subject (and link source) of topology broadcasts
pub const SUBJECT_ROUTERS: &str = "routers";
/// Subject (and link target) of health-check requests
pub const SUBJECT_HEALTH_CHECK: &str = "health-check";
/// Address of the management link used to drive routers and brokers
pub const MANAGEMENT_ADDRESS: &str = "$management";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    #[serde(default)]
    pub body: Value,
}

impl Message {
    /// Topology broadcast carrying the given router map
    pub fn topology(routers: &RouterTopology) -> Result<Self> {
        Ok(Self {
            subject: Some(SUBJECT_ROUTERS.to_string()),
            body: serde_json::to_value(routers)?,
            ..Default::default()
        })
    }

    /// Response to a health-check request, correlated with the request
    pub fn health_check_response(request: &Message, result: bool) -> Self {
        Self {
            to: request.reply_to.clone(),
            correlation_id: request.correlation_id.clone(),
            body: Value::Bool(result),
            ..Default::default()
        }
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// Decode the body of a topology broadcast
    pub fn router_topology(&self) -> Result<RouterTopology> {
        Ok(serde_json::from_value(self.body.clone())?)
    }

    /// Decode the expected address names from a health-check request.
    ///
    /// The body is either a JSON-encoded string or an inline array; entries may
    /// be address names or objects with an `address` field.
    pub fn expected_addresses(&self) -> Result<BTreeSet<String>> {
        let list = match &self.body {
            Value::String(encoded) => serde_json::from_str::<Value>(encoded)?,
            other => other.clone(),
        };

        let entries = match list {
            Value::Array(entries) => entries,
            other => {
                return Err(ApiError::InvalidBody(format!(
                    "expected an address list, got {}",
                    other
                )))
            }
        };

        entries
            .into_iter()
            .map(|entry| match entry {
                Value::String(name) => Ok(name),
                Value::Object(mut fields) => match fields.remove("address") {
                    Some(Value::String(name)) => Ok(name),
                    _ => Err(ApiError::InvalidBody(
                        "address entry without an address field".to_string(),
                    )),
                },
                other => Err(ApiError::InvalidBody(format!(
                    "unexpected address entry {}",
                    other
                ))),
            })
            .collect()
    }
}
