//! Address definitions and broker allocation

use serde::{Deserialize, Serialize};

/// An address definition as supplied by the address source, before validation.
///
/// Every field is optional so that partially written definitions can be read
/// and then filtered out instead of failing the whole snapshot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawAddress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default)]
    pub allocated_to: Vec<Allocation>,
}

/// A validated address definition: both `address` and `type` are non-empty.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressDefinition {
    pub address: String,

    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub allocated_to: Vec<Allocation>,
}

/// Assignment of an address to one broker, identified by its container id.
///
/// Accepts either a plain identifier or an object carrying `containerId`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "AllocationRepr")]
pub struct Allocation {
    #[serde(rename = "containerId")]
    pub container_id: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AllocationRepr {
    Id(String),
    Object {
        #[serde(rename = "containerId")]
        container_id: String,
    },
}

impl From<AllocationRepr> for Allocation {
    fn from(repr: AllocationRepr) -> Self {
        match repr {
            AllocationRepr::Id(container_id) => Allocation { container_id },
            AllocationRepr::Object { container_id } => Allocation { container_id },
        }
    }
}

impl Allocation {
    pub fn new(container_id: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
        }
    }
}

impl AddressDefinition {
    /// Validate a raw definition, dropping it when `address` or `type` is missing or empty
    pub fn from_raw(raw: RawAddress) -> Option<Self> {
        let address = raw.address.filter(|a| !a.is_empty())?;
        let kind = raw.kind.filter(|k| !k.is_empty())?;
        Some(Self {
            address,
            kind,
            allocated_to: raw.allocated_to,
        })
    }

    /// Whether this address is allocated to the broker with the given id
    pub fn is_allocated_to(&self, broker_id: &str) -> bool {
        self.allocated_to
            .iter()
            .any(|a| a.container_id == broker_id)
    }
}

impl From<AddressDefinition> for RawAddress {
    fn from(def: AddressDefinition) -> Self {
        Self {
            address: Some(def.address),
            kind: Some(def.kind),
            allocated_to: def.allocated_to,
        }
    }
}
