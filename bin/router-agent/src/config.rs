//! Agent configuration read from the environment

use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq)]
pub struct AgentConfig {
    /// Container id declared to peers; also this agent's pod name
    pub container_id: String,
    pub namespace: String,
    pub amqp_port: Option<u16>,
    pub health_port: Option<u16>,
    pub cert_dir: Option<PathBuf>,
    pub address_config_selector: String,
    pub agent_pod_selector: String,
    pub agent_port_name: String,
    pub disable_connectivity: bool,
    pub stable_timeout: Option<Duration>,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup; empty values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let string = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        Ok(Self {
            container_id: string("HOSTNAME", "router-agent"),
            namespace: string("NAMESPACE", "default"),
            amqp_port: parse_port("AMQP_PORT", get("AMQP_PORT"))?,
            health_port: parse_port("HEALTH_PORT", get("HEALTH_PORT"))?,
            cert_dir: get("CERT_DIR").map(PathBuf::from),
            address_config_selector: string("ADDRESS_CONFIG_SELECTOR", "type=address-config"),
            agent_pod_selector: string("AGENT_POD_SELECTOR", "name=admin"),
            agent_port_name: string("AGENT_PORT_NAME", "ragent"),
            disable_connectivity: parse_bool("DISABLE_CONNECTIVITY", get("DISABLE_CONNECTIVITY"))?,
            stable_timeout: get("STABLE_TIMEOUT_SECS")
                .map(|v| {
                    v.trim()
                        .parse::<u64>()
                        .map(Duration::from_secs)
                        .map_err(|e| anyhow!("Invalid STABLE_TIMEOUT_SECS {:?}: {}", v, e))
                })
                .transpose()?,
        })
    }
}

fn parse_port(key: &str, value: Option<String>) -> Result<Option<u16>> {
    value
        .map(|v| {
            v.trim()
                .parse::<u16>()
                .map_err(|e| anyhow!("Invalid {} {:?}: {}", key, v, e))
        })
        .transpose()
}

fn parse_bool(key: &str, value: Option<String>) -> Result<bool> {
    match value.as_deref().map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        None => Ok(false),
        Some("true" | "1" | "yes") => Ok(true),
        Some("false" | "0" | "no") => Ok(false),
        Some(other) => Err(anyhow!("Invalid {} {:?}: expected true or false", key, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AgentConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AgentConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.container_id, "router-agent");
        assert_eq!(config.namespace, "default");
        assert_eq!(config.amqp_port, None);
        assert_eq!(config.health_port, None);
        assert_eq!(config.cert_dir, None);
        assert_eq!(config.address_config_selector, "type=address-config");
        assert_eq!(config.agent_pod_selector, "name=admin");
        assert_eq!(config.agent_port_name, "ragent");
        assert!(!config.disable_connectivity);
        assert_eq!(config.stable_timeout, None);
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("HOSTNAME", "admin-0"),
            ("AMQP_PORT", "5671"),
            ("HEALTH_PORT", "8080"),
            ("CERT_DIR", "/etc/agent-certs"),
            ("DISABLE_CONNECTIVITY", "TRUE"),
            ("STABLE_TIMEOUT_SECS", "30"),
        ])
        .unwrap();
        assert_eq!(config.container_id, "admin-0");
        assert_eq!(config.amqp_port, Some(5671));
        assert_eq!(config.health_port, Some(8080));
        assert_eq!(config.cert_dir, Some(PathBuf::from("/etc/agent-certs")));
        assert!(config.disable_connectivity);
        assert_eq!(config.stable_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_empty_values_count_as_unset() {
        let config = config(&[("HOSTNAME", ""), ("CERT_DIR", "  ")]).unwrap();
        assert_eq!(config.container_id, "router-agent");
        assert_eq!(config.cert_dir, None);
    }

    #[test]
    fn test_invalid_values_are_errors() {
        assert!(config(&[("AMQP_PORT", "70000")]).is_err());
        assert!(config(&[("HEALTH_PORT", "http")]).is_err());
        assert!(config(&[("DISABLE_CONNECTIVITY", "maybe")]).is_err());
        assert!(config(&[("STABLE_TIMEOUT_SECS", "-1")]).is_err());
    }
}
