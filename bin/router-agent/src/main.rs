use agent_core::{AgentMetrics, AgentOptions, ControlPlane, CoreError, StableExpectation, StatusHandle};
use agent_discovery::{AddressSource, DiscoveryClient, PodWatcher};
use agent_link::tls::client_config;
use agent_link::{AgentListener, CertificateMaterial, ConnectionIds, Dialer, Endpoint, ListenerConfig};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod health;
mod siblings;

use config::AgentConfig;
use siblings::LinkDialer;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = AgentConfig::from_env()?;
    info!("Starting router-agent {}...", config.container_id);

    let metrics = AgentMetrics::new()?;
    let (events, rx) = mpsc::unbounded_channel();
    let plane = ControlPlane::new(
        AgentOptions {
            container_id: config.container_id.clone(),
            disable_connectivity: config.disable_connectivity,
        },
        metrics.clone(),
    );
    let status = plane.status();
    tokio::spawn(plane.run(rx));

    let endpoint = Endpoint::new(config.container_id.clone(), events.clone(), ConnectionIds::default());
    let listener_config = ListenerConfig {
        port: config.amqp_port,
        cert_dir: config.cert_dir.clone(),
    };
    let listener = AgentListener::bind(&listener_config, endpoint.clone()).await?;
    tokio::spawn(async move {
        if let Err(e) = listener.run().await {
            error!("Peer listener error: {}", e);
        }
    });

    if let Some(port) = config.health_port {
        let status = status.clone();
        let metrics = metrics.clone();
        tokio::spawn(async move {
            if let Err(e) = health::serve(port, status, metrics).await {
                error!("Health server error: {}", e);
            }
        });
    }

    let client = DiscoveryClient::new(config.namespace.clone()).await?;
    info!("Kubernetes client initialized for namespace {}", config.namespace);

    let source = AddressSource::new(client.clone(), config.address_config_selector.clone());
    let source_events = events.clone();
    tokio::spawn(async move {
        if let Err(e) = source.run(source_events).await {
            error!("Address source error: {}", e);
        }
    });

    let dialer = sibling_dialer(&config, endpoint);
    let pods = PodWatcher::new(
        client,
        config.agent_pod_selector.clone(),
        config.agent_port_name.clone(),
        config.container_id.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = pods.run(Arc::new(LinkDialer(dialer))).await {
            error!("Sibling watch error: {}", e);
        }
    });

    tokio::spawn(log_when_stable(status, config.stable_timeout));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting...");

    Ok(())
}

/// Install the fmt subscriber; `LOG_FORMAT=json` selects JSON output
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Dial siblings over TLS when a CA bundle is available, plain otherwise
fn sibling_dialer(config: &AgentConfig, endpoint: Endpoint) -> Dialer {
    let dialer = Dialer::new(endpoint);
    let Some(dir) = config.cert_dir.as_ref() else {
        return dialer;
    };
    let ca = match CertificateMaterial::load(dir) {
        Ok(material) => material.ca,
        Err(e) => {
            warn!("Failed to load certificates for sibling connections: {}", e);
            None
        }
    };
    match ca.map(|pem| client_config(&pem)) {
        Some(Ok(tls)) => dialer.with_tls(tls),
        Some(Err(e)) => {
            warn!("Invalid CA bundle, dialling siblings without TLS: {}", e);
            dialer
        }
        None => dialer,
    }
}

async fn log_when_stable(status: StatusHandle, timeout: Option<Duration>) {
    match status.wait_for_stable(StableExpectation::new(), timeout).await {
        Ok(current) => info!(
            "Fleet stable: {} addresses, {} routers, {} brokers",
            current.addresses, current.routers, current.brokers
        ),
        Err(CoreError::StableTimeout(current)) => warn!("Fleet not stable in time: {:?}", current),
        Err(e) => warn!("Stopped waiting for a stable fleet: {}", e),
    }
}
