//! HTTP health, readiness and metrics endpoints

use agent_core::{AgentMetrics, StatusHandle};
use anyhow::Result;
use http_body_util::Full;
use hyper::{
    body::Bytes,
    header::{HeaderValue, CONTENT_TYPE},
    server::conn::http1,
    service::service_fn,
    Method, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Serve health endpoints on `port` until the listener fails
pub async fn serve(port: u16, status: StatusHandle, metrics: AgentMetrics) -> Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let listener = TcpListener::bind(&addr).await?;
    info!("Health server listening on {}", addr);

    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let status = status.clone();
        let metrics = metrics.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let response = route(req.method(), req.uri().path(), &status, &metrics);
                async move { Ok::<_, Infallible>(response) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Error serving health connection from {}: {}", peer_addr, e);
            }
        });
    }
}

fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

pub fn route(method: &Method, path: &str, status: &StatusHandle, metrics: &AgentMetrics) -> Response<Full<Bytes>> {
    if method != Method::GET {
        return text(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed\n");
    }

    match path {
        "/healthz" => text(StatusCode::OK, "OK\n"),
        "/readyz" => {
            if status.is_synchronized() {
                text(StatusCode::OK, "OK\n")
            } else {
                let current = status.current();
                text(
                    StatusCode::SERVICE_UNAVAILABLE,
                    format!(
                        "not synchronized: brokers={} routers={} connected={}\n",
                        current.brokers_synchronized, current.routers_synchronized, current.routers_connected
                    ),
                )
            }
        }
        "/metrics" => match metrics.gather() {
            Ok(body) => {
                let mut response = text(StatusCode::OK, body);
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; version=0.0.4"));
                response
            }
            Err(e) => {
                warn!("Failed to gather metrics: {}", e);
                text(StatusCode::INTERNAL_SERVER_ERROR, "Failed to gather metrics\n")
            }
        },
        _ => text(StatusCode::NOT_FOUND, "Not Found\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::{FleetStatus, StatusTracker};

    fn synchronized() -> FleetStatus {
        FleetStatus {
            brokers_synchronized: true,
            routers_synchronized: true,
            routers_connected: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_readiness_follows_synchronized_state() {
        let tracker = StatusTracker::new();
        let metrics = AgentMetrics::new().unwrap();
        let handle = tracker.handle();

        let response = route(&Method::GET, "/readyz", &handle, &metrics);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        tracker.on_synchronized(synchronized());
        let response = route(&Method::GET, "/readyz", &handle, &metrics);
        assert_eq!(response.status(), StatusCode::OK);

        // liveness does not depend on convergence
        tracker.refresh(FleetStatus::default());
        assert_eq!(route(&Method::GET, "/healthz", &handle, &metrics).status(), StatusCode::OK);
    }

    #[test]
    fn test_metrics_and_unknown_paths() {
        let tracker = StatusTracker::new();
        let metrics = AgentMetrics::new().unwrap();
        let handle = tracker.handle();

        let response = route(&Method::GET, "/metrics", &handle, &metrics);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "text/plain; version=0.0.4"
        );

        assert_eq!(route(&Method::GET, "/nope", &handle, &metrics).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            route(&Method::POST, "/healthz", &handle, &metrics).status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
    }
}
