use crate::status::FleetStatus;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Link closed: {0}")]
    LinkClosed(String),

    #[error("Router {router} not ready: {reason}")]
    NotReady { router: String, reason: String },

    #[error("Timed out waiting for stable state, last status: {0:?}")]
    StableTimeout(FleetStatus),

    #[error("Status tracker closed")]
    StatusClosed,

    #[error("API error: {0}")]
    ApiError(#[from] agent_api::ApiError),

    #[error("Metrics error: {0}")]
    MetricsError(#[from] prometheus::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}
