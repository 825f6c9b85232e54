//! Network delivery of metric DTOs to the server.

pub mod grpc;
pub mod http;

pub use grpc::GrpcTransport;
pub use http::HttpTransport;

use async_trait::async_trait;
use telemon_common::dto::MetricDto;
use telemon_common::retry::{is_transient_io, Transient};
use telemon_common::security::SecurityError;

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("failed to encode payload: {0}")]
    Encode(String),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server responded with {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("rpc failed: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("rpc channel error: {0}")]
    Channel(#[from] tonic::transport::Error),

    #[error(transparent)]
    Security(#[from] SecurityError),
}

impl Transient for SendError {
    fn is_transient(&self) -> bool {
        match self {
            SendError::Http(e) => e.is_connect() || e.is_timeout() || is_transient_io(e),
            SendError::Rpc(status) => status.is_transient(),
            SendError::Channel(e) => is_transient_io(e),
            SendError::Encode(_) | SendError::Rejected { .. } | SendError::Security(_) => false,
        }
    }
}

/// A way of delivering metrics to the server.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send_one(&self, metric: &MetricDto) -> Result<(), SendError>;

    async fn send_batch(&self, metrics: &[MetricDto]) -> Result<(), SendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(SendError::Rpc(tonic::Status::unavailable("down")).is_transient());
        assert!(!SendError::Rpc(tonic::Status::permission_denied("subnet")).is_transient());
        assert!(!SendError::Encode("bad".into()).is_transient());
        assert!(!SendError::Rejected {
            status: 400,
            body: "bad".into()
        }
        .is_transient());
    }
}
