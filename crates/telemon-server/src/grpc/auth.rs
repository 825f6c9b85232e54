use std::sync::Arc;
use telemon_common::security::{SecurityError, TrustedSubnet};
use tonic::service::Interceptor;
use tonic::{Request, Status};

/// Metadata key carrying the caller's forwarded address.
pub const REAL_IP_METADATA: &str = "x-real-ip";

/// Applies the trusted-subnet check to every RPC before it reaches the
/// service. A no-op when no subnet is configured.
#[derive(Clone, Default)]
pub struct SubnetInterceptor {
    subnet: Option<Arc<TrustedSubnet>>,
}

impl SubnetInterceptor {
    pub fn new(subnet: Option<Arc<TrustedSubnet>>) -> Self {
        Self { subnet }
    }
}

impl Interceptor for SubnetInterceptor {
    fn call(&mut self, request: Request<()>) -> Result<Request<()>, Status> {
        let Some(subnet) = &self.subnet else {
            return Ok(request);
        };
        let client_ip = request
            .metadata()
            .get(REAL_IP_METADATA)
            .and_then(|v| v.to_str().ok());
        match subnet.check(client_ip) {
            Ok(_) => Ok(request),
            Err(e) => {
                tracing::warn!(subnet = %subnet, error = %e, "RPC rejected by trusted subnet check");
                let message = match e {
                    SecurityError::MissingClientIp => "missing x-real-ip metadata".to_string(),
                    other => other.to_string(),
                };
                Err(Status::permission_denied(message))
            }
        }
    }
}
