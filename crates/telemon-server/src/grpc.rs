pub mod auth;
pub mod service;

pub use auth::SubnetInterceptor;
pub use service::MetricServiceImpl;

use crate::state::AppState;
use telemon_common::proto::metric_service_server::MetricServiceServer;
use tonic::codec::CompressionEncoding;
use tonic::service::interceptor::InterceptedService;

/// The `MetricService` as mounted on the gRPC listener: gzip in both
/// directions, subnet check in front.
pub fn metric_service(
    state: AppState,
) -> InterceptedService<MetricServiceServer<MetricServiceImpl>, SubnetInterceptor> {
    let interceptor = SubnetInterceptor::new(state.trusted_subnet.clone());
    let server = MetricServiceServer::new(MetricServiceImpl::new(state))
        .accept_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Gzip);
    InterceptedService::new(server, interceptor)
}
