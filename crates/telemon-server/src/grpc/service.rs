use crate::state::AppState;
use crate::usecase::{self, UsecaseError};
use prost::Message;
use telemon_common::dto::MetricDto;
use telemon_common::proto::metric_service_server::MetricService;
use telemon_common::proto::{
    EncryptedRequest, GetMetricValueRequest, GetMetricValueResponse, ListMetricsRequest,
    ListMetricsResponse, MetricProto, PingRequest, PingResponse, UpdateMetricValueRequest,
    UpdateMetricValueResponse, UpdateMetricsRequest, UpdateMetricsResponse,
};
use telemon_common::security::decrypt_oaep_chunked;
use telemon_common::types::{Metric, RawValue};
use telemon_storage::StorageError;
use tonic::{Request, Response, Status};

pub struct MetricServiceImpl {
    state: AppState,
}

impl MetricServiceImpl {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    async fn apply_update(
        &self,
        message: UpdateMetricValueRequest,
    ) -> Result<UpdateMetricValueResponse, Status> {
        let metric = usecase::update_metric_by_value(
            self.state.storage.as_ref(),
            &message.kind,
            &message.name,
            RawValue::Text(message.value),
        )
        .await
        .map_err(to_status)?;
        self.state.after_update().await;
        Ok(UpdateMetricValueResponse {
            value: metric.value().to_string(),
        })
    }
}

fn to_status(err: UsecaseError) -> Status {
    match err {
        UsecaseError::Invalid(msg) => Status::invalid_argument(msg),
        UsecaseError::NotFound { .. } => Status::not_found(err.to_string()),
        UsecaseError::Storage(e) => {
            tracing::error!(error = %e, "Storage failure");
            Status::internal("storage failure")
        }
    }
}

fn to_proto(metric: &Metric) -> MetricProto {
    MetricProto::from(&MetricDto::from(metric))
}

#[tonic::async_trait]
impl MetricService for MetricServiceImpl {
    async fn update_metric_value(
        &self,
        request: Request<UpdateMetricValueRequest>,
    ) -> Result<Response<UpdateMetricValueResponse>, Status> {
        let response = self.apply_update(request.into_inner()).await?;
        Ok(Response::new(response))
    }

    async fn update_metric_value_encrypted(
        &self,
        request: Request<EncryptedRequest>,
    ) -> Result<Response<UpdateMetricValueResponse>, Status> {
        let Some(key) = self.state.private_key.as_deref() else {
            return Err(Status::failed_precondition(
                "encrypted updates are not configured on this server",
            ));
        };
        let payload = request.into_inner().payload;
        let plaintext = decrypt_oaep_chunked(key, &payload).map_err(|e| {
            tracing::warn!(error = %e, "Failed to decrypt update");
            Status::invalid_argument(format!("cannot decrypt payload: {e}"))
        })?;
        let message = UpdateMetricValueRequest::decode(plaintext.as_slice())
            .map_err(|e| Status::invalid_argument(format!("cannot decode payload: {e}")))?;
        let response = self.apply_update(message).await?;
        Ok(Response::new(response))
    }

    async fn update_metrics(
        &self,
        request: Request<UpdateMetricsRequest>,
    ) -> Result<Response<UpdateMetricsResponse>, Status> {
        let dtos = request
            .into_inner()
            .metrics
            .into_iter()
            .map(MetricDto::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        if dtos.is_empty() {
            return Err(Status::invalid_argument("batch must not be empty"));
        }

        let metrics = usecase::update_metrics(self.state.storage.as_ref(), &dtos)
            .await
            .map_err(to_status)?;
        self.state.after_update().await;
        tracing::debug!(count = metrics.len(), "Batch applied");
        Ok(Response::new(UpdateMetricsResponse {
            metrics: metrics.iter().map(to_proto).collect(),
        }))
    }

    async fn get_metric_value(
        &self,
        request: Request<GetMetricValueRequest>,
    ) -> Result<Response<GetMetricValueResponse>, Status> {
        let message = request.into_inner();
        let metric = usecase::get_metric(self.state.storage.as_ref(), &message.kind, &message.name)
            .await
            .map_err(to_status)?;
        Ok(Response::new(GetMetricValueResponse {
            value: metric.value().to_string(),
        }))
    }

    async fn list_metrics(
        &self,
        _request: Request<ListMetricsRequest>,
    ) -> Result<Response<ListMetricsResponse>, Status> {
        let metrics = usecase::list_metrics(self.state.storage.as_ref())
            .await
            .map_err(to_status)?;
        Ok(Response::new(ListMetricsResponse {
            metrics: metrics.iter().map(to_proto).collect(),
        }))
    }

    async fn ping(&self, _request: Request<PingRequest>) -> Result<Response<PingResponse>, Status> {
        match self.state.storage.ping().await {
            Ok(()) => Ok(Response::new(PingResponse {})),
            Err(StorageError::Unsupported(_)) => Err(Status::unimplemented(
                "storage backend has no liveness check",
            )),
            Err(e) => {
                tracing::error!(error = %e, "Storage ping failed");
                Err(Status::internal("storage unavailable"))
            }
        }
    }
}
