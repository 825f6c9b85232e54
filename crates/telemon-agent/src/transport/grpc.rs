use super::{SendError, Transport};
use crate::config::AgentConfig;
use async_trait::async_trait;
use prost::Message;
use rsa::RsaPublicKey;
use telemon_common::dto::MetricDto;
use telemon_common::proto::metric_service_client::MetricServiceClient;
use telemon_common::proto::{
    EncryptedRequest, MetricProto, UpdateMetricValueRequest, UpdateMetricsRequest,
};
use telemon_common::security::{encrypt_oaep_chunked, load_public_key};
use tonic::codec::CompressionEncoding;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Channel, Endpoint};
use tonic::Request;

/// gRPC delivery. Single updates are RSA-OAEP encrypted when the server's
/// public key is configured.
pub struct GrpcTransport {
    client: MetricServiceClient<Channel>,
    public_key: Option<RsaPublicKey>,
    client_ip: Option<MetadataValue<Ascii>>,
}

impl GrpcTransport {
    /// Builds a lazily connecting client; nothing is dialed until the first
    /// send.
    pub fn new(config: &AgentConfig) -> Result<Self, SendError> {
        let channel = Endpoint::from_shared(config.server_url())?
            .timeout(config.request_timeout())
            .connect_timeout(config.request_timeout())
            .connect_lazy();
        let client = MetricServiceClient::new(channel)
            .send_compressed(CompressionEncoding::Gzip)
            .accept_compressed(CompressionEncoding::Gzip);

        let public_key = config
            .public_key_path
            .as_deref()
            .map(load_public_key)
            .transpose()?;
        let client_ip = config
            .client_ip
            .as_deref()
            .map(|ip| {
                ip.parse::<MetadataValue<Ascii>>()
                    .map_err(|_| SendError::Encode(format!("invalid client_ip '{ip}'")))
            })
            .transpose()?;

        Ok(Self {
            client,
            public_key,
            client_ip,
        })
    }

    fn request<T>(&self, message: T) -> Request<T> {
        let mut request = Request::new(message);
        if let Some(ip) = &self.client_ip {
            request.metadata_mut().insert("x-real-ip", ip.clone());
        }
        request
    }
}

#[async_trait]
impl Transport for GrpcTransport {
    async fn send_one(&self, metric: &MetricDto) -> Result<(), SendError> {
        let raw = metric
            .raw_value()
            .map_err(|e| SendError::Encode(e.to_string()))?;
        let message = UpdateMetricValueRequest {
            kind: metric.kind.to_string(),
            name: metric.id.clone(),
            value: raw.to_string(),
        };

        let mut client = self.client.clone();
        match &self.public_key {
            Some(key) => {
                let payload = encrypt_oaep_chunked(key, &message.encode_to_vec())?;
                client
                    .update_metric_value_encrypted(self.request(EncryptedRequest { payload }))
                    .await?;
            }
            None => {
                client.update_metric_value(self.request(message)).await?;
            }
        }
        Ok(())
    }

    async fn send_batch(&self, metrics: &[MetricDto]) -> Result<(), SendError> {
        let message = UpdateMetricsRequest {
            metrics: metrics.iter().map(MetricProto::from).collect(),
        };
        let mut client = self.client.clone();
        client.update_metrics(self.request(message)).await?;
        Ok(())
    }
}
