use super::{SendError, Transport};
use crate::config::AgentConfig;
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use serde::Serialize;
use std::io::Write;
use telemon_common::dto::MetricDto;
use telemon_common::security::{sign_base64, REAL_IP_HEADER, SIGNATURE_HEADER};

/// JSON over HTTP: gzip-compressed bodies, HMAC-signed when a key is set.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    signing_key: Option<Vec<u8>>,
    client_ip: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &AgentConfig) -> Result<Self, SendError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: config.server_url(),
            signing_key: config.signing_key().map(<[u8]>::to_vec),
            client_ip: config.client_ip.clone(),
        })
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, payload: &T) -> Result<(), SendError> {
        let body = encode_gzip_json(payload)?;
        let mut request = self
            .client
            .post(format!("{}{path}", self.base_url))
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, "gzip");
        if let Some(key) = &self.signing_key {
            request = request.header(SIGNATURE_HEADER, sign_base64(&body, key)?);
        }
        if let Some(ip) = &self.client_ip {
            request = request.header(REAL_IP_HEADER, ip);
        }

        let response = request.body(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SendError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

pub(crate) fn encode_gzip_json<T: Serialize + ?Sized>(payload: &T) -> Result<Vec<u8>, SendError> {
    let json = serde_json::to_vec(payload).map_err(|e| SendError::Encode(e.to_string()))?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .map_err(|e| SendError::Encode(e.to_string()))?;
    encoder.finish().map_err(|e| SendError::Encode(e.to_string()))
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_one(&self, metric: &MetricDto) -> Result<(), SendError> {
        self.post("/update/", metric).await
    }

    async fn send_batch(&self, metrics: &[MetricDto]) -> Result<(), SendError> {
        self.post("/updates/", metrics).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::Router;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use std::sync::Arc;
    use telemon_common::security::verify_base64;
    use telemon_common::types::MetricKind;
    use tokio::sync::Mutex;

    type Captured = Arc<Mutex<Vec<(HeaderMap, Bytes)>>>;

    async fn spawn_server(status: StatusCode) -> (String, Captured) {
        let captured: Captured = Arc::default();
        let sink = captured.clone();
        let handler = move |headers: HeaderMap, body: Bytes| {
            let sink = sink.clone();
            async move {
                sink.lock().await.push((headers, body));
                status
            }
        };
        let app = Router::new()
            .route("/update/", post(handler.clone()))
            .route("/updates/", post(handler));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr.to_string(), captured)
    }

    fn transport(addr: &str, key: Option<&str>) -> HttpTransport {
        let config = AgentConfig {
            server_address: addr.to_string(),
            signing_key: key.map(str::to_string),
            client_ip: Some("10.0.0.7".to_string()),
            ..AgentConfig::default()
        };
        HttpTransport::new(&config).unwrap()
    }

    fn gunzip(body: &[u8]) -> String {
        let mut out = String::new();
        GzDecoder::new(body).read_to_string(&mut out).unwrap();
        out
    }

    #[tokio::test]
    async fn single_update_is_gzipped_and_signed() {
        let (addr, captured) = spawn_server(StatusCode::OK).await;
        let dto = MetricDto {
            id: "PollCount".into(),
            kind: MetricKind::Counter,
            delta: Some(3),
            value: None,
        };
        transport(&addr, Some("k1")).send_one(&dto).await.unwrap();

        let requests = captured.lock().await;
        let (headers, body) = &requests[0];
        assert_eq!(headers["content-encoding"], "gzip");
        assert_eq!(headers["content-type"], "application/json");
        assert_eq!(headers["x-real-ip"], "10.0.0.7");
        let signature = headers[SIGNATURE_HEADER].to_str().unwrap();
        assert!(verify_base64(body, b"k1", signature).is_ok());
        assert_eq!(
            gunzip(body),
            r#"{"id":"PollCount","type":"counter","delta":3}"#
        );
    }

    #[tokio::test]
    async fn batch_goes_to_updates_without_signature() {
        let (addr, captured) = spawn_server(StatusCode::OK).await;
        let batch = vec![
            MetricDto {
                id: "a".into(),
                kind: MetricKind::Gauge,
                delta: None,
                value: Some(1.5),
            },
            MetricDto {
                id: "b".into(),
                kind: MetricKind::Counter,
                delta: Some(1),
                value: None,
            },
        ];
        transport(&addr, None).send_batch(&batch).await.unwrap();

        let requests = captured.lock().await;
        let (headers, body) = &requests[0];
        assert!(headers.get(SIGNATURE_HEADER).is_none());
        let decoded: Vec<MetricDto> = serde_json::from_str(&gunzip(body)).unwrap();
        assert_eq!(decoded, batch);
    }

    #[tokio::test]
    async fn rejection_is_permanent() {
        use telemon_common::retry::Transient;

        let (addr, _captured) = spawn_server(StatusCode::BAD_REQUEST).await;
        let dto = MetricDto::query(MetricKind::Gauge, "x");
        let err = transport(&addr, None).send_one(&dto).await.unwrap_err();
        assert!(matches!(err, SendError::Rejected { status: 400, .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn refused_connection_is_transient() {
        use telemon_common::retry::Transient;

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let dto = MetricDto::query(MetricKind::Gauge, "x");
        let err = transport(&addr, None).send_one(&dto).await.unwrap_err();
        assert!(err.is_transient(), "{err}");
    }
}
