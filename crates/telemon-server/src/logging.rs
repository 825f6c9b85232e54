use axum::{
    body::{Body, HttpBody},
    extract::Request,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use crate::api::error_response;
use rand::Rng;
use std::fmt::Write;
use std::time::Instant;

/// Trace id assigned to a request, stored in its extensions.
#[derive(Clone)]
pub struct TraceId(pub String);

impl std::ops::Deref for TraceId {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub const TRACE_ID_HEADER: &str = "X-Trace-Id";

/// 16 hex characters from 8 random bytes.
fn generate_trace_id() -> String {
    let bytes: [u8; 8] = rand::thread_rng().gen();
    let mut s = String::with_capacity(16);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

const MAX_BODY_LOG_CHARS: usize = 200;

/// Request bodies above this size, or of unknown size, are passed through
/// without being buffered for logging.
const MAX_LOGGED_REQUEST_BYTES: u64 = 1024 * 1024;

/// Truncates to at most `max` bytes on a char boundary.
fn truncate_body(bytes: &[u8], max: usize) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) if s.len() > max => {
            let mut end = max;
            while end > 0 && !s.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &s[..end])
        }
        Ok(s) => s.to_string(),
        Err(_) => "<non-utf8 body>".to_string(),
    }
}

fn format_elapsed(elapsed_us: u128) -> String {
    if elapsed_us < 1000 {
        format!("{elapsed_us}µs")
    } else if elapsed_us < 1_000_000 {
        format!("{}ms", elapsed_us / 1000)
    } else {
        format!("{:.1}s", elapsed_us as f64 / 1_000_000.0)
    }
}

/// Compressed bodies are logged as a size only.
fn is_encoded(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| !v.eq_ignore_ascii_case("identity"))
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("application/json"))
}

/// Request/response logging middleware.
pub async fn request_logging(mut req: Request, next: Next) -> Response {
    let trace_id = generate_trace_id();
    req.extensions_mut().insert(TraceId(trace_id.clone()));

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let real_ip = req
        .headers()
        .get(telemon_common::security::REAL_IP_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    let has_body = method == axum::http::Method::POST;
    let (req, req_body_snippet) = if has_body {
        let encoded = is_encoded(req.headers());
        let (parts, body) = req.into_parts();
        match body.size_hint().upper() {
            Some(len) if len <= MAX_LOGGED_REQUEST_BYTES => {
                match axum::body::to_bytes(body, len as usize).await {
                    Ok(body_bytes) => {
                        let snippet = if body_bytes.is_empty() {
                            String::new()
                        } else if encoded {
                            format!("<{} encoded bytes>", body_bytes.len())
                        } else {
                            truncate_body(&body_bytes, MAX_BODY_LOG_CHARS)
                        };
                        (Request::from_parts(parts, Body::from(body_bytes)), snippet)
                    }
                    Err(e) => {
                        tracing::warn!(trace_id = %trace_id, error = %e, "Failed to read request body");
                        return error_response(
                            StatusCode::BAD_REQUEST,
                            &trace_id,
                            "bad_request",
                            "failed to read request body",
                        );
                    }
                }
            }
            Some(len) => (
                Request::from_parts(parts, body),
                format!("<{len} bytes, not logged>"),
            ),
            None => (
                Request::from_parts(parts, body),
                "<streamed body, not logged>".to_string(),
            ),
        }
    } else {
        (req, String::new())
    };

    if req_body_snippet.is_empty() {
        tracing::info!(
            trace_id = %trace_id,
            method = %method,
            path = %path,
            real_ip = %real_ip,
            "--> request"
        );
    } else {
        tracing::info!(
            trace_id = %trace_id,
            method = %method,
            path = %path,
            real_ip = %real_ip,
            body = %req_body_snippet,
            "--> request"
        );
    }

    let start = Instant::now();
    let response = next.run(req).await;
    let elapsed = format_elapsed(start.elapsed().as_micros());
    let status = response.status();

    let (parts, body) = response.into_parts();
    let body_bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .unwrap_or_default();

    let body_snippet =
        if is_json(&parts.headers) && !is_encoded(&parts.headers) && !body_bytes.is_empty() {
            truncate_body(&body_bytes, MAX_BODY_LOG_CHARS)
        } else {
            String::new()
        };

    let status_code = status.as_u16();
    if status.is_server_error() {
        tracing::error!(
            trace_id = %trace_id,
            status = status_code,
            elapsed = %elapsed,
            body = %body_snippet,
            "<-- response"
        );
    } else if status.is_client_error() {
        tracing::warn!(
            trace_id = %trace_id,
            status = status_code,
            elapsed = %elapsed,
            body = %body_snippet,
            "<-- response"
        );
    } else if body_snippet.is_empty() {
        tracing::info!(
            trace_id = %trace_id,
            status = status_code,
            elapsed = %elapsed,
            "<-- response"
        );
    } else {
        tracing::info!(
            trace_id = %trace_id,
            status = status_code,
            elapsed = %elapsed,
            body = %body_snippet,
            "<-- response"
        );
    }

    let mut response = Response::from_parts(parts, Body::from(body_bytes));
    if let Ok(val) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(TRACE_ID_HEADER, val);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_ids_are_16_hex_chars() {
        let id = generate_trace_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, generate_trace_id());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "ééééé";
        assert_eq!(truncate_body(text.as_bytes(), 3), "é...");
        assert_eq!(truncate_body(b"short", 10), "short");
        assert_eq!(truncate_body(&[0xff, 0xfe], 10), "<non-utf8 body>");
    }

    #[test]
    fn elapsed_units() {
        assert_eq!(format_elapsed(999), "999µs");
        assert_eq!(format_elapsed(12_345), "12ms");
        assert_eq!(format_elapsed(2_500_000), "2.5s");
    }
}
