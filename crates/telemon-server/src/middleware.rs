use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderValue, Method, Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use telemon_common::security::{
    sign_base64, verify_base64, SecurityError, REAL_IP_HEADER, SIGNATURE_HEADER,
};

use crate::api::error_response;
use crate::logging::TraceId;
use crate::state::AppState;

/// Largest request body accepted for signature verification.
const MAX_SIGNED_BODY_BYTES: usize = 8 * 1024 * 1024;

fn trace_id_of<B>(req: &Request<B>) -> String {
    req.extensions()
        .get::<TraceId>()
        .map(|t| t.0.clone())
        .unwrap_or_default()
}

/// Rejects ingestion calls whose `X-Real-IP` is missing, unparsable or
/// outside the trusted subnet. Passes everything through when no subnet is
/// configured.
pub async fn require_trusted_subnet(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(subnet) = state.trusted_subnet.as_deref() else {
        return next.run(req).await;
    };

    let client_ip = req
        .headers()
        .get(REAL_IP_HEADER)
        .and_then(|v| v.to_str().ok());

    match subnet.check(client_ip) {
        Ok(_) => next.run(req).await,
        Err(e) => {
            let trace_id = trace_id_of(&req);
            tracing::warn!(
                trace_id = %trace_id,
                subnet = %subnet,
                error = %e,
                "Request rejected by trusted subnet check"
            );
            error_response(StatusCode::FORBIDDEN, &trace_id, "forbidden", &e.to_string())
        }
    }
}

/// Verifies `HashSHA256` over the raw request body, before any
/// decompression. With a key configured, every POST must be signed.
pub async fn verify_signature(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(key) = state.signing_key.clone() else {
        return next.run(req).await;
    };
    if req.method() != Method::POST {
        return next.run(req).await;
    }

    let trace_id = trace_id_of(&req);
    let header = req
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let Some(header) = header else {
        tracing::warn!(trace_id = %trace_id, "Request rejected: missing signature");
        return error_response(
            StatusCode::UNAUTHORIZED,
            &trace_id,
            "unauthorized",
            "missing HashSHA256 header",
        );
    };

    let (parts, body) = req.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_SIGNED_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &trace_id,
                "bad_request",
                &format!("unreadable body: {e}"),
            );
        }
    };

    match verify_base64(&bytes, &key, &header) {
        Ok(()) => next.run(Request::from_parts(parts, Body::from(bytes))).await,
        Err(SecurityError::MalformedSignature) => error_response(
            StatusCode::BAD_REQUEST,
            &trace_id,
            "bad_request",
            "HashSHA256 header is not valid base64",
        ),
        Err(e) => {
            tracing::warn!(trace_id = %trace_id, error = %e, "Request rejected: bad signature");
            error_response(
                StatusCode::UNAUTHORIZED,
                &trace_id,
                "unauthorized",
                "signature mismatch",
            )
        }
    }
}

/// Adds `HashSHA256` over JSON response bodies when a key is configured.
/// Runs inside the compression layer, so the digest covers the plain JSON.
pub async fn sign_response(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let response = next.run(req).await;
    let Some(key) = state.signing_key.as_deref() else {
        return response;
    };
    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));
    if !is_json {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = %e, "Failed to buffer response for signing");
            return Response::from_parts(parts, Body::empty());
        }
    };
    match sign_base64(&bytes, key).map(|sig| HeaderValue::from_str(&sig)) {
        Ok(Ok(value)) => {
            parts.headers.insert(SIGNATURE_HEADER, value);
        }
        Ok(Err(e)) => tracing::error!(error = %e, "Signature is not a valid header value"),
        Err(e) => tracing::error!(error = %e, "Failed to sign response"),
    }
    Response::from_parts(parts, Body::from(bytes))
}
