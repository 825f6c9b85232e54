use crate::logging::TraceId;
use crate::state::AppState;
use crate::usecase::{self, UsecaseError};
use axum::body::Bytes;
use axum::extract::{Extension, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use telemon_common::dto::MetricDto;
use telemon_common::types::{Metric, MetricKind, RawValue};
use telemon_storage::StorageError;

/// Error body shared by every endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub err_code: String,
    pub err_msg: String,
    pub trace_id: String,
}

pub fn error_response(status: StatusCode, trace_id: &str, code: &'static str, msg: &str) -> Response {
    (
        status,
        Json(ApiError {
            err_code: code.to_string(),
            err_msg: msg.to_string(),
            trace_id: trace_id.to_string(),
        }),
    )
        .into_response()
}

/// Maps a usecase failure to a status with a safe message. Storage failures
/// are logged and reported without detail.
fn usecase_error_response(trace_id: &str, err: &UsecaseError) -> Response {
    match err {
        UsecaseError::Invalid(msg) => {
            error_response(StatusCode::BAD_REQUEST, trace_id, "bad_request", msg)
        }
        UsecaseError::NotFound { .. } => {
            error_response(StatusCode::NOT_FOUND, trace_id, "not_found", &err.to_string())
        }
        UsecaseError::Storage(e) => {
            tracing::error!(trace_id = %trace_id, error = %e, "Storage failure");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                trace_id,
                "storage_error",
                "storage failure",
            )
        }
    }
}

fn parse_json<T: DeserializeOwned>(trace_id: &str, body: &[u8]) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|e| {
        error_response(
            StatusCode::BAD_REQUEST,
            trace_id,
            "bad_request",
            &format!("invalid JSON body: {e}"),
        )
    })
}

fn plain_text(value: impl ToString) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        value.to_string(),
    )
        .into_response()
}

/// `POST /update/{kind}/{name}/{value}`
pub async fn update_by_path(
    State(state): State<AppState>,
    Extension(trace_id): Extension<TraceId>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> Response {
    match usecase::update_metric_by_value(
        state.storage.as_ref(),
        &kind,
        &name,
        RawValue::Text(value),
    )
    .await
    {
        Ok(metric) => {
            state.after_update().await;
            plain_text(metric.value())
        }
        Err(e) => usecase_error_response(&trace_id, &e),
    }
}

/// `POST /update/` with a single JSON DTO.
pub async fn update_json(
    State(state): State<AppState>,
    Extension(trace_id): Extension<TraceId>,
    body: Bytes,
) -> Response {
    let dto: MetricDto = match parse_json(&trace_id, &body) {
        Ok(dto) => dto,
        Err(resp) => return resp,
    };
    match usecase::update_metric(state.storage.as_ref(), &dto).await {
        Ok(metric) => {
            state.after_update().await;
            Json(MetricDto::from(&metric)).into_response()
        }
        Err(e) => usecase_error_response(&trace_id, &e),
    }
}

/// `POST /updates/` with a JSON array of DTOs.
pub async fn update_batch(
    State(state): State<AppState>,
    Extension(trace_id): Extension<TraceId>,
    body: Bytes,
) -> Response {
    let dtos: Vec<MetricDto> = match parse_json(&trace_id, &body) {
        Ok(dtos) => dtos,
        Err(resp) => return resp,
    };
    if dtos.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            &trace_id,
            "empty_batch",
            "batch must not be empty",
        );
    }
    match usecase::update_metrics(state.storage.as_ref(), &dtos).await {
        Ok(metrics) => {
            state.after_update().await;
            tracing::debug!(trace_id = %trace_id, count = metrics.len(), "Batch applied");
            Json(metrics.iter().map(MetricDto::from).collect::<Vec<_>>()).into_response()
        }
        Err(e) => usecase_error_response(&trace_id, &e),
    }
}

/// `GET /value/{kind}/{name}`
pub async fn value_by_path(
    State(state): State<AppState>,
    Extension(trace_id): Extension<TraceId>,
    Path((kind, name)): Path<(String, String)>,
) -> Response {
    match usecase::get_metric(state.storage.as_ref(), &kind, &name).await {
        Ok(metric) => plain_text(metric.value()),
        Err(e) => usecase_error_response(&trace_id, &e),
    }
}

/// Lookup body for `POST /value/`; any value fields are ignored.
#[derive(Debug, Deserialize)]
pub struct ValueQuery {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
}

/// `POST /value/`
pub async fn value_json(
    State(state): State<AppState>,
    Extension(trace_id): Extension<TraceId>,
    body: Bytes,
) -> Response {
    let query: ValueQuery = match parse_json(&trace_id, &body) {
        Ok(query) => query,
        Err(resp) => return resp,
    };
    match usecase::get_metric(state.storage.as_ref(), query.kind.as_str(), &query.id).await {
        Ok(metric) => Json(MetricDto::from(&metric)).into_response(),
        Err(e) => usecase_error_response(&trace_id, &e),
    }
}

/// `GET /ping`: 200 only when the backend supports a liveness check and it
/// passes.
pub async fn ping(
    State(state): State<AppState>,
    Extension(trace_id): Extension<TraceId>,
) -> Response {
    match state.storage.ping().await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(StorageError::Unsupported(_)) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &trace_id,
            "unsupported",
            "storage backend has no liveness check",
        ),
        Err(e) => {
            tracing::error!(trace_id = %trace_id, error = %e, "Storage ping failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "storage unavailable",
            )
        }
    }
}

/// `GET /`: every metric as an HTML table.
pub async fn index(
    State(state): State<AppState>,
    Extension(trace_id): Extension<TraceId>,
) -> Response {
    match usecase::list_metrics(state.storage.as_ref()).await {
        Ok(metrics) => Html(render_index(&metrics)).into_response(),
        Err(e) => usecase_error_response(&trace_id, &e),
    }
}

/// Names are restricted to `[a-zA-Z0-9_:]`, so nothing needs escaping.
fn render_index(metrics: &[Metric]) -> String {
    let mut html = String::from(
        "<!DOCTYPE html>\n<html>\n<head><title>Metrics</title></head>\n<body>\n<table>\n\
         <tr><th>Type</th><th>Name</th><th>Value</th></tr>\n",
    );
    for m in metrics {
        let _ = writeln!(
            html,
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
            m.kind(),
            m.name(),
            m.value()
        );
    }
    html.push_str("</table>\n</body>\n</html>\n");
    html
}
