use crate::state::AppState;
use crate::{api, logging, middleware};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::decompression::RequestDecompressionLayer;

/// Update routes. Signature and subnet checks run on the raw body, outside
/// request decompression.
fn ingest_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/update/{kind}/{name}/{value}", post(api::update_by_path))
        .route("/update/", post(api::update_json))
        .route("/updates/", post(api::update_batch))
        .layer(RequestDecompressionLayer::new())
        .layer(from_fn_with_state(state.clone(), middleware::verify_signature))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::require_trusted_subnet,
        ))
}

fn query_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(api::index))
        .route("/value/{kind}/{name}", get(api::value_by_path))
        .route("/value/", post(api::value_json))
        .route("/ping", get(api::ping))
        .layer(RequestDecompressionLayer::new())
}

pub fn build_http_app(state: AppState) -> Router {
    ingest_routes(&state)
        .merge(query_routes())
        .layer(from_fn_with_state(state.clone(), middleware::sign_response))
        .with_state(state)
        .layer(CompressionLayer::new())
        .layer(from_fn(logging::request_logging))
}
