mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{
    file_context, get, memory_context, post_empty, post_json, relational_context, request,
    RequestOpts, TestContext,
};
use flate2::read::GzDecoder;
use serde_json::json;
use std::io::Read;
use telemon_common::security::{verify_base64, TrustedSubnet, SIGNATURE_HEADER};

async fn counter_flow(ctx: &TestContext) {
    let resp = post_empty(&ctx.app, "/update/counter/requests/5").await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.text(), "5");

    let resp = post_empty(&ctx.app, "/update/counter/requests/3").await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.text(), "8");

    let resp = get(&ctx.app, "/value/counter/requests").await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.text(), "8");
}

#[tokio::test]
async fn path_updates_accumulate_counters() -> Result<()> {
    counter_flow(&memory_context()?).await;
    counter_flow(&relational_context().await?).await;
    Ok(())
}

#[tokio::test]
async fn path_updates_overwrite_gauges() -> Result<()> {
    let ctx = memory_context()?;
    post_empty(&ctx.app, "/update/gauge/Alloc/12.5").await;
    let resp = post_empty(&ctx.app, "/update/gauge/Alloc/-3").await;
    assert_eq!(resp.status, StatusCode::OK);

    let resp = get(&ctx.app, "/value/gauge/Alloc").await;
    assert_eq!(resp.text(), "-3");
    assert_eq!(
        resp.headers["content-type"].to_str()?,
        "text/plain; charset=utf-8"
    );
    Ok(())
}

#[tokio::test]
async fn path_update_error_statuses() -> Result<()> {
    let ctx = memory_context()?;

    let resp = post_empty(&ctx.app, "/update/summary/x/1").await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.json()["err_code"], "bad_request");

    let resp = post_empty(&ctx.app, "/update/counter/x/1.5").await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);

    let resp = post_empty(&ctx.app, "/update/gauge/x/abc").await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);

    let resp = post_empty(&ctx.app, "/update/counter/x").await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);

    let resp = get(&ctx.app, "/update/counter/x/1").await;
    assert_eq!(resp.status, StatusCode::METHOD_NOT_ALLOWED);

    let resp = get(&ctx.app, "/value/counter/x").await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn json_update_returns_updated_dto() -> Result<()> {
    let ctx = memory_context()?;

    let resp = post_json(
        &ctx.app,
        "/update/",
        json!({"id": "PollCount", "type": "counter", "delta": 4}),
    )
    .await;
    assert_eq!(resp.status, StatusCode::OK);

    let body = serde_json::to_vec(&json!({"id": "PollCount", "type": "counter", "delta": 6}))?;
    let resp = request(
        &ctx.app,
        "POST",
        "/update/",
        Some(body),
        RequestOpts {
            gzip: true,
            ..Default::default()
        },
    )
    .await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(
        resp.json(),
        json!({"id": "PollCount", "type": "counter", "delta": 10})
    );
    Ok(())
}

#[tokio::test]
async fn json_update_rejects_malformed_bodies() -> Result<()> {
    let ctx = memory_context()?;
    for body in [
        json!({"id": "x", "type": "counter", "value": 1.0}),
        json!({"id": "x", "type": "gauge"}),
        json!({"id": "x", "type": "timer", "value": 1.0}),
        json!({"id": "bad name", "type": "gauge", "value": 1.0}),
        json!([1, 2, 3]),
    ] {
        let resp = post_json(&ctx.app, "/update/", body.clone()).await;
        assert_eq!(resp.status, StatusCode::BAD_REQUEST, "{body}");
    }
    Ok(())
}

#[tokio::test]
async fn batch_update_applies_every_item() -> Result<()> {
    let ctx = memory_context()?;
    let resp = post_json(
        &ctx.app,
        "/updates/",
        json!([
            {"id": "PollCount", "type": "counter", "delta": 1},
            {"id": "Alloc", "type": "gauge", "value": 7.25},
            {"id": "PollCount", "type": "counter", "delta": 2}
        ]),
    )
    .await;
    assert_eq!(resp.status, StatusCode::OK);
    let items = resp.json();
    assert_eq!(items.as_array().map(Vec::len), Some(3));
    assert_eq!(items[2]["delta"], 3);

    let resp = post_json(&ctx.app, "/value/", json!({"id": "Alloc", "type": "gauge"})).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json(), json!({"id": "Alloc", "type": "gauge", "value": 7.25}));

    let resp = post_json(&ctx.app, "/value/", json!({"id": "Alloc", "type": "counter"})).await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);

    let resp = post_json(&ctx.app, "/updates/", json!([])).await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn large_batches_pass_through_request_logging() -> Result<()> {
    let items: Vec<_> = (0..20_000)
        .map(|i| json!({"id": format!("gauge_metric_{i:05}"), "type": "gauge", "value": 1.5}))
        .collect();
    let body = serde_json::to_vec(&items)?;
    assert!(body.len() > 1024 * 1024);

    let ctx = memory_context()?;
    let resp = request(
        &ctx.app,
        "POST",
        "/updates/",
        Some(body.clone()),
        RequestOpts::default(),
    )
    .await;
    assert_eq!(resp.status, StatusCode::OK, "{}", resp.text());
    assert_eq!(resp.json().as_array().map(Vec::len), Some(20_000));

    let key = b"secret".as_slice();
    let base = memory_context()?;
    let ctx = TestContext::new(base.state.clone().signing_key(key))?;
    let resp = request(
        &ctx.app,
        "POST",
        "/updates/",
        Some(body),
        RequestOpts {
            key: Some(key),
            ..Default::default()
        },
    )
    .await;
    assert_eq!(resp.status, StatusCode::OK, "{}", resp.text());
    let resp = get(&ctx.app, "/value/gauge/gauge_metric_19999").await;
    assert_eq!(resp.text(), "1.5");
    Ok(())
}

#[tokio::test]
async fn ping_reflects_backend_liveness() -> Result<()> {
    let resp = get(&memory_context()?.app, "/ping").await;
    assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);

    let resp = get(&relational_context().await?.app, "/ping").await;
    assert_eq!(resp.status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn index_lists_metrics_sorted_and_compresses() -> Result<()> {
    let ctx = memory_context()?;
    post_empty(&ctx.app, "/update/gauge/Zeta/1").await;
    post_empty(&ctx.app, "/update/gauge/Alpha/2").await;
    post_empty(&ctx.app, "/update/counter/PollCount/3").await;

    let resp = get(&ctx.app, "/").await;
    assert_eq!(resp.status, StatusCode::OK);
    assert!(resp.headers["content-type"].to_str()?.starts_with("text/html"));
    let html = resp.text();
    let poll = html.find("PollCount").unwrap_or(usize::MAX);
    let alpha = html.find("Alpha").unwrap_or(usize::MAX);
    let zeta = html.find("Zeta").unwrap_or(usize::MAX);
    assert!(poll < alpha && alpha < zeta, "{html}");

    let resp = request(
        &ctx.app,
        "GET",
        "/",
        None,
        RequestOpts {
            accept_gzip: true,
            ..Default::default()
        },
    )
    .await;
    assert_eq!(resp.headers["content-encoding"], "gzip");
    let mut decoded = String::new();
    GzDecoder::new(resp.body.as_slice()).read_to_string(&mut decoded)?;
    assert_eq!(decoded, html);
    Ok(())
}

#[tokio::test]
async fn every_response_carries_a_trace_id() -> Result<()> {
    let ctx = memory_context()?;
    let ok = get(&ctx.app, "/").await;
    let missing = get(&ctx.app, "/value/gauge/none").await;
    let ok_id = ok.trace_id().map(str::to_string);
    assert_eq!(ok_id.as_deref().map(str::len), Some(16));
    assert_eq!(missing.json()["trace_id"].as_str(), missing.trace_id());
    assert_ne!(ok_id.as_deref(), missing.trace_id());
    Ok(())
}

#[tokio::test]
async fn signed_requests_and_responses() -> Result<()> {
    let base = memory_context()?;
    let ctx = TestContext::new(base.state.clone().signing_key(b"secret"))?;
    let body = serde_json::to_vec(&json!({"id": "Alloc", "type": "gauge", "value": 1.5}))?;

    let resp = request(
        &ctx.app,
        "POST",
        "/update/",
        Some(body.clone()),
        RequestOpts {
            gzip: true,
            key: Some(b"secret".as_slice()),
            ..Default::default()
        },
    )
    .await;
    assert_eq!(resp.status, StatusCode::OK);
    let signature = resp.headers[SIGNATURE_HEADER].to_str()?;
    assert!(verify_base64(&resp.body, b"secret", signature).is_ok());

    let resp = request(
        &ctx.app,
        "POST",
        "/update/",
        Some(body.clone()),
        RequestOpts {
            gzip: true,
            key: Some(b"wrong".as_slice()),
            ..Default::default()
        },
    )
    .await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);

    let resp = request(&ctx.app, "POST", "/update/", Some(body), RequestOpts::default()).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);

    // Reads stay open.
    let resp = get(&ctx.app, "/value/gauge/Alloc").await;
    assert_eq!(resp.status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn trusted_subnet_guards_updates_only() -> Result<()> {
    let base = memory_context()?;
    let subnet = TrustedSubnet::parse("10.0.0.0/24")?;
    let ctx = TestContext::new(base.state.clone().trusted_subnet(subnet))?;

    let resp = request(
        &ctx.app,
        "POST",
        "/update/counter/hits/1",
        None,
        RequestOpts {
            real_ip: Some("10.0.0.9"),
            ..Default::default()
        },
    )
    .await;
    assert_eq!(resp.status, StatusCode::OK);

    let resp = request(
        &ctx.app,
        "POST",
        "/update/counter/hits/1",
        None,
        RequestOpts {
            real_ip: Some("10.0.1.9"),
            ..Default::default()
        },
    )
    .await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);

    let resp = post_empty(&ctx.app, "/update/counter/hits/1").await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);

    let resp = get(&ctx.app, "/value/counter/hits").await;
    assert_eq!(resp.text(), "1");
    Ok(())
}

#[tokio::test]
async fn synchronous_dump_follows_every_update() -> Result<()> {
    let ctx = file_context(true)?;
    post_empty(&ctx.app, "/update/counter/PollCount/2").await;
    post_empty(&ctx.app, "/update/gauge/Alloc/0.5").await;

    let dump = ctx.state.dump.as_ref().map(|d| d.path().to_path_buf());
    let contents = std::fs::read_to_string(dump.unwrap_or_default())?;
    assert!(contents.contains("PollCount:counter:2\n"), "{contents}");
    assert!(contents.contains("Alloc:gauge:0.5\n"), "{contents}");

    let lazy = file_context(false)?;
    post_empty(&lazy.app, "/update/counter/PollCount/2").await;
    let path = lazy.state.dump.as_ref().map(|d| d.path().to_path_buf());
    assert!(!path.unwrap_or_default().exists());
    Ok(())
}
