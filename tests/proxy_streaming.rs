//! End-to-end proxy behaviour against a local asset origin.

use std::time::Duration;

use dreamforge_gateway::config::GatewayConfig;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use reqwest::StatusCode;

mod common;
use common::{client, MockAsset, MockOrigin, TestGateway};

async fn gateway_for(origin: &MockOrigin) -> TestGateway {
    TestGateway::start(origin, GatewayConfig::default()).await
}

#[tokio::test]
async fn full_download_is_byte_identical() {
    let asset = MockAsset::bytes(20_000);
    let expected = asset.data.clone();
    let origin = MockOrigin::start(vec![("/tasks/a/model.glb", asset)]).await;
    let gateway = gateway_for(&origin).await;

    let res = client()
        .get(gateway.proxy_url())
        .query(&[("url", origin.url("/tasks/a/model.glb?Signature=abc"))])
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()[CONTENT_TYPE], "model/gltf-binary");
    assert!(res.headers().get(CONTENT_LENGTH).is_none());
    assert_eq!(res.headers()["content-disposition"], "inline; filename=\"model.glb\"");
    assert_eq!(res.headers()["access-control-allow-origin"], "*");
    assert_eq!(res.headers()["etag"], "\"v1\"");
    assert!(res.headers().get("x-request-id").is_none());
    assert!(res.headers().contains_key("x-session-id"));

    let body = res.bytes().await.unwrap();
    assert_eq!(body.as_ref(), expected.as_slice());
    assert_eq!(gateway.wait_for_idle_upstream(Duration::from_secs(2)).await, 0);
}

#[tokio::test]
async fn severed_download_resumes_from_delivered_offset() {
    let asset = MockAsset {
        truncate_first_at: Some(7_000),
        ..MockAsset::bytes(20_000)
    };
    let expected = asset.data.clone();
    let origin = MockOrigin::start(vec![("/m.glb", asset)]).await;
    let gateway = gateway_for(&origin).await;

    let res = client()
        .get(gateway.proxy_url())
        .query(&[("url", origin.url("/m.glb"))])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body = res.bytes().await.unwrap();
    assert_eq!(body.len(), expected.len());
    assert_eq!(body.as_ref(), expected.as_slice());
    assert_eq!(origin.ranges(), vec![None, Some("bytes=7000-".to_string())]);
}

#[tokio::test]
async fn failing_resume_truncates_client_body() {
    let asset = MockAsset {
        truncate_first_at: Some(5_000),
        truncate_ranges: true,
        ..MockAsset::bytes(20_000)
    };
    let origin = MockOrigin::start(vec![("/m.glb", asset)]).await;
    let gateway = gateway_for(&origin).await;

    let res = client()
        .get(gateway.proxy_url())
        .query(&[("url", origin.url("/m.glb"))])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.bytes().await.is_err());
    // one original fetch, one resume, nothing more
    assert_eq!(origin.hits(), 2);
    assert_eq!(gateway.wait_for_idle_upstream(Duration::from_secs(2)).await, 0);
}

#[tokio::test]
async fn range_request_passes_through() {
    let asset = MockAsset::bytes(5_000);
    let expected = asset.data[100..200].to_vec();
    let origin = MockOrigin::start(vec![("/model.glb", asset)]).await;
    let gateway = gateway_for(&origin).await;

    let res = client()
        .get(gateway.proxy_url())
        .query(&[("url", origin.url("/model.glb"))])
        .header(RANGE, "bytes=100-199")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(res.headers()[CONTENT_RANGE], "bytes 100-199/5000");
    assert_eq!(res.headers()[CONTENT_LENGTH], "100");
    assert_eq!(res.headers()["cache-control"], "public, max-age=3600");
    let body = res.bytes().await.unwrap();
    assert_eq!(body.as_ref(), expected.as_slice());
    assert_eq!(origin.ranges(), vec![Some("bytes=100-199".to_string())]);
}

#[tokio::test]
async fn unsatisfiable_range_status_propagates() {
    let origin = MockOrigin::start(vec![("/model.glb", MockAsset::bytes(500))]).await;
    let gateway = gateway_for(&origin).await;

    let res = client()
        .get(gateway.proxy_url())
        .query(&[("url", origin.url("/model.glb"))])
        .header(RANGE, "bytes=9000-")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(res.headers()[CONTENT_RANGE], "bytes */500");
    assert_eq!(res.headers()["accept-ranges"], "bytes");
    assert_eq!(res.headers()["access-control-allow-origin"], "*");
    assert!(res.bytes().await.unwrap().is_empty());
    assert_eq!(gateway.wait_for_idle_upstream(Duration::from_secs(2)).await, 0);
}

#[tokio::test]
async fn tiny_asset_is_rejected_before_streaming() {
    let origin = MockOrigin::start(vec![("/empty.glb", MockAsset::bytes(42))]).await;
    let gateway = gateway_for(&origin).await;

    let res = client()
        .get(gateway.proxy_url())
        .query(&[("url", origin.url("/empty.glb"))])
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let json: serde_json::Value = res.json().await.unwrap();
    assert_eq!(json["success"], false);
    assert_eq!(json["detail"], "File too small (42 bytes), possibly corrupt or empty");
    assert_eq!(gateway.wait_for_idle_upstream(Duration::from_secs(2)).await, 0);
}

#[tokio::test]
async fn untrusted_urls_never_reach_any_origin() {
    let origin = MockOrigin::start(vec![("/model.glb", MockAsset::bytes(500))]).await;
    let gateway = gateway_for(&origin).await;
    let client = client();

    for url in [
        "https://evil.example/model.glb".to_string(),
        format!("{}@evil.example/model.glb", origin.origin()),
        format!("{}../etc/passwd", origin.origin()),
    ] {
        let res = client
            .get(gateway.proxy_url())
            .query(&[("url", url.as_str())])
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "{url}");
    }
    assert_eq!(origin.hits(), 0);
}

#[tokio::test]
async fn preflight_is_answered_without_upstream() {
    let origin = MockOrigin::start(vec![]).await;
    let gateway = gateway_for(&origin).await;

    let res = client()
        .request(reqwest::Method::OPTIONS, gateway.proxy_url())
        .query(&[("url", "https://evil.example/x")])
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    assert_eq!(res.headers()["access-control-max-age"], "3600");
    assert!(res.bytes().await.unwrap().is_empty());
    assert_eq!(origin.hits(), 0);
}

#[tokio::test]
async fn upstream_not_found_propagates() {
    let origin = MockOrigin::start(vec![]).await;
    let gateway = gateway_for(&origin).await;

    let res = client()
        .get(gateway.proxy_url())
        .query(&[("url", origin.url("/missing.glb"))])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn redirects_stay_on_the_trusted_origin() {
    let target = MockAsset::bytes(1_000);
    let expected = target.data.clone();
    let origin = MockOrigin::start(vec![
        ("/moved.glb", MockAsset { redirect_to: Some("/model.glb".into()), ..Default::default() }),
        ("/model.glb", target),
        (
            "/escape.glb",
            MockAsset { redirect_to: Some("http://127.0.0.1:1/secret".into()), ..Default::default() },
        ),
    ])
    .await;
    let gateway = gateway_for(&origin).await;
    let client = client();

    let res = client
        .get(gateway.proxy_url())
        .query(&[("url", origin.url("/moved.glb"))])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.bytes().await.unwrap().as_ref(), expected.as_slice());

    let res = client
        .get(gateway.proxy_url())
        .query(&[("url", origin.url("/escape.glb"))])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn silent_upstream_times_out() {
    let origin = MockOrigin::start(vec![("/slow.glb", MockAsset { hang: true, ..Default::default() })]).await;
    let mut config = GatewayConfig::default();
    config.proxy.upstream_timeout_secs = 1;
    let gateway = TestGateway::start(&origin, config).await;

    let res = client()
        .get(gateway.proxy_url())
        .query(&[("url", origin.url("/slow.glb"))])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(gateway.wait_for_idle_upstream(Duration::from_secs(2)).await, 0);
}

#[tokio::test]
async fn client_disconnect_releases_upstream() {
    let asset = MockAsset {
        chunk_delay: Some(Duration::from_millis(20)),
        ..MockAsset::bytes(200 * 1024)
    };
    let origin = MockOrigin::start(vec![("/big.glb", asset)]).await;
    let gateway = gateway_for(&origin).await;

    let mut res = client()
        .get(gateway.proxy_url())
        .query(&[("url", origin.url("/big.glb"))])
        .send()
        .await
        .unwrap();
    assert!(res.chunk().await.unwrap().is_some());
    assert_eq!(gateway.tracker.active(), 1);

    drop(res);
    assert_eq!(gateway.wait_for_idle_upstream(Duration::from_secs(5)).await, 0);
}

#[tokio::test]
async fn session_id_round_trips() {
    let origin = MockOrigin::start(vec![("/model.glb", MockAsset::bytes(500))]).await;
    let gateway = gateway_for(&origin).await;
    let client = client();

    let first = client
        .get(gateway.proxy_url())
        .query(&[("url", origin.url("/model.glb"))])
        .send()
        .await
        .unwrap();
    let session = first.headers()["x-session-id"].to_str().unwrap().to_string();
    first.bytes().await.unwrap();

    let second = client
        .get(gateway.proxy_url())
        .query(&[("url", origin.url("/model.glb"))])
        .header("x-session-id", &session)
        .send()
        .await
        .unwrap();
    assert_eq!(second.headers()["x-session-id"].to_str().unwrap(), session);
}

#[tokio::test]
async fn shutdown_stops_accepting() {
    let origin = MockOrigin::start(vec![]).await;
    let gateway = gateway_for(&origin).await;
    let health = format!("http://{}/health", gateway.addr);

    assert_eq!(client().get(&health).send().await.unwrap().status(), StatusCode::OK);

    gateway.shutdown.trigger();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(client().get(&health).send().await.is_err());
}
