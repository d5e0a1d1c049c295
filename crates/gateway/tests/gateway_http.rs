//! In-process HTTP tests for the gateway, running a real `run_server`
//! accept loop against a hand-rolled stub inference backend — the same
//! "spin up a real dependency" shape as the teacher's
//! `consul_integration.rs`/`etcd_integration.rs`, except the dependency is
//! a few lines of hyper instead of a container.

use embedserve_gateway::apikey::ApiKeyStore;
use embedserve_gateway::config::GatewayConfig;
use embedserve_gateway::server::{self, GatewayState};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;

/// A stub inference backend. `/health` always reports ok. `/embed` either
/// replies immediately with a fixed embedding, or (when `delay` is set)
/// sleeps past the gateway's upstream timeout to exercise the 504 path.
async fn spawn_stub_inference(port: u16, delay: Option<Duration>) -> Arc<Notify> {
    let shutdown = Arc::new(Notify::new());
    let listener = TcpListener::bind(format!("127.0.0.1:{port}")).await.unwrap();

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            loop {
                let accepted = tokio::select! {
                    r = listener.accept() => r,
                    _ = shutdown.notified() => break,
                };
                let Ok((stream, _)) = accepted else { continue };
                let io = TokioIo::new(stream);
                let svc = service_fn(move |req: Request<Incoming>| async move {
                    handle_stub(req, delay).await
                });
                tokio::spawn(async move {
                    let _ = auto::Builder::new(TokioExecutor::new())
                        .http1()
                        .serve_connection(io, svc)
                        .await;
                });
            }
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown
}

async fn handle_stub(
    req: Request<Incoming>,
    delay: Option<Duration>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path().to_string();
    if path == "/health" {
        return Ok(Response::new(Full::new(Bytes::from(
            r#"{"status":"ok"}"#,
        ))));
    }
    if path == "/embed" {
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        let _ = req.collect().await;
        return Ok(Response::new(Full::new(Bytes::from(
            r#"{"embedding":[0.1,0.2,0.3],"model":"stub-model"}"#,
        ))));
    }
    Ok(Response::builder()
        .status(404)
        .body(Full::new(Bytes::new()))
        .unwrap())
}

async fn spawn_gateway(port: u16, config: GatewayConfig, api_key: &str) -> (Arc<Notify>, tokio::task::JoinHandle<()>) {
    let state = GatewayState::new(config.clone()).await.unwrap();
    state.api_key_store.add_key(
        api_key,
        "test_user",
        "test key",
        config.rate_limit_minute,
        config.rate_limit_hour,
        None,
    );

    let shutdown = Arc::new(Notify::new());
    let listen = format!("127.0.0.1:{port}");
    let handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            server::run_server(&listen, state, shutdown).await.unwrap();
        }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    (shutdown, handle)
}

async fn shutdown_and_join(shutdown: Arc<Notify>, handle: tokio::task::JoinHandle<()>) {
    shutdown.notify_waiters();
    handle.await.unwrap();
}

#[tokio::test]
async fn auth_happy_path_proxies_to_inference() {
    let inf_shutdown = spawn_stub_inference(18101, None).await;

    let mut config = GatewayConfig::default();
    config.inference_url = "http://127.0.0.1:18101".to_string();
    config.port = 18111;
    let key = ApiKeyStore::generate("sk_test");
    let (gw_shutdown, gw_handle) = spawn_gateway(18111, config, &key).await;

    let client = reqwest::Client::new();
    let resp = client
        .post("http://127.0.0.1:18111/v1/embed")
        .bearer_auth(&key)
        .json(&serde_json::json!({"input_text": "hello"}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["model"], "stub-model");

    shutdown_and_join(gw_shutdown, gw_handle).await;
    inf_shutdown.notify_waiters();
}

#[tokio::test]
async fn invalid_api_key_is_rejected_before_reaching_upstream() {
    let inf_shutdown = spawn_stub_inference(18102, None).await;

    let mut config = GatewayConfig::default();
    config.inference_url = "http://127.0.0.1:18102".to_string();
    config.port = 18112;
    let key = ApiKeyStore::generate("sk_test");
    let (gw_shutdown, gw_handle) = spawn_gateway(18112, config, &key).await;

    let client = reqwest::Client::new();
    let resp = client
        .post("http://127.0.0.1:18112/v1/embed")
        .bearer_auth("sk_test_not_a_real_key")
        .json(&serde_json::json!({"input_text": "hello"}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 401);
    assert_eq!(
        resp.headers().get("www-authenticate").unwrap(),
        "Bearer"
    );

    shutdown_and_join(gw_shutdown, gw_handle).await;
    inf_shutdown.notify_waiters();
}

#[tokio::test]
async fn per_minute_limit_trips_with_retry_after() {
    let inf_shutdown = spawn_stub_inference(18103, None).await;

    let mut config = GatewayConfig::default();
    config.inference_url = "http://127.0.0.1:18103".to_string();
    config.port = 18113;
    config.rate_limit_minute = 1;
    config.rate_limit_hour = 1000;
    let key = ApiKeyStore::generate("sk_test");
    let (gw_shutdown, gw_handle) = spawn_gateway(18113, config, &key).await;

    let client = reqwest::Client::new();
    let body = serde_json::json!({"input_text": "hello"});

    let first = client
        .post("http://127.0.0.1:18113/v1/embed")
        .bearer_auth(&key)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 200);

    let second = client
        .post("http://127.0.0.1:18113/v1/embed")
        .bearer_auth(&key)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 429);
    assert!(second.headers().contains_key("retry-after"));

    shutdown_and_join(gw_shutdown, gw_handle).await;
    inf_shutdown.notify_waiters();
}

#[tokio::test]
async fn slow_but_within_budget_upstream_is_not_penalized() {
    // complements `upstream_timeout_surfaces_as_504` below: a delay well
    // under the 30s upstream timeout must not be treated as a failure.
    let inf_shutdown = spawn_stub_inference(18104, Some(Duration::from_millis(50))).await;

    let mut config = GatewayConfig::default();
    config.inference_url = "http://127.0.0.1:18104".to_string();
    config.port = 18114;
    let key = ApiKeyStore::generate("sk_test");
    let (gw_shutdown, gw_handle) = spawn_gateway(18114, config, &key).await;

    let client = reqwest::Client::new();
    let resp = client
        .post("http://127.0.0.1:18114/v1/embed")
        .bearer_auth(&key)
        .json(&serde_json::json!({"input_text": "hello"}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);

    shutdown_and_join(gw_shutdown, gw_handle).await;
    inf_shutdown.notify_waiters();
}

/// Exercises the real `/v1/embed` upstream timeout path: the stub holds
/// the connection open past the gateway's hardcoded 30s upstream timeout,
/// so the gateway must surface `504` rather than hang. Ignored by default
/// since it genuinely waits out the full 30s budget; run explicitly with
/// `cargo test -- --ignored` when validating this path.
#[tokio::test]
#[ignore = "waits out the real 30s upstream timeout"]
async fn upstream_timeout_surfaces_as_504() {
    let inf_shutdown = spawn_stub_inference(18107, Some(Duration::from_secs(31))).await;

    let mut config = GatewayConfig::default();
    config.inference_url = "http://127.0.0.1:18107".to_string();
    config.port = 18117;
    let key = ApiKeyStore::generate("sk_test");
    let (gw_shutdown, gw_handle) = spawn_gateway(18117, config, &key).await;

    let client = reqwest::Client::new();
    let resp = client
        .post("http://127.0.0.1:18117/v1/embed")
        .bearer_auth(&key)
        .json(&serde_json::json!({"input_text": "hello"}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 504);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "upstream_timeout");

    shutdown_and_join(gw_shutdown, gw_handle).await;
    inf_shutdown.notify_waiters();
}

#[tokio::test]
async fn malformed_body_is_unprocessable() {
    let inf_shutdown = spawn_stub_inference(18105, None).await;

    let mut config = GatewayConfig::default();
    config.inference_url = "http://127.0.0.1:18105".to_string();
    config.port = 18115;
    let key = ApiKeyStore::generate("sk_test");
    let (gw_shutdown, gw_handle) = spawn_gateway(18115, config, &key).await;

    let client = reqwest::Client::new();
    let resp = client
        .post("http://127.0.0.1:18115/v1/embed")
        .bearer_auth(&key)
        .json(&serde_json::json!({"input_text": ""}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 422);

    shutdown_and_join(gw_shutdown, gw_handle).await;
    inf_shutdown.notify_waiters();
}

#[tokio::test]
async fn usage_endpoint_reports_counts() {
    let inf_shutdown = spawn_stub_inference(18106, None).await;

    let mut config = GatewayConfig::default();
    config.inference_url = "http://127.0.0.1:18106".to_string();
    config.port = 18116;
    let key = ApiKeyStore::generate("sk_test");
    let (gw_shutdown, gw_handle) = spawn_gateway(18116, config, &key).await;

    let client = reqwest::Client::new();
    client
        .post("http://127.0.0.1:18116/v1/embed")
        .bearer_auth(&key)
        .json(&serde_json::json!({"input_text": "hello"}))
        .send()
        .await
        .unwrap();

    let usage: serde_json::Value = client
        .get("http://127.0.0.1:18116/v1/usage")
        .bearer_auth(&key)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    // the usage lookup itself counts as an authenticated request, so by
    // the time the read happens it observes its own check() call too.
    assert_eq!(usage["usage"]["count_last_minute"], 2);

    shutdown_and_join(gw_shutdown, gw_handle).await;
    inf_shutdown.notify_waiters();
}
