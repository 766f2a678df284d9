//! # End-to-End Failures
//!
//! Validation rejections, declared and undeclared exceptions, stack trace
//! disclosure, timeouts and transport failures, observed through the
//! client runtime.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::post;
use rpcc_client::{CallOptions, ClientConfig, ClientError, RpcClient};
use rpcc_core::ContextConfig;
use rpcc_server::ServerConfig;
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;

fn as_user() -> CallOptions {
    CallOptions::default().with_header("x-user-id", "u1")
}

// ── Validation ──────────────────────────────────────────────────────

#[tokio::test]
async fn empty_required_string_is_one_violation() {
    let svc = common::start().await;
    let err = svc
        .client()
        .call("greet", vec![json!("")], None, as_user())
        .await
        .unwrap_err();
    match err {
        ClientError::Validation { method, errors } => {
            assert_eq!(method, "greet");
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0]["instancePath"], "/name");
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_required_parameter_is_rejected() {
    let svc = common::start().await;
    let err = svc
        .client()
        .call("shift", vec![json!("2026-01-01T00:00:00Z")], None, as_user())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Validation { .. }));
}

#[tokio::test]
async fn unknown_method_is_a_400() {
    let svc = common::start().await;
    let resp = reqwest::Client::new()
        .post(format!("{}/rewind", svc.url()))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["errors"][0]["message"], "Method not supported");
    assert_eq!(body["errors"][0]["method"], "rewind");
}

// ── Exceptions ──────────────────────────────────────────────────────

#[tokio::test]
async fn each_declared_exception_is_rebuilt_by_name() {
    let svc = common::start().await;
    let client = svc.client();

    let err = client
        .call("fail", vec![json!("runtime")], None, as_user())
        .await
        .unwrap_err();
    let declared = err.declared().unwrap();
    assert_eq!((declared.name.as_str(), declared.message.as_str()), ("RuntimeError", "heh"));
    assert!(declared.stack.is_none());

    let err = client
        .call("fail", vec![json!("quota")], None, as_user())
        .await
        .unwrap_err();
    assert_eq!(err.declared().unwrap().name, "QuotaExceeded");
    assert_eq!(err.to_string(), "QuotaExceeded: too many calls");
}

#[tokio::test]
async fn undeclared_error_is_anonymized() {
    let svc = common::start().await;
    let err = svc
        .client()
        .call("fail", vec![json!("other")], None, as_user())
        .await
        .unwrap_err();
    match err {
        ClientError::InternalServerError { message, stack, .. } => {
            assert_eq!(message, "Internal Server Error");
            assert!(stack.is_none());
        }
        other => panic!("expected internal error, got {other:?}"),
    }
}

#[tokio::test]
async fn panicking_handler_is_an_internal_error() {
    let svc = common::start().await;
    let err = svc
        .client()
        .call("fail", vec![json!("panic")], None, as_user())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::InternalServerError { .. }));
}

#[tokio::test]
async fn stack_traces_are_disclosed_only_when_enabled() {
    let config = ServerConfig {
        include_stack_trace: true,
        ..ServerConfig::default()
    };
    let svc = common::start_with(config, ContextConfig::default()).await;
    let err = svc
        .client()
        .call("fail", vec![json!("other")], None, as_user())
        .await
        .unwrap_err();
    match err {
        ClientError::InternalServerError { message, stack, .. } => {
            assert_eq!(message, "database password is hunter2");
            assert_eq!(stack.as_deref(), Some("at fail (calendar.rs:1)"));
        }
        other => panic!("expected internal error, got {other:?}"),
    }
}

#[tokio::test]
async fn failing_context_extractor_is_an_internal_error() {
    let svc = common::start().await;
    let err = svc
        .client()
        .call("ping", vec![], None, CallOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::InternalServerError { .. }));
}

// ── Transport ───────────────────────────────────────────────────────

#[tokio::test]
async fn timeout_aborts_the_call() {
    let svc = common::start().await;
    let started = std::time::Instant::now();
    let err = svc
        .client()
        .call("sleep", vec![json!(2_000)], None, as_user().with_timeout_ms(100))
        .await
        .unwrap_err();
    assert!(started.elapsed() < Duration::from_millis(1_500));
    assert_eq!(
        err.to_string(),
        "Request aborted due to timeout on method \"sleep\""
    );
    match err {
        ClientError::Timeout { options, .. } => {
            assert_eq!(options.timeout_ms, Some(100));
            assert!(options.service_url.starts_with(&svc.url()));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn timeout_closes_the_in_flight_connection() {
    // A server that takes the request and never answers, then reports when
    // the client hangs up.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (closed_tx, closed_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        while let Ok(n) = socket.read(&mut buf).await {
            if n == 0 {
                break;
            }
        }
        let _ = closed_tx.send(());
    });

    let ir = common::load_ir();
    let model = common::compile(&ir, &ContextConfig::default());
    let config = ClientConfig::new(&format!("http://{addr}")).unwrap();
    let client = RpcClient::new(config, model, common::SERVICE).unwrap();

    let err = client
        .call("ping", vec![], None, CallOptions::default().with_timeout_ms(100))
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    // The client is still alive, so only the aborted request can close it.
    tokio::time::timeout(Duration::from_secs(2), closed_rx)
        .await
        .expect("socket left open after the timeout")
        .unwrap();
    drop(client);
    server.abort();
}

#[tokio::test]
async fn fast_call_beats_the_timer() {
    let svc = common::start().await;
    let out = svc
        .client()
        .call("sleep", vec![json!(0)], None, as_user().with_timeout_ms(2_000))
        .await
        .unwrap();
    assert_eq!(out, Value::Null);
}

#[tokio::test]
async fn connection_refused_is_a_request_error() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let ir = common::load_ir();
    let model = common::compile(&ir, &ContextConfig::default());
    let config = ClientConfig::new(&format!("http://127.0.0.1:{port}")).unwrap();
    let client = RpcClient::new(config, model, common::SERVICE).unwrap();

    let err = client
        .call("ping", vec![], None, CallOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Request { ref method, .. } if method == "ping"));
}

/// A bare server answering every call with a fixed status and body.
async fn fixed_response(status: StatusCode, body: &'static str) -> (String, tokio::task::JoinHandle<()>) {
    let router = axum::Router::new().route("/ping", post(move || async move { (status, body) }));
    let (addr, task) = rpcc_server::serve(router, "127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    (format!("http://{addr}"), task)
}

#[tokio::test]
async fn empty_500_uses_the_reason_phrase() {
    let (url, task) = fixed_response(StatusCode::INTERNAL_SERVER_ERROR, "").await;
    let ir = common::load_ir();
    let model = common::compile(&ir, &ContextConfig::default());
    let client = RpcClient::new(ClientConfig::new(&url).unwrap(), model, common::SERVICE).unwrap();

    let err = client
        .call("ping", vec![], None, CallOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "500 - Internal Server Error");
    task.abort();
}

#[tokio::test]
async fn non_json_500_uses_the_body_text() {
    let (url, task) = fixed_response(StatusCode::BAD_GATEWAY, "upstream exploded").await;
    let ir = common::load_ir();
    let model = common::compile(&ir, &ContextConfig::default());
    let client = RpcClient::new(ClientConfig::new(&url).unwrap(), model, common::SERVICE).unwrap();

    let err = client
        .call("ping", vec![], None, CallOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "502 - upstream exploded");
    task.abort();
}
