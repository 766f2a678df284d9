//! # End-to-End Context Handling
//!
//! ClientContext fields travel under `ctx`, ServerOnlyContext fields are
//! computed from request headers, and the effective context of each call
//! is visible to outer middleware through the `CallRecord` extension.

mod common;

use rpcc_client::{CallOptions, ClientError};
use rpcc_core::{ContextConfig, ContextSetting};
use rpcc_server::{ContextPrecedence, ServerConfig};
use serde_json::{json, Value};

use common::ctx;

#[tokio::test]
async fn both_contexts_reach_the_handler() {
    let svc = common::start().await;
    let out = svc
        .client()
        .call(
            "whoami",
            vec![],
            Some(&ctx(json!({ "debugId": "d-1" }))),
            CallOptions::default().with_header("x-user-id", "alice"),
        )
        .await
        .unwrap();
    assert_eq!(out, json!({ "userId": "alice", "debugId": "d-1" }));
}

#[tokio::test]
async fn server_only_fields_are_never_sent_by_the_client() {
    let svc = common::start().await;
    // ClientContext forbids extra fields, so a leaked userId would be a 400.
    let out = svc
        .client()
        .call(
            "whoami",
            vec![],
            Some(&ctx(json!({ "debugId": "d-2", "userId": "mallory" }))),
            CallOptions::default().with_header("x-user-id", "alice"),
        )
        .await
        .unwrap();
    assert_eq!(out["userId"], "alice");
}

/// ClientContext without `additionalProperties: false`, so a stray
/// `userId` passes validation and has to be dropped by the dispatcher.
fn open_client_context() -> ContextConfig {
    ContextConfig {
        client: ContextSetting::Custom("OpenClientContext".into()),
        server_only: ContextSetting::Default,
    }
}

async fn whoami_spoofing_user(svc: &common::TestService) -> Value {
    let resp = reqwest::Client::new()
        .post(format!("{}/whoami", svc.url()))
        .header("x-user-id", "alice")
        .json(&json!({ "ctx": { "debugId": "d-3", "userId": "mallory" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    resp.json().await.unwrap()
}

#[tokio::test]
async fn server_context_wins_over_a_spoofed_client_field() {
    let config = ServerConfig {
        context_precedence: ContextPrecedence::ServerWins,
        ..ServerConfig::default()
    };
    let svc = common::start_with(config, open_client_context()).await;
    let out = whoami_spoofing_user(&svc).await;
    assert_eq!(out, json!({ "userId": "alice", "debugId": "d-3" }));

    let record = svc.records().pop().unwrap();
    assert_eq!(record.method, "whoami");
    let context = record.context.unwrap();
    assert_eq!(context.client(), &ctx(json!({ "debugId": "d-3" })));
    assert_eq!(context.server()["userId"], "alice");
}

#[tokio::test]
async fn undeclared_client_field_is_ignored_even_when_the_client_wins() {
    let config = ServerConfig {
        context_precedence: ContextPrecedence::ClientWins,
        ..ServerConfig::default()
    };
    let svc = common::start_with(config, open_client_context()).await;
    let out = whoami_spoofing_user(&svc).await;
    assert_eq!(out["userId"], "alice");
    let context = svc.records().pop().unwrap().context.unwrap();
    assert!(!context.client().contains_key("userId"));
}

#[tokio::test]
async fn client_context_is_validated() {
    let svc = common::start().await;
    let resp = reqwest::Client::new()
        .post(format!("{}/whoami", svc.url()))
        .header("x-user-id", "alice")
        .json(&json!({ "ctx": { "debugId": 7 } }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["errors"][0]["instancePath"], "/ctx/debugId");
}

#[tokio::test]
async fn records_capture_every_dispatched_call() {
    let svc = common::start().await;
    let client = svc.client();
    let as_bob = CallOptions::default().with_header("x-user-id", "bob");
    client.call("ping", vec![], None, as_bob.clone()).await.unwrap();
    let _ = client.call("fail", vec![json!("runtime")], None, as_bob).await;

    let records = svc.records();
    let methods: Vec<&str> = records.iter().map(|r| r.method.as_str()).collect();
    assert_eq!(methods, ["ping", "fail"]);
    assert!(records
        .iter()
        .all(|r| r.context.as_ref().is_some_and(|c| c.server()["userId"] == "bob")));
}

#[tokio::test]
async fn without_contexts_the_handler_gets_none() {
    let svc = common::start_with(ServerConfig::default(), common::no_contexts()).await;
    let out = svc
        .client()
        .call("whoami", vec![], Some(&ctx(json!({ "debugId": "ignored" }))), CallOptions::default())
        .await
        .unwrap();
    assert_eq!(out, json!({ "userId": "nobody" }));
    assert!(svc.records().pop().unwrap().context.is_none());
}

#[tokio::test]
async fn client_context_only_needs_no_extractor() {
    let contexts = ContextConfig {
        client: ContextSetting::Default,
        server_only: ContextSetting::Disabled,
    };
    let svc = common::start_with(ServerConfig::default(), contexts).await;
    let out = svc
        .client()
        .call("whoami", vec![], Some(&ctx(json!({ "debugId": "d-4" }))), CallOptions::default())
        .await
        .unwrap();
    assert_eq!(out, json!({ "userId": "nobody", "debugId": "d-4" }));
}

#[tokio::test]
async fn missing_server_context_fails_before_the_handler() {
    let svc = common::start().await;
    let err = svc
        .client()
        .call("whoami", vec![], None, CallOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::InternalServerError { .. }));
}
