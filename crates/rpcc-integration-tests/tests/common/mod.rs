//! Shared harness: the calendar fixture service, served over TCP on an
//! ephemeral port.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::request::Parts;
use axum::response::Response;
use rpcc_client::{ClientConfig, RpcClient};
use rpcc_core::{ContextConfig, ContextSetting, SchemaIr, ServiceModel};
use rpcc_server::{
    handler_fn, serve, Call, CallRecord, HandlerError, MethodHandler, ServerConfig, ServiceRouter,
};
use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;

pub const SERVICE: &str = "Calendar";

pub fn load_ir() -> Arc<SchemaIr> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/calendar.yaml");
    Arc::new(SchemaIr::from_file(&path).unwrap())
}

pub fn compile(ir: &SchemaIr, contexts: &ContextConfig) -> Arc<ServiceModel> {
    Arc::new(rpcc_schema::compile(ir, contexts).unwrap())
}

/// Contexts switched off entirely.
pub fn no_contexts() -> ContextConfig {
    ContextConfig {
        client: ContextSetting::Disabled,
        server_only: ContextSetting::Disabled,
    }
}

/// A running service plus everything needed to call it.
pub struct TestService {
    pub addr: SocketAddr,
    pub model: Arc<ServiceModel>,
    pub records: Arc<Mutex<Vec<CallRecord>>>,
    task: JoinHandle<()>,
}

impl TestService {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn client(&self) -> RpcClient {
        let config = ClientConfig::new(&self.url()).unwrap();
        RpcClient::new(config, Arc::clone(&self.model), SERVICE).unwrap()
    }

    pub fn records(&self) -> Vec<CallRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl Drop for TestService {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Serve the calendar with default context resolution.
pub async fn start() -> TestService {
    start_with(ServerConfig::default(), ContextConfig::default()).await
}

pub async fn start_with(config: ServerConfig, contexts: ContextConfig) -> TestService {
    let ir = load_ir();
    let model = compile(&ir, &contexts);

    let mut builder = ServiceRouter::new(ir, Arc::clone(&model), SERVICE, config);
    for (name, handler) in handlers() {
        builder = builder.handler(name, handler);
    }
    if model.context.server_only.is_present() {
        builder = builder.context_extractor(user_from_header);
    }

    let records: Arc<Mutex<Vec<CallRecord>>> = Arc::default();
    let sink = Arc::clone(&records);
    let router = builder
        .build()
        .unwrap()
        .layer(axum::middleware::map_response(move |response: Response| {
            let sink = Arc::clone(&sink);
            async move {
                if let Some(record) = response.extensions().get::<CallRecord>() {
                    sink.lock().unwrap().push(record.clone());
                }
                response
            }
        }));

    let (addr, task) = serve(router, "127.0.0.1:0".parse().unwrap()).await.unwrap();
    TestService {
        addr,
        model,
        records,
        task,
    }
}

/// Reads `x-user-id`; calls without it fail before the handler runs.
fn user_from_header(parts: &Parts) -> std::future::Ready<Result<Map<String, Value>, HandlerError>> {
    let user = parts.headers.get("x-user-id").and_then(|v| v.to_str().ok());
    let result = match user {
        Some(user) => {
            let mut fields = Map::new();
            fields.insert("userId".into(), json!(user));
            Ok(fields)
        }
        None => Err(HandlerError::new("Unauthorized", "missing x-user-id")),
    };
    std::future::ready(result)
}

fn handlers() -> Vec<(&'static str, MethodHandler)> {
    vec![
        (
            "greet",
            handler_fn(|call: Call| async move {
                let name: String = call.arg(0)?;
                let greeting: Option<String> = call.arg(1)?;
                let greeting = greeting.unwrap_or_else(|| "hello".into());
                Ok::<_, HandlerError>(json!(format!("{greeting} {name}")))
            }),
        ),
        (
            "ping",
            handler_fn(|_call: Call| async move { Ok::<_, HandlerError>(Value::Null) }),
        ),
        (
            "schedule",
            handler_fn(|call: Call| async move {
                let mut event = call.args()[0].clone();
                event["tags"] = json!(["scheduled"]);
                Ok::<_, HandlerError>(event)
            }),
        ),
        (
            "shift",
            handler_fn(|call: Call| async move {
                let at: chrono::DateTime<chrono::Utc> = call.arg(0)?;
                let hours: f64 = call.arg(1)?;
                let shifted = at + chrono::Duration::milliseconds((hours * 3_600_000.0) as i64);
                Ok::<_, HandlerError>(json!(shifted.to_rfc3339()))
            }),
        ),
        (
            "fail",
            handler_fn(|call: Call| async move {
                let kind: String = call.arg(0)?;
                let err = match kind.as_str() {
                    "runtime" => HandlerError::new("RuntimeError", "heh"),
                    "quota" => HandlerError::new("QuotaExceeded", "too many calls"),
                    "panic" => panic!("handler bug"),
                    _ => HandlerError::internal("database password is hunter2")
                        .with_stack("at fail (calendar.rs:1)"),
                };
                Err::<Value, _>(err)
            }),
        ),
        (
            "whoami",
            handler_fn(|call: Call| async move {
                let Some(ctx) = call.context() else {
                    return Ok::<_, HandlerError>(json!({ "userId": "nobody" }));
                };
                let mut identity = Map::new();
                identity.insert("userId".into(), ctx.get("userId").cloned().unwrap_or(json!("nobody")));
                if let Some(debug_id) = ctx.get("debugId") {
                    identity.insert("debugId".into(), debug_id.clone());
                }
                Ok(Value::Object(identity))
            }),
        ),
        (
            "sleep",
            handler_fn(|call: Call| async move {
                let ms: u64 = call.arg(0)?;
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok::<_, HandlerError>(Value::Null)
            }),
        ),
    ]
}

/// Context map with the given fields.
pub fn ctx(fields: Value) -> Map<String, Value> {
    match fields {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
