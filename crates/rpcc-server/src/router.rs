//! # Service Router
//!
//! Binds one service class to an Axum [`Router`]: one `POST /<method>`
//! route per declared method, each dispatching through a shared
//! [`Dispatcher`]. The method-to-handler map is fixed at construction and
//! must match the declared methods exactly.
//!
//! ```text
//! TraceLayer → body limit → Dispatcher::exec → handler
//! ```
//!
//! Unknown paths answer `400` with a "Method not supported" error, so the
//! client sees the same shape it gets for any other rejected call.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::Request;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use rpcc_core::{SchemaIr, ServiceModel};
use rpcc_schema::ValidationError;
use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::exec::{Dispatcher, ExecOptions, RpcResponse};
use crate::handler::{ContextExtractor, MethodHandler};
use crate::telemetry;

/// Builder for a service's router.
pub struct ServiceRouter {
    ir: Arc<SchemaIr>,
    model: Arc<ServiceModel>,
    class: String,
    config: ServerConfig,
    handlers: HashMap<String, MethodHandler>,
    extractor: Option<Arc<dyn ContextExtractor>>,
}

impl std::fmt::Debug for ServiceRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut methods: Vec<&String> = self.handlers.keys().collect();
        methods.sort();
        f.debug_struct("ServiceRouter")
            .field("class", &self.class)
            .field("config", &self.config)
            .field("handlers", &methods)
            .field("extractor", &self.extractor.is_some())
            .finish()
    }
}

impl ServiceRouter {
    pub fn new(
        ir: Arc<SchemaIr>,
        model: Arc<ServiceModel>,
        class: impl Into<String>,
        config: ServerConfig,
    ) -> Self {
        Self {
            ir,
            model,
            class: class.into(),
            config,
            handlers: HashMap::new(),
            extractor: None,
        }
    }

    /// Register the implementation of `method`. A later registration for
    /// the same name replaces the earlier one.
    pub fn handler(mut self, method: impl Into<String>, handler: MethodHandler) -> Self {
        self.handlers.insert(method.into(), handler);
        self
    }

    /// Register the hook computing ServerOnlyContext fields.
    pub fn context_extractor(mut self, extractor: impl ContextExtractor + 'static) -> Self {
        self.extractor = Some(Arc::new(extractor));
        self
    }

    /// Validate the handler map against the service and assemble the
    /// router.
    pub fn build(self) -> Result<Router, ServerError> {
        let dispatcher = Dispatcher::new(
            &self.ir,
            Arc::clone(&self.model),
            &self.class,
            ExecOptions::from(&self.config),
        )?;
        let class = dispatcher.class();

        if let Some(unknown) = self
            .handlers
            .keys()
            .filter(|name| class.method(name).is_none())
            .min()
        {
            return Err(ServerError::UnknownMethod {
                class: class.name.clone(),
                method: unknown.clone(),
            });
        }
        if let Some(missing) = class
            .methods
            .iter()
            .find(|m| !self.handlers.contains_key(&m.name))
        {
            return Err(ServerError::MissingHandler {
                class: class.name.clone(),
                method: missing.name.clone(),
            });
        }
        if self.model.context.server_only.is_present() && self.extractor.is_none() {
            return Err(ServerError::MissingContextExtractor(class.name.clone()));
        }

        let methods: Vec<String> = class.methods.iter().map(|m| m.name.clone()).collect();
        tracing::debug!(service = %class.name, methods = ?methods, "service router built");

        let service = Arc::new(ServiceState {
            dispatcher,
            handlers: self.handlers,
            extractor: self.extractor,
            body_limit: self.config.body_limit_bytes,
        });

        let mut router = Router::new();
        for method in methods {
            let state = Arc::clone(&service);
            let path = format!("/{method}");
            router = router.route(
                &path,
                post(move |request: Request| {
                    let state = Arc::clone(&state);
                    let method = method.clone();
                    async move { state.handle(&method, request).await }
                }),
            );
        }

        Ok(router
            .fallback(method_not_supported)
            .layer(telemetry::trace_layer()))
    }
}

struct ServiceState {
    dispatcher: Dispatcher,
    handlers: HashMap<String, MethodHandler>,
    extractor: Option<Arc<dyn ContextExtractor>>,
    body_limit: usize,
}

impl ServiceState {
    async fn handle(&self, method: &str, request: Request) -> Response {
        let (parts, body) = request.into_parts();
        let bytes = match axum::body::to_bytes(body, self.body_limit).await {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(method, error = %err, "request body rejected");
                return (
                    StatusCode::PAYLOAD_TOO_LARGE,
                    Json(json!({ "message": "Payload Too Large" })),
                )
                    .into_response();
            }
        };

        let Some(handler) = self.handlers.get(method) else {
            return not_supported(method);
        };
        self.dispatcher
            .exec(
                method,
                parse_body(&bytes),
                handler,
                self.extractor.as_deref(),
                &parts,
            )
            .await
            .into_response()
    }
}

/// An empty body reads as `{}`. Unparseable JSON becomes `null`, which
/// validation rejects as a malformed body.
fn parse_body(bytes: &[u8]) -> Value {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Value::Object(Map::new());
    }
    serde_json::from_slice(bytes).unwrap_or(Value::Null)
}

async fn method_not_supported(uri: Uri) -> Response {
    not_supported(uri.path().trim_start_matches('/'))
}

fn not_supported(method: &str) -> Response {
    let err = ValidationError::MethodNotFound {
        method: method.to_string(),
    };
    RpcResponse::bad_request(&err).into_response()
}

/// Bind `addr` (port 0 picks a free port) and serve `router` on a
/// background task. Returns the bound address and the server task.
pub async fn serve(router: Router, addr: SocketAddr) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    tracing::info!(%local, "rpcc service listening");

    let task = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router).await {
            tracing::error!(error = %err, "rpcc service stopped");
        }
    });
    Ok((local, task))
}
