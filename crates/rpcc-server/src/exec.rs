//! # Dispatch Executor
//!
//! Runs one call end to end:
//!
//! 1. Validate the body against the method's compiled validator. Failure
//!    answers `400 {message: "Bad Request", errors}`.
//! 2. When the service has a ServerOnlyContext, await the context extractor
//!    and combine its fields with the validated `ctx` fields. Only declared
//!    ClientContext attributes are taken from `ctx`; ServerOnlyContext
//!    fields come from the extractor alone.
//! 3. Invoke the handler with the context (only when the service declares
//!    one) and the parameters in declared order, omitted optional ones as
//!    `null`.
//! 4. A returned value answers `200` with Date fields normalized.
//! 5. A failure whose name is in the method's `throws` answers
//!    `500 {name, message}`. Anything else, including a failing context
//!    extractor or a panicking handler, answers
//!    `500 {name: "InternalServerError", message}` with the real message
//!    hidden unless stack traces are enabled.
//!
//! ## Observability
//!
//! Each call runs inside an `rpc.exec` span. Validation failures log at
//! `debug`, declared exceptions at `warn`, undeclared errors at `error`
//! with their full detail. The `rpcc_calls_total{method, outcome}` counter
//! is incremented once per call.

use std::sync::Arc;

use axum::http::request::Parts;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use rpcc_core::{normalize_dates, ClassDescriptor, MethodDescriptor, SchemaIr, ServiceModel};
use rpcc_schema::{ClassValidator, ValidationError, CTX_FIELD};
use serde_json::{json, Map, Value};
use tracing::Instrument;

use crate::config::ServerConfig;
use crate::context::{Context, ContextPrecedence};
use crate::error::ServerError;
use crate::handler::{Call, ContextExtractor, HandlerError, MethodHandler};

/// Wire name of every undeclared failure.
pub const INTERNAL_SERVER_ERROR: &str = "InternalServerError";

const GENERIC_INTERNAL_MESSAGE: &str = "Internal Server Error";

/// How a call ended, as recorded in `rpcc_calls_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Invalid,
    DeclaredError,
    InternalError,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Ok => "ok",
            Outcome::Invalid => "invalid",
            Outcome::DeclaredError => "declared_error",
            Outcome::InternalError => "internal_error",
        }
    }
}

/// Attached to every response so outer middleware can observe the method
/// and the effective context of a call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    pub method: String,
    pub context: Option<Context>,
    pub outcome: Outcome,
}

/// A wire response: status plus JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcResponse {
    pub status: StatusCode,
    pub body: Value,
    pub record: Option<CallRecord>,
}

impl RpcResponse {
    pub fn bad_request(err: &ValidationError) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: json!({ "message": "Bad Request", "errors": err.wire_errors() }),
            record: None,
        }
    }

    fn with_record(mut self, record: CallRecord) -> Self {
        self.record = Some(record);
        self
    }
}

impl IntoResponse for RpcResponse {
    fn into_response(self) -> Response {
        let mut response = (self.status, axum::Json(self.body)).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        if let Some(record) = self.record {
            response.extensions_mut().insert(record);
        }
        response
    }
}

/// Options that shape responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecOptions {
    pub include_stack_trace: bool,
    pub context_precedence: ContextPrecedence,
}

impl From<&ServerConfig> for ExecOptions {
    fn from(config: &ServerConfig) -> Self {
        Self {
            include_stack_trace: config.include_stack_trace,
            context_precedence: config.context_precedence,
        }
    }
}

/// Validates and executes calls for one service class.
#[derive(Debug)]
pub struct Dispatcher {
    model: Arc<ServiceModel>,
    class: ClassDescriptor,
    validator: ClassValidator,
    options: ExecOptions,
}

impl Dispatcher {
    pub fn new(
        ir: &SchemaIr,
        model: Arc<ServiceModel>,
        class: &str,
        options: ExecOptions,
    ) -> Result<Self, ServerError> {
        let descriptor = model
            .class(class)
            .filter(|c| c.is_service())
            .cloned()
            .ok_or_else(|| ServerError::NotAService(class.to_string()))?;
        let validator = ClassValidator::new(ir, &model, class)?;
        Ok(Self {
            model,
            class: descriptor,
            validator,
            options,
        })
    }

    pub fn class(&self) -> &ClassDescriptor {
        &self.class
    }

    pub fn model(&self) -> &ServiceModel {
        &self.model
    }

    /// Execute one call. Never fails: every outcome is a wire response.
    pub async fn exec(
        &self,
        method: &str,
        raw_body: Value,
        handler: &MethodHandler,
        extract_context: Option<&dyn ContextExtractor>,
        request: &Parts,
    ) -> RpcResponse {
        let span = tracing::info_span!("rpc.exec", service = %self.class.name, method = %method);
        let response = self
            .exec_inner(method, raw_body, handler, extract_context, request)
            .instrument(span)
            .await;

        let outcome = response.record.as_ref().map_or(Outcome::Invalid, |r| r.outcome);
        metrics::counter!(
            "rpcc_calls_total",
            "method" => method.to_string(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
        response
    }

    async fn exec_inner(
        &self,
        method: &str,
        raw_body: Value,
        handler: &MethodHandler,
        extract_context: Option<&dyn ContextExtractor>,
        request: &Parts,
    ) -> RpcResponse {
        let body = match self.validator.validate(method, raw_body) {
            Ok(body) => body,
            Err(err) => {
                tracing::debug!(error = %err, "request rejected");
                return RpcResponse::bad_request(&err);
            }
        };
        let Some(descriptor) = self.class.method(method) else {
            let err = ValidationError::MethodNotFound {
                method: method.to_string(),
            };
            return RpcResponse::bad_request(&err);
        };

        let context = match self.build_context(&body, extract_context, request).await {
            Ok(context) => context,
            Err(err) => return self.failure(descriptor, err, None),
        };

        let mut args = Vec::with_capacity(descriptor.parameters.len());
        for param in &descriptor.parameters {
            let mut value = body.get(&param.name).cloned().unwrap_or(Value::Null);
            if let Err(err) = normalize_dates(&mut value, &param.type_expr, &self.model) {
                return self.failure(descriptor, HandlerError::internal(err.to_string()), context);
            }
            args.push(value);
        }

        // Spawned so a panicking handler becomes an undeclared error instead
        // of tearing down the connection.
        let call = Call::new(method, context.clone(), args);
        let result = match tokio::spawn(handler(call)).await {
            Ok(result) => result,
            Err(join_err) => Err(HandlerError::internal(format!("handler aborted: {join_err}"))),
        };

        match result {
            Ok(mut value) => {
                if let Err(err) = normalize_dates(&mut value, &descriptor.return_type, &self.model) {
                    let err = HandlerError::internal(format!("invalid return value: {err}"));
                    return self.failure(descriptor, err, context);
                }
                RpcResponse {
                    status: StatusCode::OK,
                    body: value,
                    record: None,
                }
                .with_record(CallRecord {
                    method: method.to_string(),
                    context,
                    outcome: Outcome::Ok,
                })
            }
            Err(err) => self.failure(descriptor, err, context),
        }
    }

    async fn build_context(
        &self,
        body: &Map<String, Value>,
        extract_context: Option<&dyn ContextExtractor>,
        request: &Parts,
    ) -> Result<Option<Context>, HandlerError> {
        let roles = &self.model.context;
        if !roles.has_context() {
            return Ok(None);
        }

        let client = match (roles.client.is_present(), body.get(CTX_FIELD)) {
            (true, Some(Value::Object(fields))) => self.accepted_client_fields(fields),
            _ => Map::new(),
        };

        let server = if roles.server_only.is_present() {
            let extractor = extract_context.ok_or_else(|| {
                HandlerError::internal("no context extractor registered for the server-only context")
            })?;
            // Extractor failures never count as declared exceptions.
            extractor.extract(request).await.map_err(|err| {
                let undeclared = HandlerError::internal(format!("context extraction failed: {err}"));
                match err.stack() {
                    Some(stack) => undeclared.with_stack(stack),
                    None => undeclared,
                }
            })?
        } else {
            Map::new()
        };

        Ok(Some(Context::new(client, server, self.options.context_precedence)))
    }

    /// Caller fields that may enter the context: declared ClientContext
    /// attributes only. Unless the client wins, a name the ServerOnlyContext
    /// also declares is dropped so the caller cannot supply it when the
    /// extractor leaves it out.
    fn accepted_client_fields(&self, fields: &Map<String, Value>) -> Map<String, Value> {
        let declared = self.model.client_context_fields();
        let server_only = match self.options.context_precedence {
            ContextPrecedence::ServerWins => self.model.server_context_fields(),
            ContextPrecedence::ClientWins => Vec::new(),
        };
        fields
            .iter()
            .filter(|(name, _)| {
                declared.contains(&name.as_str()) && !server_only.contains(&name.as_str())
            })
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    fn failure(
        &self,
        method: &MethodDescriptor,
        err: HandlerError,
        context: Option<Context>,
    ) -> RpcResponse {
        let include_stack = self.options.include_stack_trace;
        let declared = method.declares(err.name());

        let mut body = Map::new();
        let outcome = if declared {
            tracing::warn!(name = %err.name(), message = %err.message(), "handler raised a declared exception");
            body.insert("name".into(), Value::from(err.name()));
            body.insert("message".into(), Value::from(err.message()));
            Outcome::DeclaredError
        } else {
            tracing::error!(
                name = %err.name(),
                message = %err.message(),
                stack = err.stack().unwrap_or(""),
                "call failed with an undeclared error"
            );
            let message = if include_stack {
                err.message()
            } else {
                GENERIC_INTERNAL_MESSAGE
            };
            body.insert("name".into(), Value::from(INTERNAL_SERVER_ERROR));
            body.insert("message".into(), Value::from(message));
            Outcome::InternalError
        };
        if include_stack {
            if let Some(stack) = err.stack() {
                body.insert("stack".into(), Value::from(stack));
            }
        }

        RpcResponse {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: Value::Object(body),
            record: None,
        }
        .with_record(CallRecord {
            method: method.name.clone(),
            context,
            outcome,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextPrecedence;
    use crate::handler::handler_fn;
    use rpcc_core::ContextConfig;

    fn ir() -> SchemaIr {
        SchemaIr::from_value(json!({
            "definitions": {
                "RuntimeError": {
                    "type": "object",
                    "properties": {
                        "message": { "type": "string" },
                        "name": { "type": "string" },
                        "stack": { "type": "string" }
                    },
                    "required": ["message", "name"]
                },
                "ClientContext": {
                    "type": "object",
                    "properties": { "debugId": { "type": "string" }, "ip": { "type": "string" } }
                },
                "ServerOnlyContext": {
                    "type": "object",
                    "properties": { "ip": { "type": "string" } },
                    "required": ["ip"]
                },
                "Svc": {
                    "type": "object",
                    "properties": {
                        "hello": {
                            "type": "object",
                            "properties": {
                                "params": {
                                    "type": "object",
                                    "properties": {
                                        "name": { "type": "string" },
                                        "when": { "type": "string", "format": "date-time" }
                                    },
                                    "required": ["name"],
                                    "propertyOrder": ["name", "when"]
                                },
                                "returns": { "type": "string" },
                                "throws": { "$ref": "#/definitions/RuntimeError" }
                            }
                        }
                    }
                }
            }
        }))
        .unwrap()
    }

    fn dispatcher(config: ContextConfig, options: ExecOptions) -> Dispatcher {
        let ir = ir();
        let model = Arc::new(rpcc_schema::compile(&ir, &config).unwrap());
        Dispatcher::new(&ir, model, "Svc", options).unwrap()
    }

    fn no_context() -> ContextConfig {
        ContextConfig {
            client: rpcc_core::ContextSetting::Disabled,
            server_only: rpcc_core::ContextSetting::Disabled,
        }
    }

    fn parts() -> Parts {
        axum::http::Request::builder().body(()).unwrap().into_parts().0
    }

    fn echo() -> MethodHandler {
        handler_fn(|call: Call| async move {
            let name: String = call.arg(0)?;
            let merged = call.context().map(|c| Value::Object(c.merged()));
            Ok::<_, HandlerError>(json!({ "name": name, "when": call.args()[1], "ctx": merged }))
        })
    }

    fn failing(name: &'static str) -> MethodHandler {
        handler_fn(move |_call: Call| async move {
            Err::<Value, _>(HandlerError::new(name, "heh").with_stack("trace"))
        })
    }

    #[tokio::test]
    async fn success_passes_args_in_order_with_null_for_missing() {
        let d = dispatcher(no_context(), ExecOptions::default());
        let res = d.exec("hello", json!({ "name": "bob" }), &echo(), None, &parts()).await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body, json!({ "name": "bob", "when": null, "ctx": null }));
        let record = res.record.unwrap();
        assert_eq!(record.method, "hello");
        assert_eq!(record.outcome, Outcome::Ok);
    }

    #[tokio::test]
    async fn date_params_are_normalized_before_the_handler() {
        let d = dispatcher(no_context(), ExecOptions::default());
        let body = json!({ "name": "a", "when": "2026-01-15T13:00:00+01:00" });
        let res = d.exec("hello", body, &echo(), None, &parts()).await;
        assert_eq!(res.body["when"], "2026-01-15T12:00:00.000Z");
    }

    #[tokio::test]
    async fn validation_failure_is_400() {
        let d = dispatcher(no_context(), ExecOptions::default());
        let res = d.exec("hello", json!({}), &echo(), None, &parts()).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(res.body["message"], "Bad Request");
        assert_eq!(res.body["errors"].as_array().unwrap().len(), 1);
        assert!(res.record.is_none());
    }

    #[tokio::test]
    async fn declared_exception_keeps_identity() {
        let d = dispatcher(no_context(), ExecOptions::default());
        let res = d
            .exec("hello", json!({ "name": "x" }), &failing("RuntimeError"), None, &parts())
            .await;
        assert_eq!(res.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.body, json!({ "name": "RuntimeError", "message": "heh" }));
        assert_eq!(res.record.unwrap().outcome, Outcome::DeclaredError);
    }

    #[tokio::test]
    async fn undeclared_error_is_anonymized() {
        let d = dispatcher(no_context(), ExecOptions::default());
        let res = d
            .exec("hello", json!({ "name": "x" }), &failing("UnknownError"), None, &parts())
            .await;
        assert_eq!(
            res.body,
            json!({ "name": "InternalServerError", "message": "Internal Server Error" })
        );
    }

    #[tokio::test]
    async fn stack_trace_only_when_enabled() {
        let options = ExecOptions {
            include_stack_trace: true,
            ..ExecOptions::default()
        };
        let d = dispatcher(no_context(), options);
        let res = d
            .exec("hello", json!({ "name": "x" }), &failing("UnknownError"), None, &parts())
            .await;
        assert_eq!(res.body["name"], "InternalServerError");
        assert_eq!(res.body["message"], "heh");
        assert_eq!(res.body["stack"], "trace");
    }

    #[tokio::test]
    async fn panicking_handler_is_an_internal_error() {
        let d = dispatcher(no_context(), ExecOptions::default());
        let handler = handler_fn(|_call: Call| async move {
            if true {
                panic!("boom");
            }
            Ok::<_, HandlerError>(Value::Null)
        });
        let res = d.exec("hello", json!({ "name": "x" }), &handler, None, &parts()).await;
        assert_eq!(res.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.body["name"], "InternalServerError");
    }

    #[tokio::test]
    async fn contexts_are_combined_with_server_winning() {
        let d = dispatcher(ContextConfig::default(), ExecOptions::default());
        let extractor = |_parts: &Parts| async move {
            let mut fields = Map::new();
            fields.insert("ip".into(), json!("10.0.0.1"));
            Ok::<_, HandlerError>(fields)
        };
        let body = json!({ "name": "x", "ctx": { "debugId": "d1", "ip": "spoofed" } });
        let res = d.exec("hello", body, &echo(), Some(&extractor), &parts()).await;
        assert_eq!(res.body["ctx"], json!({ "debugId": "d1", "ip": "10.0.0.1" }));
        let record = res.record.unwrap();
        assert_eq!(record.context.unwrap().server()["ip"], "10.0.0.1");
    }

    #[tokio::test]
    async fn client_precedence_is_configurable() {
        let options = ExecOptions {
            context_precedence: ContextPrecedence::ClientWins,
            ..ExecOptions::default()
        };
        let d = dispatcher(ContextConfig::default(), options);
        let extractor = |_parts: &Parts| async move {
            let mut fields = Map::new();
            fields.insert("ip".into(), json!("10.0.0.1"));
            Ok::<_, HandlerError>(fields)
        };
        let body = json!({ "name": "x", "ctx": { "ip": "client" } });
        let res = d.exec("hello", body, &echo(), Some(&extractor), &parts()).await;
        assert_eq!(res.body["ctx"]["ip"], "client");
    }

    fn empty_extractor() -> impl ContextExtractor {
        |_parts: &Parts| async move { Ok::<_, HandlerError>(Map::new()) }
    }

    #[tokio::test]
    async fn undeclared_ctx_fields_are_dropped() {
        let d = dispatcher(ContextConfig::default(), ExecOptions::default());
        let body = json!({ "name": "x", "ctx": { "debugId": "d", "role": "admin" } });
        let extractor = empty_extractor();
        let res = d.exec("hello", body, &echo(), Some(&extractor), &parts()).await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body["ctx"], json!({ "debugId": "d" }));
        let context = res.record.unwrap().context.unwrap();
        assert!(context.get("role").is_none());
    }

    #[tokio::test]
    async fn caller_cannot_fill_a_server_field_the_extractor_omits() {
        let d = dispatcher(ContextConfig::default(), ExecOptions::default());
        let body = json!({ "name": "x", "ctx": { "debugId": "d", "ip": "spoofed" } });
        let extractor = empty_extractor();
        let res = d.exec("hello", body, &echo(), Some(&extractor), &parts()).await;
        assert_eq!(res.body["ctx"], json!({ "debugId": "d" }));
        let context = res.record.unwrap().context.unwrap();
        assert!(context.get("ip").is_none());
        assert!(!context.client().contains_key("ip"));
    }

    #[tokio::test]
    async fn failing_extractor_is_an_undeclared_error() {
        let d = dispatcher(ContextConfig::default(), ExecOptions::default());
        let extractor = |_parts: &Parts| async move {
            Err::<Map<String, Value>, _>(HandlerError::new("RuntimeError", "no ip"))
        };
        let res = d
            .exec("hello", json!({ "name": "x" }), &echo(), Some(&extractor), &parts())
            .await;
        assert_eq!(res.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.body["name"], "InternalServerError");
        assert_eq!(res.record.unwrap().outcome, Outcome::InternalError);
    }

    #[test]
    fn rejects_non_service_classes() {
        let ir = ir();
        let model = Arc::new(rpcc_schema::compile(&ir, &ContextConfig::default()).unwrap());
        let err = Dispatcher::new(&ir, model, "ClientContext", ExecOptions::default()).unwrap_err();
        assert!(matches!(err, ServerError::NotAService(_)));
    }
}
