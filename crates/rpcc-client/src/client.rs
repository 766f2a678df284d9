//! # Client Runtime
//!
//! [`RpcClient`] calls the methods of one service. Each call is a single
//! `POST <service_url>/<method>` with a flattened JSON body:
//!
//! - parameters in declared order, omitted optional ones left out;
//! - Date parameters rendered as ISO-8601 strings;
//! - only ClientContext fields of the caller's context, under `ctx`.
//!
//! Responses are mapped back through the method's descriptor: `400` becomes
//! [`ClientError::Validation`], a declared exception name becomes
//! [`ClientError::Declared`], and Date fields of the return value are
//! normalized before the value is handed back.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use rpcc_core::{normalize_dates, ClassDescriptor, MethodDescriptor, ServiceModel};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::config::{ClientConfig, ConfigError};
use crate::error::{ClientError, DeclaredException, RequestOptions};

const CTX_FIELD: &str = "ctx";
const INTERNAL_SERVER_ERROR: &str = "InternalServerError";

/// Per-call options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Overrides the configured default timeout.
    pub timeout_ms: Option<u64>,
    /// Sent after the configured default headers.
    pub headers: Vec<(String, String)>,
}

impl CallOptions {
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Client for one service class.
#[derive(Debug, Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    config: ClientConfig,
    model: Arc<ServiceModel>,
    service: ClassDescriptor,
}

impl RpcClient {
    pub fn new(
        config: ClientConfig,
        model: Arc<ServiceModel>,
        service: &str,
    ) -> Result<Self, ClientError> {
        let service = model
            .class(service)
            .filter(|c| c.is_service())
            .cloned()
            .ok_or_else(|| ClientError::NotAService(service.to_string()))?;

        let http = reqwest::Client::builder()
            .default_headers(header_map(&config.default_headers)?)
            .build()
            .map_err(|e| ClientError::Request {
                method: "client_init".into(),
                options: RequestOptions {
                    service_url: config.service_url.to_string(),
                    timeout_ms: config.default_timeout_ms,
                },
                source: e,
            })?;

        Ok(Self {
            http,
            config,
            model,
            service,
        })
    }

    pub fn service(&self) -> &ClassDescriptor {
        &self.service
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Call `method` with positional `params`.
    ///
    /// `context` may hold any fields; only the ClientContext attributes are
    /// sent.
    pub async fn call(
        &self,
        method: &str,
        params: Vec<Value>,
        context: Option<&Map<String, Value>>,
        options: CallOptions,
    ) -> Result<Value, ClientError> {
        let descriptor = self
            .service
            .method(method)
            .ok_or_else(|| ClientError::UnknownMethod {
                service: self.service.name.clone(),
                method: method.to_string(),
            })?;
        let body = self.request_body(descriptor, params, context)?;

        let timeout_ms = options.timeout_ms.or(self.config.default_timeout_ms);
        let request_options = RequestOptions {
            service_url: self.config.service_url.to_string(),
            timeout_ms,
        };

        let mut request = self.http.post(self.config.method_url(method)).json(&body);
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        tracing::debug!(service = %self.service.name, method, ?timeout_ms, "rpc call");
        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, text))
        };

        let outcome = match timeout_ms {
            Some(ms) => {
                tokio::select! {
                    outcome = exchange => outcome,
                    () = tokio::time::sleep(Duration::from_millis(ms)) => {
                        tracing::warn!(method, timeout_ms = ms, "rpc call timed out");
                        return Err(ClientError::Timeout {
                            method: method.to_string(),
                            options: request_options,
                        });
                    }
                }
            }
            None => exchange.await,
        };

        let (status, text) = outcome.map_err(|source| ClientError::Request {
            method: method.to_string(),
            options: request_options,
            source,
        })?;
        interpret_response(&self.model, descriptor, status, &text)
    }

    /// Call `method` and deserialize the return value.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
        context: Option<&Map<String, Value>>,
        options: CallOptions,
    ) -> Result<T, ClientError> {
        let value = self.call(method, params, context, options).await?;
        serde_json::from_value(value).map_err(|e| ClientError::Decode {
            method: method.to_string(),
            reason: e.to_string(),
        })
    }

    fn request_body(
        &self,
        method: &MethodDescriptor,
        params: Vec<Value>,
        context: Option<&Map<String, Value>>,
    ) -> Result<Map<String, Value>, ClientError> {
        if params.len() > method.parameters.len() {
            return Err(ClientError::InvalidArguments {
                method: method.name.clone(),
                reason: format!(
                    "expected at most {} argument(s), got {}",
                    method.parameters.len(),
                    params.len()
                ),
            });
        }

        let mut body = Map::new();
        for (param, mut value) in method.parameters.iter().zip(params) {
            if value.is_null() && param.optional {
                continue;
            }
            normalize_dates(&mut value, &param.type_expr, &self.model).map_err(|e| {
                ClientError::InvalidArguments {
                    method: method.name.clone(),
                    reason: format!("parameter '{}': {e}", param.name),
                }
            })?;
            body.insert(param.name.clone(), value);
        }

        // ServerOnlyContext fields are never sent.
        if let (Some(context), true) = (context, self.model.context.client.is_present()) {
            let fields = self.model.client_context_fields();
            let ctx: Map<String, Value> = context
                .iter()
                .filter(|(key, _)| fields.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            body.insert(CTX_FIELD.into(), Value::Object(ctx));
        }
        Ok(body)
    }
}

fn header_map(headers: &[(String, String)]) -> Result<HeaderMap, ConfigError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ConfigError::InvalidHeader(name.clone()))?;
        let header_value =
            HeaderValue::from_str(value).map_err(|_| ConfigError::InvalidHeader(name.clone()))?;
        map.append(header_name, header_value);
    }
    Ok(map)
}

/// Map a response to the call's result.
pub fn interpret_response(
    model: &ServiceModel,
    method: &MethodDescriptor,
    status: StatusCode,
    text: &str,
) -> Result<Value, ClientError> {
    let parsed: Option<Value> = serde_json::from_str(text).ok();

    if status == StatusCode::BAD_REQUEST {
        let errors = match parsed {
            Some(Value::Object(mut body)) => match body.remove("errors") {
                Some(Value::Array(errors)) => errors,
                _ => vec![Value::Object(body)],
            },
            Some(other) => vec![other],
            None => Vec::new(),
        };
        return Err(ClientError::Validation {
            method: method.name.clone(),
            errors,
        });
    }

    if status.is_server_error() {
        if let Some(Value::Object(body)) = &parsed {
            if let Some(err) = exception_from(method, body) {
                return Err(err);
            }
        }
    }

    if !status.is_success() {
        let reason = match parsed {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None if !text.trim().is_empty() => text.to_string(),
            None => status.canonical_reason().unwrap_or("Unknown Status").to_string(),
        };
        return Err(ClientError::Status {
            method: method.name.clone(),
            status: status.as_u16(),
            reason,
        });
    }

    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    let mut value = parsed.ok_or_else(|| ClientError::Decode {
        method: method.name.clone(),
        reason: "response body is not JSON".into(),
    })?;

    if let Value::Object(body) = &value {
        let declared = body
            .get("name")
            .and_then(Value::as_str)
            .is_some_and(|name| method.declares(name));
        if declared && body.get("message").is_some_and(Value::is_string) {
            if let Some(err) = exception_from(method, body) {
                return Err(err);
            }
        }
    }

    normalize_dates(&mut value, &method.return_type, model).map_err(|e| ClientError::Decode {
        method: method.name.clone(),
        reason: e.to_string(),
    })?;
    Ok(value)
}

fn exception_from(method: &MethodDescriptor, body: &Map<String, Value>) -> Option<ClientError> {
    let name = body.get("name")?.as_str()?;
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let stack = body.get("stack").and_then(Value::as_str).map(str::to_string);

    if method.declares(name) {
        Some(ClientError::Declared(DeclaredException {
            method: method.name.clone(),
            name: name.to_string(),
            message,
            stack,
        }))
    } else if name == INTERNAL_SERVER_ERROR {
        Some(ClientError::InternalServerError {
            method: method.name.clone(),
            message,
            stack,
        })
    } else {
        None
    }
}
