//! Per-service context configuration.
//!
//! A service may declare a `ClientContext` (fields supplied by the caller on
//! every request) and a `ServerOnlyContext` (fields computed by the server
//! from the transport request). Each is independently absent, disabled or
//! present, and either may be substituted by a custom type.

use serde::Serialize;

/// Conventional name of the caller-supplied context type.
pub const CLIENT_CONTEXT: &str = "ClientContext";

/// Conventional name of the server-computed context type.
pub const SERVER_ONLY_CONTEXT: &str = "ServerOnlyContext";

/// How one context role is resolved against the IR.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ContextSetting {
    /// Use the conventional type name if the IR defines it.
    #[default]
    Default,
    /// Never use a context for this role.
    Disabled,
    /// Use this definition instead of the conventional one.
    Custom(String),
}

/// Compiler input selecting the context types of a schema.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContextConfig {
    pub client: ContextSetting,
    pub server_only: ContextSetting,
}

/// Resolved state of one context role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "type", rename_all = "camelCase")]
pub enum ContextState {
    Absent,
    Disabled,
    Present(String),
}

impl ContextState {
    pub fn is_present(&self) -> bool {
        matches!(self, ContextState::Present(_))
    }

    /// Name of the context definition when present.
    pub fn type_name(&self) -> Option<&str> {
        match self {
            ContextState::Present(name) => Some(name),
            _ => None,
        }
    }
}

/// Resolved context roles of a service model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextModel {
    pub client: ContextState,
    pub server_only: ContextState,
}

impl ContextModel {
    /// Whether handlers receive a context argument at all.
    pub fn has_context(&self) -> bool {
        self.client.is_present() || self.server_only.is_present()
    }
}

impl Default for ContextModel {
    fn default() -> Self {
        Self {
            client: ContextState::Absent,
            server_only: ContextState::Absent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_context_when_either_role_present() {
        let mut model = ContextModel::default();
        assert!(!model.has_context());
        model.server_only = ContextState::Present(SERVER_ONLY_CONTEXT.into());
        assert!(model.has_context());
        model.server_only = ContextState::Disabled;
        assert!(!model.has_context());
    }

    #[test]
    fn state_serializes_tagged() {
        let json = serde_json::to_value(ContextState::Present("Ctx".into())).unwrap();
        assert_eq!(json, serde_json::json!({ "state": "present", "type": "Ctx" }));
        let json = serde_json::to_value(ContextState::Disabled).unwrap();
        assert_eq!(json, serde_json::json!({ "state": "disabled" }));
    }
}
