//! # Per-Call Context
//!
//! The effective context handed to a handler is an explicit
//! `{client, server}` pair: `client` holds the validated `ctx` fields sent by
//! the caller, `server` the fields computed by the context extractor. Field
//! lookups consult both according to a [`ContextPrecedence`]; by default the
//! server-derived value wins over a same-named client value.

use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::handler::HandlerError;

/// Which side wins when client and server context share a field name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextPrecedence {
    #[default]
    ServerWins,
    ClientWins,
}

impl FromStr for ContextPrecedence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "server" | "server_wins" => Ok(Self::ServerWins),
            "client" | "client_wins" => Ok(Self::ClientWins),
            other => Err(format!("expected 'server' or 'client', got '{other}'")),
        }
    }
}

/// Context of a single call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Context {
    client: Map<String, Value>,
    server: Map<String, Value>,
    precedence: ContextPrecedence,
}

impl Context {
    pub fn new(
        client: Map<String, Value>,
        server: Map<String, Value>,
        precedence: ContextPrecedence,
    ) -> Self {
        Self {
            client,
            server,
            precedence,
        }
    }

    /// Fields supplied by the caller under `ctx`.
    pub fn client(&self) -> &Map<String, Value> {
        &self.client
    }

    /// Fields computed by the server's context extractor.
    pub fn server(&self) -> &Map<String, Value> {
        &self.server
    }

    pub fn precedence(&self) -> ContextPrecedence {
        self.precedence
    }

    /// Look up a field, honoring the precedence.
    pub fn get(&self, key: &str) -> Option<&Value> {
        let (first, second) = self.ordered();
        first.get(key).or_else(|| second.get(key))
    }

    /// Look up and deserialize a field.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T, HandlerError> {
        let value = self
            .get(key)
            .ok_or_else(|| HandlerError::internal(format!("context field '{key}' is missing")))?;
        serde_json::from_value(value.clone()).map_err(|e| {
            HandlerError::internal(format!("context field '{key}' has an unexpected shape: {e}"))
        })
    }

    /// The field-wise union of both sides.
    pub fn merged(&self) -> Map<String, Value> {
        let (winner, loser) = self.ordered();
        let mut merged = loser.clone();
        for (k, v) in winner {
            merged.insert(k.clone(), v.clone());
        }
        merged
    }

    fn ordered(&self) -> (&Map<String, Value>, &Map<String, Value>) {
        match self.precedence {
            ContextPrecedence::ServerWins => (&self.server, &self.client),
            ContextPrecedence::ClientWins => (&self.client, &self.server),
        }
    }
}

impl Serialize for Context {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.merged().serialize(serializer)
    }
}
