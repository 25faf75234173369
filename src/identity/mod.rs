//! Verified principal passed into every core operation.
//!
//! Authentication itself lives outside the daemon: the fronting identity
//! service verifies credentials and injects `x-actor-id` / `x-actor-role`
//! headers on every proxied request. This module turns those headers into a
//! single typed `Principal` once, instead of re-decoding a role field per
//! table lookup.

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

/// Capability set of a verified actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Requester,
    Counselor,
    Admin,
}

impl Role {
    /// Canonical wire/SQL string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Requester => "requester",
            Role::Counselor => "counselor",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "requester" => Some(Role::Requester),
            "counselor" => Some(Role::Counselor),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    /// Staff roles see safety flags and all notifications addressed to them.
    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Counselor | Role::Admin)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An already-authenticated actor. The daemon never re-verifies credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub role: Role,
}

impl Principal {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self { id: id.into(), role }
    }
}

fn unauthorized(message: &str) -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": message })))
}

impl<S: Send + Sync> FromRequestParts<S> for Principal {
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(ACTOR_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| unauthorized("Missing verified principal"))?;

        let role = parts
            .headers
            .get(ACTOR_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(Role::parse)
            .ok_or_else(|| unauthorized("Missing or unknown principal role"))?;

        Ok(Principal::new(id, role))
    }
}
