// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Connection model for storage and API.

use super::Provider;
use serde::{Deserialize, Serialize};
use std::fmt;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Connection lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Active,
    Disconnected,
}

/// A user's link to one provider account, stored in the `connections` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    /// Document ID, derived from (user_id, provider)
    pub id: String,
    /// Owning profile
    pub user_id: String,
    pub provider: Provider,
    /// Stable account id on the provider side
    pub provider_user_id: String,
    /// Identifies this particular connect; a reconnect gets a new one
    #[serde(default)]
    pub generation: String,
    /// Encrypted access token (base64)
    pub access_token_encrypted: String,
    /// Encrypted refresh token (base64), if the provider issued one
    pub refresh_token_encrypted: Option<String>,
    /// When the access token expires (ISO 8601)
    pub expires_at: Option<String>,
    #[serde(default)]
    pub status: ConnectionStatus,
    /// When the connection was created (ISO 8601)
    pub created_at: String,
}

/// Connection without token material, for API responses.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ConnectionSummary {
    pub id: String,
    #[cfg_attr(feature = "binding-generation", ts(type = "string"))]
    pub provider: Provider,
    pub provider_user_id: String,
    pub status: ConnectionStatus,
    pub created_at: String,
}

impl From<&Connection> for ConnectionSummary {
    fn from(conn: &Connection) -> Self {
        Self {
            id: conn.id.clone(),
            provider: conn.provider,
            provider_user_id: conn.provider_user_id.clone(),
            status: conn.status,
            created_at: conn.created_at.clone(),
        }
    }
}

/// Plaintext tokens returned by a code exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Access token lifetime in seconds
    pub expires_in: Option<u64>,
}

// Token values must never reach logs.
impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token_len", &self.access_token.len())
            .field(
                "refresh_token_len",
                &self.refresh_token.as_ref().map(|t| t.len()),
            )
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_set_debug_hides_values() {
        let tokens = TokenSet {
            access_token: "AT-very-secret".to_string(),
            refresh_token: Some("RT-very-secret".to_string()),
            expires_in: Some(3600),
        };
        let printed = format!("{:?}", tokens);
        assert!(!printed.contains("very-secret"));
        assert!(printed.contains("access_token_len: 14"));
    }

    #[test]
    fn test_status_defaults_to_active() {
        let json = serde_json::json!({
            "id": "u1_spotify",
            "user_id": "u1",
            "provider": "spotify",
            "provider_user_id": "sp1",
            "access_token_encrypted": "x",
            "refresh_token_encrypted": null,
            "expires_at": null,
            "created_at": "2026-01-01T00:00:00Z"
        });
        let conn: Connection = serde_json::from_value(json).unwrap();
        assert_eq!(conn.status, ConnectionStatus::Active);
    }
}
