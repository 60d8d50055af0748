//! Application configuration loaded from environment variables.
//!
//! Provider client secrets are read once at startup and kept in memory.
//! A provider without a configured client id is simply not registered.

use crate::models::Provider;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

/// Default lifetime of an unfinished popup flow.
const DEFAULT_PENDING_FLOW_TTL_SECS: u64 = 10 * 60;

/// OAuth client credentials for one provider.
#[derive(Clone)]
pub struct ProviderCredentials {
    pub client_id: String,
    pub client_secret: String,
    /// Replaces the scheme and host of every endpoint of this provider
    /// (`{PROVIDER}_API_BASE_URL`), e.g. for a local stub server.
    pub api_base_url: Option<String>,
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("api_base_url", &self.api_base_url)
            .finish()
    }
}

/// How the coordinator treats the `state` echoed back by the popup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateVerification {
    /// Reject callbacks whose state does not match a pending flow.
    Strict,
    /// Log the mismatch and fall back to the pending flow for the provider.
    Lenient,
}

/// What `disconnect` removes besides the connection row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectPolicy {
    /// Delete the connection's records and data points too.
    Cascade,
    /// Delete only the connection row; child rows are left to the storage layer.
    ConnectionOnly,
}

/// Which storage backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Firestore,
    Memory,
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// Origin of the host page; popup messages from any other origin are dropped
    pub public_origin: String,
    /// OAuth redirect URI registered with every provider
    pub redirect_uri: String,
    /// GCP project ID
    pub gcp_project_id: String,
    /// GCP region (KMS key location)
    pub gcp_region: String,
    /// Server port
    pub port: u16,
    pub storage: StorageBackend,
    pub state_verification: StateVerification,
    pub pending_flow_ttl: Duration,
    pub disconnect_policy: DisconnectPolicy,

    // --- Secrets ---
    /// JWT signing key for session tokens (raw bytes)
    pub jwt_signing_key: Vec<u8>,
    /// Per-provider OAuth client credentials
    pub providers: HashMap<Provider, ProviderCredentials>,
}

impl Config {
    /// Default config for testing only.
    ///
    /// Every provider is registered with dummy credentials.
    pub fn test_default() -> Self {
        let providers = Provider::ALL
            .iter()
            .map(|p| {
                (
                    *p,
                    ProviderCredentials {
                        client_id: format!("{}_client_id", p),
                        client_secret: format!("{}_client_secret", p),
                        api_base_url: None,
                    },
                )
            })
            .collect();

        Self {
            public_origin: "http://localhost:5173".to_string(),
            redirect_uri: "http://localhost:5173/oauth/callback".to_string(),
            gcp_project_id: "test-project".to_string(),
            gcp_region: "us-west1".to_string(),
            port: 8080,
            storage: StorageBackend::Memory,
            state_verification: StateVerification::Strict,
            pending_flow_ttl: Duration::from_secs(DEFAULT_PENDING_FLOW_TTL_SECS),
            disconnect_policy: DisconnectPolicy::Cascade,
            jwt_signing_key: b"test_jwt_key_32_bytes_minimum!!".to_vec(),
            providers,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// For local development, values can be set in a `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let public_origin = env::var("PUBLIC_ORIGIN")
            .unwrap_or_else(|_| "http://localhost:5173".to_string())
            .trim_end_matches('/')
            .to_string();

        let redirect_uri = env::var("OAUTH_REDIRECT_URI")
            .unwrap_or_else(|_| format!("{}/oauth/callback", public_origin));

        let mut providers = HashMap::new();
        for provider in Provider::ALL {
            let prefix = provider.as_str().to_ascii_uppercase();
            let Ok(client_id) = env::var(format!("{}_CLIENT_ID", prefix)) else {
                continue;
            };
            let client_secret = env::var(format!("{}_CLIENT_SECRET", prefix))
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::MissingSecret(provider))?;
            let api_base_url = env::var(format!("{}_API_BASE_URL", prefix))
                .ok()
                .map(|v| v.trim().trim_end_matches('/').to_string())
                .filter(|v| !v.is_empty());
            providers.insert(
                provider,
                ProviderCredentials {
                    client_id: client_id.trim().to_string(),
                    client_secret,
                    api_base_url,
                },
            );
        }

        Ok(Self {
            public_origin,
            redirect_uri,
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            gcp_region: env::var("GCP_REGION").unwrap_or_else(|_| "us-west1".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            storage: match env::var("STORAGE").as_deref() {
                Ok("memory") => StorageBackend::Memory,
                Ok("firestore") | Err(_) => StorageBackend::Firestore,
                Ok(other) => return Err(ConfigError::Invalid("STORAGE", other.to_string())),
            },
            state_verification: match env::var("STATE_VERIFICATION").as_deref() {
                Ok("lenient") => StateVerification::Lenient,
                Ok("strict") | Err(_) => StateVerification::Strict,
                Ok(other) => {
                    return Err(ConfigError::Invalid(
                        "STATE_VERIFICATION",
                        other.to_string(),
                    ))
                }
            },
            pending_flow_ttl: Duration::from_secs(
                env::var("PENDING_FLOW_TTL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_PENDING_FLOW_TTL_SECS),
            ),
            disconnect_policy: match env::var("DISCONNECT_POLICY").as_deref() {
                Ok("connection_only") => DisconnectPolicy::ConnectionOnly,
                Ok("cascade") | Err(_) => DisconnectPolicy::Cascade,
                Ok(other) => {
                    return Err(ConfigError::Invalid("DISCONNECT_POLICY", other.to_string()))
                }
            },
            jwt_signing_key: env::var("JWT_SIGNING_KEY")
                .map_err(|_| ConfigError::Missing("JWT_SIGNING_KEY"))?
                .into_bytes(),
            providers,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Client id configured for {0} but its client secret is missing")]
    MissingSecret(Provider),

    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}
