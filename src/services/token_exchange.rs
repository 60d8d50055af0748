// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Authorization code to token exchange.
//!
//! One form-encoded POST per attempt, no retries. The client authenticates
//! either with a Basic header or with the secret in the body, as the
//! registry says. Error text is redacted before it leaves this module.

use crate::error::AppError;
use crate::models::TokenSet;
use crate::services::registry::{AuthStyle, ProviderDescriptor};
use serde::Deserialize;

/// Longest raw error body kept in an error message.
const MAX_ERROR_BODY: usize = 256;

/// Successful token endpoint response.
#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

/// Error bodies seen across providers.
#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    /// RFC 6749 `{error, error_description}`
    OAuth {
        error: String,
        error_description: Option<String>,
    },
    /// Graph API `{error: {message, type, code}}`
    Graph { error: GraphError },
    /// Helix `{status, message}`
    Helix { status: u16, message: String },
}

#[derive(Deserialize)]
struct GraphError {
    message: String,
    #[serde(rename = "type")]
    kind: Option<String>,
    code: Option<i64>,
}

impl ErrorBody {
    /// Split into (provider code, message).
    fn into_parts(self) -> (Option<String>, String) {
        match self {
            ErrorBody::OAuth {
                error,
                error_description,
            } => {
                let message = error_description.unwrap_or_else(|| error.clone());
                (Some(error), message)
            }
            ErrorBody::Graph { error } => {
                let code = error
                    .code
                    .map(|c| c.to_string())
                    .or(error.kind);
                (code, error.message)
            }
            ErrorBody::Helix { status, message } => (Some(status.to_string()), message),
        }
    }
}

/// Token exchange client shared by all providers.
#[derive(Clone)]
pub struct TokenExchangeClient {
    http: reqwest::Client,
    redirect_uri: String,
}

impl TokenExchangeClient {
    pub fn new(http: reqwest::Client, redirect_uri: String) -> Self {
        Self { http, redirect_uri }
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange(
        &self,
        descriptor: &ProviderDescriptor,
        code: &str,
    ) -> Result<TokenSet, AppError> {
        let provider = descriptor.provider;
        let secrets = [descriptor.client_secret.as_str(), code];

        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];

        let mut request = self.http.post(&descriptor.token_url);
        match descriptor.auth_style {
            AuthStyle::BasicHeader => {
                request = request.basic_auth(&descriptor.client_id, Some(&descriptor.client_secret));
            }
            AuthStyle::BodySecret => {
                form.push(("client_id", descriptor.client_id.as_str()));
                form.push(("client_secret", descriptor.client_secret.as_str()));
            }
        }

        let response = request
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| AppError::TokenExchange {
                provider,
                status: None,
                provider_code: None,
                message: redact(&e.without_url().to_string(), &secrets),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let (provider_code, message) = match serde_json::from_str::<ErrorBody>(&body) {
                Ok(parsed) => parsed.into_parts(),
                Err(_) => (None, truncate(&body, MAX_ERROR_BODY)),
            };
            let message = redact(&message, &secrets);

            tracing::warn!(
                provider = %provider,
                status = status.as_u16(),
                provider_code = provider_code.as_deref().unwrap_or(""),
                "Token exchange rejected"
            );

            return Err(AppError::TokenExchange {
                provider,
                status: Some(status.as_u16()),
                provider_code,
                message,
            });
        }

        let tokens: TokenResponse = response.json().await.map_err(|e| AppError::TokenExchange {
            provider,
            status: Some(status.as_u16()),
            provider_code: None,
            message: redact(&format!("Invalid token response: {}", e), &secrets),
        })?;

        if tokens.access_token.is_empty() {
            return Err(AppError::TokenExchange {
                provider,
                status: Some(status.as_u16()),
                provider_code: None,
                message: "Token response has no access_token".to_string(),
            });
        }

        tracing::info!(
            provider = %provider,
            access_token_len = tokens.access_token.len(),
            has_refresh_token = tokens.refresh_token.is_some(),
            expires_in = tokens.expires_in,
            "Token exchange succeeded"
        );

        Ok(TokenSet {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token.filter(|t| !t.is_empty()),
            expires_in: tokens.expires_in,
        })
    }
}

/// Replace every occurrence of the given secrets and any bearer value.
pub fn redact(message: &str, secrets: &[&str]) -> String {
    let mut out = message.to_string();
    for secret in secrets.iter().filter(|s| !s.is_empty()) {
        out = out.replace(secret, "[REDACTED]");
    }

    // "Bearer <value>" anywhere in the text
    let mut result = String::with_capacity(out.len());
    let mut rest = out.as_str();
    while let Some(pos) = rest.find("Bearer ") {
        let value_start = pos + "Bearer ".len();
        result.push_str(&rest[..value_start]);
        result.push_str("[REDACTED]");
        let tail = &rest[value_start..];
        let value_end = tail
            .find(|c: char| c.is_whitespace() || c == '"' || c == ',')
            .unwrap_or(tail.len());
        rest = &tail[value_end..];
    }
    result.push_str(rest);
    result
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
