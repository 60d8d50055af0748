// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Provider profile fetcher.
//!
//! The profile request is mandatory and its failure aborts the connect. The
//! optional resources are then fetched concurrently; each one that fails is
//! logged and recorded as absent.

use crate::error::AppError;
use crate::models::Provider;
use crate::services::registry::{ProviderDescriptor, Resource};
use crate::time_utils::format_utc_rfc3339;
use futures_util::future::join_all;
use serde_json::Value;

/// Data fetched from a provider right after the token exchange.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub provider: Provider,
    /// The profile object (already unwrapped from any envelope).
    pub profile: Value,
    /// Optional resources in registry order; `None` means absent.
    pub optional: Vec<(&'static str, Option<Value>)>,
}

impl Snapshot {
    pub fn resource(&self, name: &str) -> Option<&Value> {
        self.optional
            .iter()
            .find(|(n, _)| *n == name)
            .and_then(|(_, v)| v.as_ref())
    }
}

/// Fetches profiles and optional resources with a bearer token.
#[derive(Clone)]
pub struct ProfileFetcher {
    http: reqwest::Client,
}

impl ProfileFetcher {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Fetch the profile, then every optional resource.
    pub async fn fetch_all(
        &self,
        descriptor: &ProviderDescriptor,
        access_token: &str,
    ) -> Result<Snapshot, AppError> {
        let provider = descriptor.provider;

        let body = self
            .get_json(descriptor, &descriptor.profile_endpoint, access_token)
            .await
            .map_err(|message| {
                tracing::warn!(provider = %provider, error = %message, "Profile fetch failed");
                AppError::ProfileFetch { provider, message }
            })?;

        let profile = body
            .pointer(descriptor.profile_root)
            .filter(|v| v.is_object())
            .cloned()
            .ok_or_else(|| AppError::ProfileFetch {
                provider,
                message: "Profile response has no profile object".to_string(),
            })?;

        // The id may be templated into resource URLs; if it is missing the
        // caller aborts on resolve_id anyway.
        let provider_user_id = descriptor_id(&profile, descriptor.id_field).unwrap_or_default();

        let mut fetches = Vec::with_capacity(descriptor.optional_resources.len());
        for resource in &descriptor.optional_resources {
            fetches.push(self.fetch_optional(descriptor, resource, access_token, &provider_user_id));
        }
        let optional = join_all(fetches).await;

        let present = optional.iter().filter(|(_, v)| v.is_some()).count();
        tracing::info!(
            provider = %provider,
            resources_present = present,
            resources_total = optional.len(),
            "Fetched provider snapshot"
        );

        Ok(Snapshot {
            provider,
            profile,
            optional,
        })
    }

    async fn fetch_optional(
        &self,
        descriptor: &ProviderDescriptor,
        resource: &Resource,
        access_token: &str,
        provider_user_id: &str,
    ) -> (&'static str, Option<Value>) {
        let url = resource
            .endpoint
            .replace("{now}", &format_utc_rfc3339(chrono::Utc::now()))
            .replace("{provider_user_id}", &urlencoding::encode(provider_user_id));

        match self.get_json(descriptor, &url, access_token).await {
            Ok(value) => (resource.name, Some(value)),
            Err(message) => {
                tracing::warn!(
                    provider = %descriptor.provider,
                    resource = resource.name,
                    error = %message,
                    "Optional resource fetch failed"
                );
                (resource.name, None)
            }
        }
    }

    /// GET with bearer auth. Errors are plain messages without token values.
    async fn get_json(
        &self,
        descriptor: &ProviderDescriptor,
        url: &str,
        access_token: &str,
    ) -> Result<Value, String> {
        let mut request = self.http.get(url).bearer_auth(access_token);
        if descriptor.client_id_header {
            request = request.header("Client-Id", &descriptor.client_id);
        }

        let response = request
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e.without_url()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status.as_u16()));
        }

        response
            .json()
            .await
            .map_err(|e| format!("JSON parse error: {}", e))
    }
}

/// Resolve the provider account id from a snapshot.
pub fn resolve_id(snapshot: &Snapshot, descriptor: &ProviderDescriptor) -> Result<String, AppError> {
    descriptor_id(&snapshot.profile, descriptor.id_field).ok_or(AppError::MissingProviderId {
        provider: snapshot.provider,
        field: descriptor.id_field,
    })
}

/// Ids are strings for most providers; numeric ids are accepted too.
fn descriptor_id(profile: &Value, id_field: &str) -> Option<String> {
    match profile.pointer(id_field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
