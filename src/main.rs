// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Provider-Link API Server
//!
//! Links third-party OAuth2 accounts (Google, Spotify, Twitch, Facebook) to
//! a user profile and stores a snapshot of each account's data.

use provider_link::{
    config::{Config, StorageBackend},
    db::{Database, FirestoreDb, MemoryDb},
    services::{ClientPopupLauncher, KmsService, ProviderRegistry},
    AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging()?;

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(port = config.port, "Starting Provider-Link API");

    let (db, kms): (Database, KmsService) = match config.storage {
        StorageBackend::Firestore => {
            let db = FirestoreDb::new(&config.gcp_project_id).await?;
            let kms = KmsService::new(
                &config.gcp_project_id,
                &config.gcp_region,
                "token-encryption",
            )
            .await?;
            tracing::info!("KMS service initialized");
            (db.into(), kms)
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage and mock token encryption");
            (MemoryDb::new().into(), KmsService::new_mock())
        }
    };

    let registry = ProviderRegistry::from_config(&config);
    tracing::info!(providers = ?registry.providers(), "Provider registry loaded");

    // Build shared state
    let state = Arc::new(AppState::new(
        config.clone(),
        registry,
        db,
        kms,
        Arc::new(ClientPopupLauncher),
    ));

    // Build router
    let app = provider_link::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("provider_link=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .with(format)
        .init();
    Ok(())
}
