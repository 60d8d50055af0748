// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Provider-Link: link third-party OAuth2 accounts to a profile
//!
//! This crate drives the popup authorization-code flow, exchanges codes for
//! tokens, pulls provider resource data and persists it as generic
//! key/value records for later display.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::Database;
use services::{
    ConnectionStore, Coordinator, CoordinatorSettings, KmsService, PopupLauncher,
    ProviderRegistry,
};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub registry: Arc<ProviderRegistry>,
    pub store: ConnectionStore,
    pub coordinator: Arc<Coordinator>,
}

impl AppState {
    /// Wire the services together.
    pub fn new(
        config: Config,
        registry: ProviderRegistry,
        db: Database,
        kms: KmsService,
        launcher: Arc<dyn PopupLauncher>,
    ) -> Self {
        let registry = Arc::new(registry);
        let store = ConnectionStore::new(db, kms, config.disconnect_policy);
        let coordinator = Arc::new(Coordinator::new(
            registry.clone(),
            reqwest::Client::new(),
            store.clone(),
            launcher,
            CoordinatorSettings {
                host_origin: config.public_origin.clone(),
                redirect_uri: config.redirect_uri.clone(),
                state_verification: config.state_verification,
                flow_ttl: config.pending_flow_ttl,
            },
        ));

        Self {
            config,
            registry,
            store,
            coordinator,
        }
    }
}
