// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use provider_link::config::Config;
use provider_link::db::{FirestoreDb, MemoryDb};
use provider_link::models::Provider;
use provider_link::routes::create_router;
use provider_link::services::{
    KmsService, PopupLauncher, PopupRequest, PopupWindow, ProviderRegistry,
};
use provider_link::AppState;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Origin of the host page in test configs.
#[allow(dead_code)]
pub const HOST_ORIGIN: &str = "http://localhost:5173";

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

// ─── Popup test doubles ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct TestWindow {
    closed: AtomicBool,
}

impl PopupWindow for TestWindow {
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Records every popup request; can be told to refuse windows.
#[derive(Default)]
pub struct TestLauncher {
    pub block: AtomicBool,
    pub opened: Mutex<Vec<(PopupRequest, Arc<TestWindow>)>>,
}

#[allow(dead_code)]
impl TestLauncher {
    /// Most recently opened window.
    pub fn last_window(&self) -> Arc<TestWindow> {
        self.opened.lock().unwrap().last().unwrap().1.clone()
    }

    pub fn last_request(&self) -> PopupRequest {
        self.opened.lock().unwrap().last().unwrap().0.clone()
    }
}

impl PopupLauncher for TestLauncher {
    fn open(&self, request: &PopupRequest) -> Option<Arc<dyn PopupWindow>> {
        if self.block.load(Ordering::SeqCst) {
            return None;
        }
        let window = Arc::new(TestWindow::default());
        self.opened
            .lock()
            .unwrap()
            .push((request.clone(), window.clone()));
        Some(window)
    }
}

// ─── Test application ────────────────────────────────────────────────────────

/// App wired to in-memory storage, mock KMS and a stub provider server.
#[allow(dead_code)]
pub struct TestApp {
    pub router: axum::Router,
    pub state: Arc<AppState>,
    pub db: MemoryDb,
    pub server: MockServer,
    pub launcher: Arc<TestLauncher>,
}

/// Point every configured provider at `base_url`.
#[allow(dead_code)]
pub fn with_api_base_url(config: &Config, base_url: &str) -> Config {
    let mut config = config.clone();
    for creds in config.providers.values_mut() {
        creds.api_base_url = Some(base_url.to_string());
    }
    config
}

/// Registry whose providers all point at the stub server.
#[allow(dead_code)]
pub fn stub_registry(config: &Config, base_url: &str) -> ProviderRegistry {
    ProviderRegistry::from_config(&with_api_base_url(config, base_url))
}

#[allow(dead_code)]
pub async fn spawn_test_app() -> TestApp {
    spawn_test_app_with(Config::test_default()).await
}

#[allow(dead_code)]
pub async fn spawn_test_app_with(config: Config) -> TestApp {
    let server = MockServer::start().await;
    let db = MemoryDb::new();
    let launcher = Arc::new(TestLauncher::default());

    let config = with_api_base_url(&config, &server.uri());
    let registry = ProviderRegistry::from_config(&config);
    let state = Arc::new(AppState::new(
        config,
        registry,
        db.clone().into(),
        KmsService::new_mock(),
        launcher.clone(),
    ));

    TestApp {
        router: create_router(state.clone()),
        state,
        db,
        server,
        launcher,
    }
}

// ─── Provider stubs ──────────────────────────────────────────────────────────

/// Token endpoint path for each provider after rebasing.
#[allow(dead_code)]
pub fn token_path(provider: Provider) -> &'static str {
    match provider {
        Provider::Google => "/token",
        Provider::Spotify => "/api/token",
        Provider::Twitch => "/oauth2/token",
        Provider::Facebook => "/v18.0/oauth/access_token",
    }
}

/// Profile endpoint path for each provider after rebasing.
#[allow(dead_code)]
pub fn profile_path(provider: Provider) -> &'static str {
    match provider {
        Provider::Google => "/oauth2/v2/userinfo",
        Provider::Spotify => "/v1/me",
        Provider::Twitch => "/helix/users",
        Provider::Facebook => "/v18.0/me",
    }
}

#[allow(dead_code)]
pub async fn stub_json(server: &MockServer, http_method: &str, route: &str, status: u16, body: Value) {
    Mock::given(method(http_method))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(server)
        .await;
}

/// Stub a successful token exchange and profile fetch for a provider.
#[allow(dead_code)]
pub async fn stub_provider_ok(server: &MockServer, provider: Provider, profile: Value) {
    stub_json(
        server,
        "POST",
        token_path(provider),
        200,
        serde_json::json!({
            "access_token": "AT",
            "refresh_token": "RT",
            "expires_in": 3600,
            "token_type": "Bearer"
        }),
    )
    .await;
    stub_json(server, "GET", profile_path(provider), 200, profile).await;
}

// ─── Auth helpers ────────────────────────────────────────────────────────────

/// Create a test JWT token.
#[allow(dead_code)]
pub fn create_test_jwt(user_id: &str, signing_key: &[u8]) -> String {
    provider_link::middleware::auth::create_jwt(user_id, signing_key).unwrap()
}

/// Callback message as the popup page posts it.
#[allow(dead_code)]
pub fn callback_data(provider: &str, code: &str, state: &str) -> Value {
    serde_json::json!({
        "type": "oauth_callback",
        "provider": provider,
        "code": code,
        "state": state
    })
}
