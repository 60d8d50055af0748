// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Popup authorization coordinator.
//!
//! Drives one connect flow per (user, provider):
//!
//! 1. `start` records a pending flow, builds the authorize URL and opens a
//!    centered popup through the [`PopupLauncher`].
//! 2. The popup posts an `oauth_callback` message back to the host window.
//!    Messages arrive through [`Coordinator::handle_message`] or a channel
//!    served by [`Coordinator::spawn_listener`].
//! 3. A valid message runs exchange, fetch, normalize and store in order.
//!    On success the pending flow is cleared and the popup closed. On
//!    failure the popup stays open so the user can retry.
//!
//! Each flow's outcome is published on a `watch` channel.

use crate::config::StateVerification;
use crate::error::AppError;
use crate::models::{Connection, Provider};
use crate::services::fetcher::{resolve_id, ProfileFetcher};
use crate::services::normalizer::normalize;
use crate::services::registry::{ProviderDescriptor, ProviderRegistry};
use crate::services::store::ConnectionStore;
use crate::services::token_exchange::TokenExchangeClient;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use dashmap::DashMap;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use subtle::ConstantTimeEq;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use validator::Validate;

pub const POPUP_WIDTH: u32 = 500;
pub const POPUP_HEIGHT: u32 = 600;

/// Message type posted by the callback page.
pub const CALLBACK_MESSAGE_TYPE: &str = "oauth_callback";

const NONCE_BYTES: usize = 16;

// ─── Popup seam ──────────────────────────────────────────────────────────────

/// Position and size of the host window, in screen pixels.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct WindowGeometry {
    pub screen_x: i32,
    pub screen_y: i32,
    pub outer_width: u32,
    pub outer_height: u32,
}

impl Default for WindowGeometry {
    fn default() -> Self {
        Self {
            screen_x: 0,
            screen_y: 0,
            outer_width: 1280,
            outer_height: 800,
        }
    }
}

/// `window.open` features for the popup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PopupFeatures {
    pub width: u32,
    pub height: u32,
    pub left: i32,
    pub top: i32,
}

impl PopupFeatures {
    /// Fixed-size popup centered over the host window.
    pub fn centered(host: &WindowGeometry) -> Self {
        let offset = |outer: u32, size: u32| (outer.saturating_sub(size) / 2) as i32;
        Self {
            width: POPUP_WIDTH,
            height: POPUP_HEIGHT,
            left: host.screen_x.saturating_add(offset(host.outer_width, POPUP_WIDTH)),
            top: host.screen_y.saturating_add(offset(host.outer_height, POPUP_HEIGHT)),
        }
    }
}

impl fmt::Display for PopupFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "width={},height={},left={},top={}",
            self.width, self.height, self.left, self.top
        )
    }
}

/// What the launcher is asked to open.
#[derive(Debug, Clone, Serialize)]
pub struct PopupRequest {
    pub url: String,
    pub name: String,
    pub features: PopupFeatures,
}

/// An open popup window.
pub trait PopupWindow: Send + Sync {
    fn close(&self);
    fn is_closed(&self) -> bool;
}

/// Opens popup windows. Returns `None` when the window was refused.
pub trait PopupLauncher: Send + Sync {
    fn open(&self, request: &PopupRequest) -> Option<Arc<dyn PopupWindow>>;
}

/// Launcher for browser clients that open the window themselves.
///
/// The popup is never refused here; the close request reaches the browser
/// through the callback response.
#[derive(Debug, Default)]
pub struct ClientPopupLauncher;

#[derive(Debug, Default)]
struct ClientPopup {
    closed: std::sync::atomic::AtomicBool,
}

impl PopupWindow for ClientPopup {
    fn close(&self) {
        self.closed.store(true, std::sync::atomic::Ordering::Relaxed);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(std::sync::atomic::Ordering::Relaxed)
    }
}

impl PopupLauncher for ClientPopupLauncher {
    fn open(&self, _request: &PopupRequest) -> Option<Arc<dyn PopupWindow>> {
        Some(Arc::new(ClientPopup::default()))
    }
}

// ─── Flow state ──────────────────────────────────────────────────────────────

/// Observable outcome of a flow.
#[derive(Debug, Clone)]
pub enum FlowStatus {
    Pending,
    Failed(String),
    Connected(Connection),
}

struct PendingFlow {
    provider: Provider,
    state: String,
    started_at: Instant,
    /// Set while a callback for this flow is being processed.
    in_flight: bool,
    popup: Arc<dyn PopupWindow>,
    status: Arc<watch::Sender<FlowStatus>>,
}

/// Returned from [`Coordinator::start`].
#[derive(Debug)]
pub struct StartedFlow {
    pub provider: Provider,
    pub state: String,
    pub popup: PopupRequest,
    pub status: watch::Receiver<FlowStatus>,
}

/// A message received by the host window.
#[derive(Debug, Clone)]
pub struct WindowMessage {
    pub origin: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Deserialize, Validate)]
struct CallbackMessage {
    #[serde(rename = "type")]
    kind: String,
    #[validate(length(min = 1))]
    provider: String,
    #[validate(length(min = 1))]
    code: String,
    #[serde(default)]
    state: String,
}

/// Result of handling a window message.
#[derive(Debug, Clone)]
pub enum MessageOutcome {
    /// Not a callback for a live flow; nothing was done.
    Ignored(&'static str),
    Connected(Connection),
}

type FlowKey = (String, Provider);

// ─── Coordinator ─────────────────────────────────────────────────────────────

pub struct Coordinator {
    registry: Arc<ProviderRegistry>,
    exchange: TokenExchangeClient,
    fetcher: ProfileFetcher,
    store: ConnectionStore,
    launcher: Arc<dyn PopupLauncher>,
    host_origin: String,
    redirect_uri: String,
    state_verification: StateVerification,
    flow_ttl: Duration,
    pending: DashMap<FlowKey, PendingFlow>,
    rng: SystemRandom,
}

/// Settings for [`Coordinator::new`].
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub host_origin: String,
    pub redirect_uri: String,
    pub state_verification: StateVerification,
    pub flow_ttl: Duration,
}

impl Coordinator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        http: reqwest::Client,
        store: ConnectionStore,
        launcher: Arc<dyn PopupLauncher>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            registry,
            exchange: TokenExchangeClient::new(http.clone(), settings.redirect_uri.clone()),
            fetcher: ProfileFetcher::new(http),
            store,
            launcher,
            host_origin: settings.host_origin,
            redirect_uri: settings.redirect_uri,
            state_verification: settings.state_verification,
            flow_ttl: settings.flow_ttl,
            pending: DashMap::new(),
            rng: SystemRandom::new(),
        }
    }

    /// Begin a flow: record it, then open the authorize popup.
    ///
    /// A flow already pending for the same (user, provider) is replaced.
    pub fn start(
        &self,
        user_id: &str,
        provider_tag: &str,
        host: &WindowGeometry,
    ) -> Result<StartedFlow, AppError> {
        self.prune_expired();

        let descriptor = self.registry.lookup(provider_tag)?;
        let provider = descriptor.provider;
        let state = self.new_state(provider)?;

        let popup = PopupRequest {
            url: descriptor.authorize_request_url(&self.redirect_uri, &state),
            name: format!("Connect {}", provider),
            features: PopupFeatures::centered(host),
        };

        let window = self.launcher.open(&popup).ok_or_else(|| {
            tracing::warn!(provider = %provider, "Popup blocked");
            AppError::PopupBlocked
        })?;

        let (tx, rx) = watch::channel(FlowStatus::Pending);
        let flow = PendingFlow {
            provider,
            state: state.clone(),
            started_at: Instant::now(),
            in_flight: false,
            popup: window,
            status: Arc::new(tx),
        };

        if let Some(previous) = self.pending.insert((user_id.to_string(), provider), flow) {
            tracing::info!(provider = %provider, "Replacing pending flow");
            previous
                .status
                .send_replace(FlowStatus::Failed("Superseded by a newer attempt".to_string()));
        }

        tracing::info!(provider = %provider, "Authorization flow started");

        Ok(StartedFlow {
            provider,
            state,
            popup,
            status: rx,
        })
    }

    /// Watch the status of the pending flow for (user, provider).
    pub fn subscribe(&self, user_id: &str, provider: Provider) -> Option<watch::Receiver<FlowStatus>> {
        self.pending
            .get(&(user_id.to_string(), provider))
            .map(|flow| flow.status.subscribe())
    }

    pub fn pending_count(&self) -> usize {
        self.prune_expired();
        self.pending.len()
    }

    /// Handle one message delivered to the host window.
    ///
    /// Messages from another origin, of another shape, or without a live
    /// flow are ignored. Pipeline failures are returned and also published
    /// on the flow's status channel.
    pub async fn handle_message(
        &self,
        user_id: &str,
        message: &WindowMessage,
    ) -> Result<MessageOutcome, AppError> {
        if message.origin != self.host_origin {
            tracing::debug!(origin = %message.origin, "Ignoring message from foreign origin");
            return Ok(MessageOutcome::Ignored("origin mismatch"));
        }

        let callback = match serde_json::from_value::<CallbackMessage>(message.data.clone()) {
            Ok(cb) if cb.kind == CALLBACK_MESSAGE_TYPE && cb.validate().is_ok() => cb,
            _ => {
                tracing::debug!("Ignoring message that is not an OAuth callback");
                return Ok(MessageOutcome::Ignored("not an oauth_callback message"));
            }
        };

        self.prune_expired();

        let Some((key, flow_state, status)) = self.claim_flow(user_id, &callback) else {
            tracing::info!(
                claimed_provider = %callback.provider,
                "No pending flow for callback"
            );
            return Ok(MessageOutcome::Ignored("no pending flow"));
        };
        let provider = key.1;

        if !states_match(&flow_state, &callback.state) {
            match self.state_verification {
                StateVerification::Strict => {
                    tracing::warn!(provider = %provider, "OAuth state mismatch, rejecting callback");
                    let err = AppError::InvalidState(format!(
                        "callback state does not match pending {} flow",
                        provider
                    ));
                    self.fail_flow(&key, &err);
                    return Err(err);
                }
                StateVerification::Lenient => {
                    tracing::warn!(provider = %provider, "OAuth state mismatch, continuing");
                }
            }
        }

        let result = match self.registry.get(provider) {
            Ok(descriptor) => self.connect(user_id, descriptor, &callback.code).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(connection) => {
                if let Some((_, flow)) = self
                    .pending
                    .remove_if(&key, |_, f| f.state == flow_state)
                {
                    flow.popup.close();
                }
                status.send_replace(FlowStatus::Connected(connection.clone()));
                Ok(MessageOutcome::Connected(connection))
            }
            Err(err) => {
                tracing::error!(provider = %provider, error = %err, "Connect failed");
                self.fail_flow(&key, &err);
                Err(err)
            }
        }
    }

    /// Serve messages from a channel until it closes.
    pub fn spawn_listener(
        self: Arc<Self>,
        mut messages: mpsc::Receiver<(String, WindowMessage)>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some((user_id, message)) = messages.recv().await {
                // Outcomes are observable through the flow status channel
                if let Err(e) = self.handle_message(&user_id, &message).await {
                    tracing::debug!(error = %e, "Window message handling failed");
                }
            }
            tracing::debug!("Window message channel closed");
        })
    }

    /// Exchange, fetch, normalize, store.
    async fn connect(
        &self,
        user_id: &str,
        descriptor: &ProviderDescriptor,
        code: &str,
    ) -> Result<Connection, AppError> {
        let provider = descriptor.provider;

        let tokens = self.exchange.exchange(descriptor, code).await?;
        let snapshot = self.fetcher.fetch_all(descriptor, &tokens.access_token).await?;
        let provider_user_id = resolve_id(&snapshot, descriptor)?;
        let records = normalize(&snapshot, descriptor);

        let connection = self
            .store
            .save_connection(user_id, provider, &provider_user_id, &tokens)
            .await?;
        self.store.persist_snapshot(&connection, &records).await;

        Ok(connection)
    }

    /// Find the flow a callback belongs to and mark it in flight.
    ///
    /// The state names the flow, so the user's flow with a matching state
    /// is taken first. Failing that, the flow of the claimed provider, and
    /// then the user's only flow. The pending flow's provider always wins
    /// over the claimed one.
    fn claim_flow(
        &self,
        user_id: &str,
        callback: &CallbackMessage,
    ) -> Option<(FlowKey, String, Arc<watch::Sender<FlowStatus>>)> {
        let claimed = callback.provider.parse::<Provider>().ok();

        let mine: Vec<(FlowKey, bool)> = self
            .pending
            .iter()
            .filter(|e| e.key().0 == user_id)
            .map(|e| (e.key().clone(), states_match(&e.state, &callback.state)))
            .collect();

        let key = mine
            .iter()
            .find(|(_, state_matches)| *state_matches)
            .map(|(k, _)| k.clone())
            .or_else(|| {
                claimed
                    .map(|p| (user_id.to_string(), p))
                    .filter(|k| mine.iter().any(|(m, _)| m == k))
            })
            .or_else(|| match mine.as_slice() {
                [(only, _)] => Some(only.clone()),
                _ => None,
            })?;

        let mut flow = self.pending.get_mut(&key)?;
        if flow.in_flight {
            tracing::info!(provider = %flow.provider, "Callback already being processed");
            return None;
        }
        flow.in_flight = true;

        if claimed != Some(flow.provider) {
            tracing::warn!(
                claimed_provider = %callback.provider,
                pending_provider = %flow.provider,
                "Provider mismatch, using pending provider"
            );
        }

        Some((key, flow.state.clone(), flow.status.clone()))
    }

    /// Keep the flow (and its popup) for a retry and publish the failure.
    fn fail_flow(&self, key: &FlowKey, err: &AppError) {
        if let Some(mut flow) = self.pending.get_mut(key) {
            flow.in_flight = false;
            flow.status.send_replace(FlowStatus::Failed(err.to_string()));
        }
    }

    fn prune_expired(&self) {
        let ttl = self.flow_ttl;
        self.pending.retain(|(_, provider), flow| {
            if flow.in_flight || flow.started_at.elapsed() < ttl {
                return true;
            }
            tracing::info!(provider = %provider, "Pending flow expired");
            flow.status
                .send_replace(FlowStatus::Failed("Authorization timed out".to_string()));
            false
        });
    }

    fn new_state(&self, provider: Provider) -> Result<String, AppError> {
        let mut nonce = [0u8; NONCE_BYTES];
        self.rng
            .fill(&mut nonce)
            .map_err(|_| AppError::Internal(anyhow::anyhow!("Failed to generate state nonce")))?;
        Ok(format!("{}_{}", provider, URL_SAFE_NO_PAD.encode(nonce)))
    }
}

fn states_match(expected: &str, received: &str) -> bool {
    expected.as_bytes().ct_eq(received.as_bytes()).into()
}
