// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API routes for authenticated users.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::{Connection, ConnectionSummary, Provider, StoredResource};
use crate::services::{FlowStatus, MessageOutcome, WindowGeometry, WindowMessage};
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// API routes (require authentication via JWT).
/// The auth middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/providers", get(list_providers))
        .route("/api/flows/callback", post(flow_callback))
        .route("/api/flows/{provider}/start", post(start_flow))
        .route("/api/flows/{provider}", get(flow_status))
        .route("/api/connections", get(list_connections))
        .route("/api/connections/{id}", axum::routing::delete(disconnect))
        .route("/api/connections/{id}/data", get(connection_data))
}

// ─── Providers ───────────────────────────────────────────────

#[derive(Serialize)]
pub struct ProvidersResponse {
    pub providers: Vec<Provider>,
}

async fn list_providers(State(state): State<Arc<AppState>>) -> Json<ProvidersResponse> {
    Json(ProvidersResponse {
        providers: state.registry.providers(),
    })
}

// ─── Authorization Flows ─────────────────────────────────────

/// Popup to open for a flow.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct PopupResponse {
    pub name: String,
    /// `window.open` features string
    pub features: String,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct StartFlowResponse {
    #[cfg_attr(feature = "binding-generation", ts(type = "string"))]
    pub provider: Provider,
    pub authorize_url: String,
    pub state: String,
    pub popup: PopupResponse,
}

/// Start a flow. The body optionally carries the host window geometry.
async fn start_flow(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(provider): Path<String>,
    body: Bytes,
) -> Result<Json<StartFlowResponse>> {
    let geometry = if body.is_empty() {
        WindowGeometry::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid window geometry: {}", e)))?
    };

    let flow = state.coordinator.start(&user.user_id, &provider, &geometry)?;

    Ok(Json(StartFlowResponse {
        provider: flow.provider,
        authorize_url: flow.popup.url,
        state: flow.state,
        popup: PopupResponse {
            name: flow.popup.name,
            features: flow.popup.features.to_string(),
        },
    }))
}

#[derive(Serialize)]
pub struct CallbackResponse {
    pub connection: ConnectionSummary,
    pub close_popup: bool,
}

#[derive(Serialize)]
pub struct IgnoredResponse {
    pub ignored: &'static str,
}

/// Relay a message the host window received from the popup.
///
/// The message origin is the request's `Origin` header.
async fn flow_callback(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    headers: HeaderMap,
    Json(data): Json<serde_json::Value>,
) -> Result<Response> {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let outcome = state
        .coordinator
        .handle_message(&user.user_id, &WindowMessage { origin, data })
        .await?;

    Ok(match outcome {
        MessageOutcome::Connected(connection) => (
            StatusCode::CREATED,
            Json(CallbackResponse {
                connection: ConnectionSummary::from(&connection),
                close_popup: true,
            }),
        )
            .into_response(),
        MessageOutcome::Ignored(reason) => (
            StatusCode::ACCEPTED,
            Json(IgnoredResponse { ignored: reason }),
        )
            .into_response(),
    })
}

#[derive(Serialize)]
pub struct FlowStatusResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionSummary>,
}

/// Status of the user's pending flow for a provider.
async fn flow_status(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(provider): Path<String>,
) -> Result<Json<FlowStatusResponse>> {
    let provider: Provider = provider.parse()?;
    let receiver = state
        .coordinator
        .subscribe(&user.user_id, provider)
        .ok_or_else(|| AppError::NotFound(format!("No pending {} flow", provider)))?;

    let status = receiver.borrow().clone();
    Ok(Json(match status {
        FlowStatus::Pending => FlowStatusResponse {
            status: "pending",
            error: None,
            connection: None,
        },
        FlowStatus::Failed(message) => FlowStatusResponse {
            status: "failed",
            error: Some(message),
            connection: None,
        },
        FlowStatus::Connected(connection) => FlowStatusResponse {
            status: "connected",
            error: None,
            connection: Some(ConnectionSummary::from(&connection)),
        },
    }))
}

// ─── Connections ─────────────────────────────────────────────

async fn list_connections(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<ConnectionSummary>>> {
    let connections = state.store.list_connections(&user.user_id).await?;
    Ok(Json(connections.iter().map(ConnectionSummary::from).collect()))
}

/// Load a connection, treating other users' connections as missing.
async fn owned_connection(state: &AppState, user: &AuthUser, id: &str) -> Result<Connection> {
    match state.store.get_connection(id).await? {
        Some(conn) if conn.user_id == user.user_id => Ok(conn),
        _ => Err(AppError::NotFound(format!("Connection {}", id))),
    }
}

#[derive(Serialize)]
pub struct ConnectionDataResponse {
    pub connection: ConnectionSummary,
    pub resources: BTreeMap<String, StoredResource>,
}

async fn connection_data(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<ConnectionDataResponse>> {
    let connection = owned_connection(&state, &user, &id).await?;
    let resources = state.store.load_snapshot(&connection.id).await?;

    Ok(Json(ConnectionDataResponse {
        connection: ConnectionSummary::from(&connection),
        resources,
    }))
}

async fn disconnect(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let connection = owned_connection(&state, &user, &id).await?;
    state.store.disconnect(&connection.id).await?;
    Ok(StatusCode::NO_CONTENT)
}
