// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! End-to-end popup flows through the coordinator.

use provider_link::config::{Config, StateVerification};
use provider_link::error::AppError;
use provider_link::models::Provider;
use provider_link::services::{FlowStatus, MessageOutcome, WindowGeometry, WindowMessage};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

mod common;

use common::{callback_data, HOST_ORIGIN};
use provider_link::services::PopupWindow;

fn message(data: serde_json::Value) -> WindowMessage {
    WindowMessage {
        origin: HOST_ORIGIN.to_string(),
        data,
    }
}

#[tokio::test]
async fn test_spotify_connect_scenario() {
    let app = common::spawn_test_app().await;
    common::stub_provider_ok(
        &app.server,
        Provider::Spotify,
        json!({"id": "u1", "display_name": "Jane"}),
    )
    .await;

    let coordinator = &app.state.coordinator;
    let flow = coordinator
        .start("user-1", "spotify", &WindowGeometry::default())
        .unwrap();
    assert!(flow.state.starts_with("spotify_"));
    assert_eq!(flow.popup.name, "Connect spotify");
    assert!(flow.popup.url.contains(&format!("state={}", flow.state)));

    let outcome = coordinator
        .handle_message("user-1", &message(callback_data("spotify", "abc123", &flow.state)))
        .await
        .unwrap();

    let MessageOutcome::Connected(connection) = outcome else {
        panic!("expected a connection");
    };
    assert_eq!(connection.provider, Provider::Spotify);
    assert_eq!(connection.provider_user_id, "u1");

    // Optional resources were not stubbed: only the profile is stored
    assert_eq!(app.db.connection_count(), 1);
    assert_eq!(app.db.record_count(), 1);
    assert_eq!(app.db.data_point_count(), 2);

    let snapshot = app.state.store.load_snapshot(&connection.id).await.unwrap();
    assert_eq!(snapshot["profile"].points["id"], "u1");
    assert_eq!(snapshot["profile"].points["display_name"], "Jane");

    let tokens = app.state.store.tokens(&connection.id).await.unwrap();
    assert_eq!(tokens.access_token, "AT");
    assert_eq!(tokens.refresh_token.as_deref(), Some("RT"));

    // Flow cleared, popup closed, status published
    assert!(app.launcher.last_window().is_closed());
    assert!(coordinator.subscribe("user-1", Provider::Spotify).is_none());
    assert!(matches!(&*flow.status.borrow(), FlowStatus::Connected(_)));
}

#[tokio::test]
async fn test_replayed_callback_creates_one_connection() {
    let app = common::spawn_test_app().await;
    common::stub_provider_ok(&app.server, Provider::Spotify, json!({"id": "u1"})).await;

    let coordinator = &app.state.coordinator;
    let flow = coordinator
        .start("user-1", "spotify", &WindowGeometry::default())
        .unwrap();
    let msg = message(callback_data("spotify", "abc123", &flow.state));

    let first = coordinator.handle_message("user-1", &msg).await.unwrap();
    let second = coordinator.handle_message("user-1", &msg).await.unwrap();

    assert!(matches!(first, MessageOutcome::Connected(_)));
    assert!(matches!(second, MessageOutcome::Ignored(_)));
    assert_eq!(app.db.connection_count(), 1);
}

#[tokio::test]
async fn test_reconnect_while_connected_is_rejected() {
    let app = common::spawn_test_app().await;
    common::stub_provider_ok(&app.server, Provider::Spotify, json!({"id": "u1"})).await;
    let coordinator = &app.state.coordinator;

    for attempt in 0..2 {
        let flow = coordinator
            .start("user-1", "spotify", &WindowGeometry::default())
            .unwrap();
        let result = coordinator
            .handle_message("user-1", &message(callback_data("spotify", "abc123", &flow.state)))
            .await;
        if attempt == 0 {
            assert!(result.is_ok());
        } else {
            assert!(matches!(result, Err(AppError::AlreadyConnected(Provider::Spotify))));
            assert!(matches!(&*flow.status.borrow(), FlowStatus::Failed(m) if m.contains("already connected")));
        }
    }
    assert_eq!(app.db.connection_count(), 1);
}

#[tokio::test]
async fn test_foreign_origin_and_bad_shape_are_ignored() {
    let app = common::spawn_test_app().await;
    let coordinator = &app.state.coordinator;
    let flow = coordinator
        .start("user-1", "spotify", &WindowGeometry::default())
        .unwrap();

    let foreign = WindowMessage {
        origin: "https://evil.example.com".to_string(),
        data: callback_data("spotify", "abc123", &flow.state),
    };
    assert!(matches!(
        coordinator.handle_message("user-1", &foreign).await.unwrap(),
        MessageOutcome::Ignored("origin mismatch")
    ));

    for data in [
        json!({"type": "something_else", "provider": "spotify", "code": "c", "state": flow.state}),
        json!({"type": "oauth_callback", "provider": "spotify", "state": flow.state}),
        json!({"type": "oauth_callback", "provider": "spotify", "code": "", "state": flow.state}),
        json!("just a string"),
    ] {
        assert!(matches!(
            coordinator.handle_message("user-1", &message(data)).await.unwrap(),
            MessageOutcome::Ignored(_)
        ));
    }

    // Nothing was contacted and the flow is still pending
    assert!(app.server.received_requests().await.unwrap().is_empty());
    assert!(coordinator.subscribe("user-1", Provider::Spotify).is_some());
}

#[tokio::test]
async fn test_provider_mismatch_uses_pending_provider() {
    let app = common::spawn_test_app().await;
    common::stub_provider_ok(&app.server, Provider::Twitch, json!({"data": [{"id": "tw1"}]})).await;

    let coordinator = &app.state.coordinator;
    let flow = coordinator
        .start("user-1", "twitch", &WindowGeometry::default())
        .unwrap();

    // Message claims google but only a twitch flow is pending
    let outcome = coordinator
        .handle_message("user-1", &message(callback_data("google", "abc123", &flow.state)))
        .await
        .unwrap();

    let MessageOutcome::Connected(connection) = outcome else {
        panic!("expected a connection");
    };
    assert_eq!(connection.provider, Provider::Twitch);
    assert_eq!(connection.provider_user_id, "tw1");
}

#[tokio::test]
async fn test_strict_state_mismatch_is_rejected() {
    let app = common::spawn_test_app().await;
    common::stub_provider_ok(&app.server, Provider::Spotify, json!({"id": "u1"})).await;
    let coordinator = &app.state.coordinator;

    let flow = coordinator
        .start("user-1", "spotify", &WindowGeometry::default())
        .unwrap();

    let err = coordinator
        .handle_message("user-1", &message(callback_data("spotify", "abc123", "spotify_forged")))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
    assert_eq!(app.db.connection_count(), 0);
    assert!(!app.launcher.last_window().is_closed());

    // The real callback still goes through
    let outcome = coordinator
        .handle_message("user-1", &message(callback_data("spotify", "abc123", &flow.state)))
        .await
        .unwrap();
    assert!(matches!(outcome, MessageOutcome::Connected(_)));
}

#[tokio::test]
async fn test_lenient_state_mismatch_continues() {
    let mut config = Config::test_default();
    config.state_verification = StateVerification::Lenient;
    let app = common::spawn_test_app_with(config).await;
    common::stub_provider_ok(&app.server, Provider::Spotify, json!({"id": "u1"})).await;
    let coordinator = &app.state.coordinator;

    coordinator
        .start("user-1", "spotify", &WindowGeometry::default())
        .unwrap();

    let outcome = coordinator
        .handle_message("user-1", &message(callback_data("spotify", "abc123", "spotify_other")))
        .await
        .unwrap();
    assert!(matches!(outcome, MessageOutcome::Connected(_)));
}

#[tokio::test]
async fn test_popup_blocked() {
    let app = common::spawn_test_app().await;
    app.launcher.block.store(true, Ordering::SeqCst);

    let err = app
        .state
        .coordinator
        .start("user-1", "google", &WindowGeometry::default())
        .unwrap_err();
    assert!(matches!(err, AppError::PopupBlocked));
    assert_eq!(app.state.coordinator.pending_count(), 0);
}

#[tokio::test]
async fn test_unknown_provider() {
    let app = common::spawn_test_app().await;
    let err = app
        .state
        .coordinator
        .start("user-1", "myspace", &WindowGeometry::default())
        .unwrap_err();
    assert!(matches!(err, AppError::UnknownProvider(_)));
}

#[tokio::test]
async fn test_exchange_failure_keeps_popup_open() {
    let app = common::spawn_test_app().await;
    common::stub_json(
        &app.server,
        "POST",
        common::token_path(Provider::Google),
        400,
        json!({"error": "invalid_grant"}),
    )
    .await;
    let coordinator = &app.state.coordinator;

    let flow = coordinator
        .start("user-1", "google", &WindowGeometry::default())
        .unwrap();
    let err = coordinator
        .handle_message("user-1", &message(callback_data("google", "bad", &flow.state)))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::TokenExchange { .. }));
    assert!(!app.launcher.last_window().is_closed());
    assert!(coordinator.subscribe("user-1", Provider::Google).is_some());
    assert!(matches!(&*flow.status.borrow(), FlowStatus::Failed(_)));
    assert_eq!(app.db.connection_count(), 0);
}

#[tokio::test]
async fn test_missing_provider_id_writes_nothing() {
    let app = common::spawn_test_app().await;
    common::stub_provider_ok(&app.server, Provider::Facebook, json!({"name": "No Id"})).await;
    let coordinator = &app.state.coordinator;

    let flow = coordinator
        .start("user-1", "facebook", &WindowGeometry::default())
        .unwrap();
    let err = coordinator
        .handle_message("user-1", &message(callback_data("facebook", "abc123", &flow.state)))
        .await
        .unwrap_err();

    assert!(err.is_identity_failure());
    assert_eq!(app.db.connection_count(), 0);
    assert_eq!(app.db.record_count(), 0);
}

#[tokio::test]
async fn test_concurrent_flows_per_provider() {
    let app = common::spawn_test_app().await;
    common::stub_provider_ok(&app.server, Provider::Spotify, json!({"id": "u1"})).await;
    common::stub_provider_ok(&app.server, Provider::Google, json!({"id": "g1"})).await;
    let coordinator = &app.state.coordinator;

    let spotify = coordinator
        .start("user-1", "spotify", &WindowGeometry::default())
        .unwrap();
    let google = coordinator
        .start("user-1", "google", &WindowGeometry::default())
        .unwrap();
    assert_eq!(coordinator.pending_count(), 2);

    let spotify_msg = message(callback_data("spotify", "c1", &spotify.state));
    let google_msg = message(callback_data("google", "c2", &google.state));
    let (a, b) = tokio::join!(
        coordinator.handle_message("user-1", &spotify_msg),
        coordinator.handle_message("user-1", &google_msg),
    );

    assert!(matches!(a.unwrap(), MessageOutcome::Connected(c) if c.provider == Provider::Spotify));
    assert!(matches!(b.unwrap(), MessageOutcome::Connected(c) if c.provider == Provider::Google));
    assert_eq!(coordinator.pending_count(), 0);
}

#[tokio::test]
async fn test_restart_supersedes_pending_flow() {
    let app = common::spawn_test_app().await;
    let coordinator = &app.state.coordinator;

    let first = coordinator
        .start("user-1", "twitch", &WindowGeometry::default())
        .unwrap();
    let second = coordinator
        .start("user-1", "twitch", &WindowGeometry::default())
        .unwrap();

    assert_ne!(first.state, second.state);
    assert_eq!(coordinator.pending_count(), 1);
    assert!(matches!(&*first.status.borrow(), FlowStatus::Failed(_)));
}

#[tokio::test]
async fn test_pending_flows_expire() {
    let mut config = Config::test_default();
    config.pending_flow_ttl = Duration::from_millis(50);
    let app = common::spawn_test_app_with(config).await;
    let coordinator = &app.state.coordinator;

    let flow = coordinator
        .start("user-1", "spotify", &WindowGeometry::default())
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let outcome = coordinator
        .handle_message("user-1", &message(callback_data("spotify", "abc123", &flow.state)))
        .await
        .unwrap();
    assert!(matches!(outcome, MessageOutcome::Ignored("no pending flow")));
    assert!(matches!(&*flow.status.borrow(), FlowStatus::Failed(m) if m.contains("timed out")));
}

#[tokio::test]
async fn test_listener_drives_flow() {
    let app = common::spawn_test_app().await;
    common::stub_provider_ok(&app.server, Provider::Google, json!({"id": "g1", "name": "Ada"})).await;
    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/profile"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "emailAddress": "ada@example.com",
            "messagesTotal": 12
        })))
        .mount(&app.server)
        .await;

    let (tx, rx) = mpsc::channel(8);
    let handle = app.state.coordinator.clone().spawn_listener(rx);

    let mut flow = app
        .state
        .coordinator
        .start("user-1", "google", &WindowGeometry::default())
        .unwrap();
    tx.send((
        "user-1".to_string(),
        message(callback_data("google", "abc123", &flow.state)),
    ))
    .await
    .unwrap();

    let status = flow
        .status
        .wait_for(|s| !matches!(s, FlowStatus::Pending))
        .await
        .unwrap()
        .clone();
    let FlowStatus::Connected(connection) = status else {
        panic!("expected connected status, got {:?}", status);
    };

    let snapshot = app.state.store.load_snapshot(&connection.id).await.unwrap();
    assert_eq!(snapshot["gmail"].points["messages_total"], "12");

    drop(tx);
    handle.await.unwrap();
}

#[tokio::test]
async fn test_popup_request_is_centered() {
    let app = common::spawn_test_app().await;
    let host = WindowGeometry {
        screen_x: 0,
        screen_y: 0,
        outer_width: 1000,
        outer_height: 800,
    };
    app.state.coordinator.start("user-1", "facebook", &host).unwrap();

    let request = app.launcher.last_request();
    assert_eq!(request.features.to_string(), "width=500,height=600,left=250,top=100");
    assert!(request.url.starts_with(&format!("{}/v18.0/dialog/oauth?", app.server.uri())));
}

#[tokio::test]
async fn test_mislabelled_callback_goes_to_flow_owning_state() {
    let app = common::spawn_test_app().await;
    common::stub_provider_ok(&app.server, Provider::Spotify, json!({"id": "u1"})).await;
    common::stub_provider_ok(&app.server, Provider::Google, json!({"id": "g1"})).await;
    let coordinator = &app.state.coordinator;

    let spotify = coordinator
        .start("user-1", "spotify", &WindowGeometry::default())
        .unwrap();
    let google = coordinator
        .start("user-1", "google", &WindowGeometry::default())
        .unwrap();

    // Claims google, but carries the spotify flow's state
    let outcome = coordinator
        .handle_message("user-1", &message(callback_data("google", "c1", &spotify.state)))
        .await
        .unwrap();

    let MessageOutcome::Connected(connection) = outcome else {
        panic!("expected a connection");
    };
    assert_eq!(connection.provider, Provider::Spotify);
    assert!(matches!(&*spotify.status.borrow(), FlowStatus::Connected(_)));

    // The google flow was not touched and can still complete
    assert!(matches!(&*google.status.borrow(), FlowStatus::Pending));
    let outcome = coordinator
        .handle_message("user-1", &message(callback_data("google", "c2", &google.state)))
        .await
        .unwrap();
    assert!(matches!(outcome, MessageOutcome::Connected(c) if c.provider == Provider::Google));
}

#[tokio::test]
async fn test_concurrent_replay_creates_one_connection() {
    let app = common::spawn_test_app().await;
    common::stub_provider_ok(&app.server, Provider::Spotify, json!({"id": "u1"})).await;
    let coordinator = &app.state.coordinator;

    let flow = coordinator
        .start("user-1", "spotify", &WindowGeometry::default())
        .unwrap();
    let msg = message(callback_data("spotify", "abc123", &flow.state));

    let (a, b) = tokio::join!(
        coordinator.handle_message("user-1", &msg),
        coordinator.handle_message("user-1", &msg),
    );
    let outcomes = [a.unwrap(), b.unwrap()];

    let connected = outcomes
        .iter()
        .filter(|o| matches!(o, MessageOutcome::Connected(_)))
        .count();
    assert_eq!(connected, 1);
    assert!(outcomes
        .iter()
        .any(|o| matches!(o, MessageOutcome::Ignored(_))));
    assert_eq!(app.db.connection_count(), 1);

    // Only one code exchange reached the provider
    let token_posts = app
        .server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == common::token_path(Provider::Spotify))
        .count();
    assert_eq!(token_posts, 1);
}

#[tokio::test]
async fn test_reconnect_with_connection_only_policy_shows_new_account() {
    let mut config = Config::test_default();
    config.disconnect_policy = provider_link::config::DisconnectPolicy::ConnectionOnly;
    let app = common::spawn_test_app_with(config).await;
    let coordinator = &app.state.coordinator;

    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/profile"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "emailAddress": "old@x.com"
        })))
        .mount(&app.server)
        .await;
    common::stub_provider_ok(&app.server, Provider::Google, json!({"id": "old-account"})).await;

    let flow = coordinator
        .start("user-1", "google", &WindowGeometry::default())
        .unwrap();
    let MessageOutcome::Connected(old) = coordinator
        .handle_message("user-1", &message(callback_data("google", "c1", &flow.state)))
        .await
        .unwrap()
    else {
        panic!("expected a connection");
    };
    app.state.store.disconnect(&old.id).await.unwrap();

    app.server.reset().await;
    common::stub_provider_ok(&app.server, Provider::Google, json!({"id": "new-account"})).await;

    let flow = coordinator
        .start("user-1", "google", &WindowGeometry::default())
        .unwrap();
    let MessageOutcome::Connected(new) = coordinator
        .handle_message("user-1", &message(callback_data("google", "c2", &flow.state)))
        .await
        .unwrap()
    else {
        panic!("expected a connection");
    };

    let snapshot = app.state.store.load_snapshot(&new.id).await.unwrap();
    assert_eq!(snapshot.keys().collect::<Vec<_>>(), vec!["profile"]);
    assert_eq!(snapshot["profile"].points["id"], "new-account");
}
