// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Profile fetcher: mandatory profile, best-effort optional resources.

use provider_link::config::Config;
use provider_link::error::AppError;
use provider_link::models::Provider;
use provider_link::services::{resolve_id, ProfileFetcher};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod common;

#[tokio::test]
async fn test_profile_failure_aborts() {
    let config = Config::test_default();
    let server = MockServer::start().await;
    let registry = common::stub_registry(&config, &server.uri());

    common::stub_json(&server, "GET", "/v1/me", 401, json!({"error": "expired"})).await;

    let err = ProfileFetcher::new(reqwest::Client::new())
        .fetch_all(registry.get(Provider::Spotify).unwrap(), "AT")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::ProfileFetch {
            provider: Provider::Spotify,
            ..
        }
    ));
}

#[tokio::test]
async fn test_optional_failures_are_absent() {
    let config = Config::test_default();
    let server = MockServer::start().await;
    let registry = common::stub_registry(&config, &server.uri());
    let google = registry.get(Provider::Google).unwrap();

    common::stub_json(&server, "GET", "/oauth2/v2/userinfo", 200, json!({"id": "g1", "name": "Ada"})).await;
    common::stub_json(&server, "GET", "/calendar/v3/calendars/primary/events", 403, json!({"error": "scope"})).await;
    common::stub_json(&server, "GET", "/gmail/v1/users/me/profile", 200, json!({"emailAddress": "ada@example.com"})).await;
    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;
    // youtube endpoints are not stubbed: 404

    let snapshot = ProfileFetcher::new(reqwest::Client::new())
        .fetch_all(google, "AT")
        .await
        .unwrap();

    assert_eq!(resolve_id(&snapshot, google).unwrap(), "g1");
    let names: Vec<&str> = snapshot.optional.iter().map(|(n, _)| *n).collect();
    assert_eq!(
        names,
        vec!["calendar", "youtube_subscriptions", "youtube_channel", "gmail", "drive"]
    );
    assert!(snapshot.resource("calendar").is_none());
    assert!(snapshot.resource("youtube_channel").is_none());
    assert!(snapshot.resource("drive").is_none());
    assert_eq!(
        snapshot.resource("gmail").unwrap()["emailAddress"],
        "ada@example.com"
    );
}

#[tokio::test]
async fn test_twitch_profile_envelope_and_client_id() {
    let config = Config::test_default();
    let server = MockServer::start().await;
    let registry = common::stub_registry(&config, &server.uri());
    let twitch = registry.get(Provider::Twitch).unwrap();

    Mock::given(method("GET"))
        .and(path("/helix/users"))
        .and(header("client-id", "twitch_client_id"))
        .and(header("authorization", "Bearer AT"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": "141981764", "login": "twitchdev"}]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/helix/channels"))
        .and(query_param("broadcaster_id", "141981764"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"broadcaster_id": "141981764", "title": "Live"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let snapshot = ProfileFetcher::new(reqwest::Client::new())
        .fetch_all(twitch, "AT")
        .await
        .unwrap();

    assert_eq!(snapshot.profile["login"], "twitchdev");
    assert_eq!(resolve_id(&snapshot, twitch).unwrap(), "141981764");
    assert!(snapshot.resource("channel").is_some());
    assert!(snapshot.resource("analytics").is_none());
}

#[tokio::test]
async fn test_empty_twitch_envelope_is_profile_error() {
    let config = Config::test_default();
    let server = MockServer::start().await;
    let registry = common::stub_registry(&config, &server.uri());

    common::stub_json(&server, "GET", "/helix/users", 200, json!({"data": []})).await;

    let err = ProfileFetcher::new(reqwest::Client::new())
        .fetch_all(registry.get(Provider::Twitch).unwrap(), "AT")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ProfileFetch { .. }));
}

#[tokio::test]
async fn test_profile_without_id_fails_resolution() {
    let config = Config::test_default();
    let server = MockServer::start().await;
    let registry = common::stub_registry(&config, &server.uri());
    let facebook = registry.get(Provider::Facebook).unwrap();

    common::stub_json(&server, "GET", "/v18.0/me", 200, json!({"name": "No Id"})).await;

    let snapshot = ProfileFetcher::new(reqwest::Client::new())
        .fetch_all(facebook, "AT")
        .await
        .unwrap();
    assert!(matches!(
        resolve_id(&snapshot, facebook),
        Err(AppError::MissingProviderId {
            provider: Provider::Facebook,
            ..
        })
    ));
}
