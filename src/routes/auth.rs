// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! OAuth redirect target served inside the popup.
//!
//! The page relays `code` and `state` to the opener window with
//! `postMessage`, targeted at its own origin. Nothing from the query string
//! is rendered by the server.

use axum::{
    http::header,
    response::{Html, IntoResponse},
    routing::get,
    Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sha2::{Digest, Sha256};
use std::sync::{Arc, OnceLock};

use crate::services::coordinator::CALLBACK_MESSAGE_TYPE;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/oauth/callback", get(oauth_callback_page))
}

fn callback_script() -> String {
    format!(
        r#"(function () {{
  var params = new URLSearchParams(window.location.search);
  var status = document.getElementById("status");
  var error = params.get("error");
  if (error) {{
    status.textContent = "Authorization failed: " + error;
    return;
  }}
  var code = params.get("code");
  var state = params.get("state") || "";
  if (!code || !window.opener) {{
    status.textContent = "Missing authorization code or opener window.";
    return;
  }}
  window.opener.postMessage({{
    type: "{message_type}",
    provider: state.split("_")[0],
    code: code,
    state: state
  }}, window.location.origin);
  status.textContent = "Connecting... you can close this window if it stays open.";
}})();"#,
        message_type = CALLBACK_MESSAGE_TYPE
    )
}

struct CallbackPage {
    html: String,
    csp: String,
}

fn callback_page() -> &'static CallbackPage {
    static PAGE: OnceLock<CallbackPage> = OnceLock::new();
    PAGE.get_or_init(|| {
        let script = callback_script();
        let hash = BASE64.encode(Sha256::digest(script.as_bytes()));
        CallbackPage {
            html: format!(
                "<!doctype html>\n<html><head><meta charset=\"utf-8\"><title>Connecting</title></head>\
                 <body><p id=\"status\">Completing authorization...</p><script>{}</script></body></html>",
                script
            ),
            csp: format!(
                "default-src 'none'; script-src 'sha256-{}'; frame-ancestors 'none'",
                hash
            ),
        }
    })
}

/// Popup landing page after the provider redirects back.
async fn oauth_callback_page() -> impl IntoResponse {
    let page = callback_page();
    (
        [
            (header::CONTENT_SECURITY_POLICY, page.csp.clone()),
            (header::CACHE_CONTROL, "no-store".to_string()),
        ],
        Html(page.html.clone()),
    )
}
