// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Provider registry.
//!
//! Every provider difference (endpoints, auth style, scopes, which resources
//! to fetch and how to flatten them) lives in the static tables below, so the
//! exchange client, fetcher and normalizer stay provider-agnostic.

use crate::config::Config;
use crate::error::AppError;
use crate::models::Provider;
use std::collections::HashMap;

/// How the client authenticates at the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    /// HTTP Basic `Authorization` header with client id and secret.
    BasicHeader,
    /// `client_id` and `client_secret` in the form body.
    BodySecret,
}

/// How a value is pulled out of a provider JSON document.
///
/// Pointers are JSON pointers (RFC 6901) relative to the resource root.
#[derive(Debug)]
pub enum Extract {
    Field(&'static str),
    /// String field cut to at most `n` characters.
    Truncated(&'static str, usize),
    /// `field` of every element of the array at `array`, joined with ", ".
    Joined {
        array: &'static str,
        field: &'static str,
    },
    /// Length of the array at the pointer.
    Length(&'static str),
    /// First alternative that yields a value.
    FirstOf(&'static [Extract]),
}

/// Output key paired with its extraction rule.
#[derive(Debug)]
pub struct FieldMap {
    pub key: &'static str,
    pub extract: Extract,
}

const fn field(key: &'static str, pointer: &'static str) -> FieldMap {
    FieldMap {
        key,
        extract: Extract::Field(pointer),
    }
}

/// Shape of an optional resource.
#[derive(Debug)]
pub enum ResourceShape {
    /// A single object at `root`, flattened into scalar points.
    Object {
        root: &'static str,
        fields: &'static [FieldMap],
    },
    /// A list at `items`; summary points are read from the resource root,
    /// each item becomes `{item_type}_{n}` holding its projection.
    List {
        items: &'static str,
        item_type: &'static str,
        summary: &'static [FieldMap],
        projection: &'static [FieldMap],
    },
}

/// Static description of an optional resource.
#[derive(Debug)]
pub struct ResourceSpec {
    /// Also used as the persisted `data_type`.
    pub name: &'static str,
    /// URL template; `{now}` and `{provider_user_id}` are substituted.
    pub endpoint: &'static str,
    pub shape: ResourceShape,
}

/// Static, credential-free part of a provider descriptor.
#[derive(Debug)]
pub struct ProviderSpec {
    pub provider: Provider,
    pub authorize_url: &'static str,
    pub token_url: &'static str,
    pub scopes: &'static [&'static str],
    pub scope_separator: &'static str,
    pub auth_style: AuthStyle,
    /// Provider-specific authorize parameters.
    pub authorize_extras: &'static [(&'static str, &'static str)],
    pub profile_endpoint: &'static str,
    /// Pointer to the profile object inside the profile response ("" = whole body).
    pub profile_root: &'static str,
    /// Pointer to the account id inside the profile object.
    pub id_field: &'static str,
    /// Send the client id as a `Client-Id` header on API calls.
    pub client_id_header: bool,
    pub profile_fields: &'static [FieldMap],
    pub resources: &'static [ResourceSpec],
}

// ─── Google ──────────────────────────────────────────────────────────────────

static GOOGLE: ProviderSpec = ProviderSpec {
    provider: Provider::Google,
    authorize_url: "https://accounts.google.com/o/oauth2/v2/auth",
    token_url: "https://oauth2.googleapis.com/token",
    scopes: &[
        "https://www.googleapis.com/auth/userinfo.profile",
        "https://www.googleapis.com/auth/userinfo.email",
        "https://www.googleapis.com/auth/calendar.readonly",
        "https://www.googleapis.com/auth/youtube.readonly",
        "https://www.googleapis.com/auth/gmail.metadata",
        "https://www.googleapis.com/auth/drive.metadata.readonly",
    ],
    scope_separator: " ",
    auth_style: AuthStyle::BodySecret,
    authorize_extras: &[("access_type", "offline"), ("prompt", "consent")],
    profile_endpoint: "https://www.googleapis.com/oauth2/v2/userinfo",
    profile_root: "",
    id_field: "/id",
    client_id_header: false,
    profile_fields: &[
        field("id", "/id"),
        field("email", "/email"),
        field("name", "/name"),
        field("given_name", "/given_name"),
        field("family_name", "/family_name"),
        field("picture", "/picture"),
    ],
    resources: &[
        ResourceSpec {
            name: "calendar",
            endpoint: "https://www.googleapis.com/calendar/v3/calendars/primary/events?maxResults=10&timeMin={now}",
            shape: ResourceShape::List {
                items: "/items",
                item_type: "event",
                summary: &[FieldMap {
                    key: "total_events",
                    extract: Extract::Length("/items"),
                }],
                projection: &[
                    field("id", "/id"),
                    field("summary", "/summary"),
                    field("start", "/start"),
                    field("end", "/end"),
                    field("status", "/status"),
                    field("created", "/created"),
                ],
            },
        },
        ResourceSpec {
            name: "youtube_subscriptions",
            endpoint: "https://www.googleapis.com/youtube/v3/subscriptions?part=snippet&mine=true&maxResults=10",
            shape: ResourceShape::List {
                items: "/items",
                item_type: "subscription",
                summary: &[FieldMap {
                    key: "total_subscriptions",
                    extract: Extract::FirstOf(&[
                        Extract::Field("/pageInfo/totalResults"),
                        Extract::Length("/items"),
                    ]),
                }],
                projection: &[
                    field("id", "/id"),
                    field("channel_id", "/snippet/resourceId/channelId"),
                    field("title", "/snippet/title"),
                    FieldMap {
                        key: "description",
                        extract: Extract::Truncated("/snippet/description", 100),
                    },
                    field("thumbnail", "/snippet/thumbnails/default/url"),
                ],
            },
        },
        ResourceSpec {
            name: "youtube_channel",
            endpoint: "https://www.googleapis.com/youtube/v3/channels?part=snippet,statistics&mine=true",
            shape: ResourceShape::Object {
                root: "/items/0",
                fields: &[
                    field("channel_id", "/id"),
                    field("title", "/snippet/title"),
                    FieldMap {
                        key: "username",
                        extract: Extract::FirstOf(&[
                            Extract::Field("/snippet/customUrl"),
                            Extract::Field("/snippet/title"),
                        ]),
                    },
                    FieldMap {
                        key: "description",
                        extract: Extract::Truncated("/snippet/description", 500),
                    },
                    field("custom_url", "/snippet/customUrl"),
                    field("thumbnail", "/snippet/thumbnails/default/url"),
                    field("subscriber_count", "/statistics/subscriberCount"),
                    field("video_count", "/statistics/videoCount"),
                    field("view_count", "/statistics/viewCount"),
                ],
            },
        },
        ResourceSpec {
            name: "gmail",
            endpoint: "https://www.googleapis.com/gmail/v1/users/me/profile",
            shape: ResourceShape::Object {
                root: "",
                fields: &[
                    field("email", "/emailAddress"),
                    field("messages_total", "/messagesTotal"),
                    field("threads_total", "/threadsTotal"),
                    field("history_id", "/historyId"),
                ],
            },
        },
        ResourceSpec {
            name: "drive",
            endpoint: "https://www.googleapis.com/drive/v3/files?pageSize=10&fields=kind,nextPageToken,incompleteSearch,files(id,name,mimeType,modifiedTime)",
            shape: ResourceShape::List {
                items: "/files",
                item_type: "file",
                summary: &[FieldMap {
                    key: "files_count",
                    extract: Extract::Length("/files"),
                }],
                projection: &[
                    field("id", "/id"),
                    field("name", "/name"),
                    field("mimeType", "/mimeType"),
                    field("modifiedTime", "/modifiedTime"),
                ],
            },
        },
    ],
};

// ─── Spotify ─────────────────────────────────────────────────────────────────

static SPOTIFY_TRACK_PROJECTION: &[FieldMap] = &[
    field("id", "/id"),
    field("name", "/name"),
    FieldMap {
        key: "artist",
        extract: Extract::Joined {
            array: "/artists",
            field: "name",
        },
    },
    field("album", "/album/name"),
    field("image", "/album/images/0/url"),
    field("url", "/external_urls/spotify"),
];

static SPOTIFY: ProviderSpec = ProviderSpec {
    provider: Provider::Spotify,
    authorize_url: "https://accounts.spotify.com/authorize",
    token_url: "https://accounts.spotify.com/api/token",
    scopes: &[
        "user-read-email",
        "user-read-private",
        "user-top-read",
        "user-read-recently-played",
        "user-library-read",
    ],
    scope_separator: " ",
    auth_style: AuthStyle::BasicHeader,
    authorize_extras: &[("show_dialog", "true")],
    profile_endpoint: "https://api.spotify.com/v1/me",
    profile_root: "",
    id_field: "/id",
    client_id_header: false,
    profile_fields: &[
        field("id", "/id"),
        field("display_name", "/display_name"),
        field("email", "/email"),
        field("country", "/country"),
        field("product", "/product"),
        field("followers", "/followers/total"),
        field("profile_url", "/external_urls/spotify"),
        field("profile_image", "/images/0/url"),
    ],
    resources: &[
        ResourceSpec {
            name: "top_tracks",
            endpoint: "https://api.spotify.com/v1/me/top/tracks?limit=10&time_range=short_term",
            shape: ResourceShape::List {
                items: "/items",
                item_type: "track",
                summary: &[FieldMap {
                    key: "total_tracks",
                    extract: Extract::FirstOf(&[
                        Extract::Field("/total"),
                        Extract::Length("/items"),
                    ]),
                }],
                projection: SPOTIFY_TRACK_PROJECTION,
            },
        },
        ResourceSpec {
            name: "recently_played",
            endpoint: "https://api.spotify.com/v1/me/player/recently-played?limit=10",
            shape: ResourceShape::List {
                items: "/items",
                item_type: "play",
                summary: &[FieldMap {
                    key: "total_plays",
                    extract: Extract::Length("/items"),
                }],
                projection: &[
                    field("id", "/track/id"),
                    field("name", "/track/name"),
                    FieldMap {
                        key: "artist",
                        extract: Extract::Joined {
                            array: "/track/artists",
                            field: "name",
                        },
                    },
                    field("played_at", "/played_at"),
                ],
            },
        },
    ],
};

// ─── Twitch ──────────────────────────────────────────────────────────────────

static TWITCH: ProviderSpec = ProviderSpec {
    provider: Provider::Twitch,
    authorize_url: "https://id.twitch.tv/oauth2/authorize",
    token_url: "https://id.twitch.tv/oauth2/token",
    scopes: &["user:read:email", "analytics:read:games"],
    scope_separator: " ",
    auth_style: AuthStyle::BodySecret,
    authorize_extras: &[("force_verify", "true")],
    profile_endpoint: "https://api.twitch.tv/helix/users",
    profile_root: "/data/0",
    id_field: "/id",
    client_id_header: true,
    profile_fields: &[
        field("id", "/id"),
        field("login", "/login"),
        field("display_name", "/display_name"),
        field("type", "/type"),
        field("broadcaster_type", "/broadcaster_type"),
        field("description", "/description"),
        field("profile_image_url", "/profile_image_url"),
        field("offline_image_url", "/offline_image_url"),
        field("view_count", "/view_count"),
        field("email", "/email"),
        field("created_at", "/created_at"),
    ],
    resources: &[
        ResourceSpec {
            name: "channel",
            endpoint: "https://api.twitch.tv/helix/channels?broadcaster_id={provider_user_id}",
            shape: ResourceShape::Object {
                root: "/data/0",
                fields: &[
                    field("broadcaster_id", "/broadcaster_id"),
                    field("broadcaster_language", "/broadcaster_language"),
                    field("title", "/title"),
                    field("game_id", "/game_id"),
                    field("game_name", "/game_name"),
                    field("delay", "/delay"),
                ],
            },
        },
        ResourceSpec {
            name: "analytics",
            endpoint: "https://api.twitch.tv/helix/analytics/games?first=10",
            shape: ResourceShape::List {
                items: "/data",
                item_type: "game",
                summary: &[FieldMap {
                    key: "total_games",
                    extract: Extract::Length("/data"),
                }],
                projection: &[
                    field("game_id", "/game_id"),
                    field("name", "/name"),
                    field("url", "/URL"),
                    field("date_range", "/date_range"),
                ],
            },
        },
    ],
};

// ─── Facebook ────────────────────────────────────────────────────────────────

static FACEBOOK: ProviderSpec = ProviderSpec {
    provider: Provider::Facebook,
    authorize_url: "https://www.facebook.com/v18.0/dialog/oauth",
    token_url: "https://graph.facebook.com/v18.0/oauth/access_token",
    scopes: &["email", "public_profile", "user_posts", "user_photos"],
    scope_separator: ",",
    auth_style: AuthStyle::BodySecret,
    authorize_extras: &[],
    profile_endpoint: "https://graph.facebook.com/v18.0/me?fields=id,name,email,picture,link,birthday,location",
    profile_root: "",
    id_field: "/id",
    client_id_header: false,
    profile_fields: &[
        field("id", "/id"),
        field("name", "/name"),
        field("email", "/email"),
        field("picture", "/picture/data/url"),
        field("link", "/link"),
        field("birthday", "/birthday"),
        field("location", "/location/name"),
    ],
    resources: &[
        ResourceSpec {
            name: "posts",
            endpoint: "https://graph.facebook.com/v18.0/me/posts?fields=id,message,created_time,full_picture&limit=10",
            shape: ResourceShape::List {
                items: "/data",
                item_type: "post",
                summary: &[FieldMap {
                    key: "total_posts",
                    extract: Extract::Length("/data"),
                }],
                projection: &[
                    field("id", "/id"),
                    field("message", "/message"),
                    field("created_time", "/created_time"),
                    field("picture", "/full_picture"),
                ],
            },
        },
        ResourceSpec {
            name: "photos",
            endpoint: "https://graph.facebook.com/v18.0/me/photos?fields=id,picture,images,created_time&limit=10&type=uploaded",
            shape: ResourceShape::List {
                items: "/data",
                item_type: "photo",
                summary: &[FieldMap {
                    key: "total_photos",
                    extract: Extract::Length("/data"),
                }],
                projection: &[
                    field("id", "/id"),
                    field("picture", "/picture"),
                    field("source", "/images/0/source"),
                    field("created_time", "/created_time"),
                ],
            },
        },
    ],
};

/// Compiled-in endpoints and field layout for a provider.
pub fn spec(provider: Provider) -> &'static ProviderSpec {
    match provider {
        Provider::Google => &GOOGLE,
        Provider::Spotify => &SPOTIFY,
        Provider::Twitch => &TWITCH,
        Provider::Facebook => &FACEBOOK,
    }
}

// ─── Descriptors ─────────────────────────────────────────────────────────────

/// Optional resource with a concrete endpoint.
#[derive(Debug, Clone)]
pub struct Resource {
    pub name: &'static str,
    pub endpoint: String,
    pub shape: &'static ResourceShape,
}

/// Everything needed to run a flow against one provider.
#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    pub provider: Provider,
    pub authorize_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub scopes: &'static [&'static str],
    pub scope_separator: &'static str,
    pub auth_style: AuthStyle,
    pub authorize_extras: &'static [(&'static str, &'static str)],
    pub profile_endpoint: String,
    pub profile_root: &'static str,
    pub id_field: &'static str,
    pub client_id_header: bool,
    pub profile_fields: &'static [FieldMap],
    pub optional_resources: Vec<Resource>,
}

impl ProviderDescriptor {
    fn new(spec: &'static ProviderSpec, client_id: String, client_secret: String) -> Self {
        Self {
            provider: spec.provider,
            authorize_url: spec.authorize_url.to_string(),
            token_url: spec.token_url.to_string(),
            client_id,
            client_secret,
            scopes: spec.scopes,
            scope_separator: spec.scope_separator,
            auth_style: spec.auth_style,
            authorize_extras: spec.authorize_extras,
            profile_endpoint: spec.profile_endpoint.to_string(),
            profile_root: spec.profile_root,
            id_field: spec.id_field,
            client_id_header: spec.client_id_header,
            profile_fields: spec.profile_fields,
            optional_resources: spec
                .resources
                .iter()
                .map(|r| Resource {
                    name: r.name,
                    endpoint: r.endpoint.to_string(),
                    shape: &r.shape,
                })
                .collect(),
        }
    }

    pub fn scope(&self) -> String {
        self.scopes.join(self.scope_separator)
    }

    /// Full authorize URL for the popup.
    pub fn authorize_request_url(&self, redirect_uri: &str, state: &str) -> String {
        let scope = self.scope();
        let mut params: Vec<(&str, &str)> = vec![
            ("client_id", &self.client_id),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", &scope),
            ("state", state),
        ];
        params.extend(self.authorize_extras.iter().copied());

        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        format!("{}?{}", self.authorize_url, query)
    }

    /// Point every endpoint at another origin, keeping paths and queries.
    fn rebase(&mut self, base_url: &str) {
        self.authorize_url = rebase_url(&self.authorize_url, base_url);
        self.token_url = rebase_url(&self.token_url, base_url);
        self.profile_endpoint = rebase_url(&self.profile_endpoint, base_url);
        for resource in &mut self.optional_resources {
            resource.endpoint = rebase_url(&resource.endpoint, base_url);
        }
    }
}

fn rebase_url(url: &str, base_url: &str) -> String {
    let host_start = url.find("://").map(|i| i + 3).unwrap_or(0);
    let path_start = url[host_start..]
        .find('/')
        .map(|i| host_start + i)
        .unwrap_or(url.len());
    format!("{}{}", base_url.trim_end_matches('/'), &url[path_start..])
}

/// Registered providers with their credentials.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    descriptors: HashMap<Provider, ProviderDescriptor>,
}

impl ProviderRegistry {
    /// Register every provider that has credentials configured.
    ///
    /// A configured API base URL moves all of that provider's endpoints.
    pub fn from_config(config: &Config) -> Self {
        let descriptors = config
            .providers
            .iter()
            .map(|(provider, creds)| {
                let mut descriptor = ProviderDescriptor::new(
                    spec(*provider),
                    creds.client_id.clone(),
                    creds.client_secret.clone(),
                );
                if let Some(base_url) = &creds.api_base_url {
                    tracing::info!(provider = %provider, base_url, "Using provider API override");
                    descriptor.rebase(base_url);
                }
                (*provider, descriptor)
            })
            .collect();
        Self { descriptors }
    }

    /// Look up a provider by tag.
    pub fn lookup(&self, tag: &str) -> Result<&ProviderDescriptor, AppError> {
        let provider: Provider = tag.parse()?;
        self.get(provider)
    }

    pub fn get(&self, provider: Provider) -> Result<&ProviderDescriptor, AppError> {
        self.descriptors
            .get(&provider)
            .ok_or_else(|| AppError::UnknownProvider(provider.to_string()))
    }

    /// Registered providers in a stable order.
    pub fn providers(&self) -> Vec<Provider> {
        let mut providers: Vec<Provider> = self.descriptors.keys().copied().collect();
        providers.sort();
        providers
    }
}
