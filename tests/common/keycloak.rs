use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{
    Form, Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use keycloak_login::{codec::encode_to_base64, url::Url};
use serde_json::{Value, json};
use tokio::{net::TcpListener, task::JoinHandle};

pub const REALM: &str = "test-realm";
pub const CLIENT_ID: &str = "test-client";
pub const CLIENT_SECRET: &str = "test-secret";
pub const SUBJECT: &str = "a7060488-c80b-40c5-83e2-d7000bf9738e";
pub const KID: &str = "test-key";

pub const VALID_CODE: &str = "valid-code";
pub const VALID_REFRESH_TOKEN: &str = "valid-refresh";

pub const SIGNING_KEY: &[u8] = include_bytes!("../fixtures/signing_key.pem");
pub const FOREIGN_KEY: &[u8] = include_bytes!("../fixtures/foreign_key.pem");
const JWKS: &str = include_str!("../fixtures/jwks.json");

pub struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[derive(Debug, Default)]
pub struct Counters {
    pub code_exchanges: AtomicUsize,
    pub refreshes: AtomicUsize,
    pub user_info: AtomicUsize,
    pub certs: AtomicUsize,
}

impl Counters {
    pub fn code_exchanges(&self) -> usize {
        self.code_exchanges.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn user_info(&self) -> usize {
        self.user_info.load(Ordering::SeqCst)
    }

    pub fn certs(&self) -> usize {
        self.certs.load(Ordering::SeqCst)
    }
}

/// How the mock deviates from a well-behaved Keycloak.
#[derive(Debug, Clone)]
pub struct Behavior {
    /// Subject of tokens issued on refresh.
    pub refreshed_subject: String,

    /// Subject reported by the userinfo endpoint.
    pub user_info_subject: String,

    /// Time the token endpoint takes to answer a refresh.
    pub refresh_delay: Duration,

    /// `expires_in` reported for tokens issued on refresh.
    pub refreshed_lifetime: i64,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            refreshed_subject: SUBJECT.to_owned(),
            user_info_subject: SUBJECT.to_owned(),
            refresh_delay: Duration::ZERO,
            refreshed_lifetime: 300,
        }
    }
}

#[derive(Clone)]
struct ProviderState {
    issuer: String,
    behavior: Behavior,
    counters: Arc<Counters>,
}

/// Token, userinfo and certs endpoints of a single Keycloak realm.
pub struct MockKeycloak {
    pub url: Url,
    pub issuer: String,
    pub counters: Arc<Counters>,
    _server: AbortOnDrop<()>,
}

impl MockKeycloak {
    pub async fn start() -> Self {
        Self::start_with(Behavior::default()).await
    }

    pub async fn start_with(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("TcpListener");
        let port = listener.local_addr().expect("local address").port();

        let url = Url::parse(&format!("http://127.0.0.1:{port}/")).expect("valid url");
        let issuer = format!("http://127.0.0.1:{port}/realms/{REALM}");
        let counters = Arc::new(Counters::default());

        let endpoint = |name: &str| format!("/realms/{REALM}/protocol/openid-connect/{name}");
        let router = Router::new()
            .route(&endpoint("token"), post(token))
            .route(&endpoint("userinfo"), get(user_info))
            .route(&endpoint("certs"), get(certs))
            .with_state(ProviderState {
                issuer: issuer.clone(),
                behavior,
                counters: counters.clone(),
            });

        let server = tokio::spawn(async move {
            tracing::info!("Serving mock Keycloak...");
            axum::serve(listener, router)
                .await
                .expect("Mock Keycloak to serve");
        });

        Self {
            url,
            issuer,
            counters,
            _server: AbortOnDrop(server),
        }
    }

    /// RS256 access token signed with the realm key.
    pub fn access_token(&self, subject: &str, lifetime: time::Duration) -> String {
        sign(SIGNING_KEY, &claims(&self.issuer, subject, lifetime))
    }

    pub fn expired_access_token(&self) -> String {
        self.access_token(SUBJECT, time::Duration::minutes(-5))
    }
}

static TOKEN_ID: AtomicU64 = AtomicU64::new(0);

pub fn claims(issuer: &str, subject: &str, lifetime: time::Duration) -> Value {
    let now = time::OffsetDateTime::now_utc();
    json!({
        "exp": (now + lifetime).unix_timestamp(),
        "iat": (now + lifetime - time::Duration::minutes(5)).unix_timestamp(),
        "jti": format!("token-{}", TOKEN_ID.fetch_add(1, Ordering::SeqCst)),
        "iss": issuer,
        "aud": "account",
        "sub": subject,
        "typ": "Bearer",
        "azp": CLIENT_ID,
        "preferred_username": "bob",
        "email": "bob@example.com",
        "realm_access": { "roles": ["offline_access"] },
        "resource_access": { CLIENT_ID: { "roles": ["admin"] } },
    })
}

pub fn sign(key_pem: &[u8], claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(KID.to_owned());
    let key = EncodingKey::from_rsa_pem(key_pem).expect("RSA key");
    jsonwebtoken::encode(&header, claims, &key).expect("signed token")
}

fn issue_tokens(state: &ProviderState, subject: &str, expires_in: i64) -> Response {
    Json(json!({
        "access_token": sign(SIGNING_KEY, &claims(&state.issuer, subject, time::Duration::minutes(5))),
        "expires_in": expires_in,
        "refresh_expires_in": 1800,
        "refresh_token": VALID_REFRESH_TOKEN,
        "token_type": "Bearer",
        "not-before-policy": 0,
        "session_state": "6f2a1d0e",
        "scope": "openid profile email",
    }))
    .into_response()
}

fn invalid_grant(description: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "error": "invalid_grant",
            "error_description": description,
        })),
    )
        .into_response()
}

async fn token(
    State(state): State<ProviderState>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let expected_credentials = format!(
        "Basic {}",
        encode_to_base64(format!("{CLIENT_ID}:{CLIENT_SECRET}"))
    );
    let credentials = headers
        .get(header::AUTHORIZATION)
        .and_then(|it| it.to_str().ok());
    if credentials != Some(expected_credentials.as_str()) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "unauthorized_client" })),
        )
            .into_response();
    }

    let param = |name: &str| form.get(name).map(String::as_str);
    match param("grant_type") {
        Some("authorization_code") => {
            state.counters.code_exchanges.fetch_add(1, Ordering::SeqCst);
            match (param("code"), param("redirect_uri")) {
                (Some(VALID_CODE), Some(_)) => issue_tokens(&state, SUBJECT, 300),
                _ => invalid_grant("Code not valid"),
            }
        }
        Some("refresh_token") => {
            state.counters.refreshes.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(state.behavior.refresh_delay).await;
            match param("refresh_token") {
                Some(VALID_REFRESH_TOKEN) => issue_tokens(
                    &state,
                    &state.behavior.refreshed_subject,
                    state.behavior.refreshed_lifetime,
                ),
                _ => invalid_grant("Invalid refresh token"),
            }
        }
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "unsupported_grant_type" })),
        )
            .into_response(),
    }
}

async fn user_info(State(state): State<ProviderState>, headers: HeaderMap) -> Response {
    state.counters.user_info.fetch_add(1, Ordering::SeqCst);
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|it| it.to_str().ok())
        .is_some_and(|it| it.starts_with("Bearer "));
    if !bearer {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!({
        "sub": state.behavior.user_info_subject,
        "preferred_username": "bob",
        "name": "Bob Builder",
        "given_name": "Bob",
        "family_name": "Builder",
        "email": "bob@example.com",
    }))
    .into_response()
}

async fn certs(State(state): State<ProviderState>) -> Response {
    state.counters.certs.fetch_add(1, Ordering::SeqCst);
    (
        [(header::CONTENT_TYPE, "application/json")],
        JWKS.to_owned(),
    )
        .into_response()
}
