#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    Json, Router,
    body::{Body, to_bytes},
    http::{Request, header},
    middleware::from_fn_with_state,
    response::Response,
    routing::get,
};
use keycloak_login::{
    AdvancedOptions, AuthConfig, AuthContext, KeycloakLogin, KeycloakLoginBuilder,
    MemorySessionStore, PostLoginHook, RoutePaths, require_authentication, url::Url,
};
use serde_json::{Value, json};

pub mod keycloak;

pub mod tracing {
    use tracing_subscriber::EnvFilter;

    pub fn init_subscriber() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new("keycloak_login=debug")),
            )
            .with_test_writer()
            .try_init();
    }
}

pub const APP_URL: &str = "http://app.localhost";

pub fn config(keycloak: &keycloak::MockKeycloak) -> AuthConfig {
    let app_url = |path: &str| Url::parse(&format!("{APP_URL}{path}")).expect("valid url");
    AuthConfig {
        keycloak_server_url: keycloak.url.clone(),
        realm: keycloak::REALM.to_owned(),
        client_id: keycloak::CLIENT_ID.to_owned(),
        client_secret: Some(keycloak::CLIENT_SECRET.to_owned()),
        login_redirect_url: app_url("/oauth/login/callback"),
        post_login_redirect_url: app_url("/"),
        login_error_redirect_url: app_url("/login-error"),
        logout_callback_url: app_url("/oauth/logout/callback"),
        post_logout_redirect_url: app_url("/bye"),
        scope: vec!["profile".to_owned(), "email".to_owned()],
        idp_hint: None,
        expected_audiences: None,
        routes: RoutePaths::default(),
        advanced: AdvancedOptions {
            secure_cookies: false,
            ..AdvancedOptions::default()
        },
    }
}

/// Talks to the mock directly, ignoring any proxy configured for the test environment.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(std::time::Duration::from_secs(5))
        .build()
        .expect("http client")
}

pub struct TestApp {
    pub auth: KeycloakLogin,
    pub sessions: MemorySessionStore,
    pub router: Router,
}

pub fn app(config: AuthConfig) -> TestApp {
    app_with_hook(config, None::<NoHook>)
}

pub fn app_with_hook(config: AuthConfig, hook: Option<impl PostLoginHook>) -> TestApp {
    let mut builder = KeycloakLogin::builder(config).http_client(http_client());
    if let Some(hook) = hook {
        builder = builder.post_login_hook(hook);
    }
    assemble(builder)
}

/// Lets the crate build its own http client, bounded by `request_timeout`.
pub fn app_with_own_http_client(config: AuthConfig) -> TestApp {
    assemble(KeycloakLogin::builder(config))
}

fn assemble(builder: KeycloakLoginBuilder) -> TestApp {
    let sessions = MemorySessionStore::new();
    let auth = builder
        .session_store(sessions.clone())
        .build()
        .expect("valid configuration");

    let api = Router::new()
        .route("/api/who-am-i", get(who_am_i))
        .route_layer(from_fn_with_state(auth.clone(), require_authentication));

    TestApp {
        router: auth.install(api),
        auth,
        sessions,
    }
}

pub struct NoHook;

#[async_trait::async_trait]
impl PostLoginHook for NoHook {
    async fn after_user_login(
        &self,
        _user: &keycloak_login::UserIdentity,
    ) -> Result<(), keycloak_login::HookError> {
        Ok(())
    }
}

async fn who_am_i(auth: AuthContext) -> Json<Value> {
    Json(json!({
        "subject": auth.identity.subject,
        "username": auth.identity.username,
        "roles": auth.identity.roles,
        "access_token": auth.access_token,
    }))
}

pub fn get_request(uri: &str, bearer: Option<&str>, cookies: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(bearer) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {bearer}"));
    }
    if !cookies.is_empty() {
        let cookie = cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).expect("valid request")
}

pub async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("readable body");
    serde_json::from_slice(&bytes).expect("json body")
}

pub fn location(response: &Response) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|it| it.to_str().ok())
        .map(str::to_owned)
        .unwrap_or_default()
}

/// Value the response sets for cookie `name`. An empty string means the cookie is removed.
pub fn set_cookie(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|it| it.to_str().ok())
        .filter_map(|it| it.split(';').next())
        .filter_map(|it| it.split_once('='))
        .find(|(cookie_name, _)| cookie_name.trim() == name)
        .map(|(_, value)| value.trim().to_owned())
}

pub fn shared<T>(value: T) -> Arc<std::sync::Mutex<T>> {
    Arc::new(std::sync::Mutex::new(value))
}
