//! Keycloak login for axum servers.
//!
//! Provides the routes of the authorization code flow (login, login callback, logout, logout
//! callback and a token route for browser code) and a middleware guarding routes behind a valid
//! Keycloak access token. Expired access tokens are refreshed transparently using the refresh
//! token of the caller's session.
//!
//! ```no_run
//! use axum::{Router, middleware::from_fn_with_state, routing::get};
//! use keycloak_login::{AuthConfig, AuthContext, KeycloakLogin, require_authentication};
//!
//! async fn who_am_i(auth: AuthContext) -> String {
//!     format!("Hello, {}", auth.identity.username.unwrap_or_default())
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! // Note: Reads `SSO_SERVER_URL`, `SSO_REALM`, `SSO_CLIENT_ID`, ... See `AuthConfig::from_env`.
//! let keycloak_login = KeycloakLogin::new(AuthConfig::from_env()?)?;
//!
//! let api = Router::new()
//!     .route("/api/who-am-i", get(who_am_i))
//!     .route_layer(from_fn_with_state(
//!         keycloak_login.clone(),
//!         require_authentication,
//!     ));
//! let app = keycloak_login.install(api);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

mod client;
pub mod codec;
mod config;
mod csrf_token;
mod error;
pub mod handlers;
mod hooks;
mod identity;
mod jwk_set;
pub mod middleware;
mod request;
mod response;
mod session;
mod state;
mod token;
mod token_validation;

// Library exports (additional to pub modules).
pub use client::TokenClient;
pub use config::*;
pub use csrf_token::CsrfToken;
pub use error::KeycloakLoginError;
pub use hooks::*;
pub use identity::*;
pub use middleware::{AuthContext, require_authentication};
pub use request::RequestError;
pub use response::{CallbackParams, ErrorResponse, KnownOidcErrorCode, OidcErrorCode};
pub use session::{MemorySessionStore, SessionId, SessionStore};
pub use state::*;
pub use token::{TokenLifetimeError, TokenSet};
pub use token_validation::{JwtValidationError, TokenValidator, VerifiedClaims};
pub mod url {
    pub use url::Url;
}

type JwkSetEndpoint = url::Url;
type AuthorizationEndpoint = url::Url;
type TokenEndpoint = url::Url;
type UserInfoEndpoint = url::Url;
type EndSessionEndpoint = url::Url;

type AccessToken = String;
type RefreshToken = String;
