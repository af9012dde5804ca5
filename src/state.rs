use std::sync::Arc;

use axum::{Router, routing::get};
use snafu::{OptionExt, ResultExt, Snafu, ensure};

use crate::{
    client::TokenClient,
    config::AuthConfig,
    error::{ConfigSnafu, KeycloakLoginError},
    handlers,
    hooks::PostLoginHook,
    jwk_set::JwkSetCache,
    request::RequestError,
    session::{MemorySessionStore, RefreshLocks, SessionId, SessionStore},
    token::TokenSet,
    token_validation::TokenValidator,
};

#[derive(Debug, Snafu)]
pub enum RefreshError {
    #[snafu(display("RefreshError: No session found"))]
    NoSession,

    #[snafu(display("RefreshError: Session holds no refresh token"))]
    NoRefreshToken,

    #[snafu(display("RefreshError: Refresh token is expired"))]
    RefreshTokenExpired,

    #[snafu(display("RefreshError: Identity provider did not issue new tokens"))]
    Provider { source: RequestError },
}

/// Shared state of the login integration. Cheap to clone.
///
/// Hand it to [`crate::middleware::require_authentication`] through
/// `axum::middleware::from_fn_with_state` and mount its routes with [`KeycloakLogin::install`].
#[derive(Clone)]
pub struct KeycloakLogin {
    inner: Arc<Inner>,
}

struct Inner {
    config: AuthConfig,
    client: TokenClient,
    validator: TokenValidator,
    sessions: Arc<dyn SessionStore>,
    post_login_hook: Option<Arc<dyn PostLoginHook>>,
    refresh_locks: RefreshLocks,
}

impl std::fmt::Debug for KeycloakLogin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeycloakLogin")
            .field("config", &self.inner.config)
            .field("client", &self.inner.client)
            .field("post_login_hook", &self.inner.post_login_hook.is_some())
            .finish_non_exhaustive()
    }
}

pub struct KeycloakLoginBuilder {
    config: AuthConfig,
    http: Option<reqwest::Client>,
    sessions: Option<Arc<dyn SessionStore>>,
    post_login_hook: Option<Arc<dyn PostLoginHook>>,
}

impl KeycloakLoginBuilder {
    /// Keeps sessions in `store` instead of process memory.
    pub fn session_store(mut self, store: impl SessionStore) -> Self {
        self.sessions = Some(Arc::new(store));
        self
    }

    pub fn post_login_hook(mut self, hook: impl PostLoginHook) -> Self {
        self.post_login_hook = Some(Arc::new(hook));
        self
    }

    /// Uses `http` for all calls to Keycloak. `request_timeout` is not applied to it.
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    pub fn build(self) -> Result<KeycloakLogin, KeycloakLoginError> {
        let config = self.config;
        let client = match self.http {
            Some(http) => TokenClient::with_http_client(&config, http),
            None => TokenClient::new(&config),
        }
        .context(ConfigSnafu {})?;

        let jwk_set = JwkSetCache::new(
            client.http().clone(),
            client.endpoints().jwks_endpoint.clone(),
            config.advanced.max_jwk_set_age,
            config.advanced.min_jwk_set_refetch_interval,
        );
        let validator = TokenValidator::new(
            jwk_set,
            vec![client.endpoints().issuer.to_string()],
            config.expected_audiences.clone(),
        );

        tracing::debug!(
            realm = %config.realm,
            client_id = %config.client_id,
            "Initialized Keycloak login"
        );

        Ok(KeycloakLogin {
            inner: Arc::new(Inner {
                config,
                client,
                validator,
                sessions: self
                    .sessions
                    .unwrap_or_else(|| Arc::new(MemorySessionStore::new())),
                post_login_hook: self.post_login_hook,
                refresh_locks: RefreshLocks::default(),
            }),
        })
    }
}

impl KeycloakLogin {
    pub fn builder(config: AuthConfig) -> KeycloakLoginBuilder {
        KeycloakLoginBuilder {
            config,
            http: None,
            sessions: None,
            post_login_hook: None,
        }
    }

    /// In-memory sessions, no post-login hook. Fails fast on invalid configuration.
    pub fn new(config: AuthConfig) -> Result<Self, KeycloakLoginError> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &AuthConfig {
        &self.inner.config
    }

    pub fn client(&self) -> &TokenClient {
        &self.inner.client
    }

    pub fn validator(&self) -> &TokenValidator {
        &self.inner.validator
    }

    pub fn sessions(&self) -> &dyn SessionStore {
        self.inner.sessions.as_ref()
    }

    pub(crate) fn post_login_hook(&self) -> Option<&dyn PostLoginHook> {
        self.inner.post_login_hook.as_deref()
    }

    /// Login, logout and token routes at the configured paths.
    pub fn router<S>(&self) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let routes = &self.inner.config.routes;
        Router::new()
            .route(&routes.login, get(handlers::login))
            .route(&routes.login_callback, get(handlers::login_callback))
            .route(&routes.logout, get(handlers::logout))
            .route(&routes.logout_callback, get(handlers::logout_callback))
            .route(&routes.token, get(handlers::token))
            .with_state(self.clone())
    }

    /// Adds the routes of [`KeycloakLogin::router`] to `app`.
    pub fn install<S>(&self, app: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        app.merge(self.router())
    }

    /// Replaces the tokens of session `id` with fresh ones from Keycloak.
    ///
    /// Refreshes of one session run one after another. When a concurrent request already
    /// replaced `stale_access_token` with a still valid token, that token is returned without
    /// calling Keycloak again. Every failure ends the session. Failures other than a grant
    /// Keycloak rejected are logged as warnings.
    pub(crate) async fn refresh_session(
        &self,
        id: &SessionId,
        stale_access_token: Option<&str>,
    ) -> Result<TokenSet, RefreshError> {
        let lock = self.inner.refresh_locks.get(id);
        let _guard = lock.lock().await;

        let current = self.sessions().load(id).await.context(NoSessionSnafu {})?;

        let already_refreshed = match stale_access_token {
            Some(stale) => current.access_token != stale,
            None => true,
        };
        if already_refreshed && !current.access_token_expired() {
            tracing::debug!(session = ?id, "Session was already refreshed");
            return Ok(current);
        }

        let result = self.refresh_tokens(&current).await;
        match result {
            Ok(refreshed) => {
                self.sessions().store(id, refreshed.clone()).await;
                tracing::debug!(session = ?id, "Refreshed session tokens");
                Ok(refreshed)
            }
            Err(err) => {
                match &err {
                    RefreshError::Provider { source } if !source.is_grant_rejected() => {
                        tracing::warn!(
                            session = ?id,
                            reason = %source,
                            "Refresh failed unexpectedly. Ending session"
                        );
                    }
                    _ => {
                        tracing::debug!(session = ?id, reason = %err, "Refresh failed. Ending session");
                    }
                }
                self.sessions().remove(id).await;
                Err(err)
            }
        }
    }

    async fn refresh_tokens(&self, current: &TokenSet) -> Result<TokenSet, RefreshError> {
        let refresh_token = current
            .refresh_token
            .as_deref()
            .context(NoRefreshTokenSnafu {})?;
        ensure!(!current.refresh_token_expired(), RefreshTokenExpiredSnafu {});
        let refreshed = self
            .client()
            .get_new_access_token(refresh_token)
            .await
            .context(ProviderSnafu {})?;
        Ok(refreshed.inherit_from(current))
    }

    pub(crate) async fn end_session(&self, id: &SessionId) {
        self.sessions().remove(id).await;
        tracing::debug!(session = ?id, "Ended session");
    }
}
