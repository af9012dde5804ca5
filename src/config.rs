use std::time::Duration;

use snafu::{OptionExt, ResultExt, Snafu, ensure};
use url::Url;

use crate::{
    AuthorizationEndpoint, EndSessionEndpoint, JwkSetEndpoint, TokenEndpoint, UserInfoEndpoint,
};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    #[snafu(display("ConfigError: Required setting '{name}' is missing"))]
    Missing { name: &'static str },

    #[snafu(display("ConfigError: Setting '{name}' is not a valid URL"))]
    InvalidUrl {
        name: &'static str,
        source: url::ParseError,
    },

    #[snafu(display("ConfigError: Setting '{name}' must be a hierarchical (http/https) URL"))]
    NotABase { name: &'static str },

    #[snafu(display("ConfigError: Could not construct the HTTP client"))]
    HttpClient { source: reqwest::Error },
}

/// Everything needed to talk to one Keycloak realm on behalf of one client.
///
/// Read once at startup. Use [`AuthConfig::from_env`] or construct it directly.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Url of your keycloak instance, E.g. "https://localhost:8443/"
    pub keycloak_server_url: Url,

    /// The keycloak realm you want to use.
    pub realm: String,

    /// The name of this client as configured inside your Keycloak admin area.
    pub client_id: String,

    /// Secret of a confidential client. Sent as `Basic` credentials to the token endpoint.
    /// Public clients leave this empty and send their `client_id` in the form body instead.
    pub client_secret: Option<String>,

    /// Where Keycloak redirects to after a login. Must point at the login callback route.
    pub login_redirect_url: Url,

    /// Landing page the browser is sent to after a completed login.
    pub post_login_redirect_url: Url,

    /// Page shown when a login could not be completed.
    pub login_error_redirect_url: Url,

    /// Where Keycloak redirects to after ending its session. Must point at the logout callback route.
    pub logout_callback_url: Url,

    /// Page the browser is sent to once the logout is complete.
    pub post_logout_redirect_url: Url,

    /// Additional scopes. `openid` is always requested.
    pub scope: Vec<String>,

    /// Sent as `kc_idp_hint`, letting Keycloak skip its own login page in favor of a brokered
    /// identity provider.
    pub idp_hint: Option<String>,

    /// Accepted `aud` values of access tokens. Audience is not checked when `None`.
    pub expected_audiences: Option<Vec<String>>,

    pub routes: RoutePaths,

    pub advanced: AdvancedOptions,
}

/// Paths at which the login routes are mounted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePaths {
    pub login: String,
    pub login_callback: String,
    pub logout: String,
    pub logout_callback: String,
    pub token: String,
}

impl Default for RoutePaths {
    fn default() -> Self {
        Self {
            login: "/oauth/login".to_owned(),
            login_callback: "/oauth/login/callback".to_owned(),
            logout: "/oauth/logout".to_owned(),
            logout_callback: "/oauth/logout/callback".to_owned(),
            token: "/oauth/token".to_owned(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdvancedOptions {
    /// Upper bound for every call to Keycloak. A call running longer fails like any other
    /// provider error.
    /// Defaults to `Duration::from_secs(10)`.
    pub request_timeout: Duration,

    /// Time after which the loaded JWK set is considered too old.
    /// After this age is reached, a new set of JWKs is queried for.
    /// Defaults to `Duration::from_secs(60 * 5)`.
    pub max_jwk_set_age: Duration,

    /// Tokens naming an unknown `kid` trigger a refetch of the JWK set, but never more often
    /// than this.
    /// Defaults to `Duration::from_secs(10)`.
    pub min_jwk_set_refetch_interval: Duration,

    /// Name of the cookie carrying the session id.
    pub session_cookie_name: String,

    /// Name of the short-lived cookie carrying the CSRF token of a pending login.
    pub state_cookie_name: String,

    /// Whether cookies are flagged `Secure`. Only disable this for plain http development setups.
    pub secure_cookies: bool,
}

impl Default for AdvancedOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_jwk_set_age: Duration::from_secs(60 * 5),
            min_jwk_set_refetch_interval: Duration::from_secs(10),
            session_cookie_name: "keycloak_login_session".to_owned(),
            state_cookie_name: "keycloak_login_state".to_owned(),
            secure_cookies: true,
        }
    }
}

impl AuthConfig {
    /// Reads the configuration from `SSO_*` environment variables.
    ///
    /// | variable | field |
    /// |---|---|
    /// | `SSO_SERVER_URL` | `keycloak_server_url` |
    /// | `SSO_REALM` | `realm` |
    /// | `SSO_CLIENT_ID` | `client_id` |
    /// | `SSO_CLIENT_SECRET` (optional) | `client_secret` |
    /// | `SSO_LOGIN_REDIRECT_URL` | `login_redirect_url` |
    /// | `SSO_LOGOUT_CALLBACK_URL` | `logout_callback_url` |
    /// | `SSO_POST_LOGIN_REDIRECT_URL` | `post_login_redirect_url` |
    /// | `SSO_POST_LOGOUT_REDIRECT_URL` (optional, defaults to post login) | `post_logout_redirect_url` |
    /// | `SSO_LOGIN_ERROR_REDIRECT_URL` (optional, defaults to post login) | `login_error_redirect_url` |
    /// | `SSO_SCOPE` (optional, space separated) | `scope` |
    /// | `SSO_IDP_HINT` (optional) | `idp_hint` |
    /// | `SSO_AUDIENCE` (optional, comma separated) | `expected_audiences` |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`AuthConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let optional = |name: &str| lookup(name).filter(|it| !it.trim().is_empty());
        let required = |name: &'static str| optional(name).context(MissingSnafu { name });
        let url = |name: &'static str, value: String| {
            Url::parse(value.trim()).context(InvalidUrlSnafu { name })
        };

        let post_login_redirect_url = url(
            "SSO_POST_LOGIN_REDIRECT_URL",
            required("SSO_POST_LOGIN_REDIRECT_URL")?,
        )?;

        let config = Self {
            keycloak_server_url: url("SSO_SERVER_URL", required("SSO_SERVER_URL")?)?,
            realm: required("SSO_REALM")?,
            client_id: required("SSO_CLIENT_ID")?,
            client_secret: optional("SSO_CLIENT_SECRET"),
            login_redirect_url: url("SSO_LOGIN_REDIRECT_URL", required("SSO_LOGIN_REDIRECT_URL")?)?,
            logout_callback_url: url(
                "SSO_LOGOUT_CALLBACK_URL",
                required("SSO_LOGOUT_CALLBACK_URL")?,
            )?,
            post_logout_redirect_url: match optional("SSO_POST_LOGOUT_REDIRECT_URL") {
                Some(value) => url("SSO_POST_LOGOUT_REDIRECT_URL", value)?,
                None => post_login_redirect_url.clone(),
            },
            login_error_redirect_url: match optional("SSO_LOGIN_ERROR_REDIRECT_URL") {
                Some(value) => url("SSO_LOGIN_ERROR_REDIRECT_URL", value)?,
                None => post_login_redirect_url.clone(),
            },
            post_login_redirect_url,
            scope: optional("SSO_SCOPE")
                .map(|it| it.split_whitespace().map(str::to_owned).collect())
                .unwrap_or_default(),
            idp_hint: optional("SSO_IDP_HINT"),
            expected_audiences: optional("SSO_AUDIENCE").map(|it| {
                it.split(',')
                    .map(str::trim)
                    .filter(|aud| !aud.is_empty())
                    .map(str::to_owned)
                    .collect()
            }),
            routes: RoutePaths::default(),
            advanced: AdvancedOptions::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks what cannot be expressed through the field types alone.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.realm.trim().is_empty(), MissingSnafu { name: "realm" });
        ensure!(
            !self.client_id.trim().is_empty(),
            MissingSnafu { name: "client_id" }
        );
        ensure!(
            !self.keycloak_server_url.cannot_be_a_base(),
            NotABaseSnafu {
                name: "keycloak_server_url"
            }
        );
        Ok(())
    }

    /// `{server}/realms/{realm}`, the value Keycloak puts into the `iss` claim.
    pub fn issuer(&self) -> Result<Url, ConfigError> {
        self.realm_url(&[])
    }

    pub(crate) fn realm_url(&self, segments: &[&str]) -> Result<Url, ConfigError> {
        let mut url = self.keycloak_server_url.clone();
        url.path_segments_mut()
            .ok()
            .context(NotABaseSnafu {
                name: "keycloak_server_url",
            })?
            .pop_if_empty()
            .extend(["realms", self.realm.as_str()])
            .extend(segments);
        Ok(url)
    }
}

/// Keycloak's OpenID Connect endpoints of the configured realm.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::struct_field_names)]
pub struct ProviderEndpoints {
    pub issuer: Url,
    pub authorization_endpoint: AuthorizationEndpoint,
    pub token_endpoint: TokenEndpoint,
    pub userinfo_endpoint: UserInfoEndpoint,
    pub end_session_endpoint: EndSessionEndpoint,
    pub jwks_endpoint: JwkSetEndpoint,
}

impl ProviderEndpoints {
    pub fn derive(config: &AuthConfig) -> Result<Self, ConfigError> {
        let endpoint = |name: &str| config.realm_url(&["protocol", "openid-connect", name]);
        Ok(Self {
            issuer: config.issuer()?,
            authorization_endpoint: endpoint("auth")?,
            token_endpoint: endpoint("token")?,
            userinfo_endpoint: endpoint("userinfo")?,
            end_session_endpoint: endpoint("logout")?,
            jwks_endpoint: endpoint("certs")?,
        })
    }
}
