use std::borrow::Cow;

use itertools::Itertools;
use serde_json::{Map, Value};
use snafu::ResultExt;
use url::Url;

use crate::{
    config::{AuthConfig, ConfigError, HttpClientSnafu, ProviderEndpoints},
    request::{self, ClientCredentials, RequestError},
    token::TokenSet,
};

/// Talks to Keycloak's token and userinfo endpoints and builds the URLs the browser is sent to.
#[derive(Debug, Clone)]
pub struct TokenClient {
    http: reqwest::Client,
    endpoints: ProviderEndpoints,
    client_id: String,
    client_secret: Option<String>,
    login_redirect_url: Url,
    logout_callback_url: Url,
    scope: String,
    idp_hint: Option<String>,
}

impl TokenClient {
    pub fn new(config: &AuthConfig) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .timeout(config.advanced.request_timeout)
            .build()
            .context(HttpClientSnafu {})?;
        Self::with_http_client(config, http)
    }

    /// Uses `http` for all calls. Its timeout settings replace `request_timeout`.
    pub fn with_http_client(config: &AuthConfig, http: reqwest::Client) -> Result<Self, ConfigError> {
        config.validate()?;
        let scope = match config.scope.len() {
            0 => Cow::Borrowed("openid"),
            _ => Cow::Owned(
                config
                    .scope
                    .iter()
                    .map(|it| it.trim())
                    .filter(|it| !it.is_empty() && *it != "openid")
                    .chain(["openid"])
                    .join(" "),
            ),
        };
        Ok(Self {
            http,
            endpoints: ProviderEndpoints::derive(config)?,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            login_redirect_url: config.login_redirect_url.clone(),
            logout_callback_url: config.logout_callback_url.clone(),
            scope: scope.into_owned(),
            idp_hint: config.idp_hint.clone(),
        })
    }

    pub fn endpoints(&self) -> &ProviderEndpoints {
        &self.endpoints
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn credentials(&self) -> ClientCredentials<'_> {
        ClientCredentials {
            client_id: &self.client_id,
            client_secret: self.client_secret.as_deref(),
        }
    }

    /// Exchanges the authorization `code` Keycloak handed to the login callback.
    pub async fn get_tokens(&self, code: &str) -> Result<TokenSet, RequestError> {
        request::exchange_code_for_token(
            &self.http,
            self.endpoints.token_endpoint.clone(),
            &self.credentials(),
            self.login_redirect_url.as_str(),
            code,
        )
        .await
    }

    /// Obtains a fresh token set. A rejected refresh token surfaces as
    /// [`RequestError::ErrResponse`] and means the user has to log in again.
    pub async fn get_new_access_token(&self, refresh_token: &str) -> Result<TokenSet, RequestError> {
        request::refresh_token(
            &self.http,
            self.endpoints.token_endpoint.clone(),
            &self.credentials(),
            refresh_token,
        )
        .await
    }

    /// Raw claims about the user the `access_token` was issued to.
    pub async fn get_user_info(&self, access_token: &str) -> Result<Map<String, Value>, RequestError> {
        request::retrieve_user_info(&self.http, self.endpoints.userinfo_endpoint.clone(), access_token)
            .await
    }

    /// Keycloak's login page for this client. Always the same URL for the same configuration.
    /// The login route appends a per-login `state` to it.
    pub fn authorization_url(&self) -> Url {
        let mut login_url = self.endpoints.authorization_endpoint.clone();
        login_url
            .query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", self.login_redirect_url.as_str())
            .append_pair("scope", &self.scope);
        if let Some(idp_hint) = &self.idp_hint {
            login_url.query_pairs_mut().append_pair("kc_idp_hint", idp_hint);
        }
        login_url
    }

    /// Keycloak's end session URL. Keycloak redirects to the logout callback route afterward.
    pub fn logout_url(&self) -> Url {
        let mut logout_url = self.endpoints.end_session_endpoint.clone();
        logout_url
            .query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair(
                "post_logout_redirect_uri",
                self.logout_callback_url.as_str(),
            );
        logout_url
    }
}

#[cfg(test)]
mod tests {
    use assertr::prelude::*;

    use super::*;
    use crate::config::tests::test_config;

    fn query(url: &Url, key: &str) -> Option<String> {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    #[test]
    fn authorization_url_is_stable() {
        let config = test_config();
        let first = TokenClient::new(&config).unwrap().authorization_url();
        let second = TokenClient::new(&config).unwrap().authorization_url();
        let client = TokenClient::new(&config).unwrap();
        assert_that(first.clone()).is_equal_to(second);
        assert_that(client.authorization_url()).is_equal_to(client.authorization_url());
        assert_that(first).is_equal_to(client.authorization_url());
    }

    #[test]
    fn authorization_url_carries_client_parameters() {
        let url = TokenClient::new(&test_config()).unwrap().authorization_url();
        assert_that(url.path()).is_equal_to("/auth/realms/standard/protocol/openid-connect/auth");
        assert_that(query(&url, "response_type")).is_equal_to(Some("code".to_owned()));
        assert_that(query(&url, "client_id")).is_equal_to(Some("my-app".to_owned()));
        assert_that(query(&url, "redirect_uri"))
            .is_equal_to(Some("https://app.example.com/oauth/login/callback".to_owned()));
        assert_that(query(&url, "scope")).is_equal_to(Some("profile email openid".to_owned()));
        assert_that(query(&url, "kc_idp_hint")).is_equal_to(Some("idir".to_owned()));
        assert_that(query(&url, "state").is_none()).is_true();
    }

    #[test]
    fn default_scope_is_openid() {
        let mut config = test_config();
        config.scope = vec![];
        config.idp_hint = None;
        let url = TokenClient::new(&config).unwrap().authorization_url();
        assert_that(query(&url, "scope")).is_equal_to(Some("openid".to_owned()));
        assert_that(query(&url, "kc_idp_hint").is_none()).is_true();
    }

    #[test]
    fn logout_url_points_back_to_logout_callback() {
        let url = TokenClient::new(&test_config()).unwrap().logout_url();
        assert_that(url.path()).is_equal_to("/auth/realms/standard/protocol/openid-connect/logout");
        assert_that(query(&url, "client_id")).is_equal_to(Some("my-app".to_owned()));
        assert_that(query(&url, "post_logout_redirect_uri"))
            .is_equal_to(Some("https://app.example.com/oauth/logout/callback".to_owned()));
    }
}
