use std::collections::HashMap;

use bytes::Bytes;
use http::StatusCode;
use reqwest::{IntoUrl, RequestBuilder};
use serde::Deserialize;
use serde_json::{Map, Value};
use snafu::{IntoError, ResultExt, Snafu};

use crate::{
    codec::encode_to_base64,
    response::{ErrorResponse, TokenResponse},
    token::{TokenLifetimeError, TokenSet},
};

/// Any failure talking to Keycloak. Callers never forward these to the browser.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum RequestError {
    #[snafu(display("RequestError: Could not send request"))]
    Send { source: reqwest::Error },

    #[snafu(display("RequestError: Request did not complete in time"))]
    Timeout { source: reqwest::Error },

    #[snafu(display("RequestError: Could not read payload"))]
    Decode { source: reqwest::Error },

    #[snafu(display("RequestError: Payload is not what was expected"))]
    Malformed { source: serde_json::Error },

    #[snafu(display("RequestError: Payload carries an unusable token lifetime"))]
    InvalidLifetime { source: TokenLifetimeError },

    #[snafu(display("RequestError: Received an error response"))]
    ErrResponse { error_response: ErrorResponse },

    #[snafu(display("RequestError: Received unexpected status {status}"))]
    Status { status: StatusCode },
}

impl RequestError {
    fn from_transport(source: reqwest::Error, decoding: bool) -> Self {
        match (source.is_timeout(), decoding) {
            (true, _) => TimeoutSnafu {}.into_error(source),
            (false, true) => DecodeSnafu {}.into_error(source),
            (false, false) => SendSnafu {}.into_error(source),
        }
    }

    /// The provider rejected the grant itself (expired, revoked or unknown refresh token or code).
    /// Only a new login helps.
    pub fn is_grant_rejected(&self) -> bool {
        match self {
            RequestError::ErrResponse { error_response } => {
                error_response.is_likely_session_ended()
            }
            _ => false,
        }
    }
}

/// Credentials of the client, applied to token endpoint calls.
#[derive(Debug, Clone)]
pub(crate) struct ClientCredentials<'a> {
    pub client_id: &'a str,
    pub client_secret: Option<&'a str>,
}

impl<'a> ClientCredentials<'a> {
    /// Confidential clients authenticate with `client_secret_basic`, public clients name
    /// themselves in the form body.
    fn apply(
        &self,
        request: RequestBuilder,
        params: &mut HashMap<&'static str, &'a str>,
    ) -> RequestBuilder {
        match self.client_secret {
            Some(secret) => request.header(
                http::header::AUTHORIZATION,
                format!(
                    "Basic {}",
                    encode_to_base64(format!("{}:{}", self.client_id, secret))
                ),
            ),
            None => {
                params.insert("client_id", self.client_id);
                request
            }
        }
    }
}

async fn read_body(response: reqwest::Response) -> Result<(StatusCode, Bytes), RequestError> {
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|err| RequestError::from_transport(err, true))?;
    Ok((status, body))
}

async fn post_token_request<'a>(
    http: &reqwest::Client,
    token_endpoint: impl IntoUrl,
    credentials: &ClientCredentials<'a>,
    mut params: HashMap<&'static str, &'a str>,
) -> Result<TokenSet, RequestError> {
    let request = credentials.apply(http.post(token_endpoint), &mut params);
    let response = request
        .form(&params)
        .send()
        .await
        .map_err(|err| RequestError::from_transport(err, false))?;
    let (status, body) = read_body(response).await?;

    match serde_json::from_slice::<TokenResponse>(&body) {
        Ok(TokenResponse::Success(success)) if status.is_success() => {
            TokenSet::try_from(success).context(InvalidLifetimeSnafu {})
        }
        Ok(TokenResponse::Error(error)) => Err(ErrResponseSnafu {
            error_response: error,
        }
        .build()),
        Ok(TokenResponse::Success(_)) => Err(StatusSnafu { status }.build()),
        Err(source) if status.is_success() => Err(MalformedSnafu {}.into_error(source)),
        Err(_) => Err(StatusSnafu { status }.build()),
    }
}

pub(crate) async fn exchange_code_for_token(
    http: &reqwest::Client,
    token_endpoint: impl IntoUrl,
    credentials: &ClientCredentials<'_>,
    redirect_uri: &str,
    code: &str,
) -> Result<TokenSet, RequestError> {
    let params = HashMap::from([
        ("grant_type", "authorization_code"),
        ("redirect_uri", redirect_uri),
        ("code", code),
    ]);
    tracing::trace!("Exchanging authorization code for tokens");
    post_token_request(http, token_endpoint, credentials, params).await
}

pub(crate) async fn refresh_token(
    http: &reqwest::Client,
    token_endpoint: impl IntoUrl,
    credentials: &ClientCredentials<'_>,
    refresh_token: &str,
) -> Result<TokenSet, RequestError> {
    let params = HashMap::from([
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
    ]);
    tracing::trace!("Refreshing access token");
    post_token_request(http, token_endpoint, credentials, params).await
}

pub(crate) async fn retrieve_user_info(
    http: &reqwest::Client,
    userinfo_endpoint: impl IntoUrl,
    access_token: &str,
) -> Result<Map<String, Value>, RequestError> {
    let response = http
        .get(userinfo_endpoint)
        .bearer_auth(access_token)
        .send()
        .await
        .map_err(|err| RequestError::from_transport(err, false))?;
    let (status, body) = read_body(response).await?;
    if !status.is_success() {
        return Err(StatusSnafu { status }.build());
    }
    serde_json::from_slice(&body).context(MalformedSnafu {})
}

pub(crate) async fn retrieve_jwk_set(
    http: &reqwest::Client,
    jwk_set_endpoint: impl IntoUrl,
) -> Result<jsonwebtoken::jwk::JwkSet, RequestError> {
    #[derive(Deserialize)]
    pub struct RawJwkSet {
        pub keys: Vec<Value>,
    }
    let response = http
        .get(jwk_set_endpoint)
        .send()
        .await
        .map_err(|err| RequestError::from_transport(err, false))?;
    let (status, body) = read_body(response).await?;
    if !status.is_success() {
        return Err(StatusSnafu { status }.build());
    }
    let raw_set = serde_json::from_slice::<RawJwkSet>(&body).context(MalformedSnafu {})?;
    let mut set = jsonwebtoken::jwk::JwkSet { keys: Vec::new() };
    for key in raw_set.keys {
        match serde_json::from_value::<jsonwebtoken::jwk::Jwk>(key) {
            Ok(parsed) => set.keys.push(parsed),
            Err(err) => tracing::warn!(?err, "Found non-decodable JWK"),
        }
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use assertr::prelude::*;

    use super::*;
    use crate::response::{KnownOidcErrorCode, OidcErrorCode};

    fn err_response(error: OidcErrorCode) -> RequestError {
        ErrResponseSnafu {
            error_response: ErrorResponse {
                error,
                error_description: Some("Invalid refresh token".to_owned()),
                error_uri: None,
            },
        }
        .build()
    }

    #[test]
    fn only_invalid_grant_counts_as_rejected_grant() {
        assert_that(err_response(OidcErrorCode::Known(KnownOidcErrorCode::InvalidGrant)).is_grant_rejected())
            .is_true();
        assert_that(err_response(OidcErrorCode::Known(KnownOidcErrorCode::ServerError)).is_grant_rejected())
            .is_false();
        assert_that(
            StatusSnafu {
                status: StatusCode::BAD_GATEWAY,
            }
            .build()
            .is_grant_rejected(),
        )
        .is_false();
    }
}
