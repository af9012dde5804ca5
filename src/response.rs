use serde::{Deserialize, Serialize};

/// Query parameters Keycloak appends when redirecting back to the login callback route.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub session_state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
    pub error_uri: Option<String>,
}

/// What the login callback was actually told by Keycloak.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CallbackResponse {
    SuccessfulLogin(SuccessLoginResponse),
    Error(ErrorResponse),
    /// Neither a code nor an error. Someone navigated to the callback route directly.
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SuccessLoginResponse {
    pub code: String,
    pub state: Option<String>,
    pub session_state: Option<String>,
}

impl From<CallbackParams> for CallbackResponse {
    fn from(params: CallbackParams) -> Self {
        if let Some(error) = params.error {
            return CallbackResponse::Error(ErrorResponse {
                error: OidcErrorCode::from(error),
                error_description: params.error_description,
                error_uri: params.error_uri,
            });
        }
        match params.code {
            Some(code) if !code.is_empty() => CallbackResponse::SuccessfulLogin(SuccessLoginResponse {
                code,
                state: params.state,
                session_state: params.session_state,
            }),
            _ => CallbackResponse::Empty,
        }
    }
}

/// Body of a token endpoint response, either granting tokens or rejecting the grant.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub(crate) enum TokenResponse {
    Success(SuccessTokenResponse),
    Error(ErrorResponse),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub(crate) struct SuccessTokenResponse {
    pub access_token: String,
    pub expires_in: i64,
    pub refresh_expires_in: Option<i64>,
    /// Keycloak always issues one for the code flow. Other providers may omit it on refresh.
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    pub id_token: Option<String>,
    #[serde(rename = "not-before-policy")]
    pub not_before_policy: Option<i64>,
    pub session_state: Option<String>,
    pub scope: Option<String>,
}

/// See [RFC 6749 Section 5.2](https://datatracker.ietf.org/doc/html/rfc6749#section-5.2) and
/// [Section 4.1.2.1](https://datatracker.ietf.org/doc/html/rfc6749#section-4.1.2.1).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum KnownOidcErrorCode {
    #[serde(rename = "invalid_request")]
    InvalidRequest,

    /// Client authentication failed, e.g. a wrong client secret.
    #[serde(rename = "invalid_client")]
    InvalidClient,

    /// The authorization code or refresh token is invalid, expired, revoked or was issued to
    /// another client.
    #[serde(rename = "invalid_grant")]
    InvalidGrant,

    #[serde(rename = "unauthorized_client")]
    UnauthorizedClient,

    #[serde(rename = "unsupported_grant_type")]
    UnsupportedGrantType,

    #[serde(rename = "invalid_scope")]
    InvalidScope,

    /// The user or Keycloak denied the authorization request.
    #[serde(rename = "access_denied")]
    AccessDenied,

    /// Keycloak could not show its login page without user interaction (`prompt=none`).
    #[serde(rename = "login_required")]
    LoginRequired,

    #[serde(rename = "server_error")]
    ServerError,

    #[serde(rename = "temporarily_unavailable")]
    TemporarilyUnavailable,
}

impl KnownOidcErrorCode {
    fn from_code(code: &str) -> Option<Self> {
        let known = match code {
            "invalid_request" => Self::InvalidRequest,
            "invalid_client" => Self::InvalidClient,
            "invalid_grant" => Self::InvalidGrant,
            "unauthorized_client" => Self::UnauthorizedClient,
            "unsupported_grant_type" => Self::UnsupportedGrantType,
            "invalid_scope" => Self::InvalidScope,
            "access_denied" => Self::AccessDenied,
            "login_required" => Self::LoginRequired,
            "server_error" => Self::ServerError,
            "temporarily_unavailable" => Self::TemporarilyUnavailable,
            _ => return None,
        };
        Some(known)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum OidcErrorCode {
    Known(KnownOidcErrorCode),
    Unknown(String),
}

impl From<String> for OidcErrorCode {
    fn from(error: String) -> Self {
        KnownOidcErrorCode::from_code(&error)
            .map(OidcErrorCode::Known)
            .unwrap_or(OidcErrorCode::Unknown(error))
    }
}

/// OAuth error response received from Keycloak, either as a token endpoint body or as query
/// parameters of the login callback.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ErrorResponse {
    /// The error code (e.g., `invalid_client` or `invalid_grant`).
    pub error: OidcErrorCode,

    /// OPTIONAL. Human-readable ASCII text providing additional information.
    pub error_description: Option<String>,

    /// OPTIONAL. A URI identifying a human-readable web page with information about the error.
    pub error_uri: Option<String>,
}

impl ErrorResponse {
    /// Any `invalid_grant` error suggests the session or token is no longer valid.
    pub fn is_likely_session_ended(&self) -> bool {
        self.error == OidcErrorCode::Known(KnownOidcErrorCode::InvalidGrant)
    }
}
