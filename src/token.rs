use serde::{Deserialize, Serialize};
use snafu::{OptionExt, Snafu};
use time::{Duration, OffsetDateTime};

use crate::{AccessToken, RefreshToken, response::SuccessTokenResponse};

/// Tokens of one login session, as last received from Keycloak.
///
/// Owned by the session store. Replaced as a whole on every refresh.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TokenSet {
    /// Access token. Allows access to resources requiring authentication unless expired.
    pub access_token: AccessToken,

    /// Refresh token. May be used to obtain a new access token without user intervention.
    pub refresh_token: Option<RefreshToken>,

    /// Point in time when the `access_token` expires.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,

    /// The ID token of the login. Not used for authorization.
    pub id_token: Option<String>,

    /// Point in time when the `refresh_token` expires.
    #[serde(with = "time::serde::rfc3339::option")]
    pub refresh_expires_at: Option<OffsetDateTime>,

    /// Point in time this token data was received.
    #[serde(with = "time::serde::rfc3339")]
    pub time_received: OffsetDateTime,
}

/// A lifetime reported by the token endpoint that no point in time can represent.
#[derive(Debug, Snafu)]
#[snafu(display("TokenLifetimeError: Lifetime of {seconds}s is out of range"))]
pub struct TokenLifetimeError {
    seconds: i64,
}

impl TokenSet {
    pub fn access_token_expired(&self) -> bool {
        self.expires_at <= OffsetDateTime::now_utc()
    }

    /// `false` when Keycloak did not state a refresh token lifetime.
    pub fn refresh_token_expired(&self) -> bool {
        self.refresh_expires_at
            .is_some_and(|expires_at| expires_at <= OffsetDateTime::now_utc())
    }

    pub fn has_usable_refresh_token(&self) -> bool {
        self.refresh_token.is_some() && !self.refresh_token_expired()
    }

    /// Whether these tokens can still authenticate a request, directly or after a refresh.
    pub fn is_alive(&self) -> bool {
        !self.access_token_expired() || self.has_usable_refresh_token()
    }

    /// Keeps the refresh token (and id token) of `previous` when a refresh response
    /// did not rotate them.
    pub(crate) fn inherit_from(mut self, previous: &TokenSet) -> Self {
        if self.refresh_token.is_none() {
            self.refresh_token = previous.refresh_token.clone();
            self.refresh_expires_at = previous.refresh_expires_at;
        }
        if self.id_token.is_none() {
            self.id_token = previous.id_token.clone();
        }
        self
    }
}

fn after(now: OffsetDateTime, seconds: i64) -> Result<OffsetDateTime, TokenLifetimeError> {
    now.checked_add(Duration::seconds(seconds))
        .context(TokenLifetimeSnafu { seconds })
}

impl TryFrom<SuccessTokenResponse> for TokenSet {
    type Error = TokenLifetimeError;

    fn try_from(value: SuccessTokenResponse) -> Result<Self, Self::Error> {
        let now = OffsetDateTime::now_utc();
        let refresh_expires_at = match value.refresh_expires_in {
            // Keycloak reports 0 for offline tokens, which do not expire.
            Some(seconds) if seconds > 0 => Some(after(now, seconds)?),
            _ => None,
        };
        Ok(Self {
            access_token: value.access_token,
            refresh_token: value.refresh_token,
            expires_at: after(now, value.expires_in)?,
            id_token: value.id_token,
            refresh_expires_at,
            time_received: now,
        })
    }
}
