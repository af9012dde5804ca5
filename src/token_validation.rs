use jsonwebtoken::{Validation, errors::ErrorKind};
use serde_json::{Map, Value};
use snafu::{IntoError, ResultExt, Snafu};

use crate::{jwk_set::JwkSetCache, request::RequestError};

#[derive(Debug, Snafu)]
pub enum JwtValidationError {
    #[snafu(display(
        "JwtValidationError: Could not decode JWT header. Input may have the wrong format"
    ))]
    DecodeHeader { source: jsonwebtoken::errors::Error },

    #[snafu(display("JwtValidationError: Could not obtain the JWK set"))]
    JwkSet { source: RequestError },

    #[snafu(display(
        "JwtValidationError: Could not find a JWK which would match the tokens 'kid': {token_kid:?}"
    ))]
    NoMatchingJwk { token_kid: Option<String> },

    #[snafu(display("JwtValidationError: Could not construct DecodingKey from JWK"))]
    JwkToDecodingKey { source: jsonwebtoken::errors::Error },

    #[snafu(display("JwtValidationError: Token is expired"))]
    Expired,

    #[snafu(display("JwtValidationError: Could not decode JWT"))]
    Decode { source: jsonwebtoken::errors::Error },
}

impl JwtValidationError {
    /// Signature and claims were fine, only the lifetime is over. A refresh may help.
    pub fn is_expired(&self) -> bool {
        matches!(self, JwtValidationError::Expired)
    }
}

/// Verified payload of a JWT.
pub type VerifiedClaims = Map<String, Value>;

/// Verifies tokens issued by the configured realm.
#[derive(Debug)]
pub struct TokenValidator {
    jwk_set: JwkSetCache,
    expected_issuers: Vec<String>,
    expected_audiences: Option<Vec<String>>,
}

impl TokenValidator {
    pub(crate) fn new(
        jwk_set: JwkSetCache,
        expected_issuers: Vec<String>,
        expected_audiences: Option<Vec<String>>,
    ) -> Self {
        Self {
            jwk_set,
            expected_issuers,
            expected_audiences,
        }
    }

    /// `true` iff `jwt` is well-formed, signed by a key of the realm, issued by the realm and
    /// not expired. Never fails.
    pub async fn is_jwt_valid(&self, jwt: &str) -> bool {
        match self.validate(jwt).await {
            Ok(_) => true,
            Err(err) => {
                tracing::debug!(reason = %err, "JWT is not valid");
                false
            }
        }
    }

    /// Validates `jwt` and returns its claims, or the reason it was rejected.
    pub async fn validate(&self, jwt: &str) -> Result<VerifiedClaims, JwtValidationError> {
        let jwt_header = jsonwebtoken::decode_header(jwt).context(DecodeHeaderSnafu {})?;

        tracing::trace!(?jwt_header, "Decoded JWT header");

        let jwk = self
            .jwk_set
            .find(jwt_header.kid.as_deref())
            .await
            .context(JwkSetSnafu {})?
            .ok_or_else(|| {
                NoMatchingJwkSnafu {
                    token_kid: jwt_header.kid.clone(),
                }
                .build()
            })?;

        let jwt_decoding_key =
            jsonwebtoken::DecodingKey::from_jwk(&jwk).context(JwkToDecodingKeySnafu {})?;

        let mut validation = Validation::new(jwt_header.alg);
        validation.leeway = 0;
        validation.set_issuer(&self.expected_issuers);
        match &self.expected_audiences {
            Some(expected_audiences) => validation.set_audience(expected_audiences),
            None => validation.validate_aud = false,
        }

        let token_data = jsonwebtoken::decode::<VerifiedClaims>(jwt, &jwt_decoding_key, &validation)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => ExpiredSnafu {}.build(),
                _ => DecodeSnafu {}.into_error(err),
            })?;

        Ok(token_data.claims)
    }
}
