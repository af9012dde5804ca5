use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderValue, StatusCode, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::{
    extract::CookieJar,
    headers::{Authorization, HeaderMapExt, authorization::Bearer},
};
use snafu::{OptionExt, ResultExt};

use crate::{
    codec::parse_jwt,
    error::{CodecSnafu, IdentitySnafu, KeycloakLoginError, RefreshSnafu, ValidationSnafu},
    identity::{NoSubjectSnafu, UserIdentity},
    session::{SessionId, removal_cookie, session_id_from},
    state::KeycloakLogin,
    token::TokenSet,
};

/// The authenticated caller of a request, put into the request extensions by
/// [`require_authentication`].
///
/// Also usable as an extractor. Extraction fails with `401 Unauthorized` when the route is not
/// guarded by the middleware.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub identity: UserIdentity,

    /// The access token the request was authorized with. After a refresh, this is the new token.
    pub access_token: String,

    /// Present when the request carried a session cookie.
    pub session_id: Option<SessionId>,
}

impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or_else(|| unauthorized(WwwAuthenticate::Bearer))
    }
}

#[derive(Debug, Clone, Copy)]
enum WwwAuthenticate {
    Bearer,
    InvalidToken,
}

fn unauthorized(challenge: WwwAuthenticate) -> Response {
    let challenge = match challenge {
        WwwAuthenticate::Bearer => HeaderValue::from_static("Bearer"),
        WwwAuthenticate::InvalidToken => HeaderValue::from_static(r#"Bearer error="invalid_token""#),
    };
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, challenge)],
    )
        .into_response()
}

/// Guards routes behind a valid Keycloak access token.
///
/// Install with `axum::middleware::from_fn_with_state(keycloak_login, require_authentication)`.
///
/// - No or malformed `Authorization: Bearer` header: `401`.
/// - Valid token: the [`AuthContext`] is attached and the request proceeds.
/// - Expired token and a session cookie naming a session with a refresh token: the session is
///   refreshed, the [`AuthContext`] of the new token is attached and the request proceeds.
///   Should the refresh fail, the session is ended and the response is `401`.
/// - Any other invalid token: `401`.
pub async fn require_authentication(
    State(auth): State<KeycloakLogin>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(bearer) = request.headers().typed_get::<Authorization<Bearer>>() else {
        tracing::debug!("Request carries no bearer token");
        return unauthorized(WwwAuthenticate::Bearer);
    };
    let access_token = bearer.token().to_owned();

    let session_cookie_name = &auth.config().advanced.session_cookie_name;
    let session_id = session_id_from(&jar, session_cookie_name);

    match auth.validator().validate(&access_token).await {
        Ok(claims) => match UserIdentity::from_claims(claims, auth.client().client_id()) {
            Ok(identity) => {
                request.extensions_mut().insert(AuthContext {
                    identity,
                    access_token,
                    session_id,
                });
                next.run(request).await
            }
            Err(err) => {
                tracing::debug!(reason = %err, "Rejecting token without usable identity");
                unauthorized(WwwAuthenticate::InvalidToken)
            }
        },
        Err(err) if err.is_expired() => {
            let Some(session_id) = session_id else {
                tracing::debug!("Token expired and no session to refresh");
                return unauthorized(WwwAuthenticate::InvalidToken);
            };
            match refreshed_identity(&auth, &session_id, &access_token).await {
                Ok((tokens, identity)) => {
                    request.extensions_mut().insert(AuthContext {
                        identity,
                        access_token: tokens.access_token,
                        session_id: Some(session_id),
                    });
                    next.run(request).await
                }
                Err(err) => {
                    tracing::debug!(reason = %err, "Could not refresh expired token");
                    auth.end_session(&session_id).await;
                    (
                        jar.remove(removal_cookie(session_cookie_name)),
                        unauthorized(WwwAuthenticate::InvalidToken),
                    )
                        .into_response()
                }
            }
        }
        Err(err) => {
            tracing::debug!(reason = %err, "Rejecting invalid token");
            unauthorized(WwwAuthenticate::InvalidToken)
        }
    }
}

/// Refreshes the session and derives the identity of its new access token. The new token must
/// belong to the same user as the expired one.
async fn refreshed_identity(
    auth: &KeycloakLogin,
    session_id: &SessionId,
    expired_access_token: &str,
) -> Result<(TokenSet, UserIdentity), KeycloakLoginError> {
    let tokens = auth
        .refresh_session(session_id, Some(expired_access_token))
        .await
        .context(RefreshSnafu {})?;

    let claims = auth
        .validator()
        .validate(&tokens.access_token)
        .await
        .context(ValidationSnafu {})?;
    let identity =
        UserIdentity::from_claims(claims, auth.client().client_id()).context(IdentitySnafu {})?;

    // The signature of the expired token was checked before its expiry was, so its subject
    // can be trusted.
    let expired = parse_jwt(expired_access_token).context(CodecSnafu {})?;
    let expired_subject = expired
        .subject()
        .context(NoSubjectSnafu {})
        .context(IdentitySnafu {})?;
    identity
        .ensure_same_subject(expired_subject)
        .context(IdentitySnafu {})?;

    Ok((tokens, identity))
}
