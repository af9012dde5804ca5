use axum::{
    Json,
    extract::{Query, State, rejection::QueryRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use serde::Serialize;
use snafu::{IntoError, ResultExt, Snafu, ensure};

use crate::{
    csrf_token::CsrfToken,
    identity::{IdentityError, UserIdentity},
    request::RequestError,
    response::{CallbackParams, CallbackResponse, ErrorResponse},
    session::{SessionId, build_cookie, removal_cookie, session_id_from},
    state::KeycloakLogin,
    token_validation::JwtValidationError,
};

/// Reasons a login callback could not establish a session. Only ever logged.
#[derive(Debug, Snafu)]
pub enum LoginError {
    #[snafu(display("LoginError: Keycloak reported an error: {error_response:?}"))]
    Rejected { error_response: ErrorResponse },

    #[snafu(display("LoginError: Callback query could not be read"))]
    UnreadableQuery { source: QueryRejection },

    #[snafu(display("LoginError: Callback carries neither a code nor an error"))]
    MissingCode,

    #[snafu(display("LoginError: Returned 'state' does not match the one of this browser"))]
    StateMismatch,

    #[snafu(display("LoginError: Could not exchange the authorization code"))]
    Exchange { source: RequestError },

    #[snafu(display("LoginError: Received an invalid access token"))]
    InvalidToken { source: JwtValidationError },

    #[snafu(display("LoginError: Could not retrieve user info"))]
    UserInfo { source: RequestError },

    #[snafu(display("LoginError: Could not derive the user identity"))]
    Identity { source: IdentityError },
}

/// A pending login is abandoned after this long.
const LOGIN_STATE_MAX_AGE: time::Duration = time::Duration::minutes(10);

/// Sends the browser to Keycloak's login page.
pub async fn login(State(auth): State<KeycloakLogin>, jar: CookieJar) -> Response {
    let csrf_token = CsrfToken::new();

    let mut login_url = auth.client().authorization_url();
    login_url
        .query_pairs_mut()
        .append_pair("state", csrf_token.as_str());

    let advanced = &auth.config().advanced;
    let mut state_cookie = build_cookie(
        &advanced.state_cookie_name,
        csrf_token.as_str().to_owned(),
        advanced.secure_cookies,
    );
    state_cookie.set_max_age(LOGIN_STATE_MAX_AGE);

    tracing::debug!("Redirecting to Keycloak login");
    (jar.add(state_cookie), Redirect::to(login_url.as_str())).into_response()
}

/// Target of Keycloak's redirect after a login.
///
/// Exchanges the code, runs the post-login hook and starts a new session. Every failure sends
/// the browser to the configured login error page.
pub async fn login_callback(
    State(auth): State<KeycloakLogin>,
    jar: CookieJar,
    params: Result<Query<CallbackParams>, QueryRejection>,
) -> Response {
    let advanced = &auth.config().advanced;
    let expected_state = jar
        .get(&advanced.state_cookie_name)
        .map(|cookie| CsrfToken::from(cookie.value().to_owned()));
    let jar = jar.remove(removal_cookie(&advanced.state_cookie_name));

    let result = match params {
        Ok(Query(params)) => complete_login(&auth, expected_state, params).await,
        Err(rejection) => Err(UnreadableQuerySnafu {}.into_error(rejection)),
    };
    match result {
        Ok(session_id) => {
            if let Some(previous) = session_id_from(&jar, &advanced.session_cookie_name) {
                auth.end_session(&previous).await;
            }
            let session_cookie = build_cookie(
                &advanced.session_cookie_name,
                session_id.as_str().to_owned(),
                advanced.secure_cookies,
            );
            (
                jar.add(session_cookie),
                Redirect::to(auth.config().post_login_redirect_url.as_str()),
            )
                .into_response()
        }
        Err(err) => {
            tracing::warn!(reason = %err, "Login failed");
            (
                jar,
                Redirect::to(auth.config().login_error_redirect_url.as_str()),
            )
                .into_response()
        }
    }
}

async fn complete_login(
    auth: &KeycloakLogin,
    expected_state: Option<CsrfToken>,
    params: CallbackParams,
) -> Result<SessionId, LoginError> {
    let success = match CallbackResponse::from(params) {
        CallbackResponse::SuccessfulLogin(success) => success,
        CallbackResponse::Error(error_response) => {
            return RejectedSnafu { error_response }.fail();
        }
        CallbackResponse::Empty => return MissingCodeSnafu {}.fail(),
    };

    let state_matches = match (expected_state, success.state.as_deref()) {
        (Some(expected), Some(returned)) => expected.matches(returned),
        _ => false,
    };
    ensure!(state_matches, StateMismatchSnafu {});
    tracing::trace!(session_state = ?success.session_state, "Received authorization code");

    let tokens = auth
        .client()
        .get_tokens(&success.code)
        .await
        .context(ExchangeSnafu {})?;

    let client_id = auth.client().client_id();
    let claims = auth
        .validator()
        .validate(&tokens.access_token)
        .await
        .context(InvalidTokenSnafu {})?;
    let token_identity = UserIdentity::from_claims(claims, client_id).context(IdentitySnafu {})?;

    let user_info = auth
        .client()
        .get_user_info(&tokens.access_token)
        .await
        .context(UserInfoSnafu {})?;
    let user = UserIdentity::from_claims(user_info, client_id).context(IdentitySnafu {})?;
    user.ensure_same_subject(&token_identity.subject)
        .context(IdentitySnafu {})?;

    if let Some(hook) = auth.post_login_hook() {
        if let Err(err) = hook.after_user_login(&user).await {
            tracing::warn!(subject = %user.subject, reason = %err, "Post-login hook failed");
        }
    }

    let session_id = SessionId::generate();
    auth.sessions().store(&session_id, tokens).await;
    tracing::debug!(subject = %user.subject, session = ?session_id, "User logged in");
    Ok(session_id)
}

/// Ends the local session and sends the browser to Keycloak to end its session there too.
pub async fn logout(State(auth): State<KeycloakLogin>, jar: CookieJar) -> Response {
    let jar = clear_session(&auth, jar).await;
    (jar, Redirect::to(auth.client().logout_url().as_str())).into_response()
}

/// Target of Keycloak's redirect after ending its session.
pub async fn logout_callback(State(auth): State<KeycloakLogin>, jar: CookieJar) -> Response {
    let jar = clear_session(&auth, jar).await;
    (
        jar,
        Redirect::to(auth.config().post_logout_redirect_url.as_str()),
    )
        .into_response()
}

async fn clear_session(auth: &KeycloakLogin, jar: CookieJar) -> CookieJar {
    let cookie_name = &auth.config().advanced.session_cookie_name;
    if let Some(session_id) = session_id_from(&jar, cookie_name) {
        auth.end_session(&session_id).await;
    }
    jar.remove(removal_cookie(cookie_name))
}

#[derive(Debug, Serialize)]
struct TokenBody {
    access_token: String,
    /// Unix timestamp in seconds.
    expires_at: i64,
}

/// Hands the access token of the current session to browser code calling APIs guarded by
/// [`crate::middleware::require_authentication`]. Refreshes the session first when its
/// access token expired.
pub async fn token(State(auth): State<KeycloakLogin>, jar: CookieJar) -> Response {
    let cookie_name = &auth.config().advanced.session_cookie_name;
    let Some(session_id) = session_id_from(&jar, cookie_name) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let Some(tokens) = auth.sessions().load(&session_id).await else {
        return (jar.remove(removal_cookie(cookie_name)), StatusCode::UNAUTHORIZED).into_response();
    };

    let tokens = if tokens.access_token_expired() {
        match auth
            .refresh_session(&session_id, Some(&tokens.access_token))
            .await
        {
            Ok(refreshed) => refreshed,
            Err(err) => {
                tracing::debug!(reason = %err, "Could not refresh session");
                return (jar.remove(removal_cookie(cookie_name)), StatusCode::UNAUTHORIZED)
                    .into_response();
            }
        }
    } else {
        tokens
    };

    (
        [(header::CACHE_CONTROL, "no-store")],
        Json(TokenBody {
            access_token: tokens.access_token,
            expires_at: tokens.expires_at.unix_timestamp(),
        }),
    )
        .into_response()
}
