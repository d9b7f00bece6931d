//! Access/refresh session handling for protected routes.
//!
//! `authenticate` is the whole decision: it takes the bearer token and the
//! refresh cookie and either yields an [`Identity`] (possibly with a freshly
//! minted access token) or a terminal failure. `require_session` adapts it to
//! an axum middleware.

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use time::Duration;
use tracing::{debug, warn};

use crate::auth::{TokenCodec, TokenError, TokenKind, REFRESH_TOKEN_TTL};
use crate::error::ApiError;
use crate::models::Identity;
use crate::rest::AppState;

pub const REFRESH_COOKIE: &str = "refresh_token";

/// Outcome of a successful authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub identity: Identity,
    /// Set when the access token had expired and was re-issued from the refresh token.
    pub reissued_access_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshFailure {
    Expired,
    Invalid,
    Failed,
}

impl RefreshFailure {
    pub fn code(self) -> &'static str {
        match self {
            RefreshFailure::Expired => "REFRESH_TOKEN_EXPIRED",
            RefreshFailure::Invalid => "INVALID_REFRESH_TOKEN",
            RefreshFailure::Failed => "AUTH_FAILED",
        }
    }

    fn message(self) -> &'static str {
        match self {
            RefreshFailure::Expired => "Refresh token has expired. Please login again.",
            RefreshFailure::Invalid => "Invalid refresh token. Please login again.",
            RefreshFailure::Failed => "Authentication failed. Please login again.",
        }
    }
}

impl From<TokenError> for RefreshFailure {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => RefreshFailure::Expired,
            TokenError::Invalid(_) => RefreshFailure::Invalid,
            TokenError::Rejected(_) | TokenError::Encode(_) => RefreshFailure::Failed,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthFailure {
    #[error("Token required.")]
    TokenRequired,

    #[error("Invalid access token.")]
    InvalidAccessToken,

    /// The refresh cookie must be cleared along with this rejection.
    #[error("{}", .0.message())]
    Refresh(RefreshFailure),

    #[error("failed to re-issue access token: {0}")]
    Reissue(TokenError),
}

impl From<AuthFailure> for ApiError {
    fn from(failure: AuthFailure) -> Self {
        match failure {
            AuthFailure::TokenRequired | AuthFailure::InvalidAccessToken => {
                ApiError::forbidden(failure.to_string())
            }
            AuthFailure::Refresh(reason) => ApiError::Authorization {
                message: reason.message().to_string(),
                code: Some(reason.code()),
            },
            AuthFailure::Reissue(e) => ApiError::internal("Error refreshing session", e),
        }
    }
}

/// Decide a request's session from its bearer token and refresh cookie.
pub fn authenticate(
    codec: &TokenCodec,
    bearer: Option<&str>,
    refresh_cookie: Option<&str>,
) -> Result<Session, AuthFailure> {
    let token = bearer.ok_or(AuthFailure::TokenRequired)?;

    match codec.verify(TokenKind::Access, token) {
        Ok(identity) => Ok(Session {
            identity,
            reissued_access_token: None,
        }),
        Err(TokenError::Expired) => {
            let refresh = refresh_cookie.ok_or(AuthFailure::InvalidAccessToken)?;
            let identity = codec
                .verify(TokenKind::Refresh, refresh)
                .map_err(|e| AuthFailure::Refresh(e.into()))?;
            let token = codec
                .issue_access_token(&identity.user_id)
                .map_err(AuthFailure::Reissue)?;
            Ok(Session {
                identity,
                reissued_access_token: Some(token),
            })
        }
        Err(_) => Err(AuthFailure::InvalidAccessToken),
    }
}

/// Axum middleware for protected routes: inserts [`Identity`] into the request
/// extensions and, after a refresh, returns the new access token in the
/// `Authorization` response header.
pub async fn require_session(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let bearer = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token);
    let refresh = jar.get(REFRESH_COOKIE).map(|c| c.value());

    let session = match authenticate(&state.tokens, bearer, refresh) {
        Ok(session) => session,
        Err(failure @ AuthFailure::Refresh(reason)) => {
            warn!(code = reason.code(), "refresh token rejected");
            let jar = jar.add(clear_refresh_cookie(state.secure_cookies));
            return (jar, ApiError::from(failure)).into_response();
        }
        Err(failure) => {
            debug!(reason = %failure, "request rejected");
            return ApiError::from(failure).into_response();
        }
    };

    let reissued = match session.reissued_access_token {
        Some(token) => match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(value) => Some(value),
            Err(e) => return ApiError::internal("Error refreshing session", e).into_response(),
        },
        None => None,
    };
    if reissued.is_some() {
        debug!(user_id = %session.identity.user_id, "access token re-issued from refresh token");
    }

    request.extensions_mut().insert(session.identity);
    let mut response = next.run(request).await;
    if let Some(value) = reissued {
        response.headers_mut().insert(header::AUTHORIZATION, value);
    }
    response
}

// The scheme is case-insensitive (RFC 7235).
fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// HTTP-only refresh cookie with the refresh token's own lifetime.
pub fn refresh_cookie(token: String, secure: bool) -> Cookie<'static> {
    Cookie::build((REFRESH_COOKIE, token))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(Duration::seconds(REFRESH_TOKEN_TTL.as_secs() as i64))
        .build()
}

/// Removal cookie for the refresh token.
pub fn clear_refresh_cookie(secure: bool) -> Cookie<'static> {
    Cookie::build((REFRESH_COOKIE, ""))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(Duration::ZERO)
        .build()
}
