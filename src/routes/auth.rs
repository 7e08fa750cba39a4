//! Access-token authentication for API routes.

use axum::extract::FromRef;
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use super::ApiError;
use crate::error::{ErrorKind, ModelError};
use crate::models::access_token::{self, AccessToken};
use crate::models::access_token_scope::{
    AccessTokenScope, AccessTokenScopeCategory, AccessTokenScopeLevel, required_scopes,
};
use crate::models::user::{self, User};
use crate::state::AppState;

/// Pull the token out of `Authorization: token <sha>` or
/// `Authorization: Bearer <sha>`. The scheme is case-insensitive.
pub(crate) fn token_from_header(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    let known = scheme.eq_ignore_ascii_case("token") || scheme.eq_ignore_ascii_case("bearer");
    (known && !token.is_empty()).then_some(token)
}

// =============================================================================
// AUTH EXTRACTOR
// =============================================================================

/// Authenticated user and the token they presented.
/// Use as a handler parameter to require authentication.
pub struct AuthUser {
    pub user: User,
    pub token: AccessToken,
}

impl AuthUser {
    /// Require `level` access to `category` from the presented token.
    ///
    /// # Errors
    ///
    /// Returns 403 when the token lacks the scope.
    pub fn require_scope(&self, level: AccessTokenScopeLevel, category: AccessTokenScopeCategory) -> Result<(), ApiError> {
        let needed = required_scopes(level, &[category]);
        let needed: Vec<&str> = needed.iter().map(AccessTokenScope::as_str).collect();
        if self.token.scope.has_scope(&needed)? {
            return Ok(());
        }
        Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "E_SCOPE_INSUFFICIENT",
            format!("token does not have at least one of required scope(s): {needed:?}"),
        ))
    }
}

impl<S> axum::extract::FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(ApiError::unauthorized)?;
        let presented = token_from_header(header).ok_or_else(ApiError::unauthorized)?;

        let app_state = AppState::from_ref(state);
        let token = match access_token::get_access_token_by_sha(&app_state.pool, &app_state.token_cache, presented).await {
            Ok(token) => token,
            Err(e) if e.is_not_exist() || e.kind() == ErrorKind::InvalidArgument => {
                return Err(ApiError::unauthorized());
            }
            Err(e) => return Err(e.into()),
        };

        let user = match user::get_user_by_id(&app_state.pool, token.uid).await {
            Ok(user) => user,
            Err(e) if e.is_not_exist() => return Err(ApiError::unauthorized()),
            Err(e) => return Err(e.into()),
        };
        if !user.is_active || user.prohibit_login {
            return Err(ApiError::new(
                StatusCode::FORBIDDEN,
                "E_USER_PROHIBITED",
                "user is not allowed to sign in",
            ));
        }

        if let Err(e) = access_token::touch_access_token(&app_state.pool, token.id).await {
            tracing::warn!(error = %e, token_id = token.id, "failed to record token use");
        }
        Ok(Self { user, token })
    }
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
