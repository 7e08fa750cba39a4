//! Personal access token management.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;

use super::{ApiError, ApiResult};
use super::auth::AuthUser;
use crate::db::ListOptions;
use crate::models::access_token::{self, AccessToken, ListAccessTokensOptions, NewAccessToken};
use crate::models::access_token_scope::{AccessTokenScope, AccessTokenScopeCategory, AccessTokenScopeLevel};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub page: i64,
    #[serde(default)]
    pub limit: i64,
}

impl PageQuery {
    pub(crate) fn list_options(&self) -> ListOptions {
        ListOptions::paginated(self.page, self.limit)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTokenBody {
    pub name: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// A token may only mint tokens it could have been itself.
pub(crate) fn check_requested_scope(presented: &AccessTokenScope, requested: &AccessTokenScope) -> Result<(), ApiError> {
    if presented.covers(requested)? {
        return Ok(());
    }
    Err(ApiError::new(
        StatusCode::FORBIDDEN,
        "E_SCOPE_ESCALATION",
        format!("token scope \"{presented}\" does not cover requested scope \"{requested}\""),
    ))
}

/// `GET /api/v1/user/tokens`
///
/// The caller's tokens, newest first.
pub async fn list_tokens(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<Vec<AccessToken>>> {
    auth.require_scope(AccessTokenScopeLevel::Read, AccessTokenScopeCategory::User)?;
    let opts = ListAccessTokensOptions { user_id: auth.user.id, list: page.list_options(), ..Default::default() };
    Ok(Json(access_token::list_access_tokens(&state.pool, &opts).await?))
}

/// `POST /api/v1/user/tokens`
///
/// Mint a token; the plaintext is returned once.
pub async fn create_token(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateTokenBody>,
) -> ApiResult<(StatusCode, Json<AccessToken>)> {
    auth.require_scope(AccessTokenScopeLevel::Write, AccessTokenScopeCategory::User)?;
    let scope = AccessTokenScope::new(body.scopes.join(","));
    check_requested_scope(&auth.token.scope, &scope)?;
    let token =
        access_token::new_access_token(&state.pool, NewAccessToken { uid: auth.user.id, name: body.name, scope }).await?;
    Ok((StatusCode::CREATED, Json(token)))
}

/// `DELETE /api/v1/user/tokens/{id}`
pub async fn delete_token(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    auth.require_scope(AccessTokenScopeLevel::Write, AccessTokenScopeCategory::User)?;
    access_token::delete_access_token_by_id(&state.pool, &state.token_cache, id, auth.user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
#[path = "tokens_test.rs"]
mod tests;
