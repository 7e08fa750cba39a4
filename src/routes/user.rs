//! The authenticated user's own profile.

use axum::response::Json;

use super::ApiResult;
use super::auth::AuthUser;
use crate::models::access_token_scope::{AccessTokenScopeCategory, AccessTokenScopeLevel};
use crate::models::user::User;

/// `GET /api/v1/user`
///
/// The user owning the presented token.
pub async fn current_user(auth: AuthUser) -> ApiResult<Json<User>> {
    auth.require_scope(AccessTokenScopeLevel::Read, AccessTokenScopeCategory::User)?;
    Ok(Json(auth.user))
}
