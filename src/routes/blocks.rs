//! Users blocked by the caller.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;

use super::ApiResult;
use super::auth::AuthUser;
use super::tokens::PageQuery;
use crate::models::access_token_scope::{AccessTokenScopeCategory, AccessTokenScopeLevel};
use crate::models::user;
use crate::models::user_block::{self, Block, FindBlockingOptions};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct BlockQuery {
    #[serde(default)]
    pub note: String,
}

/// `GET /api/v1/user/blocks`
pub async fn list_blocks(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<Vec<Block>>> {
    auth.require_scope(AccessTokenScopeLevel::Read, AccessTokenScopeCategory::User)?;
    let opts = FindBlockingOptions { blocker_id: auth.user.id, list: page.list_options(), ..Default::default() };
    Ok(Json(user_block::find_blockings(&state.pool, &opts).await?))
}

/// `PUT /api/v1/user/blocks/{username}?note=...`
pub async fn block(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(username): Path<String>,
    Query(query): Query<BlockQuery>,
) -> ApiResult<StatusCode> {
    auth.require_scope(AccessTokenScopeLevel::Write, AccessTokenScopeCategory::User)?;
    let blockee = user::get_user_by_name(&state.pool, &username).await?;
    user_block::block_user(&state.pool, auth.user.id, blockee.id, &query.note).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /api/v1/user/blocks/{username}`
pub async fn unblock(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(username): Path<String>,
) -> ApiResult<StatusCode> {
    auth.require_scope(AccessTokenScopeLevel::Write, AccessTokenScopeCategory::User)?;
    let blockee = user::get_user_by_name(&state.pool, &username).await?;
    user_block::unblock_user(&state.pool, auth.user.id, blockee.id).await?;
    Ok(StatusCode::NO_CONTENT)
}
