//! The caller's e-mail addresses.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;

use super::ApiResult;
use super::auth::AuthUser;
use crate::models::access_token_scope::{AccessTokenScopeCategory, AccessTokenScopeLevel};
use crate::models::email_address::{self, EmailAddress};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AddEmailsBody {
    pub emails: Vec<String>,
}

/// `GET /api/v1/user/emails`
pub async fn list_emails(State(state): State<AppState>, auth: AuthUser) -> ApiResult<Json<Vec<EmailAddress>>> {
    auth.require_scope(AccessTokenScopeLevel::Read, AccessTokenScopeCategory::User)?;
    Ok(Json(email_address::get_email_addresses(&state.pool, auth.user.id).await?))
}

/// `POST /api/v1/user/emails`
///
/// New addresses start inactive when the instance requires confirmation.
pub async fn add_emails(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<AddEmailsBody>,
) -> ApiResult<(StatusCode, Json<Vec<EmailAddress>>)> {
    auth.require_scope(AccessTokenScopeLevel::Write, AccessTokenScopeCategory::User)?;
    for email in &body.emails {
        email_address::validate_email(email, &state.config.email_domains)?;
    }
    let activated = !state.config.register_email_confirm;
    let added = email_address::add_email_addresses(&state.pool, auth.user.id, &body.emails, activated).await?;
    Ok((StatusCode::CREATED, Json(added)))
}

/// `DELETE /api/v1/user/emails/{email}`
pub async fn delete_email(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(email): Path<String>,
) -> ApiResult<StatusCode> {
    auth.require_scope(AccessTokenScopeLevel::Write, AccessTokenScopeCategory::User)?;
    email_address::delete_email_address(&state.pool, auth.user.id, &email).await?;
    Ok(StatusCode::NO_CONTENT)
}
