//! OAuth2 applications owned by the caller and the grants they have given.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use url::Url;

use super::ApiResult;
use super::auth::AuthUser;
use super::tokens::PageQuery;
use crate::models::access_token_scope::{AccessTokenScopeCategory, AccessTokenScopeLevel};
use crate::models::oauth2::{
    self, CreateOAuth2ApplicationOptions, GrantWithApplication, OAuth2Application, OAuth2Error,
    UpdateOAuth2ApplicationOptions,
};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ApplicationBody {
    pub name: String,
    #[serde(default)]
    pub confidential_client: bool,
    #[serde(default)]
    pub skip_secondary_authorization: bool,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

/// An application together with its freshly generated client secret.
#[derive(Debug, Serialize)]
pub struct ApplicationWithSecret {
    #[serde(flatten)]
    pub application: OAuth2Application,
    pub client_secret: String,
}

/// Every redirect URI must be an absolute URL.
pub(crate) fn validate_redirect_uris(uris: &[String]) -> Result<(), OAuth2Error> {
    for uri in uris {
        Url::parse(uri).map_err(|e| OAuth2Error::InvalidRedirectUri(format!("{uri}: {e}")))?;
    }
    Ok(())
}

/// `GET /api/v1/user/applications/oauth2`
pub async fn list_applications(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<Vec<OAuth2Application>>> {
    auth.require_scope(AccessTokenScopeLevel::Read, AccessTokenScopeCategory::User)?;
    let applications = oauth2::list_oauth2_applications_by_uid(&state.pool, auth.user.id, page.list_options()).await?;
    Ok(Json(applications))
}

/// `POST /api/v1/user/applications/oauth2`
///
/// The secret is only shown here.
pub async fn create_application(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<ApplicationBody>,
) -> ApiResult<(StatusCode, Json<ApplicationWithSecret>)> {
    auth.require_scope(AccessTokenScopeLevel::Write, AccessTokenScopeCategory::User)?;
    validate_redirect_uris(&body.redirect_uris)?;

    let mut application = oauth2::create_oauth2_application(
        &state.pool,
        CreateOAuth2ApplicationOptions {
            name: body.name,
            user_id: auth.user.id,
            confidential_client: body.confidential_client,
            skip_secondary_authorization: body.skip_secondary_authorization,
            redirect_uris: body.redirect_uris,
        },
    )
    .await?;
    let client_secret = application.generate_client_secret(&state.pool).await?;
    Ok((StatusCode::CREATED, Json(ApplicationWithSecret { application, client_secret })))
}

/// `GET /api/v1/user/applications/oauth2/{id}`
///
/// Someone else's application reads as missing.
pub async fn get_application(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<OAuth2Application>> {
    auth.require_scope(AccessTokenScopeLevel::Read, AccessTokenScopeCategory::User)?;
    let application = oauth2::get_oauth2_application_by_id(&state.pool, id).await?;
    if application.uid != auth.user.id {
        return Err(OAuth2Error::ApplicationNotFound(id).into());
    }
    Ok(Json(application))
}

/// `PATCH /api/v1/user/applications/oauth2/{id}`
pub async fn update_application(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
    Json(body): Json<ApplicationBody>,
) -> ApiResult<Json<OAuth2Application>> {
    auth.require_scope(AccessTokenScopeLevel::Write, AccessTokenScopeCategory::User)?;
    validate_redirect_uris(&body.redirect_uris)?;

    let application = oauth2::update_oauth2_application(
        &state.pool,
        UpdateOAuth2ApplicationOptions {
            id,
            user_id: auth.user.id,
            name: body.name,
            confidential_client: body.confidential_client,
            skip_secondary_authorization: body.skip_secondary_authorization,
            redirect_uris: body.redirect_uris,
        },
    )
    .await?;
    Ok(Json(application))
}

/// `DELETE /api/v1/user/applications/oauth2/{id}`
pub async fn delete_application(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    auth.require_scope(AccessTokenScopeLevel::Write, AccessTokenScopeCategory::User)?;
    oauth2::delete_oauth2_application(&state.pool, id, auth.user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// GRANTS
// =============================================================================

/// `GET /api/v1/user/grants`
pub async fn list_grants(
    State(state): State<AppState>,
    auth: AuthUser,
) -> ApiResult<Json<Vec<GrantWithApplication>>> {
    auth.require_scope(AccessTokenScopeLevel::Read, AccessTokenScopeCategory::User)?;
    Ok(Json(oauth2::list_oauth2_grants_by_user_id(&state.pool, auth.user.id).await?))
}

/// `DELETE /api/v1/user/grants/{id}`
pub async fn revoke_grant(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    auth.require_scope(AccessTokenScopeLevel::Write, AccessTokenScopeCategory::User)?;
    oauth2::revoke_oauth2_grant(&state.pool, id, auth.user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}
