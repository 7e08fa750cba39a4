//! Router assembly and the shared HTTP error type.
//!
//! SYSTEM CONTEXT
//! ==============
//! A thin JSON API over the model layer, mounted under `/api/v1`. Every
//! handler authenticates through the `AuthUser` extractor, checks the token
//! scope it needs and delegates to one model operation. Model errors are
//! turned into HTTP responses in exactly one place, `ApiError`.

pub mod auth;
pub mod blocks;
pub mod emails;
pub mod oauth2;
pub mod tokens;
pub mod user;

use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, put};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{ErrorKind, ModelError};
use crate::state::AppState;

/// JSON error body: a stable code plus a human-readable message.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    #[must_use]
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self { status, body: ErrorBody { code, message: message.into() } }
    }

    #[must_use]
    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "E_UNAUTHORIZED", "authentication required")
    }
}

impl<E: ModelError> From<E> for ApiError {
    fn from(err: E) -> Self {
        let kind = err.kind();
        if kind == ErrorKind::Internal {
            tracing::error!(error = %err, code = err.error_code(), "request failed");
            // Internal details stay in the log.
            return Self::new(kind.status_code(), err.error_code(), kind.as_str());
        }
        Self::new(kind.status_code(), err.error_code(), err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Build the full application router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/v1/user", get(user::current_user))
        .route("/api/v1/user/tokens", get(tokens::list_tokens).post(tokens::create_token))
        .route("/api/v1/user/tokens/{id}", delete(tokens::delete_token))
        .route(
            "/api/v1/user/applications/oauth2",
            get(oauth2::list_applications).post(oauth2::create_application),
        )
        .route(
            "/api/v1/user/applications/oauth2/{id}",
            get(oauth2::get_application)
                .patch(oauth2::update_application)
                .delete(oauth2::delete_application),
        )
        .route("/api/v1/user/grants", get(oauth2::list_grants))
        .route("/api/v1/user/grants/{id}", delete(oauth2::revoke_grant))
        .route("/api/v1/user/emails", get(emails::list_emails).post(emails::add_emails))
        .route("/api/v1/user/emails/{email}", delete(emails::delete_email))
        .route("/api/v1/user/blocks", get(blocks::list_blocks))
        .route("/api/v1/user/blocks/{username}", put(blocks::block).delete(blocks::unblock))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
