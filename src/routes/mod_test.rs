use super::*;
use axum::body::{Body, to_bytes};
use axum::http::Request;
use tower::ServiceExt;

use crate::models::access_token::AccessTokenError;
use crate::models::user::UserError;
use crate::state::test_helpers::test_app_state;

async fn json_body(response: Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn healthz_is_ok() {
    let response = app(test_app_state())
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_authorization_is_unauthorized() {
    let response = app(test_app_state())
        .oneshot(Request::builder().uri("/api/v1/user").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["code"], "E_UNAUTHORIZED");
}

#[tokio::test]
async fn malformed_token_is_unauthorized_without_database() {
    for header in ["token abc", "Basic dXNlcjpwYXNz", "bearer"] {
        let response = app(test_app_state())
            .oneshot(
                Request::builder()
                    .uri("/api/v1/user/tokens")
                    .header("authorization", header)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{header}");
    }
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let response = app(test_app_state())
        .oneshot(Request::builder().uri("/api/v1/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn model_errors_map_to_status_and_code() {
    let err: ApiError = UserError::AlreadyExist("alice".into()).into();
    assert_eq!(err.status, StatusCode::CONFLICT);
    let body = json_body(err.into_response()).await;
    assert_eq!(body["code"], "E_USER_ALREADY_EXIST");
    assert_eq!(body["message"], "user already exists [name: alice]");

    let err: ApiError = AccessTokenError::NotExist.into();
    assert_eq!(err.status, StatusCode::NOT_FOUND);
}

#[test]
fn internal_errors_hide_details() {
    let err: ApiError = AccessTokenError::Db(sqlx::Error::PoolTimedOut).into();
    assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(err.body.code, "E_DATABASE");
    assert_eq!(err.body.message, "internal error");
}
