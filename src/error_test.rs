use super::*;

#[test]
fn kinds_map_to_distinct_statuses() {
    assert_eq!(ErrorKind::NotExist.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(ErrorKind::AlreadyExist.status_code(), StatusCode::CONFLICT);
    assert_eq!(ErrorKind::InvalidArgument.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(ErrorKind::PermissionDenied.status_code(), StatusCode::FORBIDDEN);
    assert_eq!(ErrorKind::Internal.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[test]
fn row_not_found_is_not_exist() {
    assert_eq!(db_error_kind(&sqlx::Error::RowNotFound), ErrorKind::NotExist);
}

#[test]
fn pool_errors_are_internal() {
    assert_eq!(db_error_kind(&sqlx::Error::PoolTimedOut), ErrorKind::Internal);
}

#[test]
fn default_predicates_follow_kind() {
    struct Missing;
    impl std::fmt::Display for Missing {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("missing")
        }
    }
    impl ModelError for Missing {
        fn kind(&self) -> ErrorKind {
            ErrorKind::NotExist
        }
        fn error_code(&self) -> &'static str {
            "E_MISSING"
        }
    }

    assert!(Missing.is_not_exist());
    assert!(!Missing.is_already_exist());
}
