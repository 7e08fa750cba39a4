//! Shared error taxonomy for the model layer.
//!
//! DESIGN
//! ======
//! Every model module owns its own `thiserror` enum, but all of them classify
//! into the same small set of kinds. Route handlers only ever look at the
//! kind, so adding a new error variant never touches the HTTP layer.

use axum::http::StatusCode;

/// Coarse classification shared by every model error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotExist,
    AlreadyExist,
    InvalidArgument,
    PermissionDenied,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotExist => "resource does not exist",
            Self::AlreadyExist => "resource already exists",
            Self::InvalidArgument => "invalid argument",
            Self::PermissionDenied => "permission denied",
            Self::Internal => "internal error",
        }
    }

    #[must_use]
    pub fn status_code(self) -> StatusCode {
        match self {
            Self::NotExist => StatusCode::NOT_FOUND,
            Self::AlreadyExist => StatusCode::CONFLICT,
            Self::InvalidArgument => StatusCode::BAD_REQUEST,
            Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Implemented by every model error enum.
pub trait ModelError: std::fmt::Display {
    fn kind(&self) -> ErrorKind;

    /// Stable machine-readable code, e.g. `E_USER_NOT_EXIST`.
    fn error_code(&self) -> &'static str;

    fn is_not_exist(&self) -> bool {
        self.kind() == ErrorKind::NotExist
    }

    fn is_already_exist(&self) -> bool {
        self.kind() == ErrorKind::AlreadyExist
    }
}

/// Kind for a raw database error: a unique-constraint violation means the row
/// already exists, everything else is internal.
#[must_use]
pub fn db_error_kind(err: &sqlx::Error) -> ErrorKind {
    match err {
        sqlx::Error::RowNotFound => ErrorKind::NotExist,
        sqlx::Error::Database(db) if db.is_unique_violation() => ErrorKind::AlreadyExist,
        _ => ErrorKind::Internal,
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
