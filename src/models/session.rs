//! Server-side session storage.
//!
//! `expiry` holds the time of the last write, not a deadline: a session is
//! stale once `expiry + max_lifetime` has passed.

use sqlx::{PgConnection, PgPool};
use tracing::{debug, info};

use crate::db::now_unix;
use crate::error::{ErrorKind, ModelError, db_error_kind};

/// Session keys are fixed-width.
pub const SESSION_KEY_LENGTH: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session key is invalid [key: {0}]")]
    InvalidKey(String),
    #[error("session already exists [key: {0}]")]
    AlreadyExist(String),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

impl ModelError for SessionError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidKey(_) => ErrorKind::InvalidArgument,
            Self::AlreadyExist(_) => ErrorKind::AlreadyExist,
            Self::Db(e) => db_error_kind(e),
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidKey(_) => "E_SESSION_INVALID_KEY",
            Self::AlreadyExist(_) => "E_SESSION_ALREADY_EXIST",
            Self::Db(_) => "E_DATABASE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Session {
    pub key: String,
    pub data: Vec<u8>,
    pub expiry: i64,
}

fn check_key(key: &str) -> Result<(), SessionError> {
    if key.len() == SESSION_KEY_LENGTH && key.is_ascii() {
        Ok(())
    } else {
        Err(SessionError::InvalidKey(key.to_owned()))
    }
}

async fn exist_session_conn(conn: &mut PgConnection, key: &str) -> Result<bool, sqlx::Error> {
    let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM session WHERE key = $1)")
        .bind(key)
        .fetch_one(conn)
        .await?;
    Ok(exists)
}

async fn insert_empty_session(conn: &mut PgConnection, key: &str, now: i64) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO session (key, data, expiry) VALUES ($1, ''::bytea, $2) ON CONFLICT (key) DO NOTHING")
        .bind(key)
        .bind(now)
        .execute(conn)
        .await?;
    Ok(())
}

async fn fetch_session(conn: &mut PgConnection, key: &str) -> Result<Session, sqlx::Error> {
    sqlx::query_as("SELECT key, data, expiry FROM session WHERE key = $1")
        .bind(key)
        .fetch_one(conn)
        .await
}

/// Store `data` and refresh the session's timestamp.
///
/// # Errors
///
/// Returns `InvalidKey` or a database error.
pub async fn update_session(pool: &PgPool, key: &str, data: &[u8]) -> Result<(), SessionError> {
    check_key(key)?;
    sqlx::query("UPDATE session SET data = $1, expiry = $2 WHERE key = $3")
        .bind(data)
        .bind(now_unix())
        .bind(key)
        .execute(pool)
        .await?;
    Ok(())
}

/// Load a session, creating an empty one if there is none yet.
///
/// # Errors
///
/// Returns `InvalidKey` or a database error.
pub async fn read_session(pool: &PgPool, key: &str) -> Result<Session, SessionError> {
    check_key(key)?;
    let mut tx = pool.begin().await?;
    insert_empty_session(tx.as_mut(), key, now_unix()).await?;
    let session = fetch_session(tx.as_mut(), key).await?;
    tx.commit().await?;
    Ok(session)
}

/// # Errors
///
/// Returns a database error.
pub async fn exist_session(pool: &PgPool, key: &str) -> Result<bool, SessionError> {
    if check_key(key).is_err() {
        return Ok(false);
    }
    Ok(exist_session_conn(&mut *pool.acquire().await?, key).await?)
}

/// # Errors
///
/// Returns a database error.
pub async fn destroy_session(pool: &PgPool, key: &str) -> Result<(), SessionError> {
    sqlx::query("DELETE FROM session WHERE key = $1").bind(key).execute(pool).await?;
    Ok(())
}

/// Move the session stored under `old_key` to `new_key`. A missing old
/// session is created empty first.
///
/// # Errors
///
/// Returns `InvalidKey`, `AlreadyExist` if `new_key` is taken, or a database
/// error.
pub async fn regenerate_session(pool: &PgPool, old_key: &str, new_key: &str) -> Result<Session, SessionError> {
    check_key(old_key)?;
    check_key(new_key)?;
    let mut tx = pool.begin().await?;
    if exist_session_conn(tx.as_mut(), new_key).await? {
        return Err(SessionError::AlreadyExist(new_key.to_owned()));
    }
    insert_empty_session(tx.as_mut(), old_key, now_unix()).await?;
    sqlx::query("UPDATE session SET key = $1 WHERE key = $2")
        .bind(new_key)
        .bind(old_key)
        .execute(tx.as_mut())
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => SessionError::AlreadyExist(new_key.to_owned()),
            _ => SessionError::Db(e),
        })?;
    let session = fetch_session(tx.as_mut(), new_key).await?;
    tx.commit().await?;
    debug!("session regenerated");
    Ok(session)
}

/// # Errors
///
/// Returns a database error.
pub async fn count_sessions(pool: &PgPool) -> Result<i64, SessionError> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM session").fetch_one(pool).await?;
    Ok(count)
}

/// Delete sessions not written for `max_lifetime_secs`.
///
/// # Errors
///
/// Returns a database error.
pub async fn cleanup_sessions(pool: &PgPool, max_lifetime_secs: i64) -> Result<u64, SessionError> {
    cleanup_sessions_at(pool, max_lifetime_secs, now_unix()).await
}

/// [`cleanup_sessions`] against an explicit clock.
///
/// # Errors
///
/// Returns a database error.
pub async fn cleanup_sessions_at(pool: &PgPool, max_lifetime_secs: i64, now: i64) -> Result<u64, SessionError> {
    let result = sqlx::query("DELETE FROM session WHERE expiry + $1 <= $2")
        .bind(max_lifetime_secs)
        .bind(now)
        .execute(pool)
        .await?;
    let removed = result.rows_affected();
    if removed > 0 {
        info!(removed, "expired sessions removed");
    }
    Ok(removed)
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
