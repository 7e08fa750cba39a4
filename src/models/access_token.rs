//! Personal access tokens.
//!
//! DESIGN
//! ======
//! Only a salted HMAC of the token is stored, together with its last eight
//! characters. Lookup narrows candidates by the last eight characters and
//! then compares digests in constant time. Successful lookups are remembered
//! in the `AccessTokenCache`, but the row is always re-read so a deleted token
//! stops working immediately.

use serde::Serialize;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::info;

use crate::db::{ListOptions, now_unix};
use crate::error::{ErrorKind, ModelError, db_error_kind};
use crate::models::access_token_scope::{AccessTokenScope, ScopeError};
use crate::models::secret::{self, SecretError};
use crate::models::token_cache::AccessTokenCache;

/// Plaintext token length: hex of 20 random bytes.
pub const TOKEN_LENGTH: usize = 40;
const TOKEN_SALT_LENGTH: usize = 10;
const RECENT_ACTIVITY_SECS: i64 = 7 * 24 * 60 * 60;

const SELECT_TOKEN: &str = "SELECT id, uid, name, token_hash, token_salt, token_last_eight, scope, created_unix, updated_unix FROM access_token";

#[derive(Debug, thiserror::Error)]
pub enum AccessTokenError {
    #[error("access token is empty")]
    Empty,
    #[error("access token does not exist")]
    NotExist,
    #[error("access token name already exists [uid: {uid}, name: {name}]")]
    NameAlreadyExist { uid: i64, name: String },
    #[error(transparent)]
    Scope(#[from] ScopeError),
    #[error(transparent)]
    Secret(#[from] SecretError),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

impl ModelError for AccessTokenError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Empty | Self::Scope(_) => ErrorKind::InvalidArgument,
            Self::NotExist => ErrorKind::NotExist,
            Self::NameAlreadyExist { .. } => ErrorKind::AlreadyExist,
            Self::Secret(_) => ErrorKind::Internal,
            Self::Db(e) => db_error_kind(e),
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::Empty => "E_ACCESS_TOKEN_EMPTY",
            Self::NotExist => "E_ACCESS_TOKEN_NOT_EXIST",
            Self::NameAlreadyExist { .. } => "E_ACCESS_TOKEN_NAME_EXISTS",
            Self::Scope(_) => "E_SCOPE_INVALID",
            Self::Secret(_) => "E_SECRET",
            Self::Db(_) => "E_DATABASE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct AccessToken {
    pub id: i64,
    pub uid: i64,
    pub name: String,
    /// Plaintext, only populated right after creation.
    #[sqlx(skip)]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub token: String,
    #[serde(skip)]
    pub token_hash: String,
    #[serde(skip)]
    pub token_salt: String,
    pub token_last_eight: String,
    #[sqlx(try_from = "String")]
    pub scope: AccessTokenScope,
    pub created_unix: i64,
    pub updated_unix: i64,
}

impl AccessToken {
    /// Used within the last seven days.
    #[must_use]
    pub fn has_recent_activity(&self, now: i64) -> bool {
        self.updated_unix + RECENT_ACTIVITY_SECS > now
    }

    /// Used at least once since creation.
    #[must_use]
    pub fn has_used(&self) -> bool {
        self.updated_unix > self.created_unix
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewAccessToken {
    pub uid: i64,
    pub name: String,
    pub scope: AccessTokenScope,
}

/// Whether `token` has the shape of a plaintext access token.
#[must_use]
pub fn is_well_formed_token(token: &str) -> bool {
    token.len() == TOKEN_LENGTH && token.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Create a token, returning it with the plaintext populated.
///
/// # Errors
///
/// Returns `Scope` for an invalid scope, `NameAlreadyExist` when the user
/// already has a token with this name, or a database error.
pub async fn new_access_token(pool: &PgPool, new: NewAccessToken) -> Result<AccessToken, AccessTokenError> {
    let scope = new.scope.normalize()?;

    let token = secret::random_hex::<20>();
    let token_salt = secret::random_alphanumeric(TOKEN_SALT_LENGTH);
    let token_hash = secret::hash_token(&token, &token_salt)?;
    let token_last_eight = token[TOKEN_LENGTH - 8..].to_owned();
    let now = now_unix();

    let inserted: Option<(i64,)> = sqlx::query_as(
        r"INSERT INTO access_token (uid, name, token_hash, token_salt, token_last_eight, scope, created_unix, updated_unix)
          VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
          ON CONFLICT (uid, name) DO NOTHING
          RETURNING id",
    )
    .bind(new.uid)
    .bind(&new.name)
    .bind(&token_hash)
    .bind(&token_salt)
    .bind(&token_last_eight)
    .bind(scope.as_str())
    .bind(now)
    .fetch_optional(pool)
    .await?;
    let Some((id,)) = inserted else {
        return Err(AccessTokenError::NameAlreadyExist { uid: new.uid, name: new.name });
    };

    info!(token_id = id, uid = new.uid, name = %new.name, scope = %scope, "access token created");
    Ok(AccessToken {
        id,
        uid: new.uid,
        name: new.name,
        token,
        token_hash,
        token_salt,
        token_last_eight,
        scope,
        created_unix: now,
        updated_unix: now,
    })
}

async fn get_access_token_by_id(pool: &PgPool, id: i64) -> Result<Option<AccessToken>, sqlx::Error> {
    let mut query = QueryBuilder::<Postgres>::new(SELECT_TOKEN);
    query.push(" WHERE id = ").push_bind(id);
    query.build_query_as().fetch_optional(pool).await
}

/// Resolve a plaintext token.
///
/// # Errors
///
/// Returns `Empty` for an empty string, `NotExist` for a malformed or unknown
/// token, or a database error.
pub async fn get_access_token_by_sha(
    pool: &PgPool,
    cache: &AccessTokenCache,
    token: &str,
) -> Result<AccessToken, AccessTokenError> {
    if token.is_empty() {
        return Err(AccessTokenError::Empty);
    }
    if !is_well_formed_token(token) {
        return Err(AccessTokenError::NotExist);
    }

    if let Some(id) = cache.get(token) {
        if let Some(found) = get_access_token_by_id(pool, id).await? {
            return Ok(found);
        }
        cache.remove(token);
    }

    let last_eight = &token[TOKEN_LENGTH - 8..];
    let mut query = QueryBuilder::<Postgres>::new(SELECT_TOKEN);
    query.push(" WHERE token_last_eight = ").push_bind(last_eight);
    let candidates: Vec<AccessToken> = query.build_query_as().fetch_all(pool).await?;

    for candidate in candidates {
        let digest = secret::hash_token(token, &candidate.token_salt)?;
        if secret::constant_time_eq(&candidate.token_hash, &digest) {
            cache.insert(token, candidate.id);
            return Ok(candidate);
        }
    }
    Err(AccessTokenError::NotExist)
}

/// # Errors
///
/// Returns a database error.
pub async fn access_token_by_name_exists(pool: &PgPool, uid: i64, name: &str) -> Result<bool, AccessTokenError> {
    let (exists,): (bool,) =
        sqlx::query_as("SELECT EXISTS (SELECT 1 FROM access_token WHERE uid = $1 AND name = $2)")
            .bind(uid)
            .bind(name)
            .fetch_one(pool)
            .await?;
    Ok(exists)
}

#[derive(Debug, Clone, Default)]
pub struct ListAccessTokensOptions {
    pub user_id: i64,
    pub name: String,
    pub list: ListOptions,
}

impl ListAccessTokensOptions {
    fn push_conditions(&self, query: &mut QueryBuilder<'_, Postgres>) {
        query.push(" WHERE TRUE");
        if self.user_id != 0 {
            query.push(" AND uid = ").push_bind(self.user_id);
        }
        if !self.name.is_empty() {
            query.push(" AND name = ").push_bind(self.name.clone());
        }
    }
}

/// Tokens matching `opts`, newest first.
///
/// # Errors
///
/// Returns a database error.
pub async fn list_access_tokens(
    pool: &PgPool,
    opts: &ListAccessTokensOptions,
) -> Result<Vec<AccessToken>, AccessTokenError> {
    let mut query = QueryBuilder::<Postgres>::new(SELECT_TOKEN);
    opts.push_conditions(&mut query);
    query.push(" ORDER BY created_unix DESC, id DESC");
    opts.list.push_limit(&mut query);
    Ok(query.build_query_as().fetch_all(pool).await?)
}

/// # Errors
///
/// Returns a database error.
pub async fn count_access_tokens(pool: &PgPool, opts: &ListAccessTokensOptions) -> Result<i64, AccessTokenError> {
    let mut query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM access_token");
    opts.push_conditions(&mut query);
    let (count,): (i64,) = query.build_query_as().fetch_one(pool).await?;
    Ok(count)
}

/// Persist a changed name and scope.
///
/// # Errors
///
/// Returns `Scope` for an invalid scope, `NotExist` if the row is gone, or a
/// database error.
pub async fn update_access_token(pool: &PgPool, token: &mut AccessToken) -> Result<(), AccessTokenError> {
    token.scope = token.scope.normalize()?;
    token.updated_unix = now_unix();
    let result = sqlx::query("UPDATE access_token SET name = $1, scope = $2, updated_unix = $3 WHERE id = $4")
        .bind(&token.name)
        .bind(token.scope.as_str())
        .bind(token.updated_unix)
        .bind(token.id)
        .execute(pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AccessTokenError::NameAlreadyExist { uid: token.uid, name: token.name.clone() }
            }
            _ => AccessTokenError::Db(e),
        })?;
    if result.rows_affected() == 0 {
        return Err(AccessTokenError::NotExist);
    }
    Ok(())
}

/// Record use of a token.
///
/// # Errors
///
/// Returns a database error.
pub async fn touch_access_token(pool: &PgPool, id: i64) -> Result<(), AccessTokenError> {
    sqlx::query("UPDATE access_token SET updated_unix = $1 WHERE id = $2")
        .bind(now_unix())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Delete token `id` owned by `uid`.
///
/// # Errors
///
/// Returns `NotExist` if no such token belongs to `uid`, or a database error.
pub async fn delete_access_token_by_id(
    pool: &PgPool,
    cache: &AccessTokenCache,
    id: i64,
    uid: i64,
) -> Result<(), AccessTokenError> {
    let result = sqlx::query("DELETE FROM access_token WHERE id = $1 AND uid = $2")
        .bind(id)
        .bind(uid)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AccessTokenError::NotExist);
    }
    cache.remove_id(id);
    info!(token_id = id, uid, "access token deleted");
    Ok(())
}

#[cfg(test)]
#[path = "access_token_test.rs"]
mod tests;
