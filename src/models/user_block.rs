//! User blocking: a blocker hides a blockee from interacting with them.

use serde::Serialize;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::info;

use crate::db::{ListOptions, now_unix};
use crate::error::{ErrorKind, ModelError, db_error_kind};
use crate::models::user::UserType;

const SELECT_BLOCK: &str = "SELECT id, blocker_id, blockee_id, note, created_unix FROM user_blocking";

#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    #[error("user can not block themselves [uid: {0}]")]
    BlockSelf(i64),
    #[error("organizations can not be blocked [uid: {0}]")]
    BlockOrganization(i64),
    #[error("user does not exist [uid: {0}]")]
    UserNotExist(i64),
    #[error("user is already blocked [blocker: {blocker_id}, blockee: {blockee_id}]")]
    AlreadyBlocked { blocker_id: i64, blockee_id: i64 },
    #[error("user is not blocked [blocker: {blocker_id}, blockee: {blockee_id}]")]
    NotBlocked { blocker_id: i64, blockee_id: i64 },
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

impl ModelError for BlockError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::BlockSelf(_) | Self::BlockOrganization(_) => ErrorKind::InvalidArgument,
            Self::UserNotExist(_) | Self::NotBlocked { .. } => ErrorKind::NotExist,
            Self::AlreadyBlocked { .. } => ErrorKind::AlreadyExist,
            Self::Db(e) => db_error_kind(e),
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::BlockSelf(_) => "E_BLOCK_SELF",
            Self::BlockOrganization(_) => "E_BLOCK_ORGANIZATION",
            Self::UserNotExist(_) => "E_USER_NOT_EXIST",
            Self::AlreadyBlocked { .. } => "E_BLOCK_ALREADY_EXIST",
            Self::NotBlocked { .. } => "E_BLOCK_NOT_EXIST",
            Self::Db(_) => "E_DATABASE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Block {
    pub id: i64,
    pub blocker_id: i64,
    pub blockee_id: i64,
    pub note: String,
    pub created_unix: i64,
}

/// Whether `blocker_id` blocks any of `blockee_ids`.
///
/// # Errors
///
/// Returns a database error.
pub async fn is_blocked(pool: &PgPool, blocker_id: i64, blockee_ids: &[i64]) -> Result<bool, BlockError> {
    if blockee_ids.is_empty() {
        return Ok(false);
    }
    let (blocked,): (bool,) = sqlx::query_as(
        "SELECT EXISTS (SELECT 1 FROM user_blocking WHERE blocker_id = $1 AND blockee_id = ANY($2))",
    )
    .bind(blocker_id)
    .bind(blockee_ids)
    .fetch_one(pool)
    .await?;
    Ok(blocked)
}

/// Whether any of `blocker_ids` blocks `blockee_id`.
///
/// # Errors
///
/// Returns a database error.
pub async fn is_blocked_multiple(pool: &PgPool, blocker_ids: &[i64], blockee_id: i64) -> Result<bool, BlockError> {
    if blocker_ids.is_empty() {
        return Ok(false);
    }
    let (blocked,): (bool,) = sqlx::query_as(
        "SELECT EXISTS (SELECT 1 FROM user_blocking WHERE blocker_id = ANY($1) AND blockee_id = $2)",
    )
    .bind(blocker_ids)
    .bind(blockee_id)
    .fetch_one(pool)
    .await?;
    Ok(blocked)
}

/// # Errors
///
/// Returns a database error.
pub async fn get_blocking(pool: &PgPool, blocker_id: i64, blockee_id: i64) -> Result<Option<Block>, BlockError> {
    let mut query = QueryBuilder::<Postgres>::new(SELECT_BLOCK);
    query.push(" WHERE blocker_id = ").push_bind(blocker_id);
    query.push(" AND blockee_id = ").push_bind(blockee_id);
    Ok(query.build_query_as().fetch_optional(pool).await?)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FindBlockingOptions {
    /// `0` means any.
    pub blocker_id: i64,
    /// `0` means any.
    pub blockee_id: i64,
    pub list: ListOptions,
}

impl FindBlockingOptions {
    fn push_conditions(&self, query: &mut QueryBuilder<'_, Postgres>) {
        query.push(" WHERE TRUE");
        if self.blocker_id != 0 {
            query.push(" AND blocker_id = ").push_bind(self.blocker_id);
        }
        if self.blockee_id != 0 {
            query.push(" AND blockee_id = ").push_bind(self.blockee_id);
        }
    }
}

/// Blocks matching `opts`, newest first.
///
/// # Errors
///
/// Returns a database error.
pub async fn find_blockings(pool: &PgPool, opts: &FindBlockingOptions) -> Result<Vec<Block>, BlockError> {
    let mut query = QueryBuilder::<Postgres>::new(SELECT_BLOCK);
    opts.push_conditions(&mut query);
    query.push(" ORDER BY created_unix DESC, id DESC");
    opts.list.push_limit(&mut query);
    Ok(query.build_query_as().fetch_all(pool).await?)
}

/// # Errors
///
/// Returns a database error.
pub async fn count_blockings(pool: &PgPool, opts: &FindBlockingOptions) -> Result<i64, BlockError> {
    let mut query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM user_blocking");
    opts.push_conditions(&mut query);
    let (count,): (i64,) = query.build_query_as().fetch_one(pool).await?;
    Ok(count)
}

/// Block `blockee_id` on behalf of `blocker_id`.
///
/// # Errors
///
/// Returns `BlockSelf`, `UserNotExist`, `BlockOrganization`,
/// `AlreadyBlocked`, or a database error.
pub async fn block_user(pool: &PgPool, blocker_id: i64, blockee_id: i64, note: &str) -> Result<Block, BlockError> {
    if blocker_id == blockee_id {
        return Err(BlockError::BlockSelf(blocker_id));
    }

    let mut tx = pool.begin().await?;
    let blockee: Option<(i64,)> = sqlx::query_as("SELECT type FROM users WHERE id = $1")
        .bind(blockee_id)
        .fetch_optional(tx.as_mut())
        .await?;
    match blockee {
        None => return Err(BlockError::UserNotExist(blockee_id)),
        Some((raw_type,)) if raw_type == UserType::Organization.as_i64() => {
            return Err(BlockError::BlockOrganization(blockee_id));
        }
        Some(_) => {}
    }

    let now = now_unix();
    let inserted: Option<(i64,)> = sqlx::query_as(
        r"INSERT INTO user_blocking (blocker_id, blockee_id, note, created_unix)
          VALUES ($1, $2, $3, $4)
          ON CONFLICT (blocker_id, blockee_id) DO NOTHING
          RETURNING id",
    )
    .bind(blocker_id)
    .bind(blockee_id)
    .bind(note)
    .bind(now)
    .fetch_optional(tx.as_mut())
    .await?;
    let Some((id,)) = inserted else {
        return Err(BlockError::AlreadyBlocked { blocker_id, blockee_id });
    };
    tx.commit().await?;

    info!(blocker_id, blockee_id, "user blocked");
    Ok(Block { id, blocker_id, blockee_id, note: note.to_owned(), created_unix: now })
}

/// # Errors
///
/// Returns `NotBlocked` if there was no such block, or a database error.
pub async fn unblock_user(pool: &PgPool, blocker_id: i64, blockee_id: i64) -> Result<(), BlockError> {
    let result = sqlx::query("DELETE FROM user_blocking WHERE blocker_id = $1 AND blockee_id = $2")
        .bind(blocker_id)
        .bind(blockee_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(BlockError::NotBlocked { blocker_id, blockee_id });
    }
    info!(blocker_id, blockee_id, "user unblocked");
    Ok(())
}

/// # Errors
///
/// Returns `NotBlocked` if there is no such block, or a database error.
pub async fn update_note(pool: &PgPool, blocker_id: i64, blockee_id: i64, note: &str) -> Result<(), BlockError> {
    let result = sqlx::query("UPDATE user_blocking SET note = $1 WHERE blocker_id = $2 AND blockee_id = $3")
        .bind(note)
        .bind(blocker_id)
        .bind(blockee_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(BlockError::NotBlocked { blocker_id, blockee_id });
    }
    Ok(())
}

#[cfg(test)]
#[path = "user_block_test.rs"]
mod tests;
