//! Profile badges and their assignment to users.

use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::info;

use crate::error::{ErrorKind, ModelError, db_error_kind};

const SELECT_BADGE: &str = "SELECT id, slug, description, image_url FROM badge";

#[derive(Debug, thiserror::Error)]
pub enum BadgeError {
    #[error("badge does not exist [slug: {0}]")]
    NotExist(String),
    #[error("badge already exists [slug: {0}]")]
    AlreadyExist(String),
    #[error("badge slug is empty")]
    EmptySlug,
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

impl ModelError for BadgeError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NotExist(_) => ErrorKind::NotExist,
            Self::AlreadyExist(_) => ErrorKind::AlreadyExist,
            Self::EmptySlug => ErrorKind::InvalidArgument,
            Self::Db(e) => db_error_kind(e),
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::NotExist(_) => "E_BADGE_NOT_EXIST",
            Self::AlreadyExist(_) => "E_BADGE_ALREADY_EXIST",
            Self::EmptySlug => "E_BADGE_EMPTY_SLUG",
            Self::Db(_) => "E_DATABASE",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Badge {
    #[serde(default)]
    pub id: i64,
    pub slug: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct UserBadge {
    pub id: i64,
    pub badge_id: i64,
    pub user_id: i64,
}

/// Insert `badge`, filling in its id.
///
/// # Errors
///
/// Returns `EmptySlug`, `AlreadyExist` for a taken slug, or a database error.
pub async fn create_badge(pool: &PgPool, badge: &mut Badge) -> Result<(), BadgeError> {
    if badge.slug.is_empty() {
        return Err(BadgeError::EmptySlug);
    }
    let inserted: Option<(i64,)> = sqlx::query_as(
        r"INSERT INTO badge (slug, description, image_url) VALUES ($1, $2, $3)
          ON CONFLICT (slug) DO NOTHING
          RETURNING id",
    )
    .bind(&badge.slug)
    .bind(&badge.description)
    .bind(&badge.image_url)
    .fetch_optional(pool)
    .await?;
    let (id,) = inserted.ok_or_else(|| BadgeError::AlreadyExist(badge.slug.clone()))?;
    badge.id = id;
    info!(badge_id = id, slug = %badge.slug, "badge created");
    Ok(())
}

/// # Errors
///
/// Returns `NotExist` or a database error.
pub async fn get_badge(pool: &PgPool, slug: &str) -> Result<Badge, BadgeError> {
    let mut query = QueryBuilder::<Postgres>::new(SELECT_BADGE);
    query.push(" WHERE slug = ").push_bind(slug);
    query
        .build_query_as()
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| BadgeError::NotExist(slug.to_owned()))
}

/// Rewrite description and image of the badge with `badge.slug`.
///
/// # Errors
///
/// Returns `NotExist` or a database error.
pub async fn update_badge(pool: &PgPool, badge: &Badge) -> Result<(), BadgeError> {
    let result = sqlx::query("UPDATE badge SET description = $1, image_url = $2 WHERE slug = $3")
        .bind(&badge.description)
        .bind(&badge.image_url)
        .bind(&badge.slug)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(BadgeError::NotExist(badge.slug.clone()));
    }
    Ok(())
}

/// Delete a badge and every assignment of it.
///
/// # Errors
///
/// Returns `NotExist` or a database error.
pub async fn delete_badge(pool: &PgPool, slug: &str) -> Result<(), BadgeError> {
    let mut tx = pool.begin().await?;
    let deleted: Option<(i64,)> = sqlx::query_as("DELETE FROM badge WHERE slug = $1 RETURNING id")
        .bind(slug)
        .fetch_optional(tx.as_mut())
        .await?;
    let (id,) = deleted.ok_or_else(|| BadgeError::NotExist(slug.to_owned()))?;
    sqlx::query("DELETE FROM user_badge WHERE badge_id = $1").bind(id).execute(tx.as_mut()).await?;
    tx.commit().await?;
    info!(badge_id = id, slug, "badge deleted");
    Ok(())
}

/// Badges held by `user_id` and their count.
///
/// # Errors
///
/// Returns a database error.
pub async fn get_user_badges(pool: &PgPool, user_id: i64) -> Result<(Vec<Badge>, i64), BadgeError> {
    let badges: Vec<Badge> = sqlx::query_as(
        r"SELECT b.id, b.slug, b.description, b.image_url
          FROM badge b
          INNER JOIN user_badge ub ON ub.badge_id = b.id
          WHERE ub.user_id = $1
          ORDER BY b.id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    let count = i64::try_from(badges.len()).unwrap_or(i64::MAX);
    Ok((badges, count))
}

/// Give `user_id` every badge named by `slugs`. Already held badges are kept.
///
/// # Errors
///
/// Returns `NotExist` for an unknown slug (nothing is assigned), or a
/// database error.
pub async fn add_user_badges(pool: &PgPool, user_id: i64, slugs: &[&str]) -> Result<(), BadgeError> {
    let mut tx = pool.begin().await?;
    for slug in slugs {
        let badge: Option<(i64,)> = sqlx::query_as("SELECT id FROM badge WHERE slug = $1")
            .bind(slug)
            .fetch_optional(tx.as_mut())
            .await?;
        let (badge_id,) = badge.ok_or_else(|| BadgeError::NotExist((*slug).to_owned()))?;
        sqlx::query(
            "INSERT INTO user_badge (badge_id, user_id) VALUES ($1, $2) ON CONFLICT (badge_id, user_id) DO NOTHING",
        )
        .bind(badge_id)
        .bind(user_id)
        .execute(tx.as_mut())
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// # Errors
///
/// See [`add_user_badges`].
pub async fn add_user_badge(pool: &PgPool, user_id: i64, slug: &str) -> Result<(), BadgeError> {
    add_user_badges(pool, user_id, &[slug]).await
}

/// Take the badges named by `slugs` away from `user_id`.
///
/// # Errors
///
/// Returns `NotExist` for an unknown slug (nothing is removed), or a
/// database error.
pub async fn remove_user_badges(pool: &PgPool, user_id: i64, slugs: &[&str]) -> Result<(), BadgeError> {
    let mut tx = pool.begin().await?;
    for slug in slugs {
        let removed: Option<(i64,)> = sqlx::query_as(
            r"DELETE FROM user_badge
              WHERE user_id = $1 AND badge_id = (SELECT id FROM badge WHERE slug = $2)
              RETURNING id",
        )
        .bind(user_id)
        .bind(slug)
        .fetch_optional(tx.as_mut())
        .await?;
        if removed.is_none() {
            return Err(BadgeError::NotExist((*slug).to_owned()));
        }
    }
    tx.commit().await?;
    Ok(())
}

/// # Errors
///
/// See [`remove_user_badges`].
pub async fn remove_user_badge(pool: &PgPool, user_id: i64, slug: &str) -> Result<(), BadgeError> {
    remove_user_badges(pool, user_id, &[slug]).await
}

/// # Errors
///
/// Returns a database error.
pub async fn remove_all_user_badges(pool: &PgPool, user_id: i64) -> Result<u64, BadgeError> {
    let result = sqlx::query("DELETE FROM user_badge WHERE user_id = $1").bind(user_id).execute(pool).await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
#[path = "badge_test.rs"]
mod tests;
