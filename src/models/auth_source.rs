//! External authentication sources (LDAP, SMTP, PAM, OAuth2, SSPI).
//!
//! Sources are stored configuration only; nothing here talks to the
//! external system. `cfg` is an opaque JSON document whose shape depends on
//! the source type.

use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::info;

use crate::db::{ListOptions, now_unix};
use crate::error::{ErrorKind, ModelError, db_error_kind};

const SELECT_SOURCE: &str =
    "SELECT id, type, name, is_active, is_sync_enabled, cfg, created_unix, updated_unix FROM login_source";

/// Name of the implicit source with id `0`: accounts with a local password.
pub const LOCAL_SOURCE_NAME: &str = "local";

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("login source does not exist [id: {0}]")]
    NotExist(i64),
    #[error("login source does not exist [name: {0}]")]
    NameNotExist(String),
    #[error("login source already exists [name: {0}]")]
    AlreadyExist(String),
    #[error("login source is still used by {users} user(s) [id: {id}]")]
    InUse { id: i64, users: i64 },
    #[error("unknown login source type: {0}")]
    UnknownType(i64),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

impl ModelError for SourceError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NotExist(_) | Self::NameNotExist(_) => ErrorKind::NotExist,
            Self::AlreadyExist(_) => ErrorKind::AlreadyExist,
            Self::InUse { .. } | Self::UnknownType(_) => ErrorKind::InvalidArgument,
            Self::Json(_) => ErrorKind::Internal,
            Self::Db(e) => db_error_kind(e),
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::NotExist(_) | Self::NameNotExist(_) => "E_SOURCE_NOT_EXIST",
            Self::AlreadyExist(_) => "E_SOURCE_ALREADY_EXIST",
            Self::InUse { .. } => "E_SOURCE_IN_USE",
            Self::UnknownType(_) => "E_SOURCE_UNKNOWN_TYPE",
            Self::Json(_) => "E_JSON",
            Self::Db(_) => "E_DATABASE",
        }
    }
}

/// Stored as the integer `type` column; users reference it as `login_type`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    #[default]
    NoType,
    Plain,
    Ldap,
    Smtp,
    Pam,
    Dldap,
    OAuth2,
    Sspi,
}

impl SourceType {
    #[must_use]
    pub fn as_i64(self) -> i64 {
        match self {
            Self::NoType => 0,
            Self::Plain => 1,
            Self::Ldap => 2,
            Self::Smtp => 3,
            Self::Pam => 4,
            Self::Dldap => 5,
            Self::OAuth2 => 6,
            Self::Sspi => 7,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::NoType => "",
            Self::Plain => "Plain",
            Self::Ldap => "LDAP (via BindDN)",
            Self::Smtp => "SMTP",
            Self::Pam => "PAM",
            Self::Dldap => "LDAP (simple auth)",
            Self::OAuth2 => "OAuth2",
            Self::Sspi => "SPNEGO with SSPI",
        }
    }

    #[must_use]
    pub fn is_ldap(self) -> bool {
        matches!(self, Self::Ldap | Self::Dldap)
    }
}

impl TryFrom<i64> for SourceType {
    type Error = SourceError;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        Ok(match raw {
            0 => Self::NoType,
            1 => Self::Plain,
            2 => Self::Ldap,
            3 => Self::Smtp,
            4 => Self::Pam,
            5 => Self::Dldap,
            6 => Self::OAuth2,
            7 => Self::Sspi,
            other => return Err(SourceError::UnknownType(other)),
        })
    }
}

/// The `cfg` column: JSON kept as text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceConfig(pub serde_json::Value);

impl TryFrom<String> for SourceConfig {
    type Error = serde_json::Error;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        if raw.trim().is_empty() {
            return Ok(Self(serde_json::Value::Object(serde_json::Map::new())));
        }
        serde_json::from_str(&raw).map(Self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Source {
    pub id: i64,
    #[sqlx(rename = "type", try_from = "i64")]
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub name: String,
    pub is_active: bool,
    pub is_sync_enabled: bool,
    #[sqlx(try_from = "String")]
    #[serde(skip)]
    pub cfg: SourceConfig,
    pub created_unix: i64,
    pub updated_unix: i64,
}

impl Source {
    /// The implicit local source.
    #[must_use]
    pub fn local() -> Self {
        Self {
            id: 0,
            source_type: SourceType::Plain,
            name: LOCAL_SOURCE_NAME.to_owned(),
            is_active: true,
            is_sync_enabled: false,
            cfg: SourceConfig::default(),
            created_unix: 0,
            updated_unix: 0,
        }
    }

    #[must_use]
    pub fn is_oauth2(&self) -> bool {
        self.source_type == SourceType::OAuth2
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewSource {
    pub source_type: SourceType,
    pub name: String,
    pub is_active: bool,
    pub is_sync_enabled: bool,
    pub cfg: serde_json::Value,
}

/// Register a source. Synchronization is only kept for LDAP sources.
///
/// # Errors
///
/// Returns `AlreadyExist` if the name is taken, or a database error.
pub async fn create_source(pool: &PgPool, new: NewSource) -> Result<Source, SourceError> {
    let (taken,): (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM login_source WHERE name = $1)")
        .bind(&new.name)
        .fetch_one(pool)
        .await?;
    if taken {
        return Err(SourceError::AlreadyExist(new.name));
    }

    let is_sync_enabled = new.is_sync_enabled && new.source_type.is_ldap();
    let cfg = serde_json::to_string(&new.cfg)?;
    let now = now_unix();
    let (id,): (i64,) = sqlx::query_as(
        r"INSERT INTO login_source (type, name, is_active, is_sync_enabled, cfg, created_unix, updated_unix)
          VALUES ($1, $2, $3, $4, $5, $6, $6)
          RETURNING id",
    )
    .bind(new.source_type.as_i64())
    .bind(&new.name)
    .bind(new.is_active)
    .bind(is_sync_enabled)
    .bind(&cfg)
    .bind(now)
    .fetch_one(pool)
    .await?;

    info!(source_id = id, name = %new.name, source_type = new.source_type.name(), "login source created");
    Ok(Source {
        id,
        source_type: new.source_type,
        name: new.name,
        is_active: new.is_active,
        is_sync_enabled,
        cfg: SourceConfig(new.cfg),
        created_unix: now,
        updated_unix: now,
    })
}

/// # Errors
///
/// Returns `NotExist` for an unknown id. Id `0` is the local source.
pub async fn get_source_by_id(pool: &PgPool, id: i64) -> Result<Source, SourceError> {
    if id == 0 {
        return Ok(Source::local());
    }
    let mut query = QueryBuilder::<Postgres>::new(SELECT_SOURCE);
    query.push(" WHERE id = ").push_bind(id);
    query.build_query_as().fetch_optional(pool).await?.ok_or(SourceError::NotExist(id))
}

/// # Errors
///
/// Returns `NameNotExist` for an unknown name.
pub async fn get_source_by_name(pool: &PgPool, name: &str) -> Result<Source, SourceError> {
    let mut query = QueryBuilder::<Postgres>::new(SELECT_SOURCE);
    query.push(" WHERE name = ").push_bind(name);
    query
        .build_query_as()
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| SourceError::NameNotExist(name.to_owned()))
}

pub(crate) async fn find_active_source(
    pool: &PgPool,
    name: &str,
    source_type: SourceType,
) -> Result<Option<Source>, sqlx::Error> {
    let mut query = QueryBuilder::<Postgres>::new(SELECT_SOURCE);
    query.push(" WHERE name = ").push_bind(name);
    query.push(" AND type = ").push_bind(source_type.as_i64());
    query.push(" AND is_active = TRUE");
    query.build_query_as().fetch_optional(pool).await
}

#[derive(Debug, Clone, Default)]
pub struct FindSourcesOptions {
    pub is_active: Option<bool>,
    pub login_type: Option<SourceType>,
    pub list: ListOptions,
}

/// Sources matching `opts`, ordered by id.
///
/// # Errors
///
/// Returns a database error.
pub async fn find_sources(pool: &PgPool, opts: &FindSourcesOptions) -> Result<Vec<Source>, SourceError> {
    let mut query = QueryBuilder::<Postgres>::new(SELECT_SOURCE);
    query.push(" WHERE TRUE");
    if let Some(active) = opts.is_active {
        query.push(" AND is_active = ").push_bind(active);
    }
    if let Some(source_type) = opts.login_type {
        query.push(" AND type = ").push_bind(source_type.as_i64());
    }
    query.push(" ORDER BY id");
    opts.list.push_limit(&mut query);
    Ok(query.build_query_as().fetch_all(pool).await?)
}

/// # Errors
///
/// Returns a database error.
pub async fn count_sources(pool: &PgPool) -> Result<i64, SourceError> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM login_source").fetch_one(pool).await?;
    Ok(count)
}

/// Persist every column of `source`.
///
/// # Errors
///
/// Returns `NotExist` if the row is gone, `AlreadyExist` (via the database)
/// on a name clash, or a database error.
pub async fn update_source(pool: &PgPool, source: &mut Source) -> Result<(), SourceError> {
    if !source.source_type.is_ldap() {
        source.is_sync_enabled = false;
    }
    source.updated_unix = now_unix();
    let result = sqlx::query(
        r"UPDATE login_source
          SET type = $1, name = $2, is_active = $3, is_sync_enabled = $4, cfg = $5, updated_unix = $6
          WHERE id = $7",
    )
    .bind(source.source_type.as_i64())
    .bind(&source.name)
    .bind(source.is_active)
    .bind(source.is_sync_enabled)
    .bind(serde_json::to_string(&source.cfg)?)
    .bind(source.updated_unix)
    .bind(source.id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(SourceError::NotExist(source.id));
    }
    Ok(())
}

/// Delete a source nobody signs in with any more.
///
/// # Errors
///
/// Returns `InUse` while users reference it, `NotExist` for an unknown id,
/// or a database error.
pub async fn delete_source(pool: &PgPool, id: i64) -> Result<(), SourceError> {
    let mut tx = pool.begin().await?;
    let (users,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE login_source = $1")
        .bind(id)
        .fetch_one(tx.as_mut())
        .await?;
    if users > 0 {
        return Err(SourceError::InUse { id, users });
    }
    let result = sqlx::query("DELETE FROM login_source WHERE id = $1")
        .bind(id)
        .execute(tx.as_mut())
        .await?;
    if result.rows_affected() == 0 {
        return Err(SourceError::NotExist(id));
    }
    tx.commit().await?;
    info!(source_id = id, "login source deleted");
    Ok(())
}

#[cfg(test)]
#[path = "auth_source_test.rs"]
mod tests;
