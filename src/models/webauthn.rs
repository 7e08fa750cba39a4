//! Registered WebAuthn (security key / passkey) credentials.
//!
//! Only the stored half of a credential lives here. Challenge generation and
//! attestation verification belong to the login flow.

use serde::Serialize;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{info, warn};

use crate::db::now_unix;
use crate::error::{ErrorKind, ModelError, db_error_kind};

const SELECT_CREDENTIAL: &str = "SELECT id, name, lower_name, user_id, credential_id, public_key, attestation_type, aaguid, sign_count, clone_warning, created_unix, updated_unix FROM webauthn_credential";

#[derive(Debug, thiserror::Error)]
pub enum WebAuthnError {
    #[error("WebAuthn credential does not exist [id: {0}]")]
    NotExist(i64),
    #[error("WebAuthn credential does not exist [user: {user_id}, name: {name}]")]
    NameNotExist { user_id: i64, name: String },
    #[error("WebAuthn credential does not exist [user: {0}]")]
    CredentialIdNotExist(i64),
    #[error("WebAuthn credential name already exists [user: {user_id}, name: {name}]")]
    NameAlreadyExist { user_id: i64, name: String },
    #[error("WebAuthn credential name is empty")]
    EmptyName,
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

impl ModelError for WebAuthnError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NotExist(_) | Self::NameNotExist { .. } | Self::CredentialIdNotExist(_) => ErrorKind::NotExist,
            Self::NameAlreadyExist { .. } => ErrorKind::AlreadyExist,
            Self::EmptyName => ErrorKind::InvalidArgument,
            Self::Db(e) => db_error_kind(e),
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::NotExist(_) | Self::NameNotExist { .. } | Self::CredentialIdNotExist(_) => "E_WEBAUTHN_NOT_EXIST",
            Self::NameAlreadyExist { .. } => "E_WEBAUTHN_NAME_EXISTS",
            Self::EmptyName => "E_WEBAUTHN_EMPTY_NAME",
            Self::Db(_) => "E_DATABASE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct WebAuthnCredential {
    pub id: i64,
    pub name: String,
    #[serde(skip)]
    pub lower_name: String,
    pub user_id: i64,
    #[serde(skip)]
    pub credential_id: Vec<u8>,
    #[serde(skip)]
    pub public_key: Vec<u8>,
    pub attestation_type: String,
    #[serde(skip)]
    pub aaguid: Vec<u8>,
    pub sign_count: i64,
    pub clone_warning: bool,
    pub created_unix: i64,
    pub updated_unix: i64,
}

impl WebAuthnCredential {
    /// Apply the authenticator's reported signature counter. A counter that
    /// fails to advance (when either side is non-zero) marks the credential
    /// as possibly cloned and leaves the stored count alone.
    pub fn observe_sign_count(&mut self, reported: i64) {
        if (reported != 0 || self.sign_count != 0) && reported <= self.sign_count {
            self.clone_warning = true;
        } else {
            self.sign_count = reported;
        }
    }
}

/// Authenticator output needed to register a credential.
#[derive(Debug, Clone, Default)]
pub struct NewWebAuthnCredential {
    pub user_id: i64,
    pub name: String,
    pub credential_id: Vec<u8>,
    pub public_key: Vec<u8>,
    pub attestation_type: String,
    pub aaguid: Vec<u8>,
    pub sign_count: i64,
}

/// # Errors
///
/// Returns `EmptyName`, `NameAlreadyExist` when the user already has a
/// credential with this name, `AlreadyExist` (via the database) for a
/// re-registered credential id, or a database error.
pub async fn create_credential(pool: &PgPool, new: NewWebAuthnCredential) -> Result<WebAuthnCredential, WebAuthnError> {
    let name = new.name.trim().to_owned();
    if name.is_empty() {
        return Err(WebAuthnError::EmptyName);
    }
    let lower_name = name.to_lowercase();
    let (taken,): (bool,) =
        sqlx::query_as("SELECT EXISTS (SELECT 1 FROM webauthn_credential WHERE user_id = $1 AND lower_name = $2)")
            .bind(new.user_id)
            .bind(&lower_name)
            .fetch_one(pool)
            .await?;
    if taken {
        return Err(WebAuthnError::NameAlreadyExist { user_id: new.user_id, name });
    }

    let now = now_unix();
    let (id,): (i64,) = sqlx::query_as(
        r"INSERT INTO webauthn_credential
              (name, lower_name, user_id, credential_id, public_key, attestation_type, aaguid, sign_count, clone_warning, created_unix, updated_unix)
          VALUES ($1, $2, $3, $4, $5, $6, $7, $8, FALSE, $9, $9)
          RETURNING id",
    )
    .bind(&name)
    .bind(&lower_name)
    .bind(new.user_id)
    .bind(&new.credential_id)
    .bind(&new.public_key)
    .bind(&new.attestation_type)
    .bind(&new.aaguid)
    .bind(new.sign_count)
    .bind(now)
    .fetch_one(pool)
    .await?;

    info!(credential_id = id, user_id = new.user_id, name = %name, "webauthn credential registered");
    Ok(WebAuthnCredential {
        id,
        name,
        lower_name,
        user_id: new.user_id,
        credential_id: new.credential_id,
        public_key: new.public_key,
        attestation_type: new.attestation_type,
        aaguid: new.aaguid,
        sign_count: new.sign_count,
        clone_warning: false,
        created_unix: now,
        updated_unix: now,
    })
}

/// # Errors
///
/// Returns `NotExist` or a database error.
pub async fn get_webauthn_credential_by_id(pool: &PgPool, id: i64) -> Result<WebAuthnCredential, WebAuthnError> {
    let mut query = QueryBuilder::<Postgres>::new(SELECT_CREDENTIAL);
    query.push(" WHERE id = ").push_bind(id);
    query.build_query_as().fetch_optional(pool).await?.ok_or(WebAuthnError::NotExist(id))
}

/// Case-insensitive lookup within one user's credentials.
///
/// # Errors
///
/// Returns `NameNotExist` or a database error.
pub async fn get_webauthn_credential_by_name(
    pool: &PgPool,
    user_id: i64,
    name: &str,
) -> Result<WebAuthnCredential, WebAuthnError> {
    let mut query = QueryBuilder::<Postgres>::new(SELECT_CREDENTIAL);
    query.push(" WHERE user_id = ").push_bind(user_id);
    query.push(" AND lower_name = ").push_bind(name.trim().to_lowercase());
    query
        .build_query_as()
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| WebAuthnError::NameNotExist { user_id, name: name.to_owned() })
}

/// # Errors
///
/// Returns `CredentialIdNotExist` or a database error.
pub async fn get_webauthn_credential_by_cred_id(
    pool: &PgPool,
    user_id: i64,
    credential_id: &[u8],
) -> Result<WebAuthnCredential, WebAuthnError> {
    let mut query = QueryBuilder::<Postgres>::new(SELECT_CREDENTIAL);
    query.push(" WHERE user_id = ").push_bind(user_id);
    query.push(" AND credential_id = ").push_bind(credential_id.to_vec());
    query
        .build_query_as()
        .fetch_optional(pool)
        .await?
        .ok_or(WebAuthnError::CredentialIdNotExist(user_id))
}

/// A user's credentials in registration order.
///
/// # Errors
///
/// Returns a database error.
pub async fn get_webauthn_credentials_by_uid(pool: &PgPool, user_id: i64) -> Result<Vec<WebAuthnCredential>, WebAuthnError> {
    let mut query = QueryBuilder::<Postgres>::new(SELECT_CREDENTIAL);
    query.push(" WHERE user_id = ").push_bind(user_id);
    query.push(" ORDER BY id");
    Ok(query.build_query_as().fetch_all(pool).await?)
}

/// # Errors
///
/// Returns a database error.
pub async fn exists_webauthn_credentials_for_uid(pool: &PgPool, user_id: i64) -> Result<bool, WebAuthnError> {
    let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM webauthn_credential WHERE user_id = $1)")
        .bind(user_id)
        .fetch_one(pool)
        .await?;
    Ok(exists)
}

/// Record a successful assertion: apply the reported counter and persist the
/// counter and clone flag.
///
/// # Errors
///
/// Returns `NotExist` if the row is gone, or a database error.
pub async fn update_sign_count(
    pool: &PgPool,
    credential: &mut WebAuthnCredential,
    reported: i64,
) -> Result<(), WebAuthnError> {
    let was_flagged = credential.clone_warning;
    credential.observe_sign_count(reported);
    if credential.clone_warning && !was_flagged {
        warn!(
            credential_id = credential.id,
            user_id = credential.user_id,
            stored = credential.sign_count,
            reported,
            "webauthn sign counter did not advance; credential may be cloned"
        );
    }
    credential.updated_unix = now_unix();
    let result = sqlx::query(
        "UPDATE webauthn_credential SET sign_count = $1, clone_warning = $2, updated_unix = $3 WHERE id = $4",
    )
    .bind(credential.sign_count)
    .bind(credential.clone_warning)
    .bind(credential.updated_unix)
    .bind(credential.id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(WebAuthnError::NotExist(credential.id));
    }
    Ok(())
}

/// Delete credential `id` if `user_id` owns it.
///
/// # Errors
///
/// Returns `NotExist` when no such credential belongs to the user, or a
/// database error.
pub async fn delete_credential(pool: &PgPool, id: i64, user_id: i64) -> Result<(), WebAuthnError> {
    let result = sqlx::query("DELETE FROM webauthn_credential WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(WebAuthnError::NotExist(id));
    }
    info!(credential_id = id, user_id, "webauthn credential deleted");
    Ok(())
}

#[cfg(test)]
#[path = "webauthn_test.rs"]
mod tests;
