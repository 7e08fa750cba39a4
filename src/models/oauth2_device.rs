//! OAuth2 device authorization grant bookkeeping (RFC 8628).
//!
//! DESIGN
//! ======
//! A device asks for authorization and receives a long random device code
//! (kept only as a SHA-256 digest) plus a short user code of the form
//! `XXXX-XXXX` that the user types into the browser. The user approves or
//! denies; the device polls with its device code. Polling faster than the
//! current interval answers `SlowDown` and widens the interval by five
//! seconds. An approval is handed out exactly once, after which the row is
//! `consumed`.

use std::fmt;

use rand::Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use tracing::{info, warn};

use crate::db::now_unix;
use crate::models::oauth2::{self, OAuth2Application, OAuth2Error, OAuth2Grant};
use crate::models::secret;

const DEVICE_CODE_PREFIX: &str = "gtd_";
/// Consonants only, so user codes never spell words (RFC 8628 section 6.1).
const USER_CODE_ALPHABET: &[u8; 20] = b"BCDFGHJKLMNPQRSTVWXZ";
const USER_CODE_HALF: usize = 4;
const USER_CODE_ATTEMPTS: usize = 5;
const SLOW_DOWN_INCREMENT_SECS: i64 = 5;

const SELECT_DEVICE_CODE: &str = "SELECT id, application_id, device_code_hash, user_code, scope, user_id, status, poll_interval, expires_unix, last_polled_unix, created_unix FROM oauth2_device_code";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceCodeStatus {
    Pending,
    Approved,
    Denied,
    Consumed,
}

impl DeviceCodeStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Consumed => "consumed",
        }
    }
}

impl fmt::Display for DeviceCodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for DeviceCodeStatus {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        match raw.as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "denied" => Ok(Self::Denied),
            "consumed" => Ok(Self::Consumed),
            _ => Err(format!("unknown device code status: {raw}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct OAuth2DeviceCode {
    pub id: i64,
    pub application_id: i64,
    #[serde(skip)]
    pub device_code_hash: String,
    pub user_code: String,
    pub scope: String,
    /// Approving or denying user; `0` while pending.
    pub user_id: i64,
    #[sqlx(try_from = "String")]
    pub status: DeviceCodeStatus,
    pub poll_interval: i64,
    pub expires_unix: i64,
    pub last_polled_unix: i64,
    pub created_unix: i64,
}

impl OAuth2DeviceCode {
    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_unix < now
    }
}

/// What the device receives when it starts the flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    pub expires_in: i64,
    pub interval: i64,
}

/// Answer to one device poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DevicePollOutcome {
    AuthorizationPending,
    SlowDown { interval: i64 },
    ExpiredToken,
    AccessDenied,
    Approved(OAuth2Grant),
}

fn hash_device_code(device_code: &str) -> String {
    hex::encode(Sha256::digest(device_code.as_bytes()))
}

fn generate_user_code() -> String {
    let mut rng = rand::rng();
    let mut code = String::with_capacity(USER_CODE_HALF * 2 + 1);
    for i in 0..USER_CODE_HALF * 2 {
        if i == USER_CODE_HALF {
            code.push('-');
        }
        code.push(char::from(USER_CODE_ALPHABET[rng.random_range(0..USER_CODE_ALPHABET.len())]));
    }
    code
}

/// Canonical `XXXX-XXXX` form of what a user typed: case, dashes and spaces
/// are ignored. `None` if it cannot be a user code.
#[must_use]
pub fn normalize_user_code(input: &str) -> Option<String> {
    let chars: Vec<char> = input
        .chars()
        .filter(|c| *c != '-' && !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if chars.len() != USER_CODE_HALF * 2 || !chars.iter().all(|c| c.is_ascii() && USER_CODE_ALPHABET.contains(&(*c as u8))) {
        return None;
    }
    let (head, tail) = chars.split_at(USER_CODE_HALF);
    Some(format!("{}-{}", head.iter().collect::<String>(), tail.iter().collect::<String>()))
}

/// Start a device authorization for `app`.
///
/// # Errors
///
/// Returns a database error, including a unique violation if no free user
/// code was found after a few attempts.
pub async fn create_device_authorization(
    pool: &PgPool,
    app: &OAuth2Application,
    scope: &str,
    lifetime_secs: i64,
    interval_secs: i64,
) -> Result<DeviceAuthorization, OAuth2Error> {
    let device_code = format!("{DEVICE_CODE_PREFIX}{}", secret::base32_lower(&secret::random_bytes::<32>()));
    let device_code_hash = hash_device_code(&device_code);
    let now = now_unix();

    let mut attempt = 0;
    let user_code = loop {
        attempt += 1;
        let user_code = generate_user_code();
        let inserted = sqlx::query(
            r"INSERT INTO oauth2_device_code
                  (application_id, device_code_hash, user_code, scope, status, poll_interval, expires_unix, created_unix)
              VALUES ($1, $2, $3, $4, 'pending', $5, $6, $7)",
        )
        .bind(app.id)
        .bind(&device_code_hash)
        .bind(&user_code)
        .bind(scope)
        .bind(interval_secs)
        .bind(now + lifetime_secs)
        .bind(now)
        .execute(pool)
        .await;
        match inserted {
            Ok(_) => break user_code,
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() && attempt < USER_CODE_ATTEMPTS => {
                warn!(application_id = app.id, attempt, "device user code collision, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    };

    info!(application_id = app.id, user_code = %user_code, "device authorization started");
    Ok(DeviceAuthorization { device_code, user_code, expires_in: lifetime_secs, interval: interval_secs })
}

async fn lock_by_user_code(conn: &mut PgConnection, user_code: &str) -> Result<OAuth2DeviceCode, OAuth2Error> {
    let normalized = normalize_user_code(user_code).ok_or(OAuth2Error::DeviceCodeNotFound)?;
    let mut query = QueryBuilder::<Postgres>::new(SELECT_DEVICE_CODE);
    query.push(" WHERE user_code = ").push_bind(normalized).push(" FOR UPDATE");
    query
        .build_query_as()
        .fetch_optional(conn)
        .await?
        .ok_or(OAuth2Error::DeviceCodeNotFound)
}

fn ensure_decidable(code: &OAuth2DeviceCode, now: i64) -> Result<(), OAuth2Error> {
    if code.status != DeviceCodeStatus::Pending {
        return Err(OAuth2Error::DeviceCodeNotPending);
    }
    if code.is_expired(now) {
        return Err(OAuth2Error::DeviceCodeExpired);
    }
    Ok(())
}

async fn set_status(
    conn: &mut PgConnection,
    id: i64,
    status: DeviceCodeStatus,
    user_id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE oauth2_device_code SET status = $1, user_id = $2 WHERE id = $3")
        .bind(status.as_str())
        .bind(user_id)
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

/// The device authorization a user code refers to.
///
/// # Errors
///
/// Returns `DeviceCodeNotFound` for a malformed or unknown user code.
pub async fn get_device_code_by_user_code(pool: &PgPool, user_code: &str) -> Result<OAuth2DeviceCode, OAuth2Error> {
    let normalized = normalize_user_code(user_code).ok_or(OAuth2Error::DeviceCodeNotFound)?;
    let mut query = QueryBuilder::<Postgres>::new(SELECT_DEVICE_CODE);
    query.push(" WHERE user_code = ").push_bind(normalized);
    query
        .build_query_as()
        .fetch_optional(pool)
        .await?
        .ok_or(OAuth2Error::DeviceCodeNotFound)
}

/// Approve a pending device authorization as `user_id`. The user's grant for
/// the application is created, or reused with its scope replaced.
///
/// # Errors
///
/// Returns `DeviceCodeNotFound`, `DeviceCodeNotPending`, `DeviceCodeExpired`,
/// or a database error.
pub async fn approve_device_code(pool: &PgPool, user_code: &str, user_id: i64) -> Result<OAuth2Grant, OAuth2Error> {
    let mut tx = pool.begin().await?;
    let code = lock_by_user_code(tx.as_mut(), user_code).await?;
    ensure_decidable(&code, now_unix())?;

    let grant = oauth2::upsert_grant(tx.as_mut(), code.application_id, user_id, &code.scope).await?;
    set_status(tx.as_mut(), code.id, DeviceCodeStatus::Approved, user_id).await?;
    tx.commit().await?;

    info!(device_code_id = code.id, user_id, grant_id = grant.id, "device authorization approved");
    Ok(grant)
}

/// # Errors
///
/// Returns `DeviceCodeNotFound`, `DeviceCodeNotPending`, `DeviceCodeExpired`,
/// or a database error.
pub async fn deny_device_code(pool: &PgPool, user_code: &str, user_id: i64) -> Result<(), OAuth2Error> {
    let mut tx = pool.begin().await?;
    let code = lock_by_user_code(tx.as_mut(), user_code).await?;
    ensure_decidable(&code, now_unix())?;
    set_status(tx.as_mut(), code.id, DeviceCodeStatus::Denied, user_id).await?;
    tx.commit().await?;
    info!(device_code_id = code.id, user_id, "device authorization denied");
    Ok(())
}

/// One poll by the device holding `device_code` for application
/// `application_id`.
///
/// # Errors
///
/// Returns `DeviceCodeNotFound` for an unknown code, `DeviceCodeNotPending`
/// once the approval has been handed out, or a database error.
pub async fn poll_device_code(
    pool: &PgPool,
    application_id: i64,
    device_code: &str,
) -> Result<DevicePollOutcome, OAuth2Error> {
    poll_device_code_at(pool, application_id, device_code, now_unix()).await
}

/// Same as [`poll_device_code`], with an explicit clock for tests.
///
/// # Errors
///
/// See [`poll_device_code`].
pub async fn poll_device_code_at(
    pool: &PgPool,
    application_id: i64,
    device_code: &str,
    now: i64,
) -> Result<DevicePollOutcome, OAuth2Error> {
    let mut tx = pool.begin().await?;
    let mut query = QueryBuilder::<Postgres>::new(SELECT_DEVICE_CODE);
    query.push(" WHERE device_code_hash = ").push_bind(hash_device_code(device_code));
    query.push(" AND application_id = ").push_bind(application_id).push(" FOR UPDATE");
    let code: OAuth2DeviceCode = query
        .build_query_as()
        .fetch_optional(tx.as_mut())
        .await?
        .ok_or(OAuth2Error::DeviceCodeNotFound)?;

    if code.status == DeviceCodeStatus::Consumed {
        return Err(OAuth2Error::DeviceCodeNotPending);
    }
    if code.is_expired(now) {
        return Ok(DevicePollOutcome::ExpiredToken);
    }

    if code.last_polled_unix > 0 && now - code.last_polled_unix < code.poll_interval {
        let interval = code.poll_interval + SLOW_DOWN_INCREMENT_SECS;
        sqlx::query("UPDATE oauth2_device_code SET poll_interval = $1, last_polled_unix = $2 WHERE id = $3")
            .bind(interval)
            .bind(now)
            .bind(code.id)
            .execute(tx.as_mut())
            .await?;
        tx.commit().await?;
        return Ok(DevicePollOutcome::SlowDown { interval });
    }

    sqlx::query("UPDATE oauth2_device_code SET last_polled_unix = $1 WHERE id = $2")
        .bind(now)
        .bind(code.id)
        .execute(tx.as_mut())
        .await?;

    let outcome = match code.status {
        DeviceCodeStatus::Pending => DevicePollOutcome::AuthorizationPending,
        DeviceCodeStatus::Denied => DevicePollOutcome::AccessDenied,
        DeviceCodeStatus::Approved => {
            let grant = oauth2::fetch_grant_by_user_and_app(tx.as_mut(), code.user_id, code.application_id)
                .await?
                .ok_or(OAuth2Error::GrantNotFound(0))?;
            set_status(tx.as_mut(), code.id, DeviceCodeStatus::Consumed, code.user_id).await?;
            DevicePollOutcome::Approved(grant)
        }
        DeviceCodeStatus::Consumed => return Err(OAuth2Error::DeviceCodeNotPending),
    };
    tx.commit().await?;
    Ok(outcome)
}

/// Remove device authorizations past their expiry. Returns the number removed.
///
/// # Errors
///
/// Returns a database error.
pub async fn delete_expired_device_codes(pool: &PgPool, now: i64) -> Result<u64, OAuth2Error> {
    let result = sqlx::query("DELETE FROM oauth2_device_code WHERE expires_unix < $1")
        .bind(now)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
#[path = "oauth2_device_test.rs"]
mod tests;
