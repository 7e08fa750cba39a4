//! Email addresses owned by users.
//!
//! DESIGN
//! ======
//! Every user has exactly one primary address, mirrored into `users.email`.
//! Addresses are unique by their lowercase form across all users. Changing
//! activation or the primary address touches both tables in one transaction
//! and rotates the owner's `rands`, which invalidates outstanding
//! activation links.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};

use crate::config::EmailDomainPolicy;
use crate::db::ListOptions;
use crate::error::{ErrorKind, ModelError, db_error_kind};
use crate::models::user::{UserType, get_user_salt};

const SELECT_EMAIL: &str = "SELECT id, uid, email, lower_email, is_activated, is_primary FROM email_address";

static EMAIL_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+\-/=?^_`{|}~]*@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
    )
    .ok()
});

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("e-mail invalid [email: {0}]")]
    Invalid(String),
    #[error("e-mail address contains unsupported character [email: {0}]")]
    CharNotSupported(String),
    #[error("e-mail already in use [email: {0}]")]
    AlreadyUsed(String),
    #[error("e-mail address does not exist [email: {0}]")]
    NotExist(String),
    #[error("primary e-mail cannot be deleted [email: {0}]")]
    PrimaryCannotDelete(String),
    #[error("user does not exist [uid: {0}]")]
    UserNotExist(i64),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

impl ModelError for EmailError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Invalid(_) | Self::CharNotSupported(_) | Self::PrimaryCannotDelete(_) => ErrorKind::InvalidArgument,
            Self::AlreadyUsed(_) => ErrorKind::AlreadyExist,
            Self::NotExist(_) | Self::UserNotExist(_) => ErrorKind::NotExist,
            Self::Db(e) => db_error_kind(e),
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::Invalid(_) => "E_EMAIL_INVALID",
            Self::CharNotSupported(_) => "E_EMAIL_CHAR_NOT_SUPPORTED",
            Self::AlreadyUsed(_) => "E_EMAIL_ALREADY_USED",
            Self::NotExist(_) => "E_EMAIL_NOT_EXIST",
            Self::PrimaryCannotDelete(_) => "E_EMAIL_PRIMARY_CANNOT_DELETE",
            Self::UserNotExist(_) => "E_USER_NOT_EXIST",
            Self::Db(_) => "E_DATABASE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct EmailAddress {
    pub id: i64,
    pub uid: i64,
    pub email: String,
    #[serde(skip)]
    pub lower_email: String,
    pub is_activated: bool,
    pub is_primary: bool,
}

// =============================================================================
// VALIDATION
// =============================================================================

fn local_part_is_plausible(email: &str) -> bool {
    let Some((local, _)) = email.rsplit_once('@') else {
        return false;
    };
    !local.is_empty() && !local.starts_with('.') && !local.ends_with('.') && !local.contains("..")
}

fn validate_email_basic(email: &str) -> Result<(), EmailError> {
    if email.is_empty() {
        return Err(EmailError::Invalid(email.to_owned()));
    }
    if !EMAIL_PATTERN.as_ref().is_some_and(|re| re.is_match(email)) {
        return Err(EmailError::CharNotSupported(email.to_owned()));
    }
    if email.starts_with('-') || !local_part_is_plausible(email) {
        return Err(EmailError::Invalid(email.to_owned()));
    }
    Ok(())
}

/// Syntax check plus the domain allow / block policy.
///
/// # Errors
///
/// Returns `Invalid` or `CharNotSupported`.
pub fn validate_email(email: &str, policy: &EmailDomainPolicy) -> Result<(), EmailError> {
    validate_email_basic(email)?;
    if !policy.is_allowed(email) {
        return Err(EmailError::Invalid(email.to_owned()));
    }
    Ok(())
}

/// Syntax check only; admins may use any domain.
///
/// # Errors
///
/// Returns `Invalid` or `CharNotSupported`.
pub fn validate_email_for_admin(email: &str) -> Result<(), EmailError> {
    validate_email_basic(email)
}

// =============================================================================
// CRUD
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct NewEmailAddress {
    pub uid: i64,
    pub email: String,
    pub is_activated: bool,
    pub is_primary: bool,
}

pub(crate) async fn insert_email_address_conn(
    conn: &mut PgConnection,
    new: NewEmailAddress,
) -> Result<EmailAddress, EmailError> {
    let lower_email = new.email.to_lowercase();
    let (id,): (i64,) = sqlx::query_as(
        r"INSERT INTO email_address (uid, email, lower_email, is_activated, is_primary)
          VALUES ($1, $2, $3, $4, $5)
          RETURNING id",
    )
    .bind(new.uid)
    .bind(&new.email)
    .bind(&lower_email)
    .bind(new.is_activated)
    .bind(new.is_primary)
    .fetch_one(conn)
    .await?;
    Ok(EmailAddress {
        id,
        uid: new.uid,
        email: new.email,
        lower_email,
        is_activated: new.is_activated,
        is_primary: new.is_primary,
    })
}

/// # Errors
///
/// Returns `AlreadyExist` (via the database) for a taken address.
pub async fn insert_email_address(pool: &PgPool, new: NewEmailAddress) -> Result<EmailAddress, EmailError> {
    insert_email_address_conn(&mut *pool.acquire().await?, new).await
}

/// Attach several secondary addresses to `uid` at once. Either all of them are
/// added or none.
///
/// # Errors
///
/// Returns `AlreadyUsed` for an address held by anyone, or a database error.
pub async fn add_email_addresses(
    pool: &PgPool,
    uid: i64,
    emails: &[String],
    is_activated: bool,
) -> Result<Vec<EmailAddress>, EmailError> {
    let mut tx = pool.begin().await?;
    let mut added = Vec::with_capacity(emails.len());
    for email in emails {
        if is_email_used_conn(tx.as_mut(), email).await? {
            return Err(EmailError::AlreadyUsed(email.clone()));
        }
        let new = NewEmailAddress { uid, email: email.clone(), is_activated, is_primary: false };
        added.push(insert_email_address_conn(tx.as_mut(), new).await?);
    }
    tx.commit().await?;
    info!(uid, count = added.len(), "email addresses added");
    Ok(added)
}

/// Persist every column of `email`.
///
/// # Errors
///
/// Returns `NotExist` if the row is gone, or a database error.
pub async fn update_email_address(pool: &PgPool, email: &mut EmailAddress) -> Result<(), EmailError> {
    email.lower_email = email.email.to_lowercase();
    let result = sqlx::query(
        "UPDATE email_address SET uid = $1, email = $2, lower_email = $3, is_activated = $4, is_primary = $5 WHERE id = $6",
    )
    .bind(email.uid)
    .bind(&email.email)
    .bind(&email.lower_email)
    .bind(email.is_activated)
    .bind(email.is_primary)
    .bind(email.id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(EmailError::NotExist(email.email.clone()));
    }
    Ok(())
}

/// # Errors
///
/// Returns `NotExist` if no user owns the address.
pub async fn get_email_address_by_email(pool: &PgPool, email: &str) -> Result<EmailAddress, EmailError> {
    let mut query = QueryBuilder::<Postgres>::new(SELECT_EMAIL);
    query.push(" WHERE lower_email = ").push_bind(email.to_lowercase());
    query
        .build_query_as()
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| EmailError::NotExist(email.to_owned()))
}

async fn fetch_email_of_user(conn: &mut PgConnection, email: &str, uid: i64) -> Result<Option<EmailAddress>, sqlx::Error> {
    let mut query = QueryBuilder::<Postgres>::new(SELECT_EMAIL);
    query.push(" WHERE lower_email = ").push_bind(email.to_lowercase());
    query.push(" AND uid = ").push_bind(uid);
    query.build_query_as().fetch_optional(conn).await
}

/// # Errors
///
/// Returns `NotExist` if `uid` does not own the address.
pub async fn get_email_address_of_user(pool: &PgPool, email: &str, uid: i64) -> Result<EmailAddress, EmailError> {
    fetch_email_of_user(&mut *pool.acquire().await?, email, uid)
        .await?
        .ok_or_else(|| EmailError::NotExist(email.to_owned()))
}

/// # Errors
///
/// Returns `NotExist` if the user has no primary address.
pub async fn get_primary_email_address_of_user(pool: &PgPool, uid: i64) -> Result<EmailAddress, EmailError> {
    let mut query = QueryBuilder::<Postgres>::new(SELECT_EMAIL);
    query.push(" WHERE uid = ").push_bind(uid).push(" AND is_primary = TRUE");
    query
        .build_query_as()
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| EmailError::NotExist(String::new()))
}

/// All addresses of `uid`, oldest first.
///
/// # Errors
///
/// Returns a database error.
pub async fn get_email_addresses(pool: &PgPool, uid: i64) -> Result<Vec<EmailAddress>, EmailError> {
    let mut query = QueryBuilder::<Postgres>::new(SELECT_EMAIL);
    query.push(" WHERE uid = ").push_bind(uid).push(" ORDER BY id");
    Ok(query.build_query_as().fetch_all(pool).await?)
}

/// Address `id`, only if it belongs to `uid`.
///
/// # Errors
///
/// Returns a database error.
pub async fn get_email_address_by_id(pool: &PgPool, uid: i64, id: i64) -> Result<Option<EmailAddress>, EmailError> {
    let mut query = QueryBuilder::<Postgres>::new(SELECT_EMAIL);
    query.push(" WHERE id = ").push_bind(id).push(" AND uid = ").push_bind(uid);
    Ok(query.build_query_as().fetch_optional(pool).await?)
}

async fn is_email_active_conn(
    conn: &mut PgConnection,
    email: &str,
    exclude_email_id: i64,
    register_email_confirm: bool,
) -> Result<bool, sqlx::Error> {
    if email.is_empty() {
        return Ok(true);
    }
    let mut query = QueryBuilder::<Postgres>::new("SELECT id FROM email_address WHERE lower_email = ");
    query.push_bind(email.to_lowercase());
    query.push(" AND id <> ").push_bind(exclude_email_id);
    // Unconfirmed addresses only block others when confirmation is off.
    if register_email_confirm {
        query.push(" AND is_activated = TRUE");
    }
    query.push(" LIMIT 1");
    let found: Option<(i64,)> = query.build_query_as().fetch_optional(conn).await?;
    if let Some((id,)) = found {
        debug!(email, exclude_email_id, duplicate_id = id, "email already active elsewhere");
        return Ok(true);
    }
    Ok(false)
}

/// Whether another row (not `exclude_email_id`) already holds this address.
///
/// # Errors
///
/// Returns a database error.
pub async fn is_email_active(
    pool: &PgPool,
    email: &str,
    exclude_email_id: i64,
    register_email_confirm: bool,
) -> Result<bool, EmailError> {
    if email.is_empty() {
        return Ok(true);
    }
    Ok(is_email_active_conn(&mut *pool.acquire().await?, email, exclude_email_id, register_email_confirm).await?)
}

pub(crate) async fn is_email_used_conn(conn: &mut PgConnection, email: &str) -> Result<bool, sqlx::Error> {
    if email.is_empty() {
        return Ok(true);
    }
    let (used,): (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM email_address WHERE lower_email = $1)")
        .bind(email.to_lowercase())
        .fetch_one(conn)
        .await?;
    Ok(used)
}

/// Whether any user holds this address. The empty address counts as used.
///
/// # Errors
///
/// Returns a database error.
pub async fn is_email_used(pool: &PgPool, email: &str) -> Result<bool, EmailError> {
    if email.is_empty() {
        return Ok(true);
    }
    Ok(is_email_used_conn(&mut *pool.acquire().await?, email).await?)
}

// =============================================================================
// ACTIVATION / PRIMARY
// =============================================================================

async fn update_activation(conn: &mut PgConnection, email: &mut EmailAddress, activate: bool) -> Result<(), EmailError> {
    let result = sqlx::query("UPDATE users SET rands = $1 WHERE id = $2")
        .bind(get_user_salt())
        .bind(email.uid)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(EmailError::UserNotExist(email.uid));
    }
    sqlx::query("UPDATE email_address SET is_activated = $1 WHERE id = $2")
        .bind(activate)
        .bind(email.id)
        .execute(conn)
        .await?;
    email.is_activated = activate;
    Ok(())
}

/// Mark `email` activated and rotate the owner's `rands`.
///
/// # Errors
///
/// Returns `UserNotExist` if the owner is gone, or a database error.
pub async fn activate_email(pool: &PgPool, email: &mut EmailAddress) -> Result<(), EmailError> {
    let mut tx = pool.begin().await?;
    update_activation(tx.as_mut(), email, true).await?;
    tx.commit().await?;
    info!(email_id = email.id, uid = email.uid, "email activated");
    Ok(())
}

async fn make_email_primary(conn: &mut PgConnection, email_id: i64, is_active: bool) -> Result<(), EmailError> {
    let mut query = QueryBuilder::<Postgres>::new(SELECT_EMAIL);
    query.push(" WHERE id = ").push_bind(email_id);
    query.push(" AND is_activated = ").push_bind(is_active);
    let email: EmailAddress = query
        .build_query_as()
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| EmailError::NotExist(String::new()))?;

    let result = sqlx::query("UPDATE users SET email = $1 WHERE id = $2")
        .bind(&email.email)
        .bind(email.uid)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(EmailError::UserNotExist(email.uid));
    }
    sqlx::query("UPDATE email_address SET is_primary = FALSE WHERE uid = $1 AND is_primary = TRUE")
        .bind(email.uid)
        .execute(&mut *conn)
        .await?;
    sqlx::query("UPDATE email_address SET is_primary = TRUE WHERE id = $1")
        .bind(email.id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Make the activated address `email_id` its owner's primary address.
///
/// # Errors
///
/// Returns `NotExist` if there is no such activated address.
pub async fn make_active_email_primary(pool: &PgPool, email_id: i64) -> Result<(), EmailError> {
    let mut tx = pool.begin().await?;
    make_email_primary(tx.as_mut(), email_id, true).await?;
    tx.commit().await?;
    Ok(())
}

/// Make the not yet activated address `email_id` its owner's primary.
///
/// # Errors
///
/// Returns `NotExist` if there is no such inactive address.
pub async fn make_inactive_email_primary(pool: &PgPool, email_id: i64) -> Result<(), EmailError> {
    let mut tx = pool.begin().await?;
    make_email_primary(tx.as_mut(), email_id, false).await?;
    tx.commit().await?;
    Ok(())
}

/// Swap a user's unconfirmed primary address for a new, also unconfirmed one.
///
/// # Errors
///
/// Returns `AlreadyExist` (via the database) if the new address is taken, or
/// a database error.
pub async fn change_inactive_primary_email(
    pool: &PgPool,
    uid: i64,
    old_email: &str,
    new_email: &str,
) -> Result<(), EmailError> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM email_address WHERE uid = $1 AND lower_email = $2")
        .bind(uid)
        .bind(old_email.to_lowercase())
        .execute(tx.as_mut())
        .await?;
    let inserted = insert_email_address_conn(
        tx.as_mut(),
        NewEmailAddress { uid, email: new_email.to_owned(), ..Default::default() },
    )
    .await?;
    make_email_primary(tx.as_mut(), inserted.id, false).await?;
    tx.commit().await?;
    info!(uid, "inactive primary email replaced");
    Ok(())
}

/// Set the activation state of one of `user_id`'s addresses. For the primary
/// address the account's `is_active` follows.
///
/// # Errors
///
/// Returns `NotExist` for an unknown address, `AlreadyUsed` when activating
/// an address another account already holds, or a database error.
pub async fn activate_user_email(
    pool: &PgPool,
    user_id: i64,
    email: &str,
    activate: bool,
    register_email_confirm: bool,
) -> Result<(), EmailError> {
    let mut tx = pool.begin().await?;
    let mut addr = fetch_email_of_user(tx.as_mut(), email, user_id)
        .await?
        .ok_or_else(|| EmailError::NotExist(email.to_owned()))?;
    if addr.is_activated == activate {
        return Ok(());
    }
    if activate && is_email_active_conn(tx.as_mut(), email, addr.id, register_email_confirm).await? {
        return Err(EmailError::AlreadyUsed(email.to_owned()));
    }
    update_activation(tx.as_mut(), &mut addr, activate).await?;

    if addr.is_primary {
        sqlx::query("UPDATE users SET is_active = $1, rands = $2 WHERE id = $3 AND is_active <> $1")
            .bind(activate)
            .bind(get_user_salt())
            .bind(user_id)
            .execute(tx.as_mut())
            .await?;
    }
    tx.commit().await?;
    info!(user_id, email_id = addr.id, activate, "email activation changed");
    Ok(())
}

/// Remove a secondary address of `uid`.
///
/// # Errors
///
/// Returns `NotExist` for an unknown address, `PrimaryCannotDelete` for the
/// primary one, or a database error.
pub async fn delete_email_address(pool: &PgPool, uid: i64, email: &str) -> Result<(), EmailError> {
    let mut tx = pool.begin().await?;
    let addr = fetch_email_of_user(tx.as_mut(), email, uid)
        .await?
        .ok_or_else(|| EmailError::NotExist(email.to_owned()))?;
    if addr.is_primary {
        return Err(EmailError::PrimaryCannotDelete(addr.email));
    }
    sqlx::query("DELETE FROM email_address WHERE id = $1")
        .bind(addr.id)
        .execute(tx.as_mut())
        .await?;
    tx.commit().await?;
    info!(uid, email_id = addr.id, "email deleted");
    Ok(())
}

// =============================================================================
// SEARCH
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SearchEmailOrderBy {
    #[default]
    Email,
    EmailReverse,
    Name,
    NameReverse,
}

impl SearchEmailOrderBy {
    fn sql(self) -> &'static str {
        match self {
            Self::Email => "e.lower_email ASC, e.is_primary DESC, e.id ASC",
            Self::EmailReverse => "e.lower_email DESC, e.is_primary ASC, e.id DESC",
            Self::Name => "u.lower_name ASC, e.is_primary DESC, e.id ASC",
            Self::NameReverse => "u.lower_name DESC, e.is_primary ASC, e.id DESC",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchEmailOptions {
    pub keyword: String,
    pub sort: SearchEmailOrderBy,
    pub is_primary: Option<bool>,
    pub is_activated: Option<bool>,
    pub list: ListOptions,
}

impl SearchEmailOptions {
    fn push_conditions(&self, query: &mut QueryBuilder<'_, Postgres>) {
        query.push(" WHERE u.type = ").push_bind(UserType::Individual.as_i64());
        if !self.keyword.is_empty() {
            let like = format!("%{}%", self.keyword.to_lowercase());
            query.push(" AND (LOWER(u.full_name) LIKE ").push_bind(like.clone());
            query.push(" OR u.lower_name LIKE ").push_bind(like.clone());
            query.push(" OR e.lower_email LIKE ").push_bind(like);
            query.push(")");
        }
        if let Some(primary) = self.is_primary {
            query.push(" AND e.is_primary = ").push_bind(primary);
        }
        if let Some(activated) = self.is_activated {
            query.push(" AND e.is_activated = ").push_bind(activated);
        }
    }
}

/// One row of an admin email search: the address plus its owner's names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct SearchEmailResult {
    pub uid: i64,
    pub email: String,
    pub is_activated: bool,
    pub is_primary: bool,
    pub name: String,
    pub full_name: String,
}

/// Addresses of individual users matching `opts`, plus the total count.
/// Always paginated; page `0` means the first page.
///
/// # Errors
///
/// Returns a database error.
pub async fn search_emails(pool: &PgPool, opts: &SearchEmailOptions) -> Result<(Vec<SearchEmailResult>, i64), EmailError> {
    let mut count_query =
        QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM email_address e INNER JOIN users u ON u.id = e.uid");
    opts.push_conditions(&mut count_query);
    let (count,): (i64,) = count_query.build_query_as().fetch_one(pool).await?;

    let mut query = QueryBuilder::<Postgres>::new(
        "SELECT e.uid, e.email, e.is_activated, e.is_primary, u.name, u.full_name FROM email_address e INNER JOIN users u ON u.id = e.uid",
    );
    opts.push_conditions(&mut query);
    query.push(" ORDER BY ").push(opts.sort.sql());
    ListOptions::paginated(opts.list.page.max(1), opts.list.page_size).push_limit(&mut query);
    let emails = query.build_query_as().fetch_all(pool).await?;
    Ok((emails, count))
}

#[cfg(test)]
#[path = "email_address_test.rs"]
mod tests;
