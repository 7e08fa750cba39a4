//! User accounts and organizations.
//!
//! DESIGN
//! ======
//! Users and organizations share the `users` table and are told apart by
//! `type`. Names are unique case-insensitively through `lower_name`. The
//! primary email address is stored both on the user row and as a row in
//! `email_address`; `create_user` writes both in one transaction.
//!
//! Passwords are argon2 PHC strings salted with the per-user `salt`. `rands`
//! is rotated whenever an emailed link must stop working.

use serde::{Deserialize, Serialize};
use sqlx::query_builder::Separated;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::db::{ListOptions, now_unix};
use crate::error::{ErrorKind, ModelError, db_error_kind};
use crate::models::auth_source::{SourceError, SourceType};
use crate::models::email_address::{self, EmailError, NewEmailAddress};
use crate::models::oauth2::{self, OAuth2Error};
use crate::models::secret::{self, SecretError};
use crate::models::token_cache::AccessTokenCache;

const SELECT_USER: &str = "SELECT id, lower_name, name, full_name, email, keep_email_private, passwd, passwd_hash_algo, must_change_password, login_type, login_source, login_name, type, visibility, rands, salt, is_active, is_admin, is_restricted, prohibit_login, allow_create_organization, max_repo_creation, created_unix, updated_unix, last_login_unix FROM users";

pub const PASSWORD_HASH_ALGO: &str = "argon2";
/// Bytes of randomness behind `salt` and `rands` (hex encoded, so 32 chars).
const SALT_BYTE_LENGTH: usize = 16;

const RESERVED_USERNAMES: &[&str] = &[
    ".",
    "..",
    ".well-known",
    "api",
    "metrics",
    "v2",
    "assets",
    "attachments",
    "avatar",
    "avatars",
    "repo-avatars",
    "captcha",
    "login",
    "org",
    "repo",
    "user",
    "explore",
    "issues",
    "pulls",
    "milestones",
    "notifications",
    "favicon.ico",
    "manifest.json",
    "robots.txt",
    "sitemap.xml",
    "ssh_info",
    "swagger.v1.json",
    "ghost",
    "gitea-actions",
];

/// Per-user sub-routes (`/{user}.keys` and friends).
const RESERVED_USER_PATTERNS: &[&str] = &["*.keys", "*.gpg", "*.rss", "*.atom", "*.png"];

#[derive(Debug, thiserror::Error)]
pub enum UserError {
    #[error("user does not exist [uid: {uid}, name: {name}]")]
    NotExist { uid: i64, name: String },
    #[error("user already exists [name: {0}]")]
    AlreadyExist(String),
    #[error("name is invalid [{0}]: must be valid alpha or numeric or dash(-_) or dot characters")]
    NameCharsNotAllowed(String),
    #[error("name is reserved [name: {0}]")]
    NameReserved(String),
    #[error("name pattern is not allowed [pattern: {0}]")]
    NamePatternNotAllowed(String),
    #[error("can not delete the last admin user [uid: {0}]")]
    DeleteLastAdmin(i64),
    #[error("unknown user type: {0}")]
    UnknownType(i64),
    #[error("unknown visibility: {0}")]
    UnknownVisibility(i64),
    #[error(transparent)]
    Email(#[from] EmailError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Secret(#[from] SecretError),
    #[error(transparent)]
    OAuth2(#[from] OAuth2Error),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

impl ModelError for UserError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NotExist { .. } => ErrorKind::NotExist,
            Self::AlreadyExist(_) => ErrorKind::AlreadyExist,
            Self::NameCharsNotAllowed(_)
            | Self::NameReserved(_)
            | Self::NamePatternNotAllowed(_)
            | Self::UnknownType(_)
            | Self::UnknownVisibility(_) => ErrorKind::InvalidArgument,
            Self::DeleteLastAdmin(_) => ErrorKind::PermissionDenied,
            Self::Email(e) => e.kind(),
            Self::Source(e) => e.kind(),
            Self::OAuth2(e) => e.kind(),
            Self::Secret(_) => ErrorKind::Internal,
            Self::Db(e) => db_error_kind(e),
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::NotExist { .. } => "E_USER_NOT_EXIST",
            Self::AlreadyExist(_) => "E_USER_ALREADY_EXIST",
            Self::NameCharsNotAllowed(_) => "E_USER_NAME_CHARS_NOT_ALLOWED",
            Self::NameReserved(_) => "E_USER_NAME_RESERVED",
            Self::NamePatternNotAllowed(_) => "E_USER_NAME_PATTERN_NOT_ALLOWED",
            Self::DeleteLastAdmin(_) => "E_USER_DELETE_LAST_ADMIN",
            Self::UnknownType(_) => "E_USER_UNKNOWN_TYPE",
            Self::UnknownVisibility(_) => "E_USER_UNKNOWN_VISIBILITY",
            Self::Email(e) => e.error_code(),
            Self::Source(e) => e.error_code(),
            Self::OAuth2(e) => e.error_code(),
            Self::Secret(_) => "E_SECRET",
            Self::Db(_) => "E_DATABASE",
        }
    }
}

impl UserError {
    fn not_exist_id(uid: i64) -> Self {
        Self::NotExist { uid, name: String::new() }
    }

    fn not_exist_name(name: &str) -> Self {
        Self::NotExist { uid: 0, name: name.to_owned() }
    }
}

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    #[default]
    Individual,
    Organization,
    UserReserved,
    OrganizationReserved,
    Bot,
    RemoteUser,
}

impl UserType {
    #[must_use]
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Individual => 0,
            Self::Organization => 1,
            Self::UserReserved => 2,
            Self::OrganizationReserved => 3,
            Self::Bot => 4,
            Self::RemoteUser => 5,
        }
    }
}

impl TryFrom<i64> for UserType {
    type Error = UserError;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        Ok(match raw {
            0 => Self::Individual,
            1 => Self::Organization,
            2 => Self::UserReserved,
            3 => Self::OrganizationReserved,
            4 => Self::Bot,
            5 => Self::RemoteUser,
            other => return Err(UserError::UnknownType(other)),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Limited,
    Private,
}

impl Visibility {
    #[must_use]
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Public => 0,
            Self::Limited => 1,
            Self::Private => 2,
        }
    }
}

impl TryFrom<i64> for Visibility {
    type Error = UserError;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Self::Public),
            1 => Ok(Self::Limited),
            2 => Ok(Self::Private),
            other => Err(UserError::UnknownVisibility(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub lower_name: String,
    pub name: String,
    pub full_name: String,
    pub email: String,
    pub keep_email_private: bool,
    #[serde(skip)]
    pub passwd: String,
    #[serde(skip)]
    pub passwd_hash_algo: String,
    pub must_change_password: bool,
    #[sqlx(try_from = "i64")]
    pub login_type: SourceType,
    pub login_source: i64,
    pub login_name: String,
    #[sqlx(rename = "type", try_from = "i64")]
    #[serde(rename = "type")]
    pub user_type: UserType,
    #[sqlx(try_from = "i64")]
    pub visibility: Visibility,
    #[serde(skip)]
    pub rands: String,
    #[serde(skip)]
    pub salt: String,
    pub is_active: bool,
    pub is_admin: bool,
    pub is_restricted: bool,
    pub prohibit_login: bool,
    pub allow_create_organization: bool,
    /// `-1` means the instance default.
    pub max_repo_creation: i64,
    pub created_unix: i64,
    pub updated_unix: i64,
    pub last_login_unix: i64,
}

impl User {
    #[must_use]
    pub fn is_organization(&self) -> bool {
        self.user_type == UserType::Organization
    }

    #[must_use]
    pub fn is_individual(&self) -> bool {
        self.user_type == UserType::Individual
    }

    #[must_use]
    pub fn is_bot(&self) -> bool {
        self.user_type == UserType::Bot
    }

    /// Signs in with a local password.
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self.login_type, SourceType::NoType | SourceType::Plain)
    }

    #[must_use]
    pub fn is_oauth2(&self) -> bool {
        self.login_type == SourceType::OAuth2
    }

    /// Trimmed full name, or the login name when there is none.
    #[must_use]
    pub fn display_name(&self) -> &str {
        let trimmed = self.full_name.trim();
        if trimmed.is_empty() { &self.name } else { trimmed }
    }

    /// `Full Name (name)`, or just `name`.
    #[must_use]
    pub fn complete_name(&self) -> String {
        let trimmed = self.full_name.trim();
        if trimmed.is_empty() { self.name.clone() } else { format!("{trimmed} ({})", self.name) }
    }

    /// Hash and store `password` with a fresh salt. An empty password clears
    /// the credential.
    ///
    /// # Errors
    ///
    /// Returns a hashing error.
    pub fn set_password(&mut self, password: &str) -> Result<(), UserError> {
        if password.is_empty() {
            self.passwd.clear();
            self.salt.clear();
            self.passwd_hash_algo.clear();
            return Ok(());
        }
        self.salt = get_user_salt();
        self.passwd = secret::hash_password_with_salt(password, self.salt.as_bytes())?;
        PASSWORD_HASH_ALGO.clone_into(&mut self.passwd_hash_algo);
        Ok(())
    }

    #[must_use]
    pub fn validate_password(&self, password: &str) -> bool {
        self.is_password_set() && secret::verify_password(password, &self.passwd)
    }

    #[must_use]
    pub fn is_password_set(&self) -> bool {
        !self.passwd.is_empty()
    }
}

/// 32 lowercase hex characters of fresh randomness.
#[must_use]
pub fn get_user_salt() -> String {
    secret::random_hex::<SALT_BYTE_LENGTH>()
}

// =============================================================================
// NAMES
// =============================================================================

fn is_name_special(c: char) -> bool {
    matches!(c, '-' | '_' | '.')
}

/// ASCII letters, digits, `-`, `_` and `.`; starts alphanumeric; no two
/// specials in a row and no trailing special.
#[must_use]
pub fn is_valid_username(name: &str) -> bool {
    let mut chars = name.chars();
    if !chars.next().is_some_and(|c| c.is_ascii_alphanumeric()) {
        return false;
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || is_name_special(c)) {
        return false;
    }
    let mut previous_special = false;
    for c in chars {
        let special = is_name_special(c);
        if special && previous_special {
            return false;
        }
        previous_special = special;
    }
    !previous_special
}

/// Whether `name` may be registered.
///
/// # Errors
///
/// Returns `NameCharsNotAllowed`, `NameReserved` or `NamePatternNotAllowed`.
pub fn is_usable_username(name: &str) -> Result<(), UserError> {
    if !is_valid_username(name) {
        return Err(UserError::NameCharsNotAllowed(name.to_owned()));
    }
    let lower = name.trim().to_lowercase();
    if RESERVED_USERNAMES.contains(&lower.as_str()) {
        return Err(UserError::NameReserved(name.to_owned()));
    }
    for pattern in RESERVED_USER_PATTERNS {
        let matched = match (pattern.strip_prefix('*'), pattern.strip_suffix('*')) {
            (Some(suffix), _) => lower.ends_with(suffix),
            (None, Some(prefix)) => lower.starts_with(prefix),
            (None, None) => lower == *pattern,
        };
        if matched {
            return Err(UserError::NamePatternNotAllowed((*pattern).to_owned()));
        }
    }
    Ok(())
}

fn fold_diacritic(c: char) -> Option<char> {
    Some(match c {
        'À'..='Å' | 'Ā' | 'Ă' | 'Ą' => 'A',
        'à'..='å' | 'ā' | 'ă' | 'ą' => 'a',
        'Ç' | 'Ć' | 'Č' => 'C',
        'ç' | 'ć' | 'č' => 'c',
        'Ď' => 'D',
        'ď' => 'd',
        'È'..='Ë' | 'Ē' | 'Ė' | 'Ę' | 'Ě' => 'E',
        'è'..='ë' | 'ē' | 'ė' | 'ę' | 'ě' => 'e',
        'Ì'..='Ï' | 'Ī' | 'Į' => 'I',
        'ì'..='ï' | 'ī' | 'į' => 'i',
        'Ñ' | 'Ń' | 'Ň' => 'N',
        'ñ' | 'ń' | 'ň' => 'n',
        'Ò'..='Ö' | 'Ō' | 'Ő' => 'O',
        'ò'..='ö' | 'ō' | 'ő' => 'o',
        'Ř' => 'R',
        'ř' => 'r',
        'Ś' | 'Š' | 'Ş' => 'S',
        'ś' | 'š' | 'ş' => 's',
        'Ť' => 'T',
        'ť' => 't',
        'Ù'..='Ü' | 'Ū' | 'Ů' | 'Ű' => 'U',
        'ù'..='ü' | 'ū' | 'ů' | 'ű' => 'u',
        'Ý' | 'Ÿ' => 'Y',
        'ý' | 'ÿ' => 'y',
        'Ź' | 'Ż' | 'Ž' => 'Z',
        'ź' | 'ż' | 'ž' => 'z',
        _ => return None,
    })
}

/// Derive a username from free text such as an email address or a display
/// name: keep the part before `@`, strip accents and apostrophes, and turn
/// whitespace, `~` and `+` into `-`. The result is not guaranteed usable.
#[must_use]
pub fn normalize_user_name(input: &str) -> String {
    let base = input.split_once('@').map_or(input, |(local, _)| local);
    let mut out = String::with_capacity(base.len());
    for c in base.chars() {
        match c {
            'Æ' => out.push_str("AE"),
            'æ' => out.push_str("ae"),
            '\'' | '`' | '´' => {}
            // Combining diacritical marks.
            '\u{0300}'..='\u{036f}' => {}
            '~' | '+' => out.push('-'),
            c if c.is_whitespace() => out.push('-'),
            c => out.push(fold_diacritic(c).unwrap_or(c)),
        }
    }
    out
}

// =============================================================================
// CREATE
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct CreateUserOptions {
    pub name: String,
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub user_type: UserType,
    pub is_admin: bool,
    pub must_change_password: bool,
    pub login_type: SourceType,
    pub login_source: i64,
    pub login_name: String,
}

/// Per-account overrides of the instance defaults.
#[derive(Debug, Clone, Default)]
pub struct CreateUserOverwriteOptions {
    pub keep_email_private: Option<bool>,
    pub visibility: Option<Visibility>,
    pub allow_create_organization: Option<bool>,
    pub max_repo_creation: Option<i64>,
    pub is_restricted: Option<bool>,
    pub is_active: Option<bool>,
}

/// Self-service registration: the email must pass the domain policy.
///
/// # Errors
///
/// See [`admin_create_user`]; additionally `Email(Invalid)` for a blocked
/// domain.
pub async fn create_user(
    pool: &PgPool,
    config: &AppConfig,
    opts: CreateUserOptions,
    overwrite: &CreateUserOverwriteOptions,
) -> Result<User, UserError> {
    create_user_inner(pool, config, opts, overwrite, false).await
}

/// Account creation by an administrator; any email domain is accepted.
///
/// # Errors
///
/// Returns a name error from [`is_usable_username`], `Email` for an invalid
/// or taken address, `AlreadyExist` for a taken name, or a database error.
pub async fn admin_create_user(
    pool: &PgPool,
    config: &AppConfig,
    opts: CreateUserOptions,
    overwrite: &CreateUserOverwriteOptions,
) -> Result<User, UserError> {
    create_user_inner(pool, config, opts, overwrite, true).await
}

async fn create_user_inner(
    pool: &PgPool,
    config: &AppConfig,
    opts: CreateUserOptions,
    overwrite: &CreateUserOverwriteOptions,
    created_by_admin: bool,
) -> Result<User, UserError> {
    is_usable_username(&opts.name)?;
    if created_by_admin {
        email_address::validate_email_for_admin(&opts.email)?;
    } else {
        email_address::validate_email(&opts.email, &config.email_domains)?;
    }

    let now = now_unix();
    let mut user = User {
        id: 0,
        lower_name: opts.name.to_lowercase(),
        name: opts.name,
        full_name: opts.full_name,
        email: opts.email,
        keep_email_private: overwrite.keep_email_private.unwrap_or(false),
        passwd: String::new(),
        passwd_hash_algo: String::new(),
        must_change_password: opts.must_change_password,
        login_type: opts.login_type,
        login_source: opts.login_source,
        login_name: opts.login_name,
        user_type: opts.user_type,
        visibility: overwrite.visibility.unwrap_or_default(),
        rands: get_user_salt(),
        salt: String::new(),
        is_active: overwrite.is_active.unwrap_or(!config.register_email_confirm),
        is_admin: opts.is_admin,
        is_restricted: overwrite.is_restricted.unwrap_or(false),
        prohibit_login: false,
        allow_create_organization: overwrite.allow_create_organization.unwrap_or(true),
        max_repo_creation: overwrite.max_repo_creation.unwrap_or(-1),
        created_unix: now,
        updated_unix: now,
        last_login_unix: 0,
    };
    user.set_password(&opts.password)?;

    let mut tx = pool.begin().await?;
    if is_user_exist_conn(tx.as_mut(), 0, &user.name).await? {
        return Err(UserError::AlreadyExist(user.name));
    }
    if email_address::is_email_used_conn(tx.as_mut(), &user.email).await? {
        return Err(EmailError::AlreadyUsed(user.email).into());
    }

    let (id,): (i64,) = sqlx::query_as(
        r"INSERT INTO users (
              lower_name, name, full_name, email, keep_email_private, passwd, passwd_hash_algo,
              must_change_password, login_type, login_source, login_name, type, visibility, rands, salt,
              is_active, is_admin, is_restricted, prohibit_login, allow_create_organization, max_repo_creation,
              created_unix, updated_unix, last_login_unix
          ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $22, 0)
          RETURNING id",
    )
    .bind(&user.lower_name)
    .bind(&user.name)
    .bind(&user.full_name)
    .bind(&user.email)
    .bind(user.keep_email_private)
    .bind(&user.passwd)
    .bind(&user.passwd_hash_algo)
    .bind(user.must_change_password)
    .bind(user.login_type.as_i64())
    .bind(user.login_source)
    .bind(&user.login_name)
    .bind(user.user_type.as_i64())
    .bind(user.visibility.as_i64())
    .bind(&user.rands)
    .bind(&user.salt)
    .bind(user.is_active)
    .bind(user.is_admin)
    .bind(user.is_restricted)
    .bind(user.prohibit_login)
    .bind(user.allow_create_organization)
    .bind(user.max_repo_creation)
    .bind(now)
    .fetch_one(tx.as_mut())
    .await?;
    user.id = id;

    email_address::insert_email_address_conn(
        tx.as_mut(),
        NewEmailAddress { uid: id, email: user.email.clone(), is_activated: user.is_active, is_primary: true },
    )
    .await?;
    tx.commit().await?;

    info!(user_id = id, name = %user.name, created_by_admin, "user created");
    Ok(user)
}

// =============================================================================
// READ
// =============================================================================

/// # Errors
///
/// Returns `NotExist` for an unknown id.
pub async fn get_user_by_id(pool: &PgPool, id: i64) -> Result<User, UserError> {
    let mut query = QueryBuilder::<Postgres>::new(SELECT_USER);
    query.push(" WHERE id = ").push_bind(id);
    query.build_query_as().fetch_optional(pool).await?.ok_or_else(|| UserError::not_exist_id(id))
}

/// Case-insensitive lookup by login name.
///
/// # Errors
///
/// Returns `NotExist` for an empty or unknown name.
pub async fn get_user_by_name(pool: &PgPool, name: &str) -> Result<User, UserError> {
    if name.is_empty() {
        return Err(UserError::not_exist_name(name));
    }
    let mut query = QueryBuilder::<Postgres>::new(SELECT_USER);
    query.push(" WHERE lower_name = ").push_bind(name.to_lowercase());
    query
        .build_query_as()
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| UserError::not_exist_name(name))
}

/// Owner of an activated address.
///
/// # Errors
///
/// Returns `NotExist` when no activated address matches.
pub async fn get_user_by_email(pool: &PgPool, email: &str) -> Result<User, UserError> {
    if email.is_empty() {
        return Err(UserError::not_exist_name(email));
    }
    let owner: Option<(i64,)> =
        sqlx::query_as("SELECT uid FROM email_address WHERE lower_email = $1 AND is_activated = TRUE")
            .bind(email.to_lowercase())
            .fetch_optional(pool)
            .await?;
    let (uid,) = owner.ok_or_else(|| UserError::not_exist_name(email))?;
    get_user_by_id(pool, uid).await
}

async fn is_user_exist_conn(conn: &mut PgConnection, uid: i64, name: &str) -> Result<bool, sqlx::Error> {
    if name.is_empty() {
        return Ok(false);
    }
    let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM users WHERE lower_name = $1 AND id <> $2)")
        .bind(name.to_lowercase())
        .bind(uid)
        .fetch_one(conn)
        .await?;
    Ok(exists)
}

/// Whether another account (not `uid`) already uses `name`.
///
/// # Errors
///
/// Returns a database error.
pub async fn is_user_exist(pool: &PgPool, uid: i64, name: &str) -> Result<bool, UserError> {
    if name.is_empty() {
        return Ok(false);
    }
    Ok(is_user_exist_conn(&mut *pool.acquire().await?, uid, name).await?)
}

// =============================================================================
// UPDATE
// =============================================================================

/// Columns `update_user_cols` can write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserColumn {
    FullName,
    Email,
    KeepEmailPrivate,
    /// `passwd`, `passwd_hash_algo` and `salt` together.
    Password,
    MustChangePassword,
    Rands,
    Visibility,
    IsActive,
    IsAdmin,
    IsRestricted,
    ProhibitLogin,
    AllowCreateOrganization,
    MaxRepoCreation,
    LastLogin,
}

fn push_user_column(set: &mut Separated<'_, '_, Postgres, &'static str>, user: &User, col: UserColumn) {
    match col {
        UserColumn::FullName => {
            set.push("full_name = ").push_bind_unseparated(user.full_name.clone());
        }
        UserColumn::Email => {
            set.push("email = ").push_bind_unseparated(user.email.clone());
        }
        UserColumn::KeepEmailPrivate => {
            set.push("keep_email_private = ").push_bind_unseparated(user.keep_email_private);
        }
        UserColumn::Password => {
            set.push("passwd = ").push_bind_unseparated(user.passwd.clone());
            set.push("passwd_hash_algo = ").push_bind_unseparated(user.passwd_hash_algo.clone());
            set.push("salt = ").push_bind_unseparated(user.salt.clone());
        }
        UserColumn::MustChangePassword => {
            set.push("must_change_password = ").push_bind_unseparated(user.must_change_password);
        }
        UserColumn::Rands => {
            set.push("rands = ").push_bind_unseparated(user.rands.clone());
        }
        UserColumn::Visibility => {
            set.push("visibility = ").push_bind_unseparated(user.visibility.as_i64());
        }
        UserColumn::IsActive => {
            set.push("is_active = ").push_bind_unseparated(user.is_active);
        }
        UserColumn::IsAdmin => {
            set.push("is_admin = ").push_bind_unseparated(user.is_admin);
        }
        UserColumn::IsRestricted => {
            set.push("is_restricted = ").push_bind_unseparated(user.is_restricted);
        }
        UserColumn::ProhibitLogin => {
            set.push("prohibit_login = ").push_bind_unseparated(user.prohibit_login);
        }
        UserColumn::AllowCreateOrganization => {
            set.push("allow_create_organization = ").push_bind_unseparated(user.allow_create_organization);
        }
        UserColumn::MaxRepoCreation => {
            set.push("max_repo_creation = ").push_bind_unseparated(user.max_repo_creation);
        }
        UserColumn::LastLogin => {
            set.push("last_login_unix = ").push_bind_unseparated(user.last_login_unix);
        }
    }
}

/// Write the listed columns of `user` (and `updated_unix`).
///
/// # Errors
///
/// Returns `Email` if an email column fails validation, `NotExist` if the row
/// is gone, or a database error.
pub async fn update_user_cols(pool: &PgPool, user: &mut User, cols: &[UserColumn]) -> Result<(), UserError> {
    if cols.contains(&UserColumn::Email) {
        email_address::validate_email_for_admin(&user.email)?;
    }
    user.updated_unix = now_unix();

    let mut query = QueryBuilder::<Postgres>::new("UPDATE users SET ");
    {
        let mut set = query.separated(", ");
        set.push("updated_unix = ").push_bind_unseparated(user.updated_unix);
        for col in cols {
            push_user_column(&mut set, user, *col);
        }
    }
    query.push(" WHERE id = ").push_bind(user.id);

    let result = query.build().execute(pool).await?;
    if result.rows_affected() == 0 {
        return Err(UserError::not_exist_id(user.id));
    }
    Ok(())
}

/// # Errors
///
/// Returns `NotExist` if the row is gone, or a database error.
pub async fn set_last_login(pool: &PgPool, user: &mut User) -> Result<(), UserError> {
    user.last_login_unix = now_unix();
    update_user_cols(pool, user, &[UserColumn::LastLogin]).await
}

// =============================================================================
// COUNT / SEARCH
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct CountUserFilter {
    pub last_login_since: Option<i64>,
    pub is_admin: Option<bool>,
}

/// Individual users matching `filter`.
///
/// # Errors
///
/// Returns a database error.
pub async fn count_users(pool: &PgPool, filter: &CountUserFilter) -> Result<i64, UserError> {
    let mut query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users WHERE type = ");
    query.push_bind(UserType::Individual.as_i64());
    if let Some(since) = filter.last_login_since {
        query.push(" AND last_login_unix >= ").push_bind(since);
    }
    if let Some(admin) = filter.is_admin {
        query.push(" AND is_admin = ").push_bind(admin);
    }
    let (count,): (i64,) = query.build_query_as().fetch_one(pool).await?;
    Ok(count)
}

/// Whether `user` is an admin and no other admin exists.
///
/// # Errors
///
/// Returns a database error.
pub async fn is_last_admin_user(pool: &PgPool, user: &User) -> Result<bool, UserError> {
    if !user.is_admin {
        return Ok(false);
    }
    Ok(count_users(pool, &CountUserFilter { is_admin: Some(true), ..Default::default() }).await? <= 1)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SearchUserOrderBy {
    #[default]
    Alphabetically,
    ReverseAlphabetically,
    Newest,
    Oldest,
    RecentUpdated,
}

impl SearchUserOrderBy {
    fn sql(self) -> &'static str {
        match self {
            Self::Alphabetically => "lower_name ASC",
            Self::ReverseAlphabetically => "lower_name DESC",
            Self::Newest => "created_unix DESC, id DESC",
            Self::Oldest => "created_unix ASC, id ASC",
            Self::RecentUpdated => "updated_unix DESC, id DESC",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchUserOptions {
    pub keyword: String,
    pub user_type: Option<UserType>,
    /// Exact id match; `0` means any.
    pub uid: i64,
    pub search_by_email: bool,
    pub is_active: Option<bool>,
    pub is_admin: Option<bool>,
    pub is_restricted: Option<bool>,
    pub prohibit_login: Option<bool>,
    pub order_by: SearchUserOrderBy,
    pub list: ListOptions,
}

impl SearchUserOptions {
    fn push_conditions(&self, query: &mut QueryBuilder<'_, Postgres>) {
        query.push(" WHERE TRUE");
        if let Some(user_type) = self.user_type {
            query.push(" AND type = ").push_bind(user_type.as_i64());
        }
        if !self.keyword.is_empty() {
            let like = format!("%{}%", self.keyword.to_lowercase());
            query.push(" AND (lower_name LIKE ").push_bind(like.clone());
            query.push(" OR LOWER(full_name) LIKE ").push_bind(like.clone());
            if self.search_by_email {
                query.push(" OR LOWER(email) LIKE ").push_bind(like);
            }
            query.push(")");
        }
        if self.uid > 0 {
            query.push(" AND id = ").push_bind(self.uid);
        }
        if let Some(active) = self.is_active {
            query.push(" AND is_active = ").push_bind(active);
        }
        if let Some(admin) = self.is_admin {
            query.push(" AND is_admin = ").push_bind(admin);
        }
        if let Some(restricted) = self.is_restricted {
            query.push(" AND is_restricted = ").push_bind(restricted);
        }
        if let Some(prohibit) = self.prohibit_login {
            query.push(" AND prohibit_login = ").push_bind(prohibit);
        }
    }
}

/// Users matching `opts` plus the total count.
///
/// # Errors
///
/// Returns a database error.
pub async fn search_users(pool: &PgPool, opts: &SearchUserOptions) -> Result<(Vec<User>, i64), UserError> {
    let mut count_query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users");
    opts.push_conditions(&mut count_query);
    let (count,): (i64,) = count_query.build_query_as().fetch_one(pool).await?;

    let mut query = QueryBuilder::<Postgres>::new(SELECT_USER);
    opts.push_conditions(&mut query);
    query.push(" ORDER BY ").push(opts.order_by.sql());
    opts.list.push_limit(&mut query);
    let users = query.build_query_as().fetch_all(pool).await?;
    Ok((users, count))
}

// =============================================================================
// DELETE
// =============================================================================

/// Delete `user` with everything it owns in this crate's tables: emails,
/// access tokens, OAuth2 applications and grants, WebAuthn credentials,
/// blocks in either direction and badges.
///
/// # Errors
///
/// Returns `DeleteLastAdmin` for the only remaining admin, `NotExist` if the
/// row is gone, or a database error.
pub async fn delete_user(pool: &PgPool, cache: &AccessTokenCache, user: &User) -> Result<(), UserError> {
    let mut tx = pool.begin().await?;
    // Admin rows are locked in id order so concurrent deletes see each
    // other's outcome before counting.
    let admins: Vec<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE is_admin ORDER BY id FOR UPDATE")
        .fetch_all(tx.as_mut())
        .await?;
    let current: Option<(bool,)> = sqlx::query_as("SELECT is_admin FROM users WHERE id = $1 FOR UPDATE")
        .bind(user.id)
        .fetch_optional(tx.as_mut())
        .await?;
    let (is_admin,) = current.ok_or_else(|| UserError::not_exist_id(user.id))?;
    if is_admin && admins.len() <= 1 {
        return Err(UserError::DeleteLastAdmin(user.id));
    }

    sqlx::query("DELETE FROM email_address WHERE uid = $1")
        .bind(user.id)
        .execute(tx.as_mut())
        .await?;
    let token_ids: Vec<(i64,)> = sqlx::query_as("DELETE FROM access_token WHERE uid = $1 RETURNING id")
        .bind(user.id)
        .fetch_all(tx.as_mut())
        .await?;
    oauth2::delete_oauth2_relicts_by_user_id(tx.as_mut(), user.id).await?;
    sqlx::query("DELETE FROM webauthn_credential WHERE user_id = $1")
        .bind(user.id)
        .execute(tx.as_mut())
        .await?;
    sqlx::query("DELETE FROM user_blocking WHERE blocker_id = $1 OR blockee_id = $1")
        .bind(user.id)
        .execute(tx.as_mut())
        .await?;
    sqlx::query("DELETE FROM user_badge WHERE user_id = $1")
        .bind(user.id)
        .execute(tx.as_mut())
        .await?;
    let deleted = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(user.id)
        .execute(tx.as_mut())
        .await?;
    if deleted.rows_affected() == 0 {
        warn!(user_id = user.id, "user vanished before delete");
        return Err(UserError::not_exist_id(user.id));
    }
    tx.commit().await?;

    for (token_id,) in token_ids {
        cache.remove_id(token_id);
    }
    info!(user_id = user.id, name = %user.name, "user deleted");
    Ok(())
}

#[cfg(test)]
#[path = "user_test.rs"]
mod tests;
