//! OAuth2 applications, grants and authorization codes (RFC 6749, RFC 7636).
//!
//! ARCHITECTURE
//! ============
//! An `OAuth2Application` is a registered client. A user's consent for one
//! application is an `OAuth2Grant` (one per user and application), and each
//! authorization request under a grant mints a short-lived, single-use
//! `OAuth2AuthorizationCode`. Deleting an application or a user removes the
//! dependent grants and codes in the same transaction.
//!
//! Builtin applications (credential helpers shipped with Git clients) have
//! fixed client ids, are owned by no user, and are kept in sync with
//! configuration at startup. They cannot be edited or deleted through the
//! normal update/delete paths.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder, Row};
use tracing::info;
use url::Url;
use uuid::Uuid;

use crate::db::{ListOptions, now_unix};
use crate::error::{ErrorKind, ModelError, db_error_kind};
use crate::models::auth_source::{self, Source, SourceType};
use crate::models::secret::{self, SecretError};

const CLIENT_SECRET_PREFIX: &str = "gto_";
const AUTHORIZATION_CODE_PREFIX: &str = "gta_";

const SELECT_APPLICATION: &str = "SELECT id, uid, name, client_id, client_secret, confidential_client, skip_secondary_authorization, redirect_uris, created_unix, updated_unix FROM oauth2_application";
const SELECT_GRANT: &str =
    "SELECT id, user_id, application_id, counter, scope, nonce, created_unix, updated_unix FROM oauth2_grant";
const SELECT_CODE: &str = "SELECT id, grant_id, code, code_challenge, code_challenge_method, redirect_uri, valid_until FROM oauth2_authorization_code";

#[derive(Debug, thiserror::Error)]
pub enum OAuth2Error {
    #[error("client id invalid [client_id: {0}]")]
    ClientIdInvalid(String),
    #[error("oauth2 application not found [id: {0}]")]
    ApplicationNotFound(i64),
    #[error("oauth2 grant not found [id: {0}]")]
    GrantNotFound(i64),
    #[error("unknown oauth2 application: {0:?}")]
    UnknownBuiltinApplication(String),
    #[error("application is locked: {0}")]
    ApplicationLocked(String),
    #[error("oauth2 application is owned by another user")]
    UidMismatch,
    #[error("oauth2 source not found, name: {0:?}")]
    SourceNotFound(String),
    #[error("invalid redirect uri: {0}")]
    InvalidRedirectUri(String),
    #[error("device code not found")]
    DeviceCodeNotFound,
    #[error("device authorization is no longer pending")]
    DeviceCodeNotPending,
    #[error("device authorization has expired")]
    DeviceCodeExpired,
    #[error(transparent)]
    Secret(#[from] SecretError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

impl ModelError for OAuth2Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::ClientIdInvalid(_)
            | Self::ApplicationNotFound(_)
            | Self::GrantNotFound(_)
            | Self::SourceNotFound(_)
            | Self::DeviceCodeNotFound => ErrorKind::NotExist,
            Self::UnknownBuiltinApplication(_)
            | Self::InvalidRedirectUri(_)
            | Self::DeviceCodeNotPending
            | Self::DeviceCodeExpired => ErrorKind::InvalidArgument,
            Self::ApplicationLocked(_) | Self::UidMismatch => ErrorKind::PermissionDenied,
            Self::Secret(_) | Self::Json(_) => ErrorKind::Internal,
            Self::Db(e) => db_error_kind(e),
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::ClientIdInvalid(_) => "E_OAUTH2_CLIENT_ID_INVALID",
            Self::ApplicationNotFound(_) => "E_OAUTH2_APPLICATION_NOT_FOUND",
            Self::GrantNotFound(_) => "E_OAUTH2_GRANT_NOT_FOUND",
            Self::UnknownBuiltinApplication(_) => "E_OAUTH2_UNKNOWN_BUILTIN",
            Self::ApplicationLocked(_) => "E_OAUTH2_APPLICATION_LOCKED",
            Self::UidMismatch => "E_OAUTH2_UID_MISMATCH",
            Self::SourceNotFound(_) => "E_OAUTH2_SOURCE_NOT_FOUND",
            Self::InvalidRedirectUri(_) => "E_OAUTH2_INVALID_REDIRECT_URI",
            Self::DeviceCodeNotFound => "E_OAUTH2_DEVICE_CODE_NOT_FOUND",
            Self::DeviceCodeNotPending => "E_OAUTH2_DEVICE_CODE_NOT_PENDING",
            Self::DeviceCodeExpired => "E_OAUTH2_DEVICE_CODE_EXPIRED",
            Self::Secret(_) => "E_SECRET",
            Self::Json(_) => "E_JSON",
            Self::Db(_) => "E_DATABASE",
        }
    }
}

// =============================================================================
// BUILTIN APPLICATIONS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinApplication {
    pub client_id: &'static str,
    pub config_name: &'static str,
    pub display_name: &'static str,
    pub redirect_uris: &'static [&'static str],
}

const LOOPBACK_REDIRECT_URIS: &[&str] = &["http://127.0.0.1", "https://127.0.0.1"];

pub const BUILTIN_APPLICATIONS: [BuiltinApplication; 3] = [
    BuiltinApplication {
        client_id: "a4792ccc-144e-407e-86c9-5e7d8d9c3269",
        config_name: "git-credential-oauth",
        display_name: "git-credential-oauth",
        redirect_uris: LOOPBACK_REDIRECT_URIS,
    },
    BuiltinApplication {
        client_id: "e90ee53c-94e2-48ac-9358-a874fb9e0662",
        config_name: "git-credential-manager",
        display_name: "Git Credential Manager",
        redirect_uris: LOOPBACK_REDIRECT_URIS,
    },
    BuiltinApplication {
        client_id: "d57cb8c4-630c-4168-8324-ec79935e18d4",
        config_name: "tea",
        display_name: "tea",
        redirect_uris: LOOPBACK_REDIRECT_URIS,
    },
];

#[must_use]
pub fn builtin_application(client_id: &str) -> Option<&'static BuiltinApplication> {
    BUILTIN_APPLICATIONS.iter().find(|app| app.client_id == client_id)
}

/// Client ids for the configured builtin names.
///
/// # Errors
///
/// Returns `UnknownBuiltinApplication` for a name no builtin carries.
pub fn resolve_builtin_client_ids(config_names: &[String]) -> Result<BTreeSet<&'static str>, OAuth2Error> {
    config_names
        .iter()
        .map(|name| {
            BUILTIN_APPLICATIONS
                .iter()
                .find(|app| app.config_name == name)
                .map(|app| app.client_id)
                .ok_or_else(|| OAuth2Error::UnknownBuiltinApplication(name.clone()))
        })
        .collect()
}

/// Make the registered builtin applications match `config_names`: missing
/// ones are inserted, registered ones no longer configured are deleted
/// together with their grants and codes.
///
/// # Errors
///
/// Returns `UnknownBuiltinApplication` for an unknown name, or a database
/// error.
pub async fn init_builtin_applications(pool: &PgPool, config_names: &[String]) -> Result<(), OAuth2Error> {
    let wanted = resolve_builtin_client_ids(config_names)?;
    let all_ids: Vec<String> = BUILTIN_APPLICATIONS.iter().map(|app| app.client_id.to_owned()).collect();

    let mut tx = pool.begin().await?;
    let registered: Vec<(i64, String)> =
        sqlx::query_as("SELECT id, client_id FROM oauth2_application WHERE client_id = ANY($1)")
            .bind(&all_ids)
            .fetch_all(tx.as_mut())
            .await?;

    for (id, client_id) in &registered {
        if !wanted.contains(client_id.as_str()) {
            delete_application_cascade(tx.as_mut(), *id, 0).await?;
            info!(client_id = %client_id, "builtin oauth2 application removed");
        }
    }

    let now = now_unix();
    for client_id in wanted {
        if registered.iter().any(|(_, registered_id)| registered_id == client_id) {
            continue;
        }
        let Some(builtin) = builtin_application(client_id) else {
            continue;
        };
        let redirect_uris = serde_json::to_string(builtin.redirect_uris)?;
        sqlx::query(
            r"INSERT INTO oauth2_application (uid, name, client_id, confidential_client, redirect_uris, created_unix, updated_unix)
              VALUES (0, $1, $2, FALSE, $3, $4, $4)",
        )
        .bind(builtin.display_name)
        .bind(builtin.client_id)
        .bind(&redirect_uris)
        .bind(now)
        .execute(tx.as_mut())
        .await?;
        info!(client_id = %builtin.client_id, name = %builtin.display_name, "builtin oauth2 application registered");
    }

    tx.commit().await?;
    Ok(())
}

// =============================================================================
// APPLICATIONS
// =============================================================================

/// Redirect URIs, stored as a JSON array in a text column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RedirectUris(pub Vec<String>);

impl TryFrom<String> for RedirectUris {
    type Error = serde_json::Error;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(&raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct OAuth2Application {
    pub id: i64,
    /// Owner; `0` for instance-wide applications.
    pub uid: i64,
    pub name: String,
    pub client_id: String,
    /// argon2 hash of the current client secret.
    #[serde(skip)]
    pub client_secret: String,
    pub confidential_client: bool,
    pub skip_secondary_authorization: bool,
    #[sqlx(try_from = "String")]
    pub redirect_uris: RedirectUris,
    pub created_unix: i64,
    pub updated_unix: i64,
}

fn normalize_redirect_uri(uri: &str) -> String {
    let lower = uri.to_lowercase();
    match lower.strip_suffix('/') {
        Some(trimmed) => trimmed.to_owned(),
        None => lower,
    }
}

impl OAuth2Application {
    #[must_use]
    pub fn is_builtin(&self) -> bool {
        builtin_application(&self.client_id).is_some()
    }

    /// Whether `redirect_uri` is registered. Matching is exact apart from
    /// case and one trailing slash; public clients may use any port on an
    /// `http` loopback address (RFC 8252 section 7.3).
    #[must_use]
    pub fn contains_redirect_uri(&self, redirect_uri: &str) -> bool {
        let contains = |candidate: &str| {
            let candidate = normalize_redirect_uri(candidate);
            self.redirect_uris
                .0
                .iter()
                .any(|registered| normalize_redirect_uri(registered) == candidate)
        };

        if !self.confidential_client {
            if let Ok(mut parsed) = Url::parse(redirect_uri) {
                let loopback = parsed
                    .host_str()
                    .map(|host| host.trim_start_matches('[').trim_end_matches(']'))
                    .and_then(|host| host.parse::<IpAddr>().ok())
                    .is_some_and(|ip| ip.is_loopback());
                if parsed.scheme() == "http" && loopback && parsed.set_port(None).is_ok() && contains(parsed.as_str()) {
                    return true;
                }
            }
        }
        contains(redirect_uri)
    }

    /// Replace the client secret, returning the new plaintext once.
    ///
    /// # Errors
    ///
    /// Returns a hashing or database error.
    pub async fn generate_client_secret(&mut self, pool: &PgPool) -> Result<String, OAuth2Error> {
        let plaintext = format!("{CLIENT_SECRET_PREFIX}{}", secret::base32_lower(&secret::random_bytes::<32>()));
        let hashed = secret::hash_password(&plaintext)?;
        sqlx::query("UPDATE oauth2_application SET client_secret = $1, updated_unix = $2 WHERE id = $3")
            .bind(&hashed)
            .bind(now_unix())
            .bind(self.id)
            .execute(pool)
            .await?;
        self.client_secret = hashed;
        info!(application_id = self.id, "oauth2 client secret regenerated");
        Ok(plaintext)
    }

    #[must_use]
    pub fn validate_client_secret(&self, candidate: &str) -> bool {
        secret::verify_password(candidate, &self.client_secret)
    }

    /// This user's grant for the application, if any.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub async fn get_grant_by_user_id(&self, pool: &PgPool, user_id: i64) -> Result<Option<OAuth2Grant>, OAuth2Error> {
        let mut query = QueryBuilder::<Postgres>::new(SELECT_GRANT);
        query.push(" WHERE user_id = ").push_bind(user_id);
        query.push(" AND application_id = ").push_bind(self.id);
        Ok(query.build_query_as().fetch_optional(pool).await?)
    }

    /// # Errors
    ///
    /// Returns `AlreadyExist` (via the database) if the user already has a
    /// grant for this application.
    pub async fn create_grant(&self, pool: &PgPool, user_id: i64, scope: &str) -> Result<OAuth2Grant, OAuth2Error> {
        insert_grant(&mut *pool.acquire().await?, self.id, user_id, scope).await
    }
}

async fn insert_grant(
    conn: &mut PgConnection,
    application_id: i64,
    user_id: i64,
    scope: &str,
) -> Result<OAuth2Grant, OAuth2Error> {
    let now = now_unix();
    let mut query = QueryBuilder::<Postgres>::new(
        "INSERT INTO oauth2_grant (user_id, application_id, counter, scope, nonce, created_unix, updated_unix) VALUES (",
    );
    query.push_bind(user_id).push(", ").push_bind(application_id);
    query.push(", 1, ").push_bind(scope).push(", '', ").push_bind(now).push(", ").push_bind(now);
    query.push(") RETURNING id, user_id, application_id, counter, scope, nonce, created_unix, updated_unix");
    let grant: OAuth2Grant = query.build_query_as().fetch_one(conn).await?;
    info!(grant_id = grant.id, user_id, application_id, "oauth2 grant created");
    Ok(grant)
}

#[derive(Debug, Clone, Default)]
pub struct CreateOAuth2ApplicationOptions {
    pub name: String,
    pub user_id: i64,
    pub confidential_client: bool,
    pub skip_secondary_authorization: bool,
    pub redirect_uris: Vec<String>,
}

/// Register a new application with a fresh random client id.
///
/// # Errors
///
/// Returns a database error.
pub async fn create_oauth2_application(
    pool: &PgPool,
    opts: CreateOAuth2ApplicationOptions,
) -> Result<OAuth2Application, OAuth2Error> {
    let client_id = Uuid::new_v4().to_string();
    let redirect_uris = serde_json::to_string(&opts.redirect_uris)?;
    let now = now_unix();

    let (id,): (i64,) = sqlx::query_as(
        r"INSERT INTO oauth2_application
              (uid, name, client_id, confidential_client, skip_secondary_authorization, redirect_uris, created_unix, updated_unix)
          VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
          RETURNING id",
    )
    .bind(opts.user_id)
    .bind(&opts.name)
    .bind(&client_id)
    .bind(opts.confidential_client)
    .bind(opts.skip_secondary_authorization)
    .bind(&redirect_uris)
    .bind(now)
    .fetch_one(pool)
    .await?;

    info!(application_id = id, uid = opts.user_id, client_id = %client_id, "oauth2 application created");
    Ok(OAuth2Application {
        id,
        uid: opts.user_id,
        name: opts.name,
        client_id,
        client_secret: String::new(),
        confidential_client: opts.confidential_client,
        skip_secondary_authorization: opts.skip_secondary_authorization,
        redirect_uris: RedirectUris(opts.redirect_uris),
        created_unix: now,
        updated_unix: now,
    })
}

/// # Errors
///
/// Returns `ClientIdInvalid` if no application has this client id.
pub async fn get_oauth2_application_by_client_id(
    pool: &PgPool,
    client_id: &str,
) -> Result<OAuth2Application, OAuth2Error> {
    let mut query = QueryBuilder::<Postgres>::new(SELECT_APPLICATION);
    query.push(" WHERE client_id = ").push_bind(client_id);
    query
        .build_query_as()
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| OAuth2Error::ClientIdInvalid(client_id.to_owned()))
}

async fn fetch_application(conn: &mut PgConnection, id: i64) -> Result<OAuth2Application, OAuth2Error> {
    let mut query = QueryBuilder::<Postgres>::new(SELECT_APPLICATION);
    query.push(" WHERE id = ").push_bind(id);
    query
        .build_query_as()
        .fetch_optional(conn)
        .await?
        .ok_or(OAuth2Error::ApplicationNotFound(id))
}

/// # Errors
///
/// Returns `ApplicationNotFound` if the id is unknown.
pub async fn get_oauth2_application_by_id(pool: &PgPool, id: i64) -> Result<OAuth2Application, OAuth2Error> {
    fetch_application(&mut *pool.acquire().await?, id).await
}

/// Applications owned by `uid`, newest first.
///
/// # Errors
///
/// Returns a database error.
pub async fn list_oauth2_applications_by_uid(
    pool: &PgPool,
    uid: i64,
    list: ListOptions,
) -> Result<Vec<OAuth2Application>, OAuth2Error> {
    let mut query = QueryBuilder::<Postgres>::new(SELECT_APPLICATION);
    query.push(" WHERE uid = ").push_bind(uid).push(" ORDER BY id DESC");
    list.push_limit(&mut query);
    Ok(query.build_query_as().fetch_all(pool).await?)
}

#[derive(Debug, Clone, Default)]
pub struct UpdateOAuth2ApplicationOptions {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub confidential_client: bool,
    pub skip_secondary_authorization: bool,
    pub redirect_uris: Vec<String>,
}

/// Update an application owned by `opts.user_id`. The returned row has its
/// secret hash cleared.
///
/// # Errors
///
/// Returns `ApplicationNotFound`, `UidMismatch`, `ApplicationLocked` for a
/// builtin, or a database error.
pub async fn update_oauth2_application(
    pool: &PgPool,
    opts: UpdateOAuth2ApplicationOptions,
) -> Result<OAuth2Application, OAuth2Error> {
    let mut tx = pool.begin().await?;
    let mut app = fetch_application(tx.as_mut(), opts.id).await?;
    if app.uid != opts.user_id {
        return Err(OAuth2Error::UidMismatch);
    }
    if app.is_builtin() {
        return Err(OAuth2Error::ApplicationLocked(app.client_id));
    }

    app.name = opts.name;
    app.redirect_uris = RedirectUris(opts.redirect_uris);
    app.confidential_client = opts.confidential_client;
    app.skip_secondary_authorization = opts.skip_secondary_authorization;
    app.updated_unix = now_unix();

    sqlx::query(
        r"UPDATE oauth2_application
          SET name = $1, redirect_uris = $2, confidential_client = $3, skip_secondary_authorization = $4, updated_unix = $5
          WHERE id = $6",
    )
    .bind(&app.name)
    .bind(serde_json::to_string(&app.redirect_uris)?)
    .bind(app.confidential_client)
    .bind(app.skip_secondary_authorization)
    .bind(app.updated_unix)
    .bind(app.id)
    .execute(tx.as_mut())
    .await?;
    tx.commit().await?;

    app.client_secret.clear();
    Ok(app)
}

async fn delete_application_cascade(conn: &mut PgConnection, id: i64, uid: i64) -> Result<(), OAuth2Error> {
    let deleted = sqlx::query("DELETE FROM oauth2_application WHERE id = $1 AND uid = $2")
        .bind(id)
        .bind(uid)
        .execute(&mut *conn)
        .await?;
    if deleted.rows_affected() == 0 {
        return Err(OAuth2Error::ApplicationNotFound(id));
    }
    sqlx::query(
        "DELETE FROM oauth2_authorization_code WHERE grant_id IN (SELECT id FROM oauth2_grant WHERE application_id = $1)",
    )
    .bind(id)
    .execute(&mut *conn)
    .await?;
    sqlx::query("DELETE FROM oauth2_device_code WHERE application_id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM oauth2_grant WHERE application_id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Delete application `id` owned by `uid` with its grants and codes.
///
/// # Errors
///
/// Returns `ApplicationNotFound` (also when owned by someone else),
/// `ApplicationLocked` for a builtin, or a database error.
pub async fn delete_oauth2_application(pool: &PgPool, id: i64, uid: i64) -> Result<(), OAuth2Error> {
    let mut tx = pool.begin().await?;
    let app = fetch_application(tx.as_mut(), id).await?;
    if app.is_builtin() {
        return Err(OAuth2Error::ApplicationLocked(app.client_id));
    }
    delete_application_cascade(tx.as_mut(), id, uid).await?;
    tx.commit().await?;
    info!(application_id = id, uid, "oauth2 application deleted");
    Ok(())
}

// =============================================================================
// GRANTS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct OAuth2Grant {
    pub id: i64,
    pub user_id: i64,
    pub application_id: i64,
    pub counter: i64,
    /// Space-separated scopes.
    pub scope: String,
    pub nonce: String,
    pub created_unix: i64,
    pub updated_unix: i64,
}

impl OAuth2Grant {
    #[must_use]
    pub fn scope_contains(&self, scope: &str) -> bool {
        self.scope.split(' ').any(|s| s == scope)
    }

    /// Bump the refresh counter and reload it.
    ///
    /// # Errors
    ///
    /// Returns `GrantNotFound` if the grant is gone, or a database error.
    pub async fn increase_counter(&mut self, pool: &PgPool) -> Result<(), OAuth2Error> {
        let now = now_unix();
        let row: Option<(i64,)> = sqlx::query_as(
            "UPDATE oauth2_grant SET counter = counter + 1, updated_unix = $1 WHERE id = $2 RETURNING counter",
        )
        .bind(now)
        .bind(self.id)
        .fetch_optional(pool)
        .await?;
        let (counter,) = row.ok_or(OAuth2Error::GrantNotFound(self.id))?;
        self.counter = counter;
        self.updated_unix = now;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns a database error.
    pub async fn set_nonce(&mut self, pool: &PgPool, nonce: &str) -> Result<(), OAuth2Error> {
        sqlx::query("UPDATE oauth2_grant SET nonce = $1 WHERE id = $2")
            .bind(nonce)
            .bind(self.id)
            .execute(pool)
            .await?;
        nonce.clone_into(&mut self.nonce);
        Ok(())
    }

    /// Mint a single-use authorization code valid for `lifetime_secs`.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub async fn generate_new_authorization_code(
        &self,
        pool: &PgPool,
        redirect_uri: &str,
        code_challenge: &str,
        code_challenge_method: &str,
        lifetime_secs: i64,
    ) -> Result<OAuth2AuthorizationCode, OAuth2Error> {
        let code = format!("{AUTHORIZATION_CODE_PREFIX}{}", secret::base32_lower(&secret::random_bytes::<32>()));
        let valid_until = now_unix() + lifetime_secs;
        let (id,): (i64,) = sqlx::query_as(
            r"INSERT INTO oauth2_authorization_code (grant_id, code, code_challenge, code_challenge_method, redirect_uri, valid_until)
              VALUES ($1, $2, $3, $4, $5, $6)
              RETURNING id",
        )
        .bind(self.id)
        .bind(&code)
        .bind(code_challenge)
        .bind(code_challenge_method)
        .bind(redirect_uri)
        .bind(valid_until)
        .fetch_one(pool)
        .await?;

        Ok(OAuth2AuthorizationCode {
            id,
            grant_id: self.id,
            code,
            code_challenge: code_challenge.to_owned(),
            code_challenge_method: code_challenge_method.to_owned(),
            redirect_uri: redirect_uri.to_owned(),
            valid_until,
            grant: Some(self.clone()),
        })
    }
}

pub(crate) async fn fetch_grant(conn: &mut PgConnection, id: i64) -> Result<Option<OAuth2Grant>, sqlx::Error> {
    let mut query = QueryBuilder::<Postgres>::new(SELECT_GRANT);
    query.push(" WHERE id = ").push_bind(id);
    query.build_query_as().fetch_optional(conn).await
}

pub(crate) async fn fetch_grant_by_user_and_app(
    conn: &mut PgConnection,
    user_id: i64,
    application_id: i64,
) -> Result<Option<OAuth2Grant>, sqlx::Error> {
    let mut query = QueryBuilder::<Postgres>::new(SELECT_GRANT);
    query.push(" WHERE user_id = ").push_bind(user_id);
    query.push(" AND application_id = ").push_bind(application_id);
    query.build_query_as().fetch_optional(conn).await
}

pub(crate) async fn upsert_grant(
    conn: &mut PgConnection,
    application_id: i64,
    user_id: i64,
    scope: &str,
) -> Result<OAuth2Grant, OAuth2Error> {
    let Some(mut grant) = fetch_grant_by_user_and_app(&mut *conn, user_id, application_id).await? else {
        return insert_grant(conn, application_id, user_id, scope).await;
    };
    if grant.scope != scope {
        grant.updated_unix = now_unix();
        sqlx::query("UPDATE oauth2_grant SET scope = $1, updated_unix = $2 WHERE id = $3")
            .bind(scope)
            .bind(grant.updated_unix)
            .bind(grant.id)
            .execute(conn)
            .await?;
        scope.clone_into(&mut grant.scope);
    }
    Ok(grant)
}

/// # Errors
///
/// Returns a database error.
pub async fn get_oauth2_grant_by_id(pool: &PgPool, id: i64) -> Result<Option<OAuth2Grant>, OAuth2Error> {
    Ok(fetch_grant(&mut *pool.acquire().await?, id).await?)
}

/// A grant together with the application it was given to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrantWithApplication {
    #[serde(flatten)]
    pub grant: OAuth2Grant,
    pub application: OAuth2Application,
}

fn grant_with_application_from_row(row: &PgRow) -> Result<GrantWithApplication, OAuth2Error> {
    let redirect_uris: String = row.try_get("app_redirect_uris")?;
    Ok(GrantWithApplication {
        grant: OAuth2Grant {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            application_id: row.try_get("application_id")?,
            counter: row.try_get("counter")?,
            scope: row.try_get("scope")?,
            nonce: row.try_get("nonce")?,
            created_unix: row.try_get("created_unix")?,
            updated_unix: row.try_get("updated_unix")?,
        },
        application: OAuth2Application {
            id: row.try_get("app_id")?,
            uid: row.try_get("app_uid")?,
            name: row.try_get("app_name")?,
            client_id: row.try_get("app_client_id")?,
            client_secret: String::new(),
            confidential_client: row.try_get("app_confidential_client")?,
            skip_secondary_authorization: row.try_get("app_skip_secondary_authorization")?,
            redirect_uris: RedirectUris::try_from(redirect_uris)?,
            created_unix: row.try_get("app_created_unix")?,
            updated_unix: row.try_get("app_updated_unix")?,
        },
    })
}

/// Every grant of `user_id`, joined with its application.
///
/// # Errors
///
/// Returns a database or decoding error.
pub async fn list_oauth2_grants_by_user_id(pool: &PgPool, user_id: i64) -> Result<Vec<GrantWithApplication>, OAuth2Error> {
    let rows = sqlx::query(
        r"SELECT
              g.id, g.user_id, g.application_id, g.counter, g.scope, g.nonce, g.created_unix, g.updated_unix,
              a.id AS app_id, a.uid AS app_uid, a.name AS app_name, a.client_id AS app_client_id,
              a.confidential_client AS app_confidential_client,
              a.skip_secondary_authorization AS app_skip_secondary_authorization,
              a.redirect_uris AS app_redirect_uris,
              a.created_unix AS app_created_unix, a.updated_unix AS app_updated_unix
          FROM oauth2_grant g
          INNER JOIN oauth2_application a ON a.id = g.application_id
          WHERE g.user_id = $1
          ORDER BY g.id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(grant_with_application_from_row).collect()
}

/// Revoke grant `grant_id` of `user_id` and its outstanding codes.
///
/// # Errors
///
/// Returns `GrantNotFound` if the user has no such grant, or a database error.
pub async fn revoke_oauth2_grant(pool: &PgPool, grant_id: i64, user_id: i64) -> Result<(), OAuth2Error> {
    let mut tx = pool.begin().await?;
    let deleted = sqlx::query("DELETE FROM oauth2_grant WHERE id = $1 AND user_id = $2")
        .bind(grant_id)
        .bind(user_id)
        .execute(tx.as_mut())
        .await?;
    if deleted.rows_affected() == 0 {
        return Err(OAuth2Error::GrantNotFound(grant_id));
    }
    sqlx::query("DELETE FROM oauth2_authorization_code WHERE grant_id = $1")
        .bind(grant_id)
        .execute(tx.as_mut())
        .await?;
    tx.commit().await?;
    info!(grant_id, user_id, "oauth2 grant revoked");
    Ok(())
}

// =============================================================================
// AUTHORIZATION CODES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct OAuth2AuthorizationCode {
    pub id: i64,
    pub grant_id: i64,
    #[serde(skip)]
    pub code: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
    pub redirect_uri: String,
    pub valid_until: i64,
    #[sqlx(skip)]
    #[serde(skip)]
    pub grant: Option<OAuth2Grant>,
}

impl OAuth2AuthorizationCode {
    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        self.valid_until < now
    }

    /// Redirect target carrying `code` and, when non-empty, `state`. Existing
    /// query parameters are kept; the query is re-encoded sorted by key.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRedirectUri` if the stored URI does not parse.
    pub fn generate_redirect_uri(&self, state: &str) -> Result<Url, OAuth2Error> {
        let mut redirect =
            Url::parse(&self.redirect_uri).map_err(|e| OAuth2Error::InvalidRedirectUri(format!("{}: {e}", self.redirect_uri)))?;

        let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (key, value) in redirect.query_pairs() {
            params.entry(key.into_owned()).or_default().push(value.into_owned());
        }
        if !state.is_empty() {
            params.insert("state".to_owned(), vec![state.to_owned()]);
        }
        params.insert("code".to_owned(), vec![self.code.clone()]);

        redirect.query_pairs_mut().clear().extend_pairs(
            params
                .iter()
                .flat_map(|(key, values)| values.iter().map(move |value| (key.as_str(), value.as_str()))),
        );
        Ok(redirect)
    }

    /// Delete the code so it cannot be exchanged again.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub async fn invalidate(&self, pool: &PgPool) -> Result<(), OAuth2Error> {
        sqlx::query("DELETE FROM oauth2_authorization_code WHERE id = $1")
            .bind(self.id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// PKCE verifier check (RFC 7636 section 4.6). No method means no PKCE.
    #[must_use]
    pub fn validate_code_challenge(&self, verifier: &str) -> bool {
        match self.code_challenge_method.as_str() {
            "S256" => {
                let hashed = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
                secret::constant_time_eq(&hashed, &self.code_challenge)
            }
            "plain" => secret::constant_time_eq(verifier, &self.code_challenge),
            "" => true,
            _ => false,
        }
    }
}

/// The authorization code with its grant, or `None` if either is missing.
///
/// # Errors
///
/// Returns a database error.
pub async fn get_oauth2_authorization_by_code(
    pool: &PgPool,
    code: &str,
) -> Result<Option<OAuth2AuthorizationCode>, OAuth2Error> {
    let mut conn = pool.acquire().await?;
    let mut query = QueryBuilder::<Postgres>::new(SELECT_CODE);
    query.push(" WHERE code = ").push_bind(code);
    let Some(mut auth) = query.build_query_as::<OAuth2AuthorizationCode>().fetch_optional(&mut *conn).await? else {
        return Ok(None);
    };
    let Some(grant) = fetch_grant(&mut conn, auth.grant_id).await? else {
        return Ok(None);
    };
    auth.grant = Some(grant);
    Ok(Some(auth))
}

/// Remove codes past `valid_until`. Returns the number removed.
///
/// # Errors
///
/// Returns a database error.
pub async fn delete_expired_authorization_codes(pool: &PgPool, now: i64) -> Result<u64, OAuth2Error> {
    let result = sqlx::query("DELETE FROM oauth2_authorization_code WHERE valid_until < $1")
        .bind(now)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

// =============================================================================
// USER CLEANUP / SOURCES
// =============================================================================

/// Remove every OAuth2 artifact tied to `user_id`: their grants and codes,
/// their applications, and anything other users granted those applications.
///
/// # Errors
///
/// Returns a database error.
pub async fn delete_oauth2_relicts_by_user_id(conn: &mut PgConnection, user_id: i64) -> Result<(), OAuth2Error> {
    sqlx::query(
        r"DELETE FROM oauth2_authorization_code WHERE grant_id IN (
              SELECT id FROM oauth2_grant
              WHERE user_id = $1 OR application_id IN (SELECT id FROM oauth2_application WHERE uid = $1)
          )",
    )
    .bind(user_id)
    .execute(&mut *conn)
    .await?;
    sqlx::query(
        "DELETE FROM oauth2_device_code WHERE user_id = $1 OR application_id IN (SELECT id FROM oauth2_application WHERE uid = $1)",
    )
    .bind(user_id)
    .execute(&mut *conn)
    .await?;
    sqlx::query(
        "DELETE FROM oauth2_grant WHERE user_id = $1 OR application_id IN (SELECT id FROM oauth2_application WHERE uid = $1)",
    )
    .bind(user_id)
    .execute(&mut *conn)
    .await?;
    sqlx::query("DELETE FROM oauth2_application WHERE uid = $1 AND uid <> 0")
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// The active OAuth2 login source called `name`.
///
/// # Errors
///
/// Returns `SourceNotFound` if there is no active OAuth2 source by that name.
pub async fn get_active_oauth2_source_by_name(pool: &PgPool, name: &str) -> Result<Source, OAuth2Error> {
    auth_source::find_active_source(pool, name, SourceType::OAuth2)
        .await?
        .ok_or_else(|| OAuth2Error::SourceNotFound(name.to_owned()))
}

#[cfg(test)]
#[path = "oauth2_test.rs"]
mod tests;
