//! Application configuration parsed from environment variables.
//!
//! Every knob has a typed default; only `DATABASE_URL` is required. Values
//! that fail to parse fall back to their default rather than aborting.

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_SUCCESSFUL_TOKENS_CACHE_SIZE: usize = 20;
pub const DEFAULT_SESSION_MAX_LIFETIME_SECS: i64 = 86_400;
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 600;
pub const DEFAULT_AUTHORIZATION_CODE_LIFETIME_SECS: i64 = 600;
pub const DEFAULT_DEVICE_CODE_LIFETIME_SECS: i64 = 900;
pub const DEFAULT_DEVICE_POLL_INTERVAL_SECS: i64 = 5;
pub const DEFAULT_OAUTH2_APPLICATIONS: &[&str] = &["git-credential-oauth", "git-credential-manager", "tea"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
}

/// Which email domains may register.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailDomainPolicy {
    /// When non-empty, only these domains are accepted.
    pub allow_list: Vec<String>,
    /// Consulted only when `allow_list` is empty.
    pub block_list: Vec<String>,
}

impl EmailDomainPolicy {
    /// Whether the domain part of `email` passes the policy.
    #[must_use]
    pub fn is_allowed(&self, email: &str) -> bool {
        if self.allow_list.is_empty() {
            return !is_domain_listed(&self.block_list, email);
        }
        is_domain_listed(&self.allow_list, email)
    }
}

/// Match the domain of `email` against a list of domains or `*.suffix` globs.
#[must_use]
pub fn is_domain_listed(list: &[String], email: &str) -> bool {
    let Some((_, domain)) = email.rsplit_once('@') else {
        return false;
    };
    let domain = domain.to_ascii_lowercase();
    list.iter().any(|entry| {
        let entry = entry.trim().to_ascii_lowercase();
        match entry.strip_prefix("*.") {
            Some(suffix) => domain.len() > suffix.len() && domain.ends_with(&format!(".{suffix}")),
            None => entry == domain,
        }
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub db_max_connections: u32,
    /// Capacity of the successful access-token lookup cache; `0` disables it.
    pub successful_tokens_cache_size: usize,
    /// Builtin OAuth2 applications (by config name) to keep registered.
    pub oauth2_default_applications: Vec<String>,
    /// New accounts start inactive and only activated emails count as taken.
    pub register_email_confirm: bool,
    pub email_domains: EmailDomainPolicy,
    pub session_max_lifetime_secs: i64,
    pub cleanup_interval_secs: u64,
    pub authorization_code_lifetime_secs: i64,
    pub device_code_lifetime_secs: i64,
    pub device_poll_interval_secs: i64,
}

impl AppConfig {
    /// Build config from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if `DATABASE_URL` is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if `DATABASE_URL` is missing.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let oauth2_default_applications = lookup("OAUTH2_DEFAULT_APPLICATIONS").map_or_else(
            || DEFAULT_OAUTH2_APPLICATIONS.iter().map(|s| (*s).to_owned()).collect(),
            |raw| parse_list(&raw),
        );

        Ok(Self {
            database_url,
            port: parse_or(&lookup, "PORT", DEFAULT_PORT),
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS),
            successful_tokens_cache_size: parse_or(
                &lookup,
                "SUCCESSFUL_TOKENS_CACHE_SIZE",
                DEFAULT_SUCCESSFUL_TOKENS_CACHE_SIZE,
            ),
            oauth2_default_applications,
            register_email_confirm: lookup("REGISTER_EMAIL_CONFIRM")
                .as_deref()
                .and_then(parse_bool)
                .unwrap_or(false),
            email_domains: EmailDomainPolicy {
                allow_list: lookup("EMAIL_DOMAIN_ALLOWLIST").map(|raw| parse_list(&raw)).unwrap_or_default(),
                block_list: lookup("EMAIL_DOMAIN_BLOCKLIST").map(|raw| parse_list(&raw)).unwrap_or_default(),
            },
            session_max_lifetime_secs: parse_or(&lookup, "SESSION_MAX_LIFETIME_SECS", DEFAULT_SESSION_MAX_LIFETIME_SECS),
            cleanup_interval_secs: parse_or(&lookup, "CLEANUP_INTERVAL_SECS", DEFAULT_CLEANUP_INTERVAL_SECS),
            authorization_code_lifetime_secs: parse_or(
                &lookup,
                "AUTHORIZATION_CODE_LIFETIME_SECS",
                DEFAULT_AUTHORIZATION_CODE_LIFETIME_SECS,
            ),
            device_code_lifetime_secs: parse_or(&lookup, "DEVICE_CODE_LIFETIME_SECS", DEFAULT_DEVICE_CODE_LIFETIME_SECS),
            device_poll_interval_secs: parse_or(&lookup, "DEVICE_POLL_INTERVAL_SECS", DEFAULT_DEVICE_POLL_INTERVAL_SECS),
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
