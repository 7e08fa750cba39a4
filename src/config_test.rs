use std::collections::HashMap;

use super::*;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    move |key: &str| map.get(key).cloned()
}

// =============================================================================
// AppConfig::from_lookup
// =============================================================================

#[test]
fn missing_database_url_is_an_error() {
    let err = AppConfig::from_lookup(lookup_from(&[])).unwrap_err();
    assert!(err.to_string().contains("DATABASE_URL"));
}

#[test]
fn blank_database_url_is_an_error() {
    assert!(AppConfig::from_lookup(lookup_from(&[("DATABASE_URL", "  ")])).is_err());
}

#[test]
fn defaults_apply_when_only_database_url_is_set() {
    let cfg = AppConfig::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://localhost/forge")])).unwrap();
    assert_eq!(cfg.database_url, "postgres://localhost/forge");
    assert_eq!(cfg.port, DEFAULT_PORT);
    assert_eq!(cfg.db_max_connections, DEFAULT_DB_MAX_CONNECTIONS);
    assert_eq!(cfg.successful_tokens_cache_size, DEFAULT_SUCCESSFUL_TOKENS_CACHE_SIZE);
    assert_eq!(cfg.oauth2_default_applications, vec!["git-credential-oauth", "git-credential-manager", "tea"]);
    assert!(!cfg.register_email_confirm);
    assert_eq!(cfg.email_domains, EmailDomainPolicy::default());
    assert_eq!(cfg.session_max_lifetime_secs, DEFAULT_SESSION_MAX_LIFETIME_SECS);
    assert_eq!(cfg.device_poll_interval_secs, DEFAULT_DEVICE_POLL_INTERVAL_SECS);
}

#[test]
fn overrides_are_parsed() {
    let cfg = AppConfig::from_lookup(lookup_from(&[
        ("DATABASE_URL", "postgres://db"),
        ("PORT", "8080"),
        ("SUCCESSFUL_TOKENS_CACHE_SIZE", "0"),
        ("OAUTH2_DEFAULT_APPLICATIONS", "tea, ,git-credential-oauth"),
        ("REGISTER_EMAIL_CONFIRM", "Yes"),
        ("EMAIL_DOMAIN_BLOCKLIST", "spam.example,*.junk.test"),
        ("DEVICE_CODE_LIFETIME_SECS", "120"),
    ]))
    .unwrap();
    assert_eq!(cfg.port, 8080);
    assert_eq!(cfg.successful_tokens_cache_size, 0);
    assert_eq!(cfg.oauth2_default_applications, vec!["tea", "git-credential-oauth"]);
    assert!(cfg.register_email_confirm);
    assert_eq!(cfg.email_domains.block_list, vec!["spam.example", "*.junk.test"]);
    assert_eq!(cfg.device_code_lifetime_secs, 120);
}

#[test]
fn empty_application_list_disables_builtins() {
    let cfg = AppConfig::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://db"), ("OAUTH2_DEFAULT_APPLICATIONS", "")]))
        .unwrap();
    assert!(cfg.oauth2_default_applications.is_empty());
}

#[test]
fn unparsable_numbers_fall_back_to_defaults() {
    let cfg = AppConfig::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://db"), ("PORT", "eighty")])).unwrap();
    assert_eq!(cfg.port, DEFAULT_PORT);
}

// =============================================================================
// parse_bool
// =============================================================================

#[test]
fn parse_bool_variants() {
    for raw in ["1", "true", "YES", " on "] {
        assert_eq!(parse_bool(raw), Some(true), "{raw:?}");
    }
    for raw in ["0", "False", "no", "OFF"] {
        assert_eq!(parse_bool(raw), Some(false), "{raw:?}");
    }
    assert_eq!(parse_bool("maybe"), None);
    assert_eq!(parse_bool(""), None);
}

// =============================================================================
// EmailDomainPolicy
// =============================================================================

#[test]
fn empty_policy_allows_everything() {
    assert!(EmailDomainPolicy::default().is_allowed("user@anything.test"));
}

#[test]
fn block_list_rejects_exact_and_glob_domains() {
    let policy = EmailDomainPolicy {
        allow_list: vec![],
        block_list: vec!["spam.example".into(), "*.junk.test".into()],
    };
    assert!(!policy.is_allowed("a@spam.example"));
    assert!(!policy.is_allowed("a@SPAM.example"));
    assert!(!policy.is_allowed("a@mail.junk.test"));
    assert!(policy.is_allowed("a@junk.test"));
    assert!(policy.is_allowed("a@example.org"));
}

#[test]
fn allow_list_wins_over_block_list() {
    let policy = EmailDomainPolicy {
        allow_list: vec!["corp.example".into()],
        block_list: vec!["corp.example".into()],
    };
    assert!(policy.is_allowed("dev@corp.example"));
    assert!(!policy.is_allowed("dev@other.example"));
}

#[test]
fn address_without_domain_is_never_listed() {
    assert!(!is_domain_listed(&["example.com".into()], "no-at-sign"));
}
