use super::*;

fn app(confidential: bool, uris: &[&str]) -> OAuth2Application {
    OAuth2Application {
        id: 1,
        uid: 1,
        name: "app".into(),
        client_id: "client".into(),
        client_secret: String::new(),
        confidential_client: confidential,
        skip_secondary_authorization: false,
        redirect_uris: RedirectUris(uris.iter().map(|s| (*s).to_owned()).collect()),
        created_unix: 0,
        updated_unix: 0,
    }
}

fn code(method: &str, challenge: &str, redirect_uri: &str) -> OAuth2AuthorizationCode {
    OAuth2AuthorizationCode {
        id: 1,
        grant_id: 1,
        code: "gta_abc".into(),
        code_challenge: challenge.into(),
        code_challenge_method: method.into(),
        redirect_uri: redirect_uri.into(),
        valid_until: 100,
        grant: None,
    }
}

const VERIFIER: &str = "N1Ofz7fKbC2GGAPDv1pT0oB-C2Jz7-Xv6JjvZ2VjY8E";
const S256_CHALLENGE: &str = "EsiVbLaGwWE5HxqrXxfMskqeMRASHl265IeRoX69rlc";

// =============================================================================
// redirect uris
// =============================================================================

#[test]
fn redirect_uri_match_ignores_case_and_trailing_slash() {
    let app = app(true, &["https://Example.com/cb/"]);
    assert!(app.contains_redirect_uri("https://example.com/cb"));
    assert!(app.contains_redirect_uri("https://EXAMPLE.com/cb/"));
    assert!(!app.contains_redirect_uri("https://example.com/cb/other"));
    assert!(!app.contains_redirect_uri("https://example.com"));
}

#[test]
fn public_client_may_use_any_loopback_port() {
    let public = app(false, &["http://127.0.0.1", "http://[::1]/cb"]);
    assert!(public.contains_redirect_uri("http://127.0.0.1:3456"));
    assert!(public.contains_redirect_uri("http://127.0.0.1:3456/"));
    assert!(public.contains_redirect_uri("http://[::1]:9000/cb"));
    assert!(!public.contains_redirect_uri("http://localhost:3456"));
    assert!(!public.contains_redirect_uri("https://127.0.0.1:3456"));
}

#[test]
fn confidential_client_port_must_match() {
    let confidential = app(true, &["http://127.0.0.1"]);
    assert!(!confidential.contains_redirect_uri("http://127.0.0.1:3456"));
    assert!(confidential.contains_redirect_uri("http://127.0.0.1"));
}

#[test]
fn redirect_uris_decode_from_json_text() {
    let uris = RedirectUris::try_from(r#"["a","b"]"#.to_owned()).unwrap();
    assert_eq!(uris.0, vec!["a", "b"]);
    assert!(RedirectUris::try_from(String::new()).unwrap().0.is_empty());
    assert!(RedirectUris::try_from("not json".to_owned()).is_err());
}

// =============================================================================
// builtins
// =============================================================================

#[test]
fn builtin_lookup_by_client_id() {
    let tea = builtin_application("d57cb8c4-630c-4168-8324-ec79935e18d4").unwrap();
    assert_eq!(tea.config_name, "tea");
    assert!(builtin_application("da7da3ba-9a13-4167-856f-3899de0b0138").is_none());

    let mut gcm = app(false, &[]);
    gcm.client_id = "e90ee53c-94e2-48ac-9358-a874fb9e0662".into();
    assert!(gcm.is_builtin());
}

#[test]
fn builtin_names_resolve_or_fail() {
    let ids = resolve_builtin_client_ids(&["tea".into(), "git-credential-oauth".into()]).unwrap();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains("a4792ccc-144e-407e-86c9-5e7d8d9c3269"));

    let err = resolve_builtin_client_ids(&["tea".into(), "nope".into()]).unwrap_err();
    assert!(matches!(err, OAuth2Error::UnknownBuiltinApplication(ref name) if name == "nope"));
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

// =============================================================================
// grants and codes
// =============================================================================

#[test]
fn grant_scope_is_space_separated() {
    let grant = OAuth2Grant {
        id: 1,
        user_id: 1,
        application_id: 1,
        counter: 1,
        scope: "openid profile".into(),
        nonce: String::new(),
        created_unix: 0,
        updated_unix: 0,
    };
    assert!(grant.scope_contains("openid"));
    assert!(grant.scope_contains("profile"));
    assert!(!grant.scope_contains("email"));
    assert!(!grant.scope_contains("open"));
}

#[test]
fn code_challenge_methods() {
    assert!(code("S256", S256_CHALLENGE, "").validate_code_challenge(VERIFIER));
    assert!(!code("S256", S256_CHALLENGE, "").validate_code_challenge("wrong"));
    assert!(code("plain", "verifier", "").validate_code_challenge("verifier"));
    assert!(!code("plain", "verifier", "").validate_code_challenge("other"));
    assert!(code("", "", "").validate_code_challenge("anything"));
    assert!(!code("S512", "x", "").validate_code_challenge("x"));
}

#[test]
fn code_expiry_is_strict() {
    let c = code("", "", "");
    assert!(!c.is_expired(100));
    assert!(c.is_expired(101));
}

#[test]
fn redirect_uri_carries_code_and_state() {
    let url = code("", "", "https://example.com/callback").generate_redirect_uri("xyz").unwrap();
    assert_eq!(url.as_str(), "https://example.com/callback?code=gta_abc&state=xyz");
}

#[test]
fn redirect_uri_keeps_existing_query_and_omits_empty_state() {
    let url = code("", "", "https://example.com/cb?z=1&a=2").generate_redirect_uri("").unwrap();
    assert_eq!(url.as_str(), "https://example.com/cb?a=2&code=gta_abc&z=1");

    let replaced = code("", "", "https://example.com/cb?state=old").generate_redirect_uri("new").unwrap();
    assert_eq!(replaced.as_str(), "https://example.com/cb?code=gta_abc&state=new");
}

#[test]
fn unparsable_redirect_uri_is_an_error() {
    let err = code("", "", "not a url").generate_redirect_uri("s").unwrap_err();
    assert!(matches!(err, OAuth2Error::InvalidRedirectUri(_)));
}

#[test]
fn serialized_application_hides_secret() {
    let mut a = app(true, &["https://example.com"]);
    a.client_secret = "hash".into();
    let json = serde_json::to_value(&a).unwrap();
    assert!(json.get("client_secret").is_none());
    assert_eq!(json["redirect_uris"][0], "https://example.com");
}

#[test]
fn error_kinds() {
    assert!(OAuth2Error::ClientIdInvalid("x".into()).is_not_exist());
    assert!(OAuth2Error::GrantNotFound(1).is_not_exist());
    assert_eq!(OAuth2Error::UidMismatch.kind(), ErrorKind::PermissionDenied);
    assert_eq!(OAuth2Error::ApplicationLocked("x".into()).kind(), ErrorKind::PermissionDenied);
    assert_eq!(OAuth2Error::SourceNotFound("gh".into()).error_code(), "E_OAUTH2_SOURCE_NOT_FOUND");
}

// =============================================================================
// live database
// =============================================================================

#[cfg(feature = "live-db-tests")]
const FIXTURE_CLIENT_ID: &str = "da7da3ba-9a13-4167-856f-3899de0b0138";

#[cfg(feature = "live-db-tests")]
#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL/live Postgres"]
async fn builtin_applications_follow_configuration() {
    let (pool, _guard) = crate::db::testing::prepare_test_db().await;

    init_builtin_applications(&pool, &["tea".into(), "git-credential-oauth".into()]).await.expect("init");
    let tea = get_oauth2_application_by_client_id(&pool, "d57cb8c4-630c-4168-8324-ec79935e18d4").await.expect("tea");
    assert_eq!(tea.uid, 0);
    assert!(!tea.confidential_client);
    assert!(tea.contains_redirect_uri("http://127.0.0.1:41234/"));

    // A grant on a builtin goes away together with the application.
    tea.create_grant(&pool, 1, "openid").await.expect("grant");

    init_builtin_applications(&pool, &["git-credential-oauth".into()]).await.expect("shrink");
    assert!(
        get_oauth2_application_by_client_id(&pool, "d57cb8c4-630c-4168-8324-ec79935e18d4")
            .await
            .unwrap_err()
            .is_not_exist()
    );
    assert_eq!(
        crate::db::fixtures::count_rows(&pool, "oauth2_grant", Some(("application_id", tea.id))).await.expect("count"),
        0
    );

    // Idempotent.
    init_builtin_applications(&pool, &["git-credential-oauth".into()]).await.expect("again");
    assert!(init_builtin_applications(&pool, &["bogus".into()]).await.is_err());
}

#[cfg(feature = "live-db-tests")]
#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL/live Postgres"]
async fn application_lifecycle_and_secret() {
    let (pool, _guard) = crate::db::testing::prepare_test_db().await;

    let mut created = create_oauth2_application(
        &pool,
        CreateOAuth2ApplicationOptions {
            name: "CI".into(),
            user_id: 2,
            confidential_client: true,
            redirect_uris: vec!["https://ci.example.com/cb".into()],
            ..Default::default()
        },
    )
    .await
    .expect("create");
    assert!(Uuid::parse_str(&created.client_id).is_ok());

    let plaintext = created.generate_client_secret(&pool).await.expect("secret");
    assert!(plaintext.starts_with("gto_"));
    let stored = get_oauth2_application_by_id(&pool, created.id).await.expect("by id");
    assert!(stored.validate_client_secret(&plaintext));
    assert!(!stored.validate_client_secret("gto_wrong"));

    let listed = list_oauth2_applications_by_uid(&pool, 2, ListOptions::default()).await.expect("list");
    assert_eq!(listed.len(), 2);

    let denied = update_oauth2_application(
        &pool,
        UpdateOAuth2ApplicationOptions { id: created.id, user_id: 1, name: "x".into(), ..Default::default() },
    )
    .await
    .unwrap_err();
    assert!(matches!(denied, OAuth2Error::UidMismatch));

    let updated = update_oauth2_application(
        &pool,
        UpdateOAuth2ApplicationOptions {
            id: created.id,
            user_id: 2,
            name: "CI 2".into(),
            confidential_client: false,
            skip_secondary_authorization: true,
            redirect_uris: vec!["http://127.0.0.1/cb".into()],
        },
    )
    .await
    .expect("update");
    assert_eq!(updated.name, "CI 2");
    assert!(updated.client_secret.is_empty());
    assert!(updated.contains_redirect_uri("http://127.0.0.1:8080/cb"));

    assert!(delete_oauth2_application(&pool, created.id, 1).await.unwrap_err().is_not_exist());
    delete_oauth2_application(&pool, created.id, 2).await.expect("delete");
    assert!(get_oauth2_application_by_id(&pool, created.id).await.unwrap_err().is_not_exist());
}

#[cfg(feature = "live-db-tests")]
#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL/live Postgres"]
async fn builtin_application_is_locked() {
    let (pool, _guard) = crate::db::testing::prepare_test_db().await;
    init_builtin_applications(&pool, &["tea".into()]).await.expect("init");
    let tea = get_oauth2_application_by_client_id(&pool, "d57cb8c4-630c-4168-8324-ec79935e18d4").await.expect("tea");

    let err = update_oauth2_application(
        &pool,
        UpdateOAuth2ApplicationOptions { id: tea.id, user_id: 0, name: "mine".into(), ..Default::default() },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, OAuth2Error::ApplicationLocked(_)));
    assert!(matches!(
        delete_oauth2_application(&pool, tea.id, 0).await,
        Err(OAuth2Error::ApplicationLocked(_))
    ));
}

#[cfg(feature = "live-db-tests")]
#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL/live Postgres"]
async fn deleting_application_cascades_grants_and_codes() {
    let (pool, _guard) = crate::db::testing::prepare_test_db().await;
    delete_oauth2_application(&pool, 1, 1).await.expect("delete");

    assert_eq!(crate::db::fixtures::count_rows(&pool, "oauth2_grant", Some(("application_id", 1))).await.expect("grants"), 0);
    assert_eq!(crate::db::fixtures::count_rows(&pool, "oauth2_authorization_code", None).await.expect("codes"), 0);
    assert_eq!(crate::db::fixtures::count_rows(&pool, "oauth2_grant", None).await.expect("others"), 1);
}

#[cfg(feature = "live-db-tests")]
#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL/live Postgres"]
async fn grant_counter_nonce_and_codes() {
    let (pool, _guard) = crate::db::testing::prepare_test_db().await;
    let app = get_oauth2_application_by_client_id(&pool, FIXTURE_CLIENT_ID).await.expect("app");

    let mut grant = app.get_grant_by_user_id(&pool, 1).await.expect("query").expect("fixture grant");
    assert_eq!(grant.id, 1);
    assert!(app.get_grant_by_user_id(&pool, 3).await.expect("query").is_none());
    assert!(app.create_grant(&pool, 1, "openid").await.unwrap_err().is_already_exist());

    let before = grant.counter;
    grant.increase_counter(&pool).await.expect("counter");
    assert_eq!(grant.counter, before + 1);
    grant.set_nonce(&pool, "n-0S6_WzA2Mj").await.expect("nonce");
    let reloaded = get_oauth2_grant_by_id(&pool, grant.id).await.expect("query").expect("grant");
    assert_eq!(reloaded.nonce, "n-0S6_WzA2Mj");
    assert_eq!(reloaded.counter, before + 1);

    let minted = grant
        .generate_new_authorization_code(&pool, "https://example.com/xyzzy", "", "", 600)
        .await
        .expect("code");
    assert!(minted.code.starts_with("gta_"));
    let found = get_oauth2_authorization_by_code(&pool, &minted.code).await.expect("query").expect("code");
    assert_eq!(found.grant.as_ref().map(|g| g.id), Some(grant.id));

    found.invalidate(&pool).await.expect("invalidate");
    assert!(get_oauth2_authorization_by_code(&pool, &minted.code).await.expect("query").is_none());
}

#[cfg(feature = "live-db-tests")]
#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL/live Postgres"]
async fn fixture_code_validates_pkce_and_expired_codes_are_swept() {
    let (pool, _guard) = crate::db::testing::prepare_test_db().await;

    let auth = get_oauth2_authorization_by_code(&pool, "authcode").await.expect("query").expect("fixture code");
    assert!(auth.validate_code_challenge(VERIFIER));
    assert!(!auth.is_expired(now_unix()));

    let removed = delete_expired_authorization_codes(&pool, now_unix()).await.expect("sweep");
    assert_eq!(removed, 1);
    assert!(get_oauth2_authorization_by_code(&pool, "expired-code").await.expect("query").is_none());
}

#[cfg(feature = "live-db-tests")]
#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL/live Postgres"]
async fn grants_list_and_revoke() {
    let (pool, _guard) = crate::db::testing::prepare_test_db().await;

    let grants = list_oauth2_grants_by_user_id(&pool, 1).await.expect("list");
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].application.client_id, FIXTURE_CLIENT_ID);
    assert!(grants[0].application.client_secret.is_empty());

    assert!(revoke_oauth2_grant(&pool, 1, 2).await.unwrap_err().is_not_exist());
    revoke_oauth2_grant(&pool, 1, 1).await.expect("revoke");
    assert!(list_oauth2_grants_by_user_id(&pool, 1).await.expect("list").is_empty());
    assert!(get_oauth2_authorization_by_code(&pool, "authcode").await.expect("query").is_none());
}

#[cfg(feature = "live-db-tests")]
#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL/live Postgres"]
async fn relicts_of_user_are_removed() {
    let (pool, _guard) = crate::db::testing::prepare_test_db().await;
    let mut conn = pool.acquire().await.expect("conn");
    delete_oauth2_relicts_by_user_id(&mut conn, 1).await.expect("relicts");

    assert!(get_oauth2_application_by_id(&pool, 1).await.unwrap_err().is_not_exist());
    assert!(get_oauth2_grant_by_id(&pool, 1).await.expect("query").is_none());
    assert!(get_oauth2_grant_by_id(&pool, 2).await.expect("query").is_some());
    assert!(get_oauth2_application_by_id(&pool, 2).await.is_ok());
}

#[cfg(feature = "live-db-tests")]
#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL/live Postgres"]
async fn active_oauth2_source_lookup() {
    let (pool, _guard) = crate::db::testing::prepare_test_db().await;
    let github = get_active_oauth2_source_by_name(&pool, "github").await.expect("github");
    assert_eq!(github.id, 1);
    assert!(get_active_oauth2_source_by_name(&pool, "gitlab-disabled").await.unwrap_err().is_not_exist());
    assert!(get_active_oauth2_source_by_name(&pool, "corp-ldap").await.unwrap_err().is_not_exist());
}
