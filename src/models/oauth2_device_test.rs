use super::*;
use crate::error::ModelError;

#[test]
fn user_code_shape() {
    for _ in 0..50 {
        let code = generate_user_code();
        assert_eq!(code.len(), 9);
        assert_eq!(code.as_bytes()[4], b'-');
        assert!(code.bytes().filter(|b| *b != b'-').all(|b| USER_CODE_ALPHABET.contains(&b)));
        assert_eq!(normalize_user_code(&code).as_deref(), Some(code.as_str()));
    }
}

#[test]
fn user_codes_use_the_whole_alphabet() {
    let mut seen = std::collections::HashSet::new();
    for _ in 0..500 {
        seen.extend(generate_user_code().bytes().filter(|b| *b != b'-'));
    }
    assert_eq!(seen.len(), USER_CODE_ALPHABET.len());
}

#[test]
fn user_code_input_is_forgiving() {
    assert_eq!(normalize_user_code("bcdf-ghjk").as_deref(), Some("BCDF-GHJK"));
    assert_eq!(normalize_user_code(" BCDFGHJK ").as_deref(), Some("BCDF-GHJK"));
    assert_eq!(normalize_user_code("bc df gh jk").as_deref(), Some("BCDF-GHJK"));
    assert_eq!(normalize_user_code("BCDF-GHJ"), None);
    assert_eq!(normalize_user_code("ABCD-EFGH"), None);
    assert_eq!(normalize_user_code("BCDF-GHJ\u{e9}"), None);
}

#[test]
fn device_code_digest_is_stable_hex() {
    let digest = hash_device_code("gtd_example");
    assert_eq!(digest.len(), 64);
    assert_eq!(digest, hash_device_code("gtd_example"));
    assert_ne!(digest, hash_device_code("gtd_other"));
}

#[test]
fn status_round_trips_through_text() {
    for status in [
        DeviceCodeStatus::Pending,
        DeviceCodeStatus::Approved,
        DeviceCodeStatus::Denied,
        DeviceCodeStatus::Consumed,
    ] {
        assert_eq!(DeviceCodeStatus::try_from(status.as_str().to_owned()), Ok(status));
    }
    assert!(DeviceCodeStatus::try_from("lost".to_owned()).is_err());
}

#[test]
fn expiry_is_strict() {
    let code = OAuth2DeviceCode {
        id: 1,
        application_id: 1,
        device_code_hash: String::new(),
        user_code: "BCDF-GHJK".into(),
        scope: String::new(),
        user_id: 0,
        status: DeviceCodeStatus::Pending,
        poll_interval: 5,
        expires_unix: 100,
        last_polled_unix: 0,
        created_unix: 0,
    };
    assert!(!code.is_expired(100));
    assert!(code.is_expired(101));
}

// =============================================================================
// live database
// =============================================================================

#[cfg(feature = "live-db-tests")]
async fn fixture_app(pool: &PgPool) -> OAuth2Application {
    oauth2::get_oauth2_application_by_id(pool, 2).await.expect("fixture app")
}

#[cfg(feature = "live-db-tests")]
#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL/live Postgres"]
async fn approved_flow_is_single_use() {
    let (pool, _guard) = crate::db::testing::prepare_test_db().await;
    let app = fixture_app(&pool).await;

    let started = create_device_authorization(&pool, &app, "openid read", 900, 5).await.expect("start");
    assert!(started.device_code.starts_with("gtd_"));
    let now = now_unix();

    assert_eq!(
        poll_device_code_at(&pool, app.id, &started.device_code, now).await.expect("poll"),
        DevicePollOutcome::AuthorizationPending
    );
    assert_eq!(
        poll_device_code_at(&pool, app.id, &started.device_code, now + 1).await.expect("poll"),
        DevicePollOutcome::SlowDown { interval: 10 }
    );

    let lowercase = started.user_code.to_lowercase();
    let stored = get_device_code_by_user_code(&pool, &lowercase).await.expect("lookup");
    assert_eq!(stored.status, DeviceCodeStatus::Pending);
    assert_eq!(stored.poll_interval, 10);

    let grant = approve_device_code(&pool, &started.user_code, 3).await.expect("approve");
    assert_eq!(grant.user_id, 3);
    assert_eq!(grant.scope, "openid read");

    match poll_device_code_at(&pool, app.id, &started.device_code, now + 30).await.expect("poll") {
        DevicePollOutcome::Approved(polled) => assert_eq!(polled.id, grant.id),
        other => panic!("expected approval, got {other:?}"),
    }
    assert!(matches!(
        poll_device_code_at(&pool, app.id, &started.device_code, now + 60).await,
        Err(OAuth2Error::DeviceCodeNotPending)
    ));
}

#[cfg(feature = "live-db-tests")]
#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL/live Postgres"]
async fn approval_reuses_existing_grant() {
    let (pool, _guard) = crate::db::testing::prepare_test_db().await;
    let app = fixture_app(&pool).await;

    let started = create_device_authorization(&pool, &app, "openid email", 900, 5).await.expect("start");
    let grant = approve_device_code(&pool, &started.user_code, 2).await.expect("approve");
    assert_eq!(grant.id, 2);
    assert_eq!(grant.scope, "openid email");

    assert!(matches!(
        approve_device_code(&pool, &started.user_code, 2).await,
        Err(OAuth2Error::DeviceCodeNotPending)
    ));
}

#[cfg(feature = "live-db-tests")]
#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL/live Postgres"]
async fn denied_and_expired_and_unknown_codes() {
    let (pool, _guard) = crate::db::testing::prepare_test_db().await;
    let app = fixture_app(&pool).await;

    let denied = create_device_authorization(&pool, &app, "", 900, 5).await.expect("start");
    deny_device_code(&pool, &denied.user_code, 1).await.expect("deny");
    assert_eq!(
        poll_device_code(&pool, app.id, &denied.device_code).await.expect("poll"),
        DevicePollOutcome::AccessDenied
    );

    let expired = create_device_authorization(&pool, &app, "", 900, 5).await.expect("start");
    assert_eq!(
        poll_device_code_at(&pool, app.id, &expired.device_code, now_unix() + 1000).await.expect("poll"),
        DevicePollOutcome::ExpiredToken
    );

    assert!(matches!(
        poll_device_code(&pool, app.id, "gtd_unknown").await,
        Err(OAuth2Error::DeviceCodeNotFound)
    ));
    assert!(matches!(
        poll_device_code(&pool, 1, &expired.device_code).await,
        Err(OAuth2Error::DeviceCodeNotFound)
    ));
    assert!(get_device_code_by_user_code(&pool, "nope").await.unwrap_err().is_not_exist());

    assert_eq!(delete_expired_device_codes(&pool, now_unix() + 1000).await.expect("sweep"), 2);
}
