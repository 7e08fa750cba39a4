use super::*;

#[test]
fn keys_must_be_sixteen_ascii_chars() {
    assert!(check_key("abcdefghijklmnop").is_ok());
    assert!(matches!(check_key("short"), Err(SessionError::InvalidKey(_))));
    assert!(check_key("abcdefghijklmnopq").is_err());
    assert!(check_key("ééééééééé").is_err());
}

#[test]
fn error_kinds() {
    assert_eq!(SessionError::InvalidKey(String::new()).kind(), ErrorKind::InvalidArgument);
    assert!(SessionError::AlreadyExist("k".into()).is_already_exist());
}

#[tokio::test]
async fn invalid_keys_never_reach_the_database() {
    let pool = crate::state::test_helpers::lazy_pool();
    assert!(!exist_session(&pool, "nope").await.unwrap());
    assert!(matches!(read_session(&pool, "nope").await, Err(SessionError::InvalidKey(_))));
    assert!(matches!(update_session(&pool, "nope", b"x").await, Err(SessionError::InvalidKey(_))));
    assert!(matches!(
        regenerate_session(&pool, "abcdefghijklmnop", "nope").await,
        Err(SessionError::InvalidKey(_))
    ));
}

// =============================================================================
// live database
// =============================================================================

#[cfg(feature = "live-db-tests")]
#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL/live Postgres"]
async fn read_creates_and_update_persists() {
    let (pool, _guard) = crate::db::testing::prepare_test_db().await;

    assert!(!exist_session(&pool, "newnewnewnewnewn").await.expect("exist"));
    let fresh = read_session(&pool, "newnewnewnewnewn").await.expect("read");
    assert!(fresh.data.is_empty());
    assert!(exist_session(&pool, "newnewnewnewnewn").await.expect("exist"));
    assert_eq!(count_sessions(&pool).await.expect("count"), 3);

    update_session(&pool, "newnewnewnewnewn", b"payload").await.expect("update");
    assert_eq!(read_session(&pool, "newnewnewnewnewn").await.expect("reread").data, b"payload");

    destroy_session(&pool, "newnewnewnewnewn").await.expect("destroy");
    assert!(!exist_session(&pool, "newnewnewnewnewn").await.expect("exist"));
}

#[cfg(feature = "live-db-tests")]
#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL/live Postgres"]
async fn concurrent_first_reads_share_one_session() {
    let (pool, _guard) = crate::db::testing::prepare_test_db().await;

    for round in 0..20 {
        let key = format!("concurrentkey{round:03}");
        let (a, b) = tokio::join!(read_session(&pool, &key), read_session(&pool, &key));
        assert_eq!(a.expect("first read").key, key);
        assert_eq!(b.expect("second read").key, key);
    }
    assert_eq!(count_sessions(&pool).await.expect("count"), 22);
}

#[cfg(feature = "live-db-tests")]
#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL/live Postgres"]
async fn regenerate_moves_data_and_refuses_taken_keys() {
    let (pool, _guard) = crate::db::testing::prepare_test_db().await;

    update_session(&pool, "abcdefghijklmnop", b"state").await.expect("update");
    let moved = regenerate_session(&pool, "abcdefghijklmnop", "ponmlkjihgfedcba").await.expect("regenerate");
    assert_eq!(moved.key, "ponmlkjihgfedcba");
    assert_eq!(moved.data, b"state");
    assert!(!exist_session(&pool, "abcdefghijklmnop").await.expect("old gone"));

    let err = regenerate_session(&pool, "oldoldoldoldoldo", "ponmlkjihgfedcba").await.unwrap_err();
    assert!(err.is_already_exist());

    // A missing old session is created on the fly.
    let created = regenerate_session(&pool, "missingmissingmi", "brandnewbrandnew").await.expect("regenerate");
    assert!(created.data.is_empty());
}

#[cfg(feature = "live-db-tests")]
#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL/live Postgres"]
async fn cleanup_removes_stale_sessions_only() {
    let (pool, _guard) = crate::db::testing::prepare_test_db().await;
    assert_eq!(cleanup_sessions_at(&pool, 86_400, 1_000_000).await.expect("cleanup"), 1);
    assert_eq!(count_sessions(&pool).await.expect("count"), 1);
    assert!(exist_session(&pool, "abcdefghijklmnop").await.expect("kept"));
}
