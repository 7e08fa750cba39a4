use super::*;

#[test]
fn error_kinds() {
    assert!(BadgeError::NotExist("x".into()).is_not_exist());
    assert!(BadgeError::AlreadyExist("x".into()).is_already_exist());
    assert_eq!(BadgeError::EmptySlug.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn badge_deserializes_with_defaults() {
    let badge: Badge = serde_json::from_value(serde_json::json!({"slug": "helper"})).unwrap();
    assert_eq!(badge, Badge { slug: "helper".into(), ..Default::default() });
}

#[tokio::test]
async fn empty_slug_is_rejected_without_database() {
    let pool = crate::state::test_helpers::lazy_pool();
    assert!(matches!(create_badge(&pool, &mut Badge::default()).await, Err(BadgeError::EmptySlug)));
}

// =============================================================================
// live database
// =============================================================================

#[cfg(feature = "live-db-tests")]
#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL/live Postgres"]
async fn badge_crud() {
    let (pool, _guard) = crate::db::testing::prepare_test_db().await;

    let mut badge = Badge { slug: "helper".into(), description: "Helps".into(), ..Default::default() };
    create_badge(&pool, &mut badge).await.expect("create");
    assert!(badge.id > 2);
    assert!(create_badge(&pool, &mut badge.clone()).await.unwrap_err().is_already_exist());

    badge.image_url = "https://example.com/helper.png".into();
    update_badge(&pool, &badge).await.expect("update");
    assert_eq!(get_badge(&pool, "helper").await.expect("get").image_url, "https://example.com/helper.png");

    delete_badge(&pool, "badge1").await.expect("delete");
    assert!(get_badge(&pool, "badge1").await.unwrap_err().is_not_exist());
    let (held, count) = get_user_badges(&pool, 1).await.expect("held");
    assert_eq!(count, 1);
    assert_eq!(held[0].slug, "badge2");
    assert!(delete_badge(&pool, "badge1").await.unwrap_err().is_not_exist());
}

#[cfg(feature = "live-db-tests")]
#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL/live Postgres"]
async fn assigning_badges() {
    let (pool, _guard) = crate::db::testing::prepare_test_db().await;

    add_user_badges(&pool, 2, &["badge1", "badge2"]).await.expect("add");
    add_user_badge(&pool, 2, "badge1").await.expect("add again");
    let (held, count) = get_user_badges(&pool, 2).await.expect("held");
    assert_eq!(count, 2);
    assert_eq!(held.iter().map(|b| b.slug.as_str()).collect::<Vec<_>>(), vec!["badge1", "badge2"]);

    assert!(add_user_badges(&pool, 3, &["badge1", "nope"]).await.unwrap_err().is_not_exist());
    assert_eq!(get_user_badges(&pool, 3).await.expect("none").1, 0);

    remove_user_badge(&pool, 2, "badge1").await.expect("remove");
    assert!(remove_user_badge(&pool, 2, "badge1").await.unwrap_err().is_not_exist());
    assert_eq!(remove_all_user_badges(&pool, 1).await.expect("remove all"), 2);
    assert_eq!(get_user_badges(&pool, 1).await.expect("none").1, 0);
}
