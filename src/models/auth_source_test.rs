use super::*;

#[test]
fn source_type_integer_mapping() {
    for raw in 0..=7 {
        assert_eq!(SourceType::try_from(raw).unwrap().as_i64(), raw);
    }
    assert!(matches!(SourceType::try_from(8), Err(SourceError::UnknownType(8))));
    assert_eq!(SourceType::OAuth2.as_i64(), 6);
}

#[test]
fn only_ldap_variants_are_ldap() {
    assert!(SourceType::Ldap.is_ldap());
    assert!(SourceType::Dldap.is_ldap());
    assert!(!SourceType::Smtp.is_ldap());
    assert!(!SourceType::OAuth2.is_ldap());
}

#[test]
fn config_text_decodes_to_json() {
    let cfg = SourceConfig::try_from(r#"{"host":"ldap"}"#.to_owned()).unwrap();
    assert_eq!(cfg.0["host"], "ldap");
    assert!(SourceConfig::try_from(String::new()).unwrap().0.is_object());
    assert!(SourceConfig::try_from("{".to_owned()).is_err());
}

#[test]
fn local_source_is_active_plain() {
    let local = Source::local();
    assert_eq!(local.id, 0);
    assert_eq!(local.source_type, SourceType::Plain);
    assert!(local.is_active);
    assert!(!local.is_oauth2());
}

#[test]
fn serialized_source_hides_config() {
    let mut source = Source::local();
    source.cfg = SourceConfig(serde_json::json!({"client_secret": "x"}));
    let json = serde_json::to_value(&source).unwrap();
    assert!(json.get("cfg").is_none());
    assert_eq!(json["type"], "plain");
}

#[test]
fn error_kinds() {
    assert!(SourceError::NotExist(1).is_not_exist());
    assert!(SourceError::AlreadyExist("a".into()).is_already_exist());
    assert_eq!(SourceError::InUse { id: 1, users: 2 }.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn id_zero_is_local_without_database() {
    let pool = crate::state::test_helpers::lazy_pool();
    let source = get_source_by_id(&pool, 0).await.unwrap();
    assert_eq!(source.name, LOCAL_SOURCE_NAME);
}

// =============================================================================
// live database
// =============================================================================

#[cfg(feature = "live-db-tests")]
#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL/live Postgres"]
async fn create_find_update_delete() {
    let (pool, _guard) = crate::db::testing::prepare_test_db().await;

    let smtp = create_source(
        &pool,
        NewSource {
            source_type: SourceType::Smtp,
            name: "mail".into(),
            is_active: true,
            is_sync_enabled: true,
            cfg: serde_json::json!({"host": "smtp.example.com"}),
        },
    )
    .await
    .expect("create");
    assert!(!smtp.is_sync_enabled);

    let err = create_source(&pool, NewSource { name: "github".into(), ..Default::default() }).await.unwrap_err();
    assert!(err.is_already_exist());

    let oauth = find_sources(&pool, &FindSourcesOptions { login_type: Some(SourceType::OAuth2), ..Default::default() })
        .await
        .expect("find");
    assert_eq!(oauth.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(), vec!["github", "gitlab-disabled"]);
    let active = find_sources(&pool, &FindSourcesOptions { is_active: Some(true), ..Default::default() })
        .await
        .expect("find");
    assert_eq!(active.len(), 3);
    assert_eq!(count_sources(&pool).await.expect("count"), 4);

    let mut github = get_source_by_name(&pool, "github").await.expect("by name");
    assert_eq!(github.cfg.0["provider"], "github");
    github.is_active = false;
    github.is_sync_enabled = true;
    update_source(&pool, &mut github).await.expect("update");
    let reloaded = get_source_by_id(&pool, github.id).await.expect("by id");
    assert!(!reloaded.is_active);
    assert!(!reloaded.is_sync_enabled);

    delete_source(&pool, smtp.id).await.expect("delete");
    assert!(get_source_by_id(&pool, smtp.id).await.unwrap_err().is_not_exist());
}

#[cfg(feature = "live-db-tests")]
#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL/live Postgres"]
async fn source_in_use_cannot_be_deleted() {
    let (pool, _guard) = crate::db::testing::prepare_test_db().await;
    let err = delete_source(&pool, 2).await.unwrap_err();
    assert!(matches!(err, SourceError::InUse { id: 2, users: 1 }));
    assert!(delete_source(&pool, 99).await.unwrap_err().is_not_exist());
}
