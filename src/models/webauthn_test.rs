use super::*;

fn credential(sign_count: i64) -> WebAuthnCredential {
    WebAuthnCredential {
        id: 1,
        name: "YubiKey".into(),
        lower_name: "yubikey".into(),
        user_id: 1,
        credential_id: vec![1, 2, 3],
        public_key: vec![4, 5, 6],
        attestation_type: "none".into(),
        aaguid: vec![0; 16],
        sign_count,
        clone_warning: false,
        created_unix: 0,
        updated_unix: 0,
    }
}

#[test]
fn advancing_counter_is_accepted() {
    let mut cred = credential(5);
    cred.observe_sign_count(6);
    assert_eq!(cred.sign_count, 6);
    assert!(!cred.clone_warning);
}

#[test]
fn authenticators_without_counters_stay_at_zero() {
    let mut cred = credential(0);
    cred.observe_sign_count(0);
    assert_eq!(cred.sign_count, 0);
    assert!(!cred.clone_warning);
}

#[test]
fn stale_counter_raises_clone_warning() {
    let mut cred = credential(10);
    cred.observe_sign_count(10);
    assert!(cred.clone_warning);
    assert_eq!(cred.sign_count, 10);

    let mut cred = credential(10);
    cred.observe_sign_count(0);
    assert!(cred.clone_warning);
}

#[test]
fn serialized_credential_hides_key_material() {
    let json = serde_json::to_value(credential(1)).unwrap();
    for hidden in ["credential_id", "public_key", "aaguid", "lower_name"] {
        assert!(json.get(hidden).is_none(), "{hidden}");
    }
    assert_eq!(json["name"], "YubiKey");
}

#[test]
fn error_kinds() {
    assert!(WebAuthnError::NotExist(1).is_not_exist());
    assert!(WebAuthnError::CredentialIdNotExist(1).is_not_exist());
    assert!(WebAuthnError::NameAlreadyExist { user_id: 1, name: "a".into() }.is_already_exist());
    assert_eq!(WebAuthnError::EmptyName.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn blank_name_is_rejected_without_database() {
    let pool = crate::state::test_helpers::lazy_pool();
    let err = create_credential(&pool, NewWebAuthnCredential { name: "   ".into(), ..Default::default() })
        .await
        .unwrap_err();
    assert!(matches!(err, WebAuthnError::EmptyName));
}

// =============================================================================
// live database
// =============================================================================

#[cfg(feature = "live-db-tests")]
fn new_key(user_id: i64, name: &str, id: &[u8]) -> NewWebAuthnCredential {
    NewWebAuthnCredential {
        user_id,
        name: name.into(),
        credential_id: id.to_vec(),
        public_key: vec![9; 65],
        attestation_type: "none".into(),
        aaguid: vec![0; 16],
        sign_count: 0,
    }
}

#[cfg(feature = "live-db-tests")]
#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL/live Postgres"]
async fn register_and_look_up() {
    let (pool, _guard) = crate::db::testing::prepare_test_db().await;

    assert!(!exists_webauthn_credentials_for_uid(&pool, 1).await.expect("exists"));
    let key = create_credential(&pool, new_key(1, "Laptop Key", b"cred-1")).await.expect("create");
    create_credential(&pool, new_key(1, "Phone", b"cred-2")).await.expect("create");
    assert!(exists_webauthn_credentials_for_uid(&pool, 1).await.expect("exists"));

    assert_eq!(get_webauthn_credential_by_id(&pool, key.id).await.expect("by id").name, "Laptop Key");
    assert_eq!(get_webauthn_credential_by_name(&pool, 1, "laptop key").await.expect("by name").id, key.id);
    assert_eq!(get_webauthn_credential_by_cred_id(&pool, 1, b"cred-1").await.expect("by cred").id, key.id);
    assert!(get_webauthn_credential_by_cred_id(&pool, 2, b"cred-1").await.unwrap_err().is_not_exist());
    assert_eq!(
        get_webauthn_credentials_by_uid(&pool, 1).await.expect("list").iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
        vec!["Laptop Key", "Phone"]
    );
}

#[cfg(feature = "live-db-tests")]
#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL/live Postgres"]
async fn duplicate_names_and_ids_are_refused() {
    let (pool, _guard) = crate::db::testing::prepare_test_db().await;
    create_credential(&pool, new_key(1, "Key", b"cred-1")).await.expect("create");

    let err = create_credential(&pool, new_key(1, "KEY", b"cred-2")).await.unwrap_err();
    assert!(matches!(err, WebAuthnError::NameAlreadyExist { .. }));
    // Another user may reuse the name but not the credential id.
    create_credential(&pool, new_key(2, "Key", b"cred-3")).await.expect("other user");
    assert!(create_credential(&pool, new_key(2, "Other", b"cred-1")).await.unwrap_err().is_already_exist());
}

#[cfg(feature = "live-db-tests")]
#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL/live Postgres"]
async fn sign_count_and_delete() {
    let (pool, _guard) = crate::db::testing::prepare_test_db().await;
    let mut key = create_credential(&pool, new_key(1, "Key", b"cred-1")).await.expect("create");

    update_sign_count(&pool, &mut key, 3).await.expect("advance");
    update_sign_count(&pool, &mut key, 2).await.expect("regress");
    let stored = get_webauthn_credential_by_id(&pool, key.id).await.expect("reload");
    assert_eq!(stored.sign_count, 3);
    assert!(stored.clone_warning);

    assert!(delete_credential(&pool, key.id, 2).await.unwrap_err().is_not_exist());
    delete_credential(&pool, key.id, 1).await.expect("delete");
    assert!(get_webauthn_credential_by_id(&pool, key.id).await.unwrap_err().is_not_exist());
}
