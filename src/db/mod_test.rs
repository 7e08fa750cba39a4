use super::*;

#[test]
fn unpaginated_by_default() {
    assert!(!ListOptions::default().is_paginated());
}

#[test]
fn limit_offset_for_second_page() {
    assert_eq!(ListOptions::paginated(2, 10).limit_offset(), (10, 10));
}

#[test]
fn zero_page_size_uses_default() {
    assert_eq!(ListOptions::paginated(1, 0).limit_offset(), (DEFAULT_PAGE_SIZE, 0));
}

#[test]
fn page_size_is_clamped() {
    assert_eq!(ListOptions::paginated(3, 10_000).limit_offset(), (MAX_PAGE_SIZE, 2 * MAX_PAGE_SIZE));
}

#[test]
fn push_limit_is_noop_without_page() {
    let mut builder = sqlx::QueryBuilder::<sqlx::Postgres>::new("SELECT 1");
    ListOptions::default().push_limit(&mut builder);
    assert_eq!(builder.sql(), "SELECT 1");
}

#[test]
fn push_limit_appends_binds() {
    let mut builder = sqlx::QueryBuilder::<sqlx::Postgres>::new("SELECT 1");
    ListOptions::paginated(1, 5).push_limit(&mut builder);
    assert_eq!(builder.sql(), "SELECT 1 LIMIT $1 OFFSET $2");
}

#[test]
fn now_unix_is_after_2024() {
    assert!(now_unix() > 1_704_067_200);
}
