use super::*;

#[test]
fn modes_are_ordered() {
    assert!(AccessMode::None < AccessMode::Read);
    assert!(AccessMode::Read < AccessMode::Write);
    assert!(AccessMode::Write < AccessMode::Admin);
    assert!(AccessMode::Admin < AccessMode::Owner);
}

#[test]
fn parse_and_display_agree() {
    for mode in [AccessMode::None, AccessMode::Read, AccessMode::Write, AccessMode::Admin, AccessMode::Owner] {
        assert_eq!(AccessMode::parse(&mode.to_string()), mode);
    }
    assert_eq!(AccessMode::parse("superuser"), AccessMode::None);
}
