use super::*;

/// RFC 4648 base32 alphabet, lowercased (matches `base32_lower`'s documented output).
const LOWER_BASE32_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz234567";

#[test]
fn base32_lower_matches_rfc4648_vectors() {
    assert_eq!(base32_lower(b""), "");
    assert_eq!(base32_lower(b"f"), "my");
    assert_eq!(base32_lower(b"fo"), "mzxq");
    assert_eq!(base32_lower(b"foo"), "mzxw6");
    assert_eq!(base32_lower(b"foob"), "mzxw6yq");
    assert_eq!(base32_lower(b"fooba"), "mzxw6ytb");
    assert_eq!(base32_lower(b"foobar"), "mzxw6ytboi");
}

#[test]
fn base32_of_32_bytes_is_52_chars() {
    let encoded = base32_lower(&random_bytes::<32>());
    assert_eq!(encoded.len(), 52);
    assert!(encoded.bytes().all(|b| LOWER_BASE32_ALPHABET.contains(&b)));
}

#[test]
fn random_hex_has_expected_length() {
    let token = random_hex::<20>();
    assert_eq!(token.len(), 40);
    assert!(token.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)));
    assert_ne!(token, random_hex::<20>());
}

#[test]
fn random_alphanumeric_has_expected_length() {
    let salt = random_alphanumeric(10);
    assert_eq!(salt.len(), 10);
    assert!(salt.chars().all(|c| c.is_ascii_alphanumeric()));
}

#[test]
fn password_hash_round_trip() {
    let hash = hash_password("correct horse").unwrap();
    assert!(hash.starts_with("$argon2"));
    assert!(verify_password("correct horse", &hash));
    assert!(!verify_password("battery staple", &hash));
}

#[test]
fn salted_hash_is_deterministic() {
    let a = hash_password_with_salt("pw", b"0123456789abcdef").unwrap();
    let b = hash_password_with_salt("pw", b"0123456789abcdef").unwrap();
    assert_eq!(a, b);
}

#[test]
fn malformed_hash_never_verifies() {
    assert!(!verify_password("x", ""));
    assert!(!verify_password("x", "not-a-phc-string"));
}

#[test]
fn token_hash_matches_known_hmac() {
    // HMAC-SHA256(key = "key", msg = "The quick brown fox jumps over the lazy dog")
    assert_eq!(
        hash_token("The quick brown fox jumps over the lazy dog", "key").unwrap(),
        "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
    );
}

#[test]
fn constant_time_eq_compares_content_and_length() {
    assert!(constant_time_eq("abc", "abc"));
    assert!(!constant_time_eq("abc", "abd"));
    assert!(!constant_time_eq("abc", "abcd"));
}
