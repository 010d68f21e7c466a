//! Session token round trip and tamper resistance.

use accessmesh_authz::{TokenIssuer, TokenVerifier};
use accessmesh_core::{CredentialError, Timestamp};
use chrono::{Duration, TimeZone, Utc};

const SECRET: &[u8] = b"integration-secret";

fn now() -> Timestamp {
    Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).unwrap()
}

#[test]
fn round_trip_preserves_role() {
    let issuer = TokenIssuer::new(SECRET).unwrap();
    let verifier = TokenVerifier::new(SECRET).unwrap();

    for role in ["admin", "manager", "read-only viewer", "rôle"] {
        let token = issuer.issue(role, now()).unwrap();
        let claims = verifier.verify(&format!("Bearer {token}"), now()).unwrap();
        assert_eq!(claims.role, role);
    }
}

#[test]
fn expiry_is_exclusive() {
    let issuer = TokenIssuer::new(SECRET)
        .unwrap()
        .with_lifetime(Duration::minutes(5));
    let verifier = TokenVerifier::new(SECRET).unwrap();
    let token = issuer.issue("admin", now()).unwrap();

    assert!(verifier.verify(&token, now() + Duration::seconds(299)).is_ok());
    assert_eq!(
        verifier.verify(&token, now() + Duration::minutes(5)),
        Err(CredentialError::Expired)
    );
}

#[test]
fn any_single_character_change_is_rejected() {
    let issuer = TokenIssuer::new(SECRET).unwrap();
    let verifier = TokenVerifier::new(SECRET).unwrap();
    let token = issuer.issue("admin", now()).unwrap();

    for (i, c) in token.char_indices() {
        if c == '.' {
            continue;
        }
        let replacement = if c == 'A' { 'B' } else { 'A' };
        let mut tampered = token.clone();
        tampered.replace_range(i..=i, &replacement.to_string());

        assert!(
            verifier.verify(&tampered, now()).is_err(),
            "tampered token accepted (position {i})"
        );
    }
}

#[test]
fn truncated_token_is_rejected() {
    let issuer = TokenIssuer::new(SECRET).unwrap();
    let verifier = TokenVerifier::new(SECRET).unwrap();
    let token = issuer.issue("admin", now()).unwrap();

    let (head, _) = token.rsplit_once('.').unwrap();
    assert!(verifier.verify(head, now()).is_err());
    assert!(verifier.verify(&format!("{head}."), now()).is_err());
}
