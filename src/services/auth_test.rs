use super::*;

fn alice() -> Identity {
    Identity::new(Some(7), "alice", vec!["USER".into()])
}

#[test]
fn verify_round_trips_identity() {
    let verifier = TokenVerifier::new("secret");
    let token = verifier.mint(&alice(), 60).unwrap();
    let identity = verifier.verify(&token).unwrap();
    assert_eq!(identity, alice());
    assert!(!identity.is_admin());
}

#[test]
fn wrong_secret_is_invalid() {
    let token = TokenVerifier::new("one").mint(&alice(), 60).unwrap();
    let err = TokenVerifier::new("two").verify(&token).unwrap_err();
    assert!(matches!(err, TokenError::Invalid(_)));
}

#[test]
fn expired_token_is_rejected() {
    let verifier = TokenVerifier::new("secret");
    let claims = Claims { sub: "alice".into(), uid: None, roles: vec![], exp: unix_now() - 3600 };
    let token = verifier.mint_claims(&claims).unwrap();
    assert!(matches!(verifier.verify(&token), Err(TokenError::Expired)));
}

#[test]
fn blank_subject_is_rejected() {
    let verifier = TokenVerifier::new("secret");
    let claims = Claims { sub: "  ".into(), uid: None, roles: vec![], exp: unix_now() + 60 };
    let token = verifier.mint_claims(&claims).unwrap();
    assert!(matches!(verifier.verify(&token), Err(TokenError::EmptySubject)));
}

#[test]
fn garbage_is_invalid() {
    let verifier = TokenVerifier::new("secret");
    assert!(matches!(verifier.verify("not.a.jwt"), Err(TokenError::Invalid(_))));
}

#[test]
fn admin_role_is_case_insensitive() {
    let identity = Identity::new(None, "root", vec!["admin".into()]);
    assert!(identity.is_admin());
}
