use std::net::IpAddr;

use http::HeaderMap;
use http::header;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use parcelgate_auth::{UnverifiedClaims, resolve_identity, tier_from_headers};
use parcelgate_contracts::AccessTier;

fn bearer(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::AUTHORIZATION,
        format!("Bearer {}", token)
            .parse()
            .expect("authorization header must parse"),
    );
    headers
}

fn signed_token(claims: serde_json::Value) -> String {
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(b"a-secret-this-service-never-sees"),
    )
    .expect("token encode should succeed")
}

#[test]
fn well_formed_token_resolves_to_subject_without_verification() {
    let token = signed_token(serde_json::json!({
        "sub": "42",
        "exp": 1000000000,
        "aud": "someone-else",
    }));

    let origin: IpAddr = "198.51.100.4".parse().expect("ip must parse");
    let key = resolve_identity(&bearer(&token), Some(origin));

    assert_eq!(key.as_str(), "42");
}

#[test]
fn token_without_identifier_claim_falls_back_to_raw_credential() {
    let token = signed_token(serde_json::json!({ "scope": "read" }));

    let key = resolve_identity(&bearer(&token), None);
    assert_eq!(key.as_str(), token);
}

#[test]
fn secondary_identifier_claims_are_honored() {
    let token = signed_token(serde_json::json!({ "userId": "abc" }));

    let claims = UnverifiedClaims::decode(&token).expect("token should decode");
    assert_eq!(claims.identity(), Some("abc".to_string()));
}

#[test]
fn tampered_signature_still_decodes_for_personalization() {
    let token = signed_token(serde_json::json!({ "sub": "42" }));
    let (unsigned, _) = token.rsplit_once('.').expect("jwt has three segments");
    let tampered = format!("{}.AAAA", unsigned);

    assert_eq!(resolve_identity(&bearer(&tampered), None).as_str(), "42");
}

#[test]
fn credential_presence_alone_selects_authenticated_tier() {
    let token = signed_token(serde_json::json!({ "sub": "42" }));
    assert_eq!(tier_from_headers(&bearer(&token)), AccessTier::Authenticated);
    assert_eq!(tier_from_headers(&bearer("garbage")), AccessTier::Authenticated);
}
