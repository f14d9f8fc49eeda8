
use std::net::IpAddr;

use http::HeaderMap;
use http::header;
use jsonwebtoken::{DecodingKey, Validation, decode, decode_header};
use parcelgate_contracts::{AccessTier, IdentityKey};
use serde_json::Value;

pub const IDENTITY_CLAIMS: &[&str] = &["sub", "user_id", "userId", "uid", "id"];

pub fn tier_from_headers(headers: &HeaderMap) -> AccessTier {
    match bearer_token(headers) {
        Some(_) => AccessTier::Authenticated,
        None => AccessTier::Guest,
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let authz = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())?;

    let (scheme, token) = authz.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Claim identifier, raw bearer value, peer address, then `anonymous`.
pub fn resolve_identity(headers: &HeaderMap, origin: Option<IpAddr>) -> IdentityKey {
    if let Some(token) = bearer_token(headers) {
        let from_claims = UnverifiedClaims::decode(token).and_then(|claims| claims.identity());
        return IdentityKey::new(from_claims.unwrap_or_else(|| token.to_string()));
    }

    match origin {
        Some(ip) => IdentityKey::new(ip.to_string()),
        None => IdentityKey::anonymous(),
    }
}

// Decoded without signature, expiry or audience checks.
#[derive(Debug, Clone)]
pub struct UnverifiedClaims(Value);

impl UnverifiedClaims {
    pub fn decode(token: &str) -> Option<Self> {
        let header = decode_header(token).ok()?;

        let mut validation = Validation::new(header.alg);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let decoded = decode::<Value>(token, &DecodingKey::from_secret(&[]), &validation).ok()?;
        decoded.claims.is_object().then_some(Self(decoded.claims))
    }

    pub fn identity(&self) -> Option<String> {
        IDENTITY_CLAIMS
            .iter()
            .find_map(|claim| claim_identifier(&self.0, claim))
    }
}

fn claim_identifier(claims: &Value, claim: &str) -> Option<String> {
    match claims.get(claim)? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
