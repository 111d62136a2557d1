//! Pure attestation-token verification.
//!
//! Tokens are compact JWS envelopes (ES256K, secp256k1 + SHA-256). The
//! verifier holds its trust material up front and takes `now` as an
//! argument, so `verify` is a pure function of its inputs: no network,
//! no clock, same token and expectations always give the same verdict.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use k256::ecdsa::signature::Verifier;
use k256::ecdsa::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};

/// Why a token failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    BadSignature,
    StaleToken,
    ClaimMismatch,
    UnknownFormat,
}

impl std::fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::BadSignature => "signature verification failed",
            Self::StaleToken => "token was issued outside the freshness window",
            Self::ClaimMismatch => "claims do not match the expected values",
            Self::UnknownFormat => "token is not a well-formed attestation envelope",
        };
        f.write_str(text)
    }
}

/// Verification outcome. `Valid` carries the parsed claims so callers can
/// render or log them without re-parsing the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Valid(TokenClaims),
    Invalid(InvalidReason),
}

impl Verdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }
}

/// Claims carried by an attestation token. Unknown fields in real platform
/// tokens are ignored on parse.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenClaims {
    pub iss: String,
    pub aud: String,
    /// Unix seconds at issuance.
    pub iat: i64,
    /// Caller-supplied nonce bound into the token at issuance.
    pub eat_nonce: String,
    pub hwmodel: String,
    pub swname: String,
    #[serde(default)]
    pub secboot: bool,
    pub submods: Submods,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Submods {
    pub container: ContainerClaims,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerClaims {
    pub image_digest: String,
}

/// The allow-list a token must match to be trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedClaims {
    pub issuer: String,
    pub audience: String,
    pub image_digest: String,
    pub hwmodel: String,
    pub swname: String,
    pub nonce: String,
    pub require_secure_boot: bool,
}

impl ExpectedClaims {
    /// Copy of this allow-list bound to a fresh per-request nonce.
    pub fn with_nonce(&self, nonce: impl Into<String>) -> Self {
        Self {
            nonce: nonce.into(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenHeader {
    alg: String,
}

/// Verifies attestation tokens against a fixed issuer keyring.
pub struct TokenVerifier {
    keys: BTreeMap<String, VerifyingKey>,
    max_age_secs: i64,
    max_skew_secs: i64,
}

impl TokenVerifier {
    pub fn new(max_age_secs: i64, max_skew_secs: i64) -> Self {
        Self {
            keys: BTreeMap::new(),
            max_age_secs,
            max_skew_secs,
        }
    }

    /// Register the verifying key for an issuer. Tokens from issuers
    /// without a registered key fail with `BadSignature`.
    pub fn trust_issuer(&mut self, issuer: impl Into<String>, key: VerifyingKey) {
        self.keys.insert(issuer.into(), key);
    }

    /// Verify `token` against `expected` at the caller-supplied instant.
    ///
    /// Check order: envelope shape, freshness, signature, claim match.
    /// Freshness comes before the signature check, so a stale token is
    /// reported as stale no matter how it was signed.
    pub fn verify(&self, token: &str, expected: &ExpectedClaims, now: DateTime<Utc>) -> Verdict {
        let mut parts = token.trim().split('.');
        let (Some(header_b64), Some(claims_b64), Some(sig_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Verdict::Invalid(InvalidReason::UnknownFormat);
        };

        let Ok(header_bytes) = URL_SAFE_NO_PAD.decode(header_b64) else {
            return Verdict::Invalid(InvalidReason::UnknownFormat);
        };
        let Ok(claims_bytes) = URL_SAFE_NO_PAD.decode(claims_b64) else {
            return Verdict::Invalid(InvalidReason::UnknownFormat);
        };
        let Ok(sig_bytes) = URL_SAFE_NO_PAD.decode(sig_b64) else {
            return Verdict::Invalid(InvalidReason::UnknownFormat);
        };

        let Ok(header) = serde_json::from_slice::<TokenHeader>(&header_bytes) else {
            return Verdict::Invalid(InvalidReason::UnknownFormat);
        };
        if header.alg != "ES256K" {
            return Verdict::Invalid(InvalidReason::UnknownFormat);
        }
        let Ok(claims) = serde_json::from_slice::<TokenClaims>(&claims_bytes) else {
            return Verdict::Invalid(InvalidReason::UnknownFormat);
        };

        let age = now.timestamp() - claims.iat;
        if age > self.max_age_secs || -age > self.max_skew_secs {
            return Verdict::Invalid(InvalidReason::StaleToken);
        }

        let Some(key) = self.keys.get(&claims.iss) else {
            return Verdict::Invalid(InvalidReason::BadSignature);
        };
        let Ok(signature) = Signature::from_slice(&sig_bytes) else {
            return Verdict::Invalid(InvalidReason::BadSignature);
        };
        let signing_input = format!("{}.{}", header_b64, claims_b64);
        if key.verify(signing_input.as_bytes(), &signature).is_err() {
            return Verdict::Invalid(InvalidReason::BadSignature);
        }

        if !claims_match(&claims, expected) {
            return Verdict::Invalid(InvalidReason::ClaimMismatch);
        }

        Verdict::Valid(claims)
    }
}

fn claims_match(claims: &TokenClaims, expected: &ExpectedClaims) -> bool {
    claims.iss == expected.issuer
        && claims.aud == expected.audience
        && claims.submods.container.image_digest == expected.image_digest
        && claims.hwmodel == expected.hwmodel
        && claims.swname == expected.swname
        && claims.eat_nonce == expected.nonce
        && (claims.secboot || !expected.require_secure_boot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::sign_token;
    use k256::ecdsa::SigningKey;
    use pretty_assertions::assert_eq;
    use rand::rngs::OsRng;

    const ISSUER: &str = "https://attestation.test";
    const NOW_SECS: i64 = 1_755_000_000;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(NOW_SECS, 0).unwrap()
    }

    fn claims(iat: i64) -> TokenClaims {
        TokenClaims {
            iss: ISSUER.to_string(),
            aud: "emberagent".to_string(),
            iat,
            eat_nonce: "nonce-1".to_string(),
            hwmodel: "SIMULATED".to_string(),
            swname: "SIMULATED_ENCLAVE".to_string(),
            secboot: true,
            submods: Submods {
                container: ContainerClaims {
                    image_digest: "sha256:abc".to_string(),
                },
            },
        }
    }

    fn expected() -> ExpectedClaims {
        ExpectedClaims {
            issuer: ISSUER.to_string(),
            audience: "emberagent".to_string(),
            image_digest: "sha256:abc".to_string(),
            hwmodel: "SIMULATED".to_string(),
            swname: "SIMULATED_ENCLAVE".to_string(),
            nonce: "nonce-1".to_string(),
            require_secure_boot: true,
        }
    }

    fn verifier_with(key: &SigningKey) -> TokenVerifier {
        let mut verifier = TokenVerifier::new(300, 60);
        verifier.trust_issuer(ISSUER, *key.verifying_key());
        verifier
    }

    #[test]
    fn test_valid_token_round_trip() {
        let key = SigningKey::random(&mut OsRng);
        let token = sign_token(&key, &claims(NOW_SECS - 10)).unwrap();
        let verdict = verifier_with(&key).verify(&token, &expected(), now());
        assert_eq!(verdict, Verdict::Valid(claims(NOW_SECS - 10)));
    }

    #[test]
    fn test_verify_is_deterministic() {
        let key = SigningKey::random(&mut OsRng);
        let token = sign_token(&key, &claims(NOW_SECS)).unwrap();
        let verifier = verifier_with(&key);
        let first = verifier.verify(&token, &expected(), now());
        let second = verifier.verify(&token, &expected(), now());
        assert_eq!(first, second);
    }

    #[test]
    fn test_tampered_signature_byte() {
        let key = SigningKey::random(&mut OsRng);
        let token = sign_token(&key, &claims(NOW_SECS)).unwrap();

        let (head, sig_b64) = token.rsplit_once('.').unwrap();
        let mut sig = URL_SAFE_NO_PAD.decode(sig_b64).unwrap();
        sig[7] ^= 0x01;
        let tampered = format!("{}.{}", head, URL_SAFE_NO_PAD.encode(sig));

        let verdict = verifier_with(&key).verify(&tampered, &expected(), now());
        assert_eq!(verdict, Verdict::Invalid(InvalidReason::BadSignature));
    }

    #[test]
    fn test_stale_token_with_valid_signature() {
        let key = SigningKey::random(&mut OsRng);
        let token = sign_token(&key, &claims(NOW_SECS - 10_000)).unwrap();
        let verdict = verifier_with(&key).verify(&token, &expected(), now());
        assert_eq!(verdict, Verdict::Invalid(InvalidReason::StaleToken));
    }

    #[test]
    fn test_future_dated_token_is_stale() {
        let key = SigningKey::random(&mut OsRng);
        let token = sign_token(&key, &claims(NOW_SECS + 600)).unwrap();
        let verdict = verifier_with(&key).verify(&token, &expected(), now());
        assert_eq!(verdict, Verdict::Invalid(InvalidReason::StaleToken));
    }

    #[test]
    fn test_staleness_checked_before_signature() {
        // Stale AND signed by a stranger: staleness wins.
        let trusted = SigningKey::random(&mut OsRng);
        let stranger = SigningKey::random(&mut OsRng);
        let token = sign_token(&stranger, &claims(NOW_SECS - 10_000)).unwrap();
        let verdict = verifier_with(&trusted).verify(&token, &expected(), now());
        assert_eq!(verdict, Verdict::Invalid(InvalidReason::StaleToken));
    }

    #[test]
    fn test_wrong_audience() {
        let key = SigningKey::random(&mut OsRng);
        let mut c = claims(NOW_SECS);
        c.aud = "someone-else".to_string();
        let token = sign_token(&key, &c).unwrap();
        let verdict = verifier_with(&key).verify(&token, &expected(), now());
        assert_eq!(verdict, Verdict::Invalid(InvalidReason::ClaimMismatch));
    }

    #[test]
    fn test_wrong_nonce() {
        let key = SigningKey::random(&mut OsRng);
        let token = sign_token(&key, &claims(NOW_SECS)).unwrap();
        let verdict =
            verifier_with(&key).verify(&token, &expected().with_nonce("nonce-2"), now());
        assert_eq!(verdict, Verdict::Invalid(InvalidReason::ClaimMismatch));
    }

    #[test]
    fn test_wrong_image_digest() {
        let key = SigningKey::random(&mut OsRng);
        let mut c = claims(NOW_SECS);
        c.submods.container.image_digest = "sha256:evil".to_string();
        let token = sign_token(&key, &c).unwrap();
        let verdict = verifier_with(&key).verify(&token, &expected(), now());
        assert_eq!(verdict, Verdict::Invalid(InvalidReason::ClaimMismatch));
    }

    #[test]
    fn test_missing_secure_boot() {
        let key = SigningKey::random(&mut OsRng);
        let mut c = claims(NOW_SECS);
        c.secboot = false;
        let token = sign_token(&key, &c).unwrap();
        let verdict = verifier_with(&key).verify(&token, &expected(), now());
        assert_eq!(verdict, Verdict::Invalid(InvalidReason::ClaimMismatch));
    }

    #[test]
    fn test_unknown_issuer() {
        let trusted = SigningKey::random(&mut OsRng);
        let stranger = SigningKey::random(&mut OsRng);
        let mut c = claims(NOW_SECS);
        c.iss = "https://other.test".to_string();
        let token = sign_token(&stranger, &c).unwrap();
        let verdict = verifier_with(&trusted).verify(&token, &expected(), now());
        assert_eq!(verdict, Verdict::Invalid(InvalidReason::BadSignature));
    }

    #[test]
    fn test_garbage_inputs_are_unknown_format() {
        let key = SigningKey::random(&mut OsRng);
        let verifier = verifier_with(&key);
        for token in [
            "",
            "not-a-token",
            "one.two",
            "one.two.three.four",
            "!!!.@@@.###",
        ] {
            assert_eq!(
                verifier.verify(token, &expected(), now()),
                Verdict::Invalid(InvalidReason::UnknownFormat),
                "token {:?}",
                token
            );
        }
    }

    #[test]
    fn test_unsupported_algorithm() {
        let key = SigningKey::random(&mut OsRng);
        let token = sign_token(&key, &claims(NOW_SECS)).unwrap();
        let (_, rest) = token.split_once('.').unwrap();
        let rs256_header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
        let swapped = format!("{}.{}", rs256_header, rest);
        let verdict = verifier_with(&key).verify(&swapped, &expected(), now());
        assert_eq!(verdict, Verdict::Invalid(InvalidReason::UnknownFormat));
    }
}
