//! DPoP key handling and proof generation
//!
//! Keys are per-session: generated fresh for each OAuth flow and persisted
//! with the credentials they bind. Proofs are ES256 compact JWS with the
//! public JWK embedded in the header, carrying `ath` whenever an access
//! token travels alongside.

use crate::error::{AuthError, Result};
use crate::jose::{Claims, Header, create_signed_jwt};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use jose_jwa::{Algorithm, Signing};
use jose_jwk::{Jwk, Key, crypto};
use p256::ecdsa::SigningKey;
use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};
use sha2::{Digest, Sha256};

pub const JWT_HEADER_TYP_DPOP: &str = "dpop+jwt";

/// Generate a fresh per-session ES256 key
pub fn generate_key() -> Key {
    Key::from(&crypto::Key::from(p256::SecretKey::random(
        &mut rand::rngs::ThreadRng::default(),
    )))
}

/// Serialize a key for vault storage
pub fn key_to_json(key: &Key) -> Result<String> {
    serde_json::to_string(key).map_err(AuthError::from)
}

/// Parse a key back out of vault storage
pub fn key_from_json(json: &str) -> Result<Key> {
    serde_json::from_str(json).map_err(AuthError::from)
}

fn generate_jti() -> String {
    let mut rng = SmallRng::from_entropy();
    let mut bytes = [0u8; 12];
    rng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Hash an access token for the `ath` claim
pub fn access_token_hash(token: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(token.as_bytes()))
}

/// Build a compact JWS (ES256) DPoP proof with embedded public JWK.
pub fn build_proof(
    key: &Key,
    method: &str,
    url: &str,
    nonce: Option<&str>,
    access_token: Option<&str>,
) -> Result<String> {
    let secret = match crypto::Key::try_from(key)
        .map_err(|e| AuthError::crypto(format!("unusable DPoP key: {e:?}")))?
    {
        crypto::Key::P256(crypto::Kind::Secret(sk)) => sk,
        _ => return Err(AuthError::crypto("DPoP key is not a P-256 secret")),
    };

    let header = Header {
        alg: Algorithm::Signing(Signing::Es256),
        typ: Some(JWT_HEADER_TYP_DPOP.into()),
        jwk: Some(Jwk {
            key: Key::from(&crypto::Key::from(secret.public_key())),
            prm: Default::default(),
        }),
    };
    let claims = Claims {
        jti: Some(generate_jti()),
        iat: Some(Utc::now().timestamp()),
        htm: Some(method.to_string()),
        htu: Some(url.to_string()),
        ath: access_token.map(access_token_hash),
        nonce: nonce.map(String::from),
    };
    create_signed_jwt(SigningKey::from(secret), &header, &claims).map_err(AuthError::from)
}

/// True when a response asks the client to retry with a server nonce.
///
/// Authorization servers answer 400 with `{"error": "use_dpop_nonce"}`;
/// resource servers answer 401 with a `WWW-Authenticate: DPoP` challenge.
pub fn is_use_dpop_nonce(status: http::StatusCode, www_authenticate: Option<&str>, body: &[u8]) -> bool {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        error: String,
    }
    if status == http::StatusCode::BAD_REQUEST {
        if let Ok(parsed) = serde_json::from_slice::<ErrorBody>(body) {
            return parsed.error == "use_dpop_nonce";
        }
    }
    if status == http::StatusCode::UNAUTHORIZED {
        if let Some(challenge) = www_authenticate {
            return challenge.starts_with("DPoP") && challenge.contains(r#"error="use_dpop_nonce""#);
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_segment(segment: &str) -> serde_json::Value {
        let bytes = URL_SAFE_NO_PAD.decode(segment).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn proof_carries_embedded_jwk_and_claims() {
        let key = generate_key();
        let proof = build_proof(
            &key,
            "POST",
            "https://auth.example/par",
            Some("server-nonce"),
            None,
        )
        .unwrap();

        let segments: Vec<&str> = proof.split('.').collect();
        assert_eq!(segments.len(), 3);

        let header = decode_segment(segments[0]);
        assert_eq!(header["alg"], "ES256");
        assert_eq!(header["typ"], "dpop+jwt");
        assert_eq!(header["jwk"]["kty"], "EC");
        assert_eq!(header["jwk"]["crv"], "P-256");
        // The private scalar must never be embedded.
        assert!(header["jwk"].get("d").is_none());

        let claims = decode_segment(segments[1]);
        assert_eq!(claims["htm"], "POST");
        assert_eq!(claims["htu"], "https://auth.example/par");
        assert_eq!(claims["nonce"], "server-nonce");
        assert!(claims.get("ath").is_none());
        assert!(claims["jti"].is_string());
    }

    #[test]
    fn ath_present_when_token_given() {
        let key = generate_key();
        let proof = build_proof(&key, "GET", "https://pds.example/xrpc/x", None, Some("tok")).unwrap();
        let claims = decode_segment(proof.split('.').nth(1).unwrap());
        assert_eq!(claims["ath"], access_token_hash("tok"));
    }

    #[test]
    fn keys_round_trip_json() {
        let key = generate_key();
        let json = key_to_json(&key).unwrap();
        let back = key_from_json(&json).unwrap();
        assert_eq!(key, back);
    }

    #[test]
    fn fresh_keys_differ() {
        // Per-session keys: two flows never share material.
        let a = key_to_json(&generate_key()).unwrap();
        let b = key_to_json(&generate_key()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn nonce_detection() {
        assert!(is_use_dpop_nonce(
            http::StatusCode::BAD_REQUEST,
            None,
            br#"{"error":"use_dpop_nonce"}"#,
        ));
        assert!(is_use_dpop_nonce(
            http::StatusCode::UNAUTHORIZED,
            Some(r#"DPoP error="use_dpop_nonce""#),
            b"",
        ));
        assert!(!is_use_dpop_nonce(
            http::StatusCode::BAD_REQUEST,
            None,
            br#"{"error":"invalid_request"}"#,
        ));
        assert!(!is_use_dpop_nonce(http::StatusCode::OK, None, b""));
    }
}
