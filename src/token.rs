//! Compact signed identity tokens.
//!
//! Three URL-safe segments, `header.payload.signature`, signed with
//! HMAC-SHA256 over `header.payload`. The codec is a pure signing
//! primitive: it never checks expiry — callers layer semantic checks
//! (expiry, session liveness) on top of a verified payload.
//!
//! Secrets are an ordered list: the newest (index 0) signs, all of them
//! verify. Dropping the oldest entry after a rotation window invalidates
//! tokens signed with it without interrupting current clients.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token structure is invalid")]
    InvalidFormat,
    #[error("token signature is invalid")]
    InvalidSignature,
    #[error("token payload is incomplete")]
    InvalidPayload,
}

/// Claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub email: String,
    pub roles: Vec<String>,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub iat: i64,
    pub exp: i64,
}

pub struct TokenCodec {
    secrets: Vec<String>,
}

impl TokenCodec {
    pub fn new(secrets: Vec<String>) -> anyhow::Result<Self> {
        anyhow::ensure!(
            !secrets.is_empty(),
            "token codec requires at least one signing secret"
        );
        Ok(Self { secrets })
    }

    /// Serialize and sign `claims` into a compact three-segment token.
    pub fn issue(&self, claims: &AccessClaims) -> Result<String, TokenError> {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload_json =
            serde_json::to_vec(claims).map_err(|_| TokenError::InvalidPayload)?;
        let payload = URL_SAFE_NO_PAD.encode(payload_json);
        let signing_input = format!("{header}.{payload}");
        let signature =
            URL_SAFE_NO_PAD.encode(sign(&self.secrets[0], signing_input.as_bytes()));
        Ok(format!("{signing_input}.{signature}"))
    }

    /// Check structure and signature, then decode the payload.
    ///
    /// The signature comparison is constant-time (via `subtle`), so
    /// verification latency does not leak the position of the first
    /// mismatched byte.
    pub fn verify(&self, token: &str) -> Result<AccessClaims, TokenError> {
        let segments: Vec<&str> = token.split('.').collect();
        let [header, payload, signature] = segments[..] else {
            return Err(TokenError::InvalidFormat);
        };

        let provided = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::InvalidFormat)?;
        let signing_input = format!("{header}.{payload}");

        // Newest-first ordering means the common case matches on the
        // first attempt; older secrets cover the rotation window.
        let matched = self.secrets.iter().any(|secret| {
            let expected = sign(secret, signing_input.as_bytes());
            bool::from(expected.as_slice().ct_eq(&provided))
        });
        if !matched {
            return Err(TokenError::InvalidSignature);
        }

        let payload_bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TokenError::InvalidFormat)?;
        let claims: AccessClaims =
            serde_json::from_slice(&payload_bytes).map_err(|_| TokenError::InvalidPayload)?;
        if claims.sub.is_empty() || claims.session_id.is_empty() {
            return Err(TokenError::InvalidPayload);
        }

        Ok(claims)
    }
}

fn sign(secret: &str, input: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(input);
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims() -> AccessClaims {
        AccessClaims {
            sub: "user-learner".into(),
            email: "learner@example.com".into(),
            roles: vec!["user".into()],
            session_id: "sess-1".into(),
            iat: 1_700_000_000,
            exp: 1_700_000_900,
        }
    }

    fn codec() -> TokenCodec {
        TokenCodec::new(vec!["test-secret".into()]).unwrap()
    }

    #[test]
    fn round_trip() {
        let codec = codec();
        let token = codec.issue(&claims()).unwrap();
        assert_eq!(token.split('.').count(), 3);
        assert_eq!(codec.verify(&token).unwrap(), claims());
    }

    /// Replace one base64 character with a different one, keeping the
    /// segment decodable so the failure is a signature mismatch.
    fn corrupt_at(segment: &str, index: usize) -> String {
        let mut chars: Vec<char> = segment.chars().collect();
        chars[index] = if chars[index] == 'A' { 'B' } else { 'A' };
        chars.into_iter().collect()
    }

    #[test]
    fn tampered_payload_fails_signature_check() {
        let codec = codec();
        let token = codec.issue(&claims()).unwrap();
        let parts: Vec<&str> = token.split('.').collect();

        for index in [0, parts[1].len() - 1] {
            let tampered = format!("{}.{}.{}", parts[0], corrupt_at(parts[1], index), parts[2]);
            assert_eq!(
                codec.verify(&tampered).unwrap_err(),
                TokenError::InvalidSignature
            );
        }
    }

    #[test]
    fn tampered_signature_fails() {
        let codec = codec();
        let token = codec.issue(&claims()).unwrap();
        let parts: Vec<&str> = token.split('.').collect();

        for index in [0, parts[2].len() - 1] {
            let tampered = format!("{}.{}.{}", parts[0], parts[1], corrupt_at(parts[2], index));
            assert_eq!(
                codec.verify(&tampered).unwrap_err(),
                TokenError::InvalidSignature
            );
        }
    }

    #[test]
    fn wrong_segment_count_is_invalid_format() {
        let codec = codec();
        assert_eq!(
            codec.verify("only.two").unwrap_err(),
            TokenError::InvalidFormat
        );
        assert_eq!(
            codec.verify("a.b.c.d").unwrap_err(),
            TokenError::InvalidFormat
        );
        assert_eq!(codec.verify("").unwrap_err(), TokenError::InvalidFormat);
    }

    #[test]
    fn foreign_secret_is_rejected() {
        let token = codec().issue(&claims()).unwrap();
        let other = TokenCodec::new(vec!["another-secret".into()]).unwrap();
        assert_eq!(
            other.verify(&token).unwrap_err(),
            TokenError::InvalidSignature
        );
    }

    #[test]
    fn rotated_secrets_still_verify_old_tokens() {
        let old = TokenCodec::new(vec!["old-secret".into()]).unwrap();
        let token = old.issue(&claims()).unwrap();

        let rotated =
            TokenCodec::new(vec!["new-secret".into(), "old-secret".into()]).unwrap();
        assert_eq!(rotated.verify(&token).unwrap(), claims());

        // New issuance signs with the newest secret.
        let fresh = rotated.issue(&claims()).unwrap();
        let new_only = TokenCodec::new(vec!["new-secret".into()]).unwrap();
        assert!(new_only.verify(&fresh).is_ok());
        assert!(new_only.verify(&token).is_err());
    }

    #[test]
    fn missing_subject_or_session_is_invalid_payload() {
        let codec = codec();
        let mut incomplete = claims();
        incomplete.sub = String::new();
        let token = codec.issue(&incomplete).unwrap();
        assert_eq!(codec.verify(&token).unwrap_err(), TokenError::InvalidPayload);

        let mut incomplete = claims();
        incomplete.session_id = String::new();
        let token = codec.issue(&incomplete).unwrap();
        assert_eq!(codec.verify(&token).unwrap_err(), TokenError::InvalidPayload);
    }

    #[test]
    fn expiry_is_not_the_codec_s_concern() {
        let codec = codec();
        let mut expired = claims();
        expired.exp = 0;
        let token = codec.issue(&expired).unwrap();
        // Verification succeeds; the orchestrator decides what expiry means.
        assert_eq!(codec.verify(&token).unwrap().exp, 0);
    }
}
