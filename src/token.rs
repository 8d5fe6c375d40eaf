//! Compact signed tokens: `header.payload.signature`, base64url segments,
//! HMAC-SHA256 over the first two.
//!
//! Verification order is structure, then signature, then expiry. Signature
//! checks are constant-time and a mismatch never reveals which part of the
//! token was tampered with.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::principal::{Permission, Role};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
}

/// Access tokens prove current session validity; refresh tokens are
/// single-use credentials for minting a new pair.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Serialize)]
struct Header {
    alg: &'static str,
    typ: &'static str,
}

const HEADER: Header = Header {
    alg: "HS256",
    typ: "JWT",
};

/// Claims embedded in both tokens of a pair.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Principal id.
    pub sub: String,
    /// Session id the token is bound to.
    pub sid: String,
    pub role: Role,
    pub perms: Vec<Permission>,
    pub kind: TokenKind,
    /// Issued-at, unix seconds.
    pub iat: i64,
    /// Expiry, unix seconds, computed once at issuance.
    pub exp: i64,
    /// Per-issuance token id. Two tokens minted in the same second for the
    /// same session still differ, so blacklisting one never taints the other.
    pub jti: String,
}

pub struct TokenCodec {
    secret: SecretString,
    clock: Arc<dyn Clock>,
}

impl TokenCodec {
    #[must_use]
    pub fn new(secret: SecretString, clock: Arc<dyn Clock>) -> Self {
        Self { secret, clock }
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC accepts keys of any length; new_from_slice cannot fail.
        HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .unwrap_or_else(|_| unreachable!("hmac accepts any key length"))
    }

    /// Sign claims into a compact token, stamping `iat` and `exp`.
    ///
    /// # Errors
    /// Returns `Malformed` only if the claims fail to serialize.
    pub fn issue(&self, mut claims: Claims, ttl_seconds: i64) -> Result<String, TokenError> {
        claims.iat = self.clock.now_unix();
        claims.exp = claims.iat + ttl_seconds;
        claims.jti = Uuid::new_v4().to_string();

        let header = serde_json::to_vec(&HEADER).map_err(|_| TokenError::Malformed)?;
        let payload = serde_json::to_vec(&claims).map_err(|_| TokenError::Malformed)?;
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(payload)
        );

        let mut mac = self.mac();
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{signing_input}.{signature}"))
    }

    /// Verify a token and return its claims.
    ///
    /// # Errors
    /// `Malformed` for structural problems, `InvalidSignature` for any
    /// signature mismatch, `Expired` once `exp` has passed. The payload is
    /// never trusted before the signature check.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let mut segments = token.split('.');
        let (header, payload, signature) = match (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) {
            (Some(header), Some(payload), Some(signature), None) => (header, payload, signature),
            _ => return Err(TokenError::Malformed),
        };

        let signature_bytes = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::Malformed)?;

        let mut mac = self.mac();
        mac.update(format!("{header}.{payload}").as_bytes());
        mac.verify_slice(&signature_bytes)
            .map_err(|_| TokenError::InvalidSignature)?;

        let payload_bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TokenError::Malformed)?;
        let claims: Claims =
            serde_json::from_slice(&payload_bytes).map_err(|_| TokenError::Malformed)?;

        if claims.exp <= self.clock.now_unix() {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use uuid::Uuid;

    fn codec(secret: &str, now: i64) -> (TokenCodec, Arc<ManualClock>) {
        let clock = ManualClock::new(now);
        (
            TokenCodec::new(SecretString::from(secret.to_string()), clock.clone()),
            clock,
        )
    }

    fn claims() -> Claims {
        Claims {
            sub: Uuid::new_v4().to_string(),
            sid: "session".to_string(),
            role: Role::Customer,
            perms: Role::Customer.permissions().to_vec(),
            kind: TokenKind::Access,
            iat: 0,
            exp: 0,
            jti: String::new(),
        }
    }

    #[test]
    fn issue_verify_round_trip() -> anyhow::Result<()> {
        let (codec, _clock) = codec("secret", 1_000);
        let original = claims();
        let token = codec.issue(original.clone(), 900)?;
        let verified = codec.verify(&token)?;
        assert_eq!(verified.sub, original.sub);
        assert_eq!(verified.sid, "session");
        assert_eq!(verified.role, Role::Customer);
        assert_eq!(verified.kind, TokenKind::Access);
        assert_eq!(verified.iat, 1_000);
        assert_eq!(verified.exp, 1_900);
        Ok(())
    }

    #[test]
    fn same_second_issuance_yields_distinct_tokens() -> anyhow::Result<()> {
        let (codec, _clock) = codec("secret", 1_000);
        let original = claims();
        // Frozen clock: identical iat/exp, yet the tokens must not collide.
        let first = codec.issue(original.clone(), 900)?;
        let second = codec.issue(original, 900)?;
        assert_ne!(first, second);
        assert_ne!(codec.verify(&first)?.jti, codec.verify(&second)?.jti);
        Ok(())
    }

    #[test]
    fn verify_fails_expired_at_boundary() -> anyhow::Result<()> {
        let (codec, clock) = codec("secret", 1_000);
        let token = codec.issue(claims(), 900)?;
        clock.set(1_899);
        assert!(codec.verify(&token).is_ok());
        clock.set(1_900);
        assert_eq!(codec.verify(&token), Err(TokenError::Expired));
        Ok(())
    }

    #[test]
    fn verify_rejects_wrong_secret() -> anyhow::Result<()> {
        let (codec, _clock) = codec("secret", 1_000);
        let token = codec.issue(claims(), 900)?;
        let (other, _clock) = super::tests::codec("other", 1_000);
        assert_eq!(other.verify(&token), Err(TokenError::InvalidSignature));
        Ok(())
    }

    #[test]
    fn verify_rejects_wrong_segment_count() {
        let (codec, _clock) = codec("secret", 1_000);
        assert_eq!(codec.verify("only-one"), Err(TokenError::Malformed));
        assert_eq!(codec.verify("a.b"), Err(TokenError::Malformed));
        assert_eq!(codec.verify("a.b.c.d"), Err(TokenError::Malformed));
    }

    #[test]
    fn tampered_payload_is_a_signature_failure() -> anyhow::Result<()> {
        let (codec, _clock) = codec("secret", 1_000);
        let token = codec.issue(claims(), 900)?;
        let mut segments: Vec<&str> = token.split('.').collect();
        let payload = URL_SAFE_NO_PAD.encode(b"{\"sub\":\"evil\"}");
        segments[1] = &payload;
        let tampered = segments.join(".");
        // Same error whether header or payload was altered.
        assert_eq!(codec.verify(&tampered), Err(TokenError::InvalidSignature));
        Ok(())
    }

    #[test]
    fn expiry_is_not_recomputed_at_verify_time() -> anyhow::Result<()> {
        let (codec, clock) = codec("secret", 1_000);
        let token = codec.issue(claims(), 60)?;
        // Verifying later does not extend the embedded expiry.
        clock.set(1_059);
        assert!(codec.verify(&token).is_ok());
        clock.set(1_061);
        assert_eq!(codec.verify(&token), Err(TokenError::Expired));
        Ok(())
    }
}
