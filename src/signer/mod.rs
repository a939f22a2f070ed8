//! Signed URL tokens.
//!
//! Every playlist and segment request carries an opaque bearer token bound
//! to a single `(video_id, resource)` pair and an expiry. Tokens are
//! stateless: the MAC over a deterministic serialization of the claims is
//! the only authority, so rotating the secret invalidates everything
//! outstanding.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,

    #[error("invalid token signature")]
    BadSignature,

    #[error("token expired")]
    Expired,
}

/// Verified claims of a signed token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Video the token grants access to.
    pub video_id: String,
    /// Final path segment the token is bound to (e.g. `720p_007.ts`).
    pub resource: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Seconds since epoch.
    pub expires_at: u64,
}

#[derive(Serialize, Deserialize)]
struct SignedToken {
    #[serde(flatten)]
    claims: TokenClaims,
    /// Hex-encoded HMAC-SHA256 over the canonical claims string.
    sig: String,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Issues and verifies stream tokens with a process-wide secret.
pub struct UrlSigner {
    secret: Vec<u8>,
    default_ttl_secs: u64,
}

impl UrlSigner {
    /// Minimum secret length in bytes.
    pub const MIN_SECRET_LEN: usize = 32;

    /// Construct a signer. Panics are avoided: short secrets are a
    /// configuration error and rejected up front.
    pub fn new(secret: impl Into<Vec<u8>>, default_ttl_secs: u64) -> Result<Self, anyhow::Error> {
        let secret = secret.into();
        if secret.len() < Self::MIN_SECRET_LEN {
            anyhow::bail!(
                "signing secret must be at least {} bytes (got {})",
                Self::MIN_SECRET_LEN,
                secret.len()
            );
        }
        Ok(Self {
            secret,
            default_ttl_secs,
        })
    }

    pub fn default_ttl_secs(&self) -> u64 {
        self.default_ttl_secs
    }

    /// Deterministic serialization the MAC covers. A missing user is
    /// encoded as `-` so the field cannot be confused with an empty id.
    fn canonical(claims: &TokenClaims) -> String {
        format!(
            "{}\n{}\n{}\n{}",
            claims.video_id,
            claims.resource,
            claims.expires_at,
            claims.user_id.as_deref().unwrap_or("-"),
        )
    }

    fn mac(&self, claims: &TokenClaims) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(Self::canonical(claims).as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    /// Mint a token for one resource. `ttl_secs` falls back to the
    /// configured default.
    pub fn mint(
        &self,
        video_id: &str,
        resource: &str,
        user_id: Option<&str>,
        ttl_secs: Option<u64>,
    ) -> String {
        let claims = TokenClaims {
            video_id: video_id.to_string(),
            resource: resource.to_string(),
            user_id: user_id.map(str::to_string),
            expires_at: now_secs() + ttl_secs.unwrap_or(self.default_ttl_secs),
        };
        let sig = hex::encode(self.mac(&claims));
        let token = SignedToken { claims, sig };
        // Serialization of a plain struct cannot fail.
        let json = serde_json::to_vec(&token).expect("token serialization");
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Mint one token per resource, e.g. for every variant named by a
    /// master playlist.
    pub fn mint_many(
        &self,
        video_id: &str,
        resources: &[&str],
        user_id: Option<&str>,
        ttl_secs: Option<u64>,
    ) -> HashMap<String, String> {
        resources
            .iter()
            .map(|r| (r.to_string(), self.mint(video_id, r, user_id, ttl_secs)))
            .collect()
    }

    /// Decode, recompute the MAC (constant-time compare) and check expiry.
    pub fn verify(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let json = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| TokenError::Malformed)?;
        let signed: SignedToken =
            serde_json::from_slice(&json).map_err(|_| TokenError::Malformed)?;

        let sig = hex::decode(&signed.sig).map_err(|_| TokenError::Malformed)?;

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(Self::canonical(&signed.claims).as_bytes());
        mac.verify_slice(&sig).map_err(|_| TokenError::BadSignature)?;

        if now_secs() > signed.claims.expires_at {
            return Err(TokenError::Expired);
        }

        Ok(signed.claims)
    }
}
