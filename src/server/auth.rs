//! Bearer authentication for the JSON API.
//!
//! Account registration and login live in an external service that shares
//! the process secret; what crosses the boundary is an HMAC-signed session
//! token carried as `Authorization: Bearer <token>`. This module verifies
//! those tokens and exposes the requesting user to handlers.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::RequestPartsExt;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

use super::error::ApiError;
use super::AppContext;
use crate::error::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    user_id: String,
    expires_at: u64,
    sig: String,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Issues and verifies session bearer tokens.
pub struct SessionKeys {
    secret: Vec<u8>,
}

impl SessionKeys {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn mac(&self, user_id: &str, expires_at: u64) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(format!("{user_id}\n{expires_at}").as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    /// Mint a session token for a user, e.g. from the account service or
    /// the test harness.
    pub fn issue(&self, user_id: &str, ttl_secs: u64) -> String {
        let expires_at = now_secs() + ttl_secs;
        let claims = SessionClaims {
            user_id: user_id.to_string(),
            expires_at,
            sig: hex::encode(self.mac(user_id, expires_at)),
        };
        let json = serde_json::to_vec(&claims).expect("session serialization");
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Returns the user id for a valid, unexpired token.
    pub fn verify(&self, token: &str) -> Option<String> {
        let json = URL_SAFE_NO_PAD.decode(token).ok()?;
        let claims: SessionClaims = serde_json::from_slice(&json).ok()?;

        let sig = hex::decode(&claims.sig).ok()?;
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(format!("{}\n{}", claims.user_id, claims.expires_at).as_bytes());
        mac.verify_slice(&sig).ok()?;

        if now_secs() > claims.expires_at {
            return None;
        }
        Some(claims.user_id)
    }
}

async fn bearer_user(parts: &mut Parts, ctx: &AppContext) -> Option<String> {
    let TypedHeader(Authorization(bearer)) = parts
        .extract::<TypedHeader<Authorization<Bearer>>>()
        .await
        .ok()?;
    ctx.sessions.verify(bearer.token())
}

/// Extractor requiring an authenticated user.
pub struct CurrentUser(pub String);

#[async_trait]
impl FromRequestParts<AppContext> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        ctx: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        bearer_user(parts, ctx)
            .await
            .map(CurrentUser)
            .ok_or_else(|| ApiError::from(Error::Unauthorized))
    }
}

/// Extractor for routes where identity is optional (public playback).
/// An absent or invalid bearer token degrades to anonymous.
pub struct MaybeUser(pub Option<String>);

#[async_trait]
impl FromRequestParts<AppContext> for MaybeUser {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        ctx: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(bearer_user(parts, ctx).await))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> SessionKeys {
        SessionKeys::new(b"0123456789abcdef0123456789abcdef".to_vec())
    }

    #[test]
    fn issue_verify_round_trip() {
        let keys = keys();
        let token = keys.issue("user-1", 3600);
        assert_eq!(keys.verify(&token).as_deref(), Some("user-1"));
    }

    #[test]
    fn wrong_secret_fails() {
        let token = keys().issue("user-1", 3600);
        let other = SessionKeys::new(b"ffffffffffffffffffffffffffffffff".to_vec());
        assert_eq!(other.verify(&token), None);
    }

    #[test]
    fn expired_session_fails() {
        let keys = keys();
        let token = keys.issue("user-1", 0);
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert_eq!(keys.verify(&token), None);
    }

    #[test]
    fn garbage_fails() {
        assert_eq!(keys().verify("garbage"), None);
    }
}
