//! Stream authentication.
//!
//! Three modes in precedence order: signed short-lived tokens (HMAC-SHA256,
//! verified against a shared secret and expected issuer), static bearer
//! equality, and open. Failures are distinct so callers can surface the
//! proper stream status: no credential at all, a bad or expired credential,
//! or a valid signature minted by the wrong issuer.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use protocol::RejectStatus;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::GatewayConfig;

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing auth token")]
    Unauthenticated,
    #[error("invalid auth token")]
    PermissionDenied,
    #[error("token expired")]
    Expired,
    #[error("issuer mismatch")]
    IssuerMismatch,
}

impl AuthError {
    /// Maps the failure onto the wire-level reject status.
    pub fn reject_status(&self) -> RejectStatus {
        match self {
            AuthError::Unauthenticated => RejectStatus::Unauthenticated,
            AuthError::PermissionDenied | AuthError::Expired => RejectStatus::PermissionDenied,
            AuthError::IssuerMismatch => RejectStatus::IssuerMismatch,
        }
    }
}

/// Verification mode derived from gateway configuration.
pub enum AuthMode {
    Open,
    Static(String),
    Signed(TokenVerifier),
}

impl AuthMode {
    pub fn from_config(cfg: &GatewayConfig) -> Self {
        if let Some(secret) = &cfg.hmac_secret {
            return AuthMode::Signed(TokenVerifier::new(secret.clone(), cfg.issuer.clone()));
        }
        match &cfg.auth_token {
            Some(token) if !token.is_empty() => AuthMode::Static(token.clone()),
            _ => AuthMode::Open,
        }
    }

    /// Checks the `authorization` metadata value of one stream.
    pub fn verify(&self, authorization: Option<&str>) -> Result<(), AuthError> {
        if matches!(self, AuthMode::Open) {
            return Ok(());
        }
        let raw = authorization.ok_or(AuthError::Unauthenticated)?;
        let token = raw.strip_prefix("Bearer ").unwrap_or(raw);
        match self {
            AuthMode::Open => Ok(()),
            AuthMode::Static(expected) => {
                if token == expected {
                    Ok(())
                } else {
                    Err(AuthError::PermissionDenied)
                }
            }
            AuthMode::Signed(verifier) => verifier.verify(token).map(|_| ()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Claims {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

#[derive(Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Validates HMAC-SHA256 signed tokens of the `header.claims.signature`
/// shape.
pub struct TokenVerifier {
    secret: Vec<u8>,
    issuer: Option<String>,
}

impl TokenVerifier {
    pub fn new(secret: Vec<u8>, issuer: Option<String>) -> Self {
        TokenVerifier { secret, issuer }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify_at(token, unix_now())
    }

    pub fn verify_at(&self, token: &str, now: i64) -> Result<Claims, AuthError> {
        let mut parts = token.split('.');
        let (header_b64, claims_b64, sig_b64) =
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(h), Some(c), Some(s), None) => (h, c, s),
                _ => return Err(AuthError::PermissionDenied),
            };

        let header_bytes = URL_SAFE_NO_PAD
            .decode(header_b64)
            .map_err(|_| AuthError::PermissionDenied)?;
        let header: Header =
            serde_json::from_slice(&header_bytes).map_err(|_| AuthError::PermissionDenied)?;
        if header.alg != "HS256" {
            return Err(AuthError::PermissionDenied);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| AuthError::PermissionDenied)?;
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| AuthError::PermissionDenied)?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| AuthError::PermissionDenied)?;

        let claims_bytes = URL_SAFE_NO_PAD
            .decode(claims_b64)
            .map_err(|_| AuthError::PermissionDenied)?;
        let claims: Claims =
            serde_json::from_slice(&claims_bytes).map_err(|_| AuthError::PermissionDenied)?;

        if let Some(exp) = claims.exp {
            if exp <= now {
                return Err(AuthError::Expired);
            }
        }
        if let Some(expected) = &self.issuer {
            if claims.iss.as_deref() != Some(expected.as_str()) {
                return Err(AuthError::IssuerMismatch);
            }
        }
        Ok(claims)
    }
}

/// Mints short-lived tokens for agents; the counterpart of
/// [`TokenVerifier`].
pub struct TokenSigner {
    secret: Vec<u8>,
    issuer: String,
    ttl: Duration,
}

impl TokenSigner {
    pub fn new(secret: Vec<u8>, issuer: impl Into<String>, ttl: Duration) -> Self {
        let ttl = if ttl.is_zero() {
            Duration::from_secs(15 * 60)
        } else {
            ttl
        };
        TokenSigner {
            secret,
            issuer: issuer.into(),
            ttl,
        }
    }

    pub fn sign(&self, subject: &str) -> String {
        self.sign_at(subject, unix_now())
    }

    pub fn sign_at(&self, subject: &str, now: i64) -> String {
        let header = Header {
            alg: "HS256".to_string(),
            typ: "JWT".to_string(),
        };
        let claims = Claims {
            iss: Some(self.issuer.clone()),
            sub: Some(subject.to_string()),
            iat: Some(now),
            exp: Some(now + self.ttl.as_secs() as i64),
        };

        let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).unwrap_or_default());
        let claims_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap_or_default());

        let mut mac = match HmacSha256::new_from_slice(&self.secret) {
            Ok(mac) => mac,
            Err(_) => return String::new(),
        };
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        let sig_b64 = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        format!("{header_b64}.{claims_b64}.{sig_b64}")
    }
}
