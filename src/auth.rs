//! HS256 bearer tokens and the principal they resolve to.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

use crate::app_error::AppError;

type HmacSha256 = Hmac<Sha256>;

const HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,
    #[error("Malformed token")]
    Malformed,
    #[error("Unsupported token algorithm")]
    UnsupportedAlgorithm,
    #[error("Invalid token signature")]
    BadSignature,
    #[error("Token expired")]
    Expired,
    #[error("Unknown principal")]
    UnknownPrincipal,
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::Unauthorized(err.to_string())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    pub sub: Uuid,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Deserialize)]
struct Header {
    alg: String,
}

/// Issues a token for `sub` valid for `ttl_secs` seconds.
pub fn sign_token(secret: &str, sub: Uuid, ttl_secs: i64) -> String {
    let now = Utc::now().timestamp();
    let payload = serde_json::json!({ "sub": sub, "iat": now, "exp": now + ttl_secs }).to_string();

    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(HEADER.as_bytes()),
        URL_SAFE_NO_PAD.encode(payload)
    );
    let signature = URL_SAFE_NO_PAD.encode(mac(secret, &signing_input).finalize().into_bytes());

    format!("{signing_input}.{signature}")
}

/// Checks signature and expiry, returning the embedded claims.
pub fn verify_token(secret: &str, token: &str) -> Result<Claims, AuthError> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthError::Malformed);
    };

    let header: Header = URL_SAFE_NO_PAD
        .decode(header_b64)
        .ok()
        .and_then(|raw| serde_json::from_slice(&raw).ok())
        .ok_or(AuthError::Malformed)?;
    if header.alg != "HS256" {
        return Err(AuthError::UnsupportedAlgorithm);
    }

    let signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| AuthError::Malformed)?;
    mac(secret, &format!("{header_b64}.{payload_b64}"))
        .verify_slice(&signature)
        .map_err(|_| AuthError::BadSignature)?;

    let claims: Claims = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .ok()
        .and_then(|raw| serde_json::from_slice(&raw).ok())
        .ok_or(AuthError::Malformed)?;

    if claims.exp <= Utc::now().timestamp() {
        return Err(AuthError::Expired);
    }

    Ok(claims)
}

/// Extracts the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    header
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::MissingToken)
}

fn mac(secret: &str, signing_input: &str) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC key length is unrestricted"));
    mac.update(signing_input.as_bytes());
    mac
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Vendor,
    DeliveryStaff,
}

/// The authenticated actor attached to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub id: Uuid,
    pub role: Role,
}

impl Principal {
    fn require(&self, role: Role, message: &str) -> Result<Uuid, AppError> {
        if self.role == role {
            Ok(self.id)
        } else {
            Err(AppError::ForbiddenResource(message.into()))
        }
    }

    pub fn require_customer(&self) -> Result<Uuid, AppError> {
        self.require(Role::Customer, "Only customers can perform this action")
    }

    pub fn require_vendor(&self) -> Result<Uuid, AppError> {
        self.require(Role::Vendor, "Only vendors can perform this action")
    }

    pub fn require_delivery_staff(&self) -> Result<Uuid, AppError> {
        self.require(
            Role::DeliveryStaff,
            "Only delivery staff can perform this action",
        )
    }
}
