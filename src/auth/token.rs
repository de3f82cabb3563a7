use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose, Engine as _};
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::config::JwtConfig;
use crate::config_error;
use crate::core::{RouterError, RouterResult};

/// Claims read from a token's payload segment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Expiry as seconds since the epoch; fractional values are allowed
    pub exp: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl Claims {
    /// Expired once the current time reaches `exp`.
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.exp.is_some_and(|exp| now_ms as f64 >= exp * 1000.0)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }

    /// Seconds until expiry, if the token carries one.
    pub fn seconds_left(&self) -> Option<i64> {
        self.exp.map(|exp| exp as i64 - now_millis() / 1000)
    }
}

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Result of inspecting a stored token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenState {
    /// No claims segment; accepted as-is
    Opaque,
    Valid(Claims),
    Expired(Claims),
    /// Claims could not be read or the signature did not verify
    Invalid(String),
}

impl TokenState {
    pub fn is_usable(&self) -> bool {
        matches!(self, TokenState::Opaque | TokenState::Valid(_))
    }
}

/// Decode the claims segment without verifying the signature.
///
/// Returns `Ok(None)` for tokens that carry no `.`-separated claims segment.
pub fn decode_claims(token: &str) -> RouterResult<Option<Claims>> {
    if !token.contains('.') {
        return Ok(None);
    }
    let segment = token
        .split('.')
        .nth(1)
        .ok_or_else(|| RouterError::Validation("Missing claims segment".to_string()))?;
    let segment = segment.trim_end_matches('=');
    let bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(segment)
        .or_else(|_| general_purpose::STANDARD_NO_PAD.decode(segment))
        .map_err(|e| RouterError::Validation(format!("Claims segment is not base64: {e}")))?;
    let claims: Claims = serde_json::from_slice(&bytes)?;
    Ok(Some(claims))
}

/// Signature verification for deployments that configure key material.
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(config: &JwtConfig) -> RouterResult<Self> {
        let decoding_key = match config.algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                let secret = config
                    .secret
                    .as_ref()
                    .ok_or_else(|| config_error!("jwt secret is required"))?;
                let key: Vec<u8> = if config.base64_secret {
                    general_purpose::STANDARD
                        .decode(secret)
                        .map_err(|e| config_error!("jwt secret is not base64: {}", e))?
                } else {
                    secret.as_bytes().to_vec()
                };
                DecodingKey::from_secret(&key)
            }
            Algorithm::RS256 => {
                let public_key = config
                    .public_key
                    .as_ref()
                    .ok_or_else(|| config_error!("jwt public_key is required"))?;
                DecodingKey::from_rsa_pem(public_key.as_bytes())?
            }
            Algorithm::ES256 => {
                let public_key = config
                    .public_key
                    .as_ref()
                    .ok_or_else(|| config_error!("jwt public_key is required"))?;
                DecodingKey::from_ec_pem(public_key.as_bytes())?
            }
            other => return Err(config_error!("unsupported jwt algorithm {:?}", other)),
        };

        let mut validation = Validation::new(config.algorithm);
        validation.leeway = config.leeway;
        validation.required_spec_claims.clear();
        validation.validate_aud = false;

        Ok(Self {
            decoding_key,
            validation,
        })
    }

    pub fn inspect(&self, token: &str) -> TokenState {
        match decode::<Claims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => TokenState::Valid(data.claims),
            Err(e) => match e.kind() {
                ErrorKind::ExpiredSignature => {
                    TokenState::Expired(decode_claims(token).ok().flatten().unwrap_or_default())
                }
                _ => TokenState::Invalid(e.to_string()),
            },
        }
    }
}

/// Inspect a token, verifying its signature when a verifier is present.
pub fn inspect(token: &str, verifier: Option<&TokenVerifier>) -> TokenState {
    if let Some(verifier) = verifier {
        return verifier.inspect(token);
    }
    match decode_claims(token) {
        Ok(None) => TokenState::Opaque,
        Ok(Some(claims)) if claims.is_expired() => TokenState::Expired(claims),
        Ok(Some(claims)) => TokenState::Valid(claims),
        Err(e) => TokenState::Invalid(e.to_string()),
    }
}
