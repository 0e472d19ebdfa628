//! Request authenticity and freshness checks.
//!
//! The signature is HMAC-SHA256 over the request parameters joined as
//! `key=value` pairs in lexicographic key order, separated by `&`, and
//! hex-encoded. Both checks are pure.

use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::ErrorKind;

type HmacSha256 = Hmac<Sha256>;

/// Validation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid request signature")]
    SignatureInvalid,

    #[error("Request expired: {age_secs}s old, limit {max_age_secs}s")]
    TimestampExpired { age_secs: i64, max_age_secs: i64 },

    #[error("Request timestamp is {skew_secs}s in the future")]
    TimestampFuture { skew_secs: i64 },

    #[error("Signing key rejected")]
    InvalidKey,
}

impl ValidationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ValidationError::SignatureInvalid | ValidationError::InvalidKey => {
                ErrorKind::SignatureInvalid
            }
            ValidationError::TimestampExpired { .. } => ErrorKind::TimestampExpired,
            ValidationError::TimestampFuture { .. } => ErrorKind::TimestampFuture,
        }
    }
}

/// Canonical signing input: sorted `key=value` pairs joined by `&`.
pub fn canonical_string(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Verifies signatures and timestamps with a shared secret.
#[derive(Clone)]
pub struct SignatureValidator {
    mac: HmacSha256,
    max_age_secs: i64,
}

impl std::fmt::Debug for SignatureValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureValidator")
            .field("max_age_secs", &self.max_age_secs)
            .finish_non_exhaustive()
    }
}

impl SignatureValidator {
    pub fn new(secret: &str, max_age_secs: i64) -> Result<Self, ValidationError> {
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| ValidationError::InvalidKey)?;
        Ok(Self { mac, max_age_secs })
    }

    pub fn max_age_secs(&self) -> i64 {
        self.max_age_secs
    }

    /// Hex signature of `params`.
    pub fn sign(&self, params: &BTreeMap<String, String>) -> String {
        let mut mac = self.mac.clone();
        mac.update(canonical_string(params).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Check `signature` against `params` in constant time.
    pub fn verify_signature(
        &self,
        params: &BTreeMap<String, String>,
        signature: &str,
    ) -> Result<(), ValidationError> {
        let provided = hex::decode(signature).map_err(|_| ValidationError::SignatureInvalid)?;
        let mut mac = self.mac.clone();
        mac.update(canonical_string(params).as_bytes());
        mac.verify_slice(&provided)
            .map_err(|_| ValidationError::SignatureInvalid)
    }

    /// Check that `timestamp` is not in the future and at most
    /// `max_age_secs` old relative to `now` (both Unix seconds).
    pub fn validate_timestamp(&self, timestamp: i64, now: i64) -> Result<(), ValidationError> {
        let Some(age) = now.checked_sub(timestamp) else {
            // Out of range either way; the sign of `timestamp` tells which.
            return Err(if timestamp > 0 {
                ValidationError::TimestampFuture { skew_secs: i64::MAX }
            } else {
                ValidationError::TimestampExpired {
                    age_secs: i64::MAX,
                    max_age_secs: self.max_age_secs,
                }
            });
        };
        if age < 0 {
            return Err(ValidationError::TimestampFuture {
                skew_secs: age.saturating_neg(),
            });
        }
        if age > self.max_age_secs {
            return Err(ValidationError::TimestampExpired {
                age_secs: age,
                max_age_secs: self.max_age_secs,
            });
        }
        Ok(())
    }
}
