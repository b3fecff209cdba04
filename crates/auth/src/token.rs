//! Signed credential encoding.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};

use crate::claims::{CredentialClaims, TokenError, validate_claims};

/// Issues and validates signed credentials.
pub trait TokenCodec: Send + Sync {
    fn issue(&self, claims: &CredentialClaims) -> Result<String, TokenError>;

    /// Verify the signature, then validate the claims against `now`.
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<CredentialClaims, TokenError>;
}

/// HMAC-SHA256 JWT codec.
#[derive(Clone)]
pub struct Hs256TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl Hs256TokenCodec {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let secret = secret.as_ref();
        let mut validation = Validation::new(Algorithm::HS256);
        // Time checks run in `validate_claims` against the caller's clock.
        validation.validate_exp = false;
        validation.required_spec_claims = HashSet::new();
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

impl core::fmt::Debug for Hs256TokenCodec {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Hs256TokenCodec").finish_non_exhaustive()
    }
}

impl TokenCodec for Hs256TokenCodec {
    fn issue(&self, claims: &CredentialClaims) -> Result<String, TokenError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| TokenError::Encoding(e.to_string()))
    }

    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<CredentialClaims, TokenError> {
        let data = jsonwebtoken::decode::<CredentialClaims>(token, &self.decoding, &self.validation)
            .map_err(|e| TokenError::Malformed(e.to_string()))?;
        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}
