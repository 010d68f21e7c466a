//! Session token issuing and verification.
//!
//! Tokens are HS256 JWTs carrying [`Claims`]. The accepted algorithm is pinned:
//! a token whose header names anything else (including `none`) is rejected
//! before its payload is trusted.
//!
//! Expiry is checked against a caller-supplied `now` rather than the system
//! clock, so verification is a pure function of (credential, secret, now).

use std::fmt;

use accessmesh_core::{Claims, CredentialError, Timestamp};
use chrono::Duration;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use tracing::debug;

use crate::error::{AuthzError, AuthzResult};

const BEARER: &str = "bearer";

/// Default credential lifetime.
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 24 * 60 * 60;

/// Strips the `Bearer` scheme marker from an `Authorization` header value.
///
/// The scheme is compared case-insensitively. A bare token (no scheme) is
/// returned as is. Any other scheme fails with
/// [`CredentialError::MalformedScheme`].
///
/// # Example
///
/// ```
/// use accessmesh_authz::strip_scheme;
///
/// assert_eq!(strip_scheme("Bearer abc.def.ghi"), Ok("abc.def.ghi"));
/// assert_eq!(strip_scheme("bearer abc.def.ghi"), Ok("abc.def.ghi"));
/// assert_eq!(strip_scheme("abc.def.ghi"), Ok("abc.def.ghi"));
/// assert!(strip_scheme("Basic dXNlcjpwdw==").is_err());
/// ```
pub fn strip_scheme(header_value: &str) -> Result<&str, CredentialError> {
    let value = header_value.trim();
    if value.is_empty() {
        return Err(CredentialError::Empty);
    }

    let token = match value.split_once(char::is_whitespace) {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case(BEARER) => rest.trim_start(),
        Some(_) => return Err(CredentialError::MalformedScheme),
        None if value.eq_ignore_ascii_case(BEARER) => "",
        None => value,
    };

    if token.is_empty() {
        return Err(CredentialError::Empty);
    }
    Ok(token)
}

/// Verifies session credentials against the server secret.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("algorithms", &self.validation.algorithms)
            .finish_non_exhaustive()
    }
}

impl TokenVerifier {
    /// Creates a verifier for `secret`.
    pub fn new(secret: &[u8]) -> AuthzResult<Self> {
        if secret.is_empty() {
            return Err(AuthzError::InvalidSecret("secret must not be empty".to_string()));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is compared with the injected clock in `verify`.
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Ok(Self {
            key: DecodingKey::from_secret(secret),
            validation,
        })
    }

    /// Verifies a raw `Authorization` header value and returns its claims.
    pub fn verify(&self, credential: &str, now: Timestamp) -> Result<Claims, CredentialError> {
        let token = strip_scheme(credential)?;

        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            let kind = classify(e.kind());
            debug!(reason = kind.as_str(), "token rejected");
            kind
        })?;
        let claims = data.claims;

        if claims.role.trim().is_empty() {
            return Err(CredentialError::InvalidClaims);
        }
        if claims.is_expired_at(now) {
            return Err(CredentialError::Expired);
        }

        Ok(claims)
    }
}

fn classify(kind: &ErrorKind) -> CredentialError {
    match kind {
        ErrorKind::InvalidSignature => CredentialError::BadSignature,
        ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
            CredentialError::UnexpectedAlgorithm
        }
        ErrorKind::ExpiredSignature => CredentialError::Expired,
        ErrorKind::MissingRequiredClaim(_) => CredentialError::InvalidClaims,
        _ => CredentialError::Malformed,
    }
}

/// Mints session credentials.
#[derive(Clone)]
pub struct TokenIssuer {
    key: EncodingKey,
    lifetime: Duration,
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    /// Creates an issuer for `secret` with the default 24 hour lifetime.
    pub fn new(secret: &[u8]) -> AuthzResult<Self> {
        if secret.is_empty() {
            return Err(AuthzError::InvalidSecret("secret must not be empty".to_string()));
        }
        Ok(Self {
            key: EncodingKey::from_secret(secret),
            lifetime: Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECS),
        })
    }

    /// Sets the credential lifetime.
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Returns the credential lifetime.
    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Issues a credential for `role` at `now`.
    pub fn issue(&self, role: &str, now: Timestamp) -> AuthzResult<String> {
        let claims = Claims::issue(role, now, self.lifetime);
        self.sign(&claims)
    }

    /// Signs arbitrary claims.
    pub fn sign(&self, claims: &Claims) -> AuthzResult<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.key)
            .map_err(|e| AuthzError::Issue(e.to_string()))
    }
}
