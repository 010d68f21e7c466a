//! Session claims.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;

/// The authenticated attributes carried by a session credential.
///
/// Timestamps are unix seconds, matching the registered `iat`/`exp` claims of
/// a JWT. Claims are produced per request and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Role the session acts as.
    pub role: String,
    /// Issued-at, unix seconds.
    pub iat: i64,
    /// Expiry, unix seconds.
    pub exp: i64,
}

impl Claims {
    /// Builds claims for `role` issued at `now` and valid for `lifetime`.
    ///
    /// # Example
    ///
    /// ```
    /// use accessmesh_core::Claims;
    /// use chrono::{Duration, TimeZone, Utc};
    ///
    /// let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    /// let claims = Claims::issue("admin", now, Duration::hours(24));
    /// assert_eq!(claims.exp - claims.iat, 86_400);
    /// ```
    #[must_use]
    pub fn issue(role: impl Into<String>, now: Timestamp, lifetime: Duration) -> Self {
        let iat = now.timestamp();
        Self {
            role: role.into(),
            iat,
            exp: iat + lifetime.num_seconds(),
        }
    }

    /// Returns the issued-at instant.
    #[must_use]
    pub fn issued_at(&self) -> Option<Timestamp> {
        DateTime::<Utc>::from_timestamp(self.iat, 0)
    }

    /// Returns the expiry instant.
    #[must_use]
    pub fn expires_at(&self) -> Option<Timestamp> {
        DateTime::<Utc>::from_timestamp(self.exp, 0)
    }

    /// Returns `true` once `now` has reached the expiry.
    ///
    /// The boundary is exclusive for validity: a credential is valid strictly
    /// before `exp` and expired at `exp`.
    #[must_use]
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        now.timestamp() >= self.exp
    }
}
