//! Credential type and expiry arithmetic.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A credential issued by the identity endpoint.
///
/// Immutable once issued; refreshing produces a new `Credential` that
/// replaces the old one as a whole. The wire field names are fixed by the
/// identity endpoint.
///
/// # Security
///
/// Token values are never shown in Debug output.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Opaque bearer value attached to authenticated requests.
    #[serde(rename = "idToken")]
    access_value: String,
    /// Opaque value used to obtain the next credential.
    #[serde(rename = "refreshToken")]
    refresh_value: String,
    /// Absolute expiry, seconds since epoch.
    #[serde(rename = "expiresAt")]
    expires_at: i64,
}

impl Credential {
    pub fn new(
        access_value: impl Into<String>,
        refresh_value: impl Into<String>,
        expires_at: i64,
    ) -> Self {
        Self {
            access_value: access_value.into(),
            refresh_value: refresh_value.into(),
            expires_at,
        }
    }

    /// Returns the bearer value for authorization headers.
    pub(crate) fn access_value(&self) -> &str {
        &self.access_value
    }

    /// Returns the refresh value for refresh requests.
    pub(crate) fn refresh_value(&self) -> &str {
        &self.refresh_value
    }

    /// Absolute expiry in seconds since epoch.
    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    /// Time until the proactive refresh point (`expiresAt − margin`),
    /// clamped to zero when that point is already in the past.
    pub(crate) fn refresh_delay(&self, margin: Duration) -> Duration {
        let refresh_at_ms = self.expires_at * 1000 - margin.as_millis() as i64;
        let remaining_ms = refresh_at_ms - chrono::Utc::now().timestamp_millis();
        Duration::from_millis(remaining_ms.max(0) as u64)
    }

    /// Whether the remaining lifetime is at or inside the safety margin.
    pub(crate) fn expires_within(&self, margin: Duration) -> bool {
        let refresh_at_ms = self.expires_at * 1000 - margin.as_millis() as i64;
        refresh_at_ms <= chrono::Utc::now().timestamp_millis()
    }
}

// Hide token values in Debug output.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_value", &"[REDACTED]")
            .field("refresh_value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
