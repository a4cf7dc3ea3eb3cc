use std::fmt;

use iamdb_clock::{DurationSecs, UnixTime};

use crate::{AuthToken, AuthTokenRef};

/// The identity a token is issued for
///
/// One logical database target is identified by the region it lives in, the
/// endpoint clients connect to, and the database user authenticating.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TokenScope {
    region: String,
    endpoint: String,
    username: String,
}

impl TokenScope {
    /// Constructs a new token scope
    pub fn new(
        region: impl Into<String>,
        endpoint: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            region: region.into(),
            endpoint: endpoint.into(),
            username: username.into(),
        }
    }

    /// The region hosting the database
    #[inline]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// The database endpoint
    #[inline]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The database user
    #[inline]
    pub fn username(&self) -> &str {
        &self.username
    }
}

impl fmt::Display for TokenScope {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}@{} ({})", self.username, self.endpoint, self.region)
    }
}

/// A token as returned by an issuer
#[derive(Clone, Debug)]
pub struct IssuedToken {
    /// The signed token
    pub secret: AuthToken,
    /// The time at which the issuer stops honoring the token
    pub valid_until: UnixTime,
}

impl IssuedToken {
    /// Constructs a new issued token
    pub fn new(secret: impl Into<AuthToken>, valid_until: UnixTime) -> Self {
        Self {
            secret: secret.into(),
            valid_until,
        }
    }
}

/// A token's lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    /// The token is valid and outside of the safety margin
    Fresh,
    /// The token is still valid, but inside the safety margin and must not be handed out
    Stale,
    /// The token is no longer valid
    Expired,
}

/// An authentication token along with its validity window
#[derive(Debug)]
pub struct Token {
    secret: AuthToken,
    issued: UnixTime,
    expiry: UnixTime,
}

impl Token {
    pub(crate) fn new(secret: AuthToken, issued: UnixTime, expiry: UnixTime) -> Self {
        debug_assert!(issued < expiry);
        Self {
            secret,
            issued,
            expiry,
        }
    }

    /// Gets the signed token to present as the password
    #[inline]
    pub fn secret(&self) -> &AuthTokenRef {
        &self.secret
    }

    /// Gets the time that the token was issued
    #[inline]
    pub fn issued(&self) -> UnixTime {
        self.issued
    }

    /// Gets the time that the token will expire
    #[inline]
    pub fn expiry(&self) -> UnixTime {
        self.expiry
    }

    /// Gets the token's full lifetime
    #[inline]
    pub fn lifetime(&self) -> DurationSecs {
        self.expiry - self.issued
    }

    /// Gets the interval during which the token is valid
    #[inline]
    pub fn valid_interval(&self) -> std::ops::Range<UnixTime> {
        self.issued..self.expiry
    }

    /// Gets the token's lifetime status as of the provided time
    ///
    /// The token is considered stale once `time` is within `margin` of its expiry.
    #[inline]
    pub fn status_at(&self, time: UnixTime, margin: DurationSecs) -> TokenStatus {
        if time >= self.expiry {
            TokenStatus::Expired
        } else if time >= self.expiry - margin {
            TokenStatus::Stale
        } else {
            TokenStatus::Fresh
        }
    }

    /// Gets a duration for how much longer the token would be valid as of the
    /// provided time
    #[inline]
    pub fn until_expired_at(&self, time: UnixTime) -> DurationSecs {
        self.expiry - time
    }
}
