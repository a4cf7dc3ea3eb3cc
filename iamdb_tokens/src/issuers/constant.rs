use async_trait::async_trait;
use iamdb_clock::{Clock, DurationSecs, System};

use super::{IssuerError, TokenIssuer};
use crate::{AuthToken, IssuedToken, TokenScope};

/// An issuer that always hands out the same token
///
/// Each issued copy is valid for `lifetime` from the moment it is requested.
/// Useful against local databases that accept a fixed password.
#[derive(Debug)]
pub struct StaticTokenIssuer<C = System> {
    secret: AuthToken,
    lifetime: DurationSecs,
    clock: C,
}

impl StaticTokenIssuer<System> {
    /// Constructs a new static token issuer
    pub fn new(secret: impl Into<AuthToken>, lifetime: DurationSecs) -> Self {
        Self {
            secret: secret.into(),
            lifetime,
            clock: System,
        }
    }
}

impl<C> StaticTokenIssuer<C> {
    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> StaticTokenIssuer<D> {
        StaticTokenIssuer {
            secret: self.secret,
            lifetime: self.lifetime,
            clock,
        }
    }
}

#[async_trait]
impl<C: Clock + Send + Sync> TokenIssuer for StaticTokenIssuer<C> {
    async fn issue_token(&self, _scope: &TokenScope) -> Result<IssuedToken, IssuerError> {
        Ok(IssuedToken {
            secret: self.secret.clone(),
            valid_until: self.clock.now() + self.lifetime,
        })
    }
}

#[cfg(test)]
mod tests {
    use iamdb_clock::{TestClock, UnixTime};

    use super::*;

    #[tokio::test]
    async fn issues_relative_to_the_clock() {
        let clock = TestClock::new(UnixTime(500));
        let issuer = StaticTokenIssuer::new("local-password", DurationSecs(900))
            .with_clock(clock.clone());
        let scope = TokenScope::new("local", "127.0.0.1", "root");

        let first = issuer.issue_token(&scope).await.unwrap();
        clock.advance(DurationSecs(100));
        let second = issuer.issue_token(&scope).await.unwrap();

        assert_eq!(first.secret.as_str(), "local-password");
        assert_eq!(first.valid_until, UnixTime(1_400));
        assert_eq!(second.valid_until, UnixTime(1_500));
    }
}
