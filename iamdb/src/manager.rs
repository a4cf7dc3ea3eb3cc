use std::{
    borrow::Cow,
    error, fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use iamdb_clock::{Clock, System};
use iamdb_tokens::{CredentialCache, TokenIssuer};
use thiserror::Error;

use crate::{
    client::{DatabaseClient, LegacyParams, PrimaryParams, Protocol},
    ConnectError, ConnectOptions, ConnectionAttemptResult, ConnectionEstablishmentFailed,
    ConnectionTarget,
};

/// What to do when a connection cannot be established
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureReporting {
    /// Return the failure as an error and log it
    Report,
    /// Return `Ok(None)` quietly; the caller intends to retry on its own schedule
    Defer,
}

/// Session initialization the consumer of a new connection is expected to perform
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSetup {
    /// Whether the character set should be initialized
    ///
    /// Only set for the first connection a manager ever establishes. The
    /// character set, SQL mode and database selection are applied on every
    /// connection regardless.
    pub initialize_charset: bool,
    /// The database to select
    pub database: String,
}

/// An established connection
#[derive(Debug)]
pub struct Connection<H> {
    handle: H,
    protocol: Protocol,
    session: SessionSetup,
    attempts: Vec<ConnectionAttemptResult>,
}

impl<H> Connection<H> {
    /// The protocol that opened the connection
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// The session setup to perform on the connection
    pub fn session(&self) -> &SessionSetup {
        &self.session
    }

    /// Every attempt made while connecting, ending with the successful one
    pub fn attempts(&self) -> &[ConnectionAttemptResult] {
        &self.attempts
    }

    /// Borrows the underlying client handle
    pub fn handle(&self) -> &H {
        &self.handle
    }

    /// Takes the underlying client handle
    pub fn into_handle(self) -> H {
        self.handle
    }
}

#[derive(Debug, Error)]
enum FallbackIneligible {
    #[error("a connection has already succeeded with this manager")]
    PreviouslyConnected,
    #[error("fallback is disabled by configuration")]
    Disabled,
    #[error("the legacy protocol is not available")]
    LegacyUnavailable,
}

/// Establishes database connections using cached authentication tokens as passwords
///
/// Each call to [`connect`][Self::connect] first obtains a token, then tries the
/// client's primary protocol. If that fails, and this manager has never
/// connected successfully before, it makes a single attempt with the legacy
/// protocol. Once any connection has succeeded the manager never falls back
/// again, even after that connection is dropped.
///
/// No timeouts are imposed. Dropping the future returned by `connect`, for
/// instance through `tokio::time::timeout`, cancels whichever token request or
/// connection attempt is in progress.
pub struct ConnectionManager<D, I, C = System> {
    client: D,
    credentials: Arc<CredentialCache<I, C>>,
    target: ConnectionTarget,
    options: ConnectOptions,
    has_connected: AtomicBool,
    last_failure: Mutex<Option<ConnectError>>,
}

impl<D, I, C> ConnectionManager<D, I, C> {
    /// Constructs a new manager using default options
    ///
    /// No connection is made until [`connect`][Self::connect] is called.
    pub fn new(client: D, credentials: Arc<CredentialCache<I, C>>, target: ConnectionTarget) -> Self {
        Self {
            client,
            credentials,
            target,
            options: ConnectOptions::default(),
            has_connected: AtomicBool::new(false),
            last_failure: Mutex::new(None),
        }
    }

    /// Sets the connection options
    pub fn with_options(mut self, options: ConnectOptions) -> Self {
        self.options = options;
        self
    }

    /// The target this manager connects to
    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    /// The credential cache supplying passwords
    pub fn credentials(&self) -> &Arc<CredentialCache<I, C>> {
        &self.credentials
    }

    /// Whether any connection has ever succeeded through this manager
    pub fn has_connected(&self) -> bool {
        self.has_connected.load(Ordering::Acquire)
    }

    /// The failure from the most recent unsuccessful `connect`, if the last call failed
    pub fn last_failure(&self) -> Option<ConnectError> {
        self.lock_last_failure().clone()
    }

    fn lock_last_failure(&self) -> MutexGuard<'_, Option<ConnectError>> {
        self.last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<D, I, C> ConnectionManager<D, I, C>
where
    D: DatabaseClient,
    I: TokenIssuer,
    C: Clock,
{
    /// Establishes a connection
    ///
    /// Returns `Ok(Some(_))` on success. On failure, returns the error when
    /// `reporting` is [`FailureReporting::Report`], or `Ok(None)` when it is
    /// [`FailureReporting::Defer`]; in both cases the error is kept and
    /// available from [`last_failure`][Self::last_failure].
    pub async fn connect(
        &self,
        reporting: FailureReporting,
    ) -> Result<Option<Connection<D::Handle>>, ConnectError> {
        match self.establish().await {
            Ok(connection) => {
                *self.lock_last_failure() = None;
                Ok(Some(connection))
            }
            Err(error) => {
                *self.lock_last_failure() = Some(error.clone());
                match reporting {
                    FailureReporting::Report => {
                        tracing::error!(
                            db.host = %self.target.host(),
                            error = (&error as &dyn error::Error),
                            "error establishing a database connection"
                        );
                        Err(error)
                    }
                    FailureReporting::Defer => {
                        tracing::debug!(
                            db.host = %self.target.host(),
                            error = (&error as &dyn error::Error),
                            "database connection failed, deferring to caller"
                        );
                        Ok(None)
                    }
                }
            }
        }
    }

    #[tracing::instrument(
        skip_all,
        fields(db.host = %self.target.host(), db.user = %self.target.username()),
    )]
    async fn establish(&self) -> Result<Connection<D::Handle>, ConnectError> {
        let options = self.options.attempt_options();
        let mut attempts = Vec::with_capacity(2);

        let token = self.credentials.get_token(self.target.scope()).await?;

        let host = match self.target.host_spec() {
            Some(spec) => spec.connect_host(self.client.requires_bracketed_ipv6()),
            None => Cow::Borrowed(self.target.host()),
        };

        tracing::debug!(db.protocol = %Protocol::Primary, "attempting connection");
        let primary = self
            .client
            .connect_primary(
                PrimaryParams {
                    host: &host,
                    username: self.target.username(),
                    password: token.secret(),
                    port: self.target.port(),
                    socket: self.target.socket(),
                },
                options,
            )
            .await;

        match primary {
            Ok(handle) => return Ok(self.connected(handle, Protocol::Primary, attempts)),
            Err(error) => {
                let attempt = ConnectionAttemptResult::failed(
                    Protocol::Primary,
                    &error,
                    token.secret().as_str(),
                );
                tracing::debug!(%attempt, "connection attempt failed");
                attempts.push(attempt);
            }
        }

        if let Err(reason) = self.fallback_eligibility() {
            tracing::debug!(%reason, "not falling back to legacy protocol");
            return Err(ConnectionEstablishmentFailed::new(self.target.host(), attempts).into());
        }

        // The primary attempt may have taken long enough for the token to go stale.
        let token = match self.credentials.get_token(self.target.scope()).await {
            Ok(token) => token,
            Err(cause) => {
                tracing::debug!("no token available for the legacy attempt");
                return Err(ConnectionEstablishmentFailed::new(self.target.host(), attempts)
                    .with_credential_failure(cause)
                    .into());
            }
        };

        tracing::debug!(db.protocol = %Protocol::Legacy, "attempting connection");
        let legacy = self
            .client
            .connect_legacy(
                LegacyParams {
                    host: self.target.host(),
                    username: self.target.username(),
                    password: token.secret(),
                },
                options,
            )
            .await;

        match legacy {
            Ok(handle) => Ok(self.connected(handle, Protocol::Legacy, attempts)),
            Err(error) => {
                let attempt = ConnectionAttemptResult::failed(
                    Protocol::Legacy,
                    &error,
                    token.secret().as_str(),
                );
                tracing::debug!(%attempt, "connection attempt failed");
                attempts.push(attempt);
                Err(ConnectionEstablishmentFailed::new(self.target.host(), attempts).into())
            }
        }
    }

    fn fallback_eligibility(&self) -> Result<(), FallbackIneligible> {
        if self.has_connected() {
            Err(FallbackIneligible::PreviouslyConnected)
        } else if self.options.disable_fallback {
            Err(FallbackIneligible::Disabled)
        } else if !self.client.legacy_available() {
            Err(FallbackIneligible::LegacyUnavailable)
        } else {
            Ok(())
        }
    }

    fn connected(
        &self,
        handle: D::Handle,
        protocol: Protocol,
        mut attempts: Vec<ConnectionAttemptResult>,
    ) -> Connection<D::Handle> {
        attempts.push(ConnectionAttemptResult::succeeded(protocol));
        let first = !self.has_connected.swap(true, Ordering::AcqRel);

        tracing::info!(
            db.protocol = %protocol,
            first_connection = first,
            "database connection established"
        );

        Connection {
            handle,
            protocol,
            session: SessionSetup {
                initialize_charset: first,
                database: self.target.database().to_owned(),
            },
            attempts,
        }
    }
}

impl<D, I, C> fmt::Debug for ConnectionManager<D, I, C>
where
    D: fmt::Debug,
    I: fmt::Debug,
    C: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("client", &self.client)
            .field("credentials", &self.credentials)
            .field("target", &self.target)
            .field("options", &self.options)
            .field("has_connected", &self.has_connected())
            .finish()
    }
}
