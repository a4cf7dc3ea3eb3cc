//! The seam between connection management and a concrete database client library

use std::fmt;

use async_trait::async_trait;
use iamdb_tokens::AuthTokenRef;
use thiserror::Error;

/// A client capability used to open a connection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// The preferred client capability
    Primary,
    /// The degraded capability used when the primary one fails on a first connection
    Legacy,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Protocol::Primary => "primary",
            Protocol::Legacy => "legacy",
        })
    }
}

/// How a client library should surface errors while connecting
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorMode {
    /// Report connection problems through the library's own channels immediately
    Raise,
    /// Suppress library-level reporting; failures are only returned
    Silence,
}

/// Raw client flag bits passed through to the library
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClientFlags(pub u32);

/// Per-attempt options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttemptOptions {
    /// Error surfacing behavior for this attempt
    pub errors: ErrorMode,
    /// Whether the legacy capability should open a new link rather than reuse one
    pub new_link: bool,
    /// Client flags
    pub flags: ClientFlags,
}

/// Parameters for a primary-protocol connection attempt
#[derive(Debug)]
pub struct PrimaryParams<'a> {
    /// Host name or address, bracketed if the library requires it
    pub host: &'a str,
    /// Database user
    pub username: &'a str,
    /// Authentication token used as the password
    pub password: &'a AuthTokenRef,
    /// TCP port, if configured
    pub port: Option<u16>,
    /// Socket path, if configured
    pub socket: Option<&'a str>,
}

/// Parameters for a legacy-protocol connection attempt
#[derive(Debug)]
pub struct LegacyParams<'a> {
    /// The host string exactly as configured
    pub host: &'a str,
    /// Database user
    pub username: &'a str,
    /// Authentication token used as the password
    pub password: &'a AuthTokenRef,
}

/// An error reported by a client library while connecting
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ClientError {
    /// The library's numeric error code, if any
    pub code: Option<i32>,
    /// The library's error message
    pub message: String,
}

impl ClientError {
    /// Constructs a new client error
    pub fn new(code: Option<i32>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Indicates that the legacy capability is missing from this client
    pub fn legacy_unsupported() -> Self {
        Self::new(None, "legacy protocol is not supported by this client")
    }
}

/// A database client library able to open connections
///
/// The library must be safe to call concurrently; connection state lives in
/// the returned handles.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    /// A live connection
    type Handle: Send;

    /// Whether IPv6 literal hosts must be written in `[…]` form
    fn requires_bracketed_ipv6(&self) -> bool {
        false
    }

    /// Whether the legacy capability is present in this runtime
    fn legacy_available(&self) -> bool {
        false
    }

    /// Opens a connection using the primary capability
    async fn connect_primary(
        &self,
        params: PrimaryParams<'_>,
        options: AttemptOptions,
    ) -> Result<Self::Handle, ClientError>;

    /// Opens a connection using the legacy capability
    async fn connect_legacy(
        &self,
        params: LegacyParams<'_>,
        options: AttemptOptions,
    ) -> Result<Self::Handle, ClientError> {
        let _ = (params, options);
        Err(ClientError::legacy_unsupported())
    }
}
