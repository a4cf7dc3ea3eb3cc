use std::fmt;

use iamdb_tokens::CredentialUnavailable;
use thiserror::Error;

use crate::client::{ClientError, Protocol};

/// The outcome of a single connection attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionAttemptResult {
    /// The protocol that was tried
    pub protocol: Protocol,
    /// Whether the attempt opened a connection
    pub success: bool,
    /// The client library's error code, if the attempt failed with one
    pub error_code: Option<i32>,
    /// The client library's error message, if the attempt failed
    pub error_message: Option<String>,
}

impl ConnectionAttemptResult {
    pub(crate) fn succeeded(protocol: Protocol) -> Self {
        Self {
            protocol,
            success: true,
            error_code: None,
            error_message: None,
        }
    }

    /// Records a failed attempt, masking any echo of `secret` in the library's message
    pub(crate) fn failed(protocol: Protocol, error: &ClientError, secret: &str) -> Self {
        let message = if secret.is_empty() {
            error.message.clone()
        } else {
            error.message.replace(secret, "***AUTH TOKEN***")
        };

        Self {
            protocol,
            success: false,
            error_code: error.code,
            error_message: Some(message),
        }
    }
}

impl fmt::Display for ConnectionAttemptResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (self.success, self.error_code, &self.error_message) {
            (true, _, _) => write!(f, "{}: connected", self.protocol),
            (false, Some(code), Some(message)) => {
                write!(f, "{}: error {}: {}", self.protocol, code, message)
            }
            (false, None, Some(message)) => write!(f, "{}: {}", self.protocol, message),
            (false, _, None) => write!(f, "{}: failed", self.protocol),
        }
    }
}

/// Every eligible connection attempt failed
///
/// If a fallback attempt could not be made because no token was available
/// for it, that failure is kept as the error's source.
#[derive(Clone, Debug, Error)]
#[error("error establishing a database connection to {host}")]
pub struct ConnectionEstablishmentFailed {
    host: String,
    attempts: Vec<ConnectionAttemptResult>,
    #[source]
    credential: Option<CredentialUnavailable>,
}

impl ConnectionEstablishmentFailed {
    pub(crate) fn new(host: impl Into<String>, attempts: Vec<ConnectionAttemptResult>) -> Self {
        Self {
            host: host.into(),
            attempts,
            credential: None,
        }
    }

    pub(crate) fn with_credential_failure(mut self, cause: CredentialUnavailable) -> Self {
        self.credential = Some(cause);
        self
    }

    /// The configured database host
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The attempts made, in order
    pub fn attempts(&self) -> &[ConnectionAttemptResult] {
        &self.attempts
    }

    /// The protocols that were tried, in order
    pub fn protocols_tried(&self) -> impl Iterator<Item = Protocol> + '_ {
        self.attempts.iter().map(|a| a.protocol)
    }

    /// Why no token was available for the fallback attempt, if that is why it was skipped
    pub fn credential_failure(&self) -> Option<&CredentialUnavailable> {
        self.credential.as_ref()
    }
}

/// An error while establishing a database connection
#[derive(Clone, Debug, Error)]
pub enum ConnectError {
    /// No token could be obtained, so no connection was attempted
    #[error("database credentials are unavailable")]
    Credential(#[from] CredentialUnavailable),
    /// A token was obtained, but no connection could be opened
    #[error(transparent)]
    Establishment(#[from] ConnectionEstablishmentFailed),
}
