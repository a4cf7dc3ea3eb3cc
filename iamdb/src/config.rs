//! Connection configuration

use iamdb_clock::DurationSecs;
use iamdb_tokens::{CredentialCache, DEFAULT_SAFETY_MARGIN};
use serde::{Deserialize, Serialize};

use crate::{
    client::{AttemptOptions, ClientFlags, ErrorMode},
    ConnectionTarget,
};

/// Behavior switches for a [`ConnectionManager`][crate::ConnectionManager]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Never fall back to the legacy protocol
    pub disable_fallback: bool,
    /// Let the client library raise connection errors instead of silencing them
    pub debug_mode: bool,
    /// Ask the legacy protocol for a fresh link on every connect
    pub new_link: bool,
    /// Client flags passed to every attempt
    pub client_flags: ClientFlags,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            disable_fallback: false,
            debug_mode: false,
            new_link: true,
            client_flags: ClientFlags::default(),
        }
    }
}

impl ConnectOptions {
    pub(crate) fn attempt_options(&self) -> AttemptOptions {
        AttemptOptions {
            errors: if self.debug_mode {
                ErrorMode::Raise
            } else {
                ErrorMode::Silence
            },
            new_link: self.new_link,
            flags: self.client_flags,
        }
    }
}

fn default_new_link() -> bool {
    true
}

fn default_safety_margin() -> DurationSecs {
    DEFAULT_SAFETY_MARGIN
}

/// Resolved configuration for one database target
///
/// Typically deserialized from whatever configuration source the host
/// application uses. Only the four identity fields are required.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Region hosting the database
    pub region: String,
    /// Database host, optionally with port or socket
    pub host: String,
    /// Database user configured for token authentication
    pub username: String,
    /// Database to select once connected
    pub database: String,
    /// Never fall back to the legacy protocol
    #[serde(default)]
    pub disable_fallback: bool,
    /// Let the client library raise connection errors
    #[serde(default)]
    pub debug_mode: bool,
    /// Ask the legacy protocol for a fresh link on every connect
    #[serde(default = "default_new_link")]
    pub new_link: bool,
    /// Raw client flags
    #[serde(default)]
    pub client_flags: u32,
    /// Lead time before token expiry at which tokens are refreshed, in seconds
    #[serde(default = "default_safety_margin")]
    pub safety_margin: DurationSecs,
}

impl ConnectorConfig {
    /// The connection target described by this configuration
    pub fn target(&self) -> ConnectionTarget {
        ConnectionTarget::new(&*self.region, &*self.host, &*self.username, &*self.database)
    }

    /// The connection options described by this configuration
    pub fn options(&self) -> ConnectOptions {
        ConnectOptions {
            disable_fallback: self.disable_fallback,
            debug_mode: self.debug_mode,
            new_link: self.new_link,
            client_flags: ClientFlags(self.client_flags),
        }
    }

    /// Constructs a credential cache using the configured safety margin
    pub fn credential_cache<I>(&self, issuer: I) -> CredentialCache<I> {
        CredentialCache::new(issuer).with_safety_margin(self.safety_margin)
    }
}
