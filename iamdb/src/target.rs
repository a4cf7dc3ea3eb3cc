use iamdb_tokens::TokenScope;

use crate::HostSpec;

/// The database endpoint a manager connects to
///
/// Constructed once from resolved configuration and never changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionTarget {
    scope: TokenScope,
    host: String,
    database: String,
    spec: Option<HostSpec>,
}

impl ConnectionTarget {
    /// Constructs a new connection target
    ///
    /// `host` may carry a port, a socket path or an IPv6 literal; see [`HostSpec`].
    pub fn new(
        region: impl Into<String>,
        host: impl Into<String>,
        username: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        let host = host.into();
        let spec = HostSpec::parse(&host);
        if spec.is_none() {
            tracing::debug!(db.host = %host, "unable to parse database host, using it verbatim");
        }

        Self {
            scope: TokenScope::new(region, host.clone(), username),
            host,
            database: database.into(),
            spec,
        }
    }

    /// The identity tokens for this target are issued for
    #[inline]
    pub fn scope(&self) -> &TokenScope {
        &self.scope
    }

    /// The region hosting the database
    #[inline]
    pub fn region(&self) -> &str {
        self.scope.region()
    }

    /// The host string as configured
    #[inline]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The database user
    #[inline]
    pub fn username(&self) -> &str {
        self.scope.username()
    }

    /// The database to select once connected
    #[inline]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// The parsed host, if the configured host string could be parsed
    #[inline]
    pub fn host_spec(&self) -> Option<&HostSpec> {
        self.spec.as_ref()
    }

    /// The configured TCP port
    pub fn port(&self) -> Option<u16> {
        self.spec.as_ref().and_then(HostSpec::port)
    }

    /// The configured socket path
    pub fn socket(&self) -> Option<&str> {
        self.spec.as_ref().and_then(HostSpec::socket)
    }

    /// Whether the configured host is an IPv6 literal
    pub fn is_ipv6(&self) -> bool {
        self.spec.as_ref().map_or(false, HostSpec::is_ipv6)
    }
}
