use std::borrow::Cow;

/// A database host string broken into the parts a client library expects
///
/// Host strings follow the conventions of MySQL client configuration:
///
/// * `db.example.com`, `db.example.com:3307`
/// * `localhost:/var/run/mysqld/mysqld.sock` (anything after `:/` names a socket)
/// * `[2001:db8::1]:3307` or a bare `2001:db8::1`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostSpec {
    host: String,
    port: Option<u16>,
    socket: Option<String>,
    is_ipv6: bool,
}

impl HostSpec {
    /// Parses a host string
    ///
    /// Returns `None` if the string looks like an IPv6 address but does not
    /// start with one. Ports of `0`, or ports that do not fit in a `u16`, are
    /// treated as absent.
    pub fn parse(raw: &str) -> Option<Self> {
        let (host, socket) = match raw.find(":/") {
            Some(idx) => (&raw[..idx], Some(raw[idx + 1..].to_owned())),
            None => (raw, None),
        };

        // An IPv6 address always contains at least two colons.
        if host.matches(':').count() > 1 {
            let rest = host.strip_prefix('[').unwrap_or(host);
            let end = rest
                .find(|c: char| !(c.is_ascii_hexdigit() || c == ':'))
                .unwrap_or(rest.len());
            if end == 0 {
                return None;
            }

            let (address, tail) = rest.split_at(end);
            Some(Self {
                host: address.to_owned(),
                port: tail.strip_prefix("]:").and_then(leading_port),
                socket,
                is_ipv6: true,
            })
        } else {
            let end = host
                .find(|c: char| c == ':' || c == '/')
                .unwrap_or(host.len());

            let (name, tail) = host.split_at(end);
            Some(Self {
                host: name.to_owned(),
                port: tail.strip_prefix(':').and_then(leading_port),
                socket,
                is_ipv6: false,
            })
        }
    }

    /// The host name or address, without brackets
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The TCP port, if one was given
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// The socket path, if one was given
    pub fn socket(&self) -> Option<&str> {
        self.socket.as_deref()
    }

    /// Whether the host is an IPv6 literal
    pub fn is_ipv6(&self) -> bool {
        self.is_ipv6
    }

    /// The host as handed to a client library
    ///
    /// IPv6 literals are wrapped in square brackets when `bracket_ipv6` is set.
    pub fn connect_host(&self, bracket_ipv6: bool) -> Cow<'_, str> {
        if self.is_ipv6 && bracket_ipv6 {
            Cow::Owned(format!("[{}]", self.host))
        } else {
            Cow::Borrowed(&self.host)
        }
    }
}

fn leading_port(s: &str) -> Option<u16> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    match s[..end].parse() {
        Ok(0) | Err(_) => None,
        Ok(port) => Some(port),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(host: &str, port: Option<u16>, socket: Option<&str>, is_ipv6: bool) -> HostSpec {
        HostSpec {
            host: host.to_owned(),
            port,
            socket: socket.map(ToOwned::to_owned),
            is_ipv6,
        }
    }

    #[test]
    fn plain_host_names() {
        assert_eq!(
            HostSpec::parse("db.example.com"),
            Some(spec("db.example.com", None, None, false))
        );
        assert_eq!(
            HostSpec::parse("127.0.0.1:3307"),
            Some(spec("127.0.0.1", Some(3307), None, false))
        );
        assert_eq!(HostSpec::parse(""), Some(spec("", None, None, false)));
    }

    #[test]
    fn socket_paths() {
        assert_eq!(
            HostSpec::parse("localhost:/var/run/mysqld/mysqld.sock"),
            Some(spec(
                "localhost",
                None,
                Some("/var/run/mysqld/mysqld.sock"),
                false
            ))
        );
        assert_eq!(
            HostSpec::parse("localhost:3307:/tmp/mysql.sock"),
            Some(spec("localhost", Some(3307), Some("/tmp/mysql.sock"), false))
        );
    }

    #[test]
    fn ipv6_literals() {
        assert_eq!(
            HostSpec::parse("[2001:db8::1]:3307"),
            Some(spec("2001:db8::1", Some(3307), None, true))
        );
        assert_eq!(
            HostSpec::parse("[::1]"),
            Some(spec("::1", None, None, true))
        );
        assert_eq!(
            HostSpec::parse("fe80::1"),
            Some(spec("fe80::1", None, None, true))
        );
        assert_eq!(
            HostSpec::parse("[::1]:/tmp/mysql.sock"),
            Some(spec("::1", None, Some("/tmp/mysql.sock"), true))
        );
        assert_eq!(HostSpec::parse("[zz::1]:3306"), None);
    }

    #[test]
    fn unusable_ports_are_ignored() {
        assert_eq!(HostSpec::parse("db:0"), Some(spec("db", None, None, false)));
        assert_eq!(HostSpec::parse("db:99999"), Some(spec("db", None, None, false)));
        assert_eq!(HostSpec::parse("db:port"), Some(spec("db", None, None, false)));
        assert_eq!(HostSpec::parse("db:33x"), Some(spec("db", Some(33), None, false)));
    }

    #[test]
    fn brackets_only_when_asked() {
        let v6 = HostSpec::parse("2001:db8::1").unwrap();
        assert_eq!(v6.connect_host(true), "[2001:db8::1]");
        assert_eq!(v6.connect_host(false), "2001:db8::1");

        let v4 = HostSpec::parse("10.0.0.1").unwrap();
        assert_eq!(v4.connect_host(true), "10.0.0.1");
    }
}
