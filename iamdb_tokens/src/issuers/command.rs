//! An issuer that shells out to a credential-signing command line tool

use std::{ffi::OsString, process::Stdio};

use async_trait::async_trait;
use iamdb_clock::{Clock, DurationSecs, System};
use tokio::process::Command;

use super::{IssuerError, TokenIssuer};
use crate::{AuthToken, IssuedToken, TokenScope};

/// Validity of an RDS IAM authentication token
const DEFAULT_LIFETIME: DurationSecs = DurationSecs(15 * 60);

const DEFAULT_PORT: u16 = 3306;

/// A token issuer that runs an external command and reads the token from its output
///
/// The command is invoked as
/// `<program> <args…> --hostname <host> --port <port> --region <region> --username <user>`
/// and must print the token on standard output. By default this is the AWS CLI's
/// `rds generate-db-auth-token` subcommand.
///
/// The child process is killed if the issuing future is dropped, so a caller's
/// timeout or cancellation reaches the signing call.
#[derive(Debug)]
pub struct CommandTokenIssuer<C = System> {
    program: OsString,
    args: Vec<OsString>,
    lifetime: DurationSecs,
    default_port: u16,
    clock: C,
}

impl CommandTokenIssuer<System> {
    /// Constructs an issuer running `program` with the given leading arguments
    pub fn new<I, S>(program: impl Into<OsString>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            lifetime: DEFAULT_LIFETIME,
            default_port: DEFAULT_PORT,
            clock: System,
        }
    }

    /// Constructs an issuer using `aws rds generate-db-auth-token`
    pub fn aws_cli() -> Self {
        Self::new("aws", ["rds", "generate-db-auth-token"])
    }
}

impl<C> CommandTokenIssuer<C> {
    /// Sets how long an issued token is honored by the database
    pub fn with_lifetime(mut self, lifetime: DurationSecs) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Sets the port passed to the command when the endpoint does not name one
    pub fn with_default_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }

    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> CommandTokenIssuer<D> {
        CommandTokenIssuer {
            program: self.program,
            args: self.args,
            lifetime: self.lifetime,
            default_port: self.default_port,
            clock,
        }
    }
}

/// Splits an endpoint into the host name and port handed to the signer
fn split_endpoint(endpoint: &str, default_port: u16) -> (&str, u16) {
    let endpoint = endpoint
        .find(":/")
        .map_or(endpoint, |socket| &endpoint[..socket]);

    if let Some((host, rest)) = endpoint
        .strip_prefix('[')
        .and_then(|bracketed| bracketed.split_once(']'))
    {
        let port = rest
            .strip_prefix(':')
            .and_then(|p| p.parse().ok())
            .unwrap_or(default_port);
        return (host, port);
    }

    match endpoint.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => match port.parse() {
            Ok(port) => (host, port),
            Err(_) => (host, default_port),
        },
        _ => (endpoint, default_port),
    }
}

#[async_trait]
impl<C: Clock + Send + Sync> TokenIssuer for CommandTokenIssuer<C> {
    #[tracing::instrument(
        err,
        skip(self),
        fields(program = ?self.program, token.scope = %scope),
    )]
    async fn issue_token(&self, scope: &TokenScope) -> Result<IssuedToken, IssuerError> {
        let (hostname, port) = split_endpoint(scope.endpoint(), self.default_port);
        let requested = self.clock.now();

        tracing::trace!(hostname, port, "running token command");

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg("--hostname")
            .arg(hostname)
            .arg("--port")
            .arg(port.to_string())
            .arg("--region")
            .arg(scope.region())
            .arg("--username")
            .arg(scope.username())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| IssuerError::new("spawn", err.to_string()))?;

        if !output.status.success() {
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_owned(), |c| format!("exit:{}", c));
            let message = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            return Err(IssuerError::new(code, message));
        }

        let stdout = String::from_utf8(output.stdout)
            .map_err(|_| IssuerError::new("malformed", "token command output was not UTF-8"))?;

        Ok(IssuedToken {
            secret: AuthToken::from(stdout.trim()),
            valid_until: requested + self.lifetime,
        })
    }
}
