//! Database connections authenticated with short-lived tokens
//!
//! A [`ConnectionManager`] opens connections to one [`ConnectionTarget`],
//! presenting a token from a shared [`CredentialCache`] as the password. The
//! actual wire protocol is provided by a [`DatabaseClient`][client::DatabaseClient]
//! implementation, which offers a primary capability and, optionally, a legacy
//! one.
//!
//! The legacy capability is only tried when the primary one fails on the very
//! first connection a manager makes, and only once per `connect` call. After
//! any connection has succeeded, failures are reported without falling back.
//!
//! ```
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use iamdb::{
//!     client::{AttemptOptions, ClientError, DatabaseClient, PrimaryParams},
//!     ConnectionManager, ConnectorConfig, FailureReporting,
//! };
//! use iamdb::tokens::issuers::StaticTokenIssuer;
//! use iamdb::clock::DurationSecs;
//!
//! struct Loopback;
//!
//! #[async_trait]
//! impl DatabaseClient for Loopback {
//!     type Handle = String;
//!
//!     async fn connect_primary(
//!         &self,
//!         params: PrimaryParams<'_>,
//!         _options: AttemptOptions,
//!     ) -> Result<String, ClientError> {
//!         Ok(format!("{}@{}", params.username, params.host))
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConnectorConfig {
//!     region: "us-east-1".into(),
//!     host: "db.example.com:3306".into(),
//!     username: "app".into(),
//!     database: "app".into(),
//!     disable_fallback: false,
//!     debug_mode: false,
//!     new_link: true,
//!     client_flags: 0,
//!     safety_margin: DurationSecs(60),
//! };
//!
//! let issuer = StaticTokenIssuer::new("token", DurationSecs(900));
//! let credentials = Arc::new(config.credential_cache(issuer));
//! let manager = ConnectionManager::new(Loopback, credentials, config.target())
//!     .with_options(config.options());
//!
//! if let Some(connection) = manager.connect(FailureReporting::Report).await? {
//!     assert_eq!(connection.handle(), "app@db.example.com");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! * `command` (default): Enables the command-line token issuer in [`tokens::issuers`].

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod client;
mod config;
mod error;
mod host;
mod manager;
mod target;

pub use iamdb_clock as clock;
pub use iamdb_tokens as tokens;
pub use iamdb_tokens::{CredentialCache, CredentialUnavailable, Token, TokenScope};

pub use config::{ConnectOptions, ConnectorConfig};
pub use error::{ConnectError, ConnectionAttemptResult, ConnectionEstablishmentFailed};
pub use host::HostSpec;
pub use manager::{Connection, ConnectionManager, FailureReporting, SessionSetup};
pub use target::ConnectionTarget;
