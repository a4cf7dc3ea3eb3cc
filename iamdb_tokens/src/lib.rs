//! Caching of short-lived database authentication tokens
//!
//! Cloud-hosted databases can accept a signed, short-lived token in place of a
//! static password. Minting such a token costs a call to the credential
//! service, so this crate keeps the most recent token for each target in a
//! [`CredentialCache`] and only asks the [`TokenIssuer`] for a new one when the
//! cached token is missing or close to expiry.
//!
//! A token is never handed out during the final [safety margin][DEFAULT_SAFETY_MARGIN]
//! of its validity, so a token that is accepted at the start of a connection
//! handshake is not rejected halfway through it because of clock skew.
//!
//! Concurrent requests for the same [`TokenScope`] are coalesced: while a refresh
//! is in flight, every other caller waits for that refresh and receives its
//! token, or its error.
//!
//! ```
//! use iamdb_clock::DurationSecs;
//! use iamdb_tokens::{issuers::StaticTokenIssuer, CredentialCache, TokenScope};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let issuer = StaticTokenIssuer::new("local-password", DurationSecs(15 * 60));
//! let cache = CredentialCache::new(issuer).with_safety_margin(DurationSecs(60));
//!
//! let scope = TokenScope::new("us-east-1", "db.cluster-abc.us-east-1.rds.amazonaws.com", "app");
//! let token = cache.get_token(&scope).await?;
//!
//! tracing::info!(expiry = token.expiry().0, "obtained database token");
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! * `command` (default): Provides [`CommandTokenIssuer`][issuers::CommandTokenIssuer], which
//!   mints tokens by running a command line tool such as the AWS CLI.

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

mod braids;
mod cache;
pub mod issuers;
mod tokens;

pub use braids::*;
pub use cache::{CredentialCache, CredentialUnavailable, IssueFailure, DEFAULT_SAFETY_MARGIN};
pub use issuers::{IssuerError, TokenIssuer};
pub use tokens::{IssuedToken, Token, TokenScope, TokenStatus};
