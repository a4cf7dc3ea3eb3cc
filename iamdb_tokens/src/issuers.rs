//! Token issuers

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::{IssuedToken, TokenScope};

#[cfg(feature = "command")]
pub mod command;
mod constant;

#[cfg(feature = "command")]
pub use command::CommandTokenIssuer;
pub use constant::StaticTokenIssuer;

/// An error reported by a token issuer
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct IssuerError {
    /// A short machine-readable classification of the failure
    pub code: String,
    /// A human-readable description of the failure
    pub message: String,
}

impl IssuerError {
    /// Constructs a new issuer error
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// An asynchronous source of freshly minted tokens
///
/// Implementations are expected to contact the credential service every time
/// they are called; caching is the job of [`CredentialCache`][crate::CredentialCache].
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    /// Requests a new token for the given scope
    async fn issue_token(&self, scope: &TokenScope) -> Result<IssuedToken, IssuerError>;
}

#[async_trait]
impl<I: TokenIssuer + ?Sized> TokenIssuer for Arc<I> {
    async fn issue_token(&self, scope: &TokenScope) -> Result<IssuedToken, IssuerError> {
        (**self).issue_token(scope).await
    }
}

#[async_trait]
impl<I: TokenIssuer + ?Sized> TokenIssuer for Box<I> {
    async fn issue_token(&self, scope: &TokenScope) -> Result<IssuedToken, IssuerError> {
        (**self).issue_token(scope).await
    }
}
