//! Token Provider Port (Driven Port)
//!
//! Interface for obtaining the access token used by the stream URL and the
//! REST endpoints.

use async_trait::async_trait;

/// Authentication error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The login request could not be sent or its body not read.
    #[error("Auth transport error: {0}")]
    Transport(String),

    /// The auth service answered with a non-success HTTP status.
    #[error("Auth request rejected with status {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The auth service reported a failed login.
    #[error("Login failed: {0}")]
    LoginFailed(String),

    /// The response did not carry a usable token.
    #[error("Invalid auth response: {0}")]
    InvalidResponse(String),
}

/// Port for obtaining access tokens.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Return the current token, logging in if none is cached.
    async fn access_token(&self) -> Result<String, AuthError>;

    /// Discard the cached token and obtain a fresh one.
    async fn refresh(&self) -> Result<String, AuthError>;
}

/// Token provider that always returns the same token.
///
/// Useful when a token is issued out of band.
#[derive(Clone)]
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    /// Wrap a fixed token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticToken")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String, AuthError> {
        Ok(self.token.clone())
    }

    async fn refresh(&self) -> Result<String, AuthError> {
        Ok(self.token.clone())
    }
}
