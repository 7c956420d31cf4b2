//! Bearer-token providers
//!
//! Tokens are pulled fresh for every request; the client never keeps one around.

use async_trait::async_trait;

use crate::failure::Result;

/// Source of the bearer token attached to outgoing requests
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// The current token, or `None` when the caller is not signed in
    async fn token(&self) -> Result<Option<String>>;
}

/// Never authenticates
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

#[async_trait]
impl TokenProvider for NoAuth {
    async fn token(&self) -> Result<Option<String>> {
        Ok(None)
    }
}

/// A fixed token
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<Option<String>> {
        Ok(Some(self.0.clone()))
    }
}

/// Reads the token from an environment variable on every call
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl TokenProvider for EnvToken {
    async fn token(&self) -> Result<Option<String>> {
        Ok(std::env::var(&self.var).ok())
    }
}
