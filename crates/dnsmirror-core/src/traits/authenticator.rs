// # Authenticator Trait
//
// Exchanges the proxy's shared secret for a session token. The session calls
// it only when the user logs in again after an `Unauthorized` error; a
// failed mutation is never replayed afterwards.

use async_trait::async_trait;
use std::fmt;

/// Opaque session token issued by the proxy
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for the request header
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(<REDACTED>)")
    }
}

/// Trait for login implementations
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Log in with the shared secret
    ///
    /// # Returns
    ///
    /// - `Ok(token)`: Token to present on subsequent requests
    /// - `Err(Error::Unauthorized)`: The secret was rejected
    async fn login(&self, secret: &str) -> Result<SessionToken, crate::Error>;
}
