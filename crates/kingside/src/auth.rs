//! Authentication hook for validating a connection's identity.
//!
//! Kingside doesn't issue identities itself. The app that embeds it already
//! has accounts and tokens, so the server only asks an [`Authenticator`] to
//! turn the `Hello` token into a [`UserId`].

use std::future::Future;

use kingside_protocol::UserId;

/// Why a handshake token was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The client sent no token and the authenticator requires one.
    #[error("missing token")]
    MissingToken,

    /// The token was invalid, expired, or otherwise rejected.
    #[error("authentication failed: {0}")]
    Rejected(String),
}

/// Validates a client's token and returns their identity.
///
/// Called once per connection, during the handshake.
///
/// # Example
///
/// ```rust
/// use kingside::{AuthError, Authenticator};
/// use kingside_protocol::UserId;
///
/// /// Accepts a fixed set of API keys.
/// struct KeyTable(Vec<(String, UserId)>);
///
/// impl Authenticator for KeyTable {
///     async fn authenticate(&self, token: Option<&str>) -> Result<UserId, AuthError> {
///         let token = token.ok_or(AuthError::MissingToken)?;
///         self.0
///             .iter()
///             .find(|(key, _)| key == token)
///             .map(|(_, user)| user.clone())
///             .ok_or_else(|| AuthError::Rejected("unknown key".into()))
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    fn authenticate(
        &self,
        token: Option<&str>,
    ) -> impl Future<Output = Result<UserId, AuthError>> + Send;
}

/// Uses the token itself as the identity.
///
/// For development and tests only: anyone can claim to be anyone.
#[derive(Debug, Clone, Copy, Default)]
pub struct DevAuthenticator;

impl Authenticator for DevAuthenticator {
    async fn authenticate(&self, token: Option<&str>) -> Result<UserId, AuthError> {
        let token = token.map(str::trim).ok_or(AuthError::MissingToken)?;
        if token.is_empty() || token.len() > 64 {
            return Err(AuthError::Rejected(
                "token must be 1 to 64 characters".into(),
            ));
        }
        Ok(UserId::new(token))
    }
}
