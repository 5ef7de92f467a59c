//! Authentication hook for validating player identity.
//!
//! Credential verification (password login, Sign in with Apple, session
//! tokens) lives outside the battle core. The server only needs to turn the
//! token a client presents in its handshake into a [`PlayerId`]; that is
//! what the [`Authenticator`] trait describes.

use std::future::Future;

use geobattle_protocol::PlayerId;

use crate::AuthError;

/// Validates a client's credential and returns their identity.
///
/// # Example
///
/// ```rust
/// use geobattle_protocol::PlayerId;
/// use geobattle_session::{AuthError, Authenticator};
///
/// /// Treats the token as the player id. Development only.
/// struct DevAuthenticator;
///
/// impl Authenticator for DevAuthenticator {
///     async fn authenticate(&self, token: &str) -> Result<PlayerId, AuthError> {
///         token
///             .parse()
///             .map_err(|_| AuthError("token must be a player id".into()))
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Validates `token` and returns the player it identifies.
    ///
    /// Called once per connection, during the handshake.
    fn authenticate(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<PlayerId, AuthError>> + Send;
}
