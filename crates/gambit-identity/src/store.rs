//! Backend store required for identities.

use async_trait::async_trait;
use gambit_common::{
    identity::{AuthToken, ClientInfo, LegacyUser, NewAuthToken},
    TokenId, UnixNanos,
};

/// A store interface for tokens and legacy users.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// An error type returned by operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Look up a token by its value.
    async fn token(&self, token: &str) -> Result<Option<AuthToken>, Self::Error>;

    /// Return whether a token with the given value exists.
    async fn token_exists(&self, token: &str) -> Result<bool, Self::Error>;

    /// Update the last used time of a token, and its client
    /// information if given.
    async fn touch_token(
        &self,
        token_id: TokenId,
        used_at: UnixNanos,
        client: Option<&ClientInfo>,
    ) -> Result<(), Self::Error>;

    /// Persist a new token.
    async fn insert_token(&self, token: NewAuthToken) -> Result<AuthToken, Self::Error>;

    /// Look up a user of the legacy credential store.
    ///
    /// The legacy store is never written.
    async fn legacy_user(&self, username: &str) -> Result<Option<LegacyUser>, Self::Error>;
}
