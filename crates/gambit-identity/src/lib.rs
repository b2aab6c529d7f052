//! Token validation and issuance for Gambit.
//!
//! Callers authenticate with an opaque bearer token. Tokens are
//! issued anonymously or in exchange for credentials of the
//! legacy user store.

#![warn(clippy::pedantic, missing_docs)]
#![allow(clippy::module_name_repetitions)]

use gambit_common::{
    identity::{AuthToken, ClientInfo, NewAuthToken, TokenReason},
    status::Code,
    UnixNanos,
};
use store::IdentityStore;

pub mod store;
pub mod token;

/// Longest accepted legacy username, in bytes.
pub const MAX_USERNAME_LEN: usize = 32;

/// Attempts at generating a token that is not in use yet.
pub const TOKEN_ATTEMPTS: usize = 10;

/// Identity errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The token does not have the expected shape.
    #[error("invalid token format")]
    InvalidTokenFormat,
    /// The token is not known.
    #[error("unknown token")]
    UnknownToken,
    /// Empty username.
    #[error("No username supplied")]
    MissingUsername,
    /// Username longer than [`MAX_USERNAME_LEN`].
    #[error("Username too long")]
    UsernameTooLong,
    /// Empty password.
    #[error("No password supplied")]
    MissingPassword,
    /// No legacy user matches the credentials.
    #[error("User not found")]
    UserNotFound,
    /// Every generated token was already taken.
    #[error("could not generate unique token after {0} attempts")]
    TokenExhausted(usize),
    /// A store error ocurred.
    #[error("store error: {0:?}")]
    Store(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// The client-visible category of the error.
    #[must_use]
    pub fn code(&self) -> Code {
        match self {
            Error::InvalidTokenFormat
            | Error::MissingUsername
            | Error::UsernameTooLong
            | Error::MissingPassword => Code::InvalidArgument,
            Error::UnknownToken => Code::Unauthenticated,
            Error::UserNotFound => Code::NotFound,
            Error::TokenExhausted(_) | Error::Store(_) => Code::Internal,
        }
    }
}

/// Maps bearer tokens to identities.
#[derive(Debug, Clone)]
pub struct IdentityValidator<S> {
    store: S,
}

impl<S> IdentityValidator<S>
where
    S: IdentityStore,
{
    /// Create a new validator with the given backing store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Resolve a token and refresh its audit fields.
    ///
    /// The last used time is always updated, the client
    /// information only if given.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidTokenFormat`] or [`Error::UnknownToken`]
    /// without touching the store's state.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn validate(
        &self,
        token: &str,
        client: Option<&ClientInfo>,
    ) -> Result<AuthToken, Error> {
        if !token::is_well_formed(token) {
            return Err(Error::InvalidTokenFormat);
        }

        let mut identity = self
            .store
            .token(token)
            .await
            .map_err(store_error)?
            .ok_or(Error::UnknownToken)?;

        let now = UnixNanos::now();
        self.store
            .touch_token(identity.id, now, client)
            .await
            .map_err(store_error)?;

        identity.last_used_at = Some(now);
        if let Some(client) = client {
            identity.client_version = Some(client.version.clone());
            identity.client_host = Some(client.hostname.clone());
            identity.gpu_type = Some(client.gpu_type.clone());
            identity.gpu_id = client.gpu_id;
        }

        Ok(identity)
    }
}

/// Issues new tokens.
#[derive(Debug, Clone)]
pub struct TokenIssuer<S> {
    store: S,
}

impl<S> TokenIssuer<S>
where
    S: IdentityStore,
{
    /// Create a new issuer with the given backing store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Exchange legacy credentials for a token.
    ///
    /// # Errors
    ///
    /// Fails on empty or overlong usernames, empty passwords
    /// and credentials that match no legacy user.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn migrate_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<String, Error> {
        if username.is_empty() {
            return Err(Error::MissingUsername);
        }
        if username.len() > MAX_USERNAME_LEN {
            return Err(Error::UsernameTooLong);
        }
        if password.is_empty() {
            return Err(Error::MissingPassword);
        }

        let user = self
            .store
            .legacy_user(username)
            .await
            .map_err(store_error)?
            .filter(|user| user.password == password)
            .ok_or(Error::UserNotFound)?;

        let token = self.unique_token().await?;
        let token = self
            .store
            .insert_token(NewAuthToken {
                user_id: Some(user.id),
                token,
                issued_reason: TokenReason::MigratedCredentials,
                created_at: UnixNanos::now(),
            })
            .await
            .map_err(store_error)?;

        tracing::info!(user_id = %user.id, token_id = %token.id, "credentials migrated");
        Ok(token.token)
    }

    /// Issue a token without a user.
    ///
    /// # Errors
    ///
    /// Fails if no unused token could be generated.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn anonymous_token(&self) -> Result<String, Error> {
        let token = self.unique_token().await?;
        let token = self
            .store
            .insert_token(NewAuthToken {
                user_id: None,
                token,
                issued_reason: TokenReason::Anonymous,
                created_at: UnixNanos::now(),
            })
            .await
            .map_err(store_error)?;

        tracing::debug!(token_id = %token.id, "anonymous token issued");
        Ok(token.token)
    }

    async fn unique_token(&self) -> Result<String, Error> {
        for _ in 0..TOKEN_ATTEMPTS {
            let candidate = token::generate();
            if !self
                .store
                .token_exists(&candidate)
                .await
                .map_err(store_error)?
            {
                return Ok(candidate);
            }
        }

        Err(Error::TokenExhausted(TOKEN_ATTEMPTS))
    }
}

fn store_error<E: std::error::Error + Send + Sync + 'static>(error: E) -> Error {
    Error::Store(Box::new(error))
}
