use async_trait::async_trait;
use gambit_common::{
    identity::{AuthToken, ClientInfo, LegacyUser, NewAuthToken},
    TokenId, UnixNanos,
};
use gambit_identity::store::IdentityStore;

use crate::{Error, MemoryStore};

#[async_trait]
impl IdentityStore for MemoryStore {
    type Error = Error;

    async fn token(&self, token: &str) -> Result<Option<AuthToken>, Self::Error> {
        Ok(self.get_token(token))
    }

    async fn token_exists(&self, token: &str) -> Result<bool, Self::Error> {
        Ok(self
            .inner
            .state
            .lock()
            .tokens_by_value
            .contains_key(token))
    }

    async fn touch_token(
        &self,
        token_id: TokenId,
        used_at: UnixNanos,
        client: Option<&ClientInfo>,
    ) -> Result<(), Self::Error> {
        let mut state = self.inner.state.lock();
        let token = state
            .tokens
            .get_mut(&token_id)
            .ok_or(Error::TokenNotFound(token_id))?;

        token.last_used_at = Some(used_at);
        if let Some(client) = client {
            token.client_version = Some(client.version.clone());
            token.client_host = Some(client.hostname.clone());
            token.gpu_type = Some(client.gpu_type.clone());
            token.gpu_id = client.gpu_id;
        }

        Ok(())
    }

    async fn insert_token(&self, token: NewAuthToken) -> Result<AuthToken, Self::Error> {
        let mut state = self.inner.state.lock();
        if state.tokens_by_value.contains_key(&token.token) {
            return Err(Error::DuplicateToken);
        }

        state.last_token_id += 1;
        let id = TokenId(state.last_token_id);

        let token = AuthToken {
            id,
            user_id: token.user_id,
            token: token.token,
            created_at: token.created_at,
            last_used_at: None,
            issued_reason: token.issued_reason,
            client_version: None,
            client_host: None,
            gpu_type: None,
            gpu_id: None,
        };

        state.tokens_by_value.insert(token.token.clone(), id);
        state.tokens.insert(id, token.clone());

        Ok(token)
    }

    async fn legacy_user(&self, username: &str) -> Result<Option<LegacyUser>, Self::Error> {
        Ok(self.inner.state.lock().legacy_users.get(username).cloned())
    }
}
