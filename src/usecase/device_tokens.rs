use uuid::Uuid;

use crate::domain::device_token::{DeviceToken, Platform};
use crate::usecase::contracts::DeviceTokenRepository;
use crate::usecase::error::UsecaseError;

pub const MAX_TOKEN_LENGTH: usize = 4096;

pub struct DeviceTokensUseCase<D: DeviceTokenRepository> {
    device_token_repository: D,
}

impl<D: DeviceTokenRepository> DeviceTokensUseCase<D> {
    pub fn new(device_token_repository: D) -> Self {
        Self { device_token_repository }
    }

    /// Registers the token for the user. A token already known (for any user)
    /// is moved to this user and re-activated.
    #[tracing::instrument(skip(self, token), fields(user_id = %user_id, %platform))]
    pub async fn register(
        &self,
        user_id: Uuid,
        token: String,
        platform: Platform,
    ) -> Result<DeviceToken, UsecaseError> {
        let token = token.trim().to_string();
        if token.is_empty() || token.len() > MAX_TOKEN_LENGTH {
            return Err(UsecaseError::Validation("invalid device token".to_string()));
        }

        let stored = self
            .device_token_repository
            .upsert(&DeviceToken::new(user_id, token, platform))
            .await?;

        tracing::info!(device_token_id = %stored.id, "device token registered");
        Ok(stored)
    }

    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    pub async fn list(&self, user_id: Uuid) -> Result<Vec<DeviceToken>, UsecaseError> {
        let tokens = self.device_token_repository.find_active_by_user(user_id).await?;
        tracing::debug!(count = tokens.len(), "retrieved device tokens");
        Ok(tokens)
    }

    #[tracing::instrument(skip(self, token), fields(user_id = %user_id))]
    pub async fn unregister(&self, user_id: Uuid, token: &str) -> Result<(), UsecaseError> {
        let existing = self
            .device_token_repository
            .find_by_token(token)
            .await?
            .filter(|t| t.user_id == user_id)
            .ok_or_else(|| UsecaseError::NotFound("Device token".to_string()))?;

        self.device_token_repository.delete(token).await?;

        tracing::info!(device_token_id = %existing.id, "device token removed");
        Ok(())
    }
}
