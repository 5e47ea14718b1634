use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::device_token::DeviceToken;
use crate::domain::notification::{Metadata, Notification};
use crate::domain::preferences::NotificationPreferences;
use crate::repository::errors::RepositoryError;
use crate::usecase::error::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListQuery {
    pub limit: i64,
    pub offset: i64,
    pub unread_only: bool,
}

#[cfg_attr(test, mockall::automock)]
pub trait NotificationRepository: Send + Sync {
    async fn create(&self, notification: &Notification) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Notification>, RepositoryError>;
    /// Returns one page of the user's records, newest first, and the total matching count.
    async fn find_by_user(
        &self,
        user_id: Uuid,
        query: ListQuery,
    ) -> Result<(Vec<Notification>, i64), RepositoryError>;
    async fn update_status(&self, notification: &Notification) -> Result<(), RepositoryError>;
    /// Sets `read_at` only if it is still unset; `None` when nothing was updated.
    async fn mark_read(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, RepositoryError>;
    async fn mark_all_read(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<u64, RepositoryError>;
    async fn count_unread(&self, user_id: Uuid) -> Result<i64, RepositoryError>;
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
pub trait PreferencesRepository: Send + Sync {
    async fn get(&self, user_id: Uuid) -> Result<Option<NotificationPreferences>, RepositoryError>;
    async fn upsert(&self, preferences: &NotificationPreferences) -> Result<(), RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
pub trait DeviceTokenRepository: Send + Sync {
    /// Inserts the token or, if the token string exists, re-assigns and re-activates it.
    async fn upsert(&self, token: &DeviceToken) -> Result<DeviceToken, RepositoryError>;
    async fn find_active_by_user(&self, user_id: Uuid) -> Result<Vec<DeviceToken>, RepositoryError>;
    async fn find_by_token(&self, token: &str) -> Result<Option<DeviceToken>, RepositoryError>;
    async fn deactivate(&self, token: &str) -> Result<(), RepositoryError>;
    async fn delete(&self, token: &str) -> Result<(), RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
pub trait EmailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), ProviderError>;
    async fn send_html(
        &self,
        to: &str,
        subject: &str,
        plain_body: &str,
        html_body: &str,
    ) -> Result<(), ProviderError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub data: Metadata,
}

/// Per-user push outcome.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushReport {
    /// Active devices the message was addressed to.
    pub attempted: usize,
    pub accepted: usize,
    /// Tokens the provider rejected as unregistered or invalid.
    pub invalid_tokens: Vec<String>,
}

#[cfg_attr(test, mockall::automock)]
pub trait PushSender: Send + Sync {
    /// Sends to every active device of the user. Zero devices is an empty report, not an error.
    async fn send_to_user(
        &self,
        user_id: Uuid,
        message: &PushMessage,
    ) -> Result<PushReport, ProviderError>;
}
