use chrono::{DateTime, Utc};
use sqlx::{PgPool, postgres::PgPoolOptions, types::Json};
use uuid::Uuid;

use crate::{
    domain::device_token::DeviceToken,
    domain::notification::Notification,
    domain::preferences::NotificationPreferences,
    repository::errors::RepositoryError,
    usecase::contracts::{
        DeviceTokenRepository, ListQuery, NotificationRepository, PreferencesRepository,
    },
};

const NOTIFICATION_COLUMNS: &str = "id, user_id, type, channel, title, body, metadata, status, read_at, sent_at, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct NotificationPageRow {
    #[sqlx(flatten)]
    notification: Notification,
    total_count: i64,
}

/// Splits a windowed page into its records and the shared total, if any row came back.
fn split_page(rows: Vec<NotificationPageRow>) -> (Vec<Notification>, Option<i64>) {
    let total = rows.first().map(|row| row.total_count);
    let items = rows.into_iter().map(|row| row.notification).collect();
    (items, total)
}

#[derive(Clone)]
pub struct PostgresNotificationRepository {
    pool: PgPool,
}

impl PostgresNotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl NotificationRepository for PostgresNotificationRepository {
    #[tracing::instrument(skip(self, notification), fields(notification_id = %notification.id, user_id = %notification.user_id))]
    async fn create(&self, notification: &Notification) -> Result<(), RepositoryError> {
        tracing::debug!("creating notification");

        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, type, channel, title, body, metadata, status, read_at, sent_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#
        )
        .bind(notification.id)
        .bind(notification.user_id)
        .bind(notification.channel_type.as_str())
        .bind(&notification.category)
        .bind(&notification.title)
        .bind(&notification.body)
        .bind(Json(&notification.metadata))
        .bind(notification.status.as_str())
        .bind(notification.read_at)
        .bind(notification.sent_at)
        .bind(notification.created_at)
        .bind(notification.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        tracing::debug!(notification_id = %notification.id, "notification created successfully");
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(notification_id = %id))]
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Notification>, RepositoryError> {
        let query = format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = $1");

        let notification = sqlx::query_as::<_, Notification>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(notification)
    }

    #[tracing::instrument(skip(self), fields(user_id = %user_id, limit = query.limit, offset = query.offset, unread_only = query.unread_only))]
    async fn find_by_user(
        &self,
        user_id: Uuid,
        query: ListQuery,
    ) -> Result<(Vec<Notification>, i64), RepositoryError> {
        tracing::debug!("finding notifications by user_id");

        // the window count rides on every row, so items and total come from one snapshot
        let select = format!(
            r#"
            SELECT {NOTIFICATION_COLUMNS}, COUNT(*) OVER() AS total_count
            FROM notifications
            WHERE user_id = $1 AND ($2 = FALSE OR read_at IS NULL)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#
        );

        let rows = sqlx::query_as::<_, NotificationPageRow>(&select)
            .bind(user_id)
            .bind(query.unread_only)
            .bind(query.limit)
            .bind(query.offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        let (notifications, total) = match split_page(rows) {
            (items, Some(total)) => (items, total),
            (items, None) if query.offset == 0 => (items, 0),
            // a page past the end has no rows to carry the count
            (items, None) => {
                let total: i64 = sqlx::query_scalar(
                    r#"
                    SELECT COUNT(*)
                    FROM notifications
                    WHERE user_id = $1 AND ($2 = FALSE OR read_at IS NULL)
                    "#
                )
                .bind(user_id)
                .bind(query.unread_only)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;
                (items, total)
            }
        };

        tracing::debug!(user_id = %user_id, count = notifications.len(), total, "found notifications");
        Ok((notifications, total))
    }

    #[tracing::instrument(skip(self, notification), fields(notification_id = %notification.id, status = %notification.status))]
    async fn update_status(&self, notification: &Notification) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET status = $2, sent_at = $3, updated_at = $4
            WHERE id = $1
            "#
        )
        .bind(notification.id)
        .bind(notification.status.as_str())
        .bind(notification.sent_at)
        .bind(notification.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(notification_id = %id))]
    async fn mark_read(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, RepositoryError> {
        tracing::debug!("marking notification as read");

        let read_at: Option<Option<DateTime<Utc>>> = sqlx::query_scalar(
            r#"
            UPDATE notifications
            SET read_at = $2, updated_at = $2
            WHERE id = $1 AND read_at IS NULL AND status NOT IN ('failed', 'delivered')
            RETURNING read_at
            "#
        )
        .bind(id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        Ok(read_at.flatten())
    }

    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    async fn mark_all_read(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET read_at = $2, updated_at = $2
            WHERE user_id = $1 AND read_at IS NULL AND status NOT IN ('failed', 'delivered')
            "#
        )
        .bind(user_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        tracing::debug!(user_id = %user_id, updated = result.rows_affected(), "marked notifications as read");
        Ok(result.rows_affected())
    }

    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    async fn count_unread(&self, user_id: Uuid) -> Result<i64, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM notifications
            WHERE user_id = $1 AND type = 'in_app' AND read_at IS NULL
            "#
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        Ok(count)
    }

    #[tracing::instrument(skip(self))]
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM notifications WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[derive(Clone)]
pub struct PostgresPreferencesRepository {
    pool: PgPool,
}

impl PostgresPreferencesRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl PreferencesRepository for PostgresPreferencesRepository {
    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    async fn get(&self, user_id: Uuid) -> Result<Option<NotificationPreferences>, RepositoryError> {
        let prefs = sqlx::query_as::<_, NotificationPreferences>(
            r#"
            SELECT user_id, email_enabled, push_enabled, channels, quiet_hours_start, quiet_hours_end, created_at, updated_at
            FROM notification_preferences
            WHERE user_id = $1
            "#
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        Ok(prefs)
    }

    #[tracing::instrument(skip(self, preferences), fields(user_id = %preferences.user_id))]
    async fn upsert(&self, preferences: &NotificationPreferences) -> Result<(), RepositoryError> {
        tracing::debug!("saving notification preferences");

        sqlx::query(
            r#"
            INSERT INTO notification_preferences (user_id, email_enabled, push_enabled, channels, quiet_hours_start, quiet_hours_end, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (user_id) DO UPDATE
            SET email_enabled = EXCLUDED.email_enabled,
                push_enabled = EXCLUDED.push_enabled,
                channels = EXCLUDED.channels,
                quiet_hours_start = EXCLUDED.quiet_hours_start,
                quiet_hours_end = EXCLUDED.quiet_hours_end,
                updated_at = EXCLUDED.updated_at
            "#
        )
        .bind(preferences.user_id)
        .bind(preferences.email_enabled)
        .bind(preferences.push_enabled)
        .bind(Json(&preferences.category_settings))
        .bind(preferences.quiet_hours_start)
        .bind(preferences.quiet_hours_end)
        .bind(preferences.created_at)
        .bind(preferences.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        Ok(())
    }
}

#[derive(Clone)]
pub struct PostgresDeviceTokenRepository {
    pool: PgPool,
}

impl PostgresDeviceTokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl DeviceTokenRepository for PostgresDeviceTokenRepository {
    #[tracing::instrument(skip(self, token), fields(user_id = %token.user_id, platform = %token.platform))]
    async fn upsert(&self, token: &DeviceToken) -> Result<DeviceToken, RepositoryError> {
        let stored = sqlx::query_as::<_, DeviceToken>(
            r#"
            INSERT INTO device_tokens (id, user_id, token, platform, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, TRUE, $5, $6)
            ON CONFLICT (token) DO UPDATE
            SET user_id = EXCLUDED.user_id,
                platform = EXCLUDED.platform,
                is_active = TRUE,
                updated_at = EXCLUDED.updated_at
            RETURNING id, user_id, token, platform, is_active, created_at, updated_at
            "#
        )
        .bind(token.id)
        .bind(token.user_id)
        .bind(&token.token)
        .bind(token.platform.as_str())
        .bind(token.created_at)
        .bind(token.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        Ok(stored)
    }

    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    async fn find_active_by_user(&self, user_id: Uuid) -> Result<Vec<DeviceToken>, RepositoryError> {
        let tokens = sqlx::query_as::<_, DeviceToken>(
            r#"
            SELECT id, user_id, token, platform, is_active, created_at, updated_at
            FROM device_tokens
            WHERE user_id = $1 AND is_active = TRUE
            ORDER BY updated_at DESC
            "#
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        tracing::debug!(user_id = %user_id, count = tokens.len(), "found active device tokens");
        Ok(tokens)
    }

    #[tracing::instrument(skip(self, token))]
    async fn find_by_token(&self, token: &str) -> Result<Option<DeviceToken>, RepositoryError> {
        let found = sqlx::query_as::<_, DeviceToken>(
            r#"
            SELECT id, user_id, token, platform, is_active, created_at, updated_at
            FROM device_tokens
            WHERE token = $1
            "#
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        Ok(found)
    }

    #[tracing::instrument(skip(self, token))]
    async fn deactivate(&self, token: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE device_tokens
            SET is_active = FALSE, updated_at = NOW()
            WHERE token = $1
            "#
        )
        .bind(token)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, token))]
    async fn delete(&self, token: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM device_tokens WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::notification::{ChannelType, Metadata};

    fn row(total_count: i64) -> NotificationPageRow {
        NotificationPageRow {
            notification: Notification::new(
                Uuid::new_v4(),
                ChannelType::InApp,
                "general".to_string(),
                "Title".to_string(),
                "Body".to_string(),
                Metadata::new(),
            ),
            total_count,
        }
    }

    #[test]
    fn test_split_page_takes_total_from_window() {
        let (items, total) = split_page(vec![row(42), row(42)]);

        assert_eq!(items.len(), 2);
        assert_eq!(total, Some(42));
    }

    #[test]
    fn test_split_page_without_rows_has_no_total() {
        let (items, total) = split_page(Vec::new());

        assert!(items.is_empty());
        assert_eq!(total, None);
    }
}
