use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::domain::notification::Notification;
use crate::usecase::contracts::{ListQuery, NotificationRepository};
use crate::usecase::error::UsecaseError;

pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationPage {
    pub items: Vec<Notification>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

impl NotificationPage {
    pub fn total_pages(&self) -> i64 {
        if self.limit <= 0 { 0 } else { (self.total + self.limit - 1) / self.limit }
    }
}

pub struct NotificationsUseCase<N>
where
    N: NotificationRepository,
{
    notification_repository: N,
}

impl<N> NotificationsUseCase<N>
where
    N: NotificationRepository,
{
    pub fn new(notification_repository: N) -> Self {
        Self { notification_repository }
    }

    #[tracing::instrument(skip(self), fields(user_id = %user_id, %page, %limit, %unread_only))]
    pub async fn list_notifications(
        &self,
        user_id: Uuid,
        page: i64,
        limit: i64,
        unread_only: bool,
    ) -> Result<NotificationPage, UsecaseError> {
        tracing::debug!("listing notifications");

        let page = page.max(1);
        let limit = if limit < 1 { 20 } else { limit.min(MAX_PAGE_SIZE) };
        let offset = (page - 1).saturating_mul(limit);
        let query = ListQuery { limit, offset, unread_only };

        let (items, total) = self.notification_repository.find_by_user(user_id, query).await?;

        tracing::debug!(user_id = %user_id, count = items.len(), total, "retrieved notifications");
        Ok(NotificationPage { items, total, page, limit })
    }

    #[tracing::instrument(skip(self), fields(notification_id = %id, user_id = %user_id))]
    pub async fn get_notification(&self, id: Uuid, user_id: Uuid) -> Result<Notification, UsecaseError> {
        // records of other users are reported as missing
        self.notification_repository
            .find_by_id(id)
            .await?
            .filter(|n| n.user_id == user_id)
            .ok_or_else(|| UsecaseError::NotFound("Notification".to_string()))
    }

    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    pub async fn count_unread(&self, user_id: Uuid) -> Result<i64, UsecaseError> {
        tracing::debug!("counting unread notifications");

        let count = self.notification_repository.count_unread(user_id).await?;

        tracing::debug!(user_id = %user_id, count, "unread count retrieved");
        Ok(count)
    }

    /// Marks the record read once; repeated calls return it unchanged.
    #[tracing::instrument(skip(self), fields(notification_id = %id, user_id = %user_id))]
    pub async fn mark_as_read(&self, id: Uuid, user_id: Uuid) -> Result<Notification, UsecaseError> {
        let mut notification = self.get_notification(id, user_id).await?;
        let now = Utc::now();

        match notification.mark_read(now) {
            Ok(false) => return Ok(notification),
            Ok(true) => {}
            Err(e) => return Err(UsecaseError::Validation(e.to_string())),
        }

        match self.notification_repository.mark_read(id, now).await? {
            Some(stored) => notification.read_at = Some(stored),
            // marked concurrently; report the stored marker
            None => return self.get_notification(id, user_id).await,
        }

        tracing::debug!(notification_id = %id, "notification marked as read");
        Ok(notification)
    }

    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    pub async fn mark_all_as_read(&self, user_id: Uuid) -> Result<u64, UsecaseError> {
        tracing::debug!("marking all notifications as read");

        let updated = self.notification_repository.mark_all_read(user_id, Utc::now()).await?;

        tracing::info!(user_id = %user_id, updated, "all notifications marked as read");
        Ok(updated)
    }

    /// Deletes records older than `retention_days`. Returns how many were removed.
    #[tracing::instrument(skip(self))]
    pub async fn purge_older_than(&self, retention_days: u32) -> Result<u64, UsecaseError> {
        let cutoff = Utc::now() - Duration::days(i64::from(retention_days));
        let deleted = self.notification_repository.delete_older_than(cutoff).await?;

        if deleted > 0 {
            tracing::info!(deleted, %cutoff, "purged old notifications");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::notification::{ChannelType, Metadata, NotificationStatus};
    use crate::repository::errors::RepositoryError;
    use crate::usecase::contracts::MockNotificationRepository;

    fn sent_in_app(user_id: Uuid) -> Notification {
        let mut n = Notification::new(
            user_id,
            ChannelType::InApp,
            "general".to_string(),
            "Title".to_string(),
            "Body".to_string(),
            Metadata::new(),
        );
        n.transition(NotificationStatus::Sending).unwrap();
        n.transition(NotificationStatus::Sent).unwrap();
        n
    }

    #[tokio::test]
    async fn test_list_clamps_paging() {
        let user_id = Uuid::new_v4();
        let mut repo = MockNotificationRepository::new();
        repo.expect_find_by_user()
            .withf(move |uid, q| {
                *uid == user_id && q.limit == MAX_PAGE_SIZE && q.offset == MAX_PAGE_SIZE && q.unread_only
            })
            .returning(|_, _| Ok((vec![], 250)));

        let usecase = NotificationsUseCase::new(repo);
        let page = usecase.list_notifications(user_id, 2, 1000, true).await.unwrap();

        assert_eq!(page.limit, MAX_PAGE_SIZE);
        assert_eq!(page.total_pages(), 3);
    }

    #[tokio::test]
    async fn test_list_huge_page_saturates_offset() {
        let mut repo = MockNotificationRepository::new();
        repo.expect_find_by_user()
            .withf(|_, q| q.limit == 20 && q.offset == i64::MAX)
            .returning(|_, _| Ok((vec![], 3)));

        let usecase = NotificationsUseCase::new(repo);
        let page = usecase.list_notifications(Uuid::new_v4(), i64::MAX, 20, false).await.unwrap();

        assert!(page.items.is_empty());
        assert_eq!(page.page, i64::MAX);
        assert_eq!(page.total_pages(), 1);
    }

    #[tokio::test]
    async fn test_get_notification_of_other_user_not_found() {
        let owner = Uuid::new_v4();
        let notification = sent_in_app(owner);
        let id = notification.id;

        let mut repo = MockNotificationRepository::new();
        repo.expect_find_by_id().returning(move |_| Ok(Some(notification.clone())));

        let usecase = NotificationsUseCase::new(repo);
        let result = usecase.get_notification(id, Uuid::new_v4()).await;

        assert!(matches!(result, Err(UsecaseError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_get_missing_notification_not_found() {
        let mut repo = MockNotificationRepository::new();
        repo.expect_find_by_id().returning(|_| Ok(None));

        let usecase = NotificationsUseCase::new(repo);
        let result = usecase.get_notification(Uuid::new_v4(), Uuid::new_v4()).await;

        assert!(matches!(result, Err(UsecaseError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_mark_as_read_sets_marker() {
        let user_id = Uuid::new_v4();
        let notification = sent_in_app(user_id);
        let id = notification.id;

        let mut repo = MockNotificationRepository::new();
        repo.expect_find_by_id().returning(move |_| Ok(Some(notification.clone())));
        repo.expect_mark_read().times(1).returning(|_, at| Ok(Some(at)));

        let usecase = NotificationsUseCase::new(repo);
        let read = usecase.mark_as_read(id, user_id).await.unwrap();

        assert!(read.read_at.is_some());
    }

    #[tokio::test]
    async fn test_mark_as_read_twice_is_noop() {
        let user_id = Uuid::new_v4();
        let mut notification = sent_in_app(user_id);
        let first_read = Utc::now() - Duration::minutes(5);
        notification.read_at = Some(first_read);
        let id = notification.id;

        let mut repo = MockNotificationRepository::new();
        repo.expect_find_by_id().returning(move |_| Ok(Some(notification.clone())));
        repo.expect_mark_read().never();

        let usecase = NotificationsUseCase::new(repo);
        let read = usecase.mark_as_read(id, user_id).await.unwrap();

        assert_eq!(read.read_at, Some(first_read));
    }

    #[tokio::test]
    async fn test_mark_as_read_rejected_for_failed_record() {
        let user_id = Uuid::new_v4();
        let mut notification = sent_in_app(user_id);
        notification.status = NotificationStatus::Failed;
        let id = notification.id;

        let mut repo = MockNotificationRepository::new();
        repo.expect_find_by_id().returning(move |_| Ok(Some(notification.clone())));
        repo.expect_mark_read().never();

        let usecase = NotificationsUseCase::new(repo);
        let result = usecase.mark_as_read(id, user_id).await;

        assert!(matches!(result, Err(UsecaseError::Validation(_))));
    }

    #[tokio::test]
    async fn test_count_unread_propagates_database_error() {
        let mut repo = MockNotificationRepository::new();
        repo.expect_count_unread()
            .returning(|_| Err(RepositoryError::DatabaseError("down".to_string())));

        let usecase = NotificationsUseCase::new(repo);
        let result = usecase.count_unread(Uuid::new_v4()).await;

        assert!(matches!(result, Err(UsecaseError::Internal(_))));
    }

    #[tokio::test]
    async fn test_purge_uses_retention_cutoff() {
        let mut repo = MockNotificationRepository::new();
        repo.expect_delete_older_than()
            .withf(|cutoff| {
                let age = Utc::now() - *cutoff;
                age >= Duration::days(30) && age < Duration::days(30) + Duration::minutes(1)
            })
            .returning(|_| Ok(4));

        let usecase = NotificationsUseCase::new(repo);
        let deleted = tokio_test::assert_ok!(usecase.purge_older_than(30).await);
        assert_eq!(deleted, 4);
    }
}
