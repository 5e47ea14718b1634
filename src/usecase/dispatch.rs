use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::notification::{ChannelType, Metadata, Notification, NotificationStatus};
use crate::domain::preferences::{self, NotificationPreferences};
use crate::usecase::contracts::{
    DeviceTokenRepository, EmailSender, NotificationRepository, PreferencesRepository,
    PushMessage, PushSender,
};
use crate::usecase::error::{ChannelFailure, ChannelFailures, DispatchError, ProviderError};
use crate::usecase::hub::ConnectionHub;
use crate::usecase::templates;

#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub user_id: Uuid,
    /// Required only when the email channel is requested.
    pub email: Option<String>,
    pub channels: Vec<ChannelType>,
    pub category: String,
    pub title: String,
    pub body: String,
    pub metadata: Metadata,
}

impl DispatchRequest {
    /// Requested channels with duplicates removed, first occurrence wins.
    pub fn unique_channels(&self) -> Vec<ChannelType> {
        let mut seen = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            if !seen.contains(channel) {
                seen.push(*channel);
            }
        }
        seen
    }
}

#[derive(Debug, Clone)]
pub struct BulkDispatchRequest {
    pub user_ids: Vec<Uuid>,
    pub emails: HashMap<Uuid, String>,
    pub channels: Vec<ChannelType>,
    pub category: String,
    pub title: String,
    pub body: String,
    pub metadata: Metadata,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct BulkOutcome {
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

pub struct DispatchService<N, P, D, E, S>
where
    N: NotificationRepository,
    P: PreferencesRepository,
    D: DeviceTokenRepository,
    E: EmailSender,
    S: PushSender,
{
    notification_repository: N,
    preferences_repository: P,
    device_token_repository: D,
    email_sender: Option<E>,
    push_sender: Option<S>,
    hub: Arc<ConnectionHub>,
}

impl<N, P, D, E, S> DispatchService<N, P, D, E, S>
where
    N: NotificationRepository,
    P: PreferencesRepository,
    D: DeviceTokenRepository,
    E: EmailSender,
    S: PushSender,
{
    pub fn new(
        notification_repository: N,
        preferences_repository: P,
        device_token_repository: D,
        email_sender: Option<E>,
        push_sender: Option<S>,
        hub: Arc<ConnectionHub>,
    ) -> Self {
        Self {
            notification_repository,
            preferences_repository,
            device_token_repository,
            email_sender,
            push_sender,
            hub,
        }
    }

    pub async fn send(&self, request: &DispatchRequest) -> Result<(), DispatchError> {
        self.send_at(request, Utc::now()).await
    }

    /// Gates the request against the user's preferences at `now`, then attempts
    /// every eligible channel independently.
    #[tracing::instrument(
        skip(self, request),
        fields(user_id = %request.user_id, category = %request.category)
    )]
    pub async fn send_at(
        &self,
        request: &DispatchRequest,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        let channels = request.unique_channels();
        if channels.is_empty() {
            return Err(DispatchError::Validation("no valid channels specified".to_string()));
        }

        let prefs = self
            .preferences_repository
            .get(request.user_id)
            .await?
            .unwrap_or_else(|| NotificationPreferences::default_for(request.user_id));

        if preferences::is_suppressed(&prefs, &request.category, now.time()) {
            tracing::info!("suppressed by quiet hours");
            metrics::counter!("notifications_suppressed_total", "reason" => "quiet_hours")
                .increment(1);
            return Ok(());
        }

        let mut failures = Vec::new();
        for channel in channels {
            if !preferences::is_channel_eligible(&prefs, channel, &request.category) {
                tracing::debug!(channel = %channel, "channel disabled by preferences");
                metrics::counter!("notifications_suppressed_total", "reason" => "preferences")
                    .increment(1);
                continue;
            }

            if let Err(failure) = self.dispatch_channel(channel, request).await {
                tracing::warn!(channel = %channel, error = %failure.message, "channel delivery failed");
                failures.push(failure);
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(DispatchError::Channels(ChannelFailures(failures)))
        }
    }

    /// Dispatches the same content to many users; one user's failure does not stop the rest.
    pub async fn send_bulk(&self, request: &BulkDispatchRequest) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();

        for user_id in &request.user_ids {
            let single = DispatchRequest {
                user_id: *user_id,
                email: request.emails.get(user_id).cloned(),
                channels: request.channels.clone(),
                category: request.category.clone(),
                title: request.title.clone(),
                body: request.body.clone(),
                metadata: request.metadata.clone(),
            };

            match self.send(&single).await {
                Ok(()) => outcome.succeeded += 1,
                Err(e) => {
                    outcome.failed += 1;
                    outcome.errors.push(format!("user {user_id}: {e}"));
                }
            }
        }

        tracing::info!(
            succeeded = outcome.succeeded,
            failed = outcome.failed,
            "bulk dispatch finished"
        );
        outcome
    }

    async fn dispatch_channel(
        &self,
        channel: ChannelType,
        request: &DispatchRequest,
    ) -> Result<(), ChannelFailure> {
        match channel {
            ChannelType::Email => self.dispatch_email(request).await,
            ChannelType::Push => self.dispatch_push(request).await,
            ChannelType::InApp => self.dispatch_in_app(request).await,
        }
    }

    async fn dispatch_email(&self, request: &DispatchRequest) -> Result<(), ChannelFailure> {
        let Some(sender) = &self.email_sender else {
            tracing::warn!("email provider not configured, skipping");
            return Ok(());
        };

        let address = request
            .email
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .ok_or_else(|| {
                ChannelFailure::validation(ChannelType::Email, "email address required")
            })?;

        let mut record = self.start_record(ChannelType::Email, request).await?;
        let outcome = deliver_email(sender, address, request).await;
        self.finish_record(&mut record, outcome.map_err(|e| e.to_string())).await
    }

    async fn dispatch_push(&self, request: &DispatchRequest) -> Result<(), ChannelFailure> {
        let Some(sender) = &self.push_sender else {
            tracing::warn!("push provider not configured, skipping");
            return Ok(());
        };

        let mut record = self.start_record(ChannelType::Push, request).await?;
        let message = PushMessage {
            title: request.title.clone(),
            body: request.body.clone(),
            data: request.metadata.clone(),
        };

        let outcome = match sender.send_to_user(request.user_id, &message).await {
            Ok(report) => {
                for token in &report.invalid_tokens {
                    if let Err(e) = self.device_token_repository.deactivate(token).await {
                        tracing::warn!(error = %e, "failed to deactivate rejected device token");
                    }
                }
                if report.invalid_tokens.is_empty() {
                    tracing::debug!(attempted = report.attempted, accepted = report.accepted, "push sent");
                } else {
                    tracing::info!(
                        deactivated = report.invalid_tokens.len(),
                        "deactivated rejected device tokens"
                    );
                }

                if report.attempted > 0 && report.accepted == 0 {
                    Err(format!("all {} device(s) rejected the message", report.attempted))
                } else {
                    Ok(())
                }
            }
            Err(e) => Err(e.to_string()),
        };

        self.finish_record(&mut record, outcome).await
    }

    async fn dispatch_in_app(&self, request: &DispatchRequest) -> Result<(), ChannelFailure> {
        let mut record = self.start_record(ChannelType::InApp, request).await?;
        let result = self.finish_record(&mut record, Ok(())).await;

        let reached = self.hub.notify(request.user_id, &record).await;
        tracing::debug!(notification_id = %record.id, reached, "in-app notification broadcast");
        result
    }

    /// Persists a fresh record and moves it to `sending`.
    async fn start_record(
        &self,
        channel: ChannelType,
        request: &DispatchRequest,
    ) -> Result<Notification, ChannelFailure> {
        let mut record = Notification::new(
            request.user_id,
            channel,
            request.category.clone(),
            request.title.clone(),
            request.body.clone(),
            request.metadata.clone(),
        );

        self.notification_repository
            .create(&record)
            .await
            .map_err(|e| ChannelFailure::infrastructure(channel, e.to_string()))?;

        record
            .transition(NotificationStatus::Sending)
            .map_err(|e| ChannelFailure::infrastructure(channel, e.to_string()))?;
        self.persist_status(&record).await;
        Ok(record)
    }

    /// Moves the record to its terminal delivery status and reports the channel outcome.
    async fn finish_record(
        &self,
        record: &mut Notification,
        outcome: Result<(), String>,
    ) -> Result<(), ChannelFailure> {
        let channel = record.channel_type;
        let next = if outcome.is_ok() {
            NotificationStatus::Sent
        } else {
            NotificationStatus::Failed
        };

        if let Err(e) = record.transition(next) {
            tracing::error!(notification_id = %record.id, error = %e, "unexpected status transition");
        } else {
            self.persist_status(record).await;
        }

        metrics::counter!(
            "notifications_dispatched_total",
            "channel" => channel.as_str(),
            "status" => next.as_str()
        )
        .increment(1);

        outcome.map_err(|message| ChannelFailure::provider(channel, message))
    }

    async fn persist_status(&self, record: &Notification) {
        if let Err(e) = self.notification_repository.update_status(record).await {
            tracing::error!(
                notification_id = %record.id,
                status = %record.status,
                error = %e,
                "failed to persist notification status"
            );
        }
    }
}

async fn deliver_email<E: EmailSender>(
    sender: &E,
    address: &str,
    request: &DispatchRequest,
) -> Result<(), ProviderError> {
    match request.category.as_str() {
        "otp" | "otp_verification" => {
            let code = metadata_string(&request.metadata, "otp").unwrap_or_default();
            let html = templates::otp_email_html(&code);
            sender.send_html(address, &request.title, &request.body, &html).await
        }
        "password_reset" => {
            let url = metadata_string(&request.metadata, "reset_url").unwrap_or_default();
            let html = templates::password_reset_html(&url);
            sender.send_html(address, &request.title, &request.body, &html).await
        }
        _ => sender.send(address, &request.title, &request.body).await,
    }
}

fn metadata_string(metadata: &Metadata, key: &str) -> Option<String> {
    metadata.get(key).map(|value| match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}
