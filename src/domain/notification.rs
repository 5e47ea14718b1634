use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Delivery mechanism a record was sent through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    Email,
    Push,
    InApp,
}

impl ChannelType {
    pub const ALL: [ChannelType; 3] = [ChannelType::Email, ChannelType::Push, ChannelType::InApp];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Email => "email",
            ChannelType::Push => "push",
            ChannelType::InApp => "in_app",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self { kind, value: value.into() }
    }
}

impl FromStr for ChannelType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(ChannelType::Email),
            "push" => Ok(ChannelType::Push),
            "in_app" => Ok(ChannelType::InApp),
            other => Err(ParseEnumError::new("channel type", other)),
        }
    }
}

impl TryFrom<String> for ChannelType {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sending,
    Sent,
    Delivered,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Sending => "sending",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Delivered => "delivered",
            NotificationStatus::Failed => "failed",
        }
    }

    /// Forward-only lifecycle: pending -> sending -> {sent | failed}, sent -> delivered.
    pub fn can_transition_to(self, next: NotificationStatus) -> bool {
        use NotificationStatus::*;
        matches!(
            (self, next),
            (Pending, Sending) | (Sending, Sent) | (Sending, Failed) | (Sent, Delivered)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, NotificationStatus::Failed | NotificationStatus::Delivered)
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(NotificationStatus::Pending),
            "sending" => Ok(NotificationStatus::Sending),
            "sent" => Ok(NotificationStatus::Sent),
            "delivered" => Ok(NotificationStatus::Delivered),
            "failed" => Ok(NotificationStatus::Failed),
            other => Err(ParseEnumError::new("notification status", other)),
        }
    }
}

impl TryFrom<String> for NotificationStatus {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("invalid status transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: NotificationStatus,
    pub to: NotificationStatus,
}

#[derive(Debug, Error, PartialEq)]
#[error("notification in status {0} cannot be marked read")]
pub struct NotReadable(pub NotificationStatus);

/// One delivery attempt on one channel.
///
/// Serialized with the persisted column names: `type` is the delivery
/// channel, `channel` the free-text category tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(rename = "type")]
    #[sqlx(rename = "type", try_from = "String")]
    pub channel_type: ChannelType,
    #[serde(rename = "channel")]
    #[sqlx(rename = "channel")]
    pub category: String,
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    #[sqlx(json)]
    pub metadata: Metadata,
    #[sqlx(try_from = "String")]
    pub status: NotificationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        user_id: Uuid,
        channel_type: ChannelType,
        category: String,
        title: String,
        body: String,
        metadata: Metadata,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            channel_type,
            category,
            title,
            body,
            metadata,
            status: NotificationStatus::Pending,
            read_at: None,
            sent_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn transition(&mut self, next: NotificationStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition { from: self.status, to: next });
        }

        let now = Utc::now();
        if next == NotificationStatus::Sent {
            self.sent_at = Some(now);
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }

    pub fn can_be_marked_read(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Sets the read marker once. Returns `false` when it was already set.
    pub fn mark_read(&mut self, at: DateTime<Utc>) -> Result<bool, NotReadable> {
        if self.is_read() {
            return Ok(false);
        }
        if !self.can_be_marked_read() {
            return Err(NotReadable(self.status));
        }
        self.read_at = Some(at);
        self.updated_at = at;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn make_notification(channel_type: ChannelType) -> Notification {
        Notification::new(
            Uuid::new_v4(),
            channel_type,
            "marketing".to_string(),
            "Title".to_string(),
            "Body".to_string(),
            Metadata::new(),
        )
    }

    #[test]
    fn test_notification_creation() {
        let user_id = Uuid::new_v4();
        let n = Notification::new(
            user_id,
            ChannelType::Email,
            "otp".to_string(),
            "Code".to_string(),
            "123456".to_string(),
            Metadata::new(),
        );

        assert_eq!(n.user_id, user_id);
        assert_eq!(n.status, NotificationStatus::Pending);
        assert!(n.read_at.is_none());
        assert!(n.sent_at.is_none());
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut n = make_notification(ChannelType::Push);

        n.transition(NotificationStatus::Sending).unwrap();
        assert!(n.sent_at.is_none());
        n.transition(NotificationStatus::Sent).unwrap();
        assert!(n.sent_at.is_some());
        n.transition(NotificationStatus::Delivered).unwrap();
        assert_eq!(n.status, NotificationStatus::Delivered);
    }

    #[test]
    fn test_failed_is_terminal() {
        let mut n = make_notification(ChannelType::Email);
        n.transition(NotificationStatus::Sending).unwrap();
        n.transition(NotificationStatus::Failed).unwrap();

        let err = n.transition(NotificationStatus::Sent).unwrap_err();
        assert_eq!(err.from, NotificationStatus::Failed);
        assert_eq!(err.to, NotificationStatus::Sent);
        assert_eq!(n.status, NotificationStatus::Failed);
    }

    #[test]
    fn test_backward_and_skipping_transitions_rejected() {
        use NotificationStatus::*;

        assert!(!Pending.can_transition_to(Sent));
        assert!(!Pending.can_transition_to(Delivered));
        assert!(!Sent.can_transition_to(Pending));
        assert!(!Sent.can_transition_to(Failed));
        assert!(!Delivered.can_transition_to(Sent));
        assert!(!Sending.can_transition_to(Sending));
    }

    #[test]
    fn test_mark_read_twice_keeps_first_timestamp() {
        let mut n = make_notification(ChannelType::InApp);
        let first = Utc::now();

        assert_eq!(n.mark_read(first), Ok(true));
        assert_eq!(n.mark_read(first + Duration::seconds(30)), Ok(false));
        assert_eq!(n.read_at, Some(first));
    }

    #[test]
    fn test_mark_read_rejected_in_terminal_status() {
        let mut n = make_notification(ChannelType::Email);
        n.transition(NotificationStatus::Sending).unwrap();
        n.transition(NotificationStatus::Failed).unwrap();

        assert_eq!(n.mark_read(Utc::now()), Err(NotReadable(NotificationStatus::Failed)));
        assert!(n.read_at.is_none());
    }

    #[test]
    fn test_serialization_uses_column_names() {
        let mut n = make_notification(ChannelType::InApp);
        n.metadata.insert("otp".to_string(), serde_json::json!("123456"));

        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["type"], "in_app");
        assert_eq!(json["channel"], "marketing");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["metadata"]["otp"], "123456");
        assert!(json.get("read_at").is_none());
    }

    #[test]
    fn test_channel_type_parsing() {
        assert_eq!("in_app".parse::<ChannelType>(), Ok(ChannelType::InApp));
        assert!("sms".parse::<ChannelType>().is_err());
        assert_eq!(
            NotificationStatus::try_from("delivered".to_string()),
            Ok(NotificationStatus::Delivered)
        );
    }
}
