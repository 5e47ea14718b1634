use std::collections::HashMap;

use chrono::{DateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::notification::ChannelType;

/// Categories that are still delivered during quiet hours.
pub const CRITICAL_CATEGORIES: [&str; 3] = ["otp", "otp_verification", "password_reset"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationPreferences {
    pub user_id: Uuid,
    pub email_enabled: bool,
    pub push_enabled: bool,
    /// Per-category overrides of the global channel flags.
    #[serde(rename = "channel_settings", default)]
    #[sqlx(rename = "channels", json)]
    pub category_settings: HashMap<String, bool>,
    pub quiet_hours_start: Option<NaiveTime>,
    pub quiet_hours_end: Option<NaiveTime>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationPreferences {
    pub fn default_for(user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            email_enabled: true,
            push_enabled: true,
            category_settings: HashMap::new(),
            quiet_hours_start: None,
            quiet_hours_end: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn quiet_hours(&self) -> Option<(NaiveTime, NaiveTime)> {
        self.quiet_hours_start.zip(self.quiet_hours_end)
    }
}

fn minute_of_day(t: NaiveTime) -> u32 {
    t.hour() * 60 + t.minute()
}

/// Whether `now` falls inside the user's quiet-hours window.
///
/// Compared at minute resolution. A window whose start is after its end wraps
/// past midnight.
pub fn is_quiet_hours(prefs: &NotificationPreferences, now: NaiveTime) -> bool {
    let Some((start, end)) = prefs.quiet_hours() else {
        return false;
    };

    let (start, end, now) = (minute_of_day(start), minute_of_day(end), minute_of_day(now));
    if start > end {
        now >= start || now < end
    } else {
        start <= now && now < end
    }
}

pub fn is_critical_category(category: &str) -> bool {
    CRITICAL_CATEGORIES.contains(&category)
}

/// Request-level gate: quiet hours drop every non-critical request.
pub fn is_suppressed(prefs: &NotificationPreferences, category: &str, now: NaiveTime) -> bool {
    is_quiet_hours(prefs, now) && !is_critical_category(category)
}

pub fn is_channel_eligible(
    prefs: &NotificationPreferences,
    channel: ChannelType,
    category: &str,
) -> bool {
    if let Some(enabled) = prefs.category_settings.get(category) {
        return *enabled;
    }

    match channel {
        ChannelType::Email => prefs.email_enabled,
        ChannelType::Push => prefs.push_enabled,
        ChannelType::InApp => true,
    }
}
