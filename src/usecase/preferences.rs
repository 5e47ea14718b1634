use std::collections::HashMap;

use chrono::{NaiveTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::preferences::NotificationPreferences;
use crate::usecase::contracts::PreferencesRepository;
use crate::usecase::error::UsecaseError;

const TIME_FORMAT: &str = "%H:%M";

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct QuietHoursPatch {
    pub start: String,
    pub end: String,
}

/// Partial update: absent fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct PreferencesPatch {
    pub email_enabled: Option<bool>,
    pub push_enabled: Option<bool>,
    pub channel_settings: Option<HashMap<String, bool>>,
    /// `Some(None)` (explicit `null`) clears the window.
    #[serde(default, deserialize_with = "double_option")]
    pub quiet_hours: Option<Option<QuietHoursPatch>>,
}

fn double_option<'de, D>(deserializer: D) -> Result<Option<Option<QuietHoursPatch>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<QuietHoursPatch>::deserialize(deserializer).map(Some)
}

pub fn parse_time_of_day(value: &str) -> Result<NaiveTime, UsecaseError> {
    NaiveTime::parse_from_str(value.trim(), TIME_FORMAT)
        .map_err(|_| UsecaseError::Validation(format!("invalid time '{value}', expected HH:MM")))
}

pub fn format_time_of_day(value: NaiveTime) -> String {
    value.format(TIME_FORMAT).to_string()
}

pub struct PreferencesUseCase<R: PreferencesRepository> {
    preferences_repository: R,
}

impl<R: PreferencesRepository> PreferencesUseCase<R> {
    pub fn new(preferences_repository: R) -> Self {
        Self { preferences_repository }
    }

    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    pub async fn get_preferences(&self, user_id: Uuid) -> Result<NotificationPreferences, UsecaseError> {
        tracing::debug!("getting notification preferences");

        match self.preferences_repository.get(user_id).await? {
            Some(prefs) => Ok(prefs),
            None => {
                tracing::debug!("no stored preferences, returning defaults");
                Ok(NotificationPreferences::default_for(user_id))
            }
        }
    }

    #[tracing::instrument(skip(self, patch), fields(user_id = %user_id))]
    pub async fn update_preferences(
        &self,
        user_id: Uuid,
        patch: PreferencesPatch,
    ) -> Result<NotificationPreferences, UsecaseError> {
        let mut prefs = self.get_preferences(user_id).await?;

        if let Some(enabled) = patch.email_enabled {
            prefs.email_enabled = enabled;
        }
        if let Some(enabled) = patch.push_enabled {
            prefs.push_enabled = enabled;
        }
        if let Some(settings) = patch.channel_settings {
            prefs.category_settings.extend(settings);
        }
        match patch.quiet_hours {
            // empty bounds clear the window like an explicit null
            Some(Some(window)) if window.start.trim().is_empty() && window.end.trim().is_empty() => {
                prefs.quiet_hours_start = None;
                prefs.quiet_hours_end = None;
            }
            Some(Some(window)) => {
                prefs.quiet_hours_start = Some(parse_time_of_day(&window.start)?);
                prefs.quiet_hours_end = Some(parse_time_of_day(&window.end)?);
            }
            Some(None) => {
                prefs.quiet_hours_start = None;
                prefs.quiet_hours_end = None;
            }
            None => {}
        }
        prefs.updated_at = Utc::now();

        self.preferences_repository.upsert(&prefs).await?;

        tracing::info!(user_id = %user_id, "notification preferences saved");
        Ok(prefs)
    }
}
