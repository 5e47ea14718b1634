use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::State,
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::delivery::http::v1::middleware::AuthenticatedUser;
use crate::domain::preferences::NotificationPreferences;
use crate::usecase::error::UsecaseError;
use crate::usecase::preferences::{PreferencesPatch, format_time_of_day};
use crate::AppState;

#[derive(Debug, Serialize, PartialEq)]
pub struct QuietHoursResponse {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Serialize)]
pub struct PreferencesResponse {
    pub email_enabled: bool,
    pub push_enabled: bool,
    pub channel_settings: HashMap<String, bool>,
    pub quiet_hours: Option<QuietHoursResponse>,
    pub updated_at: DateTime<Utc>,
}

impl From<NotificationPreferences> for PreferencesResponse {
    fn from(prefs: NotificationPreferences) -> Self {
        let quiet_hours = prefs.quiet_hours().map(|(start, end)| QuietHoursResponse {
            start: format_time_of_day(start),
            end: format_time_of_day(end),
        });
        Self {
            email_enabled: prefs.email_enabled,
            push_enabled: prefs.push_enabled,
            channel_settings: prefs.category_settings,
            quiet_hours,
            updated_at: prefs.updated_at,
        }
    }
}

#[tracing::instrument(skip(state), fields(user_id = %user.user_id))]
pub async fn get_preferences(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, UsecaseError> {
    let prefs = state.preferences_usecase.get_preferences(user.user_id).await?;
    Ok(Json(PreferencesResponse::from(prefs)))
}

/// Serves both PUT and PATCH; fields left out of the body keep their stored value.
#[tracing::instrument(skip(state, patch), fields(user_id = %user.user_id))]
pub async fn update_preferences(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(patch): Json<PreferencesPatch>,
) -> Result<impl IntoResponse, UsecaseError> {
    let prefs = state.preferences_usecase.update_preferences(user.user_id, patch).await?;
    Ok(Json(PreferencesResponse::from(prefs)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use uuid::Uuid;

    #[test]
    fn test_response_formats_quiet_hours() {
        let mut prefs = NotificationPreferences::default_for(Uuid::new_v4());
        prefs.quiet_hours_start = NaiveTime::from_hms_opt(22, 0, 0);
        prefs.quiet_hours_end = NaiveTime::from_hms_opt(7, 30, 0);

        let response = PreferencesResponse::from(prefs);
        assert_eq!(
            response.quiet_hours,
            Some(QuietHoursResponse { start: "22:00".to_string(), end: "07:30".to_string() })
        );
    }

    #[test]
    fn test_response_omits_unset_window() {
        let response = PreferencesResponse::from(NotificationPreferences::default_for(Uuid::new_v4()));
        let json = serde_json::to_value(&response).unwrap();

        assert!(json["quiet_hours"].is_null());
        assert_eq!(json["email_enabled"], true);
    }
}
