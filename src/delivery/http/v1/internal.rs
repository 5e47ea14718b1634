use std::collections::HashMap;
use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::domain::notification::{ChannelType, Metadata};
use crate::usecase::dispatch::{BulkDispatchRequest, DispatchRequest};
use crate::usecase::error::DispatchError;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct NotifyRequest {
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[validate(length(min = 1))]
    pub channels: Vec<String>,
    /// Category tag; drives quiet-hours bypass and email templates.
    #[serde(default, alias = "category")]
    pub template: String,
    #[validate(length(min = 1, max = 500))]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub data: Metadata,
}

#[derive(Debug, Deserialize, Validate)]
pub struct BulkNotifyRequest {
    #[validate(length(min = 1, max = 1000))]
    pub user_ids: Vec<String>,
    #[serde(default)]
    pub emails: HashMap<String, String>,
    #[validate(length(min = 1))]
    pub channels: Vec<String>,
    #[serde(default, alias = "category")]
    pub template: String,
    #[validate(length(min = 1, max = 500))]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub data: Metadata,
}

#[derive(Serialize)]
pub struct NotifyResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Serialize)]
pub struct BulkNotifyResponse {
    pub success: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Maps channel names to channel types. `all` expands to every channel,
/// unknown names are ignored and duplicates collapse.
pub fn parse_channels(names: &[String]) -> Vec<ChannelType> {
    let mut channels = Vec::new();
    for name in names {
        let name = name.trim().to_ascii_lowercase();
        let parsed: Vec<ChannelType> = if name == "all" {
            ChannelType::ALL.to_vec()
        } else {
            match name.parse::<ChannelType>() {
                Ok(channel) => vec![channel],
                Err(_) => {
                    tracing::debug!(channel = %name, "ignoring unknown channel");
                    continue;
                }
            }
        };
        for channel in parsed {
            if !channels.contains(&channel) {
                channels.push(channel);
            }
        }
    }
    channels
}

fn validated_channels(names: &[String]) -> Result<Vec<ChannelType>, DispatchError> {
    let channels = parse_channels(names);
    if channels.is_empty() {
        return Err(DispatchError::Validation("no valid channels specified".to_string()));
    }
    Ok(channels)
}

#[tracing::instrument(skip(state, payload), fields(user_id = %payload.user_id))]
pub async fn notify(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NotifyRequest>,
) -> Result<impl IntoResponse, DispatchError> {
    if let Err(validation_errors) = payload.validate() {
        tracing::warn!(?validation_errors, "validation failed");
        return Err(DispatchError::Validation(format!("{:?}", validation_errors)));
    }

    let user_id = Uuid::parse_str(payload.user_id.trim())
        .map_err(|_| DispatchError::Validation("invalid user_id format".to_string()))?;
    let channels = validated_channels(&payload.channels)?;

    let request = DispatchRequest {
        user_id,
        email: payload.email,
        channels,
        category: payload.template,
        title: payload.title,
        body: payload.body,
        metadata: payload.data,
    };

    state.dispatch_service.send(&request).await?;

    Ok(Json(NotifyResponse {
        success: true,
        message: "notification sent".to_string(),
    }))
}

#[tracing::instrument(skip(state, payload), fields(users = payload.user_ids.len()))]
pub async fn notify_bulk(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<BulkNotifyRequest>,
) -> Result<impl IntoResponse, DispatchError> {
    if let Err(validation_errors) = payload.validate() {
        tracing::warn!(?validation_errors, "validation failed");
        return Err(DispatchError::Validation(format!("{:?}", validation_errors)));
    }

    let channels = validated_channels(&payload.channels)?;

    let mut errors = Vec::new();
    let mut user_ids = Vec::with_capacity(payload.user_ids.len());
    for raw in &payload.user_ids {
        match Uuid::parse_str(raw.trim()) {
            Ok(id) => user_ids.push(id),
            Err(_) => errors.push(format!("invalid user_id format: {raw}")),
        }
    }

    let emails = payload
        .emails
        .iter()
        .filter_map(|(id, email)| Uuid::parse_str(id.trim()).ok().map(|id| (id, email.clone())))
        .collect();

    let outcome = state
        .dispatch_service
        .send_bulk(&BulkDispatchRequest {
            user_ids,
            emails,
            channels,
            category: payload.template,
            title: payload.title,
            body: payload.body,
            metadata: payload.data,
        })
        .await;

    let failed = outcome.failed + errors.len();
    errors.extend(outcome.errors);

    Ok(Json(BulkNotifyResponse {
        success: outcome.succeeded,
        failed,
        errors,
    }))
}
