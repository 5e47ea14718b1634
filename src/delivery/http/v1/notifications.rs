use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::delivery::http::v1::middleware::AuthenticatedUser;
use crate::domain::notification::Notification;
use crate::usecase::error::UsecaseError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct NotificationListParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    #[serde(default)]
    pub unread: bool,
}

#[derive(Serialize)]
pub struct NotificationsListResponse {
    pub notifications: Vec<Notification>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub total_pages: i64,
}

#[derive(Serialize)]
pub struct UnreadCountResponse {
    pub unread_count: i64,
}

#[derive(Serialize)]
pub struct MarkAllReadResponse {
    pub message: String,
    pub updated: u64,
}

#[tracing::instrument(skip(state), fields(user_id = %user.user_id))]
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(params): Query<NotificationListParams>,
) -> Result<impl IntoResponse, UsecaseError> {
    let page = state
        .notifications_usecase
        .list_notifications(
            user.user_id,
            params.page.unwrap_or(1),
            params.limit.unwrap_or(20),
            params.unread,
        )
        .await?;

    let total_pages = page.total_pages();
    Ok(Json(NotificationsListResponse {
        notifications: page.items,
        total: page.total,
        page: page.page,
        limit: page.limit,
        total_pages,
    }))
}

#[tracing::instrument(skip(state), fields(user_id = %user.user_id, %id))]
pub async fn get_notification(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, UsecaseError> {
    let notification = state.notifications_usecase.get_notification(id, user.user_id).await?;
    Ok(Json(notification))
}

#[tracing::instrument(skip(state), fields(user_id = %user.user_id))]
pub async fn unread_count(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, UsecaseError> {
    let unread_count = state.notifications_usecase.count_unread(user.user_id).await?;
    Ok(Json(UnreadCountResponse { unread_count }))
}

#[tracing::instrument(skip(state), fields(user_id = %user.user_id, %id))]
pub async fn mark_as_read(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, UsecaseError> {
    let notification = state.notifications_usecase.mark_as_read(id, user.user_id).await?;
    Ok(Json(notification))
}

#[tracing::instrument(skip(state), fields(user_id = %user.user_id))]
pub async fn mark_all_as_read(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, UsecaseError> {
    let updated = state.notifications_usecase.mark_all_as_read(user.user_id).await?;
    Ok(Json(MarkAllReadResponse {
        message: "all notifications marked as read".to_string(),
        updated,
    }))
}
