use std::fmt;

use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;

use crate::domain::notification::ChannelType;
use crate::repository::errors::RepositoryError;

#[derive(Debug, Error)]
pub enum UsecaseError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Internal(String),
}

impl From<RepositoryError> for UsecaseError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound => UsecaseError::NotFound("Resource".to_string()),
            RepositoryError::DatabaseError(msg) => UsecaseError::Internal(msg),
        }
    }
}

impl IntoResponse for UsecaseError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            UsecaseError::NotFound(_) => StatusCode::NOT_FOUND,
            UsecaseError::Validation(_) => StatusCode::BAD_REQUEST,
            UsecaseError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        match &self {
            UsecaseError::Internal(_) => {
                tracing::error!(error = %self, "internal error");
            }
            UsecaseError::NotFound(_) => {
                tracing::warn!(error = %self, "resource not found");
            }
            _ => {
                tracing::debug!(error = %self);
            }
        }

        (status, self.to_string()).into_response()
    }
}

/// Failure reported by an outbound delivery provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The request was unusable for this channel, e.g. email without an address.
    Validation,
    /// The provider rejected or failed the delivery.
    Provider,
    /// The record store failed while preparing the delivery.
    Infrastructure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelFailure {
    pub channel: ChannelType,
    pub kind: FailureKind,
    pub message: String,
}

impl ChannelFailure {
    pub fn validation(channel: ChannelType, message: impl Into<String>) -> Self {
        Self { channel, kind: FailureKind::Validation, message: message.into() }
    }

    pub fn provider(channel: ChannelType, message: impl Into<String>) -> Self {
        Self { channel, kind: FailureKind::Provider, message: message.into() }
    }

    pub fn infrastructure(channel: ChannelType, message: impl Into<String>) -> Self {
        Self { channel, kind: FailureKind::Infrastructure, message: message.into() }
    }
}

impl fmt::Display for ChannelFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.channel, self.message)
    }
}

/// The channels that failed within one dispatch, in attempt order. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ChannelFailures(pub Vec<ChannelFailure>);

impl ChannelFailures {
    pub fn channels(&self) -> Vec<ChannelType> {
        self.0.iter().map(|f| f.channel).collect()
    }
}

impl fmt::Display for ChannelFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("notification errors: ")?;
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{0}")]
    Validation(String),

    /// The preference store could not be read; nothing was attempted.
    #[error("preferences unavailable: {0}")]
    Infrastructure(#[from] RepositoryError),

    /// At least one channel failed. Channels not listed were delivered, skipped or gated.
    #[error("{0}")]
    Channels(ChannelFailures),
}

#[derive(Serialize)]
struct PartialFailureBody<'a> {
    success: bool,
    error: String,
    failures: &'a ChannelFailures,
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> axum::response::Response {
        match &self {
            DispatchError::Validation(_) => {
                tracing::debug!(error = %self);
                (StatusCode::BAD_REQUEST, self.to_string()).into_response()
            }
            DispatchError::Infrastructure(_) => {
                tracing::error!(error = %self, "dispatch aborted");
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
            }
            DispatchError::Channels(failures) => {
                tracing::warn!(failed_channels = ?failures.channels(), "partial delivery failure");
                let body = PartialFailureBody {
                    success: false,
                    error: self.to_string(),
                    failures,
                };
                (StatusCode::MULTI_STATUS, Json(body)).into_response()
            }
        }
    }
}
