use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::domain::notification::Metadata;
use crate::usecase::contracts::{DeviceTokenRepository, PushMessage, PushReport, PushSender};
use crate::usecase::error::ProviderError;

#[derive(Debug, Deserialize, Default)]
struct FcmErrorResponse {
    #[serde(default)]
    error: FcmErrorBody,
}

#[derive(Debug, Deserialize, Default)]
struct FcmErrorBody {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    details: Vec<FcmErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct FcmErrorDetail {
    #[serde(rename = "errorCode", default)]
    error_code: Option<String>,
}

enum TokenOutcome {
    Accepted,
    Invalid,
    Failed,
}

/// FCM HTTP v1 client. Resolves a user's active devices and sends one
/// request per token.
pub struct FcmClient<D: DeviceTokenRepository> {
    http_client: reqwest::Client,
    base_url: String,
    project_id: String,
    access_token: String,
    device_token_repository: D,
}

impl<D: DeviceTokenRepository> FcmClient<D> {
    pub fn new(
        base_url: String,
        project_id: String,
        access_token: String,
        device_token_repository: D,
    ) -> Result<Self, ProviderError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        tracing::info!(%base_url, %project_id, "FCM client created");

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            project_id,
            access_token,
            device_token_repository,
        })
    }

    fn payload(token: &str, message: &PushMessage) -> serde_json::Value {
        json!({
            "message": {
                "token": token,
                "notification": {
                    "title": message.title,
                    "body": message.body,
                },
                "data": string_data(&message.data),
                "android": {
                    "priority": "high",
                    "notification": { "sound": "default" }
                },
                "apns": {
                    "payload": { "aps": { "sound": "default" } }
                }
            }
        })
    }

    async fn send_to_token(&self, token: &str, message: &PushMessage) -> TokenOutcome {
        let url = format!("{}/v1/projects/{}/messages:send", self.base_url, self.project_id);

        let response = match self
            .http_client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&Self::payload(token, message))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "failed to send request to FCM");
                return TokenOutcome::Failed;
            }
        };

        let status = response.status();
        if status.is_success() {
            return TokenOutcome::Accepted;
        }

        let body = response.text().await.unwrap_or_default();
        if is_invalid_token_response(status.as_u16(), &body) {
            tracing::debug!(%status, "FCM rejected device token");
            TokenOutcome::Invalid
        } else {
            tracing::warn!(%status, %body, "FCM returned error");
            TokenOutcome::Failed
        }
    }
}

/// FCM data values must be strings.
fn string_data(data: &Metadata) -> serde_json::Map<String, serde_json::Value> {
    data.iter()
        .map(|(k, v)| {
            let value = match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), serde_json::Value::String(value))
        })
        .collect()
}

fn is_invalid_token_response(status: u16, body: &str) -> bool {
    if status == 404 {
        return true;
    }

    let parsed: FcmErrorResponse = serde_json::from_str(body).unwrap_or_default();
    let code_matches = parsed
        .error
        .details
        .iter()
        .filter_map(|d| d.error_code.as_deref())
        .any(|code| matches!(code, "UNREGISTERED" | "INVALID_ARGUMENT"));

    code_matches || parsed.error.status.as_deref() == Some("INVALID_ARGUMENT")
}

impl<D: DeviceTokenRepository> PushSender for FcmClient<D> {
    #[tracing::instrument(skip(self, message), fields(user_id = %user_id))]
    async fn send_to_user(&self, user_id: Uuid, message: &PushMessage) -> Result<PushReport, ProviderError> {
        let devices = self
            .device_token_repository
            .find_active_by_user(user_id)
            .await
            .map_err(|e| ProviderError::Other(format!("failed to load device tokens: {e}")))?;

        let mut report = PushReport { attempted: devices.len(), ..Default::default() };
        if devices.is_empty() {
            tracing::debug!("no active devices");
            return Ok(report);
        }

        for device in &devices {
            match self.send_to_token(&device.token, message).await {
                TokenOutcome::Accepted => report.accepted += 1,
                TokenOutcome::Invalid => report.invalid_tokens.push(device.token.clone()),
                TokenOutcome::Failed => {}
            }
        }

        tracing::debug!(attempted = report.attempted, accepted = report.accepted, "push fan-out finished");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::device_token::{DeviceToken, Platform};
    use crate::repository::errors::RepositoryError;
    use crate::usecase::contracts::MockDeviceTokenRepository;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn message() -> PushMessage {
        let mut data = Metadata::new();
        data.insert("route_id".to_string(), json!(42));
        PushMessage { title: "Title".to_string(), body: "Body".to_string(), data }
    }

    fn repo_with(tokens: &[&str]) -> MockDeviceTokenRepository {
        let tokens: Vec<String> = tokens.iter().map(|t| t.to_string()).collect();
        let mut repo = MockDeviceTokenRepository::new();
        repo.expect_find_active_by_user().returning(move |user_id| {
            Ok(tokens
                .iter()
                .map(|t| DeviceToken::new(user_id, t.clone(), Platform::Android))
                .collect())
        });
        repo
    }

    fn client(server: &MockServer, repo: MockDeviceTokenRepository) -> FcmClient<MockDeviceTokenRepository> {
        FcmClient::new(server.uri(), "demo-project".to_string(), "access".to_string(), repo).unwrap()
    }

    #[tokio::test]
    async fn test_no_devices_is_empty_report() {
        let server = MockServer::start().await;
        let report = client(&server, repo_with(&[]))
            .send_to_user(Uuid::new_v4(), &message())
            .await
            .unwrap();

        assert_eq!(report, PushReport::default());
    }

    #[tokio::test]
    async fn test_sends_stringified_data_per_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/projects/demo-project/messages:send"))
            .and(header("authorization", "Bearer access"))
            .and(body_partial_json(json!({
                "message": {
                    "notification": {"title": "Title", "body": "Body"},
                    "data": {"route_id": "42"}
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "projects/demo-project/messages/1"})))
            .expect(2)
            .mount(&server)
            .await;

        let report = client(&server, repo_with(&["a", "b"]))
            .send_to_user(Uuid::new_v4(), &message())
            .await
            .unwrap();

        assert_eq!(report.attempted, 2);
        assert_eq!(report.accepted, 2);
        assert!(report.invalid_tokens.is_empty());
    }

    #[tokio::test]
    async fn test_unregistered_token_reported_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"message": {"token": "stale"}})))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {
                    "code": 404,
                    "status": "NOT_FOUND",
                    "details": [{"errorCode": "UNREGISTERED"}]
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"message": {"token": "fresh"}})))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let report = client(&server, repo_with(&["stale", "fresh"]))
            .send_to_user(Uuid::new_v4(), &message())
            .await
            .unwrap();

        assert_eq!(report.accepted, 1);
        assert_eq!(report.invalid_tokens, vec!["stale".to_string()]);
    }

    #[tokio::test]
    async fn test_server_error_is_not_invalid_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let report = client(&server, repo_with(&["a"]))
            .send_to_user(Uuid::new_v4(), &message())
            .await
            .unwrap();

        assert_eq!(report.attempted, 1);
        assert_eq!(report.accepted, 0);
        assert!(report.invalid_tokens.is_empty());
    }

    #[tokio::test]
    async fn test_token_lookup_failure_is_error() {
        let server = MockServer::start().await;
        let mut repo = MockDeviceTokenRepository::new();
        repo.expect_find_active_by_user()
            .returning(|_| Err(RepositoryError::DatabaseError("down".to_string())));

        let result = client(&server, repo).send_to_user(Uuid::new_v4(), &message()).await;
        assert!(matches!(result, Err(ProviderError::Other(_))));
    }

    #[test]
    fn test_invalid_argument_classification() {
        let body = r#"{"error":{"code":400,"status":"INVALID_ARGUMENT","details":[]}}"#;
        assert!(is_invalid_token_response(400, body));
        assert!(!is_invalid_token_response(400, r#"{"error":{"status":"FAILED_PRECONDITION"}}"#));
        assert!(!is_invalid_token_response(500, "not json"));
    }
}
