use std::time::Duration;

use serde::Serialize;

use crate::usecase::contracts::EmailSender;
use crate::usecase::error::ProviderError;

#[derive(Debug, Serialize)]
struct Address<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct Personalization<'a> {
    to: [Address<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    content_type: &'a str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct MailSendRequest<'a> {
    personalizations: [Personalization<'a>; 1],
    from: Address<'a>,
    subject: &'a str,
    content: Vec<Content<'a>>,
}

/// SendGrid v3 mail-send client.
pub struct SendGridClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    from_email: String,
    from_name: String,
}

impl SendGridClient {
    pub fn new(
        base_url: String,
        api_key: String,
        from_email: String,
        from_name: String,
    ) -> Result<Self, ProviderError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;

        tracing::info!(%base_url, %from_email, "SendGrid client created");

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            from_email,
            from_name,
        })
    }

    async fn deliver(&self, to: &str, subject: &str, plain: &str, html: Option<&str>) -> Result<(), ProviderError> {
        let mut content = vec![Content { content_type: "text/plain", value: plain }];
        if let Some(html) = html {
            content.push(Content { content_type: "text/html", value: html });
        }

        let request = MailSendRequest {
            personalizations: [Personalization { to: [Address { email: to, name: None }] }],
            from: Address {
                email: &self.from_email,
                name: Some(self.from_name.as_str()).filter(|n| !n.is_empty()),
            },
            subject,
            content,
        };

        let url = format!("{}/v3/mail/send", self.base_url);
        tracing::debug!(%url, "sending email via SendGrid");

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "failed to send request to SendGrid");
                ProviderError::Request(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(%status, %body, "SendGrid returned error");
            return Err(ProviderError::Status { status: status.as_u16(), body });
        }

        tracing::debug!(%status, "email accepted by SendGrid");
        Ok(())
    }
}

impl EmailSender for SendGridClient {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), ProviderError> {
        self.deliver(to, subject, body, None).await
    }

    async fn send_html(
        &self,
        to: &str,
        subject: &str,
        plain_body: &str,
        html_body: &str,
    ) -> Result<(), ProviderError> {
        self.deliver(to, subject, plain_body, Some(html_body)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> SendGridClient {
        SendGridClient::new(
            server.uri(),
            "sg-key".to_string(),
            "noreply@example.com".to_string(),
            "Notifier".to_string(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_send_posts_plain_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/mail/send"))
            .and(header("authorization", "Bearer sg-key"))
            .and(body_partial_json(serde_json::json!({
                "personalizations": [{"to": [{"email": "user@example.com"}]}],
                "from": {"email": "noreply@example.com", "name": "Notifier"},
                "subject": "Hi",
                "content": [{"type": "text/plain", "value": "Hello"}]
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).send("user@example.com", "Hi", "Hello").await.unwrap();
    }

    #[tokio::test]
    async fn test_send_html_includes_both_parts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/mail/send"))
            .and(body_partial_json(serde_json::json!({
                "content": [
                    {"type": "text/plain", "value": "plain"},
                    {"type": "text/html", "value": "<b>rich</b>"}
                ]
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .send_html("user@example.com", "Hi", "plain", "<b>rich</b>")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let err = client(&server).send("user@example.com", "Hi", "Hello").await.unwrap_err();
        match err {
            ProviderError::Status { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, "bad key");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
