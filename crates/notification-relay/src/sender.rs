//! 推送发送器
//!
//! 通过 `PushGateway` trait 抽象一次主题推送，成功时返回推送服务分配的消息标识。
//! `FcmGateway` 基于 FCM HTTP v1 接口实现，失败一律映射为 `SendFailed`，不做重试。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::AccessTokenProvider;
use crate::error::{NotificationError, Result, describe_google_error};

/// 推送通知内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushNotification {
    pub title: String,
    pub body: String,
}

/// 主题推送消息：`{ notification: { title, body }, topic }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    pub notification: PushNotification,
    pub topic: String,
}

impl PushMessage {
    pub fn new(
        title: impl Into<String>,
        body: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            notification: PushNotification {
                title: title.into(),
                body: body.into(),
            },
            topic: topic.into(),
        }
    }
}

/// 推送网关
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushGateway: Send + Sync {
    /// 发送一次主题推送，返回消息标识
    async fn send(&self, message: &PushMessage) -> Result<String>;
}

// ---------------------------------------------------------------------------
// FCM HTTP v1
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct SendRequest<'a> {
    message: &'a PushMessage,
}

#[derive(Deserialize)]
struct SendResponse {
    name: String,
}

/// FCM 推送网关
pub struct FcmGateway {
    http: reqwest::Client,
    endpoint: String,
    tokens: Arc<dyn AccessTokenProvider>,
}

impl FcmGateway {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        project_id: &str,
        tokens: Arc<dyn AccessTokenProvider>,
    ) -> Self {
        let endpoint = format!(
            "{}/v1/projects/{}/messages:send",
            base_url.trim_end_matches('/'),
            project_id
        );
        Self {
            http,
            endpoint,
            tokens,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn send_failed(message: &PushMessage, reason: impl Into<String>) -> NotificationError {
        NotificationError::SendFailed {
            topic: message.topic.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl PushGateway for FcmGateway {
    async fn send(&self, message: &PushMessage) -> Result<String> {
        let token = self
            .tokens
            .access_token()
            .await
            .map_err(|e| Self::send_failed(message, e.to_string()))?;

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&SendRequest { message })
            .send()
            .await
            .map_err(|e| Self::send_failed(message, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::send_failed(
                message,
                describe_google_error(status, &body),
            ));
        }

        let sent: SendResponse = response
            .json()
            .await
            .map_err(|e| Self::send_failed(message, format!("响应解析失败: {e}")))?;

        debug!(topic = %message.topic, message_id = %sent.name, "FCM 推送已受理");
        Ok(sent.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenProvider;

    #[test]
    fn test_push_message_wire_format() {
        let message = PushMessage::new("Hi", "Test", "all_staff");
        let json = serde_json::to_value(SendRequest { message: &message }).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "message": {
                    "notification": { "title": "Hi", "body": "Test" },
                    "topic": "all_staff"
                }
            })
        );
    }

    #[test]
    fn test_endpoint_format() {
        let gateway = FcmGateway::new(
            reqwest::Client::new(),
            "https://fcm.googleapis.com/",
            "mep-demo",
            Arc::new(StaticTokenProvider::new("t")),
        );
        assert_eq!(
            gateway.endpoint(),
            "https://fcm.googleapis.com/v1/projects/mep-demo/messages:send"
        );
    }

    #[tokio::test]
    async fn test_mock_gateway() {
        let mut gateway = MockPushGateway::new();
        gateway
            .expect_send()
            .withf(|m| m.topic == "team_leads")
            .times(1)
            .returning(|_| Ok("projects/p/messages/1".to_string()));

        let id = gateway
            .send(&PushMessage::new("a", "b", "team_leads"))
            .await
            .unwrap();
        assert_eq!(id, "projects/p/messages/1");
    }
}
