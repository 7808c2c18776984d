//! 通知中继错误类型
//!
//! 认证错误在启动期致命；推送、标记写入与监听错误只记录日志，不中断消费循环。
//! 凭证错误见 `credentials::CredentialError`。

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("推送发送失败: topic={topic}, 原因={reason}")]
    SendFailed { topic: String, reason: String },

    #[error("投递标记写入失败: record_id={record_id}, 原因={reason}")]
    MarkerWriteFailed { record_id: String, reason: String },

    #[error("变更监听错误: {0}")]
    Listener(String),

    #[error("Google 认证失败: {0}")]
    Auth(String),

    #[error("文档解析失败: {0}")]
    InvalidDocument(String),
}

pub type Result<T> = std::result::Result<T, NotificationError>;

#[derive(Deserialize)]
struct GoogleErrorBody {
    error: GoogleErrorDetail,
}

#[derive(Deserialize)]
struct GoogleErrorDetail {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
}

/// 将 Google API 的错误响应整理为一行原因描述
pub fn describe_google_error(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<GoogleErrorBody>(body) {
        Ok(parsed) => format!(
            "{} {}: {}",
            status.as_u16(),
            parsed.error.status,
            parsed.error.message
        ),
        Err(_) if body.trim().is_empty() => status.to_string(),
        Err(_) => format!("{}: {}", status.as_u16(), body.trim()),
    }
}
