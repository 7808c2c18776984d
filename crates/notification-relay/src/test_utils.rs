//! 测试辅助
//!
//! 记录每次推送尝试的网关，以及轮询等待条件成立的工具函数。

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{NotificationError, Result};
use crate::sender::{PushGateway, PushMessage};

/// 记录推送请求的网关
#[derive(Default)]
pub struct RecordingGateway {
    attempts: Mutex<Vec<PushMessage>>,
    fail_with: Mutex<Option<String>>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建一个总是失败的网关
    pub fn failing(reason: &str) -> Self {
        let gateway = Self::default();
        gateway.fail_with(Some(reason));
        gateway
    }

    /// 设置后续推送的失败原因，`None` 恢复成功
    pub fn fail_with(&self, reason: Option<&str>) {
        *self.fail_with.lock() = reason.map(str::to_string);
    }

    /// 所有推送尝试（包括失败的）
    pub fn attempts(&self) -> Vec<PushMessage> {
        self.attempts.lock().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }
}

#[async_trait]
impl PushGateway for RecordingGateway {
    async fn send(&self, message: &PushMessage) -> Result<String> {
        self.attempts.lock().push(message.clone());

        if let Some(reason) = self.fail_with.lock().clone() {
            return Err(NotificationError::SendFailed {
                topic: message.topic.clone(),
                reason,
            });
        }

        Ok(format!("projects/test/messages/{}", uuid::Uuid::new_v4()))
    }
}

/// 轮询直到条件成立或超时，返回条件是否成立
pub async fn wait_for<F>(timeout: Duration, mut predicate: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
