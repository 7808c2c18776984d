//! 投递标记
//!
//! 推送成功后在原记录上写入 `sentAt` 与 `messageId`，
//! 中继以 `sentAt` 是否存在判断记录是否已投递。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

/// 标记时间戳
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerTimestamp {
    /// 由存储服务在写入时赋值
    ServerTime,
    At(DateTime<Utc>),
}

/// 投递标记
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryMarker {
    pub sent_at: MarkerTimestamp,
    pub message_id: String,
}

impl DeliveryMarker {
    /// 使用服务端时间戳的标记
    pub fn server_time(message_id: impl Into<String>) -> Self {
        Self {
            sent_at: MarkerTimestamp::ServerTime,
            message_id: message_id.into(),
        }
    }
}

/// 投递标记写入接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarkerStore: Send + Sync {
    /// 将标记写到指定记录上，记录不存在时返回错误
    async fn mark_delivered(&self, record_id: &str, marker: &DeliveryMarker) -> Result<()>;
}
