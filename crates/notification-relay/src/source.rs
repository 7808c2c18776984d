//! 变更源
//!
//! 订阅一个集合的变更流。流中的错误项表示监听层故障，
//! 消费方记录后继续读取，重连由具体实现自行处理。

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::mpsc;

use crate::error::{NotificationError, Result};
use crate::record::ChangeEvent;

/// 变更流
pub type ChangeStream = BoxStream<'static, std::result::Result<ChangeEvent, NotificationError>>;

#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// 开始订阅
    ///
    /// 与快照监听语义一致：订阅时已存在的记录先以 `Added` 事件报告一次。
    async fn subscribe(&self) -> Result<ChangeStream>;
}

type Item = std::result::Result<ChangeEvent, NotificationError>;

/// 将 tokio mpsc 接收端包装为变更流
pub(crate) fn stream_from_receiver(rx: mpsc::Receiver<Item>) -> ChangeStream {
    Box::pin(futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    }))
}

/// 无界接收端版本
pub(crate) fn stream_from_unbounded(rx: mpsc::UnboundedReceiver<Item>) -> ChangeStream {
    Box::pin(futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    }))
}
