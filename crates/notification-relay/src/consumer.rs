//! 通知消费者
//!
//! 订阅通知集合的变更流，对每条新增记录启动独立任务：
//! 规范化主题、推送、写回投递标记。单条记录失败只记录日志，不影响其他记录。

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use relay_shared::observability::metrics;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::marker::{DeliveryMarker, MarkerStore};
use crate::record::{ChangeEvent, ChangeKind, NotificationRecord};
use crate::sender::{PushGateway, PushMessage};
use crate::source::ChangeSource;
use crate::topic::normalize_topic;

/// 单条记录的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// 记录已带 `sentAt`，未做任何调用
    AlreadyDelivered,
    Delivered { topic: String, message_id: String },
    SendFailed { topic: String },
    /// 推送已成功，但标记未写入
    MarkerWriteFailed { topic: String, message_id: String },
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AlreadyDelivered => "skipped",
            Self::Delivered { .. } => "delivered",
            Self::SendFailed { .. } => "send_failed",
            Self::MarkerWriteFailed { .. } => "marker_failed",
        }
    }
}

/// 通知消费者
///
/// 变更源、推送网关和标记存储都以 trait 对象注入。
pub struct NotificationConsumer {
    source: Arc<dyn ChangeSource>,
    gateway: Arc<dyn PushGateway>,
    markers: Arc<dyn MarkerStore>,
    default_topic: Arc<str>,
}

impl NotificationConsumer {
    pub fn new(
        source: Arc<dyn ChangeSource>,
        gateway: Arc<dyn PushGateway>,
        markers: Arc<dyn MarkerStore>,
        default_topic: &str,
    ) -> Self {
        Self {
            source,
            gateway,
            markers,
            default_topic: Arc::from(default_topic),
        }
    }

    /// 启动消费循环，直到收到 shutdown 信号
    ///
    /// 停止读取事件后等待所有进行中的投递任务结束。
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut stream = self.source.subscribe().await?;
        let mut in_flight: JoinSet<DeliveryOutcome> = JoinSet::new();

        info!(default_topic = %self.default_topic, "通知消费者已启动");

        if !*shutdown.borrow() {
            loop {
                tokio::select! {
                    biased;

                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("收到关闭信号，停止读取变更事件");
                            break;
                        }
                    }
                    Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                        log_join_result(joined);
                    }
                    item = stream.next() => match item {
                        Some(Ok(event)) => self.dispatch(event, &mut in_flight),
                        Some(Err(e)) => {
                            metrics::record_listener_error();
                            error!(error = %e, "变更监听出错，继续等待后续事件");
                        }
                        None => {
                            warn!("变更流已结束");
                            break;
                        }
                    },
                }
            }
        }

        if !in_flight.is_empty() {
            info!(pending = in_flight.len(), "等待进行中的投递任务完成");
        }
        while let Some(joined) = in_flight.join_next().await {
            log_join_result(joined);
        }

        info!("通知消费者已停止");
        Ok(())
    }

    fn dispatch(&self, event: ChangeEvent, in_flight: &mut JoinSet<DeliveryOutcome>) {
        metrics::record_change_event(event.kind.as_str());

        if event.kind != ChangeKind::Added {
            debug!(
                record_id = %event.record.id,
                kind = event.kind.as_str(),
                "忽略非新增事件"
            );
            return;
        }

        let gateway = self.gateway.clone();
        let markers = self.markers.clone();
        let default_topic = self.default_topic.clone();
        let record = event.record;

        in_flight.spawn(async move {
            process_record(gateway.as_ref(), markers.as_ref(), &record, &default_topic).await
        });
    }
}

fn log_join_result(joined: std::result::Result<DeliveryOutcome, tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "投递任务异常退出");
    }
}

/// 处理一条新增记录
///
/// 拆分为独立函数，便于在测试中直接调用而无需构造完整的 Consumer。
pub async fn process_record(
    gateway: &dyn PushGateway,
    markers: &dyn MarkerStore,
    record: &NotificationRecord,
    default_topic: &str,
) -> DeliveryOutcome {
    if record.is_delivered() {
        debug!(record_id = %record.id, "记录已投递，跳过");
        metrics::record_delivery(DeliveryOutcome::AlreadyDelivered.as_str());
        return DeliveryOutcome::AlreadyDelivered;
    }

    let topic = normalize_topic(record.target.as_deref(), default_topic);
    let message = PushMessage::new(&record.title, &record.body, &topic);

    let started = Instant::now();
    let result = gateway.send(&message).await;
    metrics::record_send_duration(result.is_ok(), started.elapsed().as_secs_f64());

    let message_id = match result {
        Ok(message_id) => message_id,
        Err(e) => {
            error!(record_id = %record.id, topic = %topic, error = %e, "推送发送失败");
            let outcome = DeliveryOutcome::SendFailed { topic };
            metrics::record_delivery(outcome.as_str());
            return outcome;
        }
    };

    info!(record_id = %record.id, topic = %topic, message_id = %message_id, "推送已发送");

    let outcome = match markers
        .mark_delivered(&record.id, &DeliveryMarker::server_time(&message_id))
        .await
    {
        Ok(()) => {
            metrics::record_marker_write("success");
            DeliveryOutcome::Delivered { topic, message_id }
        }
        Err(e) => {
            metrics::record_marker_write("failure");
            error!(
                record_id = %record.id,
                message_id = %message_id,
                error = %e,
                "投递标记写入失败"
            );
            DeliveryOutcome::MarkerWriteFailed { topic, message_id }
        }
    };

    metrics::record_delivery(outcome.as_str());
    outcome
}
