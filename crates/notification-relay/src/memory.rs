//! 内存通知集合
//!
//! 同时实现 `ChangeSource` 与 `MarkerStore`，用于测试和本地开发。
//! 写入投递标记会像真实存储一样产生一次 `Modified` 事件。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{NotificationError, Result};
use crate::marker::{DeliveryMarker, MarkerStore, MarkerTimestamp};
use crate::record::{ChangeEvent, NotificationRecord};
use crate::source::{ChangeSource, ChangeStream, stream_from_unbounded};

type Subscriber = mpsc::UnboundedSender<std::result::Result<ChangeEvent, NotificationError>>;

#[derive(Default)]
struct State {
    /// 按插入顺序保存
    records: Vec<NotificationRecord>,
    subscribers: Vec<Subscriber>,
    marker_writes: usize,
    fail_marker_writes: bool,
}

impl State {
    fn publish(&mut self, event: ChangeEvent) {
        self.subscribers.retain(|tx| tx.send(Ok(event.clone())).is_ok());
    }

    fn publish_error(&mut self, message: &str) {
        self.subscribers
            .retain(|tx| tx.send(Err(NotificationError::Listener(message.to_string()))).is_ok());
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.records.iter().position(|r| r.id == id)
    }
}

/// 内存通知集合
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新增一条通知记录，返回分配的 ID
    pub fn insert(&self, title: &str, body: &str, target: Option<&str>) -> String {
        let id = uuid::Uuid::now_v7().to_string();
        let mut record = NotificationRecord::new(id.clone(), title, body);
        record.target = target.map(str::to_string);
        self.insert_record(record);
        id
    }

    /// 按原样新增记录，同 ID 记录已存在时覆盖并报告为修改
    pub fn insert_record(&self, record: NotificationRecord) {
        let mut state = self.state.lock();
        match state.position(&record.id) {
            Some(index) => {
                state.records[index] = record.clone();
                state.publish(ChangeEvent::modified(record));
            }
            None => {
                state.records.push(record.clone());
                state.publish(ChangeEvent::added(record));
            }
        }
    }

    /// 修改记录，返回是否存在
    pub fn update<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut NotificationRecord),
    {
        let mut state = self.state.lock();
        let Some(index) = state.position(id) else {
            return false;
        };
        f(&mut state.records[index]);
        let record = state.records[index].clone();
        state.publish(ChangeEvent::modified(record));
        true
    }

    /// 删除记录
    pub fn delete(&self, id: &str) -> Option<NotificationRecord> {
        let mut state = self.state.lock();
        let index = state.position(id)?;
        let record = state.records.remove(index);
        state.publish(ChangeEvent::removed(record.clone()));
        Some(record)
    }

    pub fn get(&self, id: &str) -> Option<NotificationRecord> {
        let state = self.state.lock();
        state.records.iter().find(|r| r.id == id).cloned()
    }

    pub fn list(&self) -> Vec<NotificationRecord> {
        self.state.lock().records.clone()
    }

    /// 成功写入的标记次数
    pub fn marker_writes(&self) -> usize {
        self.state.lock().marker_writes
    }

    /// 向所有订阅者推送一个监听错误
    pub fn emit_error(&self, message: &str) {
        self.state.lock().publish_error(message);
    }

    /// 让后续标记写入失败
    pub fn fail_marker_writes(&self, fail: bool) {
        self.state.lock().fail_marker_writes = fail;
    }
}

#[async_trait]
impl ChangeSource for MemoryStore {
    async fn subscribe(&self) -> Result<ChangeStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();

        // 订阅时已有的记录先以 added 报告
        for record in &state.records {
            let _ = tx.send(Ok(ChangeEvent::added(record.clone())));
        }
        state.subscribers.push(tx);

        Ok(stream_from_unbounded(rx))
    }
}

#[async_trait]
impl MarkerStore for MemoryStore {
    async fn mark_delivered(&self, record_id: &str, marker: &DeliveryMarker) -> Result<()> {
        let mut state = self.state.lock();

        if state.fail_marker_writes {
            return Err(NotificationError::MarkerWriteFailed {
                record_id: record_id.to_string(),
                reason: "存储不可用".to_string(),
            });
        }

        let index = state
            .position(record_id)
            .ok_or_else(|| NotificationError::MarkerWriteFailed {
                record_id: record_id.to_string(),
                reason: "记录不存在".to_string(),
            })?;

        let sent_at = match marker.sent_at {
            MarkerTimestamp::ServerTime => Utc::now(),
            MarkerTimestamp::At(at) => at,
        };
        let record = &mut state.records[index];
        record.sent_at = Some(sent_at);
        record.message_id = Some(marker.message_id.clone());
        let record = record.clone();

        state.marker_writes += 1;
        state.publish(ChangeEvent::modified(record));
        Ok(())
    }
}
