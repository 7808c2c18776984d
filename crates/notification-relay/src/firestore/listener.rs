//! Firestore 快照监听
//!
//! 周期性拉取文档并与已知状态比较，产出 added / modified / removed 事件。
//! 首次快照中的所有文档都以 added 报告。拉取失败产出一个错误项，
//! 已知状态保持不变，下一轮继续拉取。
//!
//! 两种模式：
//!
//! - **全量**：每次轮询列举整个集合，读次数与集合大小成正比
//! - **游标**：启动和每个重同步周期全量列举一次，其余轮询只查询排序字段
//!   位于游标之后的文档，空结果计 1 次读。删除和缺少排序字段的文档
//!   要等到下一次重同步才能被发现

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::document::Document;
use super::{FirestoreClient, QueryCursor};
use crate::error::Result;
use crate::record::{ChangeEvent, NotificationRecord};
use crate::source::{ChangeSource, ChangeStream, stream_from_receiver};

const CHANNEL_CAPACITY: usize = 256;
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// 快照比对状态，只保存每个文档的最后更新时间
#[derive(Debug, Default)]
pub struct SnapshotState {
    known: HashMap<String, Option<DateTime<Utc>>>,
}

impl SnapshotState {
    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// 用完整快照更新状态并返回变更事件
    ///
    /// 事件顺序：新增（按创建时间）、修改（按快照顺序）、删除（按 ID）。
    /// 删除事件只携带记录 ID。
    pub fn apply(&mut self, documents: Vec<Document>) -> Vec<ChangeEvent> {
        let seen: HashSet<String> = documents.iter().map(|d| d.id().to_string()).collect();
        let mut events = self.merge(documents);

        let mut removed: Vec<String> = self
            .known
            .keys()
            .filter(|id| !seen.contains(*id))
            .cloned()
            .collect();
        removed.sort();

        for id in removed {
            self.known.remove(&id);
            events.push(ChangeEvent::removed(NotificationRecord::new(id, "", "")));
        }
        events
    }

    /// 用部分结果更新状态，不产生删除事件
    pub fn apply_incremental(&mut self, documents: Vec<Document>) -> Vec<ChangeEvent> {
        self.merge(documents)
    }

    fn merge(&mut self, documents: Vec<Document>) -> Vec<ChangeEvent> {
        let mut added = Vec::new();
        let mut modified = Vec::new();

        for doc in documents {
            match self.known.insert(doc.id().to_string(), doc.update_time) {
                None => added.push((doc.create_time, doc.to_record())),
                Some(update_time) if update_time != doc.update_time => {
                    modified.push(doc.to_record());
                }
                Some(_) => {}
            }
        }

        added.sort_by_key(|(create_time, _)| *create_time);

        added
            .into_iter()
            .map(|(_, r)| ChangeEvent::added(r))
            .chain(modified.into_iter().map(ChangeEvent::modified))
            .collect()
    }
}

/// 游标模式参数
#[derive(Debug, Clone)]
struct CursorMode {
    field: String,
    resync_interval: Duration,
}

/// 单个订阅的轮询状态
struct Poller {
    client: Arc<FirestoreClient>,
    page_size: u32,
    mode: Option<CursorMode>,
    state: SnapshotState,
    cursor: Option<QueryCursor>,
    last_full: Option<Instant>,
}

impl Poller {
    async fn poll(&mut self) -> Result<Vec<ChangeEvent>> {
        let Some(mode) = self.mode.as_ref() else {
            let documents = self.client.list_documents(self.page_size).await?;
            return Ok(self.state.apply(documents));
        };

        let resync_due = self
            .last_full
            .is_none_or(|at| at.elapsed() >= mode.resync_interval);

        if resync_due {
            // 先定游标再列举，两者之间写入的文档由下一次增量查询补上
            if self.cursor.is_none() {
                self.cursor = self
                    .client
                    .latest_document(&mode.field)
                    .await?
                    .and_then(|d| QueryCursor::at(&d, &mode.field));
            }

            let documents = self.client.list_documents(self.page_size).await?;
            self.last_full = Some(Instant::now());
            return Ok(self.state.apply(documents));
        }

        let documents = self
            .client
            .documents_after(&mode.field, self.cursor.as_ref(), self.page_size)
            .await?;
        if let Some(next) = documents.last().and_then(|d| QueryCursor::at(d, &mode.field)) {
            self.cursor = Some(next);
        }
        Ok(self.state.apply_incremental(documents))
    }
}

/// 基于轮询的 Firestore 变更源
pub struct FirestoreSnapshotListener {
    client: Arc<FirestoreClient>,
    poll_interval: Duration,
    page_size: u32,
    cursor: Option<CursorMode>,
}

impl FirestoreSnapshotListener {
    /// 全量模式的监听器
    pub fn new(client: Arc<FirestoreClient>, poll_interval: Duration, page_size: u32) -> Self {
        Self {
            client,
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
            page_size: page_size.max(1),
            cursor: None,
        }
    }

    /// 切换到游标模式，`field` 为空时保持全量模式
    ///
    /// `field` 应由写入方在创建文档时设置且单调递增，例如创建时间戳。
    pub fn with_cursor(mut self, field: impl Into<String>, resync_interval: Duration) -> Self {
        let field = field.into();
        self.cursor = (!field.trim().is_empty()).then(|| CursorMode {
            field,
            resync_interval: resync_interval.max(self.poll_interval),
        });
        self
    }
}

#[async_trait]
impl ChangeSource for FirestoreSnapshotListener {
    async fn subscribe(&self) -> Result<ChangeStream> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let poll_interval = self.poll_interval;
        let mut poller = Poller {
            client: self.client.clone(),
            page_size: self.page_size,
            mode: self.cursor.clone(),
            state: SnapshotState::default(),
            cursor: None,
            last_full: None,
        };

        info!(
            collection = %poller.client.collection(),
            poll_interval_ms = poll_interval.as_millis() as u64,
            cursor_field = poller.mode.as_ref().map(|m| m.field.as_str()).unwrap_or(""),
            "Firestore 快照监听已启动"
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            'poll: loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    _ = ticker.tick() => {}
                }

                let items: Vec<Result<ChangeEvent>> = match poller.poll().await {
                    Ok(events) => events.into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(e)],
                };

                for item in items {
                    if tx.send(item).await.is_err() {
                        break 'poll;
                    }
                }
            }

            debug!(known = poller.state.len(), "Firestore 快照监听已停止");
        });

        Ok(stream_from_receiver(rx))
    }
}
