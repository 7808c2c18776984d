//! 通知记录与变更事件
//!
//! 集合中的每个文档对应一条 `NotificationRecord`。
//! `sent_at` 存在即表示已投递，中继不会再次发送。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 通知记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    /// 存储分配的文档 ID
    pub id: String,
    pub title: String,
    pub body: String,
    /// 自由文本的投递目标，为空时使用默认主题
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
    /// 推送服务返回的消息标识
    #[serde(default)]
    pub message_id: Option<String>,
}

impl NotificationRecord {
    pub fn new(id: impl Into<String>, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            body: body.into(),
            target: None,
            sent_at: None,
            message_id: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_marker(mut self, sent_at: DateTime<Utc>, message_id: impl Into<String>) -> Self {
        self.sent_at = Some(sent_at);
        self.message_id = Some(message_id.into());
        self
    }

    /// 是否已投递
    pub fn is_delivered(&self) -> bool {
        self.sent_at.is_some()
    }
}

/// 变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Removed => "removed",
        }
    }
}

/// 集合变更事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub record: NotificationRecord,
}

impl ChangeEvent {
    pub fn added(record: NotificationRecord) -> Self {
        Self {
            kind: ChangeKind::Added,
            record,
        }
    }

    pub fn modified(record: NotificationRecord) -> Self {
        Self {
            kind: ChangeKind::Modified,
            record,
        }
    }

    pub fn removed(record: NotificationRecord) -> Self {
        Self {
            kind: ChangeKind::Removed,
            record,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_delivered() {
        let record = NotificationRecord::new("doc-1", "Hi", "Test");
        assert!(!record.is_delivered());

        let record = record.with_marker(Utc::now(), "projects/p/messages/1");
        assert!(record.is_delivered());
        assert_eq!(record.message_id.as_deref(), Some("projects/p/messages/1"));
    }

    #[test]
    fn test_record_json_field_names() {
        let record = NotificationRecord::new("doc-1", "Hi", "Test").with_target("All Staff");
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["target"], "All Staff");
        assert!(json.get("sentAt").is_some());
        assert!(json.get("messageId").is_some());
    }

    #[test]
    fn test_change_kind_labels() {
        assert_eq!(ChangeKind::Added.as_str(), "added");
        assert_eq!(ChangeKind::Modified.as_str(), "modified");
        assert_eq!(ChangeKind::Removed.as_str(), "removed");
    }
}
