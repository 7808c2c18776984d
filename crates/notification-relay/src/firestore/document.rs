//! Firestore 文档解码
//!
//! REST 接口以带类型标签的值表示字段（`{"stringValue": "..."}`），
//! 这里只解析通知记录用到的几种类型。

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::record::NotificationRecord;

/// Firestore 文档
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// 完整资源名：projects/{p}/databases/{d}/documents/{collection}/{id}
    pub name: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub update_time: Option<DateTime<Utc>>,
}

/// documents.list 的分页响应
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDocumentsResponse {
    #[serde(default)]
    pub documents: Vec<Document>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// documents:runQuery 响应数组中的一项
///
/// 没有匹配结果时服务端只返回带 `readTime` 的项，`document` 缺失。
#[derive(Debug, Default, Deserialize)]
pub struct RunQueryResponseItem {
    #[serde(default)]
    pub document: Option<Document>,
}

impl Document {
    /// 文档 ID（资源名的最后一段）
    pub fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    fn string_field(&self, key: &str) -> Option<String> {
        self.fields
            .get(key)
            .and_then(|v| v.get("stringValue"))
            .and_then(Value::as_str)
            .map(String::from)
    }

    /// 解析 `sentAt`
    ///
    /// 空值、`false`、空字符串、`0` 与 `NaN` 视为未投递；其余无法解析为时间的值
    /// 仍视为已投递，时间取文档的最后更新时间。
    fn sent_at(&self) -> Option<DateTime<Utc>> {
        let value = self.fields.get("sentAt")?;
        if is_falsy(value) {
            return None;
        }

        let parsed = value
            .get("timestampValue")
            .or_else(|| value.get("stringValue"))
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc));

        parsed
            .or(self.update_time)
            .or(self.create_time)
            .or(Some(DateTime::<Utc>::UNIX_EPOCH))
    }

    /// 转换为通知记录
    pub fn to_record(&self) -> NotificationRecord {
        NotificationRecord {
            id: self.id().to_string(),
            title: self.string_field("title").unwrap_or_default(),
            body: self.string_field("body").unwrap_or_default(),
            target: self.string_field("target"),
            sent_at: self.sent_at(),
            message_id: self.string_field("messageId"),
        }
    }
}

/// 带类型标签的值是否为假值
fn is_falsy(value: &Value) -> bool {
    if value.get("nullValue").is_some() {
        return true;
    }
    if let Some(b) = value.get("booleanValue") {
        return b == &Value::Bool(false);
    }
    if let Some(s) = value.get("stringValue") {
        return s.as_str() == Some("");
    }
    // integerValue 以字符串编码 int64
    if let Some(i) = value.get("integerValue") {
        let parsed = match i {
            Value::String(s) => s.parse::<i64>().ok(),
            other => other.as_i64(),
        };
        return parsed == Some(0);
    }
    // NaN 与无穷以字符串编码
    if let Some(d) = value.get("doubleValue") {
        return match d {
            Value::String(s) => s == "NaN",
            other => other.as_f64() == Some(0.0),
        };
    }
    false
}
