//! Firestore REST 客户端
//!
//! 提供通知集合的分页列举与游标查询（供快照监听使用）以及投递标记写入。
//! 标记写入通过 `documents:commit` 完成：更新 `messageId`，
//! 以 `REQUEST_TIME` 转换写入服务端时间戳，并要求文档仍然存在。
//!
//! 计费：列举与查询按返回文档数计读次数，结果为空的查询计 1 次。

pub mod document;
pub mod listener;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::SecondsFormat;
use serde_json::{Value, json};
use tracing::debug;

use crate::auth::AccessTokenProvider;
use crate::error::{NotificationError, Result, describe_google_error};
use crate::marker::{DeliveryMarker, MarkerStore, MarkerTimestamp};

pub use document::{Document, ListDocumentsResponse, RunQueryResponseItem};
pub use listener::FirestoreSnapshotListener;

const DEFAULT_DATABASE: &str = "(default)";

/// 游标位置：排序字段的值加文档资源名，后者保证排序唯一
#[derive(Debug, Clone, PartialEq)]
pub struct QueryCursor {
    pub value: Value,
    pub name: String,
}

impl QueryCursor {
    /// 以文档为游标，文档缺少顶层字段 `field` 时返回 None
    pub fn at(document: &Document, field: &str) -> Option<Self> {
        document.fields.get(field).map(|value| Self {
            value: value.clone(),
            name: document.name.clone(),
        })
    }
}

/// Firestore 客户端，绑定单个集合
pub struct FirestoreClient {
    http: reqwest::Client,
    base_url: String,
    project_id: String,
    collection: String,
    tokens: Arc<dyn AccessTokenProvider>,
}

impl FirestoreClient {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        project_id: impl Into<String>,
        collection: impl Into<String>,
        tokens: Arc<dyn AccessTokenProvider>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            project_id: project_id.into(),
            collection: collection.into(),
            tokens,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn database_path(&self) -> String {
        format!(
            "projects/{}/databases/{}",
            self.project_id, DEFAULT_DATABASE
        )
    }

    /// 文档完整资源名
    pub fn document_name(&self, record_id: &str) -> String {
        format!(
            "{}/documents/{}/{}",
            self.database_path(),
            self.collection,
            record_id
        )
    }

    fn collection_url(&self) -> String {
        format!(
            "{}/v1/{}/documents/{}",
            self.base_url,
            self.database_path(),
            self.collection
        )
    }

    fn commit_url(&self) -> String {
        format!("{}/v1/{}/documents:commit", self.base_url, self.database_path())
    }

    fn run_query_url(&self) -> String {
        format!("{}/v1/{}/documents:runQuery", self.base_url, self.database_path())
    }

    /// 拉取一页文档
    pub async fn list_page(
        &self,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<ListDocumentsResponse> {
        let token = self.tokens.access_token().await?;

        let mut request = self
            .http
            .get(self.collection_url())
            .bearer_auth(token)
            .query(&[("pageSize", page_size.to_string())]);
        if let Some(page_token) = page_token {
            request = request.query(&[("pageToken", page_token)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NotificationError::Listener(format!("列举文档失败: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::Listener(describe_google_error(
                status, &body,
            )));
        }

        response
            .json()
            .await
            .map_err(|e| NotificationError::InvalidDocument(format!("列举响应解析失败: {e}")))
    }

    /// 拉取集合内全部文档
    pub async fn list_documents(&self, page_size: u32) -> Result<Vec<Document>> {
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self.list_page(page_size, page_token.as_deref()).await?;
            documents.extend(page.documents);

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        debug!(collection = %self.collection, count = documents.len(), "已拉取集合快照");
        Ok(documents)
    }

    /// 构造按 `field` 排序的结构化查询
    ///
    /// 以 `__name__` 作为第二排序键；给出游标时只返回严格位于游标之后的文档。
    /// 缺少 `field` 的文档不会出现在结果中。
    pub fn cursor_query_body(
        &self,
        field: &str,
        after: Option<&QueryCursor>,
        descending: bool,
        limit: u32,
    ) -> Value {
        let direction = if descending { "DESCENDING" } else { "ASCENDING" };
        let mut query = json!({
            "from": [{ "collectionId": self.collection }],
            "orderBy": [
                { "field": { "fieldPath": field }, "direction": direction },
                { "field": { "fieldPath": "__name__" }, "direction": direction }
            ],
            "limit": limit
        });
        if let Some(cursor) = after {
            query["startAt"] = json!({
                "values": [cursor.value, { "referenceValue": cursor.name }],
                "before": false
            });
        }

        json!({ "structuredQuery": query })
    }

    /// 执行一次结构化查询
    pub async fn run_query(&self, body: &Value) -> Result<Vec<Document>> {
        let token = self.tokens.access_token().await?;

        let response = self
            .http
            .post(self.run_query_url())
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| NotificationError::Listener(format!("查询文档失败: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::Listener(describe_google_error(
                status, &body,
            )));
        }

        let items: Vec<RunQueryResponseItem> = response
            .json()
            .await
            .map_err(|e| NotificationError::InvalidDocument(format!("查询响应解析失败: {e}")))?;

        Ok(items.into_iter().filter_map(|item| item.document).collect())
    }

    /// `field` 最大的文档，用作增量查询的初始游标
    pub async fn latest_document(&self, field: &str) -> Result<Option<Document>> {
        let body = self.cursor_query_body(field, None, true, 1);
        Ok(self.run_query(&body).await?.into_iter().next())
    }

    /// 游标之后的全部文档，按 `field` 升序分页拉取
    pub async fn documents_after(
        &self,
        field: &str,
        after: Option<&QueryCursor>,
        page_size: u32,
    ) -> Result<Vec<Document>> {
        let page_size = page_size.max(1);
        let mut documents = Vec::new();
        let mut cursor = after.cloned();

        loop {
            let body = self.cursor_query_body(field, cursor.as_ref(), false, page_size);
            let page = self.run_query(&body).await?;
            let exhausted = page.len() < page_size as usize;
            let next = page.last().and_then(|d| QueryCursor::at(d, field));
            documents.extend(page);

            match next {
                Some(next) if !exhausted => cursor = Some(next),
                _ => break,
            }
        }

        if !documents.is_empty() {
            debug!(collection = %self.collection, count = documents.len(), "增量查询返回新文档");
        }
        Ok(documents)
    }

    /// 构造标记写入的 commit 请求体
    pub fn commit_body(&self, record_id: &str, marker: &DeliveryMarker) -> Value {
        let mut fields = json!({
            "messageId": { "stringValue": marker.message_id }
        });
        let mut field_paths = vec!["messageId"];
        let mut transforms = Vec::new();

        match marker.sent_at {
            MarkerTimestamp::ServerTime => transforms.push(json!({
                "fieldPath": "sentAt",
                "setToServerValue": "REQUEST_TIME"
            })),
            MarkerTimestamp::At(at) => {
                fields["sentAt"] = json!({
                    "timestampValue": at.to_rfc3339_opts(SecondsFormat::Micros, true)
                });
                field_paths.push("sentAt");
            }
        }

        json!({
            "writes": [{
                "update": {
                    "name": self.document_name(record_id),
                    "fields": fields
                },
                "updateMask": { "fieldPaths": field_paths },
                "updateTransforms": transforms,
                "currentDocument": { "exists": true }
            }]
        })
    }
}

#[async_trait]
impl MarkerStore for FirestoreClient {
    async fn mark_delivered(&self, record_id: &str, marker: &DeliveryMarker) -> Result<()> {
        let write_failed = |reason: String| NotificationError::MarkerWriteFailed {
            record_id: record_id.to_string(),
            reason,
        };

        let token = self
            .tokens
            .access_token()
            .await
            .map_err(|e| write_failed(e.to_string()))?;

        let response = self
            .http
            .post(self.commit_url())
            .bearer_auth(token)
            .json(&self.commit_body(record_id, marker))
            .send()
            .await
            .map_err(|e| write_failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(write_failed(describe_google_error(status, &body)));
        }

        Ok(())
    }
}
