//! Google HTTP 客户端集成测试
//!
//! 在本地端口启动 axum 模拟服务，验证 FCM、Firestore 与令牌端点的请求格式和错误映射。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Form, Json, Router,
    extract::{Query, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::IntoResponse,
    routing::post,
};
use futures::StreamExt;
use notification_relay::auth::{AccessTokenProvider, ServiceAccountTokenProvider, StaticTokenProvider};
use notification_relay::credentials::parse_service_account;
use notification_relay::firestore::{FirestoreClient, FirestoreSnapshotListener};
use notification_relay::marker::{DeliveryMarker, MarkerStore};
use notification_relay::sender::{FcmGateway, PushGateway, PushMessage};
use notification_relay::source::ChangeSource;
use notification_relay::{ChangeKind, NotificationError};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;

const TEST_PRIVATE_KEY: &str = include_str!("fixtures/test_private_key.pem");

#[derive(Clone, Default)]
struct Captured {
    requests: Arc<Mutex<Vec<(String, Option<String>, Value)>>>,
}

impl Captured {
    fn push(&self, path: &str, headers: &HeaderMap, body: Value) {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.requests.lock().push((path.to_string(), auth, body));
    }

    fn all(&self) -> Vec<(String, Option<String>, Value)> {
        self.requests.lock().clone()
    }
}

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn document(id: &str, fields: Value, created: &str) -> Value {
    json!({
        "name": format!("projects/demo/databases/(default)/documents/notifications/{id}"),
        "fields": fields,
        "createTime": created,
        "updateTime": created
    })
}

// ==================== FCM ====================

#[tokio::test]
async fn test_fcm_send_success() {
    let captured = Captured::default();
    let app = Router::new()
        .route(
            "/v1/projects/demo/messages:send",
            post(
                |State(captured): State<Captured>, uri: Uri, headers: HeaderMap, Json(body): Json<Value>| async move {
                    captured.push(uri.path(), &headers, body);
                    Json(json!({ "name": "projects/demo/messages/0:1700000000" }))
                },
            ),
        )
        .with_state(captured.clone());
    let base = serve(app).await;

    let gateway = FcmGateway::new(
        reqwest::Client::new(),
        &base,
        "demo",
        Arc::new(StaticTokenProvider::new("test-token")),
    );
    let message_id = gateway
        .send(&PushMessage::new("Hi", "Test", "all_staff"))
        .await
        .unwrap();

    assert_eq!(message_id, "projects/demo/messages/0:1700000000");

    let requests = captured.all();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].1.as_deref(), Some("Bearer test-token"));
    assert_eq!(
        requests[0].2,
        json!({
            "message": {
                "notification": { "title": "Hi", "body": "Test" },
                "topic": "all_staff"
            }
        })
    );
}

#[tokio::test]
async fn test_fcm_send_error_maps_to_send_failed() {
    let app = Router::new().route(
        "/v1/projects/demo/messages:send",
        post(|| async {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": {
                        "code": 400,
                        "message": "Invalid topic name",
                        "status": "INVALID_ARGUMENT"
                    }
                })),
            )
        }),
    );
    let base = serve(app).await;

    let gateway = FcmGateway::new(
        reqwest::Client::new(),
        &base,
        "demo",
        Arc::new(StaticTokenProvider::new("t")),
    );
    let err = gateway
        .send(&PushMessage::new("Hi", "Test", "bad topic!"))
        .await
        .unwrap_err();

    match err {
        NotificationError::SendFailed { topic, reason } => {
            assert_eq!(topic, "bad topic!");
            assert_eq!(reason, "400 INVALID_ARGUMENT: Invalid topic name");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

// ==================== Firestore ====================

async fn firestore_list(
    Query(query): Query<HashMap<String, String>>,
    uri: Uri,
) -> impl IntoResponse {
    assert!(uri.path().ends_with("/documents/notifications"));

    match query.get("pageToken").map(String::as_str) {
        None => Json(json!({
            "documents": [
                document("a", json!({ "title": { "stringValue": "A" } }), "2024-05-01T08:00:01Z"),
                document("b", json!({
                    "title": { "stringValue": "B" },
                    "sentAt": { "timestampValue": "2024-05-01T08:00:03Z" },
                    "messageId": { "stringValue": "projects/demo/messages/b" }
                }), "2024-05-01T08:00:02Z")
            ],
            "nextPageToken": "page-2"
        })),
        Some("page-2") => Json(json!({
            "documents": [
                document("c", json!({
                    "title": { "stringValue": "C" },
                    "body": { "stringValue": "see you" },
                    "target": { "stringValue": "Team Leads" }
                }), "2024-05-01T08:00:04Z")
            ]
        })),
        Some(other) => panic!("unexpected page token {other}"),
    }
}

fn firestore_client(base: &str) -> FirestoreClient {
    FirestoreClient::new(
        reqwest::Client::new(),
        base,
        "demo",
        "notifications",
        Arc::new(StaticTokenProvider::new("owner")),
    )
}

#[tokio::test]
async fn test_firestore_list_walks_all_pages() {
    let base = serve(Router::new().fallback(firestore_list)).await;
    let client = firestore_client(&base);

    let documents = client.list_documents(2).await.unwrap();
    let records: Vec<_> = documents.iter().map(|d| d.to_record()).collect();

    assert_eq!(records.len(), 3);
    assert_eq!(records[0].id, "a");
    assert!(!records[0].is_delivered());
    assert!(records[1].is_delivered());
    assert_eq!(records[2].target.as_deref(), Some("Team Leads"));
    assert_eq!(records[2].body, "see you");
}

#[tokio::test]
async fn test_snapshot_listener_reports_existing_documents_as_added() {
    let base = serve(Router::new().fallback(firestore_list)).await;
    let client = Arc::new(firestore_client(&base));
    let listener = FirestoreSnapshotListener::new(client, Duration::from_millis(100), 2);

    let mut stream = listener.subscribe().await.unwrap();
    let mut ids = Vec::new();
    for _ in 0..3 {
        let event = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, ChangeKind::Added);
        ids.push(event.record.id);
    }

    assert_eq!(ids, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_snapshot_listener_yields_error_on_failed_poll() {
    let app = Router::new().fallback(|| async {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": { "status": "UNAVAILABLE", "message": "try again" } })),
        )
    });
    let base = serve(app).await;
    let listener = FirestoreSnapshotListener::new(
        Arc::new(firestore_client(&base)),
        Duration::from_millis(100),
        10,
    );

    let mut stream = listener.subscribe().await.unwrap();
    let item = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .unwrap()
        .unwrap();

    assert!(matches!(item, Err(NotificationError::Listener(m)) if m.contains("UNAVAILABLE")));
}

#[derive(Clone, Default)]
struct CursorBackend {
    lists: Arc<Mutex<usize>>,
    queries: Arc<Mutex<Vec<Value>>>,
}

fn timestamped(id: &str, created: &str) -> Value {
    document(
        id,
        json!({
            "title": { "stringValue": id },
            "createdAt": { "timestampValue": created }
        }),
        created,
    )
}

async fn cursor_backend(
    State(backend): State<CursorBackend>,
    method: Method,
    uri: Uri,
    body: String,
) -> Json<Value> {
    if method == Method::GET {
        *backend.lists.lock() += 1;
        let documents: Vec<Value> = (0..50)
            .map(|i| timestamped(&format!("n{i:02}"), &format!("2024-05-01T08:00:{i:02}Z")))
            .collect();
        return Json(json!({ "documents": documents }));
    }

    assert!(uri.path().ends_with("/documents:runQuery"));
    let query: Value = serde_json::from_str(&body).unwrap();
    let descending = query["structuredQuery"]["orderBy"][0]["direction"] == "DESCENDING";

    let ascending_seen = {
        let mut queries = backend.queries.lock();
        queries.push(query);
        queries
            .iter()
            .filter(|q| q["structuredQuery"]["orderBy"][0]["direction"] == "ASCENDING")
            .count()
    };

    if descending {
        return Json(json!([{ "document": timestamped("n49", "2024-05-01T08:00:49Z") }]));
    }
    // 第三次增量查询时出现一条新文档
    if ascending_seen == 3 {
        return Json(json!([{ "document": timestamped("fresh", "2024-05-01T08:01:00Z") }]));
    }
    Json(json!([{ "readTime": "2024-05-01T09:00:00Z" }]))
}

#[tokio::test]
async fn test_cursor_listener_lists_once_then_queries_incrementally() {
    let backend = CursorBackend::default();
    let app = Router::new()
        .fallback(cursor_backend)
        .with_state(backend.clone());
    let base = serve(app).await;

    let listener = FirestoreSnapshotListener::new(
        Arc::new(firestore_client(&base)),
        Duration::from_millis(100),
        300,
    )
    .with_cursor("createdAt", Duration::from_secs(60));

    let mut stream = listener.subscribe().await.unwrap();
    let mut ids = Vec::new();
    for _ in 0..51 {
        let event = tokio::time::timeout(Duration::from_secs(3), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, ChangeKind::Added);
        ids.push(event.record.id);
    }
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(ids.len(), 51);
    assert_eq!(ids[0], "n00");
    assert_eq!(ids[49], "n49");
    assert_eq!(ids[50], "fresh");

    // 全量列举只在启动时发生一次，之后每轮只有一次空结果查询
    assert_eq!(*backend.lists.lock(), 1);

    let queries = backend.queries.lock().clone();
    assert!(queries.len() >= 5, "queries: {}", queries.len());
    assert_eq!(queries[0]["structuredQuery"]["orderBy"][0]["direction"], "DESCENDING");

    let start_name = |q: &Value| {
        q["structuredQuery"]["startAt"]["values"][1]["referenceValue"]
            .as_str()
            .unwrap()
            .to_string()
    };
    assert!(start_name(&queries[1]).ends_with("/notifications/n49"));
    assert!(start_name(queries.last().unwrap()).ends_with("/notifications/fresh"));

    // 没有新文档时不再产生事件
    assert!(
        tokio::time::timeout(Duration::from_millis(300), stream.next())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_firestore_commit_marker() {
    let captured = Captured::default();
    let app = Router::new()
        .fallback(
            |State(captured): State<Captured>, uri: Uri, headers: HeaderMap, Json(body): Json<Value>| async move {
                captured.push(uri.path(), &headers, body);
                Json(json!({ "commitTime": "2024-05-01T08:00:05Z", "writeResults": [{}] }))
            },
        )
        .with_state(captured.clone());
    let base = serve(app).await;
    let client = firestore_client(&base);

    client
        .mark_delivered("abc", &DeliveryMarker::server_time("projects/demo/messages/1"))
        .await
        .unwrap();

    let requests = captured.all();
    assert_eq!(requests.len(), 1);
    let (path, auth, body) = &requests[0];
    assert_eq!(path, "/v1/projects/demo/databases/(default)/documents:commit");
    assert_eq!(auth.as_deref(), Some("Bearer owner"));

    let write = &body["writes"][0];
    assert_eq!(
        write["update"]["name"],
        "projects/demo/databases/(default)/documents/notifications/abc"
    );
    assert_eq!(
        write["update"]["fields"]["messageId"]["stringValue"],
        "projects/demo/messages/1"
    );
    assert_eq!(write["updateTransforms"][0]["setToServerValue"], "REQUEST_TIME");
    assert_eq!(write["currentDocument"]["exists"], true);
}

#[tokio::test]
async fn test_firestore_commit_on_deleted_record_fails() {
    let app = Router::new().fallback(|| async {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": { "status": "NOT_FOUND", "message": "No document to update" } })),
        )
    });
    let base = serve(app).await;

    let err = firestore_client(&base)
        .mark_delivered("gone", &DeliveryMarker::server_time("m"))
        .await
        .unwrap_err();

    match err {
        NotificationError::MarkerWriteFailed { record_id, reason } => {
            assert_eq!(record_id, "gone");
            assert!(reason.contains("NOT_FOUND"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

// ==================== OAuth2 ====================

#[tokio::test]
async fn test_service_account_token_is_fetched_once_and_cached() {
    let forms: Arc<Mutex<Vec<HashMap<String, String>>>> = Arc::default();
    let app = Router::new()
        .route(
            "/token",
            post(
                |State(forms): State<Arc<Mutex<Vec<HashMap<String, String>>>>>,
                 Form(form): Form<HashMap<String, String>>| async move {
                    forms.lock().push(form);
                    Json(json!({
                        "access_token": "ya29.test",
                        "expires_in": 3600,
                        "token_type": "Bearer"
                    }))
                },
            ),
        )
        .with_state(forms.clone());
    let base = serve(app).await;

    let raw = json!({
        "type": "service_account",
        "project_id": "demo",
        "private_key_id": "key-1",
        "private_key": TEST_PRIVATE_KEY.replace('\n', "\\n"),
        "client_email": "relay@demo.iam.gserviceaccount.com",
        "token_uri": format!("{base}/token")
    })
    .to_string();
    let key = parse_service_account(&raw).unwrap();

    let provider = ServiceAccountTokenProvider::new(
        reqwest::Client::new(),
        &key,
        vec!["https://www.googleapis.com/auth/firebase.messaging".to_string()],
    )
    .unwrap();

    assert_eq!(provider.access_token().await.unwrap(), "ya29.test");
    assert_eq!(provider.access_token().await.unwrap(), "ya29.test");

    let forms = forms.lock().clone();
    assert_eq!(forms.len(), 1);
    assert_eq!(
        forms[0].get("grant_type").map(String::as_str),
        Some("urn:ietf:params:oauth:grant-type:jwt-bearer")
    );
    let assertion = forms[0].get("assertion").unwrap();
    assert_eq!(assertion.split('.').count(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_refresh() {
    let forms: Arc<Mutex<Vec<HashMap<String, String>>>> = Arc::default();
    let app = Router::new()
        .route(
            "/token",
            post(
                |State(forms): State<Arc<Mutex<Vec<HashMap<String, String>>>>>,
                 Form(form): Form<HashMap<String, String>>| async move {
                    forms.lock().push(form);
                    // 慢速令牌端点，保证所有调用方在刷新完成前到达
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Json(json!({
                        "access_token": "ya29.test",
                        "expires_in": 3600,
                        "token_type": "Bearer"
                    }))
                },
            ),
        )
        .with_state(forms.clone());
    let base = serve(app).await;

    let raw = json!({
        "project_id": "demo",
        "private_key": TEST_PRIVATE_KEY,
        "client_email": "relay@demo.iam.gserviceaccount.com",
        "token_uri": format!("{base}/token")
    })
    .to_string();
    let key = parse_service_account(&raw).unwrap();
    let provider = Arc::new(
        ServiceAccountTokenProvider::new(reqwest::Client::new(), &key, vec![]).unwrap(),
    );

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let provider = provider.clone();
        tasks.spawn(async move { provider.access_token().await });
    }

    let tokens: Vec<String> = tasks
        .join_all()
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(tokens.len(), 8);
    assert!(tokens.iter().all(|t| t == "ya29.test"));
    assert_eq!(forms.lock().len(), 1);
}

#[tokio::test]
async fn test_token_endpoint_error_maps_to_auth() {
    let app = Router::new().route(
        "/token",
        post(|| async { (StatusCode::UNAUTHORIZED, "invalid_grant") }),
    );
    let base = serve(app).await;

    let raw = json!({
        "project_id": "demo",
        "private_key": TEST_PRIVATE_KEY,
        "client_email": "relay@demo.iam.gserviceaccount.com",
        "token_uri": format!("{base}/token")
    })
    .to_string();
    let key = parse_service_account(&raw).unwrap();
    let provider = ServiceAccountTokenProvider::new(reqwest::Client::new(), &key, vec![]).unwrap();

    let err = provider.access_token().await.unwrap_err();
    assert!(matches!(err, NotificationError::Auth(m) if m.contains("invalid_grant")));
}
