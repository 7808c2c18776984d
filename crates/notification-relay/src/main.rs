//! 通知中继服务
//!
//! 监听 Firestore 通知集合并通过 FCM 推送新增通知。

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use notification_relay::{
    NotificationConsumer,
    auth::ServiceAccountTokenProvider,
    credentials::load_service_account,
    firestore::{FirestoreClient, FirestoreSnapshotListener},
    sender::FcmGateway,
    server,
};
use relay_shared::{config::AppConfig, error::RelayError, observability};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "notification-relay";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config, config_error) = match AppConfig::load(SERVICE_NAME) {
        Ok(config) => (config, None),
        Err(e) => (AppConfig::default(), Some(RelayError::from(e))),
    };

    let guard = observability::init(SERVICE_NAME, &config.observability)?;

    if let Some(e) = config_error {
        warn!(code = e.code(), error = %e, "配置加载失败，使用默认配置");
    }

    info!(
        environment = %config.environment,
        collection = %config.firebase.collection,
        "Starting {SERVICE_NAME} on {}",
        config.server_addr()
    );

    // 凭证缺失或无效时直接退出
    let firebase = &config.firebase;
    let (key, source) =
        match load_service_account(&firebase.credentials_env, Path::new(&firebase.credentials_file)) {
            Ok(loaded) => loaded,
            Err(e) => {
                error!(error = %e, "服务账号凭证加载失败");
                return Err(e.into());
            }
        };

    let project_id = firebase
        .project_id
        .clone()
        .unwrap_or_else(|| key.project_id.clone());
    info!(project_id = %project_id, source = %source, "Firebase 服务账号已就绪");

    let http = reqwest::Client::builder()
        .user_agent(concat!("notification-relay/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let tokens = Arc::new(ServiceAccountTokenProvider::new(
        http.clone(),
        &key,
        firebase.token_scopes.clone(),
    )?);

    let firestore = Arc::new(FirestoreClient::new(
        http.clone(),
        &firebase.firestore_base_url,
        project_id.clone(),
        firebase.collection.clone(),
        tokens.clone(),
    ));
    let listener = FirestoreSnapshotListener::new(
        firestore.clone(),
        Duration::from_millis(firebase.poll_interval_ms),
        firebase.page_size,
    )
    .with_cursor(
        firebase.cursor_field.as_str(),
        Duration::from_secs(firebase.resync_interval_secs),
    );
    let gateway = FcmGateway::new(http, &firebase.fcm_base_url, &project_id, tokens);

    let consumer = NotificationConsumer::new(
        Arc::new(listener),
        Arc::new(gateway),
        firestore,
        &firebase.default_topic,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer_handle = tokio::spawn(consumer.run(shutdown_rx));

    let app = server::router(SERVICE_NAME, guard.metrics_handle());

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    // 收到 SIGTERM 或 Ctrl+C 时停止接收新连接，随后通知消费者退出
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    match consumer_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "通知消费者异常退出"),
        Err(e) => error!(error = %e, "通知消费者任务失败"),
    }

    info!("Server shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
