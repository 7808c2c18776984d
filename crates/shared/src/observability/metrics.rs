//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标由存活探针所在的 HTTP 服务通过 `/metrics` 暴露，供 Prometheus 抓取。

use anyhow::Result;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// 安装 Prometheus recorder
///
/// 重复调用时返回首次安装的 handle。
pub fn init(service_name: &str) -> Result<PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_common_metrics(service_name);

    Ok(handle)
}

/// 注册通用指标
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::describe_counter!(
        "relay_change_events_total",
        "Total number of change events observed on the watched collection"
    );
    metrics::describe_counter!(
        "relay_deliveries_total",
        "Total number of notification delivery outcomes"
    );
    metrics::describe_histogram!(
        "relay_send_duration_seconds",
        "Push gateway send duration in seconds"
    );
    metrics::describe_counter!(
        "relay_marker_writes_total",
        "Total number of delivery marker writes"
    );
    metrics::describe_counter!(
        "relay_listener_errors_total",
        "Total number of change listener errors"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录 HTTP 请求
#[inline]
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str.clone()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str
    )
    .record(duration_secs);
}

/// 记录变更事件（added / modified / removed）
#[inline]
pub fn record_change_event(kind: &str) {
    metrics::counter!("relay_change_events_total", "kind" => kind.to_string()).increment(1);
}

/// 记录一次投递结果
#[inline]
pub fn record_delivery(status: &str) {
    metrics::counter!("relay_deliveries_total", "status" => status.to_string()).increment(1);
}

/// 记录推送网关调用耗时
#[inline]
pub fn record_send_duration(success: bool, duration_secs: f64) {
    metrics::histogram!(
        "relay_send_duration_seconds",
        "success" => success.to_string()
    )
    .record(duration_secs);
}

/// 记录投递标记写入
#[inline]
pub fn record_marker_write(status: &str) {
    metrics::counter!("relay_marker_writes_total", "status" => status.to_string()).increment(1);
}

/// 记录监听器错误
#[inline]
pub fn record_listener_error() {
    metrics::counter!("relay_listener_errors_total").increment(1);
}
