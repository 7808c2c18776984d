//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// 服务配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

/// Firebase 配置
///
/// 凭证本身不进入配置文件，只记录从哪里读取：
/// 优先读取 `credentials_env` 指向的环境变量，缺失时回退到 `credentials_file`。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FirebaseConfig {
    /// 存放服务账号 JSON 的环境变量名
    pub credentials_env: String,
    /// 本地服务账号文件路径
    pub credentials_file: String,
    /// 覆盖凭证中的 project_id
    pub project_id: Option<String>,
    /// 监听的通知集合
    pub collection: String,
    /// target 为空时使用的默认推送主题
    pub default_topic: String,
    /// 快照轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    /// 单次列举文档的分页大小
    pub page_size: u32,
    /// 增量查询的排序字段，由写入方在创建时设置；为空时每次轮询都全量列举
    pub cursor_field: String,
    /// 增量模式下全量列举的间隔（秒），用于发现删除和缺少排序字段的文档
    pub resync_interval_secs: u64,
    pub firestore_base_url: String,
    pub fcm_base_url: String,
    pub token_scopes: Vec<String>,
}

impl Default for FirebaseConfig {
    fn default() -> Self {
        Self {
            credentials_env: "FIREBASE_SERVICE_ACCOUNT".to_string(),
            credentials_file: "service_account.json".to_string(),
            project_id: None,
            collection: "notifications".to_string(),
            default_topic: "all".to_string(),
            poll_interval_ms: 5000,
            page_size: 300,
            cursor_field: "createdAt".to_string(),
            resync_interval_secs: 300,
            firestore_base_url: "https://firestore.googleapis.com".to_string(),
            fcm_base_url: "https://fcm.googleapis.com".to_string(),
            token_scopes: vec![
                "https://www.googleapis.com/auth/firebase.messaging".to_string(),
                "https://www.googleapis.com/auth/datastore".to_string(),
            ],
        }
    }
}

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// 日志输出格式：json（结构化）或 pretty（人类可读）
    pub log_format: String,
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
        }
    }
}

impl ObservabilityConfig {
    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub server: ServerConfig,
    pub firebase: FirebaseConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. .env 文件（存在时注入进程环境变量）
    /// 2. config/default.toml（默认配置）
    /// 3. config/{environment}.toml（环境特定配置）
    /// 4. config/{service_name}.toml（服务特定配置）
    /// 5. 环境变量（RELAY_ 前缀，如 RELAY_FIREBASE__COLLECTION -> firebase.collection）
    /// 6. PORT 环境变量（托管平台注入的监听端口）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let env = std::env::var("RELAY_ENV").unwrap_or_else(|_| "development".to_string());

        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env.clone())?
            .add_source(File::from(Path::new(&config_dir).join("default.toml")).required(false))
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", env))).required(false),
            )
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", service_name)))
                    .required(false),
            )
            .add_source(
                Environment::with_prefix("RELAY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let mut config: Self = builder.build()?.try_deserialize()?;

        if let Some(port) = Self::port_from_env() {
            config.server.port = port;
        }

        Ok(config)
    }

    /// 读取 PORT 环境变量，无法解析时忽略
    fn port_from_env() -> Option<u16> {
        parse_port(std::env::var("PORT").ok().as_deref())
    }

    /// 获取服务地址
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse_port(raw: Option<&str>) -> Option<u16> {
    raw.and_then(|v| v.trim().parse().ok())
}
