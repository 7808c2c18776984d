//! 服务账号凭证加载
//!
//! 托管平台常以不同形式注入服务账号 JSON：原样 JSON、带引号的 JSON 字符串、
//! base64 编码的 JSON，私钥中的换行也可能被转义成字面量 `\n`。
//! 这里把归一化拆成一组有序的纯函数步骤，每一步都可单独测试，
//! 最后解析为 `ServiceAccountKey` 并修正私钥换行。

use std::fmt;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const PARSE_STEP: &str = "parse_json";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("服务账号凭证为空")]
    Empty,

    /// 某个归一化或解析步骤失败
    #[error("凭证处理失败: step={step}, 原因={reason}")]
    Step { step: &'static str, reason: String },

    #[error("读取凭证文件失败: path={path}, 原因={reason}")]
    Read { path: String, reason: String },

    #[error("未找到服务账号凭证: 环境变量 {env_var} 未设置且文件 {path} 不存在")]
    Missing { env_var: String, path: String },
}

impl CredentialError {
    /// 失败步骤的名称
    pub fn step(&self) -> Option<&'static str> {
        match self {
            Self::Step { step, .. } => Some(*step),
            _ => None,
        }
    }
}

/// Google 服务账号密钥
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "type", default)]
    pub key_type: Option<String>,
    pub project_id: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    /// PEM 格式私钥
    pub private_key: String,
    pub client_email: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

// 私钥不进入日志
impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("project_id", &self.project_id)
            .field("private_key_id", &self.private_key_id)
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

/// 凭证来源，仅用于启动日志
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    Env(String),
    File(PathBuf),
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Env(var) => write!(f, "env:{var}"),
            Self::File(path) => write!(f, "file:{}", path.display()),
        }
    }
}

// ---------------------------------------------------------------------------
// 归一化步骤
// ---------------------------------------------------------------------------

/// 单个归一化步骤
pub struct NormalizationStep {
    pub name: &'static str,
    pub apply: fn(String) -> Result<String, CredentialError>,
}

/// 按顺序执行的归一化步骤
pub const NORMALIZATION_STEPS: &[NormalizationStep] = &[
    NormalizationStep {
        name: "trim",
        apply: trim,
    },
    NormalizationStep {
        name: "unquote",
        apply: unquote,
    },
    NormalizationStep {
        name: "decode_base64",
        apply: decode_base64,
    },
];

/// 去除首尾空白，结果为空时报错
pub fn trim(raw: String) -> Result<String, CredentialError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CredentialError::Empty);
    }
    Ok(trimmed.to_string())
}

/// 去掉包裹整个值的引号
///
/// 双引号值优先按 JSON 字符串字面量解码（处理 `\"` 转义）；
/// 解码失败时（内部引号未转义）直接剥掉首尾引号。单引号值直接剥掉。
pub fn unquote(raw: String) -> Result<String, CredentialError> {
    let is_wrapped =
        |quote: char| raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote);

    if is_wrapped('"') {
        let inner = serde_json::from_str::<String>(&raw)
            .unwrap_or_else(|_| raw[1..raw.len() - 1].to_string());
        return Ok(inner.trim().to_string());
    }

    if is_wrapped('\'') {
        return Ok(raw[1..raw.len() - 1].trim().to_string());
    }

    Ok(raw)
}

/// 识别并解码 base64 编码的 JSON
///
/// 已经是 JSON 对象的值原样返回；解码结果不是 JSON 对象时也原样返回，
/// 交由后续解析步骤报告错误。
pub fn decode_base64(raw: String) -> Result<String, CredentialError> {
    if raw.starts_with('{') {
        return Ok(raw);
    }

    // 长 base64 常被折行
    let compact: String = raw.split_whitespace().collect();

    let decoded = [STANDARD, URL_SAFE, STANDARD_NO_PAD, URL_SAFE_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(compact.as_bytes()).ok())
        .and_then(|bytes| String::from_utf8(bytes).ok());

    match decoded {
        Some(text) if text.trim_start().starts_with('{') => Ok(text.trim().to_string()),
        _ => Ok(raw),
    }
}

/// 将私钥中的字面量 `\n` 还原为换行
pub fn normalize_private_key(mut key: ServiceAccountKey) -> ServiceAccountKey {
    key.private_key = key.private_key.replace("\\n", "\n").replace("\r\n", "\n");
    key
}

/// 依次执行所有归一化步骤
pub fn normalize(raw: &str) -> Result<String, CredentialError> {
    NORMALIZATION_STEPS
        .iter()
        .try_fold(raw.to_string(), |value, step| {
            debug!(step = step.name, "执行凭证归一化步骤");
            (step.apply)(value).map_err(|e| CredentialError::Step {
                step: step.name,
                reason: e.to_string(),
            })
        })
}

/// 解析任意受支持形式的服务账号凭证
pub fn parse_service_account(raw: &str) -> Result<ServiceAccountKey, CredentialError> {
    let json = normalize(raw)?;
    let key: ServiceAccountKey =
        serde_json::from_str(&json).map_err(|e| CredentialError::Step {
            step: PARSE_STEP,
            reason: e.to_string(),
        })?;
    Ok(normalize_private_key(key))
}

// ---------------------------------------------------------------------------
// 加载
// ---------------------------------------------------------------------------

/// 从环境变量加载凭证，未设置时回退到本地文件
pub fn load_service_account(
    env_var: &str,
    file: &Path,
) -> Result<(ServiceAccountKey, CredentialSource), CredentialError> {
    resolve_service_account(env_var, std::env::var(env_var).ok(), file)
}

/// 与 `load_service_account` 相同，但环境变量值由调用方传入
pub fn resolve_service_account(
    env_var: &str,
    env_value: Option<String>,
    file: &Path,
) -> Result<(ServiceAccountKey, CredentialSource), CredentialError> {
    if let Some(raw) = env_value.filter(|v| !v.trim().is_empty()) {
        let key = parse_service_account(&raw)?;
        info!(source = %env_var, client_email = %key.client_email, "已从环境变量加载服务账号");
        return Ok((key, CredentialSource::Env(env_var.to_string())));
    }

    if !file.exists() {
        return Err(CredentialError::Missing {
            env_var: env_var.to_string(),
            path: file.display().to_string(),
        });
    }

    let raw = std::fs::read_to_string(file).map_err(|e| CredentialError::Read {
        path: file.display().to_string(),
        reason: e.to_string(),
    })?;
    let key = parse_service_account(&raw)?;
    info!(path = %file.display(), client_email = %key.client_email, "已从本地文件加载服务账号");
    Ok((key, CredentialSource::File(file.to_path_buf())))
}
