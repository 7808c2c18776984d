//! 统一错误处理模块
//!
//! 定义各组件共享的基础错误类型，使用 thiserror 提供良好的错误信息。

use thiserror::Error;

/// 基础设施错误类型
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("配置错误: {0}")]
    Config(#[from] config::ConfigError),
}

impl RelayError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
        }
    }
}
