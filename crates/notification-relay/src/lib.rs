//! 通知中继服务
//!
//! 监听 Firestore 通知集合，为每条新增记录发送一次 FCM 主题推送，
//! 成功后在原记录上写回 `sentAt` 与 `messageId`。
//!
//! ## 处理流程
//!
//! - **变更订阅**：`ChangeSource` 产出 added / modified / removed 事件，只处理新增
//! - **主题规范化**：`target` 转小写，空白替换为下划线，缺省为 `all`
//! - **推送**：`PushGateway` 发送 `{ notification: { title, body }, topic }`
//! - **投递标记**：`MarkerStore` 写入服务端时间戳与消息标识
//!
//! ## 模块结构
//!
//! - `credentials`: 服务账号凭证的规范化与加载
//! - `auth`: Google OAuth2 访问令牌
//! - `firestore`: Firestore REST 客户端与快照监听
//! - `sender`: 推送网关与 FCM 实现
//! - `consumer`: 消费循环与单条记录处理
//! - `memory`: 内存集合，用于测试和本地开发
//! - `server`: 存活探针与指标接口

pub mod auth;
pub mod consumer;
pub mod credentials;
pub mod error;
pub mod firestore;
pub mod marker;
pub mod memory;
pub mod record;
pub mod sender;
pub mod server;
pub mod source;
pub mod test_utils;
pub mod topic;

pub use consumer::{DeliveryOutcome, NotificationConsumer, process_record};
pub use error::{NotificationError, Result};
pub use record::{ChangeEvent, ChangeKind, NotificationRecord};
