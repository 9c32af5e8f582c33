//! 定义 WebSocket 通信中使用的核心消息信封结构。
//!
//! `WsMessage` 是客户端与服务端之间所有消息交换的标准格式：
//! 业务负载先被序列化为 JSON 字符串放入 `payload` 字段，
//! 再由 `message_type` 指明负载的业务类型。
//! 对路由核心而言，`WsMessage::new` / `WsMessage::deserialize_payload`
//! 就是规范中所说的编码/解码纯函数。

use crate::error::WsError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 客户端与服务端之间交换的标准消息信封。
///
/// # 字段
/// - `message_id`: UUID v4 生成的唯一字符串标识，用于追踪与调试。
/// - `message_type`: 负载的业务类型（例如 "Chat", "ErrorResponse"），
///   接收方据此决定如何解释 `payload`。
/// - `payload`: 实际业务数据，JSON 字符串形式。
/// - `timestamp`: 信封创建时的 UTC 时间戳（Unix 纪元以来的毫秒数）。
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WsMessage {
    pub message_id: String,
    pub message_type: String,
    pub payload: String,
    pub timestamp: i64,
}

impl WsMessage {
    /// 创建一个新的 `WsMessage`，自动生成 `message_id` 与当前时间戳，
    /// 并将 `payload_data` 序列化为 JSON 字符串。
    ///
    /// # Arguments
    /// * `message_type` - 消息的业务类型。
    /// * `payload_data` - 实现了 `Serialize` 的业务负载引用。
    ///
    /// # Returns
    /// 序列化成功时返回新的 `WsMessage`，失败时返回 `WsError::SerializationError`。
    pub fn new<T: Serialize>(message_type: impl Into<String>, payload_data: &T) -> Result<WsMessage, WsError> {
        let payload = serde_json::to_string(payload_data)
            .map_err(|e| WsError::SerializationError(format!("创建 WsMessage 时序列化负载失败: {}", e)))?;
        Ok(WsMessage {
            message_id: Uuid::new_v4().to_string(),
            message_type: message_type.into(),
            payload,
            timestamp: Utc::now().timestamp_millis(),
        })
    }

    /// 将 `payload` 字段中的 JSON 字符串反序列化为目标类型 `T`。
    ///
    /// # Returns
    /// 成功时返回反序列化后的实例；JSON 格式不正确或与 `T` 不匹配时
    /// 返回 `WsError::DeserializationError`。
    pub fn deserialize_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, WsError> {
        serde_json::from_str(&self.payload).map_err(|e| {
            WsError::DeserializationError(format!(
                "WsMessage 负载反序列化失败: {}, 原始负载: '{}'",
                e, self.payload
            ))
        })
    }
}
