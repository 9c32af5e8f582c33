//! 包含 WebSocket 通信中使用的辅助 Payload 结构体定义及消息类型常量。

use serde::{Deserialize, Serialize};

/// 承载 [`crate::messages::ChatMessage`] 负载的信封消息类型。
pub const CHAT_MESSAGE_TYPE: &str = "Chat";

/// 服务端向客户端回送错误说明时使用的信封消息类型。
pub const ERROR_RESPONSE_MESSAGE_TYPE: &str = "ErrorResponse";

/// 服务端向客户端回送的标准错误响应负载。
///
/// 当某条入站消息解码失败或类型不被支持时，服务端不会断开连接，
/// 而是尽力回送一条 `ErrorResponse`，随后继续处理该连接上的后续消息。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorResponsePayload {
    /// 可选，引发错误的原始请求的信封消息类型。
    pub original_message_type: Option<String>,
    /// 错误的描述文本。
    pub error: String,
}
