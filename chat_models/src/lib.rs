//! `chat_models` 是聊天路由服务各组件之间共享的数据模型 Crate。
//!
//! 主要模块包括：
//! - `enums`: 定义跨组件共享的通用枚举类型，如 `MessageKind`。
//! - `messages`: 定义核心业务消息结构 `ChatMessage`。
//! - `ws_payloads`: 定义 WebSocket 通信中使用的辅助 Payload 结构体及消息类型常量。

pub mod enums;
pub mod messages;
pub mod ws_payloads;
