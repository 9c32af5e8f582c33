//! `chat_service` 聊天消息路由服务核心库。
//!
//! 本 Crate 实现面向持久客户端连接的实时消息路由：维护用户身份到活动连接的映射、
//! 房间成员关系，以及单播 / 全局广播 / 房间组播三种投递算法，
//! 并保证上述状态在并发的连接建立、断开与发送活动下保持一致。
//!
//! 主要模块包括：
//! - `auth`: 握手阶段的身份认证协作方（trait 及查询串实现）。
//! - `config`: 管理服务配置的加载与访问。
//! - `error`: 定义服务特定的错误类型。
//! - `ws_server`: 实现 WebSocket 服务端，处理客户端连接、消息路由和实时通信。

pub mod auth;
pub mod config;
pub mod error;
pub mod ws_server;
